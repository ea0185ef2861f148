//! Per-request routing preference expressions.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::utils::ShardRouteError;

/// How a request asks its shard copies to be picked.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Preference {
    /// `_local`: favor copies on the local node, fall back to others.
    Local,

    /// `_only_local`: only copies on the local node.
    OnlyLocal,

    /// `_prefer_nodes:a,b`: favor copies on the given node IDs.
    PreferNodes(Vec<String>),

    /// `_only_nodes:expr,expr`: only copies on nodes matching the given
    /// selector expressions.
    OnlyNodes(Vec<String>),

    /// `_primary`: only the primary copy.
    Primary,

    /// Any other string; requests with the same string are routed to the
    /// same copies while the table is unchanged.
    Custom(String),
}

impl Preference {
    /// Rotation seed of a custom preference string. Stable for the lifetime
    /// of the process.
    pub fn custom_seed(custom: &str) -> i32 {
        let mut hasher = DefaultHasher::new();
        custom.hash(&mut hasher);
        hasher.finish() as i32
    }

    fn split_list(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}

impl FromStr for Preference {
    type Err = ShardRouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ShardRouteError::msg("empty preference"));
        }
        if !s.starts_with('_') {
            return Ok(Preference::Custom(s.into()));
        }

        let (kind, arg) = match s.split_once(':') {
            Some((kind, arg)) => (kind, Some(arg)),
            None => (s, None),
        };
        let pref = match (kind, arg) {
            ("_local", None) => Preference::Local,
            ("_only_local", None) => Preference::OnlyLocal,
            ("_primary", None) => Preference::Primary,
            ("_prefer_nodes", Some(list)) => {
                Preference::PreferNodes(Self::split_list(list))
            }
            ("_only_nodes", Some(list)) => {
                Preference::OnlyNodes(Self::split_list(list))
            }
            _ => {
                return Err(ShardRouteError::msg(format!(
                    "no preference found for [{}]",
                    s
                )))
            }
        };
        match &pref {
            Preference::PreferNodes(l) | Preference::OnlyNodes(l)
                if l.is_empty() =>
            {
                Err(ShardRouteError::msg(format!(
                    "preference [{}] lists no nodes",
                    s
                )))
            }
            _ => Ok(pref),
        }
    }
}

impl fmt::Display for Preference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Preference::Local => write!(f, "_local"),
            Preference::OnlyLocal => write!(f, "_only_local"),
            Preference::PreferNodes(l) => {
                write!(f, "_prefer_nodes:{}", l.join(","))
            }
            Preference::OnlyNodes(l) => {
                write!(f, "_only_nodes:{}", l.join(","))
            }
            Preference::Primary => write!(f, "_primary"),
            Preference::Custom(s) => write!(f, "{}", s),
        }
    }
}
