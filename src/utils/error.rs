//! Customized unified error type.

use std::error;
use std::fmt;
use std::io;
use std::num;
use std::str;

use crate::routing::ShardId;

/// Customized error type for shardroute.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ShardRouteError {
    /// Node selector expressions resolved to no copy of the shard.
    NoMatchingNodes {
        selectors: Vec<String>,
        shard: ShardId,
    },

    /// Two assigned copies (relocation targets included) share a node.
    PlacementConflict { shard: ShardId, node: String },

    /// Malformed routing table wire data.
    Decode(String),

    /// Anything else, carried as its string representation.
    Msg(String),
}

impl ShardRouteError {
    pub fn msg(msg: impl ToString) -> Self {
        ShardRouteError::Msg(msg.to_string())
    }

    pub fn decode(msg: impl ToString) -> Self {
        ShardRouteError::Decode(msg.to_string())
    }
}

impl fmt::Display for ShardRouteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ShardRouteError::NoMatchingNodes { selectors, shard } => write!(
                f,
                "no data nodes with {} [{}] found for shard: {}",
                if selectors.len() == 1 {
                    "criteria"
                } else {
                    "criterion"
                },
                selectors.join(","),
                shard
            ),
            ShardRouteError::PlacementConflict { shard, node } => write!(
                f,
                "more than one copy of shard {} assigned to node [{}]",
                shard, node
            ),
            ShardRouteError::Decode(m) => {
                write!(f, "malformed routing table data: {}", m)
            }
            ShardRouteError::Msg(m) => write!(f, "{}", m), // no quotes
        }
    }
}

impl error::Error for ShardRouteError {}

// Helper macro for saving boiler-plate `impl From<X>`s for transparent
// conversion from various common error types to `ShardRouteError`.
macro_rules! impl_from_error {
    ($error:ty) => {
        impl From<$error> for ShardRouteError {
            fn from(e: $error) -> Self {
                // just store the source error's string representation
                ShardRouteError::Msg(e.to_string())
            }
        }
    };
}

impl_from_error!(io::Error);
impl_from_error!(num::ParseIntError);
impl_from_error!(toml::de::Error);
impl_from_error!(ctrlc::Error);

// wire-level failures are always decode faults
impl From<prost::DecodeError> for ShardRouteError {
    fn from(e: prost::DecodeError) -> Self {
        ShardRouteError::Decode(e.to_string())
    }
}

impl From<str::Utf8Error> for ShardRouteError {
    fn from(e: str::Utf8Error) -> Self {
        ShardRouteError::Decode(e.to_string())
    }
}
