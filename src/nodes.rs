//! Discovered cluster nodes and resolution of node selector expressions.

use std::collections::{BTreeMap, HashSet};

use regex::Regex;

/// Resolves node selector expressions into the set of matching node IDs.
pub trait NodeResolver: Send + Sync {
    /// IDs of all nodes matched by any of the given expressions. Expressions
    /// matching nothing contribute nothing.
    fn resolve_nodes(&self, selectors: &[&str]) -> HashSet<String>;
}

/// Information about a discovered node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryNode {
    /// Unique node ID.
    id: String,

    /// Human-readable node name.
    name: String,

    /// IP address string.
    host_address: String,

    /// Host name; same as the address unless given.
    host_name: String,

    /// Custom attributes, e.g. rack or zone.
    attributes: BTreeMap<String, String>,
}

impl DiscoveryNode {
    /// Creates a node without attributes.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        host_address: impl Into<String>,
    ) -> Self {
        let host_address = host_address.into();
        DiscoveryNode {
            id: id.into(),
            name: name.into(),
            host_name: host_address.clone(),
            host_address,
            attributes: BTreeMap::new(),
        }
    }

    /// Sets the host name.
    pub fn with_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = host_name.into();
        self
    }

    /// Adds a custom attribute.
    pub fn with_attr(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn host_address(&self) -> &str {
        &self.host_address
    }

    #[inline]
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    #[inline]
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }
}

/// Simple `*` wildcard pattern. Patterns without a star compare exactly.
#[derive(Debug)]
struct Wildcard<'p> {
    pattern: &'p str,
    regex: Option<Regex>,
}

impl<'p> Wildcard<'p> {
    fn new(pattern: &'p str) -> Self {
        let regex = if pattern.contains('*') {
            let mut expr = String::from("^");
            for (idx, part) in pattern.split('*').enumerate() {
                if idx > 0 {
                    expr.push_str(".*");
                }
                expr.push_str(&regex::escape(part));
            }
            expr.push('$');
            // escaped literals joined by `.*` always compile
            Regex::new(&expr).ok()
        } else {
            None
        };
        Wildcard { pattern, regex }
    }

    fn is_match(&self, value: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(value),
            None => self.pattern == value,
        }
    }
}

/// The set of nodes currently in the cluster, as seen by the local node.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryNodes {
    /// Known nodes.
    nodes: Vec<DiscoveryNode>,

    /// ID of the local node, if it is part of the cluster.
    local_node_id: Option<String>,
}

impl DiscoveryNodes {
    /// Creates the node set.
    pub fn new(
        nodes: Vec<DiscoveryNode>,
        local_node_id: Option<String>,
    ) -> Self {
        DiscoveryNodes {
            nodes,
            local_node_id,
        }
    }

    /// ID of the local node.
    #[inline]
    pub fn local_node_id(&self) -> Option<&str> {
        self.local_node_id.as_deref()
    }

    /// Looks up a node by ID.
    pub fn get(&self, node_id: &str) -> Option<&DiscoveryNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    /// Number of known nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over all nodes.
    pub fn iter(&self) -> impl Iterator<Item = &DiscoveryNode> {
        self.nodes.iter()
    }

    /// Adds the IDs of nodes whose field picked by `field` matches pattern.
    fn add_matching(
        &self,
        pattern: &str,
        field: fn(&DiscoveryNode) -> &str,
        resolved: &mut HashSet<String>,
    ) {
        let wildcard = Wildcard::new(pattern);
        resolved.extend(
            self.nodes
                .iter()
                .filter(|n| wildcard.is_match(field(n)))
                .map(|n| n.id.clone()),
        );
    }

    /// Resolves one expression into the given set.
    fn resolve_one(&self, expr: &str, resolved: &mut HashSet<String>) {
        match expr {
            "_local" => {
                if let Some(local) = &self.local_node_id {
                    resolved.insert(local.clone());
                }
                return;
            }
            "_all" => {
                resolved.extend(self.nodes.iter().map(|n| n.id.clone()));
                return;
            }
            _ => {}
        }

        if self.get(expr).is_some() {
            resolved.insert(expr.to_string());
            return;
        }

        let before = resolved.len();
        self.add_matching(expr, DiscoveryNode::host_address, resolved);
        self.add_matching(expr, DiscoveryNode::host_name, resolved);
        self.add_matching(expr, DiscoveryNode::name, resolved);
        if resolved.len() > before {
            return;
        }

        if let Some((key, value)) = expr.split_once(':') {
            match key {
                "_id" => self.add_matching(value, DiscoveryNode::id, resolved),
                "_name" => {
                    self.add_matching(value, DiscoveryNode::name, resolved)
                }
                "_ip" => self.add_matching(
                    value,
                    DiscoveryNode::host_address,
                    resolved,
                ),
                "_host" => {
                    let host_name = DiscoveryNode::host_name;
                    let host_address = DiscoveryNode::host_address;
                    self.add_matching(value, host_name, resolved);
                    self.add_matching(value, host_address, resolved);
                }
                _ => {
                    let key = Wildcard::new(key);
                    let value = Wildcard::new(value);
                    resolved.extend(
                        self.nodes
                            .iter()
                            .filter(|n| {
                                n.attributes.iter().any(|(k, v)| {
                                    key.is_match(k) && value.is_match(v)
                                })
                            })
                            .map(|n| n.id.clone()),
                    );
                }
            }
        }
    }
}

impl NodeResolver for DiscoveryNodes {
    fn resolve_nodes(&self, selectors: &[&str]) -> HashSet<String> {
        let mut resolved = HashSet::new();
        for expr in selectors {
            self.resolve_one(expr.trim(), &mut resolved);
        }
        pf_trace!("resolved nodes {:?} -> {:?}", selectors, resolved);
        resolved
    }
}

#[cfg(test)]
mod nodes_tests {
    use super::*;

    fn cluster() -> DiscoveryNodes {
        DiscoveryNodes::new(
            vec![
                DiscoveryNode::new("n1", "data-hot-1", "10.0.0.1")
                    .with_host_name("hot1.local")
                    .with_attr("zone", "us-east-1a"),
                DiscoveryNode::new("n2", "data-hot-2", "10.0.0.2")
                    .with_attr("zone", "us-east-1b"),
                DiscoveryNode::new("n3", "data-warm-1", "10.0.1.3")
                    .with_attr("zone", "us-east-1a")
                    .with_attr("tier", "warm"),
            ],
            Some("n2".into()),
        )
    }

    fn resolve(selectors: &[&str]) -> Vec<String> {
        let mut ids: Vec<_> =
            cluster().resolve_nodes(selectors).into_iter().collect();
        ids.sort();
        ids
    }

    #[test]
    fn wildcard_patterns() {
        assert!(Wildcard::new("abc").is_match("abc"));
        assert!(!Wildcard::new("abc").is_match("abcd"));
        assert!(Wildcard::new("a*").is_match("abcd"));
        assert!(Wildcard::new("*cd").is_match("abcd"));
        assert!(Wildcard::new("a*c*").is_match("abcd"));
        assert!(Wildcard::new("*").is_match(""));
        assert!(!Wildcard::new("10.0.*").is_match("10.1.0.1"));
        assert!(!Wildcard::new("a.c").is_match("abc"));
    }

    #[test]
    fn special_names() {
        assert_eq!(resolve(&["_local"]), vec!["n2"]);
        assert_eq!(resolve(&["_all"]), vec!["n1", "n2", "n3"]);
        let no_local = DiscoveryNodes::new(vec![], None);
        assert!(no_local.resolve_nodes(&["_local"]).is_empty());
    }

    #[test]
    fn id_name_and_address() {
        assert_eq!(resolve(&["n3"]), vec!["n3"]);
        assert_eq!(resolve(&["data-hot-*"]), vec!["n1", "n2"]);
        assert_eq!(resolve(&["10.0.0.*"]), vec!["n1", "n2"]);
        assert_eq!(resolve(&["hot1.local"]), vec!["n1"]);
        assert_eq!(resolve(&["n1", "data-warm-1"]), vec!["n1", "n3"]);
    }

    #[test]
    fn explicit_fields() {
        assert_eq!(resolve(&["_id:n*"]), vec!["n1", "n2", "n3"]);
        assert_eq!(resolve(&["_name:data-warm-*"]), vec!["n3"]);
        assert_eq!(resolve(&["_ip:10.0.1.3"]), vec!["n3"]);
        assert_eq!(resolve(&["_host:hot1.local"]), vec!["n1"]);
    }

    #[test]
    fn attributes() {
        assert_eq!(resolve(&["zone:us-east-1a"]), vec!["n1", "n3"]);
        assert_eq!(resolve(&["zone:us-east-*"]), vec!["n1", "n2", "n3"]);
        assert_eq!(resolve(&["ti*:warm"]), vec!["n3"]);
        assert!(resolve(&["zone:eu-*"]).is_empty());
        assert!(resolve(&["nowhere"]).is_empty());
    }

    #[test]
    fn node_accessors() {
        let nodes = cluster();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes.local_node_id(), Some("n2"));
        let n1 = nodes.get("n1").unwrap();
        assert_eq!(n1.name(), "data-hot-1");
        assert_eq!(n1.host_address(), "10.0.0.1");
        assert_eq!(n1.host_name(), "hot1.local");
        assert_eq!(n1.attributes().get("zone").unwrap(), "us-east-1a");
        assert_eq!(nodes.get("n2").unwrap().host_name(), "10.0.0.2");
    }
}
