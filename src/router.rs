//! Query-routing facade holding the current table version of one shard.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use crate::nodes::NodeResolver;
use crate::preference::Preference;
use crate::routing::{RoutingTable, ShardId, ShardIter};
use crate::selection::{NodeStatsSource, NodeUsageCounters};
use crate::utils::ShardRouteError;

/// Configuration parameters struct.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingConfig {
    /// Rank copies by node statistics when no preference is given.
    pub adaptive_selection: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        RoutingConfig {
            adaptive_selection: true,
        }
    }
}

/// Collaborators available to one routing call. All optional; strategies
/// needing an absent one degrade or fail as documented on
/// [`ShardRouter::route`].
#[derive(Clone, Copy, Default)]
pub struct RouteContext<'a> {
    /// Resolver of node selector expressions and of `_local`.
    pub resolver: Option<&'a dyn NodeResolver>,

    /// Shared node statistics.
    pub collector: Option<&'a dyn NodeStatsSource>,

    /// Usage counters of the current logical request.
    pub usage: Option<&'a NodeUsageCounters>,
}

impl<'a> RouteContext<'a> {
    pub fn with_resolver(mut self, resolver: &'a dyn NodeResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_stats(
        mut self,
        collector: &'a dyn NodeStatsSource,
        usage: &'a NodeUsageCounters,
    ) -> Self {
        self.collector = Some(collector);
        self.usage = Some(usage);
        self
    }

    fn local_nodes(&self) -> HashSet<String> {
        self.resolver
            .map(|r| r.resolve_nodes(&["_local"]))
            .unwrap_or_default()
    }
}

/// Holds the current routing table of one shard and maps request
/// preferences onto table iteration strategies. Table versions are swapped
/// in whole; in-flight routing calls keep the version they started with.
#[derive(Debug)]
pub struct ShardRouter {
    /// Configuration parameters struct.
    config: RoutingConfig,

    /// Current table version.
    table: RwLock<Arc<RoutingTable>>,
}

impl ShardRouter {
    /// Creates a router over an initial table, parsing config from given
    /// TOML string.
    pub fn new_with_config(
        table: RoutingTable,
        config_str: Option<&str>,
    ) -> Result<Self, ShardRouteError> {
        let config =
            parsed_config!(config_str => RoutingConfig; adaptive_selection)?;
        pf_debug!("router for {} config {:?}", table.shard_id(), config);

        Ok(ShardRouter {
            config,
            table: RwLock::new(Arc::new(table)),
        })
    }

    /// Configuration in effect.
    #[inline]
    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Current table version.
    pub fn table(&self) -> Arc<RoutingTable> {
        match self.table.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Shard this router serves.
    pub fn shard_id(&self) -> ShardId {
        self.table().shard_id().clone()
    }

    /// Swaps in a new table version, returning the replaced one. Rejects a
    /// table of a different shard.
    pub fn update_table(
        &self,
        table: RoutingTable,
    ) -> Result<Arc<RoutingTable>, ShardRouteError> {
        let mut guard = match self.table.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.shard_id() != table.shard_id() {
            return logged_err!(
                "table of {} given to router of {}",
                table.shard_id(),
                guard.shard_id()
            );
        }
        pf_debug!("table update {} -> {}", guard, table);
        Ok(std::mem::replace(&mut *guard, Arc::new(table)))
    }

    /// Orders the copies to try for one request:
    /// - no preference: ranked active-then-initializing order when adaptive
    ///   selection is enabled and both statistics and usage counters are
    ///   given, else the random active-then-initializing order
    /// - `_local`: copies on the local node first
    /// - `_only_local`: copies on the local node only, possibly none
    /// - `_prefer_nodes`: copies on the listed nodes first
    /// - `_only_nodes`: copies on matching nodes only; fails if none or if
    ///   no resolver is given
    /// - `_primary`: the primary only
    /// - custom string: active-then-initializing order rotated by a seed
    ///   derived from the string
    pub fn route(
        &self,
        preference: Option<&Preference>,
        ctx: &RouteContext,
    ) -> Result<ShardIter, ShardRouteError> {
        let table = self.table();
        let preference = match preference {
            Some(preference) => preference,
            None => {
                return Ok(if self.config.adaptive_selection {
                    table.active_then_initializing_ranked(
                        ctx.collector,
                        ctx.usage,
                    )
                } else {
                    table.active_then_initializing_random()
                });
            }
        };

        match preference {
            Preference::Local => {
                Ok(table.preferring_nodes(&ctx.local_nodes()))
            }
            Preference::OnlyLocal => match ctx.local_nodes().iter().next() {
                Some(local) => Ok(table.on_node(local)),
                None => Ok(ShardIter::new(table.shard_id().clone(), vec![])),
            },
            Preference::PreferNodes(nodes) => {
                let nodes: HashSet<String> = nodes.iter().cloned().collect();
                Ok(table.preferring_nodes(&nodes))
            }
            Preference::OnlyNodes(selectors) => {
                let resolver = match ctx.resolver {
                    Some(resolver) => resolver,
                    None => {
                        return logged_err!(
                            "preference '{}' needs a node resolver",
                            preference
                        )
                    }
                };
                let selectors: Vec<&str> =
                    selectors.iter().map(String::as_str).collect();
                table.on_nodes_matching(&selectors, resolver)
            }
            Preference::Primary => Ok(table.primary_only()),
            Preference::Custom(custom) => Ok(table
                .active_then_initializing(Preference::custom_seed(custom))),
        }
    }
}

#[cfg(test)]
mod router_tests {
    use super::*;
    use crate::nodes::{DiscoveryNode, DiscoveryNodes};
    use crate::routing::{IndexId, RoutingTableBuilder, ShardCopy};
    use crate::selection::ResponseCollector;

    fn shard() -> ShardId {
        ShardId::new(IndexId::new("logs", "u1"), 2)
    }

    fn started(primary: bool, node: &str) -> ShardCopy {
        ShardCopy::new_started(shard(), primary, node, format!("a-{}", node))
    }

    fn table() -> Result<RoutingTable, ShardRouteError> {
        RoutingTableBuilder::new(shard())
            .add(started(true, "n1"))
            .add(started(false, "n2"))
            .add(started(false, "n3"))
            .add(ShardCopy::new_initializing(shard(), false, "n4", "a-n4"))
            .build_with_seed(0)
    }

    fn cluster() -> DiscoveryNodes {
        DiscoveryNodes::new(
            vec![
                DiscoveryNode::new("n1", "one", "10.0.0.1"),
                DiscoveryNode::new("n2", "two", "10.0.0.2")
                    .with_attr("zone", "b"),
                DiscoveryNode::new("n3", "three", "10.0.0.3")
                    .with_attr("zone", "b"),
                DiscoveryNode::new("n4", "four", "10.0.0.4"),
            ],
            Some("n3".into()),
        )
    }

    fn nodes_of(iter: &ShardIter) -> Vec<String> {
        iter.node_ids().into_iter().map(String::from).collect()
    }

    #[test]
    fn config_parsing() -> Result<(), ShardRouteError> {
        let router = ShardRouter::new_with_config(table()?, None)?;
        assert!(router.config().adaptive_selection);
        let router = ShardRouter::new_with_config(
            table()?,
            Some("adaptive_selection = false"),
        )?;
        assert!(!router.config().adaptive_selection);
        assert!(ShardRouter::new_with_config(table()?, Some("x = 1")).is_err());
        Ok(())
    }

    #[test]
    fn no_preference_ranked() -> Result<(), ShardRouteError> {
        let router = ShardRouter::new_with_config(table()?, None)?;
        let collector = ResponseCollector::new_with_config(None)?;
        collector.observe("n1", 30, 5_000_000, 5_000_000);
        collector.observe("n2", 20, 5_000_000, 5_000_000);
        collector.observe("n3", 1, 1_000_000, 1_000_000);
        let usage = NodeUsageCounters::new();
        let ctx = RouteContext::default().with_stats(&collector, &usage);

        let iter = router.route(None, &ctx)?;
        assert_eq!(nodes_of(&iter), vec!["n3", "n2", "n1", "n4"]);
        assert_eq!(usage.get("n3"), 1);
        Ok(())
    }

    #[test]
    fn no_preference_random() -> Result<(), ShardRouteError> {
        let router = ShardRouter::new_with_config(
            table()?,
            Some("adaptive_selection = false"),
        )?;
        let collector = ResponseCollector::new_with_config(None)?;
        let usage = NodeUsageCounters::new();
        let ctx = RouteContext::default().with_stats(&collector, &usage);
        let first = nodes_of(&router.route(None, &ctx)?);
        let second = nodes_of(&router.route(None, &ctx)?);
        assert_eq!(first, vec!["n1", "n2", "n3", "n4"]);
        assert_eq!(second, vec!["n2", "n3", "n1", "n4"]);
        assert!(usage.snapshot().is_empty());
        Ok(())
    }

    #[test]
    fn local_preferences() -> Result<(), ShardRouteError> {
        let router = ShardRouter::new_with_config(table()?, None)?;
        let nodes = cluster();
        let ctx = RouteContext::default().with_resolver(&nodes);

        let iter = router.route(Some(&Preference::Local), &ctx)?;
        assert_eq!(nodes_of(&iter)[0], "n3");
        assert_eq!(iter.size(), 4);

        let iter = router.route(Some(&Preference::OnlyLocal), &ctx)?;
        assert_eq!(nodes_of(&iter), vec!["n3"]);

        let iter =
            router.route(Some(&Preference::OnlyLocal), &Default::default())?;
        assert_eq!(iter.size(), 0);
        Ok(())
    }

    #[test]
    fn node_preferences() -> Result<(), ShardRouteError> {
        let router = ShardRouter::new_with_config(table()?, None)?;
        let nodes = cluster();
        let ctx = RouteContext::default().with_resolver(&nodes);

        let pref: Preference = "_prefer_nodes:n2".parse()?;
        assert_eq!(nodes_of(&router.route(Some(&pref), &ctx)?)[0], "n2");

        let pref: Preference = "_only_nodes:zone:b".parse()?;
        let mut got = nodes_of(&router.route(Some(&pref), &ctx)?);
        got.sort();
        assert_eq!(got, vec!["n2", "n3"]);

        let pref: Preference = "_only_nodes:zone:z".parse()?;
        assert!(matches!(
            router.route(Some(&pref), &ctx),
            Err(ShardRouteError::NoMatchingNodes { .. })
        ));
        assert!(router.route(Some(&pref), &Default::default()).is_err());
        Ok(())
    }

    #[test]
    fn primary_and_custom() -> Result<(), ShardRouteError> {
        let router = ShardRouter::new_with_config(table()?, None)?;
        let ctx = RouteContext::default();
        let iter = router.route(Some(&Preference::Primary), &ctx)?;
        assert_eq!(nodes_of(&iter), vec!["n1"]);

        let pref = Preference::Custom("user-7".into());
        let a = nodes_of(&router.route(Some(&pref), &ctx)?);
        let b = nodes_of(&router.route(Some(&pref), &ctx)?);
        assert_eq!(a, b);
        assert_eq!(a.last().map(String::as_str), Some("n4"));
        Ok(())
    }

    #[test]
    fn table_swap() -> Result<(), ShardRouteError> {
        let router = ShardRouter::new_with_config(table()?, None)?;
        let next = RoutingTableBuilder::from_table(&router.table())
            .remove(&started(false, "n2"))
            .build()?;
        let prev = router.update_table(next)?;
        assert_eq!(prev.size(), 4);
        assert_eq!(router.table().size(), 3);

        let other = ShardId::new(IndexId::new("logs", "u1"), 7);
        let foreign = RoutingTableBuilder::new(other).build()?;
        assert!(router.update_table(foreign).is_err());
        assert_eq!(router.shard_id(), shard());
        Ok(())
    }
}
