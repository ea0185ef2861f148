//! Adaptive replica selection: orders candidate copies by their nodes'
//! predicted responsiveness and spreads load away from the chosen node.

use std::collections::HashMap;

use crate::routing::ShardCopy;
use crate::selection::{
    NodeRanks, NodeStats, NodeStatsSource, NodeUsageCounters,
};
use crate::utils::Ewma;

/// Ranks candidates of one shard against a shared statistics source and the
/// usage counters of the current logical request.
#[derive(Clone, Copy)]
pub struct AdaptiveReplicaSelector<'a> {
    /// Shared per-node statistics.
    collector: &'a dyn NodeStatsSource,

    /// Per-request usage counters.
    usage: &'a NodeUsageCounters,
}

impl<'a> AdaptiveReplicaSelector<'a> {
    /// Creates a selector over given collaborators.
    pub fn new(
        collector: &'a dyn NodeStatsSource,
        usage: &'a NodeUsageCounters,
    ) -> Self {
        AdaptiveReplicaSelector { collector, usage }
    }

    /// Snapshots every distinct node hosting a candidate.
    fn candidate_stats(
        &self,
        copies: &[ShardCopy],
    ) -> HashMap<String, Option<NodeStats>> {
        let mut node_stats = HashMap::with_capacity(copies.len());
        for node in copies.iter().filter_map(|c| c.current_node()) {
            if !node_stats.contains_key(node) {
                let stats = self.collector.snapshot(node);
                node_stats.insert(node.to_string(), stats);
            }
        }
        node_stats
    }

    /// Stably sorts candidates by rank, lowest first, nodes without
    /// statistics last. When the winner is a started copy whose node has
    /// statistics, the statistics of every other candidate node are pulled
    /// toward the winner's and the winner's usage is incremented, so that
    /// concurrent and later selections drift to other copies.
    pub fn rank(&self, mut copies: Vec<ShardCopy>) -> Vec<ShardCopy> {
        if copies.len() < 2 {
            return copies;
        }

        let node_stats = self.candidate_stats(&copies);
        let ranks = NodeRanks::compute(&node_stats, self.usage);
        copies.sort_by(|a, b| ranks.compare_copies(a, b));

        let winner = &copies[0];
        if winner.started() {
            if let Some(node) = winner.current_node() {
                if let Some(Some(stats)) = node_stats.get(node) {
                    pf_trace!(
                        "ARS chose {} on node {} {} ranks {:?}",
                        winner.shard_id(),
                        node,
                        stats,
                        ranks
                    );
                    self.adjust_stats(&node_stats, node, stats);
                    self.usage.increment(node);
                }
            }
        }
        copies
    }

    /// Moves the statistics of every non-winning candidate node halfway to
    /// the winner's. Service time goes through one smoothing step instead.
    fn adjust_stats(
        &self,
        node_stats: &HashMap<String, Option<NodeStats>>,
        winner_node: &str,
        winner: &NodeStats,
    ) {
        let alpha = self.collector.ewma_alpha();
        for (node, stats) in node_stats {
            let stats = match stats {
                Some(stats) if node != winner_node => stats,
                _ => continue,
            };
            // widened so that two huge queues cannot overflow
            let queue_sum = winner.queue_size as u64 + stats.queue_size as u64;
            let queue_size = (queue_sum / 2) as u32;
            let response_time =
                ((winner.response_time + stats.response_time) / 2.0) as u64;
            let mut service_time = Ewma::new(alpha, stats.service_time);
            service_time
                .add_value((winner.service_time + stats.service_time) / 2.0);
            self.collector.record(
                node,
                queue_size,
                response_time,
                service_time.average() as u64,
            );
        }
    }
}

#[cfg(test)]
mod ars_tests {
    use super::*;
    use crate::routing::{IndexId, ShardId};
    use crate::selection::ResponseCollector;
    use crate::utils::ShardRouteError;

    const MS: u64 = 1_000_000;

    fn shard() -> ShardId {
        ShardId::new(IndexId::new("logs", "u1"), 3)
    }

    fn started(node: &str) -> ShardCopy {
        ShardCopy::new_started(shard(), false, node, format!("a-{}", node))
    }

    fn node_ids(copies: &[ShardCopy]) -> Vec<&str> {
        copies.iter().filter_map(|c| c.current_node()).collect()
    }

    #[test]
    fn winner_pulls_others() -> Result<(), ShardRouteError> {
        let collector = ResponseCollector::new_with_config(None)?;
        collector.record("A", 10, MS, 100 * MS);
        collector.record("B", 18, MS, 100 * MS);
        collector.record("C", 6, MS, 5 * MS);
        let usage = NodeUsageCounters::new();
        let selector = AdaptiveReplicaSelector::new(&collector, &usage);

        let ranked =
            selector.rank(vec![started("C"), started("B"), started("A")]);
        assert_eq!(node_ids(&ranked)[0], "A");
        assert_eq!(usage.get("A"), 1);
        assert_eq!(usage.get("B"), 0);

        let a = collector.snapshot("A").unwrap();
        assert_eq!(a.queue_size, 10);
        assert_eq!(a.service_time, (100 * MS) as f64);
        let b = collector.snapshot("B").unwrap();
        assert_eq!(b.queue_size, 14);
        assert_eq!(b.response_time, MS as f64);
        let c = collector.snapshot("C").unwrap();
        assert_eq!(c.queue_size, 8);
        // 0.3 * 52.5ms + 0.7 * 5ms
        assert!((c.service_time - 19.25 * MS as f64).abs() < 2.0);
        Ok(())
    }

    #[test]
    fn repeated_selection_spreads() -> Result<(), ShardRouteError> {
        let collector = ResponseCollector::new_with_config(None)?;
        collector.record("A", 2, MS, MS);
        collector.record("B", 2, MS, MS);
        let usage = NodeUsageCounters::new();
        let selector = AdaptiveReplicaSelector::new(&collector, &usage);

        let first = selector.rank(vec![started("A"), started("B")]);
        let second = selector.rank(vec![started("A"), started("B")]);
        assert_eq!(node_ids(&first)[0], "A");
        assert_eq!(node_ids(&second)[0], "B");
        assert_eq!(usage.get("A"), 1);
        assert_eq!(usage.get("B"), 1);
        Ok(())
    }

    #[test]
    fn single_candidate_untouched() -> Result<(), ShardRouteError> {
        let collector = ResponseCollector::new_with_config(None)?;
        collector.record("A", 2, MS, MS);
        let usage = NodeUsageCounters::new();
        let selector = AdaptiveReplicaSelector::new(&collector, &usage);
        assert_eq!(selector.rank(vec![started("A")]), vec![started("A")]);
        assert!(selector.rank(vec![]).is_empty());
        assert_eq!(usage.get("A"), 0);
        Ok(())
    }

    #[test]
    fn no_stats_keeps_order() -> Result<(), ShardRouteError> {
        let collector = ResponseCollector::new_with_config(None)?;
        let usage = NodeUsageCounters::new();
        let selector = AdaptiveReplicaSelector::new(&collector, &usage);
        let ranked =
            selector.rank(vec![started("C"), started("A"), started("B")]);
        assert_eq!(node_ids(&ranked), vec!["C", "A", "B"]);
        assert!(usage.snapshot().is_empty());
        assert!(collector.node_ids().is_empty());
        Ok(())
    }

    #[test]
    fn huge_queues_midpoint() -> Result<(), ShardRouteError> {
        let collector = ResponseCollector::new_with_config(None)?;
        collector.record("A", 3_000_000_000, MS, MS);
        collector.record("B", 4_000_000_000, MS, 100 * MS);
        let usage = NodeUsageCounters::new();
        let selector = AdaptiveReplicaSelector::new(&collector, &usage);

        let ranked = selector.rank(vec![started("B"), started("A")]);
        assert_eq!(node_ids(&ranked)[0], "A");
        assert_eq!(collector.snapshot("A").unwrap().queue_size, 3_000_000_000);
        assert_eq!(collector.snapshot("B").unwrap().queue_size, 3_500_000_000);
        Ok(())
    }

    #[test]
    fn initializing_winner_not_charged() -> Result<(), ShardRouteError> {
        let collector = ResponseCollector::new_with_config(None)?;
        collector.record("A", 1, MS, MS);
        collector.record("B", 30, MS, MS);
        let usage = NodeUsageCounters::new();
        let selector = AdaptiveReplicaSelector::new(&collector, &usage);
        let init = ShardCopy::new_initializing(shard(), false, "A", "a-A");
        let ranked = selector.rank(vec![started("B"), init.clone()]);
        assert_eq!(ranked[0], init);
        assert_eq!(usage.get("A"), 0);
        assert_eq!(collector.snapshot("B").unwrap().queue_size, 30);
        Ok(())
    }
}
