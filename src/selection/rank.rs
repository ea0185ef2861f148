//! Node rank ordering used to sort candidate copies.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::routing::ShardCopy;
use crate::selection::{NodeStats, NodeUsageCounters};

/// Three-way comparison of optional ranks: lower ranks first, and an absent
/// rank sorts after any present one. Two absent ranks are equal.
pub fn compare_ranks(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Computed rank of every node that has statistics.
#[derive(Debug, Clone, Default)]
pub struct NodeRanks(HashMap<String, f64>);

impl NodeRanks {
    /// Ranks every node with a snapshot, charging it for the times it has
    /// already been used in the current request.
    pub fn compute(
        node_stats: &HashMap<String, Option<NodeStats>>,
        usage: &NodeUsageCounters,
    ) -> Self {
        NodeRanks(
            node_stats
                .iter()
                .filter_map(|(node, stats)| {
                    stats.map(|s| (node.clone(), s.rank(usage.get(node))))
                })
                .collect(),
        )
    }

    /// Rank of given node, if it has one.
    #[inline]
    pub fn get(&self, node_id: &str) -> Option<f64> {
        self.0.get(node_id).copied()
    }

    /// Orders two copies by their nodes' ranks. Copies on the same node are
    /// equal, so a stable sort keeps their relative order.
    pub fn compare_copies(&self, a: &ShardCopy, b: &ShardCopy) -> Ordering {
        if a.current_node() == b.current_node() {
            return Ordering::Equal;
        }
        compare_ranks(
            a.current_node().and_then(|n| self.get(n)),
            b.current_node().and_then(|n| self.get(n)),
        )
    }
}
