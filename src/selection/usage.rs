//! Per-request counters of how often each node has been chosen.

use std::collections::HashMap;

use dashmap::DashMap;

/// How many times each node has already won selection within one logical
/// (possibly multi-shard) request. Scoped to that request, never persisted.
/// Increments are safe when the request fans out to shards concurrently.
#[derive(Debug, Default)]
pub struct NodeUsageCounters {
    /// Map from node ID -> times chosen.
    counts: DashMap<String, u64>,
}

impl NodeUsageCounters {
    /// Creates an empty counter map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates counters pre-populated from given pairs.
    pub fn from_counts<S: Into<String>>(
        counts: impl IntoIterator<Item = (S, u64)>,
    ) -> Self {
        NodeUsageCounters {
            counts: counts.into_iter().map(|(n, c)| (n.into(), c)).collect(),
        }
    }

    /// Times given node has been chosen so far; 0 if never.
    #[inline]
    pub fn get(&self, node_id: &str) -> u64 {
        self.counts.get(node_id).map_or(0, |c| *c)
    }

    /// Bumps the count of given node, creating it if absent. Returns the
    /// new count.
    pub fn increment(&self, node_id: &str) -> u64 {
        let mut count = self.counts.entry(node_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Copy of all current counts.
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.counts
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }
}

#[cfg(test)]
mod usage_tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn increment_creates() {
        let usage = NodeUsageCounters::new();
        assert_eq!(usage.get("n1"), 0);
        assert_eq!(usage.increment("n1"), 1);
        assert_eq!(usage.increment("n1"), 2);
        assert_eq!(usage.get("n1"), 2);
        assert_eq!(usage.snapshot(), HashMap::from([("n1".to_string(), 2)]));
    }

    #[test]
    fn prepopulated() {
        let usage = NodeUsageCounters::from_counts([("n1", 4), ("n2", 1)]);
        assert_eq!(usage.get("n1"), 4);
        assert_eq!(usage.increment("n2"), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_fan_out() {
        let usage = Arc::new(NodeUsageCounters::new());
        let mut handles = vec![];
        for _ in 0..8 {
            let usage = usage.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..1000 {
                    usage.increment("n1");
                }
            }));
        }
        for handle in handles {
            assert!(handle.await.is_ok());
        }
        assert_eq!(usage.get("n1"), 8000);
    }
}
