//! Per-node rolling performance statistics consumed by adaptive replica
//! selection.

use std::collections::HashMap;
use std::fmt;

use crate::utils::{Ewma, ShardRouteError};

use dashmap::DashMap;

/// Default smoothing factor of the queue size and response time averages.
pub const DEFAULT_EWMA_ALPHA: f64 = 0.3;

/// Statistics are stored in nanoseconds but ranked in milliseconds.
const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// Cubic queue adjustment exponent of the ranking formula.
const QUEUE_ADJUSTMENT_FACTOR: i32 = 3;

/// Floor of the service rate term, keeping ranks finite for nodes that
/// report zero service time.
const MIN_SERVICE_MILLIS: f64 = 1e-6;

/// Point-in-time snapshot of one node's statistics.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct NodeStats {
    /// Number of nodes the collector tracks, i.e. clients competing for
    /// this node.
    pub client_num: usize,

    /// Smoothed search queue size on the node.
    pub queue_size: u32,

    /// Smoothed response time in nanoseconds.
    pub response_time: f64,

    /// Service time in nanoseconds.
    pub service_time: f64,
}

impl fmt::Display for NodeStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "(q{},r{:.2}ms,s{:.2}ms)",
            self.queue_size,
            self.response_time / NANOS_PER_MILLI,
            self.service_time / NANOS_PER_MILLI
        )
    }
}

impl NodeStats {
    /// Creates a new snapshot.
    pub fn new(
        client_num: usize,
        queue_size: u32,
        response_time: f64,
        service_time: f64,
    ) -> Self {
        NodeStats {
            client_num,
            queue_size,
            response_time,
            service_time,
        }
    }

    /// Predicted responsiveness given the number of requests already sent
    /// to this node within the current logical request. Lower is better.
    pub fn rank(&self, outstanding: u64) -> f64 {
        // outstanding requests from us times the number of clients
        let concurrency_compensation =
            outstanding as f64 * self.client_num as f64;
        let q_hat = 1.0 + concurrency_compensation + self.queue_size as f64;
        let r = self.response_time / NANOS_PER_MILLI;
        let mu = (self.service_time / NANOS_PER_MILLI).max(MIN_SERVICE_MILLIS);
        r - (1.0 / mu) + q_hat.powi(QUEUE_ADJUSTMENT_FACTOR) / mu
    }
}

/// Source of per-node statistics. Implementations must make per-node
/// read-modify-write atomic; different nodes need no common lock.
pub trait NodeStatsSource: Send + Sync {
    /// Current statistics of given node, `None` if never observed.
    fn snapshot(&self, node_id: &str) -> Option<NodeStats>;

    /// Overwrites the stored statistics of given node (times in nanos).
    fn record(
        &self,
        node_id: &str,
        queue_size: u32,
        response_time: u64,
        service_time: u64,
    );

    /// Smoothing factor used for service time corrections.
    fn ewma_alpha(&self) -> f64;
}

/// Configuration parameters struct.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseCollectorConfig {
    /// Smoothing factor in (0, 1].
    pub ewma_alpha: f64,
}

impl Default for ResponseCollectorConfig {
    fn default() -> Self {
        ResponseCollectorConfig {
            ewma_alpha: DEFAULT_EWMA_ALPHA,
        }
    }
}

/// Stored statistics of one node.
#[derive(Debug, Clone)]
struct NodeStatistics {
    queue_size: Ewma,
    response_time: Ewma,
    service_time: f64,
}

/// Always-on collector of node statistics, fed with every observed shard
/// response. Each node's entry is updated under its map shard's lock.
#[derive(Debug)]
pub struct ResponseCollector {
    /// Configuration parameters struct.
    config: ResponseCollectorConfig,

    /// Map from node ID -> its statistics.
    stats: DashMap<String, NodeStatistics>,
}

impl ResponseCollector {
    /// Creates a new collector, parsing config from given TOML string.
    pub fn new_with_config(
        config_str: Option<&str>,
    ) -> Result<Self, ShardRouteError> {
        let config = parsed_config!(config_str => ResponseCollectorConfig;
                                    ewma_alpha)?;
        if !(config.ewma_alpha > 0.0 && config.ewma_alpha <= 1.0) {
            return logged_err!(
                "invalid config.ewma_alpha '{}'",
                config.ewma_alpha
            );
        }

        Ok(ResponseCollector {
            config,
            stats: DashMap::new(),
        })
    }

    /// Configuration in effect.
    #[inline]
    pub fn config(&self) -> &ResponseCollectorConfig {
        &self.config
    }

    /// Folds one observed response from given node into its statistics:
    /// queue size and response time are smoothed, service time replaced.
    pub fn observe(
        &self,
        node_id: &str,
        queue_size: u32,
        response_time: u64,
        service_time: u64,
    ) {
        let alpha = self.config.ewma_alpha;
        self.stats
            .entry(node_id.to_string())
            .and_modify(|ns| {
                ns.queue_size.add_value(queue_size as f64);
                ns.response_time.add_value(response_time as f64);
                ns.service_time = service_time as f64;
            })
            .or_insert_with(|| NodeStatistics {
                queue_size: Ewma::new(alpha, queue_size as f64),
                response_time: Ewma::new(alpha, response_time as f64),
                service_time: service_time as f64,
            });
    }

    /// Forgets a node, e.g. after it left the cluster.
    pub fn remove_node(&self, node_id: &str) -> bool {
        self.stats.remove(node_id).is_some()
    }

    /// IDs of all nodes with statistics.
    pub fn node_ids(&self) -> Vec<String> {
        self.stats.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshots of all nodes.
    pub fn all_stats(&self) -> HashMap<String, NodeStats> {
        let client_num = self.stats.len();
        self.stats
            .iter()
            .map(|e| {
                (e.key().clone(), Self::to_snapshot(e.value(), client_num))
            })
            .collect()
    }

    fn to_snapshot(ns: &NodeStatistics, client_num: usize) -> NodeStats {
        NodeStats {
            client_num,
            queue_size: ns.queue_size.average() as u32,
            response_time: ns.response_time.average(),
            service_time: ns.service_time,
        }
    }
}

impl NodeStatsSource for ResponseCollector {
    fn snapshot(&self, node_id: &str) -> Option<NodeStats> {
        // count before locking the node's entry
        let client_num = self.stats.len();
        self.stats
            .get(node_id)
            .map(|ns| Self::to_snapshot(ns.value(), client_num))
    }

    fn record(
        &self,
        node_id: &str,
        queue_size: u32,
        response_time: u64,
        service_time: u64,
    ) {
        let alpha = self.config.ewma_alpha;
        self.stats
            .entry(node_id.to_string())
            .and_modify(|ns| {
                ns.queue_size.reset(queue_size as f64);
                ns.response_time.reset(response_time as f64);
                ns.service_time = service_time as f64;
            })
            .or_insert_with(|| NodeStatistics {
                queue_size: Ewma::new(alpha, queue_size as f64),
                response_time: Ewma::new(alpha, response_time as f64),
                service_time: service_time as f64,
            });
    }

    fn ewma_alpha(&self) -> f64 {
        self.config.ewma_alpha
    }
}

#[cfg(test)]
mod stats_tests {
    use super::*;
    use crate::routing::{IndexId, RoutingTableBuilder, ShardCopy, ShardId};
    use crate::selection::NodeUsageCounters;
    use std::sync::Arc;

    #[test]
    fn rank_formula() {
        let stats = NodeStats::new(2, 1, 1_000_000.0, 1_000_000.0);
        // 1 - 1/1 + (1 + 0 + 1)^3 / 1
        assert!((stats.rank(0) - 8.0).abs() < 1e-9);
        // 1 - 1/1 + (1 + 2 * 2 + 1)^3 / 1
        assert!((stats.rank(2) - 216.0).abs() < 1e-9);
    }

    #[test]
    fn rank_prefers_idle_nodes() {
        let busy = NodeStats::new(3, 20, 4_000_000.0, 4_000_000.0);
        let idle = NodeStats::new(3, 0, 4_000_000.0, 4_000_000.0);
        assert!(idle.rank(0) < busy.rank(0));
        assert!(idle.rank(0) < idle.rank(1));
    }

    #[test]
    fn rank_finite_on_zero_service_time() {
        let stats = NodeStats::new(1, 0, 0.0, 0.0);
        assert!(stats.rank(0).is_finite());
    }

    #[test]
    fn config_parsing() -> Result<(), ShardRouteError> {
        let collector = ResponseCollector::new_with_config(None)?;
        assert_eq!(collector.ewma_alpha(), DEFAULT_EWMA_ALPHA);
        let collector =
            ResponseCollector::new_with_config(Some("ewma_alpha = 0.5"))?;
        assert_eq!(collector.ewma_alpha(), 0.5);
        assert!(
            ResponseCollector::new_with_config(Some("ewma_alpha = 0.0"))
                .is_err()
        );
        assert!(
            ResponseCollector::new_with_config(Some("ewma_alpha = 1.5"))
                .is_err()
        );
        assert!(ResponseCollector::new_with_config(Some("alpha = 0.5"))
            .is_err());
        Ok(())
    }

    #[test]
    fn observe_smooths() -> Result<(), ShardRouteError> {
        let collector =
            ResponseCollector::new_with_config(Some("ewma_alpha = 0.5"))?;
        assert!(collector.snapshot("n1").is_none());
        collector.observe("n1", 10, 2_000_000, 3_000_000);
        collector.observe("n1", 20, 4_000_000, 5_000_000);
        let stats = collector.snapshot("n1").unwrap();
        assert_eq!(stats.client_num, 1);
        assert_eq!(stats.queue_size, 15);
        assert_eq!(stats.response_time, 3_000_000.0);
        assert_eq!(stats.service_time, 5_000_000.0);
        Ok(())
    }

    #[test]
    fn record_overwrites() -> Result<(), ShardRouteError> {
        let collector = ResponseCollector::new_with_config(None)?;
        collector.observe("n1", 10, 2_000_000, 3_000_000);
        collector.record("n1", 14, 1_000_000, 1_500_000);
        collector.record("n2", 3, 1_000_000, 1_000_000);
        let stats = collector.snapshot("n1").unwrap();
        assert_eq!(stats.client_num, 2);
        assert_eq!(stats.queue_size, 14);
        assert_eq!(stats.response_time, 1_000_000.0);
        assert_eq!(stats.service_time, 1_500_000.0);
        assert_eq!(collector.all_stats().len(), 2);
        Ok(())
    }

    #[test]
    fn remove_departed_node() -> Result<(), ShardRouteError> {
        let collector = ResponseCollector::new_with_config(None)?;
        collector.observe("n1", 1, 1, 1);
        collector.observe("n2", 1, 1, 1);
        assert!(collector.remove_node("n1"));
        assert!(!collector.remove_node("n1"));
        assert_eq!(collector.node_ids(), vec!["n2".to_string()]);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_observations() -> Result<(), ShardRouteError> {
        let collector = Arc::new(ResponseCollector::new_with_config(Some(
            "ewma_alpha = 0.5",
        ))?);
        let mut handles = vec![];
        for t in 0..8 {
            let collector = collector.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..200 {
                    collector.observe("shared", 5, 5_000_000, 5_000_000);
                    collector.observe(&format!("own-{}", t), 1, 1, 1);
                }
            }));
        }
        for handle in handles {
            handle.await.map_err(ShardRouteError::msg)?;
        }
        let stats = collector.snapshot("shared").unwrap();
        assert_eq!(stats.queue_size, 5);
        assert_eq!(stats.response_time, 5_000_000.0);
        assert_eq!(collector.node_ids().len(), 9);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_ranked_write_back() -> Result<(), ShardRouteError> {
        let shard = ShardId::new(IndexId::new("logs", "u1"), 0);
        let table = Arc::new(
            RoutingTableBuilder::new(shard.clone())
                .add(ShardCopy::new_started(shard.clone(), true, "n1", "a1"))
                .add(ShardCopy::new_started(shard.clone(), false, "n2", "a2"))
                .add(ShardCopy::new_started(shard.clone(), false, "n3", "a3"))
                .build()?,
        );
        let collector = Arc::new(ResponseCollector::new_with_config(None)?);
        collector.record("n1", 2, 1_000_000, 1_000_000);
        collector.record("n2", 10, 4_000_000, 3_000_000);
        collector.record("n3", 20, 8_000_000, 6_000_000);

        let mut handles = vec![];
        for _ in 0..8 {
            let (table, collector) = (table.clone(), collector.clone());
            handles.push(tokio::spawn(async move {
                for _ in 0..200 {
                    let usage = NodeUsageCounters::new();
                    let source: &dyn NodeStatsSource = collector.as_ref();
                    let iter = table.active_then_initializing_ranked(
                        Some(source),
                        Some(&usage),
                    );
                    assert_eq!(iter.size(), 3);
                    assert_eq!(usage.snapshot().values().sum::<u64>(), 1);
                }
            }));
        }
        for handle in handles {
            handle.await.map_err(ShardRouteError::msg)?;
        }

        // write-backs only ever average existing values
        for node in ["n1", "n2", "n3"] {
            let stats = collector.snapshot(node).unwrap();
            assert!((2..=20).contains(&stats.queue_size));
            assert!(stats.response_time >= 1_000_000.0);
            assert!(stats.response_time <= 8_000_000.0);
            assert!(stats.service_time >= 1_000_000.0);
            assert!(stats.service_time <= 6_000_000.0);
        }
        Ok(())
    }
}
