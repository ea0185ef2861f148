//! Adaptive replica selection and the per-node statistics it consumes.

mod ars;
mod rank;
mod stats;
mod usage;

pub use ars::AdaptiveReplicaSelector;
pub use rank::{compare_ranks, NodeRanks};
pub use stats::{
    NodeStats, NodeStatsSource, ResponseCollector, ResponseCollectorConfig,
    DEFAULT_EWMA_ALPHA,
};
pub use usage::NodeUsageCounters;
