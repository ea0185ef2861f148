//! Shardroute: per-shard routing tables and adaptive replica selection.
//!
//! A [`RoutingTable`] is the immutable snapshot of where the copies of one
//! shard live and what state they are in. Tables are produced by a
//! [`RoutingTableBuilder`], ordered into serving preference by the table's
//! iteration strategies, optionally ranked by an [`AdaptiveReplicaSelector`]
//! against live node statistics, and shipped across the cluster with the
//! [`wire`] codec.

#[macro_use]
mod utils;

mod nodes;
mod preference;
mod router;
mod routing;
mod selection;

pub mod wire;

#[doc(inline)]
pub use crate::utils::{
    log_identity, logger_init, set_log_identity, Ewma, ShardRouteError, ME,
};

#[doc(inline)]
pub use crate::routing::{
    rotate, AllocationId, CopyState, IndexId, RotationShuffler, RoutingTable,
    RoutingTableBuilder, ShardCopy, ShardId, ShardIter,
};

#[doc(inline)]
pub use crate::selection::{
    compare_ranks, AdaptiveReplicaSelector, NodeRanks, NodeStats,
    NodeStatsSource, NodeUsageCounters, ResponseCollector,
    ResponseCollectorConfig, DEFAULT_EWMA_ALPHA,
};

#[doc(inline)]
pub use crate::nodes::{DiscoveryNode, DiscoveryNodes, NodeResolver};

#[doc(inline)]
pub use crate::preference::Preference;

#[doc(inline)]
pub use crate::router::{RouteContext, RoutingConfig, ShardRouter};
