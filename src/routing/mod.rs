//! Shard copy model, the per-shard routing table, and its builder.

mod builder;
mod copy;
mod iter;
mod shard;
mod shuffler;
mod table;

pub use builder::RoutingTableBuilder;
pub use copy::{AllocationId, CopyState, ShardCopy};
pub use iter::ShardIter;
pub use shard::{IndexId, ShardId};
pub use shuffler::{rotate, RotationShuffler};
pub use table::RoutingTable;
