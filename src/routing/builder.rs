//! Mutable staging area producing immutable routing tables.

use std::collections::HashSet;

use crate::routing::{RotationShuffler, RoutingTable, ShardCopy, ShardId};
use crate::utils::ShardRouteError;

/// Accumulates the copies of one shard and produces a [`RoutingTable`]
/// once the placement invariants are checked.
#[derive(Debug, Clone)]
pub struct RoutingTableBuilder {
    /// Shard identity.
    shard_id: ShardId,

    /// Copies added so far, in order.
    copies: Vec<ShardCopy>,
}

impl RoutingTableBuilder {
    /// Creates an empty builder for given shard.
    pub fn new(shard_id: ShardId) -> Self {
        RoutingTableBuilder {
            shard_id,
            copies: vec![],
        }
    }

    /// Creates a builder seeded with all copies of an existing table, to
    /// derive the next version from.
    pub fn from_table(table: &RoutingTable) -> Self {
        RoutingTableBuilder {
            shard_id: table.shard_id().clone(),
            copies: table.copies().to_vec(),
        }
    }

    /// Shard identity.
    #[inline]
    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// Copies added so far.
    #[inline]
    pub fn copies(&self) -> &[ShardCopy] {
        &self.copies
    }

    /// Appends a copy.
    pub fn add(&mut self, copy: ShardCopy) -> &mut Self {
        self.copies.push(copy);
        self
    }

    /// Removes the first copy equal to given one; no-op if absent.
    pub fn remove(&mut self, copy: &ShardCopy) -> &mut Self {
        if let Some(idx) = self.copies.iter().position(|c| c == copy) {
            self.copies.remove(idx);
        }
        self
    }

    /// Checks that no two assigned copies, counting relocation targets,
    /// share a node. Returns the first conflicting node.
    fn find_placement_conflict(copies: &[ShardCopy]) -> Option<&str> {
        let mut nodes = HashSet::new();
        for copy in copies {
            if let Some(node) = copy.current_node() {
                if !nodes.insert(node) {
                    return Some(node);
                }
                if let Some(target) = copy.relocating_node() {
                    if !nodes.insert(target) {
                        return Some(target);
                    }
                }
            }
        }
        None
    }

    /// Validates the staged copies.
    fn validate(&self) -> Result<(), ShardRouteError> {
        if let Some(copy) =
            self.copies.iter().find(|c| c.shard_id() != &self.shard_id)
        {
            return logged_err!(
                "copy of {} staged in builder of {}",
                copy.shard_id(),
                self.shard_id
            );
        }
        if self.copies.iter().filter(|c| c.primary()).count() > 1 {
            return logged_err!(
                "more than one primary staged for {}",
                self.shard_id
            );
        }
        if let Some(node) = Self::find_placement_conflict(&self.copies) {
            pf_error!(
                "placement conflict on node [{}] for {}: {:?}",
                node,
                self.shard_id,
                self.copies
                    .iter()
                    .map(|c| c.short_summary())
                    .collect::<Vec<_>>()
            );
            return Err(ShardRouteError::PlacementConflict {
                shard: self.shard_id.clone(),
                node: node.into(),
            });
        }
        Ok(())
    }

    /// Produces the immutable table, failing on placement conflicts.
    pub fn build(&self) -> Result<RoutingTable, ShardRouteError> {
        self.validate()?;
        Ok(RoutingTable::new(self.shard_id.clone(), self.copies.clone()))
    }

    /// Like [`Self::build`], but the table's rotation counter starts at
    /// given seed, making the randomized strategies reproducible.
    pub fn build_with_seed(
        &self,
        seed: i32,
    ) -> Result<RoutingTable, ShardRouteError> {
        self.validate()?;
        Ok(RoutingTable::with_shuffler(
            self.shard_id.clone(),
            self.copies.clone(),
            RotationShuffler::with_seed(seed),
        ))
    }
}
