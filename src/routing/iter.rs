//! Ordered, single-pass sequence of candidate copies.

use std::fmt;

use crate::routing::{ShardCopy, ShardId};

/// Ordered candidate copies of one shard, in serving preference. The
/// caller tries them in order until one succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardIter {
    /// Shard the copies belong to.
    shard_id: ShardId,

    /// Copies in preference order.
    copies: Vec<ShardCopy>,

    /// Position of the next copy to yield.
    cursor: usize,
}

impl ShardIter {
    /// Wraps an ordered list of copies.
    pub fn new(shard_id: ShardId, copies: Vec<ShardCopy>) -> Self {
        ShardIter {
            shard_id,
            copies,
            cursor: 0,
        }
    }

    /// Shard the copies belong to.
    #[inline]
    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// Total number of copies, consumed or not.
    #[inline]
    pub fn size(&self) -> usize {
        self.copies.len()
    }

    /// Number of copies not yet yielded.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.copies.len() - self.cursor
    }

    /// Rewinds to the first copy.
    #[inline]
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Full ordered list, regardless of position.
    #[inline]
    pub fn as_slice(&self) -> &[ShardCopy] {
        &self.copies
    }

    /// Node IDs in yield order (unassigned copies skipped).
    pub fn node_ids(&self) -> Vec<&str> {
        self.copies.iter().filter_map(|c| c.current_node()).collect()
    }
}

impl Iterator for ShardIter {
    type Item = ShardCopy;

    fn next(&mut self) -> Option<Self::Item> {
        let copy = self.copies.get(self.cursor).cloned();
        if copy.is_some() {
            self.cursor += 1;
        }
        copy
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining(), Some(self.remaining()))
    }
}

impl ExactSizeIterator for ShardIter {}

impl fmt::Display for ShardIter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{:?}", self.shard_id, self.node_ids())
    }
}
