//! Seeded rotation shuffler giving equally-eligible copies equal turns.

use std::sync::atomic::{AtomicI32, Ordering};

/// Rotates `items` so that the output starts at index `seed mod len`,
/// wrapping around. Negative seeds rotate from the end.
pub fn rotate<T: Clone>(items: &[T], seed: i32) -> Vec<T> {
    if items.is_empty() {
        return Vec::new();
    }
    let offset = (seed as i64).rem_euclid(items.len() as i64) as usize;
    items[offset..]
        .iter()
        .chain(items[..offset].iter())
        .cloned()
        .collect()
}

/// Rotation-based shuffler owning an atomic seed counter. One instance is
/// owned by each routing table, so tables do not contend on a shared one.
#[derive(Debug)]
pub struct RotationShuffler {
    /// Next seed to hand out; bumped on every call.
    seed: AtomicI32,
}

impl RotationShuffler {
    /// Creates a shuffler whose counter starts at a random point.
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// Creates a shuffler whose counter starts at given seed.
    pub fn with_seed(seed: i32) -> Self {
        RotationShuffler {
            seed: AtomicI32::new(seed),
        }
    }

    /// Returns the current seed and advances the counter. Wraps on overflow.
    #[inline]
    pub fn next_seed(&self) -> i32 {
        self.seed.fetch_add(1, Ordering::Relaxed)
    }

    /// Rotates by the next seed.
    #[inline]
    pub fn shuffle<T: Clone>(&self, items: &[T]) -> Vec<T> {
        rotate(items, self.next_seed())
    }

    /// Rotates by an explicit seed; does not touch the counter.
    #[inline]
    pub fn shuffle_seeded<T: Clone>(&self, items: &[T], seed: i32) -> Vec<T> {
        rotate(items, seed)
    }
}

impl Default for RotationShuffler {
    fn default() -> Self {
        Self::new()
    }
}
