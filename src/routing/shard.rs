//! Index and shard identities.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of an index: human readable name plus the UUID telling apart
/// successive incarnations of the same name.
#[derive(
    Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct IndexId {
    /// Index name.
    pub name: String,

    /// Index UUID.
    pub uuid: String,
}

impl IndexId {
    /// Creates a new index identity.
    pub fn new(name: impl Into<String>, uuid: impl Into<String>) -> Self {
        IndexId {
            name: name.into(),
            uuid: uuid.into(),
        }
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}/{}]", self.name, self.uuid)
    }
}

/// Identity of one shard: the owning index plus the shard number within.
#[derive(
    Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ShardId {
    /// Owning index.
    pub index: IndexId,

    /// Shard number within the index.
    pub shard: u32,
}

impl ShardId {
    /// Creates a new shard identity.
    pub fn new(index: IndexId, shard: u32) -> Self {
        ShardId { index, shard }
    }

    /// Returns the owning index's name.
    #[inline]
    pub fn index_name(&self) -> &str {
        &self.index.name
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}][{}]", self.index.name, self.shard)
    }
}

#[cfg(test)]
mod shard_tests {
    use super::*;

    #[test]
    fn shard_display() {
        let shard = ShardId::new(IndexId::new("logs", "u1"), 3);
        assert_eq!(shard.to_string(), "[logs][3]");
        assert_eq!(shard.index.to_string(), "[logs/u1]");
        assert_eq!(shard.index_name(), "logs");
    }

    #[test]
    fn identity_includes_uuid() {
        let a = ShardId::new(IndexId::new("logs", "u1"), 0);
        let b = ShardId::new(IndexId::new("logs", "u2"), 0);
        assert_ne!(a, b);
    }
}
