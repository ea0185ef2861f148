//! One physical copy (primary or replica) of a shard.

use std::fmt;

use crate::routing::ShardId;
use crate::utils::ShardRouteError;

use rand::distributions::Alphanumeric;
use rand::Rng;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a shard copy.
#[derive(
    Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Serialize,
    Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CopyState {
    /// Not assigned to any node.
    Unassigned,

    /// Assigned to a node and recovering its data.
    Initializing,

    /// Assigned, fully recovered, and serving.
    Started,

    /// Started and being moved to another node.
    Relocating,
}

impl CopyState {
    /// All states in wire-code order.
    pub const ALL: [CopyState; 4] = [
        CopyState::Unassigned,
        CopyState::Initializing,
        CopyState::Started,
        CopyState::Relocating,
    ];

    /// Returns the one-byte wire code of this state.
    #[inline]
    pub fn code(&self) -> u8 {
        match self {
            CopyState::Unassigned => 0,
            CopyState::Initializing => 1,
            CopyState::Started => 2,
            CopyState::Relocating => 3,
        }
    }

    /// Parses a one-byte wire code.
    #[inline]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }
}

impl fmt::Display for CopyState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            CopyState::Unassigned => "UNASSIGNED",
            CopyState::Initializing => "INITIALIZING",
            CopyState::Started => "STARTED",
            CopyState::Relocating => "RELOCATING",
        };
        write!(f, "{}", name)
    }
}

/// Identifier of one physical assignment of a copy to a node.
///
/// A relocating copy carries in `relocation_id` the allocation ID its
/// relocation target uses; the target in turn points back at the source's ID
/// through its own `relocation_id`.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct AllocationId {
    /// The ID itself.
    pub id: String,

    /// Counterpart ID while a relocation is in flight.
    pub relocation_id: Option<String>,
}

impl AllocationId {
    /// Creates a plain allocation ID with no relocation in flight.
    pub fn new(id: impl Into<String>) -> Self {
        AllocationId {
            id: id.into(),
            relocation_id: None,
        }
    }

    /// Generates a fresh random allocation ID.
    pub fn random() -> Self {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(20)
            .map(char::from)
            .collect();
        Self::new(id)
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.relocation_id {
            Some(rid) => write!(f, "[id={}, rId={}]", self.id, rid),
            None => write!(f, "[id={}]", self.id),
        }
    }
}

/// One instance of a shard. Immutable once created; state changes produce
/// a new copy through the lifecycle helpers.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct ShardCopy {
    shard_id: ShardId,
    primary: bool,
    state: CopyState,
    current_node: Option<String>,
    relocating_node: Option<String>,
    allocation_id: Option<AllocationId>,
}

impl ShardCopy {
    /// Creates a copy from raw parts, checking the field invariants:
    /// a node and an allocation ID are present iff the copy is assigned,
    /// a relocation target node is present iff the copy is relocating (and
    /// differs from the current node), and a relocating copy's allocation ID
    /// names the target's allocation ID.
    pub fn new(
        shard_id: ShardId,
        primary: bool,
        state: CopyState,
        current_node: Option<String>,
        relocating_node: Option<String>,
        allocation_id: Option<AllocationId>,
    ) -> Result<Self, ShardRouteError> {
        let assigned = state != CopyState::Unassigned;
        if current_node.is_some() != assigned {
            return Err(ShardRouteError::msg(format!(
                "copy of {} in state {} has node {:?}",
                shard_id, state, current_node
            )));
        }
        if allocation_id.is_some() != assigned {
            return Err(ShardRouteError::msg(format!(
                "copy of {} in state {} has allocation ID {:?}",
                shard_id, state, allocation_id
            )));
        }
        if relocating_node.is_some() != (state == CopyState::Relocating) {
            return Err(ShardRouteError::msg(format!(
                "copy of {} in state {} has relocation target {:?}",
                shard_id, state, relocating_node
            )));
        }
        if state == CopyState::Relocating {
            if relocating_node == current_node {
                return Err(ShardRouteError::msg(format!(
                    "copy of {} relocating to its own node {:?}",
                    shard_id, current_node
                )));
            }
            if allocation_id
                .as_ref()
                .map_or(true, |aid| aid.relocation_id.is_none())
            {
                return Err(ShardRouteError::msg(format!(
                    "relocating copy of {} lacks a target allocation ID",
                    shard_id
                )));
            }
        }

        Ok(ShardCopy {
            shard_id,
            primary,
            state,
            current_node,
            relocating_node,
            allocation_id,
        })
    }

    /// Creates a copy not assigned to any node.
    pub fn new_unassigned(shard_id: ShardId, primary: bool) -> Self {
        ShardCopy {
            shard_id,
            primary,
            state: CopyState::Unassigned,
            current_node: None,
            relocating_node: None,
            allocation_id: None,
        }
    }

    /// Creates a copy initializing on given node.
    pub fn new_initializing(
        shard_id: ShardId,
        primary: bool,
        node: impl Into<String>,
        allocation_id: impl Into<String>,
    ) -> Self {
        ShardCopy {
            shard_id,
            primary,
            state: CopyState::Initializing,
            current_node: Some(node.into()),
            relocating_node: None,
            allocation_id: Some(AllocationId::new(allocation_id)),
        }
    }

    /// Creates a copy started on given node.
    pub fn new_started(
        shard_id: ShardId,
        primary: bool,
        node: impl Into<String>,
        allocation_id: impl Into<String>,
    ) -> Self {
        ShardCopy {
            shard_id,
            primary,
            state: CopyState::Started,
            current_node: Some(node.into()),
            relocating_node: None,
            allocation_id: Some(AllocationId::new(allocation_id)),
        }
    }

    /// Creates a copy relocating from `node` to `target_node`; the target
    /// will be tagged with `target_allocation_id`.
    pub fn new_relocating(
        shard_id: ShardId,
        primary: bool,
        node: impl Into<String>,
        target_node: impl Into<String>,
        allocation_id: impl Into<String>,
        target_allocation_id: impl Into<String>,
    ) -> Result<Self, ShardRouteError> {
        Self::new_started(shard_id, primary, node, allocation_id)
            .relocate_to(target_node, target_allocation_id)
    }

    /// Shard this copy belongs to.
    #[inline]
    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// True if this copy is the primary.
    #[inline]
    pub fn primary(&self) -> bool {
        self.primary
    }

    /// Lifecycle state.
    #[inline]
    pub fn state(&self) -> CopyState {
        self.state
    }

    /// Node hosting this copy, if assigned.
    #[inline]
    pub fn current_node(&self) -> Option<&str> {
        self.current_node.as_deref()
    }

    /// Node this copy is relocating to, if relocating.
    #[inline]
    pub fn relocating_node(&self) -> Option<&str> {
        self.relocating_node.as_deref()
    }

    /// Allocation ID, if assigned.
    #[inline]
    pub fn allocation_id(&self) -> Option<&AllocationId> {
        self.allocation_id.as_ref()
    }

    /// True if assigned to a node.
    #[inline]
    pub fn assigned_to_node(&self) -> bool {
        self.current_node.is_some()
    }

    /// True if this copy is STARTED. Relocating sources are not counted.
    #[inline]
    pub fn active(&self) -> bool {
        self.state == CopyState::Started
    }

    #[inline]
    pub fn started(&self) -> bool {
        self.state == CopyState::Started
    }

    #[inline]
    pub fn initializing(&self) -> bool {
        self.state == CopyState::Initializing
    }

    #[inline]
    pub fn relocating(&self) -> bool {
        self.state == CopyState::Relocating
    }

    #[inline]
    pub fn unassigned(&self) -> bool {
        self.state == CopyState::Unassigned
    }

    /// True if this copy is the synthesized target of a relocation.
    #[inline]
    pub fn is_relocation_target(&self) -> bool {
        self.initializing()
            && self
                .allocation_id
                .as_ref()
                .is_some_and(|aid| aid.relocation_id.is_some())
    }

    /// Returns the implicit initializing copy on the relocation target node
    /// if this copy is relocating, else `None`.
    pub fn target_relocating_copy(&self) -> Option<ShardCopy> {
        if !self.relocating() {
            return None;
        }
        let source_aid = self.allocation_id.as_ref()?;
        Some(ShardCopy {
            shard_id: self.shard_id.clone(),
            primary: self.primary,
            state: CopyState::Initializing,
            current_node: self.relocating_node.clone(),
            relocating_node: None,
            allocation_id: Some(AllocationId {
                id: source_aid.relocation_id.clone()?,
                relocation_id: Some(source_aid.id.clone()),
            }),
        })
    }

    /// Returns a STARTED copy out of this INITIALIZING one.
    pub fn move_to_started(&self) -> Result<ShardCopy, ShardRouteError> {
        if !self.initializing() {
            return Err(ShardRouteError::msg(format!(
                "cannot start copy in state {}: {}",
                self.state,
                self.short_summary()
            )));
        }
        let mut copy = self.clone();
        copy.state = CopyState::Started;
        if let Some(aid) = copy.allocation_id.as_mut() {
            aid.relocation_id = None;
        }
        Ok(copy)
    }

    /// Returns a RELOCATING copy out of this STARTED one.
    pub fn relocate_to(
        &self,
        target_node: impl Into<String>,
        target_allocation_id: impl Into<String>,
    ) -> Result<ShardCopy, ShardRouteError> {
        if !self.started() {
            return Err(ShardRouteError::msg(format!(
                "cannot relocate copy in state {}: {}",
                self.state,
                self.short_summary()
            )));
        }
        let target_node = target_node.into();
        if self.current_node.as_deref() == Some(target_node.as_str()) {
            return Err(ShardRouteError::msg(format!(
                "cannot relocate copy to its own node: {}",
                self.short_summary()
            )));
        }
        let mut copy = self.clone();
        copy.state = CopyState::Relocating;
        copy.relocating_node = Some(target_node);
        if let Some(aid) = copy.allocation_id.as_mut() {
            aid.relocation_id = Some(target_allocation_id.into());
        }
        Ok(copy)
    }

    /// Returns a STARTED copy out of this RELOCATING one, dropping the
    /// relocation target.
    pub fn cancel_relocation(&self) -> Result<ShardCopy, ShardRouteError> {
        if !self.relocating() {
            return Err(ShardRouteError::msg(format!(
                "cannot cancel relocation of copy in state {}: {}",
                self.state,
                self.short_summary()
            )));
        }
        let mut copy = self.clone();
        copy.state = CopyState::Started;
        copy.relocating_node = None;
        if let Some(aid) = copy.allocation_id.as_mut() {
            aid.relocation_id = None;
        }
        Ok(copy)
    }

    /// A short human readable description for logging.
    pub fn short_summary(&self) -> String {
        let mut s = format!(
            "{}, node[{}], ",
            self.shard_id,
            self.current_node.as_deref().unwrap_or("none")
        );
        if let Some(target) = &self.relocating_node {
            s.push_str(&format!("relocating [{}], ", target));
        }
        s.push_str(if self.primary { "[P]" } else { "[R]" });
        s.push_str(&format!(", s[{}]", self.state));
        if let Some(aid) = &self.allocation_id {
            s.push_str(&format!(", a{}", aid));
        }
        s
    }
}

impl fmt::Display for ShardCopy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.short_summary())
    }
}
