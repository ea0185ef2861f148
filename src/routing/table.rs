//! Immutable routing table over all copies of one shard.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::slice;

use crate::nodes::NodeResolver;
use crate::routing::{
    CopyState, RotationShuffler, ShardCopy, ShardId, ShardIter,
};
use crate::selection::{
    AdaptiveReplicaSelector, NodeStatsSource, NodeUsageCounters,
};
use crate::utils::ShardRouteError;

/// All copies of a single shard, plus classification views derived once at
/// construction. Never mutated afterwards; a state transition produces a new
/// table through [`RoutingTableBuilder`](crate::RoutingTableBuilder).
#[derive(Debug)]
pub struct RoutingTable {
    /// Shard identity.
    shard_id: ShardId,

    /// Rotation source for the randomized strategies.
    shuffler: RotationShuffler,

    /// All copies, in the order they were added.
    copies: Vec<ShardCopy>,

    /// The primary copy, if any.
    primary: Option<ShardCopy>,

    /// All non-primary copies.
    replicas: Vec<ShardCopy>,

    /// STARTED copies.
    active: Vec<ShardCopy>,

    /// Copies on a node, plus the targets of relocating copies.
    assigned: Vec<ShardCopy>,

    /// INITIALIZING copies, plus the targets of relocating copies.
    all_initializing: Vec<ShardCopy>,

    /// Allocation IDs of assigned copies and relocation targets.
    all_allocation_ids: HashSet<String>,

    /// True iff every copy is STARTED.
    all_shards_started: bool,
}

impl RoutingTable {
    /// Classifies given copies in one pass. Placement invariants must have
    /// been checked by the builder already.
    pub(crate) fn new(shard_id: ShardId, copies: Vec<ShardCopy>) -> Self {
        Self::with_shuffler(shard_id, copies, RotationShuffler::new())
    }

    pub(crate) fn with_shuffler(
        shard_id: ShardId,
        copies: Vec<ShardCopy>,
        shuffler: RotationShuffler,
    ) -> Self {
        let mut primary = None;
        let mut replicas = vec![];
        let mut active = vec![];
        let mut assigned = vec![];
        let mut all_initializing = vec![];
        let mut all_allocation_ids = HashSet::new();
        let mut all_shards_started = true;

        for copy in &copies {
            if copy.primary() {
                primary = Some(copy.clone());
            } else {
                replicas.push(copy.clone());
            }
            if copy.active() {
                active.push(copy.clone());
            }
            if copy.initializing() {
                all_initializing.push(copy.clone());
            }
            if let Some(target) = copy.target_relocating_copy() {
                debug_assert!(copy.assigned_to_node());
                if let Some(aid) = target.allocation_id() {
                    all_allocation_ids.insert(aid.id.clone());
                }
                all_initializing.push(target.clone());
                assigned.push(target);
            }
            if copy.assigned_to_node() {
                assigned.push(copy.clone());
                if let Some(aid) = copy.allocation_id() {
                    all_allocation_ids.insert(aid.id.clone());
                }
            }
            if copy.state() != CopyState::Started {
                all_shards_started = false;
            }
        }

        RoutingTable {
            shard_id,
            shuffler,
            copies,
            primary,
            replicas,
            active,
            assigned,
            all_initializing,
            all_allocation_ids,
            all_shards_started,
        }
    }

    /// Shard identity.
    #[inline]
    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// Number of copies.
    #[inline]
    pub fn size(&self) -> usize {
        self.copies.len()
    }

    /// All copies in table order.
    #[inline]
    pub fn copies(&self) -> &[ShardCopy] {
        &self.copies
    }

    /// Allows `for copy in table.iter()`.
    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, ShardCopy> {
        self.copies.iter()
    }

    /// The primary copy, if one is present.
    #[inline]
    pub fn primary(&self) -> Option<&ShardCopy> {
        self.primary.as_ref()
    }

    /// All non-primary copies.
    #[inline]
    pub fn replicas(&self) -> &[ShardCopy] {
        &self.replicas
    }

    /// STARTED copies.
    #[inline]
    pub fn active(&self) -> &[ShardCopy] {
        &self.active
    }

    /// Assigned copies, including relocation targets.
    #[inline]
    pub fn assigned(&self) -> &[ShardCopy] {
        &self.assigned
    }

    /// INITIALIZING copies, including relocation targets.
    #[inline]
    pub fn all_initializing(&self) -> &[ShardCopy] {
        &self.all_initializing
    }

    /// Allocation IDs of assigned copies, including relocation targets.
    #[inline]
    pub fn all_allocation_ids(&self) -> &HashSet<String> {
        &self.all_allocation_ids
    }

    /// True iff every copy is STARTED.
    #[inline]
    pub fn all_shards_started(&self) -> bool {
        self.all_shards_started
    }

    /// Looks up an assigned copy (relocation targets included) by its
    /// allocation ID.
    pub fn by_allocation_id(&self, allocation_id: &str) -> Option<&ShardCopy> {
        self.assigned.iter().find(|copy| {
            copy.allocation_id()
                .is_some_and(|aid| aid.id == allocation_id)
        })
    }

    /// Copies in given state. INITIALIZING includes relocation targets.
    pub fn copies_with_state(&self, state: CopyState) -> Vec<ShardCopy> {
        if state == CopyState::Initializing {
            return self.all_initializing.clone();
        }
        self.copies
            .iter()
            .filter(|copy| copy.state() == state)
            .cloned()
            .collect()
    }

    /// Replicas in any of given states.
    pub fn replicas_with_state(&self, states: &[CopyState]) -> Vec<ShardCopy> {
        self.replicas
            .iter()
            .filter(|copy| states.contains(&copy.state()))
            .cloned()
            .collect()
    }

    /// A short human readable description for logging.
    pub fn short_summary(&self) -> String {
        let summaries: Vec<String> =
            self.copies.iter().map(|copy| copy.short_summary()).collect();
        format!("RoutingTable({}){{{}}}", self.shard_id, summaries.join(", "))
    }
}

// RoutingTable copy selection strategies
impl RoutingTable {
    /// Hands out the next rotation seed of this table.
    #[inline]
    pub fn next_seed(&self) -> i32 {
        self.shuffler.next_seed()
    }

    #[inline]
    fn iter_over(&self, copies: Vec<ShardCopy>) -> ShardIter {
        ShardIter::new(self.shard_id.clone(), copies)
    }

    /// All copies, rotated by the next seed.
    pub fn all_random(&self) -> ShardIter {
        self.iter_over(self.shuffler.shuffle(&self.copies))
    }

    /// All copies in table order.
    pub fn all(&self) -> ShardIter {
        self.iter_over(self.copies.clone())
    }

    /// All copies, rotated by given seed.
    pub fn all_seeded(&self, seed: i32) -> ShardIter {
        self.iter_over(self.shuffler.shuffle_seeded(&self.copies, seed))
    }

    /// Active copies rotated by the next seed, then initializing copies in
    /// table order.
    pub fn active_then_initializing_random(&self) -> ShardIter {
        self.active_then_initializing(self.shuffler.next_seed())
    }

    /// Active copies rotated by given seed, then initializing copies in
    /// table order. Initializing copies are never rotated: the caller should
    /// try at most one before falling back.
    pub fn active_then_initializing(&self, seed: i32) -> ShardIter {
        let mut ordered = self.shuffler.shuffle_seeded(&self.active, seed);
        ordered.extend(self.all_initializing.iter().cloned());
        self.iter_over(ordered)
    }

    /// Same skeleton as [`Self::active_then_initializing_random`], with both
    /// halves passed through adaptive replica selection. Degrades to the
    /// plain rotation order if either collaborator is absent.
    pub fn active_then_initializing_ranked(
        &self,
        collector: Option<&dyn NodeStatsSource>,
        usage: Option<&NodeUsageCounters>,
    ) -> ShardIter {
        let seed = self.shuffler.next_seed();
        let active = self.shuffler.shuffle_seeded(&self.active, seed);
        let (collector, usage) = match (collector, usage) {
            (Some(collector), Some(usage)) => (collector, usage),
            _ => {
                let mut ordered = active;
                ordered.extend(self.all_initializing.iter().cloned());
                return self.iter_over(ordered);
            }
        };

        let selector = AdaptiveReplicaSelector::new(collector, usage);
        let mut ordered = selector.rank(active);
        if !self.all_initializing.is_empty() {
            ordered.extend(selector.rank(self.all_initializing.clone()));
        }
        self.iter_over(ordered)
    }

    /// Just the primary, if assigned to a node.
    pub fn primary_only(&self) -> ShardIter {
        let copies = self
            .primary
            .iter()
            .filter(|copy| copy.assigned_to_node())
            .cloned()
            .collect();
        self.iter_over(copies)
    }

    /// Collects rotated active then rotated initializing copies hosted on
    /// nodes accepted by `keep`, with one shared seed so a node keeps the
    /// same relative position in both halves.
    fn filtered_by_node(&self, keep: impl Fn(&str) -> bool) -> Vec<ShardCopy> {
        let seed = self.shuffler.next_seed();
        let on_kept_node =
            |copy: &ShardCopy| copy.current_node().is_some_and(&keep);
        let mut ordered: Vec<ShardCopy> = self
            .shuffler
            .shuffle_seeded(&self.active, seed)
            .into_iter()
            .filter(|copy| on_kept_node(copy))
            .collect();
        ordered.extend(
            self.shuffler
                .shuffle_seeded(&self.all_initializing, seed)
                .into_iter()
                .filter(|copy| on_kept_node(copy)),
        );
        ordered
    }

    /// Active then initializing copies on the given node only.
    pub fn on_node(&self, node_id: &str) -> ShardIter {
        self.iter_over(self.filtered_by_node(|node| node == node_id))
    }

    /// Active then initializing copies on the nodes matching any of the
    /// given selector expressions. Fails if no copy is on a matched node.
    pub fn on_nodes_matching(
        &self,
        selectors: &[&str],
        resolver: &dyn NodeResolver,
    ) -> Result<ShardIter, ShardRouteError> {
        let selected = resolver.resolve_nodes(selectors);
        let ordered = self.filtered_by_node(|node| selected.contains(node));
        if ordered.is_empty() {
            pf_debug!(
                "selectors {:?} matched no copy of {}",
                selectors,
                self.shard_id
            );
            return Err(ShardRouteError::NoMatchingNodes {
                selectors: selectors.iter().map(|s| s.to_string()).collect(),
                shard: self.shard_id.clone(),
            });
        }
        Ok(self.iter_over(ordered))
    }

    /// Rotated active copies on preferred nodes first, then the remaining
    /// rotated active copies, then all initializing copies unrotated.
    pub fn preferring_nodes(&self, node_ids: &HashSet<String>) -> ShardIter {
        let (mut preferred, not_preferred): (Vec<_>, Vec<_>) = self
            .shuffler
            .shuffle(&self.active)
            .into_iter()
            .partition(|copy| {
                copy.current_node().is_some_and(|n| node_ids.contains(n))
            });
        preferred.extend(not_preferred);
        preferred.extend(self.all_initializing.iter().cloned());
        self.iter_over(preferred)
    }
}

impl PartialEq for RoutingTable {
    fn eq(&self, other: &Self) -> bool {
        self.shard_id == other.shard_id && self.copies == other.copies
    }
}

impl Eq for RoutingTable {}

impl Hash for RoutingTable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.shard_id.hash(state);
        self.copies.hash(state);
    }
}

impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.short_summary())
    }
}

impl<'t> IntoIterator for &'t RoutingTable {
    type Item = &'t ShardCopy;
    type IntoIter = slice::Iter<'t, ShardCopy>;

    fn into_iter(self) -> Self::IntoIter {
        self.copies.iter()
    }
}
