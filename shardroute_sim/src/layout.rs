//! Simulated cluster layout, read from a TOML file.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use shardroute::{
    AllocationId, CopyState, DiscoveryNode, DiscoveryNodes, IndexId,
    ResponseCollector, RoutingTable, RoutingTableBuilder, ShardCopy,
    ShardId, ShardRouteError,
};

const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// One copy of the simulated shard.
#[derive(Debug, Clone, Deserialize)]
pub struct CopySpec {
    /// Hosting node; absent iff unassigned.
    pub node: Option<String>,

    /// Lifecycle state.
    pub state: CopyState,

    /// Is this the primary?
    #[serde(default)]
    pub primary: bool,

    /// Relocation target node, for relocating copies.
    pub relocating_to: Option<String>,
}

/// One simulated node and its baseline performance.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSpec {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub ip: String,

    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// Baseline search queue size.
    pub queue_size: u32,

    /// Baseline response time in millisecs.
    pub response_ms: f64,

    /// Baseline service time in millisecs.
    pub service_ms: f64,
}

impl NodeSpec {
    /// One synthetic observation of this node: baseline numbers scaled by
    /// given jitter factor, plus extra queued requests. Times in nanosecs.
    pub fn observation(
        &self,
        jitter: f64,
        extra_queue: u32,
    ) -> (u32, u64, u64) {
        (
            self.queue_size + extra_queue,
            (self.response_ms * jitter * NANOS_PER_MILLI) as u64,
            (self.service_ms * jitter * NANOS_PER_MILLI) as u64,
        )
    }
}

/// Index, shard, copies, and nodes of the simulation.
#[derive(Debug, Clone, Deserialize)]
pub struct Layout {
    pub index: String,

    #[serde(default)]
    pub uuid: String,

    #[serde(default)]
    pub shard: u32,

    /// Node the simulated requests originate from.
    #[serde(default)]
    pub local_node: Option<String>,

    pub copies: Vec<CopySpec>,

    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

impl Layout {
    /// Parses a layout from TOML text.
    pub fn parse(text: &str) -> Result<Self, ShardRouteError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a layout file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ShardRouteError> {
        Self::parse(&fs::read_to_string(path)?)
    }

    pub fn shard_id(&self) -> ShardId {
        ShardId::new(IndexId::new(&self.index, &self.uuid), self.shard)
    }

    fn make_copy(
        &self,
        spec: &CopySpec,
    ) -> Result<ShardCopy, ShardRouteError> {
        let shard_id = self.shard_id();
        let node = match (&spec.node, spec.state) {
            (None, CopyState::Unassigned) => {
                return Ok(ShardCopy::new_unassigned(shard_id, spec.primary))
            }
            (Some(node), state) if state != CopyState::Unassigned => node,
            (node, state) => {
                return Err(ShardRouteError::msg(format!(
                    "copy in state {} with node {:?}",
                    state, node
                )))
            }
        };

        let aid = AllocationId::random().id;
        match (spec.state, &spec.relocating_to) {
            (CopyState::Initializing, None) => Ok(
                ShardCopy::new_initializing(shard_id, spec.primary, node, aid),
            ),
            (CopyState::Started, None) => {
                Ok(ShardCopy::new_started(shard_id, spec.primary, node, aid))
            }
            (CopyState::Relocating, Some(target)) => {
                ShardCopy::new_relocating(
                    shard_id,
                    spec.primary,
                    node,
                    target,
                    aid,
                    AllocationId::random().id,
                )
            }
            (state, target) => Err(ShardRouteError::msg(format!(
                "copy in state {} with relocation target {:?}",
                state, target
            ))),
        }
    }

    /// Builds the routing table of the simulated shard.
    pub fn routing_table(&self) -> Result<RoutingTable, ShardRouteError> {
        let mut builder = RoutingTableBuilder::new(self.shard_id());
        for spec in &self.copies {
            builder.add(self.make_copy(spec)?);
        }
        builder.build()
    }

    /// Discovered node set, with the local node if given.
    pub fn discovery_nodes(&self) -> DiscoveryNodes {
        let nodes = self
            .nodes
            .iter()
            .map(|spec| {
                let name = spec.name.as_deref().unwrap_or(&spec.id);
                spec.attributes.iter().fold(
                    DiscoveryNode::new(&spec.id, name, &spec.ip),
                    |node, (k, v)| node.with_attr(k, v),
                )
            })
            .collect();
        DiscoveryNodes::new(nodes, self.local_node.clone())
    }

    /// Seeds a collector with every node's baseline numbers.
    pub fn seed_collector(&self, collector: &ResponseCollector) {
        for spec in &self.nodes {
            let (queue_size, response_time, service_time) =
                spec.observation(1.0, 0);
            collector.observe(
                &spec.id,
                queue_size,
                response_time,
                service_time,
            );
        }
    }

    /// Baseline spec of given node.
    pub fn node(&self, node_id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == node_id)
    }
}
