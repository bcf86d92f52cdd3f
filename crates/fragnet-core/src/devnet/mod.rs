//! Local storage networks for development and testing
//!
//! - [`MemoryNetwork`] / [`MemoryChain`]: in-process, with per-node fault
//!   injection, used by the test suites.
//! - [`DiskNetwork`]: one directory per node under a devnet root, shared
//!   between CLI invocations.

mod disk;
mod memory;

pub use disk::{DiskNetwork, REGISTRY_FILE};
pub use memory::{ChainFaults, MemoryChain, MemoryNetwork, NodeFaults};

use crate::directory::{NodeEndpoint, NodeId, SelectionRequest};
use crate::options::SelectionMethod;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Static description of a devnet node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Node identifier
    pub id: NodeId,
    /// Transport address
    pub address: String,
    /// Eligible for `full_trusted` placements
    pub trusted: bool,
    /// Simulated per-request latency, also the primary `min` ranking key
    #[serde(with = "crate::options::micros", rename = "latency_us", default)]
    pub latency: Duration,
    /// Secondary `min` ranking key
    #[serde(default)]
    pub load: u32,
    /// Largest placement (in segments) the node accepts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_segments: Option<u64>,
}

impl NodeSpec {
    /// Trusted node with no latency
    pub fn new(id: impl Into<NodeId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            trusted: true,
            latency: Duration::ZERO,
            load: 0,
            max_segments: None,
        }
    }

    /// Mark the node untrusted
    #[must_use]
    pub fn untrusted(mut self) -> Self {
        self.trusted = false;
        self
    }

    /// Set simulated latency
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Set load
    #[must_use]
    pub fn with_load(mut self, load: u32) -> Self {
        self.load = load;
        self
    }

    /// Cap accepted placement size
    #[must_use]
    pub fn with_max_segments(mut self, max_segments: u64) -> Self {
        self.max_segments = Some(max_segments);
        self
    }

    /// Endpoint handed to the orchestrator
    #[must_use]
    pub fn endpoint(&self) -> NodeEndpoint {
        NodeEndpoint::new(self.id.clone(), self.address.clone())
    }

    fn eligible(&self, request: &SelectionRequest) -> bool {
        (self.trusted || !request.full_trusted)
            && !request.excluded.contains(&self.id)
            && self
                .max_segments
                .is_none_or(|max| request.segment_count <= max)
    }
}

/// `count` trusted node specs named `<prefix>-<i>`
///
/// Latency grows with the index so `min` ranking is deterministic.
pub fn node_specs(prefix: &str, count: usize, scheme: &str) -> Vec<NodeSpec> {
    (0..count)
        .map(|i| {
            let id = format!("{prefix}-{i}");
            NodeSpec::new(id.as_str(), format!("{scheme}://{id}"))
                .with_latency(Duration::from_micros(i as u64))
        })
        .collect()
}

/// Filter and rank `nodes` the way a directory answers `request`
fn rank<'a>(
    nodes: impl IntoIterator<Item = &'a NodeSpec>,
    request: &SelectionRequest,
) -> Vec<NodeEndpoint> {
    let mut eligible: Vec<&NodeSpec> = nodes
        .into_iter()
        .filter(|node| node.eligible(request))
        .collect();

    match request.method {
        SelectionMethod::Min => {
            eligible.sort_by(|a, b| {
                a.latency
                    .cmp(&b.latency)
                    .then(a.load.cmp(&b.load))
                    .then(a.id.cmp(&b.id))
            });
        }
        SelectionMethod::Random => eligible.shuffle(&mut rand::thread_rng()),
    }

    eligible
        .into_iter()
        .take(request.replica)
        .map(NodeSpec::endpoint)
        .collect()
}

/// Nodes in `min` order, for locating fragment holders
fn fetch_order<'a>(nodes: impl IntoIterator<Item = &'a NodeSpec>) -> Vec<&'a NodeSpec> {
    let mut ordered: Vec<&NodeSpec> = nodes.into_iter().collect();
    ordered.sort_by(|a, b| {
        a.latency
            .cmp(&b.latency)
            .then(a.load.cmp(&b.load))
            .then(a.id.cmp(&b.id))
    });
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(replica: usize, method: SelectionMethod, full_trusted: bool) -> SelectionRequest {
        SelectionRequest {
            segment_count: 4,
            replica,
            excluded: Vec::new(),
            method,
            full_trusted,
        }
    }

    #[test]
    fn test_min_ranking() {
        let nodes = vec![
            NodeSpec::new("c", "mem://c").with_latency(Duration::from_millis(5)),
            NodeSpec::new("a", "mem://a").with_latency(Duration::from_millis(1)).with_load(9),
            NodeSpec::new("b", "mem://b").with_latency(Duration::from_millis(1)),
        ];
        let ranked = rank(&nodes, &request(3, SelectionMethod::Min, true));
        let ids: Vec<_> = ranked.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_trust_and_exclusion_filters() {
        let nodes = vec![
            NodeSpec::new("t0", "mem://t0"),
            NodeSpec::new("u0", "mem://u0").untrusted(),
            NodeSpec::new("t1", "mem://t1"),
        ];

        let trusted = rank(&nodes, &request(3, SelectionMethod::Min, true));
        assert_eq!(trusted.len(), 2);
        assert!(trusted.iter().all(|n| n.id.as_str() != "u0"));

        let mut req = request(3, SelectionMethod::Random, false);
        req.excluded = vec![NodeId::from("t1")];
        let any = rank(&nodes, &req);
        assert_eq!(any.len(), 2);
        assert!(any.iter().all(|n| n.id.as_str() != "t1"));
    }

    #[test]
    fn test_capacity_filter() {
        let nodes = vec![
            NodeSpec::new("small", "mem://small").with_max_segments(2),
            NodeSpec::new("big", "mem://big"),
        ];
        let ranked = rank(&nodes, &request(2, SelectionMethod::Min, true));
        let ids: Vec<_> = ranked.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["big"]);
    }

    #[test]
    fn test_node_specs() {
        let specs = node_specs("node", 3, "mem");
        assert_eq!(specs[2].id, NodeId::from("node-2"));
        assert_eq!(specs[2].address, "mem://node-2");
        assert!(specs[0].latency < specs[1].latency);
        assert!(specs.iter().all(|s| s.trusted));
    }

    #[test]
    fn test_spec_serde() {
        let spec = NodeSpec::new("n", "disk://n")
            .untrusted()
            .with_latency(Duration::from_millis(3));
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("\"latency_us\":3000"));
        let back: NodeSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_sub_millisecond_latency_survives_serde() {
        let specs = node_specs("node", 3, "disk");
        let json = serde_json::to_string(&specs).unwrap();
        let back: Vec<NodeSpec> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, specs);
        assert_eq!(back[2].latency, Duration::from_micros(2));
    }
}
