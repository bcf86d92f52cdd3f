//! Node directory and storage node seams

use crate::error::ServiceError;
use crate::options::SelectionMethod;
use async_trait::async_trait;
use bytes::Bytes;
use fragnet_files::RootHash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a storage node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Wrap an identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Where a storage node can be reached
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeEndpoint {
    /// Node identifier
    pub id: NodeId,
    /// Transport address, opaque to the orchestrator
    pub address: String,
}

impl NodeEndpoint {
    /// Create an endpoint
    pub fn new(id: impl Into<NodeId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

/// Parameters for one directory query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionRequest {
    /// Segments the selected nodes must accommodate
    pub segment_count: u64,
    /// Nodes wanted
    pub replica: usize,
    /// Nodes that must not be returned
    pub excluded: Vec<NodeId>,
    /// Ranking method
    pub method: SelectionMethod,
    /// Only trusted nodes are eligible
    pub full_trusted: bool,
}

/// Directory of storage nodes
///
/// A directory may return fewer nodes than requested; deciding whether that
/// is enough is the caller's job.
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    /// Ranked candidate nodes for a placement
    async fn select_nodes(
        &self,
        request: &SelectionRequest,
    ) -> Result<Vec<NodeEndpoint>, ServiceError>;

    /// Bytes of the fragment with `root`, from any node holding it
    async fn fetch_fragment(&self, root: &RootHash) -> Result<Bytes, ServiceError>;
}

/// Push interface of storage nodes
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Store `data` under `root` on `node`
    async fn store_fragment(
        &self,
        node: &NodeEndpoint,
        root: &RootHash,
        data: Bytes,
    ) -> Result<(), ServiceError>;
}
