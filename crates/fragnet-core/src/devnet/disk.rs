//! Directory-backed devnet
//!
//! Layout under the devnet root:
//!
//! ```text
//! <root>/nodes.json             node registry
//! <root>/nodes/<id>/<root-hex>  fragment bytes
//! ```
//!
//! Fragments are written to a temporary file and renamed into place, so a
//! reader never observes a partially written fragment.

use super::{NodeSpec, fetch_order, node_specs, rank};
use crate::directory::{NodeDirectory, NodeEndpoint, NodeId, SelectionRequest, StorageClient};
use crate::error::{Error, Result, ServiceError};
use async_trait::async_trait;
use bytes::Bytes;
use fragnet_files::{RootHash, fragment_root};
use std::borrow::Cow;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// Node registry file name
pub const REGISTRY_FILE: &str = "nodes.json";

const NODES_DIR: &str = "nodes";

/// Storage network persisted in a directory tree
#[derive(Debug, Clone)]
pub struct DiskNetwork {
    root: PathBuf,
    nodes: Vec<NodeSpec>,
}

impl DiskNetwork {
    /// Create a devnet with `trusted` trusted and `untrusted` untrusted nodes
    ///
    /// An existing registry is replaced; stored fragments are kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for zero nodes, or an I/O error.
    pub async fn init(
        root: impl AsRef<Path>,
        trusted: usize,
        untrusted: usize,
    ) -> Result<Arc<Self>> {
        if trusted + untrusted == 0 {
            return Err(Error::invalid_config("devnet needs at least one node"));
        }

        let mut nodes = node_specs("node", trusted, "disk");
        nodes.extend(
            node_specs("untrusted", untrusted, "disk")
                .into_iter()
                .map(NodeSpec::untrusted),
        );
        Self::init_with_nodes(root, nodes).await
    }

    /// Create a devnet with explicit nodes
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the layout cannot be created.
    pub async fn init_with_nodes(
        root: impl AsRef<Path>,
        nodes: Vec<NodeSpec>,
    ) -> Result<Arc<Self>> {
        let root = root.as_ref().to_path_buf();
        for node in &nodes {
            fs::create_dir_all(root.join(NODES_DIR).join(node.id.as_str())).await?;
        }

        let registry = serde_json::to_vec_pretty(&nodes)?;
        write_atomic(&root.join(REGISTRY_FILE), &registry).await?;

        tracing::info!(
            "Initialized devnet at {} with {} node(s)",
            root.display(),
            nodes.len()
        );
        Ok(Arc::new(Self { root, nodes }))
    }

    /// Open an existing devnet
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if there is no registry, or a
    /// serialization error if it is malformed.
    pub async fn open(root: impl AsRef<Path>) -> Result<Arc<Self>> {
        let root = root.as_ref().to_path_buf();
        let registry = match fs::read(root.join(REGISTRY_FILE)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::InvalidConfig(
                    format!("no devnet at {} (run `devnet init`)", root.display()).into(),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        let nodes: Vec<NodeSpec> = serde_json::from_slice(&registry)?;

        tracing::debug!("Opened devnet at {} ({} nodes)", root.display(), nodes.len());
        Ok(Arc::new(Self { root, nodes }))
    }

    /// Devnet root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Node descriptions
    #[must_use]
    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    /// Whether `node` holds `root`
    pub async fn has_fragment(&self, node: &NodeId, root: &RootHash) -> bool {
        fs::try_exists(self.fragment_path(node, root))
            .await
            .unwrap_or(false)
    }

    fn fragment_path(&self, node: &NodeId, root: &RootHash) -> PathBuf {
        self.root
            .join(NODES_DIR)
            .join(node.as_str())
            .join(hex::encode(root.as_bytes()))
    }
}

#[async_trait]
impl NodeDirectory for DiskNetwork {
    async fn select_nodes(
        &self,
        request: &SelectionRequest,
    ) -> std::result::Result<Vec<NodeEndpoint>, ServiceError> {
        Ok(rank(&self.nodes, request))
    }

    async fn fetch_fragment(&self, root: &RootHash) -> std::result::Result<Bytes, ServiceError> {
        for node in fetch_order(&self.nodes) {
            match fs::read(self.fragment_path(&node.id, root)).await {
                Ok(data) => return Ok(Bytes::from(data)),
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::warn!("Reading {} from {} failed: {}", root.short(), node.id, e);
                }
            }
        }
        Err(ServiceError::NotFound)
    }
}

#[async_trait]
impl StorageClient for DiskNetwork {
    async fn store_fragment(
        &self,
        node: &NodeEndpoint,
        root: &RootHash,
        data: Bytes,
    ) -> std::result::Result<(), ServiceError> {
        if !self.nodes.iter().any(|spec| spec.id == node.id) {
            return Err(ServiceError::rejected("unknown node"));
        }

        let hashed = data.clone();
        let actual = tokio::task::spawn_blocking(move || fragment_root(&hashed))
            .await
            .map_err(|e| ServiceError::Unavailable(Cow::Owned(e.to_string())))?;
        if actual != *root {
            return Err(ServiceError::rejected("data does not match root"));
        }

        let path = self.fragment_path(&node.id, root);
        if fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }
        write_atomic(&path, &data)
            .await
            .map_err(|e| ServiceError::Unavailable(Cow::Owned(e.to_string())))?;

        tracing::trace!("{} stored {}", node.id, root.short());
        Ok(())
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let temp = path.with_extension("tmp");
    fs::write(&temp, data).await?;
    fs::rename(&temp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SelectionMethod;
    use std::time::Duration;
    use tempfile::TempDir;

    fn request(replica: usize, full_trusted: bool) -> SelectionRequest {
        SelectionRequest {
            segment_count: 1,
            replica,
            excluded: Vec::new(),
            method: SelectionMethod::Min,
            full_trusted,
        }
    }

    #[tokio::test]
    async fn test_init_and_open() {
        let dir = TempDir::new().unwrap();
        let net = DiskNetwork::init(dir.path(), 3, 1).await.unwrap();
        assert_eq!(net.nodes().len(), 4);
        assert!(dir.path().join(REGISTRY_FILE).exists());
        assert!(dir.path().join("nodes/node-2").is_dir());

        let reopened = DiskNetwork::open(dir.path()).await.unwrap();
        assert_eq!(reopened.nodes(), net.nodes());
        assert!(reopened.nodes()[0].latency < reopened.nodes()[1].latency);
    }

    #[tokio::test]
    async fn test_reopened_devnet_keeps_min_ranking() {
        let dir = TempDir::new().unwrap();
        let nodes = [("node-a", 5), ("node-b", 1), ("node-c", 3)]
            .into_iter()
            .map(|(id, us)| {
                NodeSpec::new(id, format!("disk://{id}")).with_latency(Duration::from_micros(us))
            })
            .collect();
        DiskNetwork::init_with_nodes(dir.path(), nodes).await.unwrap();
        let reopened = DiskNetwork::open(dir.path()).await.unwrap();

        let chosen = reopened.select_nodes(&request(2, true)).await.unwrap();
        let ids: Vec<_> = chosen.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["node-b", "node-c"]);
    }

    #[tokio::test]
    async fn test_open_missing() {
        let dir = TempDir::new().unwrap();
        let err = DiskNetwork::open(dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_zero_nodes_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(DiskNetwork::init(dir.path(), 0, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_store_fetch_across_instances() {
        let dir = TempDir::new().unwrap();
        let net = DiskNetwork::init(dir.path(), 2, 0).await.unwrap();
        let data = Bytes::from(vec![0x42u8; 1000]);
        let root = fragment_root(&data);

        let nodes = net.select_nodes(&request(1, true)).await.unwrap();
        net.store_fragment(&nodes[0], &root, data.clone()).await.unwrap();
        assert!(net.has_fragment(&nodes[0].id, &root).await);

        let other = DiskNetwork::open(dir.path()).await.unwrap();
        assert_eq!(other.fetch_fragment(&root).await.unwrap(), data);
        assert_eq!(
            other
                .fetch_fragment(&RootHash::from_bytes([0; 32]))
                .await
                .unwrap_err(),
            ServiceError::NotFound
        );
    }

    #[tokio::test]
    async fn test_untrusted_filtering() {
        let dir = TempDir::new().unwrap();
        let net = DiskNetwork::init(dir.path(), 1, 2).await.unwrap();
        assert_eq!(net.select_nodes(&request(3, true)).await.unwrap().len(), 1);
        assert_eq!(net.select_nodes(&request(3, false)).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_store_rejects_mismatch() {
        let dir = TempDir::new().unwrap();
        let net = DiskNetwork::init(dir.path(), 1, 0).await.unwrap();
        let node = net.nodes()[0].endpoint();
        let err = net
            .store_fragment(&node, &RootHash::from_bytes([1; 32]), Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
