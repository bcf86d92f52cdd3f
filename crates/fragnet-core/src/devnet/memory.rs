//! In-process storage network and chain

use super::{NodeSpec, fetch_order, node_specs, rank};
use crate::chain::{ChainClient, FinalityKey, TxHash};
use crate::directory::{NodeDirectory, NodeEndpoint, NodeId, SelectionRequest, StorageClient};
use crate::error::ServiceError;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use fragnet_files::{RootHash, fragment_root};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Injected misbehaviour of one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFaults {
    /// Fail this many upcoming stores with `Unavailable`
    pub fail_stores: u32,
    /// Refuse every store with `Rejected`
    pub reject_stores: bool,
    /// Node is unreachable: not selectable, stores and reads fail
    pub offline: bool,
    /// Serve fragments with one byte flipped
    pub corrupt_reads: bool,
    /// Extra delay before a store completes
    pub store_delay: Duration,
}

/// Shared in-memory network of storage nodes
///
/// Acts as both the [`NodeDirectory`] and the [`StorageClient`].
pub struct MemoryNetwork {
    nodes: Vec<NodeSpec>,
    stored: DashMap<NodeId, HashMap<RootHash, Bytes>>,
    faults: DashMap<NodeId, NodeFaults>,
    failing_selections: AtomicU32,
    store_calls: AtomicU64,
    fetch_calls: AtomicU64,
}

impl MemoryNetwork {
    /// Network of `trusted` trusted and `untrusted` untrusted nodes
    ///
    /// Trusted nodes are named `node-<i>`, untrusted ones `untrusted-<i>`.
    pub fn new(trusted: usize, untrusted: usize) -> Arc<Self> {
        let mut nodes = node_specs("node", trusted, "mem");
        nodes.extend(
            node_specs("untrusted", untrusted, "mem")
                .into_iter()
                .map(NodeSpec::untrusted),
        );
        Self::with_nodes(nodes)
    }

    /// Network of explicit nodes
    pub fn with_nodes(nodes: Vec<NodeSpec>) -> Arc<Self> {
        tracing::debug!("Memory network with {} node(s)", nodes.len());
        Arc::new(Self {
            nodes,
            stored: DashMap::new(),
            faults: DashMap::new(),
            failing_selections: AtomicU32::new(0),
            store_calls: AtomicU64::new(0),
            fetch_calls: AtomicU64::new(0),
        })
    }

    /// Node descriptions
    #[must_use]
    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    /// Replace the faults of `node`
    pub fn set_faults(&self, node: impl Into<NodeId>, faults: NodeFaults) {
        self.faults.insert(node.into(), faults);
    }

    /// Edit the faults of `node` in place
    pub fn update_faults(&self, node: impl Into<NodeId>, edit: impl FnOnce(&mut NodeFaults)) {
        edit(&mut self.faults.entry(node.into()).or_default());
    }

    /// Make the next `count` directory queries fail with `Unavailable`
    pub fn fail_selections(&self, count: u32) {
        self.failing_selections.store(count, Ordering::SeqCst);
    }

    /// Nodes holding `root`, sorted by id
    #[must_use]
    pub fn holders(&self, root: &RootHash) -> Vec<NodeId> {
        let mut holders: Vec<NodeId> = self
            .stored
            .iter()
            .filter(|entry| entry.value().contains_key(root))
            .map(|entry| entry.key().clone())
            .collect();
        holders.sort();
        holders
    }

    /// Whether `node` holds `root`
    #[must_use]
    pub fn has_fragment(&self, node: &NodeId, root: &RootHash) -> bool {
        self.stored
            .get(node)
            .is_some_and(|fragments| fragments.contains_key(root))
    }

    /// Number of fragments stored on `node`
    #[must_use]
    pub fn fragment_count(&self, node: &NodeId) -> usize {
        self.stored.get(node).map_or(0, |fragments| fragments.len())
    }

    /// Store calls received, including failed ones
    #[must_use]
    pub fn store_calls(&self) -> u64 {
        self.store_calls.load(Ordering::SeqCst)
    }

    /// Fetch calls received
    #[must_use]
    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Drop `root` from every node
    pub fn evict(&self, root: &RootHash) {
        for mut fragments in self.stored.iter_mut() {
            fragments.value_mut().remove(root);
        }
    }

    fn spec(&self, id: &NodeId) -> Option<&NodeSpec> {
        self.nodes.iter().find(|node| &node.id == id)
    }

    fn faults_of(&self, id: &NodeId) -> NodeFaults {
        self.faults
            .get(id)
            .map(|faults| faults.clone())
            .unwrap_or_default()
    }

    fn is_online(&self, id: &NodeId) -> bool {
        !self.faults.get(id).is_some_and(|faults| faults.offline)
    }

    /// Consume one injected store failure, if any remain
    fn take_store_failure(&self, id: &NodeId) -> bool {
        let Some(mut faults) = self.faults.get_mut(id) else {
            return false;
        };
        if faults.fail_stores > 0 {
            faults.fail_stores -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl NodeDirectory for MemoryNetwork {
    async fn select_nodes(
        &self,
        request: &SelectionRequest,
    ) -> Result<Vec<NodeEndpoint>, ServiceError> {
        if self
            .failing_selections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ServiceError::unavailable("directory overloaded"));
        }

        Ok(rank(
            self.nodes.iter().filter(|node| self.is_online(&node.id)),
            request,
        ))
    }

    async fn fetch_fragment(&self, root: &RootHash) -> Result<Bytes, ServiceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        for node in fetch_order(&self.nodes) {
            if !self.is_online(&node.id) {
                continue;
            }
            let Some(data) = self
                .stored
                .get(&node.id)
                .and_then(|fragments| fragments.get(root).cloned())
            else {
                continue;
            };

            if !node.latency.is_zero() {
                tokio::time::sleep(node.latency).await;
            }

            if self.faults_of(&node.id).corrupt_reads {
                tracing::trace!("{} serving corrupted {}", node.id, root.short());
                return Ok(corrupt(&data));
            }
            return Ok(data);
        }

        Err(ServiceError::NotFound)
    }
}

#[async_trait]
impl StorageClient for MemoryNetwork {
    async fn store_fragment(
        &self,
        node: &NodeEndpoint,
        root: &RootHash,
        data: Bytes,
    ) -> Result<(), ServiceError> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);

        let spec = self
            .spec(&node.id)
            .ok_or(ServiceError::rejected("unknown node"))?;
        let faults = self.faults_of(&node.id);

        if faults.offline {
            return Err(ServiceError::unavailable("node offline"));
        }
        if faults.reject_stores {
            return Err(ServiceError::rejected("node refuses fragments"));
        }
        if self.take_store_failure(&node.id) {
            return Err(ServiceError::unavailable("injected store failure"));
        }

        let delay = spec.latency + faults.store_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if fragment_root(&data) != *root {
            return Err(ServiceError::rejected("data does not match root"));
        }

        self.stored
            .entry(node.id.clone())
            .or_default()
            .insert(*root, data);

        tracing::trace!("{} stored {}", node.id, root.short());
        Ok(())
    }
}

fn corrupt(data: &Bytes) -> Bytes {
    let mut bytes = data.to_vec();
    match bytes.first_mut() {
        Some(first) => *first ^= 0xff,
        None => bytes.push(0),
    }
    Bytes::from(bytes)
}

/// Injected misbehaviour of the chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainFaults {
    /// Fail this many upcoming submissions with `Unavailable`
    pub fail_submits: u32,
    /// Refuse every submission with `Rejected`
    pub reject_submits: bool,
    /// Never report finality
    pub never_finalize: bool,
    /// Answer finality queries with `Rejected`
    pub reject_finality: bool,
}

/// In-memory chain with a fixed finality delay
///
/// A transaction is final `finality_delay` after submission. A bare root is
/// final `finality_delay` after it was first submitted or first asked about.
pub struct MemoryChain {
    finality_delay: Duration,
    transactions: DashMap<TxHash, (RootHash, Instant)>,
    roots: DashMap<RootHash, Instant>,
    faults: Mutex<ChainFaults>,
    nonce: AtomicU64,
}

impl MemoryChain {
    /// Chain finalizing after `finality_delay`
    pub fn new(finality_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            finality_delay,
            transactions: DashMap::new(),
            roots: DashMap::new(),
            faults: Mutex::new(ChainFaults::default()),
            nonce: AtomicU64::new(0),
        })
    }

    /// Replace the injected faults
    pub fn set_faults(&self, faults: ChainFaults) {
        if let Ok(mut guard) = self.faults.lock() {
            *guard = faults;
        }
    }

    /// Successful submissions so far
    #[must_use]
    pub fn submissions(&self) -> usize {
        self.transactions.len()
    }

    /// Root registered by `tx`
    #[must_use]
    pub fn root_of(&self, tx: &TxHash) -> Option<RootHash> {
        self.transactions.get(tx).map(|entry| entry.0)
    }

    fn faults(&self) -> ChainFaults {
        self.faults
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn take_submit_failure(&self) -> bool {
        let Ok(mut guard) = self.faults.lock() else {
            return false;
        };
        if guard.fail_submits > 0 {
            guard.fail_submits -= 1;
            true
        } else {
            false
        }
    }

    fn registered_at(&self, key: &FinalityKey) -> Option<Instant> {
        match key {
            FinalityKey::Transaction(tx) => self.transactions.get(tx).map(|entry| entry.1),
            FinalityKey::Root(root) => Some(*self.roots.entry(*root).or_insert_with(Instant::now)),
        }
    }
}

#[async_trait]
impl ChainClient for MemoryChain {
    async fn submit_root(&self, root: &RootHash) -> Result<TxHash, ServiceError> {
        if self.faults().reject_submits {
            return Err(ServiceError::rejected("root registration reverted"));
        }
        if self.take_submit_failure() {
            return Err(ServiceError::unavailable("injected submit failure"));
        }

        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let mut hasher = blake3::Hasher::new();
        hasher.update(root.as_bytes());
        hasher.update(&nonce.to_le_bytes());
        let tx = TxHash::from_bytes(*hasher.finalize().as_bytes());

        let now = Instant::now();
        self.transactions.insert(tx, (*root, now));
        self.roots.entry(*root).or_insert(now);

        tracing::trace!("Registered {} in {}", root.short(), tx);
        Ok(tx)
    }

    async fn wait_finalized(
        &self,
        key: &FinalityKey,
        deadline: Instant,
    ) -> Result<bool, ServiceError> {
        let faults = self.faults();
        if faults.reject_finality {
            return Err(ServiceError::rejected("registration dropped"));
        }
        if faults.never_finalize {
            tokio::time::sleep_until(deadline).await;
            return Ok(false);
        }

        let registered = self.registered_at(key).ok_or(ServiceError::NotFound)?;
        let final_at = registered + self.finality_delay;

        if final_at <= Instant::now() {
            Ok(true)
        } else if final_at <= deadline {
            tokio::time::sleep_until(final_at).await;
            Ok(true)
        } else {
            tokio::time::sleep_until(deadline).await;
            Ok(false)
        }
    }
}
