//! Replica set selection
//!
//! Wraps a [`NodeDirectory`] and turns its ranked candidates into an
//! exact replica set: exclusions are enforced locally (a directory may
//! ignore them), duplicates are dropped, and a short answer is an error
//! rather than a partial placement.

use crate::context::TransferContext;
use crate::directory::{NodeDirectory, NodeEndpoint, NodeId, SelectionRequest};
use crate::error::{Error, Result};
use crate::options::SelectionMethod;
use std::collections::HashSet;
use std::sync::Arc;

/// Chooses replica sets for fragments
#[derive(Clone)]
pub struct NodeSelector {
    directory: Arc<dyn NodeDirectory>,
}

impl NodeSelector {
    /// Create a selector over `directory`
    pub fn new(directory: Arc<dyn NodeDirectory>) -> Self {
        Self { directory }
    }

    /// Underlying directory
    #[must_use]
    pub fn directory(&self) -> &Arc<dyn NodeDirectory> {
        &self.directory
    }

    /// Select exactly `expected_replica` distinct nodes
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if `expected_replica` is zero
    /// - [`Error::InsufficientNodes`] if fewer eligible nodes exist
    /// - [`Error::Service`] if the directory fails
    /// - [`Error::Cancelled`] / [`Error::DeadlineExceeded`] from `ctx`
    pub async fn select_nodes(
        &self,
        ctx: &TransferContext,
        segment_count: u64,
        expected_replica: usize,
        excluded: &HashSet<NodeId>,
        method: SelectionMethod,
        full_trusted: bool,
    ) -> Result<Vec<NodeEndpoint>> {
        if expected_replica == 0 {
            return Err(Error::invalid_config("expected_replica must be > 0"));
        }

        let mut excluded_list: Vec<NodeId> = excluded.iter().cloned().collect();
        excluded_list.sort();

        let request = SelectionRequest {
            segment_count,
            replica: expected_replica,
            excluded: excluded_list,
            method,
            full_trusted,
        };

        let candidates = ctx.run(self.directory.select_nodes(&request)).await??;

        let mut seen = HashSet::new();
        let mut nodes: Vec<NodeEndpoint> = candidates
            .into_iter()
            .filter(|node| !excluded.contains(&node.id))
            .filter(|node| seen.insert(node.id.clone()))
            .collect();

        if nodes.len() < expected_replica {
            tracing::debug!(
                "Directory offered {} eligible node(s), {} required",
                nodes.len(),
                expected_replica
            );
            return Err(Error::InsufficientNodes {
                fragment: None,
                required: expected_replica,
                available: nodes.len(),
            });
        }

        nodes.truncate(expected_replica);

        tracing::trace!(
            "Selected {:?} for {} segment(s) ({})",
            nodes.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(),
            segment_count,
            method
        );

        Ok(nodes)
    }
}
