//! Upload orchestration
//!
//! ```text
//!  source ──> FragmentReader ──> [permit] ──> fragment task ──┐
//!                 (in order)      task_size     root          │
//!                                               replicate     ├──> receipts[index]
//!                                               register      │
//!                                               finality      │
//!                                                  ...  ──────┘
//! ```
//!
//! Fragments are read sequentially on the orchestrating task, so at most
//! `task_size` fragment buffers are alive at once. Each fragment task owns
//! its semaphore permit; the first fatal error cancels the shared child
//! context and the remaining tasks stop at their next suspension point.
//! Receipts are written into slots by fragment index, so completion order
//! never affects the result.

use crate::chain::{ChainClient, FinalityKey, TxHash};
use crate::context::TransferContext;
use crate::directory::{NodeDirectory, NodeEndpoint, NodeId, StorageClient};
use crate::error::{Error, Result};
use crate::finality::{FinalityState, FinalityTracker, FragmentFinality};
use crate::manifest::{FragmentReceipt, UploadResult};
use crate::options::{FinalityRequirement, NodeAffinity, UploadOptions};
use crate::progress::{EventSender, TransferEvent, emit};
use crate::retry::{RetryError, with_retry};
use crate::selector::NodeSelector;
use bytes::Bytes;
use fragnet_files::{FileSource, Fragment, FragmentReader, Fragmenter, RootHash, num_segments};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};

/// Uploads files as replicated, registered fragments
pub struct Uploader {
    selector: NodeSelector,
    storage: Arc<dyn StorageClient>,
    chain: Arc<dyn ChainClient>,
    options: UploadOptions,
    events: Option<EventSender>,
}

impl Uploader {
    /// Create an uploader
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `options` fail validation.
    pub fn new(
        directory: Arc<dyn NodeDirectory>,
        storage: Arc<dyn StorageClient>,
        chain: Arc<dyn ChainClient>,
        options: UploadOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            selector: NodeSelector::new(directory),
            storage,
            chain,
            options,
            events: None,
        })
    }

    /// Report progress on `events`
    #[must_use]
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Options in effect
    #[must_use]
    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Upload `source` in fragments of `fragment_size` bytes
    ///
    /// Returns one receipt per fragment in index order once every fragment
    /// satisfies the configured finality requirement.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] for a zero `fragment_size`
    /// - [`Error::SourceRead`] if the source cannot be read
    /// - [`Error::InsufficientNodes`] if a replica set cannot be formed
    /// - [`Error::Submission`] if a fragment exhausts its retries
    /// - [`Error::FinalityTimeout`] if the deadline passes while waiting
    /// - [`Error::Cancelled`] / [`Error::DeadlineExceeded`] from `ctx`
    pub async fn upload<S: FileSource>(
        &self,
        ctx: &TransferContext,
        source: S,
        fragment_size: u64,
    ) -> Result<UploadResult> {
        let fragmenter = Fragmenter::new(fragment_size)?;
        ctx.check()?;

        let file_size = source.size();
        let file_segments = source.num_segments();
        let mut reader = FragmentReader::new(source, &fragmenter);
        let count = reader.fragment_count();

        tracing::info!(
            "Uploading {} bytes as {} fragment(s) of up to {} bytes (replica {}, finality {})",
            file_size,
            count,
            fragment_size,
            self.options.expected_replica,
            self.options.finality_required
        );
        emit(
            self.events.as_ref(),
            TransferEvent::UploadStarted {
                fragments: count,
                bytes: file_size,
            },
        );

        let scope = ctx.child();
        let pinned = match self.options.node_affinity {
            NodeAffinity::Pinned => Some(
                self.selector
                    .select_nodes(
                        &scope,
                        file_segments,
                        self.options.expected_replica,
                        &self.options.excluded_nodes,
                        self.options.method,
                        self.options.full_trusted,
                    )
                    .await?,
            ),
            NodeAffinity::PerFragment => None,
        };

        let pipeline = Arc::new(Pipeline {
            ctx: scope.clone(),
            selector: self.selector.clone(),
            storage: Arc::clone(&self.storage),
            chain: Arc::clone(&self.chain),
            tracker: FinalityTracker::new(
                Arc::clone(&self.chain),
                self.options.finality_poll_interval,
            )
            .with_events(self.events.clone()),
            options: self.options.clone(),
            pinned,
            events: self.events.clone(),
        });

        let mut collector = Collector::new(count);
        let mut tasks = JoinSet::new();

        let outcome = run_pipeline(&pipeline, &mut reader, &mut tasks, &mut collector).await;
        if let Err(err) = outcome {
            scope.cancel();
            tasks.shutdown().await;
            tracing::warn!("Upload aborted: {}", err);
            return Err(err);
        }

        if self.options.finality_required == FinalityRequirement::FileFinalized {
            let mut pending = std::mem::take(&mut collector.pending);
            pending.sort_by_key(|record| record.index);
            tracing::debug!("Waiting for finality of {} fragment(s)", pending.len());

            if let Err(err) = pipeline
                .tracker
                .await_all(&scope, &mut pending, self.options.task_size)
                .await
            {
                scope.cancel();
                tracing::warn!("Upload aborted: {}", err);
                return Err(err);
            }
        }

        let result = collector.finish()?;
        tracing::info!(
            "Upload complete: {} fragment(s), {} bytes",
            result.len(),
            result.total_size()
        );
        Ok(result)
    }
}

async fn run_pipeline<S: FileSource>(
    pipeline: &Arc<Pipeline>,
    reader: &mut FragmentReader<S>,
    tasks: &mut JoinSet<Result<FragmentOutcome>>,
    collector: &mut Collector,
) -> Result<()> {
    let semaphore = Arc::new(Semaphore::new(pipeline.options.task_size));
    let ctx = &pipeline.ctx;

    loop {
        let permit = tokio::select! {
            biased;
            Some(joined) = tasks.join_next() => {
                collector.accept(joined)?;
                continue;
            }
            permit = ctx.run(Arc::clone(&semaphore).acquire_owned()) => {
                permit?.map_err(|_| Error::invalid_state("fragment semaphore closed"))?
            }
        };

        let next = reader.fragment_count() - reader.remaining();
        let Some(fragment) = ctx
            .run(reader.next_fragment())
            .await?
            .map_err(|err| Error::from(err).with_fragment(next))?
        else {
            break;
        };

        tracing::trace!(
            "Dispatching fragment {} ({} bytes)",
            fragment.index(),
            fragment.data.len()
        );
        tasks.spawn(Arc::clone(pipeline).process(fragment, permit));
    }

    while let Some(joined) = ctx.run(tasks.join_next()).await? {
        collector.accept(joined)?;
    }
    Ok(())
}

/// What a finished fragment task hands back
struct FragmentOutcome {
    receipt: FragmentReceipt,
    pending: Option<FragmentFinality>,
}

/// Index-addressed result slots
struct Collector {
    receipts: Vec<Option<FragmentReceipt>>,
    pending: Vec<FragmentFinality>,
}

impl Collector {
    fn new(count: usize) -> Self {
        Self {
            receipts: vec![None; count],
            pending: Vec::new(),
        }
    }

    fn accept(
        &mut self,
        joined: std::result::Result<Result<FragmentOutcome>, JoinError>,
    ) -> Result<()> {
        let outcome = joined??;
        let index = outcome.receipt.index;
        let slot = self
            .receipts
            .get_mut(index)
            .ok_or_else(|| Error::invalid_state("fragment index out of range"))?;
        *slot = Some(outcome.receipt);
        self.pending.extend(outcome.pending);
        Ok(())
    }

    fn finish(self) -> Result<UploadResult> {
        let fragments = self
            .receipts
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::invalid_state("fragment finished without a receipt"))?;
        Ok(UploadResult { fragments })
    }
}

/// State shared by all fragment tasks of one upload
struct Pipeline {
    ctx: TransferContext,
    selector: NodeSelector,
    storage: Arc<dyn StorageClient>,
    chain: Arc<dyn ChainClient>,
    tracker: FinalityTracker,
    options: UploadOptions,
    pinned: Option<Vec<NodeEndpoint>>,
    events: Option<EventSender>,
}

impl Pipeline {
    async fn process(
        self: Arc<Self>,
        fragment: Fragment,
        _permit: OwnedSemaphorePermit,
    ) -> Result<FragmentOutcome> {
        let index = fragment.index();
        let data = fragment.data;
        let size = data.len() as u64;

        let hashed = data.clone();
        let root = self
            .ctx
            .run(tokio::task::spawn_blocking(move || {
                fragnet_files::fragment_root(&hashed)
            }))
            .await??;

        let holders = self.replicate(index, &root, &data).await?;
        drop(data);

        tracing::debug!(
            "Fragment {} ({}) stored on {} node(s)",
            index,
            root.short(),
            holders.len()
        );
        emit(
            self.events.as_ref(),
            TransferEvent::FragmentStored {
                index,
                root,
                replicas: holders.len(),
                bytes: size,
            },
        );

        let tx_hash = if self.options.skip_tx {
            None
        } else {
            Some(self.register(index, &root).await?)
        };

        let key = tx_hash.map_or(FinalityKey::Root(root), FinalityKey::Transaction);
        let mut record = FragmentFinality::new(index, key);
        emit(
            self.events.as_ref(),
            TransferEvent::FragmentState {
                index,
                state: FinalityState::Submitted,
            },
        );

        let pending = match self.options.finality_required {
            FinalityRequirement::None => None,
            FinalityRequirement::FragmentFinalized => {
                self.tracker.await_fragment(&self.ctx, &mut record).await?;
                None
            }
            FinalityRequirement::FileFinalized => Some(record),
        };

        Ok(FragmentOutcome {
            receipt: FragmentReceipt {
                index,
                root,
                tx_hash,
                size,
            },
            pending,
        })
    }

    /// Store the fragment until `expected_replica` distinct nodes hold it
    async fn replicate(
        &self,
        index: usize,
        root: &RootHash,
        data: &Bytes,
    ) -> Result<Vec<NodeEndpoint>> {
        let replica = self.options.expected_replica;
        let retry = &self.options.retry;
        let max_attempts = retry.max_attempts();
        let segments = num_segments(data.len() as u64);

        let mut holders: Vec<NodeEndpoint> = Vec::with_capacity(replica);
        let mut failed: HashSet<NodeId> = HashSet::new();
        let mut rejected: HashSet<NodeId> = HashSet::new();
        let mut last_error: Option<String> = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                self.ctx.sleep(retry.backoff_duration(attempt - 1)).await?;
            }

            let needed = replica - holders.len();
            let targets = match self
                .targets(attempt, segments, needed, &holders, &failed, &rejected)
                .await
            {
                Ok(targets) => targets,
                Err(Error::Service(err)) if err.is_transient() => {
                    tracing::debug!("Node selection for fragment {} failed: {}", index, err);
                    last_error = Some(err.to_string());
                    continue;
                }
                Err(Error::InsufficientNodes { available, .. }) => {
                    let shortfall = Error::InsufficientNodes {
                        fragment: None,
                        required: replica,
                        available: available + holders.len(),
                    };
                    return Err(shortfall.with_fragment(index));
                }
                Err(Error::Service(err)) => {
                    return Err(Error::Submission {
                        fragment: index,
                        attempts: attempt + 1,
                        reason: format!("node selection failed: {err}"),
                    });
                }
                Err(err) => return Err(err.with_fragment(index)),
            };

            let stores = targets.iter().map(|node| async move {
                let stored = self
                    .ctx
                    .run(self.storage.store_fragment(node, root, data.clone()))
                    .await;
                (node, stored)
            });

            for (node, stored) in join_all(stores).await {
                match stored? {
                    Ok(()) => {
                        failed.remove(&node.id);
                        holders.push(node.clone());
                    }
                    Err(err) => {
                        tracing::debug!(
                            "Fragment {} store on {} failed (attempt {}): {}",
                            index,
                            node.id,
                            attempt + 1,
                            err
                        );
                        if err.is_transient() {
                            failed.insert(node.id.clone());
                        } else {
                            rejected.insert(node.id.clone());
                        }
                        last_error = Some(format!("{}: {err}", node.id));
                    }
                }
            }

            if holders.len() >= replica {
                return Ok(holders);
            }
        }

        Err(Error::Submission {
            fragment: index,
            attempts: max_attempts,
            reason: format!(
                "{} of {} replica(s) stored; last error: {}",
                holders.len(),
                replica,
                last_error.as_deref().unwrap_or("none")
            ),
        })
    }

    /// Nodes to push to on this attempt
    ///
    /// Nodes that already hold the fragment are never chosen again. Nodes that
    /// failed transiently are avoided while alternatives exist; nodes that
    /// rejected the fragment are avoided for good.
    async fn targets(
        &self,
        attempt: u32,
        segments: u64,
        needed: usize,
        holders: &[NodeEndpoint],
        failed: &HashSet<NodeId>,
        rejected: &HashSet<NodeId>,
    ) -> Result<Vec<NodeEndpoint>> {
        if attempt == 0 {
            if let Some(pinned) = &self.pinned {
                return Ok(pinned.clone());
            }
        }

        let mut excluded = self.options.excluded_nodes.clone();
        excluded.extend(holders.iter().map(|n| n.id.clone()));
        excluded.extend(rejected.iter().cloned());

        let mut avoiding = excluded.clone();
        avoiding.extend(failed.iter().cloned());

        let select = |excluded: HashSet<NodeId>| async move {
            self.selector
                .select_nodes(
                    &self.ctx,
                    segments,
                    needed,
                    &excluded,
                    self.options.method,
                    self.options.full_trusted,
                )
                .await
        };

        match select(avoiding).await {
            Err(Error::InsufficientNodes { .. }) if !failed.is_empty() => select(excluded).await,
            other => other,
        }
    }

    async fn register(&self, index: usize, root: &RootHash) -> Result<TxHash> {
        let tx_hash = with_retry(&self.ctx, &self.options.retry, |_| {
            self.chain.submit_root(root)
        })
        .await
        .map_err(|err| match err {
            RetryError::Aborted(err) => err,
            RetryError::Service { attempts, error } => Error::Submission {
                fragment: index,
                attempts,
                reason: format!("root registration failed: {error}"),
            },
        })?;

        tracing::debug!("Fragment {} registered in {}", index, tx_hash);
        Ok(tx_hash)
    }
}
