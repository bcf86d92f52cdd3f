//! Download and reassembly
//!
//! Up to `task_size` fragments are fetched (and verified) concurrently, but
//! results are consumed in root-list order, so the output is always written
//! sequentially. Bytes go to `<output>.part`; the output path appears only
//! after every fragment has been written.

use crate::context::TransferContext;
use crate::directory::NodeDirectory;
use crate::error::{Error, Result};
use crate::options::DownloadOptions;
use crate::progress::{EventSender, TransferEvent, emit};
use crate::retry::{RetryError, with_retry};
use bytes::Bytes;
use fragnet_files::{FragmentWriter, RootHash, fragment_root};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::pin::pin;
use std::sync::Arc;

/// Fetches fragments by root and reassembles them into a file
pub struct Downloader {
    directory: Arc<dyn NodeDirectory>,
    options: DownloadOptions,
    events: Option<EventSender>,
}

impl Downloader {
    /// Create a downloader
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `options` fail validation.
    pub fn new(directory: Arc<dyn NodeDirectory>, options: DownloadOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            directory,
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

    /// Download `roots` in order into `output`
    ///
    /// With `verify`, every fragment is re-hashed and must match its root.
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] for an empty root list
    /// - [`Error::FragmentUnavailable`] if a fragment cannot be fetched
    /// - [`Error::Integrity`] if a verified fragment does not match its root
    /// - [`Error::Io`] if the output cannot be written
    /// - [`Error::Cancelled`] / [`Error::DeadlineExceeded`] from `ctx`
    ///
    /// On any error the output path is left untouched.
    pub async fn download(
        &self,
        ctx: &TransferContext,
        roots: &[RootHash],
        output: impl AsRef<Path>,
        verify: bool,
    ) -> Result<u64> {
        if roots.is_empty() {
            return Err(Error::invalid_config("root list is empty"));
        }
        ctx.check()?;

        let output = output.as_ref();
        tracing::info!(
            "Downloading {} fragment(s) to {} (verify: {})",
            roots.len(),
            output.display(),
            verify
        );
        emit(
            self.events.as_ref(),
            TransferEvent::DownloadStarted {
                fragments: roots.len(),
            },
        );

        let mut writer = FragmentWriter::create(output).await?;
        match self.fetch_all(ctx, roots, verify, &mut writer).await {
            Ok(()) => {
                let written = writer.bytes_written();
                writer.commit().await?;
                tracing::info!("Download complete: {} bytes", written);
                Ok(written)
            }
            Err(err) => {
                if let Err(cleanup) = writer.abort().await {
                    tracing::warn!("Failed to remove partial output: {}", cleanup);
                }
                tracing::warn!("Download aborted: {}", err);
                Err(err)
            }
        }
    }

    async fn fetch_all(
        &self,
        ctx: &TransferContext,
        roots: &[RootHash],
        verify: bool,
        writer: &mut FragmentWriter,
    ) -> Result<()> {
        let mut fetched = pin!(
            stream::iter(roots.iter().copied().enumerate())
                .map(|(index, root)| self.fetch_fragment(ctx, index, root, verify))
                .buffered(self.options.task_size)
        );

        while let Some(next) = ctx.run(fetched.next()).await? {
            let (index, data) = next?;
            writer.write_fragment(index, &data).await?;
            emit(
                self.events.as_ref(),
                TransferEvent::FragmentFetched {
                    index,
                    bytes: data.len() as u64,
                },
            );
        }
        Ok(())
    }

    /// Fetch one fragment, retrying transient failures
    async fn fetch_fragment(
        &self,
        ctx: &TransferContext,
        index: usize,
        root: RootHash,
        verify: bool,
    ) -> Result<(usize, Bytes)> {
        let data = with_retry(ctx, &self.options.retry, |_| {
            self.directory.fetch_fragment(&root)
        })
        .await
        .map_err(|err| match err {
            RetryError::Aborted(err) => err,
            RetryError::Service { attempts, error } => {
                tracing::debug!(
                    "Fragment {} ({}) unavailable after {} attempt(s): {}",
                    index,
                    root.short(),
                    attempts,
                    error
                );
                Error::FragmentUnavailable {
                    fragment: index,
                    root,
                }
            }
        })?;

        if verify {
            let hashed = data.clone();
            let actual = ctx
                .run(tokio::task::spawn_blocking(move || fragment_root(&hashed)))
                .await??;
            if actual != root {
                return Err(Error::Integrity {
                    fragment: index,
                    expected: root,
                    actual,
                });
            }
        }

        tracing::trace!("Fragment {} fetched ({} bytes)", index, data.len());
        Ok((index, data))
    }
}
