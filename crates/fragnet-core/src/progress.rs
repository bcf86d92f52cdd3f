//! Transfer progress events
//!
//! Orchestrators report what happened over an unbounded channel; consumers
//! (the CLI progress bar, tests) fold events into a [`TransferProgress`].
//! Sending never blocks and a dropped receiver is ignored.

use crate::finality::FinalityState;
use fragnet_files::RootHash;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Something observable happened during a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// Upload planned
    UploadStarted {
        /// Fragment count
        fragments: usize,
        /// File size
        bytes: u64,
    },
    /// Fragment reached its replica target
    FragmentStored {
        /// Fragment index
        index: usize,
        /// Fragment root
        root: RootHash,
        /// Replicas holding it
        replicas: usize,
        /// Fragment size
        bytes: u64,
    },
    /// Fragment finality state changed
    FragmentState {
        /// Fragment index
        index: usize,
        /// New state
        state: FinalityState,
    },
    /// Download planned
    DownloadStarted {
        /// Fragment count
        fragments: usize,
    },
    /// Fragment fetched (and verified, if requested) and written
    FragmentFetched {
        /// Fragment index
        index: usize,
        /// Fragment size
        bytes: u64,
    },
}

/// Event channel sender
pub type EventSender = mpsc::UnboundedSender<TransferEvent>;

/// Event channel receiver
pub type EventReceiver = mpsc::UnboundedReceiver<TransferEvent>;

/// Create an event channel
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

pub(crate) fn emit(events: Option<&EventSender>, event: TransferEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

/// Aggregated view of a transfer
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Bytes stored or fetched so far
    pub bytes_done: u64,

    /// Total bytes, when known
    pub bytes_total: u64,

    /// Fragments stored or fetched
    pub fragments_done: usize,

    /// Total fragments
    pub fragments_total: usize,

    /// Fragments whose registration is final
    pub fragments_finalized: usize,

    started: Instant,
}

impl Default for TransferProgress {
    fn default() -> Self {
        Self {
            bytes_done: 0,
            bytes_total: 0,
            fragments_done: 0,
            fragments_total: 0,
            fragments_finalized: 0,
            started: Instant::now(),
        }
    }
}

impl TransferProgress {
    /// Empty progress starting now
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event
    pub fn apply(&mut self, event: &TransferEvent) {
        match event {
            TransferEvent::UploadStarted { fragments, bytes } => {
                self.fragments_total = *fragments;
                self.bytes_total = *bytes;
            }
            TransferEvent::DownloadStarted { fragments } => {
                self.fragments_total = *fragments;
            }
            TransferEvent::FragmentStored { bytes, .. }
            | TransferEvent::FragmentFetched { bytes, .. } => {
                self.fragments_done += 1;
                self.bytes_done += bytes;
            }
            TransferEvent::FragmentState { state, .. } => {
                if *state == FinalityState::Finalized {
                    self.fragments_finalized += 1;
                }
            }
        }
    }

    /// Progress percentage (0.0 to 100.0), by fragments
    pub fn percent(&self) -> f64 {
        if self.fragments_total == 0 {
            0.0
        } else {
            (self.fragments_done as f64 / self.fragments_total as f64) * 100.0
        }
    }

    /// Average throughput since creation
    pub fn speed_bytes_per_sec(&self) -> f64 {
        let secs = self.started.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.bytes_done as f64 / secs
        } else {
            0.0
        }
    }

    /// Estimated time remaining, when the total is known
    pub fn eta(&self) -> Option<Duration> {
        let speed = self.speed_bytes_per_sec();
        if speed > 0.0 && self.bytes_done < self.bytes_total {
            let remaining = (self.bytes_total - self.bytes_done) as f64;
            Some(Duration::from_secs_f64(remaining / speed))
        } else {
            None
        }
    }

    /// All fragments transferred
    pub fn is_complete(&self) -> bool {
        self.fragments_total > 0 && self.fragments_done >= self.fragments_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_fold() {
        let mut progress = TransferProgress::new();
        let root = RootHash::from_bytes([0u8; 32]);

        progress.apply(&TransferEvent::UploadStarted {
            fragments: 4,
            bytes: 400,
        });
        assert_eq!(progress.percent(), 0.0);
        assert!(!progress.is_complete());

        for index in 0..2 {
            progress.apply(&TransferEvent::FragmentStored {
                index,
                root,
                replicas: 2,
                bytes: 100,
            });
        }
        assert_eq!(progress.fragments_done, 2);
        assert_eq!(progress.bytes_done, 200);
        assert_eq!(progress.percent(), 50.0);

        progress.apply(&TransferEvent::FragmentState {
            index: 0,
            state: FinalityState::AwaitingFinality,
        });
        progress.apply(&TransferEvent::FragmentState {
            index: 0,
            state: FinalityState::Finalized,
        });
        assert_eq!(progress.fragments_finalized, 1);
    }

    #[test]
    fn test_download_progress() {
        let mut progress = TransferProgress::new();
        progress.apply(&TransferEvent::DownloadStarted { fragments: 1 });
        progress.apply(&TransferEvent::FragmentFetched {
            index: 0,
            bytes: 10,
        });
        assert!(progress.is_complete());
        assert_eq!(progress.percent(), 100.0);
        assert!(progress.eta().is_none());
    }

    #[tokio::test]
    async fn test_emit_ignores_closed_channel() {
        let (tx, rx) = channel();
        drop(rx);
        emit(Some(&tx), TransferEvent::DownloadStarted { fragments: 1 });
        emit(None, TransferEvent::DownloadStarted { fragments: 1 });
    }
}
