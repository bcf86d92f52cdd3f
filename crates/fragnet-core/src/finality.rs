//! Finality tracking
//!
//! Each registered fragment moves through a small state machine:
//!
//! ```text
//! Submitted ──> AwaitingFinality ──> Finalized
//!     │                │
//!     └──────> Failed <┘
//! ```
//!
//! `Finalized` and `Failed` are terminal. A fragment never regresses.
//!
//! The tracker polls [`ChainClient::wait_finalized`] in bounded windows so
//! that transient chain errors are ridden out, while the operation deadline
//! still bounds the total wait.

use crate::chain::{ChainClient, FinalityKey};
use crate::context::TransferContext;
use crate::error::{Error, Result, ServiceError};
use crate::progress::{EventSender, TransferEvent, emit};
use futures::stream::{self, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Finality state of one fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalityState {
    /// Stored on its replica set (and registered, unless skipped)
    Submitted,
    /// Finality is being waited on
    AwaitingFinality,
    /// Registration is final
    Finalized,
    /// Registration was rejected or finality never came
    Failed,
}

impl FinalityState {
    /// No further transitions possible
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Failed)
    }

    /// Whether `self -> next` is a legal move
    #[must_use]
    pub fn can_transition_to(self, next: FinalityState) -> bool {
        use FinalityState::*;
        matches!(
            (self, next),
            (Submitted, AwaitingFinality)
                | (Submitted, Failed)
                | (AwaitingFinality, Finalized)
                | (AwaitingFinality, Failed)
        )
    }
}

impl fmt::Display for FinalityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted => write!(f, "Submitted"),
            Self::AwaitingFinality => write!(f, "AwaitingFinality"),
            Self::Finalized => write!(f, "Finalized"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Finality record of one fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentFinality {
    /// Fragment index
    pub index: usize,
    /// What finality is checked against
    pub key: FinalityKey,
    state: FinalityState,
}

impl FragmentFinality {
    /// New record in `Submitted`
    #[must_use]
    pub fn new(index: usize, key: FinalityKey) -> Self {
        Self {
            index,
            key,
            state: FinalityState::Submitted,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> FinalityState {
        self.state
    }

    /// Move to `next`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] for an illegal transition.
    pub fn transition(&mut self, next: FinalityState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidState(
                format!(
                    "fragment {}: {} -> {} not allowed",
                    self.index, self.state, next
                )
                .into(),
            ));
        }
        self.state = next;
        Ok(())
    }

    /// Mark as failed unless already terminal
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = FinalityState::Failed;
        }
    }
}

/// Waits for fragment registrations to become final
#[derive(Clone)]
pub struct FinalityTracker {
    chain: Arc<dyn ChainClient>,
    poll_interval: Duration,
    events: Option<EventSender>,
}

impl FinalityTracker {
    /// Create a tracker polling every `poll_interval`
    pub fn new(chain: Arc<dyn ChainClient>, poll_interval: Duration) -> Self {
        Self {
            chain,
            poll_interval,
            events: None,
        }
    }

    /// Report state changes on `events`
    #[must_use]
    pub fn with_events(mut self, events: Option<EventSender>) -> Self {
        self.events = events;
        self
    }

    /// Wait until `record` is finalized
    ///
    /// # Errors
    ///
    /// - [`Error::FinalityTimeout`] when the context deadline passes first
    /// - [`Error::Submission`] when the chain rejects the registration
    /// - [`Error::Cancelled`] when the context is cancelled
    /// - [`Error::InvalidState`] when `record` is already terminal
    pub async fn await_fragment(
        &self,
        ctx: &TransferContext,
        record: &mut FragmentFinality,
    ) -> Result<()> {
        self.set_state(record, FinalityState::AwaitingFinality)?;

        match self.poll_until_final(ctx, record).await {
            Ok(()) => self.set_state(record, FinalityState::Finalized),
            Err(err) => {
                record.fail();
                emit(
                    self.events.as_ref(),
                    TransferEvent::FragmentState {
                        index: record.index,
                        state: FinalityState::Failed,
                    },
                );
                Err(match err {
                    Error::DeadlineExceeded => Error::FinalityTimeout {
                        fragment: record.index,
                    },
                    other => other,
                })
            }
        }
    }

    /// Wait for every record, at most `concurrency` at a time
    ///
    /// Stops at the first failure; records not yet reached stay in their
    /// current state.
    ///
    /// # Errors
    ///
    /// The first error from [`await_fragment`](Self::await_fragment).
    pub async fn await_all(
        &self,
        ctx: &TransferContext,
        records: &mut [FragmentFinality],
        concurrency: usize,
    ) -> Result<()> {
        stream::iter(records.iter_mut().map(Ok))
            .try_for_each_concurrent(concurrency.max(1), |record| async move {
                self.await_fragment(ctx, record).await
            })
            .await
    }

    async fn poll_until_final(
        &self,
        ctx: &TransferContext,
        record: &FragmentFinality,
    ) -> Result<()> {
        loop {
            ctx.check()?;

            let window_end = match ctx.deadline() {
                Some(deadline) => deadline.min(Instant::now() + self.poll_interval),
                None => Instant::now() + self.poll_interval,
            };

            match ctx.run(self.chain.wait_finalized(&record.key, window_end)).await? {
                Ok(true) => {
                    tracing::debug!("Fragment {} finalized ({})", record.index, record.key);
                    return Ok(());
                }
                Ok(false) => {
                    tracing::trace!("Fragment {} not final yet", record.index);
                    let now = Instant::now();
                    if window_end > now {
                        ctx.sleep(window_end - now).await?;
                    }
                }
                Err(ServiceError::Rejected(reason)) => {
                    tracing::warn!(
                        "Finality of fragment {} rejected: {}",
                        record.index,
                        reason
                    );
                    return Err(Error::Submission {
                        fragment: record.index,
                        attempts: 1,
                        reason: format!("finality rejected: {reason}"),
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        "Finality check for fragment {} failed: {}",
                        record.index,
                        err
                    );
                    ctx.sleep(self.poll_interval).await?;
                }
            }
        }
    }

    fn set_state(&self, record: &mut FragmentFinality, state: FinalityState) -> Result<()> {
        record.transition(state)?;
        emit(
            self.events.as_ref(),
            TransferEvent::FragmentState {
                index: record.index,
                state,
            },
        );
        Ok(())
    }
}
