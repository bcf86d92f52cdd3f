//! Error types for fragnet orchestration
//!
//! Every error that escapes an upload or download names the fragment it came
//! from when one is involved. Per-fragment transient failures are retried
//! locally and only show up here once the retry budget is spent.
//!
//! # Error Categories
//!
//! - **Transient**: the operation may succeed if re-triggered from scratch
//!   (nodes briefly unreachable, finality slow, deadline too tight)
//! - **Permanent**: will not succeed without intervention (bad config,
//!   corrupted data, malformed roots)
//!
//! # Example
//!
//! ```
//! use fragnet_core::{Error, ServiceError};
//!
//! fn describe(err: &Error) -> &'static str {
//!     if err.is_transient() {
//!         "retry later"
//!     } else {
//!         "needs attention"
//!     }
//! }
//!
//! let err = Error::from(ServiceError::unavailable("node offline"));
//! assert_eq!(describe(&err), "retry later");
//! ```

use fragnet_files::{FilesError, RootHash};
use std::borrow::Cow;
use thiserror::Error;

/// Failure reported by an external collaborator (chain, directory, node)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Service could not be reached or is overloaded
    #[error("service unavailable: {0}")]
    Unavailable(Cow<'static, str>),

    /// Request did not complete in time
    #[error("service timed out: {0}")]
    Timeout(Cow<'static, str>),

    /// Request was explicitly refused
    #[error("request rejected: {0}")]
    Rejected(Cow<'static, str>),

    /// Requested content is not hosted (yet)
    #[error("not found")]
    NotFound,
}

impl ServiceError {
    /// Returns true if retrying the same request may succeed
    ///
    /// `NotFound` counts as transient: replication may still be in progress.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, ServiceError::Rejected(_))
    }

    /// Create an unavailable error with static context (zero allocation)
    #[must_use]
    pub const fn unavailable(context: &'static str) -> Self {
        ServiceError::Unavailable(Cow::Borrowed(context))
    }

    /// Create a timeout error with static context (zero allocation)
    #[must_use]
    pub const fn timeout(context: &'static str) -> Self {
        ServiceError::Timeout(Cow::Borrowed(context))
    }

    /// Create a rejection with static context (zero allocation)
    #[must_use]
    pub const fn rejected(context: &'static str) -> Self {
        ServiceError::Rejected(Cow::Borrowed(context))
    }
}

/// Errors that can occur in upload and download operations
#[derive(Debug, Error, Clone)]
pub enum Error {
    // ============ Input/Output ============
    /// Input unreadable or output unwritable
    #[error("File I/O error: {0}")]
    Io(String),

    /// Input failed while reading a fragment
    #[error("Failed to read fragment {fragment}: {reason}")]
    SourceRead {
        /// Fragment index
        fragment: usize,
        /// Underlying failure
        reason: String,
    },

    // ============ Placement ============
    /// Not enough eligible nodes to meet the replica target
    #[error(
        "Insufficient nodes{}: required {required}, available {available}",
        fragment_suffix(.fragment)
    )]
    InsufficientNodes {
        /// Fragment being placed, if selection happened on its behalf
        fragment: Option<usize>,
        /// Replica target
        required: usize,
        /// Eligible nodes found
        available: usize,
    },

    /// Fragment submission exhausted its retries or was rejected
    #[error("Submission of fragment {fragment} failed after {attempts} attempt(s): {reason}")]
    Submission {
        /// Fragment index
        fragment: usize,
        /// Attempts made
        attempts: u32,
        /// Last failure
        reason: String,
    },

    // ============ Finality ============
    /// Deadline elapsed before the finality requirement held
    #[error("Finality timeout for fragment {fragment}")]
    FinalityTimeout {
        /// Fragment index
        fragment: usize,
    },

    // ============ Retrieval ============
    /// Downloaded bytes do not hash to the claimed root
    #[error("Integrity check failed for fragment {fragment}: expected {expected}, got {actual}")]
    Integrity {
        /// Fragment index
        fragment: usize,
        /// Root the caller asked for
        expected: RootHash,
        /// Root of the bytes received
        actual: RootHash,
    },

    /// No node could serve the fragment within the retry budget
    #[error("Fragment {fragment} unavailable: {root}")]
    FragmentUnavailable {
        /// Fragment index
        fragment: usize,
        /// Root that could not be fetched
        root: RootHash,
    },

    // ============ Control ============
    /// Caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Overall deadline elapsed
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// Collaborator failure outside any retry loop
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    // ============ Configuration & State ============
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// Invalid state transition
    #[error("Invalid state: {0}")]
    InvalidState(Cow<'static, str>),

    /// Malformed hash text
    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(Cow<'static, str>),

    /// Task join error
    #[error("Task join error: {0}")]
    TaskJoin(Cow<'static, str>),
}

fn fragment_suffix(fragment: &Option<usize>) -> String {
    fragment
        .map(|index| format!(" for fragment {index}"))
        .unwrap_or_default()
}

impl Error {
    /// Returns true if re-running the whole operation may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Submission { .. }
            | Error::FragmentUnavailable { .. }
            | Error::FinalityTimeout { .. }
            | Error::DeadlineExceeded => true,
            Error::Service(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Returns true if this error will not go away without intervention
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig(_)
                | Error::InvalidState(_)
                | Error::InvalidHash(_)
                | Error::Integrity { .. }
                | Error::Serialization(_)
        )
    }

    /// Fragment this error is attributed to, if any
    #[must_use]
    pub fn fragment(&self) -> Option<usize> {
        match self {
            Error::InsufficientNodes { fragment, .. } => *fragment,
            Error::Submission { fragment, .. }
            | Error::SourceRead { fragment, .. }
            | Error::FinalityTimeout { fragment }
            | Error::Integrity { fragment, .. }
            | Error::FragmentUnavailable { fragment, .. } => Some(*fragment),
            _ => None,
        }
    }

    /// Attribute an unattributed selection or input failure to a fragment
    #[must_use]
    pub fn with_fragment(self, index: usize) -> Self {
        match self {
            Error::Io(reason) => Error::SourceRead {
                fragment: index,
                reason,
            },
            Error::InsufficientNodes {
                fragment: None,
                required,
                available,
            } => Error::InsufficientNodes {
                fragment: Some(index),
                required,
                available,
            },
            other => other,
        }
    }

    /// Create an invalid configuration error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_config(context: &'static str) -> Self {
        Error::InvalidConfig(Cow::Borrowed(context))
    }

    /// Create an invalid state error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_state(context: &'static str) -> Self {
        Error::InvalidState(Cow::Borrowed(context))
    }
}

impl From<FilesError> for Error {
    fn from(err: FilesError) -> Self {
        match err {
            FilesError::ZeroFragmentSize => Error::invalid_config("fragment size must be > 0"),
            FilesError::OutOfOrder { .. } => Error::InvalidState(Cow::Owned(err.to_string())),
            FilesError::InvalidHash(msg) => Error::InvalidHash(msg),
            FilesError::Truncated { index, .. } => Error::SourceRead {
                fragment: index,
                reason: err.to_string(),
            },
            FilesError::Io(_) => Error::Io(err.to_string()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(Cow::Owned(err.to_string()))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::TaskJoin(Cow::Owned(err.to_string()))
    }
}

/// Result type for fragnet operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_error_transience() {
        assert!(ServiceError::unavailable("down").is_transient());
        assert!(ServiceError::timeout("slow").is_transient());
        assert!(ServiceError::NotFound.is_transient());
        assert!(!ServiceError::rejected("bad root").is_transient());
    }

    #[test]
    fn test_transient_errors() {
        let root = RootHash::from_bytes([1u8; 32]);
        assert!(
            Error::Submission {
                fragment: 0,
                attempts: 4,
                reason: "x".into()
            }
            .is_transient()
        );
        assert!(Error::FragmentUnavailable { fragment: 1, root }.is_transient());
        assert!(Error::FinalityTimeout { fragment: 2 }.is_transient());
        assert!(Error::DeadlineExceeded.is_transient());
        assert!(Error::Service(ServiceError::NotFound).is_transient());
        assert!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn test_permanent_errors() {
        let root = RootHash::from_bytes([1u8; 32]);
        assert!(Error::invalid_config("x").is_permanent());
        assert!(Error::invalid_state("x").is_permanent());
        assert!(
            Error::Integrity {
                fragment: 0,
                expected: root,
                actual: root
            }
            .is_permanent()
        );
        assert!(!Error::Cancelled.is_permanent());
    }

    #[test]
    fn test_mutual_exclusivity() {
        let root = RootHash::from_bytes([2u8; 32]);
        let errors = [
            Error::FinalityTimeout { fragment: 0 },
            Error::FragmentUnavailable { fragment: 0, root },
            Error::invalid_config("x"),
            Error::InvalidHash("x".into()),
        ];
        for err in &errors {
            assert!(!(err.is_transient() && err.is_permanent()), "{err}");
        }
    }

    #[test]
    fn test_fragment_attribution() {
        let err = Error::InsufficientNodes {
            fragment: None,
            required: 3,
            available: 1,
        };
        assert_eq!(err.fragment(), None);
        assert!(!err.to_string().contains("fragment"));

        let err = err.with_fragment(7);
        assert_eq!(err.fragment(), Some(7));
        assert!(err.to_string().contains("for fragment 7"));
        assert!(err.to_string().contains("required 3, available 1"));

        assert_eq!(Error::Cancelled.with_fragment(1).fragment(), None);

        let err = Error::Io("disk unplugged".into()).with_fragment(2);
        assert!(matches!(err, Error::SourceRead { fragment: 2, .. }));
        assert!(err.to_string().contains("disk unplugged"));
    }

    #[test]
    fn test_error_display() {
        let expected = RootHash::from_bytes([0xaa; 32]);
        let actual = RootHash::from_bytes([0xbb; 32]);
        let err = Error::Integrity {
            fragment: 4,
            expected,
            actual,
        };
        let msg = err.to_string();
        assert!(msg.contains("fragment 4"));
        assert!(msg.contains(&expected.to_hex()));
        assert!(msg.contains(&actual.to_hex()));
    }

    #[test]
    fn test_files_error_conversion() {
        let err: Error = FilesError::ZeroFragmentSize.into();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let err: Error = FilesError::Truncated {
            index: 1,
            expected: 10,
            read: 3,
        }
        .into();
        assert!(matches!(err, Error::SourceRead { fragment: 1, .. }));
        assert_eq!(err.fragment(), Some(1));

        let err: Error = FilesError::InvalidHash("short".into()).into();
        assert!(matches!(err, Error::InvalidHash(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
