//! Error types for the file engine.

use std::io;
use thiserror::Error;

/// Errors raised while reading, hashing or reassembling fragments
#[derive(Debug, Error)]
pub enum FilesError {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The source ended before a fragment was fully read
    #[error("fragment {index} truncated: expected {expected} bytes, read {read}")]
    Truncated {
        /// Fragment index
        index: usize,
        /// Planned fragment length
        expected: u64,
        /// Bytes actually available
        read: u64,
    },

    /// Fragment size of zero
    #[error("fragment size must be greater than zero")]
    ZeroFragmentSize,

    /// A fragment was handed to the writer out of order
    #[error("fragment written out of order: expected {expected}, got {got}")]
    OutOfOrder {
        /// Next index the writer accepts
        expected: usize,
        /// Index that was offered
        got: usize,
    },

    /// Malformed hex hash
    #[error("invalid hash: {0}")]
    InvalidHash(String),
}

/// Result type for file engine operations
pub type Result<T> = std::result::Result<T, FilesError>;
