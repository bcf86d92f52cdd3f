//! # fragnet Core
//!
//! Upload and download orchestration for replicated, chain-registered
//! storage networks.
//!
//! This crate provides:
//! - Replica set selection over a [`NodeDirectory`]
//! - Bounded-concurrency fragment upload with per-fragment retry
//! - Finality tracking against a [`ChainClient`]
//! - Ordered, verified, all-or-nothing download
//! - Local devnets for development and tests (`devnet` feature)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Uploader / Downloader                         │
//! │   (fragment pipeline, cancellation, ordering, reassembly)       │
//! ├──────────────────────┬──────────────────────┬───────────────────┤
//! │    NodeSelector      │   FinalityTracker    │   with_retry      │
//! │  (replica sets)      │  (state machine)     │  (backoff)        │
//! ├──────────────────────┴──────────────────────┴───────────────────┤
//! │        NodeDirectory · StorageClient · ChainClient              │
//! │   (capabilities supplied by the caller, or by the devnet)       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use fragnet_core::devnet::{MemoryChain, MemoryNetwork};
//! use fragnet_core::{Downloader, DownloadOptions, TransferContext, UploadOptions, Uploader};
//! use fragnet_files::MemorySource;
//! use std::time::Duration;
//!
//! # async fn run() -> fragnet_core::Result<()> {
//! let network = MemoryNetwork::new(4, 0);
//! let chain = MemoryChain::new(Duration::ZERO);
//! let options = UploadOptions::default();
//! let uploader = Uploader::new(network.clone(), network.clone(), chain, options)?;
//!
//! let ctx = TransferContext::with_timeout(Duration::from_secs(30));
//! let result = uploader
//!     .upload(&ctx, MemorySource::new(vec![7u8; 1 << 20]), 256 * 1024)
//!     .await?;
//!
//! let downloader = Downloader::new(network, DownloadOptions::default())?;
//! downloader
//!     .download(&ctx, &result.root_hashes(), "out.bin", true)
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chain;
pub mod context;
pub mod directory;
pub mod download;
pub mod error;
pub mod finality;
pub mod manifest;
pub mod options;
pub mod progress;
pub mod retry;
pub mod selector;
pub mod upload;

#[cfg(feature = "devnet")]
pub mod devnet;

pub use chain::{ChainClient, FinalityKey, TxHash};
pub use context::TransferContext;
pub use directory::{NodeDirectory, NodeEndpoint, NodeId, SelectionRequest, StorageClient};
pub use download::Downloader;
pub use error::{Error, Result, ServiceError};
pub use finality::{FinalityState, FinalityTracker, FragmentFinality};
pub use manifest::{FragmentReceipt, UploadResult, parse_root_list, parse_roots};
pub use options::{
    DownloadOptions, FinalityRequirement, NodeAffinity, SelectionMethod, UploadOptions,
};
pub use progress::{EventReceiver, EventSender, TransferEvent, TransferProgress};
pub use retry::{RetryConfig, RetryError, with_retry};
pub use selector::NodeSelector;
pub use upload::Uploader;
