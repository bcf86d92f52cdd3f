//! # fragnet Files
//!
//! File engine for the fragnet storage client.
//!
//! This crate provides:
//! - Fragment planning and sequential fragment reading from a [`FileSource`]
//! - BLAKE3 segment-tree root hashing for content addressing
//! - Ordered, all-or-nothing reassembly of downloaded fragments

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod fragmenter;
pub mod hash;
pub mod source;
pub mod tree_hash;
pub mod writer;

pub use error::{FilesError, Result};
pub use fragmenter::{Fragment, FragmentDescriptor, FragmentReader, Fragmenter, num_segments};
pub use hash::{HASH_SIZE, RootHash, parse_hex32};
pub use source::{FileSource, LocalFile, MemorySource};
pub use tree_hash::{SegmentTree, compute_segment_tree, fragment_root, verify_fragment};
pub use writer::FragmentWriter;

/// Segment size (256 KiB). Segments are the leaves of a fragment's root hash tree.
pub const SEGMENT_SIZE: usize = 256 * 1024;

/// Default fragment size (20 MiB)
pub const DEFAULT_FRAGMENT_SIZE: u64 = 20 * 1024 * 1024;
