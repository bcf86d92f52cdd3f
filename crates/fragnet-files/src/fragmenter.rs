//! File fragmenting.
//!
//! A file is cut into fixed-size, contiguous, non-overlapping fragments whose
//! in-order concatenation is the original file. Only the last fragment may
//! be shorter than the fragment size. Every file, including an empty one,
//! has at least one fragment.

use crate::SEGMENT_SIZE;
use crate::error::{FilesError, Result};
use crate::hash::RootHash;
use crate::source::FileSource;
use crate::tree_hash::fragment_root;
use bytes::Bytes;
use tokio::io::AsyncReadExt;

/// Number of segments covering `len` bytes (minimum 1)
#[must_use]
pub fn num_segments(len: u64) -> u64 {
    len.div_ceil(SEGMENT_SIZE as u64).max(1)
}

/// Position of one fragment within a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentDescriptor {
    /// Ordinal index (0-based)
    pub index: usize,
    /// Byte offset within the file
    pub offset: u64,
    /// Length in bytes
    pub len: u64,
    /// Segments covering this fragment
    pub num_segments: u64,
}

/// Cut files into fixed-size fragments
#[derive(Debug, Clone, Copy)]
pub struct Fragmenter {
    fragment_size: u64,
}

impl Fragmenter {
    /// Create a fragmenter
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::ZeroFragmentSize`] if `fragment_size` is zero.
    pub fn new(fragment_size: u64) -> Result<Self> {
        if fragment_size == 0 {
            return Err(FilesError::ZeroFragmentSize);
        }
        Ok(Self { fragment_size })
    }

    /// Get fragment size
    #[must_use]
    pub fn fragment_size(&self) -> u64 {
        self.fragment_size
    }

    /// Calculate number of fragments for a file, `max(1, ceil(len / size))`
    #[must_use]
    pub fn fragment_count(&self, file_size: u64) -> u64 {
        file_size.div_ceil(self.fragment_size).max(1)
    }

    /// Plan the fragments of a file of `file_size` bytes
    #[must_use]
    pub fn plan(&self, file_size: u64) -> Vec<FragmentDescriptor> {
        let count = self.fragment_count(file_size);
        (0..count)
            .map(|i| {
                let offset = i * self.fragment_size;
                let len = (file_size - offset).min(self.fragment_size);
                FragmentDescriptor {
                    index: i as usize,
                    offset,
                    len,
                    num_segments: num_segments(len),
                }
            })
            .collect()
    }
}

/// A fragment's descriptor together with its bytes
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Where the fragment sits in the file
    pub descriptor: FragmentDescriptor,
    /// Fragment bytes
    pub data: Bytes,
}

impl Fragment {
    /// Fragment index
    #[must_use]
    pub fn index(&self) -> usize {
        self.descriptor.index
    }

    /// Compute the fragment's content address
    #[must_use]
    pub fn root(&self) -> RootHash {
        fragment_root(&self.data)
    }
}

/// Reads planned fragments from a source, in order
pub struct FragmentReader<S> {
    source: S,
    plan: std::vec::IntoIter<FragmentDescriptor>,
    total: usize,
}

impl<S: FileSource> FragmentReader<S> {
    /// Plan the source's fragments and prepare to read them
    pub fn new(source: S, fragmenter: &Fragmenter) -> Self {
        let plan = fragmenter.plan(source.size());
        let total = plan.len();
        Self {
            source,
            plan: plan.into_iter(),
            total,
        }
    }

    /// Total number of fragments in the plan
    #[must_use]
    pub fn fragment_count(&self) -> usize {
        self.total
    }

    /// Fragments not yet read
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.plan.len()
    }

    /// Read the next fragment, or `None` once the plan is exhausted
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::Truncated`] if the source ends early, or an I/O
    /// error if reading fails.
    pub async fn next_fragment(&mut self) -> Result<Option<Fragment>> {
        let Some(descriptor) = self.plan.next() else {
            return Ok(None);
        };

        let mut buf = vec![0u8; descriptor.len as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.source.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(FilesError::Truncated {
                    index: descriptor.index,
                    expected: descriptor.len,
                    read: filled as u64,
                });
            }
            filled += n;
        }

        Ok(Some(Fragment {
            descriptor,
            data: Bytes::from(buf),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, ReadBuf};

    #[test]
    fn test_zero_fragment_size_rejected() {
        assert!(matches!(
            Fragmenter::new(0),
            Err(FilesError::ZeroFragmentSize)
        ));
    }

    #[test]
    fn test_fragment_count() {
        let fragmenter = Fragmenter::new(20).unwrap();
        assert_eq!(fragmenter.fragment_count(0), 1);
        assert_eq!(fragmenter.fragment_count(1), 1);
        assert_eq!(fragmenter.fragment_count(20), 1);
        assert_eq!(fragmenter.fragment_count(21), 2);
        assert_eq!(fragmenter.fragment_count(40), 2);
        assert_eq!(fragmenter.fragment_count(45), 3);
    }

    #[test]
    fn test_plan_is_contiguous() {
        let fragmenter = Fragmenter::new(20).unwrap();
        let plan = fragmenter.plan(45);

        assert_eq!(plan.len(), 3);
        assert_eq!(
            plan.iter().map(|d| d.len).collect::<Vec<_>>(),
            vec![20, 20, 5]
        );

        let mut expected_offset = 0;
        for (i, d) in plan.iter().enumerate() {
            assert_eq!(d.index, i);
            assert_eq!(d.offset, expected_offset);
            expected_offset += d.len;
        }
        assert_eq!(expected_offset, 45);
    }

    #[test]
    fn test_plan_empty_file() {
        let fragmenter = Fragmenter::new(1024).unwrap();
        let plan = fragmenter.plan(0);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].len, 0);
        assert_eq!(plan[0].num_segments, 1);
    }

    #[test]
    fn test_plan_small_file_single_fragment() {
        let fragmenter = Fragmenter::new(1024).unwrap();
        let plan = fragmenter.plan(100);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].len, 100);
    }

    #[test]
    fn test_num_segments() {
        let seg = SEGMENT_SIZE as u64;
        assert_eq!(num_segments(0), 1);
        assert_eq!(num_segments(1), 1);
        assert_eq!(num_segments(seg), 1);
        assert_eq!(num_segments(seg + 1), 2);
        assert_eq!(num_segments(80 * seg), 80);
    }

    #[tokio::test]
    async fn test_reader_reconstructs_file() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
        let fragmenter = Fragmenter::new(3_000).unwrap();
        let mut reader = FragmentReader::new(MemorySource::new(data.clone()), &fragmenter);
        assert_eq!(reader.fragment_count(), 4);

        let mut rebuilt = Vec::new();
        let mut indices = Vec::new();
        while let Some(fragment) = reader.next_fragment().await.unwrap() {
            indices.push(fragment.index());
            rebuilt.extend_from_slice(&fragment.data);
        }

        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(rebuilt, data);
        assert_eq!(reader.remaining(), 0);
    }

    #[tokio::test]
    async fn test_reader_empty_source_yields_one_fragment() {
        let fragmenter = Fragmenter::new(64).unwrap();
        let mut reader = FragmentReader::new(MemorySource::new(Vec::new()), &fragmenter);

        let fragment = reader.next_fragment().await.unwrap().unwrap();
        assert!(fragment.data.is_empty());
        assert!(reader.next_fragment().await.unwrap().is_none());
    }

    /// Source that claims more bytes than it has
    struct ShortSource {
        inner: MemorySource,
        claimed: u64,
    }

    impl AsyncRead for ShortSource {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl FileSource for ShortSource {
        fn size(&self) -> u64 {
            self.claimed
        }
    }

    #[tokio::test]
    async fn test_reader_truncated_source() {
        let source = ShortSource {
            inner: MemorySource::new(vec![0u8; 150]),
            claimed: 200,
        };
        let fragmenter = Fragmenter::new(100).unwrap();
        let mut reader = FragmentReader::new(source, &fragmenter);

        assert!(reader.next_fragment().await.unwrap().is_some());
        match reader.next_fragment().await {
            Err(FilesError::Truncated {
                index,
                expected,
                read,
            }) => {
                assert_eq!(index, 1);
                assert_eq!(expected, 100);
                assert_eq!(read, 50);
            }
            other => panic!("expected truncation, got {other:?}"),
        }
    }
}
