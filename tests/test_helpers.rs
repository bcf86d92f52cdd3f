//! Test helpers for devnet-backed transfers
//!
//! Builds in-memory networks and orchestrators with short poll intervals and
//! immediate retries, plus CI-aware timing bounds.

use fragnet_core::devnet::{MemoryChain, MemoryNetwork};
use fragnet_core::{DownloadOptions, Downloader, RetryConfig, UploadOptions, Uploader};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

/// Deterministic pseudo-random bytes
pub fn random_data(len: usize, seed: u64) -> Vec<u8> {
    let mut data = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    data
}

/// In-memory network of `trusted` and `untrusted` nodes with an instant chain
pub struct Devnet {
    /// Node directory and storage
    pub network: Arc<MemoryNetwork>,
    /// Chain
    pub chain: Arc<MemoryChain>,
}

impl Devnet {
    /// Network with `trusted` trusted nodes and `untrusted` untrusted ones
    pub fn new(trusted: usize, untrusted: usize) -> Self {
        Self::with_finality_delay(trusted, untrusted, Duration::ZERO)
    }

    /// Network whose chain finalizes after `delay`
    pub fn with_finality_delay(trusted: usize, untrusted: usize, delay: Duration) -> Self {
        Self {
            network: MemoryNetwork::new(trusted, untrusted),
            chain: MemoryChain::new(delay),
        }
    }

    /// Uploader over this network
    ///
    /// # Panics
    ///
    /// Panics if `options` are invalid.
    pub fn uploader(&self, options: UploadOptions) -> Uploader {
        Uploader::new(
            self.network.clone(),
            self.network.clone(),
            self.chain.clone(),
            options,
        )
        .expect("valid upload options")
    }

    /// Downloader over this network
    ///
    /// # Panics
    ///
    /// Panics if `options` are invalid.
    pub fn downloader(&self, options: DownloadOptions) -> Downloader {
        Downloader::new(self.network.clone(), options).expect("valid download options")
    }
}

/// Upload options with immediate retries and a 5ms finality poll
pub fn fast_upload_options() -> UploadOptions {
    UploadOptions {
        retry: RetryConfig::immediate(3),
        finality_poll_interval: Duration::from_millis(5),
        ..Default::default()
    }
}

/// Download options with immediate retries
pub fn fast_download_options() -> DownloadOptions {
    DownloadOptions {
        retry: RetryConfig::immediate(3),
        ..Default::default()
    }
}

/// Check if running in a CI environment
///
/// Checks common CI environment variables.
pub fn is_ci_environment() -> bool {
    std::env::var("CI").is_ok()
        || std::env::var("GITHUB_ACTIONS").is_ok()
        || std::env::var("GITLAB_CI").is_ok()
}

/// Get CI-adjusted upper bound for a timing assertion
///
/// Returns a bound that's longer in CI environments to account for
/// resource contention and slower machines.
pub fn ci_timeout(base_timeout: Duration) -> Duration {
    if is_ci_environment() {
        base_timeout.mul_f32(3.0)
    } else {
        base_timeout.mul_f32(1.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_data_is_deterministic() {
        assert_eq!(random_data(1000, 7), random_data(1000, 7));
        assert_ne!(random_data(1000, 7), random_data(1000, 8));
        assert!(random_data(0, 1).is_empty());
    }

    #[test]
    fn test_ci_timeout() {
        let base = Duration::from_secs(10);
        let adjusted = ci_timeout(base);

        if is_ci_environment() {
            assert_eq!(adjusted, Duration::from_secs(30));
        } else {
            assert_eq!(adjusted, Duration::from_secs(15));
        }
    }

    #[test]
    fn test_devnet_nodes() {
        let devnet = Devnet::new(3, 2);
        assert_eq!(devnet.network.nodes().len(), 5);
        assert_eq!(devnet.chain.submissions(), 0);
    }
}
