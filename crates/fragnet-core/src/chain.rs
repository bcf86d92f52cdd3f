//! Chain client seam
//!
//! The orchestrator only needs two things from the chain: registering a
//! fragment root and learning whether that registration is final.

use crate::error::ServiceError;
use async_trait::async_trait;
use fragnet_files::{FilesError, RootHash, parse_hex32};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use tokio::time::Instant;

/// Hash of a registration transaction
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash([u8; 32]);

impl TxHash {
    /// Wrap raw bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// `0x`-prefixed lowercase hex
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", hex::encode(&self.0[..8]))
    }
}

impl FromStr for TxHash {
    type Err = FilesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex32(s).map(Self)
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// What finality is tracked against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinalityKey {
    /// A registration transaction
    Transaction(TxHash),
    /// A root registered by someone else (or not registered by us)
    Root(RootHash),
}

impl fmt::Display for FinalityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transaction(tx) => write!(f, "tx {tx}"),
            Self::Root(root) => write!(f, "root {root}"),
        }
    }
}

/// Registration and finality backend
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Register a fragment root
    async fn submit_root(&self, root: &RootHash) -> Result<TxHash, ServiceError>;

    /// Wait until `key` is final or `deadline` passes
    ///
    /// Returns `Ok(false)` when the deadline passed without finality.
    async fn wait_finalized(&self, key: &FinalityKey, deadline: Instant)
    -> Result<bool, ServiceError>;
}
