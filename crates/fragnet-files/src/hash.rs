//! Fixed-width content identifiers.

use crate::error::FilesError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Hash width in bytes
pub const HASH_SIZE: usize = 32;

/// Content address of a fragment.
///
/// A pure function of the fragment bytes: the same bytes always produce the
/// same root, no matter which nodes stored them. The text form is `0x`
/// followed by 64 lowercase hex digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootHash([u8; HASH_SIZE]);

impl RootHash {
    /// Wrap raw hash bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw hash bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// `0x`-prefixed lowercase hex form
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Short form for log lines (first 8 bytes)
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for RootHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for RootHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RootHash({})", self.short())
    }
}

impl FromStr for RootHash {
    type Err = FilesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex32(s).map(Self)
    }
}

impl Serialize for RootHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RootHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse a 32-byte hex identifier, with or without a `0x` prefix.
///
/// # Errors
///
/// Returns [`FilesError::InvalidHash`] if the input is not exactly 64 hex
/// digits after the optional prefix.
pub fn parse_hex32(s: &str) -> Result<[u8; HASH_SIZE], FilesError> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.len() != HASH_SIZE * 2 {
        return Err(FilesError::InvalidHash(format!(
            "expected {} hex digits, got {}",
            HASH_SIZE * 2,
            digits.len()
        )));
    }

    let mut out = [0u8; HASH_SIZE];
    hex::decode_to_slice(digits, &mut out)
        .map_err(|e| FilesError::InvalidHash(format!("{trimmed}: {e}")))?;
    Ok(out)
}
