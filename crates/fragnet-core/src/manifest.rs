//! Upload results and root lists
//!
//! An upload yields one receipt per fragment, in fragment order. The ordered
//! list of roots is all a later download needs; it is persisted either as a
//! plain text root list (one `0x`-hex root per line) or as a JSON manifest
//! that also carries sizes and transaction hashes.

use crate::chain::TxHash;
use crate::error::{Error, Result};
use fragnet_files::RootHash;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// What an upload produced for one fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentReceipt {
    /// Fragment index
    pub index: usize,
    /// Fragment root
    pub root: RootHash,
    /// Registration transaction, unless registration was skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,
    /// Fragment size in bytes
    pub size: u64,
}

/// Result of a successful upload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    /// Receipts, `fragments[i].index == i`
    pub fragments: Vec<FragmentReceipt>,
}

impl UploadResult {
    /// Fragment roots in order
    #[must_use]
    pub fn root_hashes(&self) -> Vec<RootHash> {
        self.fragments.iter().map(|f| f.root).collect()
    }

    /// Registration transactions in fragment order
    ///
    /// Empty when registration was skipped.
    #[must_use]
    pub fn tx_hashes(&self) -> Vec<TxHash> {
        self.fragments.iter().filter_map(|f| f.tx_hash).collect()
    }

    /// Number of fragments
    #[must_use]
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Whether no fragments were recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Sum of fragment sizes
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.fragments.iter().map(|f| f.size).sum()
    }

    /// Plain text root list
    #[must_use]
    pub fn to_root_list(&self) -> String {
        let mut out = String::with_capacity(self.fragments.len() * 67);
        for fragment in &self.fragments {
            let _ = writeln!(out, "{}", fragment.root);
        }
        out
    }

    /// Pretty JSON manifest
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a JSON manifest
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] for malformed JSON or
    /// [`Error::InvalidConfig`] when indices are not `0..n` in order.
    pub fn from_json(json: &str) -> Result<Self> {
        let result: Self = serde_json::from_str(json)?;
        for (position, fragment) in result.fragments.iter().enumerate() {
            if fragment.index != position {
                return Err(Error::InvalidConfig(
                    format!(
                        "manifest entry {position} has fragment index {}",
                        fragment.index
                    )
                    .into(),
                ));
            }
        }
        Ok(result)
    }
}

/// Parse a plain text root list
///
/// Blank lines and lines starting with `#` are skipped.
///
/// # Errors
///
/// Returns [`Error::InvalidHash`] naming the first malformed line.
pub fn parse_root_list(text: &str) -> Result<Vec<RootHash>> {
    text.lines()
        .enumerate()
        .map(|(n, line)| (n + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line_no, line)| {
            line.parse::<RootHash>()
                .map_err(|e| Error::InvalidHash(format!("line {line_no}: {e}")))
        })
        .collect()
}

/// Load roots from either a JSON manifest or a plain root list
///
/// # Errors
///
/// Same as [`UploadResult::from_json`] or [`parse_root_list`].
pub fn parse_roots(text: &str) -> Result<Vec<RootHash>> {
    if text.trim_start().starts_with('{') {
        Ok(UploadResult::from_json(text)?.root_hashes())
    } else {
        parse_root_list(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> UploadResult {
        UploadResult {
            fragments: (0..3)
                .map(|i| FragmentReceipt {
                    index: i,
                    root: RootHash::from_bytes([i as u8 + 1; 32]),
                    tx_hash: (i != 1).then(|| TxHash::from_bytes([0xf0 + i as u8; 32])),
                    size: 100 + i as u64,
                })
                .collect(),
        }
    }

    #[test]
    fn test_accessors() {
        let result = sample();
        assert_eq!(result.len(), 3);
        assert_eq!(result.total_size(), 303);
        assert_eq!(result.root_hashes()[2], RootHash::from_bytes([3; 32]));
        assert_eq!(
            result.tx_hashes(),
            vec![
                TxHash::from_bytes([0xf0; 32]),
                TxHash::from_bytes([0xf2; 32])
            ]
        );
    }

    #[test]
    fn test_root_list_text() {
        let result = sample();
        let text = result.to_root_list();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().all(|l| l.starts_with("0x") && l.len() == 66));

        let commented = format!("# roots\n\n{text}\n");
        assert_eq!(parse_root_list(&commented).unwrap(), result.root_hashes());
    }

    #[test]
    fn test_root_list_reports_line() {
        let text = format!("{}\nnot-a-hash\n", RootHash::from_bytes([1; 32]));
        match parse_root_list(&text) {
            Err(Error::InvalidHash(msg)) => assert!(msg.starts_with("line 2")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_manifest_json() {
        let result = sample();
        let json = result.to_json().unwrap();
        assert!(!json.contains("\"tx_hash\": null"));
        assert_eq!(UploadResult::from_json(&json).unwrap(), result);
        assert_eq!(parse_roots(&json).unwrap(), result.root_hashes());
    }

    #[test]
    fn test_manifest_index_validation() {
        let mut result = sample();
        result.fragments.swap(0, 1);
        let json = result.to_json().unwrap();
        assert!(matches!(
            UploadResult::from_json(&json),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_empty_root_list() {
        assert!(parse_root_list("").unwrap().is_empty());
        assert!(parse_roots("\n# nothing\n").unwrap().is_empty());
    }
}
