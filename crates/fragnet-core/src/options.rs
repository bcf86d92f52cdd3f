//! Upload and download options

use crate::error::{Error, Result};
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::directory::NodeId;

/// How far an upload waits before it reports success
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalityRequirement {
    /// Return once every fragment is stored (and registered when required)
    None,
    /// Each fragment task waits for its own finality before completing
    FragmentFinalized,
    /// Wait for every fragment's finality after all fragments are stored
    #[default]
    FileFinalized,
}

impl FromStr for FinalityRequirement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "fragment" | "fragment_finalized" => Ok(Self::FragmentFinalized),
            "file" | "file_finalized" => Ok(Self::FileFinalized),
            _ => Err(Error::InvalidConfig(
                format!("unknown finality requirement: {s}").into(),
            )),
        }
    }
}

impl fmt::Display for FinalityRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::FragmentFinalized => write!(f, "fragment"),
            Self::FileFinalized => write!(f, "file"),
        }
    }
}

/// Node ranking used by the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMethod {
    /// Lowest latency and load first
    #[default]
    Min,
    /// Uniformly shuffled
    Random,
}

impl SelectionMethod {
    /// Wire name of the method
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Random => "random",
        }
    }
}

impl FromStr for SelectionMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "min" => Ok(Self::Min),
            "random" => Ok(Self::Random),
            _ => Err(Error::InvalidConfig(
                format!("unknown selection method: {s}").into(),
            )),
        }
    }
}

impl fmt::Display for SelectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether replica sets are chosen per fragment or once per file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeAffinity {
    /// Each fragment asks the directory for its own replica set
    #[default]
    PerFragment,
    /// One replica set, sized for the whole file, is used for every fragment
    Pinned,
}

/// Upload configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadOptions {
    /// Finality requirement before the upload reports success
    pub finality_required: FinalityRequirement,

    /// Maximum fragments in flight
    pub task_size: usize,

    /// Replicas each fragment must reach
    pub expected_replica: usize,

    /// Skip on-chain root registration
    pub skip_tx: bool,

    /// Node ranking method
    pub method: SelectionMethod,

    /// Only place fragments on trusted nodes
    pub full_trusted: bool,

    /// Nodes never selected for placement
    pub excluded_nodes: HashSet<NodeId>,

    /// Replica set policy
    pub node_affinity: NodeAffinity,

    /// Per-fragment retry policy
    pub retry: RetryConfig,

    /// Interval between finality checks
    #[serde(with = "millis", rename = "finality_poll_interval_ms")]
    pub finality_poll_interval: Duration,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            finality_required: FinalityRequirement::default(),
            task_size: 5,
            expected_replica: 1,
            skip_tx: true,
            method: SelectionMethod::default(),
            full_trusted: true,
            excluded_nodes: HashSet::new(),
            node_affinity: NodeAffinity::default(),
            retry: RetryConfig::default(),
            finality_poll_interval: Duration::from_millis(500),
        }
    }
}

impl UploadOptions {
    /// Check the options are usable
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero task size, replica count
    /// or poll interval, or an invalid retry policy.
    pub fn validate(&self) -> Result<()> {
        if self.task_size == 0 {
            return Err(Error::invalid_config("task_size must be > 0"));
        }
        if self.expected_replica == 0 {
            return Err(Error::invalid_config("expected_replica must be > 0"));
        }
        if self.finality_poll_interval.is_zero() {
            return Err(Error::invalid_config(
                "finality_poll_interval must be > 0",
            ));
        }
        self.retry.validate()
    }
}

/// Download configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadOptions {
    /// Maximum fragment fetches in flight
    pub task_size: usize,

    /// Per-fragment retry policy
    pub retry: RetryConfig,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            task_size: 5,
            retry: RetryConfig::default(),
        }
    }
}

impl DownloadOptions {
    /// Check the options are usable
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero task size or an invalid
    /// retry policy.
    pub fn validate(&self) -> Result<()> {
        if self.task_size == 0 {
            return Err(Error::invalid_config("task_size must be > 0"));
        }
        self.retry.validate()
    }
}

/// Serde helper storing a [`Duration`] as integer milliseconds
pub mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize as milliseconds
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserialize from milliseconds
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Serde helper storing a [`Duration`] as integer microseconds
pub mod micros {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize as microseconds
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
    }

    /// Deserialize from microseconds
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_micros)
    }
}
