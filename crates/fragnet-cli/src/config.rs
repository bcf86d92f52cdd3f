//! Configuration system for the fragnet CLI.

use fragnet_core::{
    DownloadOptions, FinalityRequirement, NodeAffinity, RetryConfig, SelectionMethod,
    UploadOptions,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// fragnet configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Local devnet configuration
    #[serde(default)]
    pub devnet: DevnetConfig,
    /// Upload defaults
    #[serde(default)]
    pub upload: UploadConfig,
    /// Download defaults
    #[serde(default)]
    pub download: DownloadConfig,
    /// Retry policy shared by uploads and downloads
    #[serde(default)]
    pub retry: RetryConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Devnet configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevnetConfig {
    /// Devnet root directory
    #[serde(default = "default_devnet_root")]
    pub root: PathBuf,
    /// Simulated finality delay in milliseconds
    #[serde(default)]
    pub finality_delay_ms: u64,
}

/// Upload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Fragment size in bytes
    #[serde(default = "default_fragment_size")]
    pub fragment_size: u64,
    /// Replicas per fragment
    #[serde(default = "default_replica")]
    pub expected_replica: usize,
    /// Fragments in flight
    #[serde(default = "default_task_size")]
    pub task_size: usize,
    /// Finality requirement (none, fragment, file)
    #[serde(default = "default_finality")]
    pub finality: String,
    /// Skip on-chain registration
    #[serde(default = "default_true")]
    pub skip_tx: bool,
    /// Node ranking method (min, random)
    #[serde(default = "default_method")]
    pub method: String,
    /// Only use trusted nodes
    #[serde(default = "default_true")]
    pub full_trusted: bool,
    /// Use one replica set for the whole file
    #[serde(default)]
    pub pinned: bool,
    /// Nodes never selected
    #[serde(default)]
    pub excluded_nodes: Vec<String>,
    /// Finality poll interval in milliseconds
    #[serde(default = "default_poll_ms")]
    pub finality_poll_ms: u64,
    /// Overall timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Fragments fetched concurrently
    #[serde(default = "default_task_size")]
    pub task_size: usize,
    /// Verify fragment roots
    #[serde(default = "default_true")]
    pub verify: bool,
    /// Overall timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_devnet_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("fragnet/devnet")
}

fn default_fragment_size() -> u64 {
    fragnet_files::DEFAULT_FRAGMENT_SIZE
}

fn default_replica() -> usize {
    1
}

fn default_task_size() -> usize {
    5
}

fn default_finality() -> String {
    "file".to_string()
}

fn default_method() -> String {
    "min".to_string()
}

fn default_poll_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DevnetConfig {
    fn default() -> Self {
        Self {
            root: default_devnet_root(),
            finality_delay_ms: 0,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            fragment_size: default_fragment_size(),
            expected_replica: default_replica(),
            task_size: default_task_size(),
            finality: default_finality(),
            skip_tx: true,
            method: default_method(),
            full_trusted: true,
            pinned: false,
            excluded_nodes: Vec::new(),
            finality_poll_ms: default_poll_ms(),
            timeout_secs: None,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            task_size: default_task_size(),
            verify: true,
            timeout_secs: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("fragnet/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Upload options described by this configuration
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown finality requirement or method.
    pub fn upload_options(&self) -> anyhow::Result<UploadOptions> {
        let upload = &self.upload;
        Ok(UploadOptions {
            finality_required: upload.finality.parse::<FinalityRequirement>()?,
            task_size: upload.task_size,
            expected_replica: upload.expected_replica,
            skip_tx: upload.skip_tx,
            method: upload.method.parse::<SelectionMethod>()?,
            full_trusted: upload.full_trusted,
            excluded_nodes: upload
                .excluded_nodes
                .iter()
                .map(|id| id.as_str().into())
                .collect(),
            node_affinity: if upload.pinned {
                NodeAffinity::Pinned
            } else {
                NodeAffinity::PerFragment
            },
            retry: self.retry.clone(),
            finality_poll_interval: Duration::from_millis(upload.finality_poll_ms),
        })
    }

    /// Download options described by this configuration
    #[must_use]
    pub fn download_options(&self) -> DownloadOptions {
        DownloadOptions {
            task_size: self.download.task_size,
            retry: self.retry.clone(),
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        // Validate log level
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        // Validate fragment size
        if self.upload.fragment_size == 0 || self.upload.fragment_size > 4 * 1024 * 1024 * 1024 {
            anyhow::bail!("Fragment size must be between 1 byte and 4GB");
        }

        if self.download.task_size == 0 || self.download.task_size > 1000 {
            anyhow::bail!("Download task size must be between 1 and 1000");
        }

        if self.upload.task_size > 1000 {
            anyhow::bail!("Upload task size must be at most 1000");
        }

        // Remaining upload fields are checked by the orchestrator
        self.upload_options()?.validate()?;
        self.retry.validate()?;

        Ok(())
    }
}
