//! Agent configuration loaded from TOML.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default pipe name of the peer relay.
pub const DEFAULT_PIPE_NAME: &str = "tasker";
/// Default transfer chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: u64 = 512_000;

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Peer relay configuration.
    #[serde(default)]
    pub relay: RelayConfig,
    /// File transfer configuration.
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// Peer relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Whether the relay server runs at all.
    pub enabled: bool,
    /// Pipe name, or an absolute endpoint path.
    pub pipe_name: String,
    /// Capacity of each relay queue.
    pub queue_capacity: usize,
    /// Delay before re-creating a listener after a bind or accept failure.
    pub retry_delay_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pipe_name: DEFAULT_PIPE_NAME.to_owned(),
            queue_capacity: 1024,
            retry_delay_ms: 1000,
        }
    }
}

impl RelayConfig {
    /// Resolve the platform endpoint the relay listens on.
    ///
    /// Absolute paths are used verbatim. Otherwise a Unix socket under the
    /// runtime directory (falling back to the temp directory) on Unix, and
    /// a named pipe on Windows.
    pub fn endpoint(&self) -> PathBuf {
        let name = Path::new(&self.pipe_name);
        if name.is_absolute() {
            return name.to_path_buf();
        }

        if cfg!(windows) {
            PathBuf::from(format!(r"\\.\pipe\{}", self.pipe_name))
        } else {
            dirs::runtime_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(format!("{}.sock", self.pipe_name))
        }
    }
}

/// File transfer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Chunk size in bytes.
    pub chunk_size: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl AgentConfig {
    /// Parse a TOML string, expanding `${ENV_VAR}` references first.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let expanded = crate::utils::expand_env_vars(toml_str);
        let config: Self = toml::from_str(&expanded).context("invalid agent configuration")?;
        anyhow::ensure!(
            config.transfer.chunk_size > 0,
            "transfer.chunk_size must be positive"
        );
        anyhow::ensure!(
            config.relay.queue_capacity > 0,
            "relay.queue_capacity must be positive"
        );
        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&content)
    }
}
