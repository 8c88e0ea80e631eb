use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::checkpoint::{CheckpointPolicy, DEFAULT_LOG_SIZE_THRESHOLD, DEFAULT_WEIGHT_THRESHOLD};
use crate::restore::ApplyFlags;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "KEEPSAKE_DIR";

pub const CONFIG_FILE: &str = "config.toml";
pub const STORE_FILE: &str = "keepsake.sqlite3";
pub const REMOTE_DIR: &str = "remote";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepsakeConfig {
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub flush: FlushConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub restore: RestoreConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_weight_threshold")]
    pub weight_threshold: u64,
    #[serde(default = "default_log_size_threshold")]
    pub log_size_threshold: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            weight_threshold: default_weight_threshold(),
            log_size_threshold: default_log_size_threshold(),
        }
    }
}

impl From<CheckpointConfig> for CheckpointPolicy {
    fn from(config: CheckpointConfig) -> Self {
        Self {
            weight_threshold: config.weight_threshold,
            log_size_threshold: config.log_size_threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Blob directory. Relative paths resolve against the data directory;
    /// unset means `<data-dir>/remote`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreConfig {
    #[serde(default)]
    pub flags: ApplyFlags,
}

impl KeepsakeConfig {
    /// Remote blob directory for `data_dir`.
    #[must_use]
    pub fn remote_dir(&self, data_dir: &Path) -> PathBuf {
        match &self.remote.dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => data_dir.join(dir),
            None => data_dir.join(REMOTE_DIR),
        }
    }
}

/// Read `<data_dir>/config.toml`, or defaults when it does not exist.
pub fn load_config(data_dir: &Path) -> Result<KeepsakeConfig> {
    let path = data_dir.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(KeepsakeConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<KeepsakeConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Resolve the data directory: explicit flag, then `KEEPSAKE_DIR`, then the
/// platform data directory.
pub fn resolve_data_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    if let Some(dir) = env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|dir| dir.join("keepsake"))
        .context("No platform data directory; pass --data-dir or set KEEPSAKE_DIR")
}

const fn default_weight_threshold() -> u64 {
    DEFAULT_WEIGHT_THRESHOLD
}

const fn default_log_size_threshold() -> u64 {
    DEFAULT_LOG_SIZE_THRESHOLD
}

const fn default_debounce_ms() -> u64 {
    2_000
}
