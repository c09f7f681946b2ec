//! Indexer configuration
//!
//! Loaded from a TOML file, with environment overrides. Passed explicitly to
//! the coordinator; nothing here is global.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::store::SCHEMA_VERSION;

/// Application directory name under the platform data/config dirs
pub const APP_DIR: &str = "projindex";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Global switch; when off the coordinator refuses to schedule passes
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding the store file (default: platform data dir)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Glob patterns matched against every path component
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Files written per store transaction
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Retry budget for writes that collide with another writer
    #[serde(default = "default_busy_retries")]
    pub busy_retries: u32,
}

fn default_true() -> bool {
    true
}

fn default_ignore_patterns() -> Vec<String> {
    [".git", ".hg", ".svn", "__pycache__", "*.pyc", "node_modules"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_batch_size() -> usize {
    50
}

fn default_busy_retries() -> u32 {
    8
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            data_dir: None,
            ignore_patterns: default_ignore_patterns(),
            batch_size: default_batch_size(),
            busy_retries: default_busy_retries(),
        }
    }
}

impl IndexerConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: IndexerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load from `path` if given, else from the default location if it
    /// exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => match Self::default_config_path() {
                Some(p) if p.exists() => Self::load(&p),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
    }

    /// Apply environment variable overrides.
    /// Env vars take precedence over TOML values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("PROJINDEX_DISABLED") {
            if val == "1" || val.eq_ignore_ascii_case("true") {
                self.enabled = false;
            }
        }
        if let Ok(val) = std::env::var("PROJINDEX_DATA_DIR") {
            if !val.is_empty() {
                self.data_dir = Some(PathBuf::from(val));
            }
        }
        self
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_DIR)
        })
    }

    /// Full path of the store file; the name embeds the schema version so an
    /// older store is never reopened by a newer build.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir().join(format!("index-{}.db", SCHEMA_VERSION))
    }
}
