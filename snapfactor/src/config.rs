//! Research configuration loaded from TOML.
//!
//! ```toml
//! output_dir = "outputs"
//!
//! [store]
//! root = "data/snapshots"
//!
//! [sample]
//! max_spread_ratio = 0.4
//!
//! [stats]
//! bootstrap_resamples = 1000
//! ```
//!
//! Every section and key is optional.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sample::SampleConfig;
use crate::signal::TripleGateConfig;
use crate::stats::StatsConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Snapshot store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory; per-run directories live under `runs/`.
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/snapshots"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    pub store: StoreConfig,
    pub sample: SampleConfig,
    pub stats: StatsConfig,
    pub signal: TripleGateConfig,
    pub output_dir: PathBuf,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            sample: SampleConfig::default(),
            stats: StatsConfig::default(),
            signal: TripleGateConfig::default(),
            output_dir: PathBuf::from("outputs"),
        }
    }
}

impl ResearchConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
