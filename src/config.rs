//! Engine configuration.
//!
//! Built-in defaults, optionally overlaid by a TOML file. Command-line flags
//! are applied on top by the binary before [`Config::validate`] runs.

use crate::chunk::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use crate::store::{DEFAULT_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Storage root used when nothing else is configured, relative to the
/// working directory
pub const DEFAULT_STORAGE_ROOT: &str = ".deltavault_test";

/// Suffix appended to the source path for the self-verification restore
pub const DEFAULT_RESTORED_SUFFIX: &str = ".restored";

/// Upper bound on worker threads; read-ahead is `2 * workers` chunks
pub const MAX_WORKERS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding `blocks/`, `versions/` and the manifest lock
    pub storage_root: PathBuf,
    /// Fixed chunk size in bytes
    pub chunk_size: usize,
    /// Worker threads used to fingerprint and store chunks
    pub workers: usize,
    /// Restore every new version to `<source><restored_suffix>` after backup
    pub verify_after_backup: bool,
    pub restored_suffix: String,
    /// zstd level applied to every newly stored block
    pub compression_level: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from(DEFAULT_STORAGE_ROOT),
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: default_workers(),
            verify_after_backup: true,
            restored_suffix: DEFAULT_RESTORED_SUFFIX.to_string(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl Config {
    /// Defaults, overlaid by `path` when given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading config from {}", path.display());
        let content = fs::read_to_string(path).map_err(|e| Error::Configuration {
            reason: format!("failed to read config file {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::Configuration {
                reason: format!(
                    "chunk_size must be between 1 and {} bytes, got {}",
                    MAX_CHUNK_SIZE, self.chunk_size
                ),
            });
        }
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(Error::Configuration {
                reason: format!(
                    "workers must be between 1 and {}, got {}",
                    MAX_WORKERS, self.workers
                ),
            });
        }
        if !(1..=MAX_COMPRESSION_LEVEL).contains(&self.compression_level) {
            return Err(Error::Configuration {
                reason: format!(
                    "compression_level must be between 1 and {}, got {}",
                    MAX_COMPRESSION_LEVEL, self.compression_level
                ),
            });
        }
        if self.restored_suffix.is_empty() {
            return Err(Error::Configuration {
                reason: "restored_suffix must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(MAX_WORKERS))
        .unwrap_or(4)
}
