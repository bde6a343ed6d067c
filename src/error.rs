//! Error types for deltavault

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for deltavault operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Input error: {path}: {reason}")]
    Input { path: PathBuf, reason: String },

    #[error("Storage IO error: {context}: {source}")]
    StorageIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Integrity verification failed: {reason}")]
    Integrity { reason: String },

    #[error("Version not found: {id}")]
    NotFound { id: u64 },

    #[error("Block not found in store: {fingerprint}")]
    BlockMissing { fingerprint: String },

    #[error("Invalid manifest record: {reason}")]
    InvalidManifest { reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },
}

/// Distinguishing kind of a failed outcome, reported at the process boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    StorageIo,
    Integrity,
    NotFound,
    InvalidManifest,
    Configuration,
}

impl ErrorKind {
    /// Process exit code used by the command-line interface
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Input => 2,
            ErrorKind::StorageIo => 3,
            ErrorKind::Integrity => 4,
            ErrorKind::NotFound => 5,
            ErrorKind::InvalidManifest => 6,
            ErrorKind::Configuration => 7,
        }
    }
}

impl Error {
    /// Wrap an IO error from the storage layer with a short description
    pub fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::StorageIo {
            context: context.into(),
            source,
        }
    }

    pub fn input(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Input {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Input { .. } => ErrorKind::Input,
            Error::StorageIo { .. } => ErrorKind::StorageIo,
            Error::Integrity { .. } => ErrorKind::Integrity,
            Error::NotFound { .. } | Error::BlockMissing { .. } => ErrorKind::NotFound,
            Error::InvalidManifest { .. } => ErrorKind::InvalidManifest,
            Error::Serialization(_) | Error::TomlParse(_) | Error::Configuration { .. } => {
                ErrorKind::Configuration
            }
        }
    }
}

/// Result type alias for deltavault operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_have_distinct_exit_codes() {
        let kinds = [
            ErrorKind::Input,
            ErrorKind::StorageIo,
            ErrorKind::Integrity,
            ErrorKind::NotFound,
            ErrorKind::InvalidManifest,
            ErrorKind::Configuration,
        ];
        let mut codes: Vec<u8> = kinds.iter().map(|k| k.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn test_missing_block_reports_as_not_found() {
        let err = Error::BlockMissing {
            fingerprint: "ab".repeat(32),
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("abab"));
    }
}
