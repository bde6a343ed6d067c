//! # deltavault
//!
//! Deduplicating, content-addressed backup engine for single files.
//!
//! ## Features
//!
//! - **Chunking**: fixed-size windows, streamed so memory stays bounded by
//!   the chunk size rather than the file size
//! - **Deduplication**: blocks are named by their SHA-256 fingerprint and
//!   stored once, with atomic no-clobber writes
//! - **Versions**: an append-only catalog of immutable, monotonically
//!   numbered version records
//! - **Verified restore**: every block is re-hashed on read; a corrupted
//!   store produces an error, never a silently wrong file
//!
//! Block identity is the fingerprint alone. Two different byte spans with
//! the same SHA-256 digest would be treated as one block; that collision is
//! assumed not to occur.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deltavault::{BackupEngine, Config, Repository};
//! use std::path::Path;
//!
//! # fn main() -> deltavault::Result<()> {
//! let config = Config::default();
//! let repo = Repository::open(&config)?;
//! let engine = BackupEngine::new(&repo, &config)?;
//!
//! let report = engine.run(Path::new("./large_test_file.bin"))?;
//! println!("Version ID: {}", report.version.id);
//! repo.close()?;
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod chunk;
pub mod cli;
pub mod config;
pub mod error;
pub mod hash;
pub mod logging;
pub mod manifest;
pub mod repository;
pub mod restore;
pub mod scrub;
pub mod store;

// Re-export commonly used types
pub use backup::{BackupEngine, BackupReport, Verification};
pub use chunk::Chunker;
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use hash::Fingerprint;
pub use manifest::{Version, VersionManifest};
pub use repository::Repository;
pub use restore::{RestoreEngine, RestoreReport};
pub use scrub::{ScrubReport, Scrubber};
pub use store::BlockStore;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
