//! Backup functionality for committing versions
//!
//! The source is streamed through the chunker in windows of a few chunks.
//! Each window is fingerprinted and stored in parallel on a bounded worker
//! pool, then released, so memory stays proportional to the chunk size and
//! not the file size. The version is committed only after every block is
//! durably stored; a failure before that point leaves no version behind.

use crate::chunk::{Chunk, Chunker};
use crate::config::Config;
use crate::hash::{Fingerprint, StreamHasher};
use crate::manifest::{Version, VersionDraft};
use crate::repository::Repository;
use crate::restore::{RestoreEngine, RestoreReport};
use crate::store::PutOutcome;
use crate::{Error, Result};
use rayon::prelude::*;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, span, warn, Level};

/// Outcome of the self-verification restore that follows a backup
#[derive(Debug)]
pub enum Verification {
    /// Disabled by configuration
    Skipped,
    Passed(RestoreReport),
    /// The version stays committed; the failure is reported, not retracted
    Failed { output: PathBuf, error: Error },
}

impl Verification {
    pub fn is_failed(&self) -> bool {
        matches!(self, Verification::Failed { .. })
    }
}

/// Summary of one backup run
#[derive(Debug)]
pub struct BackupReport {
    pub version: Version,
    /// Blocks written by this run
    pub new_blocks: usize,
    /// Blocks that were already present in the store
    pub reused_blocks: usize,
    pub bytes: u64,
    /// Compressed bytes written by this run
    pub stored_bytes: u64,
    pub verification: Verification,
}

/// Backup engine for committing file versions
pub struct BackupEngine<'a> {
    repo: &'a Repository,
    chunker: Chunker,
    pool: rayon::ThreadPool,
    window: usize,
    verify_after_backup: bool,
    restored_suffix: String,
}

impl<'a> BackupEngine<'a> {
    pub fn new(repo: &'a Repository, config: &Config) -> Result<Self> {
        config.validate()?;
        let chunker = Chunker::new(config.chunk_size)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("deltavault-worker-{}", i))
            .build()
            .map_err(|e| Error::Configuration {
                reason: format!("failed to start worker pool: {}", e),
            })?;

        Ok(Self {
            repo,
            chunker,
            pool,
            window: config.workers.checked_mul(2).ok_or_else(|| Error::Configuration {
                reason: format!("workers value {} is too large", config.workers),
            })?,
            verify_after_backup: config.verify_after_backup,
            restored_suffix: config.restored_suffix.clone(),
        })
    }

    /// Back up `source`, commit a version, then self-verify it
    pub fn run(&self, source: &Path) -> Result<BackupReport> {
        let span = span!(Level::INFO, "backup", source = %source.display());
        let _enter = span.enter();

        let (source_path, file) = open_source(source)?;
        info!("Starting backup of {}", source_path.display());

        let mut hasher = StreamHasher::new();
        let mut blocks = Vec::new();
        let mut new_blocks = 0usize;
        let mut reused_blocks = 0usize;
        let mut stored_bytes = 0u64;

        let mut chunks = self.chunker.chunks(file);
        loop {
            let window: Vec<Chunk> = chunks
                .by_ref()
                .take(self.window)
                .collect::<io::Result<_>>()
                .map_err(|e| Error::input(&source_path, format!("read failed: {}", e)))?;
            if window.is_empty() {
                break;
            }

            for chunk in &window {
                hasher.update(&chunk.data);
            }

            for outcome in self.store_window(&window)? {
                if outcome.written {
                    new_blocks += 1;
                    stored_bytes += outcome.stored_size;
                } else {
                    reused_blocks += 1;
                }
                blocks.push(outcome.fingerprint);
            }
            debug!(blocks = blocks.len(), bytes = hasher.bytes(), "window stored");
        }

        // Block renames must be durable before a version can reference them
        self.repo.blocks().sync()?;

        let bytes = hasher.bytes();
        let version = self.repo.manifest().commit(VersionDraft {
            source_path: source_path.clone(),
            blocks,
            total_size: bytes,
            chunk_size: self.chunker.chunk_size(),
            file_hash: hasher.finalize(),
        })?;

        info!(
            "Backup committed: version {}, {} new blocks ({} bytes stored), {} reused, {} bytes",
            version.id, new_blocks, stored_bytes, reused_blocks, bytes
        );

        let verification = if self.verify_after_backup {
            self.verify(&version, &restored_path(source, &self.restored_suffix))
        } else {
            Verification::Skipped
        };

        Ok(BackupReport {
            version,
            new_blocks,
            reused_blocks,
            bytes,
            stored_bytes,
            verification,
        })
    }

    /// Fingerprint and store one window of chunks, preserving order
    fn store_window(&self, window: &[Chunk]) -> Result<Vec<PutOutcome>> {
        let store = self.repo.blocks();
        self.pool
            .install(|| window.par_iter().map(|chunk| store.put(&chunk.data)).collect())
    }

    fn verify(&self, version: &Version, output: &Path) -> Verification {
        // A stale output from an earlier run must not survive a failed check
        match fs::remove_file(output) {
            Ok(()) => debug!("Removed stale {}", output.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Verification::Failed {
                    output: output.to_path_buf(),
                    error: Error::storage(format!("removing {}", output.display()), e),
                }
            }
        }

        match RestoreEngine::new(self.repo).restore(version.id, output) {
            Ok(report) => Verification::Passed(report),
            Err(error) => {
                warn!(version_id = version.id, %error, "self-verification failed");
                Verification::Failed {
                    output: output.to_path_buf(),
                    error,
                }
            }
        }
    }
}

/// Canonicalize and open the source, rejecting anything but a regular file
fn open_source(source: &Path) -> Result<(PathBuf, File)> {
    let metadata = fs::metadata(source).map_err(|e| Error::input(source, e.to_string()))?;
    if !metadata.is_file() {
        return Err(Error::input(source, "not a regular file"));
    }

    let canonical = fs::canonicalize(source).map_err(|e| Error::input(source, e.to_string()))?;
    let file = File::open(&canonical).map_err(|e| Error::input(source, e.to_string()))?;
    Ok((canonical, file))
}

/// `<source><suffix>`, next to the source
pub fn restored_path(source: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(source.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Fingerprints a source would produce, without storing anything
pub fn plan_blocks(source: &Path, chunker: &Chunker) -> Result<Vec<Fingerprint>> {
    let (source_path, file) = open_source(source)?;
    chunker
        .chunks(file)
        .map(|chunk| {
            chunk
                .map(|c| Fingerprint::of(&c.data))
                .map_err(|e| Error::input(&source_path, format!("read failed: {}", e)))
        })
        .collect()
}
