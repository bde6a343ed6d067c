//! Version catalog mapping version ids to ordered block lists.
//!
//! Each committed version is one JSON record at `versions/<id>.json`.
//! Records are written once, under an exclusive lock on `manifest.lock`,
//! and never rewritten. Ids are allocated inside that lock as one more
//! than the highest committed id, so they are unique and strictly
//! increasing even when several processes back up into the same store.

use crate::hash::{merkle_root, Fingerprint};
use crate::store::sync_dir;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Version record format
pub const MANIFEST_FORMAT: u32 = 1;

/// One immutable backed-up state of a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Record format version
    pub format: u32,
    pub id: u64,
    /// Previous version of the same source path, if any
    pub parent_id: Option<u64>,
    pub source_path: PathBuf,
    /// Ordered blocks whose concatenation is the file
    pub blocks: Vec<Fingerprint>,
    pub total_size: u64,
    pub chunk_size: usize,
    /// SHA-256 of the whole source file
    pub file_hash: Fingerprint,
    /// BLAKE3 seal over `blocks`
    pub merkle_root: String,
    pub created_at: DateTime<Utc>,
}

impl Version {
    /// Check the block list still matches the seal taken at commit time
    pub fn verify_integrity(&self) -> bool {
        merkle_root(&self.blocks) == self.merkle_root
    }

    /// Distinct blocks referenced by this version
    pub fn unique_blocks(&self) -> HashSet<Fingerprint> {
        self.blocks.iter().copied().collect()
    }
}

/// Everything needed to commit a version except the id
#[derive(Debug, Clone)]
pub struct VersionDraft {
    pub source_path: PathBuf,
    pub blocks: Vec<Fingerprint>,
    pub total_size: u64,
    pub chunk_size: usize,
    pub file_hash: Fingerprint,
}

/// Durable, append-only catalog of versions
#[derive(Debug)]
pub struct VersionManifest {
    versions_path: PathBuf,
    staging_path: PathBuf,
    lock_path: PathBuf,
}

impl VersionManifest {
    /// Open (creating if needed) the catalog under `root`
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let versions_path = root.join("versions");
        let staging_path = root.join("tmp");

        for dir in [&versions_path, &staging_path] {
            fs::create_dir_all(dir)
                .map_err(|e| Error::storage(format!("creating {}", dir.display()), e))?;
        }

        Ok(Self {
            versions_path,
            staging_path,
            lock_path: root.join("manifest.lock"),
        })
    }

    /// Allocate the next id and durably record the version.
    ///
    /// Either the record is fully written under its final name or no record
    /// exists for the id.
    pub fn commit(&self, draft: VersionDraft) -> Result<Version> {
        let _lock = ManifestLock::acquire(&self.lock_path)?;

        let ids = self.ids()?;
        let id = ids.last().map_or(1, |last| last + 1);
        let parent_id = self
            .latest_for_source(&draft.source_path)?
            .map(|parent| parent.id);

        let version = Version {
            format: MANIFEST_FORMAT,
            id,
            parent_id,
            merkle_root: merkle_root(&draft.blocks),
            source_path: draft.source_path,
            blocks: draft.blocks,
            total_size: draft.total_size,
            chunk_size: draft.chunk_size,
            file_hash: draft.file_hash,
            created_at: Utc::now(),
        };

        self.write_record(&version)?;

        info!(
            version_id = id,
            parent_id = ?parent_id,
            blocks = version.blocks.len(),
            total_size = version.total_size,
            "committed version"
        );
        Ok(version)
    }

    /// Load one version record
    pub fn lookup(&self, id: u64) -> Result<Version> {
        let path = self.record_path(id);
        let content = fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound { id },
            _ => Error::storage(format!("reading {}", path.display()), e),
        })?;

        let version: Version =
            serde_json::from_slice(&content).map_err(|e| Error::InvalidManifest {
                reason: format!("{}: {}", path.display(), e),
            })?;

        if version.format != MANIFEST_FORMAT {
            return Err(Error::InvalidManifest {
                reason: format!(
                    "unsupported record format {} (expected {})",
                    version.format, MANIFEST_FORMAT
                ),
            });
        }
        if version.id != id {
            return Err(Error::InvalidManifest {
                reason: format!("{} holds version {}", path.display(), version.id),
            });
        }
        if !version.verify_integrity() {
            return Err(Error::InvalidManifest {
                reason: format!("block list of version {} does not match its seal", id),
            });
        }

        Ok(version)
    }

    /// Committed ids in ascending order
    pub fn ids(&self) -> Result<Vec<u64>> {
        let entries = fs::read_dir(&self.versions_path)
            .map_err(|e| Error::storage(format!("listing {}", self.versions_path.display()), e))?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::storage("listing versions", e))?;
            let name = entry.file_name();
            let parsed = name
                .to_str()
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|stem| stem.parse::<u64>().ok());
            match parsed {
                Some(id) => ids.push(id),
                None => debug!(entry = ?name, "ignoring non-version entry"),
            }
        }

        ids.sort_unstable();
        Ok(ids)
    }

    /// All readable versions in ascending id order.
    ///
    /// Records that fail validation are skipped with a warning; `lookup`
    /// and the scrubber still report them.
    pub fn list(&self) -> Result<Vec<Version>> {
        let mut versions = Vec::new();
        for id in self.ids()? {
            match self.lookup(id) {
                Ok(version) => versions.push(version),
                Err(Error::InvalidManifest { reason }) => {
                    warn!(version_id = id, %reason, "skipping unreadable version record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(versions)
    }

    pub fn latest(&self) -> Result<Option<Version>> {
        match self.ids()?.last() {
            Some(&id) => self.lookup(id).map(Some),
            None => Ok(None),
        }
    }

    /// Most recent readable version recorded for `source_path`.
    ///
    /// Records that fail validation are skipped here; `lookup` still reports
    /// them.
    pub fn latest_for_source(&self, source_path: &Path) -> Result<Option<Version>> {
        for id in self.ids()?.into_iter().rev() {
            match self.lookup(id) {
                Ok(version) if version.source_path == source_path => return Ok(Some(version)),
                Ok(_) => {}
                Err(Error::InvalidManifest { reason }) => {
                    warn!(version_id = id, %reason, "skipping unreadable version record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    pub fn versions_path(&self) -> &Path {
        &self.versions_path
    }

    pub fn sync(&self) -> Result<()> {
        sync_dir(&self.versions_path)
    }

    fn record_path(&self, id: u64) -> PathBuf {
        self.versions_path.join(format!("{}.json", id))
    }

    fn write_record(&self, version: &Version) -> Result<()> {
        let path = self.record_path(version.id);
        let mut staged = NamedTempFile::new_in(&self.staging_path)
            .map_err(|e| Error::storage("creating staging file", e))?;

        {
            let mut writer = BufWriter::new(staged.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, version)?;
            writer
                .flush()
                .map_err(|e| Error::storage(format!("writing {}", path.display()), e))?;
        }
        staged
            .as_file()
            .sync_all()
            .map_err(|e| Error::storage(format!("writing {}", path.display()), e))?;

        staged
            .persist_noclobber(&path)
            .map_err(|e| Error::storage(format!("committing {}", path.display()), e.error))?;

        self.sync()
    }
}

/// Exclusive advisory lock held for the duration of a commit
struct ManifestLock {
    file: File,
}

impl ManifestLock {
    fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| Error::storage(format!("opening {}", path.display()), e))?;

        file.lock_exclusive()
            .map_err(|e| Error::storage(format!("locking {}", path.display()), e))?;

        Ok(Self { file })
    }
}

impl Drop for ManifestLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
