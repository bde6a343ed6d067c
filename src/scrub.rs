//! Whole-store integrity scan
//!
//! Re-hashes every block, checks every version's references against the
//! store, and lists blocks no version references. Read-only: nothing is
//! repaired or deleted.

use crate::hash::Fingerprint;
use crate::repository::Repository;
use crate::store::BlockInfo;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, span, warn, Level};

/// A version whose record could not be loaded
#[derive(Debug, Clone, Serialize)]
pub struct InvalidVersion {
    pub id: u64,
    pub reason: String,
}

/// A version that references blocks it cannot be restored from
#[derive(Debug, Clone, Serialize)]
pub struct DamagedVersion {
    pub id: u64,
    pub missing: Vec<Fingerprint>,
    pub corrupted: Vec<Fingerprint>,
}

#[derive(Debug, Serialize)]
pub struct ScrubReport {
    pub generated_at: DateTime<Utc>,
    pub blocks_checked: usize,
    /// Uncompressed bytes of every readable block
    pub bytes_checked: u64,
    /// Compressed bytes on disk for the same blocks
    pub stored_bytes_checked: u64,
    pub corrupted_blocks: Vec<Fingerprint>,
    pub versions_checked: usize,
    pub invalid_versions: Vec<InvalidVersion>,
    pub damaged_versions: Vec<DamagedVersion>,
    /// Blocks referenced by no readable version
    pub orphan_blocks: Vec<Fingerprint>,
}

impl ScrubReport {
    /// No corruption, no missing blocks, every record readable.
    /// Orphans alone do not make a store unclean.
    pub fn is_clean(&self) -> bool {
        self.corrupted_blocks.is_empty()
            && self.invalid_versions.is_empty()
            && self.damaged_versions.is_empty()
    }
}

pub struct Scrubber<'a> {
    repo: &'a Repository,
}

impl<'a> Scrubber<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self { repo }
    }

    pub fn run(&self) -> Result<ScrubReport> {
        let span = span!(Level::INFO, "scrub");
        let _enter = span.enter();

        let store = self.repo.blocks();
        let manifest = self.repo.manifest();

        let stored = store.list()?;
        info!("Scrubbing {} blocks", stored.len());

        let results: Vec<(Fingerprint, Result<BlockInfo>)> = stored
            .par_iter()
            .map(|fp| (*fp, store.verify(fp)))
            .collect();

        let mut present = HashSet::new();
        let mut corrupted = HashSet::new();
        let mut bytes_checked = 0u64;
        let mut stored_bytes_checked = 0u64;
        for (fp, result) in results {
            match result {
                Ok(info) => {
                    bytes_checked += info.size;
                    stored_bytes_checked += info.stored_size;
                    present.insert(fp);
                }
                Err(Error::Integrity { reason }) => {
                    warn!(%reason, "corrupted block");
                    present.insert(fp);
                    corrupted.insert(fp);
                }
                // Removed between listing and reading
                Err(Error::BlockMissing { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let ids = manifest.ids()?;
        let mut invalid_versions = Vec::new();
        let mut damaged_versions = Vec::new();
        let mut referenced = HashSet::new();

        for &id in &ids {
            let version = match manifest.lookup(id) {
                Ok(version) => version,
                Err(Error::InvalidManifest { reason }) => {
                    warn!(version_id = id, %reason, "unreadable version record");
                    invalid_versions.push(InvalidVersion { id, reason });
                    continue;
                }
                Err(e) => return Err(e),
            };

            let unique = version.unique_blocks();
            let mut missing: Vec<Fingerprint> =
                unique.iter().filter(|fp| !present.contains(fp)).copied().collect();
            let mut bad: Vec<Fingerprint> =
                unique.iter().filter(|fp| corrupted.contains(fp)).copied().collect();
            referenced.extend(unique);

            if !missing.is_empty() || !bad.is_empty() {
                missing.sort();
                bad.sort();
                warn!(
                    version_id = id,
                    missing = missing.len(),
                    corrupted = bad.len(),
                    "version cannot be restored"
                );
                damaged_versions.push(DamagedVersion {
                    id,
                    missing,
                    corrupted: bad,
                });
            } else {
                debug!(version_id = id, "version intact");
            }
        }

        let orphan_blocks: Vec<Fingerprint> = stored
            .iter()
            .filter(|fp| !referenced.contains(fp))
            .copied()
            .collect();

        let mut corrupted_blocks: Vec<Fingerprint> = corrupted.into_iter().collect();
        corrupted_blocks.sort();

        let report = ScrubReport {
            generated_at: Utc::now(),
            blocks_checked: stored.len(),
            bytes_checked,
            stored_bytes_checked,
            corrupted_blocks,
            versions_checked: ids.len(),
            invalid_versions,
            damaged_versions,
            orphan_blocks,
        };

        info!(
            "Scrub finished: {} corrupted blocks, {} damaged versions, {} orphans",
            report.corrupted_blocks.len(),
            report.damaged_versions.len(),
            report.orphan_blocks.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::VersionDraft;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn commit(repo: &Repository, parts: &[&str]) -> Result<Vec<Fingerprint>> {
        let mut blocks = Vec::new();
        for part in parts {
            blocks.push(repo.blocks().put(part.as_bytes())?.fingerprint);
        }
        let whole = parts.concat();
        repo.manifest().commit(VersionDraft {
            source_path: PathBuf::from("/scrub/source"),
            blocks: blocks.clone(),
            total_size: whole.len() as u64,
            chunk_size: 4,
            file_hash: Fingerprint::of(whole.as_bytes()),
        })?;
        Ok(blocks)
    }

    fn dir_size(repo: &Repository) -> u64 {
        fs::read_dir(repo.blocks().blocks_path())
            .unwrap()
            .map(|e| e.unwrap().metadata().unwrap().len())
            .sum()
    }

    #[test]
    fn test_clean_store() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let repo = Repository::open_at(temp_dir.path())?;
        commit(&repo, &["aaaa", "bbbb", "aaaa"])?;

        let report = Scrubber::new(&repo).run()?;
        assert!(report.is_clean());
        assert_eq!(report.blocks_checked, 2);
        assert_eq!(report.bytes_checked, 8);
        assert_eq!(report.stored_bytes_checked, dir_size(&repo));
        assert_eq!(report.versions_checked, 1);
        assert!(report.orphan_blocks.is_empty());
        Ok(())
    }

    #[test]
    fn test_reports_corruption_missing_and_orphans() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let repo = Repository::open_at(temp_dir.path())?;
        let blocks = commit(&repo, &["aaaa", "bbbb", "cccc"])?;
        let orphan = repo.blocks().put(b"lonely")?.fingerprint;

        fs::write(repo.blocks().block_path(&blocks[0]), b"XXXX").unwrap();
        fs::remove_file(repo.blocks().block_path(&blocks[2])).unwrap();

        let report = Scrubber::new(&repo).run()?;
        assert!(!report.is_clean());
        assert_eq!(report.corrupted_blocks, vec![blocks[0]]);
        assert_eq!(report.orphan_blocks, vec![orphan]);
        assert_eq!(report.damaged_versions.len(), 1);
        assert_eq!(report.damaged_versions[0].id, 1);
        assert_eq!(report.damaged_versions[0].missing, vec![blocks[2]]);
        assert_eq!(report.damaged_versions[0].corrupted, vec![blocks[0]]);
        Ok(())
    }

    #[test]
    fn test_reports_unreadable_records() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let repo = Repository::open_at(temp_dir.path())?;
        commit(&repo, &["aaaa"])?;
        fs::write(repo.manifest().versions_path().join("1.json"), b"{ not json").unwrap();

        let report = Scrubber::new(&repo).run()?;
        assert_eq!(report.invalid_versions.len(), 1);
        assert_eq!(report.invalid_versions[0].id, 1);
        assert!(!report.is_clean());
        Ok(())
    }
}
