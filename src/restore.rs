//! Restore functionality for reconstructing files from versions
//!
//! Blocks are fetched in order and re-verified by the block store as they
//! are read. Output is staged next to the destination and only renamed into
//! place once every block verified and the reassembled stream matches the
//! size and whole-file hash recorded at backup time. A failed restore never
//! leaves an output file behind.

use crate::hash::StreamHasher;
use crate::manifest::Version;
use crate::repository::Repository;
use crate::{Error, Result};
use serde::Serialize;
use std::cell::Cell;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::NamedTempFile;
use tracing::{debug, info, span, warn, Level};

/// Progress of a single restore request.
///
/// `Requested -> Verifying(0) -> ... -> Verifying(n-1) -> Complete`, or
/// `Failed` from any verifying step. No state is revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RestoreState {
    Requested,
    Verifying { block: usize },
    Complete,
    Failed,
}

impl RestoreState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RestoreState::Complete | RestoreState::Failed)
    }
}

/// Result of a successful restore
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub version_id: u64,
    pub output: PathBuf,
    pub bytes: u64,
    pub blocks: usize,
    pub state: RestoreState,
    pub duration_ms: u128,
}

/// Restore engine for reconstructing files from committed versions
pub struct RestoreEngine<'a> {
    repo: &'a Repository,
    last_state: Cell<Option<RestoreState>>,
}

impl<'a> RestoreEngine<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self {
            repo,
            last_state: Cell::new(None),
        }
    }

    /// Terminal state of the most recent request, if any was made
    pub fn last_state(&self) -> Option<RestoreState> {
        self.last_state.get()
    }

    /// Reassemble `version_id` into `output`, replacing any existing file
    pub fn restore(&self, version_id: u64, output: &Path) -> Result<RestoreReport> {
        let span = span!(Level::INFO, "restore", version_id);
        let _enter = span.enter();

        let mut state = RestoreState::Requested;
        let result = self.execute(version_id, output, &mut state);
        if let Err(e) = &result {
            transition(&mut state, RestoreState::Failed);
            warn!(version_id, error = %e, "restore aborted, no output written");
        }
        self.last_state.set(Some(state));
        result
    }

    fn execute(
        &self,
        version_id: u64,
        output: &Path,
        state: &mut RestoreState,
    ) -> Result<RestoreReport> {
        let start = Instant::now();
        let version = self.repo.manifest().lookup(version_id)?;

        info!(
            "Restoring version {} ({} blocks, {} bytes) to {}",
            version_id,
            version.blocks.len(),
            version.total_size,
            output.display()
        );

        let staging_dir = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut staged = NamedTempFile::new_in(staging_dir).map_err(|e| {
            Error::storage(format!("creating staging file in {}", staging_dir.display()), e)
        })?;

        self.write_blocks(&version, staged.as_file_mut(), state)?;

        staged
            .persist(output)
            .map_err(|e| Error::storage(format!("committing {}", output.display()), e.error))?;
        transition(state, RestoreState::Complete);

        let report = RestoreReport {
            version_id,
            output: output.to_path_buf(),
            bytes: version.total_size,
            blocks: version.blocks.len(),
            state: *state,
            duration_ms: start.elapsed().as_millis(),
        };
        info!("Restore of version {} completed in {} ms", version_id, report.duration_ms);
        Ok(report)
    }

    fn write_blocks(&self, version: &Version, file: &mut File, state: &mut RestoreState) -> Result<()> {
        let store = self.repo.blocks();
        let mut writer = BufWriter::new(&mut *file);
        let mut hasher = StreamHasher::new();

        for (index, fingerprint) in version.blocks.iter().enumerate() {
            transition(state, RestoreState::Verifying { block: index });
            let data = store.get(fingerprint)?;
            hasher.update(&data);
            writer
                .write_all(&data)
                .map_err(|e| Error::storage("writing restored data", e))?;
        }

        writer
            .flush()
            .map_err(|e| Error::storage("writing restored data", e))?;
        drop(writer);
        file.sync_all()
            .map_err(|e| Error::storage("syncing restored data", e))?;

        if hasher.bytes() != version.total_size {
            return Err(Error::Integrity {
                reason: format!(
                    "version {} reassembled to {} bytes, expected {}",
                    version.id,
                    hasher.bytes(),
                    version.total_size
                ),
            });
        }

        let restored_hash = hasher.finalize();
        if restored_hash != version.file_hash {
            return Err(Error::Integrity {
                reason: format!(
                    "version {} reassembled to hash {}, expected {}",
                    version.id, restored_hash, version.file_hash
                ),
            });
        }

        Ok(())
    }
}

fn transition(state: &mut RestoreState, next: RestoreState) {
    debug_assert!(!state.is_terminal(), "restore already finished");
    debug!(from = ?*state, to = ?next, "restore state");
    *state = next;
}
