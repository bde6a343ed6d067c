//! The storage handle shared by every engine.
//!
//! A `Repository` is opened once per process, borrowed by the backup,
//! restore and scrub engines, and closed explicitly so directory entries
//! are flushed before exit.

use crate::config::Config;
use crate::manifest::VersionManifest;
use crate::store::BlockStore;
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug)]
pub struct Repository {
    root: PathBuf,
    blocks: BlockStore,
    manifest: VersionManifest,
}

impl Repository {
    /// Open the repository described by `config`, creating its layout
    pub fn open(config: &Config) -> Result<Self> {
        let mut repo = Self::open_at(&config.storage_root)?;
        repo.blocks = repo.blocks.with_compression_level(config.compression_level);
        Ok(repo)
    }

    pub fn open_at<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .map_err(|e| Error::storage(format!("creating {}", root.display()), e))?;

        let blocks = BlockStore::open(&root)?;
        let manifest = VersionManifest::open(&root)?;

        debug!("Opened repository at {}", root.display());
        Ok(Self {
            root,
            blocks,
            manifest,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    pub fn manifest(&self) -> &VersionManifest {
        &self.manifest
    }

    /// Flush directory metadata and release the handle
    pub fn close(self) -> Result<()> {
        self.blocks.sync()?;
        self.manifest.sync()?;
        info!("Closed repository at {}", self.root.display());
        Ok(())
    }
}
