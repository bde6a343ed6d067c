//! Content-addressed, write-once block storage.
//!
//! Layout under the storage root:
//!
//! ```text
//! blocks/<64 hex chars>   one immutable zstd frame per unique block
//! tmp/                    staging area for in-flight writes
//! ```
//!
//! The fingerprint is taken over the uncompressed bytes. Blocks are
//! compressed, staged in `tmp/` and moved into `blocks/` with a no-clobber
//! rename, so a reader never observes a partially written block and two
//! writers racing on the same new block both succeed. Every read
//! decompresses and re-hashes the bytes against the file name.

use crate::hash::Fingerprint;
use crate::{Error, Result};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, trace};

/// zstd level used when none is configured
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Highest standard zstd level
pub const MAX_COMPRESSION_LEVEL: i32 = 22;

/// Result of [`BlockStore::put`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOutcome {
    pub fingerprint: Fingerprint,
    /// Uncompressed length
    pub size: u64,
    /// Length of the compressed file in `blocks/`
    pub stored_size: u64,
    /// False when the block was already present and nothing was written
    pub written: bool,
}

/// Sizes of a block that passed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub size: u64,
    pub stored_size: u64,
}

/// Persistent store of unique blocks named by their fingerprint
#[derive(Debug)]
pub struct BlockStore {
    blocks_path: PathBuf,
    staging_path: PathBuf,
    compression_level: i32,
}

impl BlockStore {
    /// Open (creating if needed) the block store under `root`
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let blocks_path = root.join("blocks");
        let staging_path = root.join("tmp");

        for dir in [&blocks_path, &staging_path] {
            fs::create_dir_all(dir)
                .map_err(|e| Error::storage(format!("creating {}", dir.display()), e))?;
        }

        Ok(Self {
            blocks_path,
            staging_path,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        })
    }

    /// Level applied to blocks written from now on; existing blocks are
    /// readable whatever level they were written with
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Store a block unless one with the same fingerprint already exists.
    ///
    /// Existing bytes are never compared or rewritten: identity is the
    /// fingerprint alone.
    pub fn put(&self, data: &[u8]) -> Result<PutOutcome> {
        let fingerprint = Fingerprint::of(data);
        let size = data.len() as u64;
        let path = self.block_path(&fingerprint);

        if self.exists(&fingerprint) {
            trace!(block = %fingerprint, "block already stored");
            return Ok(PutOutcome {
                fingerprint,
                size,
                stored_size: stored_len(&path)?,
                written: false,
            });
        }

        let compressed = zstd::encode_all(data, self.compression_level)
            .map_err(|e| Error::storage(format!("compressing block {}", fingerprint), e))?;

        let mut staged = NamedTempFile::new_in(&self.staging_path)
            .map_err(|e| Error::storage("creating staging file", e))?;
        staged
            .write_all(&compressed)
            .and_then(|_| staged.as_file().sync_all())
            .map_err(|e| Error::storage(format!("writing block {}", fingerprint), e))?;

        let written = match staged.persist_noclobber(&path) {
            Ok(_) => true,
            // Another writer committed the same block first; the staged copy
            // is dropped with the error.
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => false,
            Err(e) => {
                return Err(Error::storage(
                    format!("committing block {}", fingerprint),
                    e.error,
                ))
            }
        };

        let stored_size = if written {
            compressed.len() as u64
        } else {
            stored_len(&path)?
        };

        debug!(block = %fingerprint, size, stored_size, written, "stored block");
        Ok(PutOutcome {
            fingerprint,
            size,
            stored_size,
            written,
        })
    }

    /// Read a block and verify it still hashes to its name
    pub fn get(&self, fingerprint: &Fingerprint) -> Result<Vec<u8>> {
        self.read_block(fingerprint).map(|(data, _)| data)
    }

    /// Decompress and re-hash a stored block without keeping its bytes
    pub fn verify(&self, fingerprint: &Fingerprint) -> Result<BlockInfo> {
        self.read_block(fingerprint).map(|(data, stored_size)| BlockInfo {
            size: data.len() as u64,
            stored_size,
        })
    }

    fn read_block(&self, fingerprint: &Fingerprint) -> Result<(Vec<u8>, u64)> {
        let path = self.block_path(fingerprint);
        let stored = fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::BlockMissing {
                fingerprint: fingerprint.to_hex(),
            },
            _ => Error::storage(format!("reading block {}", fingerprint), e),
        })?;

        let data = zstd::decode_all(stored.as_slice()).map_err(|e| Error::Integrity {
            reason: format!("block {} is corrupted: {}", fingerprint, e),
        })?;

        let actual = Fingerprint::of(&data);
        if actual != *fingerprint {
            return Err(Error::Integrity {
                reason: format!(
                    "block {} is corrupted: contents hash to {}",
                    fingerprint, actual
                ),
            });
        }

        Ok((data, stored.len() as u64))
    }

    pub fn exists(&self, fingerprint: &Fingerprint) -> bool {
        self.block_path(fingerprint).is_file()
    }

    /// Fingerprints of every entry in `blocks/`.
    ///
    /// Files whose names are not fingerprints are skipped.
    pub fn list(&self) -> Result<Vec<Fingerprint>> {
        let entries = fs::read_dir(&self.blocks_path)
            .map_err(|e| Error::storage(format!("listing {}", self.blocks_path.display()), e))?;

        let mut blocks = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::storage("listing blocks", e))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            let name = entry.file_name();
            match (is_file, name.to_str().map(str::parse::<Fingerprint>)) {
                (true, Some(Ok(fp))) => blocks.push(fp),
                _ => debug!(entry = ?name, "ignoring non-block entry"),
            }
        }

        blocks.sort();
        Ok(blocks)
    }

    pub fn block_count(&self) -> Result<usize> {
        self.list().map(|blocks| blocks.len())
    }

    pub fn block_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.blocks_path.join(fingerprint.to_hex())
    }

    pub fn blocks_path(&self) -> &Path {
        &self.blocks_path
    }

    /// Flush directory entries so committed renames survive a crash
    pub fn sync(&self) -> Result<()> {
        sync_dir(&self.blocks_path)
    }
}

fn stored_len(path: &Path) -> Result<u64> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| Error::storage(format!("reading {}", path.display()), e))
}

#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| Error::storage(format!("syncing {}", dir.display()), e))
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_put_then_get() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = BlockStore::open(temp_dir.path())?;

        let outcome = store.put(b"test block data")?;
        assert!(outcome.written);
        assert_eq!(outcome.size, 15);
        assert!(store.exists(&outcome.fingerprint));
        assert_eq!(store.get(&outcome.fingerprint)?, b"test block data");
        assert_eq!(
            store.block_path(&outcome.fingerprint),
            temp_dir.path().join("blocks").join(outcome.fingerprint.to_hex())
        );
        Ok(())
    }

    #[test]
    fn test_second_put_is_a_noop() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = BlockStore::open(temp_dir.path())?;

        let first = store.put(b"same bytes")?;
        let second = store.put(b"same bytes")?;

        assert!(first.written);
        assert!(!second.written);
        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!(store.block_count()?, 1);
        Ok(())
    }

    #[test]
    fn test_corrupted_block_fails_integrity() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = BlockStore::open(temp_dir.path())?;

        let outcome = store.put(b"test data for integrity")?;
        fs::write(store.block_path(&outcome.fingerprint), b"corrupted data").unwrap();

        let result = store.get(&outcome.fingerprint);
        assert!(matches!(result, Err(Error::Integrity { .. })));
        assert!(store.verify(&outcome.fingerprint).is_err());
        Ok(())
    }

    #[test]
    fn test_blocks_are_compressed_on_disk() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = BlockStore::open(temp_dir.path())?;
        let data = b"compressible ".repeat(4096);

        let outcome = store.put(&data)?;
        let on_disk = fs::read(store.block_path(&outcome.fingerprint)).unwrap();

        assert_eq!(outcome.fingerprint, Fingerprint::of(&data));
        assert_eq!(outcome.size, data.len() as u64);
        assert_eq!(outcome.stored_size, on_disk.len() as u64);
        assert!(outcome.stored_size < outcome.size);
        assert_ne!(on_disk, data);

        let info = store.verify(&outcome.fingerprint)?;
        assert_eq!(
            info,
            BlockInfo {
                size: outcome.size,
                stored_size: outcome.stored_size,
            }
        );

        // dedup reports the size already on disk
        let again = store.put(&data)?;
        assert!(!again.written);
        assert_eq!(again.stored_size, outcome.stored_size);
        Ok(())
    }

    #[test]
    fn test_valid_frame_with_wrong_contents_fails_integrity() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = BlockStore::open(temp_dir.path())?;

        let outcome = store.put(b"original block")?;
        let impostor = zstd::encode_all(&b"different block"[..], DEFAULT_COMPRESSION_LEVEL).unwrap();
        fs::write(store.block_path(&outcome.fingerprint), impostor).unwrap();

        let result = store.get(&outcome.fingerprint);
        assert!(matches!(result, Err(Error::Integrity { .. })));
        Ok(())
    }

    #[test]
    fn test_compression_level_is_applied() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = BlockStore::open(temp_dir.path())?.with_compression_level(19);

        let outcome = store.put(&[9u8; 10_000])?;
        assert_eq!(store.get(&outcome.fingerprint)?, vec![9u8; 10_000]);
        Ok(())
    }

    #[test]
    fn test_missing_block() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = BlockStore::open(temp_dir.path())?;

        let result = store.get(&Fingerprint::of(b"never stored"));
        assert!(matches!(result, Err(Error::BlockMissing { .. })));
        Ok(())
    }

    #[test]
    fn test_list_skips_foreign_files() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = BlockStore::open(temp_dir.path())?;

        let a = store.put(b"a")?.fingerprint;
        let b = store.put(b"b")?.fingerprint;
        fs::write(store.blocks_path().join("README"), b"not a block").unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(store.list()?, expected);
        Ok(())
    }

    #[test]
    fn test_staging_leaves_no_files_behind() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = BlockStore::open(temp_dir.path())?;

        store.put(b"one")?;
        store.put(b"one")?;
        store.put(b"two")?;

        let staged = fs::read_dir(temp_dir.path().join("tmp")).unwrap().count();
        assert_eq!(staged, 0);
        Ok(())
    }

    #[test]
    fn test_concurrent_writers_of_same_block() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(BlockStore::open(temp_dir.path())?);
        let data = Arc::new(vec![42u8; 64 * 1024]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let data = Arc::clone(&data);
                std::thread::spawn(move || store.put(&data))
            })
            .collect();

        let outcomes: Vec<PutOutcome> = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Result<_>>()?;

        assert!(outcomes.iter().any(|o| o.written));
        assert_eq!(store.block_count()?, 1);
        assert_eq!(store.get(&outcomes[0].fingerprint)?, *data);
        Ok(())
    }
}
