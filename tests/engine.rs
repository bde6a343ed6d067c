//! Library-level tests across backup, restore and scrub.

use deltavault::{BackupEngine, Config, Error, Repository, RestoreEngine, Scrubber, Verification};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use std::thread;
use tempfile::TempDir;

fn config(root: &Path) -> Config {
    Config {
        storage_root: root.to_path_buf(),
        chunk_size: 1024,
        workers: 2,
        ..Config::default()
    }
}

#[test]
fn versions_chain_per_source_and_restore_independently() -> deltavault::Result<()> {
    let dir = TempDir::new().unwrap();
    let config = config(&dir.path().join("vault"));
    let repo = Repository::open(&config)?;
    let engine = BackupEngine::new(&repo, &config)?;

    let source = dir.path().join("doc.txt");
    fs::write(&source, "first draft ".repeat(300)).unwrap();
    let v1 = engine.run(&source)?.version;

    fs::write(&source, "second draft ".repeat(300)).unwrap();
    let v2 = engine.run(&source)?.version;

    assert_eq!(v1.parent_id, None);
    assert_eq!(v2.parent_id, Some(v1.id));
    assert!(v2.id > v1.id);

    let restorer = RestoreEngine::new(&repo);
    let out = dir.path().join("old.txt");
    restorer.restore(v1.id, &out)?;
    assert_eq!(fs::read_to_string(&out).unwrap(), "first draft ".repeat(300));

    assert!(Scrubber::new(&repo).run()?.is_clean());
    repo.close()
}

#[test]
fn concurrent_backups_get_distinct_ids() -> deltavault::Result<()> {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("vault");

    let handles: Vec<_> = (0..4)
        .map(|n| {
            let root = root.clone();
            let source = dir.path().join(format!("file-{}.bin", n));
            fs::write(&source, vec![n as u8; 5000]).unwrap();
            thread::spawn(move || -> deltavault::Result<u64> {
                let mut config = config(&root);
                config.verify_after_backup = false;
                let repo = Repository::open(&config)?;
                let engine = BackupEngine::new(&repo, &config)?;
                Ok(engine.run(&source)?.version.id)
            })
        })
        .collect();

    let mut ids: Vec<u64> = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect::<deltavault::Result<_>>()?;
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3, 4]);

    let repo = Repository::open_at(&root)?;
    // Each source is one repeated full block plus a tail
    assert_eq!(repo.blocks().block_count()?, 8);
    Ok(())
}

#[test]
fn truncated_block_is_reported_not_restored() -> deltavault::Result<()> {
    let dir = TempDir::new().unwrap();
    let config = config(&dir.path().join("vault"));
    let repo = Repository::open(&config)?;
    let engine = BackupEngine::new(&repo, &config)?;

    let source = dir.path().join("data.bin");
    fs::write(&source, (0..4000u32).flat_map(|i| i.to_le_bytes()).collect::<Vec<u8>>()).unwrap();
    let report = engine.run(&source)?;
    assert!(matches!(report.verification, Verification::Passed(_)));

    let victim = repo.blocks().block_path(&report.version.blocks[3]);
    let bytes = fs::read(&victim).unwrap();
    fs::write(&victim, &bytes[..bytes.len() / 2]).unwrap();

    let out = dir.path().join("out.bin");
    let result = RestoreEngine::new(&repo).restore(report.version.id, &out);
    assert!(matches!(result, Err(Error::Integrity { .. })));
    assert!(!out.exists());

    let scrub = Scrubber::new(&repo).run()?;
    assert_eq!(scrub.corrupted_blocks, vec![report.version.blocks[3]]);
    Ok(())
}
