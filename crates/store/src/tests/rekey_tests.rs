use super::helpers::*;
use crate::{rekey, Error, Store};

use anyhow::Result;
use format::{key_file_size, KeyHeader};
use hash::XxHasher;
use tempfile::tempdir;
use vfs::{File, OpenMode, OsFile};

#[test]
fn rekey_rebuilds_a_fetchable_table() -> Result<()> {
    let dir = tempdir()?;
    create_default(dir.path())?;

    let store = open_default(dir.path())?;
    for i in 0..100 {
        store.insert(&key(i), &value(i))?;
    }
    store.close()?;

    // Throw the key file away and rebuild it with small blocks and a small
    // window, forcing several passes over the data file.
    let (dat, key_path, log) = db_paths(dir.path());
    OsFile::erase(&key_path)?;
    rekey::<XxHasher, OsFile, _>(&dat, &key_path, 100, 128, 0.5, 4096)?;

    // capacity 6, load factor 0.5: 100 items want ceil(100 / 3) buckets.
    let kf = OsFile::open(OpenMode::Read, &key_path)?;
    let kh = KeyHeader::read(&kf)?;
    assert_eq!(kh.buckets, 34);
    assert_eq!(kh.modulus, 64);
    assert!(kf.size()? >= key_file_size(34, 128));
    drop(kf);

    let store = Store::<XxHasher, OsFile>::open(&dat, &key_path, &log, 1024 * 1024)?;
    for i in 0..100 {
        assert_eq!(fetch_value(&store, &key(i))?, value(i), "key {i}");
    }
    assert_not_found(&store, &key(100));
    store.close()?;
    Ok(())
}

#[test]
fn rekey_skips_stale_spill_records() -> Result<()> {
    let dir = tempdir()?;
    let (dat, key_path, log) = db_paths(dir.path());

    // Build a data file full of spill records by colliding every key.
    Store::<CollideHasher, OsFile>::create(&dat, &key_path, &log, 1, 42, 8, 128, 0.5)?;
    let store = Store::<CollideHasher, OsFile>::open(&dat, &key_path, &log, 1024 * 1024)?;
    for i in 0..50 {
        store.insert(&key(i), &value(i))?;
    }
    store.close()?;

    // The rebuilt table must index exactly the data records, treating the
    // old spill records as dead weight.
    OsFile::erase(&key_path)?;
    rekey::<CollideHasher, OsFile, _>(&dat, &key_path, 50, 128, 0.5, 64 * 1024)?;

    let store = Store::<CollideHasher, OsFile>::open(&dat, &key_path, &log, 1024 * 1024)?;
    for i in 0..50 {
        assert_eq!(fetch_value(&store, &key(i))?, value(i), "key {i}");
    }
    store.close()?;
    Ok(())
}

#[test]
fn rekey_refuses_to_overwrite_a_key_file() -> Result<()> {
    let dir = tempdir()?;
    create_default(dir.path())?;
    let (dat, key_path, _) = db_paths(dir.path());

    match rekey::<XxHasher, OsFile, _>(&dat, &key_path, 10, 4096, 0.5, 4096) {
        Err(Error::FileExists) => {}
        other => panic!("expected FileExists, got {other:?}"),
    }
    Ok(())
}

#[test]
fn rekey_of_an_empty_data_file_yields_an_empty_store() -> Result<()> {
    let dir = tempdir()?;
    create_default(dir.path())?;
    let (dat, key_path, log) = db_paths(dir.path());

    OsFile::erase(&key_path)?;
    rekey::<XxHasher, OsFile, _>(&dat, &key_path, 0, 4096, 0.5, 4096)?;

    let store = Store::<XxHasher, OsFile>::open(&dat, &key_path, &log, 1024 * 1024)?;
    assert_not_found(&store, &key(1));
    store.close()?;
    Ok(())
}
