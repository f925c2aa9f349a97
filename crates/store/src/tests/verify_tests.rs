use super::helpers::*;
use crate::{verify, visit, Error, Store};

use anyhow::Result;
use codec::{SIZE_U48, SIZE_U64};
use format::bucket_offset;
use hash::XxHasher;
use tempfile::tempdir;
use vfs::{File, OpenMode, OsFile};

const READ_SIZE: usize = 64 * 1024;

#[test]
fn verify_accepts_a_healthy_store() -> Result<()> {
    let dir = tempdir()?;
    create_default(dir.path())?;
    let store = open_default(dir.path())?;
    let mut bytes = 0u64;
    for i in 0..30 {
        store.insert(&key(i), &value(i))?;
        bytes += value(i).len() as u64;
    }
    store.close()?;

    let (dat, key_path, _) = db_paths(dir.path());
    let info = verify::<XxHasher, OsFile, _>(&dat, &key_path, READ_SIZE)?;

    assert_eq!(info.key_count, 30);
    assert_eq!(info.value_count, 30);
    assert_eq!(info.value_bytes, bytes);
    assert_eq!(info.buckets, 1);
    assert_eq!(info.spill_count, 0);
    assert_eq!(info.spill_count_tot, 0);
    assert_eq!(info.waste, 0.0);
    // Everything sits in the base bucket: one read per fetch.
    assert_eq!(info.avg_fetch, 1.0);
    assert!(info.actual_load > 0.0);
    assert_eq!(info.hist[0], 1);
    Ok(())
}

#[test]
fn verify_counts_spill_chains() -> Result<()> {
    let dir = tempdir()?;
    let (dat, key_path, log) = db_paths(dir.path());
    Store::<CollideHasher, OsFile>::create(&dat, &key_path, &log, 1, 42, 8, 128, 0.5)?;
    let store = Store::<CollideHasher, OsFile>::open(&dat, &key_path, &log, 1024 * 1024)?;
    for i in 0..50 {
        store.insert(&key(i), &value(i))?;
    }
    store.close()?;

    let info = verify::<CollideHasher, OsFile, _>(&dat, &key_path, READ_SIZE)?;
    assert_eq!(info.key_count, 50);
    assert_eq!(info.value_count, 50);
    assert!(info.spill_count >= 2);
    // All spills hang off live chains, so none are wasted.
    assert_eq!(info.spill_count, info.spill_count_tot);
    assert_eq!(info.waste, 0.0);
    // Chained lookups cost more than one bucket read on average.
    assert!(info.avg_fetch > 1.0);
    // The one bucket has a long chain.
    assert_eq!(info.hist.iter().sum::<u64>(), 1);
    assert_eq!(info.hist[0], 0);
    Ok(())
}

#[test]
fn verify_flags_a_corrupted_entry_hash() -> Result<()> {
    let dir = tempdir()?;
    create_default(dir.path())?;
    let store = open_default(dir.path())?;
    for i in 0..5 {
        store.insert(&key(i), &value(i))?;
    }
    store.close()?;

    // Flip a byte inside the first entry's stored hash. With a single
    // bucket the index check cannot fire, but re-hashing the key exposes
    // the damage.
    let (dat, key_path, _) = db_paths(dir.path());
    let kf = OsFile::open(OpenMode::Write, &key_path)?;
    let at = bucket_offset(0, 4096) + format::BUCKET_HEADER_SIZE as u64 + (2 * SIZE_U48) as u64;
    let mut byte = [0u8; 1];
    kf.read_at(at, &mut byte)?;
    kf.write_at(at, &[byte[0] ^ 0xff])?;
    drop(kf);

    match verify::<XxHasher, OsFile, _>(&dat, &key_path, READ_SIZE) {
        Err(Error::DigestMismatch) => {}
        other => panic!("expected DigestMismatch, got {:?}", other.err()),
    }
    Ok(())
}

#[test]
fn verify_flags_a_corrupted_entry_size() -> Result<()> {
    let dir = tempdir()?;
    create_default(dir.path())?;
    let store = open_default(dir.path())?;
    for i in 0..5 {
        store.insert(&key(i), &value(i))?;
    }
    store.close()?;

    // Corrupt the low byte of the first entry's size field.
    let (dat, key_path, _) = db_paths(dir.path());
    let kf = OsFile::open(OpenMode::Write, &key_path)?;
    let at = bucket_offset(0, 4096) + format::BUCKET_HEADER_SIZE as u64 + (2 * SIZE_U48 - 1) as u64;
    let mut byte = [0u8; 1];
    kf.read_at(at, &mut byte)?;
    kf.write_at(at, &[byte[0] ^ 0x55])?;
    drop(kf);

    match verify::<XxHasher, OsFile, _>(&dat, &key_path, READ_SIZE) {
        Err(Error::SizeMismatch) => {}
        other => panic!("expected SizeMismatch, got {:?}", other.err()),
    }
    Ok(())
}

#[test]
fn verify_detects_a_tampered_pepper() -> Result<()> {
    let dir = tempdir()?;
    create_default(dir.path())?;
    open_default(dir.path())?.close()?;

    // The pepper sits after tag, version, uid, appnum, key_size, salt.
    let (dat, key_path, _) = db_paths(dir.path());
    let pepper_at = (8 + 2 + SIZE_U64 + SIZE_U64 + 2 + SIZE_U64) as u64;
    let kf = OsFile::open(OpenMode::Write, &key_path)?;
    let mut byte = [0u8; 1];
    kf.read_at(pepper_at, &mut byte)?;
    kf.write_at(pepper_at, &[byte[0] ^ 0x01])?;
    drop(kf);

    match verify::<XxHasher, OsFile, _>(&dat, &key_path, READ_SIZE) {
        Err(Error::Format(format::Error::HashMismatch)) => {}
        other => panic!("expected HashMismatch, got {:?}", other.err()),
    }
    Ok(())
}

// --------------------- Visit ---------------------

#[test]
fn visit_sees_every_record_once() -> Result<()> {
    let dir = tempdir()?;
    create_default(dir.path())?;
    let store = open_default(dir.path())?;
    for i in 0..25 {
        store.insert(&key(i), &value(i))?;
    }
    store.close()?;

    let (dat, _, _) = db_paths(dir.path());
    let mut seen = Vec::new();
    visit::<OsFile, _, _>(&dat, READ_SIZE, |k, v| {
        seen.push((k.to_vec(), v.to_vec()));
        true
    })?;

    assert_eq!(seen.len(), 25);
    seen.sort();
    for (i, (k, v)) in seen.iter().enumerate() {
        assert_eq!(k, &key(i as u64));
        assert_eq!(v, &value(i as u64));
    }
    Ok(())
}

#[test]
fn visit_steps_over_spill_records() -> Result<()> {
    let dir = tempdir()?;
    let (dat, key_path, log) = db_paths(dir.path());
    Store::<CollideHasher, OsFile>::create(&dat, &key_path, &log, 1, 42, 8, 128, 0.5)?;
    let store = Store::<CollideHasher, OsFile>::open(&dat, &key_path, &log, 1024 * 1024)?;
    for i in 0..50 {
        store.insert(&key(i), &value(i))?;
    }
    store.close()?;

    // The data file is littered with spill records; only the fifty data
    // records may reach the callback.
    let mut count = 0;
    visit::<OsFile, _, _>(&dat, READ_SIZE, |_, _| {
        count += 1;
        true
    })?;
    assert_eq!(count, 50);
    Ok(())
}

#[test]
fn visit_stops_when_the_callback_declines() -> Result<()> {
    let dir = tempdir()?;
    create_default(dir.path())?;
    let store = open_default(dir.path())?;
    for i in 0..10 {
        store.insert(&key(i), &value(i))?;
    }
    store.close()?;

    let (dat, _, _) = db_paths(dir.path());
    let mut count = 0;
    visit::<OsFile, _, _>(&dat, READ_SIZE, |_, _| {
        count += 1;
        count < 3
    })?;
    assert_eq!(count, 3);
    Ok(())
}
