use std::collections::BTreeMap;
use std::path::Path;

use super::helpers::*;
use crate::{recover, Error};

use anyhow::Result;
use format::{
    bucket_index, bucket_offset, key_file_size, maybe_spill, Bucket, Entry, KeyHeader, LogHeader,
    DAT_RECORD_PREFIX_SIZE, LOG_HEADER_SIZE,
};
use hash::{key_digest, XxHasher};
use tempfile::tempdir;
use vfs::{BulkWriter, File, OpenMode, OsFile};

/// Replays the flusher's commit protocol by hand up to a chosen crash
/// point, staging `pairs` as one epoch.
///
/// With `write_buckets` false the "crash" lands after the log sync but
/// before any key-file write; with it true, after the key-file write but
/// before the log truncation. Either way the log file is left behind.
fn interrupted_epoch(
    dir: &Path,
    pairs: &[(Vec<u8>, Vec<u8>)],
    write_buckets: bool,
) -> Result<u64> {
    let (dat, key, log) = db_paths(dir);
    let df = OsFile::open(OpenMode::Append, &dat)?;
    let kf = OsFile::open(OpenMode::Write, &key)?;
    let lf = OsFile::create(OpenMode::Append, &log)?;

    let kh = KeyHeader::read(&kf)?;
    let dat_size = df.size()?;

    // Data records first, grouped by bucket.
    let mut dw = BulkWriter::new(&df, dat_size, 1 << 16);
    let mut buckets: BTreeMap<u64, Vec<Entry>> = BTreeMap::new();
    for (k, v) in pairs {
        let h = key_digest::<XxHasher>(k, kh.salt);
        let offset = dw.offset();
        let mut os = dw.prepare(DAT_RECORD_PREFIX_SIZE + k.len() + v.len())?;
        os.write_u48(v.len() as u64)?;
        os.data(k)?;
        os.data(v)?;
        buckets
            .entry(bucket_index(h, kh.buckets, kh.modulus))
            .or_default()
            .push(Entry {
                offset,
                size: v.len() as u64,
                hash: h,
            });
    }
    dw.flush()?;
    df.sync()?;

    // Log header plus pre-images; bucket mutations in memory.
    let lh = LogHeader {
        version: kh.version,
        uid: kh.uid,
        appnum: kh.appnum,
        key_size: kh.key_size,
        salt: kh.salt,
        pepper: kh.pepper,
        block_size: kh.block_size,
        key_file_size: key_file_size(kh.buckets, kh.block_size),
        dat_file_size: dat_size,
    };
    let mut lw = BulkWriter::new(&lf, 0, 1 << 16);
    lw.prepare(LOG_HEADER_SIZE as usize)?.data(&lh.encode()?)?;

    let mut mutated = Vec::new();
    for (&n, entries) in &buckets {
        let mut block = vec![0u8; kh.block_size as usize];
        read_bucket_block(&kf, n, &kh, &mut block)?;
        let mut os = lw.prepare(codec::SIZE_U64 + kh.block_size as usize)?;
        os.write_u64(n)?;
        os.data(&block)?;
        let mut b = Bucket::existing(&mut block)?;
        for e in entries {
            maybe_spill(&mut b, &mut dw)?;
            b.insert(e.offset, e.size, e.hash);
        }
        drop(b);
        mutated.push((n, block));
    }
    dw.flush()?;
    df.sync()?;
    lw.flush()?;
    lf.sync()?;

    if write_buckets {
        for (n, block) in &mutated {
            kf.write_at(bucket_offset(*n, kh.block_size), block)?;
        }
        kf.sync()?;
    }
    // Crash: the log is never truncated.
    Ok(dat_size)
}

fn read_bucket_block(kf: &OsFile, n: u64, kh: &KeyHeader, block: &mut [u8]) -> Result<()> {
    kf.read_at(bucket_offset(n, kh.block_size), block)?;
    Ok(())
}

/// A committed database holding keys 0..count.
fn committed_db(dir: &Path, count: u64) -> Result<()> {
    create_default(dir)?;
    let store = open_default(dir)?;
    for i in 0..count {
        store.insert(&key(i), &value(i))?;
    }
    store.close()?;
    Ok(())
}

fn run_recover(dir: &Path) -> crate::Result<()> {
    let (dat, key, log) = db_paths(dir);
    recover::<XxHasher, OsFile, _>(&dat, &key, &log)
}

// --------------------- Recovery ---------------------

#[test]
fn recover_without_log_is_a_noop() -> Result<()> {
    let dir = tempdir()?;
    committed_db(dir.path(), 10)?;
    run_recover(dir.path())?;

    let store = open_default(dir.path())?;
    for i in 0..10 {
        assert_eq!(fetch_value(&store, &key(i))?, value(i));
    }
    store.close()?;
    Ok(())
}

#[test]
fn crash_after_key_writes_rolls_the_epoch_back() -> Result<()> {
    let dir = tempdir()?;
    committed_db(dir.path(), 20)?;
    let staged: Vec<_> = (100..110).map(|i| (key(i).to_vec(), value(i))).collect();
    let pre_size = interrupted_epoch(dir.path(), &staged, true)?;

    run_recover(dir.path())?;
    let (dat, _, log) = db_paths(dir.path());
    assert!(!log.exists());
    assert_eq!(std::fs::metadata(&dat)?.len(), pre_size);

    let store = open_default(dir.path())?;
    // The committed epoch is intact; the interrupted one vanished whole.
    for i in 0..20 {
        assert_eq!(fetch_value(&store, &key(i))?, value(i));
    }
    for i in 100..110 {
        assert_not_found(&store, &key(i));
    }
    store.close()?;
    Ok(())
}

#[test]
fn crash_before_key_writes_truncates_the_data_file() -> Result<()> {
    let dir = tempdir()?;
    committed_db(dir.path(), 20)?;
    let staged: Vec<_> = (100..110).map(|i| (key(i).to_vec(), value(i))).collect();
    let pre_size = interrupted_epoch(dir.path(), &staged, false)?;

    run_recover(dir.path())?;
    let (dat, _, _) = db_paths(dir.path());
    assert_eq!(std::fs::metadata(&dat)?.len(), pre_size);

    let store = open_default(dir.path())?;
    for i in 0..20 {
        assert_eq!(fetch_value(&store, &key(i))?, value(i));
    }
    for i in 100..110 {
        assert_not_found(&store, &key(i));
    }
    store.close()?;
    Ok(())
}

#[test]
fn recovery_is_idempotent() -> Result<()> {
    let dir = tempdir()?;
    committed_db(dir.path(), 5)?;
    let staged: Vec<_> = (50..55).map(|i| (key(i).to_vec(), value(i))).collect();
    interrupted_epoch(dir.path(), &staged, true)?;

    run_recover(dir.path())?;
    // The second run sees no log and must change nothing.
    run_recover(dir.path())?;

    let store = open_default(dir.path())?;
    for i in 0..5 {
        assert_eq!(fetch_value(&store, &key(i))?, value(i));
    }
    for i in 50..55 {
        assert_not_found(&store, &key(i));
    }
    store.close()?;
    Ok(())
}

#[test]
fn header_only_log_commits_nothing_back() -> Result<()> {
    let dir = tempdir()?;
    committed_db(dir.path(), 10)?;
    let (dat, key_path, log) = db_paths(dir.path());
    let committed_size = std::fs::metadata(&dat)?.len();

    // A log truncated to its header is exactly what a committed epoch
    // leaves behind an instant before close erases it. Its recorded data
    // size is stale and must not be applied.
    let kf = OsFile::open(OpenMode::Read, &key_path)?;
    let kh = KeyHeader::read(&kf)?;
    let lh = LogHeader {
        version: kh.version,
        uid: kh.uid,
        appnum: kh.appnum,
        key_size: kh.key_size,
        salt: kh.salt,
        pepper: kh.pepper,
        block_size: kh.block_size,
        key_file_size: key_file_size(kh.buckets, kh.block_size),
        dat_file_size: format::DAT_HEADER_SIZE, // stale: pre-insert size
    };
    let lf = OsFile::create(OpenMode::Append, &log)?;
    lh.write(&lf)?;
    lf.sync()?;
    drop(lf);

    run_recover(dir.path())?;
    assert!(!log.exists());
    assert_eq!(std::fs::metadata(&dat)?.len(), committed_size);

    let store = open_default(dir.path())?;
    for i in 0..10 {
        assert_eq!(fetch_value(&store, &key(i))?, value(i));
    }
    store.close()?;
    Ok(())
}

#[test]
fn truncated_log_header_is_treated_as_clean() -> Result<()> {
    let dir = tempdir()?;
    committed_db(dir.path(), 10)?;
    let (dat, _, log) = db_paths(dir.path());
    let committed_size = std::fs::metadata(&dat)?.len();

    // Crash while the very first header write was in flight.
    let lf = OsFile::create(OpenMode::Append, &log)?;
    lf.write_at(0, &[0xab; 17])?;
    drop(lf);

    run_recover(dir.path())?;
    assert!(!log.exists());
    assert_eq!(std::fs::metadata(&dat)?.len(), committed_size);
    Ok(())
}

#[test]
fn foreign_log_is_rejected() -> Result<()> {
    let a = tempdir()?;
    let b = tempdir()?;
    committed_db(a.path(), 5)?;
    committed_db(b.path(), 5)?;

    // Interrupt an epoch on b, then graft b's log onto a.
    let staged: Vec<_> = (50..52).map(|i| (key(i).to_vec(), value(i))).collect();
    interrupted_epoch(b.path(), &staged, false)?;
    let (_, _, log_b) = db_paths(b.path());
    let (dat_a, key_a, log_a) = db_paths(a.path());
    std::fs::copy(&log_b, &log_a)?;

    match recover::<XxHasher, OsFile, _>(&dat_a, &key_a, &log_a) {
        Err(Error::MismatchedRecovery) => {}
        other => panic!("expected MismatchedRecovery, got {other:?}"),
    }
    Ok(())
}

#[test]
fn open_after_crash_demands_recovery_then_succeeds() -> Result<()> {
    let dir = tempdir()?;
    committed_db(dir.path(), 8)?;
    let staged: Vec<_> = (80..84).map(|i| (key(i).to_vec(), value(i))).collect();
    interrupted_epoch(dir.path(), &staged, true)?;

    match open_default(dir.path()) {
        Err(Error::RecoverNeeded) => {}
        other => panic!("expected RecoverNeeded, got {:?}", other.err()),
    }

    run_recover(dir.path())?;
    let store = open_default(dir.path())?;
    for i in 0..8 {
        assert_eq!(fetch_value(&store, &key(i))?, value(i));
    }
    store.close()?;
    Ok(())
}

#[test]
fn recovered_store_accepts_new_inserts() -> Result<()> {
    let dir = tempdir()?;
    committed_db(dir.path(), 5)?;
    let staged: Vec<_> = (50..53).map(|i| (key(i).to_vec(), value(i))).collect();
    interrupted_epoch(dir.path(), &staged, true)?;
    run_recover(dir.path())?;

    // Keys from the rolled-back epoch are free for re-insertion.
    let store = open_default(dir.path())?;
    store.insert(&key(50), b"second try")?;
    store.close()?;

    let store = open_default(dir.path())?;
    assert_eq!(fetch_value(&store, &key(50))?, b"second try");
    store.close()?;
    Ok(())
}
