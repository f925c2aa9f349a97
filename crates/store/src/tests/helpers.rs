use std::path::{Path, PathBuf};

use hash::Hasher64;
use vfs::OsFile;

use crate::{Error, Result, Store};

/// The three file paths of a database inside a test directory.
pub fn db_paths(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
    (
        dir.join("db.dat"),
        dir.join("db.key"),
        dir.join("db.log"),
    )
}

/// Creates a database with the default test geometry: 8-byte keys, 4096-byte
/// blocks, load factor 0.5, appnum 1, salt 42.
pub fn create_default(dir: &Path) -> Result<()> {
    let (dat, key, log) = db_paths(dir);
    Store::<hash::XxHasher, OsFile>::create(&dat, &key, &log, 1, 42, 8, 4096, 0.5)
}

/// Opens the database created by [`create_default`] with a 1 MiB arena.
pub fn open_default(dir: &Path) -> Result<Store> {
    let (dat, key, log) = db_paths(dir);
    Store::open(&dat, &key, &log, 1024 * 1024)
}

/// An 8-byte key derived from an integer.
pub fn key(i: u64) -> [u8; 8] {
    i.to_be_bytes()
}

/// A value whose content depends on the key it belongs to.
pub fn value(i: u64) -> Vec<u8> {
    format!("value-{i:08}").into_bytes()
}

/// Fetches a key into an owned buffer.
pub fn fetch_value<H: Hasher64>(store: &Store<H, OsFile>, key: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    store.fetch(key, |v| out.extend_from_slice(v))?;
    Ok(out)
}

/// Asserts that a fetch misses.
pub fn assert_not_found<H: Hasher64>(store: &Store<H, OsFile>, key: &[u8]) {
    match store.fetch(key, |_| panic!("sink invoked for a missing key")) {
        Err(Error::KeyNotFound) => {}
        other => panic!("expected KeyNotFound, got {other:?}"),
    }
}

/// A hasher that sends every key to the same digest, forcing all of them
/// into one bucket and its spill chain. Lookups then depend entirely on the
/// full key compare.
pub struct CollideHasher;

impl Hasher64 for CollideHasher {
    fn with_seed(_seed: u64) -> Self {
        CollideHasher
    }

    fn update(&mut self, _bytes: &[u8]) {}

    fn finalize(&self) -> u64 {
        0x0101_0101_0101_0101
    }
}
