//! # Hash - seeded 64-bit hashing, salt and pepper
//!
//! The store hashes every key under a per-database salt so that bucket
//! distribution cannot be predicted (or attacked) from key bytes alone. The
//! salt is drawn at create time and stored in the key-file header.
//!
//! The *pepper* is the salt hashed under a salt-seeded hasher. It is stored
//! next to the salt and re-derived at open time: if the stored pepper does
//! not match, the file was produced by a different hash function and cannot
//! be used.
//!
//! [`XxHasher`] (xxh64) is the production hasher; anything implementing
//! [`Hasher64`] can be plugged in, which is how tests force bucket
//! collisions.

use xxhash_rust::xxh64::Xxh64;

/// A streaming 64-bit hash function constructible from a 64-bit seed.
pub trait Hasher64 {
    fn with_seed(seed: u64) -> Self;

    /// Feeds `bytes` into the state.
    fn update(&mut self, bytes: &[u8]);

    /// Returns the digest of everything fed so far. Does not reset.
    fn finalize(&self) -> u64;
}

/// xxHash64.
#[derive(Clone)]
pub struct XxHasher(Xxh64);

impl Hasher64 for XxHasher {
    fn with_seed(seed: u64) -> Self {
        Self(Xxh64::new(seed))
    }

    fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    fn finalize(&self) -> u64 {
        self.0.digest()
    }
}

/// Returns a random salt for a new database.
pub fn make_salt() -> u64 {
    rand::random()
}

/// Returns a random uid for a new database.
pub fn make_uid() -> u64 {
    rand::random()
}

/// Computes the digest of `key` under a salt-seeded hasher.
pub fn key_digest<H: Hasher64>(key: &[u8], salt: u64) -> u64 {
    let mut h = H::with_seed(salt);
    h.update(key);
    h.finalize()
}

/// Computes the pepper: the salt, encoded as 8 big-endian bytes, hashed
/// under a hasher seeded with the salt itself.
pub fn pepper<H: Hasher64>(salt: u64) -> u64 {
    let mut h = H::with_seed(salt);
    h.update(&salt.to_be_bytes());
    h.finalize()
}
