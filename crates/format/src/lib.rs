//! # Format - the on-disk layout of the file triplet
//!
//! A database is three files. All integers are big-endian; every file opens
//! with a 64-byte header whose first eight bytes are an ASCII type tag.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ DATA FILE ("nudb.dat"): immutable append-only record log     │
//! │                                                              │
//! │ header (64 B)                                                │
//! │ data record:  size:48 (>0) | key[key_size] | value[size]     │
//! │ spill record: size:48 (=0) | bucket_size:16 | bucket bytes   │
//! │ ... records appended forever, never rewritten ...            │
//! ├──────────────────────────────────────────────────────────────┤
//! │ KEY FILE ("nudb.key"): fixed-size open-addressing table      │
//! │                                                              │
//! │ header block (block_size B, header in its first 64 B)        │
//! │ bucket block 0..buckets-1, each exactly block_size B:        │
//! │   count:16 | spill:48 | entries...                           │
//! │   entry: offset:48 | size:48 | hash:64    (20 B)             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ LOG FILE ("nudb.log"): pre-image intent log                  │
//! │                                                              │
//! │ header (64 B, records pre-epoch file sizes)                  │
//! │ pre-image: bucket_index:64 | block bytes[block_size]         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A bucket's `spill` field, when nonzero, is the data-file offset of a spill
//! record holding the bucket's overflow; spill records chain through their
//! own payload's `spill` field. Entries inside a bucket are kept sorted by
//! hash so a lookup can binary-search and a flush merges deterministically.

mod bucket;
mod header;

pub use bucket::{load_spill, maybe_spill, Bucket, Entry};
pub use header::{DatHeader, KeyHeader, LogHeader};

use thiserror::Error;

/// Eight-byte type tags identifying each member of the triplet.
pub const DAT_TYPE: &[u8; 8] = b"nudb.dat";
pub const KEY_TYPE: &[u8; 8] = b"nudb.key";
pub const LOG_TYPE: &[u8; 8] = b"nudb.log";

/// On-disk format version written by this implementation.
pub const CURRENT_VERSION: u16 = 2;

/// Every header occupies exactly 64 bytes; reserved tail bytes are zero.
pub const DAT_HEADER_SIZE: u64 = 64;
pub const KEY_HEADER_SIZE: u64 = 64;
pub const LOG_HEADER_SIZE: u64 = 64;

/// Bytes of bucket-block header: count:16 | spill:48.
pub const BUCKET_HEADER_SIZE: usize = codec::SIZE_U16 + codec::SIZE_U48;

/// Bytes per bucket entry: offset:48 | size:48 | hash:64.
pub const BUCKET_ENTRY_SIZE: usize = codec::SIZE_U48 + codec::SIZE_U48 + codec::SIZE_U64;

/// Bytes preceding a spill record's payload: size:48 (zero) | bucket_size:16.
pub const SPILL_PREFIX_SIZE: usize = codec::SIZE_U48 + codec::SIZE_U16;

/// Bytes preceding a data record's key: the 48-bit value size.
pub const DAT_RECORD_PREFIX_SIZE: usize = codec::SIZE_U48;

/// Smallest and largest legal block sizes. The lower bound keeps the key-file
/// header inside block zero; the upper bound keeps the field in 16 bits.
pub const MIN_BLOCK_SIZE: u16 = 64;
pub const MAX_BLOCK_SIZE: u16 = 32768;

/// Format-level errors: malformed headers, mismatched triplets, and
/// truncated structures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("short read")]
    ShortRead,

    #[error("short write")]
    ShortWrite,

    #[error("file error: {0}")]
    File(String),

    #[error("not a data file")]
    NotDataFile,

    #[error("not a key file")]
    NotKeyFile,

    #[error("not a log file")]
    NotLogFile,

    #[error("invalid version {0}")]
    InvalidVersion(u16),

    #[error("invalid key size {0}")]
    InvalidKeySize(u16),

    #[error("invalid block size {0}")]
    InvalidBlockSize(u16),

    #[error("invalid load factor {0}")]
    InvalidLoadFactor(u16),

    #[error("invalid bucket capacity")]
    InvalidCapacity,

    #[error("invalid bucket count {0}")]
    InvalidBucketCount(u64),

    /// Data and key file carry different uids: they are not a pair.
    #[error("uid mismatch")]
    UidMismatch,

    #[error("appnum mismatch")]
    AppnumMismatch,

    #[error("key size mismatch")]
    KeySizeMismatch,

    /// The stored pepper does not match the configured hasher.
    #[error("hash function mismatch")]
    HashMismatch,

    /// A spill pointer led to something that is not a complete spill record.
    #[error("short spill record")]
    ShortSpill,
}

impl From<codec::ShortRead> for Error {
    fn from(_: codec::ShortRead) -> Self {
        Error::ShortRead
    }
}

impl From<codec::ShortWrite> for Error {
    fn from(_: codec::ShortWrite) -> Self {
        Error::ShortWrite
    }
}

impl From<vfs::Error> for Error {
    fn from(e: vfs::Error) -> Self {
        match e {
            vfs::Error::ShortRead => Error::ShortRead,
            vfs::Error::ShortWrite => Error::ShortWrite,
            other => Error::File(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Entries a bucket block of `block_size` bytes can hold.
#[must_use]
pub fn bucket_capacity(block_size: u16) -> usize {
    (block_size as usize - BUCKET_HEADER_SIZE) / BUCKET_ENTRY_SIZE
}

/// Smallest power of two greater than or equal to `n` (and at least 1).
#[must_use]
pub fn ceil_pow2(n: u64) -> u64 {
    n.max(1).next_power_of_two()
}

/// Maps a 64-bit hash to a bucket index by linear hashing.
///
/// `modulus` is the smallest power of two >= `buckets`. When the first
/// reduction lands past the end of the table, the entry belongs to the
/// not-yet-split image in the lower half.
#[must_use]
pub fn bucket_index(hash: u64, buckets: u64, modulus: u64) -> u64 {
    let n = hash % modulus;
    if n >= buckets {
        hash % (modulus / 2)
    } else {
        n
    }
}

/// File offset of bucket `index` in the key file. Block zero holds the
/// header, so buckets start one block in.
#[must_use]
pub fn bucket_offset(index: u64, block_size: u16) -> u64 {
    (index + 1) * block_size as u64
}

/// Exact size of a key file with the given geometry.
#[must_use]
pub fn key_file_size(buckets: u64, block_size: u16) -> u64 {
    (buckets + 1) * block_size as u64
}
