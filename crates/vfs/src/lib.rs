//! # VFS - positioned file I/O
//!
//! The store never seeks: every read and write names an absolute offset.
//! This module defines the [`File`] capability the rest of the workspace is
//! written against, plus [`OsFile`], the production implementation over
//! `std::fs`.
//!
//! Read-side methods take `&self` so a single handle can be shared between
//! fetching threads and the flusher; [`OsFile`] uses `pread`/`pwrite`, which
//! need no cursor and no exclusive access. Implementations backed by plain
//! memory use interior mutability instead.
//!
//! [`BulkReader`] and [`BulkWriter`] amortize syscall cost over the
//! append-only files: the flusher appends thousands of records per epoch and
//! the offline tools scan whole data files, and both would otherwise pay one
//! syscall per record.

mod bulk;

pub use bulk::{BulkReader, BulkWriter};

use std::fs;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use thiserror::Error;

/// File-level errors.
///
/// `ShortRead` and `ShortWrite` are distinguished from plain I/O failures
/// because the formats above this layer treat a truncated structure
/// differently from an unreachable disk.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A read returned fewer bytes than requested.
    #[error("short read")]
    ShortRead,

    /// A write stored fewer bytes than requested.
    #[error("short write")]
    ShortWrite,

    /// `create` was asked to overwrite an existing file.
    #[error("file already exists")]
    Exists,

    /// `open` or `erase` was given a path that does not exist.
    #[error("file not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Declared access pattern for an open file.
///
/// `OsFile` opens the same way for all four; the mode exists so that
/// implementations with real fadvise-style hints (or stricter permission
/// models) can honor it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Sequential read-only scan.
    Scan,
    /// Random read-only access.
    Read,
    /// Random reads plus appends at the end.
    Append,
    /// Random reads and writes.
    Write,
}

impl OpenMode {
    fn writable(self) -> bool {
        matches!(self, OpenMode::Append | OpenMode::Write)
    }
}

/// Synchronous positioned file I/O.
///
/// `sync` must establish durability of all prior `write_at` calls on the
/// same handle before it returns.
pub trait File: Send + Sync + Sized {
    /// Creates a new file. Fails with [`Error::Exists`] if the path exists.
    fn create<P: AsRef<Path>>(mode: OpenMode, path: P) -> Result<Self>;

    /// Opens an existing file. Fails with [`Error::NotFound`] if absent.
    fn open<P: AsRef<Path>>(mode: OpenMode, path: P) -> Result<Self>;

    /// Removes a file from the filesystem.
    fn erase<P: AsRef<Path>>(path: P) -> Result<()>;

    /// Current size in bytes.
    fn size(&self) -> Result<u64>;

    /// Fills `buf` from `offset`. A partial read is [`Error::ShortRead`].
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Stores `buf` at `offset`, extending the file if needed. A partial
    /// write is [`Error::ShortWrite`].
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Durability barrier.
    fn sync(&self) -> Result<()>;

    /// Truncates (or extends with zeros) to exactly `n` bytes.
    fn trunc(&self, n: u64) -> Result<()>;
}

/// [`File`] over `std::fs::File` using unix positioned I/O.
#[derive(Debug)]
pub struct OsFile {
    file: fs::File,
}

impl File for OsFile {
    fn create<P: AsRef<Path>>(mode: OpenMode, path: P) -> Result<Self> {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => Error::Exists,
                _ => Error::Io(e),
            })?;
        let _ = mode;
        Ok(Self { file })
    }

    fn open<P: AsRef<Path>>(mode: OpenMode, path: P) -> Result<Self> {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(mode.writable())
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => Error::NotFound,
                _ => Error::Io(e),
            })?;
        Ok(Self { file })
    }

    fn erase<P: AsRef<Path>>(path: P) -> Result<()> {
        fs::remove_file(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound,
            _ => Error::Io(e),
        })
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact_at(buf, offset).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::ShortRead,
            _ => Error::Io(e),
        })
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file.write_all_at(buf, offset).map_err(|e| match e.kind() {
            io::ErrorKind::WriteZero => Error::ShortWrite,
            _ => Error::Io(e),
        })
    }

    fn sync(&self) -> Result<()> {
        Ok(self.file.sync_all()?)
    }

    fn trunc(&self, n: u64) -> Result<()> {
        Ok(self.file.set_len(n)?)
    }
}
