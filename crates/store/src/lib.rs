//! # Store - the append-only, insert-once key/value store
//!
//! Ties the [`format`], [`vfs`], and [`hash`] crates into a complete
//! database: a data file holding every record ever written, a key file of
//! hash buckets pointing into it, and a log file that makes bucket rewrites
//! undoable after a crash.
//!
//! ## Architecture
//!
//! ```text
//! Client threads
//!   |
//!   v
//! ┌───────────────────────────────────────────────────┐
//! │                     STORE                         │
//! │                                                   │
//! │ write.rs → probe p1, p0, disk → stage into p0     │
//! │               |                                   │
//! │               | (p0 over half the arena?)         │
//! │               v                                   │
//! │        flusher thread (flush.rs)                  │
//! │          rotate p0 → p1                           │
//! │          append records → sync dat                │
//! │          log pre-images → sync log                │
//! │          rewrite buckets → sync key               │
//! │          truncate log                             │
//! │                                                   │
//! │ read.rs → p1 → p0 → bucket chain → data record    │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! ## Module responsibilities
//!
//! | Module      | Purpose                                            |
//! |-------------|----------------------------------------------------|
//! | `lib.rs`    | `Store` struct, create/open/close, accessors, Drop |
//! | [`write`]   | `insert()` and the staging protocol                |
//! | [`read`]    | `fetch()`                                          |
//! | [`flush`]   | the background flusher and the commit protocol     |
//! | [`recover`] | pre-image replay after a crash                     |
//! | [`rekey`]   | offline key-file reconstruction                    |
//! | [`verify`]  | offline integrity check and statistics             |
//! | [`visit`]   | sequential data-file iteration                     |
//!
//! ## Crash safety
//!
//! New records are synced to the data file before anything points at them.
//! Before a bucket block is rewritten, its previous contents are synced to
//! the log file together with the pre-epoch file sizes; recovery puts the
//! pre-images back and truncates the data file, making an interrupted epoch
//! vanish entirely. After a committed epoch the log is truncated back to its
//! header, which is the on-disk signal that no work is outstanding.

mod error;
mod flush;
mod read;
mod recover;
mod rekey;
mod staging;
mod verify;
mod visit;
mod write;

pub use error::{Error, Result};
pub use recover::recover;
pub use rekey::rekey;
pub use verify::{verify, VerifyInfo};
pub use visit::visit;

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use hash::{pepper, Hasher64, XxHasher};
use parking_lot::{Condvar, Mutex};
use vfs::{File, OpenMode, OsFile};

use format::{
    bucket_offset, ceil_pow2, key_file_size, DatHeader, KeyHeader, CURRENT_VERSION,
    DAT_HEADER_SIZE,
};
use staging::Staging;

/// Buffer size for the flusher's and the offline tools' bulk file access.
pub(crate) const BULK_WRITE_SIZE: usize = 1024 * 1024;

/// Shared mutable state, guarded by the staging lock.
pub(crate) struct State {
    /// Accepting new inserts.
    pub p0: Staging,
    /// Being drained by the flusher. Behind an `Arc` so the flusher can keep
    /// reading it after releasing the lock; only rotation and the
    /// post-commit reset replace it.
    pub p1: Arc<Staging>,
    /// Set by `insert` when p0 crosses the arena threshold.
    pub flush_requested: bool,
    /// Set by `close`; the flusher drains and exits.
    pub stop: bool,
    /// A flusher failure, handed to every subsequent caller.
    pub error: Option<Error>,
}

pub(crate) struct Inner<F: File> {
    pub df: F,
    pub kf: F,
    pub lf: F,
    pub kh: KeyHeader,
    pub arena_alloc_size: usize,
    pub state: Mutex<State>,
    /// Wakes the flusher: rotate request, close request, or nothing (the
    /// flusher also ticks on a coarse timeout).
    pub work: Condvar,
}

/// An open database handle.
///
/// `insert` and `fetch` take `&self` and may be called from any number of
/// threads; the single flusher thread owns all writes to the files. Generic
/// over the hasher and the file capability; the defaults are xxhash64 and
/// positioned OS files.
pub struct Store<H: Hasher64 = XxHasher, F: File = OsFile> {
    pub(crate) inner: Arc<Inner<F>>,
    log_path: PathBuf,
    flusher: Option<JoinHandle<()>>,
    _hasher: PhantomData<fn() -> H>,
}

impl<H: Hasher64, F: File> Store<H, F> {
    /// Creates a new database: writes the data-file header and a key file of
    /// zeroed bucket blocks. No log file is created. Fails with
    /// [`Error::FileExists`] if either target exists.
    ///
    /// `appnum` is an opaque caller value stored in both headers. `salt`
    /// seeds every key digest for the database's lifetime (see
    /// [`hash::make_salt`]). `load_factor` must be in `(0, 1)`; it is stored
    /// for offline tools, the table itself never grows.
    ///
    /// The table is allocated with a single bucket. A store expected to hold
    /// many items is bulk-loaded and then rebuilt with [`rekey`].
    #[allow(clippy::too_many_arguments)]
    pub fn create<P: AsRef<Path>>(
        dat_path: P,
        key_path: P,
        log_path: P,
        appnum: u64,
        salt: u64,
        key_size: u16,
        block_size: u16,
        load_factor: f64,
    ) -> Result<()> {
        let kh = KeyHeader {
            version: CURRENT_VERSION,
            uid: hash::make_uid(),
            appnum,
            key_size,
            salt,
            pepper: pepper::<H>(salt),
            block_size,
            load_factor: load_factor_to_u16(load_factor)?,
            buckets: 1,
            modulus: ceil_pow2(1),
        };
        kh.validate()?;
        let dh = DatHeader {
            version: CURRENT_VERSION,
            uid: kh.uid,
            appnum,
            key_size,
        };

        // Refuse before touching anything, so a failed create never erases
        // a file it did not make.
        if F::open(OpenMode::Read, &key_path).is_ok() || F::open(OpenMode::Read, &log_path).is_ok()
        {
            return Err(Error::FileExists);
        }

        let df = F::create(OpenMode::Append, &dat_path)?;
        match Self::create_files(&df, &dh, &kh, &key_path) {
            Ok(()) => Ok(()),
            Err(e) => {
                // Leave nothing half-made behind.
                drop(df);
                let _ = F::erase(&dat_path);
                let _ = F::erase(&key_path);
                Err(e)
            }
        }
    }

    fn create_files<P: AsRef<Path>>(
        df: &F,
        dh: &DatHeader,
        kh: &KeyHeader,
        key_path: P,
    ) -> Result<()> {
        dh.write(df)?;
        df.sync()?;

        let kf = F::create(OpenMode::Write, key_path)?;
        // Allocate the zeroed bucket array before committing the header.
        kf.write_at(key_file_size(kh.buckets, kh.block_size) - 1, &[0])?;
        kf.sync()?;
        kh.write(&kf)?;
        kf.sync()?;
        Ok(())
    }

    /// Drains the staging maps, stops the flusher, and erases the log file.
    ///
    /// Returns the latched flusher error, if any; in that case the log file
    /// is left in place so the next open demands recovery.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    /// Opaque application value from the headers.
    #[must_use]
    pub fn appnum(&self) -> u64 {
        self.inner.kh.appnum
    }

    /// Fixed key size in bytes.
    #[must_use]
    pub fn key_size(&self) -> u16 {
        self.inner.kh.key_size
    }

    /// Bucket block size in bytes.
    #[must_use]
    pub fn block_size(&self) -> u16 {
        self.inner.kh.block_size
    }

    /// Reads bucket `n` into a fresh block buffer.
    pub(crate) fn read_bucket(&self, n: u64) -> Result<Vec<u8>> {
        let kh = &self.inner.kh;
        let mut block = vec![0u8; kh.block_size as usize];
        self.inner
            .kf
            .read_at(bucket_offset(n, kh.block_size), &mut block)
            .map_err(|e| match e {
                vfs::Error::ShortRead => Error::ShortKeyFile,
                other => other.into(),
            })?;
        Ok(block)
    }

    /// Returns the latched flusher error, if any.
    pub(crate) fn latched(state: &State) -> Result<()> {
        match &state.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(handle) = self.flusher.take() else {
            return Ok(());
        };
        {
            let mut s = self.inner.state.lock();
            s.stop = true;
        }
        self.inner.work.notify_one();
        let _ = handle.join();

        let err = self.inner.state.lock().error.clone();
        if let Some(e) = err {
            return Err(e);
        }
        F::erase(&self.log_path)?;
        Ok(())
    }
}

impl<H: Hasher64, F: File + 'static> Store<H, F> {
    /// Opens an existing database and starts the flusher.
    ///
    /// Refuses with [`Error::RecoverNeeded`] if a log file is present: a
    /// previous writer did not shut down cleanly, and [`recover`] must run
    /// first. The log file is created here and erased at close, so its
    /// presence on disk is exactly the "unclean" signal.
    ///
    /// `arena_alloc_size` bounds the staging maps: the flusher is woken once
    /// p0 holds more than half of it.
    pub fn open<P: AsRef<Path>>(
        dat_path: P,
        key_path: P,
        log_path: P,
        arena_alloc_size: usize,
    ) -> Result<Self> {
        let df = F::open(OpenMode::Append, dat_path)?;
        let kf = F::open(OpenMode::Write, key_path)?;

        let dh = DatHeader::read(&df)?;
        dh.validate()?;
        let kh = KeyHeader::read(&kf)?;
        kh.validate()?;
        kh.verify_dat(&dh)?;
        if pepper::<H>(kh.salt) != kh.pepper {
            return Err(format::Error::HashMismatch.into());
        }

        let dat_size = df.size()?;
        if dat_size < DAT_HEADER_SIZE {
            return Err(Error::ShortDatFile);
        }
        if kf.size()? < key_file_size(kh.buckets, kh.block_size) {
            return Err(Error::ShortKeyFile);
        }

        let lf = match F::create(OpenMode::Append, &log_path) {
            Ok(lf) => lf,
            Err(vfs::Error::Exists) => return Err(Error::RecoverNeeded),
            Err(e) => return Err(e.into()),
        };

        let inner = Arc::new(Inner {
            df,
            kf,
            lf,
            kh,
            arena_alloc_size,
            state: Mutex::new(State {
                p0: Staging::default(),
                p1: Arc::new(Staging::default()),
                flush_requested: false,
                stop: false,
                error: None,
            }),
            work: Condvar::new(),
        });

        let worker = Arc::clone(&inner);
        let flusher = std::thread::spawn(move || flush::run(worker, dat_size));

        Ok(Self {
            inner,
            log_path: log_path.as_ref().to_path_buf(),
            flusher: Some(flusher),
            _hasher: PhantomData,
        })
    }
}

impl<H: Hasher64, F: File> Drop for Store<H, F> {
    /// Best-effort close. Errors cannot propagate out of Drop; a failed
    /// drain leaves the log file behind, and the next open will demand
    /// recovery.
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Erases a database: data, key, and log file. Files that are already gone
/// are ignored.
pub fn erase<F: File, P: AsRef<Path>>(dat_path: P, key_path: P, log_path: P) -> Result<()> {
    for path in [dat_path.as_ref(), key_path.as_ref(), log_path.as_ref()] {
        match F::erase(path) {
            Ok(()) | Err(vfs::Error::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Converts a load factor in `(0, 1)` to its stored 16-bit form.
pub(crate) fn load_factor_to_u16(f: f64) -> Result<u16> {
    if !(f > 0.0 && f < 1.0) {
        return Err(Error::InvalidArgument("load factor must be in (0, 1)"));
    }
    Ok(((65536.0 * f) as u64).clamp(1, 65535) as u16)
}

#[cfg(test)]
mod tests;
