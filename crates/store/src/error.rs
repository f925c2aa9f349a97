use thiserror::Error;

/// Store-level errors.
///
/// Format- and header-level failures nest under [`Error::Format`]; the
/// variants here are the conditions the store itself detects. The enum is
/// `Clone` because a background flusher failure is latched and handed to
/// every subsequent caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] format::Error),

    #[error("io error: {0}")]
    Io(String),

    #[error("short read")]
    ShortRead,

    #[error("short write")]
    ShortWrite,

    #[error("file already exists")]
    FileExists,

    #[error("file not found")]
    NoFile,

    /// A log file is present; the caller must run recovery before opening.
    #[error("a log file exists, run recovery first")]
    RecoverNeeded,

    /// Insert of a key that is already present. The stored value is
    /// untouched.
    #[error("key already exists")]
    KeyExists,

    #[error("key not found")]
    KeyNotFound,

    /// The log file's header does not belong to the given dat/key pair.
    #[error("log file does not match the database")]
    MismatchedRecovery,

    #[error("key file is truncated")]
    ShortKeyFile,

    #[error("data file is truncated")]
    ShortDatFile,

    /// A bucket entry whose record size disagrees with the data file.
    #[error("bucket entry size does not match its data record")]
    SizeMismatch,

    /// A bucket entry whose hash indexes to a different bucket.
    #[error("bucket entry belongs to a different bucket")]
    OrphanedEntry,

    /// A bucket entry whose stored hash is not the digest of its record's
    /// key.
    #[error("bucket entry hash does not match its record's key")]
    DigestMismatch,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
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
            vfs::Error::Exists => Error::FileExists,
            vfs::Error::NotFound => Error::NoFile,
            vfs::Error::Io(err) => Error::Io(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Maps a short read during a data-file scan to the structural error: the
/// file ended inside a record.
pub(crate) fn dat_scan(e: vfs::Error) -> Error {
    match e {
        vfs::Error::ShortRead => Error::ShortDatFile,
        other => other.into(),
    }
}
