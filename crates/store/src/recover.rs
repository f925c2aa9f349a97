//! Crash recovery: replay logged pre-images and trim the data file.

use std::path::Path;

use format::{bucket_offset, DatHeader, KeyHeader, LogHeader, LOG_HEADER_SIZE};
use hash::{pepper, Hasher64};
use vfs::{File, OpenMode};

use crate::{Error, Result};

/// Restores a database to its last committed state.
///
/// A no-op if no log file exists (the previous writer closed cleanly). A log
/// no larger than its header means the last epoch committed: there is
/// nothing to undo, and the stale header's recorded sizes must *not* be
/// applied. Anything larger is an interrupted epoch: every complete
/// pre-image is written back over its bucket, and the data file is truncated
/// to the length recorded when the epoch began, erasing the epoch's records
/// and spills.
///
/// Running recovery twice is the same as running it once: pre-images land at
/// absolute offsets and the truncation length is absolute.
pub fn recover<H: Hasher64, F: File, P: AsRef<Path>>(
    dat_path: P,
    key_path: P,
    log_path: P,
) -> Result<()> {
    let lf = match F::open(OpenMode::Write, &log_path) {
        Ok(lf) => lf,
        Err(vfs::Error::NotFound) => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let df = F::open(OpenMode::Write, &dat_path)?;
    let kf = F::open(OpenMode::Write, &key_path)?;

    let dh = DatHeader::read(&df)?;
    dh.validate()?;
    let kh = KeyHeader::read(&kf)?;
    kh.validate()?;
    kh.verify_dat(&dh)?;
    if pepper::<H>(kh.salt) != kh.pepper {
        return Err(format::Error::HashMismatch.into());
    }

    let log_size = lf.size()?;
    if log_size > LOG_HEADER_SIZE {
        let lh = LogHeader::read(&lf)?;
        lh.verify_key_dat(&kh, &dh)
            .map_err(|_| Error::MismatchedRecovery)?;

        let block_size = kh.block_size as usize;
        let rec = (codec::SIZE_U64 + block_size) as u64;
        let mut buf = vec![0u8; codec::SIZE_U64 + block_size];
        let mut at = LOG_HEADER_SIZE;
        let mut replayed = 0u64;
        while at + rec <= log_size {
            lf.read_at(at, &mut buf)?;
            let mut is = codec::IStream::new(&buf);
            let index = is.read_u64()?;
            if index >= kh.buckets {
                // Torn tail: the log was still being appended when the
                // crash hit, so no bucket was rewritten this epoch.
                break;
            }
            kf.write_at(bucket_offset(index, kh.block_size), is.data(block_size)?)?;
            at += rec;
            replayed += 1;
        }

        df.trunc(lh.dat_file_size)?;
        tracing::info!(
            replayed,
            dat_file_size = lh.dat_file_size,
            "interrupted epoch rolled back"
        );
    }

    kf.sync()?;
    df.sync()?;
    drop(lf);
    F::erase(&log_path)?;
    Ok(())
}
