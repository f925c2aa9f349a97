//! Offline key-file reconstruction from an intact data file.

use std::path::Path;

use format::{
    bucket_capacity, bucket_index, bucket_offset, ceil_pow2, key_file_size, maybe_spill, Bucket,
    DatHeader, KeyHeader, CURRENT_VERSION, DAT_HEADER_SIZE, DAT_RECORD_PREFIX_SIZE,
};
use hash::{key_digest, make_salt, pepper, Hasher64};
use vfs::{BulkReader, BulkWriter, File, OpenMode};

use crate::error::dat_scan;
use crate::{load_factor_to_u16, Result, BULK_WRITE_SIZE};

/// Builds a fresh key file for `dat_path`, sized for `item_count` keys at
/// the given load factor.
///
/// The data file is scanned once per window of `buffer_size / block_size`
/// buckets: records hashing into the current window are inserted (spilling
/// into the data file when a bucket fills), records outside it are skipped,
/// and the whole window lands in the key file as one sequential write.
/// A buffer that holds the entire table finishes in a single pass.
///
/// No log file is involved; the data file is only appended to (spills), so
/// an interrupted rekey leaves a partial key file that is simply erased and
/// rebuilt. Fails with `FileExists` if the key file is already there.
pub fn rekey<H: Hasher64, F: File, P: AsRef<Path>>(
    dat_path: P,
    key_path: P,
    item_count: u64,
    block_size: u16,
    load_factor: f64,
    buffer_size: usize,
) -> Result<()> {
    match build::<H, F, _>(
        &dat_path,
        &key_path,
        item_count,
        block_size,
        load_factor,
        buffer_size,
    ) {
        Ok(()) => Ok(()),
        Err(e) => {
            // A partial key file is useless; leave the directory clean.
            let _ = F::erase(&key_path);
            Err(e)
        }
    }
}

fn build<H: Hasher64, F: File, P: AsRef<Path>>(
    dat_path: P,
    key_path: P,
    item_count: u64,
    block_size: u16,
    load_factor: f64,
    buffer_size: usize,
) -> Result<()> {
    let stored_load_factor = load_factor_to_u16(load_factor)?;

    let df = F::open(OpenMode::Append, &dat_path)?;
    let dh = DatHeader::read(&df)?;
    dh.validate()?;
    let df_size = df.size()?;

    let salt = make_salt();
    let mut kh = KeyHeader {
        version: CURRENT_VERSION,
        uid: dh.uid,
        appnum: dh.appnum,
        key_size: dh.key_size,
        salt,
        pepper: pepper::<H>(salt),
        block_size,
        load_factor: stored_load_factor,
        buckets: 1,
        modulus: 1,
    };
    kh.validate()?;

    let capacity = bucket_capacity(block_size) as f64;
    let buckets = (((item_count as f64) / (capacity * load_factor)).ceil() as u64).max(1);
    kh.buckets = buckets;
    kh.modulus = ceil_pow2(buckets);

    let kf = F::create(OpenMode::Write, &key_path)?;
    kf.write_at(key_file_size(buckets, block_size) - 1, &[0])?;
    kh.write(&kf)?;

    let bs = block_size as usize;
    let chunk = ((buffer_size / bs).max(1)) as u64;
    let mut window = vec![0u8; chunk as usize * bs];
    let mut dw = BulkWriter::new(&df, df_size, BULK_WRITE_SIZE);

    let mut b0 = 0u64;
    while b0 < buckets {
        let b1 = (b0 + chunk).min(buckets);
        let bn = (b1 - b0) as usize;
        for i in 0..bn {
            Bucket::empty(&mut window[i * bs..(i + 1) * bs]);
        }

        // One pass over the records that existed before we started; spills
        // appended by this run land past `df_size` and are never scanned.
        let mut r = BulkReader::new(&df, DAT_HEADER_SIZE, df_size, BULK_WRITE_SIZE);
        while !r.eof() {
            let offset = r.offset();
            let mut is = r.prepare(DAT_RECORD_PREFIX_SIZE).map_err(dat_scan)?;
            let size = is.read_u48()?;
            if size > 0 {
                let mut is = r
                    .prepare(dh.key_size as usize + size as usize)
                    .map_err(dat_scan)?;
                let key = is.data(dh.key_size as usize)?;
                let h = key_digest::<H>(key, salt);
                let n = bucket_index(h, buckets, kh.modulus);
                if n < b0 || n >= b1 {
                    continue;
                }
                let at = (n - b0) as usize * bs;
                let mut b = Bucket::existing(&mut window[at..at + bs])?;
                maybe_spill(&mut b, &mut dw)?;
                b.insert(offset, size, h);
            } else {
                // Spill record from an earlier key file: skip its payload.
                let mut is = r.prepare(codec::SIZE_U16).map_err(dat_scan)?;
                let skip = is.read_u16()? as usize;
                r.prepare(skip).map_err(dat_scan)?;
            }
        }

        kf.write_at(bucket_offset(b0, block_size), &window[..bn * bs])?;
        b0 = b1;
    }

    dw.flush()?;
    df.sync()?;
    kf.sync()?;
    Ok(())
}
