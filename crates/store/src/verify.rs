//! Offline integrity check over a dat/key pair.

use std::path::Path;

use codec::IStream;
use format::{
    bucket_capacity, bucket_index, bucket_offset, load_spill, Bucket, DatHeader, KeyHeader,
    DAT_HEADER_SIZE, DAT_RECORD_PREFIX_SIZE, SPILL_PREFIX_SIZE,
};
use hash::{key_digest, pepper, Hasher64};
use vfs::{BulkReader, File, OpenMode};

use crate::error::dat_scan;
use crate::{Error, Result};

/// Statistics and header fields gathered by [`verify`].
#[derive(Debug, Clone)]
pub struct VerifyInfo {
    pub version: u16,
    pub uid: u64,
    pub appnum: u64,
    pub key_size: u16,
    pub salt: u64,
    pub pepper: u64,
    pub block_size: u16,
    /// Configured load factor, back in `(0, 1)` form.
    pub load_factor: f64,
    /// Entries per bucket block.
    pub capacity: usize,
    pub buckets: u64,
    pub modulus: u64,
    /// Entries reachable through buckets (every fetchable key).
    pub key_count: u64,
    /// Data records present in the data file.
    pub value_count: u64,
    /// Total bytes of values in data records.
    pub value_bytes: u64,
    /// Spill records reachable through bucket chains / present in the file.
    pub spill_count: u64,
    pub spill_count_tot: u64,
    /// Bytes of those spill records, including their prefixes.
    pub spill_bytes: u64,
    pub spill_bytes_tot: u64,
    /// Mean bucket reads needed to fetch a present key.
    pub avg_fetch: f64,
    /// Fraction of the data file occupied by unreachable spill records.
    pub waste: f64,
    /// Bytes of file per byte of payload, minus one.
    pub overhead: f64,
    /// Mean fill of the base bucket blocks.
    pub actual_load: f64,
    pub key_file_size: u64,
    pub dat_file_size: u64,
    /// Histogram of spill chain lengths (index 9 collects the tail).
    pub hist: [u64; 10],
}

/// Checks that every bucket entry describes a real record and that both
/// files agree with their headers, gathering [`VerifyInfo`] along the way.
///
/// Two passes: a sequential sweep of the data file counting records and
/// spills, then a walk of every bucket chain re-reading and re-hashing each
/// referenced key. `read_size` is the sweep buffer.
pub fn verify<H: Hasher64, F: File, P: AsRef<Path>>(
    dat_path: P,
    key_path: P,
    read_size: usize,
) -> Result<VerifyInfo> {
    let df = F::open(OpenMode::Read, dat_path)?;
    let kf = F::open(OpenMode::Read, key_path)?;

    let dh = DatHeader::read(&df)?;
    dh.validate()?;
    let kh = KeyHeader::read(&kf)?;
    kh.validate()?;
    kh.verify_dat(&dh)?;
    if pepper::<H>(kh.salt) != kh.pepper {
        return Err(format::Error::HashMismatch.into());
    }

    let dat_file_size = df.size()?;
    let key_file_size = kf.size()?;
    if key_file_size < format::key_file_size(kh.buckets, kh.block_size) {
        return Err(Error::ShortKeyFile);
    }
    if dat_file_size < DAT_HEADER_SIZE {
        return Err(Error::ShortDatFile);
    }

    let mut info = VerifyInfo {
        version: kh.version,
        uid: kh.uid,
        appnum: kh.appnum,
        key_size: kh.key_size,
        salt: kh.salt,
        pepper: kh.pepper,
        block_size: kh.block_size,
        load_factor: kh.load_factor as f64 / 65536.0,
        capacity: bucket_capacity(kh.block_size),
        buckets: kh.buckets,
        modulus: kh.modulus,
        key_count: 0,
        value_count: 0,
        value_bytes: 0,
        spill_count: 0,
        spill_count_tot: 0,
        spill_bytes: 0,
        spill_bytes_tot: 0,
        avg_fetch: 0.0,
        waste: 0.0,
        overhead: 0.0,
        actual_load: 0.0,
        key_file_size,
        dat_file_size,
        hist: [0; 10],
    };

    // Pass 1: sweep the data file.
    let mut r = BulkReader::new(&df, DAT_HEADER_SIZE, dat_file_size, read_size);
    while !r.eof() {
        let mut is = r.prepare(DAT_RECORD_PREFIX_SIZE).map_err(dat_scan)?;
        let size = is.read_u48()?;
        if size > 0 {
            r.prepare(kh.key_size as usize + size as usize)
                .map_err(dat_scan)?;
            info.value_count += 1;
            info.value_bytes += size;
        } else {
            let mut is = r.prepare(codec::SIZE_U16).map_err(dat_scan)?;
            let payload = is.read_u16()? as usize;
            r.prepare(payload).map_err(dat_scan)?;
            info.spill_count_tot += 1;
            info.spill_bytes_tot += (SPILL_PREFIX_SIZE + payload) as u64;
        }
    }

    // Pass 2: walk every bucket chain.
    let bs = kh.block_size as usize;
    let mut base_fill = 0u64;
    let mut fetch_sum = 0u64;
    for n in 0..kh.buckets {
        let mut block = vec![0u8; bs];
        kf.read_at(bucket_offset(n, kh.block_size), &mut block)
            .map_err(|e| match e {
                vfs::Error::ShortRead => Error::ShortKeyFile,
                other => other.into(),
            })?;
        let b = Bucket::existing(&mut block)?;
        base_fill += b.count() as u64;

        let mut depth = 1u64;
        check_bucket::<H, F>(&b, &df, n, &kh, depth, &mut info.key_count, &mut fetch_sum)?;

        let mut chain_len = 0u64;
        let mut spill = b.spill();
        let mut sblock = vec![0u8; bs];
        while spill != 0 {
            let sb = load_spill(&df, spill, &mut sblock)?;
            depth += 1;
            chain_len += 1;
            info.spill_count += 1;
            info.spill_bytes += (SPILL_PREFIX_SIZE + sb.actual_size()) as u64;
            check_bucket::<H, F>(&sb, &df, n, &kh, depth, &mut info.key_count, &mut fetch_sum)?;
            spill = sb.spill();
        }
        info.hist[chain_len.min(9) as usize] += 1;
    }

    if info.key_count > 0 {
        info.avg_fetch = fetch_sum as f64 / info.key_count as f64;
    }
    info.actual_load = base_fill as f64 / (info.capacity as u64 * kh.buckets) as f64;
    info.waste = (info.spill_bytes_tot - info.spill_bytes) as f64 / dat_file_size as f64;
    let payload = info.value_bytes + info.key_count * kh.key_size as u64;
    if payload > 0 {
        info.overhead = (key_file_size + dat_file_size) as f64 / payload as f64 - 1.0;
    }
    Ok(info)
}

/// Re-reads and re-hashes every record a bucket's entries point at.
fn check_bucket<H: Hasher64, F: File>(
    b: &Bucket<'_>,
    df: &F,
    n: u64,
    kh: &KeyHeader,
    depth: u64,
    key_count: &mut u64,
    fetch_sum: &mut u64,
) -> Result<()> {
    let key_size = kh.key_size as usize;
    let mut rec = vec![0u8; DAT_RECORD_PREFIX_SIZE + key_size];
    for e in b.entries() {
        if bucket_index(e.hash, kh.buckets, kh.modulus) != n {
            return Err(Error::OrphanedEntry);
        }
        df.read_at(e.offset, &mut rec).map_err(dat_scan)?;
        let mut is = IStream::new(&rec);
        if is.read_u48()? != e.size {
            return Err(Error::SizeMismatch);
        }
        let key = is.data(key_size)?;
        if key_digest::<H>(key, kh.salt) != e.hash {
            return Err(Error::DigestMismatch);
        }
        *key_count += 1;
        *fetch_sum += depth;
    }
    Ok(())
}
