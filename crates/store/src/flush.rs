//! The background flusher: rotation, the drain cycle, and the commit
//! protocol.
//!
//! One flusher thread exists per open store. Everything below runs on it;
//! the only shared state it touches is behind the staging lock, and it holds
//! that lock only to rotate the maps and to publish results, never across
//! file I/O.
//!
//! ## Epoch ordering
//!
//! Each drain performs, in order:
//!
//! 1. append this epoch's data records, sync the data file
//! 2. write a fresh log header (pre-epoch file sizes) and the pre-image of
//!    every bucket it is about to change; spills appended while mutating
//!    buckets get their own data-file sync
//! 3. sync the log file
//! 4. rewrite each changed bucket block with a single positioned write
//! 5. sync the key file
//! 6. truncate the log to its header and sync it; this is the commit point
//!
//! A crash before step 3 leaves at most unreferenced records in the data
//! file; a crash before step 6 is undone by replaying the logged pre-images
//! and truncating the data file to the logged length.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use format::{
    bucket_index, bucket_offset, key_file_size, maybe_spill, Bucket, Entry, LogHeader,
    DAT_RECORD_PREFIX_SIZE, LOG_HEADER_SIZE,
};
use vfs::{BulkWriter, File};

use crate::staging::Staging;
use crate::{Inner, Result, BULK_WRITE_SIZE};

/// Coarse tick: staged data never waits longer than this for durability,
/// even when nobody crosses the arena threshold.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Flusher thread body. Exits when `close` asks it to stop and both maps
/// have drained, or immediately after latching an error.
pub(crate) fn run<F: File>(inner: Arc<Inner<F>>, mut dat_size: u64) {
    let kf_size = key_file_size(inner.kh.buckets, inner.kh.block_size);
    loop {
        let epoch = {
            let mut s = inner.state.lock();
            if !s.stop && !s.flush_requested && s.p0.is_empty() {
                let _ = inner.work.wait_for(&mut s, FLUSH_INTERVAL);
            }
            s.flush_requested = false;
            if s.p0.is_empty() {
                if s.stop {
                    break;
                }
                None
            } else {
                // Rotate. The previous epoch always drained fully before a
                // new one can start.
                debug_assert!(s.p1.is_empty());
                s.p1 = Arc::new(std::mem::take(&mut s.p0));
                Some(Arc::clone(&s.p1))
            }
        };
        let Some(p1) = epoch else { continue };

        match drain(&inner, &p1, dat_size, kf_size) {
            Ok(new_dat_size) => {
                dat_size = new_dat_size;
                let mut s = inner.state.lock();
                s.p1 = Arc::new(Staging::default());
            }
            Err(e) => {
                tracing::warn!(error = %e, "flush failed, store latched unusable");
                inner.state.lock().error = Some(e);
                break;
            }
        }
    }
}

/// Drains one rotated epoch to disk. Returns the new committed data-file
/// size.
fn drain<F: File>(
    inner: &Inner<F>,
    p1: &Staging,
    dat_size: u64,
    kf_size: u64,
) -> Result<u64> {
    let kh = &inner.kh;
    let block_size = kh.block_size as usize;

    // Append one data record per staged pair, grouping new bucket entries by
    // bucket index as the offsets become known.
    let mut dw = BulkWriter::new(&inner.df, dat_size, BULK_WRITE_SIZE);
    let mut buckets: BTreeMap<u64, Vec<Entry>> = BTreeMap::new();
    for (key, staged) in p1.iter() {
        let offset = dw.offset();
        let mut os = dw.prepare(DAT_RECORD_PREFIX_SIZE + key.len() + staged.value.len())?;
        os.write_u48(staged.value.len() as u64)?;
        os.data(key)?;
        os.data(&staged.value)?;
        buckets
            .entry(bucket_index(staged.hash, kh.buckets, kh.modulus))
            .or_default()
            .push(Entry {
                offset,
                size: staged.value.len() as u64,
                hash: staged.hash,
            });
    }
    dw.flush()?;
    inner.df.sync()?; // records durable before anything can point at them
    let records_end = dw.offset();

    // Fresh log epoch: header with the pre-epoch sizes, then per bucket its
    // pre-image, then the in-memory mutation. A full bucket spills its
    // current contents into the data file through `dw`.
    let lh = LogHeader {
        version: kh.version,
        uid: kh.uid,
        appnum: kh.appnum,
        key_size: kh.key_size,
        salt: kh.salt,
        pepper: kh.pepper,
        block_size: kh.block_size,
        key_file_size: kf_size,
        dat_file_size: dat_size,
    };
    let mut lw = BulkWriter::new(&inner.lf, 0, BULK_WRITE_SIZE);
    lw.prepare(LOG_HEADER_SIZE as usize)?.data(&lh.encode()?)?;

    let mut mutated: Vec<(u64, Vec<u8>)> = Vec::with_capacity(buckets.len());
    for (&n, entries) in &buckets {
        let mut block = vec![0u8; block_size];
        inner.kf.read_at(bucket_offset(n, kh.block_size), &mut block)?;

        let mut os = lw.prepare(codec::SIZE_U64 + block_size)?;
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

    // Spill records must be durable before a bucket block references them.
    if dw.offset() > records_end {
        dw.flush()?;
        inner.df.sync()?;
    }

    // Pre-images durable before any bucket is overwritten.
    lw.flush()?;
    inner.lf.sync()?;

    // One positioned write per mutated block, then the key-file barrier.
    for (n, block) in &mutated {
        inner.kf.write_at(bucket_offset(*n, kh.block_size), block)?;
    }
    inner.kf.sync()?;

    // Commit point: an on-disk log of header size means nothing is pending.
    inner.lf.trunc(LOG_HEADER_SIZE)?;
    inner.lf.sync()?;

    tracing::debug!(
        records = p1.len(),
        buckets = mutated.len(),
        appended = dw.offset() - dat_size,
        "flush epoch committed"
    );
    Ok(dw.offset())
}
