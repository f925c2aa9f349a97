//! Write path: `insert()`.
//!
//! An insert never touches the files except to prove the key absent. The
//! record itself is staged in memory and written by the flusher, so the
//! caller pays one bucket read plus a map insert, never a disk write.

use format::{bucket_index, Bucket};
use hash::{key_digest, Hasher64};
use vfs::File;

use crate::{Error, Result, Store};

impl<H: Hasher64, F: File> Store<H, F> {
    /// Inserts `(key, value)`.
    ///
    /// Keys are exactly [`key_size`](Store::key_size) bytes; values must be
    /// non-empty (a zero size marks a spill record on disk) and fit a 48-bit
    /// size field. The first insert of a key wins: re-inserting returns
    /// [`Error::KeyExists`] and changes nothing.
    ///
    /// The staging lock is held across the whole membership check, including
    /// the bucket probe, so two racing inserts of the same key cannot both
    /// conclude it is absent.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let kh = &self.inner.kh;
        if key.len() != kh.key_size as usize {
            return Err(Error::InvalidArgument("key length must equal the key size"));
        }
        if value.is_empty() {
            return Err(Error::InvalidArgument("values must not be empty"));
        }
        if value.len() as u64 > codec::MAX_U48 {
            return Err(Error::InvalidArgument("value exceeds the 48-bit size field"));
        }

        let h = key_digest::<H>(key, kh.salt);

        let mut s = self.inner.state.lock();
        Self::latched(&s)?;
        if s.p1.contains(key) || s.p0.contains(key) {
            return Err(Error::KeyExists);
        }

        // On-disk probe. Reading the key file here races only with the
        // flusher's full-block writes, which readers may observe before or
        // after, never torn.
        let n = bucket_index(h, kh.buckets, kh.modulus);
        let mut block = self.read_bucket(n)?;
        let b = Bucket::existing(&mut block)?;
        if b.find_in_chain(&self.inner.df, key, h)?.is_some() {
            return Err(Error::KeyExists);
        }

        s.p0.insert(key.to_vec(), h, value.to_vec());
        if s.p0.bytes() >= self.inner.arena_alloc_size / 2 && !s.flush_requested {
            s.flush_requested = true;
            self.inner.work.notify_one();
        }
        Ok(())
    }
}
