//! Read path: `fetch()`.

use format::{bucket_index, Bucket, DAT_RECORD_PREFIX_SIZE};
use hash::{key_digest, Hasher64};
use vfs::File;

use crate::error::dat_scan;
use crate::{Error, Result, Store};

impl<H: Hasher64, F: File> Store<H, F> {
    /// Looks up `key`, invoking `sink` with the value bytes on a hit.
    ///
    /// The staging maps are probed first under the lock, so a fetch issued
    /// after an insert returned always observes it. On a staging miss the
    /// lock is dropped and the on-disk walk runs unlocked: one bucket read,
    /// a key compare per hash match, then the value read.
    ///
    /// A miss is [`Error::KeyNotFound`].
    pub fn fetch<S: FnOnce(&[u8])>(&self, key: &[u8], sink: S) -> Result<()> {
        let kh = &self.inner.kh;
        if key.len() != kh.key_size as usize {
            return Err(Error::InvalidArgument("key length must equal the key size"));
        }

        {
            let s = self.inner.state.lock();
            Self::latched(&s)?;
            if let Some(v) = s.p1.get(key).or_else(|| s.p0.get(key)) {
                sink(v);
                return Ok(());
            }
        }

        let h = key_digest::<H>(key, kh.salt);
        let n = bucket_index(h, kh.buckets, kh.modulus);
        let mut block = self.read_bucket(n)?;
        let b = Bucket::existing(&mut block)?;
        match b.find_in_chain(&self.inner.df, key, h)? {
            Some((offset, size)) => {
                let mut value = vec![0u8; size as usize];
                let at = offset + (DAT_RECORD_PREFIX_SIZE + key.len()) as u64;
                self.inner.df.read_at(at, &mut value).map_err(dat_scan)?;
                sink(&value);
                Ok(())
            }
            None => Err(Error::KeyNotFound),
        }
    }
}
