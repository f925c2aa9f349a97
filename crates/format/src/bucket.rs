//! Bucket blocks: in-place views over `block_size`-byte slices.
//!
//! A bucket never owns its storage. The flusher hands it a block read from
//! the key file, the fetch path hands it a scratch buffer, and the spill
//! loader hands it a zero-padded copy of a spill record's payload. All
//! mutations serialize straight back into the slice, so writing the bucket
//! out is a single positioned write of the whole block.

use codec::{IStream, OStream};
use vfs::{BulkWriter, File};

use crate::{
    bucket_capacity, bucket_index, Error, Result, BUCKET_ENTRY_SIZE, BUCKET_HEADER_SIZE,
    DAT_RECORD_PREFIX_SIZE, SPILL_PREFIX_SIZE,
};

/// One bucket entry: where the record lives, how big its value is, and the
/// full 64-bit digest of its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    /// Data-file offset of the record's size field.
    pub offset: u64,
    /// Size of the record's value.
    pub size: u64,
    /// Salted digest of the record's key.
    pub hash: u64,
}

/// Mutable view over one bucket block.
pub struct Bucket<'a> {
    count: usize,
    spill: u64,
    buf: &'a mut [u8],
}

impl<'a> Bucket<'a> {
    /// Views `buf` as a bucket holding whatever the block already contains.
    pub fn existing(buf: &'a mut [u8]) -> Result<Self> {
        let mut is = IStream::new(buf);
        let count = is.read_u16()? as usize;
        let spill = is.read_u48()?;
        if count > bucket_capacity(buf.len() as u16) {
            return Err(Error::InvalidCapacity);
        }
        Ok(Self { count, spill, buf })
    }

    /// Views `buf` as a freshly emptied bucket, zeroing it.
    pub fn empty(buf: &'a mut [u8]) -> Self {
        buf.fill(0);
        Self {
            count: 0,
            spill: 0,
            buf,
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Data-file offset of the next chain link, or zero.
    #[must_use]
    pub fn spill(&self) -> u64 {
        self.spill
    }

    /// Entries this block can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        bucket_capacity(self.buf.len() as u16)
    }

    #[must_use]
    pub fn full(&self) -> bool {
        self.count == self.capacity()
    }

    /// Bytes of the block in use: header plus serialized entries.
    #[must_use]
    pub fn actual_size(&self) -> usize {
        BUCKET_HEADER_SIZE + self.count * BUCKET_ENTRY_SIZE
    }

    /// The `i`-th entry, in hash order.
    ///
    /// # Panics
    ///
    /// Panics if `i >= count()`.
    #[must_use]
    pub fn at(&self, i: usize) -> Entry {
        assert!(i < self.count, "entry index {} out of range", i);
        let at = BUCKET_HEADER_SIZE + i * BUCKET_ENTRY_SIZE;
        let mut is = IStream::new(&self.buf[at..at + BUCKET_ENTRY_SIZE]);
        Entry {
            offset: is.read_u48().unwrap(),
            size: is.read_u48().unwrap(),
            hash: is.read_u64().unwrap(),
        }
    }

    /// Iterates the entries in hash order.
    pub fn entries(&self) -> impl Iterator<Item = Entry> + '_ {
        (0..self.count).map(move |i| self.at(i))
    }

    /// Index of the first entry whose hash is >= `hash`.
    #[must_use]
    pub fn lower_bound(&self, hash: u64) -> usize {
        let mut lo = 0;
        let mut hi = self.count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.at(mid).hash < hash {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Inserts an entry, keeping the block sorted by hash.
    ///
    /// # Panics
    ///
    /// Panics if the bucket is full; callers spill first (see
    /// [`maybe_spill`]).
    pub fn insert(&mut self, offset: u64, size: u64, hash: u64) {
        assert!(!self.full(), "insert into full bucket");
        let i = self.lower_bound(hash);
        let at = BUCKET_HEADER_SIZE + i * BUCKET_ENTRY_SIZE;
        let end = BUCKET_HEADER_SIZE + self.count * BUCKET_ENTRY_SIZE;
        self.buf.copy_within(at..end, at + BUCKET_ENTRY_SIZE);

        let mut os = OStream::new(&mut self.buf[at..at + BUCKET_ENTRY_SIZE]);
        os.write_u48(offset).unwrap();
        os.write_u48(size).unwrap();
        os.write_u64(hash).unwrap();

        self.count += 1;
        self.update();
    }

    /// Empties the bucket and drops its spill pointer.
    pub fn clear(&mut self) {
        self.count = 0;
        self.spill = 0;
        self.buf.fill(0);
    }

    /// Points the bucket at a new chain link.
    pub fn set_spill(&mut self, offset: u64) {
        self.spill = offset;
        self.update();
    }

    /// Writes this bucket's payload as a spill record appended to the data
    /// file, then becomes empty with its spill pointer set to that record.
    /// The old contents (including the previous spill pointer) stay
    /// reachable through the new link.
    pub fn spill_to<F: File>(&mut self, w: &mut BulkWriter<'_, F>) -> Result<()> {
        let size = self.actual_size();
        let offset = w.offset();
        let mut os = w.prepare(SPILL_PREFIX_SIZE + size)?;
        os.write_u48(0)?;
        os.write_u16(size as u16)?;
        os.data(&self.buf[..size])?;

        self.clear();
        self.set_spill(offset);
        Ok(())
    }

    /// Redistributes entries after a table doubling: entries that now index
    /// to `other_index` under `(buckets, modulus)` move into `other`, the
    /// rest stay. Spill pointers are untouched.
    pub fn split(&mut self, other: &mut Bucket<'_>, other_index: u64, buckets: u64, modulus: u64) {
        let keep: Vec<Entry> = self.entries().collect();
        let spill = self.spill;
        self.clear();
        self.spill = spill;
        self.update();
        for e in keep {
            if bucket_index(e.hash, buckets, modulus) == other_index {
                other.insert(e.offset, e.size, e.hash);
            } else {
                self.insert(e.offset, e.size, e.hash);
            }
        }
    }

    /// Walks this bucket and its spill chain for a record whose stored hash
    /// is `hash` and whose key bytes equal `key`, returning the record's
    /// `(offset, value_size)`.
    pub fn find_in_chain<F: File>(
        &self,
        df: &F,
        key: &[u8],
        hash: u64,
    ) -> Result<Option<(u64, u64)>> {
        if let Some(found) = self.scan(df, key, hash)? {
            return Ok(Some(found));
        }
        let mut spill = self.spill;
        let mut block = vec![0u8; self.buf.len()];
        while spill != 0 {
            let b = load_spill(df, spill, &mut block)?;
            if let Some(found) = b.scan(df, key, hash)? {
                return Ok(Some(found));
            }
            spill = b.spill();
        }
        Ok(None)
    }

    /// Scans this block's own entries for a hash-and-key match.
    fn scan<F: File>(&self, df: &F, key: &[u8], hash: u64) -> Result<Option<(u64, u64)>> {
        let mut candidate = vec![0u8; key.len()];
        let mut i = self.lower_bound(hash);
        while i < self.count {
            let e = self.at(i);
            if e.hash != hash {
                break;
            }
            df.read_at(e.offset + DAT_RECORD_PREFIX_SIZE as u64, &mut candidate)?;
            if candidate == key {
                return Ok(Some((e.offset, e.size)));
            }
            i += 1;
        }
        Ok(None)
    }

    /// Rewrites the block header from the parsed fields.
    fn update(&mut self) {
        let mut os = OStream::new(&mut self.buf[..BUCKET_HEADER_SIZE]);
        os.write_u16(self.count as u16).unwrap();
        os.write_u48(self.spill).unwrap();
    }
}

/// Spills `b` into the data file if it has no room left.
pub fn maybe_spill<F: File>(b: &mut Bucket<'_>, w: &mut BulkWriter<'_, F>) -> Result<()> {
    if b.full() {
        b.spill_to(w)?;
    }
    Ok(())
}

/// Reads the spill record at `offset` in the data file into `block` and
/// returns a bucket view over it. `block` must be a full block-size buffer;
/// bytes past the payload are zeroed.
pub fn load_spill<'a, F: File>(df: &F, offset: u64, block: &'a mut [u8]) -> Result<Bucket<'a>> {
    let mut prefix = [0u8; SPILL_PREFIX_SIZE];
    df.read_at(offset, &mut prefix).map_err(|e| match e {
        vfs::Error::ShortRead => Error::ShortSpill,
        other => other.into(),
    })?;

    let mut is = IStream::new(&prefix);
    let marker = is.read_u48()?;
    let size = is.read_u16()? as usize;
    if marker != 0 || size < BUCKET_HEADER_SIZE || size > block.len() {
        return Err(Error::ShortSpill);
    }

    block.fill(0);
    df.read_at(offset + SPILL_PREFIX_SIZE as u64, &mut block[..size])
        .map_err(|e| match e {
            vfs::Error::ShortRead => Error::ShortSpill,
            other => other.into(),
        })?;
    Bucket::existing(block)
}
