//! # Codec - fixed-width binary fields
//!
//! Big-endian cursors over in-memory byte slices, used for every on-disk
//! structure in the database: file headers, data records, spill records, and
//! bucket blocks.
//!
//! ## Field widths
//!
//! | Width | Used for                                         |
//! |-------|--------------------------------------------------|
//! | u8    | flags and small counters                         |
//! | u16   | version, key size, block size, counts            |
//! | u24   | reserved for compact counters                    |
//! | u32   | reserved                                         |
//! | u48   | data-file offsets and record sizes               |
//! | u64   | uid, appnum, salt, pepper, hashes, bucket counts |
//!
//! The 48-bit width exists because 2^48 bytes exceeds any practical data
//! file, and dropping 16 bits per field shrinks a bucket entry to 20 bytes,
//! which raises bucket capacity at a given block size.
//!
//! ## Example
//!
//! ```rust
//! use codec::{IStream, OStream};
//!
//! let mut block = [0u8; 8];
//! let mut os = OStream::new(&mut block);
//! os.write_u16(7).unwrap();
//! os.write_u48(0x0000_0123_4567_89ab).unwrap();
//!
//! let mut is = IStream::new(&block);
//! assert_eq!(is.read_u16().unwrap(), 7);
//! assert_eq!(is.read_u48().unwrap(), 0x0000_0123_4567_89ab);
//! ```

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

/// Size in bytes of a u8 field.
pub const SIZE_U8: usize = 1;
/// Size in bytes of a u16 field.
pub const SIZE_U16: usize = 2;
/// Size in bytes of a u24 field.
pub const SIZE_U24: usize = 3;
/// Size in bytes of a u32 field.
pub const SIZE_U32: usize = 4;
/// Size in bytes of a u48 field.
pub const SIZE_U48: usize = 6;
/// Size in bytes of a u64 field.
pub const SIZE_U64: usize = 8;

/// Largest value representable in a 48-bit field.
pub const MAX_U48: u64 = (1 << 48) - 1;

/// A read would extend past the end of the cursor.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("short read")]
pub struct ShortRead;

/// A write would extend past the end of the cursor.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("short write")]
pub struct ShortWrite;

/// Read cursor over a byte slice. Every read advances the position; a read
/// past the end returns [`ShortRead`] and leaves the position unchanged.
pub struct IStream<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> IStream<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes remaining ahead of the cursor.
    #[must_use]
    pub fn remain(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Current cursor position from the start of the slice.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Takes the next `n` bytes as a subslice.
    pub fn data(&mut self, n: usize) -> Result<&'a [u8], ShortRead> {
        if self.remain() < n {
            return Err(ShortRead);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn read_u8(&mut self) -> Result<u8, ShortRead> {
        Ok(self.data(SIZE_U8)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ShortRead> {
        Ok(BigEndian::read_u16(self.data(SIZE_U16)?))
    }

    pub fn read_u24(&mut self) -> Result<u32, ShortRead> {
        Ok(BigEndian::read_u24(self.data(SIZE_U24)?))
    }

    pub fn read_u32(&mut self) -> Result<u32, ShortRead> {
        Ok(BigEndian::read_u32(self.data(SIZE_U32)?))
    }

    pub fn read_u48(&mut self) -> Result<u64, ShortRead> {
        Ok(BigEndian::read_u48(self.data(SIZE_U48)?))
    }

    pub fn read_u64(&mut self) -> Result<u64, ShortRead> {
        Ok(BigEndian::read_u64(self.data(SIZE_U64)?))
    }
}

/// Write cursor over a mutable byte slice. A write past the end returns
/// [`ShortWrite`] and leaves the position unchanged.
pub struct OStream<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> OStream<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes of room remaining ahead of the cursor.
    #[must_use]
    pub fn remain(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Bytes written so far.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.pos
    }

    fn advance(&mut self, n: usize) -> Result<&mut [u8], ShortWrite> {
        if self.buf.len() - self.pos < n {
            return Err(ShortWrite);
        }
        let s = &mut self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    /// Copies `bytes` verbatim at the cursor.
    pub fn data(&mut self, bytes: &[u8]) -> Result<(), ShortWrite> {
        self.advance(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<(), ShortWrite> {
        self.advance(SIZE_U8)?[0] = v;
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16) -> Result<(), ShortWrite> {
        BigEndian::write_u16(self.advance(SIZE_U16)?, v);
        Ok(())
    }

    pub fn write_u24(&mut self, v: u32) -> Result<(), ShortWrite> {
        BigEndian::write_u24(self.advance(SIZE_U24)?, v);
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<(), ShortWrite> {
        BigEndian::write_u32(self.advance(SIZE_U32)?, v);
        Ok(())
    }

    /// Writes the low 48 bits of `v`. The caller is responsible for ensuring
    /// `v <= MAX_U48`; offsets and sizes are validated at the store boundary.
    pub fn write_u48(&mut self, v: u64) -> Result<(), ShortWrite> {
        BigEndian::write_u48(self.advance(SIZE_U48)?, v);
        Ok(())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<(), ShortWrite> {
        BigEndian::write_u64(self.advance(SIZE_U64)?, v);
        Ok(())
    }
}
