//! Headers of the data, key, and log files.
//!
//! Layouts (offsets in bytes, all integers big-endian, reserved tail zero):
//!
//! ```text
//! dat: tag[8] ver:16 uid:64 appnum:64 key_size:16                  = 28 + 36 reserved
//! key: tag[8] ver:16 uid:64 appnum:64 key_size:16 salt:64 pepper:64
//!      block_size:16 load_factor:16 buckets:64 modulus:64          = 64 exactly
//! log: tag[8] ver:16 uid:64 appnum:64 key_size:16 salt:64 pepper:64
//!      block_size:16 key_file_size:64 dat_file_size:64             = 62 + 2 reserved
//! ```

use codec::{IStream, OStream};
use vfs::File;

use crate::{
    bucket_capacity, ceil_pow2, Error, Result, CURRENT_VERSION, DAT_TYPE, KEY_TYPE, LOG_TYPE,
    MAX_BLOCK_SIZE, MIN_BLOCK_SIZE,
};

/// Header of the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatHeader {
    pub version: u16,
    pub uid: u64,
    pub appnum: u64,
    pub key_size: u16,
}

impl DatHeader {
    pub fn encode(&self) -> Result<[u8; 64]> {
        let mut block = [0u8; 64];
        let mut os = OStream::new(&mut block);
        os.data(DAT_TYPE)?;
        os.write_u16(self.version)?;
        os.write_u64(self.uid)?;
        os.write_u64(self.appnum)?;
        os.write_u16(self.key_size)?;
        Ok(block)
    }

    pub fn decode(block: &[u8; 64]) -> Result<Self> {
        let mut is = IStream::new(block);
        if is.data(8)? != DAT_TYPE {
            return Err(Error::NotDataFile);
        }
        Ok(Self {
            version: is.read_u16()?,
            uid: is.read_u64()?,
            appnum: is.read_u64()?,
            key_size: is.read_u16()?,
        })
    }

    /// Reads and decodes the header from the start of `f`.
    pub fn read<F: File>(f: &F) -> Result<Self> {
        let mut block = [0u8; 64];
        f.read_at(0, &mut block)?;
        Self::decode(&block)
    }

    /// Writes the header at the start of `f`.
    pub fn write<F: File>(&self, f: &F) -> Result<()> {
        Ok(f.write_at(0, &self.encode()?)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != CURRENT_VERSION {
            return Err(Error::InvalidVersion(self.version));
        }
        if self.key_size == 0 {
            return Err(Error::InvalidKeySize(self.key_size));
        }
        Ok(())
    }
}

/// Header of the key file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyHeader {
    pub version: u16,
    pub uid: u64,
    pub appnum: u64,
    pub key_size: u16,
    pub salt: u64,
    pub pepper: u64,
    pub block_size: u16,
    /// Target fill fraction, as a fraction of 65536.
    pub load_factor: u16,
    pub buckets: u64,
    /// Smallest power of two >= `buckets`; see [`crate::bucket_index`].
    pub modulus: u64,
}

impl KeyHeader {
    pub fn encode(&self) -> Result<[u8; 64]> {
        let mut block = [0u8; 64];
        let mut os = OStream::new(&mut block);
        os.data(KEY_TYPE)?;
        os.write_u16(self.version)?;
        os.write_u64(self.uid)?;
        os.write_u64(self.appnum)?;
        os.write_u16(self.key_size)?;
        os.write_u64(self.salt)?;
        os.write_u64(self.pepper)?;
        os.write_u16(self.block_size)?;
        os.write_u16(self.load_factor)?;
        os.write_u64(self.buckets)?;
        os.write_u64(self.modulus)?;
        Ok(block)
    }

    pub fn decode(block: &[u8; 64]) -> Result<Self> {
        let mut is = IStream::new(block);
        if is.data(8)? != KEY_TYPE {
            return Err(Error::NotKeyFile);
        }
        Ok(Self {
            version: is.read_u16()?,
            uid: is.read_u64()?,
            appnum: is.read_u64()?,
            key_size: is.read_u16()?,
            salt: is.read_u64()?,
            pepper: is.read_u64()?,
            block_size: is.read_u16()?,
            load_factor: is.read_u16()?,
            buckets: is.read_u64()?,
            modulus: is.read_u64()?,
        })
    }

    pub fn read<F: File>(f: &F) -> Result<Self> {
        let mut block = [0u8; 64];
        f.read_at(0, &mut block)?;
        Self::decode(&block)
    }

    pub fn write<F: File>(&self, f: &F) -> Result<()> {
        Ok(f.write_at(0, &self.encode()?)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != CURRENT_VERSION {
            return Err(Error::InvalidVersion(self.version));
        }
        if self.key_size == 0 {
            return Err(Error::InvalidKeySize(self.key_size));
        }
        if !self.block_size.is_power_of_two()
            || self.block_size < MIN_BLOCK_SIZE
            || self.block_size > MAX_BLOCK_SIZE
        {
            return Err(Error::InvalidBlockSize(self.block_size));
        }
        if self.load_factor == 0 {
            return Err(Error::InvalidLoadFactor(self.load_factor));
        }
        if bucket_capacity(self.block_size) == 0 {
            return Err(Error::InvalidCapacity);
        }
        if self.buckets == 0 || self.modulus != ceil_pow2(self.buckets) {
            return Err(Error::InvalidBucketCount(self.buckets));
        }
        Ok(())
    }

    /// Checks that this key file indexes the given data file.
    pub fn verify_dat(&self, dh: &DatHeader) -> Result<()> {
        if self.uid != dh.uid {
            return Err(Error::UidMismatch);
        }
        if self.appnum != dh.appnum {
            return Err(Error::AppnumMismatch);
        }
        if self.key_size != dh.key_size {
            return Err(Error::KeySizeMismatch);
        }
        Ok(())
    }
}

/// Header of the log file.
///
/// `key_file_size` and `dat_file_size` are the committed sizes at the start
/// of the epoch the log belongs to; recovery restores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    pub version: u16,
    pub uid: u64,
    pub appnum: u64,
    pub key_size: u16,
    pub salt: u64,
    pub pepper: u64,
    pub block_size: u16,
    pub key_file_size: u64,
    pub dat_file_size: u64,
}

impl LogHeader {
    pub fn encode(&self) -> Result<[u8; 64]> {
        let mut block = [0u8; 64];
        let mut os = OStream::new(&mut block);
        os.data(LOG_TYPE)?;
        os.write_u16(self.version)?;
        os.write_u64(self.uid)?;
        os.write_u64(self.appnum)?;
        os.write_u16(self.key_size)?;
        os.write_u64(self.salt)?;
        os.write_u64(self.pepper)?;
        os.write_u16(self.block_size)?;
        os.write_u64(self.key_file_size)?;
        os.write_u64(self.dat_file_size)?;
        Ok(block)
    }

    pub fn decode(block: &[u8; 64]) -> Result<Self> {
        let mut is = IStream::new(block);
        if is.data(8)? != LOG_TYPE {
            return Err(Error::NotLogFile);
        }
        Ok(Self {
            version: is.read_u16()?,
            uid: is.read_u64()?,
            appnum: is.read_u64()?,
            key_size: is.read_u16()?,
            salt: is.read_u64()?,
            pepper: is.read_u64()?,
            block_size: is.read_u16()?,
            key_file_size: is.read_u64()?,
            dat_file_size: is.read_u64()?,
        })
    }

    pub fn read<F: File>(f: &F) -> Result<Self> {
        let mut block = [0u8; 64];
        f.read_at(0, &mut block)?;
        Self::decode(&block)
    }

    pub fn write<F: File>(&self, f: &F) -> Result<()> {
        Ok(f.write_at(0, &self.encode()?)?)
    }

    /// Checks that this log belongs to the given key/data pair.
    pub fn verify_key_dat(&self, kh: &KeyHeader, dh: &DatHeader) -> Result<()> {
        if self.uid != kh.uid || self.uid != dh.uid {
            return Err(Error::UidMismatch);
        }
        if self.appnum != kh.appnum {
            return Err(Error::AppnumMismatch);
        }
        if self.key_size != kh.key_size {
            return Err(Error::KeySizeMismatch);
        }
        if self.salt != kh.salt || self.pepper != kh.pepper {
            return Err(Error::HashMismatch);
        }
        if self.block_size != kh.block_size {
            return Err(Error::InvalidBlockSize(self.block_size));
        }
        Ok(())
    }
}
