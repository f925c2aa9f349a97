//! Sequential iteration over a data file.

use std::path::Path;

use format::{DatHeader, DAT_HEADER_SIZE, DAT_RECORD_PREFIX_SIZE};
use vfs::{BulkReader, File, OpenMode};

use crate::error::dat_scan;
use crate::Result;

/// Scans every data record in a data file, calling `cb(key, value)` for
/// each. Returning `false` from the callback stops the scan.
///
/// Spill records are ordinary data-file content here: the scan steps over
/// their payload without surfacing them. `read_size` is the scan buffer.
pub fn visit<F, C, P>(dat_path: P, read_size: usize, mut cb: C) -> Result<()>
where
    F: File,
    C: FnMut(&[u8], &[u8]) -> bool,
    P: AsRef<Path>,
{
    let df = F::open(OpenMode::Scan, dat_path)?;
    let dh = DatHeader::read(&df)?;
    dh.validate()?;
    let df_size = df.size()?;

    let mut r = BulkReader::new(&df, DAT_HEADER_SIZE, df_size, read_size);
    while !r.eof() {
        let mut is = r.prepare(DAT_RECORD_PREFIX_SIZE).map_err(dat_scan)?;
        let size = is.read_u48()?;
        if size > 0 {
            let mut is = r
                .prepare(dh.key_size as usize + size as usize)
                .map_err(dat_scan)?;
            let key = is.data(dh.key_size as usize)?;
            let value = is.data(size as usize)?;
            if !cb(key, value) {
                break;
            }
        } else {
            let mut is = r.prepare(codec::SIZE_U16).map_err(dat_scan)?;
            let skip = is.read_u16()? as usize;
            r.prepare(skip).map_err(dat_scan)?;
        }
    }
    Ok(())
}
