//! Positioned file I/O helpers over the single store-owned handle.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{Result, WaxError};

pub(crate) fn file_size(file: &File) -> Result<u64> {
    Ok(file.metadata()?.len())
}

pub(crate) fn write_at(file: &mut File, offset: u64, bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytes)?;
    Ok(())
}

pub(crate) fn read_exact_at(file: &mut File, offset: u64, length: usize) -> Result<Vec<u8>> {
    if length == 0 {
        return Ok(Vec::new());
    }
    file.seek(SeekFrom::Start(offset))?;
    let mut out = vec![0u8; length];
    file.read_exact(&mut out)
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::UnexpectedEof => WaxError::store("short read"),
            _ => WaxError::Io(err),
        })?;
    Ok(out)
}
