//! Bounds-checked binary reader/writer primitives.
//!
//! All container integers are little-endian. Strings are u32-length-prefixed
//! UTF-8 byte sequences bounded at 16 MiB; blobs are bounded at 256 MiB.

use crate::error::{Result, WaxError};
use crate::format::{MAX_BLOB_BYTES, MAX_STRING_BYTES};

/// Sequential reader over a byte slice. Every read is bounds-checked and a
/// failed read names the field being decoded.
pub struct BinaryCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    /// Error domain tag, e.g. "TOC" or "WAL entry". Used in messages only.
    what: &'static str,
}

impl<'a> BinaryCursor<'a> {
    pub fn new(bytes: &'a [u8], what: &'static str) -> Self {
        Self {
            bytes,
            pos: 0,
            what,
        }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn ensure(&self, count: usize, context: &str) -> Result<()> {
        if count > self.remaining() {
            return Err(WaxError::format(format!(
                "truncated buffer while reading {context}"
            )));
        }
        Ok(())
    }

    pub fn read_u8(&mut self, context: &str) -> Result<u8> {
        self.ensure(1, context)?;
        let value = self.bytes[self.pos];
        self.pos += 1;
        Ok(value)
    }

    pub fn read_u16(&mut self, context: &str) -> Result<u16> {
        self.ensure(2, context)?;
        let value = u16::from_le_bytes(self.bytes[self.pos..self.pos + 2].try_into().unwrap());
        self.pos += 2;
        Ok(value)
    }

    pub fn read_u32(&mut self, context: &str) -> Result<u32> {
        self.ensure(4, context)?;
        let value = u32::from_le_bytes(self.bytes[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(value)
    }

    pub fn read_u64(&mut self, context: &str) -> Result<u64> {
        self.ensure(8, context)?;
        let value = u64::from_le_bytes(self.bytes[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        Ok(value)
    }

    pub fn read_i64(&mut self, context: &str) -> Result<i64> {
        Ok(self.read_u64(context)? as i64)
    }

    pub fn read_f32(&mut self, context: &str) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32(context)?))
    }

    pub fn read_fixed<const N: usize>(&mut self, context: &str) -> Result<[u8; N]> {
        self.ensure(N, context)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    pub fn read_bytes_len32(&mut self, max_bytes: usize, context: &str) -> Result<Vec<u8>> {
        let length = self.read_u32(context)? as usize;
        if length > max_bytes {
            return Err(WaxError::format(format!("{context} exceeds limit")));
        }
        self.ensure(length, context)?;
        let out = self.bytes[self.pos..self.pos + length].to_vec();
        self.pos += length;
        Ok(out)
    }

    pub fn read_string(&mut self, context: &str) -> Result<String> {
        let bytes = self.read_bytes_len32(MAX_STRING_BYTES, context)?;
        String::from_utf8(bytes)
            .map_err(|_| WaxError::format(format!("{context} is not valid UTF-8")))
    }

    pub fn skip(&mut self, count: usize, context: &str) -> Result<()> {
        self.ensure(count, context)?;
        self.pos += count;
        Ok(())
    }

    pub fn skip_bytes_len32(&mut self, max_bytes: usize, context: &str) -> Result<()> {
        let length = self.read_u32(context)? as usize;
        if length > max_bytes {
            return Err(WaxError::format(format!("{context} exceeds limit")));
        }
        self.skip(length, context)
    }

    pub fn skip_string(&mut self, context: &str) -> Result<()> {
        self.skip_bytes_len32(MAX_STRING_BYTES, context)
    }

    pub fn skip_blob(&mut self, context: &str) -> Result<()> {
        self.skip_bytes_len32(MAX_BLOB_BYTES, context)
    }

    /// Optional-field tag: 0 = absent, 1 = present (then `reader` consumes
    /// the value). Any other tag value is a format error.
    pub fn read_optional<T>(
        &mut self,
        field: &str,
        reader: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<Option<T>> {
        match self.read_u8(field)? {
            0 => Ok(None),
            1 => Ok(Some(reader(self)?)),
            _ => Err(WaxError::format(format!(
                "invalid optional tag for {field}"
            ))),
        }
    }

    /// Fails unless the cursor consumed the buffer exactly.
    pub fn finish(&self) -> Result<()> {
        if self.pos != self.bytes.len() {
            return Err(WaxError::format(format!(
                "excess bytes while decoding {}",
                self.what
            )));
        }
        Ok(())
    }
}

/// Append-only little-endian byte builder.
#[derive(Default)]
pub struct BinaryBuilder {
    bytes: Vec<u8>,
}

impl BinaryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn append_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn append_u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn append_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn append_u64(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn append_i64(&mut self, value: i64) {
        self.append_u64(value as u64);
    }

    pub fn append_f32(&mut self, value: f32) {
        self.append_u32(value.to_bits());
    }

    pub fn append_fixed(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn append_string(&mut self, value: &str) {
        self.append_u32(value.len() as u32);
        self.bytes.extend_from_slice(value.as_bytes());
    }

    pub fn append_optional_u64(&mut self, value: Option<u64>) {
        match value {
            Some(v) => {
                self.append_u8(1);
                self.append_u64(v);
            }
            None => self.append_u8(0),
        }
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}
