//! WAL ring writer.
//!
//! Appends checksummed records at `write_pos`, emitting a padding record
//! when a record would straddle the ring end and an all-zero sentinel after
//! every record so a scan terminates at the stream head. The sentinel is
//! coalesced into the record write when it lands contiguously after the
//! record; otherwise it is a second write at the wrapped cursor.
//!
//! Capacity guard: a record is admitted only while `header + payload +
//! sentinel` fits in `wal_size - pending_bytes`, so the sentinel slot never
//! overwrites unconsumed records.

use std::fs::File;

use crate::digest::{empty_digest, sha256};
use crate::error::{Result, WaxError};
use crate::fsio::write_at;
use crate::wal::record::{WalRecordHeader, FLAG_PADDING, RECORD_HEADER_SIZE};

/// Writer cursor state, carried by the store between operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalCursors {
    pub write_pos: u64,
    pub checkpoint_pos: u64,
    pub pending_bytes: u64,
    pub last_sequence: u64,
    pub wrap_count: u64,
    pub checkpoint_count: u64,
    pub sentinel_write_count: u64,
    pub write_call_count: u64,
}

pub struct WalRingWriter<'a> {
    file: &'a mut File,
    wal_offset: u64,
    wal_size: u64,
    cursors: WalCursors,
}

impl<'a> WalRingWriter<'a> {
    /// Writer over a fresh ring (all cursors zero).
    pub fn new(file: &'a mut File, wal_offset: u64, wal_size: u64) -> Self {
        Self::with_cursors(file, wal_offset, wal_size, WalCursors::default())
    }

    pub fn with_cursors(
        file: &'a mut File,
        wal_offset: u64,
        wal_size: u64,
        cursors: WalCursors,
    ) -> Self {
        Self {
            file,
            wal_offset,
            wal_size,
            cursors,
        }
    }

    pub fn cursors(&self) -> WalCursors {
        self.cursors
    }

    pub fn write_pos(&self) -> u64 {
        self.cursors.write_pos
    }

    pub fn checkpoint_pos(&self) -> u64 {
        self.cursors.checkpoint_pos
    }

    pub fn pending_bytes(&self) -> u64 {
        self.cursors.pending_bytes
    }

    pub fn last_sequence(&self) -> u64 {
        self.cursors.last_sequence
    }

    pub fn wrap_count(&self) -> u64 {
        self.cursors.wrap_count
    }

    pub fn checkpoint_count(&self) -> u64 {
        self.cursors.checkpoint_count
    }

    pub fn sentinel_write_count(&self) -> u64 {
        self.cursors.sentinel_write_count
    }

    pub fn write_call_count(&self) -> u64 {
        self.cursors.write_call_count
    }

    /// True iff a payload of `payload_len` bytes can be appended now.
    pub fn can_append(&self, payload_len: u64) -> bool {
        self.check_capacity(payload_len).is_ok()
    }

    fn check_capacity(&self, payload_len: u64) -> Result<()> {
        if self.cursors.last_sequence == u64::MAX {
            return Err(WaxError::wal("wal sequence numbers exhausted"));
        }
        let record = RECORD_HEADER_SIZE
            .checked_add(payload_len)
            .ok_or_else(|| WaxError::wal("wal payload length overflow"))?;
        let needed = record
            .checked_add(RECORD_HEADER_SIZE) // inline sentinel reservation
            .ok_or_else(|| WaxError::wal("wal payload length overflow"))?;
        if needed > self.wal_size.saturating_sub(self.cursors.pending_bytes) {
            return Err(WaxError::wal("wal ring capacity exceeded"));
        }
        Ok(())
    }

    /// Append one record. Returns the sequence assigned to the data record
    /// (padding records consume their own sequence numbers).
    pub fn append(&mut self, payload: &[u8]) -> Result<u64> {
        if payload.is_empty() {
            return Err(WaxError::wal("wal payload must be non-empty"));
        }
        if payload.len() as u64 > u32::MAX as u64 {
            return Err(WaxError::wal("wal payload length overflow"));
        }
        self.check_capacity(payload.len() as u64)?;
        self.append_unchecked(payload)
    }

    /// Append a batch atomically with respect to overflow: either every
    /// payload is admitted (worst-case padding included) or nothing is
    /// written and the writer state is untouched.
    pub fn append_batch(&mut self, payloads: &[Vec<u8>]) -> Result<Vec<u64>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        // Dry-run the ring walk to bound the total including padding.
        let mut pos = self.cursors.write_pos;
        let mut seq = self.cursors.last_sequence;
        let mut total: u64 = 0;
        for payload in payloads {
            if payload.is_empty() {
                return Err(WaxError::wal("wal payload must be non-empty"));
            }
            if payload.len() as u64 > u32::MAX as u64 {
                return Err(WaxError::wal("wal payload length overflow"));
            }
            let record = RECORD_HEADER_SIZE + payload.len() as u64;
            if record + RECORD_HEADER_SIZE > self.wal_size {
                return Err(WaxError::wal("wal ring capacity exceeded"));
            }
            let remaining = self.wal_size - pos;
            if remaining < record {
                // Tail is either skipped (no header fits) or filled by a
                // padding record, which consumes a sequence number.
                if remaining >= RECORD_HEADER_SIZE {
                    if seq == u64::MAX {
                        return Err(WaxError::wal("wal sequence numbers exhausted"));
                    }
                    seq += 1;
                }
                total += remaining;
                pos = 0;
            }
            if seq == u64::MAX {
                return Err(WaxError::wal("wal sequence numbers exhausted"));
            }
            seq += 1;
            total += record;
            pos = (pos + record) % self.wal_size;
        }
        let needed = total
            .checked_add(RECORD_HEADER_SIZE)
            .ok_or_else(|| WaxError::wal("wal payload length overflow"))?;
        if needed > self.wal_size.saturating_sub(self.cursors.pending_bytes) {
            return Err(WaxError::wal("wal ring capacity exceeded"));
        }

        let mut sequences = Vec::with_capacity(payloads.len());
        for payload in payloads {
            sequences.push(self.append_unchecked(payload)?);
        }
        Ok(sequences)
    }

    fn append_unchecked(&mut self, payload: &[u8]) -> Result<u64> {
        let record_len = RECORD_HEADER_SIZE + payload.len() as u64;
        let remaining = self.wal_size - self.cursors.write_pos;
        if remaining < record_len {
            self.wrap_tail(remaining)?;
        }

        let sequence = self
            .cursors
            .last_sequence
            .checked_add(1)
            .ok_or_else(|| WaxError::wal("wal sequence numbers exhausted"))?;
        let header = WalRecordHeader {
            sequence,
            length: payload.len() as u32,
            flags: 0,
            checksum: sha256(payload),
        };

        let record_start = self.cursors.write_pos;
        let record_end = record_start + record_len;
        let remaining_after = self.wal_size - record_end;

        let mut bytes = Vec::with_capacity(record_len as usize + RECORD_HEADER_SIZE as usize);
        bytes.extend_from_slice(&header.encode());
        bytes.extend_from_slice(payload);
        if remaining_after >= RECORD_HEADER_SIZE {
            // Sentinel lands contiguously after the record; coalesce into
            // one write call.
            bytes.extend_from_slice(&[0u8; RECORD_HEADER_SIZE as usize]);
            write_at(self.file, self.wal_offset + record_start, &bytes)?;
            self.cursors.write_call_count += 1;
        } else {
            write_at(self.file, self.wal_offset + record_start, &bytes)?;
            write_at(self.file, self.wal_offset, &[0u8; RECORD_HEADER_SIZE as usize])?;
            self.cursors.write_call_count += 2;
        }
        self.cursors.sentinel_write_count += 1;

        self.cursors.write_pos = record_end % self.wal_size;
        if self.cursors.write_pos == 0 {
            self.cursors.wrap_count += 1;
        }
        self.cursors.pending_bytes += record_len;
        self.cursors.last_sequence = sequence;
        Ok(sequence)
    }

    /// Consume the `span` bytes between `write_pos` and the ring end: a
    /// padding record when a header fits, a silent skip otherwise (scans
    /// skip sub-header tails unconditionally).
    fn wrap_tail(&mut self, span: u64) -> Result<()> {
        if span >= RECORD_HEADER_SIZE {
            let sequence = self
                .cursors
                .last_sequence
                .checked_add(1)
                .ok_or_else(|| WaxError::wal("wal sequence numbers exhausted"))?;
            let padding_payload = span - RECORD_HEADER_SIZE;
            let header = WalRecordHeader {
                sequence,
                length: padding_payload as u32,
                flags: FLAG_PADDING,
                checksum: empty_digest(),
            };
            let mut bytes = vec![0u8; span as usize];
            bytes[..RECORD_HEADER_SIZE as usize].copy_from_slice(&header.encode());
            write_at(self.file, self.wal_offset + self.cursors.write_pos, &bytes)?;
            self.cursors.write_call_count += 1;
            self.cursors.last_sequence = sequence;
            tracing::debug!(span, sequence, "wal ring wrapped with padding record");
        }
        self.cursors.pending_bytes += span;
        self.cursors.write_pos = 0;
        self.cursors.wrap_count += 1;
        Ok(())
    }

    /// Retire all pending records: the checkpoint catches up to the write
    /// cursor and pending bytes reset.
    pub fn record_checkpoint(&mut self) {
        self.cursors.checkpoint_pos = self.cursors.write_pos;
        self.cursors.pending_bytes = 0;
        self.cursors.checkpoint_count += 1;
    }
}
