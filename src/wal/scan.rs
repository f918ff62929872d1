//! WAL ring scan and recovery.
//!
//! Walks records forward from the checkpoint, verifying per-record checksums
//! and sequence monotonicity. The walk computes the authoritative
//! `(write_pos, last_sequence, pending_bytes)` even when an individual
//! mutation payload no longer decodes: a decode failure stops the *decoding*
//! of later mutations but never the state walk itself.

use std::fs::File;

use crate::digest::{empty_digest, sha256};
use crate::error::{Result, WaxError};
use crate::fsio::read_exact_at;
use crate::wal::record::{
    decode_mutation_payload, PendingMutation, WalRecordHeader, RECORD_HEADER_SIZE,
};

/// Ring state derived from a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalScanState {
    pub last_sequence: u64,
    pub write_pos: u64,
    pub pending_bytes: u64,
}

/// Scan result: ring state plus the mutations newer than `committed_seq`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingScan {
    pub mutations: Vec<PendingMutation>,
    pub state: WalScanState,
}

/// True iff the record header at `cursor` is a stream terminator (all-zero
/// sentinel or zero sequence). A tail too short to hold a header is not a
/// terminal marker.
pub fn is_terminal_marker(file: &mut File, wal_offset: u64, wal_size: u64, cursor: u64) -> bool {
    if wal_size == 0 {
        return true;
    }
    let normalized = cursor % wal_size;
    let remaining = wal_size - normalized;
    if remaining < RECORD_HEADER_SIZE {
        return false;
    }
    match read_exact_at(
        file,
        wal_offset + normalized,
        RECORD_HEADER_SIZE as usize,
    )
    .and_then(|bytes| WalRecordHeader::decode(&bytes))
    {
        Ok(header) => header.is_sentinel() || header.sequence == 0,
        Err(_) => false,
    }
}

/// Scan ring state only (mutations suppressed).
pub fn scan_state(
    file: &mut File,
    wal_offset: u64,
    wal_size: u64,
    checkpoint_pos: u64,
) -> Result<WalScanState> {
    Ok(scan_pending(file, wal_offset, wal_size, checkpoint_pos, u64::MAX)?.state)
}

/// Walk records after `checkpoint_pos`. Mutations with `sequence <=
/// committed_seq` are replay-safe but already folded into the TOC, so they
/// are consumed without being emitted.
pub fn scan_pending(
    file: &mut File,
    wal_offset: u64,
    wal_size: u64,
    checkpoint_pos: u64,
    committed_seq: u64,
) -> Result<PendingScan> {
    if wal_size == 0 {
        return Ok(PendingScan::default());
    }
    if wal_size < RECORD_HEADER_SIZE {
        return Err(WaxError::wal("wal_size smaller than record header"));
    }

    let start = checkpoint_pos % wal_size;
    let mut cursor = start;
    let mut last_sequence: u64 = 0;
    let mut pending_bytes: u64 = 0;
    let mut wrapped = false;
    let mut stop_decoding_pending = false;
    let mut mutations = Vec::new();

    loop {
        let remaining = wal_size - cursor;
        if remaining < RECORD_HEADER_SIZE {
            if wrapped {
                break;
            }
            pending_bytes += remaining;
            cursor = 0;
            wrapped = true;
            if cursor == start {
                break;
            }
            continue;
        }

        let header_bytes =
            read_exact_at(file, wal_offset + cursor, RECORD_HEADER_SIZE as usize)?;
        let header = match WalRecordHeader::decode(&header_bytes) {
            Ok(header) => header,
            Err(_) => break,
        };

        if header.is_sentinel() || header.sequence == 0 {
            break;
        }
        if last_sequence != 0 && header.sequence <= last_sequence {
            break;
        }

        if header.is_padding() {
            if header.checksum != empty_digest() {
                break;
            }
            let skip_bytes = header.length as u64;
            let advance = match RECORD_HEADER_SIZE.checked_add(skip_bytes) {
                Some(advance) => advance,
                None => break,
            };
            if cursor.checked_add(advance).is_none() || cursor + advance > wal_size {
                break;
            }
            cursor = (cursor + advance) % wal_size;
            pending_bytes += advance;
            last_sequence = header.sequence;
            if cursor == 0 {
                wrapped = true;
            }
            if cursor == start {
                break;
            }
            continue;
        }

        let payload_len = header.length as u64;
        if payload_len == 0 {
            break;
        }
        if payload_len > wal_size - RECORD_HEADER_SIZE {
            break;
        }
        if payload_len > remaining - RECORD_HEADER_SIZE {
            break;
        }

        let payload = read_exact_at(
            file,
            wal_offset + cursor + RECORD_HEADER_SIZE,
            payload_len as usize,
        )?;
        if sha256(&payload) != header.checksum {
            break;
        }

        if !stop_decoding_pending && header.sequence > committed_seq {
            match decode_mutation_payload(&payload) {
                Ok(mutation) => mutations.push(PendingMutation {
                    sequence: header.sequence,
                    mutation,
                }),
                Err(_) => {
                    // A record that verified its checksum but no longer
                    // decodes stops mutation emission; the state walk keeps
                    // consuming valid records to land on the true cursor.
                    stop_decoding_pending = true;
                }
            }
        }

        let advance = RECORD_HEADER_SIZE + payload_len;
        cursor += advance;
        if cursor == wal_size {
            cursor = 0;
            wrapped = true;
        }
        pending_bytes += advance;
        last_sequence = header.sequence;
        if cursor == start {
            break;
        }
    }

    Ok(PendingScan {
        mutations,
        state: WalScanState {
            last_sequence,
            write_pos: cursor,
            pending_bytes,
        },
    })
}
