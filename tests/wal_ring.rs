//! WAL ring writer and scan semantics over a standalone ring file.
//!
//! The numbers here are load-bearing: record = 48-byte header + payload,
//! a 9-byte delete payload makes a 57-byte record, and the ring wrap from
//! position 200 of a 256-byte ring costs a 56-byte padding record.

mod common;

use std::fs::{File, OpenOptions};
use std::path::Path;

use tempfile::TempDir;
use waxstore::wal::{
    is_terminal_marker, record, scan_pending, WalCursors, WalMutation, WalRingWriter,
    RECORD_HEADER_SIZE,
};

fn ring_file(dir: &TempDir, size: u64) -> File {
    let path = dir.path().join("ring.bin");
    std::fs::write(&path, vec![0u8; size as usize]).unwrap();
    open_ring(&path)
}

fn open_ring(path: &Path) -> File {
    OpenOptions::new().read(true).write(true).open(path).unwrap()
}

fn delete_payload(frame_id: u64) -> Vec<u8> {
    record::encode_delete_frame_payload(frame_id)
}

// ---------------------------------------------------------------------------
// Writer scenarios
// ---------------------------------------------------------------------------

#[test]
fn append_coalesces_inline_sentinel() {
    common::init_logging();
    let dir = TempDir::new().unwrap();
    let mut file = ring_file(&dir, 512);

    let mut writer = WalRingWriter::new(&mut file, 0, 512);
    let seq = writer.append(&delete_payload(42)).unwrap();
    assert_eq!(seq, 1, "first append takes sequence 1");
    assert_eq!(writer.write_pos(), 57);
    assert_eq!(writer.pending_bytes(), 57);
    assert_eq!(writer.last_sequence(), 1);
    assert_eq!(writer.sentinel_write_count(), 1, "inline sentinel");
    assert_eq!(writer.write_call_count(), 1, "single coalesced write call");

    let scan = scan_pending(&mut file, 0, 512, 0, 0).unwrap();
    assert_eq!(scan.mutations.len(), 1);
    assert_eq!(
        scan.mutations[0].mutation,
        WalMutation::DeleteFrame { frame_id: 42 }
    );
    assert_eq!(scan.state.last_sequence, 1);
    assert_eq!(scan.state.write_pos, 57);
    assert_eq!(scan.state.pending_bytes, 57);

    assert!(is_terminal_marker(&mut file, 0, 512, 57));
}

#[test]
fn append_wraps_with_padding_record_and_checkpoint() {
    common::init_logging();
    let dir = TempDir::new().unwrap();
    let mut file = ring_file(&dir, 256);

    let mut writer = WalRingWriter::with_cursors(
        &mut file,
        0,
        256,
        WalCursors {
            write_pos: 200,
            checkpoint_pos: 200,
            pending_bytes: 0,
            last_sequence: 9,
            ..WalCursors::default()
        },
    );
    let seq = writer.append(&delete_payload(77)).unwrap();
    assert_eq!(seq, 11, "padding record consumes sequence 10");
    assert_eq!(writer.wrap_count(), 1);
    assert_eq!(writer.write_pos(), 57);
    assert_eq!(writer.pending_bytes(), 113, "56-byte padding + 57-byte record");
    assert_eq!(writer.sentinel_write_count(), 1);
    assert_eq!(writer.write_call_count(), 2, "padding write + data/sentinel write");
    let cursors = writer.cursors();
    drop(writer);

    let scan = scan_pending(&mut file, 0, 256, 200, 9).unwrap();
    assert_eq!(scan.mutations.len(), 1);
    assert_eq!(scan.mutations[0].sequence, 11);
    assert_eq!(
        scan.mutations[0].mutation,
        WalMutation::DeleteFrame { frame_id: 77 }
    );
    assert_eq!(scan.state.last_sequence, 11);
    assert_eq!(scan.state.write_pos, 57);
    assert_eq!(scan.state.pending_bytes, 113);

    let mut writer = WalRingWriter::with_cursors(&mut file, 0, 256, cursors);
    writer.record_checkpoint();
    assert_eq!(writer.checkpoint_pos(), 57, "checkpoint catches up to write_pos");
    assert_eq!(writer.pending_bytes(), 0);
    assert_eq!(writer.checkpoint_count(), 1);
}

#[test]
fn append_rejects_capacity_overflow() {
    let dir = TempDir::new().unwrap();
    let mut file = ring_file(&dir, 256);

    let mut writer = WalRingWriter::with_cursors(
        &mut file,
        0,
        256,
        WalCursors {
            write_pos: 240,
            checkpoint_pos: 240,
            pending_bytes: 240,
            last_sequence: 5,
            ..WalCursors::default()
        },
    );
    assert!(!writer.can_append(9));
    assert!(writer.append(&delete_payload(1)).is_err());
}

#[test]
fn append_reaching_ring_end_uses_separate_sentinel_write() {
    let dir = TempDir::new().unwrap();
    let mut file = ring_file(&dir, 128);

    let mut writer = WalRingWriter::with_cursors(
        &mut file,
        0,
        128,
        WalCursors {
            write_pos: 48,
            checkpoint_pos: 48,
            ..WalCursors::default()
        },
    );
    // 32-byte payload: the 80-byte record fills the ring exactly.
    let payload = vec![0x11u8; 32];
    let seq = writer.append(&payload).unwrap();
    assert_eq!(seq, 1);
    assert_eq!(writer.write_pos(), 0, "cursor wraps at ring end");
    assert_eq!(writer.pending_bytes(), 80);
    assert_eq!(writer.sentinel_write_count(), 1);
    assert_eq!(writer.write_call_count(), 2, "record write + sentinel write");

    let scan = scan_pending(&mut file, 0, 128, 48, 0).unwrap();
    assert!(
        scan.mutations.is_empty(),
        "payload with unknown opcode yields no decoded mutations"
    );
    assert_eq!(scan.state.last_sequence, 1);
    assert_eq!(scan.state.write_pos, 0);
    assert_eq!(scan.state.pending_bytes, 80);
}

#[test]
fn append_batch_assigns_monotonic_sequences() {
    let dir = TempDir::new().unwrap();
    let mut file = ring_file(&dir, 512);

    let mut writer = WalRingWriter::new(&mut file, 0, 512);
    let sequences = writer
        .append_batch(&[delete_payload(5), delete_payload(6)])
        .unwrap();
    assert_eq!(sequences, vec![1, 2]);
    assert_eq!(writer.last_sequence(), 2);
    assert_eq!(writer.pending_bytes(), 114);

    let scan = scan_pending(&mut file, 0, 512, 0, 0).unwrap();
    assert_eq!(scan.mutations.len(), 2);
    assert_eq!(
        scan.mutations[0].mutation,
        WalMutation::DeleteFrame { frame_id: 5 }
    );
    assert_eq!(
        scan.mutations[1].mutation,
        WalMutation::DeleteFrame { frame_id: 6 }
    );
}

#[test]
fn append_batch_overflow_is_atomic() {
    let dir = TempDir::new().unwrap();
    let mut file = ring_file(&dir, 128);

    let mut writer = WalRingWriter::new(&mut file, 0, 128);
    writer.append(&delete_payload(10)).unwrap();

    let before_write_pos = writer.write_pos();
    let before_pending = writer.pending_bytes();
    let before_sequence = writer.last_sequence();
    let before_write_calls = writer.write_call_count();
    let before_scan = scan_pending(&mut file, 0, 128, 0, 0).unwrap();
    assert_eq!(before_scan.mutations.len(), 1);

    let mut writer = WalRingWriter::with_cursors(
        &mut file,
        0,
        128,
        WalCursors {
            write_pos: before_write_pos,
            checkpoint_pos: 0,
            pending_bytes: before_pending,
            last_sequence: before_sequence,
            write_call_count: before_write_calls,
            ..WalCursors::default()
        },
    );
    let err = writer
        .append_batch(&[delete_payload(11), delete_payload(12)])
        .unwrap_err();
    assert!(err.to_string().contains("capacity"));
    assert_eq!(writer.write_pos(), before_write_pos);
    assert_eq!(writer.pending_bytes(), before_pending);
    assert_eq!(writer.last_sequence(), before_sequence);
    assert_eq!(writer.write_call_count(), before_write_calls);

    let after_scan = scan_pending(&mut file, 0, 128, 0, 0).unwrap();
    assert_eq!(after_scan, before_scan, "on-disk ring byte-for-byte unchanged");
}

#[test]
fn sequence_overflow_guard_rejects_all_appends() {
    let dir = TempDir::new().unwrap();
    let mut file = ring_file(&dir, 512);

    let mut writer = WalRingWriter::with_cursors(
        &mut file,
        0,
        512,
        WalCursors {
            last_sequence: u64::MAX,
            ..WalCursors::default()
        },
    );
    assert!(!writer.can_append(9));
    assert!(writer.append(&delete_payload(123)).is_err());
    assert!(writer.append_batch(&[delete_payload(124)]).is_err());

    let scan = scan_pending(&mut file, 0, 512, 0, 0).unwrap();
    assert!(scan.mutations.is_empty());
    assert_eq!(scan.state.write_pos, 0);
}

// ---------------------------------------------------------------------------
// Scan semantics
// ---------------------------------------------------------------------------

#[test]
fn scan_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let mut file = ring_file(&dir, 512);

    let mut writer = WalRingWriter::new(&mut file, 0, 512);
    writer
        .append_batch(&[delete_payload(1), delete_payload(2), delete_payload(3)])
        .unwrap();

    let first = scan_pending(&mut file, 0, 512, 0, 0).unwrap();
    let second = scan_pending(&mut file, 0, 512, 0, 0).unwrap();
    assert_eq!(first, second);
}

#[test]
fn committed_seq_suppresses_folded_mutations() {
    let dir = TempDir::new().unwrap();
    let mut file = ring_file(&dir, 512);

    let mut writer = WalRingWriter::new(&mut file, 0, 512);
    writer
        .append_batch(&[delete_payload(1), delete_payload(2), delete_payload(3)])
        .unwrap();

    let scan = scan_pending(&mut file, 0, 512, 0, 2).unwrap();
    assert_eq!(scan.mutations.len(), 1, "sequences <= committed_seq suppressed");
    assert_eq!(scan.mutations[0].sequence, 3);
    assert_eq!(scan.state.last_sequence, 3, "state walk still covers all records");
    assert_eq!(scan.state.pending_bytes, 57 * 3);
}

#[test]
fn corrupted_checksum_terminates_scan() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ring.bin");
    std::fs::write(&path, vec![0u8; 512]).unwrap();
    let mut file = open_ring(&path);

    let mut writer = WalRingWriter::new(&mut file, 0, 512);
    writer
        .append_batch(&[delete_payload(1), delete_payload(2)])
        .unwrap();
    drop(writer);

    // Corrupt a payload byte of the second record (starts at 57).
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[57 + RECORD_HEADER_SIZE as usize + 3] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let mut file = open_ring(&path);
    let scan = scan_pending(&mut file, 0, 512, 0, 0).unwrap();
    assert_eq!(scan.mutations.len(), 1, "scan stops at the broken record");
    assert_eq!(scan.state.write_pos, 57);
    assert_eq!(scan.state.last_sequence, 1);
}

#[test]
fn undecodable_mutation_stops_decoding_but_not_state_walk() {
    let dir = TempDir::new().unwrap();
    let mut file = ring_file(&dir, 512);

    let mut writer = WalRingWriter::new(&mut file, 0, 512);
    writer.append(&delete_payload(1)).unwrap();
    writer.append(&[0x7F; 9]).unwrap(); // checksums fine, opcode unknown
    writer.append(&delete_payload(3)).unwrap();

    let scan = scan_pending(&mut file, 0, 512, 0, 0).unwrap();
    assert_eq!(scan.mutations.len(), 1, "decoding stops at the bad entry");
    assert_eq!(scan.mutations[0].sequence, 1);
    assert_eq!(scan.state.last_sequence, 3, "state walk consumes all records");
    assert_eq!(scan.state.write_pos, 57 * 3);
    assert_eq!(scan.state.pending_bytes, 57 * 3);
}

#[test]
fn terminal_marker_detection() {
    let dir = TempDir::new().unwrap();
    let mut file = ring_file(&dir, 256);

    assert!(is_terminal_marker(&mut file, 0, 256, 0), "zeroed ring is terminal");
    assert!(
        !is_terminal_marker(&mut file, 0, 256, 250),
        "tail shorter than a header is not terminal"
    );

    let mut writer = WalRingWriter::new(&mut file, 0, 256);
    writer.append(&delete_payload(1)).unwrap();
    assert!(!is_terminal_marker(&mut file, 0, 256, 0), "record header present");
    assert!(is_terminal_marker(&mut file, 0, 256, 57), "sentinel after record");
}
