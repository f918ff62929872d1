//! Store lifecycle: create/open round-trips, mutation surface, verify,
//! repair and the writer lease.

mod common;

use tempfile::TempDir;
use waxstore::format::toc::FrameStatus;
use waxstore::store::StoreOptions;
use waxstore::{Metadata, WaxError, WaxStore};

const SMALL_WAL: StoreOptions = StoreOptions { wal_size: 64 * 1024 };

fn create_store(dir: &TempDir) -> WaxStore {
    common::init_logging();
    WaxStore::create_with_options(dir.path().join("memory.wax"), SMALL_WAL).unwrap()
}

fn reopen(dir: &TempDir) -> WaxStore {
    WaxStore::open(dir.path().join("memory.wax"), true).unwrap()
}

// ---------------------------------------------------------------------------
// Create / open round-trips
// ---------------------------------------------------------------------------

#[test]
fn empty_store_roundtrip() {
    let dir = TempDir::new().unwrap();
    {
        let mut store = create_store(&dir);
        let stats = store.stats();
        assert_eq!(stats.frame_count, 0);
        assert_eq!(stats.pending_frames, 0);
        assert_eq!(stats.generation, 0);
        store.close().unwrap();
    }
    {
        let mut store = reopen(&dir);
        assert_eq!(store.stats().frame_count, 0);
        assert_eq!(store.stats().generation, 0);
        store.close().unwrap();
    }
}

#[test]
fn corrupted_footer_magic_fails_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("memory.wax");
    {
        let mut store = create_store(&dir);
        store.close().unwrap();
    }

    let mut bytes = std::fs::read(&path).unwrap();
    let footer_offset = bytes.len() - 64;
    bytes[footer_offset] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let err = WaxStore::open(&path, true).unwrap_err();
    assert!(
        err.to_string().contains("no valid footer"),
        "unexpected error: {err}"
    );
}

#[test]
fn put_commit_reopen_preserves_content() {
    let dir = TempDir::new().unwrap();
    let content = [0xAAu8, 0xBB, 0xCC, 0xDD];
    {
        let mut store = create_store(&dir);
        let id = store.put(&content, &Metadata::new()).unwrap();
        assert_eq!(id, 0);
        assert_eq!(store.stats().pending_frames, 1);

        store.commit().unwrap();
        let stats = store.stats();
        assert_eq!(stats.frame_count, 1);
        assert_eq!(stats.pending_frames, 0);
        assert!(stats.generation >= 1);
        store.close().unwrap();
    }
    {
        let mut store = reopen(&dir);
        assert_eq!(store.frame_content(0).unwrap(), content);
        store.close().unwrap();
    }
}

#[test]
fn close_auto_commits_local_mutations() {
    let dir = TempDir::new().unwrap();
    {
        let mut store = create_store(&dir);
        store.put(b"auto", &Metadata::new()).unwrap();
        store.close().unwrap();
    }
    {
        let mut store = reopen(&dir);
        assert_eq!(store.stats().frame_count, 1);
        assert_eq!(store.stats().pending_frames, 0);
        store.close().unwrap();
    }
}

#[test]
fn recovered_pending_wal_is_not_auto_committed_by_close() {
    let dir = TempDir::new().unwrap();
    {
        let mut store = create_store(&dir);
        store.put(b"committed", &Metadata::new()).unwrap();
        store.commit().unwrap();
        store.put(b"pending", &Metadata::new()).unwrap();
        // Simulate a crash: drop without close. The lease is released but
        // no commit happens.
        drop(store);
    }
    {
        // The pending frame is visible as pending, and close must leave it
        // pending (it is not a local mutation of this process).
        let mut store = reopen(&dir);
        assert_eq!(store.stats().frame_count, 1);
        assert_eq!(store.stats().pending_frames, 1);
        store.close().unwrap();
    }
    {
        // Still pending after the close above; an explicit commit folds it.
        let mut store = reopen(&dir);
        assert_eq!(store.stats().pending_frames, 1);
        store.commit().unwrap();
        assert_eq!(store.stats().frame_count, 2);
        store.close().unwrap();
    }
}

#[test]
fn empty_payload_frame_roundtrips() {
    let dir = TempDir::new().unwrap();
    let mut store = create_store(&dir);
    let id = store.put(&[], &Metadata::new()).unwrap();
    store.commit().unwrap();
    assert_eq!(store.frame_content(id).unwrap(), Vec::<u8>::new());
    let meta = store.frame_meta(id).unwrap();
    assert_eq!(meta.payload_length, 0);
    assert!(meta.stored_checksum.is_none());
    store.close().unwrap();
}

// ---------------------------------------------------------------------------
// Mutation surface
// ---------------------------------------------------------------------------

#[test]
fn put_batch_returns_dense_ids() {
    let dir = TempDir::new().unwrap();
    let mut store = create_store(&dir);
    let ids = store
        .put_batch(&[b"a".to_vec(), b"b".to_vec(), b"c".to_vec()], &[])
        .unwrap();
    assert_eq!(ids, vec![0, 1, 2]);

    let err = store
        .put_batch(&[b"a".to_vec()], &[Metadata::new(), Metadata::new()])
        .unwrap_err();
    assert!(err.to_string().contains("metadatas size"));
    store.close().unwrap();
}

#[test]
fn delete_marks_frame_deleted_at_commit() {
    let dir = TempDir::new().unwrap();
    let mut store = create_store(&dir);
    store.put(b"doomed", &Metadata::new()).unwrap();
    store.commit().unwrap();
    assert_eq!(store.frame_meta(0).unwrap().status, FrameStatus::Live);

    store.delete(0).unwrap();
    store.commit().unwrap();
    assert_eq!(store.frame_meta(0).unwrap().status, FrameStatus::Deleted);

    assert!(matches!(store.delete(9), Err(WaxError::Store(_))));
    store.close().unwrap();
}

#[test]
fn supersede_links_both_directions() {
    let dir = TempDir::new().unwrap();
    let mut store = create_store(&dir);
    store.put(b"old", &Metadata::new()).unwrap();
    store.put(b"new", &Metadata::new()).unwrap();
    store.supersede(0, 1).unwrap();
    store.commit().unwrap();

    assert_eq!(store.frame_meta(0).unwrap().superseded_by, Some(1));
    assert_eq!(store.frame_meta(1).unwrap().supersedes, Some(0));
    store.close().unwrap();
}

#[test]
fn supersede_rejects_self_reference_and_out_of_range() {
    let dir = TempDir::new().unwrap();
    let mut store = create_store(&dir);
    store.put(b"only", &Metadata::new()).unwrap();
    assert!(store.supersede(0, 0).is_err());
    assert!(store.supersede(0, 5).is_err());
    store.close().unwrap();
}

#[test]
fn supersede_conflict_fails_commit() {
    let dir = TempDir::new().unwrap();
    let mut store = create_store(&dir);
    store.put(b"a", &Metadata::new()).unwrap();
    store.put(b"b", &Metadata::new()).unwrap();
    store.put(b"c", &Metadata::new()).unwrap();
    store.supersede(0, 1).unwrap();
    store.supersede(0, 2).unwrap();
    let err = store.commit().unwrap_err();
    assert!(err.to_string().contains("supersede conflict"));
    drop(store);
}

#[test]
fn supersede_cycle_rejected_and_store_recovers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("memory.wax");
    {
        let mut store = create_store(&dir);
        store.put(b"a", &Metadata::new()).unwrap();
        store.put(b"b", &Metadata::new()).unwrap();
        store.supersede(0, 1).unwrap();
        store.supersede(1, 0).unwrap();
        let err = store.commit().unwrap_err();
        assert!(err.to_string().contains("cycle"), "unexpected error: {err}");
        drop(store);
    }
    {
        let mut store = WaxStore::open(&path, true).unwrap();
        assert_eq!(store.stats().frame_count, 0, "nothing was committed");
        store.close().unwrap();
    }
}

#[test]
fn chained_supersede_is_not_a_cycle() {
    let dir = TempDir::new().unwrap();
    let mut store = create_store(&dir);
    for content in [b"v1".as_slice(), b"v2", b"v3"] {
        store.put(content, &Metadata::new()).unwrap();
    }
    store.supersede(0, 1).unwrap();
    store.supersede(1, 2).unwrap();
    store.commit().unwrap();
    assert_eq!(store.frame_meta(2).unwrap().supersedes, Some(1));
    assert_eq!(store.frame_meta(0).unwrap().superseded_by, Some(1));
    store.close().unwrap();
}

#[test]
fn wal_stats_track_appends_and_checkpoints() {
    let dir = TempDir::new().unwrap();
    let mut store = create_store(&dir);
    assert_eq!(store.wal_stats().last_seq, 0);

    store.put(b"x", &Metadata::new()).unwrap();
    let stats = store.wal_stats();
    assert_eq!(stats.last_seq, 1);
    assert!(stats.pending_bytes > 0);
    assert_eq!(stats.write_call_count, 1);

    store.commit().unwrap();
    let stats = store.wal_stats();
    assert_eq!(stats.pending_bytes, 0);
    assert_eq!(stats.checkpoint_pos, stats.write_pos);
    assert_eq!(stats.committed_seq, 1);
    assert_eq!(stats.checkpoint_count, 1);
    store.close().unwrap();
}

#[test]
fn replay_snapshot_fast_path_on_clean_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let mut store = create_store(&dir);
        store.put(b"snap", &Metadata::new()).unwrap();
        store.commit().unwrap();
        store.close().unwrap();
    }
    {
        let mut store = reopen(&dir);
        assert_eq!(store.wal_stats().replay_snapshot_hit_count, 1);
        assert_eq!(store.stats().frame_count, 1);
        store.close().unwrap();
    }
}

// ---------------------------------------------------------------------------
// Verify / repair
// ---------------------------------------------------------------------------

#[test]
fn deep_verify_detects_payload_corruption() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("memory.wax");
    let mut store = create_store(&dir);
    store.put(b"precious bytes", &Metadata::new()).unwrap();
    store.commit().unwrap();
    store.verify(true).unwrap();

    let payload_offset = store.frame_meta(0).unwrap().payload_offset;
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[payload_offset as usize] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let err = store.verify(true).unwrap_err();
    assert!(err.to_string().contains("checksum mismatch"));
    drop(store);
}

#[test]
fn shallow_verify_skips_payload_hashing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("memory.wax");
    let mut store = create_store(&dir);
    store.put(b"precious bytes", &Metadata::new()).unwrap();
    store.commit().unwrap();

    let payload_offset = store.frame_meta(0).unwrap().payload_offset;
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[payload_offset as usize] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    store.verify(false).unwrap();
    assert!(store.verify(true).is_err());
    drop(store);
}

#[test]
fn repair_truncates_trailing_bytes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("memory.wax");
    {
        let mut store = create_store(&dir);
        store.put(b"kept", &Metadata::new()).unwrap();
        store.commit().unwrap();
        store.close().unwrap();
    }
    let clean_len = std::fs::metadata(&path).unwrap().len();

    let mut bytes = std::fs::read(&path).unwrap();
    bytes.extend_from_slice(&[0xEE; 500]);
    std::fs::write(&path, &bytes).unwrap();

    {
        let mut store = WaxStore::open(&path, true).unwrap();
        assert_eq!(store.stats().frame_count, 1);
        store.close().unwrap();
    }
    assert_eq!(std::fs::metadata(&path).unwrap().len(), clean_len);
}

// ---------------------------------------------------------------------------
// Lease and lifecycle
// ---------------------------------------------------------------------------

#[test]
fn second_open_is_rejected_while_lease_held() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("memory.wax");
    let mut store = create_store(&dir);

    let err = WaxStore::open(&path, true).unwrap_err();
    assert!(matches!(err, WaxError::Store(_)), "got {err:?}");

    store.close().unwrap();
    let mut store = WaxStore::open(&path, true).unwrap();
    store.close().unwrap();
}

#[test]
fn stale_lock_file_blocks_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("memory.wax");
    {
        let mut store = create_store(&dir);
        store.close().unwrap();
    }

    let lock_path = dir.path().join("memory.wax.lock");
    std::fs::write(&lock_path, b"").unwrap();
    let err = WaxStore::open(&path, true).unwrap_err();
    assert!(err.to_string().contains("lease"), "unexpected error: {err}");

    std::fs::remove_file(&lock_path).unwrap();
    let mut store = WaxStore::open(&path, true).unwrap();
    store.close().unwrap();
}

#[test]
fn operations_after_close_fail() {
    let dir = TempDir::new().unwrap();
    let mut store = create_store(&dir);
    store.close().unwrap();
    assert!(store.put(b"late", &Metadata::new()).is_err());
    assert!(store.delete(0).is_err());
    assert!(store.commit().is_err());
}

#[test]
fn frame_meta_of_uncommitted_frame_fails() {
    let dir = TempDir::new().unwrap();
    let mut store = create_store(&dir);
    store.put(b"staged", &Metadata::new()).unwrap();
    assert!(store.frame_meta(0).is_err(), "pending frames are not readable");
    store.commit().unwrap();
    assert!(store.frame_meta(0).is_ok());
    store.close().unwrap();
}
