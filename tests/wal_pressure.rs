//! Store behavior under WAL pressure: ring wraps across commits, the
//! capacity guard, and recovery of a well-worn ring.

mod common;

use tempfile::TempDir;
use waxstore::store::StoreOptions;
use waxstore::{Metadata, WaxError, WaxStore};

// Small enough that a few hundred puts wrap the ring.
const TINY_WAL: StoreOptions = StoreOptions { wal_size: 16 * 1024 };

#[test]
fn ring_wraps_across_commit_cycles() {
    common::init_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("memory.wax");
    let mut store = WaxStore::create_with_options(&path, TINY_WAL).unwrap();

    let mut total = 0u64;
    for round in 0..6 {
        for index in 0..40 {
            let content = format!("round {round} item {index}");
            store.put(content.as_bytes(), &Metadata::new()).unwrap();
            total += 1;
        }
        store.commit().unwrap();
        assert_eq!(store.stats().frame_count, total);
        assert_eq!(store.wal_stats().pending_bytes, 0);
    }
    assert!(
        store.wal_stats().wrap_count >= 1,
        "six rounds of forty puts must wrap a 16 KiB ring"
    );

    // Everything stays readable, before and after reopen.
    assert_eq!(store.frame_content(0).unwrap(), b"round 0 item 0");
    assert_eq!(store.frame_content(total - 1).unwrap(), b"round 5 item 39");
    store.close().unwrap();

    let mut store = WaxStore::open(&path, true).unwrap();
    assert_eq!(store.stats().frame_count, total);
    assert_eq!(store.frame_content(37).unwrap(), b"round 0 item 37");
    store.close().unwrap();
}

#[test]
fn capacity_guard_fails_put_without_corrupting_state() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("memory.wax");
    let mut store = WaxStore::create_with_options(
        &path,
        StoreOptions { wal_size: 2048 },
    )
    .unwrap();

    // Fill the ring until the capacity guard trips.
    let mut accepted = 0u64;
    let overflow = loop {
        match store.put(b"payload", &Metadata::new()) {
            Ok(_) => accepted += 1,
            Err(err) => break err,
        }
        assert!(accepted < 100, "2 KiB ring cannot absorb 100 records");
    };
    assert!(matches!(overflow, WaxError::Wal(_)), "got {overflow:?}");
    assert!(accepted > 0);

    // A commit retires the pending records and makes room again.
    store.commit().unwrap();
    assert_eq!(store.stats().frame_count, accepted);
    store.put(b"after checkpoint", &Metadata::new()).unwrap();
    store.commit().unwrap();
    assert_eq!(store.stats().frame_count, accepted + 1);
    assert_eq!(
        store.frame_content(accepted).unwrap(),
        b"after checkpoint"
    );
    store.close().unwrap();
}

#[test]
fn crash_with_wrapped_pending_wal_recovers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("memory.wax");
    {
        let mut store = WaxStore::create_with_options(&path, TINY_WAL).unwrap();
        // March the cursor most of the way around the ring.
        for index in 0..50 {
            store
                .put(format!("warmup {index}").as_bytes(), &Metadata::new())
                .unwrap();
        }
        store.commit().unwrap();
        // Leave pending records that straddle the wrap point, then crash.
        for index in 0..40 {
            store
                .put(format!("pending {index}").as_bytes(), &Metadata::new())
                .unwrap();
        }
        drop(store);
    }
    {
        let mut store = WaxStore::open(&path, true).unwrap();
        assert_eq!(store.stats().frame_count, 50);
        assert_eq!(store.stats().pending_frames, 40);
        store.commit().unwrap();
        assert_eq!(store.stats().frame_count, 90);
        assert_eq!(store.frame_content(89).unwrap(), b"pending 39");
        store.close().unwrap();
    }
}
