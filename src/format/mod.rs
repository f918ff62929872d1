//! MV2S container format codecs.
//!
//! Hand-rolled little-endian encode/decode for the header pages, footer,
//! table of contents and MV2V vector segments. Every decoder is
//! bounds-checked and verifies the embedded checksums; all failures map to
//! `WaxError::Format`.

pub mod cursor;
pub mod footer;
pub mod header;
pub mod mv2v;
pub mod toc;

pub use footer::{Footer, FOOTER_SIZE};
pub use header::{HeaderPage, ReplaySnapshot, HEADER_PAGE_SIZE, HEADER_REGION_SIZE};
pub use toc::{
    FrameStatus, FrameSummary, LexManifest, SegmentKind, SegmentSummary, TimeManifest, TocSummary,
    VecManifest,
};

/// Magic bytes of a header page ("MV2S").
pub const MAGIC: [u8; 4] = *b"MV2S";

/// Magic bytes of the trailing footer ("MV2SFOOT").
pub const FOOTER_MAGIC: [u8; 8] = *b"MV2SFOOT";

/// Magic bytes of the optional replay snapshot block inside a header page.
pub const REPLAY_SNAPSHOT_MAGIC: [u8; 8] = *b"WALSNAP1";

pub const SPEC_MAJOR: u8 = 1;
pub const SPEC_MINOR: u8 = 0;
pub const SPEC_VERSION: u16 = ((SPEC_MAJOR as u16) << 8) | SPEC_MINOR as u16;

/// WAL ring starts right after the two header pages.
pub const WAL_OFFSET: u64 = HEADER_REGION_SIZE;

/// Default WAL ring capacity. Large enough that ordinary workloads do not
/// force frequent checkpoints.
pub const DEFAULT_WAL_SIZE: u64 = 256 * 1024 * 1024;

/// Upper bound on TOC size; keeps open-time reads bounded.
pub const MAX_TOC_BYTES: u64 = 64 * 1024 * 1024;

/// How far back from EOF the open path scans for footer candidates.
pub const MAX_FOOTER_SCAN_BYTES: u64 = 32 * 1024 * 1024;

/// Bound on any length-prefixed string field.
pub const MAX_STRING_BYTES: usize = 16 * 1024 * 1024;

/// Bound on any length-prefixed blob field.
pub const MAX_BLOB_BYTES: usize = 256 * 1024 * 1024;

/// Bound on any array count field.
pub const MAX_ARRAY_COUNT: usize = 10_000_000;
