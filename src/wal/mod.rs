//! Write-ahead log ring.
//!
//! A fixed-capacity ring of mutation records placed between the header
//! region and the data region. Producers append records with per-record
//! SHA-256 checksums; recovery scans forward from the checkpoint until a
//! terminator (all-zero sentinel header, zero sequence, broken checksum or
//! non-monotonic sequence) is observed.

pub mod record;
pub mod scan;
pub mod writer;

pub use record::{
    PendingMutation, PutFrameRecord, WalMutation, WalRecordHeader, FLAG_PADDING,
    RECORD_HEADER_SIZE,
};
pub use scan::{is_terminal_marker, scan_pending, scan_state, PendingScan, WalScanState};
pub use writer::{WalCursors, WalRingWriter};
