//! Error types for the waxstore engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WaxError>;

/// Error taxonomy for the store. Each variant corresponds to one failure
/// domain; callers match on the variant, never on message text.
#[derive(Error, Debug)]
pub enum WaxError {
    /// Decoding failure in the MV2S/MV2V codecs (bad magic, bad version,
    /// truncated buffer, checksum mismatch, range overlap, ...).
    #[error("format error: {0}")]
    Format(String),

    /// WAL decoding failure or ring capacity/sequence overflow.
    #[error("wal error: {0}")]
    Wal(String),

    /// Store invariant violation (range checks, supersede conflicts,
    /// missing footer, closed store used, lease conflicts).
    #[error("store error: {0}")]
    Store(String),

    /// Orchestrator configuration validation failure.
    #[error("policy error: {0}")]
    Policy(String),

    /// Underlying filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Test-only fault injection fired at a commit fence.
    #[error("injected failure at commit fence {0}")]
    Injected(u32),
}

impl WaxError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        WaxError::Format(msg.into())
    }

    pub(crate) fn wal(msg: impl Into<String>) -> Self {
        WaxError::Wal(msg.into())
    }

    pub(crate) fn store(msg: impl Into<String>) -> Self {
        WaxError::Store(msg.into())
    }

    pub(crate) fn policy(msg: impl Into<String>) -> Self {
        WaxError::Policy(msg.into())
    }
}
