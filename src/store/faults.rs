//! Commit-fence fault injection.
//!
//! Tests arm a process-wide step number; the commit path checks it after
//! each of its four crash fences and fails with `WaxError::Injected` when
//! the armed step is reached. Cleared on test teardown. The atomic is the
//! only process-wide mutable state besides the writer lease registry.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Result, WaxError};

static COMMIT_FAIL_STEP: AtomicU32 = AtomicU32::new(0);

/// Arm an injected failure at commit fence `step` (1..=4). Zero disarms.
pub fn set_commit_fail_step(step: u32) {
    COMMIT_FAIL_STEP.store(step, Ordering::Relaxed);
}

/// Disarm commit fault injection.
pub fn clear_commit_fail_step() {
    COMMIT_FAIL_STEP.store(0, Ordering::Relaxed);
}

pub(crate) fn maybe_inject_commit_crash(step: u32) -> Result<()> {
    let requested = COMMIT_FAIL_STEP.load(Ordering::Relaxed);
    if requested != 0 && requested == step {
        return Err(WaxError::Injected(step));
    }
    Ok(())
}
