//! Exclusive writer lease.
//!
//! Exactly one writer may hold a store open at a time. Two guards enforce
//! this: a process-wide registry of open store paths, and a side-car
//! `<file>.lock` created with `create_new` so a second process fails at
//! open. The lease is released on close and on drop, including error paths.
//!
//! A lock file left behind by a crashed process is not auto-broken; open
//! fails until the operator removes it.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use crate::error::{Result, WaxError};

fn registry() -> &'static Mutex<HashSet<PathBuf>> {
    static REGISTRY: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashSet::new()))
}

fn lock_path(store_path: &Path) -> PathBuf {
    let mut name = store_path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

#[derive(Debug)]
pub(crate) struct Lease {
    canonical: PathBuf,
    lock_file: PathBuf,
    held: bool,
}

impl Lease {
    pub(crate) fn acquire(store_path: &Path) -> Result<Self> {
        let canonical = store_path
            .canonicalize()
            .map_err(|err| WaxError::store(format!("failed to resolve store path: {err}")))?;

        {
            let mut open_paths = registry()
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !open_paths.insert(canonical.clone()) {
                return Err(WaxError::store(format!(
                    "store is already open in this process: {}",
                    canonical.display()
                )));
            }
        }

        let lock_file = lock_path(&canonical);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_file)
        {
            Ok(_) => Ok(Self {
                canonical,
                lock_file,
                held: true,
            }),
            Err(err) => {
                registry()
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .remove(&canonical);
                if err.kind() == std::io::ErrorKind::AlreadyExists {
                    tracing::warn!(path = %canonical.display(), "writer lease conflict");
                    Err(WaxError::store(format!(
                        "writer lease is held for {}",
                        canonical.display()
                    )))
                } else {
                    Err(WaxError::Io(err))
                }
            }
        }
    }

    pub(crate) fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        let _ = std::fs::remove_file(&self.lock_file);
        registry()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.canonical);
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release();
    }
}
