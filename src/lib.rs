//! Waxstore — embedded, crash-consistent single-file memory store for
//! retrieval-augmented generation workloads.
//!
//! One file binds together content frames with content-addressed
//! checksums, a lexical index, a dense-vector index and a structured
//! key/value facts store, committed atomically so recall always observes a
//! single consistent snapshot.
//!
//! # Layout of a store file
//!
//! ```text
//! [header page A | header page B | WAL ring | data region | TOC | footer]
//! ```
//!
//! The store survives a crash between any two write syscalls: commits
//! publish through four fences (TOC, footer+truncate, header A, header B)
//! and open recovers the newest verifiable footer even when the header
//! pages lag behind.
//!
//! # Quick start
//!
//! ```no_run
//! use waxstore::orchestrator::{MemoryOrchestrator, OrchestratorConfig};
//!
//! let config = OrchestratorConfig {
//!     enable_vector_search: false,
//!     ..OrchestratorConfig::default()
//! };
//! let mut memory = MemoryOrchestrator::new("notes.wax", config, None).unwrap();
//! memory.remember("the first meeting is on thursday", &Default::default()).unwrap();
//! memory.flush().unwrap();
//! let context = memory.recall("when is the meeting?").unwrap();
//! for item in &context.items {
//!     println!("{}: {}", item.frame_id, item.text);
//! }
//! # memory.close().unwrap();
//! ```

pub mod digest;
pub mod embed;
pub mod error;
pub mod format;
mod fsio;
pub mod orchestrator;
pub mod store;
pub mod structured;
pub mod text;
pub mod vector;
pub mod wal;

pub use error::{Result, WaxError};
pub use orchestrator::{MemoryOrchestrator, OrchestratorConfig, RagContext, RagItem, RagItemKind};
pub use store::{faults, Metadata, StoreOptions, WalStats, WaxStats, WaxStore};
