//! # Vellum Sync
//!
//! Connects a store's permission records to a remote authority.
//!
//! ## Overview
//!
//! Permission records are created locally and decided remotely. This crate
//! defines the seam to the deciding service ([`Authority`]) and the writer
//! that drives it ([`PermissionProcessor`]):
//!
//! 1. The application inserts a record; the commit publishes a notification
//! 2. The processor reads every unprocessed record from a fresh snapshot
//! 3. Each record is forwarded to the authority
//! 4. The response's status code (and an offer's token) is written back
//!
//! Authority failures are not surfaced to the record's creator. The record
//! stays unprocessed and is retried on the next pass.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vellum_store::MemoryStore;
//! use vellum_sync::{MemoryAuthority, PermissionProcessor, ProcessorConfig};
//!
//! async fn example(store: Arc<MemoryStore>) {
//!     let processor = PermissionProcessor::new(store, MemoryAuthority::new(), ProcessorConfig::default());
//!     let report = processor.run_once().await.unwrap();
//!     println!("processed {} records", report.processed);
//! }
//! ```

pub mod authority;
pub mod error;
pub mod memory;
pub mod processor;

pub use authority::{Authority, AuthorityResponse};
pub use error::{Result, SyncError};
pub use memory::{Grant, MemoryAuthority};
pub use processor::{PermissionProcessor, ProcessReport, ProcessorConfig};
