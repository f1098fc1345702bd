//! # harbor-ingest
//!
//! Incremental ingestion driver for the harbor message archive.
//!
//! This crate provides:
//! - The per-conversation ingestion state machine (resume → bound → page →
//!   flush)
//! - Cursor-exact resumability over `(timestamp, id)` keyset pagination
//! - Idempotent natural-key message upserts with two-phase aggregate writes
//! - In-memory source/archive doubles for deterministic tests
//!
//! ## Example
//!
//! ```ignore
//! use harbor_db::Database;
//! use harbor_ingest::{IngestConfig, IngestionDriver};
//! use harbor_core::RangePolicy;
//!
//! let db = Database::connect("postgres://...").await?;
//! let config = IngestConfig::new("acme", "conn-1", "555100@c.us")
//!     .with_policy(RangePolicy::RelativeDays(30))
//!     .with_max_concurrent(4);
//!
//! let driver = IngestionDriver::for_database(&db, config);
//! let report = driver.run().await?;
//! println!(
//!     "imported {} records across {} conversations",
//!     report.imported(),
//!     report.conversations.len()
//! );
//! ```

pub mod accumulator;
pub mod config;
pub mod driver;
pub mod memory;

// Re-export core types
pub use harbor_core::*;

pub use accumulator::BatchAccumulator;
pub use config::IngestConfig;
pub use driver::{ConversationReport, HubReport, IngestionDriver, RunReport};
pub use memory::{MemoryArchive, MemoryHub, MemorySource};
