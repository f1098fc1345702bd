//! # harbor-core
//!
//! Core types, traits, and abstractions for the harbor message archive.
//!
//! This crate provides the foundational data structures and trait
//! definitions that the other harbor crates depend on: the ordering
//! cursor, range-filter policies, the provider-to-canonical mapper, the
//! structural validator, and the source/archive collaborator interfaces.

pub mod bounds;
pub mod cursor;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod mapper;
pub mod models;
pub mod traits;
pub mod validator;

// Re-export commonly used types at crate root
pub use bounds::{RangeBounds, RangePolicy};
pub use cursor::Cursor;
pub use error::{Error, Result};
pub use mapper::{
    contact_from_chat, direction_from_event_type, extract_content, map, MapContext, SourceRecord,
};
pub use models::*;
pub use traits::{ArchiveStore, HubEventSource, MessageSource};
pub use validator::{validate, validate_document, ValidationReport};
