//! Structured logging schema and field name constants for harbor.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation tools can query by standardized field names across
//! every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (run start/finish), conversation completions |
//! | DEBUG | Decision points, bounds computation, batch flushes |
//! | TRACE | Per-row iteration, high-volume data |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "ingest", "source", "archive", "pool"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "driver", "batch_reader", "upsert", "bounds"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "read_batch", "upsert_message", "flush", "discover"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Tenant tag for the run.
pub const TENANT_ID: &str = "tenant_id";

/// Conversation (chat) id being processed.
pub const CHAT_ID: &str = "chat_id";

/// Provider-native message id.
pub const NATURAL_ID: &str = "natural_id";

/// Source connection instance the rows came from.
pub const SOURCE_INSTANCE_ID: &str = "source_instance_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of rows returned by a batch read.
pub const ROW_COUNT: &str = "row_count";

/// Number of records written this batch.
pub const IMPORTED_COUNT: &str = "imported_count";

/// Number of records skipped by validation this batch.
pub const SKIPPED_COUNT: &str = "skipped_count";

/// Number of batches processed for a conversation.
pub const BATCH_COUNT: &str = "batch_count";

// ─── Cursor fields ─────────────────────────────────────────────────────────

/// Cursor timestamp (seconds) after a flush.
pub const CURSOR_TS: &str = "cursor_ts";

/// Cursor tie-break id after a flush.
pub const CURSOR_ID: &str = "cursor_id";
