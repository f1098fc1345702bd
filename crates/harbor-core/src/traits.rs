//! Core traits for harbor abstractions.
//!
//! These traits define the collaborator interfaces the ingestion core
//! consumes (a row-reading source, an event-shaped hub source, and a
//! document-oriented archive), enabling pluggable backends and testability.

use async_trait::async_trait;

use crate::bounds::RangeBounds;
use crate::cursor::Cursor;
use crate::error::Result;
use crate::models::{
    BatchDelta, CanonicalMessage, ConversationAggregate, HubEvent, MessageMeta, MessageStamp,
    SourceRow, UpsertOutcome,
};

// =============================================================================
// SOURCE INTERFACES
// =============================================================================

/// Row-oriented source store: an ordered, bounded window onto a provider's
/// message table.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// List conversation ids known to the source, capped at `limit`.
    async fn discover_chat_ids(&self, limit: i64) -> Result<Vec<String>>;

    /// Read an ordered page of rows strictly after `cursor`, intersected
    /// with `bounds` when present.
    ///
    /// Ordering key is `(ts_seconds ASC, natural_id ASC)`. An empty page is
    /// the only end-of-conversation signal; the reader never reports "more
    /// data available" out of band.
    async fn read_batch(
        &self,
        chat_id: &str,
        cursor: &Cursor,
        limit: i64,
        bounds: &RangeBounds,
    ) -> Result<Vec<SourceRow>>;

    /// `(ts, id)` of the conversation's most recent row, if any.
    async fn latest_message_meta(&self, chat_id: &str) -> Result<Option<MessageStamp>>;

    /// `(ts, id)` of the row at offset `depth` counting back from the most
    /// recent (descending order), or `None` when fewer than `depth + 1`
    /// rows exist.
    async fn nth_recent_boundary(&self, chat_id: &str, depth: i64) -> Result<Option<MessageStamp>>;
}

/// Event-shaped alternate source: a time-ordered event feed filtered by a
/// creation-time window.
#[async_trait]
pub trait HubEventSource: Send + Sync {
    /// Read an ordered page of events strictly after `cursor`, restricted
    /// to the creation-time `window`. Ordering key is
    /// `(created_at ASC, event_id ASC)`.
    async fn read_events(
        &self,
        cursor: &Cursor,
        limit: i64,
        window: &RangeBounds,
    ) -> Result<Vec<HubEvent>>;
}

// =============================================================================
// ARCHIVE INTERFACE
// =============================================================================

/// Document-oriented target store for canonical messages and conversation
/// aggregates.
///
/// The aggregate write is two-phase because a store may disallow setting
/// defaults and incrementing the same field in one operation:
/// [`init_conversation`](ArchiveStore::init_conversation) conditionally
/// establishes the initial shape, then
/// [`apply_conversation_delta`](ArchiveStore::apply_conversation_delta)
/// applies the additive increment, safe to run whether or not the init ran
/// this time.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Idempotent natural-key upsert of one canonical message, keyed by
    /// `(meta.source_instance_id, meta.natural_id)`. Repeated delivery of
    /// the same source row converges to one document whose canonical
    /// fields reflect the most recent write.
    async fn upsert_message(
        &self,
        record: &CanonicalMessage,
        meta: &MessageMeta,
    ) -> Result<UpsertOutcome>;

    /// Phase 1: conditionally insert the aggregate's initial shape
    /// (counters at zero, bounds seeded from the batch), only if the
    /// aggregate does not yet exist. Insert-if-absent semantics must be
    /// enforced by the store, never by a read-then-write in application
    /// code. Returns whether the aggregate was created; "already exists"
    /// is not an error.
    async fn init_conversation(
        &self,
        tenant_id: &str,
        chat_id: &str,
        seed: &BatchDelta,
    ) -> Result<bool>;

    /// Phase 2: unconditionally apply the additive increment and extend
    /// the min/max bounds, overwrite the cursor, and union participant and
    /// connection sets. Must run at most once per physically-read batch;
    /// a missing aggregate is a hard error (defaults must exist before any
    /// increment is applied).
    async fn apply_conversation_delta(
        &self,
        tenant_id: &str,
        chat_id: &str,
        delta: &BatchDelta,
    ) -> Result<()>;

    /// Load a conversation aggregate, `None` when the conversation has
    /// never been ingested.
    async fn load_aggregate(
        &self,
        tenant_id: &str,
        chat_id: &str,
    ) -> Result<Option<ConversationAggregate>>;
}
