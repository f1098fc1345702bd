//! Core data models for the harbor message archive.
//!
//! These types are shared across all harbor crates and represent the
//! canonical domain entities: source rows as read from providers, the
//! provider-agnostic canonical message document, and the per-conversation
//! rollup aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::cursor::Cursor;

// =============================================================================
// SOURCE SHAPES
// =============================================================================

/// One row from a row-shaped provider store. Immutable and read-only to
/// this system; `payload` carries the provider's content sub-shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRow {
    /// Provider-native unique message id (the natural key).
    pub natural_id: String,
    /// Conversation the row belongs to.
    pub chat_id: String,
    /// Provider identity of the author.
    pub sender_id: String,
    /// Author display name, when the provider carries one.
    pub display_name: Option<String>,
    /// Direction flag: true when the connected account authored the row.
    pub from_me: bool,
    /// Timestamp in seconds. Ties are possible; absent only for providers
    /// that genuinely omit timestamps on some rows.
    pub ts_seconds: Option<i64>,
    /// Provider payload with the content sub-shapes.
    pub payload: JsonValue,
}

/// One event from an event-shaped (hub) provider: a nested envelope with a
/// type tag carrying the author role marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubEvent {
    /// Provider-native unique event id (the natural key).
    pub event_id: String,
    /// Event type tag, e.g. `message.contact.received` or
    /// `message.agent.sent`; direction is inferred from the role marker.
    pub event_type: String,
    /// Conversation the event belongs to.
    pub chat_id: String,
    /// Source connection instance that produced the event.
    pub source_instance_id: String,
    /// Event creation time.
    pub created_at: DateTime<Utc>,
    /// Nested event envelope (sender block, message block).
    pub envelope: JsonValue,
}

/// `(timestamp, id)` of a probed source row, used for bound computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStamp {
    pub ts_seconds: i64,
    pub natural_id: String,
}

// =============================================================================
// CANONICAL MESSAGE
// =============================================================================

/// Message direction relative to the archived account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Role of a participant on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    /// External contact on the conversation.
    Contact,
    /// The connected account (operator side).
    Agent,
}

/// A message participant (sender or recipient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Participant {
    /// Channel-scoped identity of the participant.
    pub channel_id: String,
    pub role: ParticipantRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Normalized message content. Unrecognized provider content degrades to a
/// placeholder text tagged with the original type, never to a mapping
/// failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MessageContent {
    /// Content type tag, e.g. `text`, `image`, `video`, `document`.
    pub kind: String,
    /// Extracted text: body, extended body, media caption, or placeholder.
    pub text: String,
}

/// The canonical, provider-agnostic message document.
///
/// Immutable after creation. Persisted by the archive keyed by the
/// provider-scoped natural key `(source_instance_id, natural_id)` rather
/// than by `message_id` alone, which tolerates providers whose message ids
/// collide across distinct channel instances.
///
/// `deny_unknown_fields` at every object level makes unknown fields a hard
/// deserialization error rather than silently dropped data; the validator
/// applies the same rule to the serialized document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CanonicalMessage {
    pub tenant_id: String,
    /// Normalized id, unique per source-provider namespace.
    pub message_id: String,
    pub chat_id: String,
    pub direction: Direction,
    /// Derived deterministically from the source timestamp; wall-clock only
    /// as a last-resort fallback when the source omits one.
    pub created_at: DateTime<Utc>,
    pub sender: Participant,
    pub recipients: Vec<Participant>,
    pub content: MessageContent,
    /// Provider context (quoted message, thread hints), when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<JsonValue>,
    /// The original provider payload, verbatim.
    pub raw: JsonValue,
    /// Enrichment slots filled by downstream consumers; empty at ingest.
    pub derived: Vec<JsonValue>,
}

/// Keying and cursor-advancement fields derived from, but not identical
/// to, the canonical record's own fields (`natural_id` is the provider's
/// raw id, while `message_id` is normalized).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    pub natural_id: String,
    pub chat_id: String,
    /// Provider identity of the author, accumulated into the aggregate's
    /// participant set.
    pub sender_identity: String,
    /// Timestamp used for cursor advancement (seconds).
    pub ts_seconds: i64,
    /// The same instant as an ISO-8601 string, as stored on the document.
    pub timestamp_iso: String,
    pub source_instance_id: String,
    pub channel_id: String,
    pub contact_id: String,
}

// =============================================================================
// CONVERSATION AGGREGATE
// =============================================================================

/// Lifecycle state of an archived conversation. The ingestion core creates
/// conversations as `Active` and never transitions them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationState {
    Active,
}

/// Persisted cursor block inside the conversation aggregate. Deleting or
/// resetting the aggregate resets the conversation's import position to
/// the beginning; that is the resumability contract surfaced to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorState {
    pub last_ts_seconds: Option<i64>,
    pub last_message_id: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// Total records written for the conversation, across all runs.
    pub imported_count: i64,
}

impl CursorState {
    /// The resume position encoded by this state.
    pub fn cursor(&self) -> Cursor {
        Cursor {
            last_ts_seconds: self.last_ts_seconds,
            last_id: self.last_message_id.clone(),
        }
    }
}

/// Per-conversation rollup document.
///
/// `message_count` only increases; `first_ts` / `last_ts` are the global
/// minimum and maximum `created_at` ever observed across all batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationAggregate {
    pub tenant_id: String,
    pub chat_id: String,
    pub state: ConversationState,
    pub created_at: DateTime<Utc>,
    pub cursor: CursorState,
    pub message_count: i64,
    pub first_ts: Option<DateTime<Utc>>,
    pub last_ts: Option<DateTime<Utc>>,
    /// Provider identities seen on the conversation.
    pub participants: Vec<String>,
    /// Source connection instances that contributed messages.
    pub connections: Vec<String>,
}

// =============================================================================
// WRITE PAYLOADS
// =============================================================================

/// Outcome of an idempotent message upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpsertOutcome {
    /// The document did not exist and was created.
    pub inserted: bool,
    /// The document existed and its canonical fields were overwritten.
    pub updated: bool,
}

/// Additive change applied to a conversation aggregate for one
/// physically-read batch: phase 2 of the two-phase write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDelta {
    /// Messages newly inserted by this batch. Skipped rows and
    /// re-delivered overwrites do not count, which is what keeps the
    /// aggregate from double-counting on re-delivery.
    pub message_count: i64,
    /// Records newly imported by this batch.
    pub imported_count: i64,
    /// Minimum `created_at` observed in the batch.
    pub first_ts: Option<DateTime<Utc>>,
    /// Maximum `created_at` observed in the batch.
    pub last_ts: Option<DateTime<Utc>>,
    /// Cursor after the batch's last processed row.
    pub cursor: Cursor,
    /// Sender identities observed in the batch, deduplicated.
    pub participants: Vec<String>,
    /// Source connection instances observed in the batch, deduplicated.
    pub connections: Vec<String>,
}
