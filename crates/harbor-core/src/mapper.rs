//! Provider-to-canonical message mapping.
//!
//! The mapper is pure and total: it never fails on a malformed payload.
//! Unrecognized content degrades to a placeholder text annotated with the
//! original type tag. Provider shapes are a tagged union (a row-shaped
//! store with an explicit direction flag, and an event-shaped hub with the
//! direction encoded as a role marker in the event type tag), and both
//! variants converge on the same canonical schema through shared extraction
//! helpers.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::models::{
    CanonicalMessage, Direction, HubEvent, MessageContent, MessageMeta, Participant,
    ParticipantRole, SourceRow,
};

/// Input variants accepted by [`map`].
#[derive(Debug, Clone, PartialEq)]
pub enum SourceRecord {
    /// Structured columns with an explicit `from_me` flag.
    Row(SourceRow),
    /// Nested event envelope; direction inferred from the event type tag.
    Event(HubEvent),
}

/// Run-level context the mapper needs: who owns the archive, which source
/// connection rows are being read from, and the channel identity of the
/// connected account.
#[derive(Debug, Clone)]
pub struct MapContext {
    pub tenant_id: String,
    pub source_instance_id: String,
    /// Channel-scoped identity of the connected account (the agent side).
    pub channel_id: String,
}

/// Map one source record to the canonical document plus the helper
/// projection used for upsert keying and cursor advancement.
pub fn map(record: &SourceRecord, ctx: &MapContext) -> (CanonicalMessage, MessageMeta) {
    match record {
        SourceRecord::Row(row) => map_row(row, ctx),
        SourceRecord::Event(event) => map_event(event, ctx),
    }
}

fn map_row(row: &SourceRow, ctx: &MapContext) -> (CanonicalMessage, MessageMeta) {
    // Deterministic from the source timestamp; wall-clock only when the
    // provider omitted one.
    let created_at = row
        .ts_seconds
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .unwrap_or_else(Utc::now);
    let ts_seconds = row.ts_seconds.unwrap_or_else(|| created_at.timestamp());

    let direction = if row.from_me {
        Direction::Outbound
    } else {
        Direction::Inbound
    };
    let contact_id = contact_from_chat(&row.chat_id);
    let sender_identity = if row.from_me {
        ctx.channel_id.clone()
    } else if row.sender_id.is_empty() {
        contact_id.clone()
    } else {
        row.sender_id.clone()
    };

    let contact = Participant {
        channel_id: contact_id.clone(),
        role: ParticipantRole::Contact,
        display_name: if row.from_me {
            None
        } else {
            row.display_name.clone()
        },
    };
    let agent = Participant {
        channel_id: ctx.channel_id.clone(),
        role: ParticipantRole::Agent,
        display_name: if row.from_me {
            row.display_name.clone()
        } else {
            None
        },
    };
    let (sender, recipients) = match direction {
        Direction::Outbound => (agent, vec![contact]),
        Direction::Inbound => (contact, vec![agent]),
    };

    let message = CanonicalMessage {
        tenant_id: ctx.tenant_id.clone(),
        message_id: normalize_message_id(&ctx.source_instance_id, &row.natural_id),
        chat_id: row.chat_id.clone(),
        direction,
        created_at,
        sender,
        recipients,
        content: extract_content(&row.payload),
        context: row.payload.get("contextInfo").cloned(),
        raw: row.payload.clone(),
        derived: vec![],
    };
    let meta = MessageMeta {
        natural_id: row.natural_id.clone(),
        chat_id: row.chat_id.clone(),
        sender_identity,
        ts_seconds,
        timestamp_iso: created_at.to_rfc3339(),
        source_instance_id: ctx.source_instance_id.clone(),
        channel_id: ctx.channel_id.clone(),
        contact_id,
    };
    (message, meta)
}

fn map_event(event: &HubEvent, ctx: &MapContext) -> (CanonicalMessage, MessageMeta) {
    let created_at = event.created_at;
    let direction = direction_from_event_type(&event.event_type);
    let contact_id = contact_from_chat(&event.chat_id);
    let source_instance_id = if event.source_instance_id.is_empty() {
        ctx.source_instance_id.clone()
    } else {
        event.source_instance_id.clone()
    };

    let sender_block = event.envelope.get("sender");
    let sender_identity = sender_block
        .and_then(|s| s.get("id"))
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| match direction {
            Direction::Outbound => ctx.channel_id.clone(),
            Direction::Inbound => contact_id.clone(),
        });
    let display_name = sender_block
        .and_then(|s| s.get("displayName"))
        .and_then(JsonValue::as_str)
        .map(str::to_string);

    let contact = Participant {
        channel_id: contact_id.clone(),
        role: ParticipantRole::Contact,
        display_name: match direction {
            Direction::Inbound => display_name.clone(),
            Direction::Outbound => None,
        },
    };
    let agent = Participant {
        channel_id: ctx.channel_id.clone(),
        role: ParticipantRole::Agent,
        display_name: match direction {
            Direction::Outbound => display_name,
            Direction::Inbound => None,
        },
    };
    let (sender, recipients) = match direction {
        Direction::Outbound => (agent, vec![contact]),
        Direction::Inbound => (contact, vec![agent]),
    };

    // The message block carries the content sub-shapes; fall back to the
    // whole envelope for hubs that inline them.
    let message_block = event.envelope.get("message").unwrap_or(&event.envelope);

    let message = CanonicalMessage {
        tenant_id: ctx.tenant_id.clone(),
        message_id: normalize_message_id(&source_instance_id, &event.event_id),
        chat_id: event.chat_id.clone(),
        direction,
        created_at,
        sender,
        recipients,
        content: extract_content(message_block),
        context: message_block.get("context").cloned(),
        raw: event.envelope.clone(),
        derived: vec![],
    };
    let meta = MessageMeta {
        natural_id: event.event_id.clone(),
        chat_id: event.chat_id.clone(),
        sender_identity,
        ts_seconds: created_at.timestamp(),
        timestamp_iso: created_at.to_rfc3339(),
        source_instance_id,
        channel_id: ctx.channel_id.clone(),
        contact_id,
    };
    (message, meta)
}

/// Normalized message id: provider-scoped so that providers whose raw ids
/// collide across channel instances still get distinct canonical ids.
fn normalize_message_id(source_instance_id: &str, natural_id: &str) -> String {
    format!("{}:{}", source_instance_id, natural_id)
}

/// Extract normalized content from a provider payload.
///
/// Precedence: plain-text body, then extended-text body, then media
/// caption, then a placeholder carrying the original type tag. Never fails;
/// a payload with no recognizable shape yields an `unknown` placeholder.
pub fn extract_content(payload: &JsonValue) -> MessageContent {
    if let Some(text) = payload.get("conversation").and_then(JsonValue::as_str) {
        return MessageContent {
            kind: "text".to_string(),
            text: text.to_string(),
        };
    }
    if let Some(text) = payload
        .get("extendedTextMessage")
        .and_then(|m| m.get("text"))
        .and_then(JsonValue::as_str)
    {
        return MessageContent {
            kind: "text".to_string(),
            text: text.to_string(),
        };
    }
    for (key, kind) in [
        ("imageMessage", "image"),
        ("videoMessage", "video"),
        ("documentMessage", "document"),
    ] {
        if let Some(media) = payload.get(key) {
            let caption = media
                .get("caption")
                .and_then(JsonValue::as_str)
                .unwrap_or("");
            return MessageContent {
                kind: kind.to_string(),
                text: caption.to_string(),
            };
        }
    }
    // Unrecognized content: placeholder annotated with the original tag.
    let tag = payload
        .as_object()
        .and_then(|o| o.keys().next())
        .map_or("unknown", String::as_str);
    MessageContent {
        kind: "unsupported".to_string(),
        text: format!("[unsupported content: {}]", tag),
    }
}

/// Infer direction from the role marker inside an event type tag.
///
/// `message.agent.sent` → outbound; `message.contact.received` → inbound.
/// Unrecognized tags default to inbound.
pub fn direction_from_event_type(event_type: &str) -> Direction {
    if event_type
        .split('.')
        .any(|segment| segment == "agent" || segment == "operator")
    {
        Direction::Outbound
    } else {
        Direction::Inbound
    }
}

/// Contact identity derived from a conversation id: the bare id with any
/// provider domain suffix stripped.
pub fn contact_from_chat(chat_id: &str) -> String {
    chat_id
        .split_once('@')
        .map_or(chat_id, |(bare, _)| bare)
        .to_string()
}
