//! In-memory source and archive doubles for deterministic testing.
//!
//! Both doubles honor the same contracts as the PostgreSQL implementations
//! (keyset ordering on the source, insert-if-absent plus additive-update
//! semantics on the archive) and offer failure-injection knobs so driver
//! tests can exercise abort and resume behavior.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use harbor_core::{
    ArchiveStore, BatchDelta, CanonicalMessage, ConversationAggregate, ConversationState, Cursor,
    CursorState, Error, HubEvent, HubEventSource, MessageMeta, MessageSource, MessageStamp,
    RangeBounds, Result, SourceRow, UpsertOutcome,
};

fn row_ts(row: &SourceRow) -> i64 {
    row.ts_seconds.unwrap_or(0)
}

/// In-memory [`MessageSource`] over per-conversation row lists.
#[derive(Default)]
pub struct MemorySource {
    rows: Mutex<BTreeMap<String, Vec<SourceRow>>>,
    read_calls: AtomicUsize,
    fail_after_reads: Mutex<Option<usize>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with rows; ordering is normalized internally.
    pub fn with_rows(rows: Vec<SourceRow>) -> Self {
        let source = Self::new();
        for row in rows {
            source.push_row(row);
        }
        source
    }

    /// Add one row.
    pub fn push_row(&self, row: SourceRow) {
        let mut rows = self.rows.lock().unwrap();
        let chat = rows.entry(row.chat_id.clone()).or_default();
        chat.push(row);
        chat.sort_by(|a, b| {
            (row_ts(a), a.natural_id.as_str()).cmp(&(row_ts(b), b.natural_id.as_str()))
        });
    }

    /// Fail every `read_batch` after the first `n` successful calls.
    pub fn set_fail_after_reads(&self, n: Option<usize>) {
        *self.fail_after_reads.lock().unwrap() = n;
    }

    /// Number of `read_batch` calls so far.
    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn discover_chat_ids(&self, limit: i64) -> Result<Vec<String>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.keys().take(limit.max(0) as usize).cloned().collect())
    }

    async fn read_batch(
        &self,
        chat_id: &str,
        cursor: &Cursor,
        limit: i64,
        bounds: &RangeBounds,
    ) -> Result<Vec<SourceRow>> {
        let calls = self.read_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(threshold) = *self.fail_after_reads.lock().unwrap() {
            if calls >= threshold {
                return Err(Error::Source("injected read failure".to_string()));
            }
        }
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .get(chat_id)
            .map(|chat| {
                chat.iter()
                    .filter(|r| cursor.admits(row_ts(r), &r.natural_id))
                    .filter(|r| bounds.contains(row_ts(r)))
                    .take(limit.max(0) as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_message_meta(&self, chat_id: &str) -> Result<Option<MessageStamp>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(chat_id).and_then(|chat| {
            chat.last().map(|r| MessageStamp {
                ts_seconds: row_ts(r),
                natural_id: r.natural_id.clone(),
            })
        }))
    }

    async fn nth_recent_boundary(&self, chat_id: &str, depth: i64) -> Result<Option<MessageStamp>> {
        if depth < 0 {
            return Ok(None);
        }
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(chat_id).and_then(|chat| {
            chat.iter().rev().nth(depth as usize).map(|r| MessageStamp {
                ts_seconds: row_ts(r),
                natural_id: r.natural_id.clone(),
            })
        }))
    }
}

/// In-memory [`HubEventSource`] over a flat event list.
#[derive(Default)]
pub struct MemoryHub {
    events: Mutex<Vec<HubEvent>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Vec<HubEvent>) -> Self {
        let hub = Self::new();
        for event in events {
            hub.push_event(event);
        }
        hub
    }

    pub fn push_event(&self, event: HubEvent) {
        let mut events = self.events.lock().unwrap();
        events.push(event);
        events.sort_by(|a, b| {
            (a.created_at, a.event_id.as_str()).cmp(&(b.created_at, b.event_id.as_str()))
        });
    }
}

#[async_trait]
impl HubEventSource for MemoryHub {
    async fn read_events(
        &self,
        cursor: &Cursor,
        limit: i64,
        window: &RangeBounds,
    ) -> Result<Vec<HubEvent>> {
        let events = self.events.lock().unwrap();
        Ok(events
            .iter()
            .filter(|e| cursor.admits(e.created_at.timestamp(), &e.event_id))
            .filter(|e| window.contains(e.created_at.timestamp()))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

/// In-memory [`ArchiveStore`] with the same two-phase aggregate semantics
/// as the PostgreSQL archive.
#[derive(Default)]
pub struct MemoryArchive {
    messages: Mutex<BTreeMap<(String, String), CanonicalMessage>>,
    aggregates: Mutex<BTreeMap<(String, String), ConversationAggregate>>,
    delta_calls: AtomicUsize,
    fail_delta_call: Mutex<Option<usize>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail exactly the `n`-th (0-based) `apply_conversation_delta` call.
    pub fn set_fail_delta_call(&self, n: Option<usize>) {
        *self.fail_delta_call.lock().unwrap() = n;
    }

    /// Number of stored message documents.
    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    /// Stored canonical document for a natural key, if any.
    pub fn stored_message(
        &self,
        source_instance_id: &str,
        natural_id: &str,
    ) -> Option<CanonicalMessage> {
        self.messages
            .lock()
            .unwrap()
            .get(&(source_instance_id.to_string(), natural_id.to_string()))
            .cloned()
    }

    /// Stored aggregate for a conversation, if any.
    pub fn aggregate(&self, tenant_id: &str, chat_id: &str) -> Option<ConversationAggregate> {
        self.aggregates
            .lock()
            .unwrap()
            .get(&(tenant_id.to_string(), chat_id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchive {
    async fn upsert_message(
        &self,
        record: &CanonicalMessage,
        meta: &MessageMeta,
    ) -> Result<UpsertOutcome> {
        let mut messages = self.messages.lock().unwrap();
        let key = (meta.source_instance_id.clone(), meta.natural_id.clone());
        let inserted = messages.insert(key, record.clone()).is_none();
        Ok(UpsertOutcome {
            inserted,
            updated: !inserted,
        })
    }

    async fn init_conversation(
        &self,
        tenant_id: &str,
        chat_id: &str,
        seed: &BatchDelta,
    ) -> Result<bool> {
        let mut aggregates = self.aggregates.lock().unwrap();
        let key = (tenant_id.to_string(), chat_id.to_string());
        if aggregates.contains_key(&key) {
            return Ok(false);
        }
        aggregates.insert(
            key,
            ConversationAggregate {
                tenant_id: tenant_id.to_string(),
                chat_id: chat_id.to_string(),
                state: ConversationState::Active,
                created_at: Utc::now(),
                cursor: CursorState {
                    last_ts_seconds: None,
                    last_message_id: None,
                    updated_at: Utc::now(),
                    imported_count: 0,
                },
                message_count: 0,
                first_ts: seed.first_ts,
                last_ts: seed.last_ts,
                participants: Vec::new(),
                connections: Vec::new(),
            },
        );
        Ok(true)
    }

    async fn apply_conversation_delta(
        &self,
        tenant_id: &str,
        chat_id: &str,
        delta: &BatchDelta,
    ) -> Result<()> {
        let calls = self.delta_calls.fetch_add(1, Ordering::Relaxed);
        if *self.fail_delta_call.lock().unwrap() == Some(calls) {
            return Err(Error::Archive("injected delta failure".to_string()));
        }
        let mut aggregates = self.aggregates.lock().unwrap();
        let key = (tenant_id.to_string(), chat_id.to_string());
        let aggregate = aggregates.get_mut(&key).ok_or_else(|| {
            Error::Archive(format!(
                "conversation aggregate missing for tenant '{}' chat '{}'",
                tenant_id, chat_id
            ))
        })?;

        aggregate.message_count += delta.message_count;
        aggregate.cursor.imported_count += delta.imported_count;
        aggregate.first_ts = match (aggregate.first_ts, delta.first_ts) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        aggregate.last_ts = match (aggregate.last_ts, delta.last_ts) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        if delta.cursor.last_ts_seconds.is_some() {
            aggregate.cursor.last_ts_seconds = delta.cursor.last_ts_seconds;
        }
        if delta.cursor.last_id.is_some() {
            aggregate.cursor.last_message_id = delta.cursor.last_id.clone();
        }
        aggregate.cursor.updated_at = Utc::now();
        for p in &delta.participants {
            if !aggregate.participants.contains(p) {
                aggregate.participants.push(p.clone());
            }
        }
        aggregate.participants.sort();
        for c in &delta.connections {
            if !aggregate.connections.contains(c) {
                aggregate.connections.push(c.clone());
            }
        }
        aggregate.connections.sort();
        Ok(())
    }

    async fn load_aggregate(
        &self,
        tenant_id: &str,
        chat_id: &str,
    ) -> Result<Option<ConversationAggregate>> {
        Ok(self.aggregate(tenant_id, chat_id))
    }
}
