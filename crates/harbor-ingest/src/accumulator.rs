//! Per-batch delta accumulation.
//!
//! One accumulator lives for exactly one physically-read batch: rows feed
//! it as they are written or skipped, and it drains into the [`BatchDelta`]
//! that phase 2 of the aggregate write applies. The in-flight cursor is a
//! value owned by the accumulator, advanced only after a row has been fully
//! mapped, validated, and written or explicitly skipped.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use harbor_core::{BatchDelta, CanonicalMessage, Cursor, MessageMeta, UpsertOutcome};

/// Accumulates one batch's additive effect on the conversation aggregate.
#[derive(Debug)]
pub struct BatchAccumulator {
    cursor: Cursor,
    message_count: i64,
    imported_count: i64,
    skipped_count: i64,
    first_ts: Option<DateTime<Utc>>,
    last_ts: Option<DateTime<Utc>>,
    participants: BTreeSet<String>,
    connections: BTreeSet<String>,
}

impl BatchAccumulator {
    /// Start a batch from the conversation's current cursor.
    pub fn new(resume: Cursor) -> Self {
        Self {
            cursor: resume,
            message_count: 0,
            imported_count: 0,
            skipped_count: 0,
            first_ts: None,
            last_ts: None,
            participants: BTreeSet::new(),
            connections: BTreeSet::new(),
        }
    }

    /// Record a written row. Counters only move when the upsert actually
    /// inserted: re-delivery of an already-archived row overwrites the
    /// document but must not double-count the aggregate.
    pub fn record_written(
        &mut self,
        message: &CanonicalMessage,
        meta: &MessageMeta,
        outcome: UpsertOutcome,
    ) {
        if outcome.inserted {
            self.message_count += 1;
            self.imported_count += 1;
        }
        self.first_ts = Some(match self.first_ts {
            Some(ts) => ts.min(message.created_at),
            None => message.created_at,
        });
        self.last_ts = Some(match self.last_ts {
            Some(ts) => ts.max(message.created_at),
            None => message.created_at,
        });
        self.participants.insert(meta.sender_identity.clone());
        self.connections.insert(meta.source_instance_id.clone());
        self.cursor = self.cursor.advanced(meta.ts_seconds, &meta.natural_id);
    }

    /// Record a row skipped by validation: the cursor advances past it so
    /// an invalid record never blocks pagination, but nothing is counted
    /// toward the aggregate.
    pub fn record_skipped(&mut self, meta: &MessageMeta) {
        self.skipped_count += 1;
        self.cursor = self.cursor.advanced(meta.ts_seconds, &meta.natural_id);
    }

    /// The cursor after the rows recorded so far.
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Rows skipped by validation so far.
    pub fn skipped_count(&self) -> i64 {
        self.skipped_count
    }

    /// Records actually written so far.
    pub fn imported_count(&self) -> i64 {
        self.imported_count
    }

    /// Drain into the phase-2 payload.
    pub fn into_delta(self) -> BatchDelta {
        BatchDelta {
            message_count: self.message_count,
            imported_count: self.imported_count,
            first_ts: self.first_ts,
            last_ts: self.last_ts,
            cursor: self.cursor,
            participants: self.participants.into_iter().collect(),
            connections: self.connections.into_iter().collect(),
        }
    }
}
