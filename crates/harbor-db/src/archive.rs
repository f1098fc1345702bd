//! Archive store: canonical message documents and conversation aggregates.
//!
//! Messages land as immutable canonical JSONB documents keyed by the
//! provider-scoped natural key `(source_instance_id, natural_id)`. The
//! conversation aggregate write is two-phase: a conditional insert that
//! establishes the initial shape only if the aggregate does not exist, then
//! an unconditional additive update. The phases stay separate statements so
//! the [`harbor_core::ArchiveStore`] contract remains implementable on
//! document stores that cannot set and increment the same field in one
//! operation; the ordering (defaults before increments) is enforced here by
//! treating a missing aggregate in phase 2 as a hard error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, trace};

use harbor_core::{
    ArchiveStore, BatchDelta, CanonicalMessage, ConversationAggregate, ConversationState,
    CursorState, Error, MessageMeta, Result, UpsertOutcome,
};

/// PostgreSQL implementation of [`ArchiveStore`].
pub struct PgArchive {
    pool: Pool<Postgres>,
}

impl PgArchive {
    /// Create a new archive over the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn state_from_str(s: &str) -> ConversationState {
        match s {
            "active" => ConversationState::Active,
            _ => ConversationState::Active, // forward-compatible fallback
        }
    }
}

#[async_trait]
impl ArchiveStore for PgArchive {
    async fn upsert_message(
        &self,
        record: &CanonicalMessage,
        meta: &MessageMeta,
    ) -> Result<UpsertOutcome> {
        let canonical = serde_json::to_value(record)?;
        // xmax = 0 distinguishes a fresh insert from a conflict-update.
        let row = sqlx::query(
            "INSERT INTO archive_messages ( \
                 source_instance_id, natural_id, tenant_id, chat_id, \
                 ts_seconds, sender_identity, canonical, created_at, updated_at \
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, now(), now()) \
             ON CONFLICT (source_instance_id, natural_id) DO UPDATE SET \
                 canonical = EXCLUDED.canonical, \
                 sender_identity = EXCLUDED.sender_identity, \
                 ts_seconds = EXCLUDED.ts_seconds, \
                 updated_at = now() \
             RETURNING (xmax = 0) AS inserted",
        )
        .bind(&meta.source_instance_id)
        .bind(&meta.natural_id)
        .bind(&record.tenant_id)
        .bind(&record.chat_id)
        .bind(meta.ts_seconds)
        .bind(&meta.sender_identity)
        .bind(&canonical)
        .fetch_one(&self.pool)
        .await?;

        let inserted: bool = row.try_get("inserted")?;
        trace!(
            subsystem = "archive",
            op = "upsert_message",
            natural_id = %meta.natural_id,
            chat_id = %meta.chat_id,
            inserted = inserted,
            "Upserted canonical message"
        );
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
        let result = sqlx::query(
            "INSERT INTO archive_conversations ( \
                 tenant_id, chat_id, state, created_at, \
                 message_count, imported_count, first_ts, last_ts, \
                 last_ts_seconds, last_message_id, cursor_updated_at, \
                 participants, connections \
             ) VALUES ($1, $2, 'active', now(), 0, 0, $3, $4, \
                       NULL, NULL, now(), '{}', '{}') \
             ON CONFLICT (tenant_id, chat_id) DO NOTHING",
        )
        .bind(tenant_id)
        .bind(chat_id)
        .bind(seed.first_ts)
        .bind(seed.last_ts)
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected() == 1;
        if created {
            debug!(
                subsystem = "archive",
                op = "init_conversation",
                tenant_id = tenant_id,
                chat_id = chat_id,
                "Created conversation aggregate"
            );
        }
        Ok(created)
    }

    async fn apply_conversation_delta(
        &self,
        tenant_id: &str,
        chat_id: &str,
        delta: &BatchDelta,
    ) -> Result<()> {
        // LEAST/GREATEST ignore NULLs, so the bounds only ever extend.
        let result = sqlx::query(
            "UPDATE archive_conversations SET \
                 message_count = message_count + $3, \
                 imported_count = imported_count + $4, \
                 first_ts = LEAST(first_ts, $5), \
                 last_ts = GREATEST(last_ts, $6), \
                 last_ts_seconds = COALESCE($7, last_ts_seconds), \
                 last_message_id = COALESCE($8, last_message_id), \
                 cursor_updated_at = now(), \
                 participants = ARRAY( \
                     SELECT DISTINCT p FROM unnest(participants || $9::text[]) AS p ORDER BY p), \
                 connections = ARRAY( \
                     SELECT DISTINCT c FROM unnest(connections || $10::text[]) AS c ORDER BY c) \
             WHERE tenant_id = $1 AND chat_id = $2",
        )
        .bind(tenant_id)
        .bind(chat_id)
        .bind(delta.message_count)
        .bind(delta.imported_count)
        .bind(delta.first_ts)
        .bind(delta.last_ts)
        .bind(delta.cursor.last_ts_seconds)
        .bind(delta.cursor.last_id.as_deref())
        .bind(&delta.participants)
        .bind(&delta.connections)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Defaults must exist before any increment is applied.
            return Err(Error::Archive(format!(
                "conversation aggregate missing for tenant '{}' chat '{}'",
                tenant_id, chat_id
            )));
        }
        debug!(
            subsystem = "archive",
            op = "apply_delta",
            tenant_id = tenant_id,
            chat_id = chat_id,
            imported_count = delta.imported_count,
            cursor_ts = delta.cursor.last_ts_seconds,
            "Applied conversation delta"
        );
        Ok(())
    }

    async fn load_aggregate(
        &self,
        tenant_id: &str,
        chat_id: &str,
    ) -> Result<Option<ConversationAggregate>> {
        let row = sqlx::query(
            "SELECT tenant_id, chat_id, state, created_at, \
                    message_count, imported_count, first_ts, last_ts, \
                    last_ts_seconds, last_message_id, cursor_updated_at, \
                    participants, connections \
             FROM archive_conversations \
             WHERE tenant_id = $1 AND chat_id = $2",
        )
        .bind(tenant_id)
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(ConversationAggregate {
                tenant_id: r.try_get("tenant_id")?,
                chat_id: r.try_get("chat_id")?,
                state: Self::state_from_str(r.try_get::<String, _>("state")?.as_str()),
                created_at: r.try_get::<DateTime<Utc>, _>("created_at")?,
                cursor: CursorState {
                    last_ts_seconds: r.try_get("last_ts_seconds")?,
                    last_message_id: r.try_get("last_message_id")?,
                    updated_at: r.try_get::<DateTime<Utc>, _>("cursor_updated_at")?,
                    imported_count: r.try_get("imported_count")?,
                },
                message_count: r.try_get("message_count")?,
                first_ts: r.try_get("first_ts")?,
                last_ts: r.try_get("last_ts")?,
                participants: r.try_get("participants")?,
                connections: r.try_get("connections")?,
            })
        })
        .transpose()
    }
}

/// Fetch one stored canonical document by its natural key. Used by
/// operational tooling and the integration tests.
pub async fn fetch_canonical(
    pool: &Pool<Postgres>,
    source_instance_id: &str,
    natural_id: &str,
) -> Result<Option<JsonValue>> {
    let row = sqlx::query(
        "SELECT canonical FROM archive_messages \
         WHERE source_instance_id = $1 AND natural_id = $2",
    )
    .bind(source_instance_id)
    .bind(natural_id)
    .fetch_optional(pool)
    .await?;
    row.map(|r| Ok(r.try_get::<JsonValue, _>("canonical")?))
        .transpose()
}
