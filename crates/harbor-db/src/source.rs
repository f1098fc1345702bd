//! Row-shaped source reader: keyset pagination over a provider message
//! table.
//!
//! Expected table shape (read-only to harbor):
//!
//! ```sql
//! message_id   TEXT    -- provider-native unique id
//! chat_id      TEXT
//! sender_id    TEXT
//! display_name TEXT NULL
//! from_me      BOOLEAN
//! ts_seconds   BIGINT NULL
//! payload      JSONB
//! ```
//!
//! Rows with a NULL timestamp order as second zero so they still carry a
//! total `(ts, id)` order and the cursor stays exact.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use harbor_core::{Cursor, MessageSource, MessageStamp, RangeBounds, Result, SourceRow};

use crate::ident::validate_identifier;

/// Default provider message table name.
pub const DEFAULT_SOURCE_TABLE: &str = "provider_messages";

/// PostgreSQL implementation of [`MessageSource`].
pub struct PgMessageSource {
    pool: Pool<Postgres>,
    table: String,
}

impl PgMessageSource {
    /// Create a new source reader over the default table.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            table: DEFAULT_SOURCE_TABLE.to_string(),
        }
    }

    /// Create a source reader over a custom table name.
    pub fn with_table(pool: Pool<Postgres>, table: &str) -> Result<Self> {
        validate_identifier(table)?;
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    fn row_to_source(row: &sqlx::postgres::PgRow) -> Result<SourceRow> {
        Ok(SourceRow {
            natural_id: row.try_get("message_id")?,
            chat_id: row.try_get("chat_id")?,
            sender_id: row.try_get("sender_id")?,
            display_name: row.try_get("display_name")?,
            from_me: row.try_get("from_me")?,
            ts_seconds: row.try_get("ts_seconds")?,
            payload: row.try_get::<JsonValue, _>("payload")?,
        })
    }
}

#[async_trait]
impl MessageSource for PgMessageSource {
    async fn discover_chat_ids(&self, limit: i64) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT DISTINCT chat_id FROM {} ORDER BY chat_id LIMIT $1",
            self.table
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        let chat_ids = rows
            .iter()
            .map(|r| r.try_get::<String, _>("chat_id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        debug!(
            subsystem = "source",
            op = "discover",
            row_count = chat_ids.len(),
            "Discovered conversations"
        );
        Ok(chat_ids)
    }

    async fn read_batch(
        &self,
        chat_id: &str,
        cursor: &Cursor,
        limit: i64,
        bounds: &RangeBounds,
    ) -> Result<Vec<SourceRow>> {
        let sql = format!(
            "SELECT message_id, chat_id, sender_id, display_name, from_me, ts_seconds, payload \
             FROM {} \
             WHERE chat_id = $1 \
               AND ($2::bigint IS NULL \
                    OR (COALESCE(ts_seconds, 0), message_id) > ($2::bigint, $3::text)) \
               AND ($4::bigint IS NULL OR COALESCE(ts_seconds, 0) >= $4) \
               AND ($5::bigint IS NULL OR COALESCE(ts_seconds, 0) <= $5) \
             ORDER BY COALESCE(ts_seconds, 0) ASC, message_id ASC \
             LIMIT $6",
            self.table
        );
        let rows = sqlx::query(&sql)
            .bind(chat_id)
            .bind(cursor.last_ts_seconds)
            .bind(cursor.last_id.as_deref())
            .bind(bounds.since)
            .bind(bounds.until)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        debug!(
            subsystem = "source",
            op = "read_batch",
            chat_id = chat_id,
            row_count = rows.len(),
            "Read source batch"
        );
        rows.iter().map(Self::row_to_source).collect()
    }

    async fn latest_message_meta(&self, chat_id: &str) -> Result<Option<MessageStamp>> {
        let sql = format!(
            "SELECT COALESCE(ts_seconds, 0) AS ts_seconds, message_id \
             FROM {} \
             WHERE chat_id = $1 \
             ORDER BY COALESCE(ts_seconds, 0) DESC, message_id DESC \
             LIMIT 1",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            Ok(MessageStamp {
                ts_seconds: r.try_get("ts_seconds")?,
                natural_id: r.try_get("message_id")?,
            })
        })
        .transpose()
    }

    async fn nth_recent_boundary(&self, chat_id: &str, depth: i64) -> Result<Option<MessageStamp>> {
        let sql = format!(
            "SELECT COALESCE(ts_seconds, 0) AS ts_seconds, message_id \
             FROM {} \
             WHERE chat_id = $1 \
             ORDER BY COALESCE(ts_seconds, 0) DESC, message_id DESC \
             OFFSET $2 \
             LIMIT 1",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(chat_id)
            .bind(depth)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            Ok(MessageStamp {
                ts_seconds: r.try_get("ts_seconds")?,
                natural_id: r.try_get("message_id")?,
            })
        })
        .transpose()
    }
}
