//! Event-shaped source reader: a time-ordered hub event feed filtered by a
//! creation-time window.
//!
//! Expected table shape (read-only to harbor):
//!
//! ```sql
//! event_id           TEXT        -- provider-native unique id
//! event_type         TEXT        -- carries the role marker
//! chat_id            TEXT
//! source_instance_id TEXT
//! created_at         TIMESTAMPTZ
//! envelope           JSONB
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use harbor_core::{Cursor, HubEvent, HubEventSource, RangeBounds, Result};

use crate::ident::validate_identifier;

/// Default hub event table name.
pub const DEFAULT_HUB_TABLE: &str = "hub_events";

/// PostgreSQL implementation of [`HubEventSource`].
pub struct PgHubEventSource {
    pool: Pool<Postgres>,
    table: String,
}

impl PgHubEventSource {
    /// Create a new event reader over the default table.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            table: DEFAULT_HUB_TABLE.to_string(),
        }
    }

    /// Create an event reader over a custom table name.
    pub fn with_table(pool: Pool<Postgres>, table: &str) -> Result<Self> {
        validate_identifier(table)?;
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }
}

#[async_trait]
impl HubEventSource for PgHubEventSource {
    async fn read_events(
        &self,
        cursor: &Cursor,
        limit: i64,
        window: &RangeBounds,
    ) -> Result<Vec<HubEvent>> {
        let sql = format!(
            "SELECT event_id, event_type, chat_id, source_instance_id, created_at, envelope \
             FROM {} \
             WHERE ($1::bigint IS NULL \
                    OR (floor(extract(epoch FROM created_at))::bigint, event_id) \
                       > ($1::bigint, $2::text)) \
               AND ($3::bigint IS NULL OR created_at >= to_timestamp($3)) \
               AND ($4::bigint IS NULL OR created_at <= to_timestamp($4)) \
             ORDER BY created_at ASC, event_id ASC \
             LIMIT $5",
            self.table
        );
        let rows = sqlx::query(&sql)
            .bind(cursor.last_ts_seconds)
            .bind(cursor.last_id.as_deref())
            .bind(window.since)
            .bind(window.until)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        debug!(
            subsystem = "source",
            op = "read_events",
            row_count = rows.len(),
            "Read hub event batch"
        );
        rows.iter()
            .map(|row| {
                Ok(HubEvent {
                    event_id: row.try_get("event_id")?,
                    event_type: row.try_get("event_type")?,
                    chat_id: row.try_get("chat_id")?,
                    source_instance_id: row.try_get("source_instance_id")?,
                    created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
                    envelope: row.try_get::<JsonValue, _>("envelope")?,
                })
            })
            .collect()
    }
}
