//! Archive table setup.
//!
//! The provider source tables belong to the provider and are never touched.
//! The archive tables are harbor's own, so the crate can create them on an
//! empty database. Deployments that manage schema externally simply skip
//! this call.

use sqlx::{Pool, Postgres};
use tracing::info;

use harbor_core::Result;

const CREATE_MESSAGES: &str = "CREATE TABLE IF NOT EXISTS archive_messages ( \
     source_instance_id TEXT NOT NULL, \
     natural_id TEXT NOT NULL, \
     tenant_id TEXT NOT NULL, \
     chat_id TEXT NOT NULL, \
     ts_seconds BIGINT NOT NULL, \
     sender_identity TEXT NOT NULL, \
     canonical JSONB NOT NULL, \
     created_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
     updated_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
     PRIMARY KEY (source_instance_id, natural_id))";

const CREATE_MESSAGES_CHAT_IDX: &str = "CREATE INDEX IF NOT EXISTS archive_messages_chat_idx \
     ON archive_messages (tenant_id, chat_id, ts_seconds)";

const CREATE_CONVERSATIONS: &str = "CREATE TABLE IF NOT EXISTS archive_conversations ( \
     tenant_id TEXT NOT NULL, \
     chat_id TEXT NOT NULL, \
     state TEXT NOT NULL DEFAULT 'active', \
     created_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
     message_count BIGINT NOT NULL DEFAULT 0, \
     imported_count BIGINT NOT NULL DEFAULT 0, \
     first_ts TIMESTAMPTZ, \
     last_ts TIMESTAMPTZ, \
     last_ts_seconds BIGINT, \
     last_message_id TEXT, \
     cursor_updated_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
     participants TEXT[] NOT NULL DEFAULT '{}', \
     connections TEXT[] NOT NULL DEFAULT '{}', \
     PRIMARY KEY (tenant_id, chat_id))";

/// Create the archive tables if they do not exist.
pub async fn ensure_archive_schema(pool: &Pool<Postgres>) -> Result<()> {
    sqlx::query(CREATE_MESSAGES).execute(pool).await?;
    sqlx::query(CREATE_MESSAGES_CHAT_IDX).execute(pool).await?;
    sqlx::query(CREATE_CONVERSATIONS).execute(pool).await?;
    info!(
        subsystem = "archive",
        op = "ensure_schema",
        "Archive schema ready"
    );
    Ok(())
}
