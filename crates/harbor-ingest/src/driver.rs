//! The ingestion driver: per-conversation sequencing of resume, bounds,
//! paging, and flush.
//!
//! Per conversation the driver moves through `Resuming` (load the persisted
//! cursor) → `Bounding` (probe and compute the range window) → `Paging`
//! (read batch → map → validate → upsert → advance the in-flight cursor) →
//! `Flushing` (two-phase aggregate write, once per physically-read batch) →
//! `Done` on the first empty batch. There are no in-core retries: a store
//! error aborts the conversation with its last flushed cursor intact, the
//! aborted batch is wholly discarded, and the next run re-reads it. A
//! failed conversation is reported but never aborts its siblings.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use harbor_core::{
    map, validate, ArchiveStore, Cursor, HubEventSource, MapContext, MessageSource, RangeBounds,
    RangePolicy, Result, SourceRecord,
};
use harbor_db::{Database, PgArchive, PgMessageSource};

use crate::accumulator::BatchAccumulator;
use crate::config::IngestConfig;

/// Outcome of ingesting one conversation.
#[derive(Debug, Clone, Default)]
pub struct ConversationReport {
    pub chat_id: String,
    /// Batches flushed (not counting the terminating empty read).
    pub batches: i64,
    /// Rows returned by batch reads, before validation.
    pub rows_read: i64,
    /// Records written to the archive.
    pub imported: i64,
    /// Records skipped by validation.
    pub skipped: i64,
    /// Cursor the conversation resumed from.
    pub resumed_from: Cursor,
    /// Cursor after the last successfully flushed batch.
    pub cursor: Cursor,
    /// Error that aborted the conversation, if any.
    pub error: Option<String>,
}

impl ConversationReport {
    fn new(chat_id: &str) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            ..Self::default()
        }
    }
}

/// Outcome of one ingestion run across conversations.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub conversations: Vec<ConversationReport>,
}

impl RunReport {
    /// Total records written across conversations.
    pub fn imported(&self) -> i64 {
        self.conversations.iter().map(|c| c.imported).sum()
    }

    /// Total records skipped by validation.
    pub fn skipped(&self) -> i64 {
        self.conversations.iter().map(|c| c.skipped).sum()
    }

    /// Conversations that aborted on an error.
    pub fn failed(&self) -> usize {
        self.conversations
            .iter()
            .filter(|c| c.error.is_some())
            .count()
    }
}

/// Outcome of ingesting the hub event feed.
#[derive(Debug, Clone, Default)]
pub struct HubReport {
    pub batches: i64,
    pub events_read: i64,
    pub imported: i64,
    pub skipped: i64,
    /// Run-level event cursor after the last flushed batch; the caller
    /// persists it between runs.
    pub cursor: Cursor,
    pub error: Option<String>,
}

/// Sequences ingestion over a row source and an archive.
pub struct IngestionDriver<S, A> {
    source: Arc<S>,
    archive: Arc<A>,
    config: IngestConfig,
    shutdown: Arc<AtomicBool>,
}

impl<S: MessageSource, A: ArchiveStore> IngestionDriver<S, A> {
    /// Create a driver over the given collaborators.
    pub fn new(source: Arc<S>, archive: Arc<A>, config: IngestConfig) -> Self {
        Self {
            source,
            archive,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag honored at conversation and batch boundaries only, never
    /// mid-write, so a message write and its cursor advancement are never
    /// separated by an externally observable stop.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    fn map_context(&self) -> MapContext {
        MapContext {
            tenant_id: self.config.tenant_id.clone(),
            source_instance_id: self.config.source_instance_id.clone(),
            channel_id: self.config.channel_id.clone(),
        }
    }

    /// Run ingestion across conversations: discovery (or the configured
    /// inclusion list), then per-conversation processing, fanned out up to
    /// `max_concurrent` wide.
    pub async fn run(&self) -> Result<RunReport> {
        self.config.validate()?;
        let run_id = Uuid::new_v4();
        let started = Instant::now();

        let chat_ids = match &self.config.policy {
            RangePolicy::IncludeChats(chats) => chats.clone(),
            _ => {
                self.source
                    .discover_chat_ids(self.config.discovery_limit)
                    .await?
            }
        };
        info!(
            subsystem = "ingest",
            component = "driver",
            op = "run",
            run_id = %run_id,
            tenant_id = %self.config.tenant_id,
            conversation_count = chat_ids.len(),
            "Starting ingestion run"
        );

        let conversations = if self.config.max_concurrent <= 1 {
            let mut reports = Vec::with_capacity(chat_ids.len());
            for chat_id in &chat_ids {
                if self.shutdown.load(Ordering::Relaxed) {
                    info!(
                        subsystem = "ingest",
                        component = "driver",
                        "Shutdown requested, skipping remaining conversations"
                    );
                    break;
                }
                reports.push(self.run_conversation(chat_id).await);
            }
            reports
        } else {
            stream::iter(chat_ids.iter())
                .map(|chat_id| self.run_conversation(chat_id))
                .buffer_unordered(self.config.max_concurrent)
                .collect()
                .await
        };

        let report = RunReport {
            run_id,
            conversations,
        };
        info!(
            subsystem = "ingest",
            component = "driver",
            op = "run_done",
            run_id = %run_id,
            imported_count = report.imported(),
            skipped_count = report.skipped(),
            failed_count = report.failed(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Ingestion run finished"
        );
        Ok(report)
    }

    /// Ingest one conversation to completion. Errors abort the
    /// conversation and are captured on the report; the aggregate keeps
    /// whatever was flushed before the failing batch.
    pub async fn run_conversation(&self, chat_id: &str) -> ConversationReport {
        let mut report = ConversationReport::new(chat_id);
        if let Err(e) = self.ingest_conversation(chat_id, &mut report).await {
            error!(
                subsystem = "ingest",
                component = "driver",
                chat_id = chat_id,
                batch_count = report.batches,
                error = %e,
                "Conversation aborted"
            );
            report.error = Some(e.to_string());
        }
        report
    }

    async fn ingest_conversation(
        &self,
        chat_id: &str,
        report: &mut ConversationReport,
    ) -> Result<()> {
        let ctx = self.map_context();
        let started = Instant::now();

        // Resuming: the persisted cursor lives inside the aggregate.
        let resume = self
            .archive
            .load_aggregate(&self.config.tenant_id, chat_id)
            .await?
            .map(|a| a.cursor.cursor())
            .unwrap_or_default();
        report.resumed_from = resume.clone();
        report.cursor = resume.clone();

        // Bounding
        let bounds = self.conversation_bounds(chat_id).await?;
        debug!(
            subsystem = "ingest",
            component = "bounds",
            chat_id = chat_id,
            since = bounds.since,
            until = bounds.until,
            "Computed range bounds"
        );

        // Paging: the cursor is a value threaded through the loop; batch
        // N+1 is never read before batch N is fully written and flushed.
        let mut cursor = resume;
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!(
                    subsystem = "ingest",
                    component = "driver",
                    chat_id = chat_id,
                    "Shutdown requested, stopping at batch boundary"
                );
                break;
            }

            let rows = self
                .source
                .read_batch(chat_id, &cursor, self.config.batch_size, &bounds)
                .await?;
            if rows.is_empty() {
                // The empty page is the only termination signal.
                break;
            }
            report.rows_read += rows.len() as i64;

            let mut acc = BatchAccumulator::new(cursor.clone());
            for row in rows {
                let record = SourceRecord::Row(row);
                let (message, meta) = map(&record, &ctx);
                let verdict = validate(&message);
                if verdict.valid {
                    let outcome = self.archive.upsert_message(&message, &meta).await?;
                    acc.record_written(&message, &meta, outcome);
                } else {
                    warn!(
                        subsystem = "ingest",
                        component = "validator",
                        chat_id = chat_id,
                        natural_id = %meta.natural_id,
                        errors = ?verdict.errors,
                        "Skipping invalid record"
                    );
                    acc.record_skipped(&meta);
                }
            }

            // Flushing: two-phase aggregate write, once per physically-read
            // batch. Stats land on the report only after phase 2 succeeds.
            let imported = acc.imported_count();
            let skipped = acc.skipped_count();
            let delta = acc.into_delta();
            self.archive
                .init_conversation(&self.config.tenant_id, chat_id, &delta)
                .await?;
            self.archive
                .apply_conversation_delta(&self.config.tenant_id, chat_id, &delta)
                .await?;

            cursor = delta.cursor;
            report.cursor = cursor.clone();
            report.imported += imported;
            report.skipped += skipped;
            report.batches += 1;
            debug!(
                subsystem = "ingest",
                component = "driver",
                op = "flush",
                chat_id = chat_id,
                imported_count = imported,
                skipped_count = skipped,
                cursor_ts = cursor.last_ts_seconds,
                cursor_id = cursor.last_id.as_deref().unwrap_or(""),
                "Flushed batch"
            );
        }

        info!(
            subsystem = "ingest",
            component = "driver",
            op = "conversation_done",
            chat_id = chat_id,
            batch_count = report.batches,
            imported_count = report.imported,
            skipped_count = report.skipped,
            duration_ms = started.elapsed().as_millis() as u64,
            "Conversation ingested"
        );
        Ok(())
    }

    /// Probe the source as the policy requires and compute the bounds.
    async fn conversation_bounds(&self, chat_id: &str) -> Result<RangeBounds> {
        let policy = &self.config.policy;
        let latest = if policy.needs_latest() {
            self.source.latest_message_meta(chat_id).await?
        } else {
            None
        };
        let boundary = match policy.boundary_depth() {
            Some(depth) => self.source.nth_recent_boundary(chat_id, depth).await?,
            None => None,
        };
        Ok(policy.bounds(latest.as_ref(), boundary.as_ref()))
    }

    /// Ingest the hub event feed from `start`, restricted to a
    /// creation-time `window`.
    ///
    /// Events interleave conversations, so each batch groups its rows per
    /// conversation and flushes one delta per touched conversation.
    /// Resumability is the returned run-level event cursor; conversation
    /// cursors are left to the row source, which owns that id space.
    pub async fn run_hub<H: HubEventSource + ?Sized>(
        &self,
        hub: &H,
        start: Cursor,
        window: &RangeBounds,
    ) -> HubReport {
        let mut report = HubReport {
            cursor: start.clone(),
            ..HubReport::default()
        };
        if let Err(e) = self.ingest_hub(hub, start, window, &mut report).await {
            error!(
                subsystem = "ingest",
                component = "driver",
                op = "run_hub",
                error = %e,
                "Hub ingestion aborted"
            );
            report.error = Some(e.to_string());
        }
        report
    }

    async fn ingest_hub<H: HubEventSource + ?Sized>(
        &self,
        hub: &H,
        start: Cursor,
        window: &RangeBounds,
        report: &mut HubReport,
    ) -> Result<()> {
        self.config.validate()?;
        let ctx = self.map_context();
        let mut cursor = start;
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            let events = hub
                .read_events(&cursor, self.config.batch_size, window)
                .await?;
            if events.is_empty() {
                break;
            }
            report.events_read += events.len() as i64;

            let mut batch_cursor = cursor.clone();
            let mut accumulators: BTreeMap<String, BatchAccumulator> = BTreeMap::new();
            for event in events {
                let event_ts = event.created_at.timestamp();
                let event_id = event.event_id.clone();
                let record = SourceRecord::Event(event);
                let (message, meta) = map(&record, &ctx);
                let acc = accumulators
                    .entry(meta.chat_id.clone())
                    .or_insert_with(|| BatchAccumulator::new(Cursor::start()));
                let verdict = validate(&message);
                if verdict.valid {
                    let outcome = self.archive.upsert_message(&message, &meta).await?;
                    acc.record_written(&message, &meta, outcome);
                } else {
                    warn!(
                        subsystem = "ingest",
                        component = "validator",
                        natural_id = %meta.natural_id,
                        errors = ?verdict.errors,
                        "Skipping invalid event"
                    );
                    acc.record_skipped(&meta);
                }
                batch_cursor = batch_cursor.advanced(event_ts, &event_id);
            }

            let mut imported = 0;
            let mut skipped = 0;
            for (chat_id, acc) in accumulators {
                imported += acc.imported_count();
                skipped += acc.skipped_count();
                let mut delta = acc.into_delta();
                // Event ids live in their own namespace; leave the
                // conversation's row-source cursor untouched.
                delta.cursor = Cursor::start();
                self.archive
                    .init_conversation(&self.config.tenant_id, &chat_id, &delta)
                    .await?;
                self.archive
                    .apply_conversation_delta(&self.config.tenant_id, &chat_id, &delta)
                    .await?;
            }

            cursor = batch_cursor;
            report.cursor = cursor.clone();
            report.imported += imported;
            report.skipped += skipped;
            report.batches += 1;
        }
        Ok(())
    }
}

impl IngestionDriver<PgMessageSource, PgArchive> {
    /// Build a driver over a [`Database`] facade's pooled connections.
    pub fn for_database(db: &Database, config: IngestConfig) -> Self {
        let pool = db.pool().clone();
        Self::new(
            Arc::new(PgMessageSource::new(pool.clone())),
            Arc::new(PgArchive::new(pool)),
            config,
        )
    }
}
