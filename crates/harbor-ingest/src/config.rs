//! Run configuration for the ingestion driver.

use chrono::DateTime;

use harbor_core::{defaults, Error, RangePolicy, Result};

/// Configuration for one ingestion run.
///
/// Configuration problems are surfaced as [`Error::Config`] by
/// [`IngestConfig::validate`] before any conversation is touched.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Tenant tag applied to every archived record.
    pub tenant_id: String,
    /// Source connection instance the rows are read from; part of the
    /// archive's natural key.
    pub source_instance_id: String,
    /// Channel identity of the connected account (the agent side of every
    /// conversation).
    pub channel_id: String,
    /// Rows fetched per batch read.
    pub batch_size: i64,
    /// Cap on conversations returned by discovery.
    pub discovery_limit: i64,
    /// Conversations processed concurrently.
    pub max_concurrent: usize,
    /// Which slice of each conversation to import.
    pub policy: RangePolicy,
}

impl IngestConfig {
    /// Create a configuration with defaults: full import, sequential,
    /// default batch size.
    pub fn new(
        tenant_id: impl Into<String>,
        source_instance_id: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            source_instance_id: source_instance_id.into(),
            channel_id: channel_id.into(),
            batch_size: defaults::BATCH_SIZE,
            discovery_limit: defaults::DISCOVERY_LIMIT,
            max_concurrent: defaults::MAX_CONCURRENT,
            policy: RangePolicy::Window {
                since: None,
                until: None,
            },
        }
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the discovery limit.
    pub fn with_discovery_limit(mut self, limit: i64) -> Self {
        self.discovery_limit = limit;
        self
    }

    /// Set the number of conversations processed concurrently.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set the range policy.
    pub fn with_policy(mut self, policy: RangePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Create config from environment variables.
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `HARBOR_TENANT` | `default` | Tenant tag |
    /// | `HARBOR_SOURCE_INSTANCE` | *(required)* | Source connection instance id |
    /// | `HARBOR_CHANNEL_ID` | *(required)* | Connected account channel id |
    /// | `HARBOR_BATCH_SIZE` | `200` | Rows per batch read |
    /// | `HARBOR_DISCOVERY_LIMIT` | `1000` | Max conversations discovered |
    /// | `HARBOR_MAX_CONCURRENT` | `1` | Concurrent conversations |
    /// | `HARBOR_RANGE_MODE` | `full` | `full`, `chats`, `window`, `days`, `depth` |
    /// | `HARBOR_RANGE_CHATS` | — | Comma-separated chat ids (`chats` mode) |
    /// | `HARBOR_RANGE_SINCE` | — | RFC 3339 lower bound (`window` mode) |
    /// | `HARBOR_RANGE_UNTIL` | — | RFC 3339 upper bound (`window` mode) |
    /// | `HARBOR_RANGE_DAYS` | — | Day count (`days` mode) |
    /// | `HARBOR_RANGE_DEPTH` | — | Message count (`depth` mode) |
    pub fn from_env() -> Result<Self> {
        let tenant_id =
            std::env::var("HARBOR_TENANT").unwrap_or_else(|_| defaults::TENANT_ID.to_string());
        let source_instance_id = std::env::var("HARBOR_SOURCE_INSTANCE")
            .map_err(|_| Error::Config("HARBOR_SOURCE_INSTANCE is not set".to_string()))?;
        let channel_id = std::env::var("HARBOR_CHANNEL_ID")
            .map_err(|_| Error::Config("HARBOR_CHANNEL_ID is not set".to_string()))?;

        let mut config = Self::new(tenant_id, source_instance_id, channel_id);

        if let Ok(v) = std::env::var("HARBOR_BATCH_SIZE") {
            config.batch_size = parse_env("HARBOR_BATCH_SIZE", &v)?;
        }
        if let Ok(v) = std::env::var("HARBOR_DISCOVERY_LIMIT") {
            config.discovery_limit = parse_env("HARBOR_DISCOVERY_LIMIT", &v)?;
        }
        if let Ok(v) = std::env::var("HARBOR_MAX_CONCURRENT") {
            config.max_concurrent = parse_env("HARBOR_MAX_CONCURRENT", &v)?;
        }
        config.policy = policy_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration before any I/O happens.
    pub fn validate(&self) -> Result<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(Error::Config("tenant id cannot be empty".to_string()));
        }
        if self.source_instance_id.trim().is_empty() {
            return Err(Error::Config(
                "source instance id cannot be empty".to_string(),
            ));
        }
        if self.channel_id.trim().is_empty() {
            return Err(Error::Config("channel id cannot be empty".to_string()));
        }
        if self.batch_size <= 0 {
            return Err(Error::Config(format!(
                "batch size must be positive, got {}",
                self.batch_size
            )));
        }
        if self.discovery_limit <= 0 {
            return Err(Error::Config(format!(
                "discovery limit must be positive, got {}",
                self.discovery_limit
            )));
        }
        if self.max_concurrent == 0 {
            return Err(Error::Config("max concurrent must be at least 1".to_string()));
        }
        self.policy.validate()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| Error::Config(format!("{} has invalid value '{}'", name, value)))
}

fn policy_from_env() -> Result<RangePolicy> {
    let mode = std::env::var("HARBOR_RANGE_MODE").unwrap_or_else(|_| "full".to_string());
    match mode.as_str() {
        "full" => Ok(RangePolicy::Window {
            since: None,
            until: None,
        }),
        "chats" => {
            let raw = std::env::var("HARBOR_RANGE_CHATS").map_err(|_| {
                Error::Config("HARBOR_RANGE_CHATS is required for chats mode".to_string())
            })?;
            let chats = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            Ok(RangePolicy::IncludeChats(chats))
        }
        "window" => {
            let since = parse_env_timestamp("HARBOR_RANGE_SINCE")?;
            let until = parse_env_timestamp("HARBOR_RANGE_UNTIL")?;
            Ok(RangePolicy::Window { since, until })
        }
        "days" => {
            let raw = std::env::var("HARBOR_RANGE_DAYS").map_err(|_| {
                Error::Config("HARBOR_RANGE_DAYS is required for days mode".to_string())
            })?;
            Ok(RangePolicy::RelativeDays(parse_env("HARBOR_RANGE_DAYS", &raw)?))
        }
        "depth" => {
            let raw = std::env::var("HARBOR_RANGE_DEPTH").map_err(|_| {
                Error::Config("HARBOR_RANGE_DEPTH is required for depth mode".to_string())
            })?;
            Ok(RangePolicy::Depth(parse_env("HARBOR_RANGE_DEPTH", &raw)?))
        }
        other => Err(Error::Config(format!(
            "HARBOR_RANGE_MODE has unknown value '{}'",
            other
        ))),
    }
}

fn parse_env_timestamp(name: &str) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    match std::env::var(name) {
        Ok(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|t| Some(t.with_timezone(&chrono::Utc)))
            .map_err(|_| Error::Config(format!("{} is not an RFC 3339 timestamp: '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}
