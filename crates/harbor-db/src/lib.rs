//! # harbor-db
//!
//! PostgreSQL source and archive layer for harbor.
//!
//! This crate provides:
//! - Connection pool management
//! - Keyset-paginated readers over provider message and hub event tables
//! - The canonical message archive with two-phase aggregate upserts
//!
//! ## Example
//!
//! ```rust,ignore
//! use harbor_db::Database;
//! use harbor_core::{Cursor, RangeBounds, MessageSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/harbor").await?;
//!
//!     let rows = db
//!         .source
//!         .read_batch("555200@c.us", &Cursor::start(), 200, &RangeBounds::unbounded())
//!         .await?;
//!
//!     println!("read {} rows", rows.len());
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod hub;
pub mod ident;
pub mod pool;
pub mod schema;
pub mod source;

// Re-export core types
pub use harbor_core::*;

pub use archive::{fetch_canonical, PgArchive};
pub use hub::{PgHubEventSource, DEFAULT_HUB_TABLE};
pub use ident::validate_identifier;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use schema::ensure_archive_schema;
pub use source::{PgMessageSource, DEFAULT_SOURCE_TABLE};

use sqlx::postgres::PgPool;

/// Facade bundling the pooled source and archive implementations.
pub struct Database {
    pool: PgPool,
    pub source: PgMessageSource,
    pub hub: PgHubEventSource,
    pub archive: PgArchive,
}

impl Database {
    /// Connect with default pool configuration.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with_config(database_url, PoolConfig::default()).await
    }

    /// Connect with custom pool configuration.
    pub async fn connect_with_config(database_url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(database_url, config).await?;
        Ok(Self::from_pool(pool))
    }

    /// Build the facade over an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            source: PgMessageSource::new(pool.clone()),
            hub: PgHubEventSource::new(pool.clone()),
            archive: PgArchive::new(pool.clone()),
            pool,
        }
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
