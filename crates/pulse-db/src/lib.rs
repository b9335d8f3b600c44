//! # pulse-db
//!
//! Storage backends for the pulse live telemetry surface.
//!
//! This crate provides:
//! - Connection pool management
//! - PostgreSQL repositories for events, notifications, alert rules, audit
//!   records, and roles
//! - A `LISTEN/NOTIFY` bridge that feeds inserts into the change feed
//! - An in-memory backend implementing the same interfaces
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pulse_db::{ChangeFeed, Database, PgChangeListener};
//!
//! let db = Database::connect("postgres://localhost/pulse").await?;
//! let feed = Arc::new(ChangeFeed::default());
//! let listener = PgChangeListener::new(db.pool.clone(), feed.clone()).start().await?;
//! ```

pub mod alerts;
pub mod audit;
pub mod events;
pub mod listener;
pub mod memory;
pub mod notifications;
pub mod pool;
pub mod roles;

// Always compiled so integration tests in other crates can use it.
pub mod test_fixtures;

// Re-export core types
pub use pulse_core::*;

pub use alerts::PgAlertRuleRepository;
pub use audit::PgAuditRepository;
pub use events::PgEventRepository;
pub use listener::{decode_payload, ListenerHandle, Notice, PgChangeListener};
pub use memory::MemoryStore;
pub use notifications::PgNotificationRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use roles::PgRoleDirectory;

use std::sync::Arc;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub notifications: Arc<PgNotificationRepository>,
    pub events: Arc<PgEventRepository>,
    pub alerts: Arc<PgAlertRuleRepository>,
    pub audit: Arc<PgAuditRepository>,
    /// Role lookup for audit visibility.
    pub roles: Arc<PgRoleDirectory>,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            notifications: Arc::new(PgNotificationRepository::new(pool.clone())),
            events: Arc::new(PgEventRepository::new(pool.clone())),
            alerts: Arc::new(PgAlertRuleRepository::new(pool.clone())),
            audit: Arc::new(PgAuditRepository::new(pool.clone())),
            roles: Arc::new(PgRoleDirectory::new(pool.clone())),
            pool,
        }
    }

    /// Connect with the default pool configuration.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Connect with a custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }

    /// Start forwarding trigger notifications onto `feed`.
    pub async fn listen(&self, feed: Arc<ChangeFeed>) -> Result<ListenerHandle> {
        PgChangeListener::new(self.pool.clone(), feed).start().await
    }
}
