//! `PostgreSQL` read models for Unleash change requests.
//!
//! Implements the traits of `unleash-cr-core` with `sqlx`:
//!
//! - [`PostgresSegmentUsageReadModel`]: segments used by active change requests
//! - [`PostgresAccessReadModel`]: enablement and bypass decisions
//! - [`PostgresPermissionStore`]: permissions from role and group bindings
//! - [`PostgresSegmentStrategyReader`]: persisted strategies by segment
//! - [`PostgresDependentFeaturesStore`]: feature dependencies
//!
//! All stores share one `PgPool` and query on every call.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use unleash_cr_postgres::{config::DatabaseConfig, connect, migrate};
//! use unleash_cr_postgres::{PostgresAccessReadModel, PostgresPermissionStore};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = connect(&DatabaseConfig::from_env()?).await?;
//!     migrate(&pool).await?;
//!
//!     let permissions = Arc::new(PostgresPermissionStore::new(pool.clone()));
//!     let access = PostgresAccessReadModel::new(pool, permissions);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod access;
pub mod config;
pub mod dependent_features;
pub mod permissions;
pub mod segment_usage;
pub mod strategies;

pub use access::PostgresAccessReadModel;
pub use config::{ConfigError, DatabaseConfig};
pub use dependent_features::PostgresDependentFeaturesStore;
pub use permissions::PostgresPermissionStore;
pub use segment_usage::PostgresSegmentUsageReadModel;
pub use strategies::PostgresSegmentStrategyReader;

use sqlx::postgres::{PgPool, PgPoolOptions};
use unleash_cr_core::error::{ReadModelError, Result};

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`ReadModelError::Database`] if the configuration is invalid or
/// the connection fails.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    config
        .validate()
        .map_err(|e| ReadModelError::Database(e.to_string()))?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout())
        .idle_timeout(config.idle_timeout())
        .connect(&config.url)
        .await
        .map_err(|e| ReadModelError::Database(format!("Failed to connect: {e}")))?;

    tracing::info!(max_connections = config.max_connections, "Connected to PostgreSQL");
    Ok(pool)
}

/// Create or update the tables the read models query.
///
/// # Errors
///
/// Returns [`ReadModelError::Database`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| ReadModelError::Database(format!("Migration failed: {e}")))?;
    Ok(())
}
