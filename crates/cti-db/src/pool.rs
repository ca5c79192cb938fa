//! PostgreSQL connection pool management

use cti_core::config::DatabaseConfig;
use cti_core::{AppError, AppResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{info, warn};

/// Default connection timeout in seconds
const DEFAULT_CONNECT_TIMEOUT: u64 = 30;

/// Default idle timeout in seconds
const DEFAULT_IDLE_TIMEOUT: u64 = 600;

/// Create a PostgreSQL connection pool and verify it with a round trip
///
/// # Example
///
/// ```no_run
/// use cti_db::create_pool;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pool = create_pool("postgresql://localhost/cti", 10).await?;
///     Ok(())
/// }
/// ```
pub async fn create_pool(database_url: &str, max_connections: u32) -> AppResult<PgPool> {
    info!(max_connections, "Creating database connection pool");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT))
        .idle_timeout(Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT)))
        .test_before_acquire(true)
        .connect(database_url)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to create database pool");
            AppError::Persistence(format!("Failed to connect to database: {}", e))
        })?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| AppError::Persistence(format!("Database health check failed: {}", e)))?;

    info!("Database connection verified");
    Ok(pool)
}

/// Create a pool from the `database` config section, if it names a URL
pub async fn pool_from_config(config: &DatabaseConfig) -> AppResult<Option<PgPool>> {
    match config.url.as_deref().filter(|url| !url.is_empty()) {
        Some(url) => create_pool(url, config.max_connections).await.map(Some),
        None => Ok(None),
    }
}
