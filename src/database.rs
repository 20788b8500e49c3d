use crate::config::DatabaseConfig;
use crate::error::{AppResult, PortabilityError};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;

pub async fn create_database_pool(config: &DatabaseConfig) -> AppResult<SqlitePool> {
    let database_url = config.url.as_str();
    let db_path = database_url.trim_start_matches("sqlite://");
    tracing::info!("Database file path: {}", db_path);

    if let Some(parent) = Path::new(db_path).parent().filter(|p| !p.as_os_str().is_empty()) {
        tracing::info!("Creating database directory: {:?}", parent);
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            PortabilityError::Storage(format!("Failed to create database directory: {e}"))
        })?;
    }

    // Create the database file on first start
    let connection_url = if database_url.contains('?') {
        format!("{database_url}&mode=rwc")
    } else {
        format!("{database_url}?mode=rwc")
    };

    let max_connections = config.max_connections.unwrap_or_else(|| {
        // Default to 4x CPU cores, min 10, max 100
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        (cpus * 4).clamp(10, 100) as u32
    });

    tracing::info!("Configuring database pool with {} max connections", max_connections);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(&connection_url)
        .await
        .map_err(|e| PortabilityError::Storage(format!("Failed to create database pool: {e}")))?;

    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> AppResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| PortabilityError::Storage(format!("Failed to run migrations: {e}")))?;

    // WAL lets concurrent configure requests read while a job is being written
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await
        .map_err(|e| PortabilityError::Storage(format!("Failed to set journal mode: {e}")))?;

    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(pool)
        .await
        .map_err(|e| PortabilityError::Storage(format!("Failed to set synchronous mode: {e}")))?;

    tracing::info!("Database migrations applied");
    Ok(())
}
