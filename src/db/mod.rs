use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::info;

use crate::error::{AppError, AppResult};

/// Fixed-size application pool (section 5): ~20 connections.
pub async fn create_pool(database_url: &str) -> AppResult<PgPool> {
    info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .map_err(|e| {
            tracing::error!(error = ?e, "Failed to connect to database");
            AppError::Database(e)
        })?;

    info!("Database connection pool created");
    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> AppResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

    Ok(())
}

/// Checks out a connection, sets `app.encryption_key` for the duration of the
/// closure, then releases it. The GUC is connection-scoped (section 5), so it
/// must be set on every checkout that needs it rather than once globally.
pub async fn with_encryption_key<F, T>(
    pool: &PgPool,
    encryption_key: &str,
    f: F,
) -> AppResult<T>
where
    F: for<'c> FnOnce(
        &'c mut sqlx::PgConnection,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = AppResult<T>> + Send + 'c>>,
{
    let mut conn = pool.acquire().await.map_err(AppError::Database)?;
    sqlx::query("SELECT set_config('app.encryption_key', $1, true)")
        .bind(encryption_key)
        .execute(&mut *conn)
        .await
        .map_err(AppError::Database)?;
    f(&mut conn).await
}
