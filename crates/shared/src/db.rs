//! Database pool construction and migrations
//!
//! Pools are sized for a managed Postgres pooler in session mode: a handful
//! of api and worker instances share a small session budget, so each process
//! keeps at most a few connections and recycles them quickly.

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::{str::FromStr, time::Duration};

const POOL_MAX_CONNECTIONS: u32 = 3;

/// Build the connection options shared by every pool. The statement cache
/// must stay disabled: PgBouncer in transaction mode rejects prepared
/// statements.
fn connect_options(database_url: &str) -> Result<PgConnectOptions, sqlx::Error> {
    Ok(PgConnectOptions::from_str(database_url)?.statement_cache_capacity(0))
}

/// Create the runtime connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(POOL_MAX_CONNECTIONS)
        .min_connections(0)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(60))
        .max_lifetime(Duration::from_secs(300))
        .connect_with(connect_options(database_url)?)
        .await
}

/// Create a single-connection pool for running migrations. Migrations run
/// sequentially and can hold locks for a while, so the acquire timeout is
/// generous and the connection is released as soon as the run finishes.
pub async fn create_migration_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(1)
        .min_connections(0)
        .acquire_timeout(Duration::from_secs(120))
        .idle_timeout(Duration::from_secs(30))
        .max_lifetime(Duration::from_secs(180))
        .connect_with(connect_options(database_url)?)
        .await
}

/// Apply pending migrations from the workspace `migrations/` directory.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_options_rejects_garbage() {
        assert!(connect_options("not-a-url").is_err());
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_create_pool() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = create_pool(&url).await.expect("Failed to create pool");
        assert!(pool.size() > 0);
    }
}
