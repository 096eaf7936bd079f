//! Plume API server

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use plume_api::{routes::create_router, AppState, Config};
use plume_shared::db;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in development; ignore when absent
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "plume_api=info,plume_billing=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    let migration_pool = db::create_migration_pool(&config.database_url)
        .await
        .context("Failed to create migration pool")?;
    db::run_migrations(&migration_pool)
        .await
        .context("Failed to run database migrations")?;
    migration_pool.close().await;

    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    let bind_address = config.bind_address.clone();
    let state = AppState::new(pool, config);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;

    tracing::info!(address = %bind_address, "Plume API listening");

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
