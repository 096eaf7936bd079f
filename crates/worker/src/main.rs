//! Plume background worker
//!
//! Runs the hourly trial expiry sweeps on a cron schedule.

mod trial_expiry;

use anyhow::Context;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use plume_billing::BillingEmailService;
use plume_shared::db;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "plume_worker=info,plume_billing=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = db::create_pool(&database_url)
        .await
        .context("Failed to create database pool")?;
    let email = BillingEmailService::from_env();

    // Catch up immediately on startup, then hourly
    trial_expiry::run_trial_sweeps(&pool, &email).await;

    let scheduler = JobScheduler::new()
        .await
        .context("Failed to create job scheduler")?;

    let job_pool = pool.clone();
    let job_email = email.clone();
    let job = Job::new_async("0 0 * * * *", move |_uuid, _lock| {
        let pool = job_pool.clone();
        let email = job_email.clone();
        Box::pin(async move {
            trial_expiry::run_trial_sweeps(&pool, &email).await;
        })
    })
    .context("Failed to create trial expiry job")?;

    scheduler.add(job).await.context("Failed to add job")?;
    scheduler.start().await.context("Failed to start scheduler")?;

    tracing::info!("Plume worker started, trial sweeps scheduled hourly");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutting down worker");

    Ok(())
}
