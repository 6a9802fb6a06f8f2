mod bot;
mod config;
mod db;
mod domain;
mod engine;
mod files;
mod services;
mod state;
mod time_utils;

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::state::{AppState, SharedState, UserLocks};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;

    tracing::info!("Connecting to database...");
    let pool = db::connect(&config.database_url).await.map_err(|e| {
        tracing::error!("Failed to prepare database: {}", e);
        e
    })?;
    tracing::info!("Database ready, migrations applied");

    let files = Arc::new(files::LocalFileStore::new(config.files_dir.clone()));
    let shared: SharedState = Arc::new(AppState {
        pool,
        config,
        files,
        locks: UserLocks::new(),
    });

    // Retention sweep every night at 03:00; the same cleanup is reachable
    // on demand through /sweep.
    let scheduler = JobScheduler::new().await?;
    let shared_for_sweep = shared.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let state = shared_for_sweep.clone();
            Box::pin(async move {
                let now = chrono::Utc::now();
                match services::retention::run_sweep(&state.pool, &state.config.retention, now).await
                {
                    Ok(report) => {
                        tracing::info!(
                            "Nightly sweep done: {} inbox entries, {} support requests, {} stale conversations",
                            report.inbox_purged,
                            report.support_archived,
                            report.conversations_cleared
                        );
                    }
                    Err(e) => {
                        tracing::error!("Nightly sweep failed: {}", e);
                    }
                }
            })
        })?)
        .await?;
    scheduler.start().await?;
    tracing::info!("Scheduler started:");
    tracing::info!("  - Retention sweep: 03:00 daily");

    bot::run(shared).await
}
