//! cyberwatch traceroute worker — drains the target queue into path measurements.

mod parse;
mod worker;

use anyhow::Result;
use cyberwatch_common::config::{init_logging, Config};
use cyberwatch_common::queue::TargetQueue;
use cyberwatch_common::settings::{SettingsStore, WorkerSettings, WORKER_SETTINGS_KEY};
use cyberwatch_common::db;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_logging("cyberwatch_tracer=info");
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting traceroute worker");

    let pool = db::create_pool(&config.pg_dsn).await?;
    db::run_migrations(&pool).await?;
    let redis = db::create_redis_client(&config.redis_url).await?;
    let queue = TargetQueue::new(redis);
    let settings_store = SettingsStore::new(pool.clone());

    let settings: WorkerSettings = settings_store
        .get_or_default(WORKER_SETTINGS_KEY)
        .await
        .unwrap_or_default();

    let worker = Worker::new(
        pool,
        queue.clone(),
        settings.rate_limit_per_minute,
        settings.max_concurrent_traceroutes as usize,
        Duration::from_secs(settings.task_timeout_seconds),
    )?;

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal, draining in-flight tasks");
        shutdown_signal.cancel();
    });

    while !shutdown.is_cancelled() {
        tokio::select! {
            result = worker.step() => {
                if let Err(e) = result {
                    error!(error = %e, "worker step failed");
                }
            }
            () = shutdown.cancelled() => break,
        }
    }

    let _ = queue.close().await;
    info!("Traceroute worker shutdown complete");
    Ok(())
}
