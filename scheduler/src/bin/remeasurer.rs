//! cyberwatch remeasurement scheduler — periodically re-queues stale targets.

use std::time::Duration;

use anyhow::Result;
use cyberwatch_common::config::{init_logging, Config};
use cyberwatch_common::db;
use cyberwatch_common::db::queries::{get_targets_for_remeasurement, touch_target};
use cyberwatch_common::queue::{TargetQueue, TargetTask};
use cyberwatch_common::settings::{RemeasurementSettings, SettingsStore, REMEASUREMENT_SETTINGS_KEY};
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

async fn run_cycle(pool: &PgPool, queue: &TargetQueue, settings: &RemeasurementSettings) -> Result<usize> {
    let mut targets = get_targets_for_remeasurement(
        pool,
        settings.interval_hours,
        settings.targets_per_run,
    )
    .await?;

    if targets.is_empty() {
        return Ok(0);
    }

    targets.shuffle(&mut thread_rng());

    let mut enqueued = 0;
    for batch in targets.chunks(settings.batch_size.max(1)) {
        for target in batch {
            match touch_target(pool, &target.target_ip).await {
                Ok(()) => {
                    queue.enqueue(&TargetTask::new(target.target_ip.clone(), "remeasurement")).await?;
                    enqueued += 1;
                }
                Err(e) => warn!(target = target.target_ip, error = %e, "failed to re-enqueue target"),
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    Ok(enqueued)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_logging("cyberwatch_remeasurer=info");
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting remeasurement scheduler");

    let pool = db::create_pool(&config.pg_dsn).await?;
    db::run_migrations(&pool).await?;
    let redis = db::create_redis_client(&config.redis_url).await?;
    let queue = TargetQueue::new(redis);
    let settings_store = SettingsStore::new(pool.clone());

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal");
        shutdown_signal.cancel();
    });

    while !shutdown.is_cancelled() {
        let settings: RemeasurementSettings = settings_store
            .get_or_default(REMEASUREMENT_SETTINGS_KEY)
            .await
            .unwrap_or_default();

        if settings.enabled {
            match run_cycle(&pool, &queue, &settings).await {
                Ok(n) => info!(enqueued = n, "remeasurement cycle complete"),
                Err(e) => error!(error = %e, "remeasurement cycle failed"),
            }
        }

        let jitter_minutes: i64 = thread_rng().gen_range(-30..=30);
        let sleep_seconds = (settings.interval_hours * 3600 + jitter_minutes * 60).max(60);
        info!(sleep_seconds, "sleeping until next remeasurement cycle");

        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs(sleep_seconds as u64)) => {}
            () = shutdown.cancelled() => break,
        }
    }

    info!("Remeasurement scheduler shutdown complete");
    Ok(())
}
