//! cyberwatch DNS observer — polls a pluggable source and feeds the work queue.

mod cycle;
mod sources;

use anyhow::Result;
use cyberwatch_common::config::{init_logging, Config};
use cyberwatch_common::queue::TargetQueue;
use cyberwatch_common::settings::{
    CollectorStatus, PiholeSettings, SettingsStore, COLLECTOR_STATUS_KEY, PIHOLE_KEY,
};
use cyberwatch_common::{db, resilience::ResilienceRegistry};
use sources::{logfile::LogTailSource, pihole::PiholeSource, DnsSource};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

async fn build_source(
    config: &Config,
    settings: &PiholeSettings,
    resilience: &ResilienceRegistry,
) -> Option<Box<dyn DnsSource>> {
    if let Some(path) = &config.dns_collector_config {
        return Some(Box::new(LogTailSource::new(path.clone())));
    }
    if settings.enabled && !settings.base_url.is_empty() {
        return Some(Box::new(PiholeSource::new(
            settings.base_url.clone(),
            settings.api_token.clone(),
            resilience.pihole.clone(),
        )));
    }
    None
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_logging("cyberwatch_collector=info");
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting DNS observer");

    let pool = db::create_pool(&config.pg_dsn).await?;
    db::run_migrations(&pool).await?;
    let redis = db::create_redis_client(&config.redis_url).await?;
    let queue = TargetQueue::new(redis);
    let settings_store = SettingsStore::new(pool.clone());
    let resilience = ResilienceRegistry::new();

    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal, finishing in-flight cycle");
        shutdown_signal.cancel();
    });

    let mut source: Option<Box<dyn DnsSource>> = None;
    let mut last_check = chrono::Utc::now();

    while !shutdown.is_cancelled() {
        let pihole_settings: PiholeSettings = settings_store
            .get_or_default(PIHOLE_KEY)
            .await
            .unwrap_or_default();
        let status: CollectorStatus = settings_store
            .get_or_default(COLLECTOR_STATUS_KEY)
            .await
            .unwrap_or_default();

        let needs_rebuild = source.is_none()
            || status
                .restart_requested_at
                .is_some_and(|ts| ts > last_check);

        if needs_rebuild {
            if let Some(mut old) = source.take() {
                old.close().await;
            }
            source = build_source(&config, &pihole_settings, &resilience).await;
            last_check = chrono::Utc::now();
        }

        let Some(active_source) = source.as_mut() else {
            tokio::select! {
                () = tokio::time::sleep(std::time::Duration::from_secs(u64::from(pihole_settings.poll_interval_seconds.max(5)))) => {}
                () = shutdown.cancelled() => break,
            }
            continue;
        };

        match active_source.fetch_new().await {
            Ok(raw) => {
                let filters = cycle::FilterConfig::default();
                match cycle::run_cycle(&pool, &queue, &resolver, &filters, raw).await {
                    Ok(enqueued) => {
                        if enqueued > 0 {
                            info!(enqueued, "DNS cycle enqueued new targets");
                        }
                    }
                    Err(e) => error!(error = %e, "DNS cycle failed"),
                }
            }
            Err(e) => {
                warn!(error = %e, "DNS source fetch failed");
            }
        }

        tokio::select! {
            () = tokio::time::sleep(std::time::Duration::from_secs(u64::from(pihole_settings.poll_interval_seconds.max(5)))) => {}
            () = shutdown.cancelled() => break,
        }
    }

    if let Some(mut active) = source.take() {
        active.close().await;
    }
    info!("DNS observer shutdown complete");
    Ok(())
}
