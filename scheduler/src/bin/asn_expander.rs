//! cyberwatch ASN expander — discovers additional host IPs within well-connected ASNs.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use cyberwatch_common::config::{init_logging, Config};
use cyberwatch_common::db;
use cyberwatch_common::db::queries::{
    get_interesting_asns, get_or_create_target, mark_asn_enrichment_completed, target_seen_recently,
};
use cyberwatch_common::queue::{TargetQueue, TargetTask};
use cyberwatch_common::resilience::{CircuitBreaker, ResilienceRegistry};
use cyberwatch_common::settings::{EnrichmentSettings, SettingsStore, ENRICHMENT_SETTINGS_KEY};
use cyberwatch_scheduler::prefixes::{fetch_prefixes_for_asn, sample_ips_from_prefix};
use rand::thread_rng;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const MAX_ASNS_PER_RUN: i64 = 20;
const RECENTLY_SEEN_DAYS: i64 = 7;

async fn expand_asn(
    pool: &PgPool,
    queue: &TargetQueue,
    http: &reqwest::Client,
    breaker: &Arc<CircuitBreaker>,
    asn: i64,
    max_ips_per_asn: u32,
) -> Result<usize> {
    let prefixes = fetch_prefixes_for_asn(http, breaker, asn).await;
    if prefixes.is_empty() {
        warn!(asn, "no prefixes found for ASN");
        return Ok(0);
    }

    let ips_per_prefix = (max_ips_per_asn as usize / prefixes.len()).max(1);
    let mut rng = thread_rng();
    let mut all_ips: HashSet<String> = HashSet::new();

    for prefix in &prefixes {
        let sampled = sample_ips_from_prefix(prefix, ips_per_prefix, &mut rng);
        all_ips.extend(sampled);
        if all_ips.len() >= max_ips_per_asn as usize {
            break;
        }
    }

    let mut enqueued = 0;
    for ip in all_ips {
        if target_seen_recently(pool, &ip, RECENTLY_SEEN_DAYS).await? {
            continue;
        }
        get_or_create_target(pool, &ip, "asn_expansion").await?;
        queue.enqueue(&TargetTask::new(ip, "asn_expansion")).await?;
        enqueued += 1;
    }

    mark_asn_enrichment_completed(pool, asn).await?;
    info!(asn, prefix_count = prefixes.len(), enqueued, "ASN expanded");
    Ok(enqueued)
}

async fn run_cycle(
    pool: &PgPool,
    queue: &TargetQueue,
    http: &reqwest::Client,
    breaker: &Arc<CircuitBreaker>,
    settings: &EnrichmentSettings,
) -> Result<usize> {
    let asns = get_interesting_asns(pool, settings.asn_min_neighbor_count, MAX_ASNS_PER_RUN).await?;
    if asns.is_empty() {
        return Ok(0);
    }

    let mut total = 0;
    for record in asns {
        match expand_asn(pool, queue, http, breaker, record.asn, settings.asn_max_ips_per_asn).await {
            Ok(n) => total += n,
            Err(e) => error!(asn = record.asn, error = %e, "ASN expansion failed"),
        }
    }
    Ok(total)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_logging("cyberwatch_asn_expander=info");
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting ASN expander");

    let pool = db::create_pool(&config.pg_dsn).await?;
    db::run_migrations(&pool).await?;
    let redis = db::create_redis_client(&config.redis_url).await?;
    let queue = TargetQueue::new(redis);
    let settings_store = SettingsStore::new(pool.clone());
    let http = reqwest::Client::new();
    let resilience = ResilienceRegistry::new();

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal");
        shutdown_signal.cancel();
    });

    while !shutdown.is_cancelled() {
        let settings: EnrichmentSettings = settings_store
            .get_or_default(ENRICHMENT_SETTINGS_KEY)
            .await
            .unwrap_or_default();

        if settings.asn_expansion_enabled {
            match run_cycle(&pool, &queue, &http, &resilience.peeringdb, &settings).await {
                Ok(n) => info!(enqueued = n, "ASN expansion cycle complete"),
                Err(e) => error!(error = %e, "ASN expansion cycle failed"),
            }
        }

        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs(settings.asn_expansion_interval_minutes * 60)) => {}
            () = shutdown.cancelled() => break,
        }
    }

    info!("ASN expander shutdown complete");
    Ok(())
}
