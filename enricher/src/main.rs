//! cyberwatch enrichment engine — IP hops to ASN and organization metadata.

mod cymru;
mod external;
mod merge;
mod peeringdb;

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use cyberwatch_common::config::{init_logging, Config};
use cyberwatch_common::db::models::Hop;
use cyberwatch_common::db::queries::{
    fetch_unenriched_hops, mark_measurement_enriched, remaining_unenriched_hops, update_hop_enrichment,
    upsert_asn,
};
use cyberwatch_common::resilience::{CircuitBreaker, ResilienceRegistry};
use cyberwatch_common::settings::{EnrichmentSettings, SettingsStore, ENRICHMENT_SETTINGS_KEY};
use cyberwatch_common::db;
use external::ExternalSources;
use futures::future::join_all;
use merge::{asn_patch_from_hop, merge_hop};
use peeringdb::PeeringDbClient;
use sqlx::PgPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Enrich one hop: Cymru, then (if still ASN-less) the external tier, then
/// PeeringDB org lookup once an ASN is known.
async fn enrich_hop(
    resolver: &TokioAsyncResolver,
    cymru_breaker: &Arc<CircuitBreaker>,
    external: &ExternalSources,
    peeringdb: &PeeringDbClient,
    ip: &str,
) -> merge::MergedHop {
    let cymru_info = cymru::lookup_asn(resolver, cymru_breaker, ip).await;

    let external_info = if cymru_info.asn.is_none() {
        external.lookup(ip).await
    } else {
        external::ExternalAsnInfo::default()
    };

    let asn = cymru_info.asn.or(external_info.asn);
    let org = if let Some(asn) = asn {
        peeringdb.fetch_asn_org(asn).await
    } else {
        peeringdb::AsnOrg::default()
    };

    merge_hop(&cymru_info, &external_info, &org)
}

async fn process_batch(
    pool: &PgPool,
    resolver: &TokioAsyncResolver,
    cymru_breaker: &Arc<CircuitBreaker>,
    external: &ExternalSources,
    peeringdb: &PeeringDbClient,
    hops: Vec<Hop>,
) -> Result<usize> {
    let futures = hops.iter().map(|hop| {
        let ip = hop.ip.clone().unwrap_or_default();
        async move { enrich_hop(resolver, cymru_breaker, external, peeringdb, &ip).await }
    });
    let merged = join_all(futures).await;

    let mut enriched_count = 0;
    for (hop, result) in hops.iter().zip(merged.iter()) {
        update_hop_enrichment(
            pool,
            hop.id,
            result.asn,
            result.prefix.as_deref(),
            result.org_name.as_deref(),
            result.country.as_deref(),
        )
        .await?;

        if let Some(asn) = result.asn {
            let patch = asn_patch_from_hop(result);
            upsert_asn(pool, asn, &patch).await?;
        }
        enriched_count += 1;
    }

    let measurement_ids: HashSet<i64> = hops.iter().map(|h| h.measurement_id).collect();
    for measurement_id in measurement_ids {
        if remaining_unenriched_hops(pool, measurement_id).await? == 0 {
            mark_measurement_enriched(pool, measurement_id).await?;
            info!(measurement_id, "measurement marked as enriched");
        }
    }

    Ok(enriched_count)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_logging("cyberwatch_enricher=info");
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting enrichment engine");

    let pool = db::create_pool(&config.pg_dsn).await?;
    db::run_migrations(&pool).await?;
    let settings_store = SettingsStore::new(pool.clone());
    let resilience = ResilienceRegistry::new();

    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());

    let settings: EnrichmentSettings = settings_store
        .get_or_default(ENRICHMENT_SETTINGS_KEY)
        .await
        .unwrap_or_default();

    let external = ExternalSources::new(
        resilience.ip_api.clone(),
        resilience.ip_api_limiter.clone(),
        resilience.ipinfo.clone(),
        resilience.ripe_stat.clone(),
        Duration::from_secs(settings.cache_ttl_seconds),
    );
    let peeringdb = PeeringDbClient::new(
        resilience.peeringdb.clone(),
        Duration::from_secs(settings.peeringdb_cache_ttl_seconds),
    );

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal");
        shutdown_signal.cancel();
    });

    while !shutdown.is_cancelled() {
        let hops = fetch_unenriched_hops(&pool, settings.batch_size).await?;
        if hops.is_empty() {
            tokio::select! {
                () = tokio::time::sleep(Duration::from_secs(settings.poll_interval_seconds)) => {}
                () = shutdown.cancelled() => break,
            }
            continue;
        }

        let batch_size = hops.len();
        match process_batch(&pool, &resolver, &resilience.cymru, &external, &peeringdb, hops).await {
            Ok(n) => info!(enriched = n, batch_size, "enrichment batch completed"),
            Err(e) => error!(error = %e, "enrichment batch failed"),
        }
    }

    info!("Enrichment engine shutdown complete");
    Ok(())
}
