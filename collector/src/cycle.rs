//! One DNS-observation cycle: filter, persist, resolve, upsert, enqueue.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cyberwatch_common::db::queries::{get_or_create_target, insert_dns_query, upsert_dns_target};
use cyberwatch_common::queue::{TargetQueue, TargetTask};
use sqlx::PgPool;
use tokio::sync::Semaphore;
use trust_dns_resolver::TokioAsyncResolver;

use crate::sources::ObservedQuery;

/// Filtering thresholds applied before persistence.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub max_domain_length: usize,
    pub ignore_domain_suffixes: Vec<String>,
    pub ignore_qtypes: Vec<String>,
    pub ignore_clients: Vec<String>,
    pub max_ips_per_domain: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_domain_length: 253,
            ignore_domain_suffixes: Vec::new(),
            ignore_qtypes: Vec::new(),
            ignore_clients: Vec::new(),
            max_ips_per_domain: 4,
        }
    }
}

/// Whether a raw observed query should be dropped before persistence.
#[must_use]
pub fn should_drop(query: &ObservedQuery, config: &FilterConfig) -> bool {
    if query.domain.len() > config.max_domain_length {
        return true;
    }
    if query.domain.ends_with(".in-addr.arpa") || query.domain.ends_with(".ip6.arpa") {
        return true;
    }
    if config
        .ignore_domain_suffixes
        .iter()
        .any(|suf| query.domain.ends_with(suf.as_str()))
    {
        return true;
    }
    if config.ignore_qtypes.iter().any(|q| q.eq_ignore_ascii_case(&query.qtype)) {
        return true;
    }
    if let Some(client) = &query.client_ip {
        if config.ignore_clients.iter().any(|c| c == client) {
            return true;
        }
    }
    false
}

/// Resolve `domain` to up to `limit` addresses, asking only the relevant
/// record type when the observed qtype was A or AAAA, otherwise both.
pub async fn resolve_domain(
    resolver: &TokioAsyncResolver,
    domain: &str,
    qtype: &str,
    limit: usize,
) -> Vec<std::net::IpAddr> {
    let mut ips = Vec::new();

    let want_a = qtype.eq_ignore_ascii_case("A") || !qtype.eq_ignore_ascii_case("AAAA");
    let want_aaaa = qtype.eq_ignore_ascii_case("AAAA") || !qtype.eq_ignore_ascii_case("A");

    if want_a {
        if let Ok(resp) = tokio::time::timeout(Duration::from_secs(2), resolver.ipv4_lookup(domain)).await {
            if let Ok(lookup) = resp {
                ips.extend(lookup.iter().map(|r| std::net::IpAddr::V4(r.0)));
            }
        }
    }
    if want_aaaa && ips.len() < limit {
        if let Ok(resp) = tokio::time::timeout(Duration::from_secs(2), resolver.ipv6_lookup(domain)).await {
            if let Ok(lookup) = resp {
                ips.extend(lookup.iter().map(|r| std::net::IpAddr::V6(r.0)));
            }
        }
    }

    ips.truncate(limit);
    ips
}

/// Run one full observation cycle against `raw` queries freshly fetched
/// from a [`crate::sources::DnsSource`].
///
/// Resolution for each surviving query is spawned onto its own task, bounded
/// to 20 concurrent resolutions by a shared semaphore; a shared, mutex-guarded
/// set dedupes IPs seen across queries in this cycle.
pub async fn run_cycle(
    pool: &PgPool,
    queue: &TargetQueue,
    resolver: &TokioAsyncResolver,
    filters: &FilterConfig,
    raw: Vec<ObservedQuery>,
) -> anyhow::Result<usize> {
    let semaphore = Arc::new(Semaphore::new(20));
    let seen_ips = Arc::new(tokio::sync::Mutex::new(HashSet::new()));
    let mut handles = Vec::new();

    for query in raw {
        if should_drop(&query, filters) {
            continue;
        }

        let pool = pool.clone();
        let queue = queue.clone();
        let resolver = resolver.clone();
        let filters = filters.clone();
        let semaphore = semaphore.clone();
        let seen_ips = seen_ips.clone();

        handles.push(tokio::spawn(async move {
            insert_dns_query(
                &pool,
                &query.domain,
                &query.qtype,
                query.client_ip.as_deref(),
                query.queried_at,
            )
            .await?;

            let permit = semaphore.acquire_owned().await?;
            let ips = resolve_domain(&resolver, &query.domain, &query.qtype, filters.max_ips_per_domain).await;
            drop(permit);

            let mut enqueued = 0usize;
            for ip in ips {
                let ip_str = ip.to_string();

                upsert_dns_target(
                    &pool,
                    &query.domain,
                    &ip_str,
                    Utc::now(),
                    query.client_ip.as_deref(),
                    &query.qtype,
                )
                .await?;

                let is_new = seen_ips.lock().await.insert(ip_str.clone());
                if is_new {
                    get_or_create_target(&pool, &ip_str, "dns").await?;
                    let task = TargetTask::new(ip_str, "dns").with_domain(query.domain.clone());
                    queue.enqueue(&task).await?;
                    enqueued += 1;
                }
            }
            Ok::<usize, anyhow::Error>(enqueued)
        }));
    }

    let mut enqueued = 0usize;
    for handle in handles {
        enqueued += handle.await??;
    }

    Ok(enqueued)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(domain: &str, qtype: &str) -> ObservedQuery {
        ObservedQuery {
            domain: domain.to_string(),
            qtype: qtype.to_string(),
            client_ip: Some("10.0.0.1".to_string()),
            queried_at: Utc::now(),
        }
    }

    #[test]
    fn drops_reverse_dns_domains() {
        let query = q("7.0.0.10.in-addr.arpa", "PTR");
        assert!(should_drop(&query, &FilterConfig::default()));
    }

    #[test]
    fn drops_domains_over_length_limit() {
        let long = "a".repeat(300);
        let query = q(&long, "A");
        assert!(should_drop(&query, &FilterConfig::default()));
    }

    #[test]
    fn drops_ignored_clients() {
        let mut config = FilterConfig::default();
        config.ignore_clients.push("10.0.0.1".to_string());
        let query = q("example.com", "A");
        assert!(should_drop(&query, &config));
    }

    #[test]
    fn keeps_ordinary_domains() {
        let query = q("example.com", "A");
        assert!(!should_drop(&query, &FilterConfig::default()));
    }
}
