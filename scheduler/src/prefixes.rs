//! PeeringDB prefix discovery and host sampling for the ASN expander.
//!
//! PeeringDB exposes IXP peering IPs, not announced prefixes, so a bare IP
//! seen at an exchange point is widened into a `/24` (IPv4) or `/64` (IPv6)
//! guess, mirroring the same heuristic as the rest of this pipeline.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use cyberwatch_common::resilience::CircuitBreaker;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;

const API_ROOT: &str = "https://www.peeringdb.com/api";

#[derive(Debug, Deserialize)]
struct NetixlanResponse {
    data: Vec<NetixlanRecord>,
}

#[derive(Debug, Deserialize)]
struct NetixlanRecord {
    ipaddr4: Option<String>,
    ipaddr6: Option<String>,
}

/// Fetch IXP peering IPs for `asn` from `/api/netixlan` (through `breaker`)
/// and widen each into a `/24` or `/64` prefix guess.
pub async fn fetch_prefixes_for_asn(http: &reqwest::Client, breaker: &Arc<CircuitBreaker>, asn: i64) -> Vec<String> {
    if breaker.is_open() {
        return Vec::new();
    }
    breaker.begin_half_open_call();

    let url = format!("{API_ROOT}/netixlan");
    let result = http
        .get(&url)
        .query(&[("asn", asn.to_string())])
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await;

    let resp = match result {
        Ok(resp) => resp,
        Err(_) => {
            breaker.record_failure();
            return Vec::new();
        }
    };
    let body = match resp.json::<NetixlanResponse>().await {
        Ok(body) => body,
        Err(_) => {
            breaker.record_failure();
            return Vec::new();
        }
    };
    breaker.record_success();

    let mut prefixes = Vec::new();
    for record in body.data {
        if let Some(ip) = record.ipaddr4.and_then(|s| s.parse::<Ipv4Addr>().ok()) {
            prefixes.push(widen_v4(ip, 24));
        }
        if let Some(ip) = record.ipaddr6.and_then(|s| s.parse::<Ipv6Addr>().ok()) {
            prefixes.push(widen_v6(ip, 64));
        }
    }
    prefixes
}

fn widen_v4(ip: Ipv4Addr, prefix_len: u32) -> String {
    let mask = u32::MAX.checked_shl(32 - prefix_len).unwrap_or(0);
    let network = u32::from(ip) & mask;
    format!("{}/{prefix_len}", Ipv4Addr::from(network))
}

fn widen_v6(ip: Ipv6Addr, prefix_len: u32) -> String {
    let mask = u128::MAX.checked_shl(128 - prefix_len).unwrap_or(0);
    let network = u128::from(ip) & mask;
    format!("{}/{prefix_len}", Ipv6Addr::from(network))
}

/// Sample up to `max_samples` distinct usable host addresses from `prefix`,
/// excluding the network and broadcast address. `/31`, `/32`, `/127` and
/// `/128` have no usable range, so the network address itself is returned.
pub fn sample_ips_from_prefix(prefix: &str, max_samples: usize, rng: &mut impl Rng) -> Vec<String> {
    let Some((addr_str, len_str)) = prefix.split_once('/') else { return Vec::new() };
    let Ok(prefix_len) = len_str.parse::<u32>() else { return Vec::new() };

    if let Ok(ip) = addr_str.parse::<Ipv4Addr>() {
        return sample_v4(ip, prefix_len, max_samples, rng);
    }
    if let Ok(ip) = addr_str.parse::<Ipv6Addr>() {
        return sample_v6(ip, prefix_len, max_samples, rng);
    }
    Vec::new()
}

fn sample_v4(ip: Ipv4Addr, prefix_len: u32, max_samples: usize, rng: &mut impl Rng) -> Vec<String> {
    if prefix_len >= 31 {
        return vec![ip.to_string()];
    }
    let host_bits = 32 - prefix_len;
    let network = u32::from(ip);
    let host_count = (1u64 << host_bits) - 2; // exclude network + broadcast

    let sample_size = (max_samples as u64).min(host_count) as usize;
    let mut offsets: Vec<u64> = (1..=host_count).collect();
    offsets.shuffle(rng);
    offsets
        .into_iter()
        .take(sample_size)
        .map(|offset| Ipv4Addr::from(network + offset as u32).to_string())
        .collect()
}

fn sample_v6(ip: Ipv6Addr, prefix_len: u32, max_samples: usize, rng: &mut impl Rng) -> Vec<String> {
    if prefix_len >= 127 {
        return vec![ip.to_string()];
    }
    let host_bits = u32::from(128 - prefix_len).min(64);
    let network = u128::from(ip);
    let host_count: u128 = if host_bits >= 64 { u128::MAX } else { (1u128 << host_bits) - 1 };

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    let mut attempts = 0;
    while out.len() < max_samples && attempts < max_samples * 10 + 32 {
        attempts += 1;
        let offset: u128 = rng.gen_range(1..=host_count.max(1));
        if seen.insert(offset) {
            out.push(Ipv6Addr::from(network + offset).to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn widens_a_bare_v4_ixp_ip_to_a_slash_24() {
        let ip: Ipv4Addr = "203.0.113.42".parse().unwrap();
        assert_eq!(widen_v4(ip, 24), "203.0.113.0/24");
    }

    #[test]
    fn widens_a_bare_v6_ixp_ip_to_a_slash_64() {
        let ip: Ipv6Addr = "2001:db8::42".parse().unwrap();
        assert_eq!(widen_v6(ip, 64), "2001:db8::/64");
    }

    #[test]
    fn slash_32_returns_only_its_own_address() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let sampled = sample_ips_from_prefix("203.0.113.5/32", 10, &mut rng);
        assert_eq!(sampled, vec!["203.0.113.5".to_string()]);
    }

    #[test]
    fn slash_31_returns_only_its_own_address() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let sampled = sample_ips_from_prefix("203.0.113.4/31", 10, &mut rng);
        assert_eq!(sampled.len(), 1);
    }

    #[test]
    fn slash_24_never_samples_network_or_broadcast() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let sampled = sample_ips_from_prefix("203.0.113.0/24", 5, &mut rng);
        assert_eq!(sampled.len(), 5);
        assert!(!sampled.contains(&"203.0.113.0".to_string()));
        assert!(!sampled.contains(&"203.0.113.255".to_string()));
    }

    #[test]
    fn slash_64_v6_samples_within_requested_count() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let sampled = sample_ips_from_prefix("2001:db8::/64", 3, &mut rng);
        assert_eq!(sampled.len(), 3);
    }
}
