//! PeeringDB lookups for ASN organization metadata.

use cyberwatch_common::resilience::{CircuitBreaker, TtlCache};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const API_ROOT: &str = "https://www.peeringdb.com/api";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AsnOrg {
    pub org_name: Option<String>,
    pub country: Option<String>,
    pub peeringdb_id: Option<i64>,
    pub facility_count: Option<i32>,
    pub peering_policy: Option<String>,
    pub traffic_levels: Option<String>,
    pub irr_as_set: Option<String>,
    pub ixp_ips: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NetResponse {
    data: Vec<NetRecord>,
}

#[derive(Debug, Deserialize)]
struct NetRecord {
    id: Option<i64>,
    name: Option<String>,
    #[serde(default)]
    org: Option<OrgRecord>,
    #[serde(default)]
    netfac_set: Vec<serde_json::Value>,
    #[serde(default)]
    netixlan_set: Vec<NetixlanRecord>,
    policy_general: Option<String>,
    info_traffic: Option<String>,
    irr_as_set: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrgRecord {
    name: Option<String>,
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NetixlanRecord {
    ipaddr4: Option<String>,
    ipaddr6: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NetixlanResponse {
    data: Vec<NetixlanRecord>,
}

impl NetixlanRecord {
    fn into_ips(self) -> impl Iterator<Item = String> {
        self.ipaddr4.into_iter().chain(self.ipaddr6)
    }
}

pub struct PeeringDbClient {
    http: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
    cache: TtlCache<i64, AsnOrg>,
}

impl PeeringDbClient {
    #[must_use]
    pub fn new(breaker: Arc<CircuitBreaker>, cache_ttl: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            breaker,
            cache: TtlCache::new(cache_ttl),
        }
    }

    /// Fetch org and network metadata for `asn` via `/api/net?asn=N&depth=2`,
    /// with a follow-up `/api/netixlan?asn=N` call if the primary response
    /// carried no IXP-attached IPs.
    pub async fn fetch_asn_org(&self, asn: i64) -> AsnOrg {
        if let Some(cached) = self.cache.get(&asn) {
            return cached;
        }
        if self.breaker.is_open() {
            return AsnOrg::default();
        }

        let mut org = self.fetch_remote(asn).await;
        if org.ixp_ips.is_empty() {
            org.ixp_ips = self.fetch_netixlan(asn).await;
        }
        self.cache.insert(asn, org.clone());
        org
    }

    async fn fetch_remote(&self, asn: i64) -> AsnOrg {
        self.breaker.begin_half_open_call();

        let url = format!("{API_ROOT}/net");
        let result = self
            .http
            .get(&url)
            .query(&[("asn", asn.to_string()), ("depth", "2".to_string())])
            .timeout(Duration::from_secs(10))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => match resp.json::<NetResponse>().await {
                Ok(body) => {
                    self.breaker.record_success();
                    let Some(record) = body.data.into_iter().next() else {
                        return AsnOrg::default();
                    };
                    let org = record.org;
                    let ixp_ips: Vec<String> = record
                        .netixlan_set
                        .into_iter()
                        .flat_map(NetixlanRecord::into_ips)
                        .collect();

                    AsnOrg {
                        org_name: org.as_ref().and_then(|o| o.name.clone()).or(record.name),
                        country: org.and_then(|o| o.country),
                        peeringdb_id: record.id,
                        facility_count: Some(i32::try_from(record.netfac_set.len()).unwrap_or(i32::MAX)),
                        peering_policy: record.policy_general,
                        traffic_levels: record.info_traffic,
                        irr_as_set: record.irr_as_set,
                        ixp_ips,
                    }
                }
                Err(_) => {
                    self.breaker.record_failure();
                    AsnOrg::default()
                }
            },
            Ok(_) | Err(_) => {
                self.breaker.record_failure();
                AsnOrg::default()
            }
        }
    }

    async fn fetch_netixlan(&self, asn: i64) -> Vec<String> {
        if self.breaker.is_open() {
            return Vec::new();
        }
        self.breaker.begin_half_open_call();

        let url = format!("{API_ROOT}/netixlan");
        let result = self
            .http
            .get(&url)
            .query(&[("asn", asn.to_string())])
            .timeout(Duration::from_secs(10))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => match resp.json::<NetixlanResponse>().await {
                Ok(body) => {
                    self.breaker.record_success();
                    body.data.into_iter().flat_map(NetixlanRecord::into_ips).collect()
                }
                Err(_) => {
                    self.breaker.record_failure();
                    Vec::new()
                }
            },
            Ok(_) | Err(_) => {
                self.breaker.record_failure();
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn net_response_prefers_org_fields_over_net_name() {
        let body = r#"{"data":[{"name":"Example Net","org":{"name":"Example Org","country":"US"}}]}"#;
        let parsed: NetResponse = serde_json::from_str(body).unwrap();
        let record = parsed.data.into_iter().next().unwrap();
        assert_eq!(record.org.as_ref().unwrap().name.as_deref(), Some("Example Org"));
        assert_eq!(record.org.unwrap().country.as_deref(), Some("US"));
    }

    #[test]
    fn net_response_tolerates_missing_org() {
        let body = r#"{"data":[{"name":"Example Net"}]}"#;
        let parsed: NetResponse = serde_json::from_str(body).unwrap();
        let record = parsed.data.into_iter().next().unwrap();
        assert!(record.org.is_none());
        assert_eq!(record.name.as_deref(), Some("Example Net"));
    }

    #[test]
    fn net_response_extracts_facility_count_and_ixp_ips() {
        let body = r#"{"data":[{
            "id": 42,
            "name": "Example Net",
            "org": {"name": "Example Org", "country": "US"},
            "netfac_set": [1, 2, 3],
            "netixlan_set": [{"ipaddr4": "203.0.113.5", "ipaddr6": null}],
            "policy_general": "Open",
            "info_traffic": "10-20Gbps",
            "irr_as_set": "AS-EXAMPLE"
        }]}"#;
        let parsed: NetResponse = serde_json::from_str(body).unwrap();
        let record = parsed.data.into_iter().next().unwrap();
        assert_eq!(record.id, Some(42));
        assert_eq!(record.netfac_set.len(), 3);
        assert_eq!(record.policy_general.as_deref(), Some("Open"));
        assert_eq!(record.irr_as_set.as_deref(), Some("AS-EXAMPLE"));

        let ips: Vec<String> = record.netixlan_set.into_iter().flat_map(NetixlanRecord::into_ips).collect();
        assert_eq!(ips, vec!["203.0.113.5".to_string()]);
    }

    #[test]
    fn netixlan_response_parses_both_address_families() {
        let body = r#"{"data":[{"ipaddr4":"203.0.113.5","ipaddr6":"2001:db8::1"}]}"#;
        let parsed: NetixlanResponse = serde_json::from_str(body).unwrap();
        let ips: Vec<String> = parsed.data.into_iter().flat_map(NetixlanRecord::into_ips).collect();
        assert_eq!(ips, vec!["203.0.113.5".to_string(), "2001:db8::1".to_string()]);
    }
}
