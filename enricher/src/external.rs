//! Free-tier external ASN sources: ip-api.com, ipinfo.io, RIPE Stat.
//!
//! Queried in parallel; the merge keeps the first non-empty value seen per
//! field, in ip-api, ipinfo, RIPE Stat order.

use cyberwatch_common::resilience::{CircuitBreaker, RateLimiter, TtlCache};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalAsnInfo {
    pub asn: Option<i64>,
    pub org_name: Option<String>,
    pub country: Option<String>,
}

pub struct ExternalSources {
    http: reqwest::Client,
    ip_api_breaker: Arc<CircuitBreaker>,
    ip_api_limiter: Arc<RateLimiter>,
    ipinfo_breaker: Arc<CircuitBreaker>,
    ripe_breaker: Arc<CircuitBreaker>,
    cache: TtlCache<String, ExternalAsnInfo>,
}

impl ExternalSources {
    #[must_use]
    pub fn new(
        ip_api_breaker: Arc<CircuitBreaker>,
        ip_api_limiter: Arc<RateLimiter>,
        ipinfo_breaker: Arc<CircuitBreaker>,
        ripe_breaker: Arc<CircuitBreaker>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            ip_api_breaker,
            ip_api_limiter,
            ipinfo_breaker,
            ripe_breaker,
            cache: TtlCache::new(cache_ttl),
        }
    }

    /// Query all three sources in parallel and merge, first-non-empty wins.
    pub async fn lookup(&self, ip: &str) -> ExternalAsnInfo {
        let (ip_api, ipinfo, ripe) = tokio::join!(
            self.lookup_ip_api(ip),
            self.lookup_ipinfo(ip),
            self.lookup_ripe_stat(ip),
        );

        ExternalAsnInfo {
            asn: ip_api.asn.or(ipinfo.asn).or(ripe.asn),
            org_name: ip_api.org_name.or(ipinfo.org_name).or(ripe.org_name),
            country: ip_api.country.or(ipinfo.country).or(ripe.country),
        }
    }

    async fn lookup_ip_api(&self, ip: &str) -> ExternalAsnInfo {
        let cache_key = format!("ipapi:{ip}");
        if let Some(cached) = self.cache.get(&cache_key) {
            return cached;
        }
        if self.ip_api_breaker.is_open() || !self.ip_api_limiter.try_acquire() {
            return ExternalAsnInfo::default();
        }
        self.ip_api_breaker.begin_half_open_call();

        #[derive(Deserialize)]
        struct Resp {
            status: String,
            #[serde(rename = "as")]
            as_field: Option<String>,
            #[serde(rename = "countryCode")]
            country_code: Option<String>,
        }

        let url = format!("http://ip-api.com/json/{ip}");
        let result = self
            .http
            .get(&url)
            .query(&[("fields", "status,countryCode,as")])
            .timeout(Duration::from_secs(10))
            .send()
            .await;

        let info = match result {
            Ok(resp) if resp.status().is_success() => match resp.json::<Resp>().await {
                Ok(body) if body.status == "success" => {
                    self.ip_api_breaker.record_success();
                    let (asn, org_name) = parse_as_field(body.as_field.as_deref());
                    ExternalAsnInfo { asn, org_name, country: body.country_code }
                }
                Ok(_) => ExternalAsnInfo::default(),
                Err(_) => {
                    self.ip_api_breaker.record_failure();
                    ExternalAsnInfo::default()
                }
            },
            Ok(_) | Err(_) => {
                self.ip_api_breaker.record_failure();
                ExternalAsnInfo::default()
            }
        };

        self.cache.insert(cache_key, info.clone());
        info
    }

    async fn lookup_ipinfo(&self, ip: &str) -> ExternalAsnInfo {
        let cache_key = format!("ipinfo:{ip}");
        if let Some(cached) = self.cache.get(&cache_key) {
            return cached;
        }
        if self.ipinfo_breaker.is_open() {
            return ExternalAsnInfo::default();
        }
        self.ipinfo_breaker.begin_half_open_call();

        #[derive(Deserialize)]
        struct Resp {
            org: Option<String>,
            country: Option<String>,
        }

        let url = format!("https://ipinfo.io/{ip}/json");
        let result = self.http.get(&url).timeout(Duration::from_secs(10)).send().await;

        let info = match result {
            Ok(resp) if resp.status().is_success() => match resp.json::<Resp>().await {
                Ok(body) => {
                    self.ipinfo_breaker.record_success();
                    let (asn, org_name) = parse_as_field(body.org.as_deref());
                    ExternalAsnInfo { asn, org_name, country: body.country }
                }
                Err(_) => {
                    self.ipinfo_breaker.record_failure();
                    ExternalAsnInfo::default()
                }
            },
            Ok(_) | Err(_) => {
                self.ipinfo_breaker.record_failure();
                ExternalAsnInfo::default()
            }
        };

        self.cache.insert(cache_key, info.clone());
        info
    }

    async fn lookup_ripe_stat(&self, ip: &str) -> ExternalAsnInfo {
        let cache_key = format!("ripe:{ip}");
        if let Some(cached) = self.cache.get(&cache_key) {
            return cached;
        }
        if self.ripe_breaker.is_open() {
            return ExternalAsnInfo::default();
        }
        self.ripe_breaker.begin_half_open_call();

        let url = "https://stat.ripe.net/data/whois/data.json";
        let result = self
            .http
            .get(url)
            .query(&[("resource", ip)])
            .timeout(Duration::from_secs(10))
            .send()
            .await;

        let info = match result {
            Ok(resp) if resp.status().is_success() => match resp.json::<serde_json::Value>().await {
                Ok(body) => {
                    self.ripe_breaker.record_success();
                    parse_ripe_whois_records(&body)
                }
                Err(_) => {
                    self.ripe_breaker.record_failure();
                    ExternalAsnInfo::default()
                }
            },
            Ok(_) | Err(_) => {
                self.ripe_breaker.record_failure();
                ExternalAsnInfo::default()
            }
        };

        self.cache.insert(cache_key, info.clone());
        info
    }
}

/// `"AS15169 Google LLC"` -> `(Some(15169), Some("Google LLC"))`.
fn parse_as_field(field: Option<&str>) -> (Option<i64>, Option<String>) {
    let Some(field) = field.filter(|s| !s.is_empty()) else {
        return (None, None);
    };
    let mut parts = field.splitn(2, char::is_whitespace);
    let asn = parts.next().and_then(|s| s.strip_prefix("AS")).and_then(|s| s.parse().ok());
    let org_name = parts.next().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    (asn, org_name)
}

fn parse_ripe_whois_records(body: &serde_json::Value) -> ExternalAsnInfo {
    let mut info = ExternalAsnInfo::default();
    let records = body["data"]["records"].as_array().cloned().unwrap_or_default();

    for record in records {
        let Some(items) = record.as_array() else { continue };
        for item in items {
            let key = item["key"].as_str().unwrap_or_default().to_lowercase();
            let value = item["value"].as_str().unwrap_or_default();
            match key.as_str() {
                "origin" if info.asn.is_none() => {
                    info.asn = value.trim_start_matches("AS").parse().ok();
                }
                "netname" | "descr" | "org-name" if info.org_name.is_none() => {
                    info.org_name = Some(value.to_string());
                }
                "country" if info.country.is_none() => {
                    info.country = Some(value.to_string());
                }
                _ => {}
            }
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_as_field_with_org_name() {
        let (asn, org) = parse_as_field(Some("AS15169 Google LLC"));
        assert_eq!(asn, Some(15169));
        assert_eq!(org.as_deref(), Some("Google LLC"));
    }

    #[test]
    fn empty_as_field_yields_nothing() {
        let (asn, org) = parse_as_field(Some(""));
        assert_eq!(asn, None);
        assert_eq!(org, None);
    }

    #[test]
    fn parses_ripe_whois_records() {
        let body = serde_json::json!({
            "data": {
                "records": [[
                    {"key": "origin", "value": "AS15169"},
                    {"key": "netname", "value": "GOOGLE"},
                    {"key": "country", "value": "US"},
                ]]
            }
        });
        let info = parse_ripe_whois_records(&body);
        assert_eq!(info.asn, Some(15169));
        assert_eq!(info.org_name.as_deref(), Some("GOOGLE"));
        assert_eq!(info.country.as_deref(), Some("US"));
    }
}
