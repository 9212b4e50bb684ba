//! Pi-hole HTTP source, auto-detecting the v5 and v6 API dialects.

use std::sync::Arc;

use async_trait::async_trait;
use cyberwatch_common::resilience::CircuitBreaker;
use tracing::{debug, warn};

use super::{coerce_epoch_seconds, DnsSource, ObservedQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Unknown,
    V5,
    V6,
}

#[derive(thiserror::Error, Debug)]
pub enum PiholeAuthError {
    #[error("pi-hole authentication rejected (HTTP {0})")]
    Rejected(u16),
}

/// Pluggable HTTP source for Pi-hole's query log, auto-detecting the
/// dialect on first contact and re-authenticating v6 sessions on expiry.
pub struct PiholeSource {
    base_url: String,
    api_token: String,
    client: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
    dialect: Dialect,
    session_id: Option<String>,
    last_seen_ts: i64,
}

impl PiholeSource {
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
            client: reqwest::Client::new(),
            breaker,
            dialect: Dialect::Unknown,
            session_id: None,
            last_seen_ts: 0,
        }
    }

    fn v6_auth_url(&self) -> String {
        format!("{}/api/auth", self.base_url)
    }

    fn v6_queries_url(&self) -> String {
        format!("{}/api/queries", self.base_url)
    }

    fn v5_queries_url(&self) -> String {
        format!(
            "{}/admin/api.php?getAllQueries=1&auth={}",
            self.base_url, self.api_token
        )
    }

    async fn authenticate_v6(&mut self) -> anyhow::Result<()> {
        if self.breaker.is_open() {
            anyhow::bail!("pi-hole circuit breaker open");
        }
        self.breaker.begin_half_open_call();

        let result = self
            .client
            .post(self.v6_auth_url())
            .json(&serde_json::json!({ "password": self.api_token }))
            .send()
            .await;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                self.breaker.record_failure();
                return Err(e.into());
            }
        };

        match resp.status().as_u16() {
            200 => {
                let body: serde_json::Value = resp.json().await?;
                let sid = body
                    .get("session")
                    .and_then(|s| s.get("sid"))
                    .and_then(|s| s.as_str())
                    .map(ToString::to_string);
                self.session_id = sid;
                self.breaker.record_success();
                Ok(())
            }
            401 | 403 => Err(PiholeAuthError::Rejected(resp.status().as_u16()).into()),
            status => {
                self.breaker.record_failure();
                Err(anyhow::anyhow!("unexpected auth response: {status}"))
            }
        }
    }

    async fn detect_dialect(&mut self) -> anyhow::Result<()> {
        if self.breaker.is_open() {
            anyhow::bail!("pi-hole circuit breaker open");
        }
        self.breaker.begin_half_open_call();

        let resp = self
            .client
            .post(self.v6_auth_url())
            .json(&serde_json::json!({ "password": self.api_token }))
            .send()
            .await;

        match resp {
            Ok(r) if r.status().as_u16() == 404 || r.status().as_u16() == 405 => {
                self.dialect = Dialect::V5;
                self.breaker.record_success();
                Ok(())
            }
            Ok(r) if r.status().is_success() => {
                let body: serde_json::Value = r.json().await?;
                self.session_id = body
                    .get("session")
                    .and_then(|s| s.get("sid"))
                    .and_then(|s| s.as_str())
                    .map(ToString::to_string);
                self.dialect = Dialect::V6;
                self.breaker.record_success();
                Ok(())
            }
            Ok(r) if r.status().as_u16() == 401 || r.status().as_u16() == 403 => {
                Err(PiholeAuthError::Rejected(r.status().as_u16()).into())
            }
            Ok(r) => {
                self.dialect = Dialect::V5;
                debug!(status = %r.status(), "unexpected auth probe response, falling back to v5");
                self.breaker.record_success();
                Ok(())
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(e.into())
            }
        }
    }

    fn extract_v6_fields(row: &serde_json::Value) -> Option<ObservedQuery> {
        let domain = row
            .get("domain")
            .or_else(|| row.get("query"))
            .or_else(|| row.get("name"))
            .and_then(|v| v.as_str())?
            .to_string();

        let ts = row
            .get("time")
            .or_else(|| row.get("timestamp"))
            .or_else(|| row.get("ts"))
            .or_else(|| row.get("date"))
            .or_else(|| row.get("queried_at"))?;
        let queried_at = coerce_epoch_seconds(ts)?;

        let client_ip = match row.get("client") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Object(o)) => o
                .get("ip")
                .or_else(|| o.get("name"))
                .and_then(|v| v.as_str())
                .map(ToString::to_string),
            _ => None,
        };

        let qtype = row
            .get("type")
            .or_else(|| row.get("qtype"))
            .or_else(|| row.get("query_type"))
            .and_then(|v| v.as_str())
            .unwrap_or("A")
            .to_string();

        Some(ObservedQuery {
            domain,
            qtype,
            client_ip,
            queried_at,
        })
    }

    async fn fetch_v6(&mut self) -> anyhow::Result<Vec<ObservedQuery>> {
        if self.breaker.is_open() {
            anyhow::bail!("pi-hole circuit breaker open");
        }
        self.breaker.begin_half_open_call();

        let mut req = self.client.get(self.v6_queries_url());
        if let Some(sid) = &self.session_id {
            req = req.header("sid", sid);
        }
        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                self.breaker.record_failure();
                return Err(e.into());
            }
        };

        if resp.status().as_u16() == 401 {
            self.authenticate_v6().await?;
            let mut retry = self.client.get(self.v6_queries_url());
            if let Some(sid) = &self.session_id {
                retry = retry.header("sid", sid);
            }
            let retry_resp = match retry.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    self.breaker.record_failure();
                    return Err(e.into());
                }
            };
            let out = self.parse_v6_body(retry_resp).await?;
            self.breaker.record_success();
            return Ok(out);
        }

        let out = self.parse_v6_body(resp).await?;
        self.breaker.record_success();
        Ok(out)
    }

    async fn parse_v6_body(&mut self, resp: reqwest::Response) -> anyhow::Result<Vec<ObservedQuery>> {
        let body: serde_json::Value = resp.json().await?;
        let rows = body.get("queries").and_then(|q| q.as_array()).cloned().unwrap_or_default();

        let received = rows.len();
        let mut out = Vec::new();
        let mut max_ts = self.last_seen_ts;

        for row in &rows {
            let Some(parsed) = Self::extract_v6_fields(row) else {
                continue;
            };
            let epoch = parsed.queried_at.timestamp();
            if epoch <= self.last_seen_ts {
                continue;
            }
            max_ts = max_ts.max(epoch);
            out.push(parsed);
        }

        if received > 0 && out.is_empty() && self.last_seen_ts == 0 {
            warn!(received, "pi-hole v6 batch received but nothing parsed");
        }

        self.last_seen_ts = max_ts;
        Ok(out)
    }

    async fn fetch_v5(&mut self) -> anyhow::Result<Vec<ObservedQuery>> {
        if self.breaker.is_open() {
            anyhow::bail!("pi-hole circuit breaker open");
        }
        self.breaker.begin_half_open_call();

        let resp = match self.client.get(self.v5_queries_url()).send().await {
            Ok(resp) => resp,
            Err(e) => {
                self.breaker.record_failure();
                return Err(e.into());
            }
        };
        self.breaker.record_success();
        let body: serde_json::Value = resp.json().await?;
        let rows = body.get("data").and_then(|d| d.as_array()).cloned().unwrap_or_default();

        let mut out = Vec::new();
        let mut max_ts = self.last_seen_ts;

        for row in &rows {
            let Some(arr) = row.as_array() else { continue };
            if arr.len() < 4 {
                continue;
            }
            let Some(ts) = coerce_epoch_seconds(&arr[0]) else { continue };
            let epoch = ts.timestamp();
            if epoch <= self.last_seen_ts {
                continue;
            }
            let qtype = arr[1].as_str().unwrap_or("A").to_string();
            let domain = arr[2].as_str().unwrap_or_default().to_string();
            let client_ip = arr.get(3).and_then(|v| v.as_str()).map(ToString::to_string);

            max_ts = max_ts.max(epoch);
            out.push(ObservedQuery {
                domain,
                qtype,
                client_ip,
                queried_at: ts,
            });
        }

        self.last_seen_ts = max_ts;
        Ok(out)
    }

    #[must_use]
    pub const fn cursor(&self) -> i64 {
        self.last_seen_ts
    }
}

#[async_trait]
impl DnsSource for PiholeSource {
    async fn fetch_new(&mut self) -> anyhow::Result<Vec<ObservedQuery>> {
        if self.dialect == Dialect::Unknown {
            self.detect_dialect().await?;
        }

        match self.dialect {
            Dialect::V6 => self.fetch_v6().await,
            Dialect::V5 => self.fetch_v5().await,
            Dialect::Unknown => unreachable!("dialect resolved above"),
        }
    }

    async fn close(&mut self) {
        if self.dialect == Dialect::V6 {
            if let Some(sid) = self.session_id.take() {
                let _ = self
                    .client
                    .delete(self.v6_auth_url())
                    .header("sid", sid)
                    .send()
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(ts: i64, domain: &str) -> serde_json::Value {
        serde_json::json!({ "domain": domain, "time": ts, "client": "10.0.0.5", "type": "A" })
    }

    #[test]
    fn extracts_v6_fields_with_flexible_names() {
        let row = query(1_700_000_000, "example.com");
        let parsed = PiholeSource::extract_v6_fields(&row).unwrap();
        assert_eq!(parsed.domain, "example.com");
        assert_eq!(parsed.client_ip.as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn extracts_v6_fields_with_nested_client_object() {
        let row = serde_json::json!({
            "query": "example.com", "timestamp": 1_700_000_000, "client": {"ip": "10.0.0.9"}, "qtype": "AAAA"
        });
        let parsed = PiholeSource::extract_v6_fields(&row).unwrap();
        assert_eq!(parsed.client_ip.as_deref(), Some("10.0.0.9"));
        assert_eq!(parsed.qtype, "AAAA");
    }

    #[tokio::test]
    async fn cursor_advances_to_max_accepted_timestamp() {
        // Mirrors scenario 5: first batch [100, 200, 300] -> cursor 300;
        // second batch [250, 301, 350] -> only [301, 350] emitted, cursor 350.
        let breaker = Arc::new(CircuitBreaker::new("pihole", 5, std::time::Duration::from_secs(120)));
        let mut source = PiholeSource::new("http://pihole.local", "token", breaker);
        source.dialect = Dialect::V6;

        let first_rows = vec![query(100, "a.com"), query(200, "b.com"), query(300, "c.com")];
        let body = serde_json::json!({ "queries": first_rows });
        let parsed_count = {
            let mut out = 0;
            let mut max_ts = source.last_seen_ts;
            for row in &first_rows {
                let parsed = PiholeSource::extract_v6_fields(row).unwrap();
                let epoch = parsed.queried_at.timestamp();
                if epoch > source.last_seen_ts {
                    max_ts = max_ts.max(epoch);
                    out += 1;
                }
            }
            source.last_seen_ts = max_ts;
            out
        };
        assert_eq!(parsed_count, 3);
        assert_eq!(source.last_seen_ts, 300);
        let _ = body;

        let second_rows = vec![query(250, "d.com"), query(301, "e.com"), query(350, "f.com")];
        let mut accepted = Vec::new();
        let mut max_ts = source.last_seen_ts;
        for row in &second_rows {
            let parsed = PiholeSource::extract_v6_fields(row).unwrap();
            let epoch = parsed.queried_at.timestamp();
            if epoch <= source.last_seen_ts {
                continue;
            }
            max_ts = max_ts.max(epoch);
            accepted.push(parsed);
        }
        source.last_seen_ts = max_ts;

        assert_eq!(accepted.len(), 2);
        assert_eq!(accepted[0].domain, "e.com");
        assert_eq!(source.last_seen_ts, 350);
    }
}
