//! Pluggable DNS observation sources.

pub mod logfile;
pub mod pihole;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One raw observed query, before filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedQuery {
    pub domain: String,
    pub qtype: String,
    pub client_ip: Option<String>,
    pub queried_at: DateTime<Utc>,
}

/// A source of freshly observed DNS queries.
///
/// Two concrete implementations exist: an HTTP-session source modeled on
/// Pi-hole's v5/v6 APIs, and a log-tail source that follows a rotating file.
#[async_trait]
pub trait DnsSource: Send {
    /// Return queries observed since the last call.
    async fn fetch_new(&mut self) -> anyhow::Result<Vec<ObservedQuery>>;

    /// Release any held resources (HTTP session, file handle).
    async fn close(&mut self);
}

/// Normalize a timestamp that may arrive as seconds, milliseconds, or an
/// ISO-8601 string, into a `DateTime<Utc>`.
#[must_use]
pub fn coerce_epoch_seconds(raw: &serde_json::Value) -> Option<DateTime<Utc>> {
    match raw {
        serde_json::Value::Number(n) => {
            let f = n.as_f64()?;
            let secs = if f > 1e11 { f / 1000.0 } else { f };
            DateTime::from_timestamp(secs as i64, 0)
        }
        serde_json::Value::String(s) => {
            if let Ok(f) = s.parse::<f64>() {
                let secs = if f > 1e11 { f / 1000.0 } else { f };
                return DateTime::from_timestamp(secs as i64, 0);
            }
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_integer_seconds() {
        let v = serde_json::json!(1_700_000_000);
        assert!(coerce_epoch_seconds(&v).is_some());
    }

    #[test]
    fn coerces_millisecond_timestamps() {
        let v = serde_json::json!(1_700_000_000_000_i64);
        let ms = coerce_epoch_seconds(&v).unwrap();
        let secs = serde_json::json!(1_700_000_000);
        let s = coerce_epoch_seconds(&secs).unwrap();
        assert_eq!(ms, s);
    }

    #[test]
    fn coerces_iso8601_with_trailing_z() {
        let v = serde_json::json!("2023-11-14T22:13:20Z");
        assert!(coerce_epoch_seconds(&v).is_some());
    }
}
