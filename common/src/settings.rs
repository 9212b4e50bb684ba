//! Typed, hot-reloadable settings store.
//!
//! Settings are JSONB blobs keyed by a well-known name. Every consumer loads
//! its key once per tick and merges it against that key's defaults, so an
//! absent row or a row missing newly-added fields behaves the same as an
//! explicit default.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sqlx::PgPool;

use crate::db::queries::{delete_setting_row, get_setting_row, set_setting_row};
use crate::error::SettingsError;

/// Well-known setting keys.
pub const PIHOLE_KEY: &str = "pihole";
pub const COLLECTOR_STATUS_KEY: &str = "collector_status";
pub const WORKER_SETTINGS_KEY: &str = "worker_settings";
pub const ENRICHMENT_SETTINGS_KEY: &str = "enrichment_settings";
pub const REMEASUREMENT_SETTINGS_KEY: &str = "remeasurement_settings";

/// Thin wrapper over the `settings` table.
#[derive(Clone)]
pub struct SettingsStore {
    pool: PgPool,
}

impl SettingsStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch and decode `key`, tolerating values stored as a JSON string
    /// rather than a decoded object (older writes may have done this).
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SettingsError> {
        let Some(row) = get_setting_row(&self.pool, key).await? else {
            return Ok(None);
        };

        match serde_json::from_value(row.value.clone()) {
            Ok(v) => Ok(Some(v)),
            Err(first_err) => {
                if let serde_json::Value::String(s) = &row.value {
                    serde_json::from_str(s)
                        .map(Some)
                        .map_err(|e| SettingsError::Decode { key: key.to_string(), source: e })
                } else {
                    Err(SettingsError::Decode { key: key.to_string(), source: first_err })
                }
            }
        }
    }

    /// Fetch `key` and merge missing fields with `T::default()`'s shape.
    pub async fn get_or_default<T>(&self, key: &str) -> Result<T, SettingsError>
    where
        T: DeserializeOwned + Default + Serialize,
    {
        match self.get::<T>(key).await? {
            Some(v) => Ok(v),
            None => Ok(T::default()),
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), SettingsError> {
        let json = serde_json::to_value(value)
            .map_err(|e| SettingsError::Decode { key: key.to_string(), source: e })?;
        set_setting_row(&self.pool, key, &json).await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<bool, SettingsError> {
        Ok(delete_setting_row(&self.pool, key).await?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PiholeSettings {
    pub base_url: String,
    pub api_token: String,
    pub enabled: bool,
    pub poll_interval_seconds: u32,
    pub verify_ssl: bool,
}

impl Default for PiholeSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_token: String::new(),
            enabled: false,
            poll_interval_seconds: 30,
            verify_ssl: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub rate_limit_per_minute: u32,
    pub max_concurrent_traceroutes: u32,
    pub worker_count: u32,
    pub task_timeout_seconds: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 60,
            max_concurrent_traceroutes: 10,
            worker_count: 1,
            task_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentSettings {
    pub poll_interval_seconds: u64,
    pub batch_size: i64,
    pub asn_expansion_enabled: bool,
    pub asn_expansion_interval_minutes: u64,
    pub asn_min_neighbor_count: i64,
    pub asn_max_ips_per_asn: u32,
    pub cache_ttl_seconds: u64,
    pub peeringdb_cache_ttl_seconds: u64,
    pub task_timeout_seconds: u64,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 10,
            batch_size: 100,
            asn_expansion_enabled: true,
            asn_expansion_interval_minutes: 60,
            asn_min_neighbor_count: 5,
            asn_max_ips_per_asn: 10,
            cache_ttl_seconds: 3600,
            peeringdb_cache_ttl_seconds: 86_400,
            task_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemeasurementSettings {
    pub enabled: bool,
    pub interval_hours: i64,
    pub batch_size: usize,
    pub targets_per_run: i64,
}

impl Default for RemeasurementSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_hours: 24,
            batch_size: 100,
            targets_per_run: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CollectorStatus {
    pub restart_requested_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_restarted_at: Option<DateTime<Utc>>,
    pub running: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_settings_default_merge_fills_missing_fields() {
        // Simulates an older row that only set one field.
        let partial = serde_json::json!({ "rate_limit_per_minute": 120 });
        let merged: WorkerSettings = serde_json::from_value(partial).unwrap();
        assert_eq!(merged.rate_limit_per_minute, 120);
        assert_eq!(merged.worker_count, 1);
        assert_eq!(merged.task_timeout_seconds, 30);
    }

    #[test]
    fn collector_status_defaults_to_all_none() {
        let empty: CollectorStatus = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(empty.restart_requested_at.is_none());
        assert!(empty.running.is_none());
    }
}
