//! Row types for the relational store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An IP address of interest, ever observed by any component.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub target_ip: String,
    pub source: String,
    pub first_created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// One traceroute run against a target.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Measurement {
    pub id: i64,
    pub target_id: i64,
    pub tool: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub success: bool,
    pub raw_output: Option<String>,
    pub enriched: bool,
    pub graph_built: bool,
    pub enriched_at: Option<DateTime<Utc>>,
    pub graph_built_at: Option<DateTime<Utc>>,
}

/// One entry in a measurement's path.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Hop {
    pub id: i64,
    pub measurement_id: i64,
    pub hop_number: i32,
    pub ip: Option<String>,
    pub rtt_ms: Option<f64>,
    pub asn: Option<i64>,
    pub prefix: Option<String>,
    pub org_name: Option<String>,
    pub country_code: Option<String>,
}

/// Aggregate metadata about an autonomous system.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AsnRecord {
    pub asn: i64,
    pub org_name: Option<String>,
    pub country_code: Option<String>,
    pub source: Option<String>,
    pub peeringdb_id: Option<i64>,
    pub facility_count: Option<i32>,
    pub peering_policy: Option<String>,
    pub traffic_levels: Option<String>,
    pub irr_as_set: Option<String>,
    pub total_measurements: i64,
    pub avg_rtt_ms: Option<f64>,
    pub neighbor_count: i64,
    pub prefix_count: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub enrichment_attempted_at: Option<DateTime<Utc>>,
    pub enrichment_completed_at: Option<DateTime<Utc>>,
}

/// A single observed DNS query, append-only.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DnsQuery {
    pub id: i64,
    pub domain: String,
    pub qtype: String,
    pub client_ip: Option<String>,
    pub queried_at: DateTime<Utc>,
}

/// Aggregate `(domain, ip)` pair observed via resolution.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DnsTarget {
    pub id: i64,
    pub domain: String,
    pub ip: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub query_count: i64,
    pub last_client_ip: Option<String>,
    pub last_qtype: Option<String>,
}

/// A settings row: `(key, jsonValue, updated_at)`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SettingRow {
    pub key: String,
    pub value: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Patch applied to an ASN record; only non-null fields overwrite existing ones.
#[derive(Debug, Clone, Default)]
pub struct AsnPatch {
    pub org_name: Option<String>,
    pub country_code: Option<String>,
    pub source: Option<String>,
    pub peeringdb_id: Option<i64>,
    pub facility_count: Option<i32>,
    pub peering_policy: Option<String>,
    pub traffic_levels: Option<String>,
    pub irr_as_set: Option<String>,
}

/// Source precedence used when deciding which ASN patch "wins" a field.
///
/// Matches the enrichment engine's merge rule: `cymru < external < peeringdb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EnrichmentSource {
    Cymru,
    External,
    Peeringdb,
}

impl EnrichmentSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cymru => "cymru",
            Self::External => "external",
            Self::Peeringdb => "peeringdb",
        }
    }
}
