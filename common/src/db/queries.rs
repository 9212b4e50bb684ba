//! Database queries.
//!
//! Runtime queries (no compile-time `DATABASE_URL` required), matching
//! this workspace's other persistence layers.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::models::{AsnPatch, AsnRecord, DnsTarget, Hop, Measurement, SettingRow, Target};

// ============================================================================
// Targets
// ============================================================================

/// Insert a target if its IP is unseen, otherwise bump `last_seen_at`.
///
/// Single insertion point used by the DNS observer, the traceroute worker,
/// the ASN expander and the remeasurement scheduler alike.
pub async fn get_or_create_target(pool: &PgPool, ip: &str, source: &str) -> sqlx::Result<Target> {
    sqlx::query_as::<_, Target>(
        r"
        INSERT INTO targets (target_ip, source, first_created_at, last_seen_at)
        VALUES ($1, $2, NOW(), NOW())
        ON CONFLICT (target_ip) DO UPDATE
        SET last_seen_at = NOW()
        RETURNING *
        ",
    )
    .bind(ip)
    .bind(source)
    .fetch_one(pool)
    .await
}

/// Touch a target's `last_seen_at` without changing its recorded source.
pub async fn touch_target(pool: &PgPool, ip: &str) -> sqlx::Result<()> {
    sqlx::query("UPDATE targets SET last_seen_at = NOW() WHERE target_ip = $1")
        .bind(ip)
        .execute(pool)
        .await?;
    Ok(())
}

/// Targets whose most recent completed measurement is older than `older_than_hours`
/// (or that have never completed one), oldest first.
pub async fn get_targets_for_remeasurement(
    pool: &PgPool,
    older_than_hours: i64,
    limit: i64,
) -> sqlx::Result<Vec<Target>> {
    sqlx::query_as::<_, Target>(
        r"
        SELECT t.*
        FROM targets t
        LEFT JOIN (
            SELECT target_id, MAX(completed_at) AS last_completed
            FROM measurements
            GROUP BY target_id
        ) m ON m.target_id = t.id
        WHERE m.last_completed IS NULL
           OR m.last_completed < NOW() - ($1 || ' hours')::interval
        ORDER BY COALESCE(m.last_completed, t.first_created_at) ASC
        LIMIT $2
        ",
    )
    .bind(older_than_hours.to_string())
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Whether `ip` is a target whose `last_seen_at` is within the last `within_days` days.
pub async fn target_seen_recently(pool: &PgPool, ip: &str, within_days: i64) -> sqlx::Result<bool> {
    let row: (bool,) = sqlx::query_as(
        r"
        SELECT EXISTS(
            SELECT 1 FROM targets
            WHERE target_ip = $1 AND last_seen_at > NOW() - ($2 || ' days')::interval
        )
        ",
    )
    .bind(ip)
    .bind(within_days.to_string())
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

// ============================================================================
// Measurements & hops
// ============================================================================

/// Insert a measurement and its ordered hops in one transaction, then bump
/// the target's `last_seen_at`.
pub async fn insert_measurement(
    pool: &PgPool,
    target_id: i64,
    tool: &str,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    success: bool,
    raw_output: &str,
    hops: &[(i32, Option<String>, Option<f64>)],
) -> sqlx::Result<i64> {
    let mut tx = pool.begin().await?;

    let measurement_id: i64 = sqlx::query_scalar(
        r"
        INSERT INTO measurements (target_id, tool, started_at, completed_at, success, raw_output)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        ",
    )
    .bind(target_id)
    .bind(tool)
    .bind(started_at)
    .bind(completed_at)
    .bind(success)
    .bind(raw_output)
    .fetch_one(&mut *tx)
    .await?;

    for (hop_number, ip, rtt_ms) in hops {
        sqlx::query(
            r"
            INSERT INTO hops (measurement_id, hop_number, ip, rtt_ms)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (measurement_id, hop_number) DO NOTHING
            ",
        )
        .bind(measurement_id)
        .bind(hop_number)
        .bind(ip)
        .bind(rtt_ms)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("UPDATE targets SET last_seen_at = NOW() WHERE id = $1")
        .bind(target_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(measurement_id)
}

/// Hops still waiting on enrichment, oldest measurement first.
pub async fn fetch_unenriched_hops(pool: &PgPool, batch_size: i64) -> sqlx::Result<Vec<Hop>> {
    sqlx::query_as::<_, Hop>(
        r"
        SELECT h.* FROM hops h
        JOIN measurements m ON m.id = h.measurement_id
        WHERE m.enriched = false AND h.ip IS NOT NULL AND h.asn IS NULL
        ORDER BY m.started_at ASC, h.hop_number ASC
        LIMIT $1
        ",
    )
    .bind(batch_size)
    .fetch_all(pool)
    .await
}

/// Write enrichment results back onto a single hop.
pub async fn update_hop_enrichment(
    pool: &PgPool,
    hop_id: i64,
    asn: Option<i64>,
    prefix: Option<&str>,
    org_name: Option<&str>,
    country_code: Option<&str>,
) -> sqlx::Result<()> {
    sqlx::query(
        r"
        UPDATE hops
        SET asn = $2, prefix = $3, org_name = $4, country_code = $5
        WHERE id = $1
        ",
    )
    .bind(hop_id)
    .bind(asn)
    .bind(prefix)
    .bind(org_name)
    .bind(country_code)
    .execute(pool)
    .await?;
    Ok(())
}

/// Count of hops on `measurement_id` still missing enrichment (`ip IS NOT NULL AND asn IS NULL`).
pub async fn remaining_unenriched_hops(pool: &PgPool, measurement_id: i64) -> sqlx::Result<i64> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM hops WHERE measurement_id = $1 AND ip IS NOT NULL AND asn IS NULL",
    )
    .bind(measurement_id)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// Flip a measurement to `enriched = true`.
pub async fn mark_measurement_enriched(pool: &PgPool, measurement_id: i64) -> sqlx::Result<()> {
    sqlx::query("UPDATE measurements SET enriched = true, enriched_at = NOW() WHERE id = $1")
        .bind(measurement_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Measurements ready for graph projection: `enriched = true AND graph_built = false`.
pub async fn fetch_measurements_for_graph(
    pool: &PgPool,
    limit: i64,
) -> sqlx::Result<Vec<Measurement>> {
    sqlx::query_as::<_, Measurement>(
        r"
        SELECT * FROM measurements
        WHERE enriched = true AND graph_built = false
        ORDER BY started_at ASC
        LIMIT $1
        ",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Hops with a known ASN, in path order.
pub async fn fetch_hops_for_measurement(pool: &PgPool, measurement_id: i64) -> sqlx::Result<Vec<Hop>> {
    sqlx::query_as::<_, Hop>(
        r"
        SELECT * FROM hops
        WHERE measurement_id = $1 AND asn IS NOT NULL
        ORDER BY hop_number ASC
        ",
    )
    .bind(measurement_id)
    .fetch_all(pool)
    .await
}

/// Flip a measurement to `graph_built = true`.
pub async fn mark_measurement_graph_built(pool: &PgPool, measurement_id: i64) -> sqlx::Result<()> {
    sqlx::query("UPDATE measurements SET graph_built = true, graph_built_at = NOW() WHERE id = $1")
        .bind(measurement_id)
        .execute(pool)
        .await?;
    Ok(())
}

// ============================================================================
// ASN records
// ============================================================================

/// Upsert an ASN patch, never overwriting an existing non-null field with null.
pub async fn upsert_asn(pool: &PgPool, asn: i64, patch: &AsnPatch) -> sqlx::Result<()> {
    sqlx::query(
        r"
        INSERT INTO asns (
            asn, org_name, country_code, source, peeringdb_id,
            facility_count, peering_policy, traffic_levels, irr_as_set,
            first_seen, last_seen
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
        ON CONFLICT (asn) DO UPDATE SET
            org_name = COALESCE(EXCLUDED.org_name, asns.org_name),
            country_code = COALESCE(EXCLUDED.country_code, asns.country_code),
            source = COALESCE(EXCLUDED.source, asns.source),
            peeringdb_id = COALESCE(EXCLUDED.peeringdb_id, asns.peeringdb_id),
            facility_count = COALESCE(EXCLUDED.facility_count, asns.facility_count),
            peering_policy = COALESCE(EXCLUDED.peering_policy, asns.peering_policy),
            traffic_levels = COALESCE(EXCLUDED.traffic_levels, asns.traffic_levels),
            irr_as_set = COALESCE(EXCLUDED.irr_as_set, asns.irr_as_set),
            last_seen = NOW()
        ",
    )
    .bind(asn)
    .bind(&patch.org_name)
    .bind(&patch.country_code)
    .bind(&patch.source)
    .bind(patch.peeringdb_id)
    .bind(patch.facility_count)
    .bind(&patch.peering_policy)
    .bind(&patch.traffic_levels)
    .bind(&patch.irr_as_set)
    .execute(pool)
    .await?;
    Ok(())
}

/// ASNs eligible for prefix expansion: well-connected and not recently enriched.
pub async fn get_interesting_asns(
    pool: &PgPool,
    min_neighbor_count: i64,
    limit: i64,
) -> sqlx::Result<Vec<AsnRecord>> {
    sqlx::query_as::<_, AsnRecord>(
        r"
        SELECT * FROM asns
        WHERE neighbor_count >= $1
          AND (enrichment_completed_at IS NULL OR enrichment_completed_at < NOW() - INTERVAL '7 days')
        ORDER BY neighbor_count DESC, last_seen DESC
        LIMIT $2
        ",
    )
    .bind(min_neighbor_count)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Mark an ASN as freshly expanded.
pub async fn mark_asn_enrichment_completed(pool: &PgPool, asn: i64) -> sqlx::Result<()> {
    sqlx::query("UPDATE asns SET enrichment_completed_at = NOW() WHERE asn = $1")
        .bind(asn)
        .execute(pool)
        .await?;
    Ok(())
}

// ============================================================================
// DNS
// ============================================================================

/// Append one observed DNS query.
pub async fn insert_dns_query(
    pool: &PgPool,
    domain: &str,
    qtype: &str,
    client_ip: Option<&str>,
    queried_at: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO dns_queries (domain, qtype, client_ip, queried_at) VALUES ($1, $2, $3, $4)",
    )
    .bind(domain)
    .bind(qtype)
    .bind(client_ip)
    .bind(queried_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Upsert a `(domain, ip)` pair; `query_count` accumulates by 1 per call,
/// `first_seen` takes the earliest timestamp seen.
pub async fn upsert_dns_target(
    pool: &PgPool,
    domain: &str,
    ip: &str,
    seen_at: DateTime<Utc>,
    client_ip: Option<&str>,
    qtype: &str,
) -> sqlx::Result<DnsTarget> {
    sqlx::query_as::<_, DnsTarget>(
        r"
        INSERT INTO dns_targets (domain, ip, first_seen, last_seen, query_count, last_client_ip, last_qtype)
        VALUES ($1, $2, $3, $3, 1, $4, $5)
        ON CONFLICT (domain, ip) DO UPDATE SET
            last_seen = GREATEST(dns_targets.last_seen, EXCLUDED.last_seen),
            first_seen = LEAST(dns_targets.first_seen, EXCLUDED.first_seen),
            query_count = dns_targets.query_count + 1,
            last_client_ip = COALESCE(EXCLUDED.last_client_ip, dns_targets.last_client_ip),
            last_qtype = EXCLUDED.last_qtype
        RETURNING *
        ",
    )
    .bind(domain)
    .bind(ip)
    .bind(seen_at)
    .bind(client_ip)
    .bind(qtype)
    .fetch_one(pool)
    .await
}

// ============================================================================
// Settings
// ============================================================================

/// Fetch a raw setting row.
pub async fn get_setting_row(pool: &PgPool, key: &str) -> sqlx::Result<Option<SettingRow>> {
    sqlx::query_as::<_, SettingRow>("SELECT * FROM settings WHERE key = $1")
        .bind(key)
        .fetch_optional(pool)
        .await
}

/// Upsert a setting, bumping `updated_at`.
pub async fn set_setting_row(pool: &PgPool, key: &str, value: &serde_json::Value) -> sqlx::Result<()> {
    sqlx::query(
        r"
        INSERT INTO settings (key, value, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
        ",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete a setting. Returns whether a row was removed.
pub async fn delete_setting_row(pool: &PgPool, key: &str) -> sqlx::Result<bool> {
    let result = sqlx::query("DELETE FROM settings WHERE key = $1")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}
