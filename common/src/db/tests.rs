//! Database integration tests.

#[cfg(test)]
mod postgres_tests {
    use super::super::*;
    use chrono::Utc;
    use sqlx::PgPool;

    #[sqlx::test]
    async fn test_get_or_create_target_is_idempotent(pool: PgPool) {
        let first = get_or_create_target(&pool, "198.51.100.7", "static")
            .await
            .expect("insert failed");
        assert_eq!(first.target_ip, "198.51.100.7");
        assert_eq!(first.source, "static");

        let second = get_or_create_target(&pool, "198.51.100.7", "dns")
            .await
            .expect("upsert failed");

        assert_eq!(second.id, first.id);
        assert_eq!(second.source, "static", "source is not overwritten on re-observation");
        assert!(second.last_seen_at >= first.last_seen_at);
    }

    #[sqlx::test]
    async fn test_insert_measurement_writes_ordered_hops(pool: PgPool) {
        let target = get_or_create_target(&pool, "203.0.113.9", "api")
            .await
            .expect("insert failed");

        let hops = vec![
            (1i32, Some("10.0.0.1".to_string()), Some(1.2)),
            (2i32, None, None),
            (3i32, Some("203.0.113.9".to_string()), Some(5.4)),
        ];

        let measurement_id = insert_measurement(
            &pool,
            target.id,
            "traceroute",
            Utc::now(),
            Some(Utc::now()),
            true,
            "raw output",
            &hops,
        )
        .await
        .expect("insert measurement failed");

        let stored = sqlx::query_as::<_, Hop>(
            "SELECT * FROM hops WHERE measurement_id = $1 ORDER BY hop_number",
        )
        .bind(measurement_id)
        .fetch_all(&pool)
        .await
        .expect("fetch hops failed");

        assert_eq!(stored.len(), 3);
        assert_eq!(stored[1].ip, None, "timeout hop has no ip");
        assert_eq!(stored[1].rtt_ms, None, "timeout hop has no rtt");
    }

    #[sqlx::test]
    async fn test_remaining_unenriched_hops_ignores_timeout_rows(pool: PgPool) {
        let target = get_or_create_target(&pool, "192.0.2.55", "api")
            .await
            .expect("insert failed");

        let hops = vec![
            (1i32, Some("10.0.0.1".to_string()), Some(1.0)),
            (2i32, None, None),
        ];
        let measurement_id = insert_measurement(
            &pool,
            target.id,
            "traceroute",
            Utc::now(),
            Some(Utc::now()),
            true,
            "raw",
            &hops,
        )
        .await
        .expect("insert measurement failed");

        let remaining = remaining_unenriched_hops(&pool, measurement_id)
            .await
            .expect("query failed");
        assert_eq!(remaining, 1, "the null-ip hop must not count toward enrichment");

        let hop_row: Hop = sqlx::query_as("SELECT * FROM hops WHERE measurement_id = $1 AND hop_number = 1")
            .bind(measurement_id)
            .fetch_one(&pool)
            .await
            .expect("fetch hop failed");
        update_hop_enrichment(&pool, hop_row.id, Some(13335), Some("1.1.1.0/24"), Some("Cloudflare"), Some("US"))
            .await
            .expect("update failed");

        let remaining = remaining_unenriched_hops(&pool, measurement_id)
            .await
            .expect("query failed");
        assert_eq!(remaining, 0);
    }

    #[sqlx::test]
    async fn test_upsert_asn_never_nullifies_existing_fields(pool: PgPool) {
        let full = AsnPatch {
            org_name: Some("Cloudflare, Inc.".into()),
            country_code: Some("US".into()),
            source: Some("peeringdb".into()),
            peeringdb_id: Some(4242),
            facility_count: Some(12),
            peering_policy: Some("open".into()),
            traffic_levels: Some("100G".into()),
            irr_as_set: Some("AS-CLOUDFLARE".into()),
        };
        upsert_asn(&pool, 13335, &full).await.expect("upsert failed");

        let empty = AsnPatch::default();
        upsert_asn(&pool, 13335, &empty).await.expect("upsert failed");

        let row: AsnRecord = sqlx::query_as("SELECT * FROM asns WHERE asn = $1")
            .bind(13335_i64)
            .fetch_one(&pool)
            .await
            .expect("fetch failed");

        assert_eq!(row.org_name.as_deref(), Some("Cloudflare, Inc."));
        assert_eq!(row.facility_count, Some(12));
    }

    #[sqlx::test]
    async fn test_upsert_dns_target_accumulates_query_count_and_min_first_seen(pool: PgPool) {
        let later = Utc::now();
        let earlier = later - chrono::Duration::hours(2);

        upsert_dns_target(&pool, "example.com", "93.184.216.34", later, Some("10.0.0.5"), "A")
            .await
            .expect("upsert failed");
        let second = upsert_dns_target(&pool, "example.com", "93.184.216.34", earlier, Some("10.0.0.6"), "A")
            .await
            .expect("upsert failed");

        assert_eq!(second.query_count, 2);
        assert_eq!(second.first_seen, earlier);
        assert_eq!(second.last_seen, later);
    }

    #[sqlx::test]
    async fn test_settings_roundtrip(pool: PgPool) {
        let value = serde_json::json!({"enabled": true, "interval_hours": 24});
        set_setting_row(&pool, "remeasurement_settings", &value)
            .await
            .expect("set failed");

        let fetched = get_setting_row(&pool, "remeasurement_settings")
            .await
            .expect("get failed")
            .expect("missing row");
        assert_eq!(fetched.value, value);

        let deleted = delete_setting_row(&pool, "remeasurement_settings")
            .await
            .expect("delete failed");
        assert!(deleted);
        assert!(get_setting_row(&pool, "remeasurement_settings")
            .await
            .expect("get failed")
            .is_none());
    }
}
