//! AS-level topology graph store.
//!
//! Node label `AS` keyed by `asn`; relationship type `ROUTE` stored directed
//! `a -> b` with `a.asn < b.asn` (the relationship is semantically
//! undirected — callers MUST canonicalize the endpoint order before calling
//! `upsert_edge`, this module does not re-check it).

use chrono::{DateTime, Utc};
use neo4rs::{query, Graph};

use crate::error::GraphError;

/// One endpoint of a route edge.
#[derive(Debug, Clone)]
pub struct AsEndpoint {
    pub asn: i64,
    pub org_name: Option<String>,
    pub country: Option<String>,
}

/// Connect to the Bolt-compatible graph store.
pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Graph, GraphError> {
    Ok(Graph::new(uri, user, password).await?)
}

/// Upsert the `AS` nodes for both endpoints and the `ROUTE` edge between
/// them, following the merge semantics from `§4.6`: node fields are filled
/// on create and only patched with `coalesce` on match; the edge's
/// `observed_count` increments and `min_rtt`/`max_rtt` widen monotonically,
/// never narrowing, and null RTTs never touch the interval.
///
/// `a.asn` MUST be less than `b.asn` — canonicalize before calling.
pub async fn upsert_edge(
    graph: &Graph,
    a: &AsEndpoint,
    b: &AsEndpoint,
    rtt_ms: Option<f64>,
    observed_at: DateTime<Utc>,
) -> Result<(), GraphError> {
    debug_assert!(a.asn < b.asn, "endpoints must be canonicalized before upsert");

    let q = query(
        r"
        MERGE (a:AS {asn: $asn_a})
          ON CREATE SET a.org_name = $org_a, a.country = $country_a, a.first_seen = $ts, a.last_seen = $ts
          ON MATCH SET a.org_name = coalesce(a.org_name, $org_a), a.country = coalesce(a.country, $country_a), a.last_seen = $ts
        MERGE (b:AS {asn: $asn_b})
          ON CREATE SET b.org_name = $org_b, b.country = $country_b, b.first_seen = $ts, b.last_seen = $ts
          ON MATCH SET b.org_name = coalesce(b.org_name, $org_b), b.country = coalesce(b.country, $country_b), b.last_seen = $ts
        WITH a, b
        MERGE (a)-[r:ROUTE]->(b)
          ON CREATE SET r.observed_count = 1, r.min_rtt = $rtt, r.max_rtt = $rtt, r.last_seen = $ts
          ON MATCH SET
            r.observed_count = coalesce(r.observed_count, 0) + 1,
            r.min_rtt = CASE WHEN r.min_rtt IS NULL OR $rtt IS NULL THEN r.min_rtt ELSE CASE WHEN $rtt < r.min_rtt THEN $rtt ELSE r.min_rtt END END,
            r.max_rtt = CASE WHEN r.max_rtt IS NULL OR $rtt IS NULL THEN r.max_rtt ELSE CASE WHEN $rtt > r.max_rtt THEN $rtt ELSE r.max_rtt END END,
            r.last_seen = $ts
        ",
    )
    .param("asn_a", a.asn)
    .param("org_a", a.org_name.clone())
    .param("country_a", a.country.clone())
    .param("asn_b", b.asn)
    .param("org_b", b.org_name.clone())
    .param("country_b", b.country.clone())
    .param("rtt", rtt_ms)
    .param("ts", observed_at.to_rfc3339());

    graph.run(q).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_canonical_order_is_checked_in_debug() {
        let a = AsEndpoint { asn: 100, org_name: None, country: None };
        let b = AsEndpoint { asn: 200, org_name: None, country: None };
        assert!(a.asn < b.asn);
    }
}
