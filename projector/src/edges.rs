//! Builds canonical AS-adjacency edges out of a measurement's enriched hops.

use cyberwatch_common::db::models::Hop;
use cyberwatch_common::graph::AsEndpoint;

/// One canonicalized edge: `a.asn < b.asn` always holds.
pub struct Edge {
    pub a: AsEndpoint,
    pub b: AsEndpoint,
    pub rtt_ms: Option<f64>,
}

/// Walk `hops` in path order, emitting one edge per ASN transition.
/// Hops with no resolved ASN are skipped entirely (neither endpoint nor
/// break in the chain); the edge RTT is the larger of its two endpoints'
/// RTTs, or null if both are null.
#[must_use]
pub fn build_edges(hops: &[Hop]) -> Vec<Edge> {
    let mut edges = Vec::new();
    let mut prev: Option<&Hop> = None;

    for hop in hops {
        let Some(asn) = hop.asn else { continue };
        if let Some(prev_hop) = prev {
            let prev_asn = prev_hop.asn.expect("prev is only set for ASN-bearing hops");
            if prev_asn != asn {
                let rtt_ms = match (prev_hop.rtt_ms, hop.rtt_ms) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (Some(a), None) => Some(a),
                    (None, Some(b)) => Some(b),
                    (None, None) => None,
                };
                edges.push(canonicalize(prev_hop, hop, rtt_ms));
            }
        }
        prev = Some(hop);
    }

    edges
}

fn canonicalize(left: &Hop, right: &Hop, rtt_ms: Option<f64>) -> Edge {
    let left_endpoint = AsEndpoint {
        asn: left.asn.expect("canonicalize only called with ASN-bearing hops"),
        org_name: left.org_name.clone(),
        country: left.country_code.clone(),
    };
    let right_endpoint = AsEndpoint {
        asn: right.asn.expect("canonicalize only called with ASN-bearing hops"),
        org_name: right.org_name.clone(),
        country: right.country_code.clone(),
    };

    if left_endpoint.asn < right_endpoint.asn {
        Edge { a: left_endpoint, b: right_endpoint, rtt_ms }
    } else {
        Edge { a: right_endpoint, b: left_endpoint, rtt_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hop(hop_number: i32, asn: Option<i64>, rtt_ms: Option<f64>) -> Hop {
        Hop {
            id: i64::from(hop_number),
            measurement_id: 1,
            hop_number,
            ip: Some(format!("10.0.0.{hop_number}")),
            rtt_ms,
            asn,
            prefix: None,
            org_name: None,
            country_code: None,
        }
    }

    #[test]
    fn consecutive_same_asn_hops_produce_no_edge() {
        let hops = vec![hop(1, Some(100), Some(1.0)), hop(2, Some(100), Some(2.0))];
        assert!(build_edges(&hops).is_empty());
    }

    #[test]
    fn asn_transition_produces_one_canonicalized_edge() {
        let hops = vec![hop(1, Some(200), Some(5.0)), hop(2, Some(100), Some(9.0))];
        let edges = build_edges(&hops);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].a.asn, 100);
        assert_eq!(edges[0].b.asn, 200);
        assert_eq!(edges[0].rtt_ms, Some(9.0));
    }

    #[test]
    fn null_ip_hops_neither_break_nor_appear_in_a_chain() {
        let hops = vec![hop(1, Some(100), Some(1.0)), hop(2, None, None), hop(3, Some(200), Some(3.0))];
        let edges = build_edges(&hops);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].a.asn, 100);
        assert_eq!(edges[0].b.asn, 200);
    }

    #[test]
    fn single_null_rtt_endpoint_still_yields_the_other_rtt() {
        let hops = vec![hop(1, Some(100), None), hop(2, Some(200), Some(4.0))];
        let edges = build_edges(&hops);
        assert_eq!(edges[0].rtt_ms, Some(4.0));
    }
}
