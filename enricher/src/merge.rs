//! Merges lookups from the three enrichment tiers into one patch.
//!
//! Precedence for overlapping fields is `cymru < external < peeringdb`
//! (`cyberwatch_common::db::models::EnrichmentSource`): PeeringDB organization
//! data, when present, wins over the free external sources, which in turn win
//! over Cymru's WHOIS/DNS org field. ASN and prefix have no PeeringDB
//! equivalent, so they fall back from Cymru to the external sources only.

use cyberwatch_common::db::models::{AsnPatch, EnrichmentSource};

use crate::cymru::AsnInfo as CymruInfo;
use crate::external::ExternalAsnInfo;
use crate::peeringdb::AsnOrg;

pub struct MergedHop {
    pub asn: Option<i64>,
    pub prefix: Option<String>,
    pub org_name: Option<String>,
    pub country: Option<String>,
    /// Which tier actually won the org/country fields above.
    pub source: EnrichmentSource,
    pub peeringdb_id: Option<i64>,
    pub facility_count: Option<i32>,
    pub peering_policy: Option<String>,
    pub traffic_levels: Option<String>,
    pub irr_as_set: Option<String>,
}

#[must_use]
pub fn merge_hop(cymru: &CymruInfo, external: &ExternalAsnInfo, peeringdb: &AsnOrg) -> MergedHop {
    let source = if peeringdb.org_name.is_some() {
        EnrichmentSource::Peeringdb
    } else if external.org_name.is_some() {
        EnrichmentSource::External
    } else {
        EnrichmentSource::Cymru
    };

    MergedHop {
        asn: cymru.asn.or(external.asn),
        prefix: cymru.prefix.clone(),
        org_name: peeringdb
            .org_name
            .clone()
            .or_else(|| external.org_name.clone())
            .or_else(|| cymru.org_name.clone()),
        country: peeringdb
            .country
            .clone()
            .or_else(|| external.country.clone())
            .or_else(|| cymru.country.clone()),
        source,
        peeringdb_id: peeringdb.peeringdb_id,
        facility_count: peeringdb.facility_count,
        peering_policy: peeringdb.peering_policy.clone(),
        traffic_levels: peeringdb.traffic_levels.clone(),
        irr_as_set: peeringdb.irr_as_set.clone(),
    }
}

/// Build an ASN-record patch from a merged hop, for `asns` table upsert.
#[must_use]
pub fn asn_patch_from_hop(hop: &MergedHop) -> AsnPatch {
    AsnPatch {
        org_name: hop.org_name.clone(),
        country_code: hop.country.clone(),
        source: Some(hop.source.as_str().to_string()),
        peeringdb_id: hop.peeringdb_id,
        facility_count: hop.facility_count,
        peering_policy: hop.peering_policy.clone(),
        traffic_levels: hop.traffic_levels.clone(),
        irr_as_set: hop.irr_as_set.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peeringdb_org_name_wins_over_cymru_and_external() {
        let cymru = CymruInfo { asn: Some(15169), org_name: Some("cymru-org".into()), ..CymruInfo::default() };
        let external = ExternalAsnInfo { org_name: Some("external-org".into()), ..ExternalAsnInfo::default() };
        let peeringdb = AsnOrg { org_name: Some("peeringdb-org".into()), ..AsnOrg::default() };

        let merged = merge_hop(&cymru, &external, &peeringdb);
        assert_eq!(merged.org_name.as_deref(), Some("peeringdb-org"));
        assert_eq!(merged.source, EnrichmentSource::Peeringdb);
    }

    #[test]
    fn falls_back_through_the_full_chain_when_higher_tiers_are_empty() {
        let cymru = CymruInfo { asn: Some(15169), org_name: Some("cymru-org".into()), ..CymruInfo::default() };
        let external = ExternalAsnInfo::default();
        let peeringdb = AsnOrg::default();

        let merged = merge_hop(&cymru, &external, &peeringdb);
        assert_eq!(merged.org_name.as_deref(), Some("cymru-org"));
    }

    #[test]
    fn asn_prefers_cymru_but_falls_back_to_external() {
        let cymru = CymruInfo::default();
        let external = ExternalAsnInfo { asn: Some(701), ..ExternalAsnInfo::default() };
        let peeringdb = AsnOrg::default();

        let merged = merge_hop(&cymru, &external, &peeringdb);
        assert_eq!(merged.asn, Some(701));
    }
}
