//! Team Cymru ASN lookup: WHOIS bulk query, falling back to a DNS TXT query.

use std::net::IpAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use cyberwatch_common::resilience::CircuitBreaker;
use tokio::process::Command;
use trust_dns_resolver::TokioAsyncResolver;

const WHOIS_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a Cymru lookup. All fields are independently optional: a
/// partial WHOIS line still carries useful data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AsnInfo {
    pub asn: Option<i64>,
    pub prefix: Option<String>,
    pub org_name: Option<String>,
    pub country: Option<String>,
}

impl AsnInfo {
    const fn is_empty(&self) -> bool {
        self.asn.is_none()
    }
}

/// Look up `ip` via the Cymru WHOIS service, falling back to its DNS
/// TXT mirror if `whois` is unavailable or returns nothing useful. Both
/// paths are gated by `breaker`, which treats WHOIS and DNS as one
/// downstream service.
pub async fn lookup_asn(resolver: &TokioAsyncResolver, breaker: &Arc<CircuitBreaker>, ip: &str) -> AsnInfo {
    if breaker.is_open() {
        return AsnInfo::default();
    }

    let whois_result = lookup_whois(breaker, ip).await;
    if !whois_result.is_empty() {
        return whois_result;
    }
    lookup_dns(resolver, breaker, ip).await
}

async fn lookup_whois(breaker: &Arc<CircuitBreaker>, ip: &str) -> AsnInfo {
    breaker.begin_half_open_call();

    let query = format!(" -f {ip}");
    let output = tokio::time::timeout(
        WHOIS_TIMEOUT,
        Command::new("whois")
            .args(["-h", "whois.cymru.com", &query])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await;

    let Ok(Ok(output)) = output else {
        breaker.record_failure();
        return AsnInfo::default();
    };

    if !output.status.success() {
        breaker.record_failure();
        return AsnInfo::default();
    }

    breaker.record_success();
    let text = String::from_utf8_lossy(&output.stdout);
    parse_whois_body(&text)
}

/// Parse the `AS|IP|BGP Prefix|CC|Registry|Allocated|AS Name` pipe format.
fn parse_whois_body(text: &str) -> AsnInfo {
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.to_lowercase().starts_with("as|") {
            continue;
        }
        let parts: Vec<&str> = line.split('|').map(str::trim).collect();
        if parts.len() < 7 {
            continue;
        }
        return AsnInfo {
            asn: parts[0].parse().ok(),
            prefix: non_empty(parts[2]),
            country: non_empty(parts[3]),
            org_name: non_empty(parts[6]),
        };
    }
    AsnInfo::default()
}

async fn lookup_dns(resolver: &TokioAsyncResolver, breaker: &Arc<CircuitBreaker>, ip: &str) -> AsnInfo {
    let Ok(addr) = ip.parse::<IpAddr>() else {
        return AsnInfo::default();
    };
    let query = format!("{}.{}", reverse_nibbles(addr), cymru_domain_suffix(addr));

    breaker.begin_half_open_call();
    let response = match resolver.txt_lookup(query).await {
        Ok(response) => {
            breaker.record_success();
            response
        }
        Err(_) => {
            breaker.record_failure();
            return AsnInfo::default();
        }
    };

    for record in response.iter() {
        let txt: String = record
            .iter()
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect();
        let parts: Vec<&str> = txt.split('|').map(str::trim).collect();
        if parts.len() < 2 {
            continue;
        }
        return AsnInfo {
            asn: parts[0].split_whitespace().next().and_then(|s| s.parse().ok()),
            prefix: parts.get(1).copied().and_then(non_empty),
            country: parts.get(2).copied().and_then(non_empty),
            org_name: parts.get(5).copied().and_then(non_empty),
        };
    }
    AsnInfo::default()
}

/// Cymru's DNS mirror splits IPv4 and IPv6 into separate zones.
const fn cymru_domain_suffix(addr: IpAddr) -> &'static str {
    match addr {
        IpAddr::V4(_) => "origin.asn.cymru.com",
        IpAddr::V6(_) => "origin6.asn.cymru.com",
    }
}

/// `a.b.c.d` -> dotted, reversed octets for IPv4; nibble-reversed hex for IPv6.
fn reverse_nibbles(addr: IpAddr) -> String {
    match addr {
        IpAddr::V4(v4) => v4.octets().iter().rev().map(ToString::to_string).collect::<Vec<_>>().join("."),
        IpAddr::V6(v6) => {
            let hex: String = v6.segments().iter().map(|s| format!("{s:04x}")).collect();
            hex.chars().rev().map(|c| c.to_string()).collect::<Vec<_>>().join(".")
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_whois_line() {
        let body = "AS      | IP               | BGP Prefix          | CC | Registry | Allocated  | AS Name\n\
                     15169   | 8.8.8.8          | 8.8.8.0/24          | US | arin     | 2014-03-14 | GOOGLE, US";
        let info = parse_whois_body(body);
        assert_eq!(info.asn, Some(15169));
        assert_eq!(info.prefix.as_deref(), Some("8.8.8.0/24"));
        assert_eq!(info.country.as_deref(), Some("US"));
        assert_eq!(info.org_name.as_deref(), Some("GOOGLE, US"));
    }

    #[test]
    fn empty_body_yields_empty_info() {
        let info = parse_whois_body("");
        assert!(info.is_empty());
    }

    #[test]
    fn ipv4_reverses_octets() {
        let addr: IpAddr = "8.8.8.8".parse().unwrap();
        assert_eq!(reverse_nibbles(addr), "8.8.8.8");

        let addr: IpAddr = "1.2.3.4".parse().unwrap();
        assert_eq!(reverse_nibbles(addr), "4.3.2.1");
    }

    #[test]
    fn picks_the_v6_zone_for_v6_addresses() {
        let v4: IpAddr = "8.8.8.8".parse().unwrap();
        let v6: IpAddr = "2001:4860:4860::8888".parse().unwrap();
        assert_eq!(cymru_domain_suffix(v4), "origin.asn.cymru.com");
        assert_eq!(cymru_domain_suffix(v6), "origin6.asn.cymru.com");
    }
}
