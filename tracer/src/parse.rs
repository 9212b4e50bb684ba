//! Output-format-first traceroute parsers.
//!
//! Each tool gets its own regex and its own parser function so a third tool
//! can be added without touching the worker pool itself.

use regex::Regex;
use std::sync::OnceLock;

/// One parsed hop, before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedHop {
    pub hop_number: i32,
    pub ip: Option<String>,
    pub rtt_ms: Option<f64>,
}

fn traceroute_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(\d+)\s+(.*)$").expect("static pattern is valid")
    })
}

fn rtt_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"([\d.]+)\s*ms").expect("static pattern is valid"))
}

fn ip_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}|[0-9a-fA-F:]+:[0-9a-fA-F:]+)")
            .expect("static pattern is valid")
    })
}

/// Parse classic `traceroute -n` output.
///
/// Per-hop line is `N  IP[(host)]  r1 ms [r2 ms [r3 ms]]` or `N * * *`.
/// RTT is the mean of non-`*` values, or null if every probe timed out.
#[must_use]
pub fn parse_traceroute_hops(output: &str) -> Vec<ParsedHop> {
    let mut hops = Vec::new();

    for line in output.lines() {
        let Some(caps) = traceroute_pattern().captures(line) else {
            continue;
        };
        let Ok(hop_number) = caps[1].parse::<i32>() else {
            continue;
        };
        let rest = &caps[2];

        if rest.trim().chars().all(|c| c == '*' || c.is_whitespace()) {
            hops.push(ParsedHop { hop_number, ip: None, rtt_ms: None });
            continue;
        }

        let ip = ip_pattern().captures(rest).map(|c| c[1].to_string());
        let rtts: Vec<f64> = rtt_pattern()
            .captures_iter(rest)
            .filter_map(|c| c[1].parse::<f64>().ok())
            .collect();

        let rtt_ms = if rtts.is_empty() {
            None
        } else {
            Some(rtts.iter().sum::<f64>() / rtts.len() as f64)
        };

        hops.push(ParsedHop { hop_number, ip, rtt_ms });
    }

    hops
}

fn scamper_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(\d+)\s+(\S+)\s+([\d.]+)\s*ms").expect("static pattern is valid")
    })
}

/// Parse `scamper -O text` ICMP-trace output: `N  IP  rtt ms`, one RTT per hop.
#[must_use]
pub fn parse_scamper_hops(output: &str) -> Vec<ParsedHop> {
    let mut hops = Vec::new();
    for line in output.lines() {
        let Some(caps) = scamper_pattern().captures(line) else {
            continue;
        };
        let Ok(hop_number) = caps[1].parse::<i32>() else {
            continue;
        };
        let ip = if caps[2] == *"*" { None } else { Some(caps[2].to_string()) };
        let rtt_ms = caps[3].parse::<f64>().ok();
        hops.push(ParsedHop { hop_number, ip, rtt_ms });
    }
    hops
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_rtt_hop() {
        let hops = parse_traceroute_hops("1  10.0.0.1  1 ms");
        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(hops[0].rtt_ms, Some(1.0));
    }

    #[test]
    fn parses_multi_rtt_hop_as_mean() {
        let hops = parse_traceroute_hops("2  1.1.1.1  5 ms  7 ms  9 ms");
        assert_eq!(hops[0].rtt_ms, Some(7.0));
    }

    #[test]
    fn parses_timeout_hop_as_null_ip_and_rtt() {
        let hops = parse_traceroute_hops("3  * * *");
        assert_eq!(hops[0].ip, None);
        assert_eq!(hops[0].rtt_ms, None);
    }

    #[test]
    fn parses_hop_with_hostname_and_ip() {
        let hops = parse_traceroute_hops("1  router.example.com (10.0.0.1)  1 ms");
        assert_eq!(hops[0].ip.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn parses_scamper_output() {
        let hops = parse_scamper_hops("1  10.0.0.1  1.234 ms\n2  1.1.1.1  5.678 ms");
        assert_eq!(hops.len(), 2);
        assert_eq!(hops[1].rtt_ms, Some(5.678));
    }

    #[test]
    fn scamper_handles_timeout_asterisk() {
        let hops = parse_scamper_hops("1  *  0.000 ms");
        assert_eq!(hops[0].ip, None);
    }
}
