use std::net::Ipv4Addr;
use url::Url;

/// Two-part public suffixes treated as a single TLD unit
const TWO_PART_SUFFIXES: &[&str] = &[
    "co.uk", "com.au", "co.jp", "co.kr", "com.br", "co.za", "com.mx", "co.in", "com.sg", "co.nz",
    "com.ar", "co.il", "org.uk", "net.au", "gov.uk", "ac.uk", "edu.au",
];

/// Minimal hostname utilities
pub struct DomainUtils;

impl DomainUtils {
    /// Lowercased host of a URL, if it has one
    pub fn extract_host(url: &str) -> Option<String> {
        Url::parse(url)
            .ok()?
            .host_str()
            .map(|h| h.trim_end_matches('.').to_lowercase())
    }

    /// Host exactly as typed, before URL normalization lowercases it
    pub fn raw_host(url: &str) -> Option<&str> {
        let (_, rest) = url.split_once("://")?;
        let authority = rest.split(['/', '?', '#']).next()?;
        let host_port = authority.rsplit('@').next()?;
        let host = if host_port.starts_with('[') {
            // IPv6 literal, keep brackets intact
            host_port.split(']').next().map(|h| h.trim_start_matches('['))?
        } else {
            host_port.split(':').next()?
        };
        if host.is_empty() {
            None
        } else {
            Some(host)
        }
    }

    /// Canonical learner key (remove www prefix)
    pub fn canonicalize_domain(domain: &str) -> String {
        let domain_lower = domain.to_lowercase();
        if let Some(stripped) = domain_lower.strip_prefix("www.") {
            stripped.to_string()
        } else {
            domain_lower
        }
    }

    /// Registrable part of a hostname
    /// e.g., "email.nationalgeographic.com" -> "nationalgeographic.com"
    pub fn registrable_domain(host: &str) -> String {
        let parts: Vec<&str> = host.split('.').filter(|p| !p.is_empty()).collect();
        if parts.len() < 2 {
            return host.to_lowercase();
        }

        let keep = if parts.len() >= 3 && Self::has_two_part_suffix(&parts) {
            3
        } else {
            2
        };
        parts[parts.len() - keep..].join(".").to_lowercase()
    }

    /// Number of labels in front of the registrable domain
    pub fn subdomain_count(host: &str) -> usize {
        let total = host.split('.').filter(|p| !p.is_empty()).count();
        let registrable = Self::registrable_domain(host).split('.').count();
        total.saturating_sub(registrable)
    }

    /// Last label of a hostname
    pub fn extract_tld(host: &str) -> Option<String> {
        let parts: Vec<&str> = host.split('.').filter(|p| !p.is_empty()).collect();
        if parts.len() >= 2 {
            Some(parts.last()?.to_lowercase())
        } else {
            None
        }
    }

    /// Check if domain matches any in list (with hierarchy support)
    pub fn matches_domain_list(domain: &str, domain_list: &[&str]) -> bool {
        let domain_lower = domain.to_lowercase();

        domain_list.iter().any(|pattern| {
            let pattern_lower = pattern.to_lowercase();
            domain_lower == pattern_lower || domain_lower.ends_with(&format!(".{}", pattern_lower))
        })
    }

    /// Literal IPv4 host outside private, loopback and other reserved ranges
    pub fn is_public_ipv4(host: &str) -> bool {
        match host.parse::<Ipv4Addr>() {
            Ok(ip) => {
                !(ip.is_private()
                    || ip.is_loopback()
                    || ip.is_link_local()
                    || ip.is_unspecified()
                    || ip.is_broadcast())
            }
            Err(_) => false,
        }
    }

    fn has_two_part_suffix(parts: &[&str]) -> bool {
        let suffix = format!("{}.{}", parts[parts.len() - 2], parts[parts.len() - 1]).to_lowercase();
        TWO_PART_SUFFIXES.contains(&suffix.as_str())
    }
}
