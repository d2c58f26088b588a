//! Structural URL heuristics.
//!
//! Classifies a URL string from its shape alone: scheme, hostname, TLD tier,
//! encoding and port. No I/O, fully deterministic.

use crate::config::AnalyzerConfig;
use crate::domain_utils::DomainUtils;
use crate::error::GuardError;
use crate::features::tld_risk::{TldRisk, TldRiskAnalyzer};
use crate::models::Severity;
use regex::Regex;
use url::{Host, Url};

pub const INVALID_URL_ISSUE: &str = "Invalid URL format";

/// Escapes routinely produced by browsers and form encoders
const ALLOWED_ESCAPES: &[&str] = &[
    "%20", "%21", "%22", "%23", "%24", "%26", "%27", "%28", "%29", "%2A", "%2B", "%2C", "%2D",
    "%2E", "%2F", "%3A", "%3B", "%3D", "%3F", "%40", "%5F", "%7E",
];

/// Free hosting, tunnelling and throwaway-mail services
const DISPOSABLE_SUFFIXES: &[&str] = &[
    "000webhostapp.com",
    "ngrok.io",
    "ngrok-free.app",
    "trycloudflare.com",
    "serveo.net",
    "duckdns.org",
    "no-ip.org",
    "ddns.net",
    "glitch.me",
    "mailinator.com",
    "guerrillamail.com",
    "10minutemail.com",
    "tempmail.com",
    "temp-mail.org",
    "yopmail.com",
];

/// How much a finding weighs on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueTier {
    /// Forces `high` by itself
    Hard,
    /// Forces `medium` when no hard finding is present
    Soft,
    /// Only counts toward the issue total
    Structural,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralIssue {
    InvalidUrl,
    ExcessiveSubdomains(usize),
    HighRiskTld(String),
    MediumRiskTld(String),
    UnrecognizedTld(String),
    NonHttpScheme(String),
    DoubleExtension(String),
    DisposableDomain(String),
    SuspiciousEncoding(Vec<String>),
    PublicIpLiteral(String),
    NonStandardPort(u16),
    LongHostname(usize),
    MixedCaseHostname,
}

impl StructuralIssue {
    pub fn tier(&self) -> IssueTier {
        match self {
            StructuralIssue::InvalidUrl
            | StructuralIssue::HighRiskTld(_)
            | StructuralIssue::SuspiciousEncoding(_)
            | StructuralIssue::PublicIpLiteral(_) => IssueTier::Hard,
            StructuralIssue::MediumRiskTld(_) | StructuralIssue::UnrecognizedTld(_) => {
                IssueTier::Soft
            }
            _ => IssueTier::Structural,
        }
    }

    pub fn description(&self) -> String {
        match self {
            StructuralIssue::InvalidUrl => INVALID_URL_ISSUE.to_string(),
            StructuralIssue::ExcessiveSubdomains(n) => format!("Excessive subdomains ({n})"),
            StructuralIssue::HighRiskTld(tld) => format!("High-risk TLD: .{tld}"),
            StructuralIssue::MediumRiskTld(tld) => {
                format!("Medium-risk TLD with complex hostname: .{tld}")
            }
            StructuralIssue::UnrecognizedTld(tld) => format!("Unrecognized TLD: .{tld}"),
            StructuralIssue::NonHttpScheme(scheme) => format!("Non-HTTP protocol: {scheme}:"),
            StructuralIssue::DoubleExtension(name) => {
                format!("Suspicious double file extension: {name}")
            }
            StructuralIssue::DisposableDomain(suffix) => {
                format!("Disposable or free-hosting domain: {suffix}")
            }
            StructuralIssue::SuspiciousEncoding(escapes) => {
                format!("Suspicious URL encoding: {}", escapes.join(" "))
            }
            StructuralIssue::PublicIpLiteral(ip) => {
                format!("IP address used instead of domain name: {ip}")
            }
            StructuralIssue::NonStandardPort(port) => format!("Non-standard port: {port}"),
            StructuralIssue::LongHostname(len) => format!("Unusually long hostname ({len} chars)"),
            StructuralIssue::MixedCaseHostname => "Mixed-case hostname".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructuralReport {
    pub issues: Vec<StructuralIssue>,
    pub severity: Severity,
}

impl StructuralReport {
    pub fn issue_strings(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.description()).collect()
    }

    pub fn is_safe(&self) -> bool {
        self.severity == Severity::Low
    }
}

pub struct StructuralAnalyzer {
    config: AnalyzerConfig,
    tld_analyzer: TldRiskAnalyzer,
    escape_regex: Regex,
    double_extension_regex: Regex,
}

impl Default for StructuralAnalyzer {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default())
    }
}

impl StructuralAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            tld_analyzer: TldRiskAnalyzer::new(),
            escape_regex: Regex::new(r"%[0-9A-Fa-f]{2}").expect("escape pattern is valid"),
            double_extension_regex: Regex::new(
                r"(?i)([^/]+\.(?:pdf|docx?|xlsx?|pptx?|txt|rtf|jpe?g|png|gif|html?|php|aspx?|jsp|mp3|mp4|zip))\.(?:exe|scr|bat|cmd|com|pif|vbs|js|jar|msi|ps1|hta|apk)$",
            )
            .expect("double extension pattern is valid"),
        }
    }

    /// Parse a URL, mapping failure onto the crate error taxonomy
    pub fn parse(input: &str) -> Result<Url, GuardError> {
        Url::parse(input.trim()).map_err(|e| GuardError::InvalidUrl {
            input: input.to_string(),
            reason: e.to_string(),
        })
    }

    /// Run every structural check against a URL string
    pub fn analyze(&self, input: &str) -> StructuralReport {
        let parsed = match Self::parse(input) {
            Ok(url) => url,
            Err(e) => {
                log::debug!("{e}");
                return StructuralReport {
                    issues: vec![StructuralIssue::InvalidUrl],
                    severity: Severity::High,
                };
            }
        };

        let mut issues = Vec::new();

        let scheme = parsed.scheme();
        if scheme != "http" && scheme != "https" {
            issues.push(StructuralIssue::NonHttpScheme(scheme.to_string()));
        }

        if let Some(issue) = self.check_encoding(input) {
            issues.push(issue);
        }

        if let Some(caps) = self.double_extension_regex.captures(parsed.path()) {
            let name = caps
                .get(0)
                .map(|m| m.as_str().rsplit('/').next().unwrap_or(m.as_str()).to_string())
                .unwrap_or_default();
            issues.push(StructuralIssue::DoubleExtension(name));
        }

        match parsed.host() {
            Some(Host::Domain(domain)) => {
                let host = domain.trim_end_matches('.').to_lowercase();
                self.check_domain(&host, input, &mut issues);
            }
            Some(Host::Ipv4(ip)) => {
                let ip = ip.to_string();
                if DomainUtils::is_public_ipv4(&ip) {
                    issues.push(StructuralIssue::PublicIpLiteral(ip));
                }
            }
            Some(Host::Ipv6(_)) | None => {}
        }

        if let Some(port) = parsed.port() {
            if port != 80 && port != 443 {
                issues.push(StructuralIssue::NonStandardPort(port));
            }
        }

        let severity = Self::severity_for(&issues);
        StructuralReport { issues, severity }
    }

    fn check_domain(&self, host: &str, raw: &str, issues: &mut Vec<StructuralIssue>) {
        let subdomains = DomainUtils::subdomain_count(host);
        if subdomains > self.config.max_subdomains {
            issues.push(StructuralIssue::ExcessiveSubdomains(subdomains));
        }

        if let Some((tld, risk)) = self.tld_analyzer.classify_host(host) {
            match risk {
                TldRisk::High => issues.push(StructuralIssue::HighRiskTld(tld)),
                TldRisk::Medium => {
                    let complex = subdomains > 1
                        || host.contains('-')
                        || host.chars().any(|c| c.is_ascii_digit());
                    if complex {
                        issues.push(StructuralIssue::MediumRiskTld(tld));
                    }
                }
                TldRisk::Unrecognized => issues.push(StructuralIssue::UnrecognizedTld(tld)),
                TldRisk::Low => {}
            }
        }

        if let Some(suffix) = DISPOSABLE_SUFFIXES
            .iter()
            .find(|s| DomainUtils::matches_domain_list(host, &[**s]))
        {
            issues.push(StructuralIssue::DisposableDomain(suffix.to_string()));
        }

        if host.len() > self.config.max_hostname_length {
            issues.push(StructuralIssue::LongHostname(host.len()));
        }

        if let Some(raw_host) = DomainUtils::raw_host(raw.trim()) {
            let has_upper = raw_host.chars().any(|c| c.is_ascii_uppercase());
            let has_lower = raw_host.chars().any(|c| c.is_ascii_lowercase());
            if has_upper && has_lower {
                issues.push(StructuralIssue::MixedCaseHostname);
            }
        }
    }

    fn check_encoding(&self, raw: &str) -> Option<StructuralIssue> {
        let mut unusual: Vec<String> = Vec::new();
        for m in self.escape_regex.find_iter(raw) {
            let escape = m.as_str().to_uppercase();
            if !ALLOWED_ESCAPES.contains(&escape.as_str()) && !unusual.contains(&escape) {
                unusual.push(escape);
            }
        }

        if unusual.is_empty() {
            None
        } else {
            Some(StructuralIssue::SuspiciousEncoding(unusual))
        }
    }

    fn severity_for(issues: &[StructuralIssue]) -> Severity {
        if issues.len() > 2 || issues.iter().any(|i| i.tier() == IssueTier::Hard) {
            Severity::High
        } else if issues.iter().any(|i| i.tier() == IssueTier::Soft) {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}
