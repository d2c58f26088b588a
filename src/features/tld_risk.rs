use crate::domain_utils::DomainUtils;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TldRisk {
    Low,          // .com, .org, .gov, established country codes
    Medium,       // Cheap generic TLDs with mixed reputation
    High,         // TLDs with very high abuse rates
    Unrecognized, // Not in any of the three sets
}

/// TLDs with very high phishing/malware abuse rates
const HIGH_RISK_TLDS: &[&str] = &[
    "tk", "ml", "ga", "cf", "gq", "xyz", "top", "work", "click", "loan", "racing", "win", "bid",
    "zip", "mov", "country", "stream", "download", "review", "party", "kim", "men", "date",
    "faith", "cricket", "science", "accountant",
];

/// Cheap or loosely-policed generic TLDs
const MEDIUM_RISK_TLDS: &[&str] = &[
    "info", "biz", "online", "site", "club", "store", "shop", "icu", "live", "space", "fun",
    "website", "tech", "pw", "cc", "ws", "buzz", "rest", "cam", "monster", "link", "vip",
];

/// Well-established TLDs
const LOW_RISK_TLDS: &[&str] = &[
    "com", "org", "net", "edu", "gov", "mil", "int", "io", "co", "dev", "app", "ai", "me", "us",
    "uk", "ca", "au", "de", "fr", "nl", "be", "ch", "at", "se", "no", "dk", "fi", "ie", "es",
    "it", "pt", "pl", "cz", "jp", "kr", "cn", "in", "sg", "nz", "br", "mx", "ar", "za", "il",
    "eu", "tv", "fm", "gg", "ly", "to", "so", "rs", "page", "blog", "cloud",
];

#[derive(Debug, Clone)]
pub struct TldRiskAnalyzer {
    tld_lookup: HashMap<&'static str, TldRisk>,
}

impl Default for TldRiskAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl TldRiskAnalyzer {
    pub fn new() -> Self {
        let mut tld_lookup = HashMap::new();

        // Build lookup table
        for tld in LOW_RISK_TLDS {
            tld_lookup.insert(*tld, TldRisk::Low);
        }
        for tld in MEDIUM_RISK_TLDS {
            tld_lookup.insert(*tld, TldRisk::Medium);
        }
        for tld in HIGH_RISK_TLDS {
            tld_lookup.insert(*tld, TldRisk::High);
        }

        Self { tld_lookup }
    }

    /// Get TLD risk tier
    pub fn get_tld_risk(&self, tld: &str) -> TldRisk {
        let tld_lower = tld.to_lowercase();
        self.tld_lookup
            .get(tld_lower.as_str())
            .copied()
            .unwrap_or(TldRisk::Unrecognized)
    }

    /// Classify a hostname by its last label
    pub fn classify_host(&self, host: &str) -> Option<(String, TldRisk)> {
        let tld = DomainUtils::extract_tld(host)?;
        let risk = self.get_tld_risk(&tld);
        Some((tld, risk))
    }
}
