use crate::features::category::UrlCategory;
use crate::trust_learner::TrustAssessment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// What a front-end should do with the navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    Warn,
    Block,
}

/// Which branch of the decision state machine produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionPath {
    ProtectionDisabled,
    OverrideHit,
    CacheTrusted,
    CacheStaleReevaluate,
    CachePlain,
    DedupHit,
    Fresh,
    InternalFailure,
}

/// A user's decision on a warned URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserAction {
    Proceed,
    Block,
}

/// A single classification returned by the reputation provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatMatch {
    pub threat_type: String,
    pub platform_type: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub issues: Vec<String>,
    pub severity: Severity,
    pub safe: bool,
    pub threats: Vec<ThreatMatch>,
    pub adjusted_by_safety: bool,
    pub overridden: bool,
    pub category: UrlCategory,
    pub recommendation: Option<TrustAssessment>,
    pub verdict: Verdict,
    pub decision: DecisionPath,
}

impl AnalysisResult {
    /// A navigable result with no findings.
    pub fn allowed(url: &str, decision: DecisionPath) -> Self {
        Self {
            url: url.to_string(),
            timestamp: Utc::now(),
            issues: Vec::new(),
            severity: Severity::Low,
            safe: true,
            threats: Vec::new(),
            adjusted_by_safety: false,
            overridden: false,
            category: UrlCategory::Unknown,
            recommendation: None,
            verdict: Verdict::Allow,
            decision,
        }
    }
}
