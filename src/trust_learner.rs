//! Adaptive trust learning from user decisions.
//!
//! Every `proceed`/`block` decision feeds per-domain, per-category and
//! per-hour counters plus a per-domain override record. The trust score is a
//! weighted blend of those ratios; override frequency decays with the days
//! since the last override, computed at read time.

use crate::error::GuardError;
use crate::features::category::UrlCategory;
use crate::models::UserAction;
use chrono::{DateTime, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

const OVERRIDE_DECAY_DAYS: f64 = 30.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainTrust {
    pub safe_count: u64,
    pub unsafe_count: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryPreference {
    pub trusted_count: u64,
    pub blocked_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeActivity {
    pub safe_count: u64,
    pub unsafe_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub frequency: u64,
    pub last_override_at: DateTime<Utc>,
}

/// Persisted learner maps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerSnapshot {
    pub domain_trust: HashMap<String, DomainTrust>,
    pub category_preferences: HashMap<UrlCategory, CategoryPreference>,
    pub time_activity: HashMap<u32, TimeActivity>,
    pub override_patterns: HashMap<String, OverrideRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Trust,
    ProbablySafe,
    Neutral,
    ProbablyUnsafe,
    Unsafe,
}

impl Recommendation {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 0.8 => Recommendation::Trust,
            s if s >= 0.6 => Recommendation::ProbablySafe,
            s if s >= 0.4 => Recommendation::Neutral,
            s if s >= 0.2 => Recommendation::ProbablyUnsafe,
            _ => Recommendation::Unsafe,
        }
    }
}

/// Factor weights. All weights should sum to 1.0.
#[derive(Debug, Clone)]
pub struct TrustWeights {
    pub domain_history: f64,
    pub category_trust: f64,
    pub time_pattern: f64,
    pub override_frequency: f64,
}

impl Default for TrustWeights {
    fn default() -> Self {
        Self {
            domain_history: 0.25,
            category_trust: 0.25,
            time_pattern: 0.20,
            override_frequency: 0.30,
        }
    }
}

/// Individual factor values, each in [0, 1]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrustFactors {
    pub domain_history: f64,
    pub category_trust: f64,
    pub time_pattern: f64,
    pub override_frequency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustAssessment {
    pub score: f64,
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub factors: TrustFactors,
}

pub struct TrustLearner {
    state: Mutex<LearnerSnapshot>,
    weights: TrustWeights,
}

impl Default for TrustLearner {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustLearner {
    pub fn new() -> Self {
        Self::from_snapshot(LearnerSnapshot::default())
    }

    pub fn from_snapshot(snapshot: LearnerSnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
            weights: TrustWeights::default(),
        }
    }

    /// Decode persisted maps
    pub fn from_value(value: serde_json::Value) -> Result<Self, GuardError> {
        let snapshot: LearnerSnapshot = serde_json::from_value(value)
            .map_err(|e| GuardError::LearnerDataCorruption {
                message: e.to_string(),
            })?;
        Ok(Self::from_snapshot(snapshot))
    }

    fn lock(&self) -> Result<MutexGuard<'_, LearnerSnapshot>, GuardError> {
        self.state.lock().map_err(|_| GuardError::LearnerDataCorruption {
            message: "learner state lock poisoned".to_string(),
        })
    }

    pub fn snapshot(&self) -> Result<LearnerSnapshot, GuardError> {
        Ok(self.lock()?.clone())
    }

    /// Record a user decision. Every counter upsert happens under one lock.
    pub fn record_interaction(
        &self,
        domain: &str,
        category: UrlCategory,
        action: UserAction,
        at: DateTime<Utc>,
    ) -> Result<(), GuardError> {
        let hour = at.with_timezone(&Local).hour();
        let safe = action == UserAction::Proceed;
        let mut state = self.lock()?;

        let domain_entry = state.domain_trust.entry(domain.to_string()).or_default();
        if safe {
            domain_entry.safe_count += 1;
        } else {
            domain_entry.unsafe_count += 1;
        }
        domain_entry.total += 1;

        if category.is_known() {
            let pref = state.category_preferences.entry(category).or_default();
            if safe {
                pref.trusted_count += 1;
            } else {
                pref.blocked_count += 1;
            }
        }

        let activity = state.time_activity.entry(hour).or_default();
        if safe {
            activity.safe_count += 1;
        } else {
            activity.unsafe_count += 1;
        }

        if safe {
            state
                .override_patterns
                .entry(domain.to_string())
                .and_modify(|record| {
                    record.frequency += 1;
                    record.last_override_at = at;
                })
                .or_insert(OverrideRecord {
                    frequency: 1,
                    last_override_at: at,
                });
        }

        log::debug!("Recorded {action:?} for {domain} (category {})", category.as_str());
        Ok(())
    }

    /// Compute the trust score for a domain/category at a point in time
    pub fn assess(
        &self,
        domain: &str,
        category: UrlCategory,
        at: DateTime<Utc>,
    ) -> Result<TrustAssessment, GuardError> {
        let hour = at.with_timezone(&Local).hour();
        let state = self.lock()?;

        let domain_stats = state.domain_trust.get(domain);
        let domain_history = domain_stats
            .filter(|d| d.total > 0)
            .map(|d| d.safe_count as f64 / d.total as f64)
            .unwrap_or(0.0);

        let category_trust = if category.is_known() {
            state
                .category_preferences
                .get(&category)
                .and_then(|p| ratio(p.trusted_count, p.blocked_count))
                .unwrap_or(0.0)
        } else {
            0.0
        };

        let time_pattern = state
            .time_activity
            .get(&hour)
            .and_then(|t| ratio(t.safe_count, t.unsafe_count))
            .unwrap_or(0.0);

        let override_frequency = state
            .override_patterns
            .get(domain)
            .map(|record| Self::decayed_override_factor(record, at))
            .unwrap_or(0.0);

        let total_interactions = domain_stats.map(|d| d.total).unwrap_or(0);
        drop(state);

        let factors = TrustFactors {
            domain_history,
            category_trust,
            time_pattern,
            override_frequency,
        };
        let score = self.weighted_score(&factors);

        Ok(TrustAssessment {
            score,
            recommendation: Recommendation::from_score(score),
            confidence: Self::confidence_for(total_interactions),
            factors,
        })
    }

    pub fn domain_stats(&self, domain: &str) -> Option<DomainTrust> {
        self.lock().ok()?.domain_trust.get(domain).cloned()
    }

    /// min(log10(total + 1) / 2, 1)
    pub fn confidence_for(total_interactions: u64) -> f64 {
        ((total_interactions as f64 + 1.0).log10() / 2.0).clamp(0.0, 1.0)
    }

    fn decayed_override_factor(record: &OverrideRecord, at: DateTime<Utc>) -> f64 {
        if record.frequency == 0 {
            return 0.0;
        }
        let days = (at - record.last_override_at).num_seconds().max(0) as f64 / 86_400.0;
        (record.frequency as f64 * (-days / OVERRIDE_DECAY_DAYS).exp()).min(1.0)
    }

    fn weighted_score(&self, factors: &TrustFactors) -> f64 {
        let total = factors.domain_history * self.weights.domain_history
            + factors.category_trust * self.weights.category_trust
            + factors.time_pattern * self.weights.time_pattern
            + factors.override_frequency * self.weights.override_frequency;

        total.clamp(0.0, 1.0)
    }
}

fn ratio(positive: u64, negative: u64) -> Option<f64> {
    let total = positive + negative;
    if total == 0 {
        None
    } else {
        Some(positive as f64 / total as f64)
    }
}
