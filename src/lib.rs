pub mod cache;
pub mod commands;
pub mod config;
pub mod domain_utils;
pub mod engine;
pub mod error;
pub mod features;
pub mod models;
pub mod overrides;
pub mod statistics;
pub mod storage;
pub mod threat_intel;
pub mod trust_learner;

pub use commands::{Command, Response};
pub use config::{EngineConfig, Settings, SettingsUpdate};
pub use engine::DecisionEngine;
pub use error::GuardError;
pub use models::{AnalysisResult, DecisionPath, Severity, UserAction, Verdict};
pub use statistics::{StatEvent, StatisticsCollector, Stats};
pub use trust_learner::{Recommendation, TrustAssessment, TrustLearner};
