//! Decision Engine
//!
//! Merges structural heuristics, the reputation lookup and the trust learner
//! into one verdict per request. Owns the in-flight set, statistics, bounded
//! history and session overrides, and persists what survives restarts.

use crate::cache::ResultCache;
use crate::config::{EngineConfig, Settings, SettingsUpdate};
use crate::domain_utils::DomainUtils;
use crate::error::GuardError;
use crate::features::category::{self, UrlCategory};
use crate::features::url_structure::StructuralAnalyzer;
use crate::models::{AnalysisResult, DecisionPath, Severity, UserAction, Verdict};
use crate::overrides::SessionOverrides;
use crate::statistics::{StatEvent, StatisticsCollector, Stats};
use crate::storage::{
    JsonFileStore, KeyValueStore, MemoryStore, HISTORY_KEY, LEARNER_KEY, SETTINGS_KEY, STATS_KEY,
};
use crate::threat_intel::{ReputationLookup, ThreatCheck, ThreatIntelClient};
use crate::trust_learner::{Recommendation, TrustAssessment, TrustLearner};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Cached verdicts are reused outright above this learner confidence
const CACHE_TRUST_CONFIDENCE: f64 = 0.7;
/// The learner may flip `safe` only above this confidence
const OVERRIDE_CONFIDENCE: f64 = 0.8;

pub const PROTECTION_DISABLED_ISSUE: &str = "Protection disabled";
pub const INTERNAL_FAILURE_ISSUE: &str = "Analysis failed internally; navigation allowed";

/// Removes its URL from the in-flight set when dropped, on every exit path.
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    url: String,
}

impl InFlightGuard {
    /// Atomically claim a URL; `None` if another request already holds it
    fn acquire(in_flight: &Arc<Mutex<HashSet<String>>>, url: &str) -> Option<Self> {
        let mut set = lock_or_recover(in_flight);
        if !set.insert(url.to_string()) {
            return None;
        }
        Some(Self {
            in_flight: in_flight.clone(),
            url: url.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock_or_recover(&self.in_flight).remove(&self.url);
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct EngineInner {
    config: EngineConfig,
    analyzer: StructuralAnalyzer,
    lookup: Arc<dyn ReputationLookup>,
    cache: Arc<ResultCache>,
    learner: TrustLearner,
    overrides: SessionOverrides,
    in_flight: Arc<Mutex<HashSet<String>>>,
    statistics: Mutex<StatisticsCollector>,
    settings: RwLock<Settings>,
    store: Arc<dyn KeyValueStore>,
    persist_lock: tokio::sync::Mutex<()>,
}

/// Shared handle to the engine. Clones refer to the same state.
#[derive(Clone)]
pub struct DecisionEngine {
    inner: Arc<EngineInner>,
}

impl DecisionEngine {
    /// Build the engine and reload persisted settings, counters, history and learner maps
    pub fn new(
        config: EngineConfig,
        lookup: Arc<dyn ReputationLookup>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let settings = load_or_default(store.as_ref(), SETTINGS_KEY)
            .unwrap_or_else(|| config.default_settings.clone());
        let stats: Stats = load_or_default(store.as_ref(), STATS_KEY).unwrap_or_default();
        let history: Vec<AnalysisResult> =
            load_or_default(store.as_ref(), HISTORY_KEY).unwrap_or_default();
        let learner = load_learner(store.as_ref());

        log::info!(
            "Decision engine ready: {} analyzed, {} history entries, cache TTL {:?}",
            stats.total_analyzed,
            history.len(),
            config.cache_ttl()
        );

        Self {
            inner: Arc::new(EngineInner {
                analyzer: StructuralAnalyzer::new(config.analyzer.clone()),
                lookup,
                cache: Arc::new(ResultCache::new(config.cache_ttl())),
                learner,
                overrides: SessionOverrides::new(),
                in_flight: Arc::new(Mutex::new(HashSet::new())),
                statistics: Mutex::new(StatisticsCollector::restore(
                    stats,
                    history,
                    config.history_limit,
                )),
                settings: RwLock::new(settings),
                store,
                persist_lock: tokio::sync::Mutex::new(()),
                config,
            }),
        }
    }

    /// Engine with the HTTP reputation client and the configured store
    pub fn from_config(config: EngineConfig) -> Self {
        let lookup: Arc<dyn ReputationLookup> =
            Arc::new(ThreatIntelClient::from_config(&config.reputation));

        let store: Arc<dyn KeyValueStore> = match config.storage.directory.as_deref() {
            Some(dir) => match JsonFileStore::new(dir) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    log::warn!("{e}; keeping state in memory only");
                    Arc::new(MemoryStore::new())
                }
            },
            None => Arc::new(MemoryStore::new()),
        };

        Self::new(config, lookup, store)
    }

    /// Start the periodic cache sweep
    pub fn start_maintenance(&self) -> JoinHandle<()> {
        self.inner.cache.clone().spawn_sweeper()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// ANALYZE_URL with the configured reputation deadline
    pub async fn analyze_url(&self, url: &str) -> AnalysisResult {
        let deadline = self.inner.config.reputation_timeout();
        self.analyze_url_with_deadline(url, deadline).await
    }

    /// ANALYZE_URL with a caller-supplied deadline for the reputation lookup
    pub async fn analyze_url_with_deadline(&self, url: &str, deadline: Duration) -> AnalysisResult {
        let settings = self.inner.current_settings();

        if !settings.protection_enabled {
            let mut result = AnalysisResult::allowed(url, DecisionPath::ProtectionDisabled);
            result.issues.push(PROTECTION_DISABLED_ISSUE.to_string());
            return result;
        }

        if self.inner.overrides.contains(url) {
            log::debug!("Session override for {url}");
            let mut result = AnalysisResult::allowed(url, DecisionPath::OverrideHit);
            result.overridden = true;
            return result;
        }

        let category = category::classify_url(url);
        let recommendation = self.inner.assess(url, category);

        let mut path = DecisionPath::Fresh;
        if let Some(mut cached) = self.inner.cache.get(url).await {
            let trusted = recommendation.as_ref().is_some_and(|a| {
                a.recommendation == Recommendation::Trust && a.confidence > CACHE_TRUST_CONFIDENCE
            });
            let is_trust = recommendation
                .as_ref()
                .is_some_and(|a| a.recommendation == Recommendation::Trust);

            if trusted || cached.safe || is_trust {
                cached.decision = if trusted {
                    DecisionPath::CacheTrusted
                } else {
                    DecisionPath::CachePlain
                };
                cached.recommendation = recommendation;
                cached.verdict = verdict_for(&cached, &settings);
                return cached;
            }

            log::debug!("Cached negative verdict for {url} is stale, re-evaluating");
            path = DecisionPath::CacheStaleReevaluate;
        }

        let Some(guard) = InFlightGuard::acquire(&self.inner.in_flight, url) else {
            // Optimistic: the in-progress analysis may still resolve unsafe
            log::debug!("Analysis already in flight for {url}");
            return AnalysisResult::allowed(url, DecisionPath::DedupHit);
        };

        let inner = self.inner.clone();
        let owned_url = url.to_string();
        let task = tokio::spawn(async move {
            let _guard = guard;
            inner.fresh_analysis(&owned_url, path, deadline).await
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                log::error!("Fresh analysis of {url} failed: {e}");
                let mut result = AnalysisResult::allowed(url, DecisionPath::InternalFailure);
                result.issues.push(INTERNAL_FAILURE_ISSUE.to_string());
                result
            }
        }
    }

    /// USER_OVERRIDE: remember the URL for this session and learn a `proceed`
    pub async fn user_override(&self, url: &str) {
        self.inner.overrides.add(url);
        self.inner.record(url, UserAction::Proceed);
        self.inner
            .with_statistics(|stats| stats.record_event(StatEvent::Override));

        self.inner.persist(&[STATS_KEY, LEARNER_KEY]).await;
    }

    /// USER_BLOCK: learn a `block`
    pub async fn user_block(&self, url: &str) {
        self.inner.record(url, UserAction::Block);
        self.inner.persist(&[LEARNER_KEY]).await;
    }

    pub fn stats(&self) -> Stats {
        self.inner.with_statistics(|stats| stats.stats())
    }

    /// Newest first
    pub fn history(&self) -> Vec<AnalysisResult> {
        self.inner.with_statistics(|stats| stats.history())
    }

    pub fn settings(&self) -> Settings {
        self.inner.current_settings()
    }

    pub async fn update_settings(&self, update: &SettingsUpdate) -> Settings {
        let settings = {
            let mut settings = self
                .inner
                .settings
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            settings.apply(update);
            settings.clone()
        };
        log::info!("Settings updated: {settings:?}");

        self.inner.persist(&[SETTINGS_KEY]).await;
        settings
    }

    /// Write every persisted key, e.g. before shutdown
    pub async fn persist_all(&self) {
        self.inner
            .persist(&[SETTINGS_KEY, STATS_KEY, HISTORY_KEY, LEARNER_KEY])
            .await;
    }
}

impl EngineInner {
    fn current_settings(&self) -> Settings {
        self.settings
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn with_statistics<R>(&self, f: impl FnOnce(&mut StatisticsCollector) -> R) -> R {
        f(&mut lock_or_recover(&self.statistics))
    }

    /// Learner assessment; `None` when the URL has no host or the learner is unavailable
    fn assess(&self, url: &str, category: UrlCategory) -> Option<TrustAssessment> {
        let domain = learner_domain(url)?;
        match self.learner.assess(&domain, category, Utc::now()) {
            Ok(assessment) => Some(assessment),
            Err(e) => {
                log::warn!("{e}; skipping learned adjustment");
                None
            }
        }
    }

    fn record(&self, url: &str, action: UserAction) {
        let Some(domain) = learner_domain(url) else {
            log::debug!("No host in {url}, not recording {action:?}");
            return;
        };
        let category = category::classify_url(url);
        if let Err(e) = self
            .learner
            .record_interaction(&domain, category, action, Utc::now())
        {
            log::warn!("{e}; interaction for {domain} not recorded");
        }
    }

    async fn fresh_analysis(
        &self,
        url: &str,
        path: DecisionPath,
        deadline: Duration,
    ) -> AnalysisResult {
        let settings = self.current_settings();
        let lookup_wanted =
            settings.reputation_lookup_enabled && StructuralAnalyzer::parse(url).is_ok();

        let (report, intel) = tokio::join!(async { self.analyzer.analyze(url) }, async {
            if !lookup_wanted {
                return ThreatCheck::safe_default();
            }
            match tokio::time::timeout(deadline, self.lookup.check_url(url)).await {
                Ok(check) => check,
                Err(_) => {
                    log::warn!("Reputation lookup for {url} exceeded {deadline:?}, failing open");
                    ThreatCheck::safe_default()
                }
            }
        });

        let mut issues = report.issue_strings();
        issues.extend(
            intel
                .threats
                .iter()
                .map(|t| format!("Reputation match: {}", t.threat_type)),
        );

        let severity = if intel.threats.is_empty() {
            report.severity
        } else {
            Severity::High
        };
        let mut safe = severity == Severity::Low;
        let mut adjusted_by_safety = false;

        let category = category::classify_url(url);
        let recommendation = self.assess(url, category);
        if let Some(assessment) = &recommendation {
            if assessment.confidence > OVERRIDE_CONFIDENCE {
                match assessment.recommendation {
                    Recommendation::Trust => {
                        safe = true;
                        adjusted_by_safety = true;
                    }
                    Recommendation::Unsafe => {
                        safe = false;
                        adjusted_by_safety = true;
                    }
                    _ => {}
                }
            }
        }

        let mut result = AnalysisResult {
            url: url.to_string(),
            timestamp: Utc::now(),
            issues,
            severity,
            safe,
            threats: intel.threats,
            adjusted_by_safety,
            overridden: false,
            category,
            recommendation,
            verdict: Verdict::Allow,
            decision: path,
        };
        result.verdict = verdict_for(&result, &settings);

        log::debug!(
            "Decided {url}: severity {:?}, safe {}, verdict {:?}",
            result.severity,
            result.safe,
            result.verdict
        );

        self.with_statistics(|stats| {
            stats.record_event(StatEvent::Analyzed {
                safe: result.safe,
                severity: result.severity,
            });
            if settings.keep_history {
                stats.push_history(result.clone());
            }
        });

        self.cache.set(url, result.clone()).await;

        if settings.keep_history {
            self.persist(&[STATS_KEY, HISTORY_KEY]).await;
        } else {
            self.persist(&[STATS_KEY]).await;
        }

        result
    }

    /// Current value of a persisted key
    fn snapshot_value(&self, key: &str) -> Option<Value> {
        let value = match key {
            SETTINGS_KEY => serde_json::to_value(self.current_settings()),
            STATS_KEY => serde_json::to_value(self.with_statistics(|s| s.stats())),
            HISTORY_KEY => serde_json::to_value(self.with_statistics(|s| s.history())),
            LEARNER_KEY => match self.learner.snapshot() {
                Ok(snapshot) => serde_json::to_value(snapshot),
                Err(e) => {
                    log::warn!("{e}; learner state not persisted");
                    return None;
                }
            },
            _ => return None,
        };
        value
            .map_err(|e| log::warn!("Failed to encode '{key}': {e}"))
            .ok()
    }

    /// Snapshot and save under one write lock, so stored state never goes
    /// backwards. Failures are logged, never raised.
    async fn persist(&self, keys: &[&'static str]) {
        let _writer = self.persist_lock.lock().await;

        let entries: Vec<(&'static str, Value)> = keys
            .iter()
            .filter_map(|key| self.snapshot_value(key).map(|value| (*key, value)))
            .collect();
        if entries.is_empty() {
            return;
        }

        let store = self.store.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            entries
                .into_iter()
                .filter_map(|(key, value)| store.save(key, &value).err())
                .collect::<Vec<GuardError>>()
        })
        .await;

        match outcome {
            Ok(errors) => {
                for e in errors {
                    log::warn!("{e}; continuing with in-memory state");
                }
            }
            Err(e) => log::warn!("Persistence task failed: {e}"),
        }
    }
}

fn verdict_for(result: &AnalysisResult, settings: &Settings) -> Verdict {
    if result.safe {
        Verdict::Allow
    } else if result.severity == Severity::High && settings.block_high_risk {
        Verdict::Block
    } else if settings.show_warnings || result.severity == Severity::High {
        Verdict::Warn
    } else {
        Verdict::Allow
    }
}

fn learner_domain(url: &str) -> Option<String> {
    DomainUtils::extract_host(url).map(|host| DomainUtils::canonicalize_domain(&host))
}

fn load_or_default<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    match store.load(key) {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                log::warn!("Ignoring malformed persisted '{key}': {e}");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            log::warn!("{e}; starting with defaults");
            None
        }
    }
}

fn load_learner(store: &dyn KeyValueStore) -> TrustLearner {
    match store.load(LEARNER_KEY) {
        Ok(Some(value)) => TrustLearner::from_value(value).unwrap_or_else(|e| {
            log::warn!("{e}; resetting learner to empty");
            TrustLearner::new()
        }),
        Ok(None) => TrustLearner::new(),
        Err(e) => {
            log::warn!("{e}; starting with an empty learner");
            TrustLearner::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ThreatMatch;
    use crate::threat_intel::LookupFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockLookup {
        calls: AtomicUsize,
        delay: Duration,
        threat_type: Option<&'static str>,
        explode: bool,
    }

    impl MockLookup {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ReputationLookup for MockLookup {
        fn check_url<'a>(&'a self, url: &'a str) -> LookupFuture<'a> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                if self.explode {
                    panic!("lookup exploded");
                }
                let threats = self
                    .threat_type
                    .map(|t| ThreatMatch {
                        threat_type: t.to_string(),
                        platform_type: "ANY_PLATFORM".to_string(),
                        url: url.to_string(),
                    })
                    .into_iter()
                    .collect();
                ThreatCheck::from_matches(threats)
            })
        }
    }

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn load(&self, key: &str) -> Result<Option<Value>, GuardError> {
            Err(GuardError::StorageFailure {
                key: key.to_string(),
                message: "backend offline".to_string(),
            })
        }

        fn save(&self, key: &str, _value: &Value) -> Result<(), GuardError> {
            self.load(key).map(|_| ())
        }
    }

    fn engine_with(lookup: Arc<MockLookup>) -> DecisionEngine {
        DecisionEngine::new(EngineConfig::default(), lookup, Arc::new(MemoryStore::new()))
    }

    fn record_many(engine: &DecisionEngine, url: &str, action: UserAction, n: usize) {
        for _ in 0..n {
            engine.inner.record(url, action);
        }
    }

    #[tokio::test]
    async fn test_clean_url_is_safe_and_cached() {
        let lookup = Arc::new(MockLookup::default());
        let engine = engine_with(lookup.clone());

        let first = engine.analyze_url("https://example.com/").await;
        assert!(first.safe);
        assert_eq!(first.severity, Severity::Low);
        assert_eq!(first.decision, DecisionPath::Fresh);
        assert_eq!(first.verdict, Verdict::Allow);

        let second = engine.analyze_url("https://example.com/").await;
        assert_eq!(second.decision, DecisionPath::CachePlain);
        assert_eq!(lookup.calls(), 1);
        assert_eq!(engine.stats().total_analyzed, 1);
    }

    #[tokio::test]
    async fn test_public_ip_is_blocked() {
        let engine = engine_with(Arc::new(MockLookup::default()));

        let result = engine.analyze_url("http://123.45.67.89/login").await;
        assert_eq!(result.severity, Severity::High);
        assert!(!result.safe);
        assert_eq!(result.verdict, Verdict::Block);
        assert_eq!(engine.stats().total_blocked, 1);
    }

    #[tokio::test]
    async fn test_threat_match_forces_high() {
        let lookup = Arc::new(MockLookup {
            threat_type: Some("SOCIAL_ENGINEERING"),
            ..Default::default()
        });
        let engine = engine_with(lookup);

        let result = engine.analyze_url("https://example.com/phish").await;
        assert_eq!(result.severity, Severity::High);
        assert!(!result.safe);
        assert_eq!(result.threats.len(), 1);
        assert!(result
            .issues
            .contains(&"Reputation match: SOCIAL_ENGINEERING".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_url_fails_closed_without_lookup() {
        let lookup = Arc::new(MockLookup::default());
        let engine = engine_with(lookup.clone());

        let result = engine.analyze_url("definitely not a url").await;
        assert!(!result.safe);
        assert_eq!(result.severity, Severity::High);
        assert_eq!(result.issues, vec!["Invalid URL format".to_string()]);
        assert_eq!(lookup.calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_lookup() {
        let lookup = Arc::new(MockLookup {
            delay: Duration::from_millis(100),
            ..Default::default()
        });
        let engine = engine_with(lookup.clone());

        let (a, b) = tokio::join!(
            engine.analyze_url("https://example.com/slow"),
            engine.analyze_url("https://example.com/slow")
        );

        assert_eq!(lookup.calls(), 1);
        let paths = [a.decision, b.decision];
        assert!(paths.contains(&DecisionPath::Fresh));
        assert!(paths.contains(&DecisionPath::DedupHit));
        assert!(a.safe && b.safe);

        // Marker released: the next request is served from cache, not dedup
        let c = engine.analyze_url("https://example.com/slow").await;
        assert_eq!(c.decision, DecisionPath::CachePlain);
    }

    #[tokio::test]
    async fn test_override_short_circuits() {
        let lookup = Arc::new(MockLookup::default());
        let engine = engine_with(lookup.clone());

        engine.user_override("https://free-prizes.tk/claim").await;
        let result = engine.analyze_url("https://free-prizes.tk/claim").await;

        assert!(result.safe);
        assert!(result.overridden);
        assert_eq!(result.decision, DecisionPath::OverrideHit);
        assert_eq!(lookup.calls(), 0);
        assert_eq!(engine.stats().session_overrides, 1);
    }

    #[tokio::test]
    async fn test_negative_cache_entry_is_reevaluated() {
        let lookup = Arc::new(MockLookup::default());
        let engine = engine_with(lookup.clone());

        let first = engine.analyze_url("https://free-prizes.tk/").await;
        assert!(!first.safe);

        let second = engine.analyze_url("https://free-prizes.tk/").await;
        assert_eq!(second.decision, DecisionPath::CacheStaleReevaluate);
        assert_eq!(lookup.calls(), 2);
        assert_eq!(engine.stats().total_analyzed, 2);
    }

    #[tokio::test]
    async fn test_unconfident_trust_keeps_cached_negative_verdict() {
        let lookup = Arc::new(MockLookup::default());
        let engine = engine_with(lookup.clone());
        let url = "https://secure-bank-login.tk/";

        let first = engine.analyze_url(url).await;
        assert!(!first.safe);

        // One recent proceed scores TRUST, but with low confidence
        record_many(&engine, url, UserAction::Proceed, 1);

        let second = engine.analyze_url(url).await;
        let assessment = second.recommendation.clone().unwrap();
        assert_eq!(assessment.recommendation, Recommendation::Trust);
        assert!(assessment.confidence <= CACHE_TRUST_CONFIDENCE);
        assert_eq!(second.decision, DecisionPath::CachePlain);
        assert!(!second.safe);
        assert_eq!(lookup.calls(), 1);
        assert_eq!(engine.stats().total_analyzed, 1);
    }

    async fn analyze_concurrently(engine: &DecisionEngine, count: usize) {
        let tasks: Vec<_> = (0..count)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .analyze_url(&format!("https://host{i}.example.com/"))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_analyses_persist_latest_state() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let lookup = Arc::new(MockLookup::default());
        let engine = DecisionEngine::new(EngineConfig::default(), lookup.clone(), store.clone());

        analyze_concurrently(&engine, 64).await;
        assert_eq!(engine.stats().total_analyzed, 64);

        let reloaded = DecisionEngine::new(EngineConfig::default(), lookup, store);
        assert_eq!(reloaded.stats().total_analyzed, 64);
        assert_eq!(reloaded.history().len(), 64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_analyses_persist_to_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let lookup = Arc::new(MockLookup::default());
        let engine = DecisionEngine::new(
            EngineConfig::default(),
            lookup.clone(),
            Arc::new(JsonFileStore::new(dir.path()).unwrap()),
        );

        analyze_concurrently(&engine, 64).await;

        let reloaded = DecisionEngine::new(
            EngineConfig::default(),
            lookup,
            Arc::new(JsonFileStore::new(dir.path()).unwrap()),
        );
        assert_eq!(reloaded.stats().total_analyzed, 64);
        assert_eq!(reloaded.history().len(), 64);
    }

    #[tokio::test]
    async fn test_confident_trust_forces_safe() {
        let lookup = Arc::new(MockLookup::default());
        let engine = engine_with(lookup.clone());
        let url = "https://secure-bank-login.tk/";
        record_many(&engine, url, UserAction::Proceed, 120);

        let result = engine.analyze_url(url).await;
        assert_eq!(result.category, UrlCategory::Banking);
        assert_eq!(result.severity, Severity::High);
        assert!(result.safe);
        assert!(result.adjusted_by_safety);
        let assessment = result.recommendation.unwrap();
        assert_eq!(assessment.recommendation, Recommendation::Trust);

        // Cached and trusted: no second lookup
        let again = engine.analyze_url(url).await;
        assert_eq!(again.decision, DecisionPath::CacheTrusted);
        assert_eq!(lookup.calls(), 1);
    }

    #[tokio::test]
    async fn test_confident_distrust_forces_unsafe() {
        let engine = engine_with(Arc::new(MockLookup::default()));
        record_many(&engine, "https://example.com/", UserAction::Block, 120);

        let result = engine.analyze_url("https://example.com/").await;
        assert_eq!(result.severity, Severity::Low);
        assert!(!result.safe);
        assert!(result.adjusted_by_safety);
        assert_eq!(result.verdict, Verdict::Warn);
        assert_eq!(engine.stats().total_warnings, 1);
    }

    #[tokio::test]
    async fn test_low_confidence_is_advisory_only() {
        let engine = engine_with(Arc::new(MockLookup::default()));
        let url = "https://secure-bank-login.tk/";
        record_many(&engine, url, UserAction::Proceed, 5);

        let result = engine.analyze_url(url).await;
        let assessment = result.recommendation.clone().unwrap();
        assert!(assessment.confidence > 0.0 && assessment.confidence <= 0.8);
        assert!(!result.safe);
        assert!(!result.adjusted_by_safety);
    }

    #[tokio::test]
    async fn test_history_bounded_at_limit() {
        let engine = engine_with(Arc::new(MockLookup::default()));
        for i in 0..101 {
            engine
                .analyze_url(&format!("https://site{i}.example.com/"))
                .await;
        }

        let history = engine.history();
        assert_eq!(history.len(), 100);
        assert_eq!(history[0].url, "https://site100.example.com/");
        assert_eq!(history[99].url, "https://site1.example.com/");
    }

    #[tokio::test]
    async fn test_history_retention_toggle() {
        let engine = engine_with(Arc::new(MockLookup::default()));
        engine
            .update_settings(&SettingsUpdate {
                keep_history: Some(false),
                ..Default::default()
            })
            .await;

        engine.analyze_url("https://example.com/").await;
        assert!(engine.history().is_empty());
        assert_eq!(engine.stats().total_analyzed, 1);
    }

    #[tokio::test]
    async fn test_protection_disabled() {
        let lookup = Arc::new(MockLookup::default());
        let engine = engine_with(lookup.clone());
        engine
            .update_settings(&SettingsUpdate {
                protection_enabled: Some(false),
                ..Default::default()
            })
            .await;

        let result = engine.analyze_url("http://123.45.67.89/").await;
        assert!(result.safe);
        assert_eq!(result.decision, DecisionPath::ProtectionDisabled);
        assert_eq!(lookup.calls(), 0);
        assert_eq!(engine.stats().total_analyzed, 0);
    }

    #[tokio::test]
    async fn test_reputation_lookup_toggle() {
        let lookup = Arc::new(MockLookup {
            threat_type: Some("MALWARE"),
            ..Default::default()
        });
        let engine = engine_with(lookup.clone());
        engine
            .update_settings(&SettingsUpdate {
                reputation_lookup_enabled: Some(false),
                ..Default::default()
            })
            .await;

        let result = engine.analyze_url("https://example.com/").await;
        assert!(result.safe);
        assert_eq!(lookup.calls(), 0);
    }

    #[tokio::test]
    async fn test_block_high_risk_off_downgrades_to_warning() {
        let engine = engine_with(Arc::new(MockLookup::default()));
        engine
            .update_settings(&SettingsUpdate {
                block_high_risk: Some(false),
                ..Default::default()
            })
            .await;

        let result = engine.analyze_url("http://123.45.67.89/").await;
        assert_eq!(result.verdict, Verdict::Warn);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_lookup_fails_open_at_deadline() {
        let lookup = Arc::new(MockLookup {
            delay: Duration::from_secs(30),
            threat_type: Some("MALWARE"),
            ..Default::default()
        });
        let engine = engine_with(lookup.clone());

        let result = engine
            .analyze_url_with_deadline("https://example.com/", Duration::from_millis(50))
            .await;
        assert!(result.safe);
        assert!(result.threats.is_empty());
        assert_eq!(lookup.calls(), 1);
    }

    #[tokio::test]
    async fn test_panicking_lookup_fails_open_and_releases_marker() {
        let lookup = Arc::new(MockLookup {
            explode: true,
            ..Default::default()
        });
        let engine = engine_with(lookup.clone());

        let first = engine.analyze_url("https://example.com/").await;
        assert!(first.safe);
        assert_eq!(first.decision, DecisionPath::InternalFailure);
        assert_eq!(first.issues, vec![INTERNAL_FAILURE_ISSUE.to_string()]);

        let second = engine.analyze_url("https://example.com/").await;
        assert_eq!(second.decision, DecisionPath::InternalFailure);
        assert_eq!(lookup.calls(), 2);
    }

    #[tokio::test]
    async fn test_storage_failure_is_not_fatal() {
        let engine = DecisionEngine::new(
            EngineConfig::default(),
            Arc::new(MockLookup::default()),
            Arc::new(FailingStore),
        );

        let result = engine.analyze_url("https://example.com/").await;
        assert!(result.safe);
        engine.user_override("https://free-prizes.tk/").await;
        engine.user_block("https://other.tk/").await;

        assert_eq!(engine.stats().total_analyzed, 1);
        assert_eq!(engine.stats().session_overrides, 1);
    }

    #[tokio::test]
    async fn test_state_survives_restart_but_overrides_do_not() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let lookup = Arc::new(MockLookup::default());

        let first = DecisionEngine::new(EngineConfig::default(), lookup.clone(), store.clone());
        first.analyze_url("https://example.com/").await;
        first.user_override("https://free-prizes.tk/").await;
        first.user_block("https://bad.tk/").await;

        let second = DecisionEngine::new(EngineConfig::default(), lookup.clone(), store.clone());
        assert_eq!(second.stats().total_analyzed, 1);
        assert_eq!(second.stats().session_overrides, 1);
        assert_eq!(second.history().len(), 1);
        assert_eq!(
            second.inner.learner.domain_stats("bad.tk").map(|d| d.unsafe_count),
            Some(1)
        );

        let result = second.analyze_url("https://free-prizes.tk/").await;
        assert!(!result.overridden);
        assert!(!result.safe);
        assert!(store.load("overrides").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_learner_resets_to_empty() {
        let store = Arc::new(MemoryStore::new());
        store
            .save(LEARNER_KEY, &serde_json::json!({"domain_trust": [1, 2, 3]}))
            .unwrap();

        let engine = DecisionEngine::new(
            EngineConfig::default(),
            Arc::new(MockLookup::default()),
            store,
        );
        assert_eq!(
            engine.inner.learner.snapshot().unwrap(),
            Default::default()
        );
        assert!(engine.analyze_url("https://example.com/").await.safe);
    }
}
