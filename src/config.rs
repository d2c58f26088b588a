use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const DEFAULT_REPUTATION_ENDPOINT: &str =
    "https://safebrowsing.googleapis.com/v4/threatMatches:find";
pub const API_KEY_ENV: &str = "NAVGUARD_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub analyzer: AnalyzerConfig,
    pub cache: CacheConfig,
    pub history_limit: usize,
    pub reputation: ReputationConfig,
    pub storage: StorageConfig,
    /// Settings used until a persisted copy is loaded.
    pub default_settings: Settings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub max_subdomains: usize,
    pub max_hostname_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub client_id: String,
    pub client_version: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the JSON key-value store. `None` keeps everything in memory.
    pub directory: Option<String>,
}

/// Runtime toggles changed through `UPDATE_SETTINGS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub protection_enabled: bool,
    pub show_warnings: bool,
    pub block_high_risk: bool,
    pub reputation_lookup_enabled: bool,
    pub keep_history: bool,
}

/// Partial settings; absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub protection_enabled: Option<bool>,
    pub show_warnings: Option<bool>,
    pub block_high_risk: Option<bool>,
    pub reputation_lookup_enabled: Option<bool>,
    pub keep_history: Option<bool>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            analyzer: AnalyzerConfig::default(),
            cache: CacheConfig::default(),
            history_limit: 100,
            reputation: ReputationConfig::default(),
            storage: StorageConfig::default(),
            default_settings: Settings::default(),
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_subdomains: 3,
            max_hostname_length: 50,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 24 * 60 * 60,
        }
    }
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_REPUTATION_ENDPOINT.to_string(),
            api_key: None,
            client_id: "navguard".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            timeout_ms: 5_000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: Some("/var/lib/navguard".to_string()),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            protection_enabled: true,
            show_warnings: true,
            block_high_risk: true,
            reputation_lookup_enabled: true,
            keep_history: true,
        }
    }
}

impl Settings {
    pub fn apply(&mut self, update: &SettingsUpdate) {
        if let Some(v) = update.protection_enabled {
            self.protection_enabled = v;
        }
        if let Some(v) = update.show_warnings {
            self.show_warnings = v;
        }
        if let Some(v) = update.block_high_risk {
            self.block_high_risk = v;
        }
        if let Some(v) = update.reputation_lookup_enabled {
            self.reputation_lookup_enabled = v;
        }
        if let Some(v) = update.keep_history {
            self.keep_history = v;
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration file {path}"))?;
        let config: EngineConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse configuration file {path}"))?;
        Ok(config.with_env_overrides())
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write configuration file {path}"))?;
        Ok(())
    }

    /// Pick up the reputation API key from the environment when the file has none.
    pub fn with_env_overrides(mut self) -> Self {
        if self.reputation.api_key.is_none() {
            if let Ok(key) = std::env::var(API_KEY_ENV) {
                if !key.trim().is_empty() {
                    self.reputation.api_key = Some(key.trim().to_string());
                }
            }
        }
        self
    }

    pub fn cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache.ttl_seconds)
    }

    pub fn reputation_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reputation.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.analyzer.max_subdomains, 3);
        assert_eq!(config.cache.ttl_seconds, 86_400);
        assert_eq!(config.history_limit, 100);
        assert!(config.default_settings.protection_enabled);
        assert!(config.default_settings.keep_history);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "analyzer:\n  max_subdomains: 5\ncache:\n  ttl_seconds: 60\n";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.analyzer.max_subdomains, 5);
        assert_eq!(config.analyzer.max_hostname_length, 50);
        assert_eq!(config.cache.ttl_seconds, 60);
        assert_eq!(config.reputation.endpoint, DEFAULT_REPUTATION_ENDPOINT);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("navguard.yaml");
        let path = path.to_str().unwrap();

        let mut config = EngineConfig::default();
        config.history_limit = 25;
        config.reputation.api_key = Some("abc".to_string());
        config.to_file(path).unwrap();

        let loaded = EngineConfig::from_file(path).unwrap();
        assert_eq!(loaded.history_limit, 25);
        assert_eq!(loaded.reputation.api_key.as_deref(), Some("abc"));
    }

    #[test]
    fn test_settings_partial_update() {
        let mut settings = Settings::default();
        settings.apply(&SettingsUpdate {
            keep_history: Some(false),
            ..Default::default()
        });
        assert!(!settings.keep_history);
        assert!(settings.protection_enabled);
        assert!(settings.show_warnings);
    }
}
