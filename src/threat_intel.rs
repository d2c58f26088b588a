//! Reputation lookup against a Safe Browsing v4 compatible `threatMatches:find` API.
//!
//! One outbound call per fresh analysis, no retries. Every failure fails open:
//! an unavailable provider is an absent signal, not a verdict.

use crate::config::ReputationConfig;
use crate::error::GuardError;
use crate::models::ThreatMatch;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

const THREAT_TYPES: &[&str] = &[
    "MALWARE",
    "SOCIAL_ENGINEERING",
    "UNWANTED_SOFTWARE",
    "POTENTIALLY_HARMFUL_APPLICATION",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ThreatCheck {
    pub is_safe: bool,
    pub threats: Vec<ThreatMatch>,
}

impl ThreatCheck {
    /// Result used whenever the provider gives no usable answer
    pub fn safe_default() -> Self {
        Self {
            is_safe: true,
            threats: Vec::new(),
        }
    }

    pub fn from_matches(threats: Vec<ThreatMatch>) -> Self {
        Self {
            is_safe: threats.is_empty(),
            threats,
        }
    }
}

pub type LookupFuture<'a> = Pin<Box<dyn Future<Output = ThreatCheck> + Send + 'a>>;

/// Source of external reputation verdicts for a URL.
///
/// Implementations never fail: errors are absorbed into [`ThreatCheck::safe_default`].
pub trait ReputationLookup: Send + Sync {
    fn check_url<'a>(&'a self, url: &'a str) -> LookupFuture<'a>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FindRequest<'a> {
    client: ClientInfo<'a>,
    threat_info: ThreatInfo<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientInfo<'a> {
    client_id: &'a str,
    client_version: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThreatInfo<'a> {
    threat_types: &'a [&'a str],
    platform_types: [&'a str; 1],
    threat_entry_types: [&'a str; 1],
    threat_entries: [ThreatEntry<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ThreatEntry<'a> {
    url: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct FindResponse {
    #[serde(default)]
    matches: Vec<RawMatch>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMatch {
    threat_type: String,
    #[serde(default)]
    platform_type: String,
    #[serde(default)]
    threat: Option<RawThreat>,
}

#[derive(Debug, Deserialize)]
struct RawThreat {
    url: String,
}

pub struct ThreatIntelClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    client_id: String,
    client_version: String,
}

impl ThreatIntelClient {
    pub fn new(config: &ReputationConfig) -> Result<Self, GuardError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(format!("{}/{}", config.client_id, config.client_version))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config
                .api_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
            client_id: config.client_id.clone(),
            client_version: config.client_version.clone(),
        })
    }

    /// Fallback when the HTTP client cannot be built with the configured options
    pub fn from_config(config: &ReputationConfig) -> Self {
        Self::new(config).unwrap_or_else(|e| {
            log::warn!("Failed to build reputation client, using defaults: {e}");
            Self {
                client: Client::new(),
                endpoint: config.endpoint.clone(),
                api_key: config.api_key.clone(),
                client_id: config.client_id.clone(),
                client_version: config.client_version.clone(),
            }
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Query the provider. `Ok(vec![])` when no credential is configured.
    pub async fn lookup(&self, url: &str) -> Result<Vec<ThreatMatch>, GuardError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(Vec::new());
        };

        let request = FindRequest {
            client: ClientInfo {
                client_id: &self.client_id,
                client_version: &self.client_version,
            },
            threat_info: ThreatInfo {
                threat_types: THREAT_TYPES,
                platform_types: ["ANY_PLATFORM"],
                threat_entry_types: ["URL"],
                threat_entries: [ThreatEntry { url }],
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", api_key)])
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GuardError::NetworkFailure {
                message: format!("provider answered HTTP {status}"),
            });
        }

        let body: FindResponse = response.json().await?;
        Ok(Self::convert_matches(body, url))
    }

    fn convert_matches(body: FindResponse, requested: &str) -> Vec<ThreatMatch> {
        body.matches
            .into_iter()
            .map(|m| ThreatMatch {
                threat_type: m.threat_type,
                platform_type: m.platform_type,
                url: m
                    .threat
                    .map(|t| t.url)
                    .unwrap_or_else(|| requested.to_string()),
            })
            .collect()
    }
}

impl ReputationLookup for ThreatIntelClient {
    fn check_url<'a>(&'a self, url: &'a str) -> LookupFuture<'a> {
        Box::pin(async move {
            if !self.is_configured() {
                log::debug!("No reputation API key configured, skipping lookup for {url}");
                return ThreatCheck::safe_default();
            }

            match self.lookup(url).await {
                Ok(matches) => {
                    if !matches.is_empty() {
                        log::info!("Reputation provider flagged {url}: {} match(es)", matches.len());
                    }
                    ThreatCheck::from_matches(matches)
                }
                Err(e) => {
                    log::warn!("{e}; treating {url} as unflagged");
                    ThreatCheck::safe_default()
                }
            }
        })
    }
}
