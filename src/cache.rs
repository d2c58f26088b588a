use crate::models::AnalysisResult;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry {
    result: AnalysisResult,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() >= ttl
    }
}

/// Verdict cache keyed by the exact URL string (query and fragment included).
///
/// `get` is the authoritative freshness check; the periodic sweep only
/// reclaims memory. Concurrent writers to one key are last-write-wins.
#[derive(Debug)]
pub struct ResultCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn get(&self, url: &str) -> Option<AnalysisResult> {
        {
            let entries = self.entries.read().await;
            match entries.get(url) {
                None => return None,
                Some(entry) if !entry.is_expired(self.ttl) => {
                    log::debug!("Cache hit for {url}");
                    return Some(entry.result.clone());
                }
                Some(_) => {}
            }
        }

        // Expired: evict unless another writer refreshed it in between
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(url) {
            if entry.is_expired(self.ttl) {
                entries.remove(url);
                log::debug!("Evicted expired cache entry for {url}");
            } else {
                return Some(entry.result.clone());
            }
        }
        None
    }

    pub async fn set(&self, url: &str, result: AnalysisResult) {
        let mut entries = self.entries.write().await;
        entries.insert(
            url.to_string(),
            CacheEntry {
                result,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Remove every expired entry, returning how many were dropped
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(self.ttl));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Sweep on a fixed interval equal to the TTL
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(self.ttl);
            // First tick completes immediately
            timer.tick().await;
            loop {
                timer.tick().await;
                let removed = self.sweep().await;
                if removed > 0 {
                    log::debug!("Cache sweep removed {removed} expired entries");
                }
            }
        })
    }
}
