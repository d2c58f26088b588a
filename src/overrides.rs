use std::collections::HashSet;
use std::sync::RwLock;

/// URLs the user chose to visit despite a warning.
///
/// Lives for the process only and is never handed to the storage layer.
#[derive(Debug, Default)]
pub struct SessionOverrides {
    urls: RwLock<HashSet<String>>,
}

impl SessionOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the URL was already overridden
    pub fn add(&self, url: &str) -> bool {
        match self.urls.write() {
            Ok(mut urls) => urls.insert(url.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(url.to_string()),
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        match self.urls.read() {
            Ok(urls) => urls.contains(url),
            Err(poisoned) => poisoned.into_inner().contains(url),
        }
    }

    pub fn len(&self) -> usize {
        self.urls.read().map(|urls| urls.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
