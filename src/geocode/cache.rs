//! Caller-side geocode cache at ~/.geocoder/cache.json.
//!
//! TTL: 30 days. Keys are the trimmed, lower-cased address.
//! Only live-provider results are stored; a static fallback is never cached so
//! the next request gets another chance at a real coordinate.

use super::types::{ResolutionMethod, ResolutionResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const CACHE_TTL_MS: i64 = 30 * 24 * 3600 * 1000;

#[derive(Serialize, Deserialize, Clone)]
struct CacheEntry {
    lat: f64,
    lon: f64,
    method: ResolutionMethod,
    echo: String,
    timestamp: i64,
}

pub struct GeocodeCache {
    path: PathBuf,
    entries: HashMap<String, CacheEntry>,
}

impl GeocodeCache {
    /// Load from the default location (~/.geocoder/cache.json).
    pub fn load() -> Self {
        Self::load_from(Self::default_path())
    }

    /// Load from a specific path. A missing or corrupt file yields an empty
    /// cache. Expired entries are dropped (and the file rewritten) on load.
    pub fn load_from(path: PathBuf) -> Self {
        let entries = Self::read_file(&path).unwrap_or_default();
        let mut cache = Self { path, entries };
        let removed = cache.prune();
        if removed > 0 {
            debug!(removed, "pruned expired geocode cache entries");
        }
        cache
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".geocoder")
            .join("cache.json")
    }

    fn read_file(path: &Path) -> Option<HashMap<String, CacheEntry>> {
        let data = fs::read_to_string(path).ok()?;
        serde_json::from_str(&data).ok()
    }

    fn key(address: &str) -> String {
        address.trim().to_lowercase()
    }

    /// Cached result for an address, unless missing or expired.
    pub fn get(&self, address: &str) -> Option<ResolutionResult> {
        let entry = self.entries.get(&Self::key(address))?;

        let now = chrono::Utc::now().timestamp_millis();
        if now - entry.timestamp > CACHE_TTL_MS {
            return None;
        }

        Some(ResolutionResult {
            latitude: entry.lat,
            longitude: entry.lon,
            method: entry.method,
            raw_address_echo: entry.echo.clone(),
            succeeded: true,
            fallback_keyword: None,
            failures: Vec::new(),
        })
    }

    /// Store a result and persist. Returns false (and stores nothing) for
    /// degraded results.
    pub fn put(&mut self, address: &str, result: &ResolutionResult) -> bool {
        if !result.succeeded || result.method == ResolutionMethod::StaticFallback {
            return false;
        }
        let key = Self::key(address);
        if key.is_empty() {
            return false;
        }
        self.entries.insert(
            key,
            CacheEntry {
                lat: result.latitude,
                lon: result.longitude,
                method: result.method,
                echo: result.raw_address_echo.clone(),
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
        );
        self.persist();
        true
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn prune(&mut self) -> usize {
        let now = chrono::Utc::now().timestamp_millis();
        let before = self.entries.len();
        self.entries.retain(|_, e| now - e.timestamp <= CACHE_TTL_MS);
        let removed = before - self.entries.len();
        if removed > 0 {
            self.persist();
        }
        removed
    }

    fn persist(&self) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!(path = %parent.display(), error = %e, "cannot create cache directory");
                return;
            }
        }
        match serde_json::to_string_pretty(&self.entries) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.path, json) {
                    warn!(path = %self.path.display(), error = %e, "cannot write geocode cache");
                }
            }
            Err(e) => warn!(error = %e, "cannot serialize geocode cache"),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
