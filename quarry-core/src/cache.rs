//! TTL key-value cache shared by search, fetch and robots lookups.
//!
//! Two backends: an in-process map and a directory of JSON files, one per
//! key, named by the SHA-256 of the key. Each file holds
//! `{"stored_at_epoch_secs": .., "payload": ..}`. An entry is served only while
//! `now - stored_at <= ttl`; expired, corrupt or unreadable entries are
//! indistinguishable from a miss. Writes are last-writer-wins and atomic.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::error::CacheError;

/// Source of the current time, in whole seconds since the Unix epoch.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_epoch_secs(&self) -> u64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// A clock that only moves when told to. Used to test expiry boundaries.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_epoch_secs: u64) -> Self {
        Self {
            now: AtomicU64::new(start_epoch_secs),
        }
    }

    pub fn set(&self, epoch_secs: u64) {
        self.now.store(epoch_secs, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_secs(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEnvelope {
    stored_at_epoch_secs: u64,
    payload: serde_json::Value,
}

enum Backend {
    Memory(Mutex<HashMap<String, CacheEnvelope>>),
    Filesystem { dir: PathBuf },
    Disabled,
}

/// TTL cache over a memory or filesystem backend.
pub struct SourceCache {
    backend: Backend,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for SourceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backend = match &self.backend {
            Backend::Memory(_) => "memory".to_string(),
            Backend::Filesystem { dir } => format!("filesystem({})", dir.display()),
            Backend::Disabled => "disabled".to_string(),
        };
        f.debug_struct("SourceCache")
            .field("backend", &backend)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl SourceCache {
    pub fn in_memory(ttl: Duration) -> Self {
        Self {
            backend: Backend::Memory(Mutex::new(HashMap::new())),
            ttl,
            clock: Arc::new(SystemClock),
        }
    }

    /// File-per-key cache rooted at `dir`. The directory is created if missing.
    pub fn filesystem(dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::Directory {
            path: dir.clone(),
            message: e.to_string(),
        })?;
        Ok(Self {
            backend: Backend::Filesystem { dir },
            ttl,
            clock: Arc::new(SystemClock),
        })
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self {
            backend: Backend::Disabled,
            ttl: Duration::ZERO,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.backend, Backend::Disabled)
    }

    /// Return the cached value for `key` if present, unexpired and decodable.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let envelope = match &self.backend {
            Backend::Disabled => return None,
            Backend::Memory(map) => map.lock().ok()?.get(key).cloned()?,
            Backend::Filesystem { dir } => read_envelope(&entry_path(dir, key))?,
        };

        let now = self.clock.now_epoch_secs();
        let age = now.saturating_sub(envelope.stored_at_epoch_secs);
        if age > self.ttl.as_secs() {
            debug!(key, age_secs = age, "Cache entry expired");
            self.remove(key);
            return None;
        }

        match serde_json::from_value(envelope.payload) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key, error = %e, "Cache payload did not decode, treating as miss");
                None
            }
        }
    }

    /// Store `value` under `key`, stamped with the current time.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let payload = serde_json::to_value(value).map_err(|e| CacheError::Encode {
            message: e.to_string(),
        })?;
        let envelope = CacheEnvelope {
            stored_at_epoch_secs: self.clock.now_epoch_secs(),
            payload,
        };

        match &self.backend {
            Backend::Disabled => Ok(()),
            Backend::Memory(map) => {
                if let Ok(mut map) = map.lock() {
                    map.insert(key.to_string(), envelope);
                }
                Ok(())
            }
            Backend::Filesystem { dir } => {
                let path = entry_path(dir, key);
                crate::persistence::atomic_write_json(&path, &envelope).map_err(|e| {
                    CacheError::Write {
                        path,
                        message: e.to_string(),
                    }
                })
            }
        }
    }

    /// Store a value, logging instead of failing. Caching is best-effort.
    pub fn put_best_effort<T: Serialize>(&self, key: &str, value: &T) {
        if let Err(e) = self.put(key, value) {
            warn!(key, error = %e, "Failed to write cache entry");
        }
    }

    pub fn remove(&self, key: &str) {
        match &self.backend {
            Backend::Disabled => {}
            Backend::Memory(map) => {
                if let Ok(mut map) = map.lock() {
                    map.remove(key);
                }
            }
            Backend::Filesystem { dir } => {
                let _ = std::fs::remove_file(entry_path(dir, key));
            }
        }
    }

    /// Drop every expired or unreadable entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_epoch_secs();
        let ttl = self.ttl.as_secs();
        let expired = |env: &CacheEnvelope| now.saturating_sub(env.stored_at_epoch_secs) > ttl;

        match &self.backend {
            Backend::Disabled => 0,
            Backend::Memory(map) => {
                let Ok(mut map) = map.lock() else {
                    return 0;
                };
                let before = map.len();
                map.retain(|_, env| !expired(env));
                before - map.len()
            }
            Backend::Filesystem { dir } => {
                let Ok(entries) = std::fs::read_dir(dir) else {
                    return 0;
                };
                let mut removed = 0;
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().map(|e| e != "json").unwrap_or(true) {
                        continue;
                    }
                    let stale = read_envelope(&path).map(|e| expired(&e)).unwrap_or(true);
                    if stale && std::fs::remove_file(&path).is_ok() {
                        removed += 1;
                    }
                }
                removed
            }
        }
    }
}

/// Build a cache key from parts. Parts are joined with a separator that
/// cannot appear in normalized queries or URLs.
pub fn cache_key(parts: &[&str]) -> String {
    parts.join("\u{1f}")
}

fn entry_path(dir: &Path, key: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    dir.join(format!("{:x}.json", hasher.finalize()))
}

fn read_envelope(path: &Path) -> Option<CacheEnvelope> {
    let data = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&data) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Corrupt cache entry");
            None
        }
    }
}
