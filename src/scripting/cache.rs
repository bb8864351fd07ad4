//! Compiled-script cache.
//!
//! Entries are keyed by the requesting client (the node ID) and the SHA-256
//! of the script source. Each client keeps at most one entry, and every
//! lookup evicts entries older than the configured max age. The lock is
//! only held while scanning or mutating the list, never while compiling.

use rhai::AST;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Hex SHA-256 of a script source.
pub fn hash_source(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

struct CacheEntry {
    client_id: u64,
    hash: String,
    ast: AST,
    created: Instant,
}

/// Shared, lock-guarded cache of compiled scripts
pub struct ScriptCache {
    entries: Mutex<Vec<CacheEntry>>,
    max_age: Duration,
}

pub type SharedScriptCache = Arc<ScriptCache>;

impl ScriptCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            max_age,
        }
    }

    pub fn shared(max_age: Duration) -> SharedScriptCache {
        Arc::new(Self::new(max_age))
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up a compiled script for `client_id`.
    ///
    /// Evicts stale entries and this client's entries for other sources.
    pub fn check_cache(&self, hash: &str, client_id: u64) -> Option<AST> {
        let mut entries = self.lock();
        let max_age = self.max_age;
        entries.retain(|entry| {
            let age = entry.created.elapsed();
            if age > max_age {
                tracing::warn!(
                    "Evicting an old cached script, age: {:.3}s",
                    age.as_secs_f64()
                );
                return false;
            }
            if entry.client_id == client_id && entry.hash != hash {
                tracing::debug!("Evicting outdated script for client {}", client_id);
                return false;
            }
            true
        });
        entries
            .iter()
            .find(|entry| entry.client_id == client_id && entry.hash == hash)
            .map(|entry| entry.ast.clone())
    }

    /// Store a freshly compiled script, replacing this client's entry.
    pub fn insert(&self, hash: String, client_id: u64, ast: AST) {
        let mut entries = self.lock();
        entries.retain(|entry| entry.client_id != client_id);
        entries.push(CacheEntry {
            client_id,
            hash,
            ast,
            created: Instant::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl std::fmt::Debug for ScriptCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptCache")
            .field("entries", &self.len())
            .field("max_age", &self.max_age)
            .finish()
    }
}
