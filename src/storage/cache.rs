use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Every cached read in the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Tables {
        container_id: String,
        connection_string: String,
    },
    Columns {
        container_id: String,
        connection_string: String,
        table: String,
    },
    Rows {
        container_id: String,
        connection_string: String,
        table: String,
    },
    Instance(Uuid),
    Profile(Uuid),
    Containers(Uuid),
}

/// Log form of a key. Connection strings carry credentials and are left out;
/// the map itself still keys on them.
impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tables { container_id, .. } => write!(f, "table_{}", container_id),
            Self::Columns {
                container_id,
                table,
                ..
            } => write!(f, "columns_{}-{}", container_id, table),
            Self::Rows {
                container_id,
                table,
                ..
            } => write!(f, "rows_{}-{}", container_id, table),
            Self::Instance(id) => write!(f, "instance_{}", id),
            Self::Profile(id) => write!(f, "userProfile_{}", id),
            Self::Containers(id) => write!(f, "containers_{}", id),
        }
    }
}

struct Entry {
    value: JsonValue,
    expires_at: Instant,
}

/// Process-local read-through cache with per-entry TTL.
///
/// Any lifecycle mutation flushes every key. Other worker processes keep their
/// own copy, so their entries only age out by TTL.
pub struct TtlCache {
    entries: RwLock<HashMap<CacheKey, Entry>>,
    default_ttl: Duration,
}

impl TtlCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    // The map holds plain data, so a poisoned lock is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<CacheKey, Entry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CacheKey, Entry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let value = {
            let entries = self.read();
            let entry = entries.get(key)?;
            if Instant::now() >= entry.expires_at {
                None
            } else {
                Some(entry.value.clone())
            }
        };

        match value {
            Some(value) => serde_json::from_value(value).ok(),
            None => {
                self.write().remove(key);
                None
            }
        }
    }

    /// Store `value` for `ttl`, or the default TTL when `None`.
    pub fn set<T: Serialize>(&self, key: CacheKey, value: &T, ttl: Option<Duration>) {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                debug!("Skipping cache write for {}: {}", key, e);
                return;
            }
        };

        let expires_at = Instant::now() + ttl.unwrap_or(self.default_ttl);
        self.write().insert(key, Entry { value, expires_at });
    }

    /// Drop every key. Best effort; never fails.
    pub fn flush_all(&self) {
        let mut entries = self.write();
        let flushed = entries.len();
        entries.clear();
        debug!("Cache flushed ({} keys)", flushed);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[cfg(test)]
    pub fn remaining_ttl(&self, key: &CacheKey) -> Option<Duration> {
        let entries = self.read();
        let entry = entries.get(key)?;
        entry.expires_at.checked_duration_since(Instant::now())
    }
}
