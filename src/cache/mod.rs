use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::domain::{UserId, WalletKind};

/// Key-value cache fronting wallet reads, in the shape of the external
/// store it stands in for: string keys, string (JSON) values, per-entry TTL.
/// Every mutating ledger operation deletes the affected keys before its
/// caller sees a success result.
pub trait WalletCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String, ttl: Duration);
    fn delete(&self, key: &str);
}

/// Cache key for one user's wallet of one kind.
pub fn wallet_key(user_id: UserId, kind: WalletKind) -> String {
    format!("wallet:user:{}:{}", user_id, kind.as_str())
}

/// Cache key for a driver's restriction state.
pub fn driver_key(user_id: UserId) -> String {
    format!("driver:{}", user_id)
}

/// In-process TTL cache. Entries are dropped lazily on read once their
/// deadline has passed.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WalletCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(key) {
            Some((value, deadline)) if *deadline > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: String, ttl: Duration) {
        let deadline = Instant::now() + ttl;
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .insert(key.to_string(), (value, deadline));
    }

    fn delete(&self, key: &str) {
        self.entries.lock().expect("cache lock poisoned").remove(key);
    }
}

/// Cache that stores nothing, for callers that want to opt out.
pub struct NoopCache;

impl WalletCache for NoopCache {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&self, _key: &str, _value: String, _ttl: Duration) {}

    fn delete(&self, _key: &str) {}
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn test_set_get_delete() {
        let cache = MemoryCache::new();
        cache.set("k", "v".into(), Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some("v".to_string()));

        cache.delete("k");
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_expired_entry_is_gone() {
        let cache = MemoryCache::new();
        cache.set("k", "v".into(), Duration::from_secs(0));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_noop_cache_stores_nothing() {
        let cache = NoopCache;
        cache.set("k", "v".into(), Duration::from_secs(60));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_key_formats() {
        let user_id = Uuid::nil();
        assert_eq!(
            wallet_key(user_id, WalletKind::Driver),
            format!("wallet:user:{}:driver", user_id)
        );
        assert_eq!(driver_key(user_id), format!("driver:{}", user_id));
    }
}
