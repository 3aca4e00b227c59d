use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::ports::BoxFuture;
use crate::ports::cache::{CacheError, KvStore};

/// Process-local `KvStore` with TTL support, used by tests and single-process
/// deployments.
///
/// Expiry follows tokio's clock so paused-time tests observe TTLs.
#[derive(Clone, Debug, Default)]
pub struct InMemoryKvStore {
    inner: Arc<Mutex<HashMap<String, MemoryEntry>>>,
}

#[derive(Clone, Debug)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn new(value: String, ttl: Duration) -> Self {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        Self { value, expires_at }
    }

    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}

type Entries = HashMap<String, MemoryEntry>;

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, Entries>, CacheError> {
        self.inner
            .lock()
            .map_err(|_| CacheError::Store("in-memory cache lock poisoned".into()))
    }

    fn live_value(entries: &mut Entries, key: &str) -> Option<String> {
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Remaining lifetime of `key`, if it is live and has an expiry.
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let mut entries = self.entries().ok()?;
        Self::live_value(&mut entries, key)?;
        let deadline = entries.get(key)?.expires_at?;
        Some(deadline.saturating_duration_since(Instant::now()))
    }
}

impl KvStore for InMemoryKvStore {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>, CacheError>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut entries = self.entries()?;
            Ok(Self::live_value(&mut entries, &key))
        })
    }

    fn get_many(&self, keys: &[String]) -> BoxFuture<'_, Result<Vec<Option<String>>, CacheError>> {
        let keys = keys.to_vec();
        Box::pin(async move {
            let mut entries = self.entries()?;
            Ok(keys
                .iter()
                .map(|key| Self::live_value(&mut entries, key))
                .collect())
        })
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> BoxFuture<'_, Result<(), CacheError>> {
        let key = key.to_string();
        let entry = MemoryEntry::new(value.to_string(), ttl);
        Box::pin(async move {
            self.entries()?.insert(key, entry);
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<(), CacheError>> {
        let key = key.to_string();
        Box::pin(async move {
            self.entries()?.remove(&key);
            Ok(())
        })
    }

    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<bool, CacheError>> {
        let key = key.to_string();
        let entry = MemoryEntry::new(value.to_string(), ttl);
        Box::pin(async move {
            let mut entries = self.entries()?;
            if Self::live_value(&mut entries, &key).is_some() {
                return Ok(false);
            }
            entries.insert(key, entry);
            Ok(true)
        })
    }

    fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
    ) -> BoxFuture<'_, Result<bool, CacheError>> {
        let key = key.to_string();
        let expected = expected.to_string();
        Box::pin(async move {
            let mut entries = self.entries()?;
            if Self::live_value(&mut entries, &key).as_deref() != Some(expected.as_str()) {
                return Ok(false);
            }
            entries.remove(&key);
            Ok(true)
        })
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<bool, CacheError>> {
        let key = key.to_string();
        let expected = expected.to_string();
        let entry = MemoryEntry::new(value.to_string(), ttl);
        Box::pin(async move {
            let mut entries = self.entries()?;
            if Self::live_value(&mut entries, &key).as_deref() != Some(expected.as_str()) {
                return Ok(false);
            }
            entries.insert(key, entry);
            Ok(true)
        })
    }

    fn set_many(
        &self,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> BoxFuture<'_, Result<(), CacheError>> {
        let batch = entries
            .iter()
            .map(|(key, value)| (key.clone(), MemoryEntry::new(value.clone(), ttl)))
            .collect::<Vec<_>>();
        Box::pin(async move {
            let mut entries = self.entries()?;
            entries.extend(batch);
            Ok(())
        })
    }

    fn delete_many(&self, keys: &[String]) -> BoxFuture<'_, Result<(), CacheError>> {
        let keys = keys.to_vec();
        Box::pin(async move {
            let mut entries = self.entries()?;
            for key in &keys {
                entries.remove(key);
            }
            Ok(())
        })
    }
}
