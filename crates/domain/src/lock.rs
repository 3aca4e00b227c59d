use std::sync::Arc;
use std::time::Duration;

use crate::ports::cache::{CacheError, KvStore};
use crate::util::random_token;

/// Cross-process mutual exclusion on a single cache key.
///
/// Acquisition is set-if-absent with a TTL, so a crashed holder blocks others
/// for at most `ttl`. Release is compare-and-delete, so a holder whose lease
/// already expired can never remove a lock that now belongs to someone else.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn KvStore>,
    key: String,
    ttl: Duration,
}

/// Proof of holding a `DistributedLock`.
#[derive(Debug, PartialEq, Eq)]
pub struct LockLease {
    key: String,
    value: String,
}

impl LockLease {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KvStore>, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            ttl,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn try_acquire(&self) -> Result<Option<LockLease>, CacheError> {
        let value = random_token();
        let ttl = self.ttl.max(Duration::from_millis(1));
        if self.store.set_if_absent(&self.key, &value, ttl).await? {
            tracing::debug!(lock_key = %self.key, "lock acquired");
            Ok(Some(LockLease {
                key: self.key.clone(),
                value,
            }))
        } else {
            Ok(None)
        }
    }

    /// Returns `false` when the lease had already lapsed and the key is gone or
    /// held by another owner.
    pub async fn release(&self, lease: LockLease) -> Result<bool, CacheError> {
        self.store
            .compare_and_delete(&lease.key, &lease.value)
            .await
    }
}
