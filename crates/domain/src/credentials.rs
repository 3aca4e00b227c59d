//! Shared platform access token, refreshed by at most one worker at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::lock::{DistributedLock, LockLease};
use crate::ports::cache::{CacheError, KvStore};
use crate::ports::clock::{Clock, SystemClock};
use crate::ports::credentials::{CredentialError, CredentialIssuer};
use crate::util::jittered;

#[derive(Clone, Debug)]
pub struct CredentialConfig {
    pub token_key: String,
    pub expires_key: String,
    pub lock_key: String,
    /// A cached token is treated as stale this long before it really expires.
    pub expire_advance: Duration,
    pub lock_ttl: Duration,
    /// Extra cache lifetime on top of the credential's own lifetime.
    pub grace: Duration,
    pub lock_retry_attempts: u32,
    pub lock_backoff_min: Duration,
    pub lock_backoff_max: Duration,
}

impl CredentialConfig {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            token_key: format!("{prefix}:access_token"),
            expires_key: format!("{prefix}:access_token_expires_at"),
            lock_key: format!("{prefix}:access_token_lock"),
            ..Self::default()
        }
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            token_key: "mpbridge:access_token".to_string(),
            expires_key: "mpbridge:access_token_expires_at".to_string(),
            lock_key: "mpbridge:access_token_lock".to_string(),
            expire_advance: Duration::from_secs(300),
            lock_ttl: Duration::from_millis(5_000),
            grace: Duration::from_secs(600),
            lock_retry_attempts: 20,
            lock_backoff_min: Duration::from_millis(200),
            lock_backoff_max: Duration::from_millis(500),
        }
    }
}

/// The cached credential: token plus its absolute expiry in epoch seconds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialRecord {
    pub token: String,
    pub expires_at: i64,
}

impl CredentialRecord {
    pub fn is_fresh(&self, now_secs: i64, advance: Duration) -> bool {
        let advance = i64::try_from(advance.as_secs()).unwrap_or(i64::MAX);
        self.expires_at > now_secs.saturating_add(advance)
    }
}

#[derive(Clone)]
pub struct CredentialManager {
    store: Arc<dyn KvStore>,
    issuer: Arc<dyn CredentialIssuer>,
    clock: Arc<dyn Clock>,
    lock: DistributedLock,
    config: CredentialConfig,
}

impl CredentialManager {
    pub fn new(
        store: Arc<dyn KvStore>,
        issuer: Arc<dyn CredentialIssuer>,
        config: CredentialConfig,
    ) -> Self {
        let lock = DistributedLock::new(store.clone(), config.lock_key.clone(), config.lock_ttl);
        Self {
            store,
            issuer,
            clock: Arc::new(SystemClock),
            lock,
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CredentialConfig {
        &self.config
    }

    /// Returns the cached token when it is comfortably valid, refreshing it
    /// otherwise.
    pub async fn get_credential(&self) -> Result<String, CredentialError> {
        if let Some(token) = self.fresh_token().await? {
            debug!("using cached access token");
            return Ok(token);
        }
        info!("access token missing or close to expiry, refreshing");
        self.refresh().await
    }

    /// Refreshes the shared token under the distributed lock.
    ///
    /// Contenders back off with jitter and re-check the cache, giving up after
    /// `lock_retry_attempts`.
    pub async fn refresh(&self) -> Result<String, CredentialError> {
        let attempts = self.config.lock_retry_attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(lease) = self.lock.try_acquire().await? {
                let result = self.refresh_locked().await;
                self.release(lease).await;
                return result;
            }

            warn!(
                lock_key = %self.lock.key(),
                attempt,
                "access token refresh lock held by another worker, backing off"
            );
            tokio::time::sleep(jittered(
                self.config.lock_backoff_min,
                self.config.lock_backoff_max,
            ))
            .await;

            if let Some(token) = self.fresh_token().await? {
                debug!("access token refreshed by another worker");
                return Ok(token);
            }
        }

        error!(attempts, "gave up waiting for the access token refresh lock");
        Err(CredentialError::LockContention { attempts })
    }

    /// Drops the cached token and refreshes it. Used after the protected API
    /// rejects the current token.
    pub async fn force_refresh(&self) -> Result<String, CredentialError> {
        warn!("forced access token refresh requested, clearing cached token");
        self.store
            .delete_many(&[
                self.config.token_key.clone(),
                self.config.expires_key.clone(),
            ])
            .await
            .inspect_err(|err| error!(error = %err, "failed to clear cached access token"))?;
        self.refresh().await
    }

    pub async fn cached_record(&self) -> Result<Option<CredentialRecord>, CacheError> {
        let values = self
            .store
            .get_many(&[
                self.config.token_key.clone(),
                self.config.expires_key.clone(),
            ])
            .await?;
        let mut values = values.into_iter();
        let (Some(Some(token)), Some(Some(expires_at))) = (values.next(), values.next()) else {
            return Ok(None);
        };
        match expires_at.parse::<i64>() {
            Ok(expires_at) => Ok(Some(CredentialRecord { token, expires_at })),
            Err(err) => {
                warn!(error = %err, "cached access token expiry is not a number, treating as stale");
                Ok(None)
            }
        }
    }

    /// Seconds until the cached token expires, on this manager's clock.
    pub async fn remaining_lifetime(&self) -> Result<Option<i64>, CacheError> {
        let now = self.clock.now_secs();
        Ok(self
            .cached_record()
            .await?
            .map(|record| record.expires_at - now))
    }

    async fn fresh_token(&self) -> Result<Option<String>, CacheError> {
        let now = self.clock.now_secs();
        Ok(self
            .cached_record()
            .await?
            .filter(|record| !record.token.is_empty())
            .filter(|record| record.is_fresh(now, self.config.expire_advance))
            .map(|record| record.token))
    }

    async fn refresh_locked(&self) -> Result<String, CredentialError> {
        if let Some(token) = self.fresh_token().await? {
            info!("access token was refreshed while waiting for the lock");
            return Ok(token);
        }

        let now = self.clock.now_secs();
        let started = Instant::now();
        let issued = self
            .issuer
            .issue()
            .await
            .inspect_err(|err| error!(error = %err, "access token issuance failed"))?;
        if issued.token.is_empty() || issued.expires_in_secs <= 0 {
            error!(
                expires_in = issued.expires_in_secs,
                "issuer returned an unusable access token"
            );
            return Err(CredentialError::Issuer(
                "issuer returned an empty token or non-positive lifetime".to_string(),
            ));
        }

        let expires_at = now.saturating_add(issued.expires_in_secs);
        let ttl = Duration::from_secs(issued.expires_in_secs.unsigned_abs()) + self.config.grace;
        self.store
            .set_many(
                &[
                    (self.config.token_key.clone(), issued.token.clone()),
                    (self.config.expires_key.clone(), expires_at.to_string()),
                ],
                ttl,
            )
            .await?;
        info!(
            expires_in = issued.expires_in_secs,
            issue_ms = started.elapsed().as_millis() as u64,
            "stored refreshed access token"
        );
        Ok(issued.token)
    }

    async fn release(&self, lease: LockLease) {
        match self.lock.release(lease).await {
            Ok(true) => debug!(lock_key = %self.lock.key(), "access token lock released"),
            Ok(false) => warn!(
                lock_key = %self.lock.key(),
                "access token lock had already lapsed or changed owner"
            ),
            Err(err) => error!(
                lock_key = %self.lock.key(),
                error = %err,
                "failed to release access token lock, relying on its ttl"
            ),
        }
    }
}
