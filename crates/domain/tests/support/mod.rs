#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mpbridge_domain::kv::InMemoryKvStore;
use mpbridge_domain::ports::BoxFuture;
use mpbridge_domain::ports::cache::{CacheError, KvStore};
use mpbridge_domain::ports::clock::Clock;
use mpbridge_domain::ports::credentials::{CredentialError, CredentialIssuer, IssuedCredential};
use mpbridge_domain::ports::generation::{GenerationError, GenerationGateway};
use mpbridge_domain::ports::transcription::{Transcriber, TranscriptionError};
use tokio::time::{Instant, sleep};

pub const BASE_MS: i64 = 1_700_000_000_000;

pub fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// Wall clock that advances with tokio's (pausable) clock.
pub struct PausedClock {
    origin: Instant,
}

impl PausedClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            origin: Instant::now(),
        })
    }
}

impl Clock for PausedClock {
    fn now_ms(&self) -> i64 {
        BASE_MS + self.origin.elapsed().as_millis() as i64
    }
}

#[derive(Clone)]
enum Script {
    Reply(String),
    Fail,
    Hang,
}

pub struct StubGateway {
    script: Script,
    delay: Duration,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl StubGateway {
    fn with(script: Script, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script,
            delay,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(text: &str, delay: Duration) -> Arc<Self> {
        Self::with(Script::Reply(text.to_string()), delay)
    }

    pub fn failing(delay: Duration) -> Arc<Self> {
        Self::with(Script::Fail, delay)
    }

    pub fn hanging() -> Arc<Self> {
        Self::with(Script::Hang, Duration::ZERO)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl GenerationGateway for StubGateway {
    fn generate(&self, prompt: &str) -> BoxFuture<'_, Result<String, GenerationError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let script = self.script.clone();
        let delay = self.delay;
        Box::pin(async move {
            sleep(delay).await;
            match script {
                Script::Reply(text) => Ok(text),
                Script::Fail => Err(GenerationError::Unavailable("backend down".into())),
                Script::Hang => std::future::pending().await,
            }
        })
    }
}

pub struct StubTranscriber {
    script: Script,
    delay: Duration,
    calls: AtomicUsize,
}

impl StubTranscriber {
    fn with(script: Script, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script,
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn recognizing(text: &str, delay: Duration) -> Arc<Self> {
        Self::with(Script::Reply(text.to_string()), delay)
    }

    pub fn failing() -> Arc<Self> {
        Self::failing_after(Duration::ZERO)
    }

    pub fn failing_after(delay: Duration) -> Arc<Self> {
        Self::with(Script::Fail, delay)
    }

    pub fn hanging() -> Arc<Self> {
        Self::with(Script::Hang, Duration::ZERO)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transcriber for StubTranscriber {
    fn transcribe(&self, _media_ref: &str) -> BoxFuture<'_, Result<String, TranscriptionError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.script.clone();
        let delay = self.delay;
        Box::pin(async move {
            sleep(delay).await;
            match script {
                Script::Reply(text) => Ok(text),
                Script::Fail => Err(TranscriptionError::Recognition("unclear audio".into())),
                Script::Hang => std::future::pending().await,
            }
        })
    }
}

#[derive(Clone, Copy)]
pub enum IssuerMode {
    Issue,
    Fail,
    Empty,
}

pub struct StubIssuer {
    mode: IssuerMode,
    delay: Duration,
    expires_in_secs: i64,
    calls: AtomicUsize,
}

impl StubIssuer {
    pub fn new(mode: IssuerMode, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            mode,
            delay,
            expires_in_secs: 7_200,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CredentialIssuer for StubIssuer {
    fn issue(&self) -> BoxFuture<'_, Result<IssuedCredential, CredentialError>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mode = self.mode;
        let delay = self.delay;
        let expires_in_secs = self.expires_in_secs;
        Box::pin(async move {
            sleep(delay).await;
            match mode {
                IssuerMode::Issue => Ok(IssuedCredential {
                    token: format!("token-{call}"),
                    expires_in_secs,
                }),
                IssuerMode::Fail => Err(CredentialError::Issuer("invalid appsecret".into())),
                IssuerMode::Empty => Ok(IssuedCredential {
                    token: String::new(),
                    expires_in_secs,
                }),
            }
        })
    }
}

/// Cache whose backend is unreachable.
pub struct UnreachableStore;

fn unreachable<T>() -> BoxFuture<'static, Result<T, CacheError>>
where
    T: Send + 'static,
{
    Box::pin(async { Err(CacheError::Unavailable("connection refused".into())) })
}

impl KvStore for UnreachableStore {
    fn get(&self, _key: &str) -> BoxFuture<'_, Result<Option<String>, CacheError>> {
        unreachable()
    }

    fn get_many(&self, _keys: &[String]) -> BoxFuture<'_, Result<Vec<Option<String>>, CacheError>> {
        unreachable()
    }

    fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> BoxFuture<'_, Result<(), CacheError>> {
        unreachable()
    }

    fn delete(&self, _key: &str) -> BoxFuture<'_, Result<(), CacheError>> {
        unreachable()
    }

    fn set_if_absent(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Duration,
    ) -> BoxFuture<'_, Result<bool, CacheError>> {
        unreachable()
    }

    fn compare_and_delete(
        &self,
        _key: &str,
        _expected: &str,
    ) -> BoxFuture<'_, Result<bool, CacheError>> {
        unreachable()
    }

    fn compare_and_swap(
        &self,
        _key: &str,
        _expected: &str,
        _value: &str,
        _ttl: Duration,
    ) -> BoxFuture<'_, Result<bool, CacheError>> {
        unreachable()
    }

    fn set_many(
        &self,
        _entries: &[(String, String)],
        _ttl: Duration,
    ) -> BoxFuture<'_, Result<(), CacheError>> {
        unreachable()
    }

    fn delete_many(&self, _keys: &[String]) -> BoxFuture<'_, Result<(), CacheError>> {
        unreachable()
    }
}

/// In-memory store that lets a test slip one write in ahead of the next
/// compare-and-swap, the way a delivery on another worker would.
pub struct InterleavingStore {
    inner: Arc<InMemoryKvStore>,
    pending_write: Mutex<Option<(String, String)>>,
}

impl InterleavingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(InMemoryKvStore::new()),
            pending_write: Mutex::new(None),
        })
    }

    pub fn write_before_next_swap(&self, key: &str, value: &str) {
        *self.pending_write.lock().unwrap() = Some((key.to_string(), value.to_string()));
    }
}

impl KvStore for InterleavingStore {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>, CacheError>> {
        self.inner.get(key)
    }

    fn get_many(&self, keys: &[String]) -> BoxFuture<'_, Result<Vec<Option<String>>, CacheError>> {
        self.inner.get_many(keys)
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> BoxFuture<'_, Result<(), CacheError>> {
        self.inner.set(key, value, ttl)
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<(), CacheError>> {
        self.inner.delete(key)
    }

    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<bool, CacheError>> {
        self.inner.set_if_absent(key, value, ttl)
    }

    fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
    ) -> BoxFuture<'_, Result<bool, CacheError>> {
        self.inner.compare_and_delete(key, expected)
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<bool, CacheError>> {
        let interleaved = self.pending_write.lock().unwrap().take();
        let key = key.to_string();
        let expected = expected.to_string();
        let value = value.to_string();
        Box::pin(async move {
            if let Some((other_key, other_value)) = interleaved {
                self.inner.set(&other_key, &other_value, ttl).await?;
            }
            self.inner
                .compare_and_swap(&key, &expected, &value, ttl)
                .await
        })
    }

    fn set_many(
        &self,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> BoxFuture<'_, Result<(), CacheError>> {
        self.inner.set_many(entries, ttl)
    }

    fn delete_many(&self, keys: &[String]) -> BoxFuture<'_, Result<(), CacheError>> {
        self.inner.delete_many(keys)
    }
}
