//! Reply coordination across repeated webhook deliveries.
//!
//! The messaging platform redelivers an unanswered message a bounded number
//! of times, each delivery with a short synchronous deadline. All deliveries
//! of one logical message share a per-sender `MessageState` in the cache, and
//! only the delivery that claims the lifecycle invokes the generation backend.
//! Every other delivery polls the shared state for the finished reply.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinError;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, error, info, warn};

use crate::message_state::{
    LoadedState, MessageState, MessageStateStore, MessageStatus, VoiceStatus,
};
use crate::ports::cache::{CacheError, KvStore};
use crate::ports::clock::{Clock, SystemClock};
use crate::ports::generation::{GenerationError, GenerationGateway};
use crate::ports::transcription::Transcriber;
use crate::util::duration_ms;

pub const DEFAULT_FAILURE_REPLY: &str =
    "Sorry, the assistant ran into a problem. Please try again in a moment.";
pub const DEFAULT_EMPTY_REPLY: &str = "I'm still learning and can't answer that yet.";
pub const DEFAULT_RETRY_LATER_REPLY: &str =
    "The answer is taking a little longer than usual. Send any message in a moment to receive it.";
pub const DEFAULT_VOICE_FAILURE_REPLY: &str =
    "Sorry, your voice message could not be recognized. Please try again.";

#[derive(Clone, Debug)]
pub struct ReplyConfig {
    pub key_prefix: String,
    /// Budget for answering a single delivery. Must stay under the platform's
    /// per-delivery deadline.
    pub per_attempt_timeout: Duration,
    /// Budget across all deliveries of one message, measured from the first.
    pub total_timeout: Duration,
    pub poll_interval: Duration,
    /// Lifetime of an abandoned `MessageState`.
    pub state_ttl: Duration,
    pub failure_reply: String,
    pub empty_reply: String,
    pub retry_later_reply: String,
    pub voice_failure_reply: String,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            key_prefix: "mpbridge:msg".to_string(),
            per_attempt_timeout: Duration::from_millis(4_000),
            total_timeout: Duration::from_millis(12_500),
            poll_interval: Duration::from_millis(1_000),
            state_ttl: Duration::from_secs(300),
            failure_reply: DEFAULT_FAILURE_REPLY.to_string(),
            empty_reply: DEFAULT_EMPTY_REPLY.to_string(),
            retry_later_reply: DEFAULT_RETRY_LATER_REPLY.to_string(),
            voice_failure_reply: DEFAULT_VOICE_FAILURE_REPLY.to_string(),
        }
    }
}

/// What a single delivery should answer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// The finished reply, including fixed texts for backend failures.
    Reply(String),
    /// The total budget ran out; ask the sender to come back for the answer.
    RetryLater(String),
    /// Answer nothing and let the platform redeliver.
    NoReply,
}

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PromptSource {
    Typed,
    Voice,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WindowClose {
    /// Text lifecycle: mark the state `Escalated`.
    Escalate,
    /// Voice recognition: only restart the measurement window.
    Restart,
}

#[derive(Clone)]
pub struct ReplyCoordinator {
    states: MessageStateStore,
    gateway: Arc<dyn GenerationGateway>,
    transcriber: Option<Arc<dyn Transcriber>>,
    clock: Arc<dyn Clock>,
    config: ReplyConfig,
}

impl ReplyCoordinator {
    pub fn new(
        store: Arc<dyn KvStore>,
        gateway: Arc<dyn GenerationGateway>,
        config: ReplyConfig,
    ) -> Self {
        let states = MessageStateStore::new(store, config.key_prefix.clone(), config.state_ttl);
        Self {
            states,
            gateway,
            transcriber: None,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn states(&self) -> &MessageStateStore {
        &self.states
    }

    /// Handles one delivery of a text message from `sender_id`.
    pub async fn handle_text(
        &self,
        sender_id: &str,
        prompt: &str,
    ) -> Result<ReplyOutcome, ReplyError> {
        self.process_text(sender_id, prompt, PromptSource::Typed, Duration::ZERO)
            .await
    }

    /// Handles one delivery of a voice message: recognize it once, then treat
    /// the recognized text like a typed prompt.
    pub async fn handle_voice(
        &self,
        sender_id: &str,
        media_ref: &str,
    ) -> Result<ReplyOutcome, ReplyError> {
        let started = Instant::now();
        let current = self.states.load(sender_id).await?;

        if let Some(loaded) = &current {
            if loaded.state.has_voice_text() {
                let prompt = loaded.state.voice_text.clone();
                return self
                    .process_text(sender_id, &prompt, PromptSource::Voice, Duration::ZERO)
                    .await;
            }
            if loaded.state.voice_status == VoiceStatus::Recognizing {
                return self
                    .poll_voice(sender_id, started, self.config.per_attempt_timeout)
                    .await;
            }
            if loaded.state.status != MessageStatus::Idle {
                debug!(sender_id, "voice delivery joins the running lifecycle");
                return self.poll_reply(sender_id, started, self.config.per_attempt_timeout).await;
            }
        }

        let mut claimed = current
            .as_ref()
            .map(|loaded| loaded.state.clone())
            .unwrap_or_default();
        claimed.voice_status = VoiceStatus::Recognizing;
        claimed.first_timestamp = self.clock.now_ms();

        let won = match &current {
            None => self.states.claim(sender_id, &claimed).await?,
            Some(loaded) => self.states.swap(sender_id, loaded, &claimed).await?,
        };
        if !won {
            debug!(sender_id, "another delivery claimed voice recognition");
            return self
                .poll_voice(sender_id, started, self.config.per_attempt_timeout)
                .await;
        }

        self.recognize(sender_id, media_ref, claimed, started).await
    }

    async fn process_text(
        &self,
        sender_id: &str,
        prompt: &str,
        source: PromptSource,
        spent: Duration,
    ) -> Result<ReplyOutcome, ReplyError> {
        let started = Instant::now();
        let window = self.config.per_attempt_timeout.saturating_sub(spent);
        let current = self.states.load(sender_id).await?;

        let claim_from = match &current {
            None => None,
            Some(loaded) => match loaded.state.status {
                MessageStatus::Idle if loaded.state.voice_status == VoiceStatus::Recognizing => {
                    debug!(sender_id, "voice recognition in progress, waiting for it");
                    return self.poll_voice(sender_id, started, window).await;
                }
                MessageStatus::Idle => Some(loaded),
                MessageStatus::Pending | MessageStatus::Escalated => {
                    return self.poll_reply(sender_id, started, window).await;
                }
                MessageStatus::Segmented => {
                    debug!(sender_id, "segmented delivery is not supported, not replying");
                    return Ok(ReplyOutcome::NoReply);
                }
            },
        };

        let mut claimed = claim_from
            .map(|loaded| loaded.state.clone())
            .unwrap_or_default();
        claimed.status = MessageStatus::Pending;
        claimed.original_query = prompt.to_string();
        if source == PromptSource::Typed || claim_from.is_none() {
            claimed.first_timestamp = self.clock.now_ms();
        }

        let won = match claim_from {
            None => self.states.claim(sender_id, &claimed).await?,
            Some(loaded) => self.states.swap(sender_id, loaded, &claimed).await?,
        };
        if !won {
            debug!(sender_id, "lifecycle claimed by a concurrent delivery, polling");
            return self.poll_reply(sender_id, started, window).await;
        }

        self.generate(sender_id, prompt, started + window).await
    }

    /// Runs the generation for a lifecycle this delivery has claimed.
    ///
    /// When the backend outlives the delivery's window, the generation keeps
    /// running detached and stores its reply for a later delivery to pick up.
    async fn generate(
        &self,
        sender_id: &str,
        prompt: &str,
        deadline: Instant,
    ) -> Result<ReplyOutcome, ReplyError> {
        info!(sender_id, "invoking generation backend");
        let gateway = self.gateway.clone();
        let owned_prompt = prompt.to_string();
        let mut generation = tokio::spawn(async move { gateway.generate(&owned_prompt).await });

        match timeout_at(deadline, &mut generation).await {
            Ok(joined) => {
                let text = self.reply_text(sender_id, joined);
                self.states.delete(sender_id).await?;
                info!(sender_id, "reply delivered within the first delivery");
                Ok(ReplyOutcome::Reply(text))
            }
            Err(_) => {
                info!(sender_id, "generation outlived the delivery window, deferring the reply");
                let coordinator = self.clone();
                let sender_id = sender_id.to_string();
                let prompt = prompt.to_string();
                tokio::spawn(async move {
                    let text = coordinator.reply_text(&sender_id, generation.await);
                    if let Err(err) = coordinator.store_late_reply(&sender_id, &prompt, text).await {
                        error!(sender_id = %sender_id, error = %err, "failed to store deferred reply");
                    }
                });
                Ok(ReplyOutcome::NoReply)
            }
        }
    }

    fn reply_text(
        &self,
        sender_id: &str,
        joined: Result<Result<String, GenerationError>, JoinError>,
    ) -> String {
        match joined {
            Ok(Ok(text)) if text.trim().is_empty() => {
                warn!(sender_id, "generation backend returned an empty reply");
                self.config.empty_reply.clone()
            }
            Ok(Ok(text)) => text,
            Ok(Err(err)) => {
                warn!(sender_id, error = %err, "generation backend failed");
                self.config.failure_reply.clone()
            }
            Err(err) => {
                error!(sender_id, error = %err, "generation task aborted");
                self.config.failure_reply.clone()
            }
        }
    }

    /// Writes the finished reply into whatever the lifecycle has become in the
    /// meantime, retrying when a concurrent delivery moves it.
    async fn store_late_reply(
        &self,
        sender_id: &str,
        prompt: &str,
        text: String,
    ) -> Result<(), CacheError> {
        loop {
            let current = self.states.load(sender_id).await?;
            let mut next = match &current {
                Some(loaded) => loaded.state.clone(),
                None => {
                    warn!(sender_id, "lifecycle expired before the reply was ready, reopening it");
                    MessageState {
                        status: MessageStatus::Pending,
                        first_timestamp: self.clock.now_ms(),
                        ..MessageState::new()
                    }
                }
            };
            next.msg_content = text.clone();
            next.original_query = prompt.to_string();

            let stored = match &current {
                Some(loaded) => self.states.swap(sender_id, loaded, &next).await?,
                None => self.states.claim(sender_id, &next).await?,
            };
            if stored {
                info!(sender_id, status = ?next.status, "stored deferred reply");
                return Ok(());
            }
            debug!(sender_id, "lifecycle changed while storing the deferred reply, retrying");
        }
    }

    /// Waits up to `window` for the claiming delivery to store the reply.
    async fn poll_reply(
        &self,
        sender_id: &str,
        started: Instant,
        window: Duration,
    ) -> Result<ReplyOutcome, ReplyError> {
        let deadline = started + window;
        loop {
            let Some(loaded) = self.states.load(sender_id).await? else {
                debug!(sender_id, "lifecycle already closed, not replying");
                return Ok(ReplyOutcome::NoReply);
            };
            if loaded.state.has_reply() {
                return self.take_reply(sender_id, &loaded).await;
            }

            let now = Instant::now();
            if now >= deadline {
                return self
                    .close_window(sender_id, loaded, WindowClose::Escalate)
                    .await;
            }
            debug!(
                sender_id,
                waited_ms = duration_ms(now - started),
                "reply not ready yet"
            );
            sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    /// Hands out the stored reply exactly once, even to concurrent pollers.
    async fn take_reply(
        &self,
        sender_id: &str,
        loaded: &LoadedState,
    ) -> Result<ReplyOutcome, ReplyError> {
        if self.states.take(sender_id, loaded).await? {
            info!(sender_id, "deferred reply delivered");
            Ok(ReplyOutcome::Reply(loaded.state.msg_content.clone()))
        } else {
            debug!(sender_id, "deferred reply taken by a concurrent delivery");
            Ok(ReplyOutcome::NoReply)
        }
    }

    async fn close_window(
        &self,
        sender_id: &str,
        loaded: LoadedState,
        close: WindowClose,
    ) -> Result<ReplyOutcome, ReplyError> {
        let now = self.clock.now_ms();
        let elapsed = now - loaded.state.first_timestamp;
        if elapsed < duration_ms(self.config.total_timeout) {
            debug!(sender_id, elapsed_ms = elapsed, "delivery window exhausted, awaiting redelivery");
            return Ok(ReplyOutcome::NoReply);
        }

        let mut next = loaded.state.clone();
        if close == WindowClose::Escalate {
            next.status = MessageStatus::Escalated;
        }
        next.first_timestamp = now;
        if self.states.swap(sender_id, &loaded, &next).await? {
            info!(sender_id, elapsed_ms = elapsed, "total reply budget exhausted");
            return Ok(ReplyOutcome::RetryLater(
                self.config.retry_later_reply.clone(),
            ));
        }

        // The state moved while this delivery was deciding; a reply may have landed.
        match self.states.load(sender_id).await? {
            Some(current) if current.state.has_reply() => {
                self.take_reply(sender_id, &current).await
            }
            _ => Ok(ReplyOutcome::NoReply),
        }
    }

    async fn recognize(
        &self,
        sender_id: &str,
        media_ref: &str,
        claimed: MessageState,
        started: Instant,
    ) -> Result<ReplyOutcome, ReplyError> {
        let recognized = match &self.transcriber {
            Some(transcriber) => transcriber
                .transcribe(media_ref)
                .await
                .map_err(|err| err.to_string()),
            None => Err("no transcriber configured".to_string()),
        };
        let mut expected = LoadedState::encoded(claimed)?;

        let text = match recognized {
            Ok(text) if !text.trim().is_empty() => text,
            failed => {
                match failed {
                    Err(err) => warn!(sender_id, error = %err, "voice recognition failed"),
                    Ok(_) => warn!(sender_id, "voice recognition produced no text"),
                }
                loop {
                    if self.states.take(sender_id, &expected).await? {
                        break;
                    }
                    match self.awaiting_recognition(sender_id).await? {
                        Some(current) => expected = current,
                        None => break,
                    }
                }
                return Ok(ReplyOutcome::Reply(self.config.voice_failure_reply.clone()));
            }
        };

        loop {
            let mut next = expected.state.clone();
            next.voice_text = text.clone();
            next.voice_status = VoiceStatus::Idle;
            if self.states.swap(sender_id, &expected, &next).await? {
                break;
            }
            match self.awaiting_recognition(sender_id).await? {
                Some(current) => expected = current,
                None => {
                    debug!(sender_id, "voice lifecycle moved on during recognition, polling");
                    let window = self
                        .config
                        .per_attempt_timeout
                        .saturating_sub(started.elapsed());
                    return self.poll_reply(sender_id, Instant::now(), window).await;
                }
            }
        }

        let spent = started.elapsed();
        info!(sender_id, recognize_ms = duration_ms(spent), "voice message recognized");
        if spent < self.config.per_attempt_timeout {
            self.process_text(sender_id, &text, PromptSource::Voice, spent)
                .await
        } else {
            Ok(ReplyOutcome::NoReply)
        }
    }

    /// The sender's state, if it is still waiting for this voice message's text.
    /// A restarted measurement window changes the entry but not its owner.
    async fn awaiting_recognition(
        &self,
        sender_id: &str,
    ) -> Result<Option<LoadedState>, CacheError> {
        Ok(self.states.load(sender_id).await?.filter(|loaded| {
            loaded.state.voice_status == VoiceStatus::Recognizing && !loaded.state.has_voice_text()
        }))
    }

    /// Waits for a concurrent delivery to finish recognizing the voice message.
    async fn poll_voice(
        &self,
        sender_id: &str,
        started: Instant,
        window: Duration,
    ) -> Result<ReplyOutcome, ReplyError> {
        let deadline = started + window;
        loop {
            let Some(loaded) = self.states.load(sender_id).await? else {
                debug!(sender_id, "voice lifecycle already closed, not replying");
                return Ok(ReplyOutcome::NoReply);
            };
            if loaded.state.has_voice_text() {
                let prompt = loaded.state.voice_text.clone();
                let left = deadline.saturating_duration_since(Instant::now());
                let spent = self.config.per_attempt_timeout.saturating_sub(left);
                return Box::pin(self.process_text(sender_id, &prompt, PromptSource::Voice, spent))
                    .await;
            }

            let now = Instant::now();
            if now >= deadline {
                return self
                    .close_window(sender_id, loaded, WindowClose::Restart)
                    .await;
            }
            sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }
}
