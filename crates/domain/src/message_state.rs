use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ports::cache::{CacheError, KvStore};

/// Where a sender's reply lifecycle stands. Persisted as its numeric code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessageStatus {
    #[default]
    Idle,
    Pending,
    Escalated,
    /// Reserved for chunked replies; no transition reaches it yet.
    Segmented,
}

impl From<MessageStatus> for u8 {
    fn from(status: MessageStatus) -> Self {
        match status {
            MessageStatus::Idle => 0,
            MessageStatus::Pending => 1,
            MessageStatus::Escalated => 2,
            MessageStatus::Segmented => 3,
        }
    }
}

impl TryFrom<u8> for MessageStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Idle),
            1 => Ok(Self::Pending),
            2 => Ok(Self::Escalated),
            3 => Ok(Self::Segmented),
            other => Err(format!("unknown message status {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum VoiceStatus {
    #[default]
    Idle,
    Recognizing,
}

impl From<VoiceStatus> for u8 {
    fn from(status: VoiceStatus) -> Self {
        match status {
            VoiceStatus::Idle => 0,
            VoiceStatus::Recognizing => 1,
        }
    }
}

impl TryFrom<u8> for VoiceStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Idle),
            1 => Ok(Self::Recognizing),
            other => Err(format!("unknown voice status {other}")),
        }
    }
}

/// Per-sender lifecycle record shared by every delivery of one logical message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageState {
    pub status: MessageStatus,
    pub voice_status: VoiceStatus,
    /// Finished reply; empty until the generation completes.
    pub msg_content: String,
    pub original_query: String,
    /// Recognized voice text; empty until recognition completes.
    pub voice_text: String,
    /// Epoch millis at which the current measurement window began.
    pub first_timestamp: i64,
    pub parts: Vec<String>,
}

impl MessageState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_reply(&self) -> bool {
        !self.msg_content.is_empty()
    }

    pub fn has_voice_text(&self) -> bool {
        !self.voice_text.is_empty()
    }

    pub fn encode(&self) -> Result<String, CacheError> {
        serde_json::to_string(self).map_err(|err| CacheError::Serialization(err.to_string()))
    }

    pub fn decode(raw: &str) -> Result<Self, CacheError> {
        serde_json::from_str(raw).map_err(|err| CacheError::Serialization(err.to_string()))
    }
}

/// A state as read from the cache together with its exact stored encoding,
/// which conditional writes compare against.
#[derive(Clone, Debug)]
pub struct LoadedState {
    pub state: MessageState,
    pub raw: String,
}

impl LoadedState {
    /// Pairs `state` with the exact encoding a write of it leaves in the cache.
    pub fn encoded(state: MessageState) -> Result<Self, CacheError> {
        let raw = state.encode()?;
        Ok(Self { state, raw })
    }
}

/// Typed access to per-sender `MessageState` entries.
#[derive(Clone)]
pub struct MessageStateStore {
    store: Arc<dyn KvStore>,
    prefix: String,
    ttl: Duration,
}

impl MessageStateStore {
    pub fn new(store: Arc<dyn KvStore>, prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            ttl,
        }
    }

    pub fn key(&self, sender_id: &str) -> String {
        format!("{}:{sender_id}", self.prefix)
    }

    pub async fn load(&self, sender_id: &str) -> Result<Option<LoadedState>, CacheError> {
        let Some(raw) = self.store.get(&self.key(sender_id)).await? else {
            return Ok(None);
        };
        let state = MessageState::decode(&raw)?;
        Ok(Some(LoadedState { state, raw }))
    }

    pub async fn save(&self, sender_id: &str, state: &MessageState) -> Result<(), CacheError> {
        let payload = state.encode()?;
        self.store
            .set(&self.key(sender_id), &payload, self.ttl)
            .await
    }

    /// Writes `state` only if the sender has no live entry.
    pub async fn claim(&self, sender_id: &str, state: &MessageState) -> Result<bool, CacheError> {
        let payload = state.encode()?;
        self.store
            .set_if_absent(&self.key(sender_id), &payload, self.ttl)
            .await
    }

    /// Replaces the entry only if it is still exactly `current`.
    pub async fn swap(
        &self,
        sender_id: &str,
        current: &LoadedState,
        next: &MessageState,
    ) -> Result<bool, CacheError> {
        let payload = next.encode()?;
        self.store
            .compare_and_swap(&self.key(sender_id), &current.raw, &payload, self.ttl)
            .await
    }

    /// Deletes the entry only if it is still exactly `current`.
    pub async fn take(&self, sender_id: &str, current: &LoadedState) -> Result<bool, CacheError> {
        self.store
            .compare_and_delete(&self.key(sender_id), &current.raw)
            .await
    }

    pub async fn delete(&self, sender_id: &str) -> Result<(), CacheError> {
        self.store.delete(&self.key(sender_id)).await
    }
}
