use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("media unavailable: {0}")]
    Media(String),
    #[error("speech recognition failed: {0}")]
    Recognition(String),
}

/// Turns a platform media reference (a voice message) into recognized text.
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, media_ref: &str) -> BoxFuture<'_, Result<String, TranscriptionError>>;
}
