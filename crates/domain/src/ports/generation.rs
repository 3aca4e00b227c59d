use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation backend unavailable: {0}")]
    Unavailable(String),
    #[error("generation backend rejected the request: {0}")]
    Rejected(String),
    #[error("generation response decode error: {0}")]
    InvalidResponse(String),
}

/// Slow text-generation backend. Awaited to completion; partial output is not
/// interpreted.
pub trait GenerationGateway: Send + Sync {
    fn generate(&self, prompt: &str) -> BoxFuture<'_, Result<String, GenerationError>>;
}
