use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::BoxFuture;
use super::cache::CacheError;

/// A freshly issued bearer credential and its server-declared lifetime.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuedCredential {
    pub token: String,
    pub expires_in_secs: i64,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential issuer error: {0}")]
    Issuer(String),
    #[error("credential refresh lock still held after {attempts} attempts")]
    LockContention { attempts: u32 },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

pub trait CredentialIssuer: Send + Sync {
    fn issue(&self) -> BoxFuture<'_, Result<IssuedCredential, CredentialError>>;
}
