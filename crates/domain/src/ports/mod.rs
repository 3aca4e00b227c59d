use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod cache;
pub mod clock;
pub mod credentials;
pub mod generation;
pub mod transcription;
