pub mod config;
pub mod generation;
pub mod logging;
pub mod platform_api;
pub mod redis_store;
pub mod services;
pub mod token_issuer;
pub mod transcriber;
