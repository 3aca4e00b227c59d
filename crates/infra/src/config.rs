use std::time::Duration;

use mpbridge_domain::credentials::CredentialConfig;
use mpbridge_domain::reply::ReplyConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub log_level: String,
    pub redis_url: String,
    pub key_prefix: String,
    pub app_id: String,
    pub app_secret: String,
    pub access_token_url: String,
    pub platform_api_base: String,
    pub platform_timeout_ms: u64,
    pub llm_api_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    pub llm_system_prompt: String,
    pub llm_timeout_ms: u64,
    pub speech_service_url: String,
    pub speech_app_id: String,
    pub speech_token: String,
    pub speech_cluster: String,
    pub speech_poll_interval_ms: u64,
    pub speech_max_wait_secs: u64,
    pub reply_per_attempt_timeout_ms: u64,
    pub reply_total_timeout_ms: u64,
    pub reply_poll_interval_ms: u64,
    pub message_state_ttl_secs: u64,
    pub token_expire_advance_secs: u64,
    pub token_lock_ttl_ms: u64,
    pub token_cache_grace_secs: u64,
    pub token_lock_retry_attempts: u32,
    pub token_refresh_interval_secs: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("log_level", "info")?
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default("key_prefix", "mpbridge")?
            .set_default("app_id", "")?
            .set_default("app_secret", "")?
            .set_default("access_token_url", "https://api.weixin.qq.com/cgi-bin/token")?
            .set_default("platform_api_base", "https://api.weixin.qq.com/cgi-bin")?
            .set_default("platform_timeout_ms", 10_000)?
            .set_default("llm_api_url", "https://api.deepseek.com")?
            .set_default("llm_api_key", "")?
            .set_default("llm_model", "deepseek-chat")?
            .set_default("llm_temperature", 1.3)?
            .set_default("llm_max_tokens", 8192)?
            .set_default("llm_system_prompt", "You are a helpful assistant.")?
            .set_default("llm_timeout_ms", 60_000)?
            .set_default("speech_service_url", "")?
            .set_default("speech_app_id", "")?
            .set_default("speech_token", "")?
            .set_default("speech_cluster", "volc_auc_common")?
            .set_default("speech_poll_interval_ms", 1_500)?
            .set_default("speech_max_wait_secs", 300)?
            .set_default("reply_per_attempt_timeout_ms", 4_000)?
            .set_default("reply_total_timeout_ms", 12_500)?
            .set_default("reply_poll_interval_ms", 1_000)?
            .set_default("message_state_ttl_secs", 300)?
            .set_default("token_expire_advance_secs", 300)?
            .set_default("token_lock_ttl_ms", 5_000)?
            .set_default("token_cache_grace_secs", 600)?
            .set_default("token_lock_retry_attempts", 20)?
            .set_default("token_refresh_interval_secs", 5_400)?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn reply_config(&self) -> ReplyConfig {
        ReplyConfig {
            key_prefix: format!("{}:msg", self.key_prefix),
            per_attempt_timeout: Duration::from_millis(self.reply_per_attempt_timeout_ms),
            total_timeout: Duration::from_millis(self.reply_total_timeout_ms),
            poll_interval: Duration::from_millis(self.reply_poll_interval_ms.max(1)),
            state_ttl: Duration::from_secs(self.message_state_ttl_secs),
            ..ReplyConfig::default()
        }
    }

    pub fn credential_config(&self) -> CredentialConfig {
        CredentialConfig {
            expire_advance: Duration::from_secs(self.token_expire_advance_secs),
            lock_ttl: Duration::from_millis(self.token_lock_ttl_ms.max(1)),
            grace: Duration::from_secs(self.token_cache_grace_secs),
            lock_retry_attempts: self.token_lock_retry_attempts.max(1),
            ..CredentialConfig::with_prefix(&self.key_prefix)
        }
    }

    pub fn token_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.token_refresh_interval_secs.max(1))
    }

    pub fn speech_enabled(&self) -> bool {
        !self.speech_service_url.trim().is_empty()
    }
}
