use std::sync::Arc;

use mpbridge_domain::credentials::CredentialManager;
use mpbridge_domain::ports::cache::{CacheError, KvStore};
use mpbridge_domain::reply::ReplyCoordinator;
use tracing::info;

use crate::config::AppConfig;
use crate::generation::ChatCompletionGateway;
use crate::platform_api::PlatformApiClient;
use crate::redis_store::RedisKvStore;
use crate::token_issuer::HttpCredentialIssuer;
use crate::transcriber::HttpTranscriber;

/// Everything a process needs to answer deliveries and call the platform,
/// wired over one shared cache.
#[derive(Clone)]
pub struct BridgeServices {
    pub credentials: CredentialManager,
    pub replies: ReplyCoordinator,
    pub platform: PlatformApiClient,
}

impl BridgeServices {
    pub async fn connect(config: &AppConfig) -> Result<Self, CacheError> {
        let store = RedisKvStore::connect(&config.redis_url).await?;
        info!("connected to redis");
        Ok(Self::with_store(config, Arc::new(store)))
    }

    pub fn with_store(config: &AppConfig, store: Arc<dyn KvStore>) -> Self {
        let credentials = CredentialManager::new(
            store.clone(),
            Arc::new(HttpCredentialIssuer::from_config(config)),
            config.credential_config(),
        );
        let mut replies = ReplyCoordinator::new(
            store.clone(),
            Arc::new(ChatCompletionGateway::from_config(config)),
            config.reply_config(),
        );
        if config.speech_enabled() {
            replies = replies.with_transcriber(Arc::new(HttpTranscriber::from_config(config)));
        }
        let platform = PlatformApiClient::from_config(config, credentials.clone());

        Self {
            credentials,
            replies,
            platform,
        }
    }
}
