use std::time::Duration;

use mpbridge_domain::credentials::CredentialManager;
use mpbridge_domain::ports::credentials::CredentialError;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::AppConfig;

/// `errcode`s meaning the access token was rejected as invalid or expired.
const TOKEN_REJECTED_CODES: [i64; 4] = [40001, 40014, 42001, 42007];

#[derive(Debug, thiserror::Error)]
pub enum PlatformApiError {
    #[error("access token unavailable: {0}")]
    Credential(#[from] CredentialError),
    #[error("platform transport error: {0}")]
    Transport(String),
    #[error("platform response decode error: {0}")]
    InvalidResponse(String),
    #[error("platform api error {code}: {message}")]
    Api { code: i64, message: String },
}

#[derive(Debug, Clone)]
enum Call<'a> {
    Get(&'a [(String, String)]),
    Post(&'a Value),
}

impl Call<'_> {
    fn method(&self) -> &'static str {
        match self {
            Call::Get(_) => "GET",
            Call::Post(_) => "POST",
        }
    }
}

/// Client for the platform's token-authenticated API.
#[derive(Clone)]
pub struct PlatformApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: CredentialManager,
}

impl PlatformApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration, credentials: CredentialManager) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn from_config(config: &AppConfig, credentials: CredentialManager) -> Self {
        Self::new(
            config.platform_api_base.trim(),
            Duration::from_millis(config.platform_timeout_ms.max(1)),
            credentials,
        )
    }

    pub async fn get(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<Value, PlatformApiError> {
        self.call(path, Call::Get(params)).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, PlatformApiError> {
        self.call(path, Call::Post(body)).await
    }

    /// One page of followers, starting after `next_openid` when given.
    pub async fn user_list(&self, next_openid: Option<&str>) -> Result<Value, PlatformApiError> {
        let params: Vec<(String, String)> = next_openid
            .filter(|openid| !openid.is_empty())
            .map(|openid| vec![("next_openid".to_string(), openid.to_string())])
            .unwrap_or_default();
        self.get("user/get", &params).await
    }

    pub async fn send_template_message(&self, message: &Value) -> Result<Value, PlatformApiError> {
        self.post("message/template/send", message).await
    }

    async fn call(&self, path: &str, call: Call<'_>) -> Result<Value, PlatformApiError> {
        let token = self.credentials.get_credential().await?;
        match self.send(path, &call, &token).await? {
            Ok(body) => Ok(body),
            Err((code, _)) if TOKEN_REJECTED_CODES.contains(&code) => {
                warn!(path, code, "access token rejected by the platform, forcing a refresh");
                let token = self.credentials.force_refresh().await?;
                self.send(path, &call, &token)
                    .await?
                    .map_err(|(code, message)| {
                        warn!(path, code, message = %message, "platform call failed after token refresh");
                        PlatformApiError::Api { code, message }
                    })
            }
            Err((code, message)) => {
                warn!(path, code, message = %message, "platform api returned an error");
                Err(PlatformApiError::Api { code, message })
            }
        }
    }

    /// Returns the body, or the platform's `(errcode, errmsg)` when it is non-zero.
    async fn send(
        &self,
        path: &str,
        call: &Call<'_>,
        token: &str,
    ) -> Result<Result<Value, (i64, String)>, PlatformApiError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let request = match call {
            Call::Get(params) => self.http.get(&url).query(params),
            Call::Post(body) => self.http.post(&url).json(body),
        }
        .query(&[("access_token", token)]);

        info!(method = call.method(), path, "calling platform api");
        let response = request
            .send()
            .await
            .map_err(|err| PlatformApiError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PlatformApiError::Transport(format!(
                "status {}: {message}",
                status.as_u16()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|err| PlatformApiError::InvalidResponse(err.to_string()))?;

        let code = body.get("errcode").and_then(Value::as_i64).unwrap_or(0);
        if code == 0 {
            return Ok(Ok(body));
        }
        let message = body
            .get("errmsg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Err((code, message)))
    }
}
