use std::time::Duration;

use mpbridge_domain::ports::BoxFuture;
use mpbridge_domain::ports::credentials::{CredentialError, CredentialIssuer, IssuedCredential};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::AppConfig;

const ISSUE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

/// Issues access tokens from the platform's client-credential endpoint.
#[derive(Debug, Clone)]
pub struct HttpCredentialIssuer {
    http: reqwest::Client,
    token_url: String,
    app_id: String,
    app_secret: String,
}

impl HttpCredentialIssuer {
    pub fn new(
        token_url: impl Into<String>,
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(ISSUE_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            token_url: token_url.into(),
            app_id: app_id.into(),
            app_secret: app_secret.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.access_token_url.trim(),
            config.app_id.trim(),
            config.app_secret.trim(),
        )
    }

    async fn request(&self) -> Result<IssuedCredential, CredentialError> {
        if self.app_id.is_empty() || self.app_secret.is_empty() {
            return Err(CredentialError::Issuer(
                "platform app id and secret are not configured".to_string(),
            ));
        }

        let response = self
            .http
            .get(&self.token_url)
            .query(&[
                ("grant_type", "client_credential"),
                ("appid", self.app_id.as_str()),
                ("secret", self.app_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|err| CredentialError::Issuer(format!("token request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::Issuer(format!(
                "status {}: {body}",
                status.as_u16()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|err| CredentialError::Issuer(format!("invalid token response: {err}")))?;

        if body.errcode != 0 {
            warn!(errcode = body.errcode, errmsg = %body.errmsg, "token endpoint rejected the request");
            return Err(CredentialError::Issuer(format!(
                "errcode {}: {}",
                body.errcode, body.errmsg
            )));
        }

        match (body.access_token, body.expires_in) {
            (Some(token), Some(expires_in_secs)) => {
                info!(expires_in = expires_in_secs, "access token issued");
                Ok(IssuedCredential {
                    token,
                    expires_in_secs,
                })
            }
            _ => Err(CredentialError::Issuer(
                "token response is missing access_token or expires_in".to_string(),
            )),
        }
    }
}

impl CredentialIssuer for HttpCredentialIssuer {
    fn issue(&self) -> BoxFuture<'_, Result<IssuedCredential, CredentialError>> {
        Box::pin(self.request())
    }
}
