//! Speech recognition through a submit-then-query transcription service.

use std::time::Duration;

use mpbridge_domain::ports::BoxFuture;
use mpbridge_domain::ports::transcription::{Transcriber, TranscriptionError};
use serde::Deserialize;
use serde_json::json;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::config::AppConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const RECOGNIZED: i64 = 1000;
const STILL_WORKING: i64 = 2000;
const SPEECH_USER: &str = "mpbridge";

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    resp: SubmitBody,
}

#[derive(Debug, Deserialize)]
struct SubmitBody {
    id: Option<String>,
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    resp: QueryBody,
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone)]
pub struct HttpTranscriber {
    http: reqwest::Client,
    service_url: String,
    app_id: String,
    token: String,
    cluster: String,
    poll_interval: Duration,
    max_wait: Duration,
}

impl HttpTranscriber {
    pub fn from_config(config: &AppConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            service_url: config
                .speech_service_url
                .trim()
                .trim_end_matches('/')
                .to_string(),
            app_id: config.speech_app_id.clone(),
            token: config.speech_token.clone(),
            cluster: config.speech_cluster.clone(),
            poll_interval: Duration::from_millis(config.speech_poll_interval_ms.max(1)),
            max_wait: Duration::from_secs(config.speech_max_wait_secs),
        }
    }

    async fn post<T>(&self, path: &str, body: serde_json::Value) -> Result<T, TranscriptionError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self
            .http
            .post(format!("{}/{path}", self.service_url))
            .header("Authorization", format!("Bearer; {}", self.token))
            .json(&body)
            .send()
            .await
            .map_err(|err| TranscriptionError::Media(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TranscriptionError::Media(format!(
                "status {}: {message}",
                status.as_u16()
            )));
        }
        response
            .json()
            .await
            .map_err(|err| TranscriptionError::Media(err.to_string()))
    }

    async fn submit(&self, media_ref: &str) -> Result<String, TranscriptionError> {
        let body = json!({
            "app": { "appid": self.app_id, "token": self.token, "cluster": self.cluster },
            "user": { "uid": SPEECH_USER },
            "audio": { "format": "mp3", "url": media_ref },
        });
        let submitted: SubmitResponse = self.post("submit", body).await?;
        submitted.resp.id.ok_or_else(|| {
            TranscriptionError::Media(format!(
                "submit rejected with code {}: {}",
                submitted.resp.code, submitted.resp.message
            ))
        })
    }

    async fn recognize(&self, media_ref: String) -> Result<String, TranscriptionError> {
        let task_id = self.submit(&media_ref).await?;
        debug!(task_id = %task_id, "speech recognition task submitted");
        let started = Instant::now();

        loop {
            sleep(self.poll_interval).await;
            let query = json!({
                "appid": self.app_id,
                "token": self.token,
                "id": task_id,
                "cluster": self.cluster,
            });
            let polled: QueryResponse = self.post("query", query).await?;
            match polled.resp.code {
                RECOGNIZED => {
                    info!(task_id = %task_id, "speech recognized");
                    return Ok(polled.resp.text);
                }
                code if code < STILL_WORKING => {
                    warn!(task_id = %task_id, code, message = %polled.resp.message, "speech recognition failed");
                    return Err(TranscriptionError::Recognition(format!(
                        "code {code}: {}",
                        polled.resp.message
                    )));
                }
                _ => {}
            }

            if started.elapsed() > self.max_wait {
                warn!(task_id = %task_id, "speech recognition timed out");
                return Err(TranscriptionError::Recognition(
                    "recognition did not finish in time".to_string(),
                ));
            }
        }
    }
}

impl Transcriber for HttpTranscriber {
    fn transcribe(&self, media_ref: &str) -> BoxFuture<'_, Result<String, TranscriptionError>> {
        Box::pin(self.recognize(media_ref.to_string()))
    }
}
