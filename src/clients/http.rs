use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ClientConfig, RetryConfig};
use crate::error::{GatewayError, PollError};
use crate::gateway::QuizGateway;
use crate::models::{
    ActivePayload, ActiveRequest, JoinRequest, JoinResponse, Participant, SessionCode, SubmitAck,
    SubmitRequest,
};

/// `QuizGateway` over HTTP/JSON against a configured base URL.
#[derive(Clone, Debug)]
pub struct HttpGateway {
    base_url: String,
    retry: RetryConfig,
    client: Client,
}

impl HttpGateway {
    pub fn new(config: &ClientConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        info!(base_url = %config.base_url, timeout_ms = config.request_timeout.as_millis() as u64, "Creating new HTTP gateway");
        Ok(Self {
            base_url: config.base_url.clone(),
            retry: config.retry.clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<reqwest::Response, GatewayError> {
        let url = self.url(path);
        debug!(%url, "Sending request to quiz server");

        let response = self.client.post(&url).json(body).send().await.map_err(|e| {
            error!(error = %e, %url, "HTTP request failed");
            GatewayError::from(e)
        })?;

        debug!(status = %response.status(), %url, "Received response from quiz server");
        Ok(response)
    }

    async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        error!(status = %status, error = %message, "Quiz server error");
        Err(GatewayError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, GatewayError> {
        response.json::<T>().await.map_err(|e| {
            error!(error = %e, "Failed to parse quiz server response JSON");
            GatewayError::Decode(e.to_string())
        })
    }

    async fn check_active_once(&self, code: &SessionCode) -> Result<ActivePayload, PollError> {
        let response = self
            .post("quizzes/getIfActive", &ActiveRequest { code: code.as_str() })
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            debug!(%code, "Session not active yet");
            return Err(PollError::NotActive);
        }

        let response = Self::expect_success(response).await?;
        let payload: ActivePayload = Self::decode(response).await?;
        Ok(payload)
    }
}

#[async_trait]
impl QuizGateway for HttpGateway {
    #[instrument(target = "quiz_participant::gateway", skip(self, code, name), fields(code = %code))]
    async fn join(&self, code: &SessionCode, name: &str) -> Result<Participant, GatewayError> {
        let response = self
            .post("sessions/join", &JoinRequest { code: code.as_str(), name })
            .await?;
        let response = Self::expect_success(response).await?;
        let joined: JoinResponse = Self::decode(response).await?;

        info!(participant_id = joined.participant.id, "Joined quiz session");
        Ok(joined.participant)
    }

    /// Retries transient failures up to the configured bound; the call is a read.
    #[instrument(target = "quiz_participant::gateway", skip(self, code), fields(code = %code))]
    async fn check_active(&self, code: &SessionCode) -> Result<ActivePayload, PollError> {
        let mut attempt = 0usize;
        loop {
            match self.check_active_once(code).await {
                Err(PollError::Gateway(e)) if e.is_transient() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    warn!(error = %e, attempt, max_retries = self.retry.max_retries, "Activation check failed, retrying");
                    tokio::time::sleep(self.retry.backoff * attempt as u32).await;
                }
                other => return other,
            }
        }
    }

    #[instrument(target = "quiz_participant::gateway", skip(self))]
    async fn submit_answer(
        &self,
        participant_id: i64,
        question_id: i64,
        option_id: i64,
    ) -> Result<SubmitAck, GatewayError> {
        let request = SubmitRequest {
            participant_id,
            question_id,
            selected_option_id: option_id,
        };
        let response = self.post("results", &request).await?;
        let response = Self::expect_success(response).await?;

        // Some servers answer 201 with an empty body.
        let body = response.text().await.map_err(GatewayError::from)?;
        let ack = if body.trim().is_empty() {
            SubmitAck(serde_json::Value::Null)
        } else {
            serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()))?
        };

        info!("Answer accepted by server");
        Ok(ack)
    }
}
