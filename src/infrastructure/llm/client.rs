//! HTTP LLM client implementation.
//!
//! Speaks the internal gateway chat contract: POST `{base_url}/v1/chat` with
//! the provider-agnostic request, bearer-authenticated with the per-call key
//! secret. Retry, key selection and conversation state live in the router;
//! this client only maps transport outcomes to classified errors.

use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, StatusCode};
use std::time::Duration;

use crate::domain::ports::{ChatRequest, LlmClient, LlmClientError, ProviderResponse};

#[derive(Debug, Clone)]
pub struct HttpLlmClientConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for HttpLlmClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8811".to_string(),
            timeout_secs: 120,
        }
    }
}

pub struct HttpLlmClient {
    http_client: ReqwestClient,
    base_url: String,
}

impl HttpLlmClient {
    pub fn new(config: HttpLlmClientConfig) -> Result<Self, LlmClientError> {
        let http_client = ReqwestClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| LlmClientError::NonRetryable(format!("client build failed: {e}")))?;
        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn classify_status(status: StatusCode, body: String) -> LlmClientError {
        match status.as_u16() {
            429 => LlmClientError::RateLimited(body),
            500 | 502 | 503 | 504 | 529 => {
                LlmClientError::Transient(format!("{status}: {body}"))
            }
            _ => LlmClientError::NonRetryable(format!("{status}: {body}")),
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat(
        &self,
        request: ChatRequest,
        api_secret: &str,
    ) -> Result<ProviderResponse, LlmClientError> {
        let response = self
            .http_client
            .post(format!("{}/v1/chat", self.base_url))
            .bearer_auth(api_secret)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    LlmClientError::Transient(format!("network error: {e}"))
                } else {
                    LlmClientError::NonRetryable(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(Self::classify_status(status, body));
        }

        response
            .json::<ProviderResponse>()
            .await
            .map_err(|e| LlmClientError::NonRetryable(format!("malformed response: {e}")))
    }
}
