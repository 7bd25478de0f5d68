//! Ollama API client implementation
//!
//! Implements the TextGenerator trait against Ollama's non-streaming
//! `/api/generate` endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{GenerateOptions, Generation, LlmError, TextGenerator};
use crate::config::LlmConfig;

/// Maximum number of retries for transient errors
const MAX_RETRIES: u32 = 2;

/// Initial backoff delay for retries
const INITIAL_BACKOFF_MS: u64 = 1000;

const DEEP_TRUTH_SYSTEM: &str = "Answer with blunt candour. Do not hedge, flatter, or soften bad news. \
                                 State uncertainty plainly and name the weakest assumption.";

/// Check if an HTTP status code is retryable
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 500 | 502 | 503 | 504)
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
}

/// Ollama API client
pub struct OllamaClient {
    model: String,
    base_url: String,
    http: Client,
}

impl OllamaClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        debug!(?config, "from_config: called");
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(LlmError::Network)?;

        Ok(Self {
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Build the request body for the Ollama API
    fn build_request_body(&self, prompt: &str, options: &GenerateOptions) -> serde_json::Value {
        debug!(%self.model, "build_request_body: called");
        let mut opts = serde_json::json!({
            "temperature": options.temperature,
            "num_ctx": options.context_size,
        });
        if let Some(threads) = options.thread_hint {
            opts["num_thread"] = threads.into();
        }
        if let Some(gpu) = options.gpu_hint {
            opts["num_gpu"] = gpu.into();
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": opts,
        });
        if options.deep_truth_mode {
            body["system"] = DEEP_TRUTH_SYSTEM.into();
        }
        body
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<Generation, LlmError> {
        debug!(%self.model, prompt_len = prompt.len(), "generate: called");
        let url = format!("{}/api/generate", self.base_url);
        let body = self.build_request_body(prompt, options);

        let mut last_error = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1);
                warn!(attempt, backoff_ms = backoff, "generate: retrying after transient error");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            let response = match self.http.post(url.clone()).json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    debug!(attempt, error = %e, "generate: network error");
                    last_error = Some(LlmError::Network(e));
                    continue;
                }
            };

            let status = response.status().as_u16();
            if is_retryable_status(status) && attempt < MAX_RETRIES {
                let text = response.text().await.unwrap_or_default();
                debug!(attempt, status, "generate: retryable error");
                last_error = Some(LlmError::ApiError { status, message: text });
                continue;
            }

            if !response.status().is_success() {
                debug!(%status, "generate: API error");
                let text = response.text().await.unwrap_or_default();
                return Err(LlmError::ApiError { status, message: text });
            }

            let api_response: OllamaResponse = response.json().await?;
            debug!(content_len = api_response.response.len(), "generate: success");
            return Ok(Generation {
                content: api_response.response,
            });
        }

        Err(last_error.unwrap_or_else(|| LlmError::InvalidResponse("Max retries exceeded".to_string())))
    }
}
