//! Inference gateway boundary
//!
//! The pipeline only ever sees the `InferenceGateway` trait: prompt in,
//! completion text out. `HttpGateway` is the production implementation for
//! OpenAI-compatible endpoints, with a per-request timeout and bounded
//! exponential backoff on transient failures. Tests script their own
//! implementations instead.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::GatewayConfig;

/// One completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// System prompt, omitted when None
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, temperature: f64) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            temperature,
            max_tokens: 4096,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Completion backend seam
///
/// Implementations must be safe to share across the worker tasks.
#[async_trait]
pub trait InferenceGateway: Send + Sync {
    /// Produce a completion for the request
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

#[cfg(feature = "http-gateway")]
pub use http::HttpGateway;

#[cfg(feature = "http-gateway")]
mod http {
    use super::*;
    use crate::error::CrucibleError;
    use rand::Rng;
    use std::time::Duration;
    use tracing::{debug, warn};

    #[derive(Serialize)]
    struct ChatMessage<'a> {
        role: &'a str,
        content: &'a str,
    }

    #[derive(Serialize)]
    struct ChatRequest<'a> {
        model: &'a str,
        messages: Vec<ChatMessage<'a>>,
        temperature: f64,
        max_tokens: u32,
    }

    #[derive(Deserialize)]
    struct ChatResponse {
        choices: Vec<ChatChoice>,
    }

    #[derive(Deserialize)]
    struct ChatChoice {
        message: ChatResponseMessage,
    }

    #[derive(Deserialize)]
    struct ChatResponseMessage {
        content: String,
    }

    /// OpenAI-compatible chat completions client
    pub struct HttpGateway {
        config: GatewayConfig,
        client: reqwest::Client,
    }

    impl HttpGateway {
        pub fn new(config: GatewayConfig) -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(config.request_timeout)
                .build()?;
            Ok(Self { config, client })
        }

        async fn attempt(&self, request: &CompletionRequest) -> Result<String> {
            let mut messages = Vec::new();
            if let Some(system) = &request.system {
                messages.push(ChatMessage {
                    role: "system",
                    content: system,
                });
            }
            messages.push(ChatMessage {
                role: "user",
                content: &request.prompt,
            });

            let body = ChatRequest {
                model: &self.config.model,
                messages,
                temperature: request.temperature,
                max_tokens: request.max_tokens.min(self.config.max_tokens),
            };

            let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
            let mut builder = self.client.post(&url).json(&body);
            if let Some(key) = &self.config.api_key {
                builder = builder.bearer_auth(key);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    CrucibleError::GatewayTimeout(self.config.request_timeout)
                } else {
                    CrucibleError::Http(e)
                }
            })?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(CrucibleError::Gateway(format!(
                    "endpoint returned {}: {}",
                    status,
                    text.chars().take(200).collect::<String>()
                )));
            }

            let parsed: ChatResponse = response.json().await?;
            parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| CrucibleError::Gateway("empty choices in response".to_string()))
        }

    }

    fn backoff(base: Duration, attempt: u32) -> Duration {
        let delay = base * 2u32.saturating_pow(attempt);
        let jitter = rand::thread_rng().gen_range(0..250);
        delay + Duration::from_millis(jitter)
    }

    /// Retry loop shared by every transport attempt
    ///
    /// Retryable failures back off exponentially until the budget runs out;
    /// anything else surfaces immediately without sleeping.
    async fn retry_with_backoff<F, Fut>(
        max_retries: u32,
        backoff_base: Duration,
        mut attempt: F,
    ) -> Result<String>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<String>>,
    {
        let mut last_err = None;
        for n in 0..=max_retries {
            match attempt().await {
                Ok(text) => {
                    debug!(attempt = n, chars = text.len(), "completion received");
                    return Ok(text);
                }
                Err(e) if e.is_retryable() && n < max_retries => {
                    let delay = backoff(backoff_base, n);
                    warn!(attempt = n, error = %e, delay_ms = delay.as_millis() as u64, "gateway retry");
                    tokio::time::sleep(delay).await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| CrucibleError::Gateway("retries exhausted".to_string())))
    }

    #[async_trait]
    impl InferenceGateway for HttpGateway {
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            retry_with_backoff(self.config.max_retries, self.config.backoff_base, || {
                self.attempt(request)
            })
            .await
        }
    }

}
