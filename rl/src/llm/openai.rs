//! OpenAI-compatible Chat Completions client
//!
//! Works against OpenAI itself and against compatible endpoints such as Groq
//! (`https://api.groq.com/openai`).

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError, StopReason, TokenUsage};
use crate::config::LlmConfig;

/// Maximum number of retries for transient errors
const MAX_RETRIES: u32 = 3;

/// Initial backoff delay for retries
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Longest server-requested wait honored before giving up on a 429
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(30);

/// Wait assumed when a 429 carries no usable Retry-After header
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// OpenAI-compatible API client
pub struct OpenAIClient {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAIClient {
    /// Create a new client from configuration
    ///
    /// Fails when the API key variable is unset.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        debug!(provider = %config.provider, model = %config.model, "from_config: called");
        let api_key = config.api_key()?;

        let timeout = Duration::from_millis(config.timeout_ms);
        let http = Client::builder().timeout(timeout).build().map_err(LlmError::Network)?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// Build the request body for the Chat Completions API
    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        debug!(%self.model, %request.max_tokens, "build_request_body: called");

        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": request.system_prompt,
        })];
        messages.extend(request.messages.iter().map(|m| {
            serde_json::json!({
                "role": m.role.as_str(),
                "content": m.content,
            })
        }));

        let max_tokens = request.max_tokens.min(self.max_tokens);

        // Reasoning models take max_completion_tokens instead of max_tokens
        let uses_completion_tokens = self.model.starts_with("gpt-5")
            || self.model.starts_with("o1")
            || self.model.starts_with("o3")
            || self.model.contains("gpt-oss");

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature.unwrap_or(self.temperature),
            "stream": false,
        });

        if uses_completion_tokens {
            body["max_completion_tokens"] = serde_json::json!(max_tokens);
        } else {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        body
    }

    /// Parse the API response
    fn parse_response(&self, api_response: OpenAIResponse) -> CompletionResponse {
        debug!(choices = api_response.choices.len(), "parse_response: called");
        let (content, stop_reason) = match api_response.choices.into_iter().next() {
            Some(c) => (c.message.content, StopReason::from_openai(c.finish_reason.as_deref())),
            None => (None, StopReason::EndTurn),
        };

        let usage = api_response
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        CompletionResponse {
            content,
            stop_reason,
            usage,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(%self.model, %request.max_tokens, "complete: called");
        let body = self.build_request_body(&request);

        let mut retries = 0;
        loop {
            let err = match self.send(&body).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };
            if retries >= MAX_RETRIES || !err.is_retryable() {
                debug!(retries, error = %err, "complete: giving up");
                return Err(err);
            }

            let wait = match &err {
                LlmError::RateLimited { retry_after } if *retry_after > MAX_RATE_LIMIT_WAIT => return Err(err),
                LlmError::RateLimited { retry_after } => *retry_after,
                _ => Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(retries)),
            };
            retries += 1;
            warn!(retries, wait_ms = wait.as_millis() as u64, error = %err, "LLM request failed, retrying");
            tokio::time::sleep(wait).await;
        }
    }
}

impl OpenAIClient {
    /// One HTTP round trip, with the status mapped onto [`LlmError`]
    async fn send(&self, body: &serde_json::Value) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self.http.post(url).bearer_auth(&self.api_key).json(body).send().await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            debug!(retry_after, "send: rate limited");
            return Err(LlmError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), "send: error status");
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let api_response: OpenAIResponse = response.json().await?;
        Ok(self.parse_response(api_response))
    }
}

// API response types

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;

    fn client(model: &str, max_tokens: u32) -> OpenAIClient {
        OpenAIClient {
            model: model.to_string(),
            api_key: "test-key".to_string(),
            base_url: "https://api.groq.com/openai".to_string(),
            http: Client::new(),
            max_tokens,
            temperature: 0.8,
        }
    }

    fn request(max_tokens: u32) -> CompletionRequest {
        CompletionRequest {
            system_prompt: "You are helpful".to_string(),
            messages: vec![Message::user("Hello")],
            max_tokens,
            temperature: None,
        }
    }

    #[test]
    fn test_build_request_body_basic() {
        let body = client("gpt-4o", 8192).build_request_body(&request(1000));

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "You are helpful");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "Hello");
    }

    #[test]
    fn test_reasoning_models_use_completion_tokens() {
        let body = client("openai/gpt-oss-120b", 8192).build_request_body(&request(4000));

        assert_eq!(body["max_completion_tokens"], 4000);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_max_tokens_capped() {
        let body = client("gpt-4o", 1000).build_request_body(&request(5000));
        assert_eq!(body["max_tokens"], 1000);
    }

    #[test]
    fn test_request_temperature_overrides_config() {
        let mut req = request(100);
        req.temperature = Some(0.0);
        let body = client("gpt-4o", 1000).build_request_body(&req);
        assert_eq!(body["temperature"], 0.0);
    }

    #[test]
    fn test_parse_response() {
        let api: OpenAIResponse = serde_json::from_value(serde_json::json!({
            "choices": [{
                "message": {"content": "{\"patches\": []}"},
                "finish_reason": "length"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 34}
        }))
        .unwrap();

        let resp = client("gpt-4o", 1000).parse_response(api);
        assert_eq!(resp.content.as_deref(), Some("{\"patches\": []}"));
        assert_eq!(resp.stop_reason, StopReason::MaxTokens);
        assert_eq!(resp.usage.input_tokens, 12);
        assert_eq!(resp.usage.output_tokens, 34);
    }

    #[test]
    fn test_parse_response_without_choices() {
        let api: OpenAIResponse = serde_json::from_value(serde_json::json!({ "choices": [] })).unwrap();

        let resp = client("gpt-4o", 1000).parse_response(api);
        assert!(resp.content.is_none());
        assert_eq!(resp.usage, TokenUsage::default());
    }
}
