//! LLM error types

use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors from talking to a chat-completions provider
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider rate limited the request (retry after {retry_after:?})")]
    RateLimited { retry_after: Duration },

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unusable provider answer: {0}")]
    InvalidResponse(String),

    #[error("unknown LLM provider '{0}' (supported: openai, groq)")]
    UnknownProvider(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl LlmError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. })
    }

    /// Whether the same request could succeed if sent again
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } | LlmError::Network(_) => true,
            LlmError::Status { status, .. } => *status == 408 || *status >= 500,
            LlmError::InvalidResponse(_) | LlmError::UnknownProvider(_) | LlmError::Config(_) => false,
        }
    }
}
