//! LlmClient trait definition

use async_trait::async_trait;

use super::{CompletionRequest, CompletionResponse, LlmError};

/// Stateless LLM client - each call is independent (fresh context)
///
/// Each completion request starts a new conversation; no state is carried
/// between calls. Everything an attempt needs is in its prompt.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a single completion request (awaits the full answer)
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}
