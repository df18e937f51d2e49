//! LLM-backed oracle

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{Oracle, OracleError, parse_answer};
use crate::context::PromptContext;
use crate::domain::ProposedPatch;
use crate::llm::{CompletionRequest, LlmClient, Message, StopReason};
use crate::prompts::PromptLoader;

/// Oracle that renders the prompt templates and asks an LLM for the files
pub struct LlmOracle {
    llm: Arc<dyn LlmClient>,
    prompts: PromptLoader,
    max_tokens: u32,
}

impl LlmOracle {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: PromptLoader, max_tokens: u32) -> Self {
        debug!(max_tokens, "LlmOracle::new: called");
        Self {
            llm,
            prompts,
            max_tokens,
        }
    }
}

#[async_trait]
impl Oracle for LlmOracle {
    async fn propose(&self, context: &PromptContext) -> Result<ProposedPatch, OracleError> {
        debug!(target = %context.target, attempt = context.attempt, "LlmOracle::propose: called");
        let prompt = self
            .prompts
            .render(context)
            .map_err(|e| OracleError::Prompt(e.to_string()))?;

        let request = CompletionRequest {
            system_prompt: prompt.system,
            messages: vec![Message::user(prompt.user)],
            max_tokens: self.max_tokens,
            temperature: None,
        };

        let response = self.llm.complete(request).await.map_err(|e| {
            if e.is_rate_limit() {
                warn!("Oracle rate limited: {}", e);
            } else {
                warn!(transient = e.is_retryable(), error = %e, "Oracle transport error");
            }
            OracleError::Transport(e)
        })?;
        info!(
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Oracle answered"
        );

        let text = response.content.unwrap_or_default();
        match parse_answer(&text) {
            Ok(patch) => Ok(patch),
            Err(OracleError::Malformed(msg)) if response.stop_reason == StopReason::MaxTokens => {
                warn!("Oracle answer was cut off at the token limit");
                Err(OracleError::Malformed(format!("{} (answer truncated at max tokens)", msg)))
            }
            Err(e) => Err(e),
        }
    }
}
