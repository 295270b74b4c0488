//! Bridges a rig `CompletionModel` to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::completion::{AssistantContent, CompletionError, CompletionModel, Message};
use tracing::debug;

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
};

/// Anthropic requires `max_tokens`; used when the request leaves it unset.
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Adapter from any rig completion model to `LlmProvider`.
pub struct RigAdapter<M: CompletionModel> {
    model: M,
    model_name: String,
    provider: String,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider: "anthropic".to_string(),
        }
    }
}

/// A request reshaped for rig: system preamble, prior turns, final prompt.
#[derive(Debug, PartialEq)]
pub(crate) struct PromptParts<'a> {
    pub preamble: Option<String>,
    pub history: Vec<&'a ChatMessage>,
    pub prompt: &'a str,
}

/// Split a request into preamble, history and the trailing user prompt.
pub(crate) fn split_request<'a>(
    request: &'a CompletionRequest,
    provider: &str,
) -> Result<PromptParts<'a>, LlmError> {
    let system: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let mut turns: Vec<&ChatMessage> = request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .collect();

    let prompt = match turns.pop() {
        Some(last) if last.role == Role::User => last.content.as_str(),
        _ => {
            return Err(LlmError::RequestFailed {
                provider: provider.to_string(),
                reason: "request must end with a user message".to_string(),
            });
        }
    };

    Ok(PromptParts {
        preamble: (!system.is_empty()).then(|| system.join("\n\n")),
        history: turns,
        prompt,
    })
}

/// Map a rig error onto our error kinds by the provider status it carries.
pub(crate) fn map_error(provider: &str, error: CompletionError) -> LlmError {
    classify_error(provider, error.to_string())
}

fn classify_error(provider: &str, reason: String) -> LlmError {
    let lower = reason.to_lowercase();
    if lower.contains("401") || lower.contains("authentication_error") {
        LlmError::AuthFailed {
            provider: provider.to_string(),
        }
    } else if lower.contains("429") || lower.contains("rate_limit") {
        LlmError::RateLimited {
            provider: provider.to_string(),
            retry_after: None,
        }
    } else {
        LlmError::RequestFailed {
            provider: provider.to_string(),
            reason,
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let parts = split_request(&request, &self.provider)?;

        let history: Vec<Message> = parts
            .history
            .iter()
            .map(|m| match m.role {
                Role::Assistant => Message::assistant(m.content.clone()),
                _ => Message::user(m.content.clone()),
            })
            .collect();

        let mut builder = self
            .model
            .completion_request(Message::user(parts.prompt.to_string()))
            .messages(history)
            .max_tokens(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS) as u64);
        if let Some(preamble) = parts.preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature as f64);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_error(&self.provider, e))?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect();

        debug!(
            model = %self.model_name,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Completion received"
        );

        Ok(CompletionResponse {
            finish_reason: if content.is_empty() {
                FinishReason::Unknown
            } else {
                FinishReason::Stop
            },
            content,
            input_tokens: response.usage.input_tokens as u32,
            output_tokens: response.usage.output_tokens as u32,
            response_id: None,
        })
    }
}
