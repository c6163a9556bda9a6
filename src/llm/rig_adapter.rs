//! Bridge from rig's `CompletionModel` to our `LlmProvider`.

use async_trait::async_trait;
use rig::completion::message::{AssistantContent, Message};
use rig::completion::{CompletionError, CompletionModel};
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::LlmError;
use crate::llm::costs::model_cost;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider, Role};

/// Any rig completion model, exposed as an `LlmProvider`.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: &'static str,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(provider: &'static str, model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider,
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        model_cost(&self.model_name)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        // The last user turn is the prompt; earlier ones become history.
        let mut turns: Vec<Message> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| Message::user(m.content.clone()))
            .collect();
        let prompt = turns.pop().ok_or_else(|| LlmError::RequestFailed {
            provider: self.provider.to_string(),
            reason: "request has no user message".into(),
        })?;

        let mut builder = self.model.completion_request(prompt);
        if let Some(preamble) = request.system_prompt() {
            builder = builder.preamble(preamble);
        }
        if !turns.is_empty() {
            builder = builder.messages(turns);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_completion_error(self.provider, e))?;

        let content = collect_text(response.choice.iter());
        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.provider.to_string(),
                reason: "no text content in response".into(),
            });
        }

        debug!(
            provider = self.provider,
            model = %self.model_name,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Completion received"
        );

        Ok(CompletionResponse {
            content,
            input_tokens: saturate(response.usage.input_tokens),
            output_tokens: saturate(response.usage.output_tokens),
        })
    }
}

/// Join the text parts of a response; tool calls and reasoning are ignored.
fn collect_text<'a>(parts: impl IntoIterator<Item = &'a AssistantContent>) -> String {
    parts
        .into_iter()
        .filter_map(|part| match part {
            AssistantContent::Text(text) => Some(text.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

fn saturate(tokens: u64) -> u32 {
    u32::try_from(tokens).unwrap_or(u32::MAX)
}

/// rig reports provider failures as text; sort them into our error kinds.
fn map_completion_error(provider: &str, err: CompletionError) -> LlmError {
    let reason = err.to_string();
    let lower = reason.to_ascii_lowercase();

    if lower.contains("429") || lower.contains("rate_limit") || lower.contains("rate limit") {
        return LlmError::RateLimited {
            provider: provider.to_string(),
            retry_after: None,
        };
    }
    if lower.contains("401")
        || lower.contains("authentication_error")
        || lower.contains("invalid x-api-key")
        || lower.contains("incorrect api key")
    {
        return LlmError::AuthFailed {
            provider: provider.to_string(),
        };
    }
    match err {
        CompletionError::ResponseError(_) => LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason,
        },
        _ => LlmError::RequestFailed {
            provider: provider.to_string(),
            reason,
        },
    }
}
