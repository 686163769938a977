//! services/api/src/adapters/completion_llm.rs
//!
//! This module contains the adapter for the external AI completion service.
//! It implements the `CompletionService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use revision_core::ports::{
    ChatRole, Completion, CompletionRequest, CompletionService, PortError, PortResult,
};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `CompletionService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiCompletionAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiCompletionAdapter {
    /// Creates a new `OpenAiCompletionAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

fn to_request_message(
    role: ChatRole,
    content: String,
) -> Result<ChatCompletionRequestMessage, OpenAIError> {
    Ok(match role {
        ChatRole::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(content)
            .build()?
            .into(),
        ChatRole::User => ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()?
            .into(),
        ChatRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(content)
            .build()?
            .into(),
    })
}

//=========================================================================================
// `CompletionService` Trait Implementation
//=========================================================================================

#[async_trait]
impl CompletionService for OpenAiCompletionAdapter {
    async fn complete(&self, request: CompletionRequest) -> PortResult<Completion> {
        let messages = request
            .messages
            .into_iter()
            .map(|m| to_request_message(m.role, m.content))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(request.temperature)
            .max_completion_tokens(request.max_tokens)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        // Call the API and manually map the error if it occurs, which respects the orphan rule.
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let total_tokens = response.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0);

        // Extract the text content from the first choice in the response.
        if let Some(choice) = response.choices.into_iter().next() {
            if let Some(content) = choice.message.content {
                Ok(Completion {
                    content,
                    total_tokens,
                })
            } else {
                Err(PortError::Unexpected(
                    "Completion response contained no text content.".to_string(),
                ))
            }
        } else {
            Err(PortError::Unexpected(
                "Completion service returned no choices in its response.".to_string(),
            ))
        }
    }
}
