//! OpenAI-compatible provider, built on `async-openai`.
//!
//! Adapted from the teacher's `agent::providers::openai::OpenAiProvider`.
//! `async-openai`'s stream delta type only exposes `content`; it has no
//! field for the `reasoning_content` vendor extension some
//! reasoning-model-compatible endpoints emit. [`chat_stream`](OpenAiProvider::chat_stream)
//! therefore always reports `reasoning_content: None` — the dispatcher's
//! `<think>/<answer>` wrapper degrades to an unwrapped answer in that case,
//! which is the same behavior the teacher's own streaming path has.

use crate::error::LlmError;
use crate::llm::message::{ChatRequest, ChatResponse, Role, TokenUsage};
use crate::llm::provider::{LlmProvider, StreamDelta};
use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, stream};

/// A single registered API key, rotated round-robin by the dispatcher.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model_label: String,
}

impl OpenAiProvider {
    /// Construct a provider for `model_label`, using `api_key`/`api_base` as
    /// the transport configuration.
    #[must_use]
    pub fn new(model_label: impl Into<String>, api_key: &str, api_base: &str) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);
        Self {
            client: Client::with_config(config),
            model_label: model_label.into(),
        }
    }

    fn convert_message(
        message: &crate::llm::message::ChatMessage,
    ) -> Result<async_openai::types::ChatCompletionRequestMessage, LlmError> {
        let built = match message.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(message.content.clone())
                .build()
                .map(Into::into),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(message.content.clone())
                .build()
                .map(Into::into),
            Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(message.content.clone())
                .build()
                .map(Into::into),
        };
        built.map_err(|e| LlmError::ApiRequest { message: e.to_string() })
    }

    fn build_request(
        &self,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<async_openai::types::CreateChatCompletionRequest, LlmError> {
        let messages: Result<Vec<_>, LlmError> = request
            .messages
            .iter()
            .map(Self::convert_message)
            .collect();
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(request.model.clone())
            .messages(messages?)
            .temperature(request.temperature)
            .stream(stream);
        if let Some(max_tokens) = request.max_tokens {
            builder.max_tokens(max_tokens);
        }
        builder
            .build()
            .map_err(|e| LlmError::ApiRequest { message: e.to_string() })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.model_label
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let built = self.build_request(request, false)?;
        let response = self
            .client
            .chat()
            .create(built)
            .await
            .map_err(|e| LlmError::ApiRequest { message: e.to_string() })?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ApiRequest { message: "empty choices list".to_string() })?;

        let usage = response.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            reasoning_content: None,
            usage,
        })
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamDelta, LlmError>>, LlmError> {
        let built = self.build_request(request, true)?;
        let upstream = self
            .client
            .chat()
            .create_stream(built)
            .await
            .map_err(|e| LlmError::ApiRequest { message: e.to_string() })?;

        let mapped = upstream.map(|chunk| {
            let chunk = chunk.map_err(|e| LlmError::Stream { message: e.to_string() })?;
            let Some(choice) = chunk.choices.into_iter().next() else {
                return Ok(StreamDelta::default());
            };
            Ok(StreamDelta {
                content: choice.delta.content,
                reasoning_content: None,
            })
        });

        Ok(stream::StreamExt::boxed(mapped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::message::ChatMessage;

    #[test]
    fn convert_system_message() {
        let msg = ChatMessage::system("be terse");
        let converted = OpenAiProvider::convert_message(&msg).unwrap();
        assert!(matches!(
            converted,
            async_openai::types::ChatCompletionRequestMessage::System(_)
        ));
    }

    #[test]
    fn convert_user_message() {
        let msg = ChatMessage::user("hello");
        let converted = OpenAiProvider::convert_message(&msg).unwrap();
        assert!(matches!(
            converted,
            async_openai::types::ChatCompletionRequestMessage::User(_)
        ));
    }

    #[test]
    fn convert_assistant_message() {
        let msg = ChatMessage::assistant("ok");
        let converted = OpenAiProvider::convert_message(&msg).unwrap();
        assert!(matches!(
            converted,
            async_openai::types::ChatCompletionRequestMessage::Assistant(_)
        ));
    }

    #[test]
    fn build_request_sets_streaming_flag() {
        let provider = OpenAiProvider::new("gpt-test", "key", "https://example.invalid/v1");
        let request = ChatRequest::new("gpt-test", vec![ChatMessage::user("hi")]);
        let built = provider.build_request(&request, true).unwrap();
        assert_eq!(built.stream, Some(true));
    }
}
