//! LLM dispatch (C10): model registry with round-robin API-key rotation,
//! retrying non-streaming calls, and the `<think>/<answer>` streaming
//! reasoning wrapper.
//!
//! Grounded on `llms/model_manager.py::ModelManager` (key rotation, client
//! caching) and `core/reasoning.py::ReasoningEngine` (the streaming
//! state machine and chat-history bookkeeping).

use crate::config::{AlchemyConfig, ModelType};
use crate::error::LlmError;
use crate::llm::message::{ChatHistory, ChatMessage, ChatRequest, ChatResponse, Role};
use crate::llm::provider::LlmProvider;
use crate::llm::providers::openai::OpenAiProvider;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::{Duration, sleep};
use tracing::warn;

struct ModelPool {
    api_base: String,
    api_keys: Vec<String>,
    next_key: AtomicUsize,
}

impl ModelPool {
    fn next_key(&self) -> Result<&str, LlmError> {
        if self.api_keys.is_empty() {
            return Err(LlmError::ApiKeyMissing { model: self.api_base.clone() });
        }
        let idx = self.next_key.fetch_add(1, Ordering::Relaxed) % self.api_keys.len();
        Ok(&self.api_keys[idx])
    }
}

/// Dispatches chat requests to registered models, rotating API keys and
/// retrying transient failures.
pub struct Dispatcher {
    pools: HashMap<String, ModelPool>,
    max_retries: u32,
}

impl Dispatcher {
    /// Build a dispatcher from the resolved configuration's model registry.
    pub fn from_config(config: &AlchemyConfig) -> Result<Self, LlmError> {
        let mut pools = HashMap::new();
        for (name, entry) in &config.models {
            if entry.model_type == ModelType::Local {
                return Err(LlmError::LocalModelUnsupported(name.clone()));
            }
            pools.insert(
                name.clone(),
                ModelPool {
                    api_base: entry.api_base.clone(),
                    api_keys: entry.api_keys.clone(),
                    next_key: AtomicUsize::new(0),
                },
            );
        }
        Ok(Self { pools, max_retries: config.max_retries })
    }

    fn provider_for(&self, model: &str) -> Result<OpenAiProvider, LlmError> {
        let pool = self
            .pools
            .get(model)
            .ok_or_else(|| LlmError::UnknownModel(model.to_string()))?;
        let key = pool.next_key()?;
        Ok(OpenAiProvider::new(model, key, &pool.api_base))
    }

    /// Execute a non-streaming chat completion, retrying up to
    /// `max_retries` times with a one-second backoff between attempts,
    /// matching the original's retry loop.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let mut last_err = None;
        for attempt in 0..self.max_retries.max(1) {
            let provider = self.provider_for(&request.model)?;
            match provider.chat(request).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    warn!(attempt = attempt + 1, model = %request.model, error = %err, "chat attempt failed");
                    last_err = Some(err);
                    if attempt + 1 < self.max_retries.max(1) {
                        sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or(LlmError::ApiRequest { message: "no attempts made".to_string() }))
    }

    /// Execute a streaming chat completion, collecting the full
    /// `<think>/<answer>`-wrapped response text.
    ///
    /// Mirrors `ReasoningEngine.get_stream_response`'s exact state machine:
    /// the first non-empty reasoning delta opens `<think>\n`, the first
    /// content delta closes it and opens `<answer>\n`, and the stream's end
    /// unconditionally appends `\n</answer>`. If no reasoning content was
    /// ever seen, the wrapper is skipped entirely and only the answer text
    /// is returned.
    pub async fn chat_stream_collect(
        &self,
        request: &ChatRequest,
    ) -> Result<String, LlmError> {
        let provider = self.provider_for(&request.model)?;
        let mut stream = provider.chat_stream(request).await?;

        let mut wrapped = String::new();
        let mut plain_answer = String::new();
        let mut seen_reasoning = false;
        let mut seen_content = false;

        while let Some(delta) = stream.next().await {
            let delta = delta?;
            if let Some(reasoning) = delta.reasoning_content {
                if !seen_reasoning {
                    wrapped.push_str("<think>\n");
                    seen_reasoning = true;
                }
                wrapped.push_str(&reasoning);
            }
            if let Some(content) = delta.content {
                if seen_reasoning && !seen_content {
                    wrapped.push_str("\n</think>\n\n<answer>\n");
                }
                seen_content = true;
                wrapped.push_str(&content);
                plain_answer.push_str(&content);
            }
        }

        if seen_reasoning {
            wrapped.push_str("\n</answer>");
            Ok(wrapped)
        } else {
            Ok(plain_answer)
        }
    }
}

/// A chat-history-backed wrapper around a [`Dispatcher`] call for a single
/// model, matching `ReasoningEngine`'s role: owns a [`ChatHistory`], offers
/// `get_response`/`get_stream_response`, and appends every exchange back
/// into the history.
pub struct ReasoningEngine<'a> {
    dispatcher: &'a Dispatcher,
    model: String,
    history: Mutex<ChatHistory>,
}

impl<'a> ReasoningEngine<'a> {
    /// Construct a reasoning engine bound to `model`.
    #[must_use]
    pub fn new(dispatcher: &'a Dispatcher, model: impl Into<String>) -> Self {
        Self {
            dispatcher,
            model: model.into(),
            history: Mutex::new(ChatHistory::new()),
        }
    }

    /// Set the system prompt for subsequent calls.
    pub fn set_system_prompt(&self, prompt: impl Into<String>) {
        if let Ok(mut history) = self.history.lock() {
            history.set_system_prompt(prompt);
        }
    }

    /// Append a user message to the history.
    pub fn add_user_message(&self, content: impl Into<String>) {
        if let Ok(mut history) = self.history.lock() {
            history.add_message(ChatMessage::user(content));
        }
    }

    /// Discard the system prompt and all recorded messages.
    pub fn clear_history(&self) {
        if let Ok(mut history) = self.history.lock() {
            history.clear();
        }
    }

    /// Non-streaming call over the current history at the given sampling
    /// parameters, appending the assistant's reply to the history.
    pub async fn get_response(
        &self,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<String, LlmError> {
        let messages = self
            .history
            .lock()
            .map(|h| h.to_request_messages())
            .unwrap_or_default();
        let mut request = ChatRequest::new(self.model.clone(), messages).with_temperature(temperature);
        if let Some(max_tokens) = max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        let response = self.dispatcher.chat(&request).await?;
        let rendered = match &response.reasoning_content {
            Some(reasoning) if !reasoning.is_empty() => {
                format!("<think>\n{reasoning}\n</think>\n\n<answer>\n{}\n</answer>", response.content)
            }
            _ => response.content.clone(),
        };
        if let Ok(mut history) = self.history.lock() {
            history.add_message(ChatMessage { role: Role::Assistant, content: rendered.clone(), timestamp: chrono::Utc::now() });
        }
        Ok(rendered)
    }

    /// Streaming call over the current history, appending the collected
    /// response to the history.
    pub async fn get_stream_response(&self) -> Result<String, LlmError> {
        let messages = self
            .history
            .lock()
            .map(|h| h.to_request_messages())
            .unwrap_or_default();
        let request = ChatRequest::new(self.model.clone(), messages);
        let rendered = self.dispatcher.chat_stream_collect(&request).await?;
        if let Ok(mut history) = self.history.lock() {
            history.add_message(ChatMessage { role: Role::Assistant, content: rendered.clone(), timestamp: chrono::Utc::now() });
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelEntry;
    use std::collections::HashMap;

    fn config_with_model(name: &str, keys: Vec<&str>) -> AlchemyConfig {
        let mut models = HashMap::new();
        models.insert(
            name.to_string(),
            ModelEntry {
                model_type: ModelType::Api,
                api_base: "https://example.invalid/v1".to_string(),
                api_keys: keys.into_iter().map(String::from).collect(),
            },
        );
        AlchemyConfig {
            models,
            generator_model: name.to_string(),
            reasoning_model: name.to_string(),
            db_path: "db".into(),
            work_dir: "wd".into(),
            search_top_k: 5,
            similarity_threshold: 0.6,
            max_concurrency: 10,
            timeout_secs: 120,
            max_retries: 3,
        }
    }

    #[test]
    fn unknown_model_is_rejected() {
        let config = config_with_model("known", vec!["k1"]);
        let dispatcher = Dispatcher::from_config(&config).unwrap();
        let err = dispatcher.provider_for("unknown").unwrap_err();
        assert!(matches!(err, LlmError::UnknownModel(_)));
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let config = config_with_model("known", vec![]);
        let dispatcher = Dispatcher::from_config(&config).unwrap();
        let err = dispatcher.provider_for("known").unwrap_err();
        assert!(matches!(err, LlmError::ApiKeyMissing { .. }));
    }

    #[test]
    fn key_rotation_cycles_round_robin() {
        let config = config_with_model("known", vec!["k1", "k2"]);
        let dispatcher = Dispatcher::from_config(&config).unwrap();
        let pool = &dispatcher.pools["known"];
        assert_eq!(pool.next_key().unwrap(), "k1");
        assert_eq!(pool.next_key().unwrap(), "k2");
        assert_eq!(pool.next_key().unwrap(), "k1");
    }
}
