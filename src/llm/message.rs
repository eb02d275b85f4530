//! Chat message types shared by every LLM provider.
//!
//! Adapted from the teacher's `agent::message` module.

use serde::{Deserialize, Serialize};

/// The role a chat message was authored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt, sets behavior for the rest of the conversation.
    System,
    /// A message from the end user.
    User,
    /// A message produced by the model.
    Assistant,
}

/// A single message in a chat history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who authored this message.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// When this message was recorded.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ChatMessage {
    /// Construct a message, stamping it with the current time.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Construct a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Construct a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Construct an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A non-streaming chat request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model to route the request to.
    pub model: String,
    /// Full message history to send.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Whether to request a streaming response.
    pub stream: bool,
}

impl ChatRequest {
    /// Construct a request with the given model and history, using the
    /// dispatcher's default temperature and no explicit max_tokens.
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.7,
            max_tokens: None,
            stream: false,
        }
    }

    /// Override the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Override max_tokens.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Token accounting for a completed chat response.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens generated in the completion.
    pub completion_tokens: u32,
    /// Sum of prompt and completion tokens.
    pub total_tokens: u32,
}

/// A completed, non-streaming chat response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// The model's visible answer content.
    pub content: String,
    /// The model's hidden reasoning trace, if the provider exposed one.
    pub reasoning_content: Option<String>,
    /// Token usage, if reported by the provider.
    pub usage: Option<TokenUsage>,
}

/// An ordered, append-only conversation history, optionally persisted to disk.
#[derive(Debug, Default)]
pub struct ChatHistory {
    /// System prompt applied ahead of the message list, if set.
    pub system_prompt: Option<String>,
    /// Messages recorded so far.
    pub messages: Vec<ChatMessage>,
}

impl ChatHistory {
    /// Construct an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or replace) the system prompt.
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = Some(prompt.into());
    }

    /// Append a message to the history.
    pub fn add_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Discard the system prompt and all recorded messages.
    pub fn clear(&mut self) {
        self.system_prompt = None;
        self.messages.clear();
    }

    /// Render the full history, including the system prompt if set, as the
    /// message list sent to the provider.
    #[must_use]
    pub fn to_request_messages(&self) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            out.push(ChatMessage::system(prompt.clone()));
        }
        out.extend(self.messages.iter().cloned());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_prepends_system_prompt() {
        let mut history = ChatHistory::new();
        history.set_system_prompt("be terse");
        history.add_message(ChatMessage::user("hi"));
        let rendered = history.to_request_messages();
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0].role, Role::System);
    }

    #[test]
    fn clear_resets_both_prompt_and_messages() {
        let mut history = ChatHistory::new();
        history.set_system_prompt("x");
        history.add_message(ChatMessage::user("y"));
        history.clear();
        assert!(history.system_prompt.is_none());
        assert!(history.messages.is_empty());
    }
}
