//! The [`LlmProvider`] trait every backend implements.
//!
//! Adapted from the teacher's `agent::provider` module; extended with a
//! `reasoning_content`-aware stream item so the artifact generator (C9) can
//! reconstruct the `<think>/<answer>` wrapper the teacher's provider did not
//! need.

use crate::error::LlmError;
use crate::llm::message::{ChatRequest, ChatResponse};
use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// One incremental piece of a streaming chat completion.
#[derive(Debug, Clone, Default)]
pub struct StreamDelta {
    /// Incremental visible-answer text, if this chunk carried any.
    pub content: Option<String>,
    /// Incremental reasoning-trace text, if this chunk carried any.
    pub reasoning_content: Option<String>,
}

/// A chat completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// The provider's name, for logging and error messages.
    fn name(&self) -> &str;

    /// Execute a non-streaming chat completion.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError>;

    /// Execute a streaming chat completion, yielding incremental deltas.
    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamDelta, LlmError>>, LlmError>;
}
