//! LLM transport abstraction layer.
//!
//! This module provides:
//! - [`ChatBackend`] trait for swappable streaming providers
//! - [`ChatDelta`], the raw incremental output of one model request
//! - [`OpenAiCompatClient`], an OpenAI-compatible `/chat/completions` client
//!
//! A backend only performs single requests. Tool execution and the
//! multi-round conversation live in [`crate::agent::invoke`].

mod types;

pub mod openai;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::tools::ToolDefinition;
use crate::Result;

pub use openai::OpenAiCompatClient;

use super::message::{Message, ToolCallRequest};

/// One request to a model.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub model: &'a ModelConfig,
    pub messages: &'a [Message],
    pub tools: &'a [ToolDefinition],
    pub temperature: Option<f32>,
}

/// Incremental output of a streaming request, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatDelta {
    /// Reasoning ("thinking") text.
    Reasoning(String),
    /// Final answer text.
    Content(String),
    /// A fully assembled tool call.
    ToolCall(ToolCallRequest),
    /// Token accounting, usually the last delta.
    Usage(Usage),
}

/// Stream of deltas for one request.
pub type DeltaStream = BoxStream<'static, Result<ChatDelta>>;

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Streaming chat backend - swappable provider abstraction.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Start a streaming request. Errors before the first delta (connection,
    /// HTTP status) are returned directly; later ones arrive in the stream.
    async fn stream_chat(&self, request: &ChatRequest<'_>) -> Result<DeltaStream>;
}

/// What a [`FakeBackend`] saw for one request.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
    pub temperature: Option<f32>,
}

/// Scripted backend for testing: every request pops the next round.
#[cfg(test)]
pub struct FakeBackend {
    rounds: std::sync::Mutex<std::collections::VecDeque<Result<Vec<ChatDelta>>>>,
    requests: std::sync::Mutex<Vec<RecordedRequest>>,
}

#[cfg(test)]
impl FakeBackend {
    pub fn new(rounds: Vec<Result<Vec<ChatDelta>>>) -> Self {
        Self {
            rounds: std::sync::Mutex::new(rounds.into()),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// A backend answering a single request with plain text.
    pub fn text(content: &str) -> Self {
        Self::new(vec![Ok(vec![ChatDelta::Content(content.to_string())])])
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[cfg(test)]
pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ChatDelta {
    ChatDelta::ToolCall(ToolCallRequest {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
    })
}

#[cfg(test)]
#[async_trait]
impl ChatBackend for FakeBackend {
    async fn stream_chat(&self, request: &ChatRequest<'_>) -> Result<DeltaStream> {
        self.requests.lock().unwrap().push(RecordedRequest {
            model: request.model.name.clone(),
            messages: request.messages.to_vec(),
            tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
            temperature: request.temperature,
        });
        let round = self
            .rounds
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| crate::error::Error::Llm("No more fake responses".to_string()))?;
        let deltas = round?;
        Ok(Box::pin(futures_util::stream::iter(deltas.into_iter().map(Ok))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_fake_backend_rounds() {
        let backend = FakeBackend::new(vec![
            Ok(vec![ChatDelta::Content("Hello!".into())]),
            Err(crate::error::Error::Llm("down".into())),
        ]);
        let model = ModelConfig::test("fake-model", false);
        let request = ChatRequest { model: &model, messages: &[], tools: &[], temperature: None };

        let deltas: Vec<_> = backend.stream_chat(&request).await.unwrap().collect().await;
        assert_eq!(deltas.len(), 1);
        assert!(backend.stream_chat(&request).await.is_err());
        assert!(backend.stream_chat(&request).await.is_err());
        assert_eq!(backend.requests().len(), 3);
    }

    #[test]
    fn test_usage_add() {
        let mut total = Usage::default();
        total.add(&Usage { prompt_tokens: 3, completion_tokens: 4, total_tokens: 7 });
        total.add(&Usage { prompt_tokens: 1, completion_tokens: 1, total_tokens: 2 });
        assert_eq!(total.total_tokens, 9);
    }
}
