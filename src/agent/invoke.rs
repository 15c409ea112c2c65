//! Model invocation: one streaming conversation turn including every tool
//! round it triggers.
//!
//! The model is asked, its output is forwarded to an [`EventSink`] as it
//! arrives, and whenever it requests tools they run to completion and their
//! results are sent back before the model continues. Tools may call
//! [`invoke`] again for a nested request; they pass their own sink, so the
//! nested stream never reaches the caller's sink directly.

use futures_util::StreamExt;
use tracing::{debug, warn};

use super::llm::{ChatBackend, ChatDelta, ChatRequest, Usage};
use super::message::Message;
use crate::config::ModelConfig;
use crate::error::Error;
use crate::tools::{ActiveTools, ToolContext};

/// Upper bound on model↔tool round trips within one invocation.
pub const MAX_TOOL_ROUNDS: usize = 32;

/// One unit of model output, tagged by channel.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    ReasoningChunk(String),
    MessageChunk(String),
    /// The model called a tool; `arguments` is the raw JSON it produced.
    ToolCallAnnounced { name: String, arguments: String },
    /// Live output of a running tool.
    ToolMessageChunk(String),
    ToolCallResult { name: String, is_error: bool },
}

/// Receives stream events in arrival order.
pub trait EventSink: Send {
    fn on_event(&mut self, event: StreamEvent);
}

impl EventSink for Vec<StreamEvent> {
    fn on_event(&mut self, event: StreamEvent) {
        self.push(event);
    }
}

/// How an invocation ended.
#[derive(Debug)]
pub enum InvocationOutcome {
    /// `messages` holds everything the invocation added to the conversation:
    /// assistant turns and tool results, in order.
    Success { messages: Vec<Message>, usage: Usage },
    /// Worth trying again in a later cycle (network trouble, rate limits).
    RecoverableError(String),
    UnknownError(Error),
}

impl InvocationOutcome {
    fn from_error(error: Error) -> Self {
        if error.is_recoverable() {
            InvocationOutcome::RecoverableError(error.to_string())
        } else {
            InvocationOutcome::UnknownError(error)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, InvocationOutcome::Success { .. })
    }

    /// Text of every assistant message, in emission order.
    pub fn assistant_texts(&self) -> Vec<&str> {
        match self {
            InvocationOutcome::Success { messages, .. } => messages
                .iter()
                .filter(|m| m.role == super::message::Role::Assistant)
                .map(|m| m.content.as_str())
                .collect(),
            _ => vec![],
        }
    }
}

/// Run one invocation of `model` over `messages`.
pub async fn invoke(
    backend: &dyn ChatBackend,
    model: &ModelConfig,
    messages: Vec<Message>,
    tools: &ActiveTools,
    temperature: Option<f32>,
    sink: &mut dyn EventSink,
) -> InvocationOutcome {
    let definitions = tools.definitions();
    let mut conversation = messages;
    let mut produced = Vec::new();
    let mut usage = Usage::default();

    for round in 0..MAX_TOOL_ROUNDS {
        debug!("Invoking {} (round {})", model.name, round + 1);
        let request = ChatRequest {
            model,
            messages: &conversation,
            tools: &definitions,
            temperature,
        };
        let mut stream = match backend.stream_chat(&request).await {
            Ok(stream) => stream,
            Err(e) => return InvocationOutcome::from_error(e),
        };

        let mut text = String::new();
        let mut calls = Vec::new();
        while let Some(delta) = stream.next().await {
            match delta {
                Ok(ChatDelta::Reasoning(chunk)) => sink.on_event(StreamEvent::ReasoningChunk(chunk)),
                Ok(ChatDelta::Content(chunk)) => {
                    text.push_str(&chunk);
                    sink.on_event(StreamEvent::MessageChunk(chunk));
                }
                Ok(ChatDelta::ToolCall(call)) => calls.push(call),
                Ok(ChatDelta::Usage(u)) => usage.add(&u),
                Err(e) => return InvocationOutcome::from_error(e),
            }
        }
        drop(stream);

        let assistant = Message::assistant_with_tools(text, calls.clone());
        conversation.push(assistant.clone());
        produced.push(assistant);

        if calls.is_empty() {
            return InvocationOutcome::Success { messages: produced, usage };
        }

        for call in calls {
            sink.on_event(StreamEvent::ToolCallAnnounced {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            });
            let output = {
                let mut ctx = ToolContext::new(&mut *sink);
                tools.invoke(&call.name, &call.arguments, &mut ctx).await
            };
            sink.on_event(StreamEvent::ToolCallResult {
                name: call.name.clone(),
                is_error: output.is_error,
            });

            let mut result = Message::tool_result(&call.id, output.text);
            result.images = output.images;
            conversation.push(result.clone());
            produced.push(result);
        }
    }

    warn!("{} kept calling tools for {} rounds, giving up", model.name, MAX_TOOL_ROUNDS);
    InvocationOutcome::UnknownError(Error::Llm(format!(
        "tool round limit ({}) reached",
        MAX_TOOL_ROUNDS
    )))
}
