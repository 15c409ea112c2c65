//! Agent module - core agent logic.
//!
//! This module contains:
//! - Message types shared by the model client and the tools
//! - The streaming chat client trait and its OpenAI-compatible implementation
//! - Model invocation with tool rounds ([`invoke`])
//! - The response multiplexer that renders a stream as console lines
//! - Prompt rendering and the work-cycle loop

mod invoke;
mod loop_impl;
mod message;
mod multiplexer;
mod prompt;

pub mod llm;

pub use invoke::{invoke, EventSink, InvocationOutcome, StreamEvent, MAX_TOOL_ROUNDS};
pub use llm::{ChatBackend, OpenAiCompatClient, Usage};
pub use loop_impl::{AgentLoop, AgentSettings, CycleOutcome};
pub use message::{Message, Role, ToolCallRequest};
pub use multiplexer::{Channel, LineSink, Multiplexer, RenderMode, RenderedLine};
pub use prompt::PromptTemplate;
