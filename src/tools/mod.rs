//! Tools module - agent capabilities
//!
//! Tools are actions the model can take mid-response: acting on the forum,
//! looking at images and searching the web. Each tool decides for itself
//! whether it is offered to a given model, see [`Tool::is_active`].

mod registry;
pub mod forum;
pub mod read_image;
pub mod web;

pub use registry::{ActiveTools, ToolDefinition, ToolRegistry};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::agent::{EventSink, StreamEvent};
use crate::config::ModelConfig;
use crate::document::InlineImage;
use crate::error::Error;
use crate::Result;

/// Tool trait - interface for all agent tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name used in function calls
    fn name(&self) -> &str;

    /// Human readable name for logs
    fn display_name(&self) -> &str {
        self.name()
    }

    /// Description of what the tool does
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters(&self) -> Value;

    /// Whether the tool is offered when `model` is the one being called
    fn is_active(&self, _model: &ModelConfig) -> bool {
        true
    }

    /// Execute the tool with given parameters
    async fn execute(&self, params: Value, ctx: &mut ToolContext<'_>) -> Result<ToolOutput>;

    /// Convert to tool definition for LLM
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Result of one tool call, handed back to the model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    /// Images re-entering the conversation as model input.
    pub images: Vec<InlineImage>,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
            ..Self::default()
        }
    }

    pub fn images(text: impl Into<String>, images: Vec<InlineImage>) -> Self {
        Self {
            text: text.into(),
            images,
            is_error: false,
        }
    }
}

/// What a running tool can reach besides its arguments.
pub struct ToolContext<'a> {
    sink: &'a mut dyn EventSink,
}

impl<'a> ToolContext<'a> {
    pub fn new(sink: &'a mut dyn EventSink) -> Self {
        Self { sink }
    }

    /// Report live progress; shows up as tool narration.
    pub fn progress(&mut self, text: &str) {
        if !text.is_empty() {
            self.sink.on_event(StreamEvent::ToolMessageChunk(text.to_string()));
        }
    }
}

/// Deserialize tool arguments into the tool's parameter struct.
pub fn parse_args<T: DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| Error::InvalidArguments(e.to_string()))
}

/// Dummy tool for testing
#[cfg(test)]
pub struct DummyTool {
    pub name: String,
    pub result: String,
    pub vision_only: Option<bool>,
}

#[cfg(test)]
impl DummyTool {
    pub fn new(name: &str, result: &str) -> Self {
        Self {
            name: name.to_string(),
            result: result.to_string(),
            vision_only: None,
        }
    }

    /// Active only when the model's vision flag equals `vision`.
    pub fn for_vision(name: &str, result: &str, vision: bool) -> Self {
        Self {
            vision_only: Some(vision),
            ..Self::new(name, result)
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Tool for DummyTool {
    fn name(&self) -> &str { &self.name }
    fn description(&self) -> &str { "Dummy tool for testing" }
    fn parameters(&self) -> Value { serde_json::json!({"type": "object"}) }

    fn is_active(&self, model: &ModelConfig) -> bool {
        self.vision_only.map_or(true, |vision| model.vision == vision)
    }

    async fn execute(&self, _params: Value, ctx: &mut ToolContext<'_>) -> Result<ToolOutput> {
        ctx.progress("working\n");
        Ok(ToolOutput::text(self.result.clone()))
    }
}
