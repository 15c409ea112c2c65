//! Tool registry - resolves and executes tools

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{Tool, ToolContext, ToolOutput};
use crate::config::ModelConfig;
use crate::error::Error;
use crate::Result;

/// Tool definition for LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Every tool the agent knows about, in registration order.
///
/// Several tools may share a name as long as their activation predicates
/// differ; [`ToolRegistry::resolve`] picks one per name for a given model.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.push(Arc::new(tool));
    }

    /// Evaluate every activation predicate against `model` and return the
    /// tool set to advertise for one invocation.
    ///
    /// When more than one active tool shares a name, the first registered one
    /// wins and the rest are skipped. A registered tool whose schema is not a
    /// JSON object schema is a wiring defect and fails the whole resolution,
    /// whether or not it is active for `model`.
    pub fn resolve(&self, model: &ModelConfig) -> Result<ActiveTools> {
        for tool in &self.tools {
            check_schema(tool.as_ref())?;
        }

        let mut seen = HashSet::new();
        let mut active = Vec::new();

        for tool in &self.tools {
            if !tool.is_active(model) {
                continue;
            }
            if !seen.insert(tool.name().to_string()) {
                warn!(
                    "Tool '{}' ({}) shadowed by an earlier registration for model {}",
                    tool.name(),
                    tool.display_name(),
                    model.name
                );
                continue;
            }
            active.push(Arc::clone(tool));
        }

        debug!(
            "Resolved {} tool(s) for model {}: {:?}",
            active.len(),
            model.name,
            active.iter().map(|t| t.name()).collect::<Vec<_>>()
        );
        Ok(ActiveTools { tools: active })
    }
}

fn check_schema(tool: &dyn Tool) -> Result<()> {
    let schema = tool.parameters();
    let is_object_schema = schema.is_object() && schema.get("type").and_then(Value::as_str) == Some("object");
    if is_object_schema {
        Ok(())
    } else {
        Err(Error::ToolWiring(format!(
            "tool '{}' has a parameter schema that is not an object schema: {}",
            tool.name(),
            schema
        )))
    }
}

/// Tools resolved for one model invocation. Immutable once built.
#[derive(Clone, Default)]
pub struct ActiveTools {
    tools: Vec<Arc<dyn Tool>>,
}

impl ActiveTools {
    /// No tools at all, used for nested calls.
    pub fn none() -> Self {
        Self::default()
    }

    /// Get tool definitions for LLM
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    /// List active tool names
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Check if a tool is active
    pub fn has(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name. Never fails: unknown tools, unparsable or
    /// mismatched arguments and execution errors all become error output the
    /// model can read and react to.
    pub async fn invoke(&self, name: &str, raw_args: &str, ctx: &mut ToolContext<'_>) -> ToolOutput {
        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            return ToolOutput::error(format!("Error: unknown tool '{}'", name));
        };

        let params: Value = if raw_args.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(raw_args) {
                Ok(params) => params,
                Err(e) => {
                    debug!("Tool {} got unparsable arguments: {}", name, e);
                    return ToolOutput::error(format!("Error: arguments are not valid JSON: {}", e));
                }
            }
        };

        match tool.execute(params, ctx).await {
            Ok(output) => {
                debug!("Tool {} succeeded: {} chars, {} image(s)", name, output.text.len(), output.images.len());
                output
            }
            Err(e) => {
                debug!("Tool {} failed: {}", name, e);
                ToolOutput::error(format!("Error: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::StreamEvent;
    use crate::tools::DummyTool;
    use async_trait::async_trait;

    struct BrokenSchemaTool {
        vision_only: bool,
    }

    #[async_trait]
    impl Tool for BrokenSchemaTool {
        fn name(&self) -> &str { "broken" }
        fn description(&self) -> &str { "schema is a string" }
        fn parameters(&self) -> Value { serde_json::json!("nope") }
        fn is_active(&self, model: &ModelConfig) -> bool { model.vision || !self.vision_only }

        async fn execute(&self, _params: Value, _ctx: &mut ToolContext<'_>) -> Result<ToolOutput> {
            Ok(ToolOutput::text("unreachable"))
        }
    }

    #[tokio::test]
    async fn test_registry_register_and_invoke() {
        let mut registry = ToolRegistry::new();
        registry.register(DummyTool::new("test_tool", "success"));

        let tools = registry.resolve(&ModelConfig::test("m", false)).unwrap();
        assert!(tools.has("test_tool"));

        let mut events: Vec<StreamEvent> = Vec::new();
        let output = tools.invoke("test_tool", "{}", &mut ToolContext::new(&mut events)).await;
        assert_eq!(output, ToolOutput::text("success"));
        assert_eq!(events, vec![StreamEvent::ToolMessageChunk("working\n".into())]);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_output() {
        let tools = ToolRegistry::new().resolve(&ModelConfig::test("m", false)).unwrap();
        let mut events: Vec<StreamEvent> = Vec::new();
        let output = tools.invoke("unknown", "{}", &mut ToolContext::new(&mut events)).await;
        assert!(output.is_error);
        assert!(output.text.contains("unknown"));
    }

    #[tokio::test]
    async fn test_bad_json_is_error_output() {
        let mut registry = ToolRegistry::new();
        registry.register(DummyTool::new("test_tool", "success"));
        let tools = registry.resolve(&ModelConfig::test("m", false)).unwrap();

        let mut events: Vec<StreamEvent> = Vec::new();
        let output = tools.invoke("test_tool", "{not json", &mut ToolContext::new(&mut events)).await;
        assert!(output.is_error);
        assert!(events.is_empty());
    }

    #[test]
    fn test_predicates_select_by_model() {
        let mut registry = ToolRegistry::new();
        registry.register(DummyTool::for_vision("read_image", "pass-through", true));
        registry.register(DummyTool::for_vision("read_image", "describe", false));
        registry.register(DummyTool::new("forum", "ok"));

        let vision = registry.resolve(&ModelConfig::test("v", true)).unwrap();
        let text_only = registry.resolve(&ModelConfig::test("t", false)).unwrap();
        assert_eq!(vision.names(), vec!["read_image", "forum"]);
        assert_eq!(text_only.names(), vec!["read_image", "forum"]);
        assert_eq!(vision.definitions().len(), 2);
    }

    #[tokio::test]
    async fn test_first_active_registration_wins() {
        let mut registry = ToolRegistry::new();
        registry.register(DummyTool::new("dup", "first"));
        registry.register(DummyTool::new("dup", "second"));

        let tools = registry.resolve(&ModelConfig::test("m", false)).unwrap();
        assert_eq!(tools.names(), vec!["dup"]);

        let mut events: Vec<StreamEvent> = Vec::new();
        let output = tools.invoke("dup", "", &mut ToolContext::new(&mut events)).await;
        assert_eq!(output.text, "first");
    }

    #[test]
    fn test_malformed_schema_is_fatal() {
        let mut registry = ToolRegistry::new();
        registry.register(BrokenSchemaTool { vision_only: false });
        let err = registry.resolve(&ModelConfig::test("m", false)).err().unwrap();
        assert!(matches!(err, Error::ToolWiring(_)));
    }

    #[test]
    fn test_malformed_schema_fails_even_when_inactive() {
        let mut registry = ToolRegistry::new();
        registry.register(DummyTool::new("forum", "ok"));
        registry.register(BrokenSchemaTool { vision_only: true });

        // Inactive for a text-only model, still a wiring defect.
        let err = registry.resolve(&ModelConfig::test("t", false)).err().unwrap();
        assert!(matches!(err, Error::ToolWiring(_)));
        let err = registry.resolve(&ModelConfig::test("v", true)).err().unwrap();
        assert!(matches!(err, Error::ToolWiring(_)));
    }
}
