//! Image tools - let the model look at images and PDFs
//!
//! Two tools share the name `read_image`; at most one is active for a given
//! model. A vision model gets the images themselves, anything else gets a
//! textual description produced by the configured secondary vision model.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{parse_args, ActiveTools, Tool, ToolContext, ToolOutput};
use crate::agent::llm::ChatBackend;
use crate::agent::{invoke, EventSink, InvocationOutcome, Message, StreamEvent};
use crate::config::ModelConfig;
use crate::document::Normalizer;
use crate::Result;

pub const TOOL_NAME: &str = "read_image";

/// Appended to every describe request so the secondary model transcribes
/// instead of commenting.
pub const DESCRIBE_INSTRUCTIONS: &str = "Note: do not add any explanation or do any extra work, and do not judge \
whether the content is correct; only output the content of the image as asked.\n\
Do not add any extra explanation or information.\n\
Keep the original layout and content, and describe everything in the image in as much detail as possible.\n\
Do not interpret or analyse the content, only answer with what is in the image.";

const DESCRIBE_TEMPERATURE: f32 = 0.1;

const URL_HELP: &str = "Two kinds of URL are supported:\n\
- a direct, publicly reachable image or PDF URL such as `https://example.com/image.png`\n\
- a data URL such as `data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAA...`";

#[derive(Debug, Deserialize)]
struct PassThroughArgs {
    #[serde(alias = "urls")]
    image_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DescribeArgs {
    #[serde(alias = "urls")]
    image_urls: Vec<String>,
    prompt: String,
}

fn urls_schema() -> Value {
    json!({
        "type": "array",
        "items": {"type": "string"},
        "description": "Image or PDF URLs; every page of a PDF becomes one image"
    })
}

/// Hands the normalized images straight back to a vision-capable model.
pub struct PassThroughImageTool {
    normalizer: Normalizer,
    description: String,
}

impl PassThroughImageTool {
    pub fn new(normalizer: Normalizer) -> Self {
        Self {
            normalizer,
            description: format!(
                "If you have a URL whose content is an image (or PDF) and want to see it, use this tool.\n{}",
                URL_HELP
            ),
        }
    }
}

#[async_trait]
impl Tool for PassThroughImageTool {
    fn name(&self) -> &str { TOOL_NAME }
    fn display_name(&self) -> &str { "read_image (pass-through)" }
    fn description(&self) -> &str { &self.description }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "image_urls": urls_schema() },
            "required": ["image_urls"]
        })
    }

    fn is_active(&self, model: &ModelConfig) -> bool {
        model.vision
    }

    async fn execute(&self, params: Value, ctx: &mut ToolContext<'_>) -> Result<ToolOutput> {
        let args: PassThroughArgs = parse_args(params)?;
        match self.normalizer.normalize_all(&args.image_urls).await {
            Ok(images) => {
                ctx.progress(&format!("Loaded {} image(s)\n", images.len()));
                Ok(ToolOutput::images(format!("{} image(s) attached.", images.len()), images))
            }
            Err(message) => Ok(ToolOutput::error(message)),
        }
    }
}

/// Asks the secondary vision model to describe images for a text-only model.
pub struct DescribeImageTool {
    backend: Arc<dyn ChatBackend>,
    vlm: Option<ModelConfig>,
    normalizer: Normalizer,
    description: String,
}

impl DescribeImageTool {
    pub fn new(backend: Arc<dyn ChatBackend>, vlm: Option<ModelConfig>, normalizer: Normalizer) -> Self {
        Self {
            backend,
            vlm,
            normalizer,
            description: format!(
                "If you have a URL whose content is an image (or PDF) and want to know what it shows, use this tool. \
                 A vision model reads the images and answers your prompt; the prompt is passed to it verbatim, \
                 so say exactly what you need (a transcription, a description, a specific detail).\n{}",
                URL_HELP
            ),
        }
    }
}

/// Forwards the nested stream's answer as tool narration and keeps a copy.
struct DescribeSink<'a, 'b> {
    ctx: &'a mut ToolContext<'b>,
    text: String,
}

impl EventSink for DescribeSink<'_, '_> {
    fn on_event(&mut self, event: StreamEvent) {
        if let StreamEvent::MessageChunk(chunk) = event {
            self.ctx.progress(&chunk);
            self.text.push_str(&chunk);
        }
    }
}

#[async_trait]
impl Tool for DescribeImageTool {
    fn name(&self) -> &str { TOOL_NAME }
    fn display_name(&self) -> &str { "read_image (describe)" }
    fn description(&self) -> &str { &self.description }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "image_urls": urls_schema(),
                "prompt": {
                    "type": "string",
                    "description": "Instruction for the vision model, passed on verbatim"
                }
            },
            "required": ["image_urls", "prompt"]
        })
    }

    fn is_active(&self, model: &ModelConfig) -> bool {
        !model.vision && self.vlm.is_some()
    }

    async fn execute(&self, params: Value, ctx: &mut ToolContext<'_>) -> Result<ToolOutput> {
        let args: DescribeArgs = parse_args(params)?;
        let Some(vlm) = &self.vlm else {
            return Ok(ToolOutput::error("No vision model is configured"));
        };

        let images = match self.normalizer.normalize_all(&args.image_urls).await {
            Ok(images) => images,
            Err(message) => return Ok(ToolOutput::error(message)),
        };
        debug!("Describing {} image(s) with {}", images.len(), vlm.name);

        let request = Message::user_with_images(images, format!("{}\n\n{}", args.prompt, DESCRIBE_INSTRUCTIONS));
        let mut sink = DescribeSink { ctx, text: String::new() };
        let outcome = invoke(
            self.backend.as_ref(),
            vlm,
            vec![request],
            &ActiveTools::none(),
            Some(DESCRIBE_TEMPERATURE),
            &mut sink,
        )
        .await;

        match outcome {
            InvocationOutcome::Success { .. } => Ok(ToolOutput::text(sink.text)),
            InvocationOutcome::RecoverableError(message) => {
                warn!("Vision model {} failed: {}", vlm.name, message);
                Ok(ToolOutput::error(format!("Vision model unavailable: {}", message)))
            }
            InvocationOutcome::UnknownError(e) => {
                warn!("Vision model {} failed: {}", vlm.name, e);
                Ok(ToolOutput::error(format!("Vision model failed: {}", e)))
            }
        }
    }
}
