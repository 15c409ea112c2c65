//! OpenAI-compatible streaming client.
//!
//! Works with any provider exposing `POST {base_url}/chat/completions` with
//! server-sent events, which covers OpenAI, DeepSeek, Qwen, OpenRouter,
//! vLLM and most local runtimes.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::types::StreamChunk;
use super::{ChatBackend, ChatDelta, ChatRequest, DeltaStream, Usage};
use crate::agent::message::{Message, Role, ToolCallRequest};
use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

/// OpenAI-compatible API client
#[derive(Clone)]
pub struct OpenAiCompatClient {
    client: Client,
}

impl OpenAiCompatClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    fn build_url(base_url: &str) -> String {
        format!("{}/chat/completions", base_url.trim_end_matches('/'))
    }

    fn build_body(request: &ChatRequest<'_>) -> Value {
        let mut body = json!({
            "model": request.model.name,
            "messages": convert_messages(request.messages),
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(tools) = convert_tools(request.tools) {
            body["tools"] = tools;
        }
        body
    }
}

impl Default for OpenAiCompatClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatClient {
    async fn stream_chat(&self, request: &ChatRequest<'_>) -> Result<DeltaStream> {
        let body = Self::build_body(request);
        debug!(model = request.model.name.as_str(), messages = request.messages.len(), "chat request");

        let response = self
            .client
            .post(Self::build_url(&request.model.base_url))
            .bearer_auth(&request.model.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api { status: status.as_u16(), body });
        }

        let bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut decoder = StreamDecoder::default();
            futures_util::pin_mut!(bytes);
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => {
                        for delta in decoder.push(&chunk) {
                            yield Ok(delta);
                        }
                        if let Some(e) = decoder.take_error() {
                            yield Err(e);
                            return;
                        }
                    }
                    Err(e) => {
                        yield Err(Error::Http(e));
                        return;
                    }
                }
            }
            match decoder.finish() {
                Ok(deltas) => {
                    for delta in deltas {
                        yield Ok(delta);
                    }
                }
                Err(e) => {
                    yield Err(e);
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

fn convert_messages(messages: &[Message]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len());
    for m in messages {
        match m.role {
            Role::Tool => {
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": m.tool_call_id.as_deref().unwrap_or_default(),
                    "content": m.content,
                }));
                // Tool messages cannot carry images on most providers; hand
                // them over in a follow-up user turn instead.
                if !m.images.is_empty() {
                    out.push(json!({
                        "role": "user",
                        "content": content_parts(m, "Images returned by the tool call above."),
                    }));
                }
            }
            Role::Assistant if m.has_tool_calls() => {
                let calls: Vec<Value> = m
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {"name": tc.name, "arguments": tc.arguments},
                        })
                    })
                    .collect();
                out.push(json!({"role": "assistant", "content": m.content, "tool_calls": calls}));
            }
            role => {
                let role = match role {
                    Role::System => "system",
                    Role::User => "user",
                    _ => "assistant",
                };
                if m.images.is_empty() {
                    out.push(json!({"role": role, "content": m.content}));
                } else {
                    out.push(json!({"role": role, "content": content_parts(m, &m.content)}));
                }
            }
        }
    }
    out
}

fn content_parts(m: &Message, text: &str) -> Vec<Value> {
    let mut parts: Vec<Value> = m
        .images
        .iter()
        .map(|img| json!({"type": "image_url", "image_url": {"url": img.data_url()}}))
        .collect();
    if !text.is_empty() {
        parts.push(json!({"type": "text", "text": text}));
    }
    parts
}

fn convert_tools(tools: &[ToolDefinition]) -> Option<Value> {
    if tools.is_empty() {
        return None;
    }
    let tools: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect();
    Some(Value::Array(tools))
}

#[derive(Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Turns raw SSE bytes into [`ChatDelta`]s. Tool call fragments are held back
/// until the stream ends, since their arguments arrive in pieces.
///
/// An `error` payload mid-stream stops decoding: deltas decoded before it are
/// still returned, and the error is held for [`StreamDecoder::take_error`].
#[derive(Default)]
struct StreamDecoder {
    buffer: Vec<u8>,
    calls: BTreeMap<usize, PartialCall>,
    error: Option<Error>,
}

impl StreamDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<ChatDelta> {
        let mut deltas = Vec::new();
        if self.error.is_some() {
            return deltas;
        }
        self.buffer.extend_from_slice(bytes);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Err(e) = self.handle_line(line.trim(), &mut deltas) {
                self.buffer.clear();
                self.error = Some(e);
                break;
            }
        }
        deltas
    }

    fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    fn finish(mut self) -> Result<Vec<ChatDelta>> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        let mut deltas = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            self.handle_line(line.trim(), &mut deltas)?;
        }
        for (_, call) in std::mem::take(&mut self.calls) {
            if call.name.is_empty() {
                continue;
            }
            let id = if call.id.is_empty() {
                format!("call_{}", uuid::Uuid::new_v4().simple())
            } else {
                call.id
            };
            let arguments = if call.arguments.trim().is_empty() {
                "{}".to_string()
            } else {
                call.arguments
            };
            deltas.push(ChatDelta::ToolCall(ToolCallRequest { id, name: call.name, arguments }));
        }
        Ok(deltas)
    }

    fn handle_line(&mut self, line: &str, deltas: &mut Vec<ChatDelta>) -> Result<()> {
        let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
            return Ok(());
        };
        if data == "[DONE]" || data.is_empty() {
            return Ok(());
        }
        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Skipping unparseable stream chunk: {}", e);
                return Ok(());
            }
        };
        if let Some(error) = chunk.error {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| error.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(Error::Llm(format!("Stream aborted by provider: {}", message)));
        }

        for choice in chunk.choices {
            let delta = choice.delta;
            if let Some(reasoning) = delta.reasoning_content.or(delta.reasoning) {
                if !reasoning.is_empty() {
                    deltas.push(ChatDelta::Reasoning(reasoning));
                }
            }
            if let Some(content) = delta.content {
                if !content.is_empty() {
                    deltas.push(ChatDelta::Content(content));
                }
            }
            for fragment in delta.tool_calls {
                let call = self.calls.entry(fragment.index).or_default();
                if let Some(id) = fragment.id {
                    call.id = id;
                }
                if let Some(function) = fragment.function {
                    if let Some(name) = function.name {
                        call.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        call.arguments.push_str(&arguments);
                    }
                }
            }
        }

        if let Some(usage) = chunk.usage {
            deltas.push(ChatDelta::Usage(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            }));
        }
        Ok(())
    }
}
