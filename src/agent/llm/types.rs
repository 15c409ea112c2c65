//! Wire types for OpenAI-compatible streaming responses.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Treat an explicit `null` like a missing field. Several providers send
/// `"tool_calls": null` or `"delta": null` mid-stream.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One `data:` payload of a `/chat/completions` stream.
#[derive(Debug, Deserialize)]
pub struct StreamChunk {
    #[serde(default, deserialize_with = "null_as_default")]
    pub choices: Vec<StreamChoice>,
    pub usage: Option<UsagePayload>,
    /// Set when the provider aborts the stream after a 200 response.
    pub error: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct StreamChoice {
    #[serde(default, deserialize_with = "null_as_default")]
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

/// Incremental message content. Providers disagree on the reasoning field
/// name, so both spellings are accepted.
#[derive(Debug, Default, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    pub reasoning: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tool_calls: Vec<ToolCallFragment>,
}

/// Part of a tool call; fragments sharing an `index` belong together.
#[derive(Debug, Deserialize)]
pub struct ToolCallFragment {
    #[serde(default, deserialize_with = "null_as_default")]
    pub index: usize,
    pub id: Option<String>,
    pub function: Option<FunctionFragment>,
}

#[derive(Debug, Deserialize)]
pub struct FunctionFragment {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// Token usage, sent with `stream_options.include_usage`.
#[derive(Debug, Deserialize)]
pub struct UsagePayload {
    #[serde(default, deserialize_with = "null_as_default")]
    pub prompt_tokens: usize,
    #[serde(default, deserialize_with = "null_as_default")]
    pub completion_tokens: usize,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_tokens: usize,
}
