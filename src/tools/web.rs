//! Web search tool

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{parse_args, Tool, ToolContext, ToolOutput};
use crate::config::WebSearchConfig;
use crate::error::Error;
use crate::Result;

const DEFAULT_MAX_RESULTS: usize = 5;
const MAX_SNIPPET_CHARS: usize = 1500;

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    max_results: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

/// Web search over a Tavily-style JSON API.
pub struct WebSearchTool {
    api_key: String,
    endpoint: String,
    client: reqwest::Client,
}

impl WebSearchTool {
    /// `None` when no search credential is configured.
    pub fn from_config(config: &WebSearchConfig) -> Option<Self> {
        if config.api_key.trim().is_empty() {
            return None;
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Some(Self {
            api_key: config.api_key.clone(),
            endpoint: config.endpoint.clone(),
            client,
        })
    }
}

fn format_results(query: &str, response: &SearchResponse) -> String {
    let mut out = format!("Search results for: {}\n", query);
    if let Some(answer) = response.answer.as_deref().filter(|a| !a.trim().is_empty()) {
        out.push_str(&format!("\nSummary: {}\n", answer.trim()));
    }
    if response.results.is_empty() {
        out.push_str("\nNo results found.\n");
    }
    for (i, hit) in response.results.iter().enumerate() {
        let snippet: String = hit.content.chars().take(MAX_SNIPPET_CHARS).collect();
        let ellipsis = if hit.content.chars().count() > MAX_SNIPPET_CHARS { "..." } else { "" };
        out.push_str(&format!("\n{}. {}\n   {}\n   {}{}\n", i + 1, hit.title, hit.url, snippet.trim(), ellipsis));
    }
    out
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str { "web_search" }
    fn description(&self) -> &str { "Search the web and return the top results with short excerpts" }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Number of results (default 5, at most 10)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &mut ToolContext<'_>) -> Result<ToolOutput> {
        let args: SearchArgs = parse_args(params)?;
        let max_results = args.max_results.unwrap_or(DEFAULT_MAX_RESULTS).clamp(1, 10);
        ctx.progress(&format!("Searching: {}\n", args.query));

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "api_key": self.api_key,
                "query": args.query,
                "max_results": max_results,
                "include_answer": true,
            }))
            .send()
            .await
            .map_err(|e| Error::Tool(format!("Search request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tool(format!("Search API error ({}): {}", status, body)));
        }
        let results: SearchResponse = response
            .json()
            .await
            .map_err(|e| Error::Tool(format!("Unexpected search response: {}", e)))?;
        debug!("web_search '{}' returned {} result(s)", args.query, results.results.len());

        Ok(ToolOutput::text(format_results(&args.query, &results)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::StreamEvent;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(endpoint: String, api_key: &str) -> WebSearchConfig {
        WebSearchConfig { api_key: api_key.into(), endpoint }
    }

    #[test]
    fn test_disabled_without_key() {
        assert!(WebSearchTool::from_config(&config("http://localhost".into(), " ")).is_none());
    }

    #[test]
    fn test_format_truncates_snippets() {
        let response = SearchResponse {
            answer: None,
            results: vec![SearchHit { title: "T".into(), url: "https://t".into(), content: "x".repeat(2000) }],
        };
        let text = format_results("q", &response);
        assert!(text.contains("1. T\n   https://t\n"));
        assert!(text.ends_with("...\n"));
    }

    #[tokio::test]
    async fn test_search_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"api_key": "k", "query": "rust async", "max_results": 2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "answer": "Use tokio.",
                "results": [{"title": "Tokio", "url": "https://tokio.rs", "content": "An async runtime"}]
            })))
            .mount(&server)
            .await;

        let tool = WebSearchTool::from_config(&config(format!("{}/search", server.uri()), "k")).unwrap();
        let mut events: Vec<StreamEvent> = Vec::new();
        let output = tool
            .execute(json!({"query": "rust async", "max_results": 2}), &mut ToolContext::new(&mut events))
            .await
            .unwrap();

        assert!(output.text.contains("Summary: Use tokio."));
        assert!(output.text.contains("1. Tokio\n   https://tokio.rs\n   An async runtime"));
        assert_eq!(events, vec![StreamEvent::ToolMessageChunk("Searching: rust async\n".into())]);
    }

    #[tokio::test]
    async fn test_search_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let tool = WebSearchTool::from_config(&config(server.uri(), "k")).unwrap();
        let mut events: Vec<StreamEvent> = Vec::new();
        let err = tool
            .execute(json!({"query": "x"}), &mut ToolContext::new(&mut events))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("401"));
    }
}
