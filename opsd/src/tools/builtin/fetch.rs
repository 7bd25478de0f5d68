//! fetch tool - fetch a URL and return readable text

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::tools::{Tool, ToolContext, ToolResult};

const MAX_BODY_BYTES: usize = 1_000_000;
const MAX_OUTPUT_CHARS: usize = 50_000;

/// Fetch content from a URL, converting HTML to markdown
pub struct FetchTool {
    http: reqwest::Client,
}

impl FetchTool {
    pub fn new() -> Self {
        debug!("FetchTool::new: called");
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("opsd/0.1 (fetch tool)")
            .build()
            .unwrap_or_default();
        Self { http }
    }
}

impl Default for FetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &'static str {
        "fetch"
    }

    fn description(&self) -> &'static str {
        "Fetch content from a URL. Converts HTML to markdown."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "URL to fetch"}
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> ToolResult {
        debug!(?input, "FetchTool::execute: called");
        let Some(url) = input["url"].as_str() else {
            return ToolResult::error("url is required");
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            debug!("FetchTool::execute: invalid URL protocol");
            return ToolResult::error("URL must start with http:// or https://");
        }

        let response = match self.http.get(url).send().await {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("Failed to fetch URL: {}", e)),
        };
        if !response.status().is_success() {
            return ToolResult::error(format!("HTTP error: {}", response.status()));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return ToolResult::error(format!("Failed to read response: {}", e)),
        };
        if body.len() > MAX_BODY_BYTES {
            return ToolResult::error("Response too large (> 1MB)");
        }

        ToolResult::success(truncate(render_body(&content_type, body)))
    }
}

fn render_body(content_type: &str, body: String) -> String {
    if content_type.contains("text/html") || content_type.contains("application/xhtml") {
        debug!("render_body: converting HTML to markdown");
        html2md::rewrite_html(&body, false)
    } else if content_type.contains("application/json") {
        match serde_json::from_str::<Value>(&body) {
            Ok(json) => serde_json::to_string_pretty(&json).unwrap_or(body),
            Err(_) => body,
        }
    } else {
        body
    }
}

fn truncate(content: String) -> String {
    match content.char_indices().nth(MAX_OUTPUT_CHARS) {
        Some((idx, _)) => format!("{}...\n\n[truncated, {} chars total]", &content[..idx], content.len()),
        None => content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_fetch_rejects_non_http() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::confined_to(temp.path().to_path_buf());
        let result = FetchTool::new()
            .execute(serde_json::json!({"url": "file:///etc/passwd"}), &ctx)
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("http"));
    }

    #[test]
    fn test_render_json_is_pretty() {
        let out = render_body("application/json", r#"{"a":1}"#.to_string());
        assert!(out.contains("\"a\": 1"));
    }

    #[test]
    fn test_truncate_long_content() {
        let out = truncate("y".repeat(MAX_OUTPUT_CHARS + 10));
        assert!(out.contains("[truncated"));
    }
}
