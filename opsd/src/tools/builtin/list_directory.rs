//! list_directory tool - list files and directories

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use crate::tools::{Tool, ToolContext, ToolResult};

/// List files and directories in a path
pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &'static str {
        "list_directory"
    }

    fn description(&self) -> &'static str {
        "List files and directories in a path."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory path relative to the run directory (default: .)"}
            }
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        debug!(?input, "ListDirectoryTool::execute: called");
        let path = input["path"].as_str().unwrap_or(".");

        let full_path = match ctx.validate_path(Path::new(path)) {
            Ok(p) => p,
            Err(e) => {
                debug!(%e, "ListDirectoryTool::execute: path validation failed");
                return ToolResult::error(e.to_string());
            }
        };

        let mut dir = match tokio::fs::read_dir(&full_path).await {
            Ok(d) => d,
            Err(e) => return ToolResult::error(format!("Failed to read directory: {}", e)),
        };

        let mut entries = Vec::new();
        while let Ok(Some(entry)) = dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            let Ok(metadata) = entry.metadata().await else {
                debug!(%name, "ListDirectoryTool::execute: failed to get metadata, skipping entry");
                continue;
            };
            let suffix = if metadata.is_dir() { "/" } else { "" };
            entries.push(format!("{}{}", name, suffix));
        }
        entries.sort();

        if entries.is_empty() {
            ToolResult::success("(empty directory)")
        } else {
            ToolResult::success(entries.join("\n"))
        }
    }
}
