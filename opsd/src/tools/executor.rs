//! ToolExecutor - runs requested tool calls for the task runner

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::builtin::{FetchTool, ListDirectoryTool, ReadFileTool};
use super::{Tool, ToolContext, ToolError, ToolResult};
use crate::collab::ToolRunner;

/// Registry of tools sharing one context
pub struct ToolExecutor {
    tools: HashMap<String, Box<dyn Tool>>,
    ctx: ToolContext,
    timeout: Duration,
}

impl ToolExecutor {
    /// Create executor with the standard read-only tools
    pub fn standard(ctx: ToolContext, timeout: Duration) -> Self {
        debug!(?timeout, "ToolExecutor::standard: called");
        let mut executor = Self::empty(ctx, timeout);
        executor.add_tool(Box::new(ReadFileTool));
        executor.add_tool(Box::new(ListDirectoryTool));
        executor.add_tool(Box::new(FetchTool::new()));
        executor
    }

    /// Create an empty executor (for testing)
    pub fn empty(ctx: ToolContext, timeout: Duration) -> Self {
        debug!("ToolExecutor::empty: called");
        Self {
            tools: HashMap::new(),
            ctx,
            timeout,
        }
    }

    /// Add a tool to the executor
    pub fn add_tool(&mut self, tool: Box<dyn Tool>) {
        debug!(tool_name = %tool.name(), "ToolExecutor::add_tool: called");
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Registered tool names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// One-line descriptions for prompts
    pub fn describe(&self) -> String {
        self.names()
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| format!("- {}: {} input schema: {}", t.name(), t.description(), t.input_schema()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Execute a tool call, bounded by the executor timeout
    pub async fn execute_call(&self, name: &str, input: Value) -> ToolResult {
        debug!(%name, "ToolExecutor::execute_call: called");
        let Some(tool) = self.tools.get(name) else {
            debug!(%name, "ToolExecutor::execute_call: tool not found");
            return ToolResult::error(ToolError::UnknownTool { name: name.to_string() }.to_string());
        };
        match tokio::time::timeout(self.timeout, tool.execute(input, &self.ctx)).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                warn!(%name, timeout_ms, "Tool call timed out");
                ToolResult::error(ToolError::Timeout { timeout_ms }.to_string())
            }
        }
    }
}

#[async_trait]
impl ToolRunner for ToolExecutor {
    async fn execute(&self, name: &str, args: &Value) -> String {
        self.execute_call(name, args.clone()).await.into_text()
    }

    fn catalog(&self) -> String {
        self.describe()
    }
}
