//! Tool error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during tool execution
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Path {path} is outside the sandbox: {reason}")]
    SandboxViolation { path: PathBuf, reason: String },

    #[error("Tool timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Tool not found: {name}")]
    UnknownTool { name: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
