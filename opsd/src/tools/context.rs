//! ToolContext - execution context for tools

use std::path::{Path, PathBuf};
use tracing::debug;

use super::ToolError;
use crate::policy::PathSandbox;

/// Execution context shared by every tool of one executor
///
/// Relative paths resolve against `root`; every resolved path must pass the
/// sandbox.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub root: PathBuf,
    sandbox: PathSandbox,
}

impl ToolContext {
    pub fn new(root: PathBuf, sandbox: PathSandbox) -> Self {
        debug!(?root, "ToolContext::new: called");
        Self { root, sandbox }
    }

    /// Context whose only allowed root is `root` itself
    pub fn confined_to(root: PathBuf) -> Self {
        let sandbox = PathSandbox::new([&root]);
        Self::new(root, sandbox)
    }

    /// Validate path is within the sandbox
    pub fn validate_path(&self, path: &Path) -> Result<PathBuf, ToolError> {
        debug!(?path, "ToolContext::validate_path: called");
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        self.sandbox.validate(&joined).map_err(|e| {
            debug!(%e, "ToolContext::validate_path: sandbox violation detected");
            ToolError::SandboxViolation {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })
    }
}
