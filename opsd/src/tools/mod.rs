//! Tool system for task responses
//!
//! Tools give the generator read-only access to files and the web. Each
//! executor gets a `ToolContext` scoped to a root directory and confined by
//! the path sandbox.

mod context;
mod error;
mod executor;
mod traits;

pub mod builtin;

pub use context::ToolContext;
pub use error::ToolError;
pub use executor::ToolExecutor;
pub use traits::{Tool, ToolResult};
