//! Role registry
//!
//! Department labels on Tasks are free text. The registry turns a label into
//! a typed [`Role`]; callers that need a role no matter what use
//! [`RoleRegistry::resolve`], which falls back to the configured default.

mod registry;

pub use registry::{Role, RoleRegistry};
