//! Process Runner
//!
//! Declarative multi-step workflows: YAML definitions loaded into a
//! [`WorkflowCatalog`], executed one ProcessRun at a time by the
//! [`ProcessRunner`], and reachable from the job queue through the handlers
//! registered by [`register_handlers`].

mod catalog;
mod definition;
mod handlers;
mod runner;
mod template;

pub use catalog::{WorkflowCatalog, parse_definition};
pub use definition::{ActionKind, StepDefinition, WorkflowDefinition};
pub use handlers::{CYCLE_START, PROCESS_EXECUTE, PROCESS_START, register_handlers};
pub use runner::{ProcessOutcome, ProcessRunner};
pub use template::{Bindings, interpolate};
