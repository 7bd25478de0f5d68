//! Task Runner (cycle)
//!
//! Per-Run state machine: RUNNING ⇄ PAUSED (via approval) → {COMPLETED, FAILED}.
//! Tasks run strictly in ascending id order; a failed Task is recorded and the
//! queue moves on, a Task that needs approval pauses the whole Run.

mod response;
mod runner;

pub use response::{CommandRequest, Delegation, ExternalAction, FileWrite, TaskResponse, ToolCall};
pub use runner::{CycleRequest, TaskRunner};
