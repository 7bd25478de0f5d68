//! opsd - approval-gated task and workflow orchestrator
//!
//! opsd coordinates units of delegated work generated by a text-generation
//! collaborator. Risky side effects wait for a human decision, structurally
//! invalid artifacts get one bounded self-correction, and every Run, Step and
//! Job is persisted so workflows survive restarts and pause/resume safely.
//!
//! # Modules
//!
//! - [`cycle`] - Task Runner: drains one Run's Task queue
//! - [`process`] - Process Runner: ordered workflow steps with quality gates
//! - [`queue`] - persisted priority Job queue with race-safe claiming
//! - [`scheduler`] - calendar cadences that become Jobs, plus a heartbeat
//! - [`approval`] - Approval Ledger
//! - [`policy`] - Risk Classifier and Path Sandbox
//! - [`gates`] - Quality Gate Evaluator
//! - [`runtime`] - explicitly constructed context shared by all of the above

pub mod approval;
pub mod cli;
pub mod collab;
pub mod config;
pub mod cycle;
pub mod domain;
pub mod error;
pub mod events;
pub mod gates;
pub mod llm;
pub mod policy;
pub mod process;
pub mod prompts;
pub mod queue;
pub mod roles;
pub mod runtime;
pub mod scheduler;
pub mod state;
pub mod tools;

// Re-export commonly used types
pub use approval::{ApprovalLedger, PendingApproval};
pub use collab::{Collaborators, Memory, ToolRunner};
pub use config::Config;
pub use cycle::{CycleRequest, TaskRunner};
pub use domain::{
    Approval, Artifact, Cadence, Decision, Filter, IndexValue, Job, JobStatus, Priority, ProcessRun,
    ProcessRunStatus, ProcessStep, RiskTier, Run, RunStatus, Schedule, ScheduleStatus, StepStatus, Task, TaskStatus,
};
pub use error::{OpsError, OpsResult};
pub use events::{EventBus, OpsEvent, spawn_event_logger};
pub use gates::{GateOutcome, QualityGate};
pub use llm::{GenerateOptions, Generation, LlmError, TextGenerator};
pub use policy::{Action, PathSandbox, RiskClassifier};
pub use process::{ProcessOutcome, ProcessRunner, WorkflowCatalog, register_handlers};
pub use queue::{JobHandler, JobQueue, PollOutcome};
pub use runtime::{Runtime, RuntimeBuilder};
pub use scheduler::{Heartbeat, Scheduler};
pub use state::{StateError, StateManager};
