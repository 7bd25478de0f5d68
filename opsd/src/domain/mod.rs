//! Domain types for opsd
//!
//! Persisted entities: Run, Task, Approval, Artifact, Kpi, MemoryNote,
//! ProcessRun, ProcessStep, Job, Schedule.
//! All implement the Record trait for TaskStore persistence. Ids are
//! allocated by the store and ascend in creation order.

mod approval;
mod artifact;
mod job;
mod priority;
mod process;
mod risk;
mod run;
mod schedule;
mod task;

pub use approval::{Approval, Decision};
pub use artifact::{Artifact, Kpi, MemoryNote};
pub use job::{Job, JobStatus};
pub use priority::Priority;
pub use process::{ProcessRun, ProcessRunStatus, ProcessStep, StepStatus};
pub use risk::RiskTier;
pub use run::{Run, RunStatus};
pub use schedule::{Cadence, Schedule, ScheduleStatus};
pub use task::{Task, TaskStatus};

// Re-export taskstore types for convenience
pub use taskstore::{Filter, FilterOp, IndexValue, Record, Store, now_ms};
