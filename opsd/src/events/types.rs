//! Event types for opsd activity streaming
//!
//! One variant per observable state transition of Runs, Tasks, Approvals,
//! ProcessRuns, Jobs and Schedules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Core event enum - the vocabulary of opsd activity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OpsEvent {
    // === Task Runner ===
    RunStarted { run_id: i64, project_id: String, objective: String },
    RunPaused { run_id: i64, approval_id: i64 },
    RunCompleted { run_id: i64 },
    RunFailed { run_id: i64, error: String },
    TaskStarted { run_id: i64, task_id: i64, dept: String },
    TaskCompleted { run_id: i64, task_id: i64 },
    TaskFailed { run_id: i64, task_id: i64, error: String },
    ApprovalRequested { run_id: i64, task_id: i64, approval_id: i64 },

    // === Process Runner ===
    StepStarted { process_run_id: i64, step_id: String },
    StepCompleted { process_run_id: i64, step_id: String },
    StepFailed { process_run_id: i64, step_id: String, error: String },
    ProcessCompleted { process_run_id: i64 },
    ProcessFailed { process_run_id: i64, error: String },

    // === Job Queue / Scheduler ===
    JobClaimed { job_id: i64, job_type: String },
    JobCompleted { job_id: i64 },
    JobFailed { job_id: i64, error: String },
    ScheduleFired { schedule_id: i64, job_id: i64 },
}

impl OpsEvent {
    /// Short machine-readable event name
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::RunPaused { .. } => "run_paused",
            Self::RunCompleted { .. } => "run_completed",
            Self::RunFailed { .. } => "run_failed",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::ApprovalRequested { .. } => "approval_requested",
            Self::StepStarted { .. } => "step_started",
            Self::StepCompleted { .. } => "step_completed",
            Self::StepFailed { .. } => "step_failed",
            Self::ProcessCompleted { .. } => "process_completed",
            Self::ProcessFailed { .. } => "process_failed",
            Self::JobClaimed { .. } => "job_claimed",
            Self::JobCompleted { .. } => "job_completed",
            Self::JobFailed { .. } => "job_failed",
            Self::ScheduleFired { .. } => "schedule_fired",
        }
    }

    /// Whether this event ends a Run or ProcessRun
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RunCompleted { .. }
                | Self::RunFailed { .. }
                | Self::ProcessCompleted { .. }
                | Self::ProcessFailed { .. }
        )
    }
}

/// A persisted event with its wall-clock timestamp
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: OpsEvent,
}

impl EventLogEntry {
    pub fn new(event: OpsEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = OpsEvent::RunPaused {
            run_id: 4,
            approval_id: 9,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "RunPaused");
        assert_eq!(json["approval_id"], 9);
        assert_eq!(event.event_type(), "run_paused");
    }

    #[test]
    fn test_log_entry_flattens_event() {
        let entry = EventLogEntry::new(OpsEvent::JobFailed {
            job_id: 1,
            error: "boom".to_string(),
        });
        let line = serde_json::to_string(&entry).unwrap();
        assert!(line.contains("\"timestamp\""));
        assert!(line.contains("\"type\":\"JobFailed\""));

        let back: EventLogEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(back.event, entry.event);
    }

    #[test]
    fn test_terminal_events() {
        assert!(OpsEvent::RunCompleted { run_id: 1 }.is_terminal());
        assert!(!OpsEvent::JobCompleted { job_id: 1 }.is_terminal());
    }
}
