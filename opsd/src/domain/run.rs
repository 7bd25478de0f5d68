//! Run domain type
//!
//! A Run is one execution of an objective through an ordered Task queue.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use taskstore::{IndexValue, Record, now_ms};

/// Run lifecycle: RUNNING ⇄ PAUSED → {COMPLETED, FAILED}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Running,
    /// Blocked on at least one unapproved Task
    Paused,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub project_id: String,
    pub objective: String,
    pub status: RunStatus,
    /// Latest generated report (markdown)
    #[serde(default)]
    pub report: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Adversarial audit verdict; at most one per Run
    #[serde(default)]
    pub audit: Option<Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Run {
    pub fn new(project_id: impl Into<String>, objective: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: 0,
            project_id: project_id.into(),
            objective: objective.into(),
            status: RunStatus::Running,
            report: None,
            error: None,
            audit: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: RunStatus) {
        self.status = status;
        self.updated_at = now_ms();
    }
}

impl Record for Run {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "runs"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields.insert("project_id".to_string(), IndexValue::String(self.project_id.clone()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_new_is_running() {
        let run = Run::new("acme", "Launch the newsletter");
        assert_eq!(run.id, 0);
        assert_eq!(run.status, RunStatus::Running);
        assert!(!run.status.is_terminal());
    }

    #[test]
    fn test_run_status_serializes_snake_case() {
        let json = serde_json::to_string(&RunStatus::Paused).unwrap();
        assert_eq!(json, "\"paused\"");
        assert_eq!(RunStatus::Completed.to_string(), "completed");
    }
}
