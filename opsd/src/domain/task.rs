//! Task domain type
//!
//! A Task is one delegated unit of work inside a Run. Tasks are executed in
//! ascending id order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use taskstore::{IndexValue, Record, now_ms};

use super::risk::RiskTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    NeedsApproval,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::NeedsApproval => write!(f, "needs_approval"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub run_id: i64,
    /// Free-text role label, resolved through the role registry
    pub dept: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub risk_level: RiskTier,
    pub status: TaskStatus,
    /// Structured-response parse retries consumed
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    pub fn new(run_id: i64, dept: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: 0,
            run_id,
            dept: dept.into(),
            title: title.into(),
            description: description.into(),
            risk_level: RiskTier::Safe,
            status: TaskStatus::Pending,
            retries: 0,
            payload: Value::Null,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_risk(mut self, risk: RiskTier) -> Self {
        self.risk_level = risk;
        self
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = now_ms();
    }

    /// Mark FAILED with the captured error
    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.set_status(TaskStatus::Failed);
    }
}

impl Record for Task {
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
        "tasks"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("run_id".to_string(), IndexValue::Int(self.run_id));
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields.insert("dept".to_string(), IndexValue::String(self.dept.clone()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_fail_records_error() {
        let mut task = Task::new(1, "research", "Survey", "Survey competitors");
        task.fail("generator timed out");
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("generator timed out"));
    }

    #[test]
    fn test_task_indexes_run_and_status() {
        let task = Task::new(7, "qa", "Check", "Check it");
        let fields = task.indexed_fields();
        assert_eq!(fields.get("run_id"), Some(&IndexValue::Int(7)));
        assert_eq!(fields.get("status"), Some(&IndexValue::String("pending".to_string())));
    }

    #[test]
    fn test_needs_approval_display() {
        assert_eq!(TaskStatus::NeedsApproval.to_string(), "needs_approval");
    }
}
