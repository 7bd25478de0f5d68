//! ProcessRun and ProcessStep domain types
//!
//! A ProcessRun executes a named workflow definition; each declared step
//! becomes one ProcessStep, executed strictly in `position` order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use taskstore::{IndexValue, Record, now_ms};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessRunStatus {
    #[default]
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for ProcessRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRun {
    pub id: i64,
    pub process_name: String,
    pub project_id: String,
    pub status: ProcessRunStatus,
    /// Template inputs, string-keyed
    #[serde(default)]
    pub inputs: serde_json::Map<String, Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ProcessRun {
    pub fn new(
        process_name: impl Into<String>,
        project_id: impl Into<String>,
        inputs: serde_json::Map<String, Value>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: 0,
            process_name: process_name.into(),
            project_id: project_id.into(),
            status: ProcessRunStatus::Running,
            inputs,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: ProcessRunStatus) {
        self.status = status;
        self.updated_at = now_ms();
    }
}

impl Record for ProcessRun {
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
        "process_runs"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields.insert("process_name".to_string(), IndexValue::String(self.process_name.clone()));
        fields.insert("project_id".to_string(), IndexValue::String(self.project_id.clone()));
        fields
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessStep {
    pub id: i64,
    pub process_run_id: i64,
    /// Step id from the workflow definition
    pub step_id: String,
    /// Declaration index within the workflow
    pub position: i64,
    pub status: StepStatus,
    /// Run id when the step delegated to the task runner
    #[serde(default)]
    pub task_id: Option<i64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ProcessStep {
    pub fn new(process_run_id: i64, step_id: impl Into<String>, position: i64) -> Self {
        let now = now_ms();
        Self {
            id: 0,
            process_run_id,
            step_id: step_id.into(),
            position,
            status: StepStatus::Pending,
            task_id: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: StepStatus) {
        self.status = status;
        self.updated_at = now_ms();
    }

    pub fn complete(&mut self, result: Value) {
        self.result = Some(result);
        self.set_status(StepStatus::Completed);
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.set_status(StepStatus::Failed);
    }
}

impl Record for ProcessStep {
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
        "process_steps"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("process_run_id".to_string(), IndexValue::Int(self.process_run_id));
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields
    }
}
