//! Job domain type
//!
//! Jobs decouple producers (the scheduler, the flywheel) from execution by
//! the queue worker.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use taskstore::{IndexValue, Record, now_ms};

use super::priority::Priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub job_type: String,
    #[serde(default)]
    pub payload: Value,
    pub status: JobStatus,
    pub priority: Priority,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub owner_run_id: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Job {
    pub fn new(job_type: impl Into<String>, payload: Value, priority: Priority) -> Self {
        let now = now_ms();
        Self {
            id: 0,
            job_type: job_type.into(),
            payload,
            status: JobStatus::Pending,
            priority,
            result: None,
            error: None,
            owner_run_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = now_ms();
    }
}

impl Record for Job {
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
        "jobs"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields.insert("job_type".to_string(), IndexValue::String(self.job_type.clone()));
        fields.insert("priority".to_string(), IndexValue::Int(self.priority.rank()));
        fields
    }
}
