//! Append-only audit records: Artifacts, KPIs, memory notes

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use taskstore::{IndexValue, Record, now_ms};

/// A file produced by a Task; never deleted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: i64,
    pub run_id: i64,
    pub task_id: i64,
    pub path: String,
    /// Coarse type, derived from the file extension
    pub artifact_type: String,
    pub created_at: i64,
}

impl Artifact {
    pub fn new(run_id: i64, task_id: i64, path: impl Into<String>) -> Self {
        let path = path.into();
        let artifact_type = std::path::Path::new(&path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_else(|| "file".to_string());
        Self {
            id: 0,
            run_id,
            task_id,
            path,
            artifact_type,
            created_at: now_ms(),
        }
    }
}

impl Record for Artifact {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn updated_at(&self) -> i64 {
        self.created_at
    }

    fn collection_name() -> &'static str {
        "artifacts"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("run_id".to_string(), IndexValue::Int(self.run_id));
        fields.insert("task_id".to_string(), IndexValue::Int(self.task_id));
        fields
    }
}

/// A metric declared by a Task response, stored verbatim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kpi {
    pub id: i64,
    pub run_id: i64,
    pub project_id: String,
    pub name: String,
    pub value: Value,
    pub created_at: i64,
}

impl Kpi {
    pub fn new(run_id: i64, project_id: impl Into<String>, name: impl Into<String>, value: Value) -> Self {
        Self {
            id: 0,
            run_id,
            project_id: project_id.into(),
            name: name.into(),
            value,
            created_at: now_ms(),
        }
    }
}

impl Record for Kpi {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn updated_at(&self) -> i64 {
        self.created_at
    }

    fn collection_name() -> &'static str {
        "kpis"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("run_id".to_string(), IndexValue::Int(self.run_id));
        fields.insert("project_id".to_string(), IndexValue::String(self.project_id.clone()));
        fields.insert("name".to_string(), IndexValue::String(self.name.clone()));
        fields
    }
}

/// Recalled knowledge for later prompts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryNote {
    pub id: i64,
    pub project_id: String,
    pub dept: String,
    pub content: String,
    pub created_at: i64,
}

impl MemoryNote {
    pub fn new(project_id: impl Into<String>, dept: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: 0,
            project_id: project_id.into(),
            dept: dept.into(),
            content: content.into(),
            created_at: now_ms(),
        }
    }
}

impl Record for MemoryNote {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn updated_at(&self) -> i64 {
        self.created_at
    }

    fn collection_name() -> &'static str {
        "notes"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("project_id".to_string(), IndexValue::String(self.project_id.clone()));
        fields.insert("dept".to_string(), IndexValue::String(self.dept.clone()));
        fields
    }
}
