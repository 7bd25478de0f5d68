//! Approval domain type

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use taskstore::{IndexValue, Record, now_ms};

/// Human review decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" | "approve" => Ok(Self::Approved),
            "rejected" | "reject" => Ok(Self::Rejected),
            _ => Err(format!("Unknown decision: {}", s)),
        }
    }
}

/// One review request for a Task; a Task may accumulate several
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub id: i64,
    pub task_id: i64,
    pub requested_at: i64,
    /// Set when the decision becomes APPROVED
    #[serde(default)]
    pub approved_at: Option<i64>,
    #[serde(default)]
    pub reviewed_at: Option<i64>,
    pub decision: Decision,
    #[serde(default)]
    pub notes: Option<String>,
    pub updated_at: i64,
}

impl Approval {
    pub fn new(task_id: i64, notes: Option<String>) -> Self {
        let now = now_ms();
        Self {
            id: 0,
            task_id,
            requested_at: now,
            approved_at: None,
            reviewed_at: None,
            decision: Decision::Pending,
            notes,
            updated_at: now,
        }
    }
}

impl Record for Approval {
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
        "approvals"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("task_id".to_string(), IndexValue::Int(self.task_id));
        fields.insert("decision".to_string(), IndexValue::String(self.decision.to_string()));
        fields
    }
}
