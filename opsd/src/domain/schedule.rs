//! Schedule domain type

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use taskstore::{IndexValue, Record, now_ms};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Daily,
    Weekly,
}

impl Cadence {
    /// Interval between occurrences in milliseconds
    pub fn interval_ms(&self) -> i64 {
        match self {
            Self::Daily => DAY_MS,
            Self::Weekly => 7 * DAY_MS,
        }
    }
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily => write!(f, "daily"),
            Self::Weekly => write!(f, "weekly"),
        }
    }
}

impl std::str::FromStr for Cadence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            _ => Err(format!("Unknown cadence: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    #[default]
    Active,
    Paused,
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub project_id: String,
    pub cadence: Cadence,
    /// "HH:MM", UTC
    pub time_of_day: String,
    /// Workflow started when the schedule fires
    pub process_name: String,
    pub next_run_at: i64,
    pub status: ScheduleStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Schedule {
    pub fn new(
        project_id: impl Into<String>,
        cadence: Cadence,
        time_of_day: impl Into<String>,
        process_name: impl Into<String>,
        next_run_at: i64,
    ) -> Self {
        let now = now_ms();
        Self {
            id: 0,
            project_id: project_id.into(),
            cadence,
            time_of_day: time_of_day.into(),
            process_name: process_name.into(),
            next_run_at,
            status: ScheduleStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: ScheduleStatus) {
        self.status = status;
        self.updated_at = now_ms();
    }

    /// Move `next_run_at` one interval past its previous value, not past now
    pub fn advance(&mut self) {
        self.next_run_at += self.cadence.interval_ms();
        self.updated_at = now_ms();
    }
}

impl Record for Schedule {
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
        "schedules"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields.insert("project_id".to_string(), IndexValue::String(self.project_id.clone()));
        fields.insert("next_run_at".to_string(), IndexValue::Int(self.next_run_at));
        fields
    }
}
