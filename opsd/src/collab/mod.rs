//! External collaborators
//!
//! The runners never talk to a model, the filesystem or the web directly for
//! anything but artifact writes. Everything else goes through these traits so
//! tests can swap in scripted implementations.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::MemoryNote;
use crate::error::OpsResult;

mod llm;
mod memory;
#[cfg(test)]
pub mod mock;

pub use llm::LlmCollaborators;
pub use memory::StoreMemory;

/// Recall of prior knowledge
#[async_trait]
pub trait Memory: Send + Sync {
    /// Notes for `project_id` ranked by relevance to `query`, best first
    async fn search(&self, project_id: &str, dept: &str, query: &str, limit: usize) -> OpsResult<Vec<MemoryNote>>;

    /// Most recent notes for `project_id`, oldest first
    async fn timeline(&self, project_id: &str, limit: usize) -> OpsResult<Vec<MemoryNote>>;

    async fn remember(&self, note: MemoryNote) -> OpsResult<i64>;
}

/// Named tool execution; failures come back as text, never as errors
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn execute(&self, name: &str, args: &Value) -> String;

    /// Human-readable list of available tools for prompts
    fn catalog(&self) -> String;
}

/// A discovered business opportunity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Upside, 0-10
    pub leverage: f64,
    /// Effort and risk to start, 0-10
    pub friction: f64,
}

#[async_trait]
pub trait Scout: Send + Sync {
    async fn discover(&self, project_id: &str, context: &str) -> OpsResult<Vec<Opportunity>>;
}

/// Outcome of an adversarial review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditVerdict {
    /// 0-10, higher is worse
    pub risk_score: f64,
    #[serde(default)]
    pub findings: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[async_trait]
pub trait RedTeam: Send + Sync {
    /// `deep_truth` asks the generator to drop diplomacy entirely
    async fn audit(&self, objective: &str, report: &str, deep_truth: bool) -> OpsResult<AuditVerdict>;
}

/// Synthesis over accumulated knowledge
#[async_trait]
pub trait Wisdom: Send + Sync {
    async fn history(&self, project_id: &str, notes: &[MemoryNote], context: &str) -> OpsResult<String>;

    async fn executive_summary(&self, project_id: &str, context: &str) -> OpsResult<String>;

    /// Short explanation of a gate failure, fed into the retry
    async fn debrief(&self, prompt: &str, error: &str) -> OpsResult<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReview {
    pub score: f64,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub directives: Vec<String>,
}

#[async_trait]
pub trait PerformanceReviewer: Send + Sync {
    async fn review(&self, project_id: &str, context: &str) -> OpsResult<PerformanceReview>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opinion {
    pub persona: String,
    pub view: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consensus {
    pub opinions: Vec<Opinion>,
    pub summary: String,
}

/// Asks several personas the same question and merges the answers
#[async_trait]
pub trait Multiplexer: Send + Sync {
    async fn consensus(&self, question: &str, personas: &[String]) -> OpsResult<Consensus>;
}

#[async_trait]
pub trait Polisher: Send + Sync {
    async fn polish(&self, content: &str, instructions: &str) -> OpsResult<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub department: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reason: String,
}

/// Intent classification onto a department
#[async_trait]
pub trait Router: Send + Sync {
    async fn route(&self, request: &str, departments: &[String]) -> OpsResult<RouteDecision>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub files: usize,
    pub summary: String,
}

#[async_trait]
pub trait DataIngestor: Send + Sync {
    async fn ingest(&self, project_id: &str, dir: &Path, instructions: &str) -> OpsResult<IngestSummary>;
}

/// Every request/response collaborator the Process Runner dispatches to
#[derive(Clone)]
pub struct Collaborators {
    pub scout: Arc<dyn Scout>,
    pub red_team: Arc<dyn RedTeam>,
    pub wisdom: Arc<dyn Wisdom>,
    pub reviewer: Arc<dyn PerformanceReviewer>,
    pub multiplexer: Arc<dyn Multiplexer>,
    pub polisher: Arc<dyn Polisher>,
    pub router: Arc<dyn Router>,
    pub ingestor: Arc<dyn DataIngestor>,
}

impl Collaborators {
    /// All collaborators backed by one generator-driven implementation
    pub fn from_llm(llm: LlmCollaborators) -> Self {
        let llm = Arc::new(llm);
        Self {
            scout: llm.clone(),
            red_team: llm.clone(),
            wisdom: llm.clone(),
            reviewer: llm.clone(),
            multiplexer: llm.clone(),
            polisher: llm.clone(),
            router: llm.clone(),
            ingestor: llm,
        }
    }
}
