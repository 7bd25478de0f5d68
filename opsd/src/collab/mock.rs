//! Scripted collaborators for unit tests

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use super::*;

/// Answers every collaborator call from fixed data and records the call
#[derive(Default)]
pub struct FakeCollaborators {
    pub opportunities: Vec<Opportunity>,
    /// Consumed front to back; empty means a clean audit
    pub verdicts: Mutex<VecDeque<AuditVerdict>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeCollaborators {
    pub fn with_opportunities(opportunities: Vec<Opportunity>) -> Self {
        Self {
            opportunities,
            ..Default::default()
        }
    }

    pub fn with_verdicts(verdicts: Vec<AuditVerdict>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.into()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: impl Into<String>) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call.into());
        }
    }

    pub fn into_collaborators(self: Arc<Self>) -> Collaborators {
        Collaborators {
            scout: self.clone(),
            red_team: self.clone(),
            wisdom: self.clone(),
            reviewer: self.clone(),
            multiplexer: self.clone(),
            polisher: self.clone(),
            router: self.clone(),
            ingestor: self,
        }
    }
}

#[async_trait]
impl Scout for FakeCollaborators {
    async fn discover(&self, project_id: &str, _context: &str) -> OpsResult<Vec<Opportunity>> {
        self.record(format!("discover:{}", project_id));
        Ok(self.opportunities.clone())
    }
}

#[async_trait]
impl RedTeam for FakeCollaborators {
    async fn audit(&self, _objective: &str, _report: &str, deep_truth: bool) -> OpsResult<AuditVerdict> {
        self.record(format!("audit:{}", deep_truth));
        let next = self.verdicts.lock().ok().and_then(|mut v| v.pop_front());
        Ok(next.unwrap_or(AuditVerdict {
            risk_score: 0.0,
            findings: Vec::new(),
            recommendations: Vec::new(),
        }))
    }
}

#[async_trait]
impl Wisdom for FakeCollaborators {
    async fn history(&self, _project_id: &str, notes: &[MemoryNote], _context: &str) -> OpsResult<String> {
        self.record("history");
        Ok(format!("history of {} notes", notes.len()))
    }

    async fn executive_summary(&self, project_id: &str, _context: &str) -> OpsResult<String> {
        self.record("executive_summary");
        Ok(format!("summary for {}", project_id))
    }

    async fn debrief(&self, _prompt: &str, error: &str) -> OpsResult<String> {
        self.record("debrief");
        Ok(format!("fix: {}", error))
    }
}

#[async_trait]
impl PerformanceReviewer for FakeCollaborators {
    async fn review(&self, _project_id: &str, _context: &str) -> OpsResult<PerformanceReview> {
        self.record("review");
        Ok(PerformanceReview {
            score: 6.0,
            strengths: vec!["speed".to_string()],
            weaknesses: Vec::new(),
            directives: vec!["cite sources".to_string()],
        })
    }
}

#[async_trait]
impl Multiplexer for FakeCollaborators {
    async fn consensus(&self, _question: &str, personas: &[String]) -> OpsResult<Consensus> {
        self.record("consensus");
        Ok(Consensus {
            opinions: personas
                .iter()
                .map(|p| Opinion {
                    persona: p.clone(),
                    view: "agree".to_string(),
                })
                .collect(),
            summary: "agreed".to_string(),
        })
    }
}

#[async_trait]
impl Polisher for FakeCollaborators {
    async fn polish(&self, content: &str, _instructions: &str) -> OpsResult<String> {
        self.record("polish");
        Ok(content.to_uppercase())
    }
}

#[async_trait]
impl Router for FakeCollaborators {
    async fn route(&self, _request: &str, departments: &[String]) -> OpsResult<RouteDecision> {
        self.record("route");
        Ok(RouteDecision {
            department: departments.first().cloned().unwrap_or_default(),
            confidence: 0.9,
            reason: "first listed".to_string(),
        })
    }
}

#[async_trait]
impl DataIngestor for FakeCollaborators {
    async fn ingest(&self, _project_id: &str, dir: &Path, _instructions: &str) -> OpsResult<IngestSummary> {
        self.record("ingest");
        Ok(IngestSummary {
            files: 0,
            summary: format!("ingested {}", dir.display()),
        })
    }
}

/// Tool runner that echoes the call back
#[derive(Default)]
pub struct EchoTools {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ToolRunner for EchoTools {
    async fn execute(&self, name: &str, args: &Value) -> String {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(name.to_string());
        }
        format!("{} -> {}", name, args)
    }

    fn catalog(&self) -> String {
        "- echo: returns its arguments".to_string()
    }
}
