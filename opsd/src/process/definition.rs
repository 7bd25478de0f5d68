//! Workflow definitions as loaded from YAML
//!
//! ```yaml
//! name: daily-operations
//! description: Morning review, plan and delivery
//! steps:
//!   - id: plan
//!     department: orchestrator
//!     action: llm-task
//!     prompt: |
//!       Plan the day for {{project_id}} given: {{history}}
//!     gates:
//!       - kind: markdown-section
//!         file: plan.md
//!         sections: [Priorities, Risks]
//!     artifacts: [plan.md]
//! ```

use std::collections::HashSet;

use eyre::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::gates::QualityGate;

/// What a step does when it runs; matched exhaustively by the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    /// Full Task Runner cycle seeded with the step prompt
    LlmTask,
    Noop,
    HistorySynthesis,
    /// Point-in-time counts of runs, tasks and KPIs
    Snapshot,
    Consensus,
    /// Rewrite an earlier artifact
    Polish,
    Route,
    /// Assemble the delivery folder
    Deliver,
    ExecutiveSummary,
    ManagerAudit,
    /// Opportunity discovery; feeds the flywheel
    Discover,
    TruthAudit,
    Ingest,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::LlmTask => "llm-task",
            Self::Noop => "noop",
            Self::HistorySynthesis => "history-synthesis",
            Self::Snapshot => "snapshot",
            Self::Consensus => "consensus",
            Self::Polish => "polish",
            Self::Route => "route",
            Self::Deliver => "deliver",
            Self::ExecutiveSummary => "executive-summary",
            Self::ManagerAudit => "manager-audit",
            Self::Discover => "discover",
            Self::TruthAudit => "truth-audit",
            Self::Ingest => "ingest",
        };
        write!(f, "{}", name)
    }
}

/// One declared step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StepDefinition {
    pub id: String,

    /// Role label for LLM tasks; informational for the other kinds
    #[serde(default)]
    pub department: String,

    pub action: ActionKind,

    /// Template with `{{input}}`, `{{step}}` and `{{step.key}}` placeholders
    #[serde(default)]
    pub prompt: String,

    #[serde(default)]
    pub gates: Vec<QualityGate>,

    /// Files the LLM task must leave in its run directory
    #[serde(default)]
    pub artifacts: Vec<String>,

    /// Consensus panel; a default panel when empty
    #[serde(default)]
    pub personas: Vec<String>,

    /// Polish: artifact file name to rewrite. Ingest: directory to read.
    #[serde(default)]
    pub source: Option<String>,
}

impl StepDefinition {
    /// Declared gates plus an existence gate per expected artifact
    pub fn checks(&self) -> Vec<QualityGate> {
        let mut checks = self.gates.clone();
        for artifact in &self.artifacts {
            if !checks.iter().any(|g| g.file() == artifact) {
                checks.push(QualityGate::MarkdownSection {
                    file: artifact.clone(),
                    sections: Vec::new(),
                });
            }
        }
        checks
    }
}

/// A named, ordered workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    /// Reject definitions the runner could not execute unambiguously
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("Workflow has no name");
        }
        if self.steps.is_empty() {
            bail!("Workflow '{}' has no steps", self.name);
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                bail!("Workflow '{}' has a step without an id", self.name);
            }
            if !seen.insert(step.id.as_str()) {
                bail!("Workflow '{}' declares step '{}' twice", self.name, step.id);
            }
        }
        Ok(())
    }

    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
name: launch
steps:
  - id: plan
    department: orchestrator
    action: llm-task
    prompt: "Plan {{product}}"
    gates:
      - kind: csv-min-rows
        file: leads.csv
        min-rows: 5
    artifacts: [plan.md, leads.csv]
  - id: vote
    action: consensus
    personas: [CFO]
"#;

    #[test]
    fn test_parse_definition() {
        let def: WorkflowDefinition = serde_yaml::from_str(YAML).unwrap();
        def.validate().unwrap();
        assert_eq!(def.steps.len(), 2);
        assert_eq!(def.steps[0].action, ActionKind::LlmTask);
        assert_eq!(def.steps[1].action, ActionKind::Consensus);
        assert_eq!(def.step("vote").unwrap().personas, vec!["CFO"]);
        assert!(def.description.is_empty());
    }

    #[test]
    fn test_unknown_action_is_a_parse_error() {
        let yaml = "name: x\nsteps:\n  - id: a\n    action: teleport\n";
        assert!(serde_yaml::from_str::<WorkflowDefinition>(yaml).is_err());
    }

    #[test]
    fn test_duplicate_step_ids_rejected() {
        let yaml = "name: x\nsteps:\n  - id: a\n    action: noop\n  - id: a\n    action: noop\n";
        let def: WorkflowDefinition = serde_yaml::from_str(yaml).unwrap();
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn test_checks_add_existence_gates_for_artifacts() {
        let def: WorkflowDefinition = serde_yaml::from_str(YAML).unwrap();
        let checks = def.steps[0].checks();
        // leads.csv already gated, plan.md gets an existence check
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[1].file(), "plan.md");
    }

    #[test]
    fn test_display_matches_yaml_name() {
        let kind: ActionKind = serde_yaml::from_str("executive-summary").unwrap();
        assert_eq!(kind.to_string(), "executive-summary");
    }
}
