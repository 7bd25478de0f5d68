//! Generator-backed collaborators
//!
//! Each call renders one prompt template, runs one bounded generation and
//! parses the structured answer.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{
    AuditVerdict, Consensus, DataIngestor, IngestSummary, Multiplexer, Opinion, Opportunity, PerformanceReview,
    PerformanceReviewer, Polisher, RedTeam, RouteDecision, Router, Scout, Wisdom,
};
use crate::domain::MemoryNote;
use crate::error::{OpsError, OpsResult};
use crate::llm::{GenerateOptions, TextGenerator, parse_typed};
use crate::prompts::PromptLoader;

const MAX_INGEST_FILES: usize = 25;
const MAX_INGEST_CHARS: usize = 4_000;
const INGEST_EXTENSIONS: &[&str] = &["md", "txt", "csv", "json", "yml", "yaml", "html", "log"];

#[derive(Debug, Deserialize)]
struct Summary {
    summary: String,
}

#[derive(Debug, Deserialize)]
struct Scouted {
    #[serde(default)]
    opportunities: Vec<Opportunity>,
}

#[derive(Debug, Deserialize)]
struct Polished {
    content: String,
}

pub struct LlmCollaborators {
    generator: Arc<dyn TextGenerator>,
    prompts: Arc<PromptLoader>,
    options: GenerateOptions,
}

impl LlmCollaborators {
    pub fn new(generator: Arc<dyn TextGenerator>, prompts: Arc<PromptLoader>, options: GenerateOptions) -> Self {
        Self {
            generator,
            prompts,
            options,
        }
    }

    async fn ask<T: DeserializeOwned>(&self, template: &str, context: &Value, options: &GenerateOptions) -> OpsResult<T> {
        debug!(%template, "LlmCollaborators::ask: called");
        let prompt = self.prompts.render(template, context)?;
        let generation = self.generator.generate(&prompt, options).await?;
        let (_, answer) =
            parse_typed::<T>(&generation.content).map_err(|source| OpsError::Validation { attempts: 1, source })?;
        Ok(answer)
    }
}

#[async_trait]
impl Scout for LlmCollaborators {
    async fn discover(&self, project_id: &str, context: &str) -> OpsResult<Vec<Opportunity>> {
        debug!(%project_id, "LlmCollaborators::discover: called");
        let scouted: Scouted = self
            .ask("scout", &json!({"project_id": project_id, "context": context}), &self.options)
            .await?;
        Ok(scouted.opportunities)
    }
}

#[async_trait]
impl RedTeam for LlmCollaborators {
    async fn audit(&self, objective: &str, report: &str, deep_truth: bool) -> OpsResult<AuditVerdict> {
        debug!(%deep_truth, "LlmCollaborators::audit: called");
        let options = if deep_truth {
            self.options.clone().with_deep_truth()
        } else {
            self.options.clone()
        };
        self.ask("red_team", &json!({"objective": objective, "report": report}), &options)
            .await
    }
}

#[async_trait]
impl Wisdom for LlmCollaborators {
    async fn history(&self, project_id: &str, notes: &[MemoryNote], context: &str) -> OpsResult<String> {
        debug!(%project_id, note_count = notes.len(), "LlmCollaborators::history: called");
        let notes: Vec<&str> = notes.iter().map(|n| n.content.as_str()).collect();
        let answer: Summary = self
            .ask(
                "history",
                &json!({"project_id": project_id, "notes": notes, "context": context}),
                &self.options,
            )
            .await?;
        Ok(answer.summary)
    }

    async fn executive_summary(&self, project_id: &str, context: &str) -> OpsResult<String> {
        debug!(%project_id, "LlmCollaborators::executive_summary: called");
        let answer: Summary = self
            .ask(
                "executive_summary",
                &json!({"project_id": project_id, "context": context}),
                &self.options,
            )
            .await?;
        Ok(answer.summary)
    }

    async fn debrief(&self, prompt: &str, error: &str) -> OpsResult<String> {
        debug!("LlmCollaborators::debrief: called");
        let answer: Summary = self
            .ask("debrief", &json!({"prompt": prompt, "error": error}), &self.options)
            .await?;
        Ok(answer.summary)
    }
}

#[async_trait]
impl PerformanceReviewer for LlmCollaborators {
    async fn review(&self, project_id: &str, context: &str) -> OpsResult<PerformanceReview> {
        debug!(%project_id, "LlmCollaborators::review: called");
        self.ask(
            "performance_review",
            &json!({"project_id": project_id, "context": context}),
            &self.options,
        )
        .await
    }
}

#[async_trait]
impl Multiplexer for LlmCollaborators {
    async fn consensus(&self, question: &str, personas: &[String]) -> OpsResult<Consensus> {
        debug!(persona_count = personas.len(), "LlmCollaborators::consensus: called");
        let mut opinions = Vec::with_capacity(personas.len());
        for persona in personas {
            let answer: Summary = self
                .ask("persona", &json!({"persona": persona, "question": question}), &self.options)
                .await?;
            opinions.push(Opinion {
                persona: persona.clone(),
                view: answer.summary,
            });
        }
        let merged: Summary = self
            .ask(
                "consensus",
                &json!({"question": question, "opinions": opinions}),
                &self.options,
            )
            .await?;
        Ok(Consensus {
            opinions,
            summary: merged.summary,
        })
    }
}

#[async_trait]
impl Polisher for LlmCollaborators {
    async fn polish(&self, content: &str, instructions: &str) -> OpsResult<String> {
        debug!(content_len = content.len(), "LlmCollaborators::polish: called");
        let polished: Polished = self
            .ask(
                "polish",
                &json!({"content": content, "instructions": instructions}),
                &self.options,
            )
            .await?;
        Ok(polished.content)
    }
}

#[async_trait]
impl Router for LlmCollaborators {
    async fn route(&self, request: &str, departments: &[String]) -> OpsResult<RouteDecision> {
        debug!("LlmCollaborators::route: called");
        self.ask(
            "route",
            &json!({"request": request, "departments": departments.join(", ")}),
            &self.options,
        )
        .await
    }
}

#[async_trait]
impl DataIngestor for LlmCollaborators {
    async fn ingest(&self, project_id: &str, dir: &Path, instructions: &str) -> OpsResult<IngestSummary> {
        debug!(%project_id, ?dir, "LlmCollaborators::ingest: called");
        let documents = read_documents(dir)?;
        let files = documents.len();
        let answer: Summary = self
            .ask(
                "ingest",
                &json!({"project_id": project_id, "instructions": instructions, "documents": documents}),
                &self.options,
            )
            .await?;
        Ok(IngestSummary {
            files,
            summary: answer.summary,
        })
    }
}

/// Text documents under `dir`, sorted by path and truncated
fn read_documents(dir: &Path) -> OpsResult<Vec<Value>> {
    if !dir.is_dir() {
        return Err(OpsError::NotFound(format!("ingest directory {}", dir.display())));
    }
    let mut documents = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "read_documents: skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        let is_text = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| INGEST_EXTENSIONS.contains(&e.to_lowercase().as_str()));
        if !entry.file_type().is_file() || !is_text {
            continue;
        }
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(?path, error = %e, "read_documents: skipping unreadable file");
                continue;
            }
        };
        let content: String = content.chars().take(MAX_INGEST_CHARS).collect();
        let relative = path.strip_prefix(dir).unwrap_or(path);
        documents.push(json!({"path": relative.display().to_string(), "content": content}));
        if documents.len() >= MAX_INGEST_FILES {
            debug!("read_documents: file limit reached");
            break;
        }
    }
    Ok(documents)
}
