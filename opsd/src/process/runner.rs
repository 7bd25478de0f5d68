//! ProcessRunner - executes a workflow definition step by step
//!
//! A ProcessRun is RUNNING until every step has completed (COMPLETED) or one
//! step fails (FAILED, later steps never run). Steps run strictly in
//! declaration order. LLM-task steps delegate to the [`TaskRunner`]; a cycle
//! that pauses for approval leaves its step RUNNING so the next call picks up
//! where it stopped.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

use super::definition::{ActionKind, StepDefinition, WorkflowDefinition};
use super::handlers::PROCESS_EXECUTE;
use super::template::{Bindings, interpolate, render_value};
use crate::collab::Opportunity;
use crate::cycle::{CycleRequest, TaskRunner};
use crate::domain::{
    Artifact, Filter, Kpi, Priority, ProcessRun, ProcessRunStatus, ProcessStep, Run, RunStatus, StepStatus, now_ms,
};
use crate::error::{OpsError, OpsResult};
use crate::events::OpsEvent;
use crate::gates;
use crate::queue;
use crate::runtime::Runtime;

const SUMMARY_FILE: &str = "summary.md";
const EXECUTIVE_SUMMARY_FILE: &str = "executive-summary.md";

/// First attempt plus the one permitted correction
const MAX_GATE_ATTEMPTS: u32 = 2;

/// Notes handed to history synthesis
const HISTORY_NOTES: usize = 20;

/// Longest per-step excerpt placed in collaborator context
const CONTEXT_CHARS: usize = 2000;

const DEFAULT_PANEL: [&str; 3] = ["a cautious CFO", "a growth-focused CMO", "a skeptical customer"];

/// Where a ProcessRun stands after `execute_next_step`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Completed,
    /// Already FAILED before this call
    Failed { error: String },
    /// An LLM-task step's Run is PAUSED
    AwaitingApproval { step_id: String, run_id: i64 },
}

enum StepDone {
    Completed,
    Paused { run_id: i64 },
}

pub struct ProcessRunner {
    rt: Arc<Runtime>,
    tasks: TaskRunner,
}

impl ProcessRunner {
    pub fn new(rt: Arc<Runtime>) -> Self {
        Self {
            tasks: TaskRunner::new(rt.clone()),
            rt,
        }
    }

    /// Create a ProcessRun and its PENDING steps; nothing executes yet
    pub async fn start(&self, name: &str, project_id: &str, inputs: Map<String, Value>) -> OpsResult<ProcessRun> {
        debug!(%name, %project_id, "ProcessRunner::start: called");
        let definition = self
            .rt
            .workflows
            .get(name)
            .ok_or_else(|| OpsError::NotFound(format!("workflow {}", name)))?;

        let mut process = ProcessRun::new(name, project_id, inputs);
        process.id = self.rt.state.create(process.clone()).await?;
        for (position, step) in definition.steps.iter().enumerate() {
            self.rt
                .state
                .create(ProcessStep::new(process.id, &step.id, position as i64))
                .await?;
        }
        tokio::fs::create_dir_all(self.rt.process_dir(process.id)).await?;

        info!(
            process_run_id = process.id,
            %name,
            %project_id,
            steps = definition.steps.len(),
            "ProcessRun started"
        );
        Ok(process)
    }

    /// Run steps in order until the ProcessRun finishes, fails or waits
    ///
    /// A step failure marks the step and the ProcessRun FAILED and is
    /// returned as the error.
    pub async fn execute_next_step(&self, id: i64) -> OpsResult<ProcessOutcome> {
        debug!(%id, "ProcessRunner::execute_next_step: called");
        let mut process: ProcessRun = self.rt.state.get_required(id).await?;
        match process.status {
            ProcessRunStatus::Completed => return Ok(ProcessOutcome::Completed),
            ProcessRunStatus::Failed => {
                return Ok(ProcessOutcome::Failed {
                    error: process.error.clone().unwrap_or_default(),
                });
            }
            ProcessRunStatus::Running => {}
        }
        let Some(definition) = self.rt.workflows.get(&process.process_name).cloned() else {
            let err = OpsError::NotFound(format!("workflow {}", process.process_name));
            self.fail_process(&mut process, &err.to_string()).await;
            return Err(err);
        };

        loop {
            let steps = self.steps_for(id).await?;
            if let Some(failed) = steps.iter().find(|s| s.status == StepStatus::Failed) {
                let error = failed.error.clone().unwrap_or_else(|| format!("step {} failed", failed.step_id));
                self.fail_process(&mut process, &error).await;
                return Ok(ProcessOutcome::Failed { error });
            }

            let next = steps
                .iter()
                .find(|s| s.status == StepStatus::Running)
                .or_else(|| steps.iter().find(|s| s.status == StepStatus::Pending))
                .cloned();
            let Some(mut step) = next else {
                self.finalize(&mut process, &definition, &steps).await?;
                return Ok(ProcessOutcome::Completed);
            };
            let Some(def) = definition.step(&step.step_id).cloned() else {
                let err = OpsError::Invalid(format!(
                    "step {} is not declared by workflow {}",
                    step.step_id, definition.name
                ));
                return Err(self.abort(&mut process, &mut step, err).await);
            };

            let outcome = if step.status == StepStatus::Running {
                self.continue_step(&process, &def, &mut step, &steps).await
            } else {
                self.begin_step(&process, &def, &mut step, &steps).await
            };

            match outcome {
                Ok(StepDone::Completed) => {
                    info!(process_run_id = id, step_id = %step.step_id, action = %def.action, "Step completed");
                    self.rt.events.emit(OpsEvent::StepCompleted {
                        process_run_id: id,
                        step_id: step.step_id.clone(),
                    });
                }
                Ok(StepDone::Paused { run_id }) => {
                    info!(process_run_id = id, step_id = %step.step_id, %run_id, "Step awaiting approval");
                    return Ok(ProcessOutcome::AwaitingApproval {
                        step_id: step.step_id,
                        run_id,
                    });
                }
                Err(e) => return Err(self.abort(&mut process, &mut step, e).await),
            }
        }
    }

    async fn steps_for(&self, process_run_id: i64) -> OpsResult<Vec<ProcessStep>> {
        let mut steps: Vec<ProcessStep> = self
            .rt
            .state
            .list(vec![Filter::eq("process_run_id", process_run_id)])
            .await?;
        steps.sort_by_key(|s| s.position);
        Ok(steps)
    }

    async fn begin_step(
        &self,
        process: &ProcessRun,
        def: &StepDefinition,
        step: &mut ProcessStep,
        steps: &[ProcessStep],
    ) -> OpsResult<StepDone> {
        debug!(step_id = %step.step_id, action = %def.action, "begin_step: called");
        step.set_status(StepStatus::Running);
        self.rt.state.update(step.clone()).await?;
        self.rt.events.emit(OpsEvent::StepStarted {
            process_run_id: process.id,
            step_id: step.step_id.clone(),
        });

        let results = completed_results(steps);
        let bindings = Bindings {
            project_id: &process.project_id,
            inputs: &process.inputs,
            results: &results,
        };
        let prompt = interpolate(&def.prompt, &bindings);
        let source = def.source.as_deref().map(|s| interpolate(s, &bindings));

        let result = match def.action {
            ActionKind::LlmTask => return self.llm_step(process, def, step, &prompt, 1, None).await,
            ActionKind::Noop => json!({ "prompt": prompt }),
            ActionKind::HistorySynthesis => self.history(process, def, &prompt).await?,
            ActionKind::Snapshot => self.snapshot(process, def).await?,
            ActionKind::Consensus => self.consensus(def, &prompt).await?,
            ActionKind::Polish => self.polish(process, def, &prompt, source.as_deref(), steps).await?,
            ActionKind::Route => self.route(&prompt).await?,
            ActionKind::Deliver => self.deliver(process, steps).await?,
            ActionKind::ExecutiveSummary => self.executive_summary(process, &prompt, steps).await?,
            ActionKind::ManagerAudit => self.manager_audit(process, def, &prompt, steps).await?,
            ActionKind::Discover => self.discover(process, &prompt, steps).await?,
            ActionKind::TruthAudit => self.truth_audit(&prompt, steps).await?,
            ActionKind::Ingest => self.ingest(process, def, &prompt, source).await?,
        };

        step.complete(result);
        self.rt.state.update(step.clone()).await?;
        Ok(StepDone::Completed)
    }

    /// Pick a RUNNING step back up: a paused cycle, or an interrupted step
    async fn continue_step(
        &self,
        process: &ProcessRun,
        def: &StepDefinition,
        step: &mut ProcessStep,
        steps: &[ProcessStep],
    ) -> OpsResult<StepDone> {
        debug!(step_id = %step.step_id, task_id = ?step.task_id, "continue_step: called");
        let (Some(run_id), ActionKind::LlmTask) = (step.task_id, def.action) else {
            warn!(step_id = %step.step_id, "Step was interrupted, running it again");
            return self.begin_step(process, def, step, steps).await;
        };

        let run = self.tasks.resume(run_id).await?;
        let attempt = step
            .result
            .as_ref()
            .and_then(|r| r.get("attempt"))
            .and_then(Value::as_u64)
            .map(|a| a as u32)
            .unwrap_or(1);
        let results = completed_results(steps);
        let bindings = Bindings {
            project_id: &process.project_id,
            inputs: &process.inputs,
            results: &results,
        };
        let prompt = interpolate(&def.prompt, &bindings);
        self.llm_step(process, def, step, &prompt, attempt, Some(run)).await
    }

    /// Drive a Task Runner cycle and its quality gates, correcting at most once
    async fn llm_step(
        &self,
        process: &ProcessRun,
        def: &StepDefinition,
        step: &mut ProcessStep,
        prompt: &str,
        mut attempt: u32,
        mut existing: Option<Run>,
    ) -> OpsResult<StepDone> {
        let checks = def.checks();
        let mut context = None;
        loop {
            let run = match existing.take() {
                Some(run) => run,
                None => {
                    debug!(step_id = %def.id, %attempt, "llm_step: starting cycle");
                    let request = CycleRequest {
                        project_id: process.project_id.clone(),
                        objective: prompt.to_string(),
                        dept: (!def.department.is_empty()).then(|| def.department.clone()),
                        context: context.take(),
                        payload: json!({ "process_run_id": process.id, "step_id": def.id }),
                    };
                    let run = self.tasks.start_with(request).await?;
                    step.task_id = Some(run.id);
                    step.result = Some(json!({ "run_id": run.id, "attempt": attempt }));
                    self.rt.state.update(step.clone()).await?;
                    run
                }
            };

            match run.status {
                RunStatus::Paused => return Ok(StepDone::Paused { run_id: run.id }),
                RunStatus::Failed => {
                    return Err(OpsError::CycleFailed {
                        run_id: run.id,
                        error: run.error.clone().unwrap_or_default(),
                    });
                }
                RunStatus::Running => {
                    return Err(OpsError::Invalid(format!("Run {} is still running", run.id)));
                }
                RunStatus::Completed => {
                    if let Some(error) = self.tasks.unproductive(run.id).await? {
                        return Err(OpsError::CycleFailed { run_id: run.id, error });
                    }
                }
            }

            let run_dir = self.rt.run_dir(run.id);
            let failure = checks.iter().find_map(|gate| gates::validate(&run_dir, gate).error());
            let Some(error) = failure else {
                step.complete(json!({
                    "run_id": run.id,
                    "attempt": attempt,
                    "report": run.report,
                }));
                self.rt.state.update(step.clone()).await?;
                return Ok(StepDone::Completed);
            };

            if attempt >= MAX_GATE_ATTEMPTS {
                return Err(OpsError::Integrity(format!(
                    "step {} failed its quality gate after correction: {}",
                    def.id, error
                )));
            }
            warn!(step_id = %def.id, run_id = run.id, %error, "Quality gate failed, retrying once with a debrief");
            let debrief = self.rt.collaborators.wisdom.debrief(prompt, &error).await?;
            context = Some(format!(
                "A previous attempt (run {}) failed a quality check.\nError: {}\nDebrief: {}",
                run.id, error, debrief
            ));
            attempt += 1;
        }
    }

    async fn history(&self, process: &ProcessRun, def: &StepDefinition, prompt: &str) -> OpsResult<Value> {
        let notes = self.rt.memory.timeline(&process.project_id, HISTORY_NOTES).await?;
        let summary = self
            .rt
            .collaborators
            .wisdom
            .history(&process.project_id, &notes, prompt)
            .await?;
        self.remember(process, def, &summary).await?;
        Ok(json!({ "summary": summary, "notes": notes.len() }))
    }

    /// Counts and latest values as of now, also written to the process directory
    async fn snapshot(&self, process: &ProcessRun, def: &StepDefinition) -> OpsResult<Value> {
        let runs: Vec<Run> = self
            .rt
            .state
            .list(vec![Filter::eq("project_id", process.project_id.as_str())])
            .await?;
        let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
        for run in &runs {
            *by_status.entry(run.status.to_string()).or_default() += 1;
        }

        let kpis: Vec<Kpi> = self
            .rt
            .state
            .list(vec![Filter::eq("project_id", process.project_id.as_str())])
            .await?;
        // Ascending ids, so the last write per name is the latest
        let latest: BTreeMap<String, Value> = kpis.into_iter().map(|k| (k.name, k.value)).collect();

        let pending = self
            .rt
            .ledger
            .list_pending()
            .await?
            .into_iter()
            .filter(|p| p.run_id.is_some_and(|id| runs.iter().any(|r| r.id == id)))
            .count();

        let snapshot = json!({
            "taken_at": now_ms(),
            "runs": by_status,
            "kpis": latest,
            "pending_approvals": pending,
        });
        let path = self
            .rt
            .process_dir(process.id)
            .join(format!("snapshot-{}.json", def.id));
        write_file(&path, &serde_json::to_string_pretty(&snapshot)?).await?;
        Ok(snapshot)
    }

    async fn consensus(&self, def: &StepDefinition, prompt: &str) -> OpsResult<Value> {
        let personas: Vec<String> = if def.personas.is_empty() {
            DEFAULT_PANEL.iter().map(|p| p.to_string()).collect()
        } else {
            def.personas.clone()
        };
        let consensus = self.rt.collaborators.multiplexer.consensus(prompt, &personas).await?;
        Ok(serde_json::to_value(&consensus)?)
    }

    /// Rewrite an earlier artifact, keeping the original beside the new file
    async fn polish(
        &self,
        process: &ProcessRun,
        def: &StepDefinition,
        prompt: &str,
        source: Option<&str>,
        steps: &[ProcessStep],
    ) -> OpsResult<Value> {
        let artifacts = self.step_artifacts(steps).await?;
        let target = artifacts
            .iter()
            .rev()
            .find(|a| source.is_none_or(|name| Path::new(&a.path).ends_with(name)));

        let Some(artifact) = target else {
            if let Some(name) = source {
                return Err(OpsError::NotFound(format!("artifact {} in process run {}", name, process.id)));
            }
            debug!("polish: no artifacts, polishing the previous step result");
            let previous = steps
                .iter()
                .rev()
                .find(|s| s.status == StepStatus::Completed)
                .and_then(|s| s.result.as_ref())
                .map(describe)
                .unwrap_or_default();
            let polished = self.rt.collaborators.polisher.polish(&previous, prompt).await?;
            let path = self.rt.process_dir(process.id).join(format!("polished-{}.md", def.id));
            write_file(&path, &polished).await?;
            return Ok(json!({ "path": path.display().to_string(), "chars": polished.chars().count() }));
        };

        let original = tokio::fs::read_to_string(&artifact.path).await?;
        let polished = self.rt.collaborators.polisher.polish(&original, prompt).await?;
        let target = self.rt.sandbox.validate(polished_path(Path::new(&artifact.path)))?;
        write_file(&target, &polished).await?;
        let path = target.display().to_string();
        self.rt
            .state
            .create(Artifact::new(artifact.run_id, artifact.task_id, &path))
            .await?;
        info!(process_run_id = process.id, source = %artifact.path, %path, "Artifact polished");
        Ok(json!({ "source": artifact.path, "path": path, "chars": polished.chars().count() }))
    }

    async fn route(&self, prompt: &str) -> OpsResult<Value> {
        let departments: Vec<String> = self.rt.roles.names().into_iter().map(String::from).collect();
        let decision = self.rt.collaborators.router.route(prompt, &departments).await?;
        let department = match self.rt.roles.lookup(&decision.department) {
            Some(role) => role.name.clone(),
            None => {
                let fallback = self.rt.roles.default_role().name.clone();
                warn!(requested = %decision.department, %fallback, "Router chose an unknown department");
                fallback
            }
        };
        Ok(json!({
            "department": department,
            "requested": decision.department,
            "confidence": decision.confidence,
            "reason": decision.reason,
        }))
    }

    /// Copy every artifact produced so far into the delivery folder
    async fn deliver(&self, process: &ProcessRun, steps: &[ProcessStep]) -> OpsResult<Value> {
        let dest = self.rt.config.storage.deliveries_dir.join(process.id.to_string());
        tokio::fs::create_dir_all(&dest).await?;

        let mut files = Vec::new();
        for artifact in self.step_artifacts(steps).await? {
            let source = PathBuf::from(&artifact.path);
            let Some(name) = source.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let target = dest.join(format!("{}-{}", artifact.run_id, name));
            match tokio::fs::copy(&source, &target).await {
                Ok(_) => files.push(target.display().to_string()),
                Err(e) => warn!(path = %artifact.path, error = %e, "Artifact missing from disk, not delivered"),
            }
        }

        let mut readme = format!("# {} #{}\n\nProject: {}\n\n", process.process_name, process.id, process.project_id);
        for step in steps.iter().filter(|s| s.status == StepStatus::Completed) {
            let summary = step.result.as_ref().map(describe).unwrap_or_default();
            readme.push_str(&format!("## {}\n\n{}\n\n", step.step_id, summary.trim()));
        }
        write_file(&dest.join("README.md"), &readme).await?;

        let manifest = json!({
            "process_run_id": process.id,
            "process_name": process.process_name,
            "project_id": process.project_id,
            "files": files,
        });
        write_file(&dest.join("manifest.json"), &serde_json::to_string_pretty(&manifest)?).await?;
        info!(process_run_id = process.id, files = files.len(), path = %dest.display(), "Delivery assembled");
        Ok(json!({ "path": dest.display().to_string(), "files": files }))
    }

    async fn executive_summary(&self, process: &ProcessRun, prompt: &str, steps: &[ProcessStep]) -> OpsResult<Value> {
        let context = step_context(prompt, steps);
        let summary = self
            .rt
            .collaborators
            .wisdom
            .executive_summary(&process.project_id, &context)
            .await?;
        let path = self.rt.process_dir(process.id).join(EXECUTIVE_SUMMARY_FILE);
        write_file(&path, &summary).await?;
        Ok(json!({ "summary": summary, "path": path.display().to_string() }))
    }

    async fn manager_audit(
        &self,
        process: &ProcessRun,
        def: &StepDefinition,
        prompt: &str,
        steps: &[ProcessStep],
    ) -> OpsResult<Value> {
        let context = step_context(prompt, steps);
        let review = self.rt.collaborators.reviewer.review(&process.project_id, &context).await?;
        if !review.directives.is_empty() {
            let note = format!("Manager directives: {}", review.directives.join("; "));
            self.remember(process, def, &note).await?;
        }
        Ok(serde_json::to_value(&review)?)
    }

    /// Discover opportunities; attractive ones start the downstream workflow
    async fn discover(&self, process: &ProcessRun, prompt: &str, steps: &[ProcessStep]) -> OpsResult<Value> {
        let context = step_context(prompt, steps);
        let opportunities = self.rt.collaborators.scout.discover(&process.project_id, &context).await?;

        let flywheel = &self.rt.config.flywheel;
        let mut started = Vec::new();
        for opportunity in &opportunities {
            if opportunity.leverage < flywheel.min_leverage || opportunity.friction > flywheel.max_friction {
                debug!(title = %opportunity.title, "discover: below flywheel threshold");
                continue;
            }
            match self.spawn_downstream(process, opportunity).await {
                Ok(child) => started.push(child),
                Err(e) => warn!(
                    process_run_id = process.id,
                    title = %opportunity.title,
                    error = %e,
                    "Flywheel could not start downstream workflow"
                ),
            }
        }
        Ok(json!({ "opportunities": opportunities, "started": started }))
    }

    async fn spawn_downstream(&self, parent: &ProcessRun, opportunity: &Opportunity) -> OpsResult<i64> {
        let mut inputs = Map::new();
        inputs.insert("opportunity".to_string(), json!(opportunity.title));
        inputs.insert("description".to_string(), json!(opportunity.description));
        inputs.insert("leverage".to_string(), json!(opportunity.leverage));
        inputs.insert("friction".to_string(), json!(opportunity.friction));
        inputs.insert("parent_process_run_id".to_string(), json!(parent.id));

        let workflow = &self.rt.config.flywheel.workflow;
        let child = self.start(workflow, &parent.project_id, inputs).await?;
        let job_id = queue::enqueue(
            &self.rt.state,
            PROCESS_EXECUTE,
            json!({ "process_run_id": child.id }),
            Priority::Normal,
            None,
        )
        .await?;
        info!(
            parent = parent.id,
            child = child.id,
            %job_id,
            title = %opportunity.title,
            "Flywheel started downstream workflow"
        );
        Ok(child.id)
    }

    async fn truth_audit(&self, prompt: &str, steps: &[ProcessStep]) -> OpsResult<Value> {
        let context = step_context("", steps);
        let verdict = self.rt.collaborators.red_team.audit(prompt, &context, true).await?;
        Ok(serde_json::to_value(&verdict)?)
    }

    async fn ingest(
        &self,
        process: &ProcessRun,
        def: &StepDefinition,
        prompt: &str,
        source: Option<String>,
    ) -> OpsResult<Value> {
        let source = source.ok_or_else(|| OpsError::Invalid(format!("step {} needs a source directory", def.id)))?;
        let summary = self
            .rt
            .collaborators
            .ingestor
            .ingest(&process.project_id, Path::new(&source), prompt)
            .await?;
        self.remember(process, def, &summary.summary).await?;
        Ok(json!({ "source": source, "files": summary.files, "summary": summary.summary }))
    }

    async fn remember(&self, process: &ProcessRun, def: &StepDefinition, content: &str) -> OpsResult<()> {
        let dept = if def.department.is_empty() {
            def.action.to_string()
        } else {
            def.department.clone()
        };
        self.rt
            .memory
            .remember(crate::domain::MemoryNote::new(&process.project_id, dept, content))
            .await?;
        Ok(())
    }

    /// Artifacts of every Run driven by this ProcessRun's steps, oldest first
    async fn step_artifacts(&self, steps: &[ProcessStep]) -> OpsResult<Vec<Artifact>> {
        let mut artifacts = Vec::new();
        for run_id in steps.iter().filter_map(|s| s.task_id) {
            let mut found: Vec<Artifact> = self.rt.state.list(vec![Filter::eq("run_id", run_id)]).await?;
            artifacts.append(&mut found);
        }
        artifacts.sort_by_key(|a| a.id);
        Ok(artifacts)
    }

    async fn finalize(
        &self,
        process: &mut ProcessRun,
        definition: &WorkflowDefinition,
        steps: &[ProcessStep],
    ) -> OpsResult<()> {
        debug!(process_run_id = process.id, "finalize: called");
        let mut report = format!(
            "# {} #{}\n\n{}\n\n- Project: {}\n- Steps: {}\n\n## Steps\n\n",
            process.process_name,
            process.id,
            definition.description,
            process.project_id,
            steps.len()
        );
        for step in steps {
            let summary = step.result.as_ref().map(describe).unwrap_or_default();
            let first_line = summary.lines().next().unwrap_or_default();
            report.push_str(&format!("- **{}** ({}): {}\n", step.step_id, step.status, first_line));
        }
        write_file(&self.rt.process_dir(process.id).join(SUMMARY_FILE), &report).await?;

        process.error = None;
        process.set_status(ProcessRunStatus::Completed);
        self.rt.state.update(process.clone()).await?;
        info!(process_run_id = process.id, name = %process.process_name, "ProcessRun completed");
        self.rt.events.emit(OpsEvent::ProcessCompleted {
            process_run_id: process.id,
        });
        Ok(())
    }

    /// Mark the step and its ProcessRun FAILED, returning the cause
    async fn abort(&self, process: &mut ProcessRun, step: &mut ProcessStep, err: OpsError) -> OpsError {
        let message = err.to_string();
        warn!(process_run_id = process.id, step_id = %step.step_id, error = %message, "Step failed");
        step.fail(&message);
        if let Err(e) = self.rt.state.update(step.clone()).await {
            error!(step_id = %step.step_id, error = %e, "Failed to record step failure");
        }
        self.rt.events.emit(OpsEvent::StepFailed {
            process_run_id: process.id,
            step_id: step.step_id.clone(),
            error: message.clone(),
        });
        self.fail_process(process, &message).await;
        err
    }

    async fn fail_process(&self, process: &mut ProcessRun, message: &str) {
        process.error = Some(message.to_string());
        process.set_status(ProcessRunStatus::Failed);
        if let Err(e) = self.rt.state.update(process.clone()).await {
            error!(process_run_id = process.id, error = %e, "Failed to record process failure");
        }
        self.rt.events.emit(OpsEvent::ProcessFailed {
            process_run_id: process.id,
            error: message.to_string(),
        });
    }
}

fn completed_results(steps: &[ProcessStep]) -> HashMap<String, Value> {
    steps
        .iter()
        .filter(|s| s.status == StepStatus::Completed)
        .filter_map(|s| s.result.clone().map(|r| (s.step_id.clone(), r)))
        .collect()
}

/// Prompt followed by a short excerpt of each completed step
fn step_context(prompt: &str, steps: &[ProcessStep]) -> String {
    let mut context = prompt.trim().to_string();
    for step in steps.iter().filter(|s| s.status == StepStatus::Completed) {
        let Some(result) = &step.result else {
            continue;
        };
        context.push_str(&format!("\n\n## {}\n{}", step.step_id, truncate(&describe(result), CONTEXT_CHARS)));
    }
    context.trim().to_string()
}

/// Human-readable gist of a step result
fn describe(result: &Value) -> String {
    ["summary", "report"]
        .iter()
        .find_map(|key| result.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| render_value(result))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

/// `dir/plan.md` -> `dir/plan.polished.md`
fn polished_path(path: &Path) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("artifact");
    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}.polished.{}", stem, ext),
        None => format!("{}.polished", stem),
    };
    path.with_file_name(name)
}

async fn write_file(path: &Path, content: &str) -> OpsResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::mock::{EchoTools, FakeCollaborators};
    use crate::config::Config;
    use crate::domain::{Decision, Job, MemoryNote};
    use crate::llm::mock::ScriptedGenerator;
    use crate::runtime::test_support::{runtime, runtime_with, runtime_with_workflows};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn scripted(f: impl Fn(&str) -> String + Send + Sync + 'static) -> Arc<ScriptedGenerator> {
        Arc::new(ScriptedGenerator::from_fn(move |prompt| Ok(f(prompt))))
    }

    fn writes(path: &str, content: &str) -> String {
        json!({ "summary": format!("wrote {}", path), "files": [{ "path": path, "content": content }] }).to_string()
    }

    fn csv(rows: usize) -> String {
        let mut out = "name,email\n".to_string();
        for i in 0..rows {
            out.push_str(&format!("lead{i},lead{i}@example.com\n"));
        }
        out
    }

    async fn steps(rt: &Runtime, process_run_id: i64) -> Vec<ProcessStep> {
        let mut steps: Vec<ProcessStep> = rt
            .state
            .list(vec![Filter::eq("process_run_id", process_run_id)])
            .await
            .unwrap();
        steps.sort_by_key(|s| s.position);
        steps
    }

    const GATED: &str = r#"
name: leads
steps:
  - id: collect
    department: marketing
    action: llm-task
    prompt: "Collect leads for {{project_id}}"
    gates:
      - kind: csv-min-rows
        file: leads.csv
        min-rows: 5
  - id: wrap
    action: noop
    prompt: "done after run {{collect.run_id}}"
"#;

    #[tokio::test]
    async fn test_noop_workflow_completes_with_summary_and_events() {
        let temp = tempdir().unwrap();
        let yaml = "name: tiny\ndescription: two no-ops\nsteps:\n  - id: a\n    action: noop\n    prompt: 'hello {{who}}'\n  - id: b\n    action: noop\n    prompt: '{{a.prompt}} again'\n";
        let rt = runtime_with_workflows(
            temp.path(),
            Arc::new(ScriptedGenerator::new(Vec::<String>::new())),
            Arc::new(FakeCollaborators::default()),
            &[yaml],
        );
        let mut events = rt.events.subscribe();
        let runner = ProcessRunner::new(rt.clone());

        let mut inputs = Map::new();
        inputs.insert("who".to_string(), json!("ops"));
        let process = runner.start("tiny", "acme", inputs).await.unwrap();
        assert_eq!(steps(&rt, process.id).await.len(), 2);

        let outcome = runner.execute_next_step(process.id).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Completed);

        let all = steps(&rt, process.id).await;
        assert!(all.iter().all(|s| s.status == StepStatus::Completed));
        assert_eq!(all[1].result.as_ref().unwrap()["prompt"], "hello ops again");

        let summary = std::fs::read_to_string(rt.process_dir(process.id).join(SUMMARY_FILE)).unwrap();
        assert!(summary.contains("# tiny #"));
        assert!(summary.contains("**b** (completed)"));

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event.event_type());
        }
        assert_eq!(
            seen,
            vec!["step_started", "step_completed", "step_started", "step_completed", "process_completed"]
        );

        // Terminal runs are left alone
        assert_eq!(runner.execute_next_step(process.id).await.unwrap(), ProcessOutcome::Completed);
    }

    #[tokio::test]
    async fn test_unknown_workflow_is_not_found_at_start() {
        let temp = tempdir().unwrap();
        let rt = runtime(
            temp.path(),
            Arc::new(ScriptedGenerator::new(Vec::<String>::new())),
            Arc::new(FakeCollaborators::default()),
        );
        let err = ProcessRunner::new(rt.clone())
            .start("no-such-flow", "acme", Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::NotFound(ref what) if what.contains("no-such-flow")));
        let runs: Vec<ProcessRun> = rt.state.list(vec![]).await.unwrap();
        assert!(runs.is_empty());
    }

    #[tokio::test]
    async fn test_gate_failure_gets_one_debriefed_correction() {
        let temp = tempdir().unwrap();
        let attempts = AtomicUsize::new(0);
        let generator = scripted(move |_| {
            // First cycle writes too few rows, the correction enough
            let rows = if attempts.fetch_add(1, Ordering::SeqCst) == 0 { 2 } else { 6 };
            writes("leads.csv", &csv(rows))
        });
        let fake = Arc::new(FakeCollaborators::default());
        let rt = runtime_with_workflows(temp.path(), generator.clone(), fake.clone(), &[GATED]);
        let runner = ProcessRunner::new(rt.clone());

        let process = runner.start("leads", "acme", Map::new()).await.unwrap();
        let outcome = runner.execute_next_step(process.id).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::Completed);
        assert_eq!(generator.call_count(), 2);
        assert!(generator.prompts()[1].contains("expected at least 5 data rows, found 2"));
        assert_eq!(fake.calls().iter().filter(|c| *c == "debrief").count(), 1);

        let all = steps(&rt, process.id).await;
        let collect = all[0].result.as_ref().unwrap();
        assert_eq!(collect["attempt"], 2);
        let second_run = collect["run_id"].as_i64().unwrap();
        assert_eq!(all[0].task_id, Some(second_run));
        assert_eq!(
            all[1].result.as_ref().unwrap()["prompt"],
            format!("done after run {}", second_run)
        );
    }

    #[tokio::test]
    async fn test_gate_failing_twice_fails_the_process() {
        let temp = tempdir().unwrap();
        let generator = scripted(|_| writes("leads.csv", &csv(2)));
        let rt = runtime_with_workflows(
            temp.path(),
            generator.clone(),
            Arc::new(FakeCollaborators::default()),
            &[GATED],
        );
        let runner = ProcessRunner::new(rt.clone());
        let process = runner.start("leads", "acme", Map::new()).await.unwrap();

        let err = runner.execute_next_step(process.id).await.unwrap_err();
        assert!(matches!(err, OpsError::Integrity(_)));
        assert_eq!(generator.call_count(), 2);

        let stored: ProcessRun = rt.state.get_required(process.id).await.unwrap();
        assert_eq!(stored.status, ProcessRunStatus::Failed);
        assert!(stored.error.unwrap().contains("quality gate"));
        let all = steps(&rt, process.id).await;
        assert_eq!(all[0].status, StepStatus::Failed);
        assert_eq!(all[1].status, StepStatus::Pending);

        // No third attempt
        let again = runner.execute_next_step(process.id).await.unwrap();
        assert!(matches!(again, ProcessOutcome::Failed { .. }));
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_paused_cycle_keeps_step_running_until_approved() {
        let temp = tempdir().unwrap();
        let yaml = "name: ship\nsteps:\n  - id: deploy\n    department: engineering\n    action: llm-task\n    prompt: Deploy the site\n  - id: after\n    action: noop\n";
        let generator = scripted(|_| r#"{"summary": "deploy", "commands": [{"command": "npm install left-pad"}]}"#.to_string());
        let rt = runtime_with_workflows(
            temp.path(),
            generator,
            Arc::new(FakeCollaborators::default()),
            &[yaml],
        );
        let runner = ProcessRunner::new(rt.clone());
        let process = runner.start("ship", "acme", Map::new()).await.unwrap();

        let outcome = runner.execute_next_step(process.id).await.unwrap();
        let ProcessOutcome::AwaitingApproval { step_id, run_id } = outcome else {
            panic!("expected a pause, got {:?}", outcome);
        };
        assert_eq!(step_id, "deploy");
        let all = steps(&rt, process.id).await;
        assert_eq!(all[0].status, StepStatus::Running);
        assert_eq!(all[0].task_id, Some(run_id));
        assert_eq!(all[1].status, StepStatus::Pending);

        // Still waiting without a decision
        let again = runner.execute_next_step(process.id).await.unwrap();
        assert!(matches!(again, ProcessOutcome::AwaitingApproval { .. }));

        let pending = rt.ledger.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        rt.ledger
            .review(pending[0].approval.id, Decision::Approved, None)
            .await
            .unwrap();

        assert_eq!(runner.execute_next_step(process.id).await.unwrap(), ProcessOutcome::Completed);
        let run: Run = rt.state.get_required(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(steps(&rt, process.id).await.iter().all(|s| s.status == StepStatus::Completed));
    }

    #[tokio::test]
    async fn test_failed_cycle_fails_the_process() {
        let temp = tempdir().unwrap();
        let yaml = "name: doomed\nsteps:\n  - id: work\n    action: llm-task\n    prompt: Try\n  - id: never\n    action: noop\n";
        let generator = scripted(|_| "no json at all".to_string());
        let rt = runtime_with_workflows(
            temp.path(),
            generator,
            Arc::new(FakeCollaborators::default()),
            &[yaml],
        );
        let runner = ProcessRunner::new(rt.clone());
        let process = runner.start("doomed", "acme", Map::new()).await.unwrap();

        let err = runner.execute_next_step(process.id).await.unwrap_err();
        assert!(matches!(err, OpsError::CycleFailed { .. }));
        assert!(err.to_string().contains("attempt"));
        let all = steps(&rt, process.id).await;
        assert_eq!(all[0].status, StepStatus::Failed);
        assert_eq!(all[1].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_ingest_without_source_is_invalid() {
        let temp = tempdir().unwrap();
        let yaml = "name: read\nsteps:\n  - id: read\n    action: ingest\n  - id: never\n    action: noop\n";
        let rt = runtime_with_workflows(
            temp.path(),
            Arc::new(ScriptedGenerator::new(Vec::<String>::new())),
            Arc::new(FakeCollaborators::default()),
            &[yaml],
        );
        let mut events = rt.events.subscribe();
        let runner = ProcessRunner::new(rt.clone());
        let process = runner.start("read", "acme", Map::new()).await.unwrap();

        let err = runner.execute_next_step(process.id).await.unwrap_err();
        assert!(matches!(err, OpsError::Invalid(_)));
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event.event_type());
        }
        assert_eq!(seen, vec!["step_started", "step_failed", "process_failed"]);
    }

    #[tokio::test]
    async fn test_discovery_starts_downstream_for_attractive_opportunities() {
        let temp = tempdir().unwrap();
        let yaml = "name: scan\nsteps:\n  - id: scout\n    action: discover\n    prompt: Look around {{project_id}}\n";
        let opportunity = |title: &str, leverage: f64, friction: f64| Opportunity {
            title: title.to_string(),
            description: String::new(),
            leverage,
            friction,
        };
        let fake = Arc::new(FakeCollaborators::with_opportunities(vec![
            opportunity("Partner with gyms", 9.0, 2.0),
            opportunity("Build a rocket", 10.0, 9.0),
            opportunity("Tweak the footer", 5.0, 1.0),
        ]));
        let rt = runtime_with_workflows(
            temp.path(),
            Arc::new(ScriptedGenerator::new(Vec::<String>::new())),
            fake,
            &[yaml],
        );
        let runner = ProcessRunner::new(rt.clone());
        let parent = runner.start("scan", "acme", Map::new()).await.unwrap();

        assert_eq!(runner.execute_next_step(parent.id).await.unwrap(), ProcessOutcome::Completed);

        let result = steps(&rt, parent.id).await[0].result.clone().unwrap();
        assert_eq!(result["opportunities"].as_array().unwrap().len(), 3);
        let started = result["started"].as_array().unwrap();
        assert_eq!(started.len(), 1);

        let child: ProcessRun = rt.state.get_required(started[0].as_i64().unwrap()).await.unwrap();
        assert_eq!(child.process_name, "opportunity-execution");
        assert_eq!(child.status, ProcessRunStatus::Running);
        assert_eq!(child.inputs["opportunity"], "Partner with gyms");
        assert_eq!(child.inputs["parent_process_run_id"], parent.id);

        let jobs: Vec<Job> = rt.state.list(vec![]).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_type, PROCESS_EXECUTE);
        assert_eq!(jobs[0].payload["process_run_id"], child.id);
    }

    #[tokio::test]
    async fn test_flywheel_start_failure_does_not_fail_discovery() {
        let temp = tempdir().unwrap();
        let flows = temp.path().join("flows");
        std::fs::create_dir_all(&flows).unwrap();
        std::fs::write(
            flows.join("scan.yml"),
            "name: scan\nsteps:\n  - id: scout\n    action: discover\n",
        )
        .unwrap();
        let mut config = Config::rooted_at(temp.path());
        config.workflows.paths = vec!["builtin".to_string(), flows.display().to_string()];
        config.flywheel.workflow = "missing-workflow".to_string();
        let fake = Arc::new(FakeCollaborators::with_opportunities(vec![Opportunity {
            title: "Partner with gyms".to_string(),
            description: String::new(),
            leverage: 9.0,
            friction: 1.0,
        }]));
        let rt = runtime_with(
            config,
            Arc::new(ScriptedGenerator::new(Vec::<String>::new())),
            fake,
            Arc::new(EchoTools::default()),
        );
        let runner = ProcessRunner::new(rt.clone());
        let parent = runner.start("scan", "acme", Map::new()).await.unwrap();

        assert_eq!(runner.execute_next_step(parent.id).await.unwrap(), ProcessOutcome::Completed);
        let result = steps(&rt, parent.id).await[0].result.clone().unwrap();
        assert!(result["started"].as_array().unwrap().is_empty());
        let all: Vec<ProcessRun> = rt.state.list(vec![]).await.unwrap();
        assert_eq!(all.len(), 1);
        let jobs: Vec<Job> = rt.state.list(vec![]).await.unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn test_consensus_polish_route_and_delivery() {
        let temp = tempdir().unwrap();
        let yaml = r#"
name: launch
steps:
  - id: vet
    action: consensus
    prompt: "Launch {{product}}?"
    personas: [CFO, CMO]
  - id: draft
    department: marketing
    action: llm-task
    prompt: "Draft the launch. Panel said: {{vet.summary}}"
    artifacts: [launch.md]
  - id: shine
    action: polish
    source: launch.md
    prompt: Make it punchy
  - id: owner
    action: route
    prompt: Who owns the follow-up?
  - id: ship
    action: deliver
"#;
        let generator = scripted(|_| writes("launch.md", "# Launch\nplan"));
        let fake = Arc::new(FakeCollaborators::default());
        let rt = runtime_with_workflows(temp.path(), generator.clone(), fake.clone(), &[yaml]);
        let runner = ProcessRunner::new(rt.clone());
        let mut inputs = Map::new();
        inputs.insert("product".to_string(), json!("Widget"));
        let process = runner.start("launch", "acme", inputs).await.unwrap();

        assert_eq!(runner.execute_next_step(process.id).await.unwrap(), ProcessOutcome::Completed);
        assert!(generator.prompts()[0].contains("Panel said: agreed"));

        let all = steps(&rt, process.id).await;
        let vet = all[0].result.as_ref().unwrap();
        assert_eq!(vet["opinions"].as_array().unwrap().len(), 2);

        let run_id = all[1].task_id.unwrap();
        let polished = rt.run_dir(run_id).join("launch.polished.md");
        assert_eq!(std::fs::read_to_string(&polished).unwrap(), "# LAUNCH\nPLAN");
        assert_eq!(all[3].result.as_ref().unwrap()["department"], "engineering");

        let delivery = rt.config.storage.deliveries_dir.join(process.id.to_string());
        let manifest: Value =
            serde_json::from_str(&std::fs::read_to_string(delivery.join("manifest.json")).unwrap()).unwrap();
        assert_eq!(manifest["files"].as_array().unwrap().len(), 2);
        assert!(delivery.join(format!("{}-launch.md", run_id)).exists());
        assert!(delivery.join("README.md").exists());

        let calls = fake.calls();
        for expected in ["consensus", "polish", "route"] {
            assert!(calls.iter().any(|c| c == expected), "missing {}", expected);
        }
    }

    #[tokio::test]
    async fn test_polish_of_missing_artifact_is_not_found() {
        let temp = tempdir().unwrap();
        let yaml = "name: shine\nsteps:\n  - id: shine\n    action: polish\n    source: nothing.md\n";
        let rt = runtime_with_workflows(
            temp.path(),
            Arc::new(ScriptedGenerator::new(Vec::<String>::new())),
            Arc::new(FakeCollaborators::default()),
            &[yaml],
        );
        let runner = ProcessRunner::new(rt.clone());
        let process = runner.start("shine", "acme", Map::new()).await.unwrap();
        let err = runner.execute_next_step(process.id).await.unwrap_err();
        assert!(matches!(err, OpsError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_builtin_daily_operations_end_to_end() {
        let temp = tempdir().unwrap();
        let plan = "# Plan\n## Priorities\nship\n## Risks\nnone\n## Metrics\nsignups\n";
        let generator = scripted(move |_| writes("plan.md", plan));
        let fake = Arc::new(FakeCollaborators::default());
        let rt = runtime(temp.path(), generator.clone(), fake.clone());
        let runner = ProcessRunner::new(rt.clone());

        let process = runner.start("daily-operations", "acme", Map::new()).await.unwrap();
        assert_eq!(runner.execute_next_step(process.id).await.unwrap(), ProcessOutcome::Completed);

        let dir = rt.process_dir(process.id);
        assert!(dir.join("snapshot-snapshot.json").exists());
        assert_eq!(
            std::fs::read_to_string(dir.join(EXECUTIVE_SUMMARY_FILE)).unwrap(),
            "summary for acme"
        );
        assert!(dir.join(SUMMARY_FILE).exists());
        assert!(generator.prompts()[0].contains("history of 0 notes"));

        let calls = fake.calls();
        let position = |name: &str| calls.iter().position(|c| c == name).unwrap();
        assert!(position("history") < position("discover:acme"));
        assert!(position("discover:acme") < position("review"));
        assert!(position("review") < position("executive_summary"));

        // history summary, the plan task and the manager directives
        let notes: Vec<MemoryNote> = rt.state.list(vec![Filter::eq("project_id", "acme")]).await.unwrap();
        assert_eq!(notes.len(), 3);
        assert!(notes.iter().any(|n| n.content.starts_with("Manager directives")));
    }
}
