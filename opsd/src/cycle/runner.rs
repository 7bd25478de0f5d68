//! TaskRunner - drains a Run's Task queue

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::response::{CommandRequest, ExternalAction, FileWrite, TaskResponse};
use crate::domain::{
    Artifact, Decision, Filter, Kpi, MemoryNote, RiskTier, Run, RunStatus, Task, TaskStatus,
};
use crate::error::{OpsError, OpsResult};
use crate::events::OpsEvent;
use crate::llm::{GenerateOptions, ParseError, parse_typed};
use crate::policy::Action;
use crate::roles::Role;
use crate::runtime::Runtime;

const REPORT_FILE: &str = "report.md";

/// What seeds a new Run
#[derive(Debug, Clone, Default)]
pub struct CycleRequest {
    pub project_id: String,
    pub objective: String,
    /// Department of the seed Task; the default role when `None`
    pub dept: Option<String>,
    /// Extra instructions appended to the seed Task
    pub context: Option<String>,
    pub payload: Value,
}

enum Drained {
    Exhausted,
    Paused,
}

/// How an exhausted queue settles the Run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settle {
    /// First drain after `start`: exhaustion completes the Run
    OnExhaustion,
    /// After `resume`: completes only once every Task completed
    AllCompleted,
}

enum Effect<'a> {
    Write(&'a FileWrite),
    Command(&'a CommandRequest),
    External(&'a ExternalAction),
}

/// One effect with its policy action and effective tier
struct Planned<'a> {
    effect: Effect<'a>,
    action: Option<Action>,
    tier: RiskTier,
}

impl Planned<'_> {
    fn describe(&self) -> String {
        match (&self.action, &self.effect) {
            (Some(action), _) => format!("{}: {}", action.kind(), action.detail()),
            (None, Effect::External(a)) => format!("{}: {}", a.kind, a.detail),
            (None, _) => "unknown effect".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct TaskRunner {
    rt: Arc<Runtime>,
}

impl TaskRunner {
    pub fn new(rt: Arc<Runtime>) -> Self {
        Self { rt }
    }

    /// Create a RUNNING Run seeded with one orchestrator Task and drain it
    pub async fn start(&self, objective: &str, project_id: &str) -> OpsResult<Run> {
        self.start_with(CycleRequest {
            project_id: project_id.to_string(),
            objective: objective.to_string(),
            ..Default::default()
        })
        .await
    }

    pub async fn start_with(&self, request: CycleRequest) -> OpsResult<Run> {
        debug!(project_id = %request.project_id, "TaskRunner::start_with: called");
        let mut run = Run::new(&request.project_id, &request.objective);
        run.id = self.rt.state.create(run.clone()).await?;
        info!(run_id = run.id, project_id = %run.project_id, "Run started");
        self.rt.events.emit(OpsEvent::RunStarted {
            run_id: run.id,
            project_id: run.project_id.clone(),
            objective: run.objective.clone(),
        });

        let dept = request
            .dept
            .unwrap_or_else(|| self.rt.roles.default_role().name.clone());
        let description = match request.context {
            Some(context) => format!("{}\n\n{}", request.objective, context),
            None => request.objective.clone(),
        };
        let seed = Task::new(run.id, dept, "Deliver the objective", description).with_payload(request.payload);
        self.rt.state.create(seed).await?;

        self.drive(run, Settle::OnExhaustion).await
    }

    /// Re-examine a PAUSED Run's blocked Tasks and continue if none still wait
    pub async fn resume(&self, run_id: i64) -> OpsResult<Run> {
        debug!(%run_id, "TaskRunner::resume: called");
        let mut run: Run = self.rt.state.get_required(run_id).await?;
        if run.status != RunStatus::Paused {
            debug!(status = %run.status, "resume: run is not paused, nothing to do");
            return Ok(run);
        }

        let blocked: Vec<Task> = self
            .rt
            .state
            .list(vec![
                Filter::eq("run_id", run_id),
                Filter::eq("status", TaskStatus::NeedsApproval.to_string()),
            ])
            .await?;
        let mut waiting = false;
        for mut task in blocked {
            if self.rt.ledger.is_approved(task.id).await? {
                info!(task_id = task.id, "Approved task requeued");
                task.set_status(TaskStatus::Pending);
                self.rt.state.update(task).await?;
            } else {
                // Rejected or undecided: blocks until a later request is approved
                debug!(task_id = task.id, "resume: task still unapproved");
                waiting = true;
            }
        }

        if waiting {
            info!(%run_id, "Run still awaiting approval");
            return Ok(run);
        }

        run.set_status(RunStatus::Running);
        self.rt.state.update(run.clone()).await?;
        info!(%run_id, "Run resumed");
        self.drive(run, Settle::AllCompleted).await
    }

    /// Fail a PAUSED Run's rejected Tasks with the reviewer notes, then resume it
    ///
    /// Operator escape hatch: rejection alone never unblocks a Run.
    pub async fn dismiss_rejected(&self, run_id: i64) -> OpsResult<Run> {
        debug!(%run_id, "TaskRunner::dismiss_rejected: called");
        let run: Run = self.rt.state.get_required(run_id).await?;
        if run.status != RunStatus::Paused {
            debug!(status = %run.status, "dismiss_rejected: run is not paused, nothing to do");
            return Ok(run);
        }

        let blocked: Vec<Task> = self
            .rt
            .state
            .list(vec![
                Filter::eq("run_id", run_id),
                Filter::eq("status", TaskStatus::NeedsApproval.to_string()),
            ])
            .await?;
        for mut task in blocked {
            if self.rt.ledger.is_approved(task.id).await? {
                continue;
            }
            let Some(approval) = self.rt.ledger.latest(task.id).await? else {
                continue;
            };
            if approval.decision != Decision::Rejected {
                continue;
            }
            let reason = match approval.notes {
                Some(notes) => format!("Rejected by reviewer: {}", notes),
                None => "Rejected by reviewer".to_string(),
            };
            info!(task_id = task.id, "Rejected task dismissed");
            task.fail(&reason);
            self.rt.state.update(task.clone()).await?;
            self.rt.events.emit(OpsEvent::TaskFailed {
                run_id,
                task_id: task.id,
                error: reason,
            });
        }

        self.resume(run_id).await
    }

    /// Last Task error when none of the Run's Tasks completed
    pub async fn unproductive(&self, run_id: i64) -> OpsResult<Option<String>> {
        let tasks = self.tasks_for(run_id).await?;
        if tasks.iter().any(|t| t.status == TaskStatus::Completed) {
            return Ok(None);
        }
        let error = tasks
            .iter()
            .rev()
            .find_map(|t| t.error.clone())
            .unwrap_or_else(|| "no task completed".to_string());
        Ok(Some(error))
    }

    async fn drive(&self, mut run: Run, settle: Settle) -> OpsResult<Run> {
        if let Drained::Paused = self.drain(&mut run).await? {
            return Ok(run);
        }
        self.finish(run, settle).await
    }

    /// Execute PENDING Tasks lowest id first until none remain or one pauses
    async fn drain(&self, run: &mut Run) -> OpsResult<Drained> {
        loop {
            let Some(mut task) = self.next_pending(run.id).await? else {
                debug!(run_id = run.id, "drain: queue exhausted");
                return Ok(Drained::Exhausted);
            };
            task.set_status(TaskStatus::Running);
            self.rt.state.update(task.clone()).await?;
            info!(run_id = run.id, task_id = task.id, dept = %task.dept, "Task started");
            self.rt.events.emit(OpsEvent::TaskStarted {
                run_id: run.id,
                task_id: task.id,
                dept: task.dept.clone(),
            });

            match self.execute(run, &mut task).await {
                Ok(()) => {}
                Err(OpsError::ApprovalRequired { task_id, approval_id }) => {
                    run.set_status(RunStatus::Paused);
                    self.rt.state.update(run.clone()).await?;
                    info!(run_id = run.id, %task_id, %approval_id, "Run paused for approval");
                    self.rt.events.emit(OpsEvent::RunPaused {
                        run_id: run.id,
                        approval_id,
                    });
                    return Ok(Drained::Paused);
                }
                Err(e) => {
                    warn!(run_id = run.id, task_id = task.id, error = %e, "Task failed");
                    task.fail(e.to_string());
                    self.rt.state.update(task.clone()).await?;
                    self.rt.events.emit(OpsEvent::TaskFailed {
                        run_id: run.id,
                        task_id: task.id,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    async fn next_pending(&self, run_id: i64) -> OpsResult<Option<Task>> {
        let pending: Vec<Task> = self
            .rt
            .state
            .list(vec![
                Filter::eq("run_id", run_id),
                Filter::eq("status", TaskStatus::Pending.to_string()),
            ])
            .await?;
        Ok(pending.into_iter().next())
    }

    async fn tasks_for(&self, run_id: i64) -> OpsResult<Vec<Task>> {
        Ok(self.rt.state.list(vec![Filter::eq("run_id", run_id)]).await?)
    }

    /// Conclude the Run, then audit it once and run at most one correction pass
    async fn finish(&self, mut run: Run, settle: Settle) -> OpsResult<Run> {
        self.conclude(&mut run, settle).await?;
        if run.status != RunStatus::Completed || run.audit.is_some() {
            return Ok(run);
        }

        let report = run.report.clone().unwrap_or_default();
        let verdict = match self.rt.collaborators.red_team.audit(&run.objective, &report, false).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(run_id = run.id, error = %e, "Audit failed, keeping run completed");
                run.audit = Some(json!({"error": e.to_string()}));
                self.rt.state.update(run.clone()).await?;
                return Ok(run);
            }
        };
        run.audit = Some(serde_json::to_value(&verdict)?);
        self.rt.state.update(run.clone()).await?;

        let threshold = self.rt.config.cycle.audit_threshold;
        if verdict.risk_score <= threshold || verdict.recommendations.is_empty() {
            debug!(risk_score = verdict.risk_score, %threshold, "finish: audit passed");
            return Ok(run);
        }

        info!(
            run_id = run.id,
            risk_score = verdict.risk_score,
            corrections = verdict.recommendations.len(),
            "Audit above threshold, running one correction pass"
        );
        let role = self.rt.config.cycle.correction_role.clone();
        for recommendation in &verdict.recommendations {
            let task = Task::new(run.id, &role, "Address audit finding", recommendation)
                .with_payload(json!({"findings": verdict.findings}));
            self.rt.state.create(task).await?;
        }
        run.set_status(RunStatus::Running);
        self.rt.state.update(run.clone()).await?;
        if let Drained::Paused = self.drain(&mut run).await? {
            return Ok(run);
        }
        self.conclude(&mut run, settle).await?;
        Ok(run)
    }

    /// Write the report and settle the terminal status
    async fn conclude(&self, run: &mut Run, settle: Settle) -> OpsResult<()> {
        let tasks = self.tasks_for(run.id).await?;
        run.report = Some(self.write_report(run, &tasks).await?);

        let unfinished: Vec<String> = tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Completed)
            .map(|t| format!("#{}", t.id))
            .collect();
        if settle == Settle::OnExhaustion || unfinished.is_empty() {
            run.error = None;
            run.set_status(RunStatus::Completed);
            self.rt.state.update(run.clone()).await?;
            info!(run_id = run.id, "Run completed");
            self.rt.events.emit(OpsEvent::RunCompleted { run_id: run.id });
        } else {
            let last = tasks.iter().rev().find_map(|t| t.error.clone()).unwrap_or_default();
            let error = format!("Tasks {} did not complete: {}", unfinished.join(", "), last);
            run.error = Some(error.clone());
            run.set_status(RunStatus::Failed);
            self.rt.state.update(run.clone()).await?;
            warn!(run_id = run.id, %error, "Run failed");
            self.rt.events.emit(OpsEvent::RunFailed { run_id: run.id, error });
        }
        Ok(())
    }

    async fn write_report(&self, run: &Run, tasks: &[Task]) -> OpsResult<String> {
        let artifacts: Vec<Artifact> = self.rt.state.list(vec![Filter::eq("run_id", run.id)]).await?;
        let kpis: Vec<Kpi> = self.rt.state.list(vec![Filter::eq("run_id", run.id)]).await?;

        let mut report = format!("# Run {}: {}\n\nProject: {}\n\n## Tasks\n", run.id, run.objective, run.project_id);
        for task in tasks {
            let summary = task
                .result
                .as_ref()
                .and_then(|r| r.get("summary"))
                .and_then(Value::as_str)
                .or(task.error.as_deref())
                .unwrap_or("");
            report.push_str(&format!(
                "- [{}] #{} {} ({}): {}\n",
                task.status, task.id, task.title, task.dept, summary
            ));
        }
        if !artifacts.is_empty() {
            report.push_str("\n## Artifacts\n");
            for artifact in &artifacts {
                report.push_str(&format!("- {} ({})\n", artifact.path, artifact.artifact_type));
            }
        }
        if !kpis.is_empty() {
            report.push_str("\n## KPIs\n");
            for kpi in &kpis {
                report.push_str(&format!("- {}: {}\n", kpi.name, kpi.value));
            }
        }

        let dir = self.rt.run_dir(run.id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(REPORT_FILE), &report).await?;
        Ok(report)
    }

    async fn execute(&self, run: &Run, task: &mut Task) -> OpsResult<()> {
        let role = self.rt.roles.resolve(&task.dept).clone();
        debug!(task_id = task.id, role = %role.name, "execute: called");

        let query = format!("{} {}", task.title, task.description);
        let memories: Vec<String> = match self
            .rt
            .memory
            .search(&run.project_id, &role.name, &query, self.rt.config.cycle.memory_limit)
            .await
        {
            Ok(notes) => notes.into_iter().map(|n| n.content).collect(),
            Err(e) => {
                warn!(error = %e, "Recall failed, continuing without memories");
                Vec::new()
            }
        };

        let mut options = GenerateOptions::from_config(&self.rt.config.llm);
        if let Some(temperature) = role.temperature {
            options = options.with_temperature(temperature);
        }
        let payload = match &task.payload {
            Value::Null => None,
            Value::Object(map) if map.is_empty() => None,
            other => Some(serde_json::to_string_pretty(other)?),
        };
        let mut context = json!({
            "role_instructions": role.instructions,
            "objective": run.objective,
            "title": task.title,
            "description": task.description,
            "payload": payload,
            "memories": memories,
            "tools": self.rt.tools.catalog(),
        });

        let (prompt, reasoning, response) = self.generate_response(task, &mut context, &options).await?;
        let (reasoning, response) = if response.tool_calls.is_empty() {
            (reasoning, response)
        } else {
            self.tool_round(&prompt, &response, &options).await?
        };
        self.apply(run, task, &role, reasoning, response).await
    }

    /// Generate and parse, re-prompting with the parse error as correction
    async fn generate_response(
        &self,
        task: &mut Task,
        context: &mut Value,
        options: &GenerateOptions,
    ) -> OpsResult<(String, Option<String>, TaskResponse)> {
        let max_attempts = self.rt.config.cycle.max_parse_attempts.max(1);
        let mut last_error = ParseError::Empty;
        for attempt in 1..=max_attempts {
            if attempt > 1 {
                context["correction"] = Value::String(last_error.to_string());
            }
            let prompt = self.rt.prompts.render("task", context)?;
            let generation = self.rt.generator.generate(&prompt, options).await?;
            match parse_typed::<TaskResponse>(&generation.content) {
                Ok((reasoning, response)) => {
                    debug!(%attempt, "generate_response: parsed");
                    return Ok((prompt, reasoning, response));
                }
                Err(e) => {
                    warn!(task_id = task.id, %attempt, error = %e, "Unparseable task response");
                    task.retries += 1;
                    last_error = e;
                }
            }
        }
        Err(OpsError::Validation {
            attempts: max_attempts,
            source: last_error,
        })
    }

    /// Run the requested tools and take exactly one more generation
    async fn tool_round(
        &self,
        prompt: &str,
        response: &TaskResponse,
        options: &GenerateOptions,
    ) -> OpsResult<(Option<String>, TaskResponse)> {
        debug!(calls = response.tool_calls.len(), "tool_round: called");
        let mut results = Vec::with_capacity(response.tool_calls.len());
        for call in &response.tool_calls {
            let output = self.rt.tools.execute(&call.name, &call.args).await;
            results.push(json!({"name": call.name, "output": output}));
        }
        let followup = self
            .rt
            .prompts
            .render("tool_followup", &json!({"original_prompt": prompt, "results": results}))?;
        let generation = self.rt.generator.generate(&followup, options).await?;
        let (reasoning, mut response) = parse_typed::<TaskResponse>(&generation.content)
            .map_err(|source| OpsError::Validation { attempts: 1, source })?;
        if !response.tool_calls.is_empty() {
            debug!("tool_round: ignoring tool calls in the final response");
            response.tool_calls.clear();
        }
        Ok((reasoning, response))
    }

    fn effective_tier(&self, action: Option<&Action>, declared: Option<RiskTier>, task_level: RiskTier) -> RiskTier {
        let classified = match action {
            Some(action) => self.rt.classifier.classify(action),
            None => RiskTier::Blocked,
        };
        classified.max(declared.unwrap_or_default()).max(task_level)
    }

    fn plan<'a>(&self, task: &Task, response: &'a TaskResponse) -> Vec<Planned<'a>> {
        let mut plan = Vec::new();
        for file in &response.files {
            let action = Action::FileWrite { path: file.path.clone() };
            plan.push(Planned {
                tier: self.effective_tier(Some(&action), file.risk, task.risk_level),
                action: Some(action),
                effect: Effect::Write(file),
            });
        }
        for command in &response.commands {
            let action = Action::Command {
                command: command.command.clone(),
            };
            plan.push(Planned {
                tier: self.effective_tier(Some(&action), command.risk, task.risk_level),
                action: Some(action),
                effect: Effect::Command(command),
            });
        }
        for external in &response.actions {
            let action = external.to_action();
            plan.push(Planned {
                tier: self.effective_tier(action.as_ref(), external.risk, task.risk_level),
                action,
                effect: Effect::External(external),
            });
        }
        plan
    }

    /// Gate every effect, then apply them; a REVIEW effect without approval pauses
    async fn apply(
        &self,
        run: &Run,
        task: &mut Task,
        role: &Role,
        reasoning: Option<String>,
        response: TaskResponse,
    ) -> OpsResult<()> {
        let plan = self.plan(task, &response);

        let review: Vec<String> = plan
            .iter()
            .filter(|p| p.tier == RiskTier::Review)
            .map(Planned::describe)
            .collect();
        if !review.is_empty() && !self.rt.ledger.is_approved(task.id).await? {
            let approval_id = self.rt.ledger.create_request(task.id, Some(review.join("\n"))).await?;
            task.set_status(TaskStatus::NeedsApproval);
            task.result = Some(json!({"summary": response.summary, "pending_review": review}));
            self.rt.state.update(task.clone()).await?;
            self.rt.events.emit(OpsEvent::ApprovalRequested {
                run_id: run.id,
                task_id: task.id,
                approval_id,
            });
            return Err(OpsError::ApprovalRequired {
                task_id: task.id,
                approval_id,
            });
        }

        let mut written = Vec::new();
        let mut commands = Vec::new();
        let mut actions = Vec::new();
        let mut skipped = Vec::new();
        for planned in &plan {
            if planned.tier == RiskTier::Blocked {
                warn!(task_id = task.id, effect = %planned.describe(), "Blocked effect skipped");
                skipped.push(json!({"effect": planned.describe(), "reason": "blocked by policy"}));
                continue;
            }
            match planned.effect {
                Effect::Write(file) => match self.write_file(run, task, file).await {
                    Ok(path) => written.push(path),
                    Err(OpsError::PolicyViolation(violation)) => {
                        warn!(task_id = task.id, %violation, "Write outside sandbox skipped");
                        skipped.push(json!({"effect": planned.describe(), "reason": violation.to_string()}));
                    }
                    Err(e) => return Err(e),
                },
                Effect::Command(command) => {
                    // Execution belongs to an external executor
                    info!(task_id = task.id, command = %command.command, "Command recorded");
                    commands.push(command.command.clone());
                }
                Effect::External(external) => {
                    info!(task_id = task.id, kind = %external.kind, detail = %external.detail, "Action recorded");
                    actions.push(json!({"kind": external.kind, "detail": external.detail}));
                }
            }
        }

        let mut delegated = Vec::new();
        for delegation in &response.delegate {
            let child = Task::new(run.id, &delegation.dept, &delegation.title, &delegation.description)
                .with_payload(delegation.payload.clone());
            let id = self.rt.state.create(child).await?;
            debug!(task_id = id, dept = %delegation.dept, "apply: delegated");
            delegated.push(id);
        }

        let mut recorded_kpis = Vec::new();
        for (name, value) in &response.kpis {
            if !value.is_number() {
                warn!(%name, %value, "Non-numeric KPI ignored");
                continue;
            }
            self.rt
                .state
                .create(Kpi::new(run.id, &run.project_id, name, value.clone()))
                .await?;
            recorded_kpis.push(name.clone());
        }

        let note = MemoryNote::new(&run.project_id, &role.name, format!("{}: {}", task.title, response.summary));
        if let Err(e) = self.rt.memory.remember(note).await {
            warn!(error = %e, "Failed to store memory note");
        }

        task.result = Some(json!({
            "summary": response.summary,
            "reasoning": reasoning,
            "files": written,
            "commands": commands,
            "actions": actions,
            "delegated": delegated,
            "kpis": recorded_kpis,
            "skipped": skipped,
        }));
        task.set_status(TaskStatus::Completed);
        self.rt.state.update(task.clone()).await?;
        info!(run_id = run.id, task_id = task.id, "Task completed");
        self.rt.events.emit(OpsEvent::TaskCompleted {
            run_id: run.id,
            task_id: task.id,
        });
        Ok(())
    }

    /// Resolve against the run directory, confine, write, record the Artifact
    async fn write_file(&self, run: &Run, task: &Task, file: &FileWrite) -> OpsResult<String> {
        let requested = Path::new(&file.path);
        let target: PathBuf = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            self.rt.run_dir(run.id).join(requested)
        };
        let target = self.rt.sandbox.validate(&target)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &file.content).await?;

        let path = target.display().to_string();
        self.rt.state.create(Artifact::new(run.id, task.id, &path)).await?;
        info!(run_id = run.id, task_id = task.id, %path, "Artifact written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::AuditVerdict;
    use crate::collab::mock::{EchoTools, FakeCollaborators};
    use crate::config::Config;
    use crate::domain::{Approval, MemoryNote};
    use crate::llm::LlmError;
    use crate::llm::mock::ScriptedGenerator;
    use crate::prompts::PromptLoader;
    use crate::runtime::test_support::{runtime, runtime_with};
    use std::time::Duration;
    use tempfile::tempdir;

    const SEED: &str = "**Deliver the objective**";

    fn scripted(f: impl Fn(&str) -> String + Send + Sync + 'static) -> Arc<ScriptedGenerator> {
        Arc::new(ScriptedGenerator::from_fn(move |prompt| Ok(f(prompt))))
    }

    async fn tasks(rt: &Runtime, run_id: i64) -> Vec<Task> {
        rt.state.list(vec![Filter::eq("run_id", run_id)]).await.unwrap()
    }

    #[tokio::test]
    async fn test_start_writes_artifact_and_completes() {
        let temp = tempdir().unwrap();
        let generator = Arc::new(ScriptedGenerator::new(vec![
            r##"Plan first. {"summary": "wrote plan", "files": [{"path": "plan.md", "content": "# Plan"}], "kpis": {"leads": 3, "mood": "good"}}"##,
        ]));
        let fake = Arc::new(FakeCollaborators::default());
        let rt = runtime(temp.path(), generator, fake.clone());

        let run = TaskRunner::new(rt.clone()).start("Launch the newsletter", "acme").await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        let plan = rt.run_dir(run.id).join("plan.md");
        assert_eq!(std::fs::read_to_string(&plan).unwrap(), "# Plan");
        assert!(rt.run_dir(run.id).join("report.md").exists());
        assert!(run.report.unwrap().contains("plan.md"));

        let artifacts: Vec<Artifact> = rt.state.list(vec![Filter::eq("run_id", run.id)]).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        let kpis: Vec<Kpi> = rt.state.list(vec![Filter::eq("run_id", run.id)]).await.unwrap();
        assert_eq!(kpis.len(), 1);
        assert_eq!(kpis[0].name, "leads");

        let task = &tasks(&rt, run.id).await[0];
        assert_eq!(task.dept, "orchestrator");
        assert_eq!(task.result.as_ref().unwrap()["reasoning"], "Plan first.");
        let notes: Vec<MemoryNote> = rt.state.list(vec![]).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(fake.calls(), vec!["audit:false"]);
    }

    #[tokio::test]
    async fn test_tasks_run_in_ascending_id_order_including_delegations() {
        let temp = tempdir().unwrap();
        let generator = scripted(|prompt| {
            if prompt.contains(SEED) {
                r#"{"summary": "split", "delegate": [
                    {"dept": "research", "title": "Research A"},
                    {"dept": "unknown-dept", "title": "Research B"}]}"#
                    .to_string()
            } else if prompt.contains("**Research A**") {
                r#"{"summary": "a", "delegate": [{"dept": "finance", "title": "Budget C"}]}"#.to_string()
            } else {
                r#"{"summary": "done"}"#.to_string()
            }
        });
        let rt = runtime(temp.path(), generator.clone(), Arc::new(FakeCollaborators::default()));

        let run = TaskRunner::new(rt.clone()).start("Grow", "acme").await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);

        let prompts = generator.prompts();
        let order = ["Deliver the objective", "Research A", "Research B", "Budget C"];
        assert_eq!(prompts.len(), order.len());
        for (prompt, title) in prompts.iter().zip(order) {
            assert!(prompt.contains(&format!("**{}**", title)), "expected {} first", title);
        }
        let all = tasks(&rt, run.id).await;
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|t| t.status == TaskStatus::Completed));
        assert!(all.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn test_unparseable_response_is_retried_with_correction() {
        let temp = tempdir().unwrap();
        let generator = Arc::new(ScriptedGenerator::new(vec![
            "I am not sure what to do.",
            r#"{"summary": "half"#,
            r#"{"summary": "ok"}"#,
        ]));
        let rt = runtime(temp.path(), generator.clone(), Arc::new(FakeCollaborators::default()));

        let run = TaskRunner::new(rt.clone()).start("Grow", "acme").await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        let task = &tasks(&rt, run.id).await[0];
        assert_eq!(task.retries, 2);
        let prompts = generator.prompts();
        assert!(!prompts[0].contains("previous answer was rejected"));
        assert!(prompts[1].contains("No JSON object found"));
        assert!(prompts[2].contains("unterminated object"));
    }

    #[tokio::test]
    async fn test_exhausted_parse_attempts_fail_the_task() {
        let temp = tempdir().unwrap();
        let generator = scripted(|_| "still thinking".to_string());
        let rt = runtime(temp.path(), generator.clone(), Arc::new(FakeCollaborators::default()));

        let run = TaskRunner::new(rt.clone()).start("Grow", "acme").await.unwrap();

        assert_eq!(generator.call_count(), 3);
        let task = &tasks(&rt, run.id).await[0];
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.as_ref().unwrap().contains("3 attempt"));
        // Exhaustion after start completes the Run; the report carries the failure
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.report.unwrap().contains("3 attempt"));
        assert_eq!(
            TaskRunner::new(rt.clone()).unproductive(run.id).await.unwrap().as_deref(),
            task.error.as_deref()
        );
    }

    #[tokio::test]
    async fn test_failed_task_does_not_abort_the_queue() {
        let temp = tempdir().unwrap();
        let generator = Arc::new(ScriptedGenerator::from_fn(|prompt| {
            if prompt.contains(SEED) {
                Ok(r#"{"summary": "s", "delegate": [{"dept": "qa", "title": "Flaky"}, {"dept": "qa", "title": "Solid"}]}"#.to_string())
            } else if prompt.contains("**Flaky**") {
                Err(LlmError::Timeout(Duration::from_millis(5)))
            } else {
                Ok(r#"{"summary": "fine"}"#.to_string())
            }
        }));
        let rt = runtime(temp.path(), generator, Arc::new(FakeCollaborators::default()));

        let run = TaskRunner::new(rt.clone()).start("Grow", "acme").await.unwrap();

        let all = tasks(&rt, run.id).await;
        assert_eq!(all[1].status, TaskStatus::Failed);
        assert!(all[1].error.as_ref().unwrap().contains("Transport"));
        assert_eq!(all[2].status, TaskStatus::Completed);
        assert_eq!(run.status, RunStatus::Completed);
    }

    fn review_then_done() -> Arc<ScriptedGenerator> {
        scripted(|prompt| {
            if prompt.contains(SEED) {
                r#"{"summary": "export", "files": [{"path": "crm.csv", "content": "name\nann\n", "risk": "review"}],
                    "delegate": [{"dept": "marketing", "title": "Follow up"}]}"#
                    .to_string()
            } else {
                r#"{"summary": "done"}"#.to_string()
            }
        })
    }

    #[tokio::test]
    async fn test_review_effect_pauses_then_resumes_after_approval() {
        let temp = tempdir().unwrap();
        let generator = review_then_done();
        let rt = runtime(temp.path(), generator.clone(), Arc::new(FakeCollaborators::default()));
        let runner = TaskRunner::new(rt.clone());

        let run = runner.start("Export leads", "acme").await.unwrap();
        assert_eq!(run.status, RunStatus::Paused);
        let all = tasks(&rt, run.id).await;
        assert_eq!(all.len(), 1, "gated task must not delegate before approval");
        assert_eq!(all[0].status, TaskStatus::NeedsApproval);
        assert!(!rt.run_dir(run.id).join("crm.csv").exists());

        let pending = rt.ledger.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].approval.notes.as_ref().unwrap().contains("crm.csv"));

        // No decision yet: stays paused, nothing re-runs
        let run = runner.resume(run.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Paused);
        assert_eq!(generator.call_count(), 1);

        rt.ledger
            .review(pending[0].approval.id, Decision::Approved, None)
            .await
            .unwrap();
        let run = runner.resume(run.id).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert!(rt.run_dir(run.id).join("crm.csv").exists());
        let all = tasks(&rt, run.id).await;
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|t| t.status == TaskStatus::Completed));
        assert_eq!(generator.call_count(), 3);
    }

    #[tokio::test]
    async fn test_resume_with_failed_task_fails_the_run() {
        let temp = tempdir().unwrap();
        let generator = Arc::new(ScriptedGenerator::from_fn(|prompt| {
            if prompt.contains(SEED) {
                Ok(r#"{"summary": "export", "files": [{"path": "crm.csv", "content": "x", "risk": "review"}],
                    "delegate": [{"dept": "qa", "title": "Flaky"}]}"#
                    .to_string())
            } else {
                Err(LlmError::Timeout(Duration::from_millis(5)))
            }
        }));
        let fake = Arc::new(FakeCollaborators::default());
        let rt = runtime(temp.path(), generator, fake.clone());
        let runner = TaskRunner::new(rt.clone());

        let run = runner.start("Export leads", "acme").await.unwrap();
        assert_eq!(run.status, RunStatus::Paused);
        let approvals: Vec<Approval> = rt.state.list(vec![]).await.unwrap();
        rt.ledger.review(approvals[0].id, Decision::Approved, None).await.unwrap();

        let run = runner.resume(run.id).await.unwrap();

        let all = tasks(&rt, run.id).await;
        assert_eq!(all[0].status, TaskStatus::Completed);
        assert_eq!(all[1].status, TaskStatus::Failed);
        assert_eq!(run.status, RunStatus::Failed);
        let error = run.error.unwrap();
        assert!(error.contains(&format!("#{}", all[1].id)));
        assert!(error.contains("Transport"));
        assert!(fake.calls().iter().all(|c| !c.starts_with("audit")));
    }

    #[tokio::test]
    async fn test_rejected_task_keeps_run_paused() {
        let temp = tempdir().unwrap();
        let generator = review_then_done();
        let rt = runtime(temp.path(), generator.clone(), Arc::new(FakeCollaborators::default()));
        let runner = TaskRunner::new(rt.clone());

        let run = runner.start("Export leads", "acme").await.unwrap();
        let approvals: Vec<Approval> = rt.state.list(vec![]).await.unwrap();
        rt.ledger
            .review(approvals[0].id, Decision::Rejected, Some("not this week".to_string()))
            .await
            .unwrap();

        let run = runner.resume(run.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Paused);
        assert!(run.error.is_none());
        let task = &tasks(&rt, run.id).await[0];
        assert_eq!(task.status, TaskStatus::NeedsApproval);
        assert_eq!(generator.call_count(), 1);

        // A later approved request unblocks the same Task
        let again = rt.ledger.create_request(task.id, Some("retry next week".to_string())).await.unwrap();
        rt.ledger.review(again, Decision::Approved, None).await.unwrap();
        let run = runner.resume(run.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(rt.run_dir(run.id).join("crm.csv").exists());
    }

    #[tokio::test]
    async fn test_dismiss_fails_rejected_task_and_run() {
        let temp = tempdir().unwrap();
        let rt = runtime(temp.path(), review_then_done(), Arc::new(FakeCollaborators::default()));
        let runner = TaskRunner::new(rt.clone());

        let run = runner.start("Export leads", "acme").await.unwrap();
        let approvals: Vec<Approval> = rt.state.list(vec![]).await.unwrap();

        // Undecided requests are not dismissed
        let run = runner.dismiss_rejected(run.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Paused);

        rt.ledger
            .review(approvals[0].id, Decision::Rejected, Some("not this week".to_string()))
            .await
            .unwrap();
        let run = runner.dismiss_rejected(run.id).await.unwrap();

        let task = &tasks(&rt, run.id).await[0];
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("Rejected by reviewer: not this week"));
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.unwrap().contains("not this week"));
    }

    #[tokio::test]
    async fn test_blocked_and_escaping_effects_are_skipped() {
        let temp = tempdir().unwrap();
        let generator = Arc::new(ScriptedGenerator::new(vec![
            r#"{"summary": "mixed",
                "files": [{"path": "../../../../../../etc/evil", "content": "x"}, {"path": "ok.md", "content": "fine"}],
                "commands": [{"command": "rm -rf /"}, {"command": "git status"}],
                "actions": [{"kind": "spend", "detail": "$500 on ads"}, {"kind": "teleport", "detail": "?"}]}"#,
        ]));
        let rt = runtime(temp.path(), generator, Arc::new(FakeCollaborators::default()));

        let run = TaskRunner::new(rt.clone()).start("Grow", "acme").await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        let task = &tasks(&rt, run.id).await[0];
        let result = task.result.as_ref().unwrap();
        assert_eq!(result["skipped"].as_array().unwrap().len(), 4);
        assert_eq!(result["commands"], json!(["git status"]));
        assert_eq!(result["files"].as_array().unwrap().len(), 1);
        let artifacts: Vec<Artifact> = rt.state.list(vec![]).await.unwrap();
        assert_eq!(artifacts.len(), 1);
    }

    #[tokio::test]
    async fn test_unrecognised_command_fails_closed_to_review() {
        let temp = tempdir().unwrap();
        let generator = Arc::new(ScriptedGenerator::new(vec![
            r#"{"summary": "deploy", "commands": [{"command": "npm install left-pad"}]}"#,
        ]));
        let rt = runtime(temp.path(), generator, Arc::new(FakeCollaborators::default()));

        let run = TaskRunner::new(rt.clone()).start("Ship", "acme").await.unwrap();
        assert_eq!(run.status, RunStatus::Paused);
    }

    #[tokio::test]
    async fn test_audit_above_threshold_runs_one_correction_pass() {
        let temp = tempdir().unwrap();
        let generator = scripted(|_| r#"{"summary": "ok"}"#.to_string());
        let fake = Arc::new(FakeCollaborators::with_verdicts(vec![
            AuditVerdict {
                risk_score: 9.0,
                findings: vec!["unsupported claim".to_string()],
                recommendations: vec!["Cite the source".to_string()],
            },
            AuditVerdict {
                risk_score: 10.0,
                findings: Vec::new(),
                recommendations: vec!["never used".to_string()],
            },
        ]));
        let rt = runtime(temp.path(), generator.clone(), fake.clone());

        let run = TaskRunner::new(rt.clone()).start("Grow", "acme").await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.audit.as_ref().unwrap()["risk_score"], 9.0);
        let all = tasks(&rt, run.id).await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].dept, "qa");
        assert_eq!(all[1].description, "Cite the source");
        assert_eq!(all[1].status, TaskStatus::Completed);
        assert_eq!(fake.calls().iter().filter(|c| c.starts_with("audit")).count(), 1);
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_tool_calls_get_exactly_one_follow_up() {
        let temp = tempdir().unwrap();
        let generator = scripted(|prompt| {
            if prompt.starts_with(&PromptLoader::tag("tool_followup")) {
                r#"{"summary": "used tools", "tool_calls": [{"name": "again"}]}"#.to_string()
            } else {
                r#"{"summary": "need data", "tool_calls": [{"name": "read_file", "args": {"path": "a.md"}}]}"#.to_string()
            }
        });
        let tools = Arc::new(EchoTools::default());
        let rt = runtime_with(
            Config::rooted_at(temp.path()),
            generator.clone(),
            Arc::new(FakeCollaborators::default()),
            tools.clone(),
        );

        let run = TaskRunner::new(rt.clone()).start("Grow", "acme").await.unwrap();

        assert_eq!(generator.call_count(), 2);
        assert_eq!(*tools.calls.lock().unwrap(), vec!["read_file".to_string()]);
        assert!(generator.prompts()[1].contains("read_file -> {\"path\":\"a.md\"}"));
        let task = &tasks(&rt, run.id).await[0];
        assert_eq!(task.result.as_ref().unwrap()["summary"], "used tools");
    }

    #[tokio::test]
    async fn test_memories_are_recalled_into_prompts() {
        let temp = tempdir().unwrap();
        let generator = scripted(|_| r#"{"summary": "ok"}"#.to_string());
        let rt = runtime(temp.path(), generator.clone(), Arc::new(FakeCollaborators::default()));
        rt.memory
            .remember(MemoryNote::new("acme", "orchestrator", "Newsletter launch doubled signups"))
            .await
            .unwrap();

        TaskRunner::new(rt.clone()).start("Launch the newsletter", "acme").await.unwrap();

        assert!(generator.prompts()[0].contains("- Newsletter launch doubled signups"));
    }

    #[tokio::test]
    async fn test_resume_unknown_run_is_not_found() {
        let temp = tempdir().unwrap();
        let rt = runtime(
            temp.path(),
            scripted(|_| String::new()),
            Arc::new(FakeCollaborators::default()),
        );
        let result = TaskRunner::new(rt).resume(42).await;
        assert!(matches!(result, Err(OpsError::NotFound(_))));
    }
}
