//! Integration tests for opsd
//!
//! These drive the public API end to end: Scheduler -> Job Queue -> handler
//! -> Process Runner -> Task Runner, against a scripted text generator.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{Map, json};
use tempfile::TempDir;

use opsd::config::Config;
use opsd::cycle::TaskRunner;
use opsd::domain::{
    Cadence, Decision, Filter, Job, JobStatus, Priority, ProcessRun, ProcessRunStatus, Run, RunStatus,
};
use opsd::llm::{GenerateOptions, Generation, LlmError, TextGenerator};
use opsd::process::{PROCESS_START, ProcessOutcome, ProcessRunner, register_handlers};
use opsd::prompts::PromptLoader;
use opsd::queue::{JobQueue, PollOutcome};
use opsd::runtime::Runtime;
use opsd::scheduler::Scheduler;

const LAUNCH_REVIEW: &str = r#"
name: launch-review
description: Plan a launch and wrap up
steps:
  - id: plan
    department: orchestrator
    action: llm-task
    prompt: "Plan the launch for {{project_id}}"
    gates:
      - kind: markdown-section
        file: plan.md
        sections: [Goals, Risks]
  - id: wrap
    action: noop
"#;

const GOOD_PLAN: &str = "# Goals\nShip it\n\n## Risks\nNone worth naming\n";
const THIN_PLAN: &str = "# Goals\nShip it\n";

/// Answers each collaborator by the template tag heading its prompt
struct Scripted {
    /// Plan written by the first task answer; later answers write GOOD_PLAN
    first_plan: &'static str,
    /// Declared risk of the plan write
    plan_risk: &'static str,
    task_calls: AtomicUsize,
    debriefs: AtomicUsize,
}

impl Scripted {
    fn new(first_plan: &'static str, plan_risk: &'static str) -> Arc<Self> {
        Arc::new(Self {
            first_plan,
            plan_risk,
            task_calls: AtomicUsize::new(0),
            debriefs: AtomicUsize::new(0),
        })
    }

    fn answer(&self, prompt: &str) -> String {
        if prompt.starts_with(&PromptLoader::tag("debrief")) {
            self.debriefs.fetch_add(1, Ordering::SeqCst);
            return json!({"summary": "The plan must include a Risks section"}).to_string();
        }
        if prompt.starts_with(&PromptLoader::tag("red_team")) {
            return json!({"risk_score": 1, "findings": [], "recommendations": []}).to_string();
        }
        assert!(prompt.starts_with(&PromptLoader::tag("task")), "unexpected prompt: {}", prompt);
        let plan = match self.task_calls.fetch_add(1, Ordering::SeqCst) {
            0 => self.first_plan,
            _ => GOOD_PLAN,
        };
        let answer = json!({
            "summary": "Wrote the launch plan",
            "files": [{"path": "plan.md", "content": plan, "risk": self.plan_risk}],
            "kpis": {"plans_written": 1}
        });
        format!("Let me draft the plan first.\n```json\n{}\n```", answer)
    }
}

#[async_trait]
impl TextGenerator for Scripted {
    async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<Generation, LlmError> {
        Ok(Generation {
            content: self.answer(prompt),
        })
    }
}

fn runtime(dir: &Path, generator: Arc<Scripted>) -> Arc<Runtime> {
    let workflows = dir.join("workflows");
    std::fs::create_dir_all(&workflows).expect("workflow dir");
    std::fs::write(workflows.join("launch-review.yml"), LAUNCH_REVIEW).expect("workflow file");

    let mut config = Config::rooted_at(dir);
    config.workflows.paths = vec!["builtin".to_string(), workflows.display().to_string()];
    Runtime::builder(config)
        .generator(generator)
        .prompts(PromptLoader::embedded_only().tagged())
        .build()
        .expect("runtime")
}

fn queue(rt: &Arc<Runtime>) -> JobQueue {
    let mut queue = JobQueue::for_runtime(rt);
    register_handlers(&mut queue, rt.clone());
    queue
}

async fn only_process(rt: &Runtime) -> ProcessRun {
    let processes: Vec<ProcessRun> = rt.state.list(vec![]).await.expect("list processes");
    assert_eq!(processes.len(), 1);
    processes.into_iter().next().expect("one process")
}

// =============================================================================
// Scheduler -> Queue -> Process -> Cycle
// =============================================================================

#[tokio::test]
async fn test_scheduled_workflow_runs_to_completion() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let generator = Scripted::new(GOOD_PLAN, "safe");
    let rt = runtime(temp.path(), generator.clone());

    let scheduler = Scheduler::new(rt.clone());
    let now = Utc.with_ymd_and_hms(2026, 3, 2, 5, 0, 0).unwrap();
    let schedule = scheduler
        .add_schedule_at("acme", Cadence::Daily, "06:00", Some("launch-review"), now)
        .await
        .unwrap();

    let jobs = scheduler.run_due_at(schedule.next_run_at).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert!(scheduler.run_due_at(schedule.next_run_at).await.unwrap().is_empty());

    let queue = queue(&rt);
    assert_eq!(queue.run_once().await.unwrap(), PollOutcome::Completed(jobs[0]));
    assert_eq!(queue.run_once().await.unwrap(), PollOutcome::Idle);

    let job: Job = rt.state.get_required(jobs[0]).await.unwrap();
    assert_eq!(job.job_type, PROCESS_START);
    assert_eq!(job.result.as_ref().unwrap()["outcome"]["status"], "completed");

    let process = only_process(&rt).await;
    assert_eq!(process.status, ProcessRunStatus::Completed);
    assert_eq!(process.inputs["schedule_id"], schedule.id);
    assert!(rt.process_dir(process.id).join("summary.md").exists());

    let runs: Vec<Run> = rt.state.list(vec![]).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
    let plan = std::fs::read_to_string(rt.run_dir(runs[0].id).join("plan.md")).unwrap();
    assert!(plan.contains("## Risks"));
    assert_eq!(generator.task_calls.load(Ordering::SeqCst), 1);
    assert_eq!(generator.debriefs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_gate_failure_is_corrected_once() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let generator = Scripted::new(THIN_PLAN, "safe");
    let rt = runtime(temp.path(), generator.clone());

    let runner = ProcessRunner::new(rt.clone());
    let process = runner.start("launch-review", "acme", Map::new()).await.unwrap();
    let outcome = runner.execute_next_step(process.id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Completed);

    let runs: Vec<Run> = rt.state.list(vec![]).await.unwrap();
    assert_eq!(runs.len(), 2, "one original run plus one correction run");
    assert_eq!(generator.debriefs.load(Ordering::SeqCst), 1);
    assert_eq!(generator.task_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_review_write_pauses_until_approved() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let generator = Scripted::new(GOOD_PLAN, "review");
    let rt = runtime(temp.path(), generator.clone());

    let runner = ProcessRunner::new(rt.clone());
    let process = runner.start("launch-review", "acme", Map::new()).await.unwrap();
    let run_id = match runner.execute_next_step(process.id).await.unwrap() {
        ProcessOutcome::AwaitingApproval { step_id, run_id } => {
            assert_eq!(step_id, "plan");
            run_id
        }
        other => panic!("expected a pause, got {:?}", other),
    };
    assert!(!rt.run_dir(run_id).join("plan.md").exists());

    // Still waiting: re-examining changes nothing
    assert!(matches!(
        runner.execute_next_step(process.id).await.unwrap(),
        ProcessOutcome::AwaitingApproval { .. }
    ));

    let pending = rt.ledger.list_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].run_id, Some(run_id));
    rt.ledger
        .review(pending[0].approval.id, Decision::Approved, Some("ship it".to_string()))
        .await
        .unwrap();

    let run = TaskRunner::new(rt.clone()).resume(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(rt.run_dir(run_id).join("plan.md").exists());

    assert_eq!(runner.execute_next_step(process.id).await.unwrap(), ProcessOutcome::Completed);
    assert_eq!(only_process(&rt).await.status, ProcessRunStatus::Completed);
}

#[tokio::test]
async fn test_unknown_workflow_job_fails_without_stopping_queue() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let rt = runtime(temp.path(), Scripted::new(GOOD_PLAN, "safe"));
    let queue = queue(&rt);

    let bad = queue
        .add(
            PROCESS_START,
            json!({"process_name": "no-such-workflow", "project_id": "acme"}),
            Priority::High,
            None,
        )
        .await
        .unwrap();
    let good = queue
        .add(
            PROCESS_START,
            json!({"process_name": "launch-review", "project_id": "acme"}),
            Priority::Normal,
            None,
        )
        .await
        .unwrap();

    assert_eq!(queue.run_once().await.unwrap(), PollOutcome::Failed(bad));
    assert_eq!(queue.run_once().await.unwrap(), PollOutcome::Completed(good));

    let failed: Job = rt.state.get_required(bad).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.unwrap().contains("no-such-workflow"));

    let completed: Vec<Job> = rt
        .state
        .list(vec![Filter::eq("status", JobStatus::Completed.to_string())])
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);
}
