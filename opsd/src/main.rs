//! opsd - approval-gated task and workflow orchestrator
//!
//! CLI entry point: a thin operator surface over the library.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use opsd::cli::{Cli, Command, JobsCommand, OutputFormat, ProcessCommand, ScheduleCommand, get_log_path};
use opsd::config::Config;
use opsd::cycle::TaskRunner;
use opsd::domain::{
    Decision, Job, JobStatus, Priority, ProcessRun, ProcessRunStatus, Run, RunStatus, Schedule,
    ScheduleStatus,
};
use opsd::events::spawn_event_logger;
use opsd::process::{PROCESS_EXECUTE, ProcessOutcome, ProcessRunner, register_handlers};
use opsd::queue::{self, JobQueue};
use opsd::runtime::Runtime;
use opsd::scheduler::{Heartbeat, Scheduler};

fn setup_logging(level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    if let Some(dir) = log_path.parent() {
        fs::create_dir_all(dir).context("Failed to create log directory")?;
    }

    let level = match level.map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.effective_log_level()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let rt = Runtime::from_config(config).context("Failed to initialize runtime")?;
    let format = cli.format;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Daemon => cmd_daemon(rt).await,
        Command::Run { objective, project } => {
            let run = TaskRunner::new(rt.clone()).start(&objective, &project).await?;
            print_run(&rt, format, &run).await
        }
        Command::Resume { run_id } => {
            let run = TaskRunner::new(rt.clone()).resume(run_id).await?;
            print_run(&rt, format, &run).await
        }
        Command::Dismiss { run_id } => {
            let run = TaskRunner::new(rt.clone()).dismiss_rejected(run_id).await?;
            print_run(&rt, format, &run).await
        }
        Command::Approvals => cmd_approvals(&rt, format).await,
        Command::Approve { approval_id, notes } => cmd_review(&rt, format, approval_id, Decision::Approved, notes).await,
        Command::Reject { approval_id, notes } => cmd_review(&rt, format, approval_id, Decision::Rejected, notes).await,
        Command::Process { command } => cmd_process(rt, format, command).await,
        Command::Schedule { command } => cmd_schedule(rt, format, command).await,
        Command::Jobs { command } => cmd_jobs(&rt, format, command).await,
        Command::Status => cmd_status(&rt, format).await,
    }
}

/// Job worker plus scheduler daemon until Ctrl-C
async fn cmd_daemon(rt: Arc<Runtime>) -> Result<()> {
    debug!("cmd_daemon: called");
    let events_path = rt.config.storage.store_dir.join("events.jsonl");
    let logger = spawn_event_logger(&rt.events, &events_path)?;

    let mut queue = JobQueue::for_runtime(&rt);
    register_handlers(&mut queue, rt.clone());
    let queue = Arc::new(queue);
    let worker = tokio::spawn({
        let queue = queue.clone();
        async move { queue.worker().await }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = tokio::spawn({
        let scheduler = Scheduler::new(rt.clone());
        async move { scheduler.daemon(shutdown_rx).await }
    });

    println!(
        "{} worker and scheduler running (events: {}). Press Ctrl-C to stop.",
        "opsd".bold(),
        events_path.display()
    );
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    println!("Stopping after the in-flight job...");

    shutdown_tx.send_replace(true);
    queue.stop();
    scheduler.await.context("Scheduler task panicked")??;
    worker.await.context("Worker task panicked")?;
    logger.abort();
    rt.state.shutdown().await?;
    Ok(())
}

async fn cmd_approvals(rt: &Runtime, format: OutputFormat) -> Result<()> {
    let pending = rt.ledger.list_pending().await?;
    if format == OutputFormat::Json {
        return print_json(&pending);
    }
    if pending.is_empty() {
        println!("No pending approvals");
        return Ok(());
    }
    for entry in pending {
        println!(
            "{} task {} run {} {}",
            format!("#{}", entry.approval.id).bold(),
            entry.approval.task_id,
            entry.run_id.map(|id| id.to_string()).unwrap_or_else(|| "?".to_string()),
            entry.task_title.unwrap_or_default()
        );
        if let Some(notes) = entry.approval.notes {
            println!("    {}", notes.dimmed());
        }
    }
    Ok(())
}

async fn cmd_review(
    rt: &Runtime,
    format: OutputFormat,
    approval_id: i64,
    decision: Decision,
    notes: Option<String>,
) -> Result<()> {
    let approval = rt.ledger.review(approval_id, decision, notes).await?;
    if format == OutputFormat::Json {
        return print_json(&approval);
    }
    println!(
        "Approval #{} {} (task {})",
        approval.id,
        paint(&decision.to_string()),
        approval.task_id
    );
    println!("Run `opsd resume <run-id>` to continue the paused Run");
    Ok(())
}

async fn cmd_process(rt: Arc<Runtime>, format: OutputFormat, command: ProcessCommand) -> Result<()> {
    let runner = ProcessRunner::new(rt.clone());
    match command {
        ProcessCommand::Start {
            name,
            project,
            inputs,
            enqueue,
        } => {
            let inputs: Map<String, Value> = inputs.into_iter().collect();
            let process = runner.start(&name, &project, inputs).await?;
            if enqueue {
                let job_id = queue::enqueue(
                    &rt.state,
                    PROCESS_EXECUTE,
                    json!({ "process_run_id": process.id }),
                    Priority::Normal,
                    None,
                )
                .await?;
                return match format {
                    OutputFormat::Json => print_json(&json!({ "process_run_id": process.id, "job_id": job_id })),
                    OutputFormat::Text => {
                        println!("ProcessRun #{} queued as job #{}", process.id, job_id);
                        Ok(())
                    }
                };
            }
            let outcome = runner.execute_next_step(process.id).await;
            print_process(&rt, format, process.id, outcome)
        }
        ProcessCommand::Continue { id } => {
            let outcome = runner.execute_next_step(id).await;
            print_process(&rt, format, id, outcome)
        }
        ProcessCommand::Workflows => {
            let names = rt.workflows.names();
            if format == OutputFormat::Json {
                return print_json(&names);
            }
            for name in names {
                let description = rt
                    .workflows
                    .get(name)
                    .map(|w| w.description.clone())
                    .unwrap_or_default();
                println!("{:<24} {}", name.bold(), description);
            }
            Ok(())
        }
    }
}

async fn cmd_schedule(rt: Arc<Runtime>, format: OutputFormat, command: ScheduleCommand) -> Result<()> {
    let scheduler = Scheduler::new(rt);
    let schedules = match command {
        ScheduleCommand::Add {
            project,
            cadence,
            at,
            workflow,
        } => vec![
            scheduler
                .add_schedule(&project, cadence, &at, workflow.as_deref())
                .await?,
        ],
        ScheduleCommand::List => scheduler.list().await?,
        ScheduleCommand::Pause { id } => vec![scheduler.set_status(id, ScheduleStatus::Paused).await?],
        ScheduleCommand::Activate { id } => vec![scheduler.set_status(id, ScheduleStatus::Active).await?],
    };
    if format == OutputFormat::Json {
        return print_json(&schedules);
    }
    if schedules.is_empty() {
        println!("No schedules");
    }
    for schedule in &schedules {
        print_schedule(schedule);
    }
    Ok(())
}

async fn cmd_jobs(rt: &Runtime, format: OutputFormat, command: JobsCommand) -> Result<()> {
    match command {
        JobsCommand::Add {
            job_type,
            payload,
            priority,
        } => {
            let payload: Value = serde_json::from_str(&payload).context("Job payload must be JSON")?;
            let id = queue::enqueue(&rt.state, &job_type, payload, priority, None).await?;
            match format {
                OutputFormat::Json => print_json(&json!({ "job_id": id })),
                OutputFormat::Text => {
                    println!("Job #{} queued ({}, {})", id, job_type, priority);
                    Ok(())
                }
            }
        }
        JobsCommand::List { status } => {
            let jobs = JobQueue::for_runtime(rt).list(status).await?;
            if format == OutputFormat::Json {
                return print_json(&jobs);
            }
            if jobs.is_empty() {
                println!("No jobs");
            }
            for job in &jobs {
                print_job(job);
            }
            Ok(())
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    runs: Map<String, Value>,
    processes: Map<String, Value>,
    jobs: Map<String, Value>,
    pending_approvals: usize,
    heartbeat: Option<Heartbeat>,
}

async fn cmd_status(rt: &Runtime, format: OutputFormat) -> Result<()> {
    debug!("cmd_status: called");
    let runs: Vec<Run> = rt.state.list(vec![]).await?;
    let processes: Vec<ProcessRun> = rt.state.list(vec![]).await?;
    let jobs: Vec<Job> = rt.state.list(vec![]).await?;
    let heartbeat_file = &rt.config.scheduler.heartbeat_file;
    let heartbeat = if heartbeat_file.exists() {
        Heartbeat::read(heartbeat_file)
            .map_err(|e| warn!(error = %e, "Unreadable heartbeat"))
            .ok()
    } else {
        None
    };

    let report = StatusReport {
        runs: count_by(runs.iter().map(|r| r.status.to_string())),
        processes: count_by(processes.iter().map(|p| p.status.to_string())),
        jobs: count_by(jobs.iter().map(|j| j.status.to_string())),
        pending_approvals: rt.ledger.list_pending().await?.len(),
        heartbeat,
    };
    if format == OutputFormat::Json {
        return print_json(&report);
    }

    println!("{}", "opsd status".bold());
    println!("-----------");
    for (label, counts) in [("Runs", &report.runs), ("Processes", &report.processes), ("Jobs", &report.jobs)] {
        let line: Vec<String> = counts.iter().map(|(k, v)| format!("{} {}", paint(k), v)).collect();
        println!("{:<10} {}", label, if line.is_empty() { "none".to_string() } else { line.join(", ") });
    }
    println!("{:<10} {}", "Approvals", report.pending_approvals);
    match &report.heartbeat {
        Some(beat) => println!(
            "{:<10} pid {} ticks {} jobs {}{}",
            "Daemon",
            beat.pid,
            beat.ticks,
            beat.jobs_enqueued,
            beat.last_error
                .as_ref()
                .map(|e| format!(" last error: {}", e.red()))
                .unwrap_or_default()
        ),
        None => println!("{:<10} {}", "Daemon", "no heartbeat".dimmed()),
    }
    Ok(())
}

async fn print_run(rt: &Runtime, format: OutputFormat, run: &Run) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(run);
    }
    println!("Run #{} {} ({})", run.id, paint(&run.status.to_string()), run.project_id);
    match run.status {
        RunStatus::Paused => {
            let pending = rt.ledger.list_pending().await?;
            let waiting: Vec<_> = pending.iter().filter(|p| p.run_id == Some(run.id)).collect();
            for entry in &waiting {
                println!(
                    "  waiting on approval #{}: {}",
                    entry.approval.id,
                    entry.task_title.as_deref().unwrap_or("")
                );
            }
            if waiting.is_empty() {
                println!("  blocked by a rejection; `opsd dismiss {}` fails the rejected Tasks", run.id);
            }
        }
        RunStatus::Failed => {
            if let Some(error) = &run.error {
                println!("  {}", error.red());
            }
        }
        _ => {}
    }
    println!("  report: {}", report_path(rt, run.id).display());
    Ok(())
}

fn report_path(rt: &Runtime, run_id: i64) -> PathBuf {
    rt.run_dir(run_id).join("report.md")
}

fn print_process(
    rt: &Runtime,
    format: OutputFormat,
    id: i64,
    outcome: opsd::OpsResult<ProcessOutcome>,
) -> Result<()> {
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => ProcessOutcome::Failed { error: e.to_string() },
    };
    if format == OutputFormat::Json {
        return print_json(&json!({ "process_run_id": id, "outcome": outcome }));
    }
    match outcome {
        ProcessOutcome::Completed => {
            println!("ProcessRun #{} {}", id, paint(&ProcessRunStatus::Completed.to_string()));
            println!("  summary: {}", rt.process_dir(id).join("summary.md").display());
        }
        ProcessOutcome::Failed { error } => {
            println!("ProcessRun #{} {}", id, paint(&ProcessRunStatus::Failed.to_string()));
            println!("  {}", error.red());
        }
        ProcessOutcome::AwaitingApproval { step_id, run_id } => {
            println!(
                "ProcessRun #{} {} at step '{}' (run #{})",
                id,
                "awaiting approval".yellow(),
                step_id,
                run_id
            );
            println!("  approve, then `opsd resume {}` and `opsd process continue {}`", run_id, id);
        }
    }
    Ok(())
}

fn print_schedule(schedule: &Schedule) {
    let next = chrono::DateTime::from_timestamp_millis(schedule.next_run_at)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| schedule.next_run_at.to_string());
    println!(
        "{} {} {} {} at {} UTC, next {} [{}]",
        format!("#{}", schedule.id).bold(),
        paint(&schedule.status.to_string()),
        schedule.project_id,
        schedule.cadence,
        schedule.time_of_day,
        next,
        schedule.process_name
    );
}

fn print_job(job: &Job) {
    println!(
        "{} {:<10} {:<8} {}",
        format!("#{}", job.id).bold(),
        paint(&job.status.to_string()),
        job.priority,
        job.job_type
    );
    if job.status == JobStatus::Failed
        && let Some(error) = &job.error
    {
        println!("    {}", error.red());
    }
}

fn count_by(statuses: impl Iterator<Item = String>) -> Map<String, Value> {
    let mut counts = Map::new();
    for status in statuses {
        let entry = counts.entry(status).or_insert(json!(0));
        *entry = json!(entry.as_u64().unwrap_or(0) + 1);
    }
    counts
}

/// Status words coloured by outcome
fn paint(status: &str) -> colored::ColoredString {
    match status {
        "completed" | "approved" | "active" => status.green(),
        "failed" | "rejected" => status.red(),
        "paused" | "pending" | "needs_approval" => status.yellow(),
        _ => status.cyan(),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
