//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;

use crate::domain::{Cadence, JobStatus, Priority};

/// opsd - approval-gated task and workflow orchestrator
#[derive(Parser)]
#[command(
    name = "opsd",
    about = "Approval-gated task and workflow orchestrator",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Shorthand for --log-level DEBUG
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Effective log level: --verbose wins over --log-level
    pub fn effective_log_level(&self) -> Option<&str> {
        if self.verbose {
            Some("DEBUG")
        } else {
            self.log_level.as_deref()
        }
    }
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the job worker and scheduler until Ctrl-C
    Daemon,

    /// Start a Run for an objective and drain its Task queue
    Run {
        /// Business objective
        objective: String,

        /// Project the Run belongs to
        #[arg(short, long)]
        project: String,
    },

    /// Continue a PAUSED Run after its approvals were reviewed
    Resume {
        /// Run id
        run_id: i64,
    },

    /// Fail a PAUSED Run's rejected Tasks and continue it
    Dismiss {
        /// Run id
        run_id: i64,
    },

    /// List PENDING approval requests
    Approvals,

    /// Approve a pending request
    Approve {
        /// Approval id
        approval_id: i64,

        /// Reviewer notes (existing notes are kept when omitted)
        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Reject a pending request
    Reject {
        /// Approval id
        approval_id: i64,

        /// Reviewer notes (existing notes are kept when omitted)
        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Workflow processes
    Process {
        #[command(subcommand)]
        command: ProcessCommand,
    },

    /// Calendar schedules
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommand,
    },

    /// Job queue
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },

    /// Counts of Runs, ProcessRuns, Jobs and pending approvals
    Status,
}

/// Process subcommands
#[derive(Debug, Subcommand)]
pub enum ProcessCommand {
    /// Start a ProcessRun of a named workflow
    Start {
        /// Workflow name
        name: String,

        /// Project the ProcessRun belongs to
        #[arg(short, long)]
        project: String,

        /// Workflow input as key=value (value parsed as JSON when possible)
        #[arg(short, long = "input", value_parser = parse_key_value)]
        inputs: Vec<(String, Value)>,

        /// Only create the ProcessRun and enqueue it for the daemon
        #[arg(long)]
        enqueue: bool,
    },

    /// Execute the remaining steps of a ProcessRun
    Continue {
        /// ProcessRun id
        id: i64,
    },

    /// List known workflows
    Workflows,
}

/// Schedule subcommands
#[derive(Debug, Subcommand)]
pub enum ScheduleCommand {
    /// Add an ACTIVE schedule
    Add {
        /// Project the scheduled processes belong to
        #[arg(short, long)]
        project: String,

        /// daily or weekly
        #[arg(long, default_value = "daily")]
        cadence: Cadence,

        /// Time of day, HH:MM UTC
        #[arg(long)]
        at: String,

        /// Workflow to start (configured default when omitted)
        #[arg(short, long)]
        workflow: Option<String>,
    },

    /// List schedules
    List,

    /// Pause a schedule
    Pause {
        /// Schedule id
        id: i64,
    },

    /// Reactivate a paused schedule
    Activate {
        /// Schedule id
        id: i64,
    },
}

/// Job subcommands
#[derive(Debug, Subcommand)]
pub enum JobsCommand {
    /// Enqueue a Job
    Add {
        /// Registered job type, e.g. process.start
        job_type: String,

        /// JSON payload
        #[arg(long, default_value = "{}")]
        payload: String,

        /// low, normal, high or critical
        #[arg(long, default_value = "normal")]
        priority: Priority,
    },

    /// List Jobs
    List {
        /// Filter by status (pending, processing, completed, failed)
        #[arg(short, long)]
        status: Option<JobStatus>,
    },
}

/// Parse `key=value`, keeping the value as a string unless it is valid JSON
pub fn parse_key_value(raw: &str) -> Result<(String, Value), String> {
    debug!(%raw, "parse_key_value: called");
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("opsd")
        .join("logs")
        .join("opsd.log");
    debug!(?path, "get_log_path: returning path");
    path
}

/// Output format for every command
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => {
                debug!(%s, "OutputFormat::from_str: unknown format");
                Err(format!("Unknown format: {}. Use: text or json", s))
            }
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
