//! Job handlers that bridge the queue to the runners

use std::sync::Arc;

use async_trait::async_trait;
use eyre::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::runner::ProcessRunner;
use crate::cycle::TaskRunner;
use crate::queue::{JobHandler, JobQueue};
use crate::runtime::Runtime;

/// Start a ProcessRun and execute it
pub const PROCESS_START: &str = "process.start";
/// Continue an existing ProcessRun
pub const PROCESS_EXECUTE: &str = "process.execute";
/// Run one Task Runner cycle
pub const CYCLE_START: &str = "cycle.start";

#[derive(Debug, Deserialize)]
struct ProcessStartPayload {
    process_name: String,
    project_id: String,
    #[serde(default)]
    inputs: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ProcessExecutePayload {
    process_run_id: i64,
}

#[derive(Debug, Deserialize)]
struct CycleStartPayload {
    objective: String,
    project_id: String,
}

/// Register every built-in job type on `queue`
pub fn register_handlers(queue: &mut JobQueue, rt: Arc<Runtime>) {
    debug!("register_handlers: called");
    let processes = Arc::new(ProcessRunner::new(rt.clone()));
    queue.register(PROCESS_START, Arc::new(ProcessStart(processes.clone())));
    queue.register(PROCESS_EXECUTE, Arc::new(ProcessExecute(processes)));
    queue.register(CYCLE_START, Arc::new(CycleStart(TaskRunner::new(rt))));
}

struct ProcessStart(Arc<ProcessRunner>);

#[async_trait]
impl JobHandler for ProcessStart {
    async fn handle(&self, payload: Value) -> Result<Value> {
        let payload: ProcessStartPayload =
            serde_json::from_value(payload).context("Invalid process.start payload")?;
        let process = self
            .0
            .start(&payload.process_name, &payload.project_id, payload.inputs)
            .await
            .with_context(|| format!("Failed to start workflow {}", payload.process_name))?;
        let outcome = self
            .0
            .execute_next_step(process.id)
            .await
            .with_context(|| format!("ProcessRun {} failed", process.id))?;
        Ok(json!({ "process_run_id": process.id, "outcome": outcome }))
    }
}

struct ProcessExecute(Arc<ProcessRunner>);

#[async_trait]
impl JobHandler for ProcessExecute {
    async fn handle(&self, payload: Value) -> Result<Value> {
        let payload: ProcessExecutePayload =
            serde_json::from_value(payload).context("Invalid process.execute payload")?;
        let id = payload.process_run_id;
        let outcome = self
            .0
            .execute_next_step(id)
            .await
            .with_context(|| format!("ProcessRun {} failed", id))?;
        Ok(json!({ "process_run_id": id, "outcome": outcome }))
    }
}

struct CycleStart(TaskRunner);

#[async_trait]
impl JobHandler for CycleStart {
    async fn handle(&self, payload: Value) -> Result<Value> {
        let payload: CycleStartPayload = serde_json::from_value(payload).context("Invalid cycle.start payload")?;
        let run = self.0.start(&payload.objective, &payload.project_id).await?;
        Ok(json!({ "run_id": run.id, "status": run.status }))
    }
}
