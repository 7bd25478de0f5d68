//! Job queue
//!
//! Jobs are persisted records; any number of workers (in this process or
//! another one sharing the store) may poll them. Claiming is a conditional
//! PENDING -> PROCESSING update, so exactly one worker wins a given Job and
//! the losers simply poll again. Handler failures are recorded on the Job and
//! never retried by the queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::domain::{Filter, IndexValue, Job, JobStatus, Priority};
use crate::error::OpsResult;
use crate::events::{EventBus, OpsEvent};
use crate::state::StateManager;

/// Executes one job type
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: Value) -> eyre::Result<Value>;
}

/// Result of one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing pending
    Idle,
    /// Another worker claimed the Job first
    Contended,
    Completed(i64),
    Failed(i64),
}

/// Persist a new PENDING Job
pub async fn enqueue(
    state: &StateManager,
    job_type: &str,
    payload: Value,
    priority: Priority,
    owner_run_id: Option<i64>,
) -> OpsResult<i64> {
    debug!(%job_type, %priority, "enqueue: called");
    let mut job = Job::new(job_type, payload, priority);
    job.owner_run_id = owner_run_id;
    let id = state.create(job).await?;
    info!(job_id = id, %job_type, %priority, "Job enqueued");
    Ok(id)
}

pub struct JobQueue {
    state: StateManager,
    events: EventBus,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    idle_backoff: Duration,
    error_backoff: Duration,
    stop_tx: watch::Sender<bool>,
}

impl JobQueue {
    pub fn new(state: StateManager, events: EventBus, idle_backoff: Duration, error_backoff: Duration) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            state,
            events,
            handlers: HashMap::new(),
            idle_backoff,
            error_backoff,
            stop_tx,
        }
    }

    /// Queue bound to a runtime's store, events and worker backoffs
    pub fn for_runtime(rt: &crate::runtime::Runtime) -> Self {
        Self::new(
            rt.state.clone(),
            rt.events.clone(),
            Duration::from_millis(rt.config.worker.idle_backoff_ms),
            Duration::from_millis(rt.config.worker.error_backoff_ms),
        )
    }

    /// Register (or replace) the handler for `job_type`
    pub fn register(&mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let job_type = job_type.into();
        debug!(%job_type, "JobQueue::register: called");
        self.handlers.insert(job_type, handler);
    }

    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub async fn add(
        &self,
        job_type: &str,
        payload: Value,
        priority: Priority,
        owner_run_id: Option<i64>,
    ) -> OpsResult<i64> {
        enqueue(&self.state, job_type, payload, priority, owner_run_id).await
    }

    /// Jobs ascending by id, optionally filtered by status
    pub async fn list(&self, status: Option<JobStatus>) -> OpsResult<Vec<Job>> {
        let filters = status
            .map(|s| vec![Filter::eq("status", s.to_string())])
            .unwrap_or_default();
        Ok(self.state.list(filters).await?)
    }

    /// Claim the highest-priority, oldest PENDING Job and run its handler
    pub async fn run_once(&self) -> OpsResult<PollOutcome> {
        let pending: Vec<Job> = self
            .state
            .list(vec![Filter::eq("status", JobStatus::Pending.to_string())])
            .await?;
        // list is ascending by id, so max_by keeps the oldest among equals
        let Some(mut job) = pending
            .into_iter()
            .max_by(|a, b| a.priority.cmp(&b.priority).then(b.id.cmp(&a.id)))
        else {
            return Ok(PollOutcome::Idle);
        };

        job.set_status(JobStatus::Processing);
        let expected = IndexValue::from(JobStatus::Pending.to_string());
        if !self.state.update_if(job.clone(), "status", expected).await? {
            debug!(job_id = job.id, "run_once: claimed by another worker");
            return Ok(PollOutcome::Contended);
        }
        info!(job_id = job.id, job_type = %job.job_type, "Job claimed");
        self.events.emit(OpsEvent::JobClaimed {
            job_id: job.id,
            job_type: job.job_type.clone(),
        });

        let outcome = match self.handlers.get(&job.job_type) {
            Some(handler) => handler.handle(job.payload.clone()).await,
            None => Err(eyre::eyre!("No handler registered for job type {}", job.job_type)),
        };

        match outcome {
            Ok(result) => {
                job.result = Some(result);
                job.set_status(JobStatus::Completed);
                self.state.update(job.clone()).await?;
                info!(job_id = job.id, "Job completed");
                self.events.emit(OpsEvent::JobCompleted { job_id: job.id });
                Ok(PollOutcome::Completed(job.id))
            }
            Err(e) => {
                let message = format!("{:#}", e);
                job.error = Some(message.clone());
                job.set_status(JobStatus::Failed);
                self.state.update(job.clone()).await?;
                warn!(job_id = job.id, error = %message, "Job failed");
                self.events.emit(OpsEvent::JobFailed {
                    job_id: job.id,
                    error: message,
                });
                Ok(PollOutcome::Failed(job.id))
            }
        }
    }

    /// Poll until [`JobQueue::stop`]; the in-flight Job always finishes
    pub async fn worker(&self) {
        let mut stop_rx = self.stop_tx.subscribe();
        info!(handlers = ?self.job_types(), "Job worker started");
        while !*stop_rx.borrow() {
            let delay = match self.run_once().await {
                Ok(PollOutcome::Idle) => self.idle_backoff,
                Ok(_) => continue,
                Err(e) => {
                    error!(error = %e, backoff_ms = self.error_backoff.as_millis() as u64, "Job poll failed");
                    self.error_backoff
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop_rx.changed() => {}
            }
        }
        info!("Job worker stopped");
    }

    pub fn stop(&self) {
        debug!("JobQueue::stop: called");
        self.stop_tx.send_replace(true);
    }
}
