//! Scheduler implementation

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::heartbeat::Heartbeat;
use crate::domain::{Cadence, Filter, IndexValue, Priority, Schedule, ScheduleStatus, now_ms};
use crate::error::{OpsError, OpsResult};
use crate::events::OpsEvent;
use crate::process::PROCESS_START;
use crate::queue;
use crate::runtime::Runtime;

/// Parse `HH:MM` (24h, UTC)
pub fn parse_time_of_day(value: &str) -> OpsResult<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| OpsError::Invalid(format!("time of day must be HH:MM, got {:?}", value)))
}

/// `time` today if still ahead of `now`, otherwise tomorrow
pub fn next_occurrence(time: NaiveTime, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive().and_time(time).and_utc();
    if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    }
}

pub struct Scheduler {
    rt: Arc<Runtime>,
}

impl Scheduler {
    pub fn new(rt: Arc<Runtime>) -> Self {
        Self { rt }
    }

    /// Persist an ACTIVE Schedule; `process_name` defaults to the configured workflow
    pub async fn add_schedule(
        &self,
        project_id: &str,
        cadence: Cadence,
        time_of_day: &str,
        process_name: Option<&str>,
    ) -> OpsResult<Schedule> {
        self.add_schedule_at(project_id, cadence, time_of_day, process_name, Utc::now())
            .await
    }

    pub async fn add_schedule_at(
        &self,
        project_id: &str,
        cadence: Cadence,
        time_of_day: &str,
        process_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> OpsResult<Schedule> {
        debug!(%project_id, %cadence, %time_of_day, ?process_name, "Scheduler::add_schedule_at: called");
        let time = parse_time_of_day(time_of_day)?;
        let process_name = process_name
            .map(str::to_string)
            .unwrap_or_else(|| self.rt.config.scheduler.default_workflow.clone());
        if self.rt.workflows.get(&process_name).is_none() {
            return Err(OpsError::NotFound(format!("workflow {}", process_name)));
        }

        let next = next_occurrence(time, now);
        let mut schedule = Schedule::new(
            project_id,
            cadence,
            time.format("%H:%M").to_string(),
            process_name,
            next.timestamp_millis(),
        );
        schedule.id = self.rt.state.create(schedule.clone()).await?;
        info!(
            schedule_id = schedule.id,
            %project_id,
            %cadence,
            next_run_at = %next.to_rfc3339(),
            "Schedule added"
        );
        Ok(schedule)
    }

    /// Enqueue one Job per due ACTIVE Schedule; returns the new Job ids
    pub async fn run_due(&self) -> OpsResult<Vec<i64>> {
        self.run_due_at(now_ms()).await
    }

    pub async fn run_due_at(&self, now: i64) -> OpsResult<Vec<i64>> {
        debug!(%now, "Scheduler::run_due_at: called");
        let active: Vec<Schedule> = self
            .rt
            .state
            .list(vec![Filter::eq("status", ScheduleStatus::Active.to_string())])
            .await?;

        let mut jobs = Vec::new();
        for schedule in active.into_iter().filter(|s| s.next_run_at <= now) {
            let observed = schedule.next_run_at;
            let mut advanced = schedule.clone();
            advanced.advance();
            // Advance before enqueueing; only the caller that moved it enqueues
            if !self
                .rt
                .state
                .update_if(advanced.clone(), "next_run_at", IndexValue::Int(observed))
                .await?
            {
                debug!(schedule_id = schedule.id, "run_due_at: already advanced elsewhere");
                continue;
            }

            let payload = json!({
                "process_name": schedule.process_name,
                "project_id": schedule.project_id,
                "inputs": { "schedule_id": schedule.id },
            });
            let job_id = queue::enqueue(&self.rt.state, PROCESS_START, payload, Priority::Normal, None).await?;
            info!(
                schedule_id = schedule.id,
                %job_id,
                next_run_at = advanced.next_run_at,
                "Schedule fired"
            );
            self.rt.events.emit(OpsEvent::ScheduleFired {
                schedule_id: schedule.id,
                job_id,
            });
            jobs.push(job_id);
        }
        Ok(jobs)
    }

    /// Pause or reactivate; reactivation skips occurrences missed while paused
    pub async fn set_status(&self, id: i64, status: ScheduleStatus) -> OpsResult<Schedule> {
        debug!(%id, %status, "Scheduler::set_status: called");
        let mut schedule: Schedule = self.rt.state.get_required(id).await?;
        if schedule.status == status {
            return Ok(schedule);
        }
        if status == ScheduleStatus::Active && schedule.next_run_at < now_ms() {
            let time = parse_time_of_day(&schedule.time_of_day)?;
            schedule.next_run_at = next_occurrence(time, Utc::now()).timestamp_millis();
            debug!(next_run_at = schedule.next_run_at, "set_status: rescheduled past occurrence");
        }
        schedule.set_status(status);
        self.rt.state.update(schedule.clone()).await?;
        info!(schedule_id = id, %status, "Schedule status changed");
        Ok(schedule)
    }

    pub async fn list(&self) -> OpsResult<Vec<Schedule>> {
        Ok(self.rt.state.list(vec![]).await?)
    }

    /// Check for due Schedules on every heartbeat until `shutdown` flips
    pub async fn daemon(&self, mut shutdown: watch::Receiver<bool>) -> eyre::Result<()> {
        let period = Duration::from_secs(self.rt.config.scheduler.heartbeat_secs.max(1));
        let mut interval = tokio::time::interval(period);
        let mut beat = Heartbeat::new();
        info!(heartbeat_secs = period.as_secs(), "Scheduler daemon started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(&mut beat).await;
                }
                _ = shutdown.changed() => {
                    info!("Scheduler daemon stopping");
                    break;
                }
            }
        }
        Ok(())
    }

    /// One due-check followed by a heartbeat write
    pub async fn tick(&self, beat: &mut Heartbeat) {
        beat.ticks += 1;
        match self.run_due().await {
            Ok(jobs) => {
                beat.jobs_enqueued += jobs.len() as u64;
                beat.last_error = None;
            }
            Err(e) => {
                error!(error = %e, "Scheduler tick failed");
                beat.last_error = Some(e.to_string());
            }
        }
        beat.timestamp = now_ms();
        if let Err(e) = beat.write(&self.rt.config.scheduler.heartbeat_file) {
            error!(error = %e, "Failed to write heartbeat");
        }
    }
}
