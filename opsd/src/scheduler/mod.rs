//! Scheduler for recurring workflows
//!
//! Persists daily/weekly Schedules, turns due ones into `process.start` Jobs
//! and, as a daemon, writes a heartbeat file for external health probes.

mod core;
mod heartbeat;

pub use core::{Scheduler, next_occurrence, parse_time_of_day};
pub use heartbeat::Heartbeat;
