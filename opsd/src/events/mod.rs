//! Event bus for live observability
//!
//! Every state transition in the runners, queue and scheduler emits an
//! [`OpsEvent`] on a tokio broadcast channel. Subscribers (the JSONL
//! [`EventLogger`], tests) receive events emitted after they subscribe.

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus};
pub use logger::{EventLogger, read_events, spawn_event_logger};
pub use types::{EventLogEntry, OpsEvent};
