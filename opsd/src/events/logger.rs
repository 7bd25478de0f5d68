//! Event Logger - appends events to a JSONL file
//!
//! Spawned by the daemon; one line per event, flushed as written.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::bus::EventBus;
use super::types::EventLogEntry;

/// Writes every bus event to `path` as JSON lines
pub struct EventLogger {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl EventLogger {
    pub fn open(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!(?path, "EventLogger::open: called");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn write_entry(&mut self, entry: &EventLogEntry) -> eyre::Result<()> {
        let json = serde_json::to_string(entry)?;
        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Consume events until the bus closes
    pub async fn run(mut self, mut rx: broadcast::Receiver<super::OpsEvent>) {
        debug!(path = ?self.path, "EventLogger::run: starting");
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = self.write_entry(&EventLogEntry::new(event)) {
                        error!(error = %e, "EventLogger: failed to write event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }
        let _ = self.writer.flush();
    }
}

/// Subscribe a logger to `bus` and run it in the background
pub fn spawn_event_logger(bus: &EventBus, path: impl AsRef<Path>) -> eyre::Result<tokio::task::JoinHandle<()>> {
    let logger = EventLogger::open(path)?;
    let rx = bus.subscribe();
    Ok(tokio::spawn(logger.run(rx)))
}

/// Read back every entry of an event log; a missing file is empty
pub fn read_events(path: impl AsRef<Path>) -> eyre::Result<Vec<EventLogEntry>> {
    let path = path.as_ref();
    debug!(?path, "read_events: called");
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)?;
    let mut entries = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(line = line_no + 1, error = %e, "read_events: skipping malformed line"),
        }
    }
    Ok(entries)
}
