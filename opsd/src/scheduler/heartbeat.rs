//! Liveness file written by the scheduler daemon

use std::fs;
use std::path::Path;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Snapshot of daemon health, rewritten on every tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Milliseconds since the epoch of the last tick
    pub timestamp: i64,
    pub pid: u32,
    pub ticks: u64,
    pub jobs_enqueued: u64,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            pid: std::process::id(),
            ..Default::default()
        }
    }

    /// Write through a temp file and rename so readers never see a partial file
    pub fn write(&self, path: &Path) -> Result<()> {
        debug!(?path, ticks = self.ticks, "Heartbeat::write: called");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(self).context("Failed to serialize heartbeat")?;
        fs::write(&tmp, content).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).context("Failed to parse heartbeat")
    }
}
