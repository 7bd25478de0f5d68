//! Risk classifier
//!
//! Pure and policy-driven. Commands are checked against the blocklist first,
//! then the safe patterns; anything unrecognised fails closed to REVIEW.
//! Spend, message and trading actions are BLOCKED with no policy override.

use regex::Regex;
use tracing::debug;

use crate::config::PolicyConfig;
use crate::domain::RiskTier;
use crate::error::{OpsError, OpsResult};

/// An effectful action proposed by a Task response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    FileWrite { path: String },
    Command { command: String },
    Network { detail: String },
    Spend { detail: String },
    Message { detail: String },
    Trading { detail: String },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FileWrite { .. } => "file_write",
            Self::Command { .. } => "command",
            Self::Network { .. } => "network",
            Self::Spend { .. } => "spend",
            Self::Message { .. } => "message",
            Self::Trading { .. } => "trading",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Self::FileWrite { path } => path,
            Self::Command { command } => command,
            Self::Network { detail } | Self::Spend { detail } | Self::Message { detail } | Self::Trading { detail } => {
                detail
            }
        }
    }
}

/// Compiled policy
#[derive(Debug, Clone)]
pub struct RiskClassifier {
    blocked: Vec<String>,
    safe: Vec<Regex>,
    install: Vec<Regex>,
}

impl RiskClassifier {
    pub fn new(policy: &PolicyConfig) -> OpsResult<Self> {
        debug!(
            blocked = policy.blocked_substrings.len(),
            safe = policy.safe_patterns.len(),
            "RiskClassifier::new: called"
        );
        Ok(Self {
            blocked: policy
                .blocked_substrings
                .iter()
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.to_lowercase())
                .collect(),
            safe: compile(&policy.safe_patterns)?,
            install: compile(&policy.install_patterns)?,
        })
    }

    pub fn classify(&self, action: &Action) -> RiskTier {
        match action {
            // Confinement is the sandbox's job
            Action::FileWrite { .. } => RiskTier::Safe,
            Action::Command { command } => self.classify_command(command),
            Action::Network { .. } => RiskTier::Review,
            Action::Spend { .. } | Action::Message { .. } | Action::Trading { .. } => {
                debug!(kind = action.kind(), "classify: unconditionally blocked kind");
                RiskTier::Blocked
            }
        }
    }

    fn classify_command(&self, command: &str) -> RiskTier {
        let lowered = command.to_lowercase();
        if let Some(hit) = self.blocked.iter().find(|b| lowered.contains(b.as_str())) {
            debug!(%command, %hit, "classify_command: blocked substring");
            return RiskTier::Blocked;
        }
        let trimmed = command.trim();
        if self.safe.iter().any(|re| re.is_match(trimmed)) {
            debug!(%command, "classify_command: safe pattern");
            return RiskTier::Safe;
        }
        if self.install.iter().any(|re| re.is_match(trimmed)) {
            debug!(%command, "classify_command: package install");
            return RiskTier::Review;
        }
        debug!(%command, "classify_command: unrecognised, failing closed");
        RiskTier::Review
    }
}

fn compile(patterns: &[String]) -> OpsResult<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|e| OpsError::Config(format!("invalid policy pattern '{}': {}", p, e))))
        .collect()
}
