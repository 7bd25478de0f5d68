//! Structured Task response
//!
//! The JSON object a Task prompt asks for. Only `summary` is required; every
//! effect list defaults to empty.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::domain::RiskTier;
use crate::policy::Action;

#[derive(Debug, Clone, Deserialize)]
pub struct TaskResponse {
    pub summary: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub delegate: Vec<Delegation>,
    #[serde(default)]
    pub files: Vec<FileWrite>,
    #[serde(default)]
    pub commands: Vec<CommandRequest>,
    #[serde(default)]
    pub actions: Vec<ExternalAction>,
    #[serde(default)]
    pub kpis: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Delegation {
    pub dept: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileWrite {
    pub path: String,
    pub content: String,
    #[serde(default, deserialize_with = "lenient_risk")]
    pub risk: Option<RiskTier>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default, deserialize_with = "lenient_risk")]
    pub risk: Option<RiskTier>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalAction {
    pub kind: String,
    pub detail: String,
    #[serde(default, deserialize_with = "lenient_risk")]
    pub risk: Option<RiskTier>,
}

impl ExternalAction {
    /// The policy action, or `None` for a kind no policy covers
    pub fn to_action(&self) -> Option<Action> {
        let detail = self.detail.clone();
        match self.kind.trim().to_lowercase().as_str() {
            "network" => Some(Action::Network { detail }),
            "spend" => Some(Action::Spend { detail }),
            "message" => Some(Action::Message { detail }),
            "trading" | "trade" => Some(Action::Trading { detail }),
            _ => None,
        }
    }
}

/// Unknown tier words are dropped rather than failing the whole response
fn lenient_risk<'de, D>(deserializer: D) -> Result<Option<RiskTier>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| match s.parse::<RiskTier>() {
        Ok(tier) => Some(tier),
        Err(e) => {
            warn!(error = %e, "Ignoring declared risk");
            None
        }
    }))
}
