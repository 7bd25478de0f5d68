//! Risk tiers for effectful actions

use serde::{Deserialize, Serialize};

/// Outcome of classifying an action
///
/// Ordered by severity so the strictest of several opinions is `max()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    #[default]
    Safe,
    Review,
    Blocked,
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Safe => write!(f, "safe"),
            Self::Review => write!(f, "review"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

impl std::str::FromStr for RiskTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "safe" | "low" => Ok(Self::Safe),
            "review" | "medium" => Ok(Self::Review),
            "blocked" | "high" => Ok(Self::Blocked),
            _ => Err(format!("Unknown risk tier: {}", s)),
        }
    }
}
