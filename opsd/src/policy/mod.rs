//! Policy: risk classification and write confinement
//!
//! - [`RiskClassifier`] maps an effectful [`Action`] to a [`RiskTier`]
//! - [`PathSandbox`] confines file writes to allow-listed roots

mod classifier;
mod sandbox;

pub use classifier::{Action, RiskClassifier};
pub use sandbox::{PathSandbox, PolicyViolation};
