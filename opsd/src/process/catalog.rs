//! Workflow catalog
//!
//! Definitions are loaded from:
//! 1. Builtin (embedded in binary)
//! 2. User global (~/.config/opsd/workflows/*.yml)
//! 3. Project-specific (.opsd/workflows/*.yml)
//!
//! Later definitions override earlier ones with the same name. A file that
//! fails to parse or validate is skipped with a warning; the rest still load.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use eyre::{Context, Result};
use tracing::{debug, info, warn};

use super::definition::WorkflowDefinition;
use crate::config::WorkflowsConfig;

const BUILTIN_DAILY_OPERATIONS: &str = include_str!("builtin/daily-operations.yml");
const BUILTIN_OPPORTUNITY_EXECUTION: &str = include_str!("builtin/opportunity-execution.yml");

/// Named workflow definitions available to the process runner
#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    workflows: HashMap<String, WorkflowDefinition>,
}

impl WorkflowCatalog {
    /// Load builtins (when enabled) then every configured search directory
    pub fn load(config: &WorkflowsConfig) -> Result<Self> {
        debug!(paths = ?config.paths, "WorkflowCatalog::load: called");
        let mut catalog = Self::default();

        if config.use_builtin() {
            debug!("load: loading builtin workflows");
            catalog.load_builtins()?;
        }

        for dir in config.expanded_paths() {
            if dir.is_dir() {
                debug!(?dir, "load: loading workflows from directory");
                catalog.load_from_directory(&dir)?;
            } else {
                debug!(?dir, "load: directory does not exist, skipping");
            }
        }

        info!(count = catalog.workflows.len(), "Loaded workflows");
        Ok(catalog)
    }

    /// Only the embedded definitions
    pub fn builtin() -> Result<Self> {
        let mut catalog = Self::default();
        catalog.load_builtins()?;
        Ok(catalog)
    }

    fn load_builtins(&mut self) -> Result<()> {
        for (source, yaml) in [
            ("daily-operations.yml", BUILTIN_DAILY_OPERATIONS),
            ("opportunity-execution.yml", BUILTIN_OPPORTUNITY_EXECUTION),
        ] {
            let definition = parse_definition(yaml).with_context(|| format!("Invalid builtin workflow {}", source))?;
            self.insert(definition);
        }
        Ok(())
    }

    fn load_from_directory(&mut self, dir: &Path) -> Result<()> {
        let entries = fs::read_dir(dir).with_context(|| format!("Failed to read directory: {}", dir.display()))?;

        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yml" | "yaml")))
            .collect();
        // Deterministic override order within one directory
        paths.sort();

        for path in paths {
            match self.load_from_file(&path) {
                Ok(name) => debug!(?path, %name, "load_from_directory: loaded"),
                Err(e) => warn!(?path, error = %e, "Skipping invalid workflow file"),
            }
        }
        Ok(())
    }

    fn load_from_file(&mut self, path: &Path) -> Result<String> {
        let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let definition = parse_definition(&content).with_context(|| format!("Invalid workflow {}", path.display()))?;
        let name = definition.name.clone();
        self.insert(definition);
        Ok(name)
    }

    /// Add or replace a definition by name
    pub fn insert(&mut self, definition: WorkflowDefinition) {
        if self.workflows.contains_key(&definition.name) {
            debug!(name = %definition.name, "insert: overriding existing workflow");
        }
        self.workflows.insert(definition.name.clone(), definition);
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.workflows.get(name)
    }

    /// Sorted workflow names
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.workflows.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Parse and validate one YAML definition
pub fn parse_definition(yaml: &str) -> Result<WorkflowDefinition> {
    let definition: WorkflowDefinition = serde_yaml::from_str(yaml).context("Failed to parse workflow YAML")?;
    definition.validate()?;
    Ok(definition)
}
