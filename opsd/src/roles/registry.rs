//! Role definitions and lookup

use std::collections::HashMap;
use std::fs;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RolesConfig;

const BUILTIN_ROLES: &str = include_str!("builtin.yml");

/// A department persona
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,

    #[serde(default)]
    pub aliases: Vec<String>,

    #[serde(default)]
    pub description: String,

    /// Persona text placed at the top of task prompts
    pub instructions: String,

    /// Overrides the configured sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>,
}

pub struct RoleRegistry {
    roles: HashMap<String, Role>,
    /// normalized label -> canonical name
    labels: HashMap<String, String>,
    default: String,
}

impl RoleRegistry {
    /// Builtin roles plus the optional user file
    pub fn load(config: &RolesConfig) -> Result<Self> {
        debug!(?config, "RoleRegistry::load: called");
        let mut roles: Vec<Role> = serde_yaml::from_str(BUILTIN_ROLES).context("Failed to parse builtin roles")?;
        if let Some(path) = &config.file {
            let content = fs::read_to_string(path).with_context(|| format!("Failed to read roles file {}", path.display()))?;
            let extra: Vec<Role> =
                serde_yaml::from_str(&content).with_context(|| format!("Failed to parse roles file {}", path.display()))?;
            debug!(count = extra.len(), "RoleRegistry::load: user roles loaded");
            roles.extend(extra);
        }
        Self::from_roles(roles, &config.default)
    }

    pub fn builtin() -> Result<Self> {
        Self::load(&RolesConfig::default())
    }

    /// Later roles override earlier ones with the same name
    pub fn from_roles(roles: Vec<Role>, default: &str) -> Result<Self> {
        let mut by_name = HashMap::new();
        for role in roles {
            by_name.insert(normalize(&role.name), role);
        }
        let mut labels = HashMap::new();
        for (name, role) in &by_name {
            for alias in &role.aliases {
                labels.insert(normalize(alias), name.clone());
            }
        }
        // Canonical names win over another role's alias
        for name in by_name.keys() {
            labels.insert(name.clone(), name.clone());
        }

        let default = normalize(default);
        if !by_name.contains_key(&default) {
            return Err(eyre::eyre!("Default role '{}' is not defined", default));
        }
        info!(count = by_name.len(), %default, "Loaded roles");
        Ok(Self {
            roles: by_name,
            labels,
            default,
        })
    }

    /// Exact lookup by name or alias after normalization
    pub fn lookup(&self, label: &str) -> Option<&Role> {
        self.labels.get(&normalize(label)).and_then(|name| self.roles.get(name))
    }

    /// Lookup, falling back to the default role for unknown labels
    pub fn resolve(&self, label: &str) -> &Role {
        match self.lookup(label) {
            Some(role) => role,
            None => {
                debug!(%label, default = %self.default, "resolve: unknown department, using default role");
                self.default_role()
            }
        }
    }

    pub fn default_role(&self) -> &Role {
        // Presence checked in from_roles
        &self.roles[&self.default]
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.roles.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

fn normalize(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '_' || c.is_whitespace() { '-' } else { c })
        .collect()
}
