//! opsd configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main opsd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Text-generation provider configuration
    pub llm: LlmConfig,

    /// Risk classification and write confinement
    pub policy: PolicyConfig,

    /// Storage locations
    pub storage: StorageConfig,

    /// Workflow definition search paths
    pub workflows: WorkflowsConfig,

    /// Role registry configuration
    pub roles: RolesConfig,

    /// Task runner tuning
    pub cycle: CycleConfig,

    /// Opportunity auto-start thresholds
    pub flywheel: FlywheelConfig,

    /// Job queue worker backoffs
    pub worker: WorkerConfig,

    /// Scheduler daemon configuration
    pub scheduler: SchedulerConfig,

    /// Tool execution
    pub tools: ToolsConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        for pattern in self.policy.safe_patterns.iter().chain(&self.policy.install_patterns) {
            regex::Regex::new(pattern).context(format!("Invalid policy pattern: {}", pattern))?;
        }
        if self.policy.allowed_paths.is_empty() {
            return Err(eyre::eyre!("policy.allowed-paths must name at least one root"));
        }
        if self.cycle.max_parse_attempts == 0 {
            return Err(eyre::eyre!("cycle.max-parse-attempts must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .opsd.yml
        let local_config = PathBuf::from(".opsd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/opsd/opsd.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("opsd").join("opsd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Configuration rooted entirely under `dir` (tests and sandboxed runs)
    pub fn rooted_at(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let mut config = Self::default();
        config.storage = StorageConfig {
            store_dir: dir.join("store"),
            runs_dir: dir.join("runs"),
            processes_dir: dir.join("processes"),
            deliveries_dir: dir.join("deliveries"),
        };
        config.policy.allowed_paths = vec![dir.to_string_lossy().into_owned()];
        config.scheduler.heartbeat_file = dir.join("heartbeat.json");
        config.workflows.paths = vec!["builtin".to_string()];
        config.roles.file = None;
        config
    }
}

/// Text-generation provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name (currently only "ollama" supported)
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Per-generation timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Default sampling temperature
    pub temperature: f32,

    /// Context window size hint
    #[serde(rename = "context-size")]
    pub context_size: u32,

    /// CPU thread hint
    #[serde(rename = "thread-hint")]
    pub thread_hint: Option<u32>,

    /// GPU layer hint
    #[serde(rename = "gpu-hint")]
    pub gpu_hint: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "llama3.1:8b".to_string(),
            base_url: "http://localhost:11434".to_string(),
            timeout_ms: 300_000,
            temperature: 0.4,
            context_size: 8192,
            thread_hint: None,
            gpu_hint: None,
        }
    }
}

/// Risk classification policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Case-insensitive substrings that make a command BLOCKED
    #[serde(rename = "blocked-substrings")]
    pub blocked_substrings: Vec<String>,

    /// Regexes for commands that are SAFE to run unreviewed
    #[serde(rename = "safe-patterns")]
    pub safe_patterns: Vec<String>,

    /// Regexes recognising package installs (always REVIEW)
    #[serde(rename = "install-patterns")]
    pub install_patterns: Vec<String>,

    /// Roots that file writes are confined to
    #[serde(rename = "allowed-paths")]
    pub allowed_paths: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let data_dir = default_data_dir().to_string_lossy().into_owned();
        Self {
            blocked_substrings: vec![
                "rm -rf".to_string(),
                "mkfs".to_string(),
                "dd if=".to_string(),
                ":(){".to_string(),
                "shutdown".to_string(),
                "chmod 777".to_string(),
            ],
            safe_patterns: vec![
                r"^git (status|log|diff)\b".to_string(),
                r"^ls\b".to_string(),
                r"^cat\b".to_string(),
                r"^echo\b".to_string(),
            ],
            install_patterns: vec![
                r"\b(npm|pnpm|yarn)\s+(install|add|i)\b".to_string(),
                r"\bpip3?\s+install\b".to_string(),
                r"\bcargo\s+(install|add)\b".to_string(),
                r"\b(apt|apt-get|brew|dnf|yum)\s+install\b".to_string(),
            ],
            allowed_paths: vec![data_dir],
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for TaskStore data
    #[serde(rename = "store-dir")]
    pub store_dir: PathBuf,

    /// Per-Run artifact directories live here
    #[serde(rename = "runs-dir")]
    pub runs_dir: PathBuf,

    /// Per-ProcessRun summaries live here
    #[serde(rename = "processes-dir")]
    pub processes_dir: PathBuf,

    /// Assembled delivery folders live here
    #[serde(rename = "deliveries-dir")]
    pub deliveries_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = default_data_dir();
        Self {
            store_dir: base.join("store"),
            runs_dir: base.join("runs"),
            processes_dir: base.join("processes"),
            deliveries_dir: base.join("deliveries"),
        }
    }
}

/// Workflow definition search paths
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowsConfig {
    /// Paths to search for workflow definitions (later paths override earlier)
    pub paths: Vec<String>,
}

impl Default for WorkflowsConfig {
    fn default() -> Self {
        Self {
            paths: vec![
                "builtin".to_string(),
                "~/.config/opsd/workflows".to_string(),
                ".opsd/workflows".to_string(),
            ],
        }
    }
}

impl WorkflowsConfig {
    /// Expand paths (resolve ~/ and relative paths)
    pub fn expanded_paths(&self) -> Vec<PathBuf> {
        self.paths
            .iter()
            .filter_map(|p| {
                if p == "builtin" {
                    None // builtin is handled specially
                } else if let Some(rest) = p.strip_prefix("~/") {
                    dirs::home_dir().map(|home| home.join(rest))
                } else {
                    Some(PathBuf::from(p))
                }
            })
            .collect()
    }

    /// Check if builtin workflows should be loaded
    pub fn use_builtin(&self) -> bool {
        self.paths.iter().any(|p| p == "builtin")
    }
}

/// Role registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolesConfig {
    /// Optional YAML file with extra or overriding roles
    pub file: Option<PathBuf>,

    /// Role used when a department label resolves to nothing
    pub default: String,
}

impl Default for RolesConfig {
    fn default() -> Self {
        Self {
            file: None,
            default: "orchestrator".to_string(),
        }
    }
}

/// Task runner tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Total generations allowed for one structured response (first try included)
    #[serde(rename = "max-parse-attempts")]
    pub max_parse_attempts: u32,

    /// Red-team risk score above which correction tasks are added
    #[serde(rename = "audit-threshold")]
    pub audit_threshold: f64,

    /// Recalled notes folded into each prompt
    #[serde(rename = "memory-limit")]
    pub memory_limit: usize,

    /// Department label for audit correction tasks
    #[serde(rename = "correction-role")]
    pub correction_role: String,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            max_parse_attempts: 3,
            audit_threshold: 7.0,
            memory_limit: 5,
            correction_role: "qa".to_string(),
        }
    }
}

/// Opportunity auto-start thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlywheelConfig {
    #[serde(rename = "min-leverage")]
    pub min_leverage: f64,

    #[serde(rename = "max-friction")]
    pub max_friction: f64,

    /// Workflow started for each qualifying opportunity
    pub workflow: String,
}

impl Default for FlywheelConfig {
    fn default() -> Self {
        Self {
            min_leverage: 8.0,
            max_friction: 3.0,
            workflow: "opportunity-execution".to_string(),
        }
    }
}

/// Job queue worker backoffs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Sleep when no job is pending
    #[serde(rename = "idle-backoff-ms")]
    pub idle_backoff_ms: u64,

    /// Sleep after a loop-level error
    #[serde(rename = "error-backoff-ms")]
    pub error_backoff_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_backoff_ms: 1_000,
            error_backoff_ms: 5_000,
        }
    }
}

/// Scheduler daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between due-checks
    #[serde(rename = "heartbeat-secs")]
    pub heartbeat_secs: u64,

    /// Liveness file rewritten on every tick
    #[serde(rename = "heartbeat-file")]
    pub heartbeat_file: PathBuf,

    /// Workflow used by schedules that do not name one
    #[serde(rename = "default-workflow")]
    pub default_workflow: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 60,
            heartbeat_file: default_data_dir().join("heartbeat.json"),
            default_workflow: "daily-operations".to_string(),
        }
    }
}

/// Tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Per-call timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

/// XDG data directory (~/.local/share/opsd on Linux)
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("opsd"))
        .unwrap_or_else(|| PathBuf::from(".opsd"))
}
