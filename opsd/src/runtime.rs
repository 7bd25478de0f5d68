//! Runtime context
//!
//! Everything a runner, queue handler or scheduler needs, constructed once and
//! passed around as `Arc<Runtime>`. There are no process-wide singletons, so
//! tests can run isolated instances side by side on temp directories.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result};
use tracing::{debug, info};

use crate::approval::ApprovalLedger;
use crate::collab::{Collaborators, LlmCollaborators, Memory, StoreMemory, ToolRunner};
use crate::config::Config;
use crate::events::EventBus;
use crate::llm::{GenerateOptions, TextGenerator, create_generator};
use crate::policy::{PathSandbox, RiskClassifier};
use crate::process::WorkflowCatalog;
use crate::prompts::PromptLoader;
use crate::roles::RoleRegistry;
use crate::state::StateManager;
use crate::tools::{ToolContext, ToolExecutor};

/// Project-local prompt override directory
const PROMPT_OVERRIDE_DIR: &str = ".opsd/prompts";

pub struct Runtime {
    pub config: Config,
    pub state: StateManager,
    pub events: EventBus,
    pub generator: Arc<dyn TextGenerator>,
    pub memory: Arc<dyn Memory>,
    pub tools: Arc<dyn ToolRunner>,
    pub collaborators: Collaborators,
    pub classifier: RiskClassifier,
    pub sandbox: PathSandbox,
    pub roles: RoleRegistry,
    pub workflows: WorkflowCatalog,
    pub prompts: Arc<PromptLoader>,
    pub ledger: ApprovalLedger,
}

impl Runtime {
    /// Production runtime: every collaborator derived from `config`
    pub fn from_config(config: Config) -> Result<Arc<Self>> {
        Self::builder(config).build()
    }

    pub fn builder(config: Config) -> RuntimeBuilder {
        RuntimeBuilder {
            config,
            generator: None,
            memory: None,
            tools: None,
            collaborators: None,
            workflows: None,
            prompts: None,
            events: None,
        }
    }

    /// Directory holding one Run's artifacts and report
    pub fn run_dir(&self, run_id: i64) -> PathBuf {
        self.config.storage.runs_dir.join(run_id.to_string())
    }

    /// Directory holding one ProcessRun's summary and deliveries
    pub fn process_dir(&self, process_run_id: i64) -> PathBuf {
        self.config.storage.processes_dir.join(process_run_id.to_string())
    }
}

/// Builds a [`Runtime`], letting callers replace any collaborator
pub struct RuntimeBuilder {
    config: Config,
    generator: Option<Arc<dyn TextGenerator>>,
    memory: Option<Arc<dyn Memory>>,
    tools: Option<Arc<dyn ToolRunner>>,
    collaborators: Option<Collaborators>,
    workflows: Option<WorkflowCatalog>,
    prompts: Option<PromptLoader>,
    events: Option<EventBus>,
}

impl RuntimeBuilder {
    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn tools(mut self, tools: Arc<dyn ToolRunner>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = Some(collaborators);
        self
    }

    pub fn workflows(mut self, workflows: WorkflowCatalog) -> Self {
        self.workflows = Some(workflows);
        self
    }

    pub fn prompts(mut self, prompts: PromptLoader) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Must be called inside a tokio runtime (spawns the state actor)
    pub fn build(self) -> Result<Arc<Runtime>> {
        let config = self.config;
        debug!("RuntimeBuilder::build: called");
        config.validate()?;

        let storage = &config.storage;
        for dir in [&storage.store_dir, &storage.runs_dir, &storage.processes_dir, &storage.deliveries_dir] {
            std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let state = StateManager::spawn(&storage.store_dir)?;
        let classifier = RiskClassifier::new(&config.policy)?;
        let sandbox = PathSandbox::new(&config.policy.allowed_paths);
        let roles = RoleRegistry::load(&config.roles)?;
        let workflows = match self.workflows {
            Some(workflows) => workflows,
            None => WorkflowCatalog::load(&config.workflows)?,
        };
        let prompts = Arc::new(self.prompts.unwrap_or_else(|| PromptLoader::new(PROMPT_OVERRIDE_DIR)));

        let generator = match self.generator {
            Some(generator) => generator,
            None => create_generator(&config.llm).context("Failed to create text generator")?,
        };
        let memory = self
            .memory
            .unwrap_or_else(|| Arc::new(StoreMemory::new(state.clone())));
        let tools = self.tools.unwrap_or_else(|| {
            let ctx = ToolContext::new(storage.runs_dir.clone(), sandbox.clone());
            Arc::new(ToolExecutor::standard(ctx, Duration::from_millis(config.tools.timeout_ms)))
        });
        let collaborators = self.collaborators.unwrap_or_else(|| {
            Collaborators::from_llm(LlmCollaborators::new(
                generator.clone(),
                prompts.clone(),
                GenerateOptions::from_config(&config.llm),
            ))
        });

        info!(
            store = %storage.store_dir.display(),
            workflows = workflows.names().len(),
            roles = roles.names().len(),
            "Runtime ready"
        );
        Ok(Arc::new(Runtime {
            ledger: ApprovalLedger::new(state.clone()),
            events: self.events.unwrap_or_default(),
            config,
            state,
            generator,
            memory,
            tools,
            collaborators,
            classifier,
            sandbox,
            roles,
            workflows,
            prompts,
        }))
    }
}
