//! Application context: unified state passed to every command handler.
//!
//! `AppContext` is built once in `Cli::run()` from the top-level flags and
//! the config file. It owns the output context, the selected deployment
//! engine, and the workflow run log, so no command constructs its own.

use anyhow::{Context, Result};
use clap::ValueEnum;
use vmgr_common::{DeploymentUnit, OutputMap, UnitSummary};

use crate::application::ports::{ConfigStore, UnitCatalog, UnitLifecycle};
use crate::application::services::registry::Registry;
use crate::application::services::workflow::{WorkflowRunner, WorkflowSettings};
use crate::domain::config::VmgrConfig;
use crate::domain::error::EngineError;
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::config::YamlConfigStore;
use crate::infra::engine::{StackCliEngine, default_work_dir};
use crate::infra::memory::MemoryEngine;
use crate::infra::run_store::FileRunStore;
use crate::output::{HumanRenderer, JsonRenderer, OutputContext, Renderer, TerminalReporter};

/// Output rendering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-readable terminal output (default).
    Human,
    /// Machine-readable JSON output.
    Json,
}

/// Which deployment engine backs this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum EngineKind {
    /// The `pulumi` stack CLI (or `engine.program` from the config file).
    #[default]
    StackCli,
    /// In-process engine; state lives only as long as the command.
    Memory,
}

/// Output rendering flags.
pub struct OutputFlags {
    /// Disable ANSI color output.
    pub no_color: bool,
    /// Suppress non-error output.
    pub quiet: bool,
    /// Enable JSON output mode.
    pub json: bool,
}

/// Behaviour flags.
pub struct BehaviourFlags {
    /// Skip interactive prompts (also set by `CI` / `VMGR_YES` env vars).
    pub yes: bool,
}

/// Engine selection flags.
pub struct EngineFlags {
    pub kind: EngineKind,
    /// Overrides `project` from the config file.
    pub project: Option<String>,
}

/// Flags passed from the top-level CLI to `AppContext::new`.
pub struct AppFlags {
    pub output: OutputFlags,
    pub behaviour: BehaviourFlags,
    pub engine: EngineFlags,
}

/// The engine chosen at startup. Dispatches statically to the concrete
/// adapter so services stay generic over `DeploymentEngine`.
pub enum SelectedEngine {
    StackCli(StackCliEngine<TokioCommandRunner>),
    Memory(MemoryEngine),
}

impl UnitLifecycle for SelectedEngine {
    async fn create(&self, unit: &DeploymentUnit) -> Result<(), EngineError> {
        match self {
            Self::StackCli(e) => e.create(unit).await,
            Self::Memory(e) => e.create(unit).await,
        }
    }

    async fn select(&self, unit: &DeploymentUnit) -> Result<(), EngineError> {
        match self {
            Self::StackCli(e) => e.select(unit).await,
            Self::Memory(e) => e.select(unit).await,
        }
    }

    async fn set_config(
        &self,
        unit: &DeploymentUnit,
        key: &str,
        value: &str,
    ) -> Result<(), EngineError> {
        match self {
            Self::StackCli(e) => e.set_config(unit, key, value).await,
            Self::Memory(e) => e.set_config(unit, key, value).await,
        }
    }

    async fn refresh(&self, unit: &DeploymentUnit) -> Result<(), EngineError> {
        match self {
            Self::StackCli(e) => e.refresh(unit).await,
            Self::Memory(e) => e.refresh(unit).await,
        }
    }

    async fn apply(&self, unit: &DeploymentUnit) -> Result<OutputMap, EngineError> {
        match self {
            Self::StackCli(e) => e.apply(unit).await,
            Self::Memory(e) => e.apply(unit).await,
        }
    }

    async fn outputs(&self, unit: &DeploymentUnit) -> Result<OutputMap, EngineError> {
        match self {
            Self::StackCli(e) => e.outputs(unit).await,
            Self::Memory(e) => e.outputs(unit).await,
        }
    }

    async fn destroy(&self, unit: &DeploymentUnit) -> Result<(), EngineError> {
        match self {
            Self::StackCli(e) => e.destroy(unit).await,
            Self::Memory(e) => e.destroy(unit).await,
        }
    }

    async fn remove(&self, unit: &DeploymentUnit) -> Result<(), EngineError> {
        match self {
            Self::StackCli(e) => e.remove(unit).await,
            Self::Memory(e) => e.remove(unit).await,
        }
    }
}

impl UnitCatalog for SelectedEngine {
    async fn list(&self, project: &str) -> Result<Vec<UnitSummary>, EngineError> {
        match self {
            Self::StackCli(e) => e.list(project).await,
            Self::Memory(e) => e.list(project).await,
        }
    }
}

/// Unified application context passed to every command handler.
pub struct AppContext {
    /// Terminal output context (colors, quiet mode).
    pub output: OutputContext,
    /// Output rendering mode (human vs JSON).
    pub mode: OutputMode,
    /// Validated configuration, with CLI overrides applied.
    pub config: VmgrConfig,
    pub engine: SelectedEngine,
    /// Durable log of workflow runs.
    pub run_store: FileRunStore,
    /// When `true`, skip interactive prompts and use defaults.
    ///
    /// Set when `--yes` / `-y` is passed, or when the `CI` or `VMGR_YES`
    /// environment variables are present.
    pub non_interactive: bool,
}

impl AppContext {
    /// Construct an `AppContext` from top-level CLI flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file is invalid, the `--project`
    /// override is not a valid unit name, or the home directory is unknown.
    pub fn new(flags: &AppFlags) -> Result<Self> {
        Self::with_config_store(flags, &YamlConfigStore)
    }

    /// Same as [`AppContext::new`] with an explicit config source.
    ///
    /// # Errors
    ///
    /// See [`AppContext::new`].
    pub fn with_config_store(flags: &AppFlags, store: &impl ConfigStore) -> Result<Self> {
        let ci_env = std::env::var("CI").is_ok() || std::env::var("VMGR_YES").is_ok();
        let non_interactive = flags.behaviour.yes || ci_env;

        let mode = if flags.output.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        };

        let mut config = store.load()?;
        if let Some(project) = &flags.engine.project {
            config.project.clone_from(project);
            config.validate().context("invalid --project")?;
        }

        let engine = match flags.engine.kind {
            EngineKind::Memory => SelectedEngine::Memory(MemoryEngine::new()),
            EngineKind::StackCli => {
                let timeout = config.workflow_policy()?.deploy.timeout;
                let work_dir = config
                    .engine
                    .work_dir
                    .clone()
                    .unwrap_or_else(default_work_dir);
                SelectedEngine::StackCli(StackCliEngine::new(
                    TokioCommandRunner::new(timeout)
                        .with_env("PULUMI_SKIP_UPDATE_CHECK", "true"),
                    config.engine.program.clone(),
                    work_dir,
                ))
            }
        };

        Ok(Self {
            // Progress lines would corrupt the JSON document on stdout.
            output: OutputContext::new(
                flags.output.no_color,
                flags.output.quiet || flags.output.json,
            ),
            mode,
            config,
            engine,
            run_store: FileRunStore::new()?,
            non_interactive,
        })
    }

    /// Returns the appropriate `Renderer` variant for the current output mode.
    #[must_use]
    pub fn renderer(&self) -> Renderer<'_> {
        match self.mode {
            OutputMode::Human => Renderer::Human(HumanRenderer::new(&self.output)),
            OutputMode::Json => Renderer::Json(JsonRenderer),
        }
    }

    #[must_use]
    pub fn reporter(&self) -> TerminalReporter<'_> {
        TerminalReporter::new(&self.output)
    }

    /// Registry over `project` using the configured retry policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the retry settings do not parse.
    pub fn registry(&self, project: &str) -> Result<Registry<'_, SelectedEngine>> {
        Ok(Registry::new(
            &self.engine,
            project,
            self.config.retry_policy()?,
        ))
    }

    /// Workflow runner for the configured project and location.
    ///
    /// # Errors
    ///
    /// Returns an error if the step policy settings do not parse.
    pub fn workflow(&self) -> Result<WorkflowRunner<'_, SelectedEngine, FileRunStore>> {
        Ok(WorkflowRunner::new(
            &self.engine,
            &self.run_store,
            WorkflowSettings {
                project: self.config.project.clone(),
                location: self.config.location.clone(),
                policy: self.config.workflow_policy()?,
            },
        ))
    }

    /// Ask the user for confirmation.
    ///
    /// When `non_interactive` is `true` (CI, `--yes` flag, or `VMGR_YES` env),
    /// returns `default` immediately without prompting.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal prompt fails (e.g. no TTY available).
    pub fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        if self.non_interactive {
            return Ok(default);
        }
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()?;
        Ok(confirmed)
    }
}
