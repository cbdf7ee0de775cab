//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain` and `vmgr_common`, never from
//! `crate::infra`, `crate::commands`, or `crate::output`.

use std::path::PathBuf;
use std::process::Output;

use anyhow::Result;
use vmgr_common::{DeploymentUnit, OutputMap, UnitSummary, WorkflowRun};

use crate::domain::config::VmgrConfig;
use crate::domain::error::EngineError;

// ── Deployment Engine Ports ───────────────────────────────────────────────────

/// Per-unit operations of the deployment engine.
///
/// Only `project` and `name` of the handle are read; outputs and timestamps
/// are returned, never trusted from the caller.
#[allow(async_fn_in_trait)]
pub trait UnitLifecycle {
    /// Register a new, empty unit. `AlreadyExists` if the name is taken.
    async fn create(&self, unit: &DeploymentUnit) -> Result<(), EngineError>;
    /// Make an existing unit current. `NotFound` if absent.
    async fn select(&self, unit: &DeploymentUnit) -> Result<(), EngineError>;
    /// Write one configuration value.
    async fn set_config(
        &self,
        unit: &DeploymentUnit,
        key: &str,
        value: &str,
    ) -> Result<(), EngineError>;
    /// Reconcile recorded state with reality without changing resources.
    async fn refresh(&self, unit: &DeploymentUnit) -> Result<(), EngineError>;
    /// Converge the unit to its declared state and return its outputs.
    async fn apply(&self, unit: &DeploymentUnit) -> Result<OutputMap, EngineError>;
    /// Outputs of the last successful apply (empty if never applied).
    async fn outputs(&self, unit: &DeploymentUnit) -> Result<OutputMap, EngineError>;
    /// Delete every resource of the unit; the registry entry stays.
    async fn destroy(&self, unit: &DeploymentUnit) -> Result<(), EngineError>;
    /// Delete the registry entry and its history. Only valid after `destroy`.
    async fn remove(&self, unit: &DeploymentUnit) -> Result<(), EngineError>;
}

/// Catalog view of the engine's registry.
#[allow(async_fn_in_trait)]
pub trait UnitCatalog {
    /// Every unit of `project` with its last-update timestamp.
    async fn list(&self, project: &str) -> Result<Vec<UnitSummary>, EngineError>;
}

/// Composite trait: any type implementing both sub-traits is a `DeploymentEngine`.
pub trait DeploymentEngine: UnitLifecycle + UnitCatalog {}

/// Blanket implementation: any type implementing both sub-traits is a `DeploymentEngine`.
impl<T> DeploymentEngine for T where T: UnitLifecycle + UnitCatalog {}

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Abstracts process execution so infrastructure can be swapped or mocked.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run a program and capture its output.
    ///
    /// Implementations should delegate to `run_with_timeout` using the
    /// instance's configured default timeout.
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output>;
    /// Run a program with a custom timeout override.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or exceeds `timeout`.
    /// On timeout, the child process must be killed (not left orphaned).
    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: std::time::Duration,
    ) -> Result<Output>;
}

// ── Progress Reporting Port ───────────────────────────────────────────────────

/// Abstracts progress reporting so services can emit events without
/// depending on the Presentation layer. Sync trait.
pub trait ProgressReporter {
    /// Emit an in-progress step message.
    fn step(&self, message: &str);
    /// Emit a success message.
    fn success(&self, message: &str);
    /// Emit a warning message.
    fn warn(&self, message: &str);
}

// ── State Ports ───────────────────────────────────────────────────────────────

/// Durable execution log of workflow runs.
#[allow(async_fn_in_trait)]
pub trait RunStore {
    /// Load one run, returning `None` if it was never recorded.
    async fn load(&self, run_id: &str) -> Result<Option<WorkflowRun>>;
    /// Persist the run, replacing any earlier record atomically.
    async fn save(&self, run: &WorkflowRun) -> Result<()>;
    /// Every recorded run, newest first.
    async fn list(&self) -> Result<Vec<WorkflowRun>>;
}

/// Abstracts loading `VmgrConfig` so commands can be tested with a fixed value.
pub trait ConfigStore {
    /// Load the configuration, falling back to defaults when no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    fn load(&self) -> Result<VmgrConfig>;
    /// Path the configuration is read from.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    fn path(&self) -> Result<PathBuf>;
}
