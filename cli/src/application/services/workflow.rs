//! Durable provisioning workflow runner.
//!
//! Drives a [`WorkflowRun`] through `Start → EnsuringNetwork → Deploying →
//! Active → TearingDown → Done`, persisting the run after every transition so
//! [`WorkflowRunner::resume`] can continue from the last recorded phase.
//! Every engine step is idempotent, so a step interrupted after its side
//! effect but before the transition was recorded is simply executed again.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};
use vmgr_common::{
    NETWORK_UNIT, NetworkInfo, RunFailure, RunMode, WorkflowPhase, WorkflowRun, validate_run_id,
    validate_unit_name, vm_unit_name,
};

use crate::application::ports::{DeploymentEngine, ProgressReporter, RunStore};
use crate::application::services::registry::Registry;
use crate::application::services::retry::{engine_error, is_configuration_error, retry_when};
use crate::domain::duration::format_duration;
use crate::domain::error::{ConfigurationError, EngineError, WorkflowError};
use crate::domain::outputs::{
    NetworkOutputs, OutputSchema, RESOURCE_GROUP_OUTPUT, SUBNET_OUTPUT, VmOutputs,
};
use crate::domain::workflow::{
    RetryPolicy, StepPolicy, WorkflowPolicy, generate_run_id, next_phase, random_vm_name,
};

/// Config key the network location is written under before the first apply.
pub const LOCATION_CONFIG_KEY: &str = "azure-native:location";

// ── TTL control ──────────────────────────────────────────────────────────────

/// Instruction delivered to a run holding in `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlCommand {
    /// End the hold now and tear down.
    ExpireNow,
    /// Move the teardown deadline.
    ExtendTo(DateTime<Utc>),
}

/// Sender half: cancel or extend a run's `Active` hold.
#[derive(Clone)]
pub struct TtlControl {
    tx: Arc<watch::Sender<Option<TtlCommand>>>,
}

/// Receiver half, handed to [`WorkflowRunner::drive`].
pub struct TtlWatch {
    rx: watch::Receiver<Option<TtlCommand>>,
}

impl TtlControl {
    #[must_use]
    pub fn channel() -> (Self, TtlWatch) {
        let (tx, rx) = watch::channel(None);
        (Self { tx: Arc::new(tx) }, TtlWatch { rx })
    }

    /// End the hold immediately. Sent before `Active` is reached, the run
    /// tears down as soon as it gets there.
    pub fn expire_now(&self) {
        self.tx.send_replace(Some(TtlCommand::ExpireNow));
    }

    pub fn extend_to(&self, deadline: DateTime<Utc>) {
        self.tx.send_replace(Some(TtlCommand::ExtendTo(deadline)));
    }
}

impl TtlWatch {
    /// A watch nobody controls: the hold always runs to its deadline.
    #[must_use]
    pub fn detached() -> Self {
        let (_, watch) = TtlControl::channel();
        watch
    }

    /// Next command, or `None` once every controller is gone.
    async fn next(&mut self) -> Option<TtlCommand> {
        self.rx.changed().await.ok()?;
        *self.rx.borrow_and_update()
    }
}

// ── Runner ───────────────────────────────────────────────────────────────────

/// Static settings of a runner.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub project: String,
    pub location: String,
    pub policy: WorkflowPolicy,
}

pub struct WorkflowRunner<'a, E, S> {
    engine: &'a E,
    store: &'a S,
    settings: WorkflowSettings,
}

impl<'a, E: DeploymentEngine, S: RunStore> WorkflowRunner<'a, E, S> {
    pub fn new(engine: &'a E, store: &'a S, settings: WorkflowSettings) -> Self {
        Self {
            engine,
            store,
            settings,
        }
    }

    /// Record a new run in `Start` without executing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the VM name is invalid or the run cannot be saved.
    pub async fn submit(
        &self,
        vm_name: &str,
        mode: RunMode,
        ttl: Duration,
    ) -> Result<WorkflowRun> {
        validate_unit_name(&vm_unit_name(vm_name))
            .map_err(|e| ConfigurationError::InvalidUnitName(e.to_string()))?;
        let run = WorkflowRun::new(
            generate_run_id(),
            self.settings.project.clone(),
            vm_name,
            mode,
            ttl.as_secs(),
            Utc::now(),
        );
        self.store.save(&run).await.context("recording new run")?;
        info!(run = %run.id, vm = %vm_name, ?mode, ttl = %format_duration(ttl), "run submitted");
        Ok(run)
    }

    /// Submit a run and drive it to completion.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::StepFailed`] when a step exhausts its retries.
    pub async fn run(
        &self,
        vm_name: &str,
        mode: RunMode,
        ttl: Duration,
        watch: &mut TtlWatch,
        reporter: &impl ProgressReporter,
    ) -> Result<WorkflowRun> {
        let run = self.submit(vm_name, mode, ttl).await?;
        reporter.step(&format!("run {} started", run.id));
        self.drive(run, watch, reporter).await
    }

    /// Ensure the network and deploy a VM that is left running for the reaper.
    /// Without a name, a random eight-digit one is chosen.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::StepFailed`] when a step exhausts its retries.
    pub async fn provision_only(
        &self,
        vm_name: Option<&str>,
        reporter: &impl ProgressReporter,
    ) -> Result<WorkflowRun> {
        let vm_name = vm_name.map_or_else(random_vm_name, str::to_owned);
        self.run(
            &vm_name,
            RunMode::Persistent,
            Duration::ZERO,
            &mut TtlWatch::detached(),
            reporter,
        )
        .await
    }

    /// Continue a recorded run from its last persisted phase.
    ///
    /// # Errors
    ///
    /// `RunNotFound` for an unknown id, `AlreadyFinished` for a terminal run,
    /// `StepFailed` when a step exhausts its retries.
    pub async fn resume(
        &self,
        run_id: &str,
        watch: &mut TtlWatch,
        reporter: &impl ProgressReporter,
    ) -> Result<WorkflowRun> {
        let run = self.status(run_id).await?;
        if run.phase.is_terminal() {
            return Err(WorkflowError::AlreadyFinished {
                run: run.id,
                phase: run.phase,
            }
            .into());
        }
        info!(run = %run.id, phase = %run.phase, "resuming run");
        reporter.step(&format!("resuming run {} at {}", run.id, run.phase));
        self.drive(run, watch, reporter).await
    }

    /// # Errors
    ///
    /// Returns `RunNotFound` for an unknown or malformed id.
    pub async fn status(&self, run_id: &str) -> Result<WorkflowRun> {
        validate_run_id(run_id).map_err(|_| WorkflowError::RunNotFound(run_id.to_string()))?;
        self.store
            .load(run_id)
            .await?
            .ok_or_else(|| WorkflowError::RunNotFound(run_id.to_string()).into())
    }

    /// # Errors
    ///
    /// Returns an error if the run log cannot be read.
    pub async fn list(&self) -> Result<Vec<WorkflowRun>> {
        self.store.list().await
    }

    /// Execute phases until the run is terminal.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::StepFailed`] after recording the run as
    /// `Failed`, or a persistence error.
    pub async fn drive(
        &self,
        mut run: WorkflowRun,
        watch: &mut TtlWatch,
        reporter: &impl ProgressReporter,
    ) -> Result<WorkflowRun> {
        let registry = Registry::new(self.engine, run.project.clone(), RetryPolicy::once());

        loop {
            let phase = run.phase;
            let outcome = match phase {
                WorkflowPhase::Done | WorkflowPhase::Failed => break,
                WorkflowPhase::Start => Ok(()),
                WorkflowPhase::EnsuringNetwork => {
                    reporter.step("ensuring network...");
                    let location = self.settings.location.clone();
                    let result = self
                        .step(phase, || ensure_network(&registry, &location))
                        .await;
                    result.map(|network| {
                        reporter.success(&format!(
                            "network ready (resource group {})",
                            network.resource_group
                        ));
                        run.network = Some(network);
                    })
                }
                WorkflowPhase::Deploying => {
                    reporter.step(&format!("deploying VM {}...", run.vm_name));
                    let vm_name = run.vm_name.clone();
                    let network = run.network.clone();
                    let result = self
                        .step(phase, || deploy_vm(&registry, &vm_name, network.as_ref()))
                        .await;
                    result.map(|(unit, ip)| {
                        reporter.success(&format!("VM {unit} deployed at {ip}"));
                        run.unit_name = Some(unit);
                        run.address = Some(ip);
                    })
                }
                WorkflowPhase::Active => {
                    self.hold(&mut run, watch, reporter).await.map_err(|e| (e, 1))
                }
                WorkflowPhase::TearingDown => {
                    reporter.step("tearing down VM...");
                    let unit = run
                        .unit_name
                        .clone()
                        .unwrap_or_else(|| vm_unit_name(&run.vm_name));
                    let result = self.step(phase, || tear_down(&registry, &unit)).await;
                    result.map(|()| reporter.success(&format!("{unit} torn down")))
                }
            };

            match outcome {
                Ok(()) => {
                    let next = next_phase(phase, run.mode).unwrap_or(WorkflowPhase::Done);
                    if next == WorkflowPhase::Active && run.active_until.is_none() {
                        let ttl = chrono::Duration::seconds(
                            i64::try_from(run.ttl_secs).unwrap_or(i64::MAX),
                        );
                        run.active_until = Utc::now().checked_add_signed(ttl);
                    }
                    self.transition(&mut run, next).await?;
                }
                Err((err, attempts)) => {
                    let message = format!("{err:#}");
                    error!(run = %run.id, %phase, attempts, error = %message, "workflow step failed");
                    run.error = Some(RunFailure {
                        phase,
                        attempts,
                        message: message.clone(),
                    });
                    self.transition(&mut run, WorkflowPhase::Failed).await?;
                    return Err(WorkflowError::StepFailed {
                        run: run.id,
                        phase,
                        attempts,
                        message,
                    }
                    .into());
                }
            }
        }
        Ok(run)
    }

    async fn transition(&self, run: &mut WorkflowRun, next: WorkflowPhase) -> Result<()> {
        let from = run.phase;
        run.phase = next;
        run.updated_at = Utc::now();
        self.store
            .save(run)
            .await
            .with_context(|| format!("recording run {} in phase {next}", run.id))?;
        info!(run = %run.id, %from, to = %next, "phase transition");
        Ok(())
    }

    /// Run one step under its retry policy and per-attempt timeout.
    async fn step<T, F, Fut>(
        &self,
        phase: WorkflowPhase,
        mut op: F,
    ) -> std::result::Result<T, (anyhow::Error, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy: StepPolicy = self
            .settings
            .policy
            .for_phase(phase)
            .copied()
            .unwrap_or_default();
        let label = phase.to_string();
        retry_when(
            &policy.retry,
            &label,
            |e| !is_configuration_error(e),
            || {
                let fut = op();
                async move {
                    tokio::time::timeout(policy.timeout, fut)
                        .await
                        .unwrap_or_else(|_| {
                            Err(anyhow::anyhow!(
                                "{phase} timed out after {}",
                                format_duration(policy.timeout)
                            ))
                        })
                }
            },
        )
        .await
    }

    /// Wait out the `Active` deadline, honouring TTL commands.
    async fn hold(
        &self,
        run: &mut WorkflowRun,
        watch: &mut TtlWatch,
        reporter: &impl ProgressReporter,
    ) -> Result<()> {
        if let Some(address) = &run.address {
            reporter.success(&format!("VM reachable at {address}"));
        }
        loop {
            let deadline = run.active_until.unwrap_or_else(Utc::now);
            let remaining = (deadline - Utc::now()).to_std().unwrap_or_default();
            reporter.step(&format!(
                "holding for {} (until {})",
                format_duration(remaining),
                deadline.format("%H:%M:%S UTC")
            ));
            tokio::select! {
                () = tokio::time::sleep(remaining) => return Ok(()),
                command = watch.next() => match command {
                    Some(TtlCommand::ExpireNow) => {
                        info!(run = %run.id, "ttl expired early");
                        run.active_until = Some(Utc::now());
                        return Ok(());
                    }
                    Some(TtlCommand::ExtendTo(until)) => {
                        info!(run = %run.id, %until, "ttl extended");
                        run.active_until = Some(until);
                        run.updated_at = Utc::now();
                        self.store.save(run).await.context("recording new deadline")?;
                    }
                    None => {
                        tokio::time::sleep(remaining).await;
                        return Ok(());
                    }
                },
            }
        }
    }
}

// ── Steps ────────────────────────────────────────────────────────────────────

/// Acquire (create-or-select, refresh) the shared network unit and reuse its outputs when it is
/// already provisioned. Concurrent runs converge on the same unit.
async fn ensure_network<E: DeploymentEngine>(
    registry: &Registry<'_, E>,
    location: &str,
) -> Result<NetworkInfo> {
    let (mut unit, _) = registry
        .acquire(NETWORK_UNIT, &BTreeMap::new())
        .await?;
    let outputs = registry.outputs(&unit).await?;
    if let Some(existing) = NetworkOutputs::existing(&unit.name, &outputs) {
        info!(resource_group = %existing.resource_group, "reusing network");
        return Ok(existing.into());
    }
    registry.set_config(&unit, LOCATION_CONFIG_KEY, location).await?;
    registry.apply(&mut unit).await?;
    Ok(NetworkOutputs::from_outputs(&unit.name, &unit.outputs)?.into())
}

/// Deploy the run's VM unit into the network and return `(unit, address)`.
async fn deploy_vm<E: DeploymentEngine>(
    registry: &Registry<'_, E>,
    vm_name: &str,
    network: Option<&NetworkInfo>,
) -> Result<(String, String)> {
    let network = network.context("network outputs missing from run record")?;
    let overrides = BTreeMap::from([
        (RESOURCE_GROUP_OUTPUT.to_string(), network.resource_group.clone()),
        (SUBNET_OUTPUT.to_string(), network.subnet_id.clone()),
    ]);
    let (mut unit, _) = registry
        .acquire(&vm_unit_name(vm_name), &overrides)
        .await?;
    registry.apply(&mut unit).await?;
    let vm = VmOutputs::from_outputs(&unit.name, &unit.outputs)?;
    Ok((unit.name, vm.ip))
}

/// Destroy and remove the VM unit. A unit that is already gone counts as done.
async fn tear_down<E: DeploymentEngine>(
    registry: &Registry<'_, E>,
    unit_name: &str,
) -> Result<()> {
    match registry.select(unit_name).await {
        Ok(unit) => registry.destroy_and_remove(&unit).await,
        Err(err) if matches!(engine_error(&err), Some(EngineError::NotFound { .. })) => {
            warn!(unit = %unit_name, "unit already torn down");
            Ok(())
        }
        Err(err) => Err(err),
    }
}
