//! Unit registry: idempotent acquisition and step-tagged engine calls.
//!
//! Every engine call goes through [`with_retry`] and carries `"<step> <unit>"`
//! context, so a failure always names the unit and the step it happened in.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use std::collections::BTreeMap;
use std::future::Future;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info};
use vmgr_common::{DeploymentUnit, OutputMap, UnitSummary, validate_unit_name};

use crate::application::ports::DeploymentEngine;
use crate::application::services::retry::{engine_error, with_retry};
use crate::domain::error::{ConfigurationError, EngineError, Step};
use crate::domain::workflow::RetryPolicy;

/// How `create_or_select` obtained its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    Created,
    Selected,
}

/// Engine access for one project.
pub struct Registry<'a, E> {
    engine: &'a E,
    project: String,
    retry: RetryPolicy,
}

impl<'a, E: DeploymentEngine> Registry<'a, E> {
    pub fn new(engine: &'a E, project: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            engine,
            project: project.into(),
            retry,
        }
    }

    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Handle for `name` in this project, validated before it reaches the engine.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidUnitName`] for a malformed name.
    pub fn handle(&self, name: &str) -> Result<DeploymentUnit> {
        validate_unit_name(name)
            .map_err(|e| ConfigurationError::InvalidUnitName(e.to_string()))?;
        Ok(DeploymentUnit::new(self.project.clone(), name))
    }

    /// Run one engine call with retry and step context.
    async fn call<T, F, Fut>(&self, step: Step, unit: &DeploymentUnit, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let label = format!("{step} {}", unit.name);
        debug!(unit = %unit.qualified_name(), %step, "engine call");
        let result = with_retry(&self.retry, &label, || {
            let fut = op();
            async move { fut.await.map_err(anyhow::Error::from) }
        })
        .await;
        result.context(label)
    }

    /// Register a new unit. Fails with `AlreadyExists` if the name is taken.
    ///
    /// # Errors
    ///
    /// Returns the engine error with `create` context.
    pub async fn create(&self, unit: &DeploymentUnit) -> Result<()> {
        self.call(Step::Create, unit, || self.engine.create(unit)).await
    }

    /// # Errors
    ///
    /// Returns the engine error with `select` context; `NotFound` if absent.
    pub async fn select(&self, name: &str) -> Result<DeploymentUnit> {
        let unit = self.handle(name)?;
        self.call(Step::Select, &unit, || self.engine.select(&unit))
            .await?;
        Ok(unit)
    }

    /// # Errors
    ///
    /// Returns the engine error with `config` context.
    pub async fn set_config(&self, unit: &DeploymentUnit, key: &str, value: &str) -> Result<()> {
        self.call(Step::Config, unit, || self.engine.set_config(unit, key, value))
            .await
    }

    /// Create the unit, or select it if it already exists, then write the
    /// explicitly supplied `overrides`. Other configuration is left in place.
    ///
    /// # Errors
    ///
    /// Returns any engine error other than `AlreadyExists` from create.
    pub async fn create_or_select(
        &self,
        name: &str,
        overrides: &BTreeMap<String, String>,
    ) -> Result<(DeploymentUnit, Acquisition)> {
        let unit = self.handle(name)?;
        let acquisition = match self.create(&unit).await {
            Ok(()) => {
                info!(unit = %unit.qualified_name(), "created unit");
                Acquisition::Created
            }
            Err(err) if matches!(engine_error(&err), Some(EngineError::AlreadyExists { .. })) => {
                self.call(Step::Select, &unit, || self.engine.select(&unit))
                    .await?;
                debug!(unit = %unit.qualified_name(), "selected existing unit");
                Acquisition::Selected
            }
            Err(err) => return Err(err),
        };
        for (key, value) in overrides {
            self.set_config(&unit, key, value).await?;
        }
        Ok((unit, acquisition))
    }

    /// `create_or_select` followed by exactly one refresh.
    ///
    /// # Errors
    ///
    /// A refresh failure is fatal for the current operation.
    pub async fn acquire(
        &self,
        name: &str,
        overrides: &BTreeMap<String, String>,
    ) -> Result<(DeploymentUnit, Acquisition)> {
        let (unit, acquisition) = self.create_or_select(name, overrides).await?;
        self.call(Step::Refresh, &unit, || self.engine.refresh(&unit))
            .await?;
        Ok((unit, acquisition))
    }

    /// Apply the unit and record the new outputs and timestamp on the handle.
    ///
    /// # Errors
    ///
    /// Returns the engine error with `apply` context.
    pub async fn apply(&self, unit: &mut DeploymentUnit) -> Result<()> {
        let outputs = {
            let target: &DeploymentUnit = unit;
            self.call(Step::Apply, target, || self.engine.apply(target))
                .await?
        };
        unit.outputs = outputs;
        unit.last_update = Some(Utc::now());
        info!(unit = %unit.qualified_name(), outputs = unit.outputs.len(), "applied unit");
        Ok(())
    }

    /// Fetch the outputs of the unit's last successful apply.
    ///
    /// # Errors
    ///
    /// Returns the engine error with `outputs` context.
    pub async fn outputs(&self, unit: &DeploymentUnit) -> Result<OutputMap> {
        self.call(Step::Outputs, unit, || self.engine.outputs(unit))
            .await
    }

    /// # Errors
    ///
    /// Returns the engine error with `destroy` context.
    pub async fn destroy(&self, unit: &DeploymentUnit) -> Result<()> {
        self.call(Step::Destroy, unit, || self.engine.destroy(unit))
            .await?;
        info!(unit = %unit.qualified_name(), "destroyed unit");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns the engine error with `remove` context.
    pub async fn remove(&self, unit: &DeploymentUnit) -> Result<()> {
        self.call(Step::Remove, unit, || self.engine.remove(unit))
            .await?;
        info!(unit = %unit.qualified_name(), "removed unit from catalog");
        Ok(())
    }

    /// Destroy the unit's resources, then drop it from the catalog.
    ///
    /// # Errors
    ///
    /// Stops at the first failing step; `remove` never runs after a failed destroy.
    pub async fn destroy_and_remove(&self, unit: &DeploymentUnit) -> Result<()> {
        self.destroy(unit).await?;
        self.remove(unit).await
    }

    /// Catalog rows for this project.
    ///
    /// # Errors
    ///
    /// Returns the engine error with `list` context.
    pub async fn list(&self) -> Result<Vec<UnitSummary>> {
        let label = format!("{} {}", Step::List, self.project);
        let result = with_retry(&self.retry, &label, || async {
            self.engine
                .list(&self.project)
                .await
                .map_err(anyhow::Error::from)
        })
        .await;
        result.context(label)
    }
}
