//! Dependency-ordered deploy and destroy of a unit graph.
//!
//! Units run sequentially in topological order. Partial failures are not
//! rolled back; the error names the unit and step, and a re-run converges
//! because every acquisition is create-or-select.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tracing::{info, warn};
use vmgr_common::{OutputMap, OutputValue};

use crate::application::ports::{DeploymentEngine, ProgressReporter};
use crate::application::services::registry::Registry;
use crate::domain::error::ConfigurationError;
use crate::domain::graph::{UnitDependencyEdge, UnitGraph};
use crate::domain::outputs::OutputSchema;

/// Result of a successful chain deploy or destroy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainOutcome {
    /// Units in the order they were processed.
    pub order: Vec<String>,
    /// Outputs of every applied unit (empty after destroy).
    pub outputs: BTreeMap<String, OutputMap>,
}

impl ChainOutcome {
    /// Outputs of `unit` parsed into a typed schema. A unit that produced no
    /// outputs in this run fails like one missing the first required key.
    ///
    /// # Errors
    ///
    /// `MissingOutput` or `SchemaMismatch` from the schema.
    pub fn typed<T: OutputSchema>(&self, unit: &str) -> Result<T, ConfigurationError> {
        let empty = OutputMap::new();
        T::from_outputs(unit, self.outputs.get(unit).unwrap_or(&empty))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DestroyOptions {
    /// Drop destroyed units from the catalog as well.
    pub remove: bool,
}

/// Config value for an edge's downstream, read from the upstream's outputs.
fn bound_value(
    edge: &UnitDependencyEdge,
    outputs: &OutputMap,
) -> Result<String, ConfigurationError> {
    let value = outputs
        .get(&edge.output_key)
        .ok_or_else(|| ConfigurationError::MissingOutput {
            unit: edge.upstream.clone(),
            key: edge.output_key.clone(),
        })?;
    Ok(config_string(value))
}

fn config_string(value: &OutputValue) -> String {
    value
        .as_str()
        .map_or_else(|| value.value.to_string(), str::to_owned)
}

/// Static config of `unit` plus values wired in from upstream outputs.
fn overrides_for(
    graph: &UnitGraph,
    unit: &str,
    upstream_outputs: &BTreeMap<String, OutputMap>,
) -> Result<BTreeMap<String, String>> {
    let mut overrides = graph
        .unit(unit)
        .map(|u| u.config.clone())
        .ok_or_else(|| ConfigurationError::UnknownUnit(unit.to_string()))?;
    for edge in graph.inbound(unit) {
        let outputs = upstream_outputs.get(&edge.upstream).ok_or_else(|| {
            ConfigurationError::MissingOutput {
                unit: edge.upstream.clone(),
                key: edge.output_key.clone(),
            }
        })?;
        overrides.insert(edge.config_key.clone(), bound_value(edge, outputs)?);
    }
    Ok(overrides)
}

/// Deploy every unit of `graph`, upstream first.
///
/// Each unit is acquired (create-or-select plus refresh) with its static
/// config and the outputs of upstreams applied earlier in this call, then
/// applied. A downstream never sees outputs from a previous orchestration.
///
/// # Errors
///
/// Configuration errors surface before any engine call. Engine errors stop
/// the chain at the failing unit.
pub async fn deploy<E: DeploymentEngine>(
    registry: &Registry<'_, E>,
    graph: &UnitGraph,
    reporter: &impl ProgressReporter,
) -> Result<ChainOutcome> {
    let order = graph.topological_order()?;
    let mut outcome = ChainOutcome {
        order: order.clone(),
        outputs: BTreeMap::new(),
    };

    for name in &order {
        reporter.step(&format!("deploying {name}..."));
        let overrides = overrides_for(graph, name, &outcome.outputs)?;
        let (mut unit, _) = registry.acquire(name, &overrides).await?;
        registry.apply(&mut unit).await?;
        reporter.success(&format!("{name} deployed"));
        outcome.outputs.insert(name.clone(), unit.outputs);
    }
    info!(project = %graph.project, units = order.len(), "chain deployed");
    Ok(outcome)
}

/// Destroy every unit of `graph`, downstream first.
///
/// Before a downstream is selected, the outputs it is bound to are fetched
/// again from its upstreams so it is destroyed with the configuration it was
/// deployed with. An upstream whose outputs are already gone leaves the
/// downstream's stored config untouched.
///
/// # Errors
///
/// Stops at the first failing unit; units destroyed before it stay destroyed.
pub async fn destroy<E: DeploymentEngine>(
    registry: &Registry<'_, E>,
    graph: &UnitGraph,
    opts: DestroyOptions,
    reporter: &impl ProgressReporter,
) -> Result<ChainOutcome> {
    let order = graph.teardown_order()?;

    for name in &order {
        let mut overrides = graph
            .unit(name)
            .map(|u| u.config.clone())
            .ok_or_else(|| ConfigurationError::UnknownUnit(name.clone()))?;

        for edge in graph.inbound(name) {
            let upstream_config = graph
                .unit(&edge.upstream)
                .map(|u| u.config.clone())
                .unwrap_or_default();
            let (upstream, _) = registry
                .acquire(&edge.upstream, &upstream_config)
                .await
                .with_context(|| format!("re-reading outputs of {} for {name}", edge.upstream))?;
            let outputs = registry.outputs(&upstream).await?;
            match bound_value(edge, &outputs) {
                Ok(value) => {
                    overrides.insert(edge.config_key.clone(), value);
                }
                Err(err) => {
                    warn!(unit = %name, upstream = %edge.upstream, error = %err, "upstream output gone; keeping stored config");
                    reporter.warn(&format!("{err}; keeping stored config for {name}"));
                }
            }
        }

        reporter.step(&format!("destroying {name}..."));
        let (unit, _) = registry.acquire(name, &overrides).await?;
        if opts.remove {
            registry.destroy_and_remove(&unit).await?;
        } else {
            registry.destroy(&unit).await?;
        }
        reporter.success(&format!("{name} destroyed"));
    }
    info!(project = %graph.project, units = order.len(), removed = opts.remove, "chain destroyed");
    Ok(ChainOutcome {
        order,
        outputs: BTreeMap::new(),
    })
}
