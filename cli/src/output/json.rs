//! JSON output helpers.
//!
//! `JsonRenderer` prints one pretty-printed document per command on stdout.
//! Secret outputs are written as `"[secret]"`, never in plaintext.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use vmgr_common::{OutputMap, UnitSummary, WorkflowRun};

use crate::application::services::stack_chain::ChainOutcome;
use crate::domain::reap::SweepReport;

/// Format a JSON error object.
///
/// Output (pretty-printed):
/// ```json
/// {
///   "error": true,
///   "message": "...",
///   "code": "..."
/// }
/// ```
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn format_error(message: &str, code: &str) -> Result<String> {
    let obj = serde_json::json!({
        "error": true,
        "message": message,
        "code": code,
    });
    serde_json::to_string_pretty(&obj).context("JSON serialization failed")
}

/// Output values with secrets replaced by `"[secret]"`.
#[must_use]
pub fn redacted(outputs: &OutputMap) -> BTreeMap<String, serde_json::Value> {
    outputs
        .iter()
        .map(|(key, value)| {
            let shown = if value.secret {
                serde_json::Value::String("[secret]".to_string())
            } else {
                value.value.clone()
            };
            (key.clone(), shown)
        })
        .collect()
}

#[derive(Serialize)]
struct UnitRow<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_update: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    age_secs: Option<i64>,
}

/// Renders command results as JSON on stdout.
pub struct JsonRenderer;

impl JsonRenderer {
    fn print(value: &impl Serialize) -> Result<()> {
        println!(
            "{}",
            serde_json::to_string_pretty(value).context("JSON serialization")?
        );
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn render_version(version: &str) -> Result<()> {
        Self::print(&serde_json::json!({ "version": version }))
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn render_chain(action: &str, project: &str, outcome: &ChainOutcome) -> Result<()> {
        let outputs: BTreeMap<_, _> = outcome
            .outputs
            .iter()
            .map(|(unit, outputs)| (unit.as_str(), redacted(outputs)))
            .collect();
        Self::print(&serde_json::json!({
            "action": action,
            "project": project,
            "order": outcome.order,
            "outputs": outputs,
        }))
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn render_sweep(project: &str, report: &SweepReport) -> Result<()> {
        Self::print(&serde_json::json!({
            "project": project,
            "found": report.found,
            "succeeded": report.succeeded,
            "failed": report.failed,
            "failures": report.failures,
        }))
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn render_run(run: &WorkflowRun) -> Result<()> {
        Self::print(run)
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn render_runs(runs: &[WorkflowRun]) -> Result<()> {
        Self::print(&runs)
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn render_units(project: &str, units: &[UnitSummary], now: DateTime<Utc>) -> Result<()> {
        let rows: Vec<UnitRow<'_>> = units
            .iter()
            .map(|u| UnitRow {
                name: &u.name,
                last_update: u.last_update,
                age_secs: u.last_update.map(|at| (now - at).num_seconds()),
            })
            .collect();
        Self::print(&serde_json::json!({ "project": project, "units": rows }))
    }
}

/// Stable machine-readable code for the `code` field of the error object.
#[must_use]
pub fn error_code(err: &anyhow::Error) -> &'static str {
    use crate::domain::error::{ConfigurationError, EngineError, SweepError, WorkflowError};

    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<WorkflowError>() {
            return match e {
                WorkflowError::StepFailed { .. } => "step_failed",
                WorkflowError::RunNotFound(_) => "run_not_found",
                WorkflowError::AlreadyFinished { .. } => "run_finished",
            };
        }
        if cause.downcast_ref::<SweepError>().is_some() {
            return "partial_sweep_failure";
        }
        if cause.downcast_ref::<ConfigurationError>().is_some() {
            return "configuration";
        }
        if let Some(e) = cause.downcast_ref::<EngineError>() {
            return match e {
                EngineError::Unavailable(_) => "engine_unavailable",
                EngineError::ConcurrentModification { .. } => "concurrent_modification",
                EngineError::AlreadyExists { .. } => "already_exists",
                EngineError::NotFound { .. } => "not_found",
                EngineError::Operation { .. } => "operation_failed",
            };
        }
    }
    "error"
}
