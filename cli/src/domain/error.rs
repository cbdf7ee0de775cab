//! Typed domain error enums.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator.

use std::fmt;

use thiserror::Error;
use vmgr_common::WorkflowPhase;

// ── Engine errors ─────────────────────────────────────────────────────────────

/// Failures reported by the Deployment Engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("deployment engine unavailable: {0}")]
    Unavailable(String),

    #[error("unit '{unit}' is locked by another operation")]
    ConcurrentModification { unit: String },

    #[error("unit '{unit}' already exists")]
    AlreadyExists { unit: String },

    #[error("no such deployment '{unit}'")]
    NotFound { unit: String },

    #[error("{op} failed for unit '{unit}': {message}")]
    Operation {
        unit: String,
        op: Step,
        message: String,
    },
}

impl EngineError {
    /// Transient errors are retried with backoff; everything else is surfaced.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::ConcurrentModification { .. }
        )
    }
}

/// Engine operation an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Create,
    Select,
    Config,
    Refresh,
    Apply,
    Outputs,
    Destroy,
    Remove,
    List,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Select => "select",
            Self::Config => "config",
            Self::Refresh => "refresh",
            Self::Apply => "apply",
            Self::Outputs => "outputs",
            Self::Destroy => "destroy",
            Self::Remove => "remove",
            Self::List => "list",
        })
    }
}

// ── Configuration errors ──────────────────────────────────────────────────────

/// Fatal, never-retried errors in how an orchestration was declared.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("dependency cycle between units: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("edge references undeclared unit '{0}'")]
    UnknownUnit(String),

    #[error("unit '{unit}' did not produce required output '{key}'")]
    MissingOutput { unit: String, key: String },

    #[error("output '{key}' of unit '{unit}' is not a {expected}")]
    SchemaMismatch {
        unit: String,
        key: String,
        expected: &'static str,
    },

    #[error("invalid duration '{0}': expected e.g. 90s, 5m, 1h30m, 2d")]
    InvalidDuration(String),

    #[error("invalid unit name: {0}")]
    InvalidUnitName(String),

    #[error("invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },
}

// ── Sweep errors ──────────────────────────────────────────────────────────────

/// A reaper sweep that completed but could not reap every candidate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SweepError {
    #[error(
        "reaped {succeeded} of {found} expired unit(s); {failed} failed and will be retried next sweep"
    )]
    PartialSweepFailure {
        found: usize,
        succeeded: usize,
        failed: usize,
    },
}

// ── Workflow errors ───────────────────────────────────────────────────────────

/// Errors surfaced by the provisioning workflow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("workflow run '{run}' failed in phase {phase} after {attempts} attempt(s): {message}")]
    StepFailed {
        run: String,
        phase: WorkflowPhase,
        attempts: u32,
        message: String,
    },

    #[error("workflow run '{0}' not found")]
    RunNotFound(String),

    #[error("workflow run '{run}' already finished ({phase})")]
    AlreadyFinished { run: String, phase: WorkflowPhase },
}
