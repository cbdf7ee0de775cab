//! Deployment engine backed by the `pulumi` stack CLI.
//!
//! Every unit is a stack. Its program is looked up under the configured work
//! directory: `<work_dir>/<unit>` first, then `<work_dir>/<project>`, then the
//! work directory itself. Failures are classified from the CLI's stderr into
//! the [`EngineError`] taxonomy.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};
use vmgr_common::{DeploymentUnit, OutputMap, OutputValue, UnitSummary};

use crate::application::ports::{CommandRunner, UnitCatalog, UnitLifecycle};
use crate::domain::error::{EngineError, Step};

/// Placeholder the CLI prints for secret outputs unless `--show-secrets` is given.
const SECRET_PLACEHOLDER: &str = "[secret]";

/// Limit for stack bookkeeping commands. Refresh, apply and destroy run under
/// the runner's own (step) timeout instead.
pub const BOOKKEEPING_TIMEOUT: Duration = Duration::from_secs(120);

pub struct StackCliEngine<R> {
    runner: R,
    program: String,
    work_dir: PathBuf,
}

impl<R: CommandRunner> StackCliEngine<R> {
    pub fn new(runner: R, program: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            program: program.into(),
            work_dir: work_dir.into(),
        }
    }

    fn program_dir(&self, unit: &DeploymentUnit) -> PathBuf {
        [&unit.name, &unit.project]
            .into_iter()
            .map(|d| self.work_dir.join(d))
            .find(|p| p.is_dir())
            .unwrap_or_else(|| self.work_dir.clone())
    }

    /// Run one CLI invocation for `unit`, mapping failures to `EngineError`.
    async fn exec(
        &self,
        unit: &DeploymentUnit,
        step: Step,
        args: &[&str],
    ) -> Result<Output, EngineError> {
        let dir = self.program_dir(unit).to_string_lossy().into_owned();
        let mut full: Vec<&str> = vec!["--cwd", dir.as_str(), "--non-interactive"];
        full.extend_from_slice(args);
        debug!(unit = %unit.qualified_name(), %step, args = ?full, "stack cli");

        let output = match step {
            Step::Refresh | Step::Apply | Step::Destroy => {
                self.runner.run(&self.program, &full).await
            }
            _ => {
                self.runner
                    .run_with_timeout(&self.program, &full, BOOKKEEPING_TIMEOUT)
                    .await
            }
        }
        .map_err(|e| EngineError::Unavailable(format!("{}: {e:#}", self.program)))?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(classify(&unit.name, step, &String::from_utf8_lossy(&output.stderr)))
        }
    }
}

/// Map CLI stderr to the engine error taxonomy.
#[must_use]
pub fn classify(unit: &str, step: Step, stderr: &str) -> EngineError {
    let lower = stderr.to_ascii_lowercase();
    let unit_name = unit.to_string();
    if lower.contains("already exists") {
        EngineError::AlreadyExists { unit: unit_name }
    } else if lower.contains("no stack named") || lower.contains("not found") {
        EngineError::NotFound { unit: unit_name }
    } else if lower.contains("currently in progress")
        || lower.contains("conflict")
        || lower.contains("409")
    {
        EngineError::ConcurrentModification { unit: unit_name }
    } else if ["unauthorized", "failed to connect", "connection refused", "503", "timed out"]
        .iter()
        .any(|m| lower.contains(m))
    {
        EngineError::Unavailable(last_line(stderr))
    } else {
        EngineError::Operation {
            unit: unit_name,
            op: step,
            message: last_line(stderr),
        }
    }
}

fn last_line(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .rev()
        .find(|l| !l.is_empty())
        .unwrap_or("exited with an error")
        .to_string()
}

/// Combine `stack output --json` with its `--show-secrets` twin so values
/// masked in the first are marked secret.
///
/// # Errors
///
/// Returns an error if either document is not a JSON object.
pub fn parse_outputs(masked: &[u8], revealed: &[u8]) -> Result<OutputMap, serde_json::Error> {
    let masked: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(masked)?;
    let revealed: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(revealed)?;
    Ok(revealed
        .into_iter()
        .map(|(key, value)| {
            let secret = masked.get(&key).and_then(serde_json::Value::as_str)
                == Some(SECRET_PLACEHOLDER);
            (key, OutputValue { value, secret })
        })
        .collect())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StackListing {
    name: String,
    #[serde(default)]
    last_update: Option<String>,
}

/// Parse `stack ls --json`. Rows with an unparseable timestamp are skipped
/// with a warning rather than treated as never applied.
///
/// # Errors
///
/// Returns an error if the document is not a JSON array of stacks.
pub fn parse_listing(json: &[u8]) -> Result<Vec<UnitSummary>, serde_json::Error> {
    let rows: Vec<StackListing> = serde_json::from_slice(json)?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            // `--all` prints fully qualified org/project/stack names.
            let name = row.name.rsplit('/').next().unwrap_or(&row.name).to_string();
            let last_update = match row.last_update.as_deref().map(str::trim) {
                None | Some("") => None,
                Some(ts) => match DateTime::parse_from_rfc3339(ts) {
                    Ok(t) => Some(t.with_timezone(&Utc)),
                    Err(e) => {
                        warn!(
                            unit = %name,
                            timestamp = ts,
                            error = %e,
                            "skipping unit with unparseable lastUpdate"
                        );
                        return None;
                    }
                },
            };
            Some(UnitSummary { name, last_update })
        })
        .collect())
}

fn malformed(unit: &str, step: Step, e: &serde_json::Error) -> EngineError {
    EngineError::Operation {
        unit: unit.to_string(),
        op: step,
        message: format!("unexpected CLI output: {e}"),
    }
}

impl<R: CommandRunner> UnitLifecycle for StackCliEngine<R> {
    async fn create(&self, unit: &DeploymentUnit) -> Result<(), EngineError> {
        self.exec(unit, Step::Create, &["stack", "init", &unit.name])
            .await
            .map(drop)
    }

    async fn select(&self, unit: &DeploymentUnit) -> Result<(), EngineError> {
        self.exec(unit, Step::Select, &["stack", "select", &unit.name])
            .await
            .map(drop)
    }

    async fn set_config(
        &self,
        unit: &DeploymentUnit,
        key: &str,
        value: &str,
    ) -> Result<(), EngineError> {
        self.exec(
            unit,
            Step::Config,
            &["config", "set", key, value, "--stack", &unit.name],
        )
        .await
        .map(drop)
    }

    async fn refresh(&self, unit: &DeploymentUnit) -> Result<(), EngineError> {
        self.exec(
            unit,
            Step::Refresh,
            &["refresh", "--yes", "--skip-preview", "--stack", &unit.name],
        )
        .await
        .map(drop)
    }

    async fn apply(&self, unit: &DeploymentUnit) -> Result<OutputMap, EngineError> {
        self.exec(
            unit,
            Step::Apply,
            &["up", "--yes", "--skip-preview", "--stack", &unit.name],
        )
        .await?;
        self.outputs(unit).await
    }

    async fn outputs(&self, unit: &DeploymentUnit) -> Result<OutputMap, EngineError> {
        let masked = self
            .exec(unit, Step::Outputs, &["stack", "output", "--json", "--stack", &unit.name])
            .await?;
        let revealed = self
            .exec(
                unit,
                Step::Outputs,
                &["stack", "output", "--json", "--show-secrets", "--stack", &unit.name],
            )
            .await?;
        parse_outputs(&masked.stdout, &revealed.stdout)
            .map_err(|e| malformed(&unit.name, Step::Outputs, &e))
    }

    async fn destroy(&self, unit: &DeploymentUnit) -> Result<(), EngineError> {
        self.exec(
            unit,
            Step::Destroy,
            &["destroy", "--yes", "--skip-preview", "--stack", &unit.name],
        )
        .await
        .map(drop)
    }

    async fn remove(&self, unit: &DeploymentUnit) -> Result<(), EngineError> {
        self.exec(unit, Step::Remove, &["stack", "rm", "--yes", &unit.name])
            .await
            .map(drop)
    }
}

impl<R: CommandRunner> UnitCatalog for StackCliEngine<R> {
    async fn list(&self, project: &str) -> Result<Vec<UnitSummary>, EngineError> {
        let scope = DeploymentUnit::new(project, project);
        let output = self
            .exec(
                &scope,
                Step::List,
                &["stack", "ls", "--json", "--all", "--project", project],
            )
            .await?;
        parse_listing(&output.stdout).map_err(|e| malformed(project, Step::List, &e))
    }
}

/// Work directory used when none is configured.
#[must_use]
pub fn default_work_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| Path::new(".").to_path_buf())
}
