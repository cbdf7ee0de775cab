//! Periodic expiry sweep over one project's units.
//!
//! Planning is pure (`domain::reap::plan_sweep`); this module lists, destroys
//! and removes. Each candidate is isolated: a failure is counted and the
//! sweep moves on to the next one.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::application::ports::{DeploymentEngine, ProgressReporter};
use crate::application::services::registry::Registry;
use crate::domain::duration::format_duration;
use crate::domain::reap::{ExpiryPolicy, ReapCandidate, SweepReport, plan_sweep};

/// Scheduler settings for [`Reaper::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperSchedule {
    pub interval: Duration,
    /// Consecutive failed sweeps of one unit before it is flagged for an operator.
    pub alert_after: u32,
}

impl Default for ReaperSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            alert_after: 5,
        }
    }
}

pub struct Reaper<'a, E> {
    registry: Registry<'a, E>,
    policy: ExpiryPolicy,
    schedule: ReaperSchedule,
    /// Consecutive failed sweeps per unit. In memory only; a restart resets it.
    streaks: HashMap<String, u32>,
}

impl<'a, E: DeploymentEngine> Reaper<'a, E> {
    pub fn new(registry: Registry<'a, E>, policy: ExpiryPolicy, schedule: ReaperSchedule) -> Self {
        Self {
            registry,
            policy,
            schedule,
            streaks: HashMap::new(),
        }
    }

    /// Consecutive failed sweeps recorded for `unit`.
    #[must_use]
    pub fn failure_streak(&self, unit: &str) -> u32 {
        self.streaks.get(unit).copied().unwrap_or(0)
    }

    /// One sweep at `now`.
    ///
    /// # Errors
    ///
    /// Fails only when the catalog cannot be listed. Per-unit failures are
    /// reported in the returned [`SweepReport`].
    pub async fn sweep(
        &mut self,
        now: DateTime<Utc>,
        reporter: &impl ProgressReporter,
    ) -> Result<SweepReport> {
        let units = self.registry.list().await?;
        let candidates = plan_sweep(&units, now, &self.policy);
        info!(
            project = %self.registry.project(),
            listed = units.len(),
            expired = candidates.len(),
            threshold = %format_duration(self.policy.threshold),
            "sweep planned"
        );

        let mut report = SweepReport {
            found: candidates.len(),
            ..SweepReport::default()
        };
        for candidate in &candidates {
            match self.reap(candidate, reporter).await {
                Ok(()) => {
                    self.streaks.remove(&candidate.name);
                    report.record_success();
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    warn!(unit = %candidate.name, error = %message, "failed to reap unit");
                    reporter.warn(&format!("failed to reap {}: {message}", candidate.name));
                    self.record_failure(&candidate.name);
                    report.record_failure(&candidate.name, message);
                }
            }
        }
        self.streaks
            .retain(|name, _| candidates.iter().any(|c| &c.name == name));

        info!(
            found = report.found,
            succeeded = report.succeeded,
            failed = report.failed,
            "sweep finished"
        );
        Ok(report)
    }

    async fn reap(
        &self,
        candidate: &ReapCandidate,
        reporter: &impl ProgressReporter,
    ) -> Result<()> {
        reporter.step(&format!(
            "reaping {} (last updated {} ago)...",
            candidate.name,
            format_duration(candidate.age)
        ));
        let unit = self.registry.select(&candidate.name).await?;
        self.registry.destroy_and_remove(&unit).await?;
        reporter.success(&format!("reaped {}", candidate.name));
        Ok(())
    }

    fn record_failure(&mut self, name: &str) {
        let streak = self.streaks.entry(name.to_string()).or_insert(0);
        *streak += 1;
        if *streak >= self.schedule.alert_after {
            error!(
                unit = %name,
                consecutive_failures = *streak,
                "unit keeps failing to reap; needs operator attention"
            );
        }
    }

    /// Sweep, sleep `interval`, repeat, until `shutdown` resolves.
    ///
    /// No cursor is persisted; every sweep re-lists the catalog. A sweep that
    /// fails entirely is logged and the loop carries on.
    pub async fn run(
        &mut self,
        shutdown: impl Future<Output = ()>,
        reporter: &impl ProgressReporter,
    ) {
        tokio::pin!(shutdown);
        loop {
            match self.sweep(Utc::now(), reporter).await {
                Ok(report) if report.failed > 0 => {
                    reporter.warn(&format!(
                        "reaped {} of {} expired unit(s); {} failed",
                        report.succeeded, report.found, report.failed
                    ));
                }
                Ok(report) => {
                    reporter.success(&format!("reaped {} expired unit(s)", report.succeeded));
                }
                Err(err) => {
                    error!(error = %format!("{err:#}"), "sweep failed");
                    reporter.warn(&format!("sweep failed: {err:#}"));
                }
            }
            tokio::select! {
                () = &mut shutdown => {
                    info!("reaper stopping");
                    return;
                }
                () = tokio::time::sleep(self.schedule.interval) => {}
            }
        }
    }
}
