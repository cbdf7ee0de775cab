//! `vmgr reap`: periodic expiry sweep of the project's units.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::Args;

use crate::app::AppContext;
use crate::application::services::reaper::{Reaper, ReaperSchedule};
use crate::commands::ctrl_c;
use crate::domain::duration::{format_duration, parse_duration};
use crate::domain::error::ConfigurationError;

/// Arguments for `vmgr reap`.
#[derive(Args)]
pub struct ReapArgs {
    /// Reap units last updated longer ago than this (e.g. 90s, 5m, 1h)
    #[arg(long, value_name = "DURATION")]
    pub older_than: Option<String>,

    /// Pause between sweeps
    #[arg(long, value_name = "DURATION")]
    pub interval: Option<String>,

    /// Run a single sweep and exit
    #[arg(long)]
    pub once: bool,
}

fn interval(app: &AppContext, args: &ReapArgs) -> Result<Duration> {
    let interval = match &args.interval {
        Some(value) => parse_duration(value)?,
        None => app.config.reaper_interval()?,
    };
    if interval.is_zero() {
        return Err(ConfigurationError::InvalidSetting {
            key: "--interval".to_string(),
            reason: "must be greater than zero".to_string(),
        }
        .into());
    }
    Ok(interval)
}

/// Run the reaper.
///
/// # Errors
///
/// Invalid durations, a failed listing with `--once`, or any unit left
/// unreaped by a `--once` sweep.
pub async fn run(app: &AppContext, args: &ReapArgs) -> Result<ExitCode> {
    let mut policy = app.config.expiry_policy()?;
    if let Some(value) = &args.older_than {
        policy.threshold = parse_duration(value)?;
    }
    let schedule = ReaperSchedule {
        interval: interval(app, args)?,
        alert_after: app.config.reaper.alert_after,
    };
    let project = app.config.project.clone();
    let threshold = policy.threshold;
    let mut reaper = Reaper::new(app.registry(&project)?, policy, schedule);
    let reporter = app.reporter();

    if args.once {
        let report = reaper.sweep(Utc::now(), &reporter).await?;
        app.renderer().render_sweep(&project, &report)?;
        report.into_result()?;
        return Ok(ExitCode::SUCCESS);
    }

    app.output.info(&format!(
        "Reaping units of {project} idle for more than {} every {} (Ctrl-C to stop)",
        format_duration(threshold),
        format_duration(schedule.interval)
    ));
    reaper.run(ctrl_c(), &reporter).await;
    Ok(ExitCode::SUCCESS)
}
