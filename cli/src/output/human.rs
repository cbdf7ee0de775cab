//! Human-readable terminal renderer.

use chrono::{DateTime, Utc};
use owo_colors::OwoColorize as _;
use vmgr_common::{UnitSummary, WorkflowPhase, WorkflowRun};

use crate::application::services::stack_chain::ChainOutcome;
use crate::domain::duration::format_duration;
use crate::domain::outputs::SiteOutputs;
use crate::domain::reap::SweepReport;
use crate::output::OutputContext;

/// Renders results as human-readable terminal output using `OutputContext`.
pub struct HumanRenderer<'a> {
    ctx: &'a OutputContext,
}

/// Age of a catalog row, or `never applied`.
#[must_use]
pub fn format_age(last_update: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match last_update {
        Some(at) => format!(
            "{} ago",
            format_duration((now - at).to_std().unwrap_or_default())
        ),
        None => "never applied".to_string(),
    }
}

impl<'a> HumanRenderer<'a> {
    #[must_use]
    pub fn new(ctx: &'a OutputContext) -> Self {
        Self { ctx }
    }

    pub fn render_version(&self, version: &str) {
        println!("vmgr {version}");
        if !self.ctx.quiet {
            self.ctx
                .kv("Build:", &format!("{} {}", std::env::consts::OS, std::env::consts::ARCH));
        }
    }

    /// Render a deployed chain. The site URL is printed even when quiet so
    /// scripts can capture it.
    pub fn render_site_up(&self, outcome: &ChainOutcome, site: &SiteOutputs) {
        for name in &outcome.order {
            let Some(outputs) = outcome.outputs.get(name) else {
                continue;
            };
            self.ctx.header(&format!("{name}:"));
            for (key, value) in outputs {
                self.ctx.kv(&format!("  {key}:"), &value.to_string());
            }
        }
        if self.ctx.quiet {
            println!("{}", site.website_url);
        } else {
            println!();
            self.ctx
                .success(&format!("Site available at {}", site.website_url));
        }
    }

    pub fn render_site_destroyed(&self, outcome: &ChainOutcome, removed: bool) {
        let verb = if removed { "destroyed and removed" } else { "destroyed" };
        self.ctx
            .success(&format!("{} unit(s) {verb}: {}", outcome.order.len(), outcome.order.join(", ")));
        if !removed {
            self.ctx
                .info("Units remain in the catalog. Drop them with: vmgr site destroy --remove");
        }
    }

    pub fn render_sweep(&self, report: &SweepReport) {
        if report.found == 0 {
            self.ctx.info("No expired units.");
            return;
        }
        let summary = format!(
            "found {}, reaped {}, failed {}",
            report.found, report.succeeded, report.failed
        );
        if report.failed == 0 {
            self.ctx.success(&summary);
        } else {
            self.ctx.warn(&summary);
            for failure in &report.failures {
                self.ctx.error(&format!("{}: {}", failure.name, failure.message));
            }
        }
    }

    fn phase_label(&self, phase: WorkflowPhase) -> String {
        format!("{}", phase.to_string().style(self.ctx.styles.phase(phase)))
    }

    pub fn render_run(&self, run: &WorkflowRun) {
        println!();
        println!("  {}", format!("Run {}", run.id).style(self.ctx.styles.header));
        println!();
        println!("  {:<14} {}", "Phase:", self.phase_label(run.phase));
        println!("  {:<14} {}", "VM:", run.vm_name);
        println!("  {:<14} {}", "Project:", run.project);
        if let Some(unit) = &run.unit_name {
            println!("  {:<14} {unit}", "Unit:");
        }
        if let Some(address) = &run.address {
            println!("  {:<14} {address}", "Address:");
        }
        if let Some(network) = &run.network {
            println!("  {:<14} {}", "Network:", network.resource_group);
        }
        if let Some(until) = run.active_until {
            println!("  {:<14} {}", "Active until:", until.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        if let Some(failure) = &run.error {
            println!(
                "  {:<14} {} after {} attempt(s): {}",
                "Error:".style(self.ctx.styles.error),
                failure.phase,
                failure.attempts,
                failure.message
            );
        }
        println!();
    }

    pub fn render_runs(&self, runs: &[WorkflowRun]) {
        if runs.is_empty() {
            if !self.ctx.quiet {
                println!("No workflow runs recorded. Start one: vmgr vm create <name>");
            }
            return;
        }
        for run in runs {
            println!(
                "  {:<22} {:<18} {:<16} {}",
                run.id,
                self.phase_label(run.phase),
                run.vm_name,
                run.created_at.format("%Y-%m-%d %H:%M")
            );
        }
    }

    pub fn render_units(&self, project: &str, units: &[UnitSummary], now: DateTime<Utc>) {
        if units.is_empty() {
            if !self.ctx.quiet {
                println!("No units in project {project}.");
            }
            return;
        }
        self.ctx.header(&format!("Units in {project}:"));
        for unit in units {
            println!(
                "  {:<28} {}",
                unit.name,
                format_age(unit.last_update, now).style(self.ctx.styles.dim)
            );
        }
    }
}
