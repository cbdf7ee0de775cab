//! Output formatting module

pub mod human;
pub mod json;
pub mod progress;
pub mod reporter;
pub mod styles;

use anyhow::Result;
use chrono::{DateTime, Utc};
use console::Term;
use owo_colors::OwoColorize as _;
use vmgr_common::{UnitSummary, WorkflowRun};

pub use human::HumanRenderer;
pub use json::JsonRenderer;
pub use reporter::TerminalReporter;
pub use styles::Styles;

use crate::application::services::stack_chain::ChainOutcome;
use crate::domain::outputs::SiteOutputs;
use crate::domain::reap::SweepReport;

/// Output context carrying styling and terminal state.
pub struct OutputContext {
    /// Stylesheet for colored output.
    pub styles: Styles,
    /// Whether stdout is a TTY.
    pub is_tty: bool,
    /// Whether to suppress non-error output.
    pub quiet: bool,
}

impl OutputContext {
    /// Create output context based on CLI flags and environment.
    #[must_use]
    pub fn new(no_color: bool, quiet: bool) -> Self {
        let is_tty = Term::stdout().is_term();
        let use_colors = !no_color && is_tty && std::env::var("NO_COLOR").is_err();

        let mut styles = Styles::default();
        if use_colors {
            styles.colorize();
        }

        Self {
            styles,
            is_tty,
            quiet,
        }
    }

    /// Check if progress indicators should be shown.
    #[must_use]
    pub fn show_progress(&self) -> bool {
        self.is_tty && !self.quiet
    }

    /// Print a success message prefixed with `✓`. Suppressed when `quiet`.
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {msg}", "✓".style(self.styles.success));
        }
    }

    /// Print a warning message prefixed with `⚠`. Suppressed when `quiet`.
    pub fn warn(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {msg}", "⚠".style(self.styles.warning));
        }
    }

    /// Print an error message prefixed with `✗` to stderr. Never suppressed.
    pub fn error(&self, msg: &str) {
        eprintln!("  {} {msg}", "✗".style(self.styles.error));
    }

    /// Print an info message prefixed with `ℹ`. Suppressed when `quiet`.
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {msg}", "ℹ".style(self.styles.info));
        }
    }

    /// Print a section header. Suppressed when `quiet`.
    pub fn header(&self, msg: &str) {
        if !self.quiet {
            println!("  {}", msg.style(self.styles.header));
        }
    }

    /// Print a key-value pair with the key dimmed. Suppressed when `quiet`.
    pub fn kv(&self, key: &str, value: &str) {
        if !self.quiet {
            println!("  {}  {value}", key.style(self.styles.dim));
        }
    }
}

/// Human or JSON rendering, chosen once per process from `--json`.
pub enum Renderer<'a> {
    Human(HumanRenderer<'a>),
    Json(JsonRenderer),
}

impl Renderer<'_> {
    /// # Errors
    ///
    /// JSON serialization failures only.
    pub fn render_version(&self, version: &str) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_version(version);
                Ok(())
            }
            Self::Json(_) => JsonRenderer::render_version(version),
        }
    }

    /// # Errors
    ///
    /// JSON serialization failures only.
    pub fn render_site_up(
        &self,
        project: &str,
        outcome: &ChainOutcome,
        site: &SiteOutputs,
    ) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_site_up(outcome, site);
                Ok(())
            }
            Self::Json(_) => JsonRenderer::render_chain("up", project, outcome),
        }
    }

    /// # Errors
    ///
    /// JSON serialization failures only.
    pub fn render_site_destroyed(
        &self,
        project: &str,
        outcome: &ChainOutcome,
        removed: bool,
    ) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_site_destroyed(outcome, removed);
                Ok(())
            }
            Self::Json(_) => {
                let action = if removed { "destroy+remove" } else { "destroy" };
                JsonRenderer::render_chain(action, project, outcome)
            }
        }
    }

    /// # Errors
    ///
    /// JSON serialization failures only.
    pub fn render_sweep(&self, project: &str, report: &SweepReport) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_sweep(report);
                Ok(())
            }
            Self::Json(_) => JsonRenderer::render_sweep(project, report),
        }
    }

    /// # Errors
    ///
    /// JSON serialization failures only.
    pub fn render_run(&self, run: &WorkflowRun) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_run(run);
                Ok(())
            }
            Self::Json(_) => JsonRenderer::render_run(run),
        }
    }

    /// # Errors
    ///
    /// JSON serialization failures only.
    pub fn render_runs(&self, runs: &[WorkflowRun]) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_runs(runs);
                Ok(())
            }
            Self::Json(_) => JsonRenderer::render_runs(runs),
        }
    }

    /// # Errors
    ///
    /// JSON serialization failures only.
    pub fn render_units(
        &self,
        project: &str,
        units: &[UnitSummary],
        now: DateTime<Utc>,
    ) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_units(project, units, now);
                Ok(())
            }
            Self::Json(_) => JsonRenderer::render_units(project, units, now),
        }
    }
}
