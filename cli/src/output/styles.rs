//! owo-colors stylesheet shared by every terminal renderer.

use owo_colors::Style;
use vmgr_common::WorkflowPhase;

/// Colors for terminal output. `Default` is the plain (no color) sheet.
#[derive(Default, Clone)]
pub struct Styles {
    pub success: Style,
    pub warning: Style,
    pub error: Style,
    pub info: Style,
    /// Keys in key/value rows and secondary text.
    pub dim: Style,
    pub header: Style,
    /// Workflow phases still in progress.
    pub phase_active: Style,
    pub phase_done: Style,
}

impl Styles {
    /// Switch every slot to its colored variant.
    pub fn colorize(&mut self) {
        *self = Self {
            success: Style::new().green(),
            warning: Style::new().yellow(),
            error: Style::new().red(),
            info: Style::new().blue(),
            dim: Style::new().dimmed(),
            header: Style::new().bold().cyan(),
            phase_active: Style::new().cyan(),
            phase_done: Style::new().green().dimmed(),
        };
    }

    /// Style of a workflow phase label: failures red, finished runs dimmed.
    #[must_use]
    pub fn phase(&self, phase: WorkflowPhase) -> Style {
        match phase {
            WorkflowPhase::Done => self.phase_done,
            WorkflowPhase::Failed => self.error,
            _ => self.phase_active,
        }
    }
}
