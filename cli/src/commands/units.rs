//! `vmgr units`: list catalog rows with their age.

use std::process::ExitCode;

use anyhow::Result;
use chrono::Utc;

use crate::app::AppContext;
use crate::output::progress;

/// # Errors
///
/// Returns an error if the catalog cannot be listed.
pub async fn run(app: &AppContext) -> Result<ExitCode> {
    let registry = app.registry(&app.config.project)?;
    let spinner = app
        .output
        .show_progress()
        .then(|| progress::spinner("Listing units..."));
    let units = registry.list().await;
    if let Some(pb) = &spinner {
        progress::finish_clear(pb);
    }
    app.renderer()
        .render_units(registry.project(), &units?, Utc::now())?;
    Ok(ExitCode::SUCCESS)
}
