//! Version command

use anyhow::Result;

use crate::output::Renderer;

/// Run the version command.
///
/// # Errors
///
/// JSON serialization failures only.
pub fn run(renderer: &Renderer<'_>) -> Result<()> {
    renderer.render_version(env!("CARGO_PKG_VERSION"))
}
