//! `vmgr site up|destroy`: deploy or tear down the static site chain.

use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::app::AppContext;
use crate::application::services::stack_chain::{self, DestroyOptions};
use crate::domain::graph::{SITE_CONTAINER_UNIT, UnitGraph};
use crate::domain::outputs::SiteOutputs;

/// Site subcommands.
#[derive(Subcommand)]
pub enum SiteCommand {
    /// Deploy the site units, upstream first, and print the site URL
    Up,
    /// Destroy the site units, downstream first
    Destroy(DestroyArgs),
}

/// Arguments for `vmgr site destroy`.
#[derive(Args)]
pub struct DestroyArgs {
    /// Also remove the destroyed units from the catalog
    #[arg(long)]
    pub remove: bool,
}

fn graph(app: &AppContext) -> UnitGraph {
    UnitGraph::static_site(&app.config.site.project, &app.config.site.region)
}

/// Run the site command.
///
/// # Errors
///
/// Returns an error naming the failing unit and step.
pub async fn run(app: &AppContext, cmd: SiteCommand) -> Result<ExitCode> {
    match cmd {
        SiteCommand::Up => up(app).await,
        SiteCommand::Destroy(args) => destroy(app, &args).await,
    }
}

async fn up(app: &AppContext) -> Result<ExitCode> {
    let graph = graph(app);
    let registry = app.registry(&graph.project)?;
    let outcome = stack_chain::deploy(&registry, &graph, &app.reporter()).await?;
    let site: SiteOutputs = outcome.typed(SITE_CONTAINER_UNIT)?;
    app.renderer()
        .render_site_up(&graph.project, &outcome, &site)?;
    Ok(ExitCode::SUCCESS)
}

async fn destroy(app: &AppContext, args: &DestroyArgs) -> Result<ExitCode> {
    let graph = graph(app);
    let prompt = if args.remove {
        format!("Destroy and remove every unit of {}?", graph.project)
    } else {
        format!("Destroy every unit of {}?", graph.project)
    };
    if !app.non_interactive && !app.confirm(&prompt, false)? {
        app.output.info("Cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let registry = app.registry(&graph.project)?;
    let outcome = stack_chain::destroy(
        &registry,
        &graph,
        DestroyOptions {
            remove: args.remove,
        },
        &app.reporter(),
    )
    .await?;
    app.renderer()
        .render_site_destroyed(&graph.project, &outcome, args.remove)?;
    Ok(ExitCode::SUCCESS)
}
