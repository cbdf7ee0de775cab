//! CLI argument parsing with clap derive

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::app::{AppContext, AppFlags, BehaviourFlags, EngineFlags, EngineKind, OutputFlags};
use crate::commands;
use crate::output::{HumanRenderer, JsonRenderer, OutputContext, Renderer};

/// Ephemeral infrastructure lifecycle orchestrator
#[derive(Parser)]
#[command(
    name = "vmgr",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output (any non-empty `NO_COLOR` other than `0`/`false` counts)
    #[arg(
        long,
        global = true,
        env = "NO_COLOR",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub no_color: bool,

    /// Skip confirmation prompts
    #[arg(short, long, global = true)]
    pub yes: bool,

    /// Deployment engine backing this run
    #[arg(long, global = true, value_enum, env = "VMGR_ENGINE", default_value_t = EngineKind::StackCli)]
    pub engine: EngineKind,

    /// Project for VM and reaper units (overrides the config file)
    #[arg(long, global = true, env = "VMGR_PROJECT")]
    pub project: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy or destroy the static site chain
    #[command(subcommand)]
    Site(commands::site::SiteCommand),

    /// Destroy units that have not been updated recently
    #[command(alias = "cron")]
    Reap(commands::reap::ReapArgs),

    /// Provision VMs through the durable workflow
    #[command(subcommand)]
    Vm(commands::vm::VmCommand),

    /// List the project's units and how long ago each was updated
    Units,

    /// Show version
    Version,
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the context cannot be built or the command fails.
    pub async fn run(self) -> Result<ExitCode> {
        let Cli {
            json,
            quiet,
            no_color,
            yes,
            engine,
            project,
            command,
        } = self;

        if let Command::Version = command {
            let ctx = OutputContext::new(no_color, quiet);
            let renderer = if json {
                Renderer::Json(JsonRenderer)
            } else {
                Renderer::Human(HumanRenderer::new(&ctx))
            };
            commands::version::run(&renderer)?;
            return Ok(ExitCode::SUCCESS);
        }

        let app = AppContext::new(&AppFlags {
            output: OutputFlags {
                no_color,
                quiet,
                json,
            },
            behaviour: BehaviourFlags { yes },
            engine: EngineFlags {
                kind: engine,
                project,
            },
        })?;

        match command {
            Command::Site(cmd) => commands::site::run(&app, cmd).await,
            Command::Reap(args) => commands::reap::run(&app, &args).await,
            Command::Vm(cmd) => commands::vm::run(&app, cmd).await,
            Command::Units => commands::units::run(&app).await,
            Command::Version => Ok(ExitCode::SUCCESS),
        }
    }
}
