//! `vmgr vm`: provisioning workflow runs.

use std::future::Future;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Subcommand};
use vmgr_common::{RunMode, WorkflowRun};

use crate::app::AppContext;
use crate::application::services::workflow::TtlControl;
use crate::commands::ctrl_c;
use crate::domain::duration::parse_duration;

/// VM subcommands.
#[derive(Subcommand)]
pub enum VmCommand {
    /// Provision a VM, keep it for its TTL, then tear it down
    Create(CreateArgs),
    /// Provision a VM and leave it running for the reaper
    Add {
        /// VM name (random eight digits when omitted)
        name: Option<String>,
    },
    /// Show one workflow run
    Status {
        run_id: String,
    },
    /// List recorded workflow runs, newest first
    List,
    /// Continue a run from its last recorded phase
    Resume {
        run_id: String,
    },
}

/// Arguments for `vmgr vm create`.
#[derive(Args)]
pub struct CreateArgs {
    /// VM name; the unit is called `vmgr<name>`
    pub name: String,

    /// How long the VM stays up (e.g. 90s, 5m, 1h)
    #[arg(long, value_name = "DURATION")]
    pub ttl: Option<String>,

    /// Record the run without executing it; start it with `vmgr vm resume`
    #[arg(long)]
    pub detach: bool,
}

/// Run the vm command.
///
/// # Errors
///
/// Returns an error if a workflow step exhausts its retries, the run is
/// unknown or finished, or the run log cannot be read or written.
pub async fn run(app: &AppContext, cmd: VmCommand) -> Result<ExitCode> {
    match cmd {
        VmCommand::Create(args) => create(app, &args).await,
        VmCommand::Add { name } => add(app, name.as_deref()).await,
        VmCommand::Status { run_id } => {
            let run = app.workflow()?.status(&run_id).await?;
            app.renderer().render_run(&run)?;
            Ok(ExitCode::SUCCESS)
        }
        VmCommand::List => {
            let runs = app.workflow()?.list().await?;
            app.renderer().render_runs(&runs)?;
            Ok(ExitCode::SUCCESS)
        }
        VmCommand::Resume { run_id } => resume(app, &run_id).await,
    }
}

async fn create(app: &AppContext, args: &CreateArgs) -> Result<ExitCode> {
    let ttl = match &args.ttl {
        Some(value) => parse_duration(value)?,
        None => app.config.ttl()?,
    };
    let runner = app.workflow()?;

    if args.detach {
        let run = runner.submit(&args.name, RunMode::Ephemeral, ttl).await?;
        app.renderer().render_run(&run)?;
        app.output
            .info(&format!("Start it with: vmgr vm resume {}", run.id));
        return Ok(ExitCode::SUCCESS);
    }

    let (control, mut watch) = TtlControl::channel();
    let reporter = app.reporter();
    let run = until_interrupted(
        app,
        &control,
        runner.run(&args.name, RunMode::Ephemeral, ttl, &mut watch, &reporter),
    )
    .await?;
    app.renderer().render_run(&run)?;
    Ok(ExitCode::SUCCESS)
}

async fn add(app: &AppContext, name: Option<&str>) -> Result<ExitCode> {
    let run = app
        .workflow()?
        .provision_only(name, &app.reporter())
        .await?;
    app.renderer().render_run(&run)?;
    if let Some(unit) = &run.unit_name {
        app.output
            .info(&format!("{unit} is left running; `vmgr reap` removes it once expired"));
    }
    Ok(ExitCode::SUCCESS)
}

async fn resume(app: &AppContext, run_id: &str) -> Result<ExitCode> {
    let runner = app.workflow()?;
    let (control, mut watch) = TtlControl::channel();
    let reporter = app.reporter();
    let run = until_interrupted(app, &control, runner.resume(run_id, &mut watch, &reporter))
        .await?;
    app.renderer().render_run(&run)?;
    Ok(ExitCode::SUCCESS)
}

/// Drive `run`. The first Ctrl-C ends the TTL early so the VM is torn down;
/// a second one abandons the run where it stands.
async fn until_interrupted(
    app: &AppContext,
    control: &TtlControl,
    run: impl Future<Output = Result<WorkflowRun>>,
) -> Result<WorkflowRun> {
    tokio::pin!(run);
    tokio::select! {
        result = &mut run => return result,
        () = ctrl_c() => {
            app.output.warn("Interrupted: tearing the VM down now (Ctrl-C again to abandon)");
            control.expire_now();
        }
    }
    tokio::select! {
        result = &mut run => result,
        () = ctrl_c() => {
            anyhow::bail!("interrupted; continue the run later with `vmgr vm resume` (see `vmgr vm list`)")
        }
    }
}
