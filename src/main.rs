//! Binary entry point for the `machinist` CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;

use machinist::{
    AddMachines, Bootstrap, CommandContext, CommandError, ConfigError, DestroyEnvironment,
    ListMachines, ProcessCommandRunner, ReadinessProber, ScalewayConfig, ScalewayProvider,
    TerminateMachines,
};
use machinist::environment::CliEnvironment;

mod cli;

use cli::{Cli, CommonArgs};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Bootstrap(command) => {
            let ctx = build_context(&command.common)?;
            Bootstrap::new(ctx).run().await?;
        }
        Cli::AddMachine(command) => {
            let ctx = build_context(&command.common)?;
            AddMachines::new(ctx, command.count, command.key.clone())
                .run()
                .await?;
        }
        Cli::TerminateMachine(command) => {
            let ctx = build_context(&command.common)?;
            TerminateMachines::new(ctx, command.machines.clone())
                .run()
                .await?;
        }
        Cli::DestroyEnvironment(command) => {
            let ctx = build_context(&command.common)?;
            DestroyEnvironment::new(ctx, command.force).run().await?;
        }
        Cli::ListMachines(command) => {
            let ctx = build_context(&command.common)?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            ListMachines::new(ctx, command.all).run(&mut out).await?;
            out.flush()?;
        }
    }
    Ok(())
}

fn build_context(common: &CommonArgs) -> Result<CommandContext, CliError> {
    let config = ScalewayConfig::load_without_cli_args()?;
    let provider = ScalewayProvider::new(config)?;
    let environment = CliEnvironment::with_process_runner(
        common.orchestrator_bin.clone(),
        common.environment.clone(),
        common.environments_file.clone(),
    );
    let prober =
        ReadinessProber::new(Arc::new(ProcessCommandRunner)).with_ssh_user(&common.ssh_user);

    Ok(CommandContext::new(
        common.environment.clone(),
        common.series.clone(),
        common.environments_file.clone(),
        Arc::new(provider),
        Arc::new(environment),
        prober,
    ))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
