//! Command-line interface definitions for the `machinist` binary.

use camino::Utf8PathBuf;
use clap::Parser;

/// Top-level CLI for the `machinist` binary.
#[derive(Debug, Parser)]
#[command(
    name = "machinist",
    about = "Provision Scaleway servers as machines for a juju-style environment",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Provision the first machine and bootstrap the environment on it.
    #[command(name = "bootstrap")]
    Bootstrap(BootstrapCommand),
    /// Provision and register new machines.
    #[command(name = "add-machine")]
    AddMachine(AddMachineCommand),
    /// Terminate machines and their servers.
    #[command(name = "terminate-machine")]
    TerminateMachine(TerminateMachineCommand),
    /// Destroy the environment and every machine in it.
    #[command(name = "destroy-environment")]
    DestroyEnvironment(DestroyEnvironmentCommand),
    /// List the environment's servers.
    #[command(name = "list-machines")]
    ListMachines(ListMachinesCommand),
}

/// Flags shared by every subcommand.
#[derive(Debug, Parser)]
pub(crate) struct CommonArgs {
    /// Name of the target environment.
    #[arg(short = 'e', long, env = "MACHINIST_ENV", value_name = "NAME")]
    pub(crate) environment: String,
    /// OS series used to choose the boot image.
    #[arg(long, default_value = "noble", value_name = "SERIES")]
    pub(crate) series: String,
    /// Path to the orchestrator's environments file.
    #[arg(
        long,
        env = "MACHINIST_ENVIRONMENTS",
        default_value = "environments.yaml",
        value_name = "PATH"
    )]
    pub(crate) environments_file: Utf8PathBuf,
    /// Orchestrator CLI binary driven for registry operations.
    #[arg(long, default_value = "juju", value_name = "BIN")]
    pub(crate) orchestrator_bin: String,
    /// User for SSH reachability checks and registration targets.
    #[arg(long, default_value = "root", value_name = "USER")]
    pub(crate) ssh_user: String,
}

/// Arguments for the `bootstrap` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct BootstrapCommand {
    #[command(flatten)]
    pub(crate) common: CommonArgs,
}

/// Arguments for the `add-machine` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct AddMachineCommand {
    #[command(flatten)]
    pub(crate) common: CommonArgs,
    /// Number of machines to provision.
    #[arg(short = 'n', long, default_value_t = 1, value_name = "COUNT")]
    pub(crate) count: usize,
    /// Registration key passed through to the orchestrator.
    #[arg(long, value_name = "KEY")]
    pub(crate) key: Option<String>,
}

/// Arguments for the `terminate-machine` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct TerminateMachineCommand {
    #[command(flatten)]
    pub(crate) common: CommonArgs,
    /// Machine ids to terminate.
    #[arg(required = true, value_name = "MACHINE_ID")]
    pub(crate) machines: Vec<String>,
}

/// Arguments for the `destroy-environment` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DestroyEnvironmentCommand {
    #[command(flatten)]
    pub(crate) common: CommonArgs,
    /// Bypass the machine registry and match live servers by name prefix.
    #[arg(long)]
    pub(crate) force: bool,
}

/// Arguments for the `list-machines` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ListMachinesCommand {
    #[command(flatten)]
    pub(crate) common: CommonArgs,
    /// Include servers outside the environment's name prefix.
    #[arg(long)]
    pub(crate) all: bool,
}
