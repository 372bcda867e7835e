//! Core library for the Machinist provisioning tool.
//!
//! The crate mediates between a juju-style orchestrator's declarative view of
//! its machines and the asynchronous reality of the Scaleway backend: servers
//! are launched, polled until running, verified reachable over SSH, and
//! registered as machines, with compensating teardown whenever a step fails
//! mid-sequence. Bulk work runs on a small bounded worker pool.

pub mod commands;
pub mod config;
pub mod environment;
pub mod exec;
pub mod ops;
pub mod probe;
pub mod provider;
pub mod runner;
pub mod scaleway;
#[cfg(test)]
pub(crate) mod test_doubles;

pub use commands::{
    AddMachines, Bootstrap, CommandContext, CommandError, DestroyEnvironment, ListMachines,
    TerminateMachines,
};
pub use config::{ConfigError, EnvironmentDecl, EnvironmentsFile, ScalewayConfig};
pub use environment::{
    CliEnvironment, Environment, EnvironmentError, EnvironmentStatus, MachineRecord,
};
pub use exec::{CommandOutput, CommandRunner, ExecError, ProcessCommandRunner};
pub use ops::{AddMachine, DestroyMachine, OpError, OpOutcome, Operation, RegisterMachine};
pub use probe::{
    ProbeError, Readiness, ReadinessProber, RetryableFailure, classify_ssh_failure,
};
pub use provider::{
    LaunchRequest, LaunchRequestBuilder, Provider, ProviderError, ProviderFuture, Server,
};
pub use runner::{DEFAULT_PARALLELISM, Runner};
pub use scaleway::ScalewayProvider;
