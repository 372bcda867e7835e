//! Orchestrator environment handle.
//!
//! The orchestrator owns the machine registry. This module exposes the small
//! surface the provisioning core consumes and a [`CliEnvironment`]
//! implementation that drives the orchestrator's own CLI, parsing its JSON
//! status output.

use std::collections::BTreeMap;
use std::ffi::OsString;

use camino::Utf8PathBuf;
use serde::Deserialize;
use thiserror::Error;

use crate::exec::{CommandOutput, CommandRunner, ExecError, ProcessCommandRunner};

/// Orchestrator-side record for one logical machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MachineRecord {
    /// Network address the orchestrator reaches the machine at, once known.
    pub address: Option<String>,
    /// Backend instance identifier, when the orchestrator recorded one.
    pub instance_id: Option<String>,
}

/// Snapshot of the orchestrator's machine registry.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EnvironmentStatus {
    /// Machine records keyed by logical machine id.
    pub machines: BTreeMap<String, MachineRecord>,
}

/// Errors raised by the environment handle.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum EnvironmentError {
    /// Raised when the orchestrator CLI exits with a non-zero status.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Program that failed.
        program: String,
        /// Exit status reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// Raised when CLI output cannot be parsed.
    #[error("failed to parse {what}: {message}")]
    Parse {
        /// Output being parsed (for example `status`).
        what: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when the environments file cannot be updated.
    #[error("cannot update {path}: {message}")]
    Record {
        /// Path that could not be updated.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
    /// Raised when command execution fails.
    #[error(transparent)]
    Runner(#[from] ExecError),
}

/// Interface to the orchestrator consumed by operations and commands.
///
/// Implementations must tolerate concurrent invocation from worker tasks.
pub trait Environment: Send + Sync {
    /// Fetches the current machine registry.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError`] when the orchestrator cannot be queried.
    fn status(&self) -> Result<EnvironmentStatus, EnvironmentError>;

    /// Registers a provisioned server as a machine and returns the new
    /// machine id.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError`] when registration fails.
    fn add_machine(&self, target: &str, key: Option<&str>) -> Result<String, EnvironmentError>;

    /// Removes machines from the registry.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError`] when the orchestrator rejects the removal.
    fn terminate_machines(&self, machine_ids: &[String]) -> Result<(), EnvironmentError>;

    /// Records `address` as the bootstrap host and bootstraps the
    /// environment on it.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError`] when the record cannot be persisted or
    /// bootstrap fails.
    fn bootstrap(&self, address: &str) -> Result<(), EnvironmentError>;

    /// Destroys the environment's control-plane state.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError`] when the orchestrator rejects the
    /// destruction.
    fn destroy_environment(&self) -> Result<(), EnvironmentError>;

    /// Reports whether the environment is already bootstrapped and running.
    fn is_running(&self) -> bool;
}

#[derive(Clone, Debug, Deserialize)]
struct MachinePayload {
    #[serde(rename = "dns-name", default)]
    dns_name: Option<String>,
    #[serde(rename = "instance-id", default)]
    instance_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct StatusPayload {
    #[serde(default)]
    machines: BTreeMap<String, MachinePayload>,
}

/// Environment handle that shells out to the orchestrator CLI.
#[derive(Clone, Debug)]
pub struct CliEnvironment<R: CommandRunner> {
    bin: String,
    name: String,
    environments_file: Utf8PathBuf,
    runner: R,
}

impl CliEnvironment<ProcessCommandRunner> {
    /// Creates an environment handle wired to the real process runner.
    #[must_use]
    pub fn with_process_runner(
        bin: impl Into<String>,
        name: impl Into<String>,
        environments_file: Utf8PathBuf,
    ) -> Self {
        Self::new(bin, name, environments_file, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> CliEnvironment<R> {
    /// Creates an environment handle using the provided runner.
    #[must_use]
    pub fn new(
        bin: impl Into<String>,
        name: impl Into<String>,
        environments_file: Utf8PathBuf,
        runner: R,
    ) -> Self {
        Self {
            bin: bin.into(),
            name: name.into(),
            environments_file,
            runner,
        }
    }

    fn run_cli(&self, args: &[OsString]) -> Result<CommandOutput, EnvironmentError> {
        let output = self.runner.run(&self.bin, args)?;
        if output.is_success() {
            return Ok(output);
        }
        let status_text = output
            .code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        Err(EnvironmentError::CommandFailure {
            program: self.bin.clone(),
            status: output.code,
            status_text,
            stderr: output.stderr,
        })
    }

    fn scoped(&self, args: &[&str]) -> Vec<OsString> {
        let mut rendered: Vec<OsString> = args.iter().map(|arg| OsString::from(*arg)).collect();
        rendered.push(OsString::from("-e"));
        rendered.push(OsString::from(&self.name));
        rendered
    }

    /// Records the bootstrap host address in the environments file so the
    /// orchestrator can reach the new control plane.
    fn record_bootstrap_host(&self, address: &str) -> Result<(), EnvironmentError> {
        let record_err = |message: String| EnvironmentError::Record {
            path: self.environments_file.clone(),
            message,
        };

        let content = std::fs::read_to_string(&self.environments_file)
            .map_err(|err| record_err(err.to_string()))?;
        let mut document: serde_yaml::Value =
            serde_yaml::from_str(&content).map_err(|err| record_err(err.to_string()))?;

        let declaration = document
            .get_mut("environments")
            .and_then(|environments| environments.get_mut(self.name.as_str()))
            .and_then(serde_yaml::Value::as_mapping_mut)
            .ok_or_else(|| record_err(format!("environment '{}' not declared", self.name)))?;
        declaration.insert(
            serde_yaml::Value::from("bootstrap-host"),
            serde_yaml::Value::from(address),
        );

        let rendered =
            serde_yaml::to_string(&document).map_err(|err| record_err(err.to_string()))?;
        std::fs::write(&self.environments_file, rendered)
            .map_err(|err| record_err(err.to_string()))
    }
}

/// Extracts the machine id from `add-machine` output, which ends with the
/// newly created machine id.
fn parse_machine_id(output: &CommandOutput) -> Result<String, EnvironmentError> {
    let combined = output.combined();
    combined
        .split_whitespace()
        .last()
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| EnvironmentError::Parse {
            what: String::from("add-machine output"),
            message: format!("no machine id in {combined:?}"),
        })
}

impl<R: CommandRunner> Environment for CliEnvironment<R> {
    fn status(&self) -> Result<EnvironmentStatus, EnvironmentError> {
        let output = self.run_cli(&self.scoped(&["status", "--format", "json"]))?;
        let payload: StatusPayload =
            serde_json::from_str(&output.stdout).map_err(|err| EnvironmentError::Parse {
                what: String::from("status"),
                message: err.to_string(),
            })?;
        Ok(EnvironmentStatus {
            machines: payload
                .machines
                .into_iter()
                .map(|(id, machine)| {
                    (
                        id,
                        MachineRecord {
                            address: machine.dns_name,
                            instance_id: machine.instance_id,
                        },
                    )
                })
                .collect(),
        })
    }

    fn add_machine(&self, target: &str, key: Option<&str>) -> Result<String, EnvironmentError> {
        let mut args = self.scoped(&["add-machine", target]);
        if let Some(value) = key {
            args.push(OsString::from("--key"));
            args.push(OsString::from(value));
        }
        let output = self.run_cli(&args)?;
        parse_machine_id(&output)
    }

    fn terminate_machines(&self, machine_ids: &[String]) -> Result<(), EnvironmentError> {
        let mut args: Vec<OsString> = vec![OsString::from("destroy-machine"), OsString::from("--force")];
        args.extend(machine_ids.iter().map(|id| OsString::from(id.as_str())));
        args.push(OsString::from("-e"));
        args.push(OsString::from(&self.name));
        self.run_cli(&args).map(|_| ())
    }

    fn bootstrap(&self, address: &str) -> Result<(), EnvironmentError> {
        self.record_bootstrap_host(address)?;
        self.run_cli(&self.scoped(&["bootstrap"])).map(|_| ())
    }

    fn destroy_environment(&self) -> Result<(), EnvironmentError> {
        let args = vec![
            OsString::from("destroy-environment"),
            OsString::from("--yes"),
            OsString::from(&self.name),
        ];
        self.run_cli(&args).map(|_| ())
    }

    fn is_running(&self) -> bool {
        self.status().is_ok()
    }
}
