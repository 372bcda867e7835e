//! Provisioning and teardown operations.
//!
//! Each operation is one transaction against the backend and the
//! orchestrator: it either fully succeeds or compensates so that no new
//! orphaned resource survives. Shared lifecycle steps (launch, wait, verify)
//! are plain functions composed by each variant.

use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::environment::{Environment, EnvironmentError};
use crate::probe::{ProbeError, Readiness, ReadinessProber};
use crate::provider::{LaunchRequest, Provider, ProviderError, Server};

/// Errors raised while running an operation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OpError {
    /// Raised when a provider call fails.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Raised when readiness probing fails or times out.
    #[error(transparent)]
    Probe(#[from] ProbeError),
    /// Raised when a server could not be registered; the server has already
    /// been terminated by the compensating step.
    #[error("failed to register server {server_id}: {source}")]
    Register {
        /// Provider identifier of the terminated server.
        server_id: String,
        /// Registration error from the orchestrator.
        #[source]
        source: EnvironmentError,
    },
    /// Raised when an orchestrator call fails.
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
    /// Raised when a destroy operation lacks a required identifier.
    #[error("destroy operation missing {field}")]
    MissingParam {
        /// Name of the absent field.
        field: &'static str,
    },
}

/// Successful result of one operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OpOutcome {
    /// A server was launched and verified reachable.
    Added(Server),
    /// A server was launched, verified, and registered as a machine.
    Registered {
        /// The provisioned server.
        server: Server,
        /// Machine id assigned by the orchestrator.
        machine_id: String,
    },
    /// A machine and/or its server were destroyed.
    Destroyed {
        /// Machine removed from the registry, when requested.
        machine_id: Option<String>,
        /// Server terminated at the backend, when requested.
        server_id: Option<String>,
    },
}

/// One queued unit of provisioning or teardown work.
///
/// Running an operation consumes it; an operation executes exactly once.
pub enum Operation {
    /// Launch a server and wait until it is running and reachable.
    Add(AddMachine),
    /// Launch a server and register it as a machine.
    Register(RegisterMachine),
    /// Remove a machine from the registry and/or terminate its server.
    Destroy(DestroyMachine),
}

impl Operation {
    /// Runs the operation to completion.
    ///
    /// # Errors
    ///
    /// Returns [`OpError`] when any step fails after compensation has run.
    pub async fn run(self) -> Result<OpOutcome, OpError> {
        match self {
            Self::Add(op) => op.run().await.map(OpOutcome::Added),
            Self::Register(op) => op.run().await.map(|(server, machine_id)| {
                OpOutcome::Registered { server, machine_id }
            }),
            Self::Destroy(op) => op.run().await,
        }
    }

    /// Short description used when reporting failures.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Add(op) => format!("add {}", op.request.name),
            Self::Register(op) => format!("register {}", op.request.name),
            Self::Destroy(op) => format!(
                "destroy machine={} server={}",
                op.machine_id.as_deref().unwrap_or("-"),
                op.server_id.as_deref().unwrap_or("-")
            ),
        }
    }

    /// Returns when the operation was created.
    #[must_use]
    pub const fn created_at(&self) -> SystemTime {
        match self {
            Self::Add(op) => op.created,
            Self::Register(op) => op.created,
            Self::Destroy(op) => op.created,
        }
    }
}

/// Launches a server and drives it to a running, reachable state.
async fn launch_and_verify(
    provider: &dyn Provider,
    prober: &ReadinessProber,
    request: &LaunchRequest,
) -> Result<Server, OpError> {
    let server = provider.launch_server(request).await?;
    debug!(server_id = %server.id, name = %server.name, "launched server");

    match prober.wait_for_running(provider, &server.id).await? {
        Readiness::Ready => {}
        Readiness::NotReady => {
            return Err(OpError::Probe(ProbeError::ProvisioningTimeout {
                server_id: server.id,
                name: server.name,
            }));
        }
    }

    let refreshed = provider.get_server(&server.id).await?;
    prober.verify_reachable(&refreshed).await?;
    Ok(refreshed)
}

/// Operation that provisions one server.
pub struct AddMachine {
    provider: Arc<dyn Provider>,
    prober: ReadinessProber,
    request: LaunchRequest,
    created: SystemTime,
}

impl AddMachine {
    /// Creates an add operation.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>, prober: ReadinessProber, request: LaunchRequest) -> Self {
        Self {
            provider,
            prober,
            request,
            created: SystemTime::now(),
        }
    }

    /// Launches the server and waits until it is running and reachable.
    ///
    /// # Errors
    ///
    /// Returns [`OpError`] when launching, polling, or the reachability probe
    /// fails.
    pub async fn run(&self) -> Result<Server, OpError> {
        launch_and_verify(self.provider.as_ref(), &self.prober, &self.request).await
    }
}

/// Operation that provisions one server and registers it as a machine.
pub struct RegisterMachine {
    provider: Arc<dyn Provider>,
    environment: Arc<dyn Environment>,
    prober: ReadinessProber,
    request: LaunchRequest,
    registration_key: Option<String>,
    created: SystemTime,
}

impl RegisterMachine {
    /// Creates a register operation.
    #[must_use]
    pub fn new(
        provider: Arc<dyn Provider>,
        environment: Arc<dyn Environment>,
        prober: ReadinessProber,
        request: LaunchRequest,
        registration_key: Option<String>,
    ) -> Self {
        Self {
            provider,
            environment,
            prober,
            request,
            registration_key,
            created: SystemTime::now(),
        }
    }

    /// Provisions the server and binds it into the machine registry. When
    /// registration fails, the server is terminated before the registration
    /// error propagates.
    ///
    /// # Errors
    ///
    /// Returns [`OpError`] when provisioning or registration fails.
    pub async fn run(&self) -> Result<(Server, String), OpError> {
        let server =
            launch_and_verify(self.provider.as_ref(), &self.prober, &self.request).await?;

        let Some(address) = server.public_address.clone() else {
            self.compensate(&server).await;
            return Err(OpError::Probe(ProbeError::MissingAddress {
                server_id: server.id,
            }));
        };

        let target = format!("ssh:{}@{address}", self.prober.ssh_user());
        match self
            .environment
            .add_machine(&target, self.registration_key.as_deref())
        {
            Ok(machine_id) => {
                info!(
                    server_id = %server.id,
                    name = %server.name,
                    address = %address,
                    machine_id = %machine_id,
                    "registered server as machine"
                );
                Ok((server, machine_id))
            }
            Err(err) => {
                warn!(
                    server_id = %server.id,
                    error = %err,
                    "registration failed, terminating server"
                );
                self.compensate(&server).await;
                Err(OpError::Register {
                    server_id: server.id.clone(),
                    source: err,
                })
            }
        }
    }

    /// Best-effort termination; failures are logged so they never mask the
    /// registration error.
    async fn compensate(&self, server: &Server) {
        if let Err(teardown) = self.provider.terminate_server(&server.id).await {
            warn!(
                server_id = %server.id,
                error = %teardown,
                "compensating termination failed"
            );
        }
    }
}

/// Operation that removes a machine from the registry and terminates its
/// server.
pub struct DestroyMachine {
    provider: Arc<dyn Provider>,
    environment: Arc<dyn Environment>,
    machine_id: Option<String>,
    server_id: Option<String>,
    env_only: bool,
    iaas_only: bool,
    created: SystemTime,
}

impl DestroyMachine {
    /// Creates a destroy operation over a machine id, a server id, or both.
    #[must_use]
    pub fn new(
        provider: Arc<dyn Provider>,
        environment: Arc<dyn Environment>,
        machine_id: Option<String>,
        server_id: Option<String>,
    ) -> Self {
        Self {
            provider,
            environment,
            machine_id,
            server_id,
            env_only: false,
            iaas_only: false,
            created: SystemTime::now(),
        }
    }

    /// Restricts the operation to registry removal; the backend server is
    /// left alone.
    #[must_use]
    pub const fn env_only(mut self) -> Self {
        self.env_only = true;
        self
    }

    /// Restricts the operation to backend termination; the registry is left
    /// alone.
    #[must_use]
    pub const fn iaas_only(mut self) -> Self {
        self.iaas_only = true;
        self
    }

    /// Runs the removal steps. When both steps are requested, registry
    /// removal happens before backend termination: a registry entry pointing
    /// at a terminated server is worse than a transiently stale backend
    /// resource.
    ///
    /// # Errors
    ///
    /// Returns [`OpError`] when a requested step lacks its identifier or a
    /// collaborator rejects it.
    pub async fn run(&self) -> Result<OpOutcome, OpError> {
        let mut removed_machine = None;
        if !self.iaas_only {
            let machine_id = self
                .machine_id
                .as_deref()
                .ok_or(OpError::MissingParam {
                    field: "machine_id",
                })?;
            self.environment
                .terminate_machines(&[machine_id.to_owned()])?;
            removed_machine = Some(machine_id.to_owned());
        }

        if self.env_only {
            return Ok(OpOutcome::Destroyed {
                machine_id: removed_machine,
                server_id: None,
            });
        }

        let server_id = self.server_id.as_deref().ok_or(OpError::MissingParam {
            field: "server_id",
        })?;
        debug!(server_id, "destroying server");
        self.provider.terminate_server(server_id).await?;

        Ok(OpOutcome::Destroyed {
            machine_id: removed_machine,
            server_id: Some(server_id.to_owned()),
        })
    }
}

#[cfg(test)]
mod tests;
