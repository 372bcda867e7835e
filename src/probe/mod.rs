//! Readiness probing: status polling and SSH reachability verification.
//!
//! Two distinct policies apply. The status wait is count-based: it gives the
//! backend a fixed number of polls to report `running`, however long each
//! poll takes on the wire. The reachability probe is wall-clock based: it
//! retries transient SSH failures until an absolute deadline, because the
//! interval between "running" and "sshd accepting connections" depends on
//! boot work the poll count cannot see.

use std::ffi::OsString;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error};

use crate::exec::{CommandRunner, ExecError};
use crate::provider::{Provider, ProviderError, Server};

/// Number of status polls before a server is declared not ready.
pub const DEFAULT_STATUS_ATTEMPTS: u32 = 30;
/// Delay between status polls.
pub const DEFAULT_STATUS_DELAY: Duration = Duration::from_secs(10);
/// Absolute budget for the reachability probe.
pub const DEFAULT_REACHABILITY_TIMEOUT: Duration = Duration::from_secs(360);
/// Delay between reachability attempts after a retryable failure.
pub const DEFAULT_REACHABILITY_DELAY: Duration = Duration::from_secs(8);

const SSH_PROGRAM: &str = "ssh";

/// Outcome of the status wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Readiness {
    /// The server reported the `running` state.
    Ready,
    /// The attempt ceiling was reached without observing `running`.
    NotReady,
}

/// Transient SSH failure categories that warrant a retry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryableFailure {
    /// The SSH port is not accepting connections yet.
    ConnectionRefused,
    /// The connection attempt timed out.
    ConnectionTimedOut,
    /// The server closed the connection during setup.
    ConnectionClosed,
    /// The connection was reset by the peer.
    ConnectionReset,
}

/// Classifies captured SSH diagnostic output into a retryable category.
///
/// Returns `None` for output that does not indicate a transient boot-time
/// condition; such failures must abort immediately rather than consume the
/// remaining retry budget.
#[must_use]
pub fn classify_ssh_failure(output: &str) -> Option<RetryableFailure> {
    const PATTERNS: &[(&str, RetryableFailure)] = &[
        ("Connection refused", RetryableFailure::ConnectionRefused),
        ("Connection timed out", RetryableFailure::ConnectionTimedOut),
        ("Connection closed", RetryableFailure::ConnectionClosed),
        ("Connection reset by peer", RetryableFailure::ConnectionReset),
    ];
    PATTERNS
        .iter()
        .find(|(needle, _)| output.contains(needle))
        .map(|(_, kind)| *kind)
}

/// Errors raised while probing a server.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProbeError {
    /// Raised when the server never became running and reachable within the
    /// policy window.
    #[error("could not provision server {server_id} ({name}) before timeout")]
    ProvisioningTimeout {
        /// Provider server identifier.
        server_id: String,
        /// Server name.
        name: String,
    },
    /// Raised when a server to be probed has no public address.
    #[error("server {server_id} has no public address to probe")]
    MissingAddress {
        /// Provider server identifier.
        server_id: String,
    },
    /// Raised on a non-retryable SSH failure.
    #[error("server {server_id} at {address} is not reachable over ssh: {output}")]
    Unreachable {
        /// Provider server identifier.
        server_id: String,
        /// Address that was probed.
        address: String,
        /// Captured diagnostic output.
        output: String,
    },
    /// Raised when a status poll fails at the provider.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Raised when the SSH client cannot be started.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Polls server status and verifies SSH reachability.
#[derive(Clone)]
pub struct ReadinessProber {
    exec: Arc<dyn CommandRunner>,
    ssh_user: String,
    status_attempts: u32,
    status_delay: Duration,
    reachability_timeout: Duration,
    reachability_delay: Duration,
}

impl ReadinessProber {
    /// Creates a prober with the default policy, probing as `root`.
    #[must_use]
    pub fn new(exec: Arc<dyn CommandRunner>) -> Self {
        Self {
            exec,
            ssh_user: String::from("root"),
            status_attempts: DEFAULT_STATUS_ATTEMPTS,
            status_delay: DEFAULT_STATUS_DELAY,
            reachability_timeout: DEFAULT_REACHABILITY_TIMEOUT,
            reachability_delay: DEFAULT_REACHABILITY_DELAY,
        }
    }

    /// Overrides the SSH user used for reachability checks.
    #[must_use]
    pub fn with_ssh_user(mut self, user: impl Into<String>) -> Self {
        self.ssh_user = user.into();
        self
    }

    /// Overrides the status wait policy.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_status_policy(mut self, attempts: u32, delay: Duration) -> Self {
        self.status_attempts = attempts;
        self.status_delay = delay;
        self
    }

    /// Overrides the reachability policy.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_reachability_policy(mut self, timeout: Duration, delay: Duration) -> Self {
        self.reachability_timeout = timeout;
        self.reachability_delay = delay;
        self
    }

    /// Returns the user reachability checks log in as.
    #[must_use]
    pub fn ssh_user(&self) -> &str {
        &self.ssh_user
    }

    /// Polls the server until it reports `running` or the attempt ceiling is
    /// exceeded. The first poll happens immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when a status poll itself fails; exhausting
    /// the attempt ceiling is reported as [`Readiness::NotReady`], not as an
    /// error.
    pub async fn wait_for_running(
        &self,
        provider: &dyn Provider,
        server_id: &str,
    ) -> Result<Readiness, ProviderError> {
        let mut attempt: u32 = 0;
        loop {
            let server = provider.get_server(server_id).await?;
            if server.is_running() {
                return Ok(Readiness::Ready);
            }
            if attempt >= self.status_attempts {
                return Ok(Readiness::NotReady);
            }
            if attempt > 0 && attempt.is_multiple_of(3) {
                debug!(
                    server_id,
                    name = %server.name,
                    waited = ?self.status_delay.saturating_mul(attempt),
                    "waiting for server to report running"
                );
            }
            attempt += 1;
            sleep(self.status_delay).await;
        }
    }

    /// Verifies the server accepts SSH logins, retrying transient failures
    /// until the reachability deadline.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::MissingAddress`] when the server has no public
    /// address, [`ProbeError::Unreachable`] on a non-retryable failure, and
    /// [`ProbeError::ProvisioningTimeout`] once the deadline elapses.
    pub async fn verify_reachable(&self, server: &Server) -> Result<(), ProbeError> {
        let address =
            server
                .public_address
                .as_deref()
                .ok_or_else(|| ProbeError::MissingAddress {
                    server_id: server.id.clone(),
                })?;

        let deadline = Instant::now() + self.reachability_timeout;
        loop {
            let output = self.check_ssh(address)?;
            if output.is_success() {
                return Ok(());
            }

            let diagnostics = output.combined();
            let Some(kind) = classify_ssh_failure(&diagnostics) else {
                error!(
                    server_id = %server.id,
                    name = %server.name,
                    address,
                    output = %diagnostics,
                    "server not reachable over ssh"
                );
                return Err(ProbeError::Unreachable {
                    server_id: server.id.clone(),
                    address: address.to_owned(),
                    output: diagnostics,
                });
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(ProbeError::ProvisioningTimeout {
                    server_id: server.id.clone(),
                    name: server.name.clone(),
                });
            }
            debug!(
                server_id = %server.id,
                address,
                failure = ?kind,
                remaining = ?deadline.duration_since(now),
                "waiting for ssh"
            );
            sleep(self.reachability_delay).await;
        }
    }

    fn check_ssh(&self, address: &str) -> Result<crate::exec::CommandOutput, ExecError> {
        let args = vec![
            OsString::from("-o"),
            OsString::from("StrictHostKeyChecking=no"),
            OsString::from("-o"),
            OsString::from("UserKnownHostsFile=/dev/null"),
            OsString::from(format!("{}@{address}", self.ssh_user)),
            OsString::from("ls"),
        ];
        self.exec.run(SSH_PROGRAM, &args)
    }
}
