//! User-facing command orchestration.
//!
//! Commands check preconditions, build operations, and feed them through the
//! runner. They compensate where the underlying steps cannot: a bootstrap
//! whose registry bind fails terminates the server it just provisioned.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, EnvironmentsFile};
use crate::environment::{Environment, EnvironmentError, EnvironmentStatus};
use crate::ops::{AddMachine, DestroyMachine, OpError, OpOutcome, Operation, RegisterMachine};
use crate::probe::{ProbeError, ReadinessProber};
use crate::provider::{LaunchRequest, Provider, ProviderError, Server};
use crate::runner::{DEFAULT_PARALLELISM, Runner};

/// Machine id of the bootstrap host in the orchestrator registry.
const BOOTSTRAP_MACHINE_ID: &str = "0";

/// Delay between machine termination and environment destruction, giving the
/// orchestrator time to mark the machines dead.
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(10);

/// Errors raised by commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Raised when configuration or the environments file is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Raised when a command precondition is unmet.
    #[error("precondition failed: {0}")]
    Precheck(String),
    /// Raised when a provider call fails.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Raised when an orchestrator call fails.
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
    /// Raised when a synchronously run operation fails.
    #[error(transparent)]
    Op(#[from] OpError),
    /// Raised when rendered output cannot be written.
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

/// Shared collaborators and settings for all commands.
#[derive(Clone)]
pub struct CommandContext {
    environment_name: String,
    series: String,
    environments_file: Utf8PathBuf,
    provider: Arc<dyn Provider>,
    environment: Arc<dyn Environment>,
    prober: ReadinessProber,
    parallelism: usize,
}

impl CommandContext {
    /// Creates a context over the given collaborators.
    #[must_use]
    pub fn new(
        environment_name: impl Into<String>,
        series: impl Into<String>,
        environments_file: Utf8PathBuf,
        provider: Arc<dyn Provider>,
        environment: Arc<dyn Environment>,
        prober: ReadinessProber,
    ) -> Self {
        Self {
            environment_name: environment_name.into(),
            series: series.into(),
            environments_file,
            provider,
            environment,
            prober,
            parallelism: DEFAULT_PARALLELISM,
        }
    }

    /// Overrides the worker bound used for bulk commands.
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    fn runner(&self) -> Runner {
        Runner::new().with_parallelism(self.parallelism)
    }

    fn server_name_prefix(&self) -> String {
        format!("{}-", self.environment_name)
    }

    /// Verifies the target environment is declared and can host provisioned
    /// machines.
    fn check_preconditions(&self) -> Result<(), CommandError> {
        let file = EnvironmentsFile::load(&self.environments_file)?;
        let declaration = file.declaration(&self.environment_name)?;
        declaration.ensure_provisionable(&self.environment_name)?;
        Ok(())
    }

    /// Resolves the configured series to a concrete image identifier.
    async fn solve_constraints(&self) -> Result<String, CommandError> {
        let started = Instant::now();
        let image = self.provider.resolve_image(&self.series).await?;
        debug!(
            series = %self.series,
            image = %image,
            elapsed = ?started.elapsed(),
            "resolved series to image"
        );
        Ok(image)
    }

    fn launch_request(&self, name: String, image: &str) -> Result<LaunchRequest, CommandError> {
        LaunchRequest::builder()
            .name(name)
            .image(image)
            .series(&self.series)
            .build()
            .map_err(CommandError::from)
    }

    /// Builds destroy operations for every registry machine accepted by
    /// `filter`, cross-referencing registry addresses against live servers.
    /// Records whose address has no live server are removed from the registry
    /// only. Returns the registry snapshot and the live servers keyed by
    /// address for further teardown.
    async fn terminate_matching(
        &self,
        filter: impl Fn(&str) -> bool,
    ) -> Result<(EnvironmentStatus, HashMap<String, Server>), CommandError> {
        debug!("checking for machines to terminate");
        let status = self.environment.status()?;

        let remove: Vec<(String, Option<String>)> = status
            .machines
            .iter()
            .filter(|(machine_id, _)| filter(machine_id.as_str()))
            .map(|(machine_id, record)| (machine_id.clone(), record.address.clone()))
            .collect();

        let mut address_map: HashMap<String, Server> = HashMap::new();
        for server in self.provider.list_servers().await? {
            if let Some(address) = server.public_address.clone() {
                address_map.insert(address, server);
            }
        }

        if remove.is_empty() {
            return Ok((status, address_map));
        }

        let machine_ids: Vec<&str> = remove.iter().map(|(id, _)| id.as_str()).collect();
        info!(machines = ?machine_ids, "terminating machines");

        let mut runner = self.runner();
        for (machine_id, address) in &remove {
            let server = address.as_deref().and_then(|value| address_map.get(value));
            let op = match server {
                Some(found) => DestroyMachine::new(
                    Arc::clone(&self.provider),
                    Arc::clone(&self.environment),
                    Some(machine_id.clone()),
                    Some(found.id.clone()),
                ),
                None => {
                    warn!(
                        machine_id = %machine_id,
                        address = ?address,
                        "could not resolve machine address to a live server"
                    );
                    // The registry references a server the provider no longer
                    // knows; remove the record so teardown can proceed.
                    DestroyMachine::new(
                        Arc::clone(&self.provider),
                        Arc::clone(&self.environment),
                        Some(machine_id.clone()),
                        None,
                    )
                    .env_only()
                }
            };
            runner.queue_op(Operation::Destroy(op));
        }
        runner.drain_results().await;

        Ok((status, address_map))
    }
}

/// Provisions the first machine and bootstraps the environment on it.
pub struct Bootstrap {
    ctx: CommandContext,
}

impl Bootstrap {
    /// Creates the command.
    #[must_use]
    pub const fn new(ctx: CommandContext) -> Self {
        Self { ctx }
    }

    /// Runs the bootstrap sequence.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when preconditions fail, provisioning fails,
    /// or the environment cannot be bootstrapped on the new server.
    pub async fn run(&self) -> Result<(), CommandError> {
        self.ctx.check_preconditions()?;
        if self.ctx.environment.is_running() {
            return Err(CommandError::Precheck(format!(
                "environment {} is already bootstrapped",
                self.ctx.environment_name
            )));
        }

        let image = self.ctx.solve_constraints().await?;
        info!(environment = %self.ctx.environment_name, "launching bootstrap host (eta 5m)");
        let request = self
            .ctx
            .launch_request(format!("{}-0", self.ctx.environment_name), &image)?;
        let op = AddMachine::new(
            Arc::clone(&self.ctx.provider),
            self.ctx.prober.clone(),
            request,
        );
        let server = op.run().await?;

        let Some(address) = server.public_address.clone() else {
            self.terminate_bootstrap_host(&server).await;
            return Err(CommandError::Op(OpError::Probe(ProbeError::MissingAddress {
                server_id: server.id,
            })));
        };

        info!("bootstrapping environment");
        if let Err(err) = self.ctx.environment.bootstrap(&address) {
            warn!(
                server_id = %server.id,
                error = %err,
                "bootstrap failed, terminating bootstrap host"
            );
            self.terminate_bootstrap_host(&server).await;
            return Err(CommandError::Environment(err));
        }
        info!("bootstrap complete");
        Ok(())
    }

    async fn terminate_bootstrap_host(&self, server: &Server) {
        if let Err(teardown) = self.ctx.provider.terminate_server(&server.id).await {
            warn!(
                server_id = %server.id,
                error = %teardown,
                "failed to terminate bootstrap host"
            );
        }
    }
}

/// Provisions and registers a batch of machines.
pub struct AddMachines {
    ctx: CommandContext,
    count: usize,
    registration_key: Option<String>,
}

impl AddMachines {
    /// Creates the command for `count` machines.
    #[must_use]
    pub const fn new(ctx: CommandContext, count: usize, registration_key: Option<String>) -> Self {
        Self {
            ctx,
            count,
            registration_key,
        }
    }

    /// Launches and registers the machines, returning each registered
    /// server/machine pair. Failed registrations are logged by the runner and
    /// reflected only in a shorter result list.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when preconditions or image resolution fail.
    pub async fn run(&self) -> Result<Vec<(Server, String)>, CommandError> {
        self.ctx.check_preconditions()?;
        let image = self.ctx.solve_constraints().await?;
        info!(count = self.count, "launching servers");

        let mut runner = self.ctx.runner();
        for _ in 0..self.count {
            let name = format!(
                "{}-{}",
                self.ctx.environment_name,
                Uuid::new_v4().simple()
            );
            let request = self.ctx.launch_request(name, &image)?;
            runner.queue_op(Operation::Register(RegisterMachine::new(
                Arc::clone(&self.ctx.provider),
                Arc::clone(&self.ctx.environment),
                self.ctx.prober.clone(),
                request,
                self.registration_key.clone(),
            )));
        }

        let mut registered = Vec::new();
        for outcome in runner.drain_results().await {
            if let OpOutcome::Registered { server, machine_id } = outcome {
                info!(
                    server_id = %server.id,
                    name = %server.name,
                    address = ?server.public_address,
                    machine_id = %machine_id,
                    "registered machine"
                );
                registered.push((server, machine_id));
            }
        }
        Ok(registered)
    }
}

/// Terminates a named set of machines.
pub struct TerminateMachines {
    ctx: CommandContext,
    machines: Vec<String>,
}

impl TerminateMachines {
    /// Creates the command over the given machine ids.
    #[must_use]
    pub const fn new(ctx: CommandContext, machines: Vec<String>) -> Self {
        Self { ctx, machines }
    }

    /// Removes the machines from the registry and terminates their servers.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when preconditions fail or the registry
    /// cannot be read.
    pub async fn run(&self) -> Result<(), CommandError> {
        self.ctx.check_preconditions()?;
        self.ctx
            .terminate_matching(|machine_id| {
                self.machines.iter().any(|wanted| wanted == machine_id)
            })
            .await?;
        Ok(())
    }
}

/// Destroys the environment and every machine in it.
pub struct DestroyEnvironment {
    ctx: CommandContext,
    force: bool,
    settle_delay: Duration,
}

impl DestroyEnvironment {
    /// Creates the command. With `force`, the registry is bypassed and live
    /// servers are matched by name prefix instead.
    #[must_use]
    pub const fn new(ctx: CommandContext, force: bool) -> Self {
        Self {
            ctx,
            force,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    /// Overrides the settle delay between machine termination and
    /// environment destruction.
    ///
    /// This is primarily used by tests to keep the command fast.
    #[must_use]
    pub const fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Runs the teardown sequence.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when preconditions fail or a teardown step is
    /// rejected.
    pub async fn run(&self) -> Result<(), CommandError> {
        self.ctx.check_preconditions()?;
        if self.force {
            return self.force_destroy().await;
        }

        let (status, address_map) = self
            .ctx
            .terminate_matching(|machine_id| machine_id != BOOTSTRAP_MACHINE_ID)
            .await?;

        // The orchestrator marks machines dead asynchronously; give it time
        // before destroying the environment.
        sleep(self.settle_delay).await;

        info!("destroying environment");
        self.ctx.environment.destroy_environment()?;

        let bootstrap_address = status
            .machines
            .get(BOOTSTRAP_MACHINE_ID)
            .and_then(|record| record.address.clone());
        if let Some(server) = bootstrap_address.and_then(|address| address_map.get(&address)) {
            info!(server_id = %server.id, "terminating bootstrap host");
            self.ctx.provider.terminate_server(&server.id).await?;
        }
        info!("environment destroyed");
        Ok(())
    }

    /// Destroys every live server named for this environment, ignoring the
    /// registry entirely. Used when registry state is itself unreliable.
    async fn force_destroy(&self) -> Result<(), CommandError> {
        let prefix = self.ctx.server_name_prefix();
        let servers = self.ctx.provider.list_servers().await?;

        info!("destroying environment");
        let mut runner = self.ctx.runner();
        for server in servers
            .into_iter()
            .filter(|server| server.name.starts_with(&prefix))
        {
            runner.queue_op(Operation::Destroy(
                DestroyMachine::new(
                    Arc::clone(&self.ctx.provider),
                    Arc::clone(&self.ctx.environment),
                    None,
                    Some(server.id),
                )
                .iaas_only(),
            ));
        }
        runner.drain_results().await;

        if let Err(err) = self.ctx.environment.destroy_environment() {
            warn!(error = %err, "failed to clear environment state");
        }
        info!("environment destroyed");
        Ok(())
    }
}

/// Renders a table of the environment's servers.
pub struct ListMachines {
    ctx: CommandContext,
    all: bool,
}

impl ListMachines {
    /// Creates the command. With `all`, servers outside the environment's
    /// name prefix are included.
    #[must_use]
    pub const fn new(ctx: CommandContext, all: bool) -> Self {
        Self { ctx, all }
    }

    /// Writes one row per server to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the provider cannot be queried or the
    /// sink rejects a write.
    pub async fn run(&self, out: &mut impl Write) -> Result<(), CommandError> {
        let prefix = self.ctx.server_name_prefix();
        let servers = self.ctx.provider.list_servers().await?;

        let mut wrote_header = false;
        for server in servers {
            if !self.all && !server.name.starts_with(&prefix) {
                continue;
            }
            if !wrote_header {
                writeln!(
                    out,
                    "{:<38} {:<24} {:<10} {:<20} {:<16}",
                    "Id", "Name", "Status", "Created", "Address"
                )?;
                wrote_header = true;
            }
            writeln!(
                out,
                "{:<38} {:<24} {:<10} {:<20} {:<16}",
                server.id,
                shorten(&server.name, 24),
                server.state,
                shorten(&server.created_at, 20),
                server.public_address.as_deref().unwrap_or("none")
            )?;
        }
        Ok(())
    }
}

/// Truncates `value` to at most `max` characters, marking the cut with an
/// ellipsis.
fn shorten(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_owned();
    }
    let kept: String = value.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}
