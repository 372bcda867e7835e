//! Shared fakes for exercising operations, the runner, and commands without
//! a real backend.

use std::collections::{BTreeMap, VecDeque};
use std::ffi::OsString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;

use crate::environment::{Environment, EnvironmentError, EnvironmentStatus, MachineRecord};
use crate::exec::{CommandOutput, CommandRunner, ExecError};
use crate::provider::{LaunchRequest, Provider, ProviderError, ProviderFuture, Server};

/// Chronological record of collaborator calls, shared between fakes so tests
/// can assert cross-collaborator ordering.
pub(crate) type EventLog = Arc<Mutex<Vec<String>>>;

pub(crate) fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub(crate) fn events_in(log: &EventLog) -> Vec<String> {
    log.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
}

fn record(log: &EventLog, entry: impl Into<String>) {
    log.lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .push(entry.into());
}

pub(crate) fn server(id: &str, name: &str, state: &str, address: Option<&str>) -> Server {
    Server {
        id: id.to_owned(),
        name: name.to_owned(),
        image: None,
        state: state.to_owned(),
        public_address: address.map(str::to_owned),
        created_at: String::from("2025-05-01T10:00:00Z"),
    }
}

/// Scripted provider double. `get_server` pops from the state script and
/// falls back to `running` once the script is exhausted.
pub(crate) struct FakeProvider {
    events: EventLog,
    states: Mutex<VecDeque<String>>,
    address: Option<String>,
    launch_fails: bool,
    terminate_fails: bool,
    listing: Vec<Server>,
    launch_delay: Duration,
    active_launches: AtomicUsize,
    peak_launches: AtomicUsize,
}

impl FakeProvider {
    pub(crate) fn new(events: EventLog) -> Self {
        Self {
            events,
            states: Mutex::new(VecDeque::new()),
            address: Some(String::from("10.0.0.5")),
            launch_fails: false,
            terminate_fails: false,
            listing: Vec::new(),
            launch_delay: Duration::ZERO,
            active_launches: AtomicUsize::new(0),
            peak_launches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_states<I, S>(self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            states: Mutex::new(states.into_iter().map(Into::into).collect()),
            ..self
        }
    }

    pub(crate) fn with_listing(mut self, listing: Vec<Server>) -> Self {
        self.listing = listing;
        self
    }

    pub(crate) fn failing_launch(mut self) -> Self {
        self.launch_fails = true;
        self
    }

    pub(crate) fn failing_terminate(mut self) -> Self {
        self.terminate_fails = true;
        self
    }

    pub(crate) const fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    pub(crate) fn peak_concurrent_launches(&self) -> usize {
        self.peak_launches.load(Ordering::SeqCst)
    }

    fn next_state(&self) -> String {
        self.states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| String::from("running"))
    }
}

impl Provider for FakeProvider {
    fn launch_server<'a>(&'a self, request: &'a LaunchRequest) -> ProviderFuture<'a, Server> {
        Box::pin(async move {
            record(&self.events, format!("launch:{}", request.name));
            if self.launch_fails {
                return Err(ProviderError::Api {
                    message: String::from("launch rejected"),
                });
            }
            let active = self.active_launches.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_launches.fetch_max(active, Ordering::SeqCst);
            if !self.launch_delay.is_zero() {
                sleep(self.launch_delay).await;
            }
            self.active_launches.fetch_sub(1, Ordering::SeqCst);
            Ok(server(
                &format!("srv-{}", request.name),
                &request.name,
                "starting",
                self.address.as_deref(),
            ))
        })
    }

    fn get_server<'a>(&'a self, server_id: &'a str) -> ProviderFuture<'a, Server> {
        Box::pin(async move {
            record(&self.events, format!("get:{server_id}"));
            let state = self.next_state();
            Ok(server(
                server_id,
                &format!("name-{server_id}"),
                &state,
                self.address.as_deref(),
            ))
        })
    }

    fn terminate_server<'a>(&'a self, server_id: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            record(&self.events, format!("terminate-server:{server_id}"));
            if self.terminate_fails {
                return Err(ProviderError::Api {
                    message: String::from("terminate rejected"),
                });
            }
            Ok(())
        })
    }

    fn list_servers(&self) -> ProviderFuture<'_, Vec<Server>> {
        Box::pin(async move {
            record(&self.events, "list-servers");
            Ok(self.listing.clone())
        })
    }

    fn resolve_image<'a>(&'a self, series: &'a str) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            record(&self.events, format!("resolve-image:{series}"));
            Ok(String::from("img-1"))
        })
    }
}

/// Scripted environment double.
pub(crate) struct FakeEnvironment {
    events: EventLog,
    machines: BTreeMap<String, MachineRecord>,
    add_fails: bool,
    bootstrap_fails: bool,
    running: bool,
    next_machine_id: AtomicUsize,
}

impl FakeEnvironment {
    pub(crate) fn new(events: EventLog) -> Self {
        Self {
            events,
            machines: BTreeMap::new(),
            add_fails: false,
            bootstrap_fails: false,
            running: false,
            next_machine_id: AtomicUsize::new(1),
        }
    }

    pub(crate) fn with_machines(mut self, machines: BTreeMap<String, MachineRecord>) -> Self {
        self.machines = machines;
        self
    }

    pub(crate) fn failing_add(mut self) -> Self {
        self.add_fails = true;
        self
    }

    pub(crate) fn failing_bootstrap(mut self) -> Self {
        self.bootstrap_fails = true;
        self
    }

    pub(crate) const fn running(mut self) -> Self {
        self.running = true;
        self
    }

    fn failure(&self, action: &str) -> EnvironmentError {
        EnvironmentError::CommandFailure {
            program: String::from("fake-env"),
            status: Some(1),
            status_text: String::from("1"),
            stderr: format!("{action} rejected"),
        }
    }
}

impl Environment for FakeEnvironment {
    fn status(&self) -> Result<EnvironmentStatus, EnvironmentError> {
        record(&self.events, "status");
        Ok(EnvironmentStatus {
            machines: self.machines.clone(),
        })
    }

    fn add_machine(&self, target: &str, _key: Option<&str>) -> Result<String, EnvironmentError> {
        record(&self.events, format!("add-machine:{target}"));
        if self.add_fails {
            return Err(self.failure("add-machine"));
        }
        let id = self.next_machine_id.fetch_add(1, Ordering::SeqCst);
        Ok(id.to_string())
    }

    fn terminate_machines(&self, machine_ids: &[String]) -> Result<(), EnvironmentError> {
        record(
            &self.events,
            format!("terminate-machines:{}", machine_ids.join(",")),
        );
        Ok(())
    }

    fn bootstrap(&self, address: &str) -> Result<(), EnvironmentError> {
        record(&self.events, format!("bootstrap:{address}"));
        if self.bootstrap_fails {
            return Err(self.failure("bootstrap"));
        }
        Ok(())
    }

    fn destroy_environment(&self) -> Result<(), EnvironmentError> {
        record(&self.events, "destroy-environment");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

/// Scripted command runner: pops outputs in order, then keeps returning the
/// default output.
pub(crate) struct ScriptedRunner {
    outputs: Mutex<VecDeque<CommandOutput>>,
    default_output: CommandOutput,
    calls: Mutex<Vec<String>>,
}

pub(crate) fn exit_ok() -> CommandOutput {
    CommandOutput {
        code: Some(0),
        stdout: String::new(),
        stderr: String::new(),
    }
}

pub(crate) fn exit_err(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_owned(),
    }
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self {
            outputs: Mutex::new(VecDeque::new()),
            default_output: exit_ok(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_outputs(self, outputs: impl IntoIterator<Item = CommandOutput>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into_iter().collect()),
            ..self
        }
    }

    pub(crate) fn with_default(mut self, output: CommandOutput) -> Self {
        self.default_output = output;
        self
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ExecError> {
        let rendered: Vec<String> = args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(format!("{program} {}", rendered.join(" ")));
        let next = self
            .outputs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front();
        Ok(next.unwrap_or_else(|| self.default_output.clone()))
    }
}
