//! Tests for operation lifecycles and compensation.

use std::sync::Arc;
use std::time::Duration;

use crate::probe::{ProbeError, ReadinessProber};
use crate::provider::{LaunchRequest, Provider};
use crate::test_doubles::{FakeEnvironment, FakeProvider, ScriptedRunner, event_log, events_in};

use super::{AddMachine, DestroyMachine, OpError, OpOutcome, Operation, RegisterMachine};

fn request(name: &str) -> LaunchRequest {
    LaunchRequest::builder()
        .name(name)
        .image("img-1")
        .series("noble")
        .build()
        .unwrap_or_else(|err| panic!("request: {err}"))
}

fn fast_prober() -> ReadinessProber {
    ReadinessProber::new(Arc::new(ScriptedRunner::new()))
        .with_status_policy(3, Duration::from_millis(1))
        .with_reachability_policy(Duration::from_millis(40), Duration::from_millis(5))
}

#[tokio::test]
async fn add_returns_refreshed_server_after_observing_running() {
    let events = event_log();
    let provider = Arc::new(
        FakeProvider::new(Arc::clone(&events)).with_states(["pending", "running", "running"]),
    );
    let op = AddMachine::new(
        Arc::clone(&provider) as Arc<dyn Provider>,
        fast_prober(),
        request("staging-0"),
    );

    let server = op.run().await.unwrap_or_else(|err| panic!("add: {err}"));

    assert!(server.is_running());
    let log = events_in(&events);
    let running_observed = log.iter().filter(|entry| entry.starts_with("get:")).count();
    assert!(running_observed >= 2, "status wait plus refresh: {log:?}");
}

#[tokio::test]
async fn add_fails_with_timeout_when_never_running() {
    let events = event_log();
    let provider = Arc::new(FakeProvider::new(Arc::clone(&events)).with_states([
        "pending", "pending", "pending", "pending", "pending", "pending",
    ]));
    let op = AddMachine::new(provider, fast_prober(), request("staging-0"));

    let err = op.run().await.expect_err("never running");
    assert!(matches!(
        err,
        OpError::Probe(ProbeError::ProvisioningTimeout { .. })
    ));
}

#[tokio::test]
async fn register_returns_server_and_machine_id() {
    let events = event_log();
    let provider = Arc::new(FakeProvider::new(Arc::clone(&events)));
    let environment = Arc::new(FakeEnvironment::new(Arc::clone(&events)));
    let op = RegisterMachine::new(
        provider,
        environment,
        fast_prober(),
        request("staging-a1"),
        None,
    );

    let (server, machine_id) = op
        .run()
        .await
        .unwrap_or_else(|err| panic!("register: {err}"));

    assert_eq!(machine_id, "1");
    assert!(server.is_running());
    assert!(
        events_in(&events)
            .iter()
            .any(|entry| entry == "add-machine:ssh:root@10.0.0.5")
    );
}

#[tokio::test]
async fn register_terminates_server_exactly_once_when_registration_fails() {
    let events = event_log();
    let provider = Arc::new(FakeProvider::new(Arc::clone(&events)));
    let environment = Arc::new(FakeEnvironment::new(Arc::clone(&events)).failing_add());
    let op = RegisterMachine::new(
        Arc::clone(&provider) as Arc<dyn Provider>,
        environment,
        fast_prober(),
        request("staging-a1"),
        None,
    );

    let err = op.run().await.expect_err("registration fails");

    assert!(matches!(err, OpError::Register { .. }));
    let terminations = events_in(&events)
        .iter()
        .filter(|entry| entry.starts_with("terminate-server:"))
        .count();
    assert_eq!(terminations, 1, "no leak, no double terminate");
}

#[tokio::test]
async fn register_propagates_registration_error_even_when_compensation_fails() {
    let events = event_log();
    let provider = Arc::new(FakeProvider::new(Arc::clone(&events)).failing_terminate());
    let environment = Arc::new(FakeEnvironment::new(Arc::clone(&events)).failing_add());
    let op = RegisterMachine::new(
        provider,
        environment,
        fast_prober(),
        request("staging-a1"),
        None,
    );

    let err = op.run().await.expect_err("registration fails");
    assert!(
        matches!(err, OpError::Register { .. }),
        "teardown failure must not mask the registration error: {err}"
    );
}

#[tokio::test]
async fn destroy_removes_registry_entry_before_terminating_server() {
    let events = event_log();
    let provider = Arc::new(FakeProvider::new(Arc::clone(&events)));
    let environment = Arc::new(FakeEnvironment::new(Arc::clone(&events)));
    let op = DestroyMachine::new(
        provider,
        environment,
        Some(String::from("3")),
        Some(String::from("srv-3")),
    );

    let outcome = op.run().await.unwrap_or_else(|err| panic!("destroy: {err}"));

    assert_eq!(
        outcome,
        OpOutcome::Destroyed {
            machine_id: Some(String::from("3")),
            server_id: Some(String::from("srv-3")),
        }
    );
    assert_eq!(
        events_in(&events),
        vec![
            String::from("terminate-machines:3"),
            String::from("terminate-server:srv-3"),
        ]
    );
}

#[tokio::test]
async fn destroy_env_only_skips_backend_termination() {
    let events = event_log();
    let provider = Arc::new(FakeProvider::new(Arc::clone(&events)));
    let environment = Arc::new(FakeEnvironment::new(Arc::clone(&events)));
    let op = DestroyMachine::new(provider, environment, Some(String::from("3")), None)
        .env_only();

    let outcome = op.run().await.unwrap_or_else(|err| panic!("destroy: {err}"));

    assert_eq!(
        outcome,
        OpOutcome::Destroyed {
            machine_id: Some(String::from("3")),
            server_id: None,
        }
    );
    assert_eq!(events_in(&events), vec![String::from("terminate-machines:3")]);
}

#[tokio::test]
async fn destroy_iaas_only_skips_registry_removal() {
    let events = event_log();
    let provider = Arc::new(FakeProvider::new(Arc::clone(&events)));
    let environment = Arc::new(FakeEnvironment::new(Arc::clone(&events)));
    let op = DestroyMachine::new(provider, environment, None, Some(String::from("srv-9")))
        .iaas_only();

    op.run().await.unwrap_or_else(|err| panic!("destroy: {err}"));

    assert_eq!(
        events_in(&events),
        vec![String::from("terminate-server:srv-9")]
    );
}

#[tokio::test]
async fn destroy_requires_machine_id_for_registry_removal() {
    let events = event_log();
    let provider = Arc::new(FakeProvider::new(Arc::clone(&events)));
    let environment = Arc::new(FakeEnvironment::new(Arc::clone(&events)));
    let op = DestroyMachine::new(provider, environment, None, Some(String::from("srv-9")));

    let err = op.run().await.expect_err("machine id required");
    assert!(matches!(err, OpError::MissingParam { field: "machine_id" }));
    assert!(events_in(&events).is_empty(), "no step may run");
}

#[tokio::test]
async fn operation_labels_identify_the_work() {
    let events = event_log();
    let provider = Arc::new(FakeProvider::new(Arc::clone(&events)));
    let environment = Arc::new(FakeEnvironment::new(Arc::clone(&events)));

    let add = Operation::Add(AddMachine::new(
        Arc::clone(&provider) as Arc<dyn Provider>,
        fast_prober(),
        request("staging-0"),
    ));
    assert_eq!(add.label(), "add staging-0");

    let destroy = Operation::Destroy(DestroyMachine::new(
        provider,
        environment,
        Some(String::from("2")),
        None,
    ));
    assert_eq!(destroy.label(), "destroy machine=2 server=-");
}
