//! Surface-level checks on the supervisor API

mod common;

use common::*;
use shared::{SupervisorCommand, SupervisorState, WorkerState};
use supervisor::{Supervisor, SupervisorError};

#[tokio::test]
async fn test_run_before_start_is_rejected() {
    let transport = FakeTransport::new();
    let spawner = FakeSpawner::new(transport.injector(), vec![]);
    let mut sup = Supervisor::new(supervisor_config(), launch_spec(), spawner, transport);

    assert!(matches!(
        sup.run().await,
        Err(SupervisorError::ConfigurationError { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_double_start_is_rejected() {
    let transport = FakeTransport::new();
    let spawner = FakeSpawner::new(transport.injector(), vec![WorkerScript::healthy()]);
    let mut sup = Supervisor::new(supervisor_config(), launch_spec(), spawner, transport);

    sup.start().unwrap();
    assert!(matches!(
        sup.start(),
        Err(SupervisorError::ConfigurationError { .. })
    ));
    sup.shutdown().await;
}

#[tokio::test]
async fn test_stats_before_start_are_inert() {
    let transport = FakeTransport::new();
    let spawner = FakeSpawner::new(transport.injector(), vec![]);
    let sup = Supervisor::new(supervisor_config(), launch_spec(), spawner, transport);

    assert_eq!(sup.state(), SupervisorState::Stopped);

    let stats = sup.stats();
    assert_eq!(stats.state, SupervisorState::Stopped);
    assert_eq!(stats.worker.state, WorkerState::Stopped);
    assert!(!stats.worker.auto_restart);
    assert_eq!(stats.recovery.total_decisions, 0);
    assert!(stats.recovery.last_decision.is_none());
}

#[tokio::test]
async fn test_send_without_worker_is_false() {
    let transport = FakeTransport::new();
    let spawner = FakeSpawner::new(transport.injector(), vec![]);
    let sup = Supervisor::new(supervisor_config(), launch_spec(), spawner, transport.clone());

    let delivered = sup
        .send_to_worker(SupervisorCommand::Custom { payload: "{}".to_string() })
        .await;
    assert!(!delivered);
    assert!(transport.sent_commands().is_empty());
}

#[tokio::test]
async fn test_shutdown_without_start_is_a_no_op() {
    let transport = FakeTransport::new();
    let spawner = FakeSpawner::new(transport.injector(), vec![]);
    let mut sup = Supervisor::new(supervisor_config(), launch_spec(), spawner, transport);

    sup.shutdown().await;
    assert_eq!(sup.state(), SupervisorState::Stopped);
}
