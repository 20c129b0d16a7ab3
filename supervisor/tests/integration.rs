//! End-to-end supervision scenarios on virtual time
//!
//! Every test drives the real worker manager and supervisor with scripted
//! spawner/transport fakes, so restart arithmetic, hang handling, and
//! recovery decisions are exercised exactly as in production, minus the OS.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use common::*;
use shared::{FailureReason, SupervisorCommand, SupervisorState, WorkerMessage};
use supervisor::{
    HeartbeatConfig, Supervisor, SupervisorError, SupervisorEvent, WorkerEvent, WorkerManager,
    WorkerManagerConfig, WorkerManagerHandle,
};

fn start_manager(
    scripts: Vec<WorkerScript>,
    config: WorkerManagerConfig,
    heartbeat: HeartbeatConfig,
) -> (
    WorkerManagerHandle,
    mpsc::Receiver<WorkerEvent>,
    tokio::task::JoinHandle<()>,
    Arc<FakeTransport>,
    FakeSpawner,
) {
    let transport = FakeTransport::new();
    let spawner = FakeSpawner::new(transport.injector(), scripts);
    let (manager, handle, events) = WorkerManager::new(
        config,
        heartbeat,
        launch_spec(),
        spawner.clone(),
        transport.clone(),
    );
    let task = tokio::spawn(manager.run());
    (handle, events, task, transport, spawner)
}

#[tokio::test(start_paused = true)]
async fn test_stable_worker_crash_gets_unbackoffed_first_restart() {
    let (handle, mut events, _task, _transport, _spawner) = start_manager(
        vec![WorkerScript::crash_after(70_000), WorkerScript::healthy()],
        manager_config(),
        quiet_heartbeat(),
    );

    assert!(matches!(next_event(&mut events).await, WorkerEvent::Started { .. }));
    assert!(matches!(next_event(&mut events).await, WorkerEvent::Ready { .. }));

    let crashed = wait_for(&mut events, |e| matches!(e, WorkerEvent::Crashed { .. })).await;
    match crashed {
        WorkerEvent::Crashed { reason, exit, uptime_ms, consecutive_restarts } => {
            assert_eq!(reason, FailureReason::Crash);
            assert_eq!(exit.unwrap().code, Some(1));
            assert!((70_000..72_000).contains(&uptime_ms), "uptime was {uptime_ms}");
            assert_eq!(consecutive_restarts, 0);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    match next_event(&mut events).await {
        WorkerEvent::RestartScheduled { delay_ms, attempt } => {
            // First restart of the episode carries the base delay only
            assert_eq!(delay_ms, 1_000);
            assert_eq!(attempt, 1);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    wait_for(&mut events, |e| matches!(e, WorkerEvent::Ready { .. })).await;

    let stats = handle.stats();
    assert_eq!(stats.consecutive_restarts, 1);
    assert_eq!(stats.total_restarts, 1);
    assert_eq!(stats.last_exit_code, Some(1));

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_eleventh_crash_disables_auto_restart() {
    let (handle, mut events, task, _transport, spawner) = start_manager(
        vec![WorkerScript::stillborn()],
        manager_config(), // max_restarts = 10
        quiet_heartbeat(),
    );

    let mut restarts_scheduled = 0;
    loop {
        match next_event(&mut events).await {
            WorkerEvent::RestartScheduled { .. } => restarts_scheduled += 1,
            WorkerEvent::MaxRestartsReached { count } => {
                assert_eq!(count, 10);
                break;
            }
            _ => {}
        }
    }
    assert_eq!(restarts_scheduled, 10);
    assert_eq!(spawner.spawn_count(), 11);

    let stats = handle.stats();
    assert!(!stats.auto_restart);

    // Parked manager still answers control and then stops cleanly
    assert!(!handle.send(SupervisorCommand::Custom { payload: "{}".to_string() }).await);
    handle.stop().await;
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("manager task did not finish")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_hung_worker_is_killed_and_restarted() {
    let (handle, mut events, _task, _transport, _spawner) = start_manager(
        vec![WorkerScript::silent(), WorkerScript::healthy()],
        manager_config(),
        tight_heartbeat(),
    );

    wait_for(&mut events, |e| matches!(e, WorkerEvent::Ready { .. })).await;
    assert!(matches!(
        wait_for(&mut events, |e| matches!(e, WorkerEvent::Hung { .. })).await,
        WorkerEvent::Hung { .. }
    ));

    match wait_for(&mut events, |e| matches!(e, WorkerEvent::Crashed { .. })).await {
        WorkerEvent::Crashed { reason, exit, .. } => {
            assert_eq!(reason, FailureReason::Hang);
            // Killed via the graceful signal, not voluntary exit
            assert_eq!(exit.unwrap().signal, Some(15));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    wait_for(&mut events, |e| matches!(e, WorkerEvent::RestartScheduled { .. })).await;
    wait_for(&mut events, |e| matches!(e, WorkerEvent::Ready { .. })).await;
    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_startup_timeout_follows_the_crash_path() {
    let (handle, mut events, _task, _transport, _spawner) = start_manager(
        vec![WorkerScript::never_ready(), WorkerScript::healthy()],
        manager_config(), // startup_timeout_ms = 5_000
        quiet_heartbeat(),
    );

    assert!(matches!(next_event(&mut events).await, WorkerEvent::Started { .. }));
    match next_event(&mut events).await {
        WorkerEvent::Crashed { reason, uptime_ms, .. } => {
            assert_eq!(reason, FailureReason::Crash);
            assert!((5_000..6_000).contains(&uptime_ms), "uptime was {uptime_ms}");
        }
        other => panic!("expected startup failure, got {other:?}"),
    }

    wait_for(&mut events, |e| matches!(e, WorkerEvent::Ready { .. })).await;
    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_graceful_stop_sends_shutdown_and_is_idempotent() {
    let (handle, mut events, task, transport, _spawner) = start_manager(
        vec![WorkerScript::healthy()],
        manager_config(),
        quiet_heartbeat(),
    );

    wait_for(&mut events, |e| matches!(e, WorkerEvent::Ready { .. })).await;

    handle.stop().await;
    wait_for(&mut events, |e| matches!(e, WorkerEvent::Stopped)).await;
    tokio::time::timeout(Duration::from_secs(60), task)
        .await
        .expect("manager task did not finish")
        .unwrap();

    assert!(transport
        .sent_commands()
        .iter()
        .any(|c| matches!(c, SupervisorCommand::Shutdown { .. })));

    // Second stop after the manager is gone must be a quiet no-op
    handle.stop().await;
    assert!(!handle.send(SupervisorCommand::Custom { payload: "{}".to_string() }).await);
}

#[tokio::test(start_paused = true)]
async fn test_send_reflects_worker_connectivity() {
    let (handle, mut events, _task, transport, _spawner) = start_manager(
        vec![WorkerScript::healthy()],
        manager_config(),
        quiet_heartbeat(),
    );

    wait_for(&mut events, |e| matches!(e, WorkerEvent::Ready { .. })).await;

    assert!(handle.send(SupervisorCommand::Custom { payload: "ping".to_string() }).await);
    transport.set_connected(false);
    assert!(!handle.send(SupervisorCommand::Custom { payload: "ping".to_string() }).await);

    transport.set_connected(true);
    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_restart_window_amnesty_resets_the_streak() {
    let config = WorkerManagerConfig {
        restart_window_ms: 10_000,
        ..manager_config()
    };
    let (handle, mut events, _task, _transport, _spawner) = start_manager(
        vec![
            WorkerScript::crash_after(20_000),
            WorkerScript::crash_after(20_000),
            WorkerScript::healthy(),
        ],
        config,
        quiet_heartbeat(),
    );

    let first = wait_for(&mut events, |e| matches!(e, WorkerEvent::RestartScheduled { .. })).await;
    let second = wait_for(&mut events, |e| matches!(e, WorkerEvent::RestartScheduled { .. })).await;

    // 20s of stability exceeds the 10s window, so the second crash opens a
    // fresh episode with the base delay again
    for event in [first, second] {
        match event {
            WorkerEvent::RestartScheduled { delay_ms, attempt } => {
                assert_eq!(delay_ms, 1_000);
                assert_eq!(attempt, 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    wait_for(&mut events, |e| matches!(e, WorkerEvent::Ready { .. })).await;
    let stats = handle.stats();
    assert_eq!(stats.consecutive_restarts, 1);
    assert_eq!(stats.total_restarts, 2);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_ignored_shutdown_escalates_to_kill() {
    // Transport reports no worker connected, so the shutdown request cannot
    // be delivered and the stop goes straight to the kill path
    let (handle, mut events, task, transport, _spawner) = start_manager(
        vec![WorkerScript::healthy()],
        manager_config(),
        quiet_heartbeat(),
    );

    wait_for(&mut events, |e| matches!(e, WorkerEvent::Ready { .. })).await;
    transport.set_connected(false);

    handle.stop().await;
    tokio::time::timeout(Duration::from_secs(60), task)
        .await
        .expect("manager task did not finish")
        .unwrap();

    let stats = handle.stats();
    assert_eq!(stats.last_exit_signal, Some(15));
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_gives_up_after_a_long_streak() {
    let transport = FakeTransport::new();
    let spawner = FakeSpawner::new(transport.injector(), vec![WorkerScript::stillborn()]);

    let mut config = supervisor_config();
    config.worker.max_restarts = 20;

    let mut sup = Supervisor::new(config, launch_spec(), spawner, transport);
    sup.start().unwrap();

    let result = tokio::time::timeout(Duration::from_secs(3_600), sup.run())
        .await
        .expect("supervisor run did not finish");
    assert!(matches!(result, Err(SupervisorError::GaveUp { .. })));
    assert_eq!(sup.state(), SupervisorState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_restart_ceiling_surfaces_an_escalation() {
    let transport = FakeTransport::new();
    let spawner = FakeSpawner::new(transport.injector(), vec![WorkerScript::stillborn()]);

    let mut config = supervisor_config();
    config.worker.max_restarts = 2;
    // Keep the streak rules from giving up before the ceiling is reached
    config.recovery.mid_episode_crashes = 100;

    let mut sup = Supervisor::new(config, launch_spec(), spawner, transport);
    let mut observed = sup.subscribe();
    let shutdown = sup.get_shutdown_sender();

    let watcher = tokio::spawn(async move {
        let mut escalated = false;
        loop {
            match observed.recv().await {
                Ok(SupervisorEvent::Escalated { decision }) => {
                    escalated = true;
                    assert_eq!(decision.confidence, 0.95);
                    let _ = shutdown.send(()).await;
                }
                Ok(SupervisorEvent::Stopped) | Err(_) => break escalated,
                Ok(_) => {}
            }
        }
    });

    sup.start().unwrap();
    let result = tokio::time::timeout(Duration::from_secs(3_600), sup.run())
        .await
        .expect("supervisor run did not finish");
    assert!(result.is_ok());
    assert!(watcher.await.unwrap(), "no escalation was published");
}

#[tokio::test(start_paused = true)]
async fn test_decision_cooldown_prevents_decision_storms() {
    let transport = FakeTransport::new();
    let spawner = FakeSpawner::new(
        transport.injector(),
        vec![
            WorkerScript::stillborn(),
            WorkerScript::stillborn(),
            WorkerScript::healthy(),
        ],
    );

    let mut config = supervisor_config();
    config.recovery.cooldown_ms = 600_000;

    let mut sup = Supervisor::new(config, launch_spec(), spawner, transport);
    let mut observed = sup.subscribe();
    let shutdown = sup.get_shutdown_sender();

    let watcher = tokio::spawn(async move {
        let mut decisions = 0;
        loop {
            match observed.recv().await {
                Ok(SupervisorEvent::RecoveryDecided { .. }) => decisions += 1,
                Ok(SupervisorEvent::WorkerReady { .. }) => {
                    let _ = shutdown.send(()).await;
                }
                Ok(SupervisorEvent::Stopped) | Err(_) => break decisions,
                Ok(_) => {}
            }
        }
    });

    sup.start().unwrap();
    sup.run().await.unwrap();

    // Two crashes inside one cooldown window produce exactly one decision
    assert_eq!(watcher.await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_crash_ceiling_fails_even_without_decisions() {
    let transport = FakeTransport::new();
    let spawner = FakeSpawner::new(transport.injector(), vec![WorkerScript::stillborn()]);

    let mut config = supervisor_config();
    config.crash_ceiling = 5;
    config.worker.max_restarts = 20;
    // Cooldown keeps the recovery engine silent the whole time
    config.recovery.cooldown_ms = u64::MAX / 2;

    let mut sup = Supervisor::new(config, launch_spec(), spawner, transport);
    sup.start().unwrap();

    let result = tokio::time::timeout(Duration::from_secs(3_600), sup.run())
        .await
        .expect("supervisor run did not finish");
    assert!(matches!(result, Err(SupervisorError::GaveUp { .. })));
    assert_eq!(sup.state(), SupervisorState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_worker_messages_feed_heartbeat_stats() {
    let (handle, mut events, _task, transport, _spawner) = start_manager(
        vec![WorkerScript::healthy()], // heartbeats every second
        manager_config(),
        quiet_heartbeat(),
    );

    wait_for(&mut events, |e| matches!(e, WorkerEvent::Ready { .. })).await;
    tokio::time::sleep(Duration::from_millis(3_500)).await;

    let stats = handle.stats();
    assert!(stats.heartbeat.total_received >= 3);
    assert!(stats.heartbeat.alive);

    // Unknown worker ids are dropped, not counted
    let before = handle.stats().heartbeat.total_received;
    transport
        .injector()
        .send(WorkerMessage::Heartbeat {
            worker_id: 99,
            record: shared::HeartbeatRecord::new(1, 0, 0),
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.stats().heartbeat.total_received, before);

    handle.stop().await;
}
