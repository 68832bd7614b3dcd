//! The reconnection controller against a daemon that comes and goes.

use std::time::{Duration, Instant};

use brainstem_core::ipc::{Mode, Request, Response};
use brainstem_core::reconnect::{
    ClientEvent, ControllerHandle, LinkState, ReconnectController, RetryPolicy,
};
use brainstem_test_utils::TestDaemon;
use pretty_assertions::assert_eq;

const RETRY: Duration = Duration::from_millis(100);

async fn next(handle: &mut ControllerHandle) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), handle.next_event())
        .await
        .expect("timed out waiting for a controller event")
        .expect("controller stopped")
}

/// Consume the initial connect and return the synced snapshot's mode.
async fn expect_connect(handle: &mut ControllerHandle) -> Mode {
    assert_eq!(next(handle).await, ClientEvent::Link(LinkState::Connecting));
    let mode = match next(handle).await {
        ClientEvent::Synced(snapshot) => snapshot.mode,
        other => panic!("expected Synced before Connected, got {other:?}"),
    };
    assert_eq!(next(handle).await, ClientEvent::Link(LinkState::Connected));
    mode
}

#[test_log::test(tokio::test)]
async fn connects_and_syncs_before_reporting_connected() {
    let daemon = TestDaemon::start().await;
    daemon.client().set_mode(Mode::Dictation).await.unwrap();

    let (controller, mut handle) =
        ReconnectController::new(daemon.client(), RetryPolicy::Fixed(RETRY));
    let task = tokio::spawn(controller.run());

    assert_eq!(expect_connect(&mut handle).await, Mode::Dictation);
    assert_eq!(handle.state(), LinkState::Connected);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    assert_eq!(handle.state(), LinkState::Disconnected);
}

#[test_log::test(tokio::test)]
async fn relays_broadcasts_and_sends_mode_requests() {
    let daemon = TestDaemon::start().await;
    let (controller, mut handle) =
        ReconnectController::new(daemon.client(), RetryPolicy::Fixed(RETRY));
    let task = tokio::spawn(controller.run());
    expect_connect(&mut handle).await;

    // A change made elsewhere reaches the controller.
    let mut other = daemon.raw().await;
    daemon.wait_for_connections(2).await;
    assert_eq!(
        other.request(&Request::SetMode { mode: Mode::Agent }).await,
        Response::mode_change(Mode::Agent)
    );
    assert_eq!(next(&mut handle).await, ClientEvent::ModeChanged(Mode::Agent));

    // A change made through the controller reaches everyone else.
    handle.set_mode(Mode::Intelligent).await.unwrap();
    assert_eq!(
        next(&mut handle).await,
        ClientEvent::ModeChanged(Mode::Intelligent)
    );
    assert_eq!(other.recv().await, Response::mode_change(Mode::Intelligent));

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[test_log::test(tokio::test)]
async fn reconnects_after_daemon_restart() {
    let mut daemon = TestDaemon::start().await;
    let (controller, mut handle) =
        ReconnectController::new(daemon.client(), RetryPolicy::Fixed(RETRY));
    let mut link = handle.subscribe_state();
    let task = tokio::spawn(controller.run());
    expect_connect(&mut handle).await;
    daemon.client().set_mode(Mode::Agent).await.unwrap();
    assert_eq!(next(&mut handle).await, ClientEvent::ModeChanged(Mode::Agent));

    daemon.stop().await;
    assert_eq!(next(&mut handle).await, ClientEvent::Link(LinkState::Disconnected));
    let lost_at = Instant::now();
    assert_eq!(*link.borrow_and_update(), LinkState::Disconnected);

    // While the daemon is down the controller keeps retrying on schedule.
    assert_eq!(next(&mut handle).await, ClientEvent::Link(LinkState::Connecting));
    assert!(lost_at.elapsed() >= RETRY - Duration::from_millis(20));
    assert_eq!(next(&mut handle).await, ClientEvent::Link(LinkState::Disconnected));

    // Mode requests while disconnected go nowhere.
    handle.set_mode(Mode::Dictation).await.unwrap();

    daemon.restart().await;

    // Skip failed attempts that raced the restart, then expect a full
    // resync: Synced strictly before Connected.
    loop {
        match next(&mut handle).await {
            ClientEvent::Link(LinkState::Connecting | LinkState::Disconnected) => continue,
            ClientEvent::Synced(snapshot) => {
                assert_eq!(snapshot.mode, Mode::Idle);
                break;
            }
            other => panic!("expected Synced, got {other:?}"),
        }
    }
    assert_eq!(next(&mut handle).await, ClientEvent::Link(LinkState::Connected));
    assert_eq!(daemon.daemon().status().mode, Mode::Idle);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}
