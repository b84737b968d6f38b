//! Reconnect backoff and retry budget of the push channel, on paused time

use kanban_sync::test_support::ScriptedConnector;
use kanban_sync::{BoardChannel, ChannelEvent, ConnectionState, SyncConfig, TransportError};
use std::sync::Arc;
use std::time::Duration;

const BOARD: &str = "6d1f3a2b-8c4e-4f5a-9b6c-7d8e9f0a1b2c";

fn channel(connector: &Arc<ScriptedConnector>) -> BoardChannel {
    BoardChannel::new(connector.clone(), SyncConfig::default())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_gives_up_after_retry_budget() {
    // empty script: every attempt is refused
    let connector = Arc::new(ScriptedConnector::new());
    let channel = channel(&connector);

    let mut events = channel.start(BOARD).unwrap();
    let mut delays = Vec::new();
    loop {
        match events.next().await {
            Some(ChannelEvent::Reconnecting { attempt, delay }) => {
                assert_eq!(attempt as usize, delays.len() + 1);
                delays.push(delay);
            }
            Some(ChannelEvent::Failed(e)) => {
                assert_eq!(e, TransportError::RetriesExhausted { attempts: 5 });
                break;
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    // ~1s, ~2s, ~4s, ~8s, ~16s with up to 1s of jitter
    assert_eq!(delays.len(), 5);
    for (i, delay) in delays.iter().enumerate() {
        let base = Duration::from_secs(1 << i);
        assert!(*delay >= base, "delay {i} too short: {delay:?}");
        assert!(*delay <= base + Duration::from_secs(1), "delay {i} too long: {delay:?}");
    }

    // the first connect plus one per scheduled reconnect
    assert_eq!(connector.attempts(), 6);
    let times = connector.attempt_times();
    for (i, delay) in delays.iter().enumerate() {
        let gap = times[i + 1] - times[i];
        assert!(gap >= *delay && gap < *delay + Duration::from_millis(10));
    }

    assert!(events.next().await.is_none());
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert!(!channel.is_running());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempts(), 6);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_stop_cancels_pending_reconnect() {
    let connector = Arc::new(ScriptedConnector::new());
    let server = connector.accept();
    let channel = channel(&connector);

    // first attempt takes the accepted connection; drop it from the far side
    let mut events = channel.start(BOARD).unwrap();
    let mut status = channel.status();
    status
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .unwrap();
    drop(server);

    match events.next().await {
        Some(ChannelEvent::Reconnecting { attempt: 1, .. }) => {}
        other => panic!("unexpected {other:?}"),
    }
    channel.stop();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
    assert!(events.next().await.is_none());
    assert_eq!(channel.state(), ConnectionState::Disconnected);

    // stopping again is harmless
    channel.stop();
    assert_eq!(channel.state(), ConnectionState::Disconnected);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_restart_after_terminal_failure() {
    let connector = Arc::new(ScriptedConnector::new());
    let policy_config = SyncConfig {
        reconnect: kanban_sync::channel::ReconnectPolicy {
            max_attempts: 1,
            ..Default::default()
        },
        ..SyncConfig::default()
    };
    let channel = BoardChannel::new(connector.clone(), policy_config);

    let mut events = channel.start(BOARD).unwrap();
    while let Some(event) = events.next().await {
        if matches!(event, ChannelEvent::Failed(_)) {
            break;
        }
    }
    assert_eq!(connector.attempts(), 2);

    let _server = connector.accept();
    let _events = channel.start(BOARD).unwrap();
    let mut status = channel.status();
    status
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .unwrap();
    assert_eq!(connector.attempts(), 3);
    channel.stop();
}
