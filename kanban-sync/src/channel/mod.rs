//! Push channel: one long-lived connection per board with automatic reconnect.
//!
//! ```text
//! Disconnected --start--> Connecting --open--> Connected
//!      ^                      |                    |
//!      |                  fail/timeout         close/error
//!      |                      v                    v
//!      +---- budget spent -- Disconnected <--------+
//!                             | backoff
//!                             v
//!                         Connecting ...
//! ```
//!
//! `stop` ends the driver from any state. Inbound messages are decoded and
//! forwarded as [`ChannelEvent`]s to every [`ChannelEvents`] stream handed out by
//! [`BoardChannel::start`]. The streams end when the driver exits.

mod backoff;
mod message;
mod state;
mod transport;

pub use backoff::ReconnectPolicy;
pub use message::{parse_message, InboundEvent, PushMessage};
pub use state::ConnectionState;
pub use transport::{Connection, Connector, Frame, WsConnector};

use crate::config::SyncConfig;
use crate::error::{Result, TransportError};
use crate::types::BoardId;
use futures_util::stream::Stream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Text frame sent as an application-level heartbeat
const PING: &str = "ping";
/// Reply the authority sends to [`PING`]
const PONG: &str = "pong";

/// What a channel consumer receives
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A validated authoritative change
    Event(InboundEvent),
    /// The connection dropped and a reconnect is scheduled
    Reconnecting { attempt: u32, delay: Duration },
    /// The retry budget is spent; the channel is terminally disconnected
    Failed(TransportError),
}

/// Stream of [`ChannelEvent`]s for one run of the channel
#[derive(Debug)]
pub struct ChannelEvents {
    rx: broadcast::Receiver<ChannelEvent>,
}

impl ChannelEvents {
    /// Next event, or `None` once the channel has stopped or given up
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "channel consumer lagging; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Adapt into a `futures` stream
    pub fn into_stream(self) -> impl Stream<Item = ChannelEvent> {
        futures_util::stream::unfold(self, |mut events| async move {
            events.next().await.map(|event| (event, events))
        })
    }
}

struct Running {
    generation: u64,
    board_id: BoardId,
    stop: watch::Sender<bool>,
    events: broadcast::Sender<ChannelEvent>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    config: SyncConfig,
    state: Arc<watch::Sender<ConnectionState>>,
    running: Mutex<Option<Running>>,
    generation: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Handle to the push channel of one board
#[derive(Clone)]
pub struct BoardChannel {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for BoardChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardChannel")
            .field("state", &self.state())
            .field("board_id", &self.board_id())
            .finish()
    }
}

impl BoardChannel {
    pub fn new(connector: Arc<dyn Connector>, config: SyncConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                connector,
                config,
                state: Arc::new(state),
                running: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch connection state changes
    pub fn status(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Board the channel is running for, if any
    pub fn board_id(&self) -> Option<BoardId> {
        lock(&self.shared.running).as_ref().map(|r| r.board_id)
    }

    /// Whether a driver is alive, including while it waits to reconnect
    pub fn is_running(&self) -> bool {
        lock(&self.shared.running).is_some()
    }

    /// Start the channel for `board_id` and subscribe to its events.
    ///
    /// The identifier must be a canonical hyphenated UUID and the configuration
    /// must validate; otherwise this fails before a connection is attempted and
    /// the channel stays disconnected. If the channel is already running for
    /// the same board this only adds a subscriber. Running for another board
    /// stops that run first. Must be called within a tokio runtime.
    pub fn start(&self, board_id: &str) -> Result<ChannelEvents> {
        let board_id = BoardId::parse(board_id)?;
        self.shared.config.validate()?;
        let url = self.shared.config.channel_url(board_id)?;

        let mut running = lock(&self.shared.running);
        if let Some(current) = running.as_ref() {
            if current.board_id == board_id {
                debug!(%board_id, state = %self.state(), "channel already running");
                return Ok(ChannelEvents {
                    rx: current.events.subscribe(),
                });
            }
            info!(from = %current.board_id, to = %board_id, "switching push channel board");
            let _ = current.stop.send(true);
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (stop_tx, stop_rx) = watch::channel(false);
        let (events_tx, events_rx) = broadcast::channel(self.shared.config.event_buffer.max(1));

        self.shared.state.send_replace(ConnectionState::Connecting);

        let driver = Driver {
            connector: self.shared.connector.clone(),
            url,
            board_id,
            connect_timeout: self.shared.config.connect_timeout(),
            heartbeat: self.shared.config.heartbeat_interval(),
            policy: self.shared.config.reconnect.clone(),
            state: self.shared.state.clone(),
            events: events_tx.clone(),
            stop: stop_rx,
            shared: Arc::downgrade(&self.shared),
            generation,
        };

        *running = Some(Running {
            generation,
            board_id,
            stop: stop_tx,
            events: events_tx,
        });
        drop(running);

        tokio::spawn(driver.run());
        Ok(ChannelEvents { rx: events_rx })
    }

    /// Stop the channel. Idempotent.
    ///
    /// Any pending reconnect is cancelled and the open connection, if any, is
    /// closed without logging a failure. Event streams end.
    pub fn stop(&self) {
        let running = lock(&self.shared.running).take();
        if let Some(running) = running {
            debug!(board_id = %running.board_id, "stopping push channel");
            let _ = running.stop.send(true);
        }
        self.shared.state.send_replace(ConnectionState::Disconnected);
    }
}

enum Attempt {
    Open(Box<dyn Connection>),
    Failed(TransportError),
    Stopped,
}

enum Exit {
    Lost(TransportError),
    Stopped,
}

struct Driver {
    connector: Arc<dyn Connector>,
    url: String,
    board_id: BoardId,
    connect_timeout: Duration,
    heartbeat: Duration,
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<ConnectionState>>,
    events: broadcast::Sender<ChannelEvent>,
    stop: watch::Receiver<bool>,
    shared: Weak<Shared>,
    generation: u64,
}

impl Driver {
    fn stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// A stopped driver never touches the shared state; a newer run may own it
    fn set_state(&self, next: ConnectionState) {
        if self.stopped() {
            return;
        }
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                trace!(board_id = %self.board_id, from = %current, to = %next, "connection state");
                *current = next;
                true
            }
        });
    }

    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            if self.stopped() {
                return;
            }
            self.set_state(ConnectionState::Connecting);
            info!(board_id = %self.board_id, attempt, "connecting push channel");

            let failure = match self.connect().await {
                Attempt::Stopped => return,
                Attempt::Failed(e) => e,
                Attempt::Open(mut connection) => {
                    attempt = 0;
                    self.set_state(ConnectionState::Connected);
                    info!(board_id = %self.board_id, "push channel connected");
                    match self.pump(connection.as_mut()).await {
                        Exit::Stopped => return,
                        Exit::Lost(e) => e,
                    }
                }
            };

            if self.stopped() {
                return;
            }
            self.set_state(ConnectionState::Disconnected);

            attempt += 1;
            if self.policy.is_exhausted(attempt) {
                let attempts = attempt - 1;
                error!(
                    board_id = %self.board_id,
                    attempts,
                    error = %failure,
                    "push channel reconnect budget exhausted"
                );
                let _ = self
                    .events
                    .send(ChannelEvent::Failed(TransportError::RetriesExhausted { attempts }));
                self.release();
                return;
            }

            let delay = self.policy.delay(attempt);
            warn!(
                board_id = %self.board_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "push channel disconnected, scheduling reconnect"
            );
            let _ = self
                .events
                .send(ChannelEvent::Reconnecting { attempt, delay });

            tokio::select! {
                biased;
                _ = self.stop.changed() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn connect(&mut self) -> Attempt {
        let timeout_ms = self.connect_timeout.as_millis() as u64;
        tokio::select! {
            biased;
            _ = self.stop.changed() => Attempt::Stopped,
            result = tokio::time::timeout(self.connect_timeout, self.connector.connect(&self.url)) => {
                match result {
                    Ok(Ok(connection)) => Attempt::Open(connection),
                    Ok(Err(e)) => Attempt::Failed(e),
                    Err(_) => Attempt::Failed(TransportError::ConnectTimeout { timeout_ms }),
                }
            }
        }
    }

    async fn pump(&mut self, connection: &mut dyn Connection) -> Exit {
        let mut heartbeat =
            tokio::time::interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.stop.changed() => {
                    connection.close().await;
                    return Exit::Stopped;
                }
                frame = connection.next_frame() => match frame {
                    Some(Ok(Frame::Text(text))) => self.dispatch(&text),
                    Some(Ok(Frame::Close(reason))) => {
                        return Exit::Lost(TransportError::Closed { reason });
                    }
                    Some(Err(e)) => return Exit::Lost(e),
                    None => return Exit::Lost(TransportError::Closed { reason: None }),
                },
                _ = heartbeat.tick() => {
                    trace!(board_id = %self.board_id, "heartbeat");
                    if let Err(e) = connection.send_text(PING.to_string()).await {
                        return Exit::Lost(e);
                    }
                }
            }
        }
    }

    fn dispatch(&self, text: &str) {
        if text == PONG {
            return;
        }

        match parse_message(text) {
            Ok(Some(PushMessage::Connected { board_id })) => {
                info!(board_id = %self.board_id, acknowledged = ?board_id, "push channel greeting");
            }
            Ok(Some(PushMessage::Event(event))) => {
                debug!(board_id = %self.board_id, kind = event.kind(), "push event");
                let _ = self.events.send(ChannelEvent::Event(event));
            }
            Ok(None) => {
                debug!(board_id = %self.board_id, "ignoring unrecognised push message");
            }
            Err(e) => {
                warn!(board_id = %self.board_id, error = %e, "dropping malformed push message");
            }
        }
    }

    /// Clear the running slot if it still belongs to this run
    fn release(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut running = lock(&shared.running);
        if running
            .as_ref()
            .is_some_and(|r| r.generation == self.generation)
        {
            *running = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedConnector;
    use serde_json::json;

    const BOARD: &str = "11111111-1111-4111-8111-111111111111";

    fn channel(connector: &Arc<ScriptedConnector>) -> BoardChannel {
        BoardChannel::new(connector.clone(), SyncConfig::default())
    }

    #[tokio::test]
    async fn test_initial_state() {
        let connector = Arc::new(ScriptedConnector::new());
        let channel = channel(&connector);
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(!channel.is_running());
    }

    #[tokio::test]
    async fn test_malformed_board_id_fails_fast() {
        let connector = Arc::new(ScriptedConnector::new());
        let channel = channel(&connector);

        let err = channel.start("not-a-uuid").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        let err = channel
            .start("11111111111141118111111111111111")
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);

        tokio::task::yield_now().await;
        assert_eq!(connector.attempts(), 0);
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_connecting() {
        let connector = Arc::new(ScriptedConnector::new());
        let _server = connector.accept();
        let config = SyncConfig {
            heartbeat_interval_ms: 0,
            ..SyncConfig::default()
        };
        let channel = BoardChannel::new(connector.clone(), config);

        let err = channel.start(BOARD).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);

        tokio::task::yield_now().await;
        assert_eq!(connector.attempts(), 0);
        assert!(!channel.is_running());
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_and_forwards_events() {
        let connector = Arc::new(ScriptedConnector::new());
        let server = connector.accept();
        let channel = channel(&connector);
        let mut status = channel.status();

        let mut events = channel.start(BOARD).unwrap();
        status
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        assert_eq!(
            connector.urls(),
            vec![format!("ws://localhost:8000/api/ws/boards/{BOARD}")]
        );

        server.send_json(json!({"type": "connected", "payload": {"board_id": BOARD}}));
        server.send_text("{broken");
        server.send_json(json!({"type": "echo", "payload": {}}));
        server.send_json(json!({
            "type": "task_deleted",
            "payload": {"task_id": "22222222-2222-4222-8222-222222222222"}
        }));

        match events.next().await {
            Some(ChannelEvent::Event(InboundEvent::TaskDeleted { task_id })) => {
                assert_eq!(task_id.to_string(), "22222222-2222-4222-8222-222222222222");
            }
            other => panic!("unexpected {other:?}"),
        }
        channel.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_connected_is_noop() {
        let connector = Arc::new(ScriptedConnector::new());
        let _server = connector.accept();
        let channel = channel(&connector);
        let mut status = channel.status();

        let _events = channel.start(BOARD).unwrap();
        status
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        let _again = channel.start(BOARD).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(channel.state(), ConnectionState::Connected);
        channel.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_sends_ping() {
        let connector = Arc::new(ScriptedConnector::new());
        let mut server = connector.accept();
        let channel = channel(&connector);
        let _events = channel.start(BOARD).unwrap();

        let sent = server.next_sent().await;
        assert_eq!(sent.as_deref(), Some(PING));
        server.send_text(PONG);
        channel.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_counts_as_failure() {
        let connector = Arc::new(ScriptedConnector::new());
        connector.hang();
        let _server = connector.accept();
        let channel = channel(&connector);
        let mut status = channel.status();

        let mut events = channel.start(BOARD).unwrap();
        match events.next().await {
            Some(ChannelEvent::Reconnecting { attempt, .. }) => assert_eq!(attempt, 1),
            other => panic!("unexpected {other:?}"),
        }
        status
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        assert_eq!(connector.attempts(), 2);
        channel.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_resets_attempt_counter() {
        let connector = Arc::new(ScriptedConnector::new());
        connector.fail(TransportError::socket("refused"));
        let server = connector.accept();
        let _second = connector.accept();
        let channel = channel(&connector);

        let mut events = channel.start(BOARD).unwrap();
        assert!(matches!(
            events.next().await,
            Some(ChannelEvent::Reconnecting { attempt: 1, .. })
        ));

        // wait for the first accepted connection, then drop it
        let mut status = channel.status();
        status
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        server.close(Some("restart"));

        assert!(matches!(
            events.next().await,
            Some(ChannelEvent::Reconnecting { attempt: 1, .. })
        ));
        channel.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_silent() {
        let connector = Arc::new(ScriptedConnector::new());
        let server = connector.accept();
        let channel = channel(&connector);
        let mut status = channel.status();

        let mut events = channel.start(BOARD).unwrap();
        status
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        channel.stop();
        channel.stop();
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(events.next().await.is_none());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(server.is_closed());
        assert_eq!(connector.attempts(), 1);
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }
}
