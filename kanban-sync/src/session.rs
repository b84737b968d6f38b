//! One board kept in sync: store, execution tracker and push channel wired
//! together.

use crate::api::{BoardApi, HttpBoardApi};
use crate::channel::{
    BoardChannel, ChannelEvent, ChannelEvents, ConnectionState, Connector, InboundEvent,
    WsConnector,
};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError, TransportError};
use crate::execution::ExecutionTracker;
use crate::store::{BoardStore, Neighbors, StoreChange};
use crate::types::{
    ActivityPage, BoardActivity, BoardId, ClarificationReceipt, ColumnId, Execution, ExecutionId,
    StartExecution, Task, TaskId,
};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Entry point for a client of one board
#[derive(Debug)]
pub struct SyncSession {
    store: BoardStore,
    tracker: ExecutionTracker,
    channel: BoardChannel,
    pump: Mutex<Option<JoinHandle<()>>>,
    failure: Arc<watch::Sender<Option<TransportError>>>,
}

impl SyncSession {
    pub fn new(api: Arc<dyn BoardApi>, connector: Arc<dyn Connector>, config: SyncConfig) -> Self {
        let buffer = config.event_buffer;
        Self {
            store: BoardStore::with_buffer(api, buffer),
            tracker: ExecutionTracker::with_buffer(buffer),
            channel: BoardChannel::new(connector, config),
            pump: Mutex::new(None),
            failure: Arc::new(watch::channel(None).0),
        }
    }

    /// Session talking to the authority over HTTP and websockets
    pub fn from_config(config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let api = HttpBoardApi::from_config(&config)?;
        Ok(Self::new(Arc::new(api), Arc::new(WsConnector::new()), config))
    }

    pub fn store(&self) -> &BoardStore {
        &self.store
    }

    pub fn tracker(&self) -> &ExecutionTracker {
        &self.tracker
    }

    pub fn channel(&self) -> &BoardChannel {
        &self.channel
    }

    /// Current connection state of the push channel
    pub fn connection_state(&self) -> ConnectionState {
        self.channel.state()
    }

    /// Watch connection state changes
    pub fn status(&self) -> watch::Receiver<ConnectionState> {
        self.channel.status()
    }

    /// Watch for the push channel giving up.
    ///
    /// Holds the terminal error once reconnecting is exhausted, until the next
    /// [`start`](Self::start) clears it.
    pub fn failures(&self) -> watch::Receiver<Option<TransportError>> {
        self.failure.subscribe()
    }

    /// Terminal error of the current run, if the push channel gave up
    pub fn failure(&self) -> Option<TransportError> {
        self.failure.borrow().clone()
    }

    /// Load `board_id` and keep it in sync until [`stop`](Self::stop).
    ///
    /// Starting the board that is already running does nothing. The channel is
    /// opened before the initial load so no push event is lost in between;
    /// events buffered during the load are merged after it.
    pub async fn start(&self, board_id: &str) -> Result<()> {
        let id = BoardId::parse(board_id)?;
        if self.channel.is_running() && self.channel.board_id() == Some(id) && self.pump_alive() {
            return Ok(());
        }
        self.stop();

        let events = self.channel.start(board_id)?;
        if let Err(e) = self.store.load_board(id).await {
            self.channel.stop();
            return Err(e);
        }
        self.tracker.clear();
        self.failure.send_replace(None);

        let handle = tokio::spawn(pump(
            events,
            self.store.clone(),
            self.tracker.clone(),
            self.failure.clone(),
        ));
        *self.lock_pump() = Some(handle);
        info!(board_id = %id, "sync session started");
        Ok(())
    }

    /// Stop syncing. Local state is kept. Idempotent.
    pub fn stop(&self) {
        self.channel.stop();
        if let Some(handle) = self.lock_pump().take() {
            handle.abort();
        }
    }

    /// Validate, apply and commit a move; see [`BoardStore::request_move`]
    pub async fn request_move(
        &self,
        task_id: TaskId,
        target_column_id: ColumnId,
        neighbors: Neighbors,
    ) -> Result<Task> {
        self.store
            .request_move(task_id, target_column_id, neighbors)
            .await
    }

    pub fn is_transition_allowed(&self, from: ColumnId, to: ColumnId) -> bool {
        self.store.is_transition_allowed(from, to)
    }

    // -- executions --

    /// Start an automated execution for a task and track it
    pub async fn start_execution(
        &self,
        task_id: TaskId,
        request: &StartExecution,
    ) -> Result<Execution> {
        let execution = self.store.api().start_execution(task_id, request).await?;
        info!(
            %task_id,
            execution_id = %execution.id,
            workflow = %request.workflow_type,
            "execution started"
        );
        self.tracker
            .apply(&InboundEvent::ExecutionStarted(execution.clone()));
        Ok(execution)
    }

    /// Cancel an execution and track its final record
    pub async fn cancel_execution(&self, id: ExecutionId) -> Result<Execution> {
        let api = self.store.api();
        api.cancel_execution(id).await?;
        let execution = api.get_execution(id).await?;
        info!(execution_id = %id, status = ?execution.status, "execution cancelled");
        self.tracker
            .apply(&InboundEvent::ExecutionUpdated(execution.clone()));
        Ok(execution)
    }

    /// Answer the clarification questions of a task's execution.
    ///
    /// The execution resuming the work replaces the one that asked.
    pub async fn answer_clarification(
        &self,
        task_id: TaskId,
        answers: Value,
    ) -> Result<ClarificationReceipt> {
        let api = self.store.api();
        let receipt = api.submit_clarification(task_id, &answers).await?;
        let resumed = api.get_execution(receipt.execution_id).await?;
        debug!(%task_id, execution_id = %resumed.id, "clarification answered");
        self.tracker.apply(&InboundEvent::ExecutionStarted(resumed));
        Ok(receipt)
    }

    /// Execution history of a task, most recent first
    pub async fn execution_history(&self, task_id: TaskId) -> Result<Vec<Execution>> {
        Ok(self.store.api().list_task_executions(task_id).await?)
    }

    // -- activity --

    pub async fn task_activity(
        &self,
        task_id: TaskId,
        page: u32,
        page_size: u32,
    ) -> Result<ActivityPage> {
        Ok(self
            .store
            .api()
            .list_task_activities(task_id, page, page_size)
            .await?)
    }

    /// Activity feed of the loaded board
    pub async fn board_activity(&self, page: u32, page_size: u32) -> Result<BoardActivity> {
        let board_id = self.store.board_id().ok_or(SyncError::NoActiveBoard)?;
        Ok(self
            .store
            .api()
            .list_board_activities(board_id, page, page_size)
            .await?)
    }

    fn lock_pump(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pump.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pump_alive(&self) -> bool {
        self.lock_pump().as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Route channel events into the store and the tracker until the stream ends
async fn pump(
    mut events: ChannelEvents,
    store: BoardStore,
    tracker: ExecutionTracker,
    failure: Arc<watch::Sender<Option<TransportError>>>,
) {
    while let Some(event) = events.next().await {
        match event {
            ChannelEvent::Event(event) => route(&event, &store, &tracker),
            ChannelEvent::Reconnecting { attempt, delay } => {
                warn!(attempt, delay_ms = delay.as_millis() as u64, "push channel reconnecting");
            }
            ChannelEvent::Failed(e) => {
                error!(error = %e, "push channel gave up");
                failure.send_replace(Some(e));
            }
        }
    }
}

fn route(event: &InboundEvent, store: &BoardStore, tracker: &ExecutionTracker) {
    if !event.is_board_event() {
        tracker.apply(event);
        return;
    }
    if let Some(StoreChange::ColumnRemoved { removed_tasks, .. }) = store.merge_event(event) {
        for task_id in removed_tasks {
            tracker.forget(task_id);
        }
    }
    match event {
        InboundEvent::TaskDeleted { task_id } | InboundEvent::TaskUnassigned { task_id, .. } => {
            tracker.forget(*task_id);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ReconnectPolicy;
    use crate::error::ErrorKind;
    use crate::test_support::{FakeBoardApi, ScriptedConnector};
    use crate::types::{ExecutionStatus, NewTask};
    use serde_json::json;

    /// Session over a fake authority holding one board with one task in its
    /// first column; the push channel is not started
    async fn idle_session(
        columns: &[&str],
    ) -> (Arc<FakeBoardApi>, SyncSession, Vec<ColumnId>, Task) {
        let api = Arc::new(FakeBoardApi::new());
        let (board_id, column_ids) = api.seed_board(columns);
        let task = api.seed_task(board_id, column_ids[0], "Write docs");
        let session = SyncSession::new(
            api.clone(),
            Arc::new(ScriptedConnector::new()),
            SyncConfig::default(),
        );
        session.store().load_board(board_id).await.unwrap();
        (api, session, column_ids, task)
    }

    #[test]
    fn test_route_splits_board_and_execution_events() {
        let store = BoardStore::new(Arc::new(FakeBoardApi::new()));
        let tracker = ExecutionTracker::new();
        let task_id = TaskId::new();

        let started = Execution::started(ExecutionId::new(), task_id);
        route(&InboundEvent::ExecutionStarted(started), &store, &tracker);
        assert!(tracker.latest(task_id).is_some());

        route(&InboundEvent::TaskDeleted { task_id }, &store, &tracker);
        assert!(tracker.latest(task_id).is_none());
    }

    #[tokio::test]
    async fn test_column_deletion_forgets_executions_of_its_tasks() {
        let (_api, session, columns, task) = idle_session(&["Todo", "Done"]).await;
        let tracker = session.tracker();
        let running = Execution::started(ExecutionId::new(), task.id);
        route(&InboundEvent::ExecutionStarted(running), session.store(), tracker);

        let elsewhere = TaskId::new();
        let other = Execution::started(ExecutionId::new(), elsewhere);
        route(&InboundEvent::ExecutionStarted(other), session.store(), tracker);

        route(
            &InboundEvent::ColumnDeleted {
                column_id: columns[0],
            },
            session.store(),
            tracker,
        );
        assert!(tracker.latest(task.id).is_none());
        assert!(tracker.latest(elsewhere).is_some());
    }

    #[tokio::test]
    async fn test_start_and_cancel_execution() {
        let (api, session, _, task) = idle_session(&["Todo"]).await;

        let execution = session
            .start_execution(task.id, &StartExecution::default())
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Pending);
        assert_eq!(session.tracker().latest(task.id).unwrap().id, execution.id);
        assert_eq!(session.tracker().active().len(), 1);

        let cancelled = session.cancel_execution(execution.id).await.unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
        assert_eq!(
            session.tracker().latest(task.id).unwrap().status,
            ExecutionStatus::Cancelled
        );
        assert!(session.tracker().active().is_empty());

        let err = session.cancel_execution(execution.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Application);
        assert_eq!(
            api.execution(execution.id).unwrap().status,
            ExecutionStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_start_execution_rejected_leaves_tracker() {
        let (_api, session, _, task) = idle_session(&["Todo"]).await;

        let err = session
            .start_execution(task.id, &StartExecution::new("deploy"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Application);

        let err = session
            .start_execution(TaskId::new(), &StartExecution::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(session.tracker().latest(task.id).is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_answer_clarification_tracks_resumed_execution() {
        let (api, session, _, task) = idle_session(&["Todo"]).await;
        let waiting = api.seed_execution(task.id, ExecutionStatus::AwaitingClarification);
        session
            .tracker()
            .apply(&InboundEvent::ExecutionStarted(waiting.clone()));
        assert_eq!(session.tracker().awaiting_clarification().len(), 1);

        let answers = json!({"0": "postgres"});
        let receipt = session
            .answer_clarification(task.id, answers.clone())
            .await
            .unwrap();
        assert_eq!(receipt.task_id, task.id);
        assert_eq!(receipt.status, ExecutionStatus::Running);

        let latest = session.tracker().latest(task.id).unwrap();
        assert_eq!(latest.id, receipt.execution_id);
        assert_eq!(latest.clarification_answers, Some(answers.clone()));
        assert!(session.tracker().awaiting_clarification().is_empty());
        assert_eq!(
            api.execution(waiting.id).unwrap().status,
            ExecutionStatus::Completed
        );

        // nothing left to answer
        let err = session
            .answer_clarification(task.id, answers)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Application);
    }

    #[tokio::test]
    async fn test_execution_history_newest_first() {
        let (api, session, _, task) = idle_session(&["Todo"]).await;
        let first = api.seed_execution(task.id, ExecutionStatus::Failed);
        let second = session
            .start_execution(task.id, &StartExecution::new("review_only"))
            .await
            .unwrap();

        let history = session.execution_history(task.id).await.unwrap();
        let ids: Vec<ExecutionId> = history.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_activity_feeds() {
        let (_api, session, columns, task) = idle_session(&["Todo", "Done"]).await;
        let created = session
            .store()
            .create_task(&NewTask::new("Ship it", columns[0]))
            .await
            .unwrap();
        session
            .request_move(created.id, columns[1], Neighbors::none())
            .await
            .unwrap();

        let page = session.task_activity(created.id, 1, 50).await.unwrap();
        let kinds: Vec<&str> = page.items.iter().map(|a| a.activity_type.as_str()).collect();
        assert_eq!(kinds, vec!["moved", "created"]);
        assert_eq!(page.items[0].from_column_id, Some(columns[0]));
        assert!(!page.has_more);

        let first = session.task_activity(created.id, 1, 1).await.unwrap();
        assert_eq!(first.total, 2);
        assert!(first.has_more);

        let feed = session.board_activity(1, 50).await.unwrap();
        assert_eq!(feed.total, 2);
        assert!(feed.activities.iter().all(|a| a.task_id != task.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_failure_is_surfaced() {
        let api = Arc::new(FakeBoardApi::new());
        let (board_id, _) = api.seed_board(&["Todo"]);
        let connector = Arc::new(ScriptedConnector::new());
        let server = connector.accept();
        let config = SyncConfig {
            reconnect: ReconnectPolicy {
                max_attempts: 1,
                ..ReconnectPolicy::default()
            },
            ..SyncConfig::default()
        };
        let session = SyncSession::new(api, connector.clone(), config);
        let mut failures = session.failures();

        session.start(&board_id.to_string()).await.unwrap();
        session
            .status()
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        assert!(session.failure().is_none());

        server.close(Some("going away"));
        failures.wait_for(Option::is_some).await.unwrap();
        assert!(matches!(
            session.failure(),
            Some(TransportError::RetriesExhausted { .. })
        ));
        assert!(!session.channel().is_running());

        // a fresh start clears the failure
        let _server = connector.accept();
        session.start(&board_id.to_string()).await.unwrap();
        assert!(session.failure().is_none());
        session.stop();
    }

    #[tokio::test]
    async fn test_start_rejects_malformed_board_id() {
        let connector = Arc::new(ScriptedConnector::new());
        let session = SyncSession::new(
            Arc::new(FakeBoardApi::new()),
            connector.clone(),
            SyncConfig::default(),
        );

        let err = session.start("not-a-uuid").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        assert_eq!(connector.attempts(), 0);
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_failed_load_stops_channel() {
        let connector = Arc::new(ScriptedConnector::new());
        let _server = connector.accept();
        let session = SyncSession::new(
            Arc::new(FakeBoardApi::new()),
            connector.clone(),
            SyncConfig::default(),
        );

        let err = session.start(&BoardId::new().to_string()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
        assert!(!session.channel().is_running());
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    }
}
