//! Test fixtures: an in-memory authority and a scriptable push connector.
//!
//! Compiled for this crate's own tests and behind the `test-support` feature for
//! integration tests and downstream crates.

use crate::api::{AllowedTransitions, ApiResult, BoardApi};
use crate::channel::{Connection, Connector, Frame};
use crate::error::{ApiError, TransportError};
use crate::transitions::TransitionMap;
use crate::types::{
    Activity, ActivityId, ActivityPage, Board, BoardActivity, BoardId, BoardPatch,
    ClarificationReceipt, Column, ColumnId, ColumnPatch, Execution, ExecutionId, ExecutionStatus,
    MoveTask, NewBoard, NewColumn, NewTask, NewTransition, NewWorkflow, OrderKey, StartExecution,
    Task, TaskId, TaskPatch, TaskRecord, Transition, TransitionId, TransitionPatch,
    WorkflowDefinition, WorkflowId, WorkflowPatch,
};
use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Scripted push connector
// ---------------------------------------------------------------------------

enum Outcome {
    Fail(TransportError),
    Hang,
    Accept(ScriptedConnection),
}

/// Connector that plays back a queue of scripted outcomes.
///
/// Each `connect` consumes the next outcome; once the queue is empty every
/// attempt is refused.
#[derive(Default)]
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Outcome>>,
    attempts: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next attempt fails with `error`
    pub fn fail(&self, error: TransportError) {
        lock(&self.script).push_back(Outcome::Fail(error));
    }

    /// Next attempt never completes
    pub fn hang(&self) {
        lock(&self.script).push_back(Outcome::Hang);
    }

    /// Next attempt succeeds; the returned handle plays the authority's side
    pub fn accept(&self) -> ServerEnd {
        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        lock(&self.script).push_back(Outcome::Accept(ScriptedConnection {
            incoming,
            outgoing,
            closed: closed.clone(),
        }));
        ServerEnd {
            to_client,
            from_client,
            closed,
        }
    }

    /// Number of connection attempts so far
    pub fn attempts(&self) -> usize {
        lock(&self.attempts).len()
    }

    /// URLs of every attempt, in order
    pub fn urls(&self) -> Vec<String> {
        lock(&self.attempts).iter().map(|(u, _)| u.clone()).collect()
    }

    /// Instants at which each attempt was made
    pub fn attempt_times(&self) -> Vec<Instant> {
        lock(&self.attempts).iter().map(|(_, t)| *t).collect()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        lock(&self.attempts).push((url.to_string(), Instant::now()));
        let next = lock(&self.script).pop_front();
        match next {
            Some(Outcome::Accept(connection)) => Ok(Box::new(connection)),
            Some(Outcome::Fail(error)) => Err(error),
            Some(Outcome::Hang) => {
                std::future::pending::<Result<Box<dyn Connection>, TransportError>>().await
            }
            None => Err(TransportError::socket("connection refused")),
        }
    }
}

struct ScriptedConnection {
    incoming: mpsc::UnboundedReceiver<Frame>,
    outgoing: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.outgoing
            .send(text)
            .map_err(|_| TransportError::socket("peer went away"))
    }

    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// The authority's end of a scripted connection.
///
/// Dropping it ends the client's stream.
pub struct ServerEnd {
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl ServerEnd {
    pub fn send_text(&self, text: &str) {
        let _ = self.to_client.send(Frame::Text(text.to_string()));
    }

    pub fn send_json(&self, value: serde_json::Value) {
        self.send_text(&value.to_string());
    }

    /// Close the connection from the authority's side
    pub fn close(&self, reason: Option<&str>) {
        let _ = self
            .to_client
            .send(Frame::Close(reason.map(str::to_string)));
    }

    /// Next text frame the client sent
    pub async fn next_sent(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Whether the client closed the connection
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// In-memory authority
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Authority {
    boards: IndexMap<BoardId, Board>,
    columns: IndexMap<ColumnId, Column>,
    tasks: IndexMap<TaskId, Task>,
    /// Tasks outside every column
    orphans: IndexMap<TaskId, TaskRecord>,
    workflows: IndexMap<WorkflowId, WorkflowDefinition>,
    executions: IndexMap<ExecutionId, Execution>,
    activities: Vec<Activity>,
    failures: HashMap<&'static str, VecDeque<ApiError>>,
    calls: Vec<String>,
}

impl Authority {
    fn active_workflow(&self, board_id: BoardId) -> Option<&WorkflowDefinition> {
        self.workflows
            .values()
            .find(|w| w.board_id == board_id && w.is_active)
    }

    fn board_columns(&self, board_id: BoardId) -> Vec<Column> {
        let mut columns: Vec<Column> = self
            .columns
            .values()
            .filter(|c| c.board_id == board_id)
            .cloned()
            .collect();
        columns.sort_by_key(|c| c.order);
        columns
    }

    fn has_task(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id) || self.orphans.contains_key(&id)
    }

    fn log_activity(&mut self, task: &Task, kind: &str, from: Option<ColumnId>) {
        self.activities.push(Activity {
            id: ActivityId::new(),
            task_id: task.id,
            board_id: task.board_id,
            activity_type: kind.to_string(),
            actor: "system".to_string(),
            from_column_id: from,
            to_column_id: Some(task.column_id),
            old_value: None,
            new_value: None,
            activity_metadata: Value::Object(Default::default()),
            created_at: Utc::now(),
            from_column_name: None,
            to_column_name: None,
            task_title: Some(task.title.clone()),
        });
    }

    /// Newest first, the page clamped like the authority's query bounds
    fn page_of<'a>(
        activities: impl DoubleEndedIterator<Item = &'a Activity>,
        page: u32,
        page_size: u32,
    ) -> (Vec<Activity>, u64) {
        let page = page.max(1) as usize;
        let page_size = page_size.clamp(1, 100) as usize;
        let all: Vec<&Activity> = activities.rev().collect();
        let items = all
            .iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .map(|a| (*a).clone())
            .collect();
        (items, all.len() as u64)
    }

    fn record(&mut self, op: &'static str) -> ApiResult<()> {
        self.calls.push(op.to_string());
        match self.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn not_found(what: &str, id: impl std::fmt::Display) -> ApiError {
    ApiError::status(404, format!("{what} {id} not found"))
}

/// In-memory [`BoardApi`] enforcing versions and workflow rules like the
/// real authority does.
#[derive(Default)]
pub struct FakeBoardApi {
    state: Mutex<Authority>,
    move_gate: Mutex<Option<Arc<Semaphore>>>,
}

/// Holds `move_task` calls until released
pub struct MoveGate {
    semaphore: Arc<Semaphore>,
}

impl MoveGate {
    /// Let one held move through
    pub fn release(&self) {
        self.semaphore.add_permits(1);
    }
}

impl FakeBoardApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a board with one column per name, in order. The first column is
    /// the start column and the last the end column.
    pub fn seed_board(&self, names: &[&str]) -> (BoardId, Vec<ColumnId>) {
        let board_id = BoardId::new();
        let mut state = lock(&self.state);
        state
            .boards
            .insert(board_id, Board::new(board_id, "Test board"));

        let mut ids = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let mut column = Column::new(ColumnId::new(), board_id, *name, i as i64);
            column.is_start_column = i == 0;
            column.is_end_column = i + 1 == names.len();
            ids.push(column.id);
            state.columns.insert(column.id, column);
        }
        (board_id, ids)
    }

    /// Seed a task at the end of `column_id`
    pub fn seed_task(&self, board_id: BoardId, column_id: ColumnId, title: &str) -> Task {
        let mut state = lock(&self.state);
        let last = state
            .tasks
            .values()
            .filter(|t| t.column_id == column_id)
            .map(|t| t.order)
            .max();
        let order = last.map(OrderKey::after).unwrap_or_else(OrderKey::first);
        let task = Task::new(TaskId::new(), board_id, column_id, title, order);
        state.tasks.insert(task.id, task.clone());
        task
    }

    /// Seed a task that sits outside every column, as the authority allows
    pub fn seed_orphan_task(&self, board_id: BoardId, title: &str) -> TaskRecord {
        let mut record = TaskRecord::from(Task::new(
            TaskId::new(),
            board_id,
            ColumnId::new(),
            title,
            OrderKey::first(),
        ));
        record.column_id = None;
        lock(&self.state).orphans.insert(record.id, record.clone());
        record
    }

    /// Seed an execution for `task_id` in the given status
    pub fn seed_execution(&self, task_id: TaskId, status: ExecutionStatus) -> Execution {
        let execution = Execution {
            status,
            ..Execution::started(ExecutionId::new(), task_id)
        };
        lock(&self.state)
            .executions
            .insert(execution.id, execution.clone());
        execution
    }

    /// The authority's copy of an execution
    pub fn execution(&self, id: ExecutionId) -> Option<Execution> {
        lock(&self.state).executions.get(&id).cloned()
    }

    /// Seed an active workflow allowing exactly `edges`
    pub fn seed_workflow(
        &self,
        board_id: BoardId,
        edges: &[(ColumnId, ColumnId)],
    ) -> WorkflowDefinition {
        let mut workflow = WorkflowDefinition::new(WorkflowId::new(), board_id, "Workflow");
        for (from, to) in edges {
            workflow = workflow.with_transition(*from, *to);
        }
        lock(&self.state)
            .workflows
            .insert(workflow.id, workflow.clone());
        workflow
    }

    /// Modify a task behind the client's back, bumping its version
    pub fn touch_task(&self, id: TaskId) -> Option<Task> {
        let mut state = lock(&self.state);
        let task = state.tasks.get_mut(&id)?;
        task.version += 1;
        Some(task.clone())
    }

    /// Fail the next call to `op` (the trait method name) with `error`
    pub fn fail_next(&self, op: &'static str, error: ApiError) {
        lock(&self.state)
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Hold every subsequent `move_task` until released through the gate
    pub fn gate_moves(&self) -> MoveGate {
        let semaphore = Arc::new(Semaphore::new(0));
        *lock(&self.move_gate) = Some(semaphore.clone());
        MoveGate { semaphore }
    }

    /// Names of the operations called so far
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    /// Number of times `op` was called
    pub fn call_count(&self, op: &str) -> usize {
        lock(&self.state).calls.iter().filter(|c| *c == op).count()
    }

    /// The authority's copy of a task
    pub fn task(&self, id: TaskId) -> Option<Task> {
        lock(&self.state).tasks.get(&id).cloned()
    }
}

#[async_trait]
impl BoardApi for FakeBoardApi {
    async fn list_boards(&self) -> ApiResult<Vec<Board>> {
        let mut state = lock(&self.state);
        state.record("list_boards")?;
        Ok(state.boards.values().cloned().collect())
    }

    async fn get_board(&self, id: BoardId) -> ApiResult<Board> {
        let mut state = lock(&self.state);
        state.record("get_board")?;
        state
            .boards
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("Board", id))
    }

    async fn create_board(&self, board: &NewBoard) -> ApiResult<Board> {
        let mut state = lock(&self.state);
        state.record("create_board")?;
        let mut created = Board::new(BoardId::new(), board.name.clone());
        created.description = board.description.clone();
        created.working_directory = board.working_directory.clone();
        state.boards.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_board(&self, id: BoardId, patch: &BoardPatch) -> ApiResult<Board> {
        let mut state = lock(&self.state);
        state.record("update_board")?;
        let board = state
            .boards
            .get_mut(&id)
            .ok_or_else(|| not_found("Board", id))?;
        if let Some(name) = &patch.name {
            board.name = name.clone();
        }
        if let Some(description) = &patch.description {
            board.description = Some(description.clone());
        }
        if let Some(dir) = &patch.working_directory {
            board.working_directory = Some(dir.clone());
        }
        Ok(board.clone())
    }

    async fn delete_board(&self, id: BoardId) -> ApiResult<()> {
        let mut state = lock(&self.state);
        state.record("delete_board")?;
        state
            .boards
            .shift_remove(&id)
            .ok_or_else(|| not_found("Board", id))?;
        state.columns.retain(|_, c| c.board_id != id);
        state.tasks.retain(|_, t| t.board_id != id);
        state.orphans.retain(|_, t| t.board_id != id);
        state.workflows.retain(|_, w| w.board_id != id);
        Ok(())
    }

    async fn list_columns(&self, board_id: BoardId) -> ApiResult<Vec<Column>> {
        let mut state = lock(&self.state);
        state.record("list_columns")?;
        Ok(state.board_columns(board_id))
    }

    async fn create_column(&self, board_id: BoardId, column: &NewColumn) -> ApiResult<Column> {
        let mut state = lock(&self.state);
        state.record("create_column")?;
        if !state.boards.contains_key(&board_id) {
            return Err(not_found("Board", board_id));
        }
        let order = column
            .order
            .unwrap_or_else(|| state.board_columns(board_id).len() as i64);
        let mut created = Column::new(ColumnId::new(), board_id, column.name.clone(), order);
        created.color = column.color.clone();
        created.wip_limit = column.wip_limit;
        state.columns.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_column(&self, id: ColumnId, patch: &ColumnPatch) -> ApiResult<Column> {
        let mut state = lock(&self.state);
        state.record("update_column")?;
        let column = state
            .columns
            .get_mut(&id)
            .ok_or_else(|| not_found("Column", id))?;
        if let Some(name) = &patch.name {
            column.name = name.clone();
        }
        if let Some(order) = patch.order {
            column.order = order;
        }
        if let Some(color) = &patch.color {
            column.color = Some(color.clone());
        }
        if let Some(limit) = patch.wip_limit {
            column.wip_limit = Some(limit);
        }
        Ok(column.clone())
    }

    async fn delete_column(&self, id: ColumnId) -> ApiResult<()> {
        let mut state = lock(&self.state);
        state.record("delete_column")?;
        state
            .columns
            .shift_remove(&id)
            .ok_or_else(|| not_found("Column", id))?;
        state.tasks.retain(|_, t| t.column_id != id);
        for workflow in state.workflows.values_mut() {
            workflow
                .transitions
                .retain(|t| t.from_column_id != id && t.to_column_id != id);
        }
        Ok(())
    }

    async fn list_tasks(&self, board_id: BoardId) -> ApiResult<Vec<TaskRecord>> {
        let mut state = lock(&self.state);
        state.record("list_tasks")?;
        let placed = state
            .tasks
            .values()
            .filter(|t| t.board_id == board_id)
            .cloned()
            .map(TaskRecord::from);
        let loose = state
            .orphans
            .values()
            .filter(|t| t.board_id == board_id)
            .cloned();
        Ok(placed.chain(loose).collect())
    }

    async fn get_task(&self, id: TaskId) -> ApiResult<Task> {
        let mut state = lock(&self.state);
        state.record("get_task")?;
        state
            .tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("Task", id))
    }

    async fn create_task(&self, board_id: BoardId, task: &NewTask) -> ApiResult<Task> {
        let mut state = lock(&self.state);
        state.record("create_task")?;
        if !state.boards.contains_key(&board_id) {
            return Err(not_found("Board", board_id));
        }
        let column_id = task.column_id;
        if !state
            .columns
            .get(&column_id)
            .is_some_and(|c| c.board_id == board_id)
        {
            return Err(ApiError::status(
                404,
                format!("Column {column_id} not found in board"),
            ));
        }
        let order = task.order.unwrap_or_else(|| {
            state
                .tasks
                .values()
                .filter(|t| t.column_id == column_id)
                .map(|t| t.order)
                .max()
                .map(OrderKey::after)
                .unwrap_or_else(OrderKey::first)
        });
        let mut created = Task::new(TaskId::new(), board_id, column_id, task.title.clone(), order)
            .with_priority(task.priority);
        created.description = task.description.clone();
        created.assignee = task.assignee.clone();
        created.labels = task.labels.clone();
        state.tasks.insert(created.id, created.clone());
        state.log_activity(&created, "created", None);
        Ok(created)
    }

    async fn update_task(&self, id: TaskId, patch: &TaskPatch) -> ApiResult<Task> {
        let mut state = lock(&self.state);
        state.record("update_task")?;
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| not_found("Task", id))?;
        if let Some(version) = patch.version {
            if version != task.version {
                return Err(ApiError::conflict("Task was modified by another user"));
            }
        }
        if let Some(title) = &patch.title {
            task.title = title.clone();
        }
        if let Some(description) = &patch.description {
            task.description = Some(description.clone());
        }
        if let Some(assignee) = &patch.assignee {
            task.assignee = Some(assignee.clone());
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(labels) = &patch.labels {
            task.labels = labels.clone();
        }
        task.version += 1;
        Ok(task.clone())
    }

    async fn delete_task(&self, id: TaskId) -> ApiResult<()> {
        let mut state = lock(&self.state);
        state.record("delete_task")?;
        let removed = state.tasks.shift_remove(&id).is_some();
        if removed || state.orphans.shift_remove(&id).is_some() {
            Ok(())
        } else {
            Err(not_found("Task", id))
        }
    }

    async fn move_task(&self, id: TaskId, body: &MoveTask) -> ApiResult<Task> {
        let gate = lock(&self.move_gate).clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let mut state = lock(&self.state);
        state.record("move_task")?;
        let board_id = state
            .tasks
            .get(&id)
            .map(|t| t.board_id)
            .ok_or_else(|| not_found("Task", id))?;
        let current = state
            .tasks
            .get(&id)
            .map(|t| (t.version, t.column_id))
            .ok_or_else(|| not_found("Task", id))?;

        if current.0 != body.version {
            return Err(ApiError::conflict("Task was modified by another user"));
        }
        if !state
            .columns
            .get(&body.column_id)
            .is_some_and(|c| c.board_id == board_id)
        {
            return Err(ApiError::status(
                404,
                format!("Column {} not found in board", body.column_id),
            ));
        }
        if let Some(workflow) = state.active_workflow(board_id) {
            let allowed = TransitionMap::build(
                &state.board_columns(board_id),
                Some(workflow.transitions.as_slice()),
            );
            if !allowed.is_allowed(current.1, body.column_id) {
                return Err(ApiError::Status {
                    status: 403,
                    code: Some("WORKFLOW_VIOLATION".to_string()),
                    message: "This transition is not allowed by the workflow".to_string(),
                });
            }
        }

        let task = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| not_found("Task", id))?;
        task.column_id = body.column_id;
        task.order = body.order;
        task.version += 1;
        let moved = task.clone();
        state.log_activity(&moved, "moved", Some(current.1));
        Ok(moved)
    }

    async fn list_workflows(&self, board_id: BoardId) -> ApiResult<Vec<WorkflowDefinition>> {
        let mut state = lock(&self.state);
        state.record("list_workflows")?;
        Ok(state
            .workflows
            .values()
            .filter(|w| w.board_id == board_id)
            .cloned()
            .collect())
    }

    async fn get_active_workflow(
        &self,
        board_id: BoardId,
    ) -> ApiResult<Option<WorkflowDefinition>> {
        let mut state = lock(&self.state);
        state.record("get_active_workflow")?;
        Ok(state.active_workflow(board_id).cloned())
    }

    async fn create_workflow(
        &self,
        board_id: BoardId,
        workflow: &NewWorkflow,
    ) -> ApiResult<WorkflowDefinition> {
        let mut state = lock(&self.state);
        state.record("create_workflow")?;
        if workflow.is_active {
            for existing in state.workflows.values_mut() {
                if existing.board_id == board_id {
                    existing.is_active = false;
                }
            }
        }
        let mut created =
            WorkflowDefinition::new(WorkflowId::new(), board_id, workflow.name.clone());
        created.description = workflow.description.clone();
        created.is_active = workflow.is_active;
        state.workflows.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_workflow(
        &self,
        id: WorkflowId,
        patch: &WorkflowPatch,
    ) -> ApiResult<WorkflowDefinition> {
        let mut state = lock(&self.state);
        state.record("update_workflow")?;
        let workflow = state
            .workflows
            .get_mut(&id)
            .ok_or_else(|| not_found("Workflow", id))?;
        if let Some(name) = &patch.name {
            workflow.name = name.clone();
        }
        if let Some(description) = &patch.description {
            workflow.description = Some(description.clone());
        }
        if let Some(active) = patch.is_active {
            workflow.is_active = active;
        }
        Ok(workflow.clone())
    }

    async fn delete_workflow(&self, id: WorkflowId) -> ApiResult<()> {
        let mut state = lock(&self.state);
        state.record("delete_workflow")?;
        state
            .workflows
            .shift_remove(&id)
            .map(|_| ())
            .ok_or_else(|| not_found("Workflow", id))
    }

    async fn create_transition(
        &self,
        workflow_id: WorkflowId,
        transition: &NewTransition,
    ) -> ApiResult<Transition> {
        let mut state = lock(&self.state);
        state.record("create_transition")?;
        let workflow = state
            .workflows
            .get_mut(&workflow_id)
            .ok_or_else(|| not_found("Workflow", workflow_id))?;
        if workflow.transitions.iter().any(|t| {
            t.from_column_id == transition.from_column_id
                && t.to_column_id == transition.to_column_id
        }) {
            return Err(ApiError::status(400, "This transition already exists"));
        }
        let mut created = Transition::new(
            workflow_id,
            transition.from_column_id,
            transition.to_column_id,
        );
        created.name = transition.name.clone();
        created.is_enabled = transition.is_enabled;
        workflow.transitions.push(created.clone());
        Ok(created)
    }

    async fn update_transition(
        &self,
        id: TransitionId,
        patch: &TransitionPatch,
    ) -> ApiResult<Transition> {
        let mut state = lock(&self.state);
        state.record("update_transition")?;
        let transition = state
            .workflows
            .values_mut()
            .flat_map(|w| w.transitions.iter_mut())
            .find(|t| t.id == id)
            .ok_or_else(|| not_found("Transition", id))?;
        if let Some(name) = &patch.name {
            transition.name = Some(name.clone());
        }
        if let Some(enabled) = patch.is_enabled {
            transition.is_enabled = enabled;
        }
        Ok(transition.clone())
    }

    async fn delete_transition(&self, id: TransitionId) -> ApiResult<()> {
        let mut state = lock(&self.state);
        state.record("delete_transition")?;
        let mut found = false;
        for workflow in state.workflows.values_mut() {
            let before = workflow.transitions.len();
            workflow.transitions.retain(|t| t.id != id);
            found |= workflow.transitions.len() != before;
        }
        if found {
            Ok(())
        } else {
            Err(not_found("Transition", id))
        }
    }

    async fn allowed_transitions(&self, board_id: BoardId) -> ApiResult<AllowedTransitions> {
        let mut state = lock(&self.state);
        state.record("allowed_transitions")?;
        let columns = state.board_columns(board_id);
        let map = TransitionMap::build(
            &columns,
            state.active_workflow(board_id).map(|w| w.transitions.as_slice()),
        );
        Ok(map
            .iter()
            .map(|(from, targets)| (*from, targets.iter().copied().collect()))
            .collect())
    }

    async fn start_execution(
        &self,
        task_id: TaskId,
        request: &StartExecution,
    ) -> ApiResult<Execution> {
        const WORKFLOW_TYPES: [&str; 4] = [
            "development",
            "quick_development",
            "architecture_only",
            "review_only",
        ];

        let mut state = lock(&self.state);
        state.record("start_execution")?;
        if !state.has_task(task_id) {
            return Err(not_found("Task", task_id));
        }
        if !WORKFLOW_TYPES.contains(&request.workflow_type.as_str()) {
            return Err(ApiError::status(
                400,
                format!(
                    "Invalid workflow_type. Must be one of: {}",
                    WORKFLOW_TYPES.join(", ")
                ),
            ));
        }
        let execution = Execution {
            status: ExecutionStatus::Pending,
            ..Execution::started(ExecutionId::new(), task_id)
        };
        state.executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn get_execution(&self, id: ExecutionId) -> ApiResult<Execution> {
        let mut state = lock(&self.state);
        state.record("get_execution")?;
        state
            .executions
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("Execution", id))
    }

    async fn list_task_executions(&self, task_id: TaskId) -> ApiResult<Vec<Execution>> {
        let mut state = lock(&self.state);
        state.record("list_task_executions")?;
        Ok(state
            .executions
            .values()
            .rev()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn cancel_execution(&self, id: ExecutionId) -> ApiResult<()> {
        let mut state = lock(&self.state);
        state.record("cancel_execution")?;
        let execution = state
            .executions
            .get_mut(&id)
            .ok_or_else(|| not_found("Execution", id))?;
        if !matches!(
            execution.status,
            ExecutionStatus::Pending | ExecutionStatus::Running
        ) {
            return Err(ApiError::status(
                400,
                format!("Execution {id} cannot be cancelled"),
            ));
        }
        execution.status = ExecutionStatus::Cancelled;
        Ok(())
    }

    async fn submit_clarification(
        &self,
        task_id: TaskId,
        answers: &Value,
    ) -> ApiResult<ClarificationReceipt> {
        let mut state = lock(&self.state);
        state.record("submit_clarification")?;
        if !state.has_task(task_id) {
            return Err(not_found("Task", task_id));
        }
        let waiting = state
            .executions
            .values_mut()
            .rev()
            .find(|e| e.task_id == task_id && e.status == ExecutionStatus::AwaitingClarification)
            .ok_or_else(|| {
                ApiError::status(400, "No execution awaiting clarification for this task")
            })?;
        waiting.status = ExecutionStatus::Completed;
        waiting.clarification_answers = Some(answers.clone());

        let resumed = Execution {
            clarification_answers: Some(answers.clone()),
            ..Execution::started(ExecutionId::new(), task_id)
        };
        state.executions.insert(resumed.id, resumed.clone());
        Ok(ClarificationReceipt {
            execution_id: resumed.id,
            task_id,
            status: resumed.status,
            message: Some("Planning resumed with clarification answers".to_string()),
        })
    }

    async fn list_task_activities(
        &self,
        task_id: TaskId,
        page: u32,
        page_size: u32,
    ) -> ApiResult<ActivityPage> {
        let mut state = lock(&self.state);
        state.record("list_task_activities")?;
        let (items, total) = Authority::page_of(
            state.activities.iter().filter(|a| a.task_id == task_id),
            page,
            page_size,
        );
        let page = page.max(1);
        let page_size = page_size.clamp(1, 100);
        Ok(ActivityPage {
            items,
            total,
            page,
            page_size,
            has_more: u64::from(page) * u64::from(page_size) < total,
        })
    }

    async fn list_board_activities(
        &self,
        board_id: BoardId,
        page: u32,
        page_size: u32,
    ) -> ApiResult<BoardActivity> {
        let mut state = lock(&self.state);
        state.record("list_board_activities")?;
        let (activities, total) = Authority::page_of(
            state.activities.iter().filter(|a| a.board_id == board_id),
            page,
            page_size,
        );
        Ok(BoardActivity { activities, total })
    }
}
