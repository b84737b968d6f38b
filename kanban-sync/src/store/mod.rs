//! In-memory mirror of one board.
//!
//! [`BoardStore`] is a cheap cloneable handle. All collections live behind one
//! lock that is only held for short synchronous sections, never across a call
//! to the authority, so every change is applied atomically as seen by readers.
//! Observers subscribe to [`StoreChange`] notifications and read state through
//! [`BoardStore::snapshot`] or the query helpers.

mod crud;
mod merge;
mod optimistic;

pub use optimistic::{Neighbors, TaskSnapshot};

use crate::api::BoardApi;
use crate::transitions::TransitionMap;
use crate::types::{Board, BoardId, Column, ColumnId, Task, TaskId, WorkflowDefinition};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

/// Default capacity of the change notification buffer
pub const DEFAULT_CHANGE_BUFFER: usize = 256;

/// Why a task changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeCause {
    /// Applied ahead of the authority
    Optimistic,
    /// Replaced with the authority's answer to our own write
    Committed,
    /// Restored after the authority rejected our write
    RolledBack,
    /// Pushed by the authority
    Remote,
}

/// Notification sent to store subscribers after a change is applied
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    /// The whole board was (re)loaded
    Loaded { board_id: BoardId },
    /// Local state was cleared
    Cleared,
    BoardChanged,
    ColumnChanged { column_id: ColumnId },
    ColumnRemoved {
        column_id: ColumnId,
        removed_tasks: Vec<TaskId>,
    },
    TaskChanged { task_id: TaskId, cause: ChangeCause },
    TaskRemoved { task_id: TaskId },
    /// The workflow or the adjacency derived from it changed
    WorkflowChanged,
}

/// Owned copy of everything the store holds
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardState {
    pub board: Option<Board>,
    /// Columns in display order
    pub columns: IndexMap<ColumnId, Column>,
    /// Tasks in local insertion order, used to break order-key ties
    pub tasks: IndexMap<TaskId, Task>,
    pub workflow: Option<WorkflowDefinition>,
    transitions: TransitionMap,
}

impl BoardState {
    /// Current adjacency
    pub fn transitions(&self) -> &TransitionMap {
        &self.transitions
    }

    pub fn board_id(&self) -> Option<BoardId> {
        self.board.as_ref().map(|b| b.id)
    }

    /// Tasks of a column sorted by order key; ties keep insertion order
    pub fn tasks_in_column(&self, column_id: ColumnId) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| t.column_id == column_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.order);
        tasks
    }

    /// Rebuild the adjacency from the columns and the workflow's transitions,
    /// discarding transient edits
    pub(crate) fn rebuild_transitions(&mut self) {
        let columns: Vec<Column> = self.columns.values().cloned().collect();
        self.transitions = TransitionMap::build(
            &columns,
            self.workflow.as_ref().map(|w| w.transitions.as_slice()),
        );
    }

    /// Keep columns in display order
    pub(crate) fn sort_columns(&mut self) {
        self.columns.sort_by(|_, a, _, b| a.order.cmp(&b.order));
    }
}

struct Inner {
    api: Arc<dyn BoardApi>,
    state: Mutex<BoardState>,
    changes: broadcast::Sender<StoreChange>,
}

/// Handle to the board mirror
#[derive(Clone)]
pub struct BoardStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BoardStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("BoardStore")
            .field("board_id", &state.board_id())
            .field("columns", &state.columns.len())
            .field("tasks", &state.tasks.len())
            .finish()
    }
}

impl BoardStore {
    /// Create an empty store backed by `api`
    pub fn new(api: Arc<dyn BoardApi>) -> Self {
        Self::with_buffer(api, DEFAULT_CHANGE_BUFFER)
    }

    /// Create an empty store with a custom notification buffer size
    pub fn with_buffer(api: Arc<dyn BoardApi>, buffer: usize) -> Self {
        let (changes, _) = broadcast::channel(buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                api,
                state: Mutex::new(BoardState::default()),
                changes,
            }),
        }
    }

    pub(crate) fn api(&self) -> &dyn BoardApi {
        self.inner.api.as_ref()
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, BoardState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn notify(&self, change: StoreChange) {
        // no subscribers is fine
        let _ = self.inner.changes.send(change);
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.changes.subscribe()
    }

    /// Owned copy of the current state
    pub fn snapshot(&self) -> BoardState {
        self.state().clone()
    }

    /// Id of the loaded board
    pub fn board_id(&self) -> Option<BoardId> {
        self.state().board_id()
    }

    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.state().tasks.get(&id).cloned()
    }

    pub fn column(&self, id: ColumnId) -> Option<Column> {
        self.state().columns.get(&id).cloned()
    }

    /// Tasks of a column sorted by order key
    pub fn tasks_in_column(&self, column_id: ColumnId) -> Vec<Task> {
        self.state().tasks_in_column(column_id)
    }

    /// Whether the current adjacency allows moving from `from` to `to`
    pub fn is_transition_allowed(&self, from: ColumnId, to: ColumnId) -> bool {
        self.state().transitions.is_allowed(from, to)
    }

    /// Copy of the current adjacency
    pub fn transitions(&self) -> TransitionMap {
        self.state().transitions.clone()
    }

    /// Add an edge to the adjacency ahead of the authority; undone by the next rebuild
    pub fn add_transition_edge(&self, from: ColumnId, to: ColumnId) {
        self.state().transitions.add_edge(from, to);
        self.notify(StoreChange::WorkflowChanged);
    }

    /// Remove an edge from the adjacency ahead of the authority; undone by the next rebuild
    pub fn remove_transition_edge(&self, from: ColumnId, to: ColumnId) {
        self.state().transitions.remove_edge(from, to);
        self.notify(StoreChange::WorkflowChanged);
    }

    /// Discard transient adjacency edits
    pub fn rebuild_transitions(&self) {
        self.state().rebuild_transitions();
        self.notify(StoreChange::WorkflowChanged);
    }

    /// Drop everything held locally
    pub fn clear(&self) {
        *self.state() = BoardState::default();
        self.notify(StoreChange::Cleared);
    }
}
