//! Reconciling authoritative push events into the mirror.
//!
//! Every merge is idempotent: applying the same event twice leaves the state
//! as applying it once.

use super::{BoardState, BoardStore, ChangeCause, StoreChange};
use crate::channel::InboundEvent;
use crate::types::{BoardId, Column, ColumnId, Task, TaskId};
use tracing::{debug, warn};

impl BoardState {
    fn belongs_to_board(&self, board_id: BoardId) -> bool {
        self.board_id().is_none_or(|id| id == board_id)
    }

    fn insert_task(&mut self, task: &Task) -> Option<StoreChange> {
        if !self.belongs_to_board(task.board_id) || self.tasks.contains_key(&task.id) {
            return None;
        }
        self.tasks.insert(task.id, task.clone());
        Some(StoreChange::TaskChanged {
            task_id: task.id,
            cause: ChangeCause::Remote,
        })
    }

    fn replace_task(&mut self, task: &Task) -> Option<StoreChange> {
        if !self.belongs_to_board(task.board_id) {
            return None;
        }
        match self.tasks.get_mut(&task.id) {
            Some(local) if local.version > task.version => {
                debug!(task_id = %task.id, local = local.version, incoming = task.version, "ignoring stale task event");
                return None;
            }
            Some(local) if local == task => return None,
            Some(local) => *local = task.clone(),
            None => {
                self.tasks.insert(task.id, task.clone());
            }
        }
        Some(StoreChange::TaskChanged {
            task_id: task.id,
            cause: ChangeCause::Remote,
        })
    }

    fn remove_task(&mut self, task_id: TaskId) -> Option<StoreChange> {
        self.tasks
            .shift_remove(&task_id)
            .map(|_| StoreChange::TaskRemoved { task_id })
    }

    /// The authority took the task out of every column; it leaves the mirror
    fn unassign_task(&mut self, task_id: TaskId, board_id: BoardId) -> Option<StoreChange> {
        if !self.belongs_to_board(board_id) {
            return None;
        }
        warn!(%task_id, "task no longer has a column, dropping it");
        self.remove_task(task_id)
    }

    fn upsert_column(&mut self, column: &Column, only_if_absent: bool) -> Option<StoreChange> {
        if !self.belongs_to_board(column.board_id) {
            return None;
        }
        match self.columns.get_mut(&column.id) {
            Some(_) if only_if_absent => return None,
            Some(local) if local == column => return None,
            Some(local) => *local = column.clone(),
            None => {
                self.columns.insert(column.id, column.clone());
            }
        }
        self.sort_columns();
        self.rebuild_transitions();
        Some(StoreChange::ColumnChanged {
            column_id: column.id,
        })
    }

    /// Remove a column, its tasks and any transitions touching it
    pub(crate) fn remove_column(&mut self, column_id: ColumnId) -> Option<StoreChange> {
        self.columns.shift_remove(&column_id)?;

        let removed_tasks: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.column_id == column_id)
            .map(|t| t.id)
            .collect();
        self.tasks.retain(|_, t| t.column_id != column_id);

        if let Some(workflow) = self.workflow.as_mut() {
            workflow
                .transitions
                .retain(|t| t.from_column_id != column_id && t.to_column_id != column_id);
        }
        self.rebuild_transitions();

        Some(StoreChange::ColumnRemoved {
            column_id,
            removed_tasks,
        })
    }
}

impl BoardStore {
    /// Apply an authoritative event. Returns whether local state changed.
    ///
    /// - `*_created`: insert unless already present
    /// - `task_updated` / `task_moved` / `column_updated`: replace wholesale,
    ///   ignoring a task event older than the local version
    /// - `*_deleted`: remove; deleting a column removes its tasks
    /// - a task pushed without a column is removed
    ///
    /// Execution events do not touch the board and are ignored here.
    pub fn merge_inbound(&self, event: &InboundEvent) -> bool {
        self.merge_event(event).is_some()
    }

    /// Like [`merge_inbound`](Self::merge_inbound), returning the change that
    /// was applied and notified
    pub fn merge_event(&self, event: &InboundEvent) -> Option<StoreChange> {
        let change = {
            let mut state = self.state();
            match event {
                InboundEvent::TaskCreated(task) => state.insert_task(task),
                InboundEvent::TaskUpdated(task) | InboundEvent::TaskMoved(task) => {
                    state.replace_task(task)
                }
                InboundEvent::TaskDeleted { task_id } => state.remove_task(*task_id),
                InboundEvent::TaskUnassigned { task_id, board_id } => {
                    state.unassign_task(*task_id, *board_id)
                }
                InboundEvent::ColumnCreated(column) => state.upsert_column(column, true),
                InboundEvent::ColumnUpdated(column) => state.upsert_column(column, false),
                InboundEvent::ColumnDeleted { column_id } => state.remove_column(*column_id),
                _ => None,
            }
        };

        match &change {
            Some(change) => {
                debug!(kind = event.kind(), ?change, "merged push event");
                self.notify(change.clone());
            }
            None => debug!(kind = event.kind(), "push event left state unchanged"),
        }
        change
    }
}
