//! Optimistic moves: apply locally, commit to the authority, roll back on failure.

use super::{BoardState, BoardStore, ChangeCause, StoreChange};
use crate::error::{Result, SyncError};
use crate::types::{ColumnId, MoveTask, OrderKey, Task, TaskId};
use tracing::{debug, warn};

/// Exact pre-mutation value of a task, captured by an optimistic apply and
/// handed back to restore it
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    task: Task,
}

impl TaskSnapshot {
    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn task_id(&self) -> TaskId {
        self.task.id
    }

    /// Version observed when the snapshot was taken
    pub fn version(&self) -> u64 {
        self.task.version
    }

    pub fn into_task(self) -> Task {
        self.task
    }
}

/// The tasks a moved task should land between, in the target column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Neighbors {
    /// Task the moved task should follow
    pub after: Option<TaskId>,
    /// Task the moved task should precede
    pub before: Option<TaskId>,
}

impl Neighbors {
    /// No neighbours: the target column is empty
    pub fn none() -> Self {
        Self::default()
    }

    pub fn between(after: TaskId, before: TaskId) -> Self {
        Self {
            after: Some(after),
            before: Some(before),
        }
    }

    pub fn after(task: TaskId) -> Self {
        Self {
            after: Some(task),
            before: None,
        }
    }

    pub fn before(task: TaskId) -> Self {
        Self {
            after: None,
            before: Some(task),
        }
    }
}

impl BoardState {
    fn neighbor_key(
        &self,
        moving: TaskId,
        neighbor: Option<TaskId>,
        column_id: ColumnId,
        field: &str,
    ) -> Result<Option<OrderKey>> {
        let Some(id) = neighbor else {
            return Ok(None);
        };
        if id == moving {
            return Err(SyncError::validation(field, "a task cannot be its own neighbour"));
        }
        match self.tasks.get(&id) {
            Some(task) if task.column_id == column_id => Ok(Some(task.order)),
            Some(_) => Err(SyncError::validation(
                field,
                format!("task {id} is not in column {column_id}"),
            )),
            None => Err(SyncError::validation(field, format!("unknown task {id}"))),
        }
    }

    fn apply_move(
        &mut self,
        task_id: TaskId,
        column_id: ColumnId,
        order: OrderKey,
    ) -> Result<TaskSnapshot> {
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(SyncError::TaskNotFound { id: task_id })?;
        let snapshot = TaskSnapshot { task: task.clone() };
        task.column_id = column_id;
        task.order = order;
        Ok(snapshot)
    }
}

impl BoardStore {
    /// Move a task locally, before the authority has seen the move.
    ///
    /// No legality check happens here. Returns the pre-move snapshot to pass
    /// to [`commit_move`](Self::commit_move).
    pub fn apply_optimistic_move(
        &self,
        task_id: TaskId,
        target_column_id: ColumnId,
        order: OrderKey,
    ) -> Result<TaskSnapshot> {
        let snapshot = self.state().apply_move(task_id, target_column_id, order)?;
        debug!(
            %task_id,
            column_id = %target_column_id,
            order = order.value(),
            "optimistic move applied"
        );
        self.notify(StoreChange::TaskChanged {
            task_id,
            cause: ChangeCause::Optimistic,
        });
        Ok(snapshot)
    }

    /// Send a previously applied move to the authority.
    ///
    /// On success the local task is replaced by the authority's record. On any
    /// failure it is restored to `snapshot` exactly and the failure returned.
    /// A task deleted locally while the call was in flight stays deleted.
    pub async fn commit_move(
        &self,
        task_id: TaskId,
        body: MoveTask,
        snapshot: TaskSnapshot,
    ) -> Result<Task> {
        match self.api().move_task(task_id, &body).await {
            Ok(task) => {
                let applied = {
                    let mut state = self.state();
                    match state.tasks.get_mut(&task_id) {
                        Some(local) if local.version <= task.version => {
                            *local = task.clone();
                            true
                        }
                        Some(_) => false,
                        None => false,
                    }
                };
                if applied {
                    debug!(%task_id, version = task.version, "move committed");
                    self.notify(StoreChange::TaskChanged {
                        task_id,
                        cause: ChangeCause::Committed,
                    });
                } else {
                    debug!(%task_id, "move committed but local copy is gone or newer");
                }
                Ok(task)
            }
            Err(e) => {
                warn!(%task_id, error = %e, "move rejected, rolling back");
                let restored = {
                    let mut state = self.state();
                    match state.tasks.get_mut(&task_id) {
                        Some(local) => {
                            *local = snapshot.into_task();
                            true
                        }
                        None => false,
                    }
                };
                if restored {
                    self.notify(StoreChange::TaskChanged {
                        task_id,
                        cause: ChangeCause::RolledBack,
                    });
                }
                Err(e.into())
            }
        }
    }

    /// Validate, position, apply and commit a move in one call.
    ///
    /// Fails without touching local state or calling the authority when the
    /// task or target column is unknown, a neighbour is invalid, or the
    /// workflow forbids the move.
    pub async fn request_move(
        &self,
        task_id: TaskId,
        target_column_id: ColumnId,
        neighbors: Neighbors,
    ) -> Result<Task> {
        let (body, snapshot) = {
            let mut state = self.state();
            let task = state
                .tasks
                .get(&task_id)
                .ok_or(SyncError::TaskNotFound { id: task_id })?;
            let from = task.column_id;
            let version = task.version;

            if !state.columns.is_empty() && !state.columns.contains_key(&target_column_id) {
                return Err(SyncError::ColumnNotFound {
                    id: target_column_id,
                });
            }
            if !state.transitions.is_allowed(from, target_column_id) {
                debug!(%task_id, %from, to = %target_column_id, "move blocked by workflow");
                return Err(SyncError::TransitionNotAllowed {
                    from,
                    to: target_column_id,
                });
            }

            let prev = state.neighbor_key(task_id, neighbors.after, target_column_id, "after")?;
            let next = state.neighbor_key(task_id, neighbors.before, target_column_id, "before")?;
            let order = OrderKey::between(prev, next);

            let snapshot = state.apply_move(task_id, target_column_id, order)?;
            let body = MoveTask {
                column_id: target_column_id,
                order,
                version,
            };
            (body, snapshot)
        };

        debug!(
            %task_id,
            column_id = %target_column_id,
            order = body.order.value(),
            "optimistic move applied"
        );
        self.notify(StoreChange::TaskChanged {
            task_id,
            cause: ChangeCause::Optimistic,
        });
        self.commit_move(task_id, body, snapshot).await
    }
}
