//! Loading and authority-first writes.
//!
//! Unlike moves, these operations call the authority first and only touch the
//! mirror once it has answered. A failed call leaves local state unchanged.

use super::{BoardState, BoardStore, ChangeCause, StoreChange};
use crate::error::{Result, SyncError};
use crate::transitions::TransitionMap;
use crate::types::{
    Board, BoardId, BoardPatch, Column, ColumnId, ColumnPatch, NewBoard, NewColumn, NewTask,
    NewTransition, NewWorkflow, Task, TaskId, TaskPatch, Transition, TransitionId,
    TransitionPatch, WorkflowDefinition, WorkflowId, WorkflowPatch,
};
use tracing::{debug, info, warn};

impl BoardStore {
    fn require_board(&self) -> Result<BoardId> {
        self.board_id().ok_or(SyncError::NoActiveBoard)
    }

    fn require_workflow(&self) -> Result<WorkflowDefinition> {
        self.state()
            .workflow
            .clone()
            .ok_or_else(|| SyncError::validation("workflow", "the board has no active workflow"))
    }

    // -- loading --

    /// Replace local state with the authority's view of `board_id`.
    ///
    /// Tasks the authority holds outside every column are left out.
    pub async fn load_board(&self, board_id: BoardId) -> Result<()> {
        let api = self.api();
        let (board, columns, tasks, workflow) = tokio::try_join!(
            api.get_board(board_id),
            api.list_columns(board_id),
            api.list_tasks(board_id),
            api.get_active_workflow(board_id),
        )?;

        let mut state = BoardState {
            board: Some(board),
            columns: columns.into_iter().map(|c| (c.id, c)).collect(),
            tasks: tasks
                .into_iter()
                .filter_map(|record| {
                    let task_id = record.id;
                    let task = record.into_task();
                    if task.is_none() {
                        warn!(%board_id, %task_id, "skipping task without a column");
                    }
                    task
                })
                .map(|t| (t.id, t))
                .collect(),
            workflow,
            ..BoardState::default()
        };
        state.sort_columns();
        state.rebuild_transitions();

        info!(
            %board_id,
            columns = state.columns.len(),
            tasks = state.tasks.len(),
            workflow = state.workflow.is_some(),
            "board loaded"
        );
        *self.state() = state;
        self.notify(StoreChange::Loaded { board_id });
        Ok(())
    }

    /// Refetch the active workflow and rebuild the adjacency from it
    pub async fn load_workflow(&self) -> Result<Option<WorkflowDefinition>> {
        let board_id = self.require_board()?;
        let workflow = self.api().get_active_workflow(board_id).await?;
        {
            let mut state = self.state();
            state.workflow = workflow.clone();
            state.rebuild_transitions();
        }
        debug!(%board_id, active = workflow.is_some(), "workflow reloaded");
        self.notify(StoreChange::WorkflowChanged);
        Ok(workflow)
    }

    /// Replace the adjacency with the authority's effective map
    pub async fn sync_allowed_transitions(&self) -> Result<TransitionMap> {
        let board_id = self.require_board()?;
        let allowed = self.api().allowed_transitions(board_id).await?;
        let map = TransitionMap::from_allowed_map(allowed);
        self.state().transitions = map.clone();
        self.notify(StoreChange::WorkflowChanged);
        Ok(map)
    }

    // -- boards --

    pub async fn list_boards(&self) -> Result<Vec<Board>> {
        Ok(self.api().list_boards().await?)
    }

    /// Create a board; it is not loaded
    pub async fn create_board(&self, board: &NewBoard) -> Result<Board> {
        Ok(self.api().create_board(board).await?)
    }

    pub async fn update_board(&self, patch: &BoardPatch) -> Result<Board> {
        let board_id = self.require_board()?;
        let board = self.api().update_board(board_id, patch).await?;
        {
            let mut state = self.state();
            if state.board_id() != Some(board_id) {
                return Ok(board);
            }
            state.board = Some(board.clone());
        }
        self.notify(StoreChange::BoardChanged);
        Ok(board)
    }

    /// Delete the loaded board and clear local state
    pub async fn delete_board(&self) -> Result<()> {
        let board_id = self.require_board()?;
        self.api().delete_board(board_id).await?;
        info!(%board_id, "board deleted");
        self.clear();
        Ok(())
    }

    // -- columns --

    pub async fn create_column(&self, column: &NewColumn) -> Result<Column> {
        let board_id = self.require_board()?;
        let created = self.api().create_column(board_id, column).await?;
        self.put_column(&created);
        Ok(created)
    }

    pub async fn update_column(&self, id: ColumnId, patch: &ColumnPatch) -> Result<Column> {
        let updated = self.api().update_column(id, patch).await?;
        self.put_column(&updated);
        Ok(updated)
    }

    /// Delete a column together with its tasks
    pub async fn delete_column(&self, id: ColumnId) -> Result<()> {
        self.api().delete_column(id).await?;
        let change = self.state().remove_column(id);
        if let Some(change) = change {
            self.notify(change);
        }
        Ok(())
    }

    fn put_column(&self, column: &Column) {
        {
            let mut state = self.state();
            if state.board_id() != Some(column.board_id) {
                return;
            }
            state.columns.insert(column.id, column.clone());
            state.sort_columns();
            state.rebuild_transitions();
        }
        self.notify(StoreChange::ColumnChanged {
            column_id: column.id,
        });
    }

    // -- tasks --

    pub async fn create_task(&self, task: &NewTask) -> Result<Task> {
        let board_id = self.require_board()?;
        let created = self.api().create_task(board_id, task).await?;
        self.put_task(&created);
        Ok(created)
    }

    /// Update task fields. A patch without a version is sent with the local one.
    pub async fn update_task(&self, id: TaskId, patch: TaskPatch) -> Result<Task> {
        let mut patch = patch;
        if patch.version.is_none() {
            patch.version = self.task(id).map(|t| t.version);
        }
        let updated = self.api().update_task(id, &patch).await?;
        self.put_task(&updated);
        Ok(updated)
    }

    pub async fn delete_task(&self, id: TaskId) -> Result<()> {
        self.api().delete_task(id).await?;
        let removed = self.state().tasks.shift_remove(&id).is_some();
        if removed {
            self.notify(StoreChange::TaskRemoved { task_id: id });
        }
        Ok(())
    }

    fn put_task(&self, task: &Task) {
        {
            let mut state = self.state();
            if state.board_id() != Some(task.board_id) {
                return;
            }
            if let Some(local) = state.tasks.get(&task.id) {
                if local.version > task.version {
                    return;
                }
            }
            state.tasks.insert(task.id, task.clone());
        }
        self.notify(StoreChange::TaskChanged {
            task_id: task.id,
            cause: ChangeCause::Committed,
        });
    }

    // -- workflow --

    /// Create a workflow; an active one replaces the current workflow
    pub async fn create_workflow(&self, workflow: &NewWorkflow) -> Result<WorkflowDefinition> {
        let board_id = self.require_board()?;
        let created = self.api().create_workflow(board_id, workflow).await?;
        if created.is_active {
            self.put_workflow(Some(created.clone()));
        }
        Ok(created)
    }

    /// Update the active workflow. Deactivating it makes the board unrestricted.
    pub async fn update_workflow(&self, patch: &WorkflowPatch) -> Result<WorkflowDefinition> {
        let current = self.require_workflow()?;
        let updated = self.api().update_workflow(current.id, patch).await?;
        let next = updated.is_active.then(|| updated.clone());
        self.put_workflow(next);
        Ok(updated)
    }

    pub async fn create_transition(&self, transition: &NewTransition) -> Result<Transition> {
        let workflow = self.require_workflow()?;
        let created = self.api().create_transition(workflow.id, transition).await?;
        self.edit_transitions(workflow.id, |transitions| {
            transitions.retain(|t| t.id != created.id);
            transitions.push(created.clone());
        });
        Ok(created)
    }

    pub async fn update_transition(
        &self,
        id: TransitionId,
        patch: &TransitionPatch,
    ) -> Result<Transition> {
        let updated = self.api().update_transition(id, patch).await?;
        self.edit_transitions(updated.workflow_id, |transitions| {
            for t in transitions.iter_mut().filter(|t| t.id == id) {
                *t = updated.clone();
            }
        });
        Ok(updated)
    }

    pub async fn delete_transition(&self, id: TransitionId) -> Result<()> {
        self.api().delete_transition(id).await?;
        let workflow_id = self.state().workflow.as_ref().map(|w| w.id);
        if let Some(workflow_id) = workflow_id {
            self.edit_transitions(workflow_id, |transitions| transitions.retain(|t| t.id != id));
        }
        Ok(())
    }

    /// Delete a workflow. Deleting the active one makes the board unrestricted.
    pub async fn delete_workflow(&self, id: WorkflowId) -> Result<()> {
        self.api().delete_workflow(id).await?;
        let active = self.state().workflow.as_ref().is_some_and(|w| w.id == id);
        if active {
            info!(workflow_id = %id, "active workflow deleted");
            self.put_workflow(None);
        }
        Ok(())
    }

    fn put_workflow(&self, workflow: Option<WorkflowDefinition>) {
        {
            let mut state = self.state();
            state.workflow = workflow;
            state.rebuild_transitions();
        }
        self.notify(StoreChange::WorkflowChanged);
    }

    fn edit_transitions(
        &self,
        workflow_id: WorkflowId,
        edit: impl FnOnce(&mut Vec<Transition>),
    ) {
        {
            let mut state = self.state();
            let Some(workflow) = state.workflow.as_mut().filter(|w| w.id == workflow_id) else {
                return;
            };
            edit(&mut workflow.transitions);
            state.rebuild_transitions();
        }
        self.notify(StoreChange::WorkflowChanged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::store::tests::loaded_store;
    use crate::test_support::FakeBoardApi;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_load_board_orders_columns() {
        let api = Arc::new(FakeBoardApi::new());
        let (board_id, columns) = api.seed_board(&["Todo", "Doing", "Done"]);
        let store = BoardStore::new(api.clone());
        let mut changes = store.subscribe();

        store.load_board(board_id).await.unwrap();

        let state = store.snapshot();
        assert_eq!(state.columns.keys().copied().collect::<Vec<_>>(), columns);
        assert!(state.workflow.is_none());
        assert!(store.is_transition_allowed(columns[2], columns[0]));
        assert_eq!(changes.recv().await.unwrap(), StoreChange::Loaded { board_id });
    }

    #[tokio::test]
    async fn test_load_board_failure_keeps_state() {
        let (api, store, _, task) = loaded_store(&["Todo"]).await;
        let before = store.snapshot();
        api.fail_next("list_tasks", ApiError::network("unreachable"));

        let err = store.load_board(before.board_id().unwrap()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Network);
        assert_eq!(store.snapshot(), before);
        assert!(store.task(task.id).is_some());
    }

    #[tokio::test]
    async fn test_operations_need_loaded_board() {
        let store = BoardStore::new(Arc::new(FakeBoardApi::new()));
        let err = store
            .create_task(&NewTask::new("x", ColumnId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NoActiveBoard));
        let err = store.update_board(&BoardPatch::rename("x")).await.unwrap_err();
        assert!(matches!(err, SyncError::NoActiveBoard));
    }

    #[tokio::test]
    async fn test_create_and_update_task() {
        let (api, store, columns, _) = loaded_store(&["Todo", "Done"]).await;

        let created = store
            .create_task(&NewTask::new("Ship it", columns[1]))
            .await
            .unwrap();
        assert_eq!(store.task(created.id).unwrap(), created);

        let updated = store
            .update_task(created.id, TaskPatch::title("Ship it now"))
            .await
            .unwrap();
        assert_eq!(updated.version, created.version + 1);
        assert_eq!(store.task(created.id).unwrap().title, "Ship it now");
        assert_eq!(api.task(created.id).unwrap(), updated);
    }

    #[tokio::test]
    async fn test_create_task_in_foreign_column_rejected() {
        let (api, store, _, _) = loaded_store(&["Todo"]).await;
        let (_, elsewhere) = api.seed_board(&["Other"]);
        let before = store.snapshot();

        let err = store
            .create_task(&NewTask::new("Lost", elsewhere[0]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
        assert_eq!(store.snapshot(), before);
    }

    #[test_log::test(tokio::test)]
    async fn test_load_board_skips_tasks_without_column() {
        let (api, store, columns, task) = loaded_store(&["Todo"]).await;
        let board_id = store.board_id().unwrap();
        let loose = api.seed_orphan_task(board_id, "Unsorted");

        store.load_board(board_id).await.unwrap();

        let state = store.snapshot();
        assert!(state.tasks.get(&loose.id).is_none());
        assert_eq!(state.tasks.len(), 1);
        assert_eq!(store.tasks_in_column(columns[0]), vec![task]);
    }

    #[tokio::test]
    async fn test_update_task_conflict_leaves_local_state() {
        let (api, store, _, task) = loaded_store(&["Todo"]).await;
        api.touch_task(task.id);

        let err = store
            .update_task(task.id, TaskPatch::title("mine"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.task(task.id).unwrap(), task);
    }

    #[tokio::test]
    async fn test_delete_task() {
        let (api, store, _, task) = loaded_store(&["Todo"]).await;
        store.delete_task(task.id).await.unwrap();
        assert!(store.task(task.id).is_none());
        assert!(api.task(task.id).is_none());
    }

    #[tokio::test]
    async fn test_column_crud_keeps_display_order() {
        let (_api, store, columns, task) = loaded_store(&["Todo", "Done"]).await;

        let review = store
            .create_column(&NewColumn::new("Review").with_order(5))
            .await
            .unwrap();
        let names = |store: &BoardStore| -> Vec<String> {
            store.snapshot().columns.values().map(|c| c.name.clone()).collect()
        };
        assert_eq!(names(&store), vec!["Todo", "Done", "Review"]);

        let patch = ColumnPatch {
            order: Some(-1),
            ..ColumnPatch::rename("Inbox")
        };
        store.update_column(review.id, &patch).await.unwrap();
        assert_eq!(names(&store), vec!["Inbox", "Todo", "Done"]);

        store.delete_column(columns[0]).await.unwrap();
        assert!(store.column(columns[0]).is_none());
        assert!(store.task(task.id).is_none());
    }

    #[tokio::test]
    async fn test_board_update_and_delete() {
        let (_api, store, _, _) = loaded_store(&["Todo"]).await;

        let board = store.update_board(&BoardPatch::rename("Renamed")).await.unwrap();
        assert_eq!(store.snapshot().board.unwrap(), board);

        store.delete_board().await.unwrap();
        assert!(store.board_id().is_none());
    }

    #[tokio::test]
    async fn test_transition_crud_rebuilds_adjacency() {
        let (_api, store, columns, _) = loaded_store(&["Todo", "Doing", "Done"]).await;

        let err = store
            .create_transition(&NewTransition::new(columns[0], columns[1]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);

        store.create_workflow(&NewWorkflow::new("Flow")).await.unwrap();
        assert!(!store.is_transition_allowed(columns[0], columns[1]));

        let t = store
            .create_transition(&NewTransition::new(columns[0], columns[1]))
            .await
            .unwrap();
        assert!(store.is_transition_allowed(columns[0], columns[1]));

        store
            .update_transition(t.id, &TransitionPatch::enabled(false))
            .await
            .unwrap();
        assert!(!store.is_transition_allowed(columns[0], columns[1]));

        store.delete_transition(t.id).await.unwrap();
        assert!(store.snapshot().workflow.unwrap().transitions.is_empty());
    }

    #[tokio::test]
    async fn test_deactivating_workflow_unrestricts_board() {
        let (api, store, columns, _) = loaded_store(&["Todo", "Done"]).await;
        api.seed_workflow(store.board_id().unwrap(), &[]);
        store.load_workflow().await.unwrap();
        assert!(!store.is_transition_allowed(columns[0], columns[1]));

        store
            .update_workflow(&WorkflowPatch {
                is_active: Some(false),
                ..WorkflowPatch::default()
            })
            .await
            .unwrap();
        assert!(store.snapshot().workflow.is_none());
        assert!(store.is_transition_allowed(columns[0], columns[1]));
    }

    #[tokio::test]
    async fn test_delete_active_workflow_unrestricts_board() {
        let (api, store, columns, _) = loaded_store(&["Todo", "Done"]).await;
        let board_id = store.board_id().unwrap();
        let workflow = api.seed_workflow(board_id, &[]);
        store.load_workflow().await.unwrap();
        assert!(!store.is_transition_allowed(columns[0], columns[1]));

        store.delete_workflow(workflow.id).await.unwrap();
        assert!(store.snapshot().workflow.is_none());
        assert!(store.is_transition_allowed(columns[0], columns[1]));
        assert_eq!(api.call_count("delete_workflow"), 1);

        let err = store.delete_workflow(workflow.id).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_sync_allowed_transitions() {
        let (api, store, columns, _) = loaded_store(&["Todo", "Doing", "Done"]).await;
        api.seed_workflow(store.board_id().unwrap(), &[(columns[0], columns[1])]);

        let map = store.sync_allowed_transitions().await.unwrap();
        assert!(map.is_allowed(columns[0], columns[1]));
        assert!(!store.is_transition_allowed(columns[0], columns[2]));
        assert!(!store.is_transition_allowed(columns[2], columns[0]));
    }
}
