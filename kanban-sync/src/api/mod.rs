//! REST collaborator: the typed call layer to the board authority

mod http;

pub use http::HttpBoardApi;

use crate::error::ApiError;
use crate::types::{
    ActivityPage, Board, BoardActivity, BoardId, BoardPatch, ClarificationReceipt, Column,
    ColumnId, ColumnPatch, Execution, ExecutionId, MoveTask, NewBoard, NewColumn, NewTask,
    NewTransition, NewWorkflow, StartExecution, Task, TaskId, TaskPatch, TaskRecord, Transition,
    TransitionId, TransitionPatch, WorkflowDefinition, WorkflowId, WorkflowPatch,
};
use async_trait::async_trait;
use std::collections::HashMap;

/// Result of a call to the authority
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Effective allowed-transitions map as served by the authority
pub type AllowedTransitions = HashMap<ColumnId, Vec<ColumnId>>;

/// Operations the board authority provides
#[async_trait]
pub trait BoardApi: Send + Sync {
    // -- boards --

    async fn list_boards(&self) -> ApiResult<Vec<Board>>;

    async fn get_board(&self, id: BoardId) -> ApiResult<Board>;

    async fn create_board(&self, board: &NewBoard) -> ApiResult<Board>;

    async fn update_board(&self, id: BoardId, patch: &BoardPatch) -> ApiResult<Board>;

    async fn delete_board(&self, id: BoardId) -> ApiResult<()>;

    // -- columns --

    async fn list_columns(&self, board_id: BoardId) -> ApiResult<Vec<Column>>;

    async fn create_column(&self, board_id: BoardId, column: &NewColumn) -> ApiResult<Column>;

    async fn update_column(&self, id: ColumnId, patch: &ColumnPatch) -> ApiResult<Column>;

    /// Delete a column; the authority deletes its tasks with it
    async fn delete_column(&self, id: ColumnId) -> ApiResult<()>;

    // -- tasks --

    /// Tasks of a board as served, including any that sit outside every column
    async fn list_tasks(&self, board_id: BoardId) -> ApiResult<Vec<TaskRecord>>;

    async fn get_task(&self, id: TaskId) -> ApiResult<Task>;

    async fn create_task(&self, board_id: BoardId, task: &NewTask) -> ApiResult<Task>;

    async fn update_task(&self, id: TaskId, patch: &TaskPatch) -> ApiResult<Task>;

    async fn delete_task(&self, id: TaskId) -> ApiResult<()>;

    /// Move a task, returning the canonical record with its new version.
    ///
    /// Rejected with 409 when `body.version` is stale and with 403 when the
    /// workflow forbids the move.
    async fn move_task(&self, id: TaskId, body: &MoveTask) -> ApiResult<Task>;

    // -- workflows --

    async fn list_workflows(&self, board_id: BoardId) -> ApiResult<Vec<WorkflowDefinition>>;

    /// The board's active workflow, `None` when it has none
    async fn get_active_workflow(&self, board_id: BoardId)
        -> ApiResult<Option<WorkflowDefinition>>;

    async fn create_workflow(
        &self,
        board_id: BoardId,
        workflow: &NewWorkflow,
    ) -> ApiResult<WorkflowDefinition>;

    async fn update_workflow(
        &self,
        id: WorkflowId,
        patch: &WorkflowPatch,
    ) -> ApiResult<WorkflowDefinition>;

    async fn delete_workflow(&self, id: WorkflowId) -> ApiResult<()>;

    // -- transitions --

    async fn create_transition(
        &self,
        workflow_id: WorkflowId,
        transition: &NewTransition,
    ) -> ApiResult<Transition>;

    async fn update_transition(
        &self,
        id: TransitionId,
        patch: &TransitionPatch,
    ) -> ApiResult<Transition>;

    async fn delete_transition(&self, id: TransitionId) -> ApiResult<()>;

    /// Effective allowed-transitions map for the board
    async fn allowed_transitions(&self, board_id: BoardId) -> ApiResult<AllowedTransitions>;

    // -- executions --

    /// Start an automated execution for a task
    async fn start_execution(&self, task_id: TaskId, request: &StartExecution)
        -> ApiResult<Execution>;

    async fn get_execution(&self, id: ExecutionId) -> ApiResult<Execution>;

    /// Execution history of a task, most recent first
    async fn list_task_executions(&self, task_id: TaskId) -> ApiResult<Vec<Execution>>;

    /// Cancel a running execution. Rejected with 400 once it has finished.
    async fn cancel_execution(&self, id: ExecutionId) -> ApiResult<()>;

    /// Answer the questions of the task's execution awaiting clarification.
    ///
    /// The authority resumes work in a new execution named by the receipt.
    async fn submit_clarification(
        &self,
        task_id: TaskId,
        answers: &serde_json::Value,
    ) -> ApiResult<ClarificationReceipt>;

    // -- activity --

    /// One page (1-based) of a task's activity history
    async fn list_task_activities(
        &self,
        task_id: TaskId,
        page: u32,
        page_size: u32,
    ) -> ApiResult<ActivityPage>;

    /// One page (1-based) of a board's activity feed
    async fn list_board_activities(
        &self,
        board_id: BoardId,
        page: u32,
        page_size: u32,
    ) -> ApiResult<BoardActivity>;
}
