//! Core types for the board mirror

mod activity;
mod board;
mod execution;
mod ids;
mod position;
mod task;
mod workflow;

// Re-export all types
pub use activity::{Activity, ActivityPage, BoardActivity};
pub use board::{Board, BoardPatch, Column, ColumnPatch, NewBoard, NewColumn};
pub use execution::{
    ClarificationQuestion, ClarificationReceipt, Execution, ExecutionStatus, Milestone,
    StartExecution,
};
pub use ids::{
    parse_canonical, ActivityId, BoardId, ColumnId, ExecutionId, InvalidId, TaskId, TransitionId,
    WorkflowId,
};
pub use position::{order_key, OrderKey};
pub use task::{MoveTask, NewTask, Priority, Task, TaskPatch, TaskRecord};
pub use workflow::{
    NewTransition, NewWorkflow, Transition, TransitionPatch, WorkflowDefinition, WorkflowPatch,
};
