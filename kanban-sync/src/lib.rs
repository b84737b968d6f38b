//! Client-side sync engine for a remotely hosted kanban board
//!
//! The board authority (a REST service plus a websocket push channel) owns the
//! canonical state. This crate keeps an in-memory mirror of one board that
//! stays responsive while the authority catches up.
//!
//! ## Overview
//!
//! - **Optimistic moves** - a move is applied locally, sent to the authority
//!   with the version it was based on, and rolled back exactly if rejected
//! - **Push reconciliation** - authoritative events are merged idempotently
//! - **Fractional ordering** - a task dropped between two neighbours gets a key
//!   strictly between theirs, without renumbering siblings
//! - **Workflow gating** - column-to-column moves are checked against the
//!   active workflow before any request is made; no workflow means no limits
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use kanban_sync::{Neighbors, SyncConfig, SyncSession};
//!
//! # async fn example(task: kanban_sync::TaskId, done: kanban_sync::ColumnId)
//! #     -> Result<(), Box<dyn std::error::Error>> {
//! let session = SyncSession::from_config(SyncConfig::load(None)?)?;
//! session.start("5f0c8a4e-1b7d-4c1e-9a53-2d5f3e8b9c10").await?;
//!
//! let mut changes = session.store().subscribe();
//! session.request_move(task, done, Neighbors::none()).await?;
//! println!("{:?}", changes.recv().await?);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod channel;
pub mod config;
mod error;
pub mod execution;
mod session;
pub mod store;
pub mod transitions;
pub mod types;
pub mod workflow;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use api::{BoardApi, HttpBoardApi};
pub use channel::{BoardChannel, ChannelEvent, ChannelEvents, ConnectionState, InboundEvent};
pub use config::{ConfigError, SyncConfig};
pub use error::{ApiError, ErrorKind, MalformedMessage, Result, SyncError, TransportError};
pub use execution::{ExecutionChange, ExecutionTracker};
pub use session::SyncSession;
pub use store::{BoardState, BoardStore, ChangeCause, Neighbors, StoreChange, TaskSnapshot};
pub use transitions::TransitionMap;
pub use workflow::WorkflowEditor;

// Re-export commonly used types
pub use types::{
    order_key, Board, BoardId, Column, ColumnId, Execution, ExecutionStatus, OrderKey,
    StartExecution, Task, TaskId, TaskRecord, Transition, WorkflowDefinition,
};
