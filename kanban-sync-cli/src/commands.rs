//! Command implementations

use std::path::Path;

use anyhow::{Context, Result};
use kanban_sync::{
    BoardId, BoardState, ColumnId, Neighbors, StoreChange, SyncConfig, SyncSession, TaskId,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

fn session(config: Option<&Path>) -> Result<SyncSession> {
    let config = SyncConfig::load(config).context("failed to load configuration")?;
    Ok(SyncSession::from_config(config)?)
}

fn column_name(state: &BoardState, id: ColumnId) -> String {
    state
        .columns
        .get(&id)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| id.to_string())
}

/// One line describing a store change
pub fn describe(state: &BoardState, change: &StoreChange) -> String {
    match change {
        StoreChange::Loaded { board_id } => format!(
            "loaded board {board_id}: {} columns, {} tasks",
            state.columns.len(),
            state.tasks.len()
        ),
        StoreChange::Cleared => "board cleared".to_string(),
        StoreChange::BoardChanged => "board updated".to_string(),
        StoreChange::ColumnChanged { column_id } => {
            format!("column {} updated", column_name(state, *column_id))
        }
        StoreChange::ColumnRemoved {
            column_id,
            removed_tasks,
        } => format!(
            "column {column_id} removed with {} tasks",
            removed_tasks.len()
        ),
        StoreChange::TaskChanged { task_id, cause } => match state.tasks.get(task_id) {
            Some(task) => format!(
                "task {:?} in {} ({cause:?}, v{})",
                task.title,
                column_name(state, task.column_id),
                task.version
            ),
            None => format!("task {task_id} changed ({cause:?})"),
        },
        StoreChange::TaskRemoved { task_id } => format!("task {task_id} removed"),
        StoreChange::WorkflowChanged => "workflow changed".to_string(),
    }
}

/// Render the adjacency, one source column per line
pub fn render_transitions(state: &BoardState) -> String {
    let transitions = state.transitions();
    if state.workflow.is_none() {
        return "no active workflow: every move is allowed\n".to_string();
    }

    let mut out = String::new();
    for column in state.columns.values() {
        let targets: Vec<String> = state
            .columns
            .values()
            .filter(|to| to.id != column.id && transitions.is_allowed(column.id, to.id))
            .map(|to| to.name.clone())
            .collect();
        let targets = if targets.is_empty() {
            "(none)".to_string()
        } else {
            targets.join(", ")
        };
        out.push_str(&format!("{} -> {}\n", column.name, targets));
    }
    out
}

pub async fn watch(config: Option<&Path>, board_id: &str) -> Result<()> {
    let session = session(config)?;
    let mut changes = session.store().subscribe();
    let mut failures = session.failures();
    let mut status = session.status();

    session.start(board_id).await?;
    let state = session.store().snapshot();
    if let Some(id) = state.board_id() {
        println!("{}", describe(&state, &StoreChange::Loaded { board_id: id }));
    }

    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            change = changes.recv() => match change {
                Ok(StoreChange::Loaded { .. }) => {}
                Ok(change) => println!("{}", describe(&session.store().snapshot(), &change)),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "store changes dropped"),
                Err(RecvError::Closed) => break Ok(()),
            },
            Ok(()) = status.changed() => {
                eprintln!("push channel {}", *status.borrow_and_update());
            }
            Ok(()) = failures.changed() => {
                let failure = failures.borrow_and_update().clone();
                if let Some(e) = failure {
                    break Err(e.into());
                }
            }
        }
    };

    session.stop();
    result
}

pub async fn move_task(
    config: Option<&Path>,
    board_id: &str,
    task_id: &str,
    column_id: &str,
    after: Option<&str>,
    before: Option<&str>,
) -> Result<()> {
    let task_id = TaskId::parse(task_id)?;
    let column_id = ColumnId::parse(column_id)?;
    let neighbors = Neighbors {
        after: after.map(TaskId::parse).transpose()?,
        before: before.map(TaskId::parse).transpose()?,
    };

    let session = session(config)?;
    session
        .store()
        .load_board(BoardId::parse(board_id)?)
        .await?;
    let task = session.store().request_move(task_id, column_id, neighbors).await?;

    let state = session.store().snapshot();
    println!(
        "moved {:?} to {} (v{})",
        task.title,
        column_name(&state, task.column_id),
        task.version
    );
    Ok(())
}

pub async fn transitions(config: Option<&Path>, board_id: &str) -> Result<()> {
    let session = session(config)?;
    session
        .store()
        .load_board(BoardId::parse(board_id)?)
        .await?;
    print!("{}", render_transitions(&session.store().snapshot()));
    Ok(())
}
