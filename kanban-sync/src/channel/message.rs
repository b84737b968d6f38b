//! Push message decoding.
//!
//! Every frame is `{"type": <discriminator>, "payload": {...}}`. Decoding is
//! two-stage: the discriminator is read first, then the payload is decoded into
//! the shape that discriminator implies. Unknown discriminators are not errors.

use crate::error::MalformedMessage;
use crate::types::{
    BoardId, ClarificationQuestion, Column, ColumnId, Execution, ExecutionId, Milestone, Task,
    TaskId, TaskRecord,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// Authoritative change pushed by the board authority
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    TaskCreated(Task),
    TaskUpdated(Task),
    TaskMoved(Task),
    TaskDeleted {
        task_id: TaskId,
    },
    /// A task event whose task sits outside every column
    TaskUnassigned {
        task_id: TaskId,
        board_id: BoardId,
    },
    ColumnCreated(Column),
    ColumnUpdated(Column),
    ColumnDeleted {
        column_id: ColumnId,
    },
    ExecutionStarted(Execution),
    ExecutionUpdated(Execution),
    ExecutionCompleted(Execution),
    ExecutionMilestone {
        execution_id: ExecutionId,
        task_id: TaskId,
        milestone: Milestone,
    },
    ClarificationRequested {
        execution_id: ExecutionId,
        task_id: TaskId,
        questions: Vec<ClarificationQuestion>,
    },
    ClarificationAnswered {
        execution_id: ExecutionId,
        task_id: TaskId,
        answers: Value,
    },
}

impl InboundEvent {
    /// Wire discriminator of this event
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskCreated(_) => "task_created",
            Self::TaskUpdated(_) => "task_updated",
            Self::TaskMoved(_) => "task_moved",
            Self::TaskDeleted { .. } => "task_deleted",
            Self::TaskUnassigned { .. } => "task_unassigned",
            Self::ColumnCreated(_) => "column_created",
            Self::ColumnUpdated(_) => "column_updated",
            Self::ColumnDeleted { .. } => "column_deleted",
            Self::ExecutionStarted(_) => "execution_started",
            Self::ExecutionUpdated(_) => "execution_updated",
            Self::ExecutionCompleted(_) => "execution_completed",
            Self::ExecutionMilestone { .. } => "execution_milestone",
            Self::ClarificationRequested { .. } => "clarification_requested",
            Self::ClarificationAnswered { .. } => "clarification_answered",
        }
    }

    /// Whether the event concerns board entities rather than executions
    pub fn is_board_event(&self) -> bool {
        matches!(
            self,
            Self::TaskCreated(_)
                | Self::TaskUpdated(_)
                | Self::TaskMoved(_)
                | Self::TaskDeleted { .. }
                | Self::TaskUnassigned { .. }
                | Self::ColumnCreated(_)
                | Self::ColumnUpdated(_)
                | Self::ColumnDeleted { .. }
        )
    }
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// Greeting sent by the authority right after the socket opens
    Connected { board_id: Option<BoardId> },
    Event(InboundEvent),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
struct DataPayload<T> {
    data: T,
}

#[derive(Deserialize)]
struct TaskDeletedPayload {
    task_id: TaskId,
}

#[derive(Deserialize)]
struct ColumnDeletedPayload {
    column_id: ColumnId,
}

#[derive(Deserialize)]
struct ConnectedPayload {
    #[serde(default)]
    board_id: Option<BoardId>,
}

#[derive(Deserialize)]
struct MilestonePayload {
    execution_id: ExecutionId,
    task_id: TaskId,
    milestone: Milestone,
}

#[derive(Deserialize)]
struct ClarificationRequestedPayload {
    execution_id: ExecutionId,
    task_id: TaskId,
    #[serde(default)]
    questions: Vec<ClarificationQuestion>,
}

#[derive(Deserialize)]
struct ClarificationAnsweredPayload {
    execution_id: ExecutionId,
    task_id: TaskId,
    #[serde(default)]
    answers: Value,
}

fn payload<T: DeserializeOwned>(kind: &str, payload: Value) -> Result<T, MalformedMessage> {
    serde_json::from_value(payload).map_err(|e| MalformedMessage::InvalidPayload {
        kind: kind.to_string(),
        message: e.to_string(),
    })
}

fn data<T: DeserializeOwned>(kind: &str, value: Value) -> Result<T, MalformedMessage> {
    payload::<DataPayload<T>>(kind, value).map(|p| p.data)
}

/// Decode a task payload, mapping a task without a column to `TaskUnassigned`
fn task_event(
    kind: &str,
    value: Value,
    wrap: fn(Task) -> InboundEvent,
) -> Result<InboundEvent, MalformedMessage> {
    let record: TaskRecord = data(kind, value)?;
    let (task_id, board_id) = (record.id, record.board_id);
    Ok(match record.into_task() {
        Some(task) => wrap(task),
        None => InboundEvent::TaskUnassigned { task_id, board_id },
    })
}

/// Decode one text frame.
///
/// Returns `Ok(None)` for a well-formed message whose discriminator is not
/// recognised.
pub fn parse_message(text: &str) -> Result<Option<PushMessage>, MalformedMessage> {
    let value: Value = serde_json::from_str(text).map_err(|e| MalformedMessage::NotJson {
        message: e.to_string(),
    })?;
    if !value.is_object() {
        return Err(MalformedMessage::NotJson {
            message: "expected an object".to_string(),
        });
    }

    let envelope: Envelope =
        serde_json::from_value(value).map_err(|_| MalformedMessage::MissingDiscriminator)?;
    let kind = envelope.kind.as_str();
    let body = envelope.payload;

    let event = match kind {
        "connected" => {
            let p: ConnectedPayload = payload(kind, body)?;
            return Ok(Some(PushMessage::Connected {
                board_id: p.board_id,
            }));
        }
        "task_created" => task_event(kind, body, InboundEvent::TaskCreated)?,
        "task_updated" => task_event(kind, body, InboundEvent::TaskUpdated)?,
        "task_moved" => task_event(kind, body, InboundEvent::TaskMoved)?,
        "task_deleted" => {
            let p: TaskDeletedPayload = payload(kind, body)?;
            InboundEvent::TaskDeleted { task_id: p.task_id }
        }
        "column_created" => InboundEvent::ColumnCreated(data(kind, body)?),
        "column_updated" => InboundEvent::ColumnUpdated(data(kind, body)?),
        "column_deleted" => {
            let p: ColumnDeletedPayload = payload(kind, body)?;
            InboundEvent::ColumnDeleted {
                column_id: p.column_id,
            }
        }
        "execution_started" => InboundEvent::ExecutionStarted(data(kind, body)?),
        "execution_updated" => InboundEvent::ExecutionUpdated(data(kind, body)?),
        "execution_completed" => InboundEvent::ExecutionCompleted(data(kind, body)?),
        "execution_milestone" => {
            let p: MilestonePayload = payload(kind, body)?;
            InboundEvent::ExecutionMilestone {
                execution_id: p.execution_id,
                task_id: p.task_id,
                milestone: p.milestone,
            }
        }
        "clarification_requested" => {
            let p: ClarificationRequestedPayload = payload(kind, body)?;
            InboundEvent::ClarificationRequested {
                execution_id: p.execution_id,
                task_id: p.task_id,
                questions: p.questions,
            }
        }
        "clarification_answered" => {
            let p: ClarificationAnsweredPayload = payload(kind, body)?;
            InboundEvent::ClarificationAnswered {
                execution_id: p.execution_id,
                task_id: p.task_id,
                answers: p.answers,
            }
        }
        _ => return Ok(None),
    };

    Ok(Some(PushMessage::Event(event)))
}
