//! Workflow definitions and the column transitions they permit

use super::ids::{BoardId, ColumnId, TransitionId, WorkflowId};
use serde::{Deserialize, Serialize};

/// A directed, optionally disabled edge between two columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub id: TransitionId,
    pub workflow_id: WorkflowId,
    pub from_column_id: ColumnId,
    pub to_column_id: ColumnId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub is_enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl Transition {
    /// Create an enabled transition
    pub fn new(workflow_id: WorkflowId, from: ColumnId, to: ColumnId) -> Self {
        Self {
            id: TransitionId::new(),
            workflow_id,
            from_column_id: from,
            to_column_id: to,
            name: None,
            is_enabled: true,
        }
    }

    /// Mark the transition disabled
    pub fn disabled(mut self) -> Self {
        self.is_enabled = false;
        self
    }
}

/// A board's workflow: the set of transitions that gate moves between columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub board_id: BoardId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub is_active: bool,
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

impl WorkflowDefinition {
    pub fn new(id: WorkflowId, board_id: BoardId, name: impl Into<String>) -> Self {
        Self {
            id,
            board_id,
            name: name.into(),
            description: None,
            is_active: true,
            transitions: Vec::new(),
        }
    }

    /// Add an enabled transition between two columns
    pub fn with_transition(mut self, from: ColumnId, to: ColumnId) -> Self {
        self.transitions.push(Transition::new(self.id, from, to));
        self
    }
}

/// Payload for creating a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkflow {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_active: bool,
}

impl NewWorkflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            is_active: true,
        }
    }
}

/// Partial update of a workflow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

/// Payload for creating a transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransition {
    pub from_column_id: ColumnId,
    pub to_column_id: ColumnId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub is_enabled: bool,
}

impl NewTransition {
    pub fn new(from: ColumnId, to: ColumnId) -> Self {
        Self {
            from_column_id: from,
            to_column_id: to,
            name: None,
            is_enabled: true,
        }
    }
}

/// Partial update of a transition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_enabled: Option<bool>,
}

impl TransitionPatch {
    pub fn enabled(is_enabled: bool) -> Self {
        Self {
            name: None,
            is_enabled: Some(is_enabled),
        }
    }
}
