//! Activity log entries recorded by the authority for tasks and boards

use super::ids::{ActivityId, BoardId, ColumnId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One recorded change, e.g. a task created or moved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub task_id: TaskId,
    pub board_id: BoardId,
    /// `created`, `moved`, `updated`, ...
    pub activity_type: String,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_column_id: Option<ColumnId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_column_id: Option<ColumnId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
    #[serde(default)]
    pub activity_metadata: Value,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_column_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_column_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_title: Option<String>,
}

/// A page of a task's activity history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityPage {
    pub items: Vec<Activity>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub has_more: bool,
}

/// A page of a board's activity feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardActivity {
    pub activities: Vec<Activity>,
    pub total: u64,
}
