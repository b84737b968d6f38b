//! Board-level types: Board, Column and their create/update payloads

use super::ids::{BoardId, ColumnId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// The board - metadata only. Columns and tasks are held as separate collections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: BoardId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Directory automated executions run in, if the board has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Board {
    /// Create a new board with the given name
    pub fn new(id: BoardId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            working_directory: None,
            settings: serde_json::Map::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A column defines a workflow stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,
    pub board_id: BoardId,
    pub name: String,
    /// Display order among columns. Plain integer, unrelated to task order keys.
    #[serde(deserialize_with = "deserialize_display_order")]
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wip_limit: Option<u32>,
    #[serde(default)]
    pub is_start_column: bool,
    #[serde(default)]
    pub is_end_column: bool,
    /// Entering this column starts automated processing of the task
    #[serde(default)]
    pub triggers_agents: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Column {
    /// Create a column with default flags
    pub fn new(id: ColumnId, board_id: BoardId, name: impl Into<String>, order: i64) -> Self {
        Self {
            id,
            board_id,
            name: name.into(),
            order,
            color: None,
            wip_limit: None,
            is_start_column: false,
            is_end_column: false,
            triggers_agents: false,
            created_at: None,
            updated_at: None,
        }
    }

    /// Set the work-in-progress limit
    pub fn with_wip_limit(mut self, limit: u32) -> Self {
        self.wip_limit = Some(limit);
        self
    }
}

/// The authority stores column order as a float; the client treats it as an integer.
fn deserialize_display_order<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() {
        return Err(serde::de::Error::custom("column order must be finite"));
    }
    Ok(value.round() as i64)
}

/// Payload for creating a board
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewBoard {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

impl NewBoard {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }
}

/// Partial update of a board. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoardPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

impl BoardPatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }
}

/// Payload for creating a column
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewColumn {
    pub name: String,
    /// Appended after the last column when omitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wip_limit: Option<u32>,
}

impl NewColumn {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = Some(order);
        self
    }

    pub fn with_wip_limit(mut self, limit: u32) -> Self {
        self.wip_limit = Some(limit);
        self
    }
}

/// Partial update of a column
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wip_limit: Option<u32>,
}

impl ColumnPatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_column_order_accepts_float() {
        let column: Column = serde_json::from_value(json!({
            "id": "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "board_id": "11111111-1111-4111-8111-111111111111",
            "name": "Doing",
            "order": 2.0,
            "wip_limit": 3,
            "created_at": "2025-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(column.order, 2);
        assert_eq!(column.wip_limit, Some(3));
        assert!(!column.triggers_agents);
    }

    #[test]
    fn test_board_ignores_unknown_fields() {
        let board: Board = serde_json::from_value(json!({
            "id": "11111111-1111-4111-8111-111111111111",
            "name": "Project",
            "columns": [],
            "settings": {"theme": "dark"}
        }))
        .unwrap();
        assert_eq!(board.name, "Project");
        assert_eq!(board.settings["theme"], "dark");
        assert!(board.description.is_none());
    }

    #[test]
    fn test_patch_skips_unset_fields() {
        let patch = BoardPatch::rename("Renamed");
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value, json!({"name": "Renamed"}));
    }
}
