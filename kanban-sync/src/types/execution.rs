//! Lifecycle records for automated executions attached to tasks

use super::ids::{ExecutionId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of an execution as reported by the authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    AwaitingClarification,
}

impl ExecutionStatus {
    /// Whether the execution can no longer change
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A milestone reached during an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reached_at: Option<DateTime<Utc>>,
}

/// A question the execution needs answered before it can continue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationQuestion {
    pub question: String,
    /// `single_choice`, `multiple_choice` or `free_text`
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// Locally tracked state of the latest execution for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub task_id: TaskId,
    pub status: ExecutionStatus,
    #[serde(default, alias = "current_phase", skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default = "first_iteration")]
    pub iteration: u32,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
    #[serde(default)]
    pub clarification_questions: Vec<ClarificationQuestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification_answers: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Request to start an automated execution for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartExecution {
    /// `development`, `quick_development`, `architecture_only` or `review_only`
    pub workflow_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl Default for StartExecution {
    fn default() -> Self {
        Self::new("development")
    }
}

impl StartExecution {
    pub fn new(workflow_type: impl Into<String>) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// The authority's answer to submitted clarification answers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationReceipt {
    /// Execution resuming the work
    pub execution_id: ExecutionId,
    pub task_id: TaskId,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn first_iteration() -> u32 {
    1
}

impl Execution {
    /// A freshly started execution
    pub fn started(id: ExecutionId, task_id: TaskId) -> Self {
        Self {
            id,
            task_id,
            status: ExecutionStatus::Running,
            phase: None,
            iteration: 1,
            milestones: Vec::new(),
            clarification_questions: Vec::new(),
            clarification_answers: None,
            error_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execution_record_from_authority() {
        let execution: Execution = serde_json::from_value(json!({
            "id": "44444444-4444-4444-8444-444444444444",
            "task_id": "22222222-2222-4222-8222-222222222222",
            "board_id": "11111111-1111-4111-8111-111111111111",
            "workflow_type": "development",
            "status": "awaiting_clarification",
            "current_phase": "planning",
            "iteration": 2,
            "max_iterations": 3
        }))
        .unwrap();
        assert_eq!(execution.status, ExecutionStatus::AwaitingClarification);
        assert_eq!(execution.phase.as_deref(), Some("planning"));
        assert_eq!(execution.iteration, 2);
    }

    #[test]
    fn test_start_request_defaults_to_development() {
        let body = serde_json::to_value(StartExecution::default()).unwrap();
        assert_eq!(body, json!({"workflow_type": "development"}));
    }
}
