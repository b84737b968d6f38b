//! Latest automated execution per task, fed by push events.
//!
//! The tracker keeps only the most recent execution for each task. Events
//! naming an older execution than the one tracked are ignored, as are
//! milestone and clarification events for executions never seen.

use crate::channel::InboundEvent;
use crate::types::{Execution, ExecutionId, ExecutionStatus, TaskId};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;

/// Notification sent after a tracked execution changed
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionChange {
    pub task_id: TaskId,
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
}

struct Inner {
    executions: Mutex<IndexMap<TaskId, Execution>>,
    changes: broadcast::Sender<ExecutionChange>,
}

/// Cloneable handle to the execution state of one board
#[derive(Clone)]
pub struct ExecutionTracker {
    inner: Arc<Inner>,
}

impl Default for ExecutionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExecutionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionTracker")
            .field("tracked", &self.executions().len())
            .finish()
    }
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::with_buffer(crate::store::DEFAULT_CHANGE_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        let (changes, _) = broadcast::channel(buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                executions: Mutex::new(IndexMap::new()),
                changes,
            }),
        }
    }

    fn executions(&self) -> MutexGuard<'_, IndexMap<TaskId, Execution>> {
        self.inner
            .executions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionChange> {
        self.inner.changes.subscribe()
    }

    /// Apply an execution event. Returns whether tracked state changed.
    pub fn apply(&self, event: &InboundEvent) -> bool {
        let change = {
            let mut executions = self.executions();
            match event {
                InboundEvent::ExecutionStarted(execution) => {
                    replace(&mut executions, execution, true)
                }
                InboundEvent::ExecutionUpdated(execution)
                | InboundEvent::ExecutionCompleted(execution) => {
                    replace(&mut executions, execution, false)
                }
                InboundEvent::ExecutionMilestone {
                    execution_id,
                    task_id,
                    milestone,
                } => edit(&mut executions, *task_id, *execution_id, |e| {
                    if e.milestones.contains(milestone) {
                        return false;
                    }
                    e.milestones.push(milestone.clone());
                    true
                }),
                InboundEvent::ClarificationRequested {
                    execution_id,
                    task_id,
                    questions,
                } => edit(&mut executions, *task_id, *execution_id, |e| {
                    if e.status == ExecutionStatus::AwaitingClarification
                        && &e.clarification_questions == questions
                    {
                        return false;
                    }
                    e.status = ExecutionStatus::AwaitingClarification;
                    e.clarification_questions = questions.clone();
                    e.clarification_answers = None;
                    true
                }),
                InboundEvent::ClarificationAnswered {
                    execution_id,
                    task_id,
                    answers,
                } => edit(&mut executions, *task_id, *execution_id, |e| {
                    if e.clarification_answers.as_ref() == Some(answers) {
                        return false;
                    }
                    e.clarification_answers = Some(answers.clone());
                    if e.status == ExecutionStatus::AwaitingClarification {
                        e.status = ExecutionStatus::Running;
                    }
                    true
                }),
                _ => None,
            }
        };

        match change {
            Some(change) => {
                debug!(
                    task_id = %change.task_id,
                    execution_id = %change.execution_id,
                    status = ?change.status,
                    kind = event.kind(),
                    "execution updated"
                );
                let _ = self.inner.changes.send(change);
                true
            }
            None => false,
        }
    }

    /// Latest execution of a task
    pub fn latest(&self, task_id: TaskId) -> Option<Execution> {
        self.executions().get(&task_id).cloned()
    }

    /// Executions that have not reached a terminal status
    pub fn active(&self) -> Vec<Execution> {
        self.executions()
            .values()
            .filter(|e| !e.status.is_terminal())
            .cloned()
            .collect()
    }

    /// Executions waiting on an answer
    pub fn awaiting_clarification(&self) -> Vec<Execution> {
        self.executions()
            .values()
            .filter(|e| e.status == ExecutionStatus::AwaitingClarification)
            .cloned()
            .collect()
    }

    /// Forget a task's executions, e.g. after the task was deleted
    pub fn forget(&self, task_id: TaskId) -> Option<Execution> {
        self.executions().shift_remove(&task_id)
    }

    pub fn clear(&self) {
        self.executions().clear();
    }
}

fn change_of(execution: &Execution) -> ExecutionChange {
    ExecutionChange {
        task_id: execution.task_id,
        execution_id: execution.id,
        status: execution.status,
    }
}

/// Replace the tracked execution of a task. A `started` event for a new
/// execution supersedes the old one; other events must name the tracked
/// execution or introduce the first one.
fn replace(
    executions: &mut IndexMap<TaskId, Execution>,
    execution: &Execution,
    started: bool,
) -> Option<ExecutionChange> {
    match executions.get_mut(&execution.task_id) {
        Some(current) if current == execution => None,
        Some(current) if current.id != execution.id && !started => {
            debug!(execution_id = %execution.id, "ignoring event for superseded execution");
            None
        }
        Some(current) => {
            *current = execution.clone();
            Some(change_of(execution))
        }
        None => {
            executions.insert(execution.task_id, execution.clone());
            Some(change_of(execution))
        }
    }
}

fn edit(
    executions: &mut IndexMap<TaskId, Execution>,
    task_id: TaskId,
    execution_id: ExecutionId,
    apply: impl FnOnce(&mut Execution) -> bool,
) -> Option<ExecutionChange> {
    let execution = executions
        .get_mut(&task_id)
        .filter(|e| e.id == execution_id)?;
    apply(&mut *execution).then(|| change_of(execution))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClarificationQuestion, Milestone};
    use serde_json::json;

    fn started() -> Execution {
        Execution::started(ExecutionId::new(), TaskId::new())
    }

    fn milestone(name: &str) -> Milestone {
        Milestone {
            name: name.to_string(),
            message: None,
            reached_at: None,
        }
    }

    #[test]
    fn test_started_then_completed() {
        let tracker = ExecutionTracker::new();
        let execution = started();

        assert!(tracker.apply(&InboundEvent::ExecutionStarted(execution.clone())));
        assert_eq!(tracker.active().len(), 1);

        let done = Execution {
            status: ExecutionStatus::Completed,
            ..execution.clone()
        };
        assert!(tracker.apply(&InboundEvent::ExecutionCompleted(done.clone())));
        assert!(!tracker.apply(&InboundEvent::ExecutionCompleted(done)));
        assert!(tracker.active().is_empty());
        assert_eq!(
            tracker.latest(execution.task_id).unwrap().status,
            ExecutionStatus::Completed
        );
    }

    #[test]
    fn test_new_start_supersedes_old_execution() {
        let tracker = ExecutionTracker::new();
        let first = started();
        let second = Execution::started(ExecutionId::new(), first.task_id);

        tracker.apply(&InboundEvent::ExecutionStarted(first.clone()));
        tracker.apply(&InboundEvent::ExecutionStarted(second.clone()));

        let late = Execution {
            status: ExecutionStatus::Failed,
            ..first
        };
        assert!(!tracker.apply(&InboundEvent::ExecutionUpdated(late)));
        assert_eq!(tracker.latest(second.task_id).unwrap().id, second.id);
    }

    #[test]
    fn test_milestones_are_idempotent() {
        let tracker = ExecutionTracker::new();
        let execution = started();
        tracker.apply(&InboundEvent::ExecutionStarted(execution.clone()));

        let event = InboundEvent::ExecutionMilestone {
            execution_id: execution.id,
            task_id: execution.task_id,
            milestone: milestone("tests written"),
        };
        assert!(tracker.apply(&event));
        assert!(!tracker.apply(&event));
        assert_eq!(tracker.latest(execution.task_id).unwrap().milestones.len(), 1);
    }

    #[test]
    fn test_events_for_unknown_execution_ignored() {
        let tracker = ExecutionTracker::new();
        let event = InboundEvent::ExecutionMilestone {
            execution_id: ExecutionId::new(),
            task_id: TaskId::new(),
            milestone: milestone("x"),
        };
        assert!(!tracker.apply(&event));
    }

    #[test]
    fn test_clarification_round_trip() {
        let tracker = ExecutionTracker::new();
        let execution = started();
        let mut changes = tracker.subscribe();
        tracker.apply(&InboundEvent::ExecutionStarted(execution.clone()));

        let questions = vec![ClarificationQuestion {
            question: "Which database?".into(),
            kind: Some("single_choice".into()),
            options: vec!["postgres".into(), "sqlite".into()],
        }];
        assert!(tracker.apply(&InboundEvent::ClarificationRequested {
            execution_id: execution.id,
            task_id: execution.task_id,
            questions: questions.clone(),
        }));
        assert_eq!(tracker.awaiting_clarification().len(), 1);

        assert!(tracker.apply(&InboundEvent::ClarificationAnswered {
            execution_id: execution.id,
            task_id: execution.task_id,
            answers: json!({"0": "postgres"}),
        }));
        let latest = tracker.latest(execution.task_id).unwrap();
        assert_eq!(latest.status, ExecutionStatus::Running);
        assert_eq!(latest.clarification_questions, questions);
        assert!(tracker.awaiting_clarification().is_empty());

        let statuses: Vec<ExecutionStatus> =
            std::iter::from_fn(|| changes.try_recv().ok()).map(|c| c.status).collect();
        assert_eq!(
            statuses,
            vec![
                ExecutionStatus::Running,
                ExecutionStatus::AwaitingClarification,
                ExecutionStatus::Running
            ]
        );
    }

    #[test]
    fn test_board_events_ignored() {
        let tracker = ExecutionTracker::new();
        assert!(!tracker.apply(&InboundEvent::TaskDeleted {
            task_id: TaskId::new()
        }));
    }
}
