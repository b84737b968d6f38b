//! Workflow editor as an explicit state machine.
//!
//! [`step`] is a pure `(state, event) -> (state, effects)` table that only
//! touches the [`EditorContext`] it is given. [`WorkflowEditor`] owns the
//! state and context, runs the effects against a [`BoardStore`] and feeds
//! their outcome back in as events.
//!
//! Edge edits are optimistic: the store's adjacency gains or loses the edge as
//! soon as the edit starts, and is rebuilt from the authority's transitions
//! whether the save succeeds or fails.

use crate::error::SyncError;
use crate::store::BoardStore;
use crate::transitions::TransitionMap;
use crate::types::{
    Column, ColumnId, NewTransition, Transition, TransitionId, WorkflowDefinition, WorkflowId,
};
use std::collections::VecDeque;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EditorState {
    #[default]
    Idle,
    Loading,
    Ready,
    Saving,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditorEvent {
    Load,
    Loaded {
        columns: Vec<Column>,
        workflow: Option<WorkflowDefinition>,
    },
    LoadFailed {
        message: String,
    },
    SelectColumn(ColumnId),
    ClearSelection,
    AddTransition {
        from: ColumnId,
        to: ColumnId,
    },
    RemoveTransition {
        from: ColumnId,
        to: ColumnId,
    },
    /// The authority accepted the pending edit; carries the created transition
    SaveSucceeded {
        transition: Option<Transition>,
    },
    SaveFailed {
        message: String,
    },
}

/// Work the editor asks its runner to perform
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    FetchWorkflow,
    CreateTransition { from: ColumnId, to: ColumnId },
    DeleteTransition { id: TransitionId, from: ColumnId, to: ColumnId },
}

/// Edit waiting for the authority
#[derive(Debug, Clone, PartialEq)]
pub enum PendingEdit {
    Add { from: ColumnId, to: ColumnId },
    Remove { transition: Transition },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditorContext {
    pub columns: Vec<Column>,
    pub workflow_id: Option<WorkflowId>,
    pub transitions: Vec<Transition>,
    /// Adjacency including the pending edit
    pub adjacency: TransitionMap,
    pub selected: Option<ColumnId>,
    pub error: Option<String>,
    pub pending: Option<PendingEdit>,
}

impl EditorContext {
    fn rebuild(&mut self) {
        self.adjacency = match self.workflow_id {
            Some(_) => TransitionMap::build(&self.columns, Some(self.transitions.as_slice())),
            None => TransitionMap::build(&self.columns, None),
        };
    }

    fn has_column(&self, id: ColumnId) -> bool {
        self.columns.iter().any(|c| c.id == id)
    }

    fn find_transition(&self, from: ColumnId, to: ColumnId) -> Option<&Transition> {
        self.transitions
            .iter()
            .find(|t| t.from_column_id == from && t.to_column_id == to)
    }
}

/// Advance the editor. Returns `None` when `event` is not handled in `state`;
/// the context is then left untouched.
pub fn step(
    state: EditorState,
    event: &EditorEvent,
    ctx: &mut EditorContext,
) -> Option<(EditorState, Vec<Effect>)> {
    use EditorEvent as E;
    use EditorState as S;

    match (state, event) {
        (S::Idle | S::Ready | S::Error, E::Load) => {
            ctx.error = None;
            Some((S::Loading, vec![Effect::FetchWorkflow]))
        }
        (S::Loading, E::Loaded { columns, workflow }) => {
            ctx.columns = columns.clone();
            ctx.workflow_id = workflow.as_ref().map(|w| w.id);
            ctx.transitions = workflow
                .as_ref()
                .map(|w| w.transitions.clone())
                .unwrap_or_default();
            ctx.selected = ctx.selected.filter(|id| ctx.has_column(*id));
            ctx.pending = None;
            ctx.rebuild();
            Some((S::Ready, vec![]))
        }
        (S::Loading, E::LoadFailed { message }) => {
            ctx.error = Some(message.clone());
            Some((S::Error, vec![]))
        }
        (S::Ready, E::SelectColumn(id)) if ctx.has_column(*id) => {
            ctx.selected = Some(*id);
            Some((S::Ready, vec![]))
        }
        (S::Ready, E::ClearSelection) => {
            ctx.selected = None;
            Some((S::Ready, vec![]))
        }
        (S::Ready, E::AddTransition { from, to }) => {
            if ctx.workflow_id.is_none() {
                ctx.error = Some("the board has no active workflow".to_string());
                return Some((S::Ready, vec![]));
            }
            if from == to || !ctx.has_column(*from) || !ctx.has_column(*to) {
                return None;
            }
            if ctx.find_transition(*from, *to).is_some() {
                return None;
            }
            ctx.adjacency.add_edge(*from, *to);
            ctx.pending = Some(PendingEdit::Add { from: *from, to: *to });
            ctx.error = None;
            Some((S::Saving, vec![Effect::CreateTransition { from: *from, to: *to }]))
        }
        (S::Ready, E::RemoveTransition { from, to }) => {
            let transition = ctx.find_transition(*from, *to)?.clone();
            ctx.adjacency.remove_edge(*from, *to);
            let effect = Effect::DeleteTransition {
                id: transition.id,
                from: *from,
                to: *to,
            };
            ctx.pending = Some(PendingEdit::Remove { transition });
            ctx.error = None;
            Some((S::Saving, vec![effect]))
        }
        (S::Saving, E::SaveSucceeded { transition }) => {
            match (ctx.pending.take(), transition) {
                (Some(PendingEdit::Add { .. }), Some(created)) => {
                    ctx.transitions.push(created.clone());
                }
                (Some(PendingEdit::Remove { transition }), _) => {
                    ctx.transitions.retain(|t| t.id != transition.id);
                }
                _ => {}
            }
            ctx.rebuild();
            Some((S::Ready, vec![]))
        }
        (S::Saving, E::SaveFailed { message }) => {
            ctx.pending = None;
            ctx.error = Some(message.clone());
            ctx.rebuild();
            Some((S::Ready, vec![]))
        }
        _ => None,
    }
}

/// Runs the editor state machine against a store
#[derive(Debug)]
pub struct WorkflowEditor {
    store: BoardStore,
    state: EditorState,
    context: EditorContext,
}

impl WorkflowEditor {
    pub fn new(store: BoardStore) -> Self {
        Self {
            store,
            state: EditorState::Idle,
            context: EditorContext::default(),
        }
    }

    pub fn state(&self) -> EditorState {
        self.state
    }

    pub fn context(&self) -> &EditorContext {
        &self.context
    }

    /// Feed an event and run every effect it leads to.
    ///
    /// Returns the first effect failure after the machine has settled. An
    /// event the current state does not handle is ignored.
    pub async fn dispatch(&mut self, event: EditorEvent) -> Result<EditorState, SyncError> {
        let mut queue = VecDeque::from([event]);
        let mut failure = None;

        while let Some(event) = queue.pop_front() {
            let Some((next, effects)) = step(self.state, &event, &mut self.context) else {
                debug!(state = ?self.state, ?event, "editor event ignored");
                continue;
            };
            debug!(from = ?self.state, to = ?next, "editor transition");
            self.state = next;

            for effect in effects {
                let (follow_up, error) = self.run(effect).await;
                queue.push_back(follow_up);
                if failure.is_none() {
                    failure = error;
                }
            }
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(self.state),
        }
    }

    pub async fn load(&mut self) -> Result<EditorState, SyncError> {
        self.dispatch(EditorEvent::Load).await
    }

    pub async fn add_transition(
        &mut self,
        from: ColumnId,
        to: ColumnId,
    ) -> Result<EditorState, SyncError> {
        self.dispatch(EditorEvent::AddTransition { from, to }).await
    }

    pub async fn remove_transition(
        &mut self,
        from: ColumnId,
        to: ColumnId,
    ) -> Result<EditorState, SyncError> {
        self.dispatch(EditorEvent::RemoveTransition { from, to }).await
    }

    async fn run(&self, effect: Effect) -> (EditorEvent, Option<SyncError>) {
        match effect {
            Effect::FetchWorkflow => match self.store.load_workflow().await {
                Ok(workflow) => {
                    let columns = self.store.snapshot().columns.into_values().collect();
                    (EditorEvent::Loaded { columns, workflow }, None)
                }
                Err(e) => (
                    EditorEvent::LoadFailed {
                        message: e.to_string(),
                    },
                    Some(e),
                ),
            },
            Effect::CreateTransition { from, to } => {
                self.store.add_transition_edge(from, to);
                match self
                    .store
                    .create_transition(&NewTransition::new(from, to))
                    .await
                {
                    Ok(created) => (
                        EditorEvent::SaveSucceeded {
                            transition: Some(created),
                        },
                        None,
                    ),
                    Err(e) => self.revert(e),
                }
            }
            Effect::DeleteTransition { id, from, to } => {
                self.store.remove_transition_edge(from, to);
                match self.store.delete_transition(id).await {
                    Ok(()) => (EditorEvent::SaveSucceeded { transition: None }, None),
                    Err(e) => self.revert(e),
                }
            }
        }
    }

    fn revert(&self, error: SyncError) -> (EditorEvent, Option<SyncError>) {
        warn!(error = %error, "transition edit rejected, reverting");
        self.store.rebuild_transitions();
        (
            EditorEvent::SaveFailed {
                message: error.to_string(),
            },
            Some(error),
        )
    }
}
