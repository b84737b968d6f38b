//! Editing the active workflow's transitions

mod editor;

pub use editor::{
    step, EditorContext, EditorEvent, EditorState, Effect, PendingEdit, WorkflowEditor,
};
