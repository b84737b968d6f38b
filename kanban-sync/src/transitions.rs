//! Transition legality between board columns.
//!
//! The map answers "may a task move from column A to column B?". A source
//! column with no entry is unrestricted; a source column with an empty entry may
//! not move anywhere except onto itself. The two are deliberately distinct.

use crate::types::{Column, ColumnId, Transition};
use std::collections::{HashMap, HashSet};

/// Adjacency from a source column to the columns it may move into
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionMap {
    edges: HashMap<ColumnId, HashSet<ColumnId>>,
}

impl TransitionMap {
    /// A map with no entries: every move is allowed
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Build the adjacency for a board.
    ///
    /// With `transitions`, every column in `columns` gets an entry holding the
    /// targets of its enabled transitions. Without, every column may move to
    /// every column.
    pub fn build(columns: &[Column], transitions: Option<&[Transition]>) -> Self {
        let mut edges: HashMap<ColumnId, HashSet<ColumnId>> = HashMap::new();

        match transitions {
            None => {
                let all: HashSet<ColumnId> = columns.iter().map(|c| c.id).collect();
                for column in columns {
                    edges.insert(column.id, all.clone());
                }
            }
            Some(transitions) => {
                for column in columns {
                    edges.entry(column.id).or_default();
                }
                for t in transitions.iter().filter(|t| t.is_enabled) {
                    edges
                        .entry(t.from_column_id)
                        .or_default()
                        .insert(t.to_column_id);
                }
            }
        }

        Self { edges }
    }

    /// Load the effective map as returned by the authority (`column -> [columns]`)
    pub fn from_allowed_map<I, T>(allowed: I) -> Self
    where
        I: IntoIterator<Item = (ColumnId, T)>,
        T: IntoIterator<Item = ColumnId>,
    {
        Self {
            edges: allowed
                .into_iter()
                .map(|(from, targets)| (from, targets.into_iter().collect()))
                .collect(),
        }
    }

    /// Whether a task may move from `from` to `to`
    pub fn is_allowed(&self, from: ColumnId, to: ColumnId) -> bool {
        if from == to {
            return true;
        }
        match self.edges.get(&from) {
            None => true,
            Some(targets) => targets.contains(&to),
        }
    }

    /// Targets explicitly listed for `from`, or `None` if `from` is unrestricted
    pub fn allowed_targets(&self, from: ColumnId) -> Option<&HashSet<ColumnId>> {
        self.edges.get(&from)
    }

    /// Whether `from` has an entry at all
    pub fn has_entry(&self, from: ColumnId) -> bool {
        self.edges.contains_key(&from)
    }

    /// Number of source columns with an entry
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Add an edge ahead of the authority confirming it.
    ///
    /// Discarded on the next rebuild.
    pub fn add_edge(&mut self, from: ColumnId, to: ColumnId) {
        self.edges.entry(from).or_default().insert(to);
    }

    /// Remove an edge ahead of the authority confirming it.
    ///
    /// The source entry is kept even when it becomes empty, so removing the last
    /// edge blocks the column rather than unrestricting it.
    pub fn remove_edge(&mut self, from: ColumnId, to: ColumnId) {
        if let Some(targets) = self.edges.get_mut(&from) {
            targets.remove(&to);
        }
    }

    /// Iterate over `(source, targets)` entries
    pub fn iter(&self) -> impl Iterator<Item = (&ColumnId, &HashSet<ColumnId>)> {
        self.edges.iter()
    }
}
