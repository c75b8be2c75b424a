//! Bounded undo and redo histories.

use std::collections::VecDeque;

use pvlive_core::ProxyManager;

use crate::config::UndoConfig;
use crate::element::Direction;
use crate::error::UndoError;
use crate::set::UndoSet;

/// Undo history plus redo history of [`UndoSet`]s.
///
/// A set moves between the two histories only when it applied without
/// error. A failed undo or redo leaves both histories as they were; the
/// proxy manager may however be left partially rolled back.
#[derive(Debug, Default)]
pub struct UndoStack {
    config: UndoConfig,
    /// Oldest first.
    undo: VecDeque<UndoSet>,
    /// Most recently undone last.
    redo: Vec<UndoSet>,
}

impl UndoStack {
    pub fn new(config: UndoConfig) -> Self {
        UndoStack {
            config,
            undo: VecDeque::new(),
            redo: Vec::new(),
        }
    }

    pub fn config(&self) -> &UndoConfig {
        &self.config
    }

    /// Records a new set. Invalidates the redo history.
    pub fn push(&mut self, set: UndoSet) {
        self.redo.clear();
        self.push_undo(set);
    }

    fn push_undo(&mut self, set: UndoSet) {
        self.undo.push_back(set);
        if let Some(depth) = self.config.stack_depth {
            while self.undo.len() > depth {
                if let Some(dropped) = self.undo.pop_front() {
                    tracing::debug!(
                        label = %dropped.label(),
                        "undo history full; dropping oldest set"
                    );
                }
            }
        }
    }

    /// Undoes the most recent set.
    pub fn undo(&mut self, pm: &mut dyn ProxyManager) -> Result<(), UndoError> {
        let set = self.undo.back().ok_or(UndoError::NothingToUndo)?;
        set.apply(pm, Direction::Undo)?;
        if let Some(set) = self.undo.pop_back() {
            self.redo.push(set);
        }
        Ok(())
    }

    /// Redoes the most recently undone set.
    pub fn redo(&mut self, pm: &mut dyn ProxyManager) -> Result<(), UndoError> {
        let set = self.redo.last().ok_or(UndoError::NothingToRedo)?;
        set.apply(pm, Direction::Redo)?;
        if let Some(set) = self.redo.pop() {
            self.push_undo(set);
        }
        Ok(())
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_label(&self) -> Option<&str> {
        self.undo.back().map(UndoSet::label)
    }

    pub fn redo_label(&self) -> Option<&str> {
        self.redo.last().map(UndoSet::label)
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Undo history, oldest first.
    pub fn undo_sets(&self) -> impl Iterator<Item = &UndoSet> {
        self.undo.iter()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labelled(label: &str) -> UndoSet {
        UndoSet::new(label)
    }

    #[test]
    fn empty_stack_reports_nothing_to_do() {
        let mut pm = pvlive_core::InMemoryProxyManager::new();
        let mut stack = UndoStack::default();
        assert!(matches!(stack.undo(&mut pm), Err(UndoError::NothingToUndo)));
        assert!(matches!(stack.redo(&mut pm), Err(UndoError::NothingToRedo)));
    }

    #[test]
    fn depth_bounds_undo_history() {
        let mut stack = UndoStack::new(UndoConfig {
            stack_depth: Some(2),
            ..UndoConfig::default()
        });
        stack.push(labelled("a"));
        stack.push(labelled("b"));
        stack.push(labelled("c"));
        assert_eq!(stack.undo_len(), 2);
        let labels: Vec<&str> = stack.undo_sets().map(UndoSet::label).collect();
        assert_eq!(labels, ["b", "c"]);
    }

    #[test]
    fn undo_and_redo_move_sets_between_histories() {
        let mut pm = pvlive_core::InMemoryProxyManager::new();
        let mut stack = UndoStack::default();
        stack.push(labelled("a"));
        stack.push(labelled("b"));

        stack.undo(&mut pm).unwrap();
        assert_eq!(stack.undo_label(), Some("a"));
        assert_eq!(stack.redo_label(), Some("b"));

        stack.redo(&mut pm).unwrap();
        assert_eq!(stack.undo_label(), Some("b"));
        assert!(!stack.can_redo());

        stack.undo(&mut pm).unwrap();
        stack.push(labelled("c"));
        assert!(!stack.can_redo());

        stack.clear();
        assert!(!stack.can_undo());
    }
}
