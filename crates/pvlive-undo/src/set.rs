//! Ordered groups of undo elements, undone and redone as one step.

use std::collections::BTreeSet;

use pvlive_core::{ProxyLocator, ProxyManager, SessionId, XmlElement};

use crate::element::{Direction, UndoElement};
use crate::error::UndoError;

/// Root tag of a serialized set.
pub const UNDO_SET_TAG: &str = "UndoSet";

/// A labelled sequence of elements in recording order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UndoSet {
    label: String,
    elements: Vec<UndoElement>,
}

impl UndoSet {
    /// Creates an empty set.
    pub fn new(label: impl Into<String>) -> Self {
        UndoSet {
            label: label.into(),
            elements: Vec::new(),
        }
    }

    /// Label shown for the set in undo and redo menus.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    /// Elements in recording order.
    pub fn elements(&self) -> &[UndoElement] {
        &self.elements
    }

    /// Element at `index` in recording order.
    pub fn element(&self, index: usize) -> Option<&UndoElement> {
        self.elements.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, UndoElement> {
        self.elements.iter()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Same as [`len`](Self::len).
    pub fn number_of_elements(&self) -> usize {
        self.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Appends without merging.
    pub fn push(&mut self, element: UndoElement) {
        self.elements.push(element);
    }

    /// Same as [`push`](Self::push).
    pub fn add_element(&mut self, element: UndoElement) {
        self.push(element);
    }

    /// Appends `element`, folding it into the last element when `merge` is
    /// set and the two can be merged. Returns `true` if it was folded.
    pub fn add(&mut self, element: UndoElement, merge: bool) -> bool {
        if merge {
            if let Some(last) = self.elements.last_mut() {
                if last.merge(&element) {
                    return true;
                }
            }
        }
        self.elements.push(element);
        false
    }

    pub fn clear(&mut self) {
        self.elements.clear();
    }

    /// Distinct sessions the elements were recorded in.
    pub fn sessions(&self) -> BTreeSet<SessionId> {
        self.elements.iter().filter_map(|e| e.session).collect()
    }

    /// Undoes every element, last recorded first.
    pub fn undo(&self, pm: &mut dyn ProxyManager) -> Result<(), UndoError> {
        self.apply(pm, Direction::Undo)
    }

    /// Redoes every element in recording order.
    pub fn redo(&self, pm: &mut dyn ProxyManager) -> Result<(), UndoError> {
        self.apply(pm, Direction::Redo)
    }

    /// Applies every element: reverse order for undo, recording order for
    /// redo. The pass gets its own locator, which is cleared whatever the
    /// outcome. The first failing element aborts the pass.
    pub fn apply(
        &self,
        pm: &mut dyn ProxyManager,
        direction: Direction,
    ) -> Result<(), UndoError> {
        let sessions = self.sessions();
        if sessions.len() > 1 {
            return Err(UndoError::MultipleSessions {
                sessions: sessions.into_iter().collect(),
            });
        }

        let mut locator = ProxyLocator::new();
        for element in &self.elements {
            element.register_states(&mut locator, direction);
        }

        let result = self.apply_elements(pm, &mut locator, direction);
        locator.clear_created_proxies(pm);
        match &result {
            Ok(()) => tracing::debug!(
                label = %self.label,
                ?direction,
                elements = self.len(),
                "applied undo set"
            ),
            Err(err) => {
                tracing::warn!(label = %self.label, ?direction, error = %err, "undo set failed")
            }
        }
        result
    }

    fn apply_elements(
        &self,
        pm: &mut dyn ProxyManager,
        locator: &mut ProxyLocator,
        direction: Direction,
    ) -> Result<(), UndoError> {
        let wrap = |index: usize, element: &UndoElement, source: UndoError| {
            UndoError::ElementFailed {
                index,
                kind: element.kind().tag(),
                source: Box::new(source),
            }
        };
        match direction {
            Direction::Undo => {
                for (index, element) in self.elements.iter().enumerate().rev() {
                    element
                        .undo(pm, locator)
                        .map_err(|err| wrap(index, element, err))?;
                }
            }
            Direction::Redo => {
                for (index, element) in self.elements.iter().enumerate() {
                    element
                        .redo(pm, locator)
                        .map_err(|err| wrap(index, element, err))?;
                }
            }
        }
        Ok(())
    }

    /// Serialized form: `<UndoSet label="..">` with one child per element.
    pub fn to_xml(&self) -> XmlElement {
        let mut root = XmlElement::new(UNDO_SET_TAG).with_attribute("label", &self.label);
        for element in &self.elements {
            root.add_child(element.to_xml());
        }
        root
    }
}

impl<'a> IntoIterator for &'a UndoSet {
    type Item = &'a UndoElement;
    type IntoIter = std::slice::Iter<'a, UndoElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}
