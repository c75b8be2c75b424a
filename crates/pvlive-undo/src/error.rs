//! Undo engine error types.
//!
//! Every failure is reported through [`UndoError`]; nothing in this crate
//! panics on an expected outcome such as an empty history or a locator miss.

use pvlive_core::{CoreError, GlobalId, SessionId};

/// Errors produced by undo elements, sets, the builder and the stack.
#[derive(Debug, thiserror::Error)]
pub enum UndoError {
    /// `undo` was called with an empty undo history.
    #[error("nothing to undo")]
    NothingToUndo,

    /// `redo` was called with an empty redo history.
    #[error("nothing to redo")]
    NothingToRedo,

    /// `end` was called with no recording window open.
    #[error("end() called without a matching begin()")]
    UnmatchedEnd,

    /// A recording scope was handed to a builder that did not issue it.
    #[error("recording scope belongs to another undo stack builder")]
    ForeignScope,

    /// An undo set references more than one session.
    #[error("undo set spans {} sessions", .sessions.len())]
    MultipleSessions { sessions: Vec<SessionId> },

    /// The element was created but its state was never recorded.
    #[error("{kind} element has no recorded state")]
    NoStateRecorded { kind: &'static str },

    /// The locator could not resolve an identifier.
    #[error("could not locate proxy GlobalId({id})", id = id.0)]
    ProxyUnresolved { id: GlobalId },

    /// An element of a set failed; the set is left partially applied.
    #[error("element {index} ({kind}) failed: {source}")]
    ElementFailed {
        index: usize,
        kind: &'static str,
        #[source]
        source: Box<UndoError>,
    },

    /// No element kind handles this serialized tag.
    #[error("unknown undo element <{tag}>")]
    UnknownElement { tag: String },

    /// The proxy manager rejected an operation.
    #[error(transparent)]
    Core(#[from] CoreError),
}
