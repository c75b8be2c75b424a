//! Undo/redo engine for proxy-manager state.
//!
//! An [`UndoStackBuilder`] observes a [`ProxyManager`](pvlive_core::ProxyManager)
//! and records its events as [`UndoElement`]s, grouped into [`UndoSet`]s
//! that an [`UndoStack`] undoes and redoes. Elements and sets serialize to
//! XML and are read back by [`UndoRedoStateLoader`].
//!
//! # Modules
//!
//! - [`element`]: the six element kinds and their undo/redo semantics
//! - [`set`]: ordered element groups applied as one step
//! - [`builder`]: event recording between `begin` and `end`
//! - [`stack`]: bounded undo and redo histories
//! - [`loader`]: element reconstruction from XML
//! - [`config`]: merge and depth options

pub mod builder;
pub mod config;
pub mod element;
pub mod error;
pub mod loader;
pub mod set;
pub mod stack;

pub use builder::{RecordingScope, UndoStackBuilder, BUILDER_PRIORITY};
pub use config::UndoConfig;
pub use element::{Change, Direction, ElementKind, ElementSummary, UndoElement};
pub use error::UndoError;
pub use loader::UndoRedoStateLoader;
pub use set::{UndoSet, UNDO_SET_TAG};
pub use stack::UndoStack;
