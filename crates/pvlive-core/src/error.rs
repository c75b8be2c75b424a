//! Core error types for pvlive-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! XML state model, the proxy registry and the proxy locator.

use crate::id::GlobalId;
use thiserror::Error;

/// Core errors produced by the pvlive-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The XML reader or writer failed.
    #[error("xml error: {reason}")]
    Xml { reason: String },

    /// The document parsed but has no root element, or more than one.
    #[error("malformed xml document: {reason}")]
    MalformedDocument { reason: String },

    /// A required attribute is missing from an element.
    #[error("element <{element}> is missing attribute '{attribute}'")]
    MissingAttribute { element: String, attribute: String },

    /// An attribute is present but does not parse as the requested type.
    #[error("element <{element}> has invalid value '{value}' for attribute '{attribute}'")]
    InvalidAttribute {
        element: String,
        attribute: String,
        value: String,
    },

    /// An element of the wrong kind was handed to a loader.
    #[error("unexpected element <{found}>, expected <{expected}>")]
    UnexpectedElement { expected: String, found: String },

    /// No live proxy owns the identifier.
    #[error("proxy not found: GlobalId({id})", id = id.0)]
    ProxyNotFound { id: GlobalId },

    /// A proxy with this identifier already exists.
    #[error("duplicate proxy id: GlobalId({id})", id = id.0)]
    DuplicateProxy { id: GlobalId },

    /// The proxy has no property with this name.
    #[error("property '{name}' not found on GlobalId({id})", id = id.0)]
    PropertyNotFound { id: GlobalId, name: String },

    /// No proxy is registered under `group`/`name`.
    #[error("no proxy registered as '{group}'/'{name}'")]
    RegistrationNotFound { group: String, name: String },

    /// A different proxy is already registered under `group`/`name`.
    #[error("'{group}'/'{name}' is already registered to GlobalId({id})", id = id.0)]
    RegistrationConflict {
        group: String,
        name: String,
        id: GlobalId,
    },

    /// A global-property link does not exist.
    #[error("no link from {manager}.{global} to GlobalId({id}).{property}", id = id.0)]
    LinkNotFound {
        manager: String,
        global: String,
        id: GlobalId,
        property: String,
    },
}

impl CoreError {
    pub(crate) fn xml(err: impl std::fmt::Display) -> Self {
        CoreError::Xml {
            reason: err.to_string(),
        }
    }
}
