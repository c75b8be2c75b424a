//! Core state model shared by the undo engine and the insitu link.
//!
//! # Modules
//!
//! - [`xml`]: ordered XML element tree, the serialized form of all state
//! - [`id`]: `GlobalId` and `SessionId` newtypes
//! - [`session`]: registry of live sessions
//! - [`proxy`]: proxies, property values and their XML state
//! - [`manager`]: the `ProxyManager` contract and its event model
//! - [`memory`]: `InMemoryProxyManager` backend
//! - [`locator`]: per-operation `ProxyLocator`
//! - [`state_loader`]: loader for full `<ServerManagerState>` documents

pub mod error;
pub mod id;
pub mod locator;
pub mod manager;
pub mod memory;
pub mod proxy;
pub mod session;
pub mod state_loader;
pub mod xml;

// Re-export commonly used types
pub use error::CoreError;
pub use id::{GlobalId, SessionId};
pub use locator::ProxyLocator;
pub use manager::{GlobalPropertyLink, ObserverHandle, ProxyEvent, ProxyManager, ProxyObserver};
pub use memory::InMemoryProxyManager;
pub use proxy::{PropertyValue, Proxy};
pub use session::SessionRegistry;
pub use state_loader::{LoadSummary, StateLoader};
pub use xml::XmlElement;
