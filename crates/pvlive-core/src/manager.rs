//! The [`ProxyManager`] trait: the object registry and creation contract.
//!
//! The undo engine, the locator and the insitu link only talk to proxies
//! through this trait. [`InMemoryProxyManager`](crate::memory::InMemoryProxyManager)
//! is the bundled backend.
//!
//! Every mutation publishes a [`ProxyEvent`] to the registered
//! [`ProxyObserver`]s. Observers are notified in descending priority order;
//! observers with equal priority are notified in registration order.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::{GlobalId, SessionId};
use crate::proxy::{Proxy, PropertyValue};
use crate::xml::XmlElement;

/// Root tag of a full proxy-manager state document.
pub const STATE_TAG: &str = "ServerManagerState";
/// Per-group registration block inside a state document.
pub const COLLECTION_TAG: &str = "ProxyCollection";
/// One registration inside a collection.
pub const ITEM_TAG: &str = "Item";

/// One link between a global property and a proxy property.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GlobalPropertyLink {
    /// Name of the global-properties manager, e.g. "ColorPalette".
    pub manager: String,
    /// Name of the global property, e.g. "ForegroundColor".
    pub global_property: String,
    pub proxy: GlobalId,
    pub property: String,
}

/// Notification published by a proxy manager after a mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyEvent {
    Registered {
        session: SessionId,
        group: String,
        name: String,
        id: GlobalId,
        /// Proxy state at registration time.
        state: XmlElement,
    },
    UnRegistered {
        session: SessionId,
        group: String,
        name: String,
        id: GlobalId,
        /// Proxy state just before it was unregistered.
        state: XmlElement,
    },
    PropertyModified {
        session: SessionId,
        id: GlobalId,
        name: String,
        /// `<Property>` state before the change. A property that did not
        /// exist is recorded in its absent form.
        old_value: XmlElement,
        /// `<Property>` state after the change; absent form on removal.
        new_value: XmlElement,
    },
    StateChanged {
        session: SessionId,
        id: GlobalId,
        before: XmlElement,
        after: XmlElement,
    },
    GlobalPropertyLinkChanged {
        session: SessionId,
        link: GlobalPropertyLink,
        added: bool,
    },
    InformationUpdated {
        session: SessionId,
        id: GlobalId,
    },
}

/// Receiver of [`ProxyEvent`]s.
pub trait ProxyObserver {
    fn on_proxy_event(&mut self, event: &ProxyEvent);
}

/// Shared handle to an observer. Proxy managers are single-threaded.
pub type ObserverHandle = Rc<RefCell<dyn ProxyObserver>>;

/// Object registry and creation collaborator.
pub trait ProxyManager {
    /// Session this manager belongs to.
    fn session_id(&self) -> SessionId;

    /// Number of sessions alive in the process.
    fn active_session_count(&self) -> usize;

    /// Instantiates a proxy from its XML definition. With `id` set the proxy
    /// is created under that identifier (recreation from recorded state).
    fn create_proxy(
        &mut self,
        xml_group: &str,
        xml_name: &str,
        id: Option<GlobalId>,
    ) -> Result<GlobalId, CoreError>;

    fn proxy(&self, id: GlobalId) -> Option<&Proxy>;

    fn contains(&self, id: GlobalId) -> bool {
        self.proxy(id).is_some()
    }

    fn register_proxy(&mut self, group: &str, name: &str, id: GlobalId) -> Result<(), CoreError>;

    /// Removes a registration, returning the proxy it named.
    fn unregister_proxy(&mut self, group: &str, name: &str) -> Result<GlobalId, CoreError>;

    fn find_registration(&self, group: &str, name: &str) -> Option<GlobalId>;

    /// All registrations as `(group, name, id)`, sorted by group then name.
    fn registrations(&self) -> Vec<(String, String, GlobalId)>;

    fn set_property(
        &mut self,
        id: GlobalId,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), CoreError>;

    /// Deletes a property. Fails with [`CoreError::PropertyNotFound`] if the
    /// proxy has no such property.
    fn remove_property(&mut self, id: GlobalId, name: &str) -> Result<(), CoreError>;

    /// Loads a `<Proxy>` state element onto a live proxy, replacing all of
    /// its properties.
    fn load_proxy_state(&mut self, id: GlobalId, state: &XmlElement) -> Result<(), CoreError>;

    /// Loads a `<Property>` state element onto a live proxy. The property is
    /// added if missing, and removed if the element is in its absent form.
    fn load_property_state(&mut self, id: GlobalId, state: &XmlElement) -> Result<(), CoreError>;

    /// Re-fetches information for a proxy from the server side.
    fn update_information(&mut self, id: GlobalId) -> Result<(), CoreError>;

    fn link_global_property(&mut self, link: GlobalPropertyLink) -> Result<(), CoreError>;

    fn unlink_global_property(&mut self, link: &GlobalPropertyLink) -> Result<(), CoreError>;

    fn global_property_links(&self) -> Vec<GlobalPropertyLink>;

    /// Drops a transient reference. The proxy is destroyed if it is neither
    /// registered nor referenced from another proxy's property.
    fn release_proxy(&mut self, id: GlobalId);

    /// Full `<ServerManagerState>` document.
    fn save_state(&self) -> XmlElement;

    fn add_observer(&mut self, priority: i32, observer: ObserverHandle);
}
