//! In-memory implementation of [`ProxyManager`].
//!
//! [`InMemoryProxyManager`] is a first-class backend for tests, for the
//! insitu endpoints and anywhere a real server connection isn't needed. It
//! keeps proxies, registrations and global-property links in ordered maps
//! so saved state is deterministic.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::Arc;

use crate::error::CoreError;
use crate::id::{GlobalId, SessionId};
use crate::manager::{
    GlobalPropertyLink, ObserverHandle, ProxyEvent, ProxyManager, ProxyObserver, COLLECTION_TAG,
    ITEM_TAG, STATE_TAG,
};
use crate::proxy::{Proxy, PropertyValue};
use crate::session::SessionRegistry;
use crate::xml::XmlElement;

struct ObserverEntry {
    priority: i32,
    observer: ObserverHandle,
}

/// Proxy manager holding all state in memory.
pub struct InMemoryProxyManager {
    session: SessionId,
    sessions: Arc<SessionRegistry>,
    proxies: BTreeMap<GlobalId, Proxy>,
    /// (group, name) -> proxy
    registrations: BTreeMap<(String, String), GlobalId>,
    links: BTreeSet<GlobalPropertyLink>,
    next_id: u32,
    /// Number of proxies ever instantiated.
    creation_count: usize,
    /// Kept sorted by descending priority; stable for equal priorities.
    observers: Vec<ObserverEntry>,
}

impl InMemoryProxyManager {
    /// Creates a manager with its own session registry and one open session.
    pub fn new() -> Self {
        Self::with_sessions(Arc::new(SessionRegistry::new()))
    }

    /// Creates a manager that opens its session in a shared registry.
    pub fn with_sessions(sessions: Arc<SessionRegistry>) -> Self {
        let session = sessions.open(Some("builtin:".to_string()));
        InMemoryProxyManager {
            session,
            sessions,
            proxies: BTreeMap::new(),
            registrations: BTreeMap::new(),
            links: BTreeSet::new(),
            next_id: 1,
            creation_count: 0,
            observers: Vec::new(),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Number of proxies instantiated since construction, including
    /// recreations of previously destroyed ids.
    pub fn creation_count(&self) -> usize {
        self.creation_count
    }

    pub fn proxy_count(&self) -> usize {
        self.proxies.len()
    }

    /// Convenience: create a proxy and register it in one call.
    pub fn create_registered(
        &mut self,
        group: &str,
        name: &str,
        xml_group: &str,
        xml_name: &str,
    ) -> Result<GlobalId, CoreError> {
        let id = self.create_proxy(xml_group, xml_name, None)?;
        self.register_proxy(group, name, id)?;
        Ok(id)
    }

    /// Convenience wrapper over [`add_observer`](ProxyManager::add_observer)
    /// for concrete observer types.
    pub fn observe<O: ProxyObserver + 'static>(&mut self, priority: i32, observer: Rc<RefCell<O>>) {
        self.add_observer(priority, observer);
    }

    fn notify(&self, event: ProxyEvent) {
        for entry in &self.observers {
            match entry.observer.try_borrow_mut() {
                Ok(mut observer) => observer.on_proxy_event(&event),
                Err(_) => tracing::warn!(
                    priority = entry.priority,
                    "observer is busy; dropping re-entrant proxy event"
                ),
            }
        }
    }

    fn proxy_mut(&mut self, id: GlobalId) -> Result<&mut Proxy, CoreError> {
        self.proxies
            .get_mut(&id)
            .ok_or(CoreError::ProxyNotFound { id })
    }

    fn is_registered(&self, id: GlobalId) -> bool {
        self.registrations.values().any(|r| *r == id)
    }

    fn is_referenced(&self, id: GlobalId) -> bool {
        self.proxies
            .values()
            .filter(|p| p.id != id)
            .any(|p| p.referenced_proxies().any(|r| r == id))
    }

    /// Destroys `id` if nothing keeps it alive, then does the same for the
    /// proxies it referenced.
    fn collect(&mut self, id: GlobalId) {
        if self.is_registered(id) || self.is_referenced(id) {
            return;
        }
        if let Some(proxy) = self.proxies.remove(&id) {
            tracing::debug!(id = %id, xml_name = %proxy.xml_name, "destroyed proxy");
            let children: BTreeSet<GlobalId> = proxy.referenced_proxies().collect();
            for child in children {
                self.collect(child);
            }
        }
    }
}

impl Default for InMemoryProxyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InMemoryProxyManager {
    fn drop(&mut self) {
        self.sessions.close(self.session);
    }
}

impl ProxyManager for InMemoryProxyManager {
    fn session_id(&self) -> SessionId {
        self.session
    }

    fn active_session_count(&self) -> usize {
        self.sessions.len()
    }

    fn create_proxy(
        &mut self,
        xml_group: &str,
        xml_name: &str,
        id: Option<GlobalId>,
    ) -> Result<GlobalId, CoreError> {
        let id = match id {
            Some(id) if self.proxies.contains_key(&id) => {
                return Err(CoreError::DuplicateProxy { id });
            }
            Some(id) => {
                self.next_id = self.next_id.max(id.0.saturating_add(1));
                id
            }
            None => {
                let id = GlobalId(self.next_id);
                self.next_id += 1;
                id
            }
        };
        self.proxies.insert(id, Proxy::new(id, xml_group, xml_name));
        self.creation_count += 1;
        tracing::debug!(id = %id, xml_group, xml_name, "created proxy");
        Ok(id)
    }

    fn proxy(&self, id: GlobalId) -> Option<&Proxy> {
        self.proxies.get(&id)
    }

    fn register_proxy(&mut self, group: &str, name: &str, id: GlobalId) -> Result<(), CoreError> {
        let state = self
            .proxies
            .get(&id)
            .ok_or(CoreError::ProxyNotFound { id })?
            .to_xml();
        let key = (group.to_string(), name.to_string());
        match self.registrations.get(&key) {
            Some(existing) if *existing == id => return Ok(()),
            Some(existing) => {
                return Err(CoreError::RegistrationConflict {
                    group: group.to_string(),
                    name: name.to_string(),
                    id: *existing,
                })
            }
            None => {}
        }
        self.registrations.insert(key, id);
        self.notify(ProxyEvent::Registered {
            session: self.session,
            group: group.to_string(),
            name: name.to_string(),
            id,
            state,
        });
        Ok(())
    }

    fn unregister_proxy(&mut self, group: &str, name: &str) -> Result<GlobalId, CoreError> {
        let key = (group.to_string(), name.to_string());
        let id = self
            .registrations
            .get(&key)
            .copied()
            .ok_or_else(|| CoreError::RegistrationNotFound {
                group: group.to_string(),
                name: name.to_string(),
            })?;
        let state = self
            .proxies
            .get(&id)
            .map(Proxy::to_xml)
            .ok_or(CoreError::ProxyNotFound { id })?;
        self.registrations.remove(&key);
        self.notify(ProxyEvent::UnRegistered {
            session: self.session,
            group: group.to_string(),
            name: name.to_string(),
            id,
            state,
        });
        self.collect(id);
        Ok(id)
    }

    fn find_registration(&self, group: &str, name: &str) -> Option<GlobalId> {
        self.registrations
            .get(&(group.to_string(), name.to_string()))
            .copied()
    }

    fn registrations(&self) -> Vec<(String, String, GlobalId)> {
        self.registrations
            .iter()
            .map(|((group, name), id)| (group.clone(), name.clone(), *id))
            .collect()
    }

    fn set_property(
        &mut self,
        id: GlobalId,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), CoreError> {
        let session = self.session;
        let proxy = self.proxy_mut(id)?;
        if proxy.property(name) == Some(&value) {
            return Ok(());
        }
        let old_value = proxy.property_state(name);
        proxy.set_property(name, value);
        let new_value = proxy.property_state(name);
        self.notify(ProxyEvent::PropertyModified {
            session,
            id,
            name: name.to_string(),
            old_value,
            new_value,
        });
        Ok(())
    }

    fn remove_property(&mut self, id: GlobalId, name: &str) -> Result<(), CoreError> {
        let session = self.session;
        let proxy = self.proxy_mut(id)?;
        let old_value = proxy.property_state(name);
        if proxy.remove_property(name).is_none() {
            return Err(CoreError::PropertyNotFound {
                id,
                name: name.to_string(),
            });
        }
        let new_value = proxy.property_state(name);
        self.notify(ProxyEvent::PropertyModified {
            session,
            id,
            name: name.to_string(),
            old_value,
            new_value,
        });
        Ok(())
    }

    fn load_proxy_state(&mut self, id: GlobalId, state: &XmlElement) -> Result<(), CoreError> {
        let session = self.session;
        let proxy = self.proxy_mut(id)?;
        let before = proxy.to_xml();
        proxy.load_state(state)?;
        let after = proxy.to_xml();
        if before != after {
            self.notify(ProxyEvent::StateChanged {
                session,
                id,
                before,
                after,
            });
        }
        Ok(())
    }

    fn load_property_state(&mut self, id: GlobalId, state: &XmlElement) -> Result<(), CoreError> {
        let session = self.session;
        let proxy = self.proxy_mut(id)?;
        let name = state.required_attribute("name")?.to_string();
        let old_value = proxy.property_state(&name);
        proxy.load_property_state(state)?;
        let new_value = proxy.property_state(&name);
        if old_value != new_value {
            self.notify(ProxyEvent::PropertyModified {
                session,
                id,
                name,
                old_value,
                new_value,
            });
        }
        Ok(())
    }

    fn update_information(&mut self, id: GlobalId) -> Result<(), CoreError> {
        let session = self.session;
        self.proxy_mut(id)?.information_generation += 1;
        self.notify(ProxyEvent::InformationUpdated { session, id });
        Ok(())
    }

    fn link_global_property(&mut self, link: GlobalPropertyLink) -> Result<(), CoreError> {
        if !self.proxies.contains_key(&link.proxy) {
            return Err(CoreError::ProxyNotFound { id: link.proxy });
        }
        if self.links.insert(link.clone()) {
            self.notify(ProxyEvent::GlobalPropertyLinkChanged {
                session: self.session,
                link,
                added: true,
            });
        }
        Ok(())
    }

    fn unlink_global_property(&mut self, link: &GlobalPropertyLink) -> Result<(), CoreError> {
        if !self.links.remove(link) {
            return Err(CoreError::LinkNotFound {
                manager: link.manager.clone(),
                global: link.global_property.clone(),
                id: link.proxy,
                property: link.property.clone(),
            });
        }
        self.notify(ProxyEvent::GlobalPropertyLinkChanged {
            session: self.session,
            link: link.clone(),
            added: false,
        });
        Ok(())
    }

    fn global_property_links(&self) -> Vec<GlobalPropertyLink> {
        self.links.iter().cloned().collect()
    }

    fn release_proxy(&mut self, id: GlobalId) {
        self.collect(id);
    }

    fn save_state(&self) -> XmlElement {
        let mut root = XmlElement::new(STATE_TAG);
        for proxy in self.proxies.values() {
            root.add_child(proxy.to_xml());
        }
        let mut current: Option<XmlElement> = None;
        for ((group, name), id) in &self.registrations {
            if current.as_ref().and_then(|c| c.attribute("name")) != Some(group.as_str()) {
                if let Some(done) = current.take() {
                    root.add_child(done);
                }
                current = Some(XmlElement::new(COLLECTION_TAG).with_attribute("name", group));
            }
            if let Some(collection) = current.as_mut() {
                collection.add_child(
                    XmlElement::new(ITEM_TAG)
                        .with_attribute("id", id)
                        .with_attribute("name", name),
                );
            }
        }
        if let Some(done) = current {
            root.add_child(done);
        }
        root
    }

    fn add_observer(&mut self, priority: i32, observer: ObserverHandle) {
        let position = self
            .observers
            .iter()
            .position(|entry| entry.priority < priority)
            .unwrap_or(self.observers.len());
        self.observers
            .insert(position, ObserverEntry { priority, observer });
    }
}
