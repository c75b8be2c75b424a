//! Per-operation proxy locator.
//!
//! [`ProxyLocator`] resolves a [`GlobalId`] to a live proxy, recreating it
//! from recorded state when no live proxy owns the id. A locator is scoped
//! to a single undo, redo or state-load pass: build it, register the states
//! the pass may need, locate, then call
//! [`clear_created_proxies`](ProxyLocator::clear_created_proxies).

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::id::GlobalId;
use crate::manager::ProxyManager;
use crate::proxy::{proxy_header, PROPERTY_TAG, PROXY_TAG};
use crate::xml::XmlElement;

/// Resolver from identifiers to live proxies for one operation.
#[derive(Debug, Default)]
pub struct ProxyLocator {
    /// Full state document searched when no state was registered for an id.
    root: Option<XmlElement>,
    /// Explicitly registered `<Proxy>` states; the latest registration wins.
    states: HashMap<GlobalId, XmlElement>,
    /// Proxies instantiated by this locator.
    created: BTreeSet<GlobalId>,
}

impl ProxyLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a locator that searches `root` for proxy definitions.
    pub fn with_root(root: XmlElement) -> Self {
        ProxyLocator {
            root: Some(root),
            ..Self::default()
        }
    }

    pub fn set_root(&mut self, root: XmlElement) {
        self.root = Some(root);
    }

    /// Registers the `<Proxy>` state to use if `id` has to be recreated.
    pub fn register_state(&mut self, id: GlobalId, state: XmlElement) {
        self.states.insert(id, state);
    }

    pub fn has_state(&self, id: GlobalId) -> bool {
        self.state_for(id).is_some()
    }

    /// Ids instantiated during this operation.
    pub fn created_proxies(&self) -> impl Iterator<Item = GlobalId> + '_ {
        self.created.iter().copied()
    }

    /// Returns a live proxy for `id`, recreating it from registered state
    /// or the root document if needed. `None` means nothing defines `id`.
    pub fn locate_proxy(&mut self, pm: &mut dyn ProxyManager, id: GlobalId) -> Option<GlobalId> {
        let mut visiting = HashSet::new();
        self.locate_inner(pm, id, &mut visiting)
    }

    /// Like [`locate_proxy`](Self::locate_proxy) but with a caller-provided
    /// state taking precedence over registered ones.
    pub fn locate_or_create(
        &mut self,
        pm: &mut dyn ProxyManager,
        id: GlobalId,
        state: &XmlElement,
    ) -> Option<GlobalId> {
        if pm.contains(id) {
            return Some(id);
        }
        self.states.insert(id, state.clone());
        self.locate_proxy(pm, id)
    }

    fn state_for(&self, id: GlobalId) -> Option<&XmlElement> {
        self.states.get(&id).or_else(|| {
            self.root
                .as_ref()
                .and_then(|root| root.find_nested(PROXY_TAG, "id", &id.to_string()))
        })
    }

    fn locate_inner(
        &mut self,
        pm: &mut dyn ProxyManager,
        id: GlobalId,
        visiting: &mut HashSet<GlobalId>,
    ) -> Option<GlobalId> {
        if pm.contains(id) {
            return Some(id);
        }
        if !visiting.insert(id) {
            // Reference cycle: the proxy is being created further up.
            return None;
        }

        let Some(state) = self.state_for(id).cloned() else {
            tracing::debug!(id = %id, "locator miss: no state defines proxy");
            return None;
        };
        let (xml_group, xml_name, _) = match proxy_header(&state) {
            Ok(header) => header,
            Err(err) => {
                tracing::warn!(id = %id, error = %err, "recorded proxy state is malformed");
                return None;
            }
        };
        if let Err(err) = pm.create_proxy(&xml_group, &xml_name, Some(id)) {
            tracing::warn!(id = %id, error = %err, "failed to recreate proxy");
            return None;
        }
        self.created.insert(id);

        for referenced in referenced_ids(&state) {
            if self.locate_inner(pm, referenced, visiting).is_none() {
                tracing::debug!(id = %id, referenced = %referenced, "referenced proxy unresolved");
            }
        }
        if let Err(err) = pm.load_proxy_state(id, &state) {
            tracing::warn!(id = %id, error = %err, "failed to load recreated proxy state");
        }
        Some(id)
    }

    /// Drops the cache and releases proxies this locator created. Created
    /// proxies that nothing registered or referenced are destroyed.
    pub fn clear_created_proxies(&mut self, pm: &mut dyn ProxyManager) {
        for id in std::mem::take(&mut self.created) {
            pm.release_proxy(id);
        }
        self.states.clear();
    }
}

/// Ids referenced through `<Property><Proxy value=".."/></Property>`.
fn referenced_ids(state: &XmlElement) -> Vec<GlobalId> {
    state
        .children()
        .iter()
        .filter(|c| c.name() == PROPERTY_TAG)
        .flat_map(|p| p.children().iter().filter(|c| c.name() == PROXY_TAG))
        .filter_map(|c| c.attribute_as::<GlobalId>("value").ok())
        .collect()
}
