//! Loader for full proxy-manager state documents.
//!
//! [`StateLoader`] applies a `<ServerManagerState>` document, as produced by
//! [`ProxyManager::save_state`], onto a proxy manager: proxies are located
//! (or recreated) through a [`ProxyLocator`] rooted at the document and get
//! their state loaded, then every collection item is registered.

use crate::error::CoreError;
use crate::id::GlobalId;
use crate::locator::ProxyLocator;
use crate::manager::{ProxyManager, COLLECTION_TAG, ITEM_TAG, STATE_TAG};
use crate::proxy::PROXY_TAG;
use crate::xml::XmlElement;

/// What a state load changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Proxies the load had to instantiate.
    pub created: Vec<GlobalId>,
    /// Registrations the load added.
    pub registered: Vec<(String, String, GlobalId)>,
}

/// Applies full state documents.
pub struct StateLoader;

impl StateLoader {
    /// Loads `root` onto `pm`.
    ///
    /// Registrations that already exist with the same id are left alone;
    /// a registration naming a different proxy is an error.
    pub fn load_state(
        pm: &mut dyn ProxyManager,
        root: &XmlElement,
    ) -> Result<LoadSummary, CoreError> {
        root.expect_name(STATE_TAG)?;
        let mut locator = ProxyLocator::with_root(root.clone());
        let result = Self::load_with(pm, root, &mut locator);
        locator.clear_created_proxies(pm);
        result
    }

    fn load_with(
        pm: &mut dyn ProxyManager,
        root: &XmlElement,
        locator: &mut ProxyLocator,
    ) -> Result<LoadSummary, CoreError> {
        let mut summary = LoadSummary::default();

        for element in root.children().iter().filter(|c| c.name() == PROXY_TAG) {
            let id = element.attribute_as::<GlobalId>("id")?;
            let created_earlier = locator.created_proxies().any(|c| c == id);
            let existed = pm.contains(id) && !created_earlier;
            locator
                .locate_proxy(pm, id)
                .ok_or(CoreError::ProxyNotFound { id })?;
            if existed {
                pm.load_proxy_state(id, element)?;
            } else if !summary.created.contains(&id) {
                summary.created.push(id);
            }
        }

        for collection in root.children().iter().filter(|c| c.name() == COLLECTION_TAG) {
            let group = collection.required_attribute("name")?;
            for item in collection.children().iter().filter(|c| c.name() == ITEM_TAG) {
                let id = item.attribute_as::<GlobalId>("id")?;
                let name = item.required_attribute("name")?;
                if pm.find_registration(group, name) == Some(id) {
                    continue;
                }
                locator
                    .locate_proxy(pm, id)
                    .ok_or(CoreError::ProxyNotFound { id })?;
                pm.register_proxy(group, name, id)?;
                summary
                    .registered
                    .push((group.to_string(), name.to_string(), id));
            }
        }

        tracing::debug!(
            created = summary.created.len(),
            registered = summary.registered.len(),
            "loaded proxy-manager state"
        );
        Ok(summary)
    }
}
