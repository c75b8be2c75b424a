//! Undo elements: serializable, invertible units of recorded change.
//!
//! [`UndoElement`] wraps one [`Change`] together with the session it was
//! recorded in. Each change kind knows how to undo and redo itself through a
//! [`ProxyManager`] and a per-operation [`ProxyLocator`], which states it
//! needs registered with that locator before a pass starts, and how to read
//! and write its XML form. Neither `undo` nor `redo` is idempotent: calling
//! one twice without the other in between is not supported.

use serde::{Deserialize, Serialize};

use pvlive_core::proxy::proxy_header;
use pvlive_core::{
    CoreError, GlobalId, GlobalPropertyLink, ProxyLocator, ProxyManager, SessionId, XmlElement,
};

use crate::error::UndoError;

/// Which way a set is being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Undo,
    Redo,
}

/// Discriminant of a [`Change`], written as the element's XML tag name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    /// A proxy was registered under a group and name.
    ProxyRegister = 0,
    /// A registration was removed.
    ProxyUnRegister = 1,
    /// One property changed value.
    PropertyModification = 2,
    /// A whole proxy state was loaded.
    ProxyStateChanged = 3,
    /// A global property was linked to or unlinked from a proxy property.
    GlobalPropertiesLink = 4,
    /// Proxy information was re-fetched. Only replayed forward.
    UpdateInformation = 5,
}

impl ElementKind {
    /// Every kind, in discriminant order.
    pub const ALL: [ElementKind; 6] = [
        ElementKind::ProxyRegister,
        ElementKind::ProxyUnRegister,
        ElementKind::PropertyModification,
        ElementKind::ProxyStateChanged,
        ElementKind::GlobalPropertiesLink,
        ElementKind::UpdateInformation,
    ];

    /// XML tag name of the kind.
    pub fn tag(self) -> &'static str {
        match self {
            ElementKind::ProxyRegister => "ProxyRegister",
            ElementKind::ProxyUnRegister => "ProxyUnRegister",
            ElementKind::PropertyModification => "PropertyModification",
            ElementKind::ProxyStateChanged => "ProxyStateChanged",
            ElementKind::GlobalPropertiesLink => "GlobalPropertiesLink",
            ElementKind::UpdateInformation => "UpdateInformation",
        }
    }

    /// Inverse of [`tag`](Self::tag).
    pub fn from_tag(tag: &str) -> Option<ElementKind> {
        match tag {
            "ProxyRegister" => Some(ElementKind::ProxyRegister),
            "ProxyUnRegister" => Some(ElementKind::ProxyUnRegister),
            "PropertyModification" => Some(ElementKind::PropertyModification),
            "ProxyStateChanged" => Some(ElementKind::ProxyStateChanged),
            "GlobalPropertiesLink" => Some(ElementKind::GlobalPropertiesLink),
            "UpdateInformation" => Some(ElementKind::UpdateInformation),
            _ => None,
        }
    }
}

/// Payload of ProxyRegister and ProxyUnRegister.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRegistration {
    pub xml_group_name: String,
    pub xml_proxy_name: String,
    pub group_name: String,
    pub proxy_name: String,
    pub id: GlobalId,
    /// `<Proxy>` state captured when the event fired.
    pub state: Option<XmlElement>,
}

/// Payload of PropertyModification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyModification {
    pub id: GlobalId,
    pub name: String,
    /// `<Property>` state before the change.
    pub last_pushed_value: Option<XmlElement>,
    /// `<Property>` state after the change.
    pub new_value: Option<XmlElement>,
}

/// Payload of ProxyStateChanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyStateChange {
    pub id: GlobalId,
    pub before: Option<XmlElement>,
    pub after: Option<XmlElement>,
}

/// Payload of GlobalPropertiesLink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalPropertiesLinkChange {
    pub link: GlobalPropertyLink,
    /// `true` if the recorded call added the link, `false` if it removed it.
    pub link_added: bool,
}

/// Payload of UpdateInformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InformationUpdate {
    pub id: GlobalId,
}

/// One recorded change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    ProxyRegister(ProxyRegistration),
    ProxyUnRegister(ProxyRegistration),
    PropertyModification(PropertyModification),
    ProxyStateChanged(ProxyStateChange),
    GlobalPropertiesLink(GlobalPropertiesLinkChange),
    UpdateInformation(InformationUpdate),
}

impl Change {
    pub fn kind(&self) -> ElementKind {
        match self {
            Change::ProxyRegister(_) => ElementKind::ProxyRegister,
            Change::ProxyUnRegister(_) => ElementKind::ProxyUnRegister,
            Change::PropertyModification(_) => ElementKind::PropertyModification,
            Change::ProxyStateChanged(_) => ElementKind::ProxyStateChanged,
            Change::GlobalPropertiesLink(_) => ElementKind::GlobalPropertiesLink,
            Change::UpdateInformation(_) => ElementKind::UpdateInformation,
        }
    }

    /// Proxy the change is about.
    pub fn id(&self) -> GlobalId {
        match self {
            Change::ProxyRegister(r) | Change::ProxyUnRegister(r) => r.id,
            Change::PropertyModification(m) => m.id,
            Change::ProxyStateChanged(s) => s.id,
            Change::GlobalPropertiesLink(l) => l.link.proxy,
            Change::UpdateInformation(u) => u.id,
        }
    }
}

/// A unit of recorded change plus the session it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoElement {
    /// Session the change was recorded in. Not an owning reference.
    pub session: Option<SessionId>,
    /// Whether [`merge`](Self::merge) may fold a later element into this one.
    pub mergeable: bool,
    pub change: Change,
}

/// Flat description of an element, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSummary {
    pub kind: ElementKind,
    pub id: GlobalId,
    pub detail: String,
}

impl UndoElement {
    /// Wraps `change` with no session. Property modifications are mergeable.
    pub fn new(change: Change) -> Self {
        let mergeable = matches!(change, Change::PropertyModification(_));
        UndoElement {
            session: None,
            mergeable,
            change,
        }
    }

    /// Tags the element with the session it was recorded in.
    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }

    /// Kind of the wrapped change.
    pub fn kind(&self) -> ElementKind {
        self.change.kind()
    }

    /// Registers with `locator` the recorded proxy states the pass in
    /// `direction` may have to recreate proxies from.
    pub fn register_states(&self, locator: &mut ProxyLocator, direction: Direction) {
        match (&self.change, direction) {
            (Change::ProxyRegister(r) | Change::ProxyUnRegister(r), _) => {
                if let Some(state) = &r.state {
                    locator.register_state(r.id, state.clone());
                }
            }
            (Change::ProxyStateChanged(s), Direction::Undo) => {
                if let Some(before) = &s.before {
                    locator.register_state(s.id, before.clone());
                }
            }
            (Change::ProxyStateChanged(s), Direction::Redo) => {
                if let Some(after) = &s.after {
                    locator.register_state(s.id, after.clone());
                }
            }
            _ => {}
        }
    }

    /// Applies the element in `direction`.
    pub fn apply(
        &self,
        pm: &mut dyn ProxyManager,
        locator: &mut ProxyLocator,
        direction: Direction,
    ) -> Result<(), UndoError> {
        match direction {
            Direction::Undo => self.undo(pm, locator),
            Direction::Redo => self.redo(pm, locator),
        }
    }

    /// Restores the state captured before the change.
    pub fn undo(
        &self,
        pm: &mut dyn ProxyManager,
        locator: &mut ProxyLocator,
    ) -> Result<(), UndoError> {
        match &self.change {
            Change::ProxyRegister(r) => unregister(pm, r),
            Change::ProxyUnRegister(r) => register(pm, locator, r),
            Change::PropertyModification(m) => {
                let value = recorded(&m.last_pushed_value, self.kind())?;
                load_property(pm, locator, m.id, value)
            }
            Change::ProxyStateChanged(s) => {
                let before = recorded(&s.before, self.kind())?;
                load_proxy(pm, locator, s.id, before)
            }
            Change::GlobalPropertiesLink(l) => replay_link(pm, locator, l, !l.link_added),
            Change::UpdateInformation(_) => Ok(()),
        }
    }

    /// Re-applies the recorded change.
    pub fn redo(
        &self,
        pm: &mut dyn ProxyManager,
        locator: &mut ProxyLocator,
    ) -> Result<(), UndoError> {
        match &self.change {
            Change::ProxyRegister(r) => register(pm, locator, r),
            Change::ProxyUnRegister(r) => unregister(pm, r),
            Change::PropertyModification(m) => {
                let value = recorded(&m.new_value, self.kind())?;
                load_property(pm, locator, m.id, value)
            }
            Change::ProxyStateChanged(s) => {
                let after = recorded(&s.after, self.kind())?;
                load_proxy(pm, locator, s.id, after)
            }
            Change::GlobalPropertiesLink(l) => replay_link(pm, locator, l, l.link_added),
            Change::UpdateInformation(u) => {
                let id = locate(pm, locator, u.id)?;
                pm.update_information(id)?;
                Ok(())
            }
        }
    }

    /// Folds `other` into `self` if both modify the same property of the same
    /// proxy. `self` keeps its "before" value and takes `other`'s "after".
    pub fn merge(&mut self, other: &UndoElement) -> bool {
        if !self.mergeable || !other.mergeable || self.session != other.session {
            return false;
        }
        match (&mut self.change, &other.change) {
            (Change::PropertyModification(mine), Change::PropertyModification(theirs))
                if mine.id == theirs.id && mine.name == theirs.name =>
            {
                mine.new_value = theirs.new_value.clone();
                true
            }
            _ => false,
        }
    }

    /// Whether `element` is the serialized form of an undo element.
    pub fn can_load_state(element: &XmlElement) -> bool {
        ElementKind::from_tag(element.name()).is_some()
    }

    /// Serialized form. The tag name is the element kind.
    pub fn to_xml(&self) -> XmlElement {
        let mut element = match &self.change {
            Change::ProxyRegister(r) | Change::ProxyUnRegister(r) => {
                let mut element = XmlElement::new(self.kind().tag())
                    .with_attribute("xml_group_name", &r.xml_group_name)
                    .with_attribute("xml_proxy_name", &r.xml_proxy_name)
                    .with_attribute("group_name", &r.group_name)
                    .with_attribute("proxy_name", &r.proxy_name)
                    .with_attribute("id", r.id);
                if let Some(state) = &r.state {
                    element.add_child(state.clone());
                }
                element
            }
            Change::PropertyModification(m) => {
                let mut element = XmlElement::new(self.kind().tag())
                    .with_attribute("id", m.id)
                    .with_attribute("name", &m.name);
                if let Some(value) = &m.last_pushed_value {
                    element.add_child(XmlElement::new(LAST_PUSHED_TAG).with_child(value.clone()));
                }
                if let Some(value) = &m.new_value {
                    element.add_child(XmlElement::new(NEW_VALUE_TAG).with_child(value.clone()));
                }
                element
            }
            Change::ProxyStateChanged(s) => {
                let mut element = XmlElement::new(self.kind().tag()).with_attribute("id", s.id);
                if let Some(before) = &s.before {
                    element.add_child(XmlElement::new(BEFORE_TAG).with_child(before.clone()));
                }
                if let Some(after) = &s.after {
                    element.add_child(XmlElement::new(AFTER_TAG).with_child(after.clone()));
                }
                element
            }
            Change::GlobalPropertiesLink(l) => XmlElement::new(self.kind().tag())
                .with_attribute("id", l.link.proxy)
                .with_attribute("manager", &l.link.manager)
                .with_attribute("global_property", &l.link.global_property)
                .with_attribute("property", &l.link.property)
                .with_attribute("link_added", u8::from(l.link_added)),
            Change::UpdateInformation(u) => {
                XmlElement::new(self.kind().tag()).with_attribute("id", u.id)
            }
        };
        if let Some(session) = self.session {
            element.set_attribute("session", session);
        }
        element
    }

    /// One-line description for listings.
    pub fn summary(&self) -> ElementSummary {
        let detail = match &self.change {
            Change::ProxyRegister(r) | Change::ProxyUnRegister(r) => {
                format!(
                    "{}/{} ({}.{})",
                    r.group_name, r.proxy_name, r.xml_group_name, r.xml_proxy_name
                )
            }
            Change::PropertyModification(m) => m.name.clone(),
            Change::ProxyStateChanged(_) => "state".to_string(),
            Change::GlobalPropertiesLink(l) => format!(
                "{}.{} -> {} ({})",
                l.link.manager,
                l.link.global_property,
                l.link.property,
                if l.link_added { "link" } else { "unlink" }
            ),
            Change::UpdateInformation(_) => "information".to_string(),
        };
        ElementSummary {
            kind: self.kind(),
            id: self.change.id(),
            detail,
        }
    }
}

pub(crate) const LAST_PUSHED_TAG: &str = "LastPushedValue";
pub(crate) const NEW_VALUE_TAG: &str = "NewValue";
pub(crate) const BEFORE_TAG: &str = "Before";
pub(crate) const AFTER_TAG: &str = "After";

impl ProxyRegistration {
    /// Builds a registration payload from a `<Proxy>` state.
    pub fn from_state(
        group_name: &str,
        proxy_name: &str,
        state: XmlElement,
    ) -> Result<Self, CoreError> {
        let (xml_group_name, xml_proxy_name, id) = proxy_header(&state)?;
        Ok(ProxyRegistration {
            xml_group_name,
            xml_proxy_name,
            group_name: group_name.to_string(),
            proxy_name: proxy_name.to_string(),
            id,
            state: Some(state),
        })
    }

    pub(crate) fn from_xml(element: &XmlElement) -> Result<Self, CoreError> {
        Ok(ProxyRegistration {
            xml_group_name: element.required_attribute("xml_group_name")?.to_string(),
            xml_proxy_name: element.required_attribute("xml_proxy_name")?.to_string(),
            group_name: element.required_attribute("group_name")?.to_string(),
            proxy_name: element.required_attribute("proxy_name")?.to_string(),
            id: element.attribute_as("id")?,
            state: element.find_child("Proxy").cloned(),
        })
    }
}

impl PropertyModification {
    pub(crate) fn from_xml(element: &XmlElement) -> Result<Self, CoreError> {
        Ok(PropertyModification {
            id: element.attribute_as("id")?,
            name: element.required_attribute("name")?.to_string(),
            last_pushed_value: wrapped(element, LAST_PUSHED_TAG),
            new_value: wrapped(element, NEW_VALUE_TAG),
        })
    }
}

impl ProxyStateChange {
    pub(crate) fn from_xml(element: &XmlElement) -> Result<Self, CoreError> {
        Ok(ProxyStateChange {
            id: element.attribute_as("id")?,
            before: wrapped(element, BEFORE_TAG),
            after: wrapped(element, AFTER_TAG),
        })
    }
}

impl GlobalPropertiesLinkChange {
    pub(crate) fn from_xml(element: &XmlElement) -> Result<Self, CoreError> {
        Ok(GlobalPropertiesLinkChange {
            link: GlobalPropertyLink {
                manager: element.required_attribute("manager")?.to_string(),
                global_property: element.required_attribute("global_property")?.to_string(),
                proxy: element.attribute_as("id")?,
                property: element.required_attribute("property")?.to_string(),
            },
            link_added: element.attribute_as::<u8>("link_added")? != 0,
        })
    }
}

impl InformationUpdate {
    pub(crate) fn from_xml(element: &XmlElement) -> Result<Self, CoreError> {
        Ok(InformationUpdate {
            id: element.attribute_as("id")?,
        })
    }
}

/// First child of the `tag` wrapper element, if any.
fn wrapped(element: &XmlElement, tag: &str) -> Option<XmlElement> {
    element
        .find_child(tag)
        .and_then(|wrapper| wrapper.child(0))
        .cloned()
}

fn recorded(state: &Option<XmlElement>, kind: ElementKind) -> Result<&XmlElement, UndoError> {
    state
        .as_ref()
        .ok_or(UndoError::NoStateRecorded { kind: kind.tag() })
}

fn locate(
    pm: &mut dyn ProxyManager,
    locator: &mut ProxyLocator,
    id: GlobalId,
) -> Result<GlobalId, UndoError> {
    locator
        .locate_proxy(pm, id)
        .ok_or(UndoError::ProxyUnresolved { id })
}

fn register(
    pm: &mut dyn ProxyManager,
    locator: &mut ProxyLocator,
    r: &ProxyRegistration,
) -> Result<(), UndoError> {
    let state = recorded(&r.state, ElementKind::ProxyRegister)?;
    let id = locator
        .locate_or_create(pm, r.id, state)
        .ok_or(UndoError::ProxyUnresolved { id: r.id })?;
    pm.register_proxy(&r.group_name, &r.proxy_name, id)?;
    Ok(())
}

fn unregister(pm: &mut dyn ProxyManager, r: &ProxyRegistration) -> Result<(), UndoError> {
    recorded(&r.state, ElementKind::ProxyUnRegister)?;
    pm.unregister_proxy(&r.group_name, &r.proxy_name)?;
    Ok(())
}

fn load_property(
    pm: &mut dyn ProxyManager,
    locator: &mut ProxyLocator,
    id: GlobalId,
    value: &XmlElement,
) -> Result<(), UndoError> {
    let id = locate(pm, locator, id)?;
    pm.load_property_state(id, value)?;
    Ok(())
}

fn load_proxy(
    pm: &mut dyn ProxyManager,
    locator: &mut ProxyLocator,
    id: GlobalId,
    state: &XmlElement,
) -> Result<(), UndoError> {
    let id = locate(pm, locator, id)?;
    pm.load_proxy_state(id, state)?;
    Ok(())
}

/// Adds or removes a global-property link. With more than one live session
/// the owning manager is ambiguous and the replay is skipped.
fn replay_link(
    pm: &mut dyn ProxyManager,
    locator: &mut ProxyLocator,
    change: &GlobalPropertiesLinkChange,
    add: bool,
) -> Result<(), UndoError> {
    if pm.active_session_count() > 1 {
        return Ok(());
    }
    locate(pm, locator, change.link.proxy)?;
    if add {
        pm.link_global_property(change.link.clone())?;
    } else {
        pm.unlink_global_property(&change.link)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvlive_core::proxy::property_to_xml;
    use pvlive_core::{InMemoryProxyManager, PropertyValue};

    fn modification(id: u32, name: &str, from: i32, to: i32) -> UndoElement {
        let value = |v: i32| Some(property_to_xml(GlobalId(id), name, &PropertyValue::scalar(v)));
        UndoElement::new(Change::PropertyModification(PropertyModification {
            id: GlobalId(id),
            name: name.to_string(),
            last_pushed_value: value(from),
            new_value: value(to),
        }))
    }

    #[test]
    fn tags_round_trip_through_kind() {
        for kind in ElementKind::ALL {
            assert_eq!(ElementKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(ElementKind::from_tag("UndoSet"), None);
    }

    #[test]
    fn property_modification_undo_and_redo() {
        let mut pm = InMemoryProxyManager::new();
        let id = pm.create_proxy("sources", "SphereSource", None).unwrap();
        pm.set_property(id, "Radius", PropertyValue::scalar(2)).unwrap();
        let element = modification(id.0, "Radius", 1, 2);

        let mut locator = ProxyLocator::new();
        element.undo(&mut pm, &mut locator).unwrap();
        assert_eq!(pm.proxy(id).unwrap().property("Radius"), Some(&PropertyValue::scalar(1)));
        element.redo(&mut pm, &mut locator).unwrap();
        assert_eq!(pm.proxy(id).unwrap().property("Radius"), Some(&PropertyValue::scalar(2)));
    }

    #[test]
    fn missing_state_fails() {
        let mut pm = InMemoryProxyManager::new();
        let element = UndoElement::new(Change::ProxyStateChanged(ProxyStateChange {
            id: GlobalId(1),
            before: None,
            after: None,
        }));
        let mut locator = ProxyLocator::new();
        assert!(matches!(
            element.undo(&mut pm, &mut locator),
            Err(UndoError::NoStateRecorded { .. })
        ));
    }

    #[test]
    fn unresolved_proxy_fails() {
        let mut pm = InMemoryProxyManager::new();
        let mut locator = ProxyLocator::new();
        let element = modification(42, "Radius", 1, 2);
        assert!(matches!(
            element.redo(&mut pm, &mut locator),
            Err(UndoError::ProxyUnresolved { id: GlobalId(42) })
        ));
    }

    #[test]
    fn merge_keeps_oldest_before_and_newest_after() {
        let mut first = modification(1, "Radius", 1, 2);
        let second = modification(1, "Radius", 2, 3);
        assert!(first.merge(&second));
        let merged = modification(1, "Radius", 1, 3);
        assert_eq!(first, merged);

        let other_property = modification(1, "Center", 0, 1);
        assert!(!first.merge(&other_property));
        let other_proxy = modification(2, "Radius", 0, 1);
        assert!(!first.merge(&other_proxy));
    }

    #[test]
    fn update_information_undo_is_noop_and_redo_refetches() {
        let mut pm = InMemoryProxyManager::new();
        let id = pm.create_proxy("sources", "SphereSource", None).unwrap();
        let element = UndoElement::new(Change::UpdateInformation(InformationUpdate { id }));
        let mut locator = ProxyLocator::new();
        element.undo(&mut pm, &mut locator).unwrap();
        assert_eq!(pm.proxy(id).unwrap().information_generation, 0);
        element.redo(&mut pm, &mut locator).unwrap();
        assert_eq!(pm.proxy(id).unwrap().information_generation, 1);
    }

    #[test]
    fn property_modification_xml_shape() {
        let element = modification(5, "Radius", 1, 2).with_session(SessionId(1));
        let text = element.to_xml().to_xml_string().unwrap();
        assert!(text.starts_with(concat!(
            r#"<PropertyModification id="5" name="Radius" session="1">"#,
            r#"<LastPushedValue><Property name="Radius""#
        )));
        assert!(text.contains("<NewValue>"));
    }
}
