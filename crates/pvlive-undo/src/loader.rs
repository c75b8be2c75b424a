//! Reconstruction of undo elements and sets from their XML form.

use pvlive_core::{CoreError, XmlElement};

use crate::element::{
    Change, ElementKind, GlobalPropertiesLinkChange, InformationUpdate, PropertyModification,
    ProxyRegistration, ProxyStateChange, UndoElement,
};
use crate::error::UndoError;
use crate::set::{UndoSet, UNDO_SET_TAG};

type LoadFn = fn(&XmlElement) -> Result<Change, CoreError>;

/// Indexed by `ElementKind as usize`.
static LOADERS: [LoadFn; 6] = [
    load_register,
    load_unregister,
    load_property_modification,
    load_state_change,
    load_global_link,
    load_information_update,
];

fn load_register(e: &XmlElement) -> Result<Change, CoreError> {
    ProxyRegistration::from_xml(e).map(Change::ProxyRegister)
}

fn load_unregister(e: &XmlElement) -> Result<Change, CoreError> {
    ProxyRegistration::from_xml(e).map(Change::ProxyUnRegister)
}

fn load_property_modification(e: &XmlElement) -> Result<Change, CoreError> {
    PropertyModification::from_xml(e).map(Change::PropertyModification)
}

fn load_state_change(e: &XmlElement) -> Result<Change, CoreError> {
    ProxyStateChange::from_xml(e).map(Change::ProxyStateChanged)
}

fn load_global_link(e: &XmlElement) -> Result<Change, CoreError> {
    GlobalPropertiesLinkChange::from_xml(e).map(Change::GlobalPropertiesLink)
}

fn load_information_update(e: &XmlElement) -> Result<Change, CoreError> {
    InformationUpdate::from_xml(e).map(Change::UpdateInformation)
}

/// Builds undo elements from serialized state.
pub struct UndoRedoStateLoader;

impl UndoRedoStateLoader {
    pub fn can_load_state(element: &XmlElement) -> bool {
        UndoElement::can_load_state(element)
    }

    pub fn load_element(element: &XmlElement) -> Result<UndoElement, UndoError> {
        let kind = ElementKind::from_tag(element.name()).ok_or_else(|| UndoError::UnknownElement {
            tag: element.name().to_string(),
        })?;
        let change = LOADERS[kind as usize](element)?;
        let mut loaded = UndoElement::new(change);
        if element.attribute("session").is_some() {
            loaded.session = Some(element.attribute_as("session")?);
        }
        Ok(loaded)
    }

    /// Loads a whole `<UndoSet>`. Any unloadable child fails the load.
    pub fn load_undo_set(root: &XmlElement) -> Result<UndoSet, UndoError> {
        root.expect_name(UNDO_SET_TAG)?;
        let mut set = UndoSet::new(root.attribute("label").unwrap_or_default());
        for child in root.children() {
            set.push(Self::load_element(child)?);
        }
        Ok(set)
    }

    /// Parses and loads a serialized `<UndoSet>` document.
    pub fn load_undo_set_str(text: &str) -> Result<UndoSet, UndoError> {
        Self::load_undo_set(&XmlElement::parse(text)?)
    }
}

impl UndoElement {
    pub fn from_xml(element: &XmlElement) -> Result<Self, UndoError> {
        UndoRedoStateLoader::load_element(element)
    }
}

impl UndoSet {
    pub fn from_xml(root: &XmlElement) -> Result<Self, UndoError> {
        UndoRedoStateLoader::load_undo_set(root)
    }
}
