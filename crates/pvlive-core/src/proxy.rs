//! Proxy data model and its XML state form.
//!
//! A [`Proxy`] is a server-side object identified by a [`GlobalId`],
//! instantiated from an XML definition (`xml_group`/`xml_name`) and carrying
//! named, vector-valued properties. Its state element looks like:
//!
//! ```text
//! <Proxy group="sources" type="SphereSource" id="5">
//!   <Property name="Radius" id="5.Radius" number_of_elements="1">
//!     <Element index="0" value="0.5"/>
//!   </Property>
//!   <Property name="Input" id="5.Input" number_of_elements="1">
//!     <Proxy value="3"/>
//!   </Property>
//! </Proxy>
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::CoreError;
use crate::id::GlobalId;
use crate::xml::XmlElement;

pub const PROXY_TAG: &str = "Proxy";
pub const PROPERTY_TAG: &str = "Property";
const ELEMENT_TAG: &str = "Element";
/// Set to "1" on a `<Property>` element that records a property the proxy
/// did not have.
pub const ABSENT_ATTRIBUTE: &str = "absent";

/// Value of a proxy property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// Plain values, kept in their textual form.
    Elements(SmallVec<[String; 4]>),
    /// References to other proxies.
    Proxies(SmallVec<[GlobalId; 2]>),
}

impl PropertyValue {
    /// Single-element value.
    pub fn scalar(value: impl fmt::Display) -> Self {
        PropertyValue::Elements(SmallVec::from_iter([value.to_string()]))
    }

    pub fn elements<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: fmt::Display,
    {
        PropertyValue::Elements(values.into_iter().map(|v| v.to_string()).collect())
    }

    pub fn proxy(id: GlobalId) -> Self {
        PropertyValue::Proxies(SmallVec::from_iter([id]))
    }

    pub fn proxies(ids: impl IntoIterator<Item = GlobalId>) -> Self {
        PropertyValue::Proxies(ids.into_iter().collect())
    }

    pub fn len(&self) -> usize {
        match self {
            PropertyValue::Elements(values) => values.len(),
            PropertyValue::Proxies(ids) => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Proxies referenced by this value (empty for plain values).
    pub fn referenced_proxies(&self) -> &[GlobalId] {
        match self {
            PropertyValue::Elements(_) => &[],
            PropertyValue::Proxies(ids) => ids,
        }
    }
}

/// Serializes one property to its `<Property>` element.
pub fn property_to_xml(owner: GlobalId, name: &str, value: &PropertyValue) -> XmlElement {
    let mut element = XmlElement::new(PROPERTY_TAG)
        .with_attribute("name", name)
        .with_attribute("id", format!("{owner}.{name}"))
        .with_attribute("number_of_elements", value.len());
    match value {
        PropertyValue::Elements(values) => {
            for (index, v) in values.iter().enumerate() {
                element.add_child(
                    XmlElement::new(ELEMENT_TAG)
                        .with_attribute("index", index)
                        .with_attribute("value", v),
                );
            }
        }
        PropertyValue::Proxies(ids) => {
            for id in ids {
                element.add_child(XmlElement::new(PROXY_TAG).with_attribute("value", id));
            }
        }
    }
    element
}

/// `<Property>` element recording that `owner` has no property `name`.
pub fn absent_property_to_xml(owner: GlobalId, name: &str) -> XmlElement {
    XmlElement::new(PROPERTY_TAG)
        .with_attribute("name", name)
        .with_attribute("id", format!("{owner}.{name}"))
        .with_attribute("number_of_elements", 0)
        .with_attribute(ABSENT_ATTRIBUTE, 1)
}

pub fn is_absent_property(element: &XmlElement) -> bool {
    element.attribute(ABSENT_ATTRIBUTE) == Some("1")
}

/// Parses a `<Property>` element into its name and value.
///
/// A property with no `<Proxy>` children parses as [`PropertyValue::Elements`].
pub fn property_from_xml(element: &XmlElement) -> Result<(String, PropertyValue), CoreError> {
    element.expect_name(PROPERTY_TAG)?;
    let name = element.required_attribute("name")?.to_string();

    let is_proxy = element.children().iter().any(|c| c.name() == PROXY_TAG);
    let value = if is_proxy {
        let mut ids = SmallVec::new();
        for child in element.children().iter().filter(|c| c.name() == PROXY_TAG) {
            ids.push(child.attribute_as::<GlobalId>("value")?);
        }
        PropertyValue::Proxies(ids)
    } else {
        let mut indexed: Vec<(usize, String)> = Vec::new();
        for child in element.children().iter().filter(|c| c.name() == ELEMENT_TAG) {
            let index = child.attribute_as::<usize>("index")?;
            indexed.push((index, child.required_attribute("value")?.to_string()));
        }
        indexed.sort_by_key(|(index, _)| *index);
        PropertyValue::Elements(indexed.into_iter().map(|(_, v)| v).collect())
    };
    Ok((name, value))
}

/// A live server-side object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    pub id: GlobalId,
    /// XML definition group, e.g. "sources".
    pub xml_group: String,
    /// XML definition name, e.g. "SphereSource".
    pub xml_name: String,
    properties: BTreeMap<String, PropertyValue>,
    /// Bumped every time information is re-fetched from the server.
    pub information_generation: u64,
}

impl Proxy {
    pub fn new(id: GlobalId, xml_group: impl Into<String>, xml_name: impl Into<String>) -> Self {
        Proxy {
            id,
            xml_group: xml_group.into(),
            xml_name: xml_name.into(),
            properties: BTreeMap::new(),
            information_generation: 0,
        }
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Sets a property, returning the previous value.
    pub fn set_property(
        &mut self,
        name: impl Into<String>,
        value: PropertyValue,
    ) -> Option<PropertyValue> {
        self.properties.insert(name.into(), value)
    }

    pub fn remove_property(&mut self, name: &str) -> Option<PropertyValue> {
        self.properties.remove(name)
    }

    /// Every proxy referenced from any property.
    pub fn referenced_proxies(&self) -> impl Iterator<Item = GlobalId> + '_ {
        self.properties
            .values()
            .flat_map(|v| v.referenced_proxies().iter().copied())
    }

    /// Full `<Proxy>` state element.
    pub fn to_xml(&self) -> XmlElement {
        let mut element = XmlElement::new(PROXY_TAG)
            .with_attribute("group", &self.xml_group)
            .with_attribute("type", &self.xml_name)
            .with_attribute("id", self.id);
        for (name, value) in &self.properties {
            element.add_child(property_to_xml(self.id, name, value));
        }
        element
    }

    /// `<Property>` state element for one property.
    pub fn property_to_xml(&self, name: &str) -> Result<XmlElement, CoreError> {
        let value = self
            .properties
            .get(name)
            .ok_or_else(|| CoreError::PropertyNotFound {
                id: self.id,
                name: name.to_string(),
            })?;
        Ok(property_to_xml(self.id, name, value))
    }

    /// `<Property>` state for `name`, or its absent form when the proxy has
    /// no such property.
    pub fn property_state(&self, name: &str) -> XmlElement {
        match self.properties.get(name) {
            Some(value) => property_to_xml(self.id, name, value),
            None => absent_property_to_xml(self.id, name),
        }
    }

    /// Replaces the properties with those of a `<Proxy>` element. Properties
    /// the element does not mention are removed.
    pub fn load_state(&mut self, element: &XmlElement) -> Result<(), CoreError> {
        element.expect_name(PROXY_TAG)?;
        let children: Vec<&XmlElement> = element
            .children()
            .iter()
            .filter(|c| c.name() == PROPERTY_TAG)
            .collect();
        let mut kept = Vec::with_capacity(children.len());
        for child in &children {
            kept.push(child.required_attribute("name")?.to_string());
        }
        self.properties.retain(|name, _| kept.contains(name));
        for child in children {
            self.load_property_state(child)?;
        }
        Ok(())
    }

    /// Loads one `<Property>` element, returning the property name. An
    /// absent element removes the property.
    ///
    /// An empty value keeps the kind of the existing property.
    pub fn load_property_state(&mut self, element: &XmlElement) -> Result<String, CoreError> {
        if is_absent_property(element) {
            element.expect_name(PROPERTY_TAG)?;
            let name = element.required_attribute("name")?.to_string();
            self.properties.remove(&name);
            return Ok(name);
        }
        let (name, mut value) = property_from_xml(element)?;
        if value.is_empty() {
            if let Some(PropertyValue::Proxies(_)) = self.properties.get(&name) {
                value = PropertyValue::Proxies(SmallVec::new());
            }
        }
        self.properties.insert(name.clone(), value);
        Ok(name)
    }
}

/// Reads `group`, `type` and `id` from a `<Proxy>` state element.
pub fn proxy_header(element: &XmlElement) -> Result<(String, String, GlobalId), CoreError> {
    element.expect_name(PROXY_TAG)?;
    Ok((
        element.required_attribute("group")?.to_string(),
        element.required_attribute("type")?.to_string(),
        element.attribute_as::<GlobalId>("id")?,
    ))
}
