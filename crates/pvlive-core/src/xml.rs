//! Ordered XML element tree used as the serialized form of proxy state,
//! undo elements and the insitu handshake payload.
//!
//! [`XmlElement`] keeps attributes in insertion order so that printing an
//! element, parsing the output and printing again yields the same bytes.
//! Parsing and printing go through `quick-xml`'s event API; text content is
//! not part of the model and is dropped on parse.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A node of an XML state document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XmlElement {
    name: String,
    attributes: IndexMap<String, String>,
    children: Vec<XmlElement>,
}

impl XmlElement {
    /// Creates an element with no attributes and no children.
    pub fn new(name: impl Into<String>) -> Self {
        XmlElement {
            name: name.into(),
            attributes: IndexMap::new(),
            children: Vec::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.set_attribute(key, value);
        self
    }

    /// Builder-style child append.
    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(child);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets an attribute. An existing attribute keeps its position.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl fmt::Display) {
        self.attributes.insert(key.into(), value.to_string());
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Returns a required attribute or a [`CoreError::MissingAttribute`].
    pub fn required_attribute(&self, key: &str) -> Result<&str, CoreError> {
        self.attribute(key).ok_or_else(|| CoreError::MissingAttribute {
            element: self.name.clone(),
            attribute: key.to_string(),
        })
    }

    /// Parses a required attribute into `T`.
    pub fn attribute_as<T: FromStr>(&self, key: &str) -> Result<T, CoreError> {
        let raw = self.required_attribute(key)?;
        raw.parse().map_err(|_| CoreError::InvalidAttribute {
            element: self.name.clone(),
            attribute: key.to_string(),
            value: raw.to_string(),
        })
    }

    /// Iterates attributes in insertion order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn add_child(&mut self, child: XmlElement) {
        self.children.push(child);
    }

    pub fn children(&self) -> &[XmlElement] {
        &self.children
    }

    pub fn child(&self, index: usize) -> Option<&XmlElement> {
        self.children.get(index)
    }

    pub fn number_of_children(&self) -> usize {
        self.children.len()
    }

    /// First direct child with the given tag name.
    pub fn find_child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Depth-first search for an element named `name` whose attribute `key`
    /// equals `value`. The element itself is included in the search.
    pub fn find_nested(&self, name: &str, key: &str, value: &str) -> Option<&XmlElement> {
        if self.name == name && self.attribute(key) == Some(value) {
            return Some(self);
        }
        self.children
            .iter()
            .find_map(|c| c.find_nested(name, key, value))
    }

    /// Checks the tag name, for loaders that accept one element kind.
    pub fn expect_name(&self, expected: &str) -> Result<(), CoreError> {
        if self.name == expected {
            Ok(())
        } else {
            Err(CoreError::UnexpectedElement {
                expected: expected.to_string(),
                found: self.name.clone(),
            })
        }
    }

    /// Prints the element compactly: no declaration, no indentation.
    pub fn to_xml_string(&self) -> Result<String, CoreError> {
        let mut writer = Writer::new(Vec::new());
        self.write_to(&mut writer)?;
        String::from_utf8(writer.into_inner()).map_err(CoreError::xml)
    }

    fn write_to(&self, writer: &mut Writer<Vec<u8>>) -> Result<(), CoreError> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }
        if self.children.is_empty() {
            writer
                .write_event(Event::Empty(start))
                .map_err(CoreError::xml)?;
            return Ok(());
        }
        writer
            .write_event(Event::Start(start))
            .map_err(CoreError::xml)?;
        for child in &self.children {
            child.write_to(writer)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.name.as_str())))
            .map_err(CoreError::xml)?;
        Ok(())
    }

    /// Parses a document with exactly one root element.
    pub fn parse(text: &str) -> Result<XmlElement, CoreError> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            match reader.read_event().map_err(CoreError::xml)? {
                Event::Start(start) => {
                    stack.push(element_from_start(&reader, &start)?);
                }
                Event::Empty(start) => {
                    let element = element_from_start(&reader, &start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack.pop().ok_or_else(|| CoreError::MalformedDocument {
                        reason: "closing tag without an open element".to_string(),
                    })?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(CoreError::MalformedDocument {
                reason: format!("element <{}> is never closed", open.name),
            });
        }
        root.ok_or_else(|| CoreError::MalformedDocument {
            reason: "document has no root element".to_string(),
        })
    }

    /// Parses a received buffer. A trailing NUL terminator is ignored.
    pub fn parse_bytes(bytes: &[u8]) -> Result<XmlElement, CoreError> {
        let end = bytes
            .iter()
            .rposition(|b| *b != 0)
            .map_or(0, |last| last + 1);
        let text = std::str::from_utf8(&bytes[..end]).map_err(CoreError::xml)?;
        Self::parse(text)
    }
}

fn element_from_start(
    reader: &Reader<&[u8]>,
    start: &BytesStart<'_>,
) -> Result<XmlElement, CoreError> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(CoreError::xml)?
        .to_string();
    let mut element = XmlElement::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(CoreError::xml)?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(CoreError::xml)?
            .to_string();
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(CoreError::xml)?;
        element.attributes.insert(key, value.into_owned());
    }
    Ok(element)
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), CoreError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(CoreError::MalformedDocument {
                reason: "document has more than one root element".to_string(),
            })
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> XmlElement {
        XmlElement::new("Proxy")
            .with_attribute("group", "sources")
            .with_attribute("type", "SphereSource")
            .with_attribute("id", 5)
            .with_child(
                XmlElement::new("Property")
                    .with_attribute("name", "Radius")
                    .with_child(
                        XmlElement::new("Element")
                            .with_attribute("index", 0)
                            .with_attribute("value", "0.5"),
                    ),
            )
    }

    #[test]
    fn prints_compact_form() {
        let text = sample().to_xml_string().unwrap();
        assert_eq!(
            text,
            r#"<Proxy group="sources" type="SphereSource" id="5"><Property name="Radius"><Element index="0" value="0.5"/></Property></Proxy>"#
        );
    }

    #[test]
    fn roundtrip_is_byte_stable() {
        let first = sample().to_xml_string().unwrap();
        let parsed = XmlElement::parse(&first).unwrap();
        assert_eq!(parsed, sample());
        assert_eq!(parsed.to_xml_string().unwrap(), first);
    }

    #[test]
    fn escaped_attribute_values_survive() {
        let element = XmlElement::new("Item").with_attribute("name", r#"a<b & "c""#);
        let text = element.to_xml_string().unwrap();
        let parsed = XmlElement::parse(&text).unwrap();
        assert_eq!(parsed.attribute("name"), Some(r#"a<b & "c""#));
        assert_eq!(parsed.to_xml_string().unwrap(), text);
    }

    #[test]
    fn set_attribute_keeps_position() {
        let mut element = XmlElement::new("A")
            .with_attribute("x", 1)
            .with_attribute("y", 2);
        element.set_attribute("x", 3);
        let keys: Vec<_> = element.attributes().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["x", "y"]);
        assert_eq!(element.attribute("x"), Some("3"));
    }

    #[test]
    fn parse_bytes_ignores_nul_terminator() {
        let mut bytes = b"<ServerManagerState/>".to_vec();
        bytes.push(0);
        let parsed = XmlElement::parse_bytes(&bytes).unwrap();
        assert_eq!(parsed.name(), "ServerManagerState");
    }

    #[test]
    fn parse_skips_declaration_and_whitespace() {
        let text = "<?xml version=\"1.0\"?>\n<Root>\n  <Child a=\"1\"/>\n</Root>\n";
        let parsed = XmlElement::parse(text).unwrap();
        assert_eq!(parsed.number_of_children(), 1);
        assert_eq!(parsed.child(0).unwrap().attribute("a"), Some("1"));
    }

    #[test]
    fn rejects_multiple_roots() {
        let err = XmlElement::parse("<A/><B/>").unwrap_err();
        assert!(matches!(err, CoreError::MalformedDocument { .. }));
    }

    #[test]
    fn rejects_empty_document() {
        let err = XmlElement::parse("   ").unwrap_err();
        assert!(matches!(err, CoreError::MalformedDocument { .. }));
    }

    #[test]
    fn rejects_unclosed_element() {
        assert!(XmlElement::parse("<A><B/>").is_err());
    }

    #[test]
    fn find_nested_searches_depth_first() {
        let root = XmlElement::new("ServerManagerState").with_child(sample());
        let found = root.find_nested("Proxy", "id", "5").unwrap();
        assert_eq!(found.attribute("type"), Some("SphereSource"));
        assert!(root.find_nested("Proxy", "id", "6").is_none());
    }

    #[test]
    fn attribute_as_reports_bad_values() {
        let element = XmlElement::new("Item").with_attribute("id", "x");
        let err = element.attribute_as::<u32>("id").unwrap_err();
        assert!(matches!(err, CoreError::InvalidAttribute { .. }));
        let err = element.attribute_as::<u32>("name").unwrap_err();
        assert!(matches!(err, CoreError::MissingAttribute { .. }));
    }

    proptest::proptest! {
        #[test]
        fn printable_attribute_values_survive(value in "[ -~]{0,24}") {
            let element = XmlElement::new("Item").with_attribute("value", &value);
            let text = element.to_xml_string().unwrap();
            let parsed = XmlElement::parse(&text).unwrap();
            proptest::prop_assert_eq!(parsed.attribute("value"), Some(value.as_str()));
        }
    }
}
