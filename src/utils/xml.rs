// src/utils/xml.rs

//! Namespace-aware XML element tree.
//!
//! Both wire formats are small, shallow documents that are inspected by
//! fully qualified element name, so they are read into a compact tree
//! rather than handled as a raw event stream.

use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;

use crate::error::{AppError, Result};

/// A namespace-qualified element or attribute name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    pub namespace: Option<String>,
    pub local: String,
}

impl QualifiedName {
    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.local == local && self.namespace.as_deref() == Some(namespace)
    }
}

/// An attribute with its resolved namespace.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: QualifiedName,
    pub value: String,
}

/// A parsed XML element.
#[derive(Debug, Clone)]
pub struct Element {
    pub name: QualifiedName,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    /// True if this element has the given namespace and local name.
    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.name.is(namespace, local)
    }

    /// First child with the given name.
    pub fn child(&self, namespace: &str, local: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.is(namespace, local))
    }

    /// All children with the given name, in document order.
    pub fn children_named<'a>(
        &'a self,
        namespace: &'a str,
        local: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.is(namespace, local))
    }

    /// Trimmed text of the first child with the given name.
    pub fn child_text(&self, namespace: &str, local: &str) -> Option<&str> {
        self.child(namespace, local).map(|c| c.text.trim())
    }

    /// All descendants with the given name, depth first in document order.
    pub fn descendants_named<'a>(&'a self, namespace: &str, local: &str) -> Vec<&'a Element> {
        let mut found = Vec::new();
        self.collect_named(namespace, local, &mut found);
        found
    }

    fn collect_named<'a>(&'a self, namespace: &str, local: &str, found: &mut Vec<&'a Element>) {
        for child in &self.children {
            if child.is(namespace, local) {
                found.push(child);
            }
            child.collect_named(namespace, local, found);
        }
    }

    /// Value of an attribute without a namespace prefix.
    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.namespace.is_none() && a.name.local == local)
            .map(|a| a.value.as_str())
    }

    /// Value of a namespaced attribute.
    pub fn attr_ns(&self, namespace: &str, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.is(namespace, local))
            .map(|a| a.value.as_str())
    }
}

/// Parse a complete document and return its root element.
pub fn parse_document(xml: &str) -> Result<Element> {
    let mut reader = NsReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                let element = open_element(&reader, &start)?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = open_element(&reader, &start)?;
                close_element(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| AppError::protocol("unbalanced end tag"))?;
                close_element(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(AppError::protocol("document ended inside an element"));
    }
    root.ok_or_else(|| AppError::protocol("document has no root element"))
}

fn open_element(reader: &NsReader<&[u8]>, start: &BytesStart<'_>) -> Result<Element> {
    let (resolved, local) = reader.resolve_element(start.name());
    let name = QualifiedName {
        namespace: namespace_of(resolved),
        local: decode(local.as_ref()).into_owned(),
    };

    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = attr.key;
        // Namespace declarations are resolved already
        if key.as_ref() == b"xmlns" || key.as_ref().starts_with(b"xmlns:") {
            continue;
        }
        let (resolved, local) = reader.resolve_attribute(key);
        let namespace = namespace_of(resolved);
        let local = decode(local.as_ref()).into_owned();
        attributes.push(Attribute {
            name: QualifiedName { namespace, local },
            value: attr.unescape_value()?.into_owned(),
        });
    }

    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
        text: String::new(),
    })
}

fn close_element(
    stack: &mut Vec<Element>,
    root: &mut Option<Element>,
    element: Element,
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(AppError::protocol("multiple root elements")),
    }
    Ok(())
}

fn namespace_of(resolved: ResolveResult<'_>) -> Option<String> {
    match resolved {
        ResolveResult::Bound(ns) => Some(decode(ns.as_ref()).into_owned()),
        _ => None,
    }
}

fn decode(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "http://example.org/ns";

    #[test]
    fn test_parse_namespaced_tree() {
        let xml = r#"<?xml version="1.0"?>
            <root xmlns="http://example.org/ns" xmlns:x="http://example.org/x">
              <item x:kind="a" plain="1"><name>first &amp; best</name></item>
              <item><name><![CDATA[second]]></name></item>
            </root>"#;
        let root = parse_document(xml).unwrap();
        assert!(root.is(NS, "root"));

        let items: Vec<_> = root.children_named(NS, "item").collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].child_text(NS, "name"), Some("first & best"));
        assert_eq!(items[0].attr_ns("http://example.org/x", "kind"), Some("a"));
        assert_eq!(items[0].attr("plain"), Some("1"));
        assert_eq!(items[1].child_text(NS, "name"), Some("second"));
    }

    #[test]
    fn test_wrong_namespace_does_not_match() {
        let root = parse_document(r#"<root xmlns="http://other.org/"/>"#).unwrap();
        assert!(!root.is(NS, "root"));
        assert_eq!(root.name.local, "root");
    }

    #[test]
    fn test_malformed_documents() {
        assert!(parse_document("not xml").is_err());
        assert!(parse_document("<a><b></a>").is_err());
        assert!(parse_document("").is_err());
    }
}
