//! Plain vector document tree
//!
//! The compositor works on this owned tree rather than on a parser's node
//! type. Documents are parsed with `roxmltree` and converted into
//! `Element`/`Node` values, which can be cloned, edited, and serialized back
//! to markup that parses into an identical tree.
//!
//! Element and attribute names are kept qualified as written
//! (`prefix:local`). Namespace declarations become ordinary `xmlns` /
//! `xmlns:prefix` attributes placed before the element's other attributes.
//! Comments, processing instructions and the DOCTYPE are dropped; text,
//! including whitespace between elements, is kept.

use std::fmt::{self, Write as _};

use crate::{Error, Result};

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// A name/value attribute pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

/// A child of an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An element with ordered attributes and children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
}

/// A parsed document: a single root element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub root: Element,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Name without its namespace prefix
    pub fn local_name(&self) -> &str {
        match self.name.split_once(':') {
            Some((_, local)) => local,
            None => &self.name,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Replace the value of `name`, appending the attribute if it is absent.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|a| a.name == name) {
            Some(attr) => attr.value = value,
            None => self.attributes.push(Attribute {
                name: name.to_string(),
                value,
            }),
        }
    }

    /// Concatenated direct text content
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|c| match c {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Replace all children with a single text node (none for `""`).
    pub fn set_text(&mut self, text: &str) {
        self.children.clear();
        if !text.is_empty() {
            self.children.push(Node::Text(text.to_string()));
        }
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|c| match c {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// Direct children with the given local name
    pub fn children_named<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a Element> {
        self.child_elements().filter(move |e| e.local_name() == local)
    }

    /// This element and all element descendants, in document order
    pub fn descendants(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        collect_descendants(self, &mut out);
        out
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Element> {
        if self.attribute("id") == Some(id) {
            return Some(self);
        }
        self.child_elements().find_map(|c| c.find_by_id(id))
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Element> {
        if self.attribute("id") == Some(id) {
            return Some(self);
        }
        self.child_elements_mut().find_map(|c| c.find_by_id_mut(id))
    }
}

fn collect_descendants<'a>(el: &'a Element, out: &mut Vec<&'a Element>) {
    out.push(el);
    for child in el.child_elements() {
        collect_descendants(child, out);
    }
}

impl Document {
    /// Parse well-formed markup into an owned tree.
    pub fn parse(source: &str) -> Result<Self> {
        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..Default::default()
        };
        let doc = roxmltree::Document::parse_with_options(source, options)
            .map_err(|e| Error::TemplateUnavailable(format!("malformed markup: {}", e)))?;
        Ok(Self {
            root: convert_element(doc.root_element()),
        })
    }

    pub fn parse_bytes(data: &[u8]) -> Result<Self> {
        let source = std::str::from_utf8(data)
            .map_err(|e| Error::TemplateUnavailable(format!("markup is not UTF-8: {}", e)))?;
        Self::parse(source)
    }

    /// Canonical markup for this document
    pub fn serialize(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_element(&self.root, f)
    }
}

/// Serialize a document to bytes.
pub fn serialize(doc: &Document) -> Vec<u8> {
    doc.serialize()
}

fn qualified_name(node: roxmltree::Node<'_, '_>, namespace: Option<&str>, local: &str) -> String {
    match namespace.and_then(|ns| node.lookup_prefix(ns)) {
        Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, local),
        _ => local.to_string(),
    }
}

fn convert_element(node: roxmltree::Node<'_, '_>) -> Element {
    let tag = node.tag_name();
    let mut element = Element::new(&qualified_name(node, tag.namespace(), tag.name()));

    // Only declarations introduced on this element, not inherited ones.
    let inherited: Vec<(Option<&str>, &str)> = node
        .parent_element()
        .map(|p| p.namespaces().map(|ns| (ns.name(), ns.uri())).collect())
        .unwrap_or_default();
    for ns in node.namespaces() {
        if ns.uri() == XML_NAMESPACE || inherited.contains(&(ns.name(), ns.uri())) {
            continue;
        }
        let name = match ns.name() {
            Some(prefix) => format!("xmlns:{}", prefix),
            None => "xmlns".to_string(),
        };
        element.attributes.push(Attribute {
            name,
            value: ns.uri().to_string(),
        });
    }

    for attr in node.attributes() {
        let name = match attr.namespace() {
            Some(XML_NAMESPACE) => format!("xml:{}", attr.name()),
            ns => qualified_name(node, ns, attr.name()),
        };
        element.attributes.push(Attribute {
            name,
            value: attr.value().to_string(),
        });
    }

    for child in node.children() {
        if child.is_element() {
            element.children.push(Node::Element(convert_element(child)));
        } else if child.is_text() {
            if let Some(text) = child.text() {
                // Text split by a dropped comment becomes one run.
                match element.children.last_mut() {
                    Some(Node::Text(prev)) => prev.push_str(text),
                    _ => element.children.push(Node::Text(text.to_string())),
                }
            }
        }
    }
    element
}

fn write_element(el: &Element, out: &mut impl fmt::Write) -> fmt::Result {
    write!(out, "<{}", el.name)?;
    for attr in &el.attributes {
        write!(out, " {}=\"", attr.name)?;
        escape_into(&attr.value, true, out)?;
        out.write_char('"')?;
    }
    if el.children.is_empty() {
        return out.write_str("/>");
    }
    out.write_char('>')?;
    for child in &el.children {
        match child {
            Node::Element(e) => write_element(e, out)?,
            Node::Text(t) => escape_into(t, false, out)?,
        }
    }
    write!(out, "</{}>", el.name)
}

fn escape_into(raw: &str, attribute: bool, out: &mut impl fmt::Write) -> fmt::Result {
    for ch in raw.chars() {
        match ch {
            '&' => out.write_str("&amp;")?,
            '<' => out.write_str("&lt;")?,
            '>' => out.write_str("&gt;")?,
            '"' if attribute => out.write_str("&quot;")?,
            // Literal whitespace in attributes is normalized by parsers.
            '\n' if attribute => out.write_str("&#10;")?,
            '\r' => out.write_str("&#13;")?,
            '\t' if attribute => out.write_str("&#9;")?,
            c => out.write_char(c)?,
        }
    }
    Ok(())
}
