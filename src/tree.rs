//! XML tree model shared by every phase.
//!
//! Elements own their children and carry their full in-scope namespace
//! mapping, so a subtree copied out of one document keeps resolving the
//! qualified values it contains (`ref="foo:bar"`) wherever it is spliced.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Namespace URIs of the vocabularies the binding subsystem understands.
pub mod ns {
    pub const XBL: &str = "http://www.w3.org/ns/xbl";
    pub const XXBL: &str = "http://orbeon.org/oxf/xml/xbl";
    pub const XFORMS: &str = "http://www.w3.org/2002/xforms";
    pub const XXFORMS: &str = "http://orbeon.org/oxf/xml/xforms";
    pub const EXFORMS: &str = "http://www.exforms.org/exf/1-0";
    pub const XML_EVENTS: &str = "http://www.w3.org/2001/xml-events";
    pub const XSD: &str = "http://www.w3.org/2001/XMLSchema";
    pub const XML: &str = "http://www.w3.org/XML/1998/namespace";
}

// ═══════════════════════════════════════════════════════════════════════════════
// QUALIFIED NAMES
// ═══════════════════════════════════════════════════════════════════════════════

/// Qualified name. Equality and hashing only look at namespace and local
/// name; the prefix is kept for serialization.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QName {
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub namespace: String,
    pub local: String,
}

impl QName {
    pub fn new(namespace: &str, local: &str) -> Self {
        QName {
            prefix: String::new(),
            namespace: namespace.to_string(),
            local: local.to_string(),
        }
    }

    /// Name in no namespace.
    pub fn local(local: &str) -> Self {
        Self::new("", local)
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    /// `prefix:local`, or just `local` without a prefix.
    pub fn qualified(&self) -> String {
        if self.prefix.is_empty() {
            self.local.clone()
        } else {
            format!("{}:{}", self.prefix, self.local)
        }
    }

    /// Clark notation, `{uri}local`.
    pub fn expanded(&self) -> String {
        if self.namespace.is_empty() {
            self.local.clone()
        } else {
            format!("{{{}}}{}", self.namespace, self.local)
        }
    }

    pub fn is_in(&self, namespace: &str) -> bool {
        self.namespace == namespace
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace && self.local == other.local
    }
}

impl Eq for QName {}

impl Hash for QName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.local.hash(state);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAMESPACE MAPPING
// ═══════════════════════════════════════════════════════════════════════════════

/// In-scope prefix -> URI bindings. The empty prefix is the default namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NamespaceMapping(pub BTreeMap<String, String>);

impl NamespaceMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, prefix: &str) -> Option<&str> {
        self.0.get(prefix).map(|s| s.as_str())
    }

    pub fn declare(&mut self, prefix: &str, uri: &str) {
        self.0.insert(prefix.to_string(), uri.to_string());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(p, u)| (p.as_str(), u.as_str()))
    }

    /// Adds every binding of `other` whose prefix is not already bound here.
    pub fn copy_missing(&mut self, other: &NamespaceMapping) {
        for (prefix, uri) in other.iter() {
            self.0
                .entry(prefix.to_string())
                .or_insert_with(|| uri.to_string());
        }
    }

    /// Resolves a lexical qualified value such as `fr:button`.
    ///
    /// An unprefixed value is in no namespace, as for attribute names. An
    /// unbound prefix yields None.
    pub fn resolve_qname(&self, lexical: &str) -> Option<QName> {
        let lexical = lexical.trim();
        if lexical.is_empty() {
            return None;
        }
        match lexical.split_once(':') {
            Some((prefix, local)) => {
                if prefix == "xml" {
                    return Some(QName::new(ns::XML, local).with_prefix("xml"));
                }
                let uri = self.get(prefix)?;
                Some(QName::new(uri, local).with_prefix(prefix))
            }
            None => Some(QName::local(lexical)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Node {
    Element(Element),
    Text(TextNode),
    Comment(CommentNode),
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextNode {
    pub value: String,
}

impl TextNode {
    pub fn new(value: &str) -> Self {
        TextNode {
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentNode {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub name: QName,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub namespaces: NamespaceMapping,
    #[serde(default)]
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: QName) -> Self {
        Element {
            name,
            attributes: Vec::new(),
            namespaces: NamespaceMapping::new(),
            children: Vec::new(),
        }
    }

    pub fn attribute(&self, name: &QName) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| &a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Attribute in no namespace.
    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attribute(&QName::local(local))
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    pub fn set_attribute(&mut self, name: QName, value: &str) {
        if let Some(existing) = self.attributes.iter_mut().find(|a| a.name == name) {
            existing.value = value.to_string();
        } else {
            self.attributes.push(Attribute {
                name,
                value: value.to_string(),
            });
        }
    }

    pub fn remove_attribute(&mut self, name: &QName) -> Option<String> {
        let index = self.attributes.iter().position(|a| &a.name == name)?;
        Some(self.attributes.remove(index).value)
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    pub fn children_named<'a>(&'a self, name: &QName) -> impl Iterator<Item = &'a Element> + 'a {
        let name = name.clone();
        self.child_elements().filter(move |e| e.name == name)
    }

    pub fn first_child_named(&self, name: &QName) -> Option<&Element> {
        self.children_named(name).next()
    }

    /// Concatenated text of the direct text children only.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.value.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Replaces all content with a single text node.
    pub fn set_text(&mut self, value: &str) {
        self.children = vec![Node::Text(TextNode::new(value))];
    }

    /// Depth-first, document-order walk over this element and its descendants.
    pub fn descendants_or_self(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        collect_elements(self, &mut out);
        out
    }

    /// Builder helper used by tests and transforms.
    pub fn with_attr(mut self, local: &str, value: &str) -> Self {
        self.set_attribute(QName::local(local), value);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }
}

fn collect_elements<'a>(element: &'a Element, out: &mut Vec<&'a Element>) {
    out.push(element);
    for child in element.child_elements() {
        collect_elements(child, out);
    }
}

/// A parsed XML document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub uri: Option<String>,
    pub root: Element,
}

impl Document {
    pub fn new(root: Element) -> Self {
        Document { uri: None, root }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qname_equality_ignores_prefix() {
        let a = QName::new(ns::XFORMS, "input").with_prefix("xf");
        let b = QName::new(ns::XFORMS, "input").with_prefix("xforms");
        assert_eq!(a, b);
        assert_ne!(a, QName::local("input"));
        assert_eq!(a.qualified(), "xf:input");
    }

    #[test]
    fn test_resolve_qname() {
        let mut mapping = NamespaceMapping::new();
        mapping.declare("xbl", ns::XBL);
        assert_eq!(
            mapping.resolve_qname("xbl:text"),
            Some(QName::new(ns::XBL, "text"))
        );
        assert_eq!(mapping.resolve_qname("label"), Some(QName::local("label")));
        assert_eq!(mapping.resolve_qname("fr:label"), None);
    }

    #[test]
    fn test_copy_missing_keeps_existing_bindings() {
        let mut target = NamespaceMapping::new();
        target.declare("a", "urn:target");
        let mut source = NamespaceMapping::new();
        source.declare("a", "urn:source");
        source.declare("b", "urn:b");
        target.copy_missing(&source);
        assert_eq!(target.get("a"), Some("urn:target"));
        assert_eq!(target.get("b"), Some("urn:b"));
    }

    #[test]
    fn test_text_only_reads_direct_children() {
        let mut e = Element::new(QName::local("p"));
        e.children.push(Node::Text(TextNode::new("a")));
        e.children
            .push(Node::Element(Element::new(QName::local("b"))));
        e.children.push(Node::Text(TextNode::new("c")));
        assert_eq!(e.text(), "ac");
        e.set_text("z");
        assert_eq!(e.children.len(), 1);
        assert_eq!(e.text(), "z");
    }
}
