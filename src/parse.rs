//! Parse Module
//!
//! Reads binding declaration documents and host documents into the crate's
//! own tree (`crate::tree`) and writes trees back out as XML.
//! Parsing goes through xml5ever into an `RcDom`, which is then converted.

use lazy_static::lazy_static;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use regex::Regex;
use std::collections::BTreeMap;
use tendril::TendrilSink;
use xml5ever::driver::parse_document as parse_xml;

use crate::tree::{Attribute, CommentNode, Document, Element, NamespaceMapping, Node, QName, TextNode};
use crate::validate::{CompilerError, INV_PARSE};

/// Attribute name that carries a namespace declaration through the parser.
/// The tree builder consumes `xmlns` attributes once names are bound, so
/// declarations whose prefix is only used inside attribute values would be
/// lost without it.
const NS_DECL_MARKER: &str = "__nsdecl__";

lazy_static! {
    /// One attribute at the start of the remaining tag text. Quoted values are
    /// consumed whole, so declarations inside values never match.
    static ref ATTRIBUTE_RE: Regex =
        Regex::new(r#"^\s+([^\s=/>]+)\s*=\s*("[^"]*"|'[^']*')"#).unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAMESPACE PRE-PASS
// ═══════════════════════════════════════════════════════════════════════════════

/// Length of the markup starting at `rest[0] == '<'` that is copied through
/// untouched, or None for a start tag.
fn opaque_markup_len(rest: &str) -> Option<usize> {
    let until = |end: &str| rest.find(end).map(|i| i + end.len()).unwrap_or(rest.len());
    if rest.starts_with("<!--") {
        Some(until("-->"))
    } else if rest.starts_with("<![CDATA[") {
        Some(until("]]>"))
    } else if rest.starts_with("<?") {
        Some(until("?>"))
    } else if rest.starts_with("<!") {
        // Doctype, possibly with an internal subset
        let head = &rest[..until(">")];
        Some(if head.contains('[') { until("]>") } else { head.len() })
    } else if rest.starts_with("</") {
        Some(until(">"))
    } else {
        None
    }
}

/// Length of a start tag, honoring quoted attribute values.
fn start_tag_len(tag: &str) -> usize {
    let mut quote = None;
    for (i, c) in tag.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return i + 1,
            _ => {}
        }
    }
    tag.len()
}

fn mark_start_tag(tag: &str, out: &mut String) {
    let name_end = tag[1..]
        .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .map(|i| i + 1)
        .unwrap_or(tag.len());
    out.push_str(&tag[..name_end]);

    let mut pos = name_end;
    while let Some(caps) = ATTRIBUTE_RE.captures(&tag[pos..]) {
        out.push_str(&caps[0]);
        let name = &caps[1];
        let prefix = match name.strip_prefix("xmlns") {
            Some("") => Some(""),
            Some(rest) => rest.strip_prefix(':'),
            None => None,
        };
        if let Some(prefix) = prefix {
            out.push_str(&format!(" {}{}={}", NS_DECL_MARKER, prefix, &caps[2]));
        }
        pos += caps[0].len();
    }
    out.push_str(&tag[pos..]);
}

/// Duplicate every namespace declaration into a marker attribute. Only start
/// tags are rewritten: text, comments, CDATA and attribute values pass through.
fn mark_namespace_declarations(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        let len = match opaque_markup_len(rest) {
            Some(len) => {
                out.push_str(&rest[..len]);
                len
            }
            None => {
                let len = start_tag_len(rest);
                mark_start_tag(&rest[..len], &mut out);
                len
            }
        };
        rest = &rest[len..];
    }
    out.push_str(rest);
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE CONVERSION
// ═══════════════════════════════════════════════════════════════════════════════

fn convert_name(name: &xml5ever::QualName) -> QName {
    QName {
        prefix: name
            .prefix
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_default(),
        namespace: name.ns.to_string(),
        local: name.local.to_string(),
    }
}

fn bind_if_missing(mapping: &mut NamespaceMapping, name: &QName) {
    if name.namespace.is_empty() || name.prefix == "xml" {
        return;
    }
    if mapping.get(&name.prefix).is_none() {
        mapping.declare(&name.prefix, &name.namespace);
    }
}

/// Parse a DOM node into tree nodes.
fn parse_dom_node(handle: &Handle, inherited: &NamespaceMapping) -> Vec<Node> {
    match &handle.data {
        NodeData::Document => handle
            .children
            .borrow()
            .iter()
            .flat_map(|child| parse_dom_node(child, inherited))
            .collect(),

        NodeData::Text { contents } => vec![Node::Text(TextNode::new(&contents.borrow()))],

        NodeData::Comment { contents } => vec![Node::Comment(CommentNode {
            value: contents.to_string(),
        })],

        NodeData::Element { name, attrs, .. } => {
            let mut namespaces = inherited.clone();
            let mut attributes = Vec::new();

            for attr in attrs.borrow().iter() {
                let attr_name = convert_name(&attr.name);
                let value = attr.value.to_string();

                if attr_name.namespace.is_empty() && attr_name.local.starts_with(NS_DECL_MARKER) {
                    namespaces.declare(&attr_name.local[NS_DECL_MARKER.len()..], &value);
                } else if attr_name.prefix == "xmlns" {
                    namespaces.declare(&attr_name.local, &value);
                } else if attr_name.prefix.is_empty() && attr_name.local == "xmlns" {
                    namespaces.declare("", &value);
                } else {
                    attributes.push(Attribute {
                        name: attr_name,
                        value,
                    });
                }
            }

            let element_name = convert_name(name);
            bind_if_missing(&mut namespaces, &element_name);
            for attr in &attributes {
                bind_if_missing(&mut namespaces, &attr.name);
            }

            let children = handle
                .children
                .borrow()
                .iter()
                .flat_map(|child| parse_dom_node(child, &namespaces))
                .collect();

            vec![Node::Element(Element {
                name: element_name,
                attributes,
                namespaces,
                children,
            })]
        }

        NodeData::Doctype { .. } | NodeData::ProcessingInstruction { .. } => vec![],
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MAIN PARSING FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse an XML document. `uri` is only recorded for diagnostics and includes.
pub fn parse_document(source: &str, uri: Option<&str>) -> Result<Document, CompilerError> {
    let marked = mark_namespace_declarations(source);

    let dom = parse_xml(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut marked.as_bytes())
        .map_err(|e| {
            CompilerError::with_details(
                INV_PARSE,
                &format!("Failed to parse XML: {}", e),
                uri.map(str::to_string),
                vec![],
            )
        })?;

    // xml5ever recovers from malformed input; any recorded error rejects it
    if let Some(first) = dom.errors.first() {
        return Err(CompilerError::with_details(
            INV_PARSE,
            &format!("Malformed XML: {}", first),
            uri.map(str::to_string),
            dom.errors.iter().skip(1).map(|e| e.to_string()).collect(),
        ));
    }

    let nodes = parse_dom_node(&dom.document, &NamespaceMapping::new());
    let root = nodes
        .into_iter()
        .find_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
        .ok_or_else(|| {
            CompilerError::with_details(
                INV_PARSE,
                "Document has no root element.",
                uri.map(str::to_string),
                vec![],
            )
        })?;

    Ok(Document {
        uri: uri.map(str::to_string),
        root,
    })
}

/// Parse a fragment that is expected to be a single element.
pub fn parse_element(source: &str) -> Result<Element, CompilerError> {
    parse_document(source, None).map(|doc| doc.root)
}

// ═══════════════════════════════════════════════════════════════════════════════
// SERIALIZATION
// ═══════════════════════════════════════════════════════════════════════════════

fn escape(value: &str, in_attribute: bool) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if in_attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Prefix to write for a name, declaring a synthetic one when the name's
/// namespace has no binding in scope.
fn prefix_for(
    name: &QName,
    is_attribute: bool,
    in_scope: &mut BTreeMap<String, String>,
    declared: &mut Vec<(String, String)>,
) -> String {
    if name.namespace.is_empty() || name.prefix == "xml" {
        return name.prefix.clone();
    }
    if in_scope.get(&name.prefix) == Some(&name.namespace)
        && !(is_attribute && name.prefix.is_empty())
    {
        return name.prefix.clone();
    }
    if let Some((prefix, _)) = in_scope
        .iter()
        .find(|(p, uri)| **uri == name.namespace && !(is_attribute && p.is_empty()))
    {
        return prefix.clone();
    }
    let mut n = 1;
    let mut prefix = if name.prefix.is_empty() {
        format!("ns{}", n)
    } else {
        name.prefix.clone()
    };
    while in_scope.contains_key(&prefix) {
        n += 1;
        prefix = format!("ns{}", n);
    }
    in_scope.insert(prefix.clone(), name.namespace.clone());
    declared.push((prefix.clone(), name.namespace.clone()));
    prefix
}

fn write_name(prefix: &str, local: &str, out: &mut String) {
    if !prefix.is_empty() {
        out.push_str(prefix);
        out.push(':');
    }
    out.push_str(local);
}

fn write_element(element: &Element, parent_scope: &BTreeMap<String, String>, out: &mut String) {
    let mut in_scope = parent_scope.clone();
    let mut declared = Vec::new();
    for (prefix, uri) in element.namespaces.iter() {
        if parent_scope.get(prefix).map(|s| s.as_str()) != Some(uri) {
            in_scope.insert(prefix.to_string(), uri.to_string());
            declared.push((prefix.to_string(), uri.to_string()));
        }
    }

    let element_prefix = prefix_for(&element.name, false, &mut in_scope, &mut declared);
    let attribute_prefixes: Vec<String> = element
        .attributes
        .iter()
        .map(|a| prefix_for(&a.name, true, &mut in_scope, &mut declared))
        .collect();

    out.push('<');
    write_name(&element_prefix, &element.name.local, out);
    for (prefix, uri) in &declared {
        if prefix.is_empty() {
            out.push_str(&format!(" xmlns=\"{}\"", escape(uri, true)));
        } else {
            out.push_str(&format!(" xmlns:{}=\"{}\"", prefix, escape(uri, true)));
        }
    }
    for (attr, prefix) in element.attributes.iter().zip(&attribute_prefixes) {
        out.push(' ');
        write_name(prefix, &attr.name.local, out);
        out.push_str("=\"");
        out.push_str(&escape(&attr.value, true));
        out.push('"');
    }

    if element.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in &element.children {
        match child {
            Node::Element(e) => write_element(e, &in_scope, out),
            Node::Text(t) => out.push_str(&escape(&t.value, false)),
            Node::Comment(c) => {
                out.push_str("<!--");
                out.push_str(&c.value);
                out.push_str("-->");
            }
        }
    }
    out.push_str("</");
    write_name(&element_prefix, &element.name.local, out);
    out.push('>');
}

/// Serialize an element and its subtree as XML.
pub fn serialize(element: &Element) -> String {
    let mut out = String::new();
    write_element(element, &BTreeMap::new(), &mut out);
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::ns;

    #[test]
    fn test_mark_namespace_declarations() {
        let marked = mark_namespace_declarations(r#"<a xmlns:xbl="urn:x" xmlns='urn:d'/>"#);
        assert!(marked.contains(r#"__nsdecl__xbl="urn:x""#));
        assert!(marked.contains(r#"__nsdecl__='urn:d'"#));
    }

    #[test]
    fn test_unused_prefix_survives_parsing() {
        let doc = parse_document(
            r#"<root xmlns:xbl="http://www.w3.org/ns/xbl"><div xbl:attr="a"/><span attr="xbl:text"/></root>"#,
            None,
        )
        .unwrap();
        let span = doc.root.child_elements().nth(1).unwrap();
        assert_eq!(span.namespaces.get("xbl"), Some(ns::XBL));
        assert_eq!(
            span.namespaces.resolve_qname("xbl:text"),
            Some(QName::new(ns::XBL, "text"))
        );
    }

    #[test]
    fn test_marker_attributes_are_not_kept() {
        let el = parse_element(r#"<a xmlns:p="urn:p" p:x="1" y="2"/>"#).unwrap();
        assert_eq!(el.attributes.len(), 2);
        assert_eq!(el.attribute(&QName::new("urn:p", "x")), Some("1"));
        assert_eq!(el.attr("y"), Some("2"));
    }

    #[test]
    fn test_serialize_declares_namespaces_once() {
        let el = parse_element(
            r#"<xf:group xmlns:xf="http://www.w3.org/2002/xforms"><xf:input ref="a &amp; b"/></xf:group>"#,
        )
        .unwrap();
        let xml = serialize(&el);
        assert_eq!(xml.matches("xmlns:xf=").count(), 1);
        assert!(xml.contains(r#"<xf:input ref="a &amp; b"/>"#));
        assert_eq!(parse_element(&xml).unwrap(), el);
    }

    #[test]
    fn test_serialize_invents_prefix_for_unbound_attribute() {
        let mut el = Element::new(QName::local("div"));
        el.set_attribute(QName::new(ns::XXBL, "scope"), "outer");
        let xml = serialize(&el);
        assert!(xml.contains(r#"xmlns:ns1="http://orbeon.org/oxf/xml/xbl""#));
        assert!(xml.contains(r#"ns1:scope="outer""#));
    }

    #[test]
    fn test_declarations_in_text_and_values_are_left_alone() {
        let source = r#"<a xmlns:p="urn:p" title=' xmlns:q="u"'>see xmlns:foo="bar" here<!-- xmlns:c="d" --></a>"#;
        let marked = mark_namespace_declarations(source);
        assert_eq!(marked.matches(NS_DECL_MARKER).count(), 1);

        let el = parse_element(source).unwrap();
        assert_eq!(el.attr("title"), Some(r#" xmlns:q="u""#));
        assert_eq!(el.text(), r#"see xmlns:foo="bar" here"#);
        assert_eq!(el.namespaces.get("q"), None);
        assert_eq!(el.namespaces.get("foo"), None);

        let reparsed = parse_element(&serialize(&el)).unwrap();
        assert_eq!(reparsed.attr("title"), el.attr("title"));
        assert_eq!(reparsed.text(), el.text());
    }

    #[test]
    fn test_quoted_angle_bracket_stays_in_start_tag() {
        let el = parse_element(r#"<a cond="x > 1" xmlns:p="urn:p"><p:b/></a>"#).unwrap();
        assert_eq!(el.attr("cond"), Some("x > 1"));
        assert_eq!(el.namespaces.get("p"), Some("urn:p"));
    }

    #[test]
    fn test_mismatched_end_tag_is_parse_error() {
        let err = parse_document("<a><b></a>", Some("bad.xml")).unwrap_err();
        assert_eq!(err.code, INV_PARSE);
        assert_eq!(err.context.as_deref(), Some("bad.xml"));
    }

    #[test]
    fn test_duplicate_attribute_is_parse_error() {
        let err = parse_element("<a x='1' x='2'/>").unwrap_err();
        assert_eq!(err.code, INV_PARSE);
        assert!(err.message.contains("Duplicate attribute"));
    }

    #[test]
    fn test_missing_root_is_parse_error() {
        let err = parse_document("   ", Some("empty.xbl")).unwrap_err();
        assert_eq!(err.code, INV_PARSE);
        assert_eq!(err.context.as_deref(), Some("empty.xbl"));
    }
}
