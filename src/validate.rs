use serde::{Deserialize, Serialize};

use crate::tree::{ns, Element, Node, QName};

// ═══════════════════════════════════════════════════════════════════════════════
// INVARIANT CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const INV_TRANSFORM_PROCESSOR_MISSING: &str = "XBL001";
pub const INV_TRANSFORM_SINGLE_ROOT: &str = "XBL002";
pub const INV_DUPLICATE_STATIC_ID: &str = "XBL003";
pub const INV_DUPLICATE_PREFIXED_ID: &str = "XBL004";
pub const INV_SCOPE_ID_IN_USE: &str = "XBL005";
pub const INV_UNRESOLVABLE_SCOPE: &str = "XBL006";
pub const INV_DUPLICATE_BINDING: &str = "XBL007";
pub const INV_INCLUDE_WITHOUT_BINDINGS: &str = "XBL008";
pub const INV_BINDING_DEPTH: &str = "XBL009";
pub const INV_INVALID_PATH: &str = "XBL010";
pub const INV_STATIC_ID_EXPECTED: &str = "XBL011";
pub const INV_PARSE: &str = "XBL-PARSE";
pub const INV_RESOURCE: &str = "XBL-RESOURCE";

// ═══════════════════════════════════════════════════════════════════════════════
// GUARANTEES
// ═══════════════════════════════════════════════════════════════════════════════

fn get_guarantee(code: &str) -> &'static str {
    match code {
        INV_TRANSFORM_PROCESSOR_MISSING => {
            "Every xxbl:transform names a processor known to the transform registry."
        }
        INV_TRANSFORM_SINGLE_ROOT => "A transformed template has exactly one root element.",
        INV_DUPLICATE_STATIC_ID => "Static ids are unique within one lexical scope.",
        INV_DUPLICATE_PREFIXED_ID => "Prefixed ids are unique across the whole host document.",
        INV_SCOPE_ID_IN_USE => "Two scopes never claim the same scope id.",
        INV_UNRESOLVABLE_SCOPE => "Every prefixed id maps back to exactly one scope.",
        INV_DUPLICATE_BINDING => "One element name is bound by at most one binding.",
        INV_INCLUDE_WITHOUT_BINDINGS => "An auto-included resource contributes bindings.",
        INV_BINDING_DEPTH => "Binding expansion terminates.",
        INV_INVALID_PATH => "Path expressions are well formed.",
        INV_STATIC_ID_EXPECTED => "Ids resolved against a container are static ids.",
        INV_PARSE => "Binding and host documents are well-formed XML.",
        INV_RESOURCE => "Referenced resources can be loaded.",
        _ => "Unknown invariant.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER ERROR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Aborts the analysis: the bindings or their transforms are misconfigured.
    Configuration,
    /// Aborts the analysis: two elements claim the same id.
    DuplicateId,
    /// Internal invariant violation.
    UnresolvableScope,
    Parse,
    Resource,
}

fn kind_for(code: &str) -> ErrorKind {
    match code {
        INV_DUPLICATE_STATIC_ID | INV_DUPLICATE_PREFIXED_ID => ErrorKind::DuplicateId,
        INV_SCOPE_ID_IN_USE | INV_UNRESOLVABLE_SCOPE => ErrorKind::UnresolvableScope,
        INV_PARSE => ErrorKind::Parse,
        INV_RESOURCE => ErrorKind::Resource,
        _ => ErrorKind::Configuration,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("[{code}] {message}")]
pub struct CompilerError {
    pub code: String,
    pub kind: ErrorKind,
    pub message: String,
    pub guarantee: String,
    pub context: Option<String>,
    pub hints: Vec<String>,
}

impl CompilerError {
    pub fn new(code: &str, message: &str) -> Self {
        Self::with_details(code, message, None, vec![])
    }

    pub fn with_details(
        code: &str,
        message: &str,
        context: Option<String>,
        hints: Vec<String>,
    ) -> Self {
        CompilerError {
            code: code.to_string(),
            kind: kind_for(code),
            message: message.to_string(),
            guarantee: get_guarantee(code).to_string(),
            context,
            hints,
        }
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(self.kind, ErrorKind::Resource)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STRUCTURAL CHECKS (Return Option, not Result)
// ═══════════════════════════════════════════════════════════════════════════════

/// Returns the single root element of a document fragment, ignoring whitespace
/// and comments. None when there are zero or several root elements, or when
/// non-blank text sits next to the root.
pub fn single_root_element(nodes: &[Node]) -> Option<&Element> {
    let mut root = None;
    for node in nodes {
        match node {
            Node::Element(e) => {
                if root.is_some() {
                    return None;
                }
                root = Some(e);
            }
            Node::Text(t) if !t.value.trim().is_empty() => return None,
            _ => {}
        }
    }
    root
}

/// A transform must produce exactly one root content element.
pub fn validate_transform_output(nodes: &[Node], transform: &QName) -> Option<CompilerError> {
    if single_root_element(nodes).is_some() {
        return None;
    }
    Some(CompilerError::with_details(
        INV_TRANSFORM_SINGLE_ROOT,
        &format!(
            "xxbl:transform='{}' did not produce a single root element.",
            transform.qualified()
        ),
        None,
        vec!["Make the transform emit one element wrapping the template content.".to_string()],
    ))
}

/// A template handed to a transform must itself have a single child element.
pub fn validate_transform_input(template: &Element) -> Option<CompilerError> {
    if template.child_elements().count() == 1 {
        return None;
    }
    Some(CompilerError::new(
        INV_TRANSFORM_SINGLE_ROOT,
        "xxbl:transform requires a single child element.",
    ))
}

/// Binding declaration documents are rooted at xbl:xbl.
pub fn is_binding_document(root: &Element) -> bool {
    root.name == QName::new(ns::XBL, "xbl")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TextNode;

    #[test]
    fn test_error_kind_follows_code() {
        let err = CompilerError::new(INV_DUPLICATE_STATIC_ID, "Duplicate id found for static id: x");
        assert_eq!(err.kind, ErrorKind::DuplicateId);
        assert_eq!(err.guarantee, "Static ids are unique within one lexical scope.");
        assert_eq!(err.to_string(), "[XBL003] Duplicate id found for static id: x");

        let err = CompilerError::new(INV_UNRESOLVABLE_SCOPE, "no scope");
        assert_eq!(err.kind, ErrorKind::UnresolvableScope);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_single_root_ignores_whitespace() {
        let nodes = vec![
            Node::Text(TextNode::new("\n  ")),
            Node::Element(Element::new(QName::local("div"))),
            Node::Text(TextNode::new("\n")),
        ];
        assert!(single_root_element(&nodes).is_some());

        let two = vec![
            Node::Element(Element::new(QName::local("a"))),
            Node::Element(Element::new(QName::local("b"))),
        ];
        assert!(single_root_element(&two).is_none());
        assert!(single_root_element(&[]).is_none());
    }

    #[test]
    fn test_transform_output_error_is_configuration() {
        let err = validate_transform_output(&[], &QName::new(ns::XXBL, "xslt")).unwrap();
        assert_eq!(err.code, INV_TRANSFORM_SINGLE_ROOT);
        assert_eq!(err.kind, ErrorKind::Configuration);
    }
}
