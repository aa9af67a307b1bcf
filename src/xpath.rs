//! Path expression evaluation.
//!
//! Expansion only consumes path expressions through `PathEvaluator`; hosts
//! with a full XPath engine plug it in there. `SimplePathEvaluator` covers the
//! location paths that selector translation and `xxbl:attr` produce:
//! unions, `child::`, `descendant::`, `descendant-or-self::`, `self::`, `//`,
//! `.`, name tests (`p:name`, `*`, `p:*`), `text()`, `node()` and `@name`/`@*`.

use std::collections::HashMap;

use crate::tree::{Attribute, Element, NamespaceMapping, Node, QName, TextNode};
use crate::validate::{CompilerError, INV_INVALID_PATH};

/// One item of a node sequence. Element and text depths are counted from the
/// context element (0 for the context itself).
#[derive(Debug, Clone, Copy)]
pub enum PathItem<'a> {
    Element { element: &'a Element, depth: usize },
    Attribute { owner: &'a Element, attribute: &'a Attribute },
    Text { text: &'a TextNode, depth: usize },
}

pub trait PathEvaluator: Send + Sync {
    fn evaluate<'a>(
        &self,
        context: &'a Element,
        expr: &str,
        namespaces: &NamespaceMapping,
    ) -> Result<Vec<PathItem<'a>>, CompilerError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXPRESSION MODEL
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    SelfAxis,
    Attribute,
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    Name(QName),
    AnyInNamespace(String),
    AnyName,
    Text,
    AnyNode,
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    axis: Axis,
    test: NodeTest,
}

fn invalid(expr: &str, reason: &str) -> CompilerError {
    CompilerError::with_details(
        INV_INVALID_PATH,
        &format!("Invalid path expression '{}': {}", expr, reason),
        None,
        vec![],
    )
}

fn parse_test(raw: &str, axis: Axis, expr: &str, ns: &NamespaceMapping) -> Result<NodeTest, CompilerError> {
    match raw {
        "*" => return Ok(NodeTest::AnyName),
        "node()" => return Ok(NodeTest::AnyNode),
        "text()" if axis != Axis::Attribute => return Ok(NodeTest::Text),
        _ => {}
    }
    if raw.is_empty() || raw.contains(['(', ')', '[', ']', '=', '"', '\'']) {
        return Err(invalid(expr, &format!("unsupported step '{}'", raw)));
    }
    if let Some(prefix) = raw.strip_suffix(":*") {
        let uri = ns
            .get(prefix)
            .ok_or_else(|| invalid(expr, &format!("unbound prefix '{}'", prefix)))?;
        return Ok(NodeTest::AnyInNamespace(uri.to_string()));
    }
    ns.resolve_qname(raw)
        .map(NodeTest::Name)
        .ok_or_else(|| invalid(expr, &format!("unbound prefix in '{}'", raw)))
}

fn parse_step(raw: &str, expr: &str, ns: &NamespaceMapping) -> Result<Step, CompilerError> {
    if raw == "." {
        return Ok(Step {
            axis: Axis::SelfAxis,
            test: NodeTest::AnyNode,
        });
    }
    if let Some(name) = raw.strip_prefix('@') {
        return Ok(Step {
            axis: Axis::Attribute,
            test: parse_test(name, Axis::Attribute, expr, ns)?,
        });
    }
    let (axis, test) = match raw.split_once("::") {
        Some(("child", t)) => (Axis::Child, t),
        Some(("descendant", t)) => (Axis::Descendant, t),
        Some(("descendant-or-self", t)) => (Axis::DescendantOrSelf, t),
        Some(("self", t)) => (Axis::SelfAxis, t),
        Some(("attribute", t)) => (Axis::Attribute, t),
        Some((other, _)) => return Err(invalid(expr, &format!("unsupported axis '{}'", other))),
        None => (Axis::Child, raw),
    };
    Ok(Step {
        axis,
        test: parse_test(test, axis, expr, ns)?,
    })
}

fn parse_path(path: &str, expr: &str, ns: &NamespaceMapping) -> Result<Vec<Step>, CompilerError> {
    let path = path.trim();
    if path.is_empty() {
        return Err(invalid(expr, "empty path"));
    }
    if path.starts_with('/') {
        return Err(invalid(expr, "absolute paths are not supported"));
    }

    let mut steps = Vec::new();
    let segments: Vec<&str> = path.split('/').collect();
    for (index, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            // `a//b`: the empty segment between the slashes
            if index == 0 || index == segments.len() - 1 {
                return Err(invalid(expr, "dangling '/'"));
            }
            steps.push(Step {
                axis: Axis::DescendantOrSelf,
                test: NodeTest::AnyNode,
            });
        } else {
            steps.push(parse_step(segment.trim(), expr, ns)?);
        }
    }

    // Attribute and text steps yield non-element items, so they must come last.
    let last = steps.len() - 1;
    for step in &steps[..last] {
        if step.axis == Axis::Attribute || step.test == NodeTest::Text {
            return Err(invalid(expr, "attribute and text steps must be last"));
        }
    }
    Ok(steps)
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVALUATION
// ═══════════════════════════════════════════════════════════════════════════════

fn element_matches(element: &Element, test: &NodeTest) -> bool {
    match test {
        NodeTest::Name(name) => &element.name == name,
        NodeTest::AnyInNamespace(uri) => element.name.namespace == *uri,
        NodeTest::AnyName | NodeTest::AnyNode => true,
        NodeTest::Text => false,
    }
}

fn push_descendants<'a>(element: &'a Element, depth: usize, out: &mut Vec<(&'a Element, usize)>) {
    for child in element.child_elements() {
        out.push((child, depth + 1));
        push_descendants(child, depth + 1, out);
    }
}

fn apply_step<'a>(contexts: &[(&'a Element, usize)], step: &Step, out: &mut Vec<PathItem<'a>>) {
    for &(element, depth) in contexts {
        match step.axis {
            Axis::Attribute => {
                for attribute in &element.attributes {
                    let keep = match &step.test {
                        NodeTest::Name(name) => &attribute.name == name,
                        NodeTest::AnyInNamespace(uri) => attribute.name.namespace == *uri,
                        NodeTest::AnyName | NodeTest::AnyNode => true,
                        NodeTest::Text => false,
                    };
                    if keep {
                        out.push(PathItem::Attribute {
                            owner: element,
                            attribute,
                        });
                    }
                }
            }
            Axis::Child if step.test == NodeTest::Text => {
                for child in &element.children {
                    if let Node::Text(text) = child {
                        out.push(PathItem::Text {
                            text,
                            depth: depth + 1,
                        });
                    }
                }
            }
            _ => {
                let mut candidates = Vec::new();
                match step.axis {
                    Axis::SelfAxis => candidates.push((element, depth)),
                    Axis::Child => {
                        candidates.extend(element.child_elements().map(|c| (c, depth + 1)))
                    }
                    Axis::Descendant => push_descendants(element, depth, &mut candidates),
                    Axis::DescendantOrSelf => {
                        candidates.push((element, depth));
                        push_descendants(element, depth, &mut candidates);
                    }
                    Axis::Attribute => {}
                }
                for (candidate, d) in candidates {
                    if element_matches(candidate, &step.test) {
                        out.push(PathItem::Element {
                            element: candidate,
                            depth: d,
                        });
                    }
                }
            }
        }
    }
}

fn same_item(a: &PathItem, b: &PathItem) -> bool {
    match (a, b) {
        (PathItem::Element { element: x, .. }, PathItem::Element { element: y, .. }) => {
            std::ptr::eq(*x, *y)
        }
        (PathItem::Attribute { attribute: x, .. }, PathItem::Attribute { attribute: y, .. }) => {
            std::ptr::eq(*x, *y)
        }
        (PathItem::Text { text: x, .. }, PathItem::Text { text: y, .. }) => std::ptr::eq(*x, *y),
        _ => false,
    }
}

fn push_unique<'a>(out: &mut Vec<PathItem<'a>>, item: PathItem<'a>) {
    if !out.iter().any(|seen| same_item(seen, &item)) {
        out.push(item);
    }
}

fn item_address(item: &PathItem) -> usize {
    match item {
        PathItem::Element { element, .. } => *element as *const Element as usize,
        PathItem::Attribute { attribute, .. } => *attribute as *const Attribute as usize,
        PathItem::Text { text, .. } => *text as *const TextNode as usize,
    }
}

/// Document-order position of every node under `element`: the element, then
/// its attributes, then its children.
fn number_nodes(element: &Element, positions: &mut HashMap<usize, usize>) {
    let next = positions.len();
    positions.insert(element as *const Element as usize, next);
    for attribute in &element.attributes {
        let next = positions.len();
        positions.insert(attribute as *const Attribute as usize, next);
    }
    for child in &element.children {
        match child {
            Node::Element(e) => number_nodes(e, positions),
            Node::Text(text) => {
                let next = positions.len();
                positions.insert(text as *const TextNode as usize, next);
            }
            _ => {}
        }
    }
}

fn sort_document_order(context: &Element, items: &mut [PathItem]) {
    if items.len() < 2 {
        return;
    }
    let mut positions = HashMap::new();
    number_nodes(context, &mut positions);
    items.sort_by_key(|item| {
        positions
            .get(&item_address(item))
            .copied()
            .unwrap_or(usize::MAX)
    });
}

/// Evaluates the location-path subset over the crate's tree.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimplePathEvaluator;

impl PathEvaluator for SimplePathEvaluator {
    fn evaluate<'a>(
        &self,
        context: &'a Element,
        expr: &str,
        namespaces: &NamespaceMapping,
    ) -> Result<Vec<PathItem<'a>>, CompilerError> {
        let mut result = Vec::new();

        for alternative in expr.split('|') {
            let steps = parse_path(alternative, expr, namespaces)?;
            let mut contexts = vec![(context, 0usize)];
            let mut items = Vec::new();

            for step in &steps {
                items.clear();
                apply_step(&contexts, step, &mut items);
                contexts = items
                    .iter()
                    .filter_map(|item| match item {
                        PathItem::Element { element, depth } => Some((*element, *depth)),
                        _ => None,
                    })
                    .collect();
                let mut seen: Vec<(&Element, usize)> = Vec::with_capacity(contexts.len());
                for c in contexts {
                    if !seen.iter().any(|s| std::ptr::eq(s.0, c.0)) {
                        seen.push(c);
                    }
                }
                contexts = seen;
            }

            for item in items {
                push_unique(&mut result, item);
            }
        }

        // Node sets come back in document order, like an XPath union
        sort_document_order(context, &mut result);
        Ok(result)
    }
}
