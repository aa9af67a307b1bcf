//! Scope Extractor / Compactor
//!
//! One forward pass over the annotated event stream of a tree. It declares
//! every annotated id in the inner or outer scope, following the `xxbl:scope`
//! markers, and keeps only the declarative-component vocabulary in the compact
//! output.

use serde::{Deserialize, Serialize};

use crate::annotate::{emit, is_data_region, Metadata, TreeBuilder, XmlEvent, XmlReceiver};
use crate::registry::RegistrySnapshot;
use crate::scope::{ScopeId, ScopeTree};
use crate::tree::{ns, Attribute, Element, NamespaceMapping, QName};
use crate::validate::CompilerError;

// ═══════════════════════════════════════════════════════════════════════════════
// SCOPE MARKERS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeMarker {
    Inner,
    Outer,
}

impl ScopeMarker {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "inner" => Some(ScopeMarker::Inner),
            "outer" => Some(ScopeMarker::Outer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeMarker::Inner => "inner",
            ScopeMarker::Outer => "outer",
        }
    }
}

pub fn scope_attribute_name() -> QName {
    QName::new(ns::XXBL, "scope").with_prefix("xxbl")
}

/// Scope-marker stack as a value: `enter` and `leave` return new stacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeStack(Vec<ScopeMarker>);

impl ScopeStack {
    pub fn seeded(start: ScopeMarker) -> Self {
        ScopeStack(vec![start])
    }

    pub fn top(&self) -> ScopeMarker {
        self.0.last().copied().unwrap_or(ScopeMarker::Inner)
    }

    /// Pushes the explicit marker, or repeats the current one.
    pub fn enter(&self, explicit: Option<ScopeMarker>) -> ScopeStack {
        let mut markers = self.0.clone();
        markers.push(explicit.unwrap_or_else(|| self.top()));
        ScopeStack(markers)
    }

    pub fn leave(&self) -> ScopeStack {
        let mut markers = self.0.clone();
        if markers.len() > 1 {
            markers.pop();
        }
        ScopeStack(markers)
    }

    pub fn depth(&self) -> usize {
        self.0.len() - 1
    }
}

/// Effective marker of every element of an event stream, in document order.
pub fn fold_scopes<'e>(
    events: impl IntoIterator<Item = &'e XmlEvent>,
    start: ScopeMarker,
) -> Vec<ScopeMarker> {
    let scope_name = scope_attribute_name();
    let (_, markers) = events.into_iter().fold(
        (ScopeStack::seeded(start), Vec::new()),
        |(stack, mut markers), event| match event {
            XmlEvent::StartElement { attributes, .. } => {
                let explicit = attributes
                    .iter()
                    .find(|a| a.name == scope_name)
                    .and_then(|a| ScopeMarker::parse(&a.value));
                let stack = stack.enter(explicit);
                markers.push(stack.top());
                (stack, markers)
            }
            XmlEvent::EndElement { .. } => (stack.leave(), markers),
            _ => (stack, markers),
        },
    );
    markers
}

// ═══════════════════════════════════════════════════════════════════════════════
// RELEVANCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Namespaces whose elements always reach the compact tree.
pub fn is_component_vocabulary(name: &QName) -> bool {
    matches!(
        name.namespace.as_str(),
        ns::XFORMS | ns::XXFORMS | ns::EXFORMS | ns::XBL
    )
}

fn is_lhha(name: &QName) -> bool {
    name.is_in(ns::XFORMS) && matches!(name.local.as_str(), "label" | "help" | "hint" | "alert")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Preserve {
    No,
    /// Literal markup under label/help/hint/alert; ids are declared.
    Lhha,
    /// Instance data, schemas, nested binding declarations and bound element
    /// content; ids are not declared.
    Data,
}

struct Frame {
    kept: bool,
    children: Preserve,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXTRACTOR
// ═══════════════════════════════════════════════════════════════════════════════

pub struct ExtractionTarget<'s> {
    pub prefix: &'s str,
    pub inner: ScopeId,
    pub outer: ScopeId,
    /// Pass the root through without declaring it (shadow trees). Otherwise the
    /// output is wrapped in a `static-state` element.
    pub keep_root: bool,
    pub start: ScopeMarker,
}

struct Extractor<'s> {
    target: &'s ExtractionTarget<'s>,
    scopes: &'s mut ScopeTree,
    metadata: &'s Metadata,
    bindings: &'s RegistrySnapshot,
    scope_name: QName,
    stack: ScopeStack,
    frames: Vec<Frame>,
    output: TreeBuilder,
}

impl Extractor<'_> {
    fn preserve(&self) -> Preserve {
        self.frames.last().map(|f| f.children).unwrap_or(Preserve::No)
    }

    fn start_element(
        &mut self,
        name: QName,
        attributes: Vec<Attribute>,
        namespaces: NamespaceMapping,
    ) -> Result<(), CompilerError> {
        let is_root = self.frames.is_empty();
        let preserve = self.preserve();

        let explicit = attributes
            .iter()
            .find(|a| a.name == self.scope_name)
            .and_then(|a| ScopeMarker::parse(&a.value));
        self.stack = self.stack.enter(explicit);

        let is_extension = self.bindings.contains(&name);
        let kept = (is_root && self.target.keep_root)
            || preserve != Preserve::No
            || is_component_vocabulary(&name)
            || is_extension;

        let declarable =
            kept && !(is_root && self.target.keep_root) && preserve != Preserve::Data;
        if declarable {
            let static_id = attributes
                .iter()
                .find(|a| a.name == QName::local("id"))
                .map(|a| a.value.clone());
            if let Some(static_id) = static_id {
                let prefixed_id = format!("{}{}", self.target.prefix, static_id);
                if self.metadata.is_annotated(&prefixed_id) {
                    let scope = match self.stack.top() {
                        ScopeMarker::Inner => self.target.inner,
                        ScopeMarker::Outer => self.target.outer,
                    };
                    self.scopes.declare(scope, &static_id, &prefixed_id)?;
                }
            }
        }

        let children = match preserve {
            Preserve::No if is_lhha(&name) => Preserve::Lhha,
            Preserve::No if is_data_region(&name) || is_extension => Preserve::Data,
            other => other,
        };
        self.frames.push(Frame { kept, children });

        if kept {
            self.output.receive(XmlEvent::StartElement {
                name,
                attributes,
                namespaces,
            })?;
        }
        Ok(())
    }
}

impl XmlReceiver for Extractor<'_> {
    fn receive(&mut self, event: XmlEvent) -> Result<(), CompilerError> {
        match event {
            XmlEvent::StartElement {
                name,
                attributes,
                namespaces,
            } => self.start_element(name, attributes, namespaces),
            XmlEvent::EndElement { name } => {
                self.stack = self.stack.leave();
                match self.frames.pop() {
                    Some(frame) if frame.kept => {
                        self.output.receive(XmlEvent::EndElement { name })
                    }
                    _ => Ok(()),
                }
            }
            text_or_comment => {
                if self.frames.last().is_some_and(|f| f.kept) {
                    self.output.receive(text_or_comment)
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Populates `scopes` from an annotated tree and returns its compact form.
pub fn extract(
    full: &Element,
    target: &ExtractionTarget,
    scopes: &mut ScopeTree,
    metadata: &Metadata,
    bindings: &RegistrySnapshot,
) -> Result<Element, CompilerError> {
    let mut extractor = Extractor {
        target,
        scopes,
        metadata,
        bindings,
        scope_name: scope_attribute_name(),
        stack: ScopeStack::seeded(target.start),
        frames: Vec::new(),
        output: TreeBuilder::new(),
    };

    let wrapper = QName::local("static-state");
    if !target.keep_root {
        extractor.output.receive(XmlEvent::StartElement {
            name: wrapper.clone(),
            attributes: vec![],
            namespaces: full.namespaces.clone(),
        })?;
    }
    emit(full, &mut extractor)?;
    if !target.keep_root {
        extractor
            .output
            .receive(XmlEvent::EndElement { name: wrapper })?;
    }

    Ok(extractor
        .output
        .finish()
        .unwrap_or_else(|| Element::new(QName::local("static-state"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::annotate_tree;
    use crate::parse::parse_element;
    use crate::validate::{ErrorKind, INV_DUPLICATE_STATIC_ID};

    const NS: &str = r#"xmlns:xbl="http://www.w3.org/ns/xbl" xmlns:xf="http://www.w3.org/2002/xforms" xmlns:xxbl="http://orbeon.org/oxf/xml/xbl""#;

    fn events_of(source: &str) -> Vec<XmlEvent> {
        let element = parse_element(source).unwrap();
        let mut buffer = crate::annotate::EventBuffer::new("");
        emit(&element, &mut buffer).unwrap();
        buffer.events().to_vec()
    }

    #[test]
    fn test_scope_fold_inherits_and_overrides() {
        let events = events_of(&format!(
            r#"<a {}><b xxbl:scope="outer"><c/><d xxbl:scope="inner"/></b><e/></a>"#,
            NS
        ));
        use ScopeMarker::*;
        assert_eq!(
            fold_scopes(&events, Inner),
            vec![Inner, Outer, Outer, Inner, Inner]
        );
    }

    #[test]
    fn test_stack_values_are_independent() {
        let base = ScopeStack::seeded(ScopeMarker::Inner);
        let outer = base.enter(Some(ScopeMarker::Outer));
        assert_eq!(base.top(), ScopeMarker::Inner);
        assert_eq!(outer.top(), ScopeMarker::Outer);
        assert_eq!(outer.enter(None).top(), ScopeMarker::Outer);
        assert_eq!(outer.leave(), base);
        assert_eq!(base.leave().depth(), 0);
    }

    fn shadow(body: &str) -> Element {
        parse_element(&format!(r#"<xbl:template {}>{}</xbl:template>"#, NS, body)).unwrap()
    }

    fn run(
        body: &str,
    ) -> (Result<Element, CompilerError>, ScopeTree, ScopeId, ScopeId) {
        let mut metadata = Metadata::new();
        let annotated = annotate_tree(&shadow(body), "cmp$", true, false, &mut metadata).unwrap();
        let mut scopes = ScopeTree::new();
        let outer = scopes.top_level();
        let inner = scopes.new_scope(outer, "cmp").unwrap();
        let target = ExtractionTarget {
            prefix: "cmp$",
            inner,
            outer,
            keep_root: true,
            start: ScopeMarker::Inner,
        };
        let compact = extract(
            &annotated.tree,
            &target,
            &mut scopes,
            &metadata,
            &RegistrySnapshot::default(),
        );
        (compact, scopes, inner, outer)
    }

    #[test]
    fn test_ids_go_to_the_marked_scope() {
        let (compact, scopes, inner, outer) = run(
            r#"<xf:input id="i"/><xf:output id="o" xxbl:scope="outer"><xf:label id="l">x</xf:label></xf:output>"#,
        );
        compact.unwrap();
        assert_eq!(scopes.prefixed_id_for_static_id(inner, "i"), Some("cmp$i"));
        assert_eq!(scopes.prefixed_id_for_static_id(outer, "o"), Some("cmp$o"));
        assert_eq!(scopes.prefixed_id_for_static_id(outer, "l"), Some("cmp$l"));
        assert_eq!(scopes.prefixed_id_for_static_id(inner, "o"), None);
    }

    #[test]
    fn test_compact_tree_drops_foreign_markup() {
        let (compact, scopes, inner, _) = run(
            r#"<div id="d"><xf:input id="i"><xf:label>A <b id="bold">B</b></xf:label></xf:input><span/></div>"#,
        );
        let compact = compact.unwrap();
        let names: Vec<String> = compact
            .descendants_or_self()
            .iter()
            .map(|e| e.name.local.clone())
            .collect();
        assert_eq!(names, vec!["template", "input", "label", "b"]);
        assert_eq!(scopes.prefixed_id_for_static_id(inner, "d"), None);
        assert_eq!(scopes.prefixed_id_for_static_id(inner, "bold"), Some("cmp$bold"));
    }

    #[test]
    fn test_lhha_markup_ids_are_declared_but_instance_data_is_not() {
        let (compact, scopes, inner, _) = run(
            r#"<xf:input><xf:label><b id="bold"/></xf:label></xf:input><xf:instance id="inst"><data id="d"/></xf:instance>"#,
        );
        compact.unwrap();
        assert_eq!(scopes.prefixed_id_for_static_id(inner, "bold"), Some("cmp$bold"));
        assert_eq!(scopes.prefixed_id_for_static_id(inner, "inst"), Some("cmp$inst"));
        assert_eq!(scopes.prefixed_id_for_static_id(inner, "d"), None);
    }

    #[test]
    fn test_duplicate_static_id_fails() {
        let (compact, _, _, _) = run(r#"<xf:input id="x"/><xf:output id="x"/>"#);
        let err = compact.unwrap_err();
        assert_eq!(err.code, INV_DUPLICATE_STATIC_ID);
        assert_eq!(err.kind, ErrorKind::DuplicateId);
    }

    #[test]
    fn test_top_level_output_is_wrapped() {
        let mut metadata = Metadata::new();
        let doc = parse_element(&format!(
            r#"<html {}><body><xf:input id="a"/><p>text</p></body></html>"#,
            NS
        ))
        .unwrap();
        let annotated = annotate_tree(&doc, "", false, false, &mut metadata).unwrap();
        let mut scopes = ScopeTree::new();
        let top = scopes.top_level();
        let target = ExtractionTarget {
            prefix: "",
            inner: top,
            outer: top,
            keep_root: false,
            start: ScopeMarker::Inner,
        };
        let compact = extract(
            &annotated.tree,
            &target,
            &mut scopes,
            &metadata,
            &RegistrySnapshot::default(),
        )
        .unwrap();
        assert_eq!(compact.name.local, "static-state");
        assert_eq!(compact.child_elements().count(), 1);
        assert_eq!(scopes.prefixed_id_for_static_id(top, "a"), Some("a"));
    }
}
