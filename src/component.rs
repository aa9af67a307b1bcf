//! Shadow Tree Generator
//!
//! Expands one bound element against its binding: optional transform, content
//! projection into `xbl:content` placeholders, `xbl:attr`/`xxbl:attr`
//! forwarding, then annotation with the component prefix.

use tracing::debug;

use crate::annotate::{annotate_tree, EventBuffer, Metadata};
use crate::extract::{scope_attribute_name, ScopeMarker};
use crate::registry::AbstractBinding;
use crate::selector::css_to_path;
use crate::transform::{apply_pipeline_transform, TransformRegistry};
use crate::tree::{ns, Element, NamespaceMapping, Node, QName};
use crate::validate::CompilerError;
use crate::visitor::{walk_children, walk_element, ElementVisitor};
use crate::xpath::{PathEvaluator, PathItem};

fn xbl_attr_name() -> QName {
    QName::new(ns::XBL, "attr")
}

fn xxbl_attr_name() -> QName {
    QName::new(ns::XXBL, "attr")
}

fn xbl_text_name() -> QName {
    QName::new(ns::XBL, "text")
}

/// Direct children of the bound element that projection leaves alone: event
/// handlers and label/help/hint/alert.
pub fn is_reserved_for_extraction(element: &Element) -> bool {
    let name = &element.name;
    element
        .attribute(&QName::new(ns::XML_EVENTS, "event"))
        .is_some()
        || *name == QName::new(ns::XBL, "handler")
        || (name.is_in(ns::XFORMS)
            && matches!(name.local.as_str(), "label" | "help" | "hint" | "alert"))
}

// ═══════════════════════════════════════════════════════════════════════════════
// ATTRIBUTE FORWARDING
// ═══════════════════════════════════════════════════════════════════════════════

/// The forwarding rules carried by one element.
#[derive(Debug, Clone, Default)]
pub struct ForwardingRules {
    shorthand: Option<String>,
    path: Option<String>,
    namespaces: NamespaceMapping,
}

impl ForwardingRules {
    /// Reads the rules of a placeholder, which is discarded anyway.
    pub fn read(element: &Element) -> Self {
        Self::from_parts(
            element.attribute(&xbl_attr_name()).map(str::to_string),
            element.attribute(&xxbl_attr_name()).map(str::to_string),
            element,
        )
    }

    /// Removes the rules from a template element.
    pub fn take(element: &mut Element) -> Self {
        let shorthand = element.remove_attribute(&xbl_attr_name());
        let path = element.remove_attribute(&xxbl_attr_name());
        Self::from_parts(shorthand, path, element)
    }

    /// `xbl:attr` takes precedence: `xxbl:attr` only applies on its own.
    fn from_parts(shorthand: Option<String>, path: Option<String>, element: &Element) -> Self {
        if shorthand.is_some() && path.is_some() {
            debug!("Both xbl:attr and xxbl:attr present, xxbl:attr ignored");
        }
        ForwardingRules {
            path: if shorthand.is_some() { None } else { path },
            shorthand,
            namespaces: element.namespaces.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.shorthand.is_none() && self.path.is_none()
    }

    pub fn apply(
        &self,
        target: &mut Element,
        bound: &Element,
        evaluator: &dyn PathEvaluator,
    ) -> Result<(), CompilerError> {
        if let Some(shorthand) = &self.shorthand {
            for token in shorthand.split_whitespace() {
                self.apply_token(token, target, bound);
            }
        }

        if let Some(path) = &self.path {
            for item in evaluator.evaluate(bound, path, &self.namespaces)? {
                match item {
                    PathItem::Attribute { owner, attribute } => {
                        target.set_attribute(attribute.name.clone(), &attribute.value);
                        target.namespaces.copy_missing(&owner.namespaces);
                    }
                    _ => debug!(path = %path, "xxbl:attr result is not an attribute, ignored"),
                }
            }
        }
        Ok(())
    }

    fn apply_token(&self, token: &str, target: &mut Element, bound: &Element) {
        let text = xbl_text_name();
        let resolve = |lexical: &str| {
            let name = self.namespaces.resolve_qname(lexical);
            if name.is_none() {
                debug!(token = lexical, "Unresolvable name in xbl:attr, rule skipped");
            }
            name
        };

        match token.split_once('=') {
            None => {
                let Some(name) = resolve(token) else { return };
                // xbl:text alone has no meaning
                if name == text {
                    return;
                }
                if let Some(value) = bound.attribute(&name) {
                    let value = value.to_string();
                    target.set_attribute(name, &value);
                    target.namespaces.copy_missing(&bound.namespaces);
                }
            }
            Some((left, right)) => {
                let (Some(left), Some(right)) = (resolve(left), resolve(right)) else {
                    return;
                };
                let value = if right == text {
                    Some(bound.text())
                } else {
                    bound.attribute(&right).map(str::to_string)
                };
                let Some(value) = value else { return };

                if left == text {
                    target.set_text(&value);
                } else {
                    target.set_attribute(left, &value);
                    target.namespaces.copy_missing(&bound.namespaces);
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTENT PROJECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Rewrites a template in place: forwards attributes on every template element
/// and replaces every `xbl:content` placeholder with projected content.
struct TemplateExpander<'a> {
    bound: &'a Element,
    evaluator: &'a dyn PathEvaluator,
    error: Option<CompilerError>,
}

impl TemplateExpander<'_> {
    fn fail(&mut self, err: CompilerError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    /// Content the placeholder stands for, and whether it came from the bound
    /// element (as opposed to the placeholder's default content). Either way
    /// the copied nodes land in the outer scope unless the placeholder says
    /// otherwise.
    fn project(&self, placeholder: &Element) -> Result<(Vec<Node>, bool), CompilerError> {
        let Some(includes) = placeholder.attr("includes") else {
            let content = self
                .bound
                .children
                .iter()
                .filter(|n| !matches!(n, Node::Element(e) if is_reserved_for_extraction(e)))
                .cloned()
                .collect();
            return Ok((content, true));
        };

        let path = css_to_path(includes);
        let items = if path.is_empty() {
            vec![]
        } else {
            self.evaluator
                .evaluate(self.bound, &path, &placeholder.namespaces)?
        };

        let selected: Vec<Node> = items
            .into_iter()
            .filter_map(|item| match item {
                PathItem::Element { element, depth } => {
                    if depth == 1 && is_reserved_for_extraction(element) {
                        None
                    } else {
                        Some(Node::Element(element.clone()))
                    }
                }
                PathItem::Text { text, .. } => Some(Node::Text(text.clone())),
                PathItem::Attribute { .. } => None,
            })
            .collect();

        if !selected.is_empty() {
            return Ok((selected, true));
        }

        debug!(includes, "No content matched, using default content");
        let fallback = placeholder
            .child_elements()
            .cloned()
            .map(Node::Element)
            .collect();
        Ok((fallback, false))
    }

    fn replace_placeholder(&mut self, placeholder: &Element) -> Result<Vec<Node>, CompilerError> {
        let (mut nodes, from_bound) = self.project(placeholder)?;
        let rules = ForwardingRules::read(placeholder);
        let author_scope = placeholder
            .attribute(&scope_attribute_name())
            .and_then(ScopeMarker::parse);

        for node in nodes.iter_mut() {
            let Node::Element(element) = node else { continue };

            if !from_bound {
                // Default content belongs to the template
                self.visit_element(element);
            }

            let marker = author_scope.unwrap_or(ScopeMarker::Outer);
            element.set_attribute(scope_attribute_name(), marker.as_str());
            if element.namespaces.get("xxbl").is_none() {
                element.namespaces.declare("xxbl", ns::XXBL);
            }

            rules.apply(element, self.bound, self.evaluator)?;
        }
        Ok(nodes)
    }
}

impl ElementVisitor for TemplateExpander<'_> {
    fn visit_element(&mut self, element: &mut Element) {
        let rules = ForwardingRules::take(element);
        if !rules.is_empty() {
            if let Err(err) = rules.apply(element, self.bound, self.evaluator) {
                self.fail(err);
            }
        }
        walk_element(self, element);
    }

    fn visit_children(&mut self, children: &mut Vec<Node>) {
        let placeholder = QName::new(ns::XBL, "content");
        if !children
            .iter()
            .any(|n| matches!(n, Node::Element(e) if e.name == placeholder))
        {
            walk_children(self, children);
            return;
        }

        let mut resolved = Vec::with_capacity(children.len());
        for node in std::mem::take(children) {
            match node {
                Node::Element(e) if e.name == placeholder => match self.replace_placeholder(&e) {
                    Ok(nodes) => resolved.extend(nodes),
                    Err(err) => self.fail(err),
                },
                Node::Element(mut e) => {
                    self.visit_element(&mut e);
                    resolved.push(Node::Element(e));
                }
                other => resolved.push(other),
            }
        }
        *children = resolved;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GENERATOR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct ShadowTree {
    /// Rooted at the template element.
    pub full: Element,
    pub replay: Option<EventBuffer>,
}

pub struct ShadowTreeGenerator<'a> {
    pub evaluator: &'a dyn PathEvaluator,
    pub transforms: &'a dyn TransformRegistry,
    /// Whether full-update templates are annotated through an event buffer.
    pub use_event_buffer: bool,
}

impl ShadowTreeGenerator<'_> {
    /// Step 1: the template to expand, after the optional transform. None when
    /// the binding has no template.
    pub fn prepare(
        &self,
        bound: &Element,
        binding: &AbstractBinding,
    ) -> Result<Option<Element>, CompilerError> {
        let Some(template) = &binding.template else {
            return Ok(None);
        };
        apply_pipeline_transform(template, binding.transform.as_ref(), bound, self.transforms)
            .map(Some)
    }

    /// Steps 2 and 3: projection and forwarding.
    pub fn expand(&self, mut template: Element, bound: &Element) -> Result<Element, CompilerError> {
        let mut expander = TemplateExpander {
            bound,
            evaluator: self.evaluator,
            error: None,
        };
        expander.visit_element(&mut template);
        match expander.error {
            Some(err) => Err(err),
            None => Ok(template),
        }
    }

    /// Full generation. `discover` sees the prepared template before expansion,
    /// which is where late binding includes are resolved.
    pub fn generate_with(
        &self,
        bound: &Element,
        binding: &AbstractBinding,
        prefix: &str,
        metadata: &mut Metadata,
        discover: &mut dyn FnMut(&Element) -> Result<(), CompilerError>,
    ) -> Result<Option<ShadowTree>, CompilerError> {
        let Some(template) = self.prepare(bound, binding)? else {
            return Ok(None);
        };
        discover(&template)?;
        let expanded = self.expand(template, bound)?;
        let annotated = annotate_tree(&expanded, prefix, true, self.use_event_buffer, metadata)?;
        Ok(Some(ShadowTree {
            full: annotated.tree,
            replay: annotated.replay,
        }))
    }

    pub fn generate(
        &self,
        bound: &Element,
        binding: &AbstractBinding,
        prefix: &str,
        metadata: &mut Metadata,
    ) -> Result<Option<ShadowTree>, CompilerError> {
        self.generate_with(bound, binding, prefix, metadata, &mut |_| Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_element;
    use crate::transform::TransformTable;
    use crate::xpath::SimplePathEvaluator;

    const NS: &str = r#"xmlns:xbl="http://www.w3.org/ns/xbl" xmlns:xxbl="http://orbeon.org/oxf/xml/xbl" xmlns:xf="http://www.w3.org/2002/xforms" xmlns:fr="urn:fr""#;

    fn expand(template_body: &str, bound: &str) -> Element {
        let template =
            parse_element(&format!(r#"<xbl:template {}>{}</xbl:template>"#, NS, template_body))
                .unwrap();
        let bound = parse_element(bound).unwrap();
        let table = TransformTable::new();
        let generator = ShadowTreeGenerator {
            evaluator: &SimplePathEvaluator,
            transforms: &table,
            use_event_buffer: true,
        };
        generator.expand(template, &bound).unwrap()
    }

    fn bound(body: &str, attrs: &str) -> String {
        format!(r#"<fr:foo {} {}>{}</fr:foo>"#, NS, attrs, body)
    }

    #[test]
    fn test_placeholder_without_selector_skips_handlers_and_lhha() {
        let out = expand(
            "<div><xbl:content/></div>",
            &bound(
                r#"<xf:label>L</xf:label><a/><xf:action xmlns:ev="http://www.w3.org/2001/xml-events" ev:event="DOMActivate"/><b/>"#,
                "",
            ),
        );
        let div = out.child_elements().next().unwrap();
        let names: Vec<&str> = div.child_elements().map(|e| e.name.local.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(div
            .child_elements()
            .all(|e| e.attribute(&scope_attribute_name()) == Some("outer")));
    }

    #[test]
    fn test_selector_results_and_author_scope() {
        let out = expand(
            r#"<xbl:content includes="xf|item" xxbl:scope="inner"/>"#,
            &bound("<xf:item id='1'/><group><xf:item id='2'/></group>", ""),
        );
        let ids: Vec<&str> = out.child_elements().filter_map(|e| e.id()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(out
            .child_elements()
            .all(|e| e.attribute(&scope_attribute_name()) == Some("inner")));
    }

    #[test]
    fn test_selector_list_projects_in_document_order() {
        let out = expand(
            r#"<xbl:content includes="fr|a, fr|b"/>"#,
            &bound(r#"<fr:b id="1"/><fr:a id="2"/>"#, ""),
        );
        let ids: Vec<&str> = out.child_elements().filter_map(|e| e.id()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_empty_selection_falls_back_to_default_content() {
        let out = expand(
            r#"<xbl:content includes="xf|item"><d xbl:attr="class"/><e/></xbl:content>"#,
            &bound("<other/>", r#"class="c""#),
        );
        let children: Vec<&Element> = out.child_elements().collect();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].name.local, "d");
        assert_eq!(children[0].attr("class"), Some("c"));
        assert_eq!(children[0].attribute(&xbl_attr_name()), None);
        assert_eq!(children[1].name.local, "e");
        assert!(children
            .iter()
            .all(|e| e.attribute(&scope_attribute_name()) == Some("outer")));
    }

    #[test]
    fn test_shorthand_forwarding_wins_over_path_forwarding() {
        let out = expand(
            r#"<span xbl:attr="class" xxbl:attr="@title"/>"#,
            &bound("", r#"class="c" title="t""#),
        );
        let span = out.child_elements().next().unwrap();
        assert_eq!(span.attr("class"), Some("c"));
        assert_eq!(span.attr("title"), None);
        assert_eq!(span.attribute(&xxbl_attr_name()), None);
    }

    #[test]
    fn test_shorthand_forwarding() {
        let out = expand(
            r#"<span xbl:attr="foo=bar class missing xbl:text=label"/><b xbl:attr="title=xbl:text"/>"#,
            &bound("hello", r#"bar="7" class="c" label="Label""#),
        );
        let span = out.child_elements().next().unwrap();
        assert_eq!(span.attr("foo"), Some("7"));
        assert_eq!(span.attr("class"), Some("c"));
        assert_eq!(span.attr("missing"), None);
        assert_eq!(span.text(), "Label");
        let b = out.child_elements().nth(1).unwrap();
        assert_eq!(b.attr("title"), Some("hello"));
    }

    #[test]
    fn test_forwarding_skips_absent_source() {
        let out = expand(r#"<span xbl:attr="foo=bar"/>"#, &bound("", ""));
        let span = out.child_elements().next().unwrap();
        assert!(span.attributes.is_empty());
    }

    #[test]
    fn test_path_forwarding_copies_namespaces() {
        let out = expand(
            r#"<xf:input xxbl:attr="@ref|@fr:appearance"/>"#,
            &bound("", r#"ref="a:b" fr:appearance="x" xmlns:a="urn:a""#),
        );
        let input = out.child_elements().next().unwrap();
        assert_eq!(input.attr("ref"), Some("a:b"));
        assert_eq!(input.attribute(&QName::new("urn:fr", "appearance")), Some("x"));
        assert_eq!(input.namespaces.get("a"), Some("urn:a"));
    }

    #[test]
    fn test_placeholder_forwarding_applies_to_projected_content() {
        let out = expand(
            r#"<xbl:content xbl:attr="class"/>"#,
            &bound("<a/>", r#"class="c""#),
        );
        let a = out.child_elements().next().unwrap();
        assert_eq!(a.attr("class"), Some("c"));
    }

    #[test]
    fn test_binding_without_template_generates_nothing() {
        let binding_doc = parse_element(&format!(
            r#"<xbl:xbl {}><xbl:binding element="fr|foo"/></xbl:xbl>"#,
            NS
        ))
        .unwrap();
        let binding = crate::registry::bindings_from_xbl(&binding_doc, None).remove(0);
        let table = TransformTable::new();
        let generator = ShadowTreeGenerator {
            evaluator: &SimplePathEvaluator,
            transforms: &table,
            use_event_buffer: false,
        };
        let bound = parse_element(&bound("", "")).unwrap();
        let out = generator
            .generate(&bound, &binding, "foo$", &mut Metadata::new())
            .unwrap();
        assert!(out.is_none());
    }
}
