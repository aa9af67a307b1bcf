//! Template Transform Module
//!
//! The optional `xxbl:transform` step that runs before expansion. Processors are
//! opaque to the crate: they get the template and the bound element and return
//! a node list, which must hold exactly one root element.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::tree::{ns, Element, Node, QName};
use crate::validate::{
    single_root_element, validate_transform_input, validate_transform_output, CompilerError,
    INV_TRANSFORM_PROCESSOR_MISSING,
};

pub trait TemplateTransform: Send + Sync {
    fn transform(&self, template: &Element, bound: &Element) -> Result<Vec<Node>, CompilerError>;
}

impl<F> TemplateTransform for F
where
    F: Fn(&Element, &Element) -> Result<Vec<Node>, CompilerError> + Send + Sync,
{
    fn transform(&self, template: &Element, bound: &Element) -> Result<Vec<Node>, CompilerError> {
        self(template, bound)
    }
}

/// Resolves `xxbl:transform` names to processors.
pub trait TransformRegistry: Send + Sync {
    fn lookup(&self, name: &QName) -> Option<Arc<dyn TemplateTransform>>;
}

/// Registry without processors.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTransforms;

impl TransformRegistry for NoTransforms {
    fn lookup(&self, _name: &QName) -> Option<Arc<dyn TemplateTransform>> {
        None
    }
}

/// Map-backed registry.
#[derive(Default, Clone)]
pub struct TransformTable {
    processors: HashMap<QName, Arc<dyn TemplateTransform>>,
}

impl TransformTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: QName, processor: impl TemplateTransform + 'static) {
        self.processors.insert(name, Arc::new(processor));
    }

    pub fn with(mut self, name: QName, processor: impl TemplateTransform + 'static) -> Self {
        self.insert(name, processor);
        self
    }
}

impl TransformRegistry for TransformTable {
    fn lookup(&self, name: &QName) -> Option<Arc<dyn TemplateTransform>> {
        self.processors.get(name).cloned()
    }
}

/// Produces the template that expansion works on.
///
/// Without a transform this is a deep copy, so the registered binding is never
/// mutated. With one, the processor output root is wrapped in a fresh
/// `xbl:template` carrying the original template's namespaces.
pub fn apply_pipeline_transform(
    template: &Element,
    transform: Option<&QName>,
    bound: &Element,
    registry: &dyn TransformRegistry,
) -> Result<Element, CompilerError> {
    let Some(name) = transform else {
        return Ok(template.clone());
    };

    let processor = registry.lookup(name).ok_or_else(|| {
        CompilerError::with_details(
            INV_TRANSFORM_PROCESSOR_MISSING,
            &format!(
                "Cannot find a processor for xxbl:transform='{}'.",
                name.qualified()
            ),
            None,
            vec![format!("Register a processor for {}.", name.expanded())],
        )
    })?;

    if let Some(err) = validate_transform_input(template) {
        return Err(err);
    }

    debug!(transform = %name.qualified(), "Applying template transform");
    let output = processor.transform(template, bound)?;
    if let Some(err) = validate_transform_output(&output, name) {
        return Err(err);
    }

    let mut wrapped = Element::new(QName::new(ns::XBL, "template").with_prefix("xbl"));
    wrapped.namespaces = template.namespaces.clone();
    if let Some(root) = single_root_element(&output) {
        wrapped.children.push(Node::Element(root.clone()));
    }
    Ok(wrapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_element;
    use crate::validate::{ErrorKind, INV_TRANSFORM_SINGLE_ROOT};

    fn template() -> Element {
        parse_element(
            r#"<xbl:template xmlns:xbl="http://www.w3.org/ns/xbl" xmlns:xxbl="http://orbeon.org/oxf/xml/xbl" xxbl:transform="xxbl:upper"><div/></xbl:template>"#,
        )
        .unwrap()
    }

    fn upper() -> QName {
        QName::new(ns::XXBL, "upper")
    }

    #[test]
    fn test_no_transform_copies_template() {
        let t = template();
        let bound = Element::new(QName::local("x"));
        let out = apply_pipeline_transform(&t, None, &bound, &TransformTable::new()).unwrap();
        assert_eq!(out, t);
    }

    #[test]
    fn test_missing_processor_is_configuration_error() {
        let t = template();
        let bound = Element::new(QName::local("x"));
        let err = apply_pipeline_transform(&t, Some(&upper()), &bound, &TransformTable::new())
            .unwrap_err();
        assert_eq!(err.code, INV_TRANSFORM_PROCESSOR_MISSING);
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(err.message.starts_with("Cannot find a processor for xxbl:transform="));
    }

    #[test]
    fn test_output_root_is_wrapped() {
        let table = TransformTable::new().with(upper(), |_t: &Element, bound: &Element| -> Result<Vec<Node>, CompilerError> {
            Ok(vec![Node::Element(
                Element::new(QName::local("span")).with_attr("for", bound.id().unwrap_or("")),
            )])
        });
        let bound = Element::new(QName::local("x")).with_attr("id", "b1");
        let out = apply_pipeline_transform(&template(), Some(&upper()), &bound, &table).unwrap();
        assert_eq!(out.name, QName::new(ns::XBL, "template"));
        let span = out.child_elements().next().unwrap();
        assert_eq!(span.attr("for"), Some("b1"));
    }

    #[test]
    fn test_two_roots_are_rejected() {
        let table = TransformTable::new().with(upper(), |_t: &Element, _b: &Element| -> Result<Vec<Node>, CompilerError> {
            Ok(vec![
                Node::Element(Element::new(QName::local("a"))),
                Node::Element(Element::new(QName::local("b"))),
            ])
        });
        let bound = Element::new(QName::local("x"));
        let err = apply_pipeline_transform(&template(), Some(&upper()), &bound, &table).unwrap_err();
        assert_eq!(err.code, INV_TRANSFORM_SINGLE_ROOT);
    }
}
