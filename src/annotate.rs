//! Annotation
//!
//! Gives every element of a tree a static id and records the namespace mapping
//! of each annotated element under its prefixed id. Trees are streamed as
//! `XmlEvent`s; when a template contains `xxforms:update="full"` the stream is
//! captured in an `EventBuffer` first, so the annotated form can be replayed
//! later, as a whole or from any full-update element.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::ids::IdGenerator;
use crate::tree::{ns, Attribute, CommentNode, Element, NamespaceMapping, Node, QName, TextNode};
use crate::validate::CompilerError;

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT STREAM
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum XmlEvent {
    StartElement {
        name: QName,
        attributes: Vec<Attribute>,
        namespaces: NamespaceMapping,
    },
    EndElement {
        name: QName,
    },
    Text {
        value: String,
    },
    Comment {
        value: String,
    },
}

pub trait XmlReceiver {
    fn receive(&mut self, event: XmlEvent) -> Result<(), CompilerError>;
}

/// Streams a tree in document order.
pub fn emit(element: &Element, receiver: &mut dyn XmlReceiver) -> Result<(), CompilerError> {
    receiver.receive(XmlEvent::StartElement {
        name: element.name.clone(),
        attributes: element.attributes.clone(),
        namespaces: element.namespaces.clone(),
    })?;
    for child in &element.children {
        emit_node(child, receiver)?;
    }
    receiver.receive(XmlEvent::EndElement {
        name: element.name.clone(),
    })
}

fn emit_node(node: &Node, receiver: &mut dyn XmlReceiver) -> Result<(), CompilerError> {
    match node {
        Node::Element(e) => emit(e, receiver),
        Node::Text(t) => receiver.receive(XmlEvent::Text {
            value: t.value.clone(),
        }),
        Node::Comment(c) => receiver.receive(XmlEvent::Comment {
            value: c.value.clone(),
        }),
    }
}

/// Rebuilds a tree from an event stream.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    open: Vec<Element>,
    root: Option<Element>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The completed root, once the outermost element has ended.
    pub fn finish(self) -> Option<Element> {
        self.root
    }
}

impl XmlReceiver for TreeBuilder {
    fn receive(&mut self, event: XmlEvent) -> Result<(), CompilerError> {
        match event {
            XmlEvent::StartElement {
                name,
                attributes,
                namespaces,
            } => self.open.push(Element {
                name,
                attributes,
                namespaces,
                children: Vec::new(),
            }),
            XmlEvent::EndElement { .. } => {
                if let Some(done) = self.open.pop() {
                    match self.open.last_mut() {
                        Some(parent) => parent.children.push(Node::Element(done)),
                        None => self.root = Some(done),
                    }
                }
            }
            XmlEvent::Text { value } => {
                if let Some(parent) = self.open.last_mut() {
                    parent.children.push(Node::Text(TextNode { value }));
                }
            }
            XmlEvent::Comment { value } => {
                if let Some(parent) = self.open.last_mut() {
                    parent.children.push(Node::Comment(CommentNode { value }));
                }
            }
        }
        Ok(())
    }
}

/// Recorded event stream with replay marks on full-update elements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBuffer {
    prefix: String,
    events: Vec<XmlEvent>,
    /// Prefixed id -> index of the element's start event.
    marks: IndexMap<String, usize>,
}

impl EventBuffer {
    /// `prefix` turns the static ids of marked elements into prefixed ids.
    pub fn new(prefix: &str) -> Self {
        EventBuffer {
            prefix: prefix.to_string(),
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[XmlEvent] {
        &self.events
    }

    pub fn marks(&self) -> impl Iterator<Item = &str> {
        self.marks.keys().map(String::as_str)
    }

    pub fn replay(&self, receiver: &mut dyn XmlReceiver) -> Result<(), CompilerError> {
        for event in &self.events {
            receiver.receive(event.clone())?;
        }
        Ok(())
    }

    /// Replays the subtree of one marked element. Returns false when nothing
    /// is marked under `prefixed_id`.
    pub fn replay_mark(
        &self,
        prefixed_id: &str,
        receiver: &mut dyn XmlReceiver,
    ) -> Result<bool, CompilerError> {
        let Some(&start) = self.marks.get(prefixed_id) else {
            return Ok(false);
        };
        let mut depth = 0usize;
        for event in &self.events[start..] {
            match event {
                XmlEvent::StartElement { .. } => depth += 1,
                XmlEvent::EndElement { .. } => depth = depth.saturating_sub(1),
                _ => {}
            }
            receiver.receive(event.clone())?;
            if depth == 0 {
                break;
            }
        }
        Ok(true)
    }
}

impl XmlReceiver for EventBuffer {
    fn receive(&mut self, event: XmlEvent) -> Result<(), CompilerError> {
        if let XmlEvent::StartElement { attributes, .. } = &event {
            let full = attributes
                .iter()
                .any(|a| a.name == full_update_name() && a.value == "full");
            let id = attributes
                .iter()
                .find(|a| a.name == QName::local("id"))
                .map(|a| a.value.clone());
            if let (true, Some(id)) = (full, id) {
                self.marks
                    .insert(format!("{}{}", self.prefix, id), self.events.len());
            }
        }
        self.events.push(event);
        Ok(())
    }
}

fn full_update_name() -> QName {
    QName::new(ns::XXFORMS, "update")
}

/// Whether any element of the tree asks for full-update semantics.
pub fn has_full_update(element: &Element) -> bool {
    let name = full_update_name();
    element
        .descendants_or_self()
        .iter()
        .any(|e| e.attribute(&name) == Some("full"))
}

// ═══════════════════════════════════════════════════════════════════════════════
// METADATA
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-document annotation state.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    namespaces: IndexMap<String, NamespaceMapping>,
    full_update_ids: IndexSet<String>,
    pub ids: IdGenerator,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace_mapping(&self, prefixed_id: &str) -> Option<&NamespaceMapping> {
        self.namespaces.get(prefixed_id)
    }

    pub fn is_annotated(&self, prefixed_id: &str) -> bool {
        self.namespaces.contains_key(prefixed_id)
    }

    pub fn annotated_ids(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    pub fn full_update_ids(&self) -> impl Iterator<Item = &str> {
        self.full_update_ids.iter().map(String::as_str)
    }

    fn record(&mut self, prefixed_id: String, namespaces: NamespaceMapping) {
        self.namespaces.insert(prefixed_id, namespaces);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ANNOTATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Elements whose content is data rather than markup; their descendants keep
/// whatever ids they have and are not recorded.
pub(crate) fn is_data_region(name: &QName) -> bool {
    *name == QName::new(ns::XFORMS, "instance")
        || *name == QName::new(ns::XSD, "schema")
        || *name == QName::new(ns::XBL, "xbl")
}

#[derive(Debug, Clone)]
pub struct Annotated {
    pub tree: Element,
    /// Present when the tree went through an event buffer.
    pub replay: Option<EventBuffer>,
}

struct Annotator<'m> {
    prefix: &'m str,
    keep_root: bool,
    metadata: &'m mut Metadata,
}

impl Annotator<'_> {
    fn annotate(
        &mut self,
        element: &Element,
        is_root: bool,
        in_data: bool,
        receiver: &mut dyn XmlReceiver,
    ) -> Result<(), CompilerError> {
        let mut attributes = element.attributes.clone();

        if !(in_data || (is_root && self.keep_root)) {
            let static_id = match element.id() {
                Some(id) => id.to_string(),
                None => {
                    let id = self.metadata.ids.next_id();
                    attributes.push(Attribute {
                        name: QName::local("id"),
                        value: id.clone(),
                    });
                    id
                }
            };
            let prefixed_id = format!("{}{}", self.prefix, static_id);
            if element.attribute(&full_update_name()) == Some("full") {
                self.metadata.full_update_ids.insert(prefixed_id.clone());
            }
            self.metadata
                .record(prefixed_id, element.namespaces.clone());
        }

        receiver.receive(XmlEvent::StartElement {
            name: element.name.clone(),
            attributes,
            namespaces: element.namespaces.clone(),
        })?;

        let child_in_data = in_data || is_data_region(&element.name);
        for child in &element.children {
            match child {
                Node::Element(e) => self.annotate(e, false, child_in_data, receiver)?,
                other => emit_node(other, receiver)?,
            }
        }

        receiver.receive(XmlEvent::EndElement {
            name: element.name.clone(),
        })
    }
}

/// Annotates `tree` with the ids of one component instance (or of the host
/// document when `prefix` is empty).
///
/// Ids already present anywhere in the tree are reserved before new ones are
/// generated. With `keep_root`, the root element (the shadow tree's template
/// element) is passed through without an id.
pub fn annotate_tree(
    tree: &Element,
    prefix: &str,
    keep_root: bool,
    use_event_buffer: bool,
    metadata: &mut Metadata,
) -> Result<Annotated, CompilerError> {
    for element in tree.descendants_or_self() {
        if let Some(id) = element.id() {
            metadata.ids.reserve(id);
        }
    }

    let mut annotator = Annotator {
        prefix,
        keep_root,
        metadata,
    };
    let mut builder = TreeBuilder::new();

    let replay = if use_event_buffer && has_full_update(tree) {
        let mut buffer = EventBuffer::new(prefix);
        annotator.annotate(tree, true, false, &mut buffer)?;
        buffer.replay(&mut builder)?;
        Some(buffer)
    } else {
        annotator.annotate(tree, true, false, &mut builder)?;
        None
    };

    let tree = builder.finish().unwrap_or_else(|| tree.clone());
    Ok(Annotated { tree, replay })
}
