//! Binding Registry
//!
//! Turns `xbl:xbl` declaration documents into immutable `AbstractBinding`
//! records keyed by the element name they bind. The registry is shared across
//! analysis sessions: readers take an `Arc` snapshot, writers build a new
//! snapshot and swap it in under the write lock, so a reader never sees half of
//! a registration.

use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::cache::SourceCache;
use crate::config::{AnalysisOptions, DuplicatePolicy};
use crate::parse::parse_document;
use crate::tree::{ns, Document, Element, QName};
use crate::validate::{is_binding_document, CompilerError, INV_DUPLICATE_BINDING};

// ═══════════════════════════════════════════════════════════════════════════════
// ABSTRACT BINDING
// ═══════════════════════════════════════════════════════════════════════════════

/// A style or script attached to a binding, either by reference or inline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingResource {
    pub src: Option<String>,
    pub inline: Option<String>,
}

impl BindingResource {
    fn from_element(element: &Element) -> Option<Self> {
        let src = element.attr("src").map(str::to_string);
        let text = element.text();
        let inline = Some(text.trim().to_string()).filter(|t| !t.is_empty());
        if src.is_none() && inline.is_none() {
            return None;
        }
        Some(BindingResource { src, inline })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbstractBinding {
    /// Element name this binding matches.
    pub element_name: QName,
    pub binding_id: String,
    pub template: Option<Element>,
    /// Processor named by `xxbl:transform` on the template.
    pub transform: Option<QName>,
    pub styles: Vec<BindingResource>,
    pub scripts: Vec<BindingResource>,
    pub handlers: Vec<Element>,
    /// `xforms:model` elements under `xbl:implementation`.
    pub implementations: Vec<Element>,
    pub global: Option<Element>,
    pub container_element_name: String,
    pub source_uri: Option<String>,
}

fn xbl(local: &str) -> QName {
    QName::new(ns::XBL, local)
}

impl AbstractBinding {
    /// Builds the record for one `xbl:binding` element. None when the binding
    /// has no usable `element` attribute.
    pub fn from_element(
        binding: &Element,
        scripts: &[BindingResource],
        source_uri: Option<&str>,
    ) -> Option<Self> {
        let pattern = binding.attr("element")?;
        let element_name = match binding.namespaces.resolve_qname(&pattern.replace('|', ":")) {
            Some(name) => name,
            None => {
                warn!(element = pattern, uri = ?source_uri, "Skipping binding with unresolvable element name");
                return None;
            }
        };

        let binding_id = binding
            .id()
            .map(str::to_string)
            .unwrap_or_else(|| generated_binding_id(&element_name));

        let template = binding.first_child_named(&xbl("template")).cloned();
        let transform = template.as_ref().and_then(|t| {
            t.attribute(&QName::new(ns::XXBL, "transform"))
                .and_then(|value| t.namespaces.resolve_qname(value))
        });

        let styles = binding
            .children_named(&xbl("resources"))
            .flat_map(|resources| resources.children_named(&xbl("style")).collect::<Vec<_>>())
            .filter_map(BindingResource::from_element)
            .collect();

        let handlers = binding
            .children_named(&xbl("handlers"))
            .flat_map(|h| h.children_named(&xbl("handler")).cloned().collect::<Vec<_>>())
            .collect();

        let model = QName::new(ns::XFORMS, "model");
        let implementations = binding
            .children_named(&xbl("implementation"))
            .flat_map(|i| i.children_named(&model).cloned().collect::<Vec<_>>())
            .collect();

        let global = binding
            .first_child_named(&QName::new(ns::XXBL, "global"))
            .cloned();

        let container_element_name = binding
            .attribute(&QName::new(ns::XXBL, "container"))
            .unwrap_or("div")
            .to_string();

        Some(AbstractBinding {
            element_name,
            binding_id,
            template,
            transform,
            styles,
            scripts: scripts.to_vec(),
            handlers,
            implementations,
            global,
            container_element_name,
            source_uri: source_uri.map(str::to_string),
        })
    }
}

/// Stable id for bindings that do not declare one: `fr:tabview` -> `xbl-fr-tabview`.
fn generated_binding_id(name: &QName) -> String {
    let mut id = String::from("xbl-");
    if !name.prefix.is_empty() {
        id.push_str(&name.prefix);
        id.push('-');
    }
    id.push_str(&name.local);
    id
}

/// All bindings declared by an `xbl:xbl` element, in document order.
pub fn bindings_from_xbl(xbl_element: &Element, source_uri: Option<&str>) -> Vec<AbstractBinding> {
    let scripts: Vec<BindingResource> = xbl_element
        .children_named(&xbl("script"))
        .filter_map(BindingResource::from_element)
        .collect();

    xbl_element
        .children_named(&xbl("binding"))
        .filter_map(|b| AbstractBinding::from_element(b, &scripts, source_uri))
        .collect()
}

/// Bindings of a whole document: the root when it is `xbl:xbl`, otherwise every
/// inline `xbl:xbl` element.
pub fn bindings_from_document(doc: &Document) -> Vec<AbstractBinding> {
    let uri = doc.uri.as_deref();
    if is_binding_document(&doc.root) {
        return bindings_from_xbl(&doc.root, uri);
    }
    doc.root
        .descendants_or_self()
        .into_iter()
        .filter(|e| is_binding_document(e))
        .flat_map(|e| bindings_from_xbl(e, uri))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

/// How the host should build the runtime control for an element name.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlKind {
    Builtin,
    Component(Arc<AbstractBinding>),
}

/// Read-only view of the registry at one point in time.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    bindings: IndexMap<QName, Arc<AbstractBinding>>,
    last_modified: Option<u64>,
}

impl RegistrySnapshot {
    pub fn lookup(&self, name: &QName) -> Option<&Arc<AbstractBinding>> {
        self.bindings.get(name)
    }

    pub fn contains(&self, name: &QName) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn bindings(&self) -> impl Iterator<Item = &Arc<AbstractBinding>> {
        self.bindings.values()
    }

    pub fn last_modified(&self) -> Option<u64> {
        self.last_modified
    }
}

pub struct BindingRegistry {
    state: RwLock<Arc<RegistrySnapshot>>,
    sources: Mutex<SourceCache>,
    policy: DuplicatePolicy,
}

impl Default for BindingRegistry {
    fn default() -> Self {
        Self::new(DuplicatePolicy::default())
    }
}

impl BindingRegistry {
    pub fn new(policy: DuplicatePolicy) -> Self {
        BindingRegistry {
            state: RwLock::new(Arc::new(RegistrySnapshot::default())),
            sources: Mutex::new(SourceCache::new()),
            policy,
        }
    }

    pub fn from_options(options: &AnalysisOptions) -> Self {
        Self::new(options.duplicate_bindings)
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn lookup(&self, name: &QName) -> Option<Arc<AbstractBinding>> {
        self.snapshot().lookup(name).cloned()
    }

    pub fn control_kind(&self, name: &QName) -> ControlKind {
        match self.lookup(name) {
            Some(binding) => ControlKind::Component(binding),
            None => ControlKind::Builtin,
        }
    }

    pub fn binding_count(&self) -> usize {
        self.snapshot().len()
    }

    /// Newest modification time among the registered resources.
    pub fn bindings_last_modified(&self) -> Option<u64> {
        self.snapshot().last_modified()
    }

    /// Registers every binding of `doc`. Returns how many element names were
    /// newly bound.
    pub fn register(&self, doc: &Document) -> Result<usize, CompilerError> {
        self.register_with_timestamp(doc, None)
    }

    pub fn register_with_timestamp(
        &self,
        doc: &Document,
        last_modified: Option<u64>,
    ) -> Result<usize, CompilerError> {
        let records = bindings_from_document(doc);
        info!(uri = ?doc.uri, bindings = records.len(), "Registering binding document");
        self.publish(records, last_modified)
    }

    /// Builds the records of all documents in parallel and publishes them
    /// together.
    pub fn register_all(&self, docs: &[Document]) -> Result<usize, CompilerError> {
        let records: Vec<AbstractBinding> = docs
            .par_iter()
            .map(bindings_from_document)
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect();
        info!(documents = docs.len(), bindings = records.len(), "Registering binding documents");
        self.publish(records, None)
    }

    /// Parses and registers a resource. Re-registering identical content is
    /// skipped.
    pub fn register_source(
        &self,
        uri: &str,
        source: &str,
        last_modified: Option<u64>,
    ) -> Result<usize, CompilerError> {
        if self
            .sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_unchanged(uri, source)
        {
            debug!(uri, "Binding resource unchanged, skipping");
            return Ok(0);
        }

        let doc = parse_document(source, Some(uri))?;
        let added = self.register_with_timestamp(&doc, last_modified)?;
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set(uri, source, last_modified);
        Ok(added)
    }

    fn publish(
        &self,
        records: Vec<AbstractBinding>,
        last_modified: Option<u64>,
    ) -> Result<usize, CompilerError> {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if self.policy == DuplicatePolicy::Reject {
            for (index, record) in records.iter().enumerate() {
                let in_batch = records[..index]
                    .iter()
                    .any(|r| r.element_name == record.element_name);
                if in_batch || guard.contains(&record.element_name) {
                    return Err(CompilerError::with_details(
                        INV_DUPLICATE_BINDING,
                        &format!(
                            "Element {} is already bound.",
                            record.element_name.qualified()
                        ),
                        record.source_uri.clone(),
                        vec!["Remove one of the bindings or allow overwriting with duplicateBindings: \"overwrite\".".to_string()],
                    ));
                }
            }
        }

        let snapshot = Arc::make_mut(&mut guard);
        let mut added = 0;
        for record in records {
            let name = record.element_name.clone();
            if let Some(previous) = snapshot.bindings.insert(name.clone(), Arc::new(record)) {
                warn!(
                    element = %name.qualified(),
                    previous = %previous.binding_id,
                    "Duplicate binding for element, last registration wins"
                );
            } else {
                added += 1;
            }
        }
        if let Some(time) = last_modified {
            snapshot.last_modified = Some(snapshot.last_modified.map_or(time, |t| t.max(time)));
        }
        Ok(added)
    }
}
