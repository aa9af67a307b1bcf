//! Analysis session for one host document.
//!
//! `PartAnalysis` annotates and extracts the host document, then expands every
//! bound element it finds, recursively, memoizing one `ConcreteBinding` per
//! prefixed id. It owns the scope tree and annotation metadata of the
//! document; the binding registry is shared.

use indexmap::{IndexMap, IndexSet};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::annotate::{annotate_tree, EventBuffer, Metadata};
use crate::component::ShadowTreeGenerator;
use crate::config::AnalysisOptions;
use crate::discovery::{resolve_includes, AutoIncludes, ResourceLoader};
use crate::extract::{extract, ExtractionTarget, ScopeMarker};
use crate::ids;
use crate::parse::serialize;
use crate::registry::{AbstractBinding, BindingRegistry, BindingResource};
use crate::scope::{ScopeId, ScopeTree};
use crate::transform::{NoTransforms, TransformRegistry};
use crate::tree::{ns, Document, Element, QName};
use crate::validate::{is_binding_document, CompilerError, INV_BINDING_DEPTH};
use crate::xpath::{PathEvaluator, SimplePathEvaluator};

// ═══════════════════════════════════════════════════════════════════════════════
// RESULT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// A model declared by a component, either in its implementation or in its
/// template.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticModel {
    pub prefixed_id: String,
    pub static_id: String,
    pub element: Element,
}

/// Expansion of one bound element occurrence.
#[derive(Debug)]
pub struct ConcreteBinding {
    pub bound_prefixed_id: String,
    pub inner_scope: ScopeId,
    pub outer_scope: ScopeId,
    pub full_shadow_tree: Element,
    pub compact_shadow_tree: Element,
    pub binding_id: String,
    pub container_element_name: String,
    pub binding: Arc<AbstractBinding>,
    /// Annotated `xbl:handler` elements.
    pub handlers: Vec<Element>,
    pub models: Vec<StaticModel>,
    /// Annotated event stream, kept for full-update templates.
    pub replay: Option<EventBuffer>,
}

impl ConcreteBinding {
    /// Prefix of every id inside the shadow tree.
    pub fn prefix(&self) -> String {
        ids::full_prefix(&self.bound_prefixed_id)
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzedDocument {
    /// Host document with ids on every element.
    pub annotated: Element,
    /// Compact top-level tree, rooted at `static-state`.
    pub compact: Element,
    pub replay: Option<EventBuffer>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SESSION
// ═══════════════════════════════════════════════════════════════════════════════

pub struct PartAnalysis<'a> {
    registry: &'a BindingRegistry,
    loader: Option<&'a dyn ResourceLoader>,
    evaluator: &'a dyn PathEvaluator,
    transforms: &'a dyn TransformRegistry,
    options: AnalysisOptions,
    includes: AutoIncludes,
    scopes: ScopeTree,
    metadata: Metadata,
    concrete: IndexMap<String, Rc<ConcreteBinding>>,
    /// Bindings instantiated at least once, by binding id.
    instantiated: IndexMap<String, Arc<AbstractBinding>>,
    visited_includes: IndexSet<String>,
    loaded_includes: Vec<String>,
}

impl<'a> PartAnalysis<'a> {
    pub fn new(registry: &'a BindingRegistry, options: AnalysisOptions) -> Self {
        let includes = AutoIncludes::new(
            options.auto_include_mappings.clone(),
            &options.auto_include_base,
        );
        PartAnalysis {
            registry,
            loader: None,
            evaluator: &SimplePathEvaluator,
            transforms: &NoTransforms,
            options,
            includes,
            scopes: ScopeTree::new(),
            metadata: Metadata::new(),
            concrete: IndexMap::new(),
            instantiated: IndexMap::new(),
            visited_includes: IndexSet::new(),
            loaded_includes: Vec::new(),
        }
    }

    pub fn with_loader(mut self, loader: &'a dyn ResourceLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_transforms(mut self, transforms: &'a dyn TransformRegistry) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn with_evaluator(mut self, evaluator: &'a dyn PathEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Analyzes the host document: registers its inline bindings, resolves
    /// includes, annotates and extracts the top level, then expands every bound
    /// element.
    #[instrument(skip_all, fields(uri = ?doc.uri))]
    pub fn analyze(&mut self, doc: &Document) -> Result<AnalyzedDocument, CompilerError> {
        let has_inline_bindings = doc
            .root
            .descendants_or_self()
            .iter()
            .any(|e| is_binding_document(e));
        if has_inline_bindings {
            self.registry.register(doc)?;
        }

        self.discover_includes(&doc.root)?;

        let annotated = annotate_tree(
            &doc.root,
            "",
            false,
            self.options.full_update,
            &mut self.metadata,
        )?;

        let top = self.scopes.top_level();
        let target = ExtractionTarget {
            prefix: "",
            inner: top,
            outer: top,
            keep_root: false,
            start: ScopeMarker::Inner,
        };
        let snapshot = self.registry.snapshot();
        let compact = extract(
            &annotated.tree,
            &target,
            &mut self.scopes,
            &self.metadata,
            &snapshot,
        )?;

        self.process_nested(&compact, "", false, 1)?;
        debug!(
            components = self.concrete.len(),
            scopes = self.scopes.len(),
            "Analysis complete"
        );

        Ok(AnalyzedDocument {
            annotated: annotated.tree,
            compact,
            replay: annotated.replay,
        })
    }

    fn discover_includes(&mut self, root: &Element) -> Result<(), CompilerError> {
        let Some(loader) = self.loader else {
            return Ok(());
        };
        let loaded = resolve_includes(
            &[root],
            &self.includes,
            self.registry,
            loader,
            &mut self.visited_includes,
        )?;
        self.loaded_includes.extend(loaded);
        Ok(())
    }

    /// Expands the bound element `prefixed_id` unless that was already done.
    /// None when the element is not bound or its binding has no template.
    pub fn process_element_if_needed(
        &mut self,
        bound: &Element,
        prefixed_id: &str,
    ) -> Result<Option<Rc<ConcreteBinding>>, CompilerError> {
        self.process_at(bound, prefixed_id, 1)
    }

    fn process_at(
        &mut self,
        bound: &Element,
        prefixed_id: &str,
        depth: usize,
    ) -> Result<Option<Rc<ConcreteBinding>>, CompilerError> {
        if let Some(existing) = self.concrete.get(prefixed_id) {
            return Ok(Some(Rc::clone(existing)));
        }
        let Some(binding) = self.registry.lookup(&bound.name) else {
            return Ok(None);
        };
        if depth > self.options.max_binding_depth {
            return Err(CompilerError::with_details(
                INV_BINDING_DEPTH,
                &format!(
                    "Binding expansion deeper than {} levels at {}.",
                    self.options.max_binding_depth, prefixed_id
                ),
                Some(prefixed_id.to_string()),
                vec!["Check for a binding whose template contains its own bound element.".to_string()],
            ));
        }

        let outer = self.scopes.scope_for_prefixed_id(prefixed_id)?;
        let prefix = ids::full_prefix(prefixed_id);

        let generator = ShadowTreeGenerator {
            evaluator: self.evaluator,
            transforms: self.transforms,
            use_event_buffer: self.options.full_update,
        };
        let registry = self.registry;
        let loader = self.loader;
        let includes = &self.includes;
        let visited = &mut self.visited_includes;
        let loaded = &mut self.loaded_includes;
        let mut discover = |template: &Element| -> Result<(), CompilerError> {
            if let Some(loader) = loader {
                loaded.extend(resolve_includes(&[template], includes, registry, loader, visited)?);
            }
            Ok(())
        };
        let Some(shadow) =
            generator.generate_with(bound, &binding, &prefix, &mut self.metadata, &mut discover)?
        else {
            return Ok(None);
        };

        let inner = self.scopes.new_scope(outer, prefixed_id)?;
        let snapshot = self.registry.snapshot();
        let target = ExtractionTarget {
            prefix: &prefix,
            inner,
            outer,
            keep_root: true,
            start: ScopeMarker::Inner,
        };
        let compact = extract(
            &shadow.full,
            &target,
            &mut self.scopes,
            &self.metadata,
            &snapshot,
        )?;

        let handlers = binding
            .handlers
            .iter()
            .map(|h| self.index_fragment(h, &prefix, inner))
            .collect::<Result<Vec<_>, _>>()?;

        let mut models = Vec::new();
        for model in &binding.implementations {
            let element = self.index_fragment(model, &prefix, inner)?;
            models.push(static_model(element, &prefix));
        }
        let model_name = QName::new(ns::XFORMS, "model");
        for element in shadow.full.descendants_or_self() {
            if element.name == model_name && element.id().is_some() {
                models.push(static_model(element.clone(), &prefix));
            }
        }

        if self.options.log_shadow_trees {
            debug!(
                prefixed_id,
                full = %serialize(&shadow.full),
                compact = %serialize(&compact),
                "Generated shadow tree"
            );
        }

        let concrete = Rc::new(ConcreteBinding {
            bound_prefixed_id: prefixed_id.to_string(),
            inner_scope: inner,
            outer_scope: outer,
            full_shadow_tree: shadow.full,
            compact_shadow_tree: compact,
            binding_id: binding.binding_id.clone(),
            container_element_name: binding.container_element_name.clone(),
            binding: Arc::clone(&binding),
            handlers,
            models,
            replay: shadow.replay,
        });
        self.concrete
            .insert(prefixed_id.to_string(), Rc::clone(&concrete));
        self.instantiated
            .entry(binding.binding_id.clone())
            .or_insert(binding);

        self.process_nested(&concrete.compact_shadow_tree, &prefix, true, depth + 1)?;
        Ok(Some(concrete))
    }

    /// Annotates a handler or model with the component prefix and declares its
    /// ids in the inner scope.
    fn index_fragment(
        &mut self,
        fragment: &Element,
        prefix: &str,
        inner: ScopeId,
    ) -> Result<Element, CompilerError> {
        let annotated = annotate_tree(fragment, prefix, false, false, &mut self.metadata)?;
        let target = ExtractionTarget {
            prefix,
            inner,
            outer: inner,
            keep_root: false,
            start: ScopeMarker::Inner,
        };
        let snapshot = self.registry.snapshot();
        extract(
            &annotated.tree,
            &target,
            &mut self.scopes,
            &self.metadata,
            &snapshot,
        )?;
        Ok(annotated.tree)
    }

    /// Expands the bound elements of a compact tree. Does not look inside bound
    /// elements, binding declarations or instances.
    fn process_nested(
        &mut self,
        tree: &Element,
        prefix: &str,
        skip_root: bool,
        depth: usize,
    ) -> Result<(), CompilerError> {
        let mut found = Vec::new();
        let snapshot = self.registry.snapshot();
        if skip_root {
            for child in tree.child_elements() {
                collect_bound_elements(child, &snapshot, &mut found);
            }
        } else {
            collect_bound_elements(tree, &snapshot, &mut found);
        }

        for bound in found {
            let Some(static_id) = bound.id() else { continue };
            let prefixed_id = format!("{}{}", prefix, static_id);
            self.process_at(bound, &prefixed_id, depth)?;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LOOKUPS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn is_component(&self, prefixed_id: &str) -> bool {
        self.concrete.contains_key(prefixed_id)
    }

    pub fn concrete_binding(&self, prefixed_id: &str) -> Option<Rc<ConcreteBinding>> {
        self.concrete.get(prefixed_id).cloned()
    }

    pub fn concrete_bindings(&self) -> impl Iterator<Item = &Rc<ConcreteBinding>> {
        self.concrete.values()
    }

    pub fn container_element_name(&self, prefixed_id: &str) -> Option<&str> {
        self.concrete
            .get(prefixed_id)
            .map(|c| c.container_element_name.as_str())
    }

    pub fn binding_id(&self, prefixed_id: &str) -> Option<&str> {
        self.concrete.get(prefixed_id).map(|c| c.binding_id.as_str())
    }

    pub fn has_binding(&self, name: &QName) -> bool {
        self.registry.lookup(name).is_some()
    }

    pub fn binding(&self, name: &QName) -> Option<Arc<AbstractBinding>> {
        self.registry.lookup(name)
    }

    /// Styles of the instantiated bindings, first occurrence wins.
    pub fn styles(&self) -> Vec<BindingResource> {
        let set: IndexSet<&BindingResource> = self
            .instantiated
            .values()
            .flat_map(|b| b.styles.iter())
            .collect();
        set.into_iter().cloned().collect()
    }

    pub fn scripts(&self) -> Vec<BindingResource> {
        let set: IndexSet<&BindingResource> = self
            .instantiated
            .values()
            .flat_map(|b| b.scripts.iter())
            .collect();
        set.into_iter().cloned().collect()
    }

    pub fn instantiated_bindings(&self) -> impl Iterator<Item = &Arc<AbstractBinding>> {
        self.instantiated.values()
    }

    pub fn scopes(&self) -> &ScopeTree {
        &self.scopes
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    pub fn registry(&self) -> &BindingRegistry {
        self.registry
    }

    pub fn loaded_includes(&self) -> &[String] {
        &self.loaded_includes
    }

    /// `outer$cmp$` -> scope of component `outer$cmp`.
    pub fn scope_for_prefix(&self, prefix: &str) -> Option<ScopeId> {
        self.scopes.scope_for_prefix(prefix)
    }

    pub fn scope_for_prefixed_id(&self, prefixed_id: &str) -> Result<ScopeId, CompilerError> {
        self.scopes.scope_for_prefixed_id(prefixed_id)
    }

    /// Resolves an instance id as seen from `start`: the innermost enclosing
    /// scope declaring `static_id` wins.
    pub fn find_instance_prefixed_id(&self, start: ScopeId, static_id: &str) -> Option<&str> {
        let mut current = Some(start);
        while let Some(scope) = current {
            if let Some(prefixed) = self.scopes.prefixed_id_for_static_id(scope, static_id) {
                return Some(prefixed);
            }
            current = self.scopes.parent(scope);
        }
        None
    }
}

fn static_model(element: Element, prefix: &str) -> StaticModel {
    let static_id = element.id().unwrap_or_default().to_string();
    StaticModel {
        prefixed_id: format!("{}{}", prefix, static_id),
        static_id,
        element,
    }
}

fn collect_bound_elements<'t>(
    element: &'t Element,
    bindings: &crate::registry::RegistrySnapshot,
    found: &mut Vec<&'t Element>,
) {
    if bindings.contains(&element.name) {
        found.push(element);
        return;
    }
    if is_binding_document(element) || element.name == QName::new(ns::XFORMS, "instance") {
        return;
    }
    for child in element.child_elements() {
        collect_bound_elements(child, bindings, found);
    }
}
