//! Container Hierarchy
//!
//! Runtime mirror of the scope tree. Each live component occurrence, and each
//! repeat-iteration clone of one, owns a container anchored at the component's
//! inner scope. Containers live in an arena; children are indexed by effective
//! id so a rename must detach and reattach. Destroyed containers give their
//! slot back, and the slot's generation makes old handles go stale.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::analysis::{ConcreteBinding, StaticModel};
use crate::ids::{self, COMPONENT_SEPARATOR};
use crate::scope::ScopeId;
use crate::validate::{
    CompilerError, INV_DUPLICATE_PREFIXED_ID, INV_STATIC_ID_EXPECTED, INV_UNRESOLVABLE_SCOPE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId {
    index: usize,
    generation: u32,
}

impl ContainerId {
    pub const ROOT: ContainerId = ContainerId {
        index: 0,
        generation: 0,
    };
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}/{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerState {
    Constructed,
    Active,
    Destroyed,
}

/// A model owned by one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInstance {
    pub static_id: String,
    pub prefixed_id: String,
    pub effective_id: String,
}

impl ModelInstance {
    fn from_static(model: &StaticModel, suffix: &str) -> Self {
        ModelInstance {
            static_id: model.static_id.clone(),
            prefixed_id: model.prefixed_id.clone(),
            effective_id: ids::effective_id(&model.prefixed_id, suffix),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Container {
    pub static_id: String,
    pub prefixed_id: String,
    pub effective_id: String,
    pub parent: Option<ContainerId>,
    pub inner_scope: ScopeId,
    pub models: Vec<ModelInstance>,
    pub state: ContainerState,
    children: IndexMap<String, ContainerId>,
}

impl Container {
    /// Prefix of the ids resolved inside this container.
    pub fn full_prefix(&self) -> String {
        ids::full_prefix(&self.prefixed_id)
    }

    /// Repeat-iteration chain, empty outside repeats.
    pub fn suffix(&self) -> &str {
        ids::suffix_of(&self.effective_id)
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEARDOWN
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Teardown of model {effective_id} failed: {reason}")]
pub struct TeardownError {
    pub effective_id: String,
    pub reason: String,
}

/// Receives one notification per model of a destroyed container.
pub trait TeardownListener {
    fn teardown(&mut self, container: &Container, model: &ModelInstance)
        -> Result<(), TeardownError>;
}

impl<F> TeardownListener for F
where
    F: FnMut(&Container, &ModelInstance) -> Result<(), TeardownError>,
{
    fn teardown(
        &mut self,
        container: &Container,
        model: &ModelInstance,
    ) -> Result<(), TeardownError> {
        self(container, model)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    /// Effective ids of the destroyed containers, parents first.
    pub destroyed: Vec<String>,
    pub failures: Vec<TeardownError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTAINER TREE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    container: Option<Container>,
}

#[derive(Debug, Clone)]
pub struct ContainerTree {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl ContainerTree {
    /// A tree holding the top-level container, anchored at the top-level scope
    /// and owning the document's top-level models.
    pub fn new(top_level_models: &[StaticModel]) -> Self {
        let root = Container {
            static_id: String::new(),
            prefixed_id: String::new(),
            effective_id: String::new(),
            parent: None,
            inner_scope: ScopeId::TOP_LEVEL,
            models: top_level_models
                .iter()
                .map(|m| ModelInstance::from_static(m, ""))
                .collect(),
            state: ContainerState::Active,
            children: IndexMap::new(),
        };
        ContainerTree {
            slots: vec![Slot {
                generation: 0,
                container: Some(root),
            }],
            free: Vec::new(),
        }
    }

    pub fn root(&self) -> ContainerId {
        ContainerId::ROOT
    }

    /// None once the container is destroyed.
    pub fn get(&self, id: ContainerId) -> Option<&Container> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.container.as_ref())
    }

    fn get_mut(&mut self, id: ContainerId) -> Option<&mut Container> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.container.as_mut())
    }

    fn container(&self, id: ContainerId) -> Result<&Container, CompilerError> {
        self.get(id).ok_or_else(|| unknown_container(id))
    }

    fn container_mut(&mut self, id: ContainerId) -> Result<&mut Container, CompilerError> {
        self.get_mut(id).ok_or_else(|| unknown_container(id))
    }

    /// Live containers, the root included.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Arena size: live containers plus slots waiting for reuse.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn allocate(&mut self, container: Container) -> ContainerId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.container = Some(container);
            return ContainerId {
                index,
                generation: slot.generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            container: Some(container),
        });
        ContainerId {
            index: self.slots.len() - 1,
            generation: 0,
        }
    }

    /// Empties the slot of `id` and makes `id` stale.
    fn release(&mut self, id: ContainerId) -> Option<Container> {
        let slot = self
            .slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)?;
        let container = slot.container.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(container)
    }

    /// Children in insertion order.
    pub fn children(&self, id: ContainerId) -> impl Iterator<Item = ContainerId> + '_ {
        self.get(id)
            .into_iter()
            .flat_map(|c| c.children.values().copied())
    }

    pub fn child_by_effective_id(&self, parent: ContainerId, effective_id: &str) -> Option<ContainerId> {
        self.get(parent)?.children.get(effective_id).copied()
    }

    /// Creates the container of a component occurrence. `effective_id` is the
    /// bound element's prefixed id plus the iteration chain of this clone.
    pub fn create_component(
        &mut self,
        parent: ContainerId,
        effective_id: &str,
        binding: &ConcreteBinding,
    ) -> Result<ContainerId, CompilerError> {
        let prefixed_id = ids::prefixed_id_of(effective_id);
        if prefixed_id != binding.bound_prefixed_id {
            return Err(CompilerError::with_details(
                INV_UNRESOLVABLE_SCOPE,
                &format!(
                    "Effective id {} does not belong to component {}.",
                    effective_id, binding.bound_prefixed_id
                ),
                Some(effective_id.to_string()),
                vec![],
            ));
        }
        if self.container(parent)?.children.contains_key(effective_id) {
            return Err(CompilerError::with_details(
                INV_DUPLICATE_PREFIXED_ID,
                &format!("Container {} already exists.", effective_id),
                Some(effective_id.to_string()),
                vec![],
            ));
        }

        let suffix = ids::suffix_of(effective_id);
        let id = self.allocate(Container {
            static_id: ids::static_id_of(prefixed_id).to_string(),
            prefixed_id: prefixed_id.to_string(),
            effective_id: effective_id.to_string(),
            parent: Some(parent),
            inner_scope: binding.inner_scope,
            models: binding
                .models
                .iter()
                .map(|m| ModelInstance::from_static(m, suffix))
                .collect(),
            state: ContainerState::Constructed,
            children: IndexMap::new(),
        });
        self.container_mut(parent)?
            .children
            .insert(effective_id.to_string(), id);
        debug!(effective_id, "Created container");
        Ok(id)
    }

    pub fn activate(&mut self, id: ContainerId) -> Result<(), CompilerError> {
        let container = self.container_mut(id)?;
        if container.state == ContainerState::Constructed {
            container.state = ContainerState::Active;
        }
        Ok(())
    }

    /// Renames a container after its iteration moved. The container, its models
    /// and all descendants get the new iteration chain in place of the old one.
    /// Identities are unchanged, so `new_effective_id` must keep the prefixed
    /// id and only differ in its suffix.
    pub fn update_effective_id(
        &mut self,
        id: ContainerId,
        new_effective_id: &str,
    ) -> Result<(), CompilerError> {
        let (old_effective_id, parent) = {
            let c = self.container(id)?;
            if ids::prefixed_id_of(new_effective_id) != c.prefixed_id {
                return Err(CompilerError::with_details(
                    INV_UNRESOLVABLE_SCOPE,
                    &format!(
                        "Effective id {} does not belong to container {}.",
                        new_effective_id, c.effective_id
                    ),
                    Some(new_effective_id.to_string()),
                    vec!["Only the repeat iteration chain of a container can change.".to_string()],
                ));
            }
            (c.effective_id.clone(), c.parent)
        };
        if old_effective_id == new_effective_id {
            return Ok(());
        }
        let old_suffix = ids::suffix_of(&old_effective_id).to_string();
        let new_suffix = ids::suffix_of(new_effective_id).to_string();

        if let Some(parent) = parent {
            self.remove_child(parent, id);
        }

        let subtree = self.subtree(id);
        for &member in &subtree {
            let container = self.container_mut(member)?;
            container.effective_id =
                ids::replace_suffix(&container.effective_id, &old_suffix, &new_suffix);
            for model in &mut container.models {
                model.effective_id =
                    ids::replace_suffix(&model.effective_id, &old_suffix, &new_suffix);
            }
        }
        for &member in &subtree {
            let rekeyed: IndexMap<String, ContainerId> = self
                .container(member)?
                .children
                .values()
                .filter_map(|&c| self.get(c).map(|child| (child.effective_id.clone(), c)))
                .collect();
            self.container_mut(member)?.children = rekeyed;
        }

        if let Some(parent) = parent {
            let effective_id = self.container(id)?.effective_id.clone();
            self.container_mut(parent)?.children.insert(effective_id, id);
        }
        debug!(from = %old_effective_id, to = new_effective_id, "Renamed container");
        Ok(())
    }

    /// Detaches `child` from `parent` if `parent` still indexes it.
    pub fn remove_child(&mut self, parent: ContainerId, child: ContainerId) -> bool {
        let Some(key) = self.get(child).map(|c| c.effective_id.clone()) else {
            return false;
        };
        let Some(parent) = self.get_mut(parent) else {
            return false;
        };
        if parent.children.get(&key) == Some(&child) {
            parent.children.shift_remove(&key);
            true
        } else {
            false
        }
    }

    /// Destroys a container and its descendants. The container is unlinked
    /// from its parent first, so failing teardowns never leave it attached.
    /// Their slots are freed; destroying an already destroyed container does
    /// nothing.
    pub fn destroy(
        &mut self,
        id: ContainerId,
        listener: &mut dyn TeardownListener,
    ) -> TeardownReport {
        let mut report = TeardownReport::default();
        let Some(parent) = self.get(id).map(|c| c.parent) else {
            debug!(container = %id, "Container already destroyed");
            return report;
        };
        if let Some(parent) = parent {
            self.remove_child(parent, id);
        }
        self.tear_down(id, listener, &mut report);
        report
    }

    fn tear_down(
        &mut self,
        id: ContainerId,
        listener: &mut dyn TeardownListener,
        report: &mut TeardownReport,
    ) {
        let Some(mut container) = self.release(id) else {
            return;
        };
        container.state = ContainerState::Destroyed;
        let children = std::mem::take(&mut container.children);

        for model in &container.models {
            if let Err(err) = listener.teardown(&container, model) {
                warn!(effective_id = %model.effective_id, error = %err, "Model teardown failed");
                report.failures.push(err);
            }
        }
        report.destroyed.push(container.effective_id);

        for child in children.into_values() {
            self.tear_down(child, listener, report);
        }
    }

    /// `id` and its descendants, parents first.
    fn subtree(&self, id: ContainerId) -> Vec<ContainerId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            let mut children: Vec<ContainerId> = self.children(current).collect();
            children.reverse();
            stack.extend(children);
        }
        out
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RESOLUTION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Closest container, starting at `id`, whose inner scope is `scope`.
    pub fn resolve_scope_root(
        &self,
        id: ContainerId,
        scope: ScopeId,
    ) -> Result<ContainerId, CompilerError> {
        let mut current = Some(id);
        while let Some(c) = current {
            let container = self.container(c)?;
            if container.inner_scope == scope {
                return Ok(c);
            }
            current = container.parent;
        }
        Err(CompilerError::with_details(
            INV_UNRESOLVABLE_SCOPE,
            &format!("No container above {} mirrors scope #{}.", id, scope.0),
            None,
            vec![],
        ))
    }

    /// Empty `static_id` selects the first model.
    pub fn find_model_by_static_id(&self, id: ContainerId, static_id: &str) -> Option<&ModelInstance> {
        let models = &self.get(id)?.models;
        if static_id.is_empty() {
            models.first()
        } else {
            models.iter().find(|m| m.static_id == static_id)
        }
    }

    /// Models of `id` and of every descendant, parents first.
    pub fn all_models(&self, id: ContainerId) -> Vec<&ModelInstance> {
        self.subtree(id)
            .into_iter()
            .filter_map(|c| self.get(c))
            .flat_map(|c| c.models.iter())
            .collect()
    }

    /// Whether `effective_id` names an element declared directly in this
    /// container, in the same iteration.
    pub fn is_effective_id_within(&self, id: ContainerId, effective_id: &str) -> bool {
        let Some(container) = self.get(id) else {
            return false;
        };
        let prefixed = ids::prefixed_id_of(effective_id);
        if ids::prefix_of(prefixed) != container.full_prefix() {
            return false;
        }
        let own = container.suffix();
        let other = ids::suffix_of(effective_id);
        own.is_empty()
            || other == own
            || other
                .strip_prefix(own)
                .is_some_and(|rest| rest.starts_with(ids::REPEAT_INDEX_SEPARATOR))
    }

    /// Effective id of the element with `static_id` inside this container.
    pub fn resolve_effective_id(
        &self,
        id: ContainerId,
        static_id: &str,
    ) -> Result<String, CompilerError> {
        if static_id.contains(COMPONENT_SEPARATOR) {
            return Err(CompilerError::with_details(
                INV_STATIC_ID_EXPECTED,
                &format!("Id {} must be static.", static_id),
                Some(static_id.to_string()),
                vec![],
            ));
        }
        let container = self.container(id)?;
        let prefixed = format!("{}{}", container.full_prefix(), static_id);
        Ok(ids::effective_id(&prefixed, container.suffix()))
    }
}

fn unknown_container(id: ContainerId) -> CompilerError {
    CompilerError::new(
        INV_UNRESOLVABLE_SCOPE,
        &format!("Container {} is destroyed or does not belong to this tree.", id),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AbstractBinding;
    use crate::tree::{Element, QName};
    use std::sync::Arc;

    fn model(prefix: &str, static_id: &str) -> StaticModel {
        StaticModel {
            prefixed_id: format!("{}{}", prefix, static_id),
            static_id: static_id.to_string(),
            element: Element::new(QName::new(crate::tree::ns::XFORMS, "model")),
        }
    }

    fn concrete(prefixed_id: &str, scope: u32, models: &[&str]) -> ConcreteBinding {
        let prefix = ids::full_prefix(prefixed_id);
        let name = QName::new("urn:fr", "foo");
        ConcreteBinding {
            bound_prefixed_id: prefixed_id.to_string(),
            inner_scope: ScopeId(scope),
            outer_scope: ScopeId::TOP_LEVEL,
            full_shadow_tree: Element::new(QName::local("template")),
            compact_shadow_tree: Element::new(QName::local("template")),
            binding_id: "fr-foo".to_string(),
            container_element_name: "div".to_string(),
            binding: Arc::new(AbstractBinding {
                element_name: name,
                binding_id: "fr-foo".to_string(),
                template: None,
                transform: None,
                styles: vec![],
                scripts: vec![],
                handlers: vec![],
                implementations: vec![],
                global: None,
                container_element_name: "div".to_string(),
                source_uri: None,
            }),
            handlers: vec![],
            models: models.iter().map(|m| model(&prefix, m)).collect(),
            replay: None,
        }
    }

    fn quiet(_: &Container, _: &ModelInstance) -> Result<(), TeardownError> {
        Ok(())
    }

    #[test]
    fn test_component_lifecycle() {
        let mut tree = ContainerTree::new(&[model("", "main")]);
        let root = tree.root();
        let cmp = tree
            .create_component(root, "cmp", &concrete("cmp", 1, &["m"]))
            .unwrap();
        assert_eq!(tree.get(cmp).unwrap().state, ContainerState::Constructed);
        tree.activate(cmp).unwrap();
        assert_eq!(tree.get(cmp).unwrap().state, ContainerState::Active);
        assert_eq!(tree.children(root).collect::<Vec<_>>(), vec![cmp]);
        assert_eq!(tree.get(cmp).unwrap().models[0].effective_id, "cmp$m");
        assert_eq!(tree.find_model_by_static_id(root, "").unwrap().static_id, "main");
    }

    #[test]
    fn test_create_rejects_foreign_and_duplicate_ids() {
        let mut tree = ContainerTree::new(&[]);
        let root = tree.root();
        let binding = concrete("cmp", 1, &[]);
        assert!(tree.create_component(root, "other.1", &binding).is_err());
        tree.create_component(root, "cmp.1", &binding).unwrap();
        let err = tree.create_component(root, "cmp.1", &binding).unwrap_err();
        assert_eq!(err.code, INV_DUPLICATE_PREFIXED_ID);
    }

    #[test]
    fn test_update_effective_id_renames_subtree() {
        let mut tree = ContainerTree::new(&[]);
        let root = tree.root();
        let cmp = tree
            .create_component(root, "cmp.1", &concrete("cmp", 1, &["m"]))
            .unwrap();
        let nested = tree
            .create_component(cmp, "cmp$ctl.1-4", &concrete("cmp$ctl", 2, &["n"]))
            .unwrap();

        tree.update_effective_id(cmp, "cmp.3").unwrap();

        assert_eq!(tree.get(cmp).unwrap().effective_id, "cmp.3");
        assert_eq!(tree.get(cmp).unwrap().models[0].effective_id, "cmp$m.3");
        assert_eq!(tree.get(nested).unwrap().effective_id, "cmp$ctl.3-4");
        assert_eq!(tree.get(nested).unwrap().models[0].effective_id, "cmp$ctl$n.3-4");
        assert_eq!(tree.child_by_effective_id(root, "cmp.3"), Some(cmp));
        assert_eq!(tree.child_by_effective_id(root, "cmp.1"), None);
        assert_eq!(tree.child_by_effective_id(cmp, "cmp$ctl.3-4"), Some(nested));
        assert_eq!(tree.get(nested).unwrap().inner_scope, ScopeId(2));
    }

    #[test]
    fn test_update_effective_id_keeps_prefixed_id() {
        let mut tree = ContainerTree::new(&[]);
        let root = tree.root();
        let cmp = tree
            .create_component(root, "cmp.1", &concrete("cmp", 1, &[]))
            .unwrap();
        let err = tree.update_effective_id(cmp, "other.1").unwrap_err();
        assert_eq!(err.code, INV_UNRESOLVABLE_SCOPE);
        assert_eq!(tree.get(cmp).unwrap().effective_id, "cmp.1");
        assert_eq!(tree.child_by_effective_id(root, "cmp.1"), Some(cmp));
    }

    #[test]
    fn test_destroy_unlinks_first_and_reports_failures() {
        let mut tree = ContainerTree::new(&[]);
        let root = tree.root();
        let cmp = tree
            .create_component(root, "cmp", &concrete("cmp", 1, &["a", "b"]))
            .unwrap();
        let nested = tree
            .create_component(cmp, "cmp$ctl", &concrete("cmp$ctl", 2, &["c"]))
            .unwrap();

        let mut seen = Vec::new();
        let mut listener = |_: &Container, m: &ModelInstance| -> Result<(), TeardownError> {
            seen.push(m.effective_id.clone());
            if m.static_id == "b" {
                return Err(TeardownError {
                    effective_id: m.effective_id.clone(),
                    reason: "busy".to_string(),
                });
            }
            Ok(())
        };
        let report = tree.destroy(cmp, &mut listener);

        assert_eq!(seen, vec!["cmp$a", "cmp$b", "cmp$ctl$c"]);
        assert_eq!(report.destroyed, vec!["cmp", "cmp$ctl"]);
        assert_eq!(report.failures.len(), 1);
        assert!(!report.is_clean());
        assert_eq!(tree.children(root).count(), 0);
        assert!(tree.get(nested).is_none());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_destroy_twice_notifies_once() {
        let mut tree = ContainerTree::new(&[]);
        let root = tree.root();
        let cmp = tree
            .create_component(root, "cmp", &concrete("cmp", 1, &["a"]))
            .unwrap();
        let ctl = tree
            .create_component(cmp, "cmp$ctl", &concrete("cmp$ctl", 2, &["b"]))
            .unwrap();
        tree.create_component(ctl, "cmp$ctl$leaf", &concrete("cmp$ctl$leaf", 3, &["c"]))
            .unwrap();

        let mut notifications = 0;
        let mut listener = |_: &Container, _: &ModelInstance| -> Result<(), TeardownError> {
            notifications += 1;
            Ok(())
        };
        assert_eq!(tree.destroy(cmp, &mut listener).destroyed.len(), 3);
        assert!(tree.destroy(cmp, &mut listener).destroyed.is_empty());
        assert!(tree.destroy(ctl, &mut listener).destroyed.is_empty());
        assert_eq!(notifications, 3);
    }

    #[test]
    fn test_destroyed_container_rejects_use() {
        let mut tree = ContainerTree::new(&[]);
        let root = tree.root();
        let cmp = tree
            .create_component(root, "cmp.1", &concrete("cmp", 1, &[]))
            .unwrap();
        tree.destroy(cmp, &mut quiet);

        let err = tree
            .create_component(cmp, "cmp$ctl.1", &concrete("cmp$ctl", 2, &[]))
            .unwrap_err();
        assert_eq!(err.code, INV_UNRESOLVABLE_SCOPE);
        assert!(tree.update_effective_id(cmp, "cmp.2").is_err());
        assert!(tree.activate(cmp).is_err());

        tree.destroy(root, &mut quiet);
        assert!(tree.is_empty());
        assert!(tree.create_component(root, "cmp.1", &concrete("cmp", 1, &[])).is_err());
    }

    #[test]
    fn test_slots_are_reused_and_old_handles_go_stale() {
        let mut tree = ContainerTree::new(&[]);
        let root = tree.root();
        let binding = concrete("cmp", 1, &["m"]);

        let mut first = None;
        for round in 0..5 {
            let iterations: Vec<ContainerId> = (1..=3)
                .map(|i| {
                    tree.create_component(root, &format!("cmp.{}", i), &binding)
                        .unwrap()
                })
                .collect();
            if round == 0 {
                first = Some(iterations[0]);
            }
            for id in iterations {
                tree.destroy(id, &mut quiet);
            }
        }

        assert_eq!(tree.slot_count(), 4);
        assert_eq!(tree.len(), 1);
        let reused = tree.create_component(root, "cmp.9", &binding).unwrap();
        let stale = first.unwrap();
        assert_ne!(reused, stale);
        assert!(tree.get(stale).is_none());
        assert_eq!(tree.get(reused).unwrap().effective_id, "cmp.9");
    }

    #[test]
    fn test_remove_child_checks_identity() {
        let mut tree = ContainerTree::new(&[]);
        let root = tree.root();
        let cmp = tree
            .create_component(root, "cmp", &concrete("cmp", 1, &[]))
            .unwrap();
        assert!(!tree.remove_child(cmp, cmp));
        assert!(tree.remove_child(root, cmp));
        assert!(!tree.remove_child(root, cmp));
    }

    #[test]
    fn test_resolution() {
        let mut tree = ContainerTree::new(&[]);
        let root = tree.root();
        let cmp = tree
            .create_component(root, "cmp.2", &concrete("cmp", 1, &["m"]))
            .unwrap();
        let nested = tree
            .create_component(cmp, "cmp$ctl.2", &concrete("cmp$ctl", 2, &["n"]))
            .unwrap();

        assert_eq!(tree.resolve_scope_root(nested, ScopeId(1)).unwrap(), cmp);
        assert_eq!(tree.resolve_scope_root(nested, ScopeId::TOP_LEVEL).unwrap(), root);
        assert!(tree.resolve_scope_root(cmp, ScopeId(9)).is_err());

        assert_eq!(tree.resolve_effective_id(cmp, "input").unwrap(), "cmp$input.2");
        let err = tree.resolve_effective_id(cmp, "cmp$input").unwrap_err();
        assert_eq!(err.code, INV_STATIC_ID_EXPECTED);

        assert!(tree.is_effective_id_within(cmp, "cmp$input.2"));
        assert!(tree.is_effective_id_within(cmp, "cmp$input.2-1"));
        assert!(!tree.is_effective_id_within(cmp, "cmp$input.3"));
        assert!(!tree.is_effective_id_within(cmp, "cmp$ctl$x.2"));

        let all: Vec<&str> = tree
            .all_models(cmp)
            .iter()
            .map(|m| m.effective_id.as_str())
            .collect();
        assert_eq!(all, vec!["cmp$m.2", "cmp$ctl$n.2"]);
    }
}
