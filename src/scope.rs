//! Scope Tree
//!
//! Lexical scopes for static ids, one per component instance plus the
//! top-level scope. Scopes live in an arena and are addressed by `ScopeId`.
//! Each scope owns its append-only `static id -> prefixed id` map; the tree
//! keeps two indexes on the side: scope id -> scope and prefixed id -> scope.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ids;
use crate::validate::{
    CompilerError, INV_DUPLICATE_PREFIXED_ID, INV_DUPLICATE_STATIC_ID, INV_SCOPE_ID_IN_USE,
    INV_UNRESOLVABLE_SCOPE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId(pub u32);

impl ScopeId {
    pub const TOP_LEVEL: ScopeId = ScopeId(0);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub parent: Option<ScopeId>,
    /// Prefixed id of the bound element that introduced the scope, empty at
    /// top level.
    pub scope_id: String,
    id_map: IndexMap<String, String>,
}

impl Scope {
    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    /// Prefix of ids generated inside this scope.
    pub fn full_prefix(&self) -> String {
        ids::full_prefix(&self.scope_id)
    }

    pub fn prefixed_id_for_static_id(&self, static_id: &str) -> Option<&str> {
        self.id_map.get(static_id).map(String::as_str)
    }

    pub fn contains_static_id(&self, static_id: &str) -> bool {
        self.id_map.contains_key(static_id)
    }

    /// `(static id, prefixed id)` pairs in declaration order.
    pub fn ids(&self) -> impl Iterator<Item = (&str, &str)> {
        self.id_map.iter().map(|(s, p)| (s.as_str(), p.as_str()))
    }

    pub fn len(&self) -> usize {
        self.id_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_map.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
    by_scope_id: HashMap<String, ScopeId>,
    prefixed_index: HashMap<String, ScopeId>,
}

impl Default for ScopeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeTree {
    /// A tree holding only the top-level scope.
    pub fn new() -> Self {
        let mut by_scope_id = HashMap::new();
        by_scope_id.insert(String::new(), ScopeId::TOP_LEVEL);
        ScopeTree {
            scopes: vec![Scope {
                parent: None,
                scope_id: String::new(),
                id_map: IndexMap::new(),
            }],
            by_scope_id,
            prefixed_index: HashMap::new(),
        }
    }

    pub fn top_level(&self) -> ScopeId {
        ScopeId::TOP_LEVEL
    }

    pub fn get(&self, scope: ScopeId) -> Option<&Scope> {
        self.scopes.get(scope.0 as usize)
    }

    fn get_mut(&mut self, scope: ScopeId) -> Result<&mut Scope, CompilerError> {
        self.scopes
            .get_mut(scope.0 as usize)
            .ok_or_else(|| unknown_scope(scope))
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ScopeId, &Scope)> {
        self.scopes
            .iter()
            .enumerate()
            .map(|(i, s)| (ScopeId(i as u32), s))
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.get(scope).and_then(|s| s.parent)
    }

    pub fn scope_id(&self, scope: ScopeId) -> Option<&str> {
        self.get(scope).map(|s| s.scope_id.as_str())
    }

    pub fn full_prefix(&self, scope: ScopeId) -> String {
        self.get(scope).map(Scope::full_prefix).unwrap_or_default()
    }

    pub fn is_top_level(&self, scope: ScopeId) -> bool {
        scope == ScopeId::TOP_LEVEL
    }

    /// Creates the scope introduced by the bound element `scope_id`.
    pub fn new_scope(&mut self, parent: ScopeId, scope_id: &str) -> Result<ScopeId, CompilerError> {
        if scope_id.is_empty() || self.by_scope_id.contains_key(scope_id) {
            return Err(CompilerError::with_details(
                INV_SCOPE_ID_IN_USE,
                &format!("Scope id '{}' is already in use.", scope_id),
                Some(scope_id.to_string()),
                vec![],
            ));
        }
        if self.get(parent).is_none() {
            return Err(unknown_scope(parent));
        }

        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            parent: Some(parent),
            scope_id: scope_id.to_string(),
            id_map: IndexMap::new(),
        });
        self.by_scope_id.insert(scope_id.to_string(), id);
        Ok(id)
    }

    /// Records `static_id -> prefixed_id` in `scope` and indexes the prefixed id.
    pub fn declare(
        &mut self,
        scope: ScopeId,
        static_id: &str,
        prefixed_id: &str,
    ) -> Result<(), CompilerError> {
        if self.get_mut(scope)?.contains_static_id(static_id) {
            return Err(CompilerError::with_details(
                INV_DUPLICATE_STATIC_ID,
                &format!("Duplicate id found for static id: {}", static_id),
                Some(prefixed_id.to_string()),
                vec!["Static ids must be unique within a component and within the page.".to_string()],
            ));
        }
        if self.prefixed_index.contains_key(prefixed_id) {
            return Err(CompilerError::with_details(
                INV_DUPLICATE_PREFIXED_ID,
                &format!("Duplicate prefixed id: {}", prefixed_id),
                Some(static_id.to_string()),
                vec![],
            ));
        }

        self.get_mut(scope)?
            .id_map
            .insert(static_id.to_string(), prefixed_id.to_string());
        self.prefixed_index.insert(prefixed_id.to_string(), scope);
        Ok(())
    }

    pub fn prefixed_id_for_static_id(&self, scope: ScopeId, static_id: &str) -> Option<&str> {
        self.get(scope)?.prefixed_id_for_static_id(static_id)
    }

    /// Scope that declared `prefixed_id`.
    pub fn scope_for_prefixed_id(&self, prefixed_id: &str) -> Result<ScopeId, CompilerError> {
        self.prefixed_index
            .get(prefixed_id)
            .copied()
            .ok_or_else(|| {
                CompilerError::with_details(
                    INV_UNRESOLVABLE_SCOPE,
                    &format!("No scope declares prefixed id {}.", prefixed_id),
                    Some(prefixed_id.to_string()),
                    vec![],
                )
            })
    }

    pub fn lookup_scope_id(&self, scope_id: &str) -> Option<ScopeId> {
        self.by_scope_id.get(scope_id).copied()
    }

    /// Scope whose ids start with `prefix` (`outer$cmp$` -> scope `outer$cmp`).
    pub fn scope_for_prefix(&self, prefix: &str) -> Option<ScopeId> {
        self.lookup_scope_id(ids::scope_id_of_prefix(prefix))
    }

    /// Whether `scope` is `ancestor` or nested inside it.
    pub fn is_within(&self, scope: ScopeId, ancestor: ScopeId) -> bool {
        let mut current = Some(scope);
        while let Some(s) = current {
            if s == ancestor {
                return true;
            }
            current = self.parent(s);
        }
        false
    }
}

fn unknown_scope(scope: ScopeId) -> CompilerError {
    CompilerError::new(
        INV_UNRESOLVABLE_SCOPE,
        &format!("Scope #{} does not belong to this tree.", scope.0),
    )
}
