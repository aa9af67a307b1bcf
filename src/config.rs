//! Analysis options, read from camelCase JSON. Every field has a default, so
//! `{}` is a valid configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::validate::{CompilerError, INV_PARSE, INV_RESOURCE};

/// What the registry does when a second binding claims an element name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Last registration wins; a warning is logged.
    #[default]
    Overwrite,
    /// Registration fails with a configuration error.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisOptions {
    /// Serialize every generated shadow tree at debug level.
    pub log_shadow_trees: bool,
    pub duplicate_bindings: DuplicatePolicy,
    /// Prefix -> namespace URI of the binding libraries that are loaded on
    /// first use.
    pub auto_include_mappings: BTreeMap<String, String>,
    pub auto_include_base: String,
    /// Route annotation of templates with `xxforms:update="full"` through an
    /// event buffer.
    pub full_update: bool,
    pub max_binding_depth: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        AnalysisOptions {
            log_shadow_trees: false,
            duplicate_bindings: DuplicatePolicy::Overwrite,
            auto_include_mappings: BTreeMap::new(),
            auto_include_base: "/xbl".to_string(),
            full_update: true,
            max_binding_depth: 64,
        }
    }
}

impl AnalysisOptions {
    pub fn from_json_str(json: &str) -> Result<Self, CompilerError> {
        serde_json::from_str(json).map_err(|e| {
            CompilerError::with_details(
                INV_PARSE,
                &format!("Invalid analysis options: {}", e),
                None,
                vec![],
            )
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, CompilerError> {
        let json = fs::read_to_string(path).map_err(|e| {
            CompilerError::with_details(
                INV_RESOURCE,
                &format!("Failed to read options: {}", e),
                Some(path.display().to_string()),
                vec![],
            )
        })?;
        Self::from_json_str(&json)
    }

    pub fn with_auto_include(mut self, prefix: &str, namespace: &str) -> Self {
        self.auto_include_mappings
            .insert(prefix.to_string(), namespace.to_string());
        self
    }
}
