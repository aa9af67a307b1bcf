//! Finalize Module
//!
//! Summarizes a finished analysis session for the page assembly layer: which
//! components were instantiated, and the styles and scripts they need.

use serde::{Deserialize, Serialize};

use crate::analysis::PartAnalysis;
use crate::registry::BindingResource;
use crate::validate::CompilerError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentEntry {
    pub prefixed_id: String,
    pub binding_id: String,
    pub container_element: String,
    /// Qualified name of the bound element.
    pub element_name: String,
    /// Scope id of the component's inner scope.
    pub inner_scope: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisManifest {
    pub components: Vec<ComponentEntry>,
    pub styles: Vec<BindingResource>,
    pub scripts: Vec<BindingResource>,
    pub bindings_last_modified: Option<u64>,
    pub includes: Vec<String>,
}

impl AnalysisManifest {
    pub fn to_json(&self) -> Result<String, CompilerError> {
        serde_json::to_string_pretty(self).map_err(|e| {
            CompilerError::new(
                crate::validate::INV_RESOURCE,
                &format!("Cannot serialize manifest: {}", e),
            )
        })
    }
}

/// Components are listed in the order they were first expanded.
pub fn build_manifest(analysis: &PartAnalysis) -> AnalysisManifest {
    let scopes = analysis.scopes();
    let components = analysis
        .concrete_bindings()
        .map(|c| ComponentEntry {
            prefixed_id: c.bound_prefixed_id.clone(),
            binding_id: c.binding_id.clone(),
            container_element: c.container_element_name.clone(),
            element_name: c.binding.element_name.qualified(),
            inner_scope: scopes.scope_id(c.inner_scope).unwrap_or_default().to_string(),
        })
        .collect();

    AnalysisManifest {
        components,
        styles: analysis.styles(),
        scripts: analysis.scripts(),
        bindings_last_modified: analysis.registry().bindings_last_modified(),
        includes: analysis.loaded_includes().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisOptions;
    use crate::parse::parse_document;
    use crate::registry::BindingRegistry;

    const BINDINGS: &str = r#"<xbl:xbl xmlns:xbl="http://www.w3.org/ns/xbl" xmlns:fr="urn:fr" xmlns:xxbl="http://orbeon.org/oxf/xml/xbl">
        <xbl:script src="/fr/common.js"/>
        <xbl:binding id="fr-foo" element="fr|foo" xxbl:container="span">
            <xbl:resources><xbl:style src="/fr/foo.css"/></xbl:resources>
            <xbl:template><input id="field"/></xbl:template>
        </xbl:binding>
    </xbl:xbl>"#;

    #[test]
    fn test_manifest_lists_components_and_resources() {
        let registry = BindingRegistry::default();
        registry
            .register(&parse_document(BINDINGS, Some("/xbl/fr/foo.xbl")).unwrap())
            .unwrap();
        let host = parse_document(
            r#"<html xmlns:fr="urn:fr"><body><fr:foo id="a"/><fr:foo id="b"/></body></html>"#,
            None,
        )
        .unwrap();

        let mut analysis = PartAnalysis::new(&registry, AnalysisOptions::default());
        analysis.analyze(&host).unwrap();
        let manifest = build_manifest(&analysis);

        let ids: Vec<&str> = manifest
            .components
            .iter()
            .map(|c| c.prefixed_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(manifest.components[0].container_element, "span");
        assert_eq!(manifest.components[0].inner_scope, "a");
        assert_eq!(manifest.styles.len(), 1);
        assert_eq!(manifest.scripts[0].src.as_deref(), Some("/fr/common.js"));

        let json = manifest.to_json().unwrap();
        assert!(json.contains("\"prefixedId\": \"a\""));
        assert!(json.contains("\"bindingsLastModified\""));
    }
}
