//! Discovery Module
//!
//! Resolves binding resources: the loader capability, a directory-backed
//! loader built on walkdir, and the auto-include work-list that pulls in
//! binding libraries the first time one of their elements shows up.

use indexmap::IndexSet;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::parse::parse_document;
use crate::registry::{bindings_from_document, BindingRegistry};
use crate::tree::{Document, Element, QName};
use crate::validate::{CompilerError, INV_INCLUDE_WITHOUT_BINDINGS, INV_RESOURCE};

// ═══════════════════════════════════════════════════════════════════════════════
// RESOURCE LOADING
// ═══════════════════════════════════════════════════════════════════════════════

pub trait ResourceLoader {
    fn load(&self, uri: &str) -> Result<Document, CompilerError>;

    /// Milliseconds since the epoch, when known.
    fn last_modified(&self, uri: &str) -> Option<u64>;
}

/// Loads resources from a root directory. A uri such as `/xbl/fr/tab/tab.xbl`
/// resolves to `{root}/xbl/fr/tab/tab.xbl`.
#[derive(Debug, Clone)]
pub struct FsLoader {
    root: PathBuf,
}

impl FsLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsLoader { root: root.into() }
    }

    fn resolve(&self, uri: &str) -> PathBuf {
        self.root.join(uri.trim_start_matches('/'))
    }

    /// Uris of every `.xbl` file under the root, sorted.
    pub fn discover(&self) -> Vec<String> {
        let mut uris: Vec<String> = find_xbl_files(&self.root)
            .into_iter()
            .filter_map(|path| {
                path.strip_prefix(&self.root).ok().map(|relative| {
                    let parts: Vec<String> = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().to_string())
                        .collect();
                    format!("/{}", parts.join("/"))
                })
            })
            .collect();
        uris.sort();
        uris
    }

    /// Registers every discovered resource.
    pub fn register_all(&self, registry: &BindingRegistry) -> Result<usize, CompilerError> {
        let mut added = 0;
        for uri in self.discover() {
            let path = self.resolve(&uri);
            let source = read_resource(&path, &uri)?;
            added += registry.register_source(&uri, &source, self.last_modified(&uri))?;
        }
        Ok(added)
    }
}

fn read_resource(path: &Path, uri: &str) -> Result<String, CompilerError> {
    fs::read_to_string(path).map_err(|e| {
        CompilerError::with_details(
            INV_RESOURCE,
            &format!("Failed to read resource: {}", e),
            Some(uri.to_string()),
            vec![],
        )
    })
}

impl ResourceLoader for FsLoader {
    fn load(&self, uri: &str) -> Result<Document, CompilerError> {
        let source = read_resource(&self.resolve(uri), uri)?;
        parse_document(&source, Some(uri))
    }

    fn last_modified(&self, uri: &str) -> Option<u64> {
        let modified = fs::metadata(self.resolve(uri)).ok()?.modified().ok()?;
        let since_epoch = modified.duration_since(UNIX_EPOCH).ok()?;
        Some(since_epoch.as_millis() as u64)
    }
}

/// Recursively find all .xbl files in a directory
pub fn find_xbl_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .map(|entry| entry.into_path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "xbl"))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// AUTO-INCLUDES
// ═══════════════════════════════════════════════════════════════════════════════

/// Maps element names to the binding library that declares them.
#[derive(Debug, Clone)]
pub struct AutoIncludes {
    mappings: BTreeMap<String, String>,
    base: String,
}

impl AutoIncludes {
    pub fn new(mappings: BTreeMap<String, String>, base: &str) -> Self {
        AutoIncludes {
            mappings,
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// `fr:tabview` with `fr` mapped -> `{base}/fr/tabview/tabview.xbl`.
    pub fn include_path(&self, name: &QName) -> Option<String> {
        let (prefix, _) = self
            .mappings
            .iter()
            .find(|(_, uri)| **uri == name.namespace)?;
        Some(format!(
            "{}/{}/{}/{}.xbl",
            self.base, prefix, name.local, name.local
        ))
    }

    /// Include paths for every unbound element in `root`, in document order.
    pub fn requests(&self, root: &Element, registry: &BindingRegistry) -> Vec<String> {
        let snapshot = registry.snapshot();
        let mut paths = IndexSet::new();
        for element in root.descendants_or_self() {
            if snapshot.contains(&element.name) {
                continue;
            }
            if let Some(path) = self.include_path(&element.name) {
                paths.insert(path);
            }
        }
        paths.into_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

/// Loads includes until no new ones are requested.
///
/// Every path is loaded at most once per `visited` set. Each load must bind at
/// least one new element name. Templates of the newly loaded bindings are
/// scanned for further includes. Returns the uris loaded by this call.
pub fn resolve_includes(
    roots: &[&Element],
    includes: &AutoIncludes,
    registry: &BindingRegistry,
    loader: &dyn ResourceLoader,
    visited: &mut IndexSet<String>,
) -> Result<Vec<String>, CompilerError> {
    if includes.is_empty() {
        return Ok(vec![]);
    }

    let mut work_list: Vec<String> = roots
        .iter()
        .flat_map(|root| includes.requests(root, registry))
        .collect();
    work_list.reverse();

    let mut loaded = Vec::new();
    while let Some(uri) = work_list.pop() {
        if !visited.insert(uri.clone()) {
            debug!(uri = %uri, "Include already processed, skipping");
            continue;
        }

        let doc = loader.load(&uri)?;
        let before = registry.binding_count();
        registry.register_with_timestamp(&doc, loader.last_modified(&uri))?;
        if registry.binding_count() <= before {
            return Err(CompilerError::with_details(
                INV_INCLUDE_WITHOUT_BINDINGS,
                &format!("Auto-included resource {} did not add any binding.", uri),
                Some(uri.clone()),
                vec!["Check that the resource declares the binding for the element that requested it.".to_string()],
            ));
        }
        info!(uri = %uri, bindings = registry.binding_count(), "Loaded auto-included bindings");
        loaded.push(uri);

        let mut next = Vec::new();
        for binding in bindings_from_document(&doc) {
            if let Some(template) = &binding.template {
                next.extend(includes.requests(template, registry));
            }
        }
        work_list.extend(next.into_iter().rev());
    }

    Ok(loaded)
}
