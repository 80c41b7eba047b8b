//! Capability-scoped artifact loader.
//!
//! All artifact access during one expansion call goes through an
//! [`ArtifactLoader`] built from the caller's tables. There is no fallback to
//! the filesystem or network: a path missing from the active table is an
//! `UnavailableArtifactError`.
//!
//! Hierarchical script modules are addressed by dotted names. For every
//! `a/b/c.py` in a table, placeholder packages `a` and `a.b` are synthesized
//! so `a`, `a.b` and `a.b.c` each resolve independently.
//!
//! Each composite type gets its own isolated scope. Switching scope drops the
//! registry of loaded modules, so helpers of one composite type never leak
//! into another.

use super::error::ExpansionError;
use super::types::{
    ArtifactTable, CompositeType, PathOverrides, SCRIPT_SUFFIX, TEXT_TEMPLATE_SUFFIX,
};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Separator of hierarchical module names.
pub const MODULE_SEPARATOR: char = '.';

/// One isolated artifact scope.
#[derive(Debug, Clone, Default)]
struct Scope {
    /// Caller-supplied artifacts, unmodified.
    raw: Arc<ArtifactTable>,
    /// Artifacts plus synthesized package placeholders.
    files: ArtifactTable,
    /// Package name → child segment names.
    parents: IndexMap<String, Vec<String>>,
    path_overrides: PathOverrides,
}

impl Scope {
    fn build(artifacts: &ArtifactTable, path_overrides: &PathOverrides) -> Self {
        let (files, parents) = synthesize_packages(artifacts);
        Self {
            raw: Arc::new(artifacts.clone()),
            files,
            parents,
            path_overrides: path_overrides.clone(),
        }
    }
}

/// Copy `artifacts` and add placeholder entries for every parent package of a
/// hierarchical path, recording parent → child relationships.
///
/// `helpers/extra/common.py` yields `helpers.py` and `helpers/extra.py`
/// placeholders plus `helpers → [extra]`, `helpers.extra → [common]`.
fn synthesize_packages(
    artifacts: &ArtifactTable,
) -> (ArtifactTable, IndexMap<String, Vec<String>>) {
    let mut files = artifacts.clone();
    let mut parents: IndexMap<String, Vec<String>> = IndexMap::new();

    for path in artifacts.keys() {
        if path.ends_with(TEXT_TEMPLATE_SUFFIX) {
            continue;
        }
        let normalized = normalize(path);
        let stem = strip_extension(&normalized);
        let parts: Vec<&str> = stem.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() < 2 {
            continue;
        }

        for i in 0..parts.len() - 1 {
            let package_path = parts[..=i].join("/");
            let package_file = format!("{}{}", package_path, SCRIPT_SUFFIX);
            if !files.contains_key(&package_file) {
                let init = format!("{}/__init__{}", package_path, SCRIPT_SUFFIX);
                let body = artifacts
                    .get(&init)
                    .or_else(|| artifacts.get(&package_path))
                    .cloned()
                    .unwrap_or_default();
                files.insert(package_file, body);
            }

            let package_name = parts[..=i].join(".");
            let children = parents.entry(package_name).or_default();
            let child = parts[i + 1].to_string();
            if child != "__init__" && !children.contains(&child) {
                children.push(child);
            }
        }
    }

    (files, parents)
}

fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut out: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            p => out.push(p),
        }
    }
    out.join("/")
}

fn strip_extension(path: &str) -> &str {
    let file_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[file_start..].rfind('.') {
        Some(dot) if dot > 0 => &path[..file_start + dot],
        _ => path,
    }
}

/// Artifact path of a dotted module name.
pub fn module_file(name: &str) -> String {
    format!("{}{}", name.replace(MODULE_SEPARATOR, "/"), SCRIPT_SUFFIX)
}

/// A resolved script module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Dotted module name.
    pub name: String,
    /// Artifact path the source came from.
    pub path: String,
    /// Source text; empty for synthesized packages.
    pub source: String,
    /// Child segment names, non-empty for packages.
    pub children: Vec<String>,
}

impl Module {
    pub fn is_package(&self) -> bool {
        !self.children.is_empty()
    }
}

/// Per-call artifact loader.
///
/// Owned by exactly one expansion call; never shared across calls.
#[derive(Debug, Clone, Default)]
pub struct ArtifactLoader {
    ambient: Scope,
    composites: BTreeMap<String, Scope>,
    context: Option<String>,
    registry: IndexMap<String, Module>,
}

impl ArtifactLoader {
    /// Build a loader over the ambient table and one isolated table per
    /// composite type.
    pub fn new(
        artifacts: &ArtifactTable,
        path_overrides: &PathOverrides,
        composite_types: &BTreeMap<String, CompositeType>,
    ) -> Self {
        let composites = composite_types
            .iter()
            .map(|(id, ct)| (id.clone(), Scope::build(&ct.artifacts, &ct.path_overrides)))
            .collect();
        Self {
            ambient: Scope::build(artifacts, path_overrides),
            composites,
            context: None,
            registry: IndexMap::new(),
        }
    }

    /// Active composite-type context, `None` for the ambient scope.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Switch composite-type context. Changing context drops every module
    /// registered under the previous one.
    pub fn enter_context(&mut self, context: Option<&str>) {
        if self.context.as_deref() == context {
            return;
        }
        if !self.registry.is_empty() {
            tracing::debug!(
                from = ?self.context,
                to = ?context,
                dropped = self.registry.len(),
                "switching artifact scope"
            );
        }
        self.registry.clear();
        self.context = context.map(str::to_string);
    }

    /// Whether `id` names a registered composite type.
    pub fn is_composite(&self, id: &str) -> bool {
        self.composites.contains_key(id)
    }

    fn scope(&self) -> &Scope {
        self.context
            .as_deref()
            .and_then(|c| self.composites.get(c))
            .unwrap_or(&self.ambient)
    }

    /// Whether `path` is a caller-supplied artifact of the active scope.
    /// Synthesized package placeholders do not count.
    pub fn contains(&self, path: &str) -> bool {
        self.scope().raw.contains_key(path)
    }

    /// Source text of `path` in the active scope.
    pub fn resolve(&self, path: &str) -> Result<&str, ExpansionError> {
        self.scope()
            .files
            .get(path)
            .map(String::as_str)
            .ok_or_else(|| ExpansionError::unavailable_artifact(path))
    }

    /// Caller-supplied source text of `path` in the active scope.
    pub fn source(&self, path: &str) -> Option<&str> {
        self.scope().raw.get(path).map(String::as_str)
    }

    /// Caller-supplied artifacts of the active scope.
    pub fn artifacts(&self) -> Arc<ArtifactTable> {
        Arc::clone(&self.scope().raw)
    }

    /// Path overrides of the active scope.
    pub fn path_overrides(&self) -> &PathOverrides {
        &self.scope().path_overrides
    }

    /// Artifact path for a type string, after path overrides.
    pub fn type_path<'a>(&'a self, type_name: &'a str) -> &'a str {
        self.path_overrides()
            .get(type_name)
            .map_or(type_name, String::as_str)
    }

    /// Whether `name` is a package (has child modules).
    pub fn is_package(&self, name: &str) -> bool {
        self.scope().parents.contains_key(name)
    }

    /// Names of modules loaded in the current context, in load order.
    pub fn loaded(&self) -> impl Iterator<Item = &str> {
        self.registry.keys().map(String::as_str)
    }

    /// Import a dotted module name, loading each parent package first.
    pub fn import(&mut self, name: &str) -> Result<Module, ExpansionError> {
        let parts: Vec<&str> = name.split(MODULE_SEPARATOR).collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(ExpansionError::unavailable_artifact(name));
        }
        let mut module = None;
        for i in 0..parts.len() {
            let prefix = parts[..=i].join(".");
            module = Some(self.load_module(&prefix)?);
        }
        module.ok_or_else(|| ExpansionError::unavailable_artifact(name))
    }

    /// Import `child` of an already-loaded package.
    pub fn import_child(&mut self, parent: &Module, child: &str) -> Result<Module, ExpansionError> {
        if !parent.children.iter().any(|c| c == child) {
            return Err(ExpansionError::unavailable_artifact(&format!(
                "{}.{}",
                parent.name, child
            )));
        }
        self.load_module(&format!("{}.{}", parent.name, child))
    }

    fn load_module(&mut self, name: &str) -> Result<Module, ExpansionError> {
        if let Some(module) = self.registry.get(name) {
            return Ok(module.clone());
        }
        let path = module_file(name);
        let scope = self.scope();
        let source = scope
            .files
            .get(&path)
            .ok_or_else(|| ExpansionError::unavailable_artifact(&path))?
            .clone();
        let children = scope.parents.get(name).cloned().unwrap_or_default();

        tracing::debug!(module = name, path = %path, "loading module");
        let module = Module {
            name: name.to_string(),
            path,
            source,
            children,
        };
        self.registry.insert(name.to_string(), module.clone());
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    fn table(entries: &[(&str, &str)]) -> ArtifactTable {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn loader(entries: &[(&str, &str)]) -> ArtifactLoader {
        ArtifactLoader::new(&table(entries), &PathOverrides::new(), &BTreeMap::new())
    }

    #[test]
    fn test_synthesizes_parent_packages() {
        let (files, parents) =
            synthesize_packages(&table(&[("helpers/extra/common.py", "X = 1\n")]));
        assert_eq!(files["helpers.py"], "");
        assert_eq!(files["helpers/extra.py"], "");
        assert_eq!(parents["helpers"], vec!["extra"]);
        assert_eq!(parents["helpers.extra"], vec!["common"]);
    }

    #[test]
    fn test_package_keeps_user_init() {
        let (files, _) = synthesize_packages(&table(&[
            ("lib/__init__.py", "VERSION = 2\n"),
            ("lib/net.py", "def f(): pass\n"),
        ]));
        assert_eq!(files["lib.py"], "VERSION = 2\n");
    }

    #[test]
    fn test_jinja_paths_do_not_create_packages() {
        let (files, parents) = synthesize_packages(&table(&[("tmpl/net.jinja", "")]));
        assert!(!files.contains_key("tmpl.py"));
        assert!(parents.is_empty());
    }

    #[test]
    fn test_import_resolves_each_level() {
        let mut l = loader(&[("a/b/c.py", "C = 3\n")]);
        let c = l.import("a.b.c").unwrap();
        assert_eq!(c.source, "C = 3\n");
        assert!(!c.is_package());
        assert_eq!(l.loaded().collect::<Vec<_>>(), vec!["a", "a.b", "a.b.c"]);

        let a = l.import("a").unwrap();
        assert!(a.is_package());
        let ab = l.import_child(&a, "b").unwrap();
        assert_eq!(ab.children, vec!["c"]);
    }

    #[test]
    fn test_import_missing_is_unavailable() {
        let mut l = loader(&[("a/b.py", "")]);
        let err = l.import("a.zzz").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnavailableArtifact);
        assert_eq!(err.resource, "a/zzz.py");

        let a = l.import("a").unwrap();
        assert!(l.import_child(&a, "nope").is_err());
    }

    #[test]
    fn test_resolve_is_isolated() {
        let l = loader(&[("t.jinja", "resources: []")]);
        assert_eq!(l.resolve("t.jinja").unwrap(), "resources: []");
        let err = l.resolve("/etc/passwd").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnavailableArtifact);
    }

    #[test]
    fn test_composite_scope_isolation() {
        let mut composites = BTreeMap::new();
        composites.insert(
            "ct-a".to_string(),
            CompositeType {
                artifacts: table(&[("helpers/util.py", "A")]),
                path_overrides: PathOverrides::new(),
            },
        );
        composites.insert(
            "ct-b".to_string(),
            CompositeType {
                artifacts: table(&[("helpers/util.py", "B")]),
                path_overrides: PathOverrides::new(),
            },
        );
        let mut l = ArtifactLoader::new(&ArtifactTable::new(), &PathOverrides::new(), &composites);

        assert!(l.import("helpers.util").is_err());

        l.enter_context(Some("ct-a"));
        assert_eq!(l.import("helpers.util").unwrap().source, "A");
        assert_eq!(l.loaded().count(), 2);

        l.enter_context(Some("ct-b"));
        assert_eq!(l.loaded().count(), 0);
        assert_eq!(l.import("helpers.util").unwrap().source, "B");

        assert!(l.contains("helpers/util.py"));
        assert!(!l.contains("helpers.py"));
        assert!(l.resolve("helpers.py").is_ok());

        l.enter_context(None);
        assert!(!l.contains("helpers/util.py"));
    }

    #[test]
    fn test_type_path_override() {
        let mut overrides = PathOverrides::new();
        overrides.insert("my-type".into(), "templates/my.jinja".into());
        let l = ArtifactLoader::new(&ArtifactTable::new(), &overrides, &BTreeMap::new());
        assert_eq!(l.type_path("my-type"), "templates/my.jinja");
        assert_eq!(l.type_path("other"), "other");
    }

    #[test]
    fn test_normalize_and_strip() {
        assert_eq!(normalize("./a//b/../c.py"), "a/c.py");
        assert_eq!(normalize("a\\b.py"), "a/b.py");
        assert_eq!(strip_extension("a/b.py"), "a/b");
        assert_eq!(strip_extension("a.dir/b"), "a.dir/b");
    }
}
