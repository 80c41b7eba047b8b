//! Name binding.
//!
//! Every resource is bound to a qualified name `<scope>/<name>`, where the
//! scope is the qualified name of the template that declared it (`config` at
//! the root). Names must be unique among siblings. Reference expressions
//! naming a sibling are rewritten to carry the sibling's qualified name.

use super::error::ExpansionError;
use super::references::{rewrite_value, Reference, Replacement, QUALIFIED_SEPARATOR};
use super::types::Resource;
use indexmap::IndexMap;
use serde_yaml_ng::Value;
use std::collections::BTreeSet;

/// Qualified name of the root scope.
pub const ROOT_SCOPE: &str = "config";

/// Qualified name of `name` declared in `scope`.
pub fn qualify(scope: &str, name: &str) -> String {
    format!("{}{}{}", scope, QUALIFIED_SEPARATOR, name)
}

/// Qualified name of `name` if it is a sibling, else `name` unchanged.
pub fn bind_name(name: &str, scope: &str, siblings: &BTreeSet<String>) -> String {
    if siblings.contains(name) {
        qualify(scope, name)
    } else {
        name.to_string()
    }
}

/// Check sibling names are unique and return them.
///
/// Fails on the first repeated name.
pub fn bind_scope(resources: &[Resource], scope: &str) -> Result<BTreeSet<String>, ExpansionError> {
    let mut names = BTreeSet::new();
    for resource in resources {
        if !names.insert(resource.name.clone()) {
            return Err(ExpansionError::duplicate_name(&resource.name, scope));
        }
    }
    Ok(names)
}

/// Rewrite sibling references inside `value`.
///
/// A reference to a sibling is bound to its qualified name. A value
/// reference to any other name is left for the output resolver. A structural
/// reference to a non-sibling is an `UnresolvedReferenceError`.
pub fn bind_value(
    value: &Value,
    owner: &str,
    scope: &str,
    siblings: &BTreeSet<String>,
) -> Result<Value, ExpansionError> {
    rewrite_value(value, &mut |r: &Reference| {
        if r.bound {
            return Ok(Replacement::Keep);
        }
        if siblings.contains(&r.target) {
            return Ok(Replacement::Text(r.qualified(&qualify(scope, &r.target)).render()));
        }
        if r.is_structural() {
            return Err(ExpansionError::unresolved_reference(owner, &r.render()));
        }
        Ok(Replacement::Keep)
    })
}

/// Bind references in a resource's `properties` and `metadata`.
pub fn bind_references(
    resource: &Resource,
    scope: &str,
    siblings: &BTreeSet<String>,
) -> Result<Resource, ExpansionError> {
    let bind = |section: &Option<Value>| -> Result<Option<Value>, ExpansionError> {
        section
            .as_ref()
            .map(|v| bind_value(v, &resource.name, scope, siblings))
            .transpose()
    };
    Ok(Resource {
        name: resource.name.clone(),
        kind: resource.kind.clone(),
        properties: bind(&resource.properties)?,
        metadata: bind(&resource.metadata)?,
        extra: resource.extra.clone(),
    })
}

/// How a qualified name was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// Emitted as-is.
    Terminal,
    /// Expanded from a template artifact.
    Template,
    /// Template-suffixed type absent from the artifacts; left for a later pass.
    External,
}

/// Qualified name → binding kind, filled in as resources are processed.
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    entries: IndexMap<String, BindingKind>,
}

impl BindingTable {
    pub fn record(&mut self, qualified: &str, kind: BindingKind) {
        self.entries.insert(qualified.to_string(), kind);
    }

    pub fn get(&self, qualified: &str) -> Option<BindingKind> {
        self.entries.get(qualified).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
