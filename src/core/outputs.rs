//! Output resolution.
//!
//! Once a template's children are fully expanded, their declared outputs are
//! collected into an [`OutputMap`] keyed by qualified name (phase A). Bound
//! value references in the template's scope are then replaced by the
//! referenced output's final value (phase B).

use super::binder::{bind_name, BindingKind, BindingTable};
use super::error::ExpansionError;
use super::references::{navigate, rewrite_value, PathSegment, Reference, Replacement};
use super::types::{LayoutNode, Output, Resource};
use indexmap::IndexMap;
use serde_yaml_ng::Value;
use std::collections::BTreeSet;

/// Qualified name → output name → final value.
pub type OutputMap = IndexMap<String, IndexMap<String, Value>>;

/// Collect the outputs declared by `children`, declared in `scope`.
pub fn build_output_map(
    children: &[LayoutNode],
    scope: &str,
    siblings: &BTreeSet<String>,
) -> OutputMap {
    let mut map = OutputMap::new();
    for child in children {
        let Some(outputs) = &child.outputs else {
            continue;
        };
        let values = outputs
            .iter()
            .map(|o| (o.name.clone(), o.resolved().clone()))
            .collect();
        map.insert(bind_name(&child.name, scope, siblings), values);
    }
    map
}

/// Substitute references between the outputs in `map` that are bound in
/// `scope`, until none are left or a cycle keeps them from settling.
pub fn settle_output_map(
    mut map: OutputMap,
    scope: &str,
    bindings: &BindingTable,
) -> Result<OutputMap, ExpansionError> {
    for _ in 0..=map.len() {
        let next = {
            let resolver = OutputResolver::new(scope, &map, bindings);
            let mut next = OutputMap::with_capacity(map.len());
            for (target, values) in &map {
                let mut settled = IndexMap::with_capacity(values.len());
                for (name, value) in values {
                    settled.insert(name.clone(), resolver.populate(value)?);
                }
                next.insert(target.clone(), settled);
            }
            next
        };
        if next == map {
            break;
        }
        map = next;
    }
    Ok(map)
}

/// Write the settled values of `map` back into the final values of the
/// matching child outputs.
pub fn apply_output_map(
    children: &mut [LayoutNode],
    map: &OutputMap,
    scope: &str,
    siblings: &BTreeSet<String>,
) {
    for child in children {
        let Some(values) = map.get(&bind_name(&child.name, scope, siblings)) else {
            continue;
        };
        for output in child.outputs.iter_mut().flatten() {
            if let Some(value) = values.get(&output.name) {
                output.final_value = Some(value.clone());
            }
        }
    }
}

/// Substitutes bound value references of one scope.
#[derive(Debug, Clone, Copy)]
pub struct OutputResolver<'a> {
    scope: &'a str,
    outputs: &'a OutputMap,
    bindings: &'a BindingTable,
}

impl<'a> OutputResolver<'a> {
    pub fn new(scope: &'a str, outputs: &'a OutputMap, bindings: &'a BindingTable) -> Self {
        Self {
            scope,
            outputs,
            bindings,
        }
    }

    /// Replace every value reference bound in this scope inside `value`.
    ///
    /// References bound in other scopes, structural references and references
    /// to emitted resources without declared outputs pass through.
    pub fn populate(&self, value: &Value) -> Result<Value, ExpansionError> {
        rewrite_value(value, &mut |r: &Reference| self.lookup(r))
    }

    fn lookup(&self, r: &Reference) -> Result<Replacement, ExpansionError> {
        if !r.bound || r.is_structural() || r.scope_and_name().0 != self.scope {
            return Ok(Replacement::Keep);
        }
        let short = r.short().render();

        let Some(values) = self.outputs.get(&r.target) else {
            return match self.bindings.get(&r.target) {
                Some(BindingKind::Template) => Err(ExpansionError::referenced_resource_not_found(
                    &r.target,
                    format!(
                        "Reference {} names a template that declares no outputs.",
                        short
                    ),
                )),
                _ => Ok(Replacement::Keep),
            };
        };

        let segments = r.segments();
        let found = match segments.split_first() {
            Some((PathSegment::Key(output), rest)) => values
                .get(output.as_str())
                .and_then(|v| navigate(v, rest)),
            _ => None,
        };
        match found {
            Some(v) => Ok(Replacement::Value(v.clone())),
            None => Err(ExpansionError::referenced_resource_not_found(
                &r.target,
                format!("Reference {} does not name a declared output.", short),
            )),
        }
    }

    /// Set each output's final value: its current final value (or declared
    /// value) with references substituted.
    pub fn resolve_outputs(&self, outputs: &[Output]) -> Result<Vec<Output>, ExpansionError> {
        outputs
            .iter()
            .map(|o| {
                Ok(Output {
                    name: o.name.clone(),
                    value: o.value.clone(),
                    final_value: Some(self.populate(o.resolved())?),
                })
            })
            .collect()
    }

    /// Substitute references in the `properties` and `metadata` of
    /// `resources`.
    pub fn resolve_resources(
        &self,
        resources: &[Resource],
    ) -> Result<Vec<Resource>, ExpansionError> {
        resources
            .iter()
            .map(|r| {
                let populate = |section: &Option<Value>| -> Result<Option<Value>, ExpansionError> {
                    section.as_ref().map(|v| self.populate(v)).transpose()
                };
                Ok(Resource {
                    name: r.name.clone(),
                    kind: r.kind.clone(),
                    properties: populate(&r.properties)?,
                    metadata: populate(&r.metadata)?,
                    extra: r.extra.clone(),
                })
            })
            .collect()
    }
}
