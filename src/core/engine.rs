//! Expansion entry point.
//!
//! Drives the depth-first traversal: bind a scope, expand each template,
//! recurse into its children, resolve outputs once a template's subtree is
//! complete, and fold the result into the previous layout. Each call owns its
//! loader and binding table; nothing is shared between calls.

use super::binder::{
    bind_references, bind_scope, bind_value, qualify, BindingKind, BindingTable, ROOT_SCOPE,
};
use super::error::{ErrorKind, ExpansionError};
use super::expander::{expand_template, is_expandable, is_external_template};
use super::layout::merge_node;
use super::loader::ArtifactLoader;
use super::outputs::{apply_output_map, build_output_map, settle_output_map, OutputResolver};
use super::references::clean_bound;
use super::script::{DisabledScripts, ScriptRunner};
use super::types::{
    ArtifactTable, Env, ExpandOptions, ExpandedConfig, Layout, LayoutNode, Manifest, Output,
    Resource,
};
use serde_yaml_ng::Value;
use std::collections::BTreeSet;

/// Env key that turns on layout identifiers.
pub const ADD_LAYOUT_ID_KEY: &str = "ADD_LAYOUT_ID";

/// Expand `raw` and serialize the manifest as YAML.
pub fn expand(
    raw: &str,
    artifacts: &ArtifactTable,
    env: &Env,
    previous_layout: Option<&str>,
    options: &ExpandOptions,
) -> Result<String, ExpansionError> {
    expand_to_manifest(raw, artifacts, env, previous_layout, options)?
        .to_yaml()
        .map_err(|e| ExpansionError::new(ErrorKind::InvalidConfig, ROOT_SCOPE, e))
}

/// Expand `raw` with script templates disabled.
pub fn expand_to_manifest(
    raw: &str,
    artifacts: &ArtifactTable,
    env: &Env,
    previous_layout: Option<&str>,
    options: &ExpandOptions,
) -> Result<Manifest, ExpansionError> {
    expand_with_scripts(raw, artifacts, env, previous_layout, options, &DisabledScripts)
}

/// Expand `raw`, running script templates through `scripts`.
pub fn expand_with_scripts(
    raw: &str,
    artifacts: &ArtifactTable,
    env: &Env,
    previous_layout: Option<&str>,
    options: &ExpandOptions,
    scripts: &dyn ScriptRunner,
) -> Result<Manifest, ExpansionError> {
    let Some(document) = parse_config(raw)? else {
        return Ok(Manifest::empty());
    };
    let resources = Resource::list_from_value(document.get("resources"))?;
    let previous = previous_layout.map(parse_layout).transpose()?;
    let merging = previous.is_some();

    let mut expansion = Expansion {
        loader: ArtifactLoader::new(artifacts, &options.path_overrides, &options.composite_types),
        env,
        options,
        scripts,
        bindings: BindingTable::default(),
        add_ids: env.contains_key(ADD_LAYOUT_ID_KEY),
    };

    let names = bind_scope(&resources, ROOT_SCOPE)?;
    let mut layout = previous.unwrap_or_default();
    let mut config = Vec::new();

    for resource in &resources {
        let processed = expansion.process_resource(resource, ROOT_SCOPE, &names, None, 0)?;
        config.extend(processed.resources);
        let siblings = layout.resources.get_or_insert_with(Vec::new);
        if merging {
            merge_node(siblings, processed.layout, expansion.add_ids);
        } else {
            siblings.push(processed.layout);
        }
    }

    expansion.process_target_config(
        document.get("outputs"),
        &mut config,
        &mut layout.outputs,
        layout.resources.as_deref_mut().unwrap_or_default(),
        ROOT_SCOPE,
        &names,
    )?;

    tracing::info!(
        resources = config.len(),
        layout_nodes = count_nodes(layout.children()),
        templates = expansion.bindings.len(),
        "expansion complete"
    );

    Ok(Manifest {
        config: ExpandedConfig {
            resources: Some(config.iter().map(clean_resource).collect()),
        },
        layout: clean_layout(layout),
    })
}

/// Parse the root document. `None` for empty input.
fn parse_config(raw: &str) -> Result<Option<serde_yaml_ng::Mapping>, ExpansionError> {
    let mut document = parse_document(raw)?;
    if let Value::String(inner) = &document {
        document = parse_document(inner)?;
    }
    match document {
        Value::Null => Ok(None),
        Value::Mapping(map) => Ok(Some(map)),
        _ => Err(ExpansionError::invalid_config("Input config must be a map")),
    }
}

fn parse_document(raw: &str) -> Result<Value, ExpansionError> {
    if raw.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_yaml_ng::from_str(raw)
        .map_err(|e| ExpansionError::invalid_config(format!("Error parsing config: {}", e)))
}

fn parse_layout(raw: &str) -> Result<Layout, ExpansionError> {
    if raw.trim().is_empty() {
        return Ok(Layout::default());
    }
    serde_yaml_ng::from_str::<Option<Layout>>(raw)
        .map(Option::unwrap_or_default)
        .map_err(|e| ExpansionError::invalid_config(format!("Error parsing layout: {}", e)))
}

struct Processed {
    resources: Vec<Resource>,
    layout: LayoutNode,
}

struct Expansion<'a> {
    loader: ArtifactLoader,
    env: &'a Env,
    options: &'a ExpandOptions,
    scripts: &'a dyn ScriptRunner,
    bindings: BindingTable,
    add_ids: bool,
}

impl Expansion<'_> {
    fn process_resource(
        &mut self,
        resource: &Resource,
        scope: &str,
        siblings: &BTreeSet<String>,
        context: Option<&str>,
        depth: usize,
    ) -> Result<Processed, ExpansionError> {
        if depth > self.options.max_depth {
            return Err(ExpansionError::resource_exhausted(
                &resource.name,
                self.options.max_depth,
            ));
        }
        self.loader.enter_context(context);

        let resource = bind_references(resource, scope, siblings)?;
        let qualified = qualify(scope, &resource.name);
        tracing::debug!(resource = %qualified, kind = %resource.kind, depth, "processing resource");

        let mut layout = LayoutNode::new(resource.name.clone(), resource.kind.clone());
        if self.add_ids {
            layout.id = Some(uuid::Uuid::new_v4().to_string());
        }

        let type_name = resource.kind.type_name();
        if !type_name.is_some_and(|t| is_expandable(t, &self.loader)) {
            if type_name.is_some_and(|t| is_external_template(t, &self.loader)) {
                self.bindings.record(&qualified, BindingKind::External);
                layout.properties.clone_from(&resource.properties);
            } else {
                self.bindings.record(&qualified, BindingKind::Terminal);
            }
            return Ok(Processed {
                resources: vec![resource],
                layout,
            });
        }

        let expanded = expand_template(
            &resource,
            &mut self.loader,
            self.env,
            self.options,
            self.scripts,
            context,
        )?;
        self.bindings.record(&qualified, BindingKind::Template);

        let children = Resource::list_from_value(Some(&expanded.resources))?;
        let child_names = bind_scope(&children, &qualified)?;
        let mut resources = Vec::new();

        for child in &children {
            let processed = self.process_resource(
                child,
                &qualified,
                &child_names,
                expanded.context.as_deref(),
                depth + 1,
            )?;
            resources.extend(processed.resources);
            layout
                .resources
                .get_or_insert_with(Vec::new)
                .push(processed.layout);
        }
        if !children.is_empty() {
            layout.properties = expanded.properties;
        }

        self.process_target_config(
            expanded.outputs.as_ref(),
            &mut resources,
            &mut layout.outputs,
            layout.resources.as_deref_mut().unwrap_or_default(),
            &qualified,
            &child_names,
        )?;

        Ok(Processed { resources, layout })
    }

    /// Resolve a completed template's outputs and the value references of
    /// its flattened resources.
    fn process_target_config(
        &self,
        outputs: Option<&Value>,
        resources: &mut Vec<Resource>,
        layout_outputs: &mut Option<Vec<Output>>,
        children: &mut [LayoutNode],
        scope: &str,
        siblings: &BTreeSet<String>,
    ) -> Result<(), ExpansionError> {
        if !self.options.process_outputs {
            return Ok(());
        }
        let map = build_output_map(children, scope, siblings);
        let map = settle_output_map(map, scope, &self.bindings)?;
        apply_output_map(children, &map, scope, siblings);
        let resolver = OutputResolver::new(scope, &map, &self.bindings);

        if let Some(declared) = outputs.filter(|v| !v.is_null()) {
            let bound = bind_value(declared, scope, scope, siblings)?;
            let list = Output::list_from_value(&bound, scope)?;
            if !list.is_empty() {
                *layout_outputs = Some(resolver.resolve_outputs(&list)?);
            }
        }
        *resources = resolver.resolve_resources(resources)?;
        Ok(())
    }
}

fn count_nodes(nodes: &[LayoutNode]) -> usize {
    nodes.iter().map(|n| 1 + count_nodes(n.children())).sum()
}

fn clean_section(section: &Option<Value>) -> Option<Value> {
    section.as_ref().map(clean_bound)
}

fn clean_resource(resource: &Resource) -> Resource {
    Resource {
        name: resource.name.clone(),
        kind: resource.kind.clone(),
        properties: clean_section(&resource.properties),
        metadata: clean_section(&resource.metadata),
        extra: resource.extra.clone(),
    }
}

fn clean_outputs(outputs: Option<Vec<Output>>) -> Option<Vec<Output>> {
    outputs.map(|list| {
        list.into_iter()
            .map(|o| Output {
                name: o.name,
                value: clean_bound(&o.value),
                final_value: o.final_value.as_ref().map(clean_bound),
            })
            .collect()
    })
}

fn clean_node(node: LayoutNode) -> LayoutNode {
    LayoutNode {
        properties: clean_section(&node.properties),
        resources: node
            .resources
            .map(|children| children.into_iter().map(clean_node).collect()),
        outputs: clean_outputs(node.outputs),
        ..node
    }
}

fn clean_layout(layout: Layout) -> Layout {
    Layout {
        resources: layout
            .resources
            .map(|children| children.into_iter().map(clean_node).collect()),
        outputs: clean_outputs(layout.outputs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::script::{GeneratorOutput, NativeScripts};
    use crate::core::types::ResourceKind;

    fn parse(yaml: &str) -> Value {
        serde_yaml_ng::from_str(yaml).unwrap()
    }

    fn table(entries: &[(&str, &str)]) -> ArtifactTable {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn outputs_on() -> ExpandOptions {
        ExpandOptions {
            process_outputs: true,
            ..Default::default()
        }
    }

    fn run(
        raw: &str,
        artifacts: &[(&str, &str)],
        options: &ExpandOptions,
    ) -> Result<Manifest, ExpansionError> {
        expand_to_manifest(raw, &table(artifacts), &Env::new(), None, options)
    }

    fn to_value(manifest: &Manifest) -> Value {
        serde_yaml_ng::to_value(manifest).unwrap()
    }

    #[test]
    fn test_terminal_only_config() {
        let m = run(
            "resources: [{name: a, type: leaf.type, properties: {x: 1}}]",
            &[],
            &ExpandOptions::default(),
        )
        .unwrap();
        let v = to_value(&m);
        assert_eq!(
            v["config"],
            parse("{resources: [{name: a, type: leaf.type, properties: {x: 1}}]}")
        );
        assert_eq!(v["layout"], parse("{resources: [{name: a, type: leaf.type}]}"));
    }

    #[test]
    fn test_terminal_sections_pass_through() {
        let input = "[{name: a, type: leaf.type, properties: {x: 1}, accessControl: {gcpIamPolicy: {bindings: [{role: roles/viewer}]}}}, {name: b, action: do.it, extraFlag: true}]";
        let m = run(&format!("resources: {}", input), &[], &ExpandOptions::default()).unwrap();
        assert_eq!(to_value(&m)["config"]["resources"], parse(input));
    }

    #[test]
    fn test_template_child_sections_pass_through() {
        let m = run(
            "resources: [{name: t, type: t.jinja}]",
            &[(
                "t.jinja",
                "resources: [{name: b, type: leaf.type, accessControl: {owner: me}}]",
            )],
            &outputs_on(),
        )
        .unwrap();
        let v = to_value(&m);
        assert_eq!(v["config"]["resources"][0]["accessControl"], parse("{owner: me}"));
    }

    #[test]
    fn test_empty_input_yields_empty_manifest() {
        for raw in ["", "   \n", "null"] {
            let yaml = expand(
                raw,
                &ArtifactTable::new(),
                &Env::new(),
                None,
                &ExpandOptions::default(),
            )
            .unwrap();
            assert_eq!(parse(&yaml), parse("{config: {}, layout: {}}"));
        }
    }

    #[test]
    fn test_no_resources_key() {
        let m = run("imports: []", &[], &ExpandOptions::default()).unwrap();
        assert!(m.resources().is_empty());
    }

    #[test]
    fn test_non_map_root() {
        let err = run("[1, 2]", &[], &ExpandOptions::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidConfig);
        assert!(err.message.contains("must be a map"));
    }

    #[test]
    fn test_unparseable_root() {
        let err = run("resources: [", &[], &ExpandOptions::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_double_encoded_config() {
        let raw = "\"resources: [{name: a, type: leaf.type}]\"";
        let m = run(raw, &[], &ExpandOptions::default()).unwrap();
        assert_eq!(m.resources()[0].name, "a");
    }

    #[test]
    fn test_template_child_nested_in_layout() {
        let m = run(
            "resources: [{name: t, type: tmpl.jinja}]",
            &[("tmpl.jinja", "resources: [{name: child, type: leaf.type}]")],
            &ExpandOptions::default(),
        )
        .unwrap();
        assert_eq!(m.resources().len(), 1);
        assert_eq!(m.resources()[0].name, "child");
        let t = &m.layout.children()[0];
        assert_eq!(t.kind, ResourceKind::Type("tmpl.jinja".into()));
        assert_eq!(t.children()[0].name, "child");
    }

    #[test]
    fn test_output_value_reference() {
        let m = run(
            r#"
resources:
  - name: a
    type: a.jinja
  - name: b
    type: leaf.type
    properties:
      value: ref(a.outputValue)
"#,
            &[(
                "a.jinja",
                "resources: []\noutputs:\n- name: outputValue\n  value: 42\n",
            )],
            &outputs_on(),
        )
        .unwrap();
        let b = &m.resources()[0];
        assert_eq!(b.name, "b");
        assert_eq!(b.properties.as_ref().unwrap()["value"], Value::from(42));
        let a = &m.layout.children()[0];
        assert_eq!(a.outputs.as_ref().unwrap()[0].final_value, Some(Value::from(42)));
    }

    #[test]
    fn test_outputs_off_leaves_references() {
        let m = run(
            "resources: [{name: a, type: a.jinja}, {name: b, type: leaf.type, properties: {v: 'ref(a.x)'}}]",
            &[("a.jinja", "resources: []\noutputs: [{name: x, value: 1}]")],
            &ExpandOptions::default(),
        )
        .unwrap();
        assert_eq!(
            m.resources()[0].properties.as_ref().unwrap()["v"],
            Value::String("ref(a.x)".into())
        );
    }

    #[test]
    fn test_undeclared_output_reference_fails() {
        let err = run(
            "resources: [{name: a, type: a.jinja}, {name: b, type: leaf.type, properties: {v: 'ref(a.nope)'}}]",
            &[("a.jinja", "resources: []\noutputs: [{name: x, value: 1}]")],
            &outputs_on(),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ReferencedResourceNotFound);

        let err = run(
            "resources: [{name: a, type: a.jinja}, {name: b, type: leaf.type, properties: {v: 'ref(a.x)'}}]",
            &[("a.jinja", "resources: []")],
            &outputs_on(),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ReferencedResourceNotFound);
    }

    #[test]
    fn test_nested_outputs_chain() {
        let m = run(
            r#"
resources:
  - name: net
    type: net.jinja
  - name: vm
    type: leaf.type
    properties:
      network: ref(net.link)
"#,
            &[
                (
                    "net.jinja",
                    "resources:\n- name: sub\n  type: sub.jinja\noutputs:\n- name: link\n  value: ref(sub.selfLink)\n",
                ),
                (
                    "sub.jinja",
                    "resources: [{name: raw, type: leaf.type}]\noutputs: [{name: selfLink, value: projects/p/networks/n}]\n",
                ),
            ],
            &outputs_on(),
        )
        .unwrap();
        let vm = m.resources().iter().find(|r| r.name == "vm").unwrap();
        assert_eq!(
            vm.properties.as_ref().unwrap()["network"],
            Value::String("projects/p/networks/n".into())
        );
        let net = &m.layout.children()[0];
        let link = &net.outputs.as_ref().unwrap()[0];
        assert_eq!(link.value, Value::String("ref(sub.selfLink)".into()));
        assert_eq!(link.final_value, Some(Value::String("projects/p/networks/n".into())));
    }

    #[test]
    fn test_output_forwarding_sibling_reference() {
        let m = run(
            r#"
resources:
  - name: a
    type: a.jinja
  - name: t
    type: t.jinja
    properties:
      ip: ref(a.ip)
  - name: c
    type: leaf.type
    properties:
      v: ref(t.x)
"#,
            &[
                ("a.jinja", "resources: []\noutputs: [{name: ip, value: 1.2.3.4}]"),
                (
                    "t.jinja",
                    "resources: [{name: inner, type: leaf.type}]\noutputs:\n- name: x\n  value: {{ properties['ip'] }}\n",
                ),
            ],
            &outputs_on(),
        )
        .unwrap();
        let c = m.resources().iter().find(|r| r.name == "c").unwrap();
        assert_eq!(
            c.properties.as_ref().unwrap()["v"],
            Value::String("1.2.3.4".into())
        );
        let t = &m.layout.children()[1];
        let x = &t.outputs.as_ref().unwrap()[0];
        assert_eq!(x.final_value, Some(Value::String("1.2.3.4".into())));
    }

    #[test]
    fn test_terminal_value_reference_passes_through() {
        let m = run(
            "resources: [{name: disk, type: leaf.type}, {name: vm, type: leaf.type, properties: {d: 'ref(disk.selfLink)', dep: 'ref(disk)'}}]",
            &[],
            &outputs_on(),
        )
        .unwrap();
        let props = m.resources()[1].properties.as_ref().unwrap();
        assert_eq!(props["d"], Value::String("ref(disk.selfLink)".into()));
        assert_eq!(props["dep"], Value::String("ref(disk)".into()));
    }

    #[test]
    fn test_duplicate_names() {
        let err = run(
            "resources: [{name: a, type: x}, {name: a, type: y}]",
            &[],
            &ExpandOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateName);

        let err = run(
            "resources: [{name: t, type: t.jinja}]",
            &[("t.jinja", "resources: [{name: c, type: x}, {name: c, type: x}]")],
            &ExpandOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateName);
        assert!(err.message.contains("config/t"));
    }

    #[test]
    fn test_unresolved_structural_reference() {
        let err = run(
            "resources: [{name: a, type: x, metadata: {dependsOn: ['ref(ghost)']}}]",
            &[],
            &ExpandOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnresolvedReference);
    }

    #[test]
    fn test_external_template_passes_through() {
        let m = run(
            "resources: [{name: e, type: remote.jinja, properties: {p: 1}}]",
            &[],
            &ExpandOptions::default(),
        )
        .unwrap();
        assert_eq!(m.resources()[0].name, "e");
        let node = &m.layout.children()[0];
        assert_eq!(node.properties, Some(parse("{p: 1}")));
    }

    #[test]
    fn test_recursion_limit_is_fatal() {
        let options = ExpandOptions {
            max_depth: 8,
            ..Default::default()
        };
        let err = run(
            "resources: [{name: r, type: loop.jinja}]",
            &[("loop.jinja", "resources: [{name: r, type: loop.jinja}]")],
            &options,
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResourceExhausted);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_idempotent() {
        let raw = "resources: [{name: t, type: t.jinja, properties: {n: 2}}, {name: z, type: leaf.type}]";
        let artifacts = table(&[(
            "t.jinja",
            "resources:\n{% for i in range(properties['n']) %}\n- name: vm-{{ i }}\n  type: leaf.type\n{% endfor %}\n",
        )]);
        let first = expand(raw, &artifacts, &Env::new(), None, &outputs_on()).unwrap();
        for _ in 0..3 {
            assert_eq!(expand(raw, &artifacts, &Env::new(), None, &outputs_on()).unwrap(), first);
        }
        assert!(first.contains("vm-1"));
    }

    #[test]
    fn test_layout_ids_and_previous_layout() {
        let mut env = Env::new();
        env.insert(ADD_LAYOUT_ID_KEY.into(), "true".into());
        let raw = "resources: [{name: a, type: leaf.type}, {name: b, type: leaf.type}]";
        let previous = "resources: [{name: a, type: leaf.type, id: keep-me}, {name: b, type: other.type, id: old-b}]";
        let m = expand_to_manifest(
            raw,
            &ArtifactTable::new(),
            &env,
            Some(previous),
            &ExpandOptions::default(),
        )
        .unwrap();
        let nodes = m.layout.children();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].id.as_deref(), Some("keep-me"));
        let new_b = &nodes[2];
        assert_eq!(new_b.kind, ResourceKind::Type("leaf.type".into()));
        assert!(new_b.id.is_some());
        assert_ne!(new_b.id.as_deref(), Some("old-b"));
    }

    #[test]
    fn test_previous_layout_supplies_external_outputs() {
        let raw = "resources: [{name: e, type: remote.jinja}, {name: vm, type: leaf.type, properties: {ip: 'ref(e.ip)'}}]";
        let previous = "resources: [{name: e, type: remote.jinja, outputs: [{name: ip, value: 10.1.1.1}]}]";
        let m = expand_to_manifest(
            raw,
            &ArtifactTable::new(),
            &Env::new(),
            Some(previous),
            &outputs_on(),
        )
        .unwrap();
        assert_eq!(
            m.resources()[1].properties.as_ref().unwrap()["ip"],
            Value::String("10.1.1.1".into())
        );

        let m =
            expand_to_manifest(raw, &ArtifactTable::new(), &Env::new(), None, &outputs_on())
                .unwrap();
        assert_eq!(
            m.resources()[1].properties.as_ref().unwrap()["ip"],
            Value::String("ref(e.ip)".into())
        );
    }

    #[test]
    fn test_empty_previous_layout_is_absent() {
        let raw = "resources: [{name: a, type: leaf.type}]";
        let m = expand_to_manifest(
            raw,
            &ArtifactTable::new(),
            &Env::new(),
            Some("{}"),
            &ExpandOptions::default(),
        )
        .unwrap();
        assert_eq!(m.layout.children().len(), 1);

        let err = expand_to_manifest(
            raw,
            &ArtifactTable::new(),
            &Env::new(),
            Some("resources: ["),
            &ExpandOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_root_outputs() {
        let m = run(
            r#"
resources:
  - name: a
    type: a.jinja
outputs:
  - name: exported
    value: ref(a.port)
"#,
            &[("a.jinja", "resources: []\noutputs: [{name: port, value: 8080}]")],
            &outputs_on(),
        )
        .unwrap();
        let out = &m.layout.outputs.as_ref().unwrap()[0];
        assert_eq!(out.final_value, Some(Value::from(8080)));
        assert_eq!(out.value, Value::String("ref(a.port)".into()));
    }

    #[test]
    fn test_template_receives_bound_sibling_reference() {
        let m = run(
            r#"
resources:
  - name: disk
    type: leaf.type
  - name: t
    type: t.jinja
    properties:
      disk: ref(disk)
"#,
            &[(
                "t.jinja",
                "resources:\n- name: vm\n  type: leaf.type\n  properties:\n    attached: {{ properties['disk'] }}\n",
            )],
            &outputs_on(),
        )
        .unwrap();
        let vm = m.resources().iter().find(|r| r.name == "vm").unwrap();
        assert_eq!(
            vm.properties.as_ref().unwrap()["attached"],
            Value::String("ref(disk)".into())
        );
        let t = &m.layout.children()[1];
        assert_eq!(
            t.properties.as_ref().unwrap()["disk"],
            Value::String("ref(disk)".into())
        );
    }

    #[test]
    fn test_composite_type_isolation() {
        let mut options = ExpandOptions::default();
        for (id, body) in [("ct-a", "A"), ("ct-b", "B")] {
            let helper = format!("resources: [{{name: from-{}, type: leaf.type}}]", body);
            options.composite_types.insert(
                id.to_string(),
                crate::core::types::CompositeType {
                    artifacts: table(&[("helper.jinja", helper.as_str())]),
                    path_overrides: Default::default(),
                },
            );
        }
        let artifacts = table(&[
            ("ct-a", "{% include 'helper.jinja' %}"),
            ("ct-b", "{% include 'helper.jinja' %}"),
        ]);
        let mut overrides = std::collections::BTreeMap::new();
        overrides.insert("ct-a".to_string(), "ct-a.jinja".to_string());
        overrides.insert("ct-b".to_string(), "ct-b.jinja".to_string());
        options.path_overrides = overrides;

        let m = expand_to_manifest(
            "resources: [{name: x, type: ct-a}, {name: y, type: ct-b}]",
            &artifacts,
            &Env::new(),
            None,
            &options,
        )
        .unwrap();
        let names: Vec<&str> = m.resources().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["from-A", "from-B"]);
    }

    #[test]
    fn test_script_templates() {
        let raw = "resources: [{name: g, type: gen.py, properties: {zone: z1}}]";
        let artifacts = table(&[("gen.py", "def generate_config(context): ...")]);
        let err = expand_to_manifest(raw, &artifacts, &Env::new(), None, &ExpandOptions::default())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedArtifact);

        let scripts = NativeScripts::new().register("gen.py", "generate_config", |ctx, _| {
            Ok(GeneratorOutput::Text(format!(
                "resources:\n- name: {}-vm\n  type: leaf.type\n  properties:\n    zone: {}\n",
                ctx.env["name"],
                crate::core::types::yaml_value_to_string(&ctx.properties["zone"]),
            )))
        });
        let m = expand_with_scripts(
            raw,
            &artifacts,
            &Env::new(),
            None,
            &ExpandOptions::default(),
            &scripts,
        )
        .unwrap();
        assert_eq!(m.resources()[0].name, "g-vm");
        assert_eq!(
            m.resources()[0].properties.as_ref().unwrap()["zone"],
            Value::String("z1".into())
        );
    }
}
