//! Layout merging.
//!
//! A freshly expanded layout node is folded into a previous layout by
//! `(name, type_or_action)` identity. Matching nodes take the new properties
//! and keep their previously assigned identifier; everything else is
//! appended.

use super::types::{LayoutNode, ResourceKind};

/// Depth bound of the match search; deeper nodes never match.
pub const MAX_LAYOUT_SEARCH_DEPTH: usize = 100;

/// Index path to the first depth-first match of `(name, kind)` in `nodes`.
pub fn find_path(nodes: &[LayoutNode], name: &str, kind: &ResourceKind) -> Option<Vec<usize>> {
    nodes.iter().enumerate().find_map(|(i, node)| {
        let mut path = find_in(node, name, kind, MAX_LAYOUT_SEARCH_DEPTH)?;
        path.insert(0, i);
        Some(path)
    })
}

fn find_in(
    node: &LayoutNode,
    name: &str,
    kind: &ResourceKind,
    remaining: usize,
) -> Option<Vec<usize>> {
    if remaining == 0 {
        return None;
    }
    if node.name == name && &node.kind == kind {
        return Some(Vec::new());
    }
    node.children().iter().enumerate().find_map(|(i, child)| {
        let mut path = find_in(child, name, kind, remaining - 1)?;
        path.insert(0, i);
        Some(path)
    })
}

fn node_at_mut<'a>(nodes: &'a mut [LayoutNode], path: &[usize]) -> Option<&'a mut LayoutNode> {
    let (first, rest) = path.split_first()?;
    let node = nodes.get_mut(*first)?;
    if rest.is_empty() {
        return Some(node);
    }
    node_at_mut(node.resources.as_deref_mut()?, rest)
}

/// Merge `node` into `siblings`.
///
/// On a match the previous node's `properties` (and `outputs`, when newly
/// computed) are overwritten, its `id` is kept, and the new children are
/// merged into the match recursively. `carry_ids` lets a match that has no
/// `id` adopt the new node's. Without a match `node` is appended.
pub fn merge_node(siblings: &mut Vec<LayoutNode>, node: LayoutNode, carry_ids: bool) {
    let target = find_path(siblings, &node.name, &node.kind)
        .and_then(|path| node_at_mut(siblings, &path));
    let Some(target) = target else {
        siblings.push(node);
        return;
    };

    tracing::debug!(name = %node.name, kind = %node.kind, "merging into previous layout");
    if node.properties.is_some() {
        target.properties = node.properties;
    }
    if node.outputs.is_some() {
        target.outputs = node.outputs;
    }
    if carry_ids && target.id.is_none() {
        target.id = node.id;
    }
    for child in node.resources.unwrap_or_default() {
        merge_node(target.resources.get_or_insert_with(Vec::new), child, carry_ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Layout;
    use serde_yaml_ng::Value;

    fn layout(yaml: &str) -> Layout {
        serde_yaml_ng::from_str(yaml).unwrap()
    }

    fn node(name: &str, type_name: &str) -> LayoutNode {
        LayoutNode::new(name, ResourceKind::Type(type_name.into()))
    }

    const PREVIOUS: &str = r#"
resources:
  - name: t
    type: t.jinja
    id: id-t
    properties: {size: 1}
    resources:
      - name: vm
        type: compute.v1.instance
        id: id-vm
"#;

    #[test]
    fn test_find_path_depth_first() {
        let prev = layout(PREVIOUS);
        let kind = ResourceKind::Type("compute.v1.instance".into());
        assert_eq!(find_path(prev.children(), "vm", &kind), Some(vec![0, 0]));
        assert_eq!(find_path(prev.children(), "vm", &ResourceKind::Type("x".into())), None);
    }

    #[test]
    fn test_match_preserves_id_and_overwrites_properties() {
        let mut prev = layout(PREVIOUS);
        let mut fresh = node("t", "t.jinja");
        fresh.id = Some("new-id".into());
        fresh.properties = Some(serde_yaml_ng::from_str("{size: 2}").unwrap());
        let mut vm = node("vm", "compute.v1.instance");
        vm.id = Some("new-vm".into());
        fresh.resources = Some(vec![vm]);

        let siblings = prev.resources.get_or_insert_with(Vec::new);
        merge_node(siblings, fresh, true);

        let t = &prev.children()[0];
        assert_eq!(prev.children().len(), 1);
        assert_eq!(t.id.as_deref(), Some("id-t"));
        assert_eq!(t.properties.as_ref().unwrap()["size"], Value::from(2));
        assert_eq!(t.children().len(), 1);
        assert_eq!(t.children()[0].id.as_deref(), Some("id-vm"));
    }

    #[test]
    fn test_mismatch_does_not_inherit_id() {
        let mut prev = layout(PREVIOUS);
        let siblings = prev.resources.get_or_insert_with(Vec::new);
        merge_node(siblings, node("t", "other.jinja"), true);

        assert_eq!(prev.children().len(), 2);
        let appended = &prev.children()[1];
        assert_eq!(appended.kind, ResourceKind::Type("other.jinja".into()));
        assert_eq!(appended.id, None);
    }

    #[test]
    fn test_id_adopted_only_when_carrying() {
        let mut prev = layout("resources: [{name: a, type: leaf.type}]");
        let mut fresh = node("a", "leaf.type");
        fresh.id = Some("fresh".into());
        merge_node(prev.resources.get_or_insert_with(Vec::new), fresh.clone(), false);
        assert_eq!(prev.children()[0].id, None);
        merge_node(prev.resources.get_or_insert_with(Vec::new), fresh, true);
        assert_eq!(prev.children()[0].id.as_deref(), Some("fresh"));
    }

    #[test]
    fn test_search_depth_is_bounded() {
        let mut root = node("n0", "leaf.type");
        for i in 1..=MAX_LAYOUT_SEARCH_DEPTH + 5 {
            let mut parent = node(&format!("n{}", i), "leaf.type");
            parent.resources = Some(vec![root]);
            root = parent;
        }
        let nodes = vec![root];
        let kind = ResourceKind::Type("leaf.type".into());
        assert!(find_path(&nodes, "n105", &kind).is_some());
        assert!(find_path(&nodes, "n6", &kind).is_some());
        assert!(find_path(&nodes, "n0", &kind).is_none());
    }
}
