//! Schema default population.
//!
//! A template `t.jinja` may ship a `t.jinja.schema` artifact. Defaults declared
//! under its `properties` (directly, or through a local `$ref`) are filled
//! into the resource's properties when absent, recursing into nested objects.
//! `required` is informational and never blocks expansion.

use super::error::ExpansionError;
use super::types::SCHEMA_SUFFIX;
use serde_yaml_ng::{Mapping, Value};

const PROPERTIES: &str = "properties";
const DEFAULT: &str = "default";
const REF: &str = "$ref";

/// Bound on nested schema levels and `$ref` hops.
const MAX_SCHEMA_DEPTH: usize = 32;

/// Schema artifact path for a template path.
pub fn schema_path(template: &str) -> String {
    format!("{}{}", template, SCHEMA_SUFFIX)
}

/// Parse `schema_text` and fill its defaults into `properties`.
pub fn populate_defaults(
    properties: &mut Mapping,
    schema_text: &str,
    schema_name: &str,
) -> Result<(), ExpansionError> {
    let schema: Value = serde_yaml_ng::from_str(schema_text).map_err(|e| {
        ExpansionError::invalid_schema(schema_name, format!("Error parsing schema: {}", e))
    })?;
    apply_defaults(&schema, &schema, properties, 0);
    Ok(())
}

/// Fill defaults from `schema`'s `properties` into `target`.
pub fn apply_defaults(root: &Value, schema: &Value, target: &mut Mapping, depth: usize) {
    if depth >= MAX_SCHEMA_DEPTH {
        return;
    }
    let Some(props) = resolve(root, schema, depth).get(PROPERTIES).and_then(Value::as_mapping)
    else {
        return;
    };

    for (key, subschema) in props {
        let subschema = resolve(root, subschema, depth);
        if !target.contains_key(key) {
            if let Some(default) = subschema.get(DEFAULT) {
                target.insert(key.clone(), default.clone());
            }
        }
        if let Some(Value::Mapping(nested)) = target.get_mut(key) {
            apply_defaults(root, subschema, nested, depth + 1);
        }
    }
}

/// Follow local `$ref` pointers until a schema without one is reached.
fn resolve<'a>(root: &'a Value, schema: &'a Value, depth: usize) -> &'a Value {
    let mut current = schema;
    for _ in depth..MAX_SCHEMA_DEPTH {
        let Some(pointer) = current.get(REF).and_then(Value::as_str) else {
            return current;
        };
        match lookup_pointer(root, pointer) {
            Some(next) => current = next,
            None => return current,
        }
    }
    current
}

/// Resolve a local JSON pointer such as `#/definitions/disk`.
fn lookup_pointer<'a>(root: &'a Value, pointer: &str) -> Option<&'a Value> {
    let path = pointer.strip_prefix('#')?;
    let mut current = root;
    for token in path.split('/').filter(|t| !t.is_empty()) {
        let token = token.replace("~1", "/").replace("~0", "~");
        current = match current {
            Value::Mapping(m) => m.get(token.as_str())?,
            Value::Sequence(s) => s.get(token.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
