//! Resource, layout, and option types.
//!
//! Resources are immutable records: binding and output substitution build
//! new values instead of mutating shared maps. Layout nodes mirror the
//! expansion tree and round-trip through YAML for multi-pass expansion.

use super::error::ExpansionError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_yaml_ng::{Mapping, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Environment exposed to every template.
pub type Env = BTreeMap<String, String>;

/// Logical path → source text.
pub type ArtifactTable = BTreeMap<String, String>;

/// Type string → differently-suffixed artifact path.
pub type PathOverrides = BTreeMap<String, String>;

/// Suffix of declarative text templates.
pub const TEXT_TEMPLATE_SUFFIX: &str = ".jinja";

/// Suffix of scripted generators.
pub const SCRIPT_SUFFIX: &str = ".py";

/// Suffix appended to a template path to find its schema.
pub const SCHEMA_SUFFIX: &str = ".schema";

// ============================================================================
// Resources
// ============================================================================

/// Whether a resource names a type or an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Type(String),
    Action(String),
}

impl ResourceKind {
    /// The type or action string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Type(s) | Self::Action(s) => s,
        }
    }

    /// The type string, if this is a type.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Self::Type(s) => Some(s),
            Self::Action(_) => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(s) => write!(f, "type {}", s),
            Self::Action(s) => write!(f, "action {}", s),
        }
    }
}

/// A named unit in the configuration tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    pub name: String,

    #[serde(flatten)]
    pub kind: ResourceKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    /// Remaining sections (`accessControl`, ...), emitted unchanged.
    #[serde(flatten)]
    pub extra: Mapping,
}

impl Resource {
    /// Build a resource from a parsed document entry.
    ///
    /// Requires a non-empty `name` and exactly one of `type` or `action`.
    /// Sections other than `properties` and `metadata` are kept verbatim in
    /// `extra`.
    pub fn from_value(value: &Value) -> Result<Self, ExpansionError> {
        let map = value.as_mapping().ok_or_else(|| {
            ExpansionError::invalid_resource(describe_value(value), "Resource must be a map.")
        })?;

        let name = match map.get("name") {
            Some(Value::Null) | None => None,
            Some(v) => Some(yaml_value_to_string(v)),
        }
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            ExpansionError::invalid_resource(
                describe_value(value),
                "Resource does not have a name.",
            )
        })?;

        let kind = match (non_null(map, "type"), non_null(map, "action")) {
            (Some(t), None) => ResourceKind::Type(yaml_value_to_string(t)),
            (None, Some(a)) => ResourceKind::Action(yaml_value_to_string(a)),
            (Some(_), Some(_)) => {
                return Err(ExpansionError::invalid_resource(
                    &name,
                    "Resource must not define both type and action.",
                ))
            }
            (None, None) => {
                return Err(ExpansionError::invalid_resource(
                    &name,
                    "Resource does not have type defined.",
                ))
            }
        };

        let extra = map
            .iter()
            .filter(|(k, _)| !k.as_str().is_some_and(|k| RESOURCE_KEYS.contains(&k)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            name,
            kind,
            properties: non_null(map, "properties").cloned(),
            metadata: non_null(map, "metadata").cloned(),
            extra,
        })
    }

    /// Parse a `resources` list.
    pub fn list_from_value(value: Option<&Value>) -> Result<Vec<Self>, ExpansionError> {
        match value {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Sequence(items)) => items.iter().map(Self::from_value).collect(),
            Some(other) => Err(ExpansionError::invalid_resource(
                describe_value(other),
                "'resources' must be a list.",
            )),
        }
    }

    /// Properties as a map, empty when absent or not a map.
    pub fn properties_map(&self) -> Mapping {
        match &self.properties {
            Some(Value::Mapping(m)) => m.clone(),
            _ => Mapping::new(),
        }
    }
}

/// Keys held in dedicated `Resource` fields.
const RESOURCE_KEYS: [&str; 5] = ["name", "type", "action", "properties", "metadata"];

fn non_null<'a>(map: &'a Mapping, key: &str) -> Option<&'a Value> {
    map.get(key).filter(|v| !v.is_null())
}

// ============================================================================
// Outputs
// ============================================================================

/// A value declared by an expanded template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub name: String,

    #[serde(default)]
    pub value: Value,

    /// Value after reference substitution.
    #[serde(rename = "finalValue", default, skip_serializing_if = "Option::is_none")]
    pub final_value: Option<Value>,
}

impl Output {
    /// Parse an `outputs` list.
    pub fn list_from_value(value: &Value, owner: &str) -> Result<Vec<Self>, ExpansionError> {
        serde_yaml_ng::from_value(value.clone()).map_err(|e| {
            ExpansionError::malformed_template(owner, format!("Invalid 'outputs' section: {}", e))
        })
    }

    /// The resolved value, falling back to the declared one.
    pub fn resolved(&self) -> &Value {
        self.final_value.as_ref().unwrap_or(&self.value)
    }
}

// ============================================================================
// Layout
// ============================================================================

/// One node of the layout tree.
///
/// Leaves are terminal resources; interior nodes are expanded templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutNode {
    pub name: String,

    #[serde(flatten)]
    pub kind: ResourceKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<LayoutNode>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<Output>>,
}

impl LayoutNode {
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            id: None,
            properties: None,
            resources: None,
            outputs: None,
        }
    }

    /// Child nodes, empty for leaves.
    pub fn children(&self) -> &[LayoutNode] {
        self.resources.as_deref().unwrap_or_default()
    }
}

/// Root of the layout tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<LayoutNode>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<Output>>,
}

impl Layout {
    pub fn children(&self) -> &[LayoutNode] {
        self.resources.as_deref().unwrap_or_default()
    }
}

// ============================================================================
// Manifest
// ============================================================================

/// Flattened resource list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpandedConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<Resource>>,
}

/// Result of one expansion call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Manifest {
    pub config: ExpandedConfig,
    pub layout: Layout,
}

impl Manifest {
    /// `{config: {}, layout: {}}`, returned for empty input.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Flattened resources.
    pub fn resources(&self) -> &[Resource] {
        self.config.resources.as_deref().unwrap_or_default()
    }

    /// Serialize as YAML.
    pub fn to_yaml(&self) -> Result<String, String> {
        serde_yaml_ng::to_string(self).map_err(|e| format!("cannot serialize manifest: {}", e))
    }
}

// ============================================================================
// Options
// ============================================================================

/// A composite type's isolated artifact set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompositeType {
    /// Artifacts private to this composite type
    #[serde(default)]
    pub artifacts: ArtifactTable,

    /// Path overrides applied inside this composite type
    #[serde(default)]
    pub path_overrides: PathOverrides,
}

/// Expansion options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExpandOptions {
    /// Populate schema defaults into template properties
    #[serde(default)]
    pub validate_schema: bool,

    /// Resolve template outputs and value references
    #[serde(default)]
    pub process_outputs: bool,

    /// Redirect a type string to a differently-suffixed artifact
    #[serde(default)]
    pub path_overrides: PathOverrides,

    /// Composite types keyed by identifier
    #[serde(default)]
    pub composite_types: BTreeMap<String, CompositeType>,

    /// Maximum template nesting depth
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_max_depth() -> usize {
    64
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            validate_schema: false,
            process_outputs: false,
            path_overrides: PathOverrides::new(),
            composite_types: BTreeMap::new(),
            max_depth: default_max_depth(),
        }
    }
}

// ============================================================================
// Value helpers
// ============================================================================

/// Render a scalar for interpolation into a string.
pub fn yaml_value_to_string(val: &Value) -> String {
    match val {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Tagged(t) => yaml_value_to_string(&t.value),
        other => serde_json::to_string(other).unwrap_or_else(|_| format!("{:?}", other)),
    }
}

/// Short description of a value for error attribution.
pub fn describe_value(val: &Value) -> String {
    if let Some(name) = val.get("name").and_then(Value::as_str) {
        return name.to_string();
    }
    serde_json::to_string(val).unwrap_or_else(|_| "<resource>".to_string())
}
