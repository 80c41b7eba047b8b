//! Template expansion.
//!
//! A resource whose type names a template artifact is executed with its
//! properties, the active artifact table and the caller env. Text templates
//! (`.jinja`) are rendered with minijinja; scripts (`.py`) go through the
//! injected [`ScriptRunner`]. The produced document must carry a top-level
//! `resources` list, returned unbound.

use super::error::ExpansionError;
use super::loader::ArtifactLoader;
use super::schema;
use super::script::{GeneratorOutput, ScriptRunner, TemplateContext};
use super::types::{
    ArtifactTable, Env, ExpandOptions, Resource, SCRIPT_SUFFIX, TEXT_TEMPLATE_SUFFIX,
};
use regex::Regex;
use serde_yaml_ng::Value;
use std::sync::{Arc, LazyLock, Mutex};

static COMPOSITE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+)/composite:(.+)$").expect("composite pattern is valid")
});

/// Whether `type_name` (after path overrides) has a template suffix.
pub fn is_template(type_name: &str, loader: &ArtifactLoader) -> bool {
    let path = loader.type_path(type_name);
    path.ends_with(SCRIPT_SUFFIX) || path.ends_with(TEXT_TEMPLATE_SUFFIX)
}

/// A template-suffixed type absent from the active artifacts. Left for a
/// later expansion pass.
pub fn is_external_template(type_name: &str, loader: &ArtifactLoader) -> bool {
    !loader.contains(type_name) && is_template(type_name, loader)
}

/// Whether a resource of `type_name` is expanded rather than emitted.
pub fn is_expandable(type_name: &str, loader: &ArtifactLoader) -> bool {
    loader.is_composite(type_name)
        || (is_template(type_name, loader) && !is_external_template(type_name, loader))
}

/// Composite-type identifier for `type_name`, if it names one.
///
/// A registered identifier is returned as-is. Otherwise the overridden path,
/// minus its template suffix, must look like `<project>/composite:<name>`.
pub fn composite_type_id(type_name: &str, loader: &ArtifactLoader) -> Option<String> {
    if loader.is_composite(type_name) {
        return Some(type_name.to_string());
    }
    let path = loader.type_path(type_name);
    let stem = path
        .strip_suffix(SCRIPT_SUFFIX)
        .or_else(|| path.strip_suffix(TEXT_TEMPLATE_SUFFIX))
        .unwrap_or(path);
    let caps = COMPOSITE_PATTERN.captures(stem)?;
    Some(format!(
        "projects/{}/global/compositeTypes/{}",
        &caps[1], &caps[2]
    ))
}

/// Result of running one template.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedTemplate {
    /// The raw `resources` entry; `Null` when the template declared none.
    pub resources: Value,
    /// The raw `outputs` entry, if any.
    pub outputs: Option<Value>,
    /// Properties the template ran with, after schema defaults.
    pub properties: Option<Value>,
    /// Composite-type context for the template's descendants.
    pub context: Option<String>,
}

/// Expand a template resource.
///
/// `context` is the composite-type context inherited from the enclosing
/// template. If the resource itself names a registered composite type, the
/// loader switches to that type's isolated scope for rendering and the new
/// context is returned for the descendants.
pub fn expand_template(
    resource: &Resource,
    loader: &mut ArtifactLoader,
    env: &Env,
    options: &ExpandOptions,
    scripts: &dyn ScriptRunner,
    context: Option<&str>,
) -> Result<ExpandedTemplate, ExpansionError> {
    let type_name = resource.kind.as_str();
    let source = loader
        .source(type_name)
        .ok_or_else(|| ExpansionError::missing_template(&resource.name, type_name))?
        .to_string();

    let mut template_env = env.clone();
    template_env.insert("name".to_string(), resource.name.clone());
    template_env.insert("type".to_string(), type_name.to_string());

    let schema_name = schema::schema_path(type_name);
    let schema_text = loader.source(&schema_name).map(str::to_string);
    let type_path = loader.type_path(type_name).to_string();

    let mut properties = resource.properties.clone();
    if options.validate_schema {
        if let Some(text) = &schema_text {
            let mut map = resource.properties_map();
            schema::populate_defaults(&mut map, text, &schema_name)?;
            properties = Some(Value::Mapping(map));
        }
    }

    let context = composite_type_id(type_name, loader)
        .filter(|id| loader.is_composite(id))
        .or_else(|| context.map(str::to_string));

    let imports = if context.as_deref() != loader.context() && context.is_some() {
        loader.enter_context(context.as_deref());
        let mut scoped = (*loader.artifacts()).clone();
        scoped.insert(type_name.to_string(), source.clone());
        if let Some(text) = &schema_text {
            scoped.insert(schema_name.clone(), text.clone());
        }
        Arc::new(scoped)
    } else {
        loader.artifacts()
    };

    tracing::debug!(
        resource = %resource.name,
        template = %type_name,
        context = ?context,
        "expanding template"
    );

    let template_context = TemplateContext {
        properties: match &properties {
            Some(Value::Mapping(m)) => m.clone(),
            _ => Default::default(),
        },
        env: template_env,
        imports: (*imports).clone(),
    };

    let output = if type_path.ends_with(TEXT_TEMPLATE_SUFFIX) {
        GeneratorOutput::Text(render_text_template(
            type_name,
            &source,
            &template_context,
            imports,
        )?)
    } else if type_path.ends_with(SCRIPT_SUFFIX) {
        scripts.generate(type_name, &source, &template_context, loader)?
    } else {
        return Err(ExpansionError::unsupported_artifact(
            type_name,
            format!("Unsupported source file: {}.", type_name),
        ));
    };

    let document = match output {
        GeneratorOutput::Text(text) => serde_yaml_ng::from_str::<Value>(&text).map_err(|e| {
            ExpansionError::malformed_template(
                type_name,
                format!("Error parsing template output: {}", e),
            )
        })?,
        GeneratorOutput::Document(value) => value,
    };

    let Value::Mapping(mut document) = document else {
        return Err(missing_resources(type_name));
    };
    let Some(resources) = document.remove("resources") else {
        return Err(missing_resources(type_name));
    };

    Ok(ExpandedTemplate {
        resources,
        outputs: document.remove("outputs").filter(|v| !v.is_null()),
        properties,
        context,
    })
}

fn missing_resources(type_name: &str) -> ExpansionError {
    ExpansionError::malformed_template(type_name, "Template did not return a 'resources:' field.")
}

/// Render a text template.
///
/// `include`/`import` resolve against `imports` only; a path outside it is an
/// unavailable artifact. Python-style methods (`dict.get`, `.items()`, ...)
/// are available on values.
pub fn render_text_template(
    name: &str,
    source: &str,
    context: &TemplateContext,
    imports: Arc<ArtifactTable>,
) -> Result<String, ExpansionError> {
    let missing = Arc::new(Mutex::new(None::<String>));
    let last_missing = Arc::clone(&missing);

    let mut jinja = minijinja::Environment::new();
    jinja.set_loader(move |path: &str| {
        let found = imports.get(path).cloned();
        if found.is_none() {
            if let Ok(mut slot) = last_missing.lock() {
                *slot = Some(path.to_string());
            }
        }
        Ok(found)
    });
    jinja.set_unknown_method_callback(minijinja_contrib::pycompat::unknown_method_callback);
    jinja.add_filter("yaml", yaml_filter);

    jinja.render_named_str(name, source, context).map_err(|e| {
        if e.kind() == minijinja::ErrorKind::TemplateNotFound {
            if let Some(path) = missing.lock().ok().and_then(|mut slot| slot.take()) {
                return ExpansionError::unavailable_artifact(&path);
            }
        }
        ExpansionError::template_execution(name, format!("Exception in {}\n{:#}", name, e))
    })
}

/// `{{ value | yaml }}`: block-style YAML dump.
fn yaml_filter(value: minijinja::Value) -> Result<String, minijinja::Error> {
    serde_yaml_ng::to_string(&value).map_err(|e| {
        minijinja::Error::new(
            minijinja::ErrorKind::InvalidOperation,
            format!("cannot dump value as yaml: {}", e),
        )
    })
}
