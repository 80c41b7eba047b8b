//! Scripted generators.
//!
//! Script templates are executed through the [`ScriptRunner`] seam so the
//! execution strategy is swappable. The default [`DisabledScripts`] rejects
//! every script template. [`NativeScripts`] lets an embedding host register
//! Rust generator functions under an artifact path; the artifact must still be
//! present in the active table, and generators reach helper modules only
//! through the [`ArtifactLoader`] they are handed.

use super::error::ExpansionError;
use super::loader::ArtifactLoader;
use super::types::{ArtifactTable, Env};
use indexmap::IndexMap;
use serde::Serialize;
use serde_yaml_ng::{Mapping, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Generator entry points, tried in order.
pub const GENERATOR_METHODS: [&str; 2] = ["generate_config", "GenerateConfig"];

/// Execution context handed to every template.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateContext {
    /// The resource's properties, empty when absent.
    pub properties: Mapping,
    /// Caller env plus `name` and `type` of the resource.
    pub env: Env,
    /// Active artifact table.
    pub imports: ArtifactTable,
}

/// What a generator produced.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratorOutput {
    /// Structured-data text still to be parsed.
    Text(String),
    /// An already-built document.
    Document(Value),
}

/// Executes script templates.
pub trait ScriptRunner {
    /// Run the generator in `source` (artifact `path`) and return its document.
    fn generate(
        &self,
        path: &str,
        source: &str,
        context: &TemplateContext,
        loader: &mut ArtifactLoader,
    ) -> Result<GeneratorOutput, ExpansionError>;
}

/// Rejects every script template.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledScripts;

impl ScriptRunner for DisabledScripts {
    fn generate(
        &self,
        path: &str,
        _source: &str,
        _context: &TemplateContext,
        _loader: &mut ArtifactLoader,
    ) -> Result<GeneratorOutput, ExpansionError> {
        Err(ExpansionError::unsupported_artifact(
            path,
            format!("Unsupported source file: {}. Script templates are disabled.", path),
        ))
    }
}

/// A native generator function.
pub type GeneratorFn = Box<
    dyn Fn(&TemplateContext, &mut ArtifactLoader) -> Result<GeneratorOutput, String> + Send + Sync,
>;

/// Rust generator functions keyed by artifact path and method name.
#[derive(Default)]
pub struct NativeScripts {
    modules: BTreeMap<String, IndexMap<String, GeneratorFn>>,
}

impl fmt::Debug for NativeScripts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let methods: BTreeMap<&str, Vec<&str>> = self
            .modules
            .iter()
            .map(|(path, m)| (path.as_str(), m.keys().map(String::as_str).collect()))
            .collect();
        f.debug_struct("NativeScripts").field("modules", &methods).finish()
    }
}

impl NativeScripts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `method` of the module at artifact `path`.
    pub fn register<F>(mut self, path: &str, method: &str, f: F) -> Self
    where
        F: Fn(&TemplateContext, &mut ArtifactLoader) -> Result<GeneratorOutput, String>
            + Send
            + Sync
            + 'static,
    {
        self.modules
            .entry(path.to_string())
            .or_default()
            .insert(method.to_string(), Box::new(f));
        self
    }
}

impl ScriptRunner for NativeScripts {
    fn generate(
        &self,
        path: &str,
        _source: &str,
        context: &TemplateContext,
        loader: &mut ArtifactLoader,
    ) -> Result<GeneratorOutput, ExpansionError> {
        let module = self.modules.get(path).ok_or_else(|| {
            ExpansionError::unsupported_artifact(
                path,
                format!("No generator registered for {}.", path),
            )
        })?;

        let Some(generator) = GENERATOR_METHODS.iter().find_map(|m| module.get(*m)) else {
            return Err(ExpansionError::malformed_template(
                path,
                format!(
                    "Neither of template generation methods {} were found in the template.",
                    GENERATOR_METHODS.join(", ")
                ),
            ));
        };

        generator(context, loader).map_err(|e| {
            ExpansionError::template_execution(path, format!("Exception in {}\n{}", path, e))
        })
    }
}
