//! Filesystem artifact collection.
//!
//! Builds the artifact table the engine runs against from a config file's
//! `imports:` list, following `<file>.schema` sidecars and their own imports,
//! plus any extra glob patterns given on the command line.

use super::types::{ArtifactTable, SCHEMA_SUFFIX};
use serde_yaml_ng::Value;
use std::path::{Path, PathBuf};

/// Read a file, attributing errors to its path.
pub fn read_file(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))
}

/// Resolve `import` against `working_dir`, then against `config_dir`.
pub fn resolve_import_path(
    import: &str,
    working_dir: &Path,
    config_dir: &Path,
) -> Result<PathBuf, String> {
    let from_working = working_dir.join(import);
    if from_working.is_file() {
        return Ok(from_working);
    }
    let from_config = config_dir.join(import);
    if from_config.is_file() {
        return Ok(from_config);
    }
    Err(format!("Could not find import: \"{}\"", import))
}

/// Add every entry of `document`'s `imports:` list to `artifacts`.
///
/// Entries are a path string or `{path, name}`; `name` defaults to the path
/// and is the artifact key. Already-present keys are skipped. A sibling
/// `<file>.schema` is stored as `<name>.schema`, and the schema's own
/// imports are followed relative to its directory.
pub fn collect_imports(
    artifacts: &mut ArtifactTable,
    document: &Value,
    working_dir: &Path,
    config_dir: &Path,
) -> Result<(), String> {
    let Some(entries) = document.get("imports").and_then(Value::as_sequence) else {
        return Ok(());
    };

    for entry in entries {
        let (path, name) = match entry {
            Value::String(path) => (path.as_str(), path.as_str()),
            Value::Mapping(_) => {
                let path = entry.get("path").and_then(Value::as_str).unwrap_or_default();
                let name = entry.get("name").and_then(Value::as_str).unwrap_or(path);
                (path, name)
            }
            other => return Err(format!("invalid import entry: {:?}", other)),
        };
        let file = resolve_import_path(path, working_dir, config_dir)?;
        if artifacts.contains_key(name) {
            continue;
        }
        tracing::debug!(import = name, path = %file.display(), "collecting import");
        artifacts.insert(name.to_string(), read_file(&file)?);

        let mut schema_file = file.clone().into_os_string();
        schema_file.push(SCHEMA_SUFFIX);
        let schema_file = PathBuf::from(schema_file);
        if !schema_file.is_file() {
            continue;
        }
        let schema_text = read_file(&schema_file)?;
        artifacts.insert(format!("{}{}", name, SCHEMA_SUFFIX), schema_text.clone());

        let schema: Value = serde_yaml_ng::from_str(&schema_text)
            .map_err(|e| format!("invalid schema {}: {}", schema_file.display(), e))?;
        let schema_dir = schema_file.parent().unwrap_or(config_dir).to_path_buf();
        collect_imports(artifacts, &schema, working_dir, &schema_dir)?;
    }
    Ok(())
}

/// Add every file matching `patterns` to `artifacts`, keyed by its path
/// relative to `base` with `/` separators.
pub fn collect_globs(
    artifacts: &mut ArtifactTable,
    patterns: &[String],
    base: &Path,
) -> Result<(), String> {
    for pattern in patterns {
        let full = base.join(pattern);
        let full = full.to_string_lossy();
        let paths =
            glob::glob(&full).map_err(|e| format!("invalid import pattern '{}': {}", pattern, e))?;
        for entry in paths {
            let path = entry.map_err(|e| format!("cannot read import: {}", e))?;
            if !path.is_file() {
                continue;
            }
            let key = path
                .strip_prefix(base)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            if !artifacts.contains_key(&key) {
                artifacts.insert(key, read_file(&path)?);
            }
        }
    }
    Ok(())
}
