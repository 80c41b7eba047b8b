//! CLI subcommands: expand, validate, schema.

use crate::core::{binder, engine, imports, types};
use clap::{Args, Subcommand, ValueEnum};
use serde_yaml_ng::Value;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Expand a configuration into flat resources and a layout
    Expand(ExpandArgs),

    /// Check root resources without expanding templates
    Validate {
        /// Path to the root configuration
        #[arg(short, long, default_value = "config.yaml")]
        file: PathBuf,
    },

    /// Print the JSON Schema of the options file
    Schema,
}

#[derive(Args, Debug)]
pub struct ExpandArgs {
    /// Path to the root configuration
    #[arg(short, long, default_value = "config.yaml")]
    pub file: PathBuf,

    /// Extra artifact glob, relative to the working directory (repeatable)
    #[arg(long = "import")]
    pub imports: Vec<String>,

    /// Template env entry KEY=VALUE (repeatable)
    #[arg(long = "env")]
    pub env: Vec<String>,

    /// Layout from a previous partial expansion
    #[arg(long)]
    pub previous_layout: Option<PathBuf>,

    /// Options file (.yaml or .toml)
    #[arg(long)]
    pub options: Option<PathBuf>,

    /// Populate schema defaults into template properties
    #[arg(long)]
    pub validate_schema: bool,

    /// Resolve outputs and value references
    #[arg(long)]
    pub outputs: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
    pub format: OutputFormat,

    /// Write the manifest here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Yaml,
    Json,
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Expand(args) => cmd_expand(&args),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Schema => cmd_schema(),
    }
}

fn cmd_expand(args: &ExpandArgs) -> Result<(), String> {
    let raw = imports::read_file(&args.file)?;
    let document: Value = serde_yaml_ng::from_str(&raw)
        .map_err(|e| format!("invalid YAML in {}: {}", args.file.display(), e))?;

    let working_dir =
        std::env::current_dir().map_err(|e| format!("cannot read working directory: {}", e))?;
    let config_dir = config_dir(&args.file);

    let mut artifacts = types::ArtifactTable::new();
    imports::collect_imports(&mut artifacts, &document, &working_dir, &config_dir)?;
    imports::collect_globs(&mut artifacts, &args.imports, &working_dir)?;

    let env = parse_env(&args.env)?;
    let mut options = match &args.options {
        Some(path) => load_options(path)?,
        None => types::ExpandOptions::default(),
    };
    options.validate_schema |= args.validate_schema;
    options.process_outputs |= args.outputs;

    let previous = args
        .previous_layout
        .as_deref()
        .map(imports::read_file)
        .transpose()?;

    let manifest =
        engine::expand_to_manifest(&raw, &artifacts, &env, previous.as_deref(), &options)
            .map_err(|e| format!("{}: {}", e.kind, e))?;

    let rendered = match args.format {
        OutputFormat::Yaml => manifest.to_yaml()?,
        OutputFormat::Json => serde_json::to_string_pretty(&manifest)
            .map_err(|e| format!("cannot serialize manifest: {}", e))?,
    };

    match &args.output {
        Some(path) => std::fs::write(path, rendered)
            .map_err(|e| format!("cannot write {}: {}", path.display(), e))?,
        None => print!("{}", rendered),
    }
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let raw = imports::read_file(file)?;
    let document: Value =
        serde_yaml_ng::from_str(&raw).map_err(|e| format!("invalid YAML: {}", e))?;
    let errors = validate_document(&document);

    if errors.is_empty() {
        let count = document
            .get("resources")
            .and_then(Value::as_sequence)
            .map_or(0, Vec::len);
        println!("OK: {} ({} resources)", file.display(), count);
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

/// Check every root resource independently, then sibling uniqueness.
fn validate_document(document: &Value) -> Vec<String> {
    if !document.is_mapping() && !document.is_null() {
        return vec!["Input config must be a map".to_string()];
    }
    let entries = match document.get("resources") {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Sequence(items)) => items,
        Some(_) => return vec!["'resources' must be a list.".to_string()],
    };

    let mut errors = Vec::new();
    let mut resources = Vec::new();
    for entry in entries {
        match types::Resource::from_value(entry) {
            Ok(r) => resources.push(r),
            Err(e) => errors.push(e.to_string()),
        }
    }
    if let Err(e) = binder::bind_scope(&resources, binder::ROOT_SCOPE) {
        errors.push(e.to_string());
    }
    errors
}

fn cmd_schema() -> Result<(), String> {
    let schema = schemars::schema_for!(types::ExpandOptions);
    let json =
        serde_json::to_string_pretty(&schema).map_err(|e| format!("cannot render schema: {}", e))?;
    println!("{}", json);
    Ok(())
}

fn config_dir(file: &Path) -> PathBuf {
    match file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Parse `KEY=VALUE` entries.
fn parse_env(entries: &[String]) -> Result<types::Env, String> {
    entries
        .iter()
        .map(|entry| {
            entry
                .split_once('=')
                .filter(|(k, _)| !k.is_empty())
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| format!("invalid env entry '{}': expected KEY=VALUE", entry))
        })
        .collect()
}

/// Load options from YAML, or TOML when the extension is `.toml`.
fn load_options(path: &Path) -> Result<types::ExpandOptions, String> {
    let text = imports::read_file(path)?;
    let is_toml = path.extension().is_some_and(|ext| ext == "toml");
    if is_toml {
        toml::from_str(&text).map_err(|e| format!("invalid options {}: {}", path.display(), e))
    } else {
        serde_yaml_ng::from_str(&text)
            .map_err(|e| format!("invalid options {}: {}", path.display(), e))
    }
}
