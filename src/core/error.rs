//! Expansion failures.
//!
//! Every failure is a single tagged [`ExpansionError`] carrying the offending
//! resource (or artifact) name and a human-readable message. There is no
//! partial result: the first error aborts the whole call.

use std::fmt;

/// Failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Root document or previous layout could not be parsed, or is not a map.
    InvalidConfig,
    /// Resource is missing its name, or its type/action is missing or doubled.
    InvalidResource,
    /// Two siblings share a name.
    DuplicateName,
    /// Template artifact absent from the active artifact table.
    MissingTemplate,
    /// Artifact is neither a text template nor a script.
    UnsupportedArtifact,
    /// Template output is unparseable or lacks a `resources` list.
    MalformedTemplate,
    /// Text template render or script generator failed.
    TemplateExecution,
    /// Structural reference to a name that is not a sibling.
    UnresolvedReference,
    /// Value reference to an output that was never declared.
    ReferencedResourceNotFound,
    /// Access outside the artifact table.
    UnavailableArtifact,
    /// Schema artifact could not be parsed.
    InvalidSchema,
    /// Nesting limit exceeded; fatal.
    ResourceExhausted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig => write!(f, "InvalidConfigError"),
            Self::InvalidResource => write!(f, "InvalidResourceError"),
            Self::DuplicateName => write!(f, "DuplicateNameError"),
            Self::MissingTemplate => write!(f, "MissingTemplateError"),
            Self::UnsupportedArtifact => write!(f, "UnsupportedArtifactError"),
            Self::MalformedTemplate => write!(f, "MalformedTemplateError"),
            Self::TemplateExecution => write!(f, "TemplateExecutionError"),
            Self::UnresolvedReference => write!(f, "UnresolvedReferenceError"),
            Self::ReferencedResourceNotFound => write!(f, "ReferencedResourceNotFoundError"),
            Self::UnavailableArtifact => write!(f, "UnavailableArtifactError"),
            Self::InvalidSchema => write!(f, "InvalidSchemaError"),
            Self::ResourceExhausted => write!(f, "ResourceExhaustedError"),
        }
    }
}

/// An expansion failure attributed to a resource or artifact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} Resource: {resource}")]
pub struct ExpansionError {
    /// Failure category.
    pub kind: ErrorKind,
    /// Offending resource name, artifact path, or scope.
    pub resource: String,
    /// Detail.
    pub message: String,
}

impl ExpansionError {
    pub fn new(kind: ErrorKind, resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig, "config", message)
    }

    pub fn invalid_resource(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidResource, resource, message)
    }

    pub fn duplicate_name(name: &str, scope: &str) -> Self {
        Self::new(
            ErrorKind::DuplicateName,
            name,
            format!("Resource name '{}' is not unique in {}.", name, scope),
        )
    }

    pub fn missing_template(resource: &str, path: &str) -> Self {
        Self::new(
            ErrorKind::MissingTemplate,
            resource,
            format!("Unable to find source file {} in imports.", path),
        )
    }

    pub fn unsupported_artifact(path: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedArtifact, path, message)
    }

    pub fn malformed_template(path: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedTemplate, path, message)
    }

    pub fn template_execution(path: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TemplateExecution, path, message)
    }

    pub fn unresolved_reference(resource: &str, reference: &str) -> Self {
        Self::new(
            ErrorKind::UnresolvedReference,
            resource,
            format!(
                "Reference '{}' does not name a resource declared in the same scope.",
                reference
            ),
        )
    }

    pub fn referenced_resource_not_found(target: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ReferencedResourceNotFound, target, message)
    }

    pub fn unavailable_artifact(path: &str) -> Self {
        Self::new(
            ErrorKind::UnavailableArtifact,
            path,
            format!("file '{}' is not available", path),
        )
    }

    pub fn invalid_schema(path: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidSchema, path, message)
    }

    pub fn resource_exhausted(resource: &str, limit: usize) -> Self {
        Self::new(
            ErrorKind::ResourceExhausted,
            resource,
            format!("Template nesting exceeds the limit of {} levels.", limit),
        )
    }

    /// Whether the failure is resource exhaustion rather than a plain
    /// expansion error.
    pub fn is_fatal(&self) -> bool {
        self.kind == ErrorKind::ResourceExhausted
    }
}
