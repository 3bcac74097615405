//! Crate-wide error model.
//!
//! Component errors fold into [`ErrorKind`], and [`GoforgeError`] carries a
//! kind plus the path of enclosing operation names it propagated through.
//! Every kind maps to a stable machine-readable code; nothing here prints
//! to process streams, rendering is the caller's job.

use std::fmt;

use thiserror::Error;

use crate::evaluator::EvalError;
use crate::hooks::HookError;
use crate::optimize::OptimizeError;
use crate::registry::RegistryError;
use crate::resolver::ResolveError;
use crate::template::TemplateError;

/// The closed error taxonomy.
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error("template rendering failed: {0}")]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Optimize(#[from] OptimizeError),

    #[error("output root `{path}` exists and is not empty")]
    OutputRootNotEmpty { path: String },

    #[error("validation failed with {count} error-severity issue(s)")]
    ValidationFailed { count: usize },

    #[error("generation cancelled")]
    Cancelled,

    #[error("filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),
}

impl ErrorKind {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Registry(e) => match e {
                RegistryError::UnknownBlueprint { .. } => "unknown_blueprint",
                RegistryError::ManifestParseFailed { .. } => "manifest_parse_failed",
                RegistryError::ManifestValidationFailed { .. } => "manifest_validation_failed",
                RegistryError::DuplicateBlueprintId { .. } => "duplicate_blueprint_id",
                RegistryError::Source(_) => "filesystem_error",
            },
            ErrorKind::Resolve(e) => match e {
                ResolveError::UnknownParameter { .. } => "unknown_parameter",
                ResolveError::MissingRequiredParameter { .. } => "missing_required_parameter",
                ResolveError::ParameterValidationFailed { .. } => "parameter_validation_failed",
                ResolveError::InconsistentDependency { .. } => "inconsistent_dependency",
            },
            ErrorKind::Eval(e) => match e {
                EvalError::Template { .. } => "template_eval_error",
                EvalError::Condition { .. } => "condition_eval_error",
                EvalError::PathEscapes { .. } => "path_escapes_output_root",
                EvalError::Conflict { .. } => "generation_conflict",
            },
            ErrorKind::Template(_) => "template_eval_error",
            ErrorKind::Hook(e) => match e {
                HookError::Failed { .. } => "hook_failed",
                HookError::TimedOut { .. } => "hook_timed_out",
            },
            ErrorKind::Optimize(_) => "optimisation_failed",
            ErrorKind::OutputRootNotEmpty { .. } => "output_root_not_empty",
            ErrorKind::ValidationFailed { .. } => "validation_failed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Filesystem(_) => "filesystem_error",
        }
    }
}

/// An error with the path of operations it crossed, outermost first.
#[derive(Debug)]
pub struct GoforgeError {
    kind: ErrorKind,
    operations: Vec<&'static str>,
}

impl GoforgeError {
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        GoforgeError {
            kind: kind.into(),
            operations: Vec::new(),
        }
    }

    /// Prepend an enclosing operation name.
    pub fn op(mut self, name: &'static str) -> Self {
        self.operations.insert(0, name);
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Enclosing operation names, outermost first.
    pub fn operations(&self) -> &[&'static str] {
        &self.operations
    }
}

impl fmt::Display for GoforgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operations.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.operations.join("/"), self.kind)
        }
    }
}

impl std::error::Error for GoforgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

macro_rules! from_component_error {
    ($($source:ty),* $(,)?) => {
        $(impl From<$source> for GoforgeError {
            fn from(e: $source) -> Self {
                GoforgeError::new(e)
            }
        })*
    };
}

from_component_error!(
    RegistryError,
    ResolveError,
    EvalError,
    TemplateError,
    HookError,
    OptimizeError,
    std::io::Error,
    ErrorKind,
);

/// Result alias used across the crate's public surface.
pub type GoforgeResult<T> = Result<T, GoforgeError>;

/// Attach an operation name to the error side of a result.
pub trait WithOperation<T> {
    fn op(self, name: &'static str) -> GoforgeResult<T>;
}

impl<T, E: Into<GoforgeError>> WithOperation<T> for Result<T, E> {
    fn op(self, name: &'static str) -> GoforgeResult<T> {
        self.map_err(|e| e.into().op(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let err = GoforgeError::new(ErrorKind::Cancelled);
        assert_eq!(err.code(), "cancelled");

        let err: GoforgeError = RegistryError::UnknownBlueprint { id: "nope".into() }.into();
        assert_eq!(err.code(), "unknown_blueprint");

        let err: GoforgeError = ResolveError::MissingRequiredParameter {
            name: "module_path".into(),
        }
        .into();
        assert_eq!(err.code(), "missing_required_parameter");
    }

    #[test]
    fn operation_path_prepends_outermost_first() {
        let err = GoforgeError::new(ErrorKind::Cancelled)
            .op("write_files")
            .op("generate");
        assert_eq!(err.operations(), &["generate", "write_files"]);
        assert_eq!(err.to_string(), "generate/write_files: generation cancelled");
    }

    #[test]
    fn with_operation_on_results() {
        let result: Result<(), RegistryError> =
            Err(RegistryError::UnknownBlueprint { id: "x".into() });
        let err = result.op("load").unwrap_err();
        assert_eq!(err.operations(), &["load"]);
    }
}
