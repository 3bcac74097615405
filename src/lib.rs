//! Blueprint-driven Go project generation.
//!
//! Given a registry of parameterised blueprints and a fully-specified
//! configuration, the engine produces a complete on-disk project tree:
//! configuration resolution with progressive disclosure, a template
//! language with a closed helper set, conditional files and dependencies,
//! transactional file emission with rollback, an allow-listed hook chain,
//! post-generation validation, and an optional import-cleanup pass.

pub mod error;
pub mod evaluator;
pub mod generator;
pub mod hooks;
pub mod optimize;
pub mod registry;
pub mod resolver;
pub mod template;
pub mod verify;
pub mod vfs;

// Re-export the surface a caller needs for a generation round trip.
pub use error::{ErrorKind, GoforgeError, GoforgeResult, WithOperation};
pub use evaluator::{Builtins, ResolvedDependency, SkipReason, SkippedFile};
pub use generator::{
    GenerationFailure, GenerationReport, GenerationRequest, Generator, OverwritePolicy,
    MODULE_MANIFEST,
};
pub use hooks::{HookKind, HookOutcome, HookStatus};
pub use registry::{
    Blueprint, BlueprintSource, Complexity, DiskSource, DisclosureTier, EmbeddedSource, FileKind,
    MemorySource, Registry, RegistryError, Summary,
};
pub use resolver::{questions, resolve, Configuration, ParamValue, ResolveInputs};
pub use template::{Environment, Template, TemplateError, Value};
pub use verify::{CompileOracle, Severity, ValidationIssue};
pub use vfs::{DiskFs, MemoryFs, OutputFs};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
