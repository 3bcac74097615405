//! Blueprint registry.
//!
//! Loads, indexes, and validates blueprint definitions from a read-only
//! source filesystem. Manifests are parsed eagerly and a single broken
//! blueprint fails the whole load, so a process that holds a `Registry`
//! holds only valid blueprints. The registry is immutable after load and
//! can be shared freely across generation runs.

pub mod manifest;
pub mod source;
mod validate;

use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;

use crate::evaluator::condition::Condition;
use crate::hooks::HookKind;
use crate::template::Template;

pub use manifest::{
    Complexity, DependencyDecl, DisclosureTier, EnumOption, FailurePolicy, FileEntry, FileKind,
    HookDecl, Manifest, ParamKind, ParameterDecl, VariableDecl,
};
pub use source::{BlueprintSource, DiskSource, EmbeddedSource, MemorySource};

pub const MANIFEST_FILE: &str = "template.yaml";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown blueprint `{id}`")]
    UnknownBlueprint { id: String },

    #[error("blueprint `{dir}`: manifest parse failed: {message}")]
    ManifestParseFailed { dir: String, message: String },

    #[error("blueprint `{dir}`: {message}")]
    ManifestValidationFailed { dir: String, message: String },

    #[error("duplicate blueprint id `{id}` declared by `{first}` and `{second}`")]
    DuplicateBlueprintId {
        id: String,
        first: String,
        second: String,
    },

    #[error("blueprint source: {0}")]
    Source(#[from] std::io::Error),
}

/// A file entry compiled against its blueprint: parsed condition, parsed
/// destination template, and, for rendered kinds, the parsed body.
#[derive(Debug, Clone)]
pub struct CompiledFile {
    pub entry: FileEntry,
    pub condition: Option<Condition>,
    pub destination: Template,
    pub body: Option<Template>,
}

#[derive(Debug, Clone)]
pub struct CompiledVariable {
    pub name: String,
    pub template: Template,
}

#[derive(Debug, Clone)]
pub struct CompiledDependency {
    pub decl: DependencyDecl,
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone)]
pub struct CompiledHook {
    pub decl: HookDecl,
    pub kind: HookKind,
    pub args: Vec<Template>,
}

/// A validated blueprint: the raw manifest plus everything compiled out of
/// it at load time.
#[derive(Debug, Clone)]
pub struct Blueprint {
    manifest: Manifest,
    dir: String,
    raw_manifest: Vec<u8>,
    files: Vec<CompiledFile>,
    variables: Vec<CompiledVariable>,
    dependencies: Vec<CompiledDependency>,
    hooks: Vec<CompiledHook>,
}

impl Blueprint {
    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Directory name under the source root.
    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn parameters(&self) -> &[ParameterDecl] {
        &self.manifest.parameters
    }

    pub fn files(&self) -> &[CompiledFile] {
        &self.files
    }

    pub fn variables(&self) -> &[CompiledVariable] {
        &self.variables
    }

    pub fn dependencies(&self) -> &[CompiledDependency] {
        &self.dependencies
    }

    pub fn hooks(&self) -> &[CompiledHook] {
        &self.hooks
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterDecl> {
        self.manifest.parameters.iter().find(|p| p.name == name)
    }
}

/// One line of `list()` output.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub complexity: Complexity,
}

pub struct Registry {
    blueprints: IndexMap<String, Blueprint>,
    source: Arc<dyn BlueprintSource>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("blueprints", &self.blueprints.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    /// Load and validate every blueprint under the source root.
    pub fn load(source: impl BlueprintSource + 'static) -> Result<Self, RegistryError> {
        Self::load_arc(Arc::new(source))
    }

    /// The blueprint set compiled into this crate.
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::load(EmbeddedSource::new())
    }

    fn load_arc(source: Arc<dyn BlueprintSource>) -> Result<Self, RegistryError> {
        let mut blueprints: IndexMap<String, Blueprint> = IndexMap::new();

        for dir in source.blueprint_dirs()? {
            let raw = source.read(&dir, MANIFEST_FILE).map_err(|e| {
                RegistryError::ManifestParseFailed {
                    dir: dir.clone(),
                    message: format!("cannot read {MANIFEST_FILE}: {e}"),
                }
            })?;
            let manifest: Manifest = serde_yaml::from_slice(&raw).map_err(|e| {
                RegistryError::ManifestParseFailed {
                    dir: dir.clone(),
                    message: e.to_string(),
                }
            })?;

            let listing: Vec<String> = source
                .list_files(&dir)?
                .into_iter()
                .filter(|p| p != MANIFEST_FILE)
                .collect();
            let mut read_body = |rel: &str| source.read(&dir, rel);
            let compiled = validate::compile(&manifest, &listing, &mut read_body)
                .map_err(|message| RegistryError::ManifestValidationFailed {
                    dir: dir.clone(),
                    message,
                })?;

            let blueprint = Blueprint {
                dir: dir.clone(),
                raw_manifest: raw,
                files: compiled.files,
                variables: compiled.variables,
                dependencies: compiled.dependencies,
                hooks: compiled.hooks,
                manifest,
            };

            // Same id twice: the later declaration wins only when the
            // manifests are byte-identical.
            if let Some(existing) = blueprints.get(blueprint.id()) {
                if existing.raw_manifest != blueprint.raw_manifest {
                    return Err(RegistryError::DuplicateBlueprintId {
                        id: blueprint.id().to_string(),
                        first: existing.dir.clone(),
                        second: dir,
                    });
                }
            }
            debug!(blueprint = %blueprint.id(), dir = %dir, "loaded blueprint");
            blueprints.insert(blueprint.id().to_string(), blueprint);
        }

        Ok(Registry { blueprints, source })
    }

    /// Enumerate blueprints, ordered by id.
    pub fn list(&self) -> Vec<Summary> {
        let mut summaries: Vec<Summary> = self
            .blueprints
            .values()
            .map(|bp| Summary {
                id: bp.manifest.id.clone(),
                name: bp.manifest.name.clone(),
                description: bp.manifest.description.clone(),
                category: bp.manifest.category.clone(),
                complexity: bp.manifest.complexity,
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub fn get(&self, id: &str) -> Result<&Blueprint, RegistryError> {
        self.blueprints
            .get(id)
            .ok_or_else(|| RegistryError::UnknownBlueprint { id: id.to_string() })
    }

    /// Raw bytes of a blueprint file, for binary and script copies.
    pub fn read_blueprint_file(
        &self,
        blueprint: &Blueprint,
        rel: &str,
    ) -> Result<Vec<u8>, RegistryError> {
        Ok(self.source.read(&blueprint.dir, rel)?)
    }

    pub fn len(&self) -> usize {
        self.blueprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blueprints.is_empty()
    }
}
