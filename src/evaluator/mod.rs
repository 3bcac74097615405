//! Variable evaluation and file-manifest expansion.
//!
//! Builds the variable environment for one generation run (configuration
//! values, computed variables in declaration order, fixed built-ins),
//! resolves the conditional dependency set, and expands the blueprint's
//! file manifest into concrete file descriptors. Everything here is pure
//! and deterministic given the configuration and the pinned year.

pub mod condition;

use std::collections::HashMap;

use chrono::Datelike;
use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::registry::{Blueprint, FileKind};
use crate::resolver::Configuration;
use crate::template::{Environment, TemplateError, Value};
use crate::vfs::{clean_rel_path, PathViolation};

use condition::ConditionError;

/// Names bound in every environment regardless of the blueprint.
pub const BUILTIN_NAMES: &[&str] = &[
    "ProjectName",
    "ModulePath",
    "GoVersion",
    "Year",
    "GeneratorVersion",
];

/// The resolved dependency list binding consumed by module-manifest
/// templates.
pub const DEPENDENCIES_BINDING: &str = "Dependencies";

/// Go toolchain version written when a blueprint declares no
/// `go_version` parameter.
pub const DEFAULT_GO_VERSION: &str = "1.24";

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("{scope}: {source}")]
    Template {
        scope: String,
        source: TemplateError,
    },

    #[error("{scope}: {source}")]
    Condition {
        scope: String,
        source: ConditionError,
    },

    #[error("destination `{destination}` escapes the output root: {violation}")]
    PathEscapes {
        destination: String,
        violation: PathViolation,
    },

    #[error("files `{first}` and `{second}` both resolve to `{destination}`")]
    Conflict {
        destination: String,
        first: String,
        second: String,
    },
}

/// Values pinned once at the start of a generation run, so every file
/// rendered within the run agrees on them.
#[derive(Debug, Clone)]
pub struct Builtins {
    pub year: i32,
    pub generator_version: String,
}

impl Builtins {
    /// Pin the current year and this crate's version.
    pub fn pinned() -> Self {
        Builtins {
            year: chrono::Utc::now().year(),
            generator_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_year(year: i32) -> Self {
        Builtins {
            year,
            ..Self::pinned()
        }
    }
}

/// One dependency whose condition held for this configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedDependency {
    pub name: String,
    pub version: String,
}

/// A concrete file descriptor: condition held, destination rendered and
/// normalised.
#[derive(Debug, Clone)]
pub struct FilePlan {
    /// Index into the blueprint's compiled file list.
    pub index: usize,
    pub source: String,
    pub destination: String,
    pub kind: FileKind,
    pub executable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ConditionFalse,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::ConditionFalse => write!(f, "condition_false"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub source: String,
    pub destination: String,
    pub reason: SkipReason,
}

/// Everything the orchestrator needs to start writing.
#[derive(Debug)]
pub struct Evaluated {
    pub env: Environment,
    pub files: Vec<FilePlan>,
    pub skipped: Vec<SkippedFile>,
    pub dependencies: Vec<ResolvedDependency>,
}

/// Evaluate variables, resolve dependencies, and expand the file manifest.
pub fn evaluate(
    blueprint: &Blueprint,
    config: &Configuration,
    builtins: &Builtins,
) -> Result<Evaluated, EvalError> {
    let mut env = Environment::new();
    crate::resolver::bind_configuration(config, &mut env);
    bind_builtins(blueprint, config, builtins, &mut env);

    // Computed variables, strictly in declaration order. Forward
    // references were rejected at registry load.
    for variable in blueprint.variables() {
        let rendered = variable.template.render(&env).map_err(|source| {
            EvalError::Template {
                scope: format!("variable `{}`", variable.name),
                source,
            }
        })?;
        debug!(variable = %variable.name, value = %rendered, "evaluated variable");
        env.bind(variable.name.clone(), Value::Str(rendered));
    }

    let dependencies = resolve_dependencies(blueprint, &env)?;
    bind_dependencies(&dependencies, &mut env);

    let (files, skipped) = expand_files(blueprint, &env)?;

    Ok(Evaluated {
        env,
        files,
        skipped,
        dependencies,
    })
}

fn bind_builtins(
    blueprint: &Blueprint,
    config: &Configuration,
    builtins: &Builtins,
    env: &mut Environment,
) {
    let project_name = config
        .raw("project_name")
        .unwrap_or_else(|| blueprint.id().to_string());
    let module_path = config
        .raw("module_path")
        .unwrap_or_else(|| project_name.clone());
    let go_version = config
        .raw("go_version")
        .unwrap_or_else(|| DEFAULT_GO_VERSION.to_string());

    env.bind("ProjectName", Value::Str(project_name));
    env.bind("ModulePath", Value::Str(module_path));
    env.bind("GoVersion", Value::Str(go_version));
    env.bind("Year", Value::Int(builtins.year as i64));
    env.bind(
        "GeneratorVersion",
        Value::Str(builtins.generator_version.clone()),
    );
}

fn resolve_dependencies(
    blueprint: &Blueprint,
    env: &Environment,
) -> Result<Vec<ResolvedDependency>, EvalError> {
    let mut resolved = Vec::new();
    for dep in blueprint.dependencies() {
        let wanted = match &dep.condition {
            Some(cond) => cond.eval(env).map_err(|source| EvalError::Condition {
                scope: format!("dependency `{}`", dep.decl.name),
                source,
            })?,
            None => true,
        };
        if wanted {
            resolved.push(ResolvedDependency {
                name: dep.decl.name.clone(),
                version: dep.decl.version.clone(),
            });
        }
    }
    Ok(resolved)
}

fn bind_dependencies(dependencies: &[ResolvedDependency], env: &mut Environment) {
    let items = dependencies
        .iter()
        .map(|dep| {
            let mut fields = IndexMap::new();
            fields.insert("Name".to_string(), Value::Str(dep.name.clone()));
            fields.insert("Version".to_string(), Value::Str(dep.version.clone()));
            Value::Map(fields)
        })
        .collect();
    env.bind(DEPENDENCIES_BINDING, Value::List(items));
}

fn expand_files(
    blueprint: &Blueprint,
    env: &Environment,
) -> Result<(Vec<FilePlan>, Vec<SkippedFile>), EvalError> {
    let mut files = Vec::new();
    let mut skipped = Vec::new();
    let mut claimed: HashMap<String, String> = HashMap::new();

    for (index, file) in blueprint.files().iter().enumerate() {
        let wanted = match &file.condition {
            Some(cond) => cond.eval(env).map_err(|source| EvalError::Condition {
                scope: format!("file `{}`", file.entry.source),
                source,
            })?,
            None => true,
        };
        if !wanted {
            skipped.push(SkippedFile {
                source: file.entry.source.clone(),
                destination: file.entry.destination.clone(),
                reason: SkipReason::ConditionFalse,
            });
            continue;
        }

        let rendered = file.destination.render(env).map_err(|source| {
            EvalError::Template {
                scope: format!("destination of `{}`", file.entry.source),
                source,
            }
        })?;
        let destination =
            clean_rel_path(&rendered).map_err(|violation| EvalError::PathEscapes {
                destination: rendered.clone(),
                violation,
            })?;

        if let Some(first) = claimed.get(&destination) {
            return Err(EvalError::Conflict {
                destination,
                first: first.clone(),
                second: file.entry.source.clone(),
            });
        }
        claimed.insert(destination.clone(), file.entry.source.clone());

        files.push(FilePlan {
            index,
            source: file.entry.source.clone(),
            destination,
            kind: file.entry.kind,
            executable: file.entry.executable,
        });
    }
    Ok((files, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MemorySource, Registry};
    use crate::resolver::{resolve, ResolveInputs};
    use indexmap::IndexMap as Map;

    const MANIFEST: &str = r#"
version: 1
id: demo
name: Demo
description: demo
category: cli
complexity: simple
parameters:
  - name: project_name
    kind: text
    required: true
  - name: module_path
    kind: module-path
    required: true
  - name: framework
    kind: enum
    default: gin
    options:
      - {value: none, label: Standard library}
      - {value: gin, label: Gin}
variables:
  - name: binary_name
    expression: "{{ .project_name | kebab }}"
  - name: handler_pkg
    expression: "{{ .binary_name }}_handlers"
files:
  - source: main.go.tmpl
    destination: main.go
    kind: source
  - source: handler.go.tmpl
    destination: "internal/{{ .handler_pkg }}/handler.go"
    kind: source
    condition: framework != "none"
dependencies:
  - name: github.com/spf13/cobra
    version: v1.8.0
  - name: github.com/gin-gonic/gin
    version: v1.10.0
    condition: framework == "gin"
"#;

    fn evaluated(framework: &str) -> Evaluated {
        let mut src = MemorySource::new();
        src.add("demo", "template.yaml", MANIFEST)
            .add("demo", "main.go.tmpl", "package main\n")
            .add("demo", "handler.go.tmpl", "package handlers\n");
        let registry = Registry::load(src).unwrap();
        let bp = registry.get("demo").unwrap();
        let overrides: Map<String, String> = [
            ("project_name".to_string(), "My_Tool".to_string()),
            ("module_path".to_string(), "example.com/mytool".to_string()),
            ("framework".to_string(), framework.to_string()),
        ]
        .into_iter()
        .collect();
        let config = resolve(bp, &ResolveInputs::from_overrides(overrides)).unwrap();
        evaluate(bp, &config, &Builtins::with_year(2026)).unwrap()
    }

    #[test]
    fn variables_evaluate_in_order_and_chain() {
        let out = evaluated("gin");
        assert_eq!(
            out.env.get("binary_name"),
            Some(&Value::Str("my-tool".into()))
        );
        assert_eq!(
            out.env.get("handler_pkg"),
            Some(&Value::Str("my-tool_handlers".into()))
        );
    }

    #[test]
    fn builtins_are_bound() {
        let out = evaluated("gin");
        assert_eq!(out.env.get("ProjectName"), Some(&Value::Str("My_Tool".into())));
        assert_eq!(
            out.env.get("ModulePath"),
            Some(&Value::Str("example.com/mytool".into()))
        );
        assert_eq!(out.env.get("Year"), Some(&Value::Int(2026)));
        assert_eq!(out.env.get("GoVersion"), Some(&Value::Str(DEFAULT_GO_VERSION.into())));
    }

    #[test]
    fn conditional_files_skip_with_reason() {
        let out = evaluated("none");
        assert_eq!(out.files.len(), 1);
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].reason, SkipReason::ConditionFalse);

        let out = evaluated("gin");
        assert_eq!(out.files.len(), 2);
        assert_eq!(
            out.files[1].destination,
            "internal/my-tool_handlers/handler.go"
        );
        assert!(out.skipped.is_empty());
    }

    #[test]
    fn conditional_dependencies_follow_the_configuration() {
        let out = evaluated("none");
        let names: Vec<&str> = out.dependencies.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["github.com/spf13/cobra"]);

        let out = evaluated("gin");
        assert_eq!(out.dependencies.len(), 2);
        match out.env.get(DEPENDENCIES_BINDING) {
            Some(Value::List(items)) => assert_eq!(items.len(), 2),
            other => panic!("dependencies binding missing: {other:?}"),
        }
    }

    #[test]
    fn evaluation_is_deterministic() {
        let a = evaluated("gin");
        let b = evaluated("gin");
        assert_eq!(
            a.files.iter().map(|f| &f.destination).collect::<Vec<_>>(),
            b.files.iter().map(|f| &f.destination).collect::<Vec<_>>()
        );
        assert_eq!(a.dependencies, b.dependencies);
    }
}
