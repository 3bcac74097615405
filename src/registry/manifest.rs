//! On-disk manifest schema for `template.yaml`.
//!
//! Structural rules live here as serde derives; semantic rules live in
//! [`super::validate`]. Unknown keys are rejected at every level so a typo
//! in a manifest fails the whole registry load instead of being ignored.

use serde::{Deserialize, Serialize};

/// The only manifest schema version this build understands.
pub const SUPPORTED_VERSION: u32 = 1;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub version: u32,
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub complexity: Complexity,
    #[serde(default)]
    pub parameters: Vec<ParameterDecl>,
    #[serde(default)]
    pub variables: Vec<VariableDecl>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub dependencies: Vec<DependencyDecl>,
    #[serde(default)]
    pub hooks: Vec<HookDecl>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Standard,
    Advanced,
    Expert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisclosureTier {
    #[default]
    Basic,
    Advanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParamKind {
    #[default]
    Text,
    Enum,
    Bool,
    Int,
    ModulePath,
}

impl ParamKind {
    pub fn label(&self) -> &'static str {
        match self {
            ParamKind::Text => "free-text",
            ParamKind::Enum => "enum",
            ParamKind::Bool => "boolean",
            ParamKind::Int => "integer",
            ParamKind::ModulePath => "module-path",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterDecl {
    pub name: String,
    #[serde(default)]
    pub kind: ParamKind,
    /// Human label shown by external prompters.
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default: Option<serde_yaml::Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub tier: DisclosureTier,

    // Free-text validation.
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,

    // Enum membership.
    #[serde(default)]
    pub options: Vec<EnumOption>,

    // Integer range, inclusive.
    #[serde(default)]
    pub min: Option<i64>,
    #[serde(default)]
    pub max: Option<i64>,

    // Dependency gating.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub gate: Option<String>,
    #[serde(default)]
    pub disabled_value: Option<serde_yaml::Value>,
    #[serde(default)]
    pub rules: Vec<DependencyRule>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnumOption {
    pub value: String,
    pub label: String,
}

/// A consistency rule on a dependency-gated parameter: when `when` holds,
/// the listed values are rejected.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyRule {
    pub when: String,
    pub deny: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableDecl {
    pub name: String,
    pub expression: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    #[default]
    Text,
    /// Text that the optimisation pass may rewrite.
    Source,
    Binary,
    Script,
}

impl FileKind {
    /// Whether the file body is rendered through the template engine.
    pub fn is_rendered(&self) -> bool {
        matches!(self, FileKind::Text | FileKind::Source)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileEntry {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub executable: bool,
    #[serde(default)]
    pub kind: FileKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyDecl {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Fatal,
    Warn,
    Ignore,
}

pub const DEFAULT_HOOK_TIMEOUT_SECS: u64 = 60;

fn default_hook_timeout() -> u64 {
    DEFAULT_HOOK_TIMEOUT_SECS
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookDecl {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory relative to the output root.
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default = "default_hook_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub policy: FailurePolicy,
    /// Paths the hook may create; they join the declared tree for the
    /// post-generation stray-file check.
    #[serde(default)]
    pub creates: Vec<String>,
}

/// Render a YAML scalar default into the raw string form the resolver
/// coerces. Non-scalar defaults are a manifest validation error.
pub fn scalar_to_raw(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
version: 1
id: cli-simple
name: Simple CLI
description: A minimal command line tool.
category: cli
complexity: simple
"#;

    #[test]
    fn minimal_manifest_parses() {
        let m: Manifest = serde_yaml::from_str(MINIMAL).unwrap();
        assert_eq!(m.id, "cli-simple");
        assert_eq!(m.complexity, Complexity::Simple);
        assert!(m.parameters.is_empty());
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let bad = format!("{MINIMAL}\nunexpected_key: true\n");
        assert!(serde_yaml::from_str::<Manifest>(&bad).is_err());
    }

    #[test]
    fn unknown_parameter_key_is_rejected() {
        let bad = format!(
            "{MINIMAL}\nparameters:\n  - name: p\n    kind: text\n    regexp: bad\n"
        );
        assert!(serde_yaml::from_str::<Manifest>(&bad).is_err());
    }

    #[test]
    fn parameter_declaration_parses() {
        let src = format!(
            r#"{MINIMAL}
parameters:
  - name: framework
    kind: enum
    label: Web framework
    default: gin
    tier: basic
    options:
      - {{value: none, label: Standard library}}
      - {{value: gin, label: Gin}}
  - name: port
    kind: int
    default: 8080
    min: 1
    max: 65535
    tier: advanced
"#
        );
        let m: Manifest = serde_yaml::from_str(&src).unwrap();
        assert_eq!(m.parameters.len(), 2);
        assert_eq!(m.parameters[0].kind, ParamKind::Enum);
        assert_eq!(m.parameters[0].options.len(), 2);
        assert_eq!(
            scalar_to_raw(m.parameters[1].default.as_ref().unwrap()),
            Some("8080".to_string())
        );
        assert_eq!(m.parameters[1].tier, DisclosureTier::Advanced);
    }

    #[test]
    fn file_entry_defaults() {
        let src = format!(
            "{MINIMAL}\nfiles:\n  - source: main.go.tmpl\n    destination: main.go\n"
        );
        let m: Manifest = serde_yaml::from_str(&src).unwrap();
        assert_eq!(m.files[0].kind, FileKind::Text);
        assert!(!m.files[0].executable);
        assert!(m.files[0].condition.is_none());
    }

    #[test]
    fn hook_defaults() {
        let src = format!("{MINIMAL}\nhooks:\n  - name: format-source\n");
        let m: Manifest = serde_yaml::from_str(&src).unwrap();
        assert_eq!(m.hooks[0].timeout_secs, DEFAULT_HOOK_TIMEOUT_SECS);
        assert_eq!(m.hooks[0].policy, FailurePolicy::Fatal);
    }
}
