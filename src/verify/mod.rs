//! Post-generation verification.
//!
//! Checks the produced tree against what the blueprint promised: declared
//! files exist, nothing else does, no unrendered template delimiters
//! survive, executable bits are set, and the module manifest only names
//! declared dependencies. The optional deep check delegates to a
//! caller-supplied compile oracle and surfaces its result verbatim.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::evaluator::FilePlan;
use crate::registry::Blueprint;
use crate::vfs::OutputFs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ValidationIssue {
    pub fn error(code: &str, message: impl Into<String>, path: Option<String>) -> Self {
        ValidationIssue {
            severity: Severity::Error,
            code: code.to_string(),
            message: message.into(),
            path,
        }
    }

    pub fn warning(code: &str, message: impl Into<String>, path: Option<String>) -> Self {
        ValidationIssue {
            severity: Severity::Warning,
            code: code.to_string(),
            message: message.into(),
            path,
        }
    }
}

/// External compile/lint oracle for the optional deep check. The core
/// never ships a compiler invocation; callers provide one and its verdict
/// is passed through untouched.
#[async_trait]
pub trait CompileOracle: Send + Sync {
    async fn check(&self, root: &Path) -> anyhow::Result<Vec<ValidationIssue>>;
}

/// What the validator needs to know about one finished generation.
pub struct ValidateContext<'a> {
    pub blueprint: &'a Blueprint,
    /// Descriptors whose condition held for this configuration.
    pub plans: &'a [FilePlan],
    /// Every path the generation accounts for: committed files, the
    /// synthesised module manifest, and hook-declared outputs.
    pub expected: &'a HashSet<String>,
    /// Relative path of the synthesised module manifest, when one was
    /// emitted.
    pub module_manifest: Option<&'a str>,
}

/// Run all structural checks. I/O problems while validating surface as
/// filesystem errors, not issues.
pub async fn validate(
    fs: &dyn OutputFs,
    ctx: &ValidateContext<'_>,
) -> std::io::Result<Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    // Declared files exist.
    for plan in ctx.plans {
        if !fs.exists(&plan.destination).await {
            issues.push(ValidationIssue::error(
                "missing_file",
                format!("declared file `{}` was not written", plan.destination),
                Some(plan.destination.clone()),
            ));
        }
    }

    // Nothing outside the declared tree.
    for file in fs.walk().await? {
        if !ctx.expected.contains(&file) {
            issues.push(ValidationIssue::error(
                "unexpected_file",
                format!("`{file}` is not part of the declared tree"),
                Some(file),
            ));
        }
    }

    // Rendered files carry no leftover delimiters.
    for plan in ctx.plans {
        if !plan.kind.is_rendered() || !fs.exists(&plan.destination).await {
            continue;
        }
        let bytes = fs.read(&plan.destination).await?;
        let text = String::from_utf8_lossy(&bytes);
        if text.contains("{{") || text.contains("}}") {
            issues.push(ValidationIssue::error(
                "unrendered_template",
                format!("`{}` contains unrendered template delimiters", plan.destination),
                Some(plan.destination.clone()),
            ));
        }
    }

    // Executable bits.
    for plan in ctx.plans {
        if plan.executable && fs.exists(&plan.destination).await {
            if !fs.is_executable(&plan.destination).await? {
                issues.push(ValidationIssue::error(
                    "missing_exec_bit",
                    format!("`{}` is not executable", plan.destination),
                    Some(plan.destination.clone()),
                ));
            }
        }
    }

    // The module manifest references only declared dependencies.
    if let Some(manifest) = ctx.module_manifest {
        if fs.exists(manifest).await {
            let bytes = fs.read(manifest).await?;
            let text = String::from_utf8_lossy(&bytes);
            let declared: HashSet<&str> = ctx
                .blueprint
                .dependencies()
                .iter()
                .map(|d| d.decl.name.as_str())
                .collect();
            for required in require_lines(&text) {
                if !declared.contains(required.as_str()) {
                    issues.push(ValidationIssue::error(
                        "undeclared_dependency",
                        format!("module manifest requires undeclared `{required}`"),
                        Some(manifest.to_string()),
                    ));
                }
            }
        }
    }

    debug!(issues = issues.len(), "structural validation finished");
    Ok(issues)
}

/// Run the deep check, folding an oracle failure into an error issue so
/// the caller sees the verdict either way.
pub async fn deep_validate(oracle: &dyn CompileOracle, root: &Path) -> Vec<ValidationIssue> {
    match oracle.check(root).await {
        Ok(issues) => issues,
        Err(e) => vec![ValidationIssue::error(
            "deep_check_failed",
            format!("compile oracle failed: {e:#}"),
            None,
        )],
    }
}

/// Module paths named in direct `require` directives of a go.mod-style
/// manifest. Indirect requires added by `tidy-modules` are not the
/// blueprint's to declare.
fn require_lines(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut in_block = false;
    for line in text.lines() {
        let line = line.trim();
        if line.contains("// indirect") {
            continue;
        }
        if in_block {
            if line == ")" {
                in_block = false;
                continue;
            }
            if let Some(name) = line.split_whitespace().next() {
                if !name.starts_with("//") {
                    names.push(name.to_string());
                }
            }
        } else if line == "require (" {
            in_block = true;
        } else if let Some(rest) = line.strip_prefix("require ") {
            if rest.trim() != "(" {
                if let Some(name) = rest.split_whitespace().next() {
                    names.push(name.to_string());
                }
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_lines_handle_both_forms_and_skip_indirect() {
        let text = "module example.com/x\n\ngo 1.24\n\nrequire github.com/a/b v1.0.0\n\nrequire (\n\tgithub.com/c/d v2.0.0\n\tgithub.com/e/f v0.1.0 // indirect\n)\n";
        assert_eq!(require_lines(text), vec!["github.com/a/b", "github.com/c/d"]);
    }

    #[test]
    fn severity_orders_error_above_warning() {
        assert!(Severity::Error > Severity::Warning);
    }
}
