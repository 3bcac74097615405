//! Post-generation hooks.
//!
//! Hooks are declared by blueprints but only allow-listed names are
//! accepted, each mapping to a fixed action: two run as subprocesses
//! (`gofmt`, `go`), the rest are internal filesystem operations. Hooks run
//! sequentially after file emission, each with a timeout and a declared
//! failure policy.

mod runner;

use serde::Serialize;
use thiserror::Error;

pub use runner::{run_hooks, HookRun};

#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook `{name}` failed: {message}")]
    Failed { name: String, message: String },

    #[error("hook `{name}` timed out after {timeout_secs}s")]
    TimedOut { name: String, timeout_secs: u64 },
}

/// The closed set of recognised hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookKind {
    FormatSource,
    TidyModules,
    MakeExecutable,
    EmitShellCompletion,
    RemoveEmptyDirs,
}

impl HookKind {
    /// Accepts exactly the allow-listed names; anything else is a manifest
    /// validation error at registry load.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "format-source" => Some(HookKind::FormatSource),
            "tidy-modules" => Some(HookKind::TidyModules),
            "make-executable" => Some(HookKind::MakeExecutable),
            "emit-shell-completion" => Some(HookKind::EmitShellCompletion),
            "remove-empty-dirs" => Some(HookKind::RemoveEmptyDirs),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HookKind::FormatSource => "format-source",
            HookKind::TidyModules => "tidy-modules",
            HookKind::MakeExecutable => "make-executable",
            HookKind::EmitShellCompletion => "emit-shell-completion",
            HookKind::RemoveEmptyDirs => "remove-empty-dirs",
        }
    }

    /// Internal hooks run through the filesystem capability instead of
    /// spawning a process.
    pub fn is_internal(&self) -> bool {
        matches!(self, HookKind::MakeExecutable | HookKind::RemoveEmptyDirs)
    }

    /// Fixed executable for process-backed hooks.
    pub fn program(&self) -> Option<&'static str> {
        match self {
            HookKind::FormatSource => Some("gofmt"),
            HookKind::TidyModules | HookKind::EmitShellCompletion => Some("go"),
            _ => None,
        }
    }

    /// Arguments used when the manifest declares none.
    pub fn default_args(&self) -> &'static [&'static str] {
        match self {
            HookKind::FormatSource => &["-w", "."],
            HookKind::TidyModules => &["mod", "tidy"],
            HookKind::EmitShellCompletion => &["run", ".", "completion", "bash"],
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStatus {
    Succeeded,
    Failed,
    TimedOut,
}

/// What one hook did, recorded into the generation report.
#[derive(Debug, Clone, Serialize)]
pub struct HookOutcome {
    pub name: String,
    pub status: HookStatus,
    pub duration_ms: u64,
    pub policy: crate::registry::FailurePolicy,
    /// Captured output, truncated to a few KiB.
    pub log: String,
}
