//! Structured generation report.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::evaluator::{ResolvedDependency, SkippedFile};
use crate::hooks::HookOutcome;
use crate::verify::{Severity, ValidationIssue};

/// What one `generate` call did. Created when the run starts, finalised on
/// success or terminal failure, returned to the caller either way.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub run_id: Uuid,
    pub blueprint_id: String,
    pub output_root: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    /// Written files grouped by kind (`text`, `source`, `binary`, `script`,
    /// `manifest`).
    pub files_written: BTreeMap<String, Vec<String>>,
    pub files_skipped: Vec<SkippedFile>,
    pub dependencies: Vec<ResolvedDependency>,
    pub hooks: Vec<HookOutcome>,
    pub validation_issues: Vec<ValidationIssue>,
    /// Files rewritten by the optimisation pass.
    pub optimized: Vec<String>,
    /// True when a failure rolled the output root back to its pre-call
    /// state. `files_written` then lists what had been committed, for
    /// diagnostics only; the filesystem no longer contains those files.
    pub rolled_back: bool,
}

impl GenerationReport {
    pub fn start(blueprint_id: &str, output_root: PathBuf) -> Self {
        GenerationReport {
            run_id: Uuid::new_v4(),
            blueprint_id: blueprint_id.to_string(),
            output_root,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: 0,
            files_written: BTreeMap::new(),
            files_skipped: Vec::new(),
            dependencies: Vec::new(),
            hooks: Vec::new(),
            validation_issues: Vec::new(),
            optimized: Vec::new(),
            rolled_back: false,
        }
    }

    pub fn record_written(&mut self, kind: &str, path: &str) {
        self.files_written
            .entry(kind.to_string())
            .or_default()
            .push(path.to_string());
    }

    pub fn files_written_count(&self) -> usize {
        self.files_written.values().map(Vec::len).sum()
    }

    pub fn error_issue_count(&self) -> usize {
        self.validation_issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count()
    }

    pub fn finalize(&mut self) {
        let finished = Utc::now();
        self.duration_ms = (finished - self.started_at).num_milliseconds().max(0) as u64;
        self.finished_at = Some(finished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counts_and_serializes() {
        let mut report = GenerationReport::start("cli-simple", PathBuf::from("/tmp/out"));
        report.record_written("text", "README.md");
        report.record_written("source", "main.go");
        report.record_written("source", "cmd/root.go");
        report.finalize();

        assert_eq!(report.files_written_count(), 3);
        assert!(report.finished_at.is_some());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["blueprint_id"], "cli-simple");
        assert_eq!(json["files_written"]["source"][1], "cmd/root.go");
        assert_eq!(json["rolled_back"], false);
    }
}
