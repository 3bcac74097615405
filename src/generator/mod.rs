//! Generation orchestration.
//!
//! Drives one `generate` call end to end: resolve the configuration,
//! evaluate the blueprint, render templates across a bounded worker pool,
//! commit files through a single writer in the documented order, run
//! hooks, optionally optimise, validate, and report. Failure at any point
//! rolls the output root back to its pre-call state; the caller sees
//! either the complete tree or no change at all.

mod plan;
mod report;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, GoforgeError, GoforgeResult, WithOperation};
use crate::evaluator::{self, Builtins, EvalError, Evaluated};
use crate::hooks;
use crate::optimize;
use crate::registry::{DisclosureTier, FileKind, Registry};
use crate::resolver::{self, ResolveInputs};
use crate::template::{Environment, Value};
use crate::verify::{self, CompileOracle, ValidateContext};
use crate::vfs::{parent_of, DiskFs, OutputFs};

pub use plan::{ordered_dirs, ordered_writes, OrderedWrite};
pub use report::GenerationReport;

/// Relative path of the synthesised module manifest.
pub const MODULE_MANIFEST: &str = "go.mod";

const TMP_SUFFIX: &str = ".goforge-tmp";

/// What to do when the output root already exists and is not empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    /// Fail without touching the filesystem.
    #[default]
    Refuse,
    /// Replace only the files this generation writes; unrelated files are
    /// left untouched.
    Allow,
    /// Wipe the root before writing.
    Replace,
}

/// One generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub blueprint_id: String,
    pub overrides: IndexMap<String, String>,
    pub answers: IndexMap<String, String>,
    pub output_root: PathBuf,
    pub tier: DisclosureTier,
    pub overwrite: OverwritePolicy,
    pub strict: bool,
    pub deep_validate: bool,
    pub optimize: bool,
}

impl GenerationRequest {
    pub fn new(blueprint_id: impl Into<String>, output_root: impl Into<PathBuf>) -> Self {
        GenerationRequest {
            blueprint_id: blueprint_id.into(),
            overrides: IndexMap::new(),
            answers: IndexMap::new(),
            output_root: output_root.into(),
            tier: DisclosureTier::Basic,
            overwrite: OverwritePolicy::Refuse,
            strict: true,
            deep_validate: false,
            optimize: false,
        }
    }

    pub fn override_param(mut self, name: &str, value: &str) -> Self {
        self.overrides.insert(name.to_string(), value.to_string());
        self
    }

    pub fn tier(mut self, tier: DisclosureTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn overwrite(mut self, policy: OverwritePolicy) -> Self {
        self.overwrite = policy;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn deep_validate(mut self, deep: bool) -> Self {
        self.deep_validate = deep;
        self
    }

    pub fn optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }
}

/// A failed generation: the typed error plus the report that describes how
/// far the run got before rollback.
#[derive(Debug)]
pub struct GenerationFailure {
    pub error: GoforgeError,
    pub report: Box<GenerationReport>,
}

impl std::fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for GenerationFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Per-file lifecycle during commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileState {
    Pending,
    Rendered,
    Written,
    Committed,
    Failed,
}

/// Undo log for one run.
#[derive(Debug, Default)]
struct Journal {
    root_created: bool,
    committed: Vec<String>,
    created_dirs: Vec<String>,
    /// Pre-existing files replaced under `allow`/`replace`, with their
    /// bytes and executable bit.
    backups: Vec<(String, Vec<u8>, bool)>,
    /// Pre-existing directories removed by a `replace` wipe.
    removed_dirs: Vec<String>,
}

/// The orchestrator. Holds a shared registry and generation settings;
/// cheap to clone per call site.
#[derive(Clone)]
pub struct Generator {
    registry: Arc<Registry>,
    workers: usize,
    oracle: Option<Arc<dyn CompileOracle>>,
    pinned_year: Option<i32>,
}

impl Generator {
    pub fn new(registry: Arc<Registry>) -> Self {
        Generator {
            registry,
            workers: num_cpus::get().max(2),
            oracle: None,
            pinned_year: None,
        }
    }

    /// Size of the render worker pool.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Compile oracle consulted by deep validation.
    pub fn with_oracle(mut self, oracle: Arc<dyn CompileOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Pin the `Year` built-in, for reproducible output in tests.
    pub fn with_pinned_year(mut self, year: i32) -> Self {
        self.pinned_year = Some(year);
        self
    }

    /// Generate onto the real filesystem at the request's output root.
    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationReport, GenerationFailure> {
        let fs = Arc::new(DiskFs::new(request.output_root.clone()));
        self.generate_on(request, fs, CancellationToken::new()).await
    }

    /// Generate through an explicit filesystem capability and cancellation
    /// token. The capability seam is what lets tests run fully in memory.
    pub async fn generate_on(
        &self,
        request: GenerationRequest,
        fs: Arc<dyn OutputFs>,
        cancel: CancellationToken,
    ) -> Result<GenerationReport, GenerationFailure> {
        let mut report =
            GenerationReport::start(&request.blueprint_id, request.output_root.clone());
        info!(blueprint = %request.blueprint_id, root = %request.output_root.display(), "generation started");

        let mut journal = Journal::default();
        let result = self
            .run(&request, fs.as_ref(), &cancel, &mut report, &mut journal)
            .await;

        match result {
            Ok(()) => {
                report.finalize();
                info!(
                    blueprint = %request.blueprint_id,
                    files = report.files_written_count(),
                    duration_ms = report.duration_ms,
                    "generation finished"
                );
                Ok(report)
            }
            Err(error) => {
                rollback(fs.as_ref(), &journal).await;
                report.rolled_back = true;
                report.finalize();
                warn!(blueprint = %request.blueprint_id, %error, "generation rolled back");
                Err(GenerationFailure {
                    error: error.op("generate"),
                    report: Box::new(report),
                })
            }
        }
    }

    async fn run(
        &self,
        request: &GenerationRequest,
        fs: &dyn OutputFs,
        cancel: &CancellationToken,
        report: &mut GenerationReport,
        journal: &mut Journal,
    ) -> GoforgeResult<()> {
        let blueprint = self.registry.get(&request.blueprint_id)?;

        let inputs = ResolveInputs {
            overrides: request.overrides.clone(),
            answers: request.answers.clone(),
            tier: request.tier,
        };
        let config = resolver::resolve(blueprint, &inputs).op("resolve")?;

        let builtins = match self.pinned_year {
            Some(year) => Builtins::with_year(year),
            None => Builtins::pinned(),
        };
        let evaluated = evaluator::evaluate(blueprint, &config, &builtins).op("evaluate")?;
        report.files_skipped = evaluated.skipped.clone();
        report.dependencies = evaluated.dependencies.clone();

        // Root policy. The create is a single operation, so a root created
        // by another party between check and write cannot slip through.
        journal.root_created = fs.create_root().await.op("prepare-root")?;
        if !journal.root_created && !fs.root_is_empty().await.op("prepare-root")? {
            match request.overwrite {
                OverwritePolicy::Refuse => {
                    return Err(GoforgeError::new(ErrorKind::OutputRootNotEmpty {
                        path: request.output_root.display().to_string(),
                    }));
                }
                OverwritePolicy::Allow => {}
                OverwritePolicy::Replace => {
                    wipe(fs, journal).await.op("prepare-root")?;
                }
            }
        }
        // Files already in the root at this point stay there on success
        // (`allow` policy); the validator must not flag them as strays.
        let preexisting: Vec<String> = if journal.root_created {
            Vec::new()
        } else {
            fs.walk().await.op("prepare-root")?
        };

        let emit_manifest =
            !evaluated.files.is_empty() || !evaluated.dependencies.is_empty();
        self.write_files(
            fs,
            cancel,
            &request.blueprint_id,
            &evaluated,
            emit_manifest,
            report,
            journal,
        )
        .await
        .op("write")?;

        // Post-generation hooks, in declaration order.
        let hook_run =
            hooks::run_hooks(blueprint.hooks(), &evaluated.env, fs, cancel).await;
        report.hooks = hook_run.outcomes;
        if hook_run.cancelled {
            return Err(GoforgeError::new(ErrorKind::Cancelled).op("hooks"));
        }
        if let Some(fatal) = hook_run.fatal {
            return Err(GoforgeError::from(fatal).op("hooks"));
        }

        if request.optimize {
            let module_path = builtin_str(&evaluated.env, "ModulePath");
            let outcome = optimize::optimize_tree(fs, &evaluated.files, &module_path)
                .await
                .op("optimize")?;
            report.optimized = outcome.rewritten;
            report.validation_issues.extend(outcome.issues);
        }

        self.validate(
            request,
            fs,
            blueprint,
            &evaluated,
            emit_manifest,
            &preexisting,
            journal,
            report,
        )
        .await
        .op("validate")?;

        if request.strict && report.error_issue_count() > 0 {
            return Err(GoforgeError::new(ErrorKind::ValidationFailed {
                count: report.error_issue_count(),
            }));
        }
        Ok(())
    }

    /// Render through the worker pool, then commit through a single
    /// writer: directories first, rendered text before verbatim copies
    /// within each directory, module manifest last in the root.
    #[allow(clippy::too_many_arguments)]
    async fn write_files(
        &self,
        fs: &dyn OutputFs,
        cancel: &CancellationToken,
        blueprint_id: &str,
        evaluated: &Evaluated,
        emit_manifest: bool,
        report: &mut GenerationReport,
        journal: &mut Journal,
    ) -> GoforgeResult<()> {
        let mut states: Vec<FileState> = vec![FileState::Pending; evaluated.files.len()];
        let rendered = self.render_pool(blueprint_id, evaluated).await?;
        for (slot, _) in &rendered {
            states[*slot] = FileState::Rendered;
        }

        for dir in ordered_dirs(&evaluated.files) {
            ensure_dir(fs, &dir, journal).await?;
        }

        let rendered: HashMap<usize, String> = rendered.into_iter().collect();
        for write in ordered_writes(&evaluated.files, emit_manifest) {
            if cancel.is_cancelled() {
                return Err(GoforgeError::new(ErrorKind::Cancelled));
            }
            match write {
                OrderedWrite::File(slot) => {
                    let file = &evaluated.files[slot];
                    let bytes = match rendered.get(&slot) {
                        Some(text) => text.clone().into_bytes(),
                        None => {
                            let blueprint = self.registry.get(blueprint_id)?;
                            self.registry.read_blueprint_file(blueprint, &file.source)?
                        }
                    };
                    if let Err(e) = commit_file(fs, &file.destination, &bytes, journal).await {
                        states[slot] = FileState::Failed;
                        return Err(e);
                    }
                    states[slot] = FileState::Written;
                    if file.executable {
                        fs.set_executable(&file.destination, true).await?;
                    }
                    states[slot] = FileState::Committed;
                    report.record_written(kind_label(file.kind), &file.destination);
                }
                OrderedWrite::ModuleManifest => {
                    let content = module_manifest(&evaluated.env, evaluated);
                    commit_file(fs, MODULE_MANIFEST, content.as_bytes(), journal).await?;
                    report.record_written("manifest", MODULE_MANIFEST);
                }
            }
        }

        debug_assert!(states
            .iter()
            .all(|s| matches!(s, FileState::Committed)));
        Ok(())
    }

    /// Render every text/source file concurrently, bounded by the worker
    /// pool. Rendering is pure, so ordering does not matter; results are
    /// collected and committed by the single writer.
    async fn render_pool(
        &self,
        blueprint_id: &str,
        evaluated: &Evaluated,
    ) -> GoforgeResult<Vec<(usize, String)>> {
        let env = Arc::new(evaluated.env.clone());
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut join: JoinSet<Result<(usize, String), EvalError>> = JoinSet::new();

        for (slot, file) in evaluated.files.iter().enumerate() {
            if !file.kind.is_rendered() {
                continue;
            }
            let registry = Arc::clone(&self.registry);
            let env = Arc::clone(&env);
            let semaphore = Arc::clone(&semaphore);
            let blueprint_id = blueprint_id.to_string();
            let index = file.index;
            let source = file.source.clone();
            join.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("pool closed");
                let blueprint = registry
                    .get(&blueprint_id)
                    .expect("blueprint disappeared mid-run");
                let template = blueprint.files()[index]
                    .body
                    .as_ref()
                    .expect("rendered kind has a parsed body");
                template
                    .render(&env)
                    .map(|text| (slot, text))
                    .map_err(|source_err| EvalError::Template {
                        scope: format!("file `{source}`"),
                        source: source_err,
                    })
            });
        }

        let mut rendered = Vec::new();
        while let Some(joined) = join.join_next().await {
            let result = joined.map_err(|e| {
                GoforgeError::new(ErrorKind::Filesystem(std::io::Error::other(e)))
            })?;
            rendered.push(result?);
        }
        rendered.sort_by_key(|(slot, _)| *slot);
        Ok(rendered)
    }

    #[allow(clippy::too_many_arguments)]
    async fn validate(
        &self,
        request: &GenerationRequest,
        fs: &dyn OutputFs,
        blueprint: &crate::registry::Blueprint,
        evaluated: &Evaluated,
        emit_manifest: bool,
        preexisting: &[String],
        journal: &Journal,
        report: &mut GenerationReport,
    ) -> GoforgeResult<()> {
        let mut expected: HashSet<String> =
            journal.committed.iter().cloned().collect();
        expected.extend(preexisting.iter().cloned());
        for hook in blueprint.hooks() {
            for path in &hook.decl.creates {
                if let Ok(clean) = crate::vfs::clean_rel_path(path) {
                    expected.insert(clean);
                }
            }
        }

        let ctx = ValidateContext {
            blueprint,
            plans: &evaluated.files,
            expected: &expected,
            module_manifest: emit_manifest.then_some(MODULE_MANIFEST),
        };
        let issues = verify::validate(fs, &ctx).await?;
        report.validation_issues.extend(issues);

        if request.deep_validate {
            if let Some(oracle) = &self.oracle {
                let issues =
                    verify::deep_validate(oracle.as_ref(), &request.output_root).await;
                report.validation_issues.extend(issues);
            }
        }
        Ok(())
    }
}

fn kind_label(kind: FileKind) -> &'static str {
    match kind {
        FileKind::Text => "text",
        FileKind::Source => "source",
        FileKind::Binary => "binary",
        FileKind::Script => "script",
    }
}

fn builtin_str(env: &Environment, name: &str) -> String {
    match env.get(name) {
        Some(Value::Str(s)) => s.clone(),
        _ => String::new(),
    }
}

/// The synthesised module manifest: module path, Go version, and the
/// dependencies whose conditions held.
fn module_manifest(env: &Environment, evaluated: &Evaluated) -> String {
    let module = builtin_str(env, "ModulePath");
    let go = builtin_str(env, "GoVersion");
    let mut out = format!("module {module}\n\ngo {go}\n");
    if !evaluated.dependencies.is_empty() {
        out.push_str("\nrequire (\n");
        for dep in &evaluated.dependencies {
            out.push_str(&format!("\t{} {}\n", dep.name, dep.version));
        }
        out.push_str(")\n");
    }
    out
}

async fn ensure_dir(fs: &dyn OutputFs, dir: &str, journal: &mut Journal) -> GoforgeResult<()> {
    if !fs.exists(dir).await {
        fs.create_dir_all(dir).await?;
        journal.created_dirs.push(dir.to_string());
    }
    Ok(())
}

/// Atomic write: sibling temp file, then rename over the destination. A
/// pre-existing file is backed up first so rollback can restore it.
async fn commit_file(
    fs: &dyn OutputFs,
    destination: &str,
    bytes: &[u8],
    journal: &mut Journal,
) -> GoforgeResult<()> {
    if fs.exists(destination).await {
        let prior = fs.read(destination).await?;
        let exec = fs.is_executable(destination).await.unwrap_or(false);
        journal.backups.push((destination.to_string(), prior, exec));
    }
    let tmp = format!("{destination}{TMP_SUFFIX}");
    fs.write(&tmp, bytes).await?;
    fs.rename(&tmp, destination).await?;
    journal.committed.push(destination.to_string());
    debug!(path = %destination, "committed");
    Ok(())
}

/// Back up and clear the whole root for the `replace` policy.
async fn wipe(fs: &dyn OutputFs, journal: &mut Journal) -> Result<(), std::io::Error> {
    for file in fs.walk().await? {
        let bytes = fs.read(&file).await?;
        let exec = fs.is_executable(&file).await.unwrap_or(false);
        journal.backups.push((file.clone(), bytes, exec));
        fs.remove_file(&file).await?;
    }
    let mut dirs = fs.walk_dirs().await?;
    dirs.sort_by_key(|d| std::cmp::Reverse(d.matches('/').count()));
    for dir in dirs {
        if fs.remove_dir_if_empty(&dir).await? {
            journal.removed_dirs.push(dir);
        }
    }
    Ok(())
}

/// Restore the pre-call state: committed files go, replaced files come
/// back, directories this run created are pruned, and a root this run
/// created disappears with them. Best effort; rollback never masks the
/// original error.
async fn rollback(fs: &dyn OutputFs, journal: &Journal) {
    for file in &journal.committed {
        let _ = fs.remove_file(file).await;
    }

    let mut removed_dirs = journal.removed_dirs.clone();
    removed_dirs.sort_by_key(|d| d.matches('/').count());
    for dir in &removed_dirs {
        let _ = fs.create_dir_all(dir).await;
    }

    for (path, bytes, exec) in &journal.backups {
        if let Some(parent) = parent_of(path) {
            let _ = fs.create_dir_all(parent).await;
        }
        let _ = fs.write(path, bytes).await;
        if *exec {
            let _ = fs.set_executable(path, true).await;
        }
    }

    let mut created = journal.created_dirs.clone();
    created.sort_by_key(|d| std::cmp::Reverse(d.matches('/').count()));
    for dir in &created {
        let _ = fs.remove_dir_if_empty(dir).await;
    }

    if journal.root_created {
        let _ = fs.remove_dir_if_empty("").await;
    }
}
