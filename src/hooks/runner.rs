//! Sequential hook execution.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::registry::{CompiledHook, FailurePolicy};
use crate::template::Environment;
use crate::vfs::{clean_rel_path, OutputFs};

use super::{HookError, HookKind, HookOutcome, HookStatus};

const LOG_EXCERPT_LIMIT: usize = 4096;

/// Result of running a hook list: outcomes for everything that ran, plus
/// the fatal failure or cancellation that stopped the sequence, if any.
#[derive(Debug, Default)]
pub struct HookRun {
    pub outcomes: Vec<HookOutcome>,
    pub fatal: Option<HookError>,
    pub cancelled: bool,
}

/// Run hooks in declaration order. A `fatal`-policy failure stops the
/// sequence; `warn` and `ignore` failures are recorded and execution
/// continues. Cancellation is honoured between hooks.
pub async fn run_hooks(
    hooks: &[CompiledHook],
    env: &Environment,
    fs: &dyn OutputFs,
    cancel: &CancellationToken,
) -> HookRun {
    let mut run = HookRun::default();

    for hook in hooks {
        if cancel.is_cancelled() {
            run.cancelled = true;
            return run;
        }

        let started = Instant::now();
        let result = execute(hook, env, fs).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (status, log, error) = match result {
            Ok(log) => (HookStatus::Succeeded, log, None),
            Err(HookFailure::TimedOut) => {
                let err = HookError::TimedOut {
                    name: hook.decl.name.clone(),
                    timeout_secs: hook.decl.timeout_secs,
                };
                (HookStatus::TimedOut, String::new(), Some(err))
            }
            Err(HookFailure::Failed { message, log }) => {
                let err = HookError::Failed {
                    name: hook.decl.name.clone(),
                    message,
                };
                (HookStatus::Failed, log, Some(err))
            }
        };

        debug!(hook = %hook.decl.name, ?status, duration_ms, "hook finished");
        run.outcomes.push(HookOutcome {
            name: hook.decl.name.clone(),
            status,
            duration_ms,
            policy: hook.decl.policy,
            log: truncate(log),
        });

        if let Some(error) = error {
            match hook.decl.policy {
                FailurePolicy::Fatal => {
                    run.fatal = Some(error);
                    return run;
                }
                FailurePolicy::Warn => {
                    warn!(hook = %hook.decl.name, %error, "hook failed, continuing");
                }
                FailurePolicy::Ignore => {}
            }
        }
    }
    run
}

enum HookFailure {
    TimedOut,
    Failed { message: String, log: String },
}

async fn execute(
    hook: &CompiledHook,
    env: &Environment,
    fs: &dyn OutputFs,
) -> Result<String, HookFailure> {
    let mut args = Vec::with_capacity(hook.args.len());
    for template in &hook.args {
        let rendered = template.render(env).map_err(|e| HookFailure::Failed {
            message: format!("argument render failed: {e}"),
            log: String::new(),
        })?;
        args.push(rendered);
    }
    if args.is_empty() {
        args = hook
            .kind
            .default_args()
            .iter()
            .map(|s| s.to_string())
            .collect();
    }

    if hook.kind.is_internal() {
        run_internal(hook.kind, &args, fs).await
    } else {
        run_process(hook, &args, fs).await
    }
}

async fn run_internal(
    kind: HookKind,
    args: &[String],
    fs: &dyn OutputFs,
) -> Result<String, HookFailure> {
    let fail = |message: String| HookFailure::Failed {
        message,
        log: String::new(),
    };
    match kind {
        HookKind::MakeExecutable => {
            if args.is_empty() {
                return Err(fail("make-executable needs at least one path".into()));
            }
            let mut log = String::new();
            for arg in args {
                let rel = clean_rel_path(arg).map_err(|e| fail(format!("`{arg}`: {e}")))?;
                fs.set_executable(&rel, true)
                    .await
                    .map_err(|e| fail(format!("`{rel}`: {e}")))?;
                log.push_str(&format!("chmod +x {rel}\n"));
            }
            Ok(log)
        }
        HookKind::RemoveEmptyDirs => {
            let mut dirs = fs.walk_dirs().await.map_err(|e| fail(e.to_string()))?;
            // Deepest first so emptied parents are caught in the same pass.
            dirs.sort_by_key(|d| std::cmp::Reverse(d.matches('/').count()));
            let mut log = String::new();
            for dir in dirs {
                if fs
                    .remove_dir_if_empty(&dir)
                    .await
                    .map_err(|e| fail(e.to_string()))?
                {
                    log.push_str(&format!("removed {dir}\n"));
                }
            }
            Ok(log)
        }
        _ => Err(fail("not an internal hook".into())),
    }
}

async fn run_process(
    hook: &CompiledHook,
    args: &[String],
    fs: &dyn OutputFs,
) -> Result<String, HookFailure> {
    let program = hook.kind.program().expect("process hook has a program");
    let Some(root) = fs.disk_root() else {
        return Err(HookFailure::Failed {
            message: "process hooks need an on-disk output root".to_string(),
            log: String::new(),
        });
    };

    let cwd = match hook.decl.dir.as_deref() {
        Some(dir) => {
            let rel = clean_rel_path(dir).map_err(|e| HookFailure::Failed {
                message: format!("working dir `{dir}`: {e}"),
                log: String::new(),
            })?;
            root.join(rel)
        }
        None => root.to_path_buf(),
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let timeout = Duration::from_secs(hook.decl.timeout_secs);
    let output = match tokio::time::timeout(timeout, command.output()).await {
        // Dropping the future kills the child via kill_on_drop.
        Err(_) => return Err(HookFailure::TimedOut),
        Ok(Err(e)) => {
            return Err(HookFailure::Failed {
                message: format!("cannot run `{program}`: {e}"),
                log: String::new(),
            })
        }
        Ok(Ok(output)) => output,
    };

    let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
    log.push_str(&String::from_utf8_lossy(&output.stderr));

    if output.status.success() {
        Ok(log)
    } else {
        Err(HookFailure::Failed {
            message: format!("`{program}` exited with {}", output.status),
            log,
        })
    }
}

fn truncate(mut log: String) -> String {
    if log.len() > LOG_EXCERPT_LIMIT {
        let mut cut = LOG_EXCERPT_LIMIT;
        while !log.is_char_boundary(cut) {
            cut -= 1;
        }
        log.truncate(cut);
        log.push_str("\n[truncated]");
    }
    log
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CompiledHook, HookDecl};
    use crate::template::Template;
    use crate::vfs::MemoryFs;

    fn hook(name: &str, args: &[&str], policy: FailurePolicy) -> CompiledHook {
        CompiledHook {
            decl: HookDecl {
                name: name.to_string(),
                args: args.iter().map(|s| s.to_string()).collect(),
                dir: None,
                timeout_secs: 5,
                policy,
                creates: Vec::new(),
            },
            kind: HookKind::parse(name).expect("allow-listed"),
            args: args
                .iter()
                .map(|s| Template::parse(s).expect("arg template"))
                .collect(),
        }
    }

    #[tokio::test]
    async fn make_executable_sets_the_bit() {
        let fs = MemoryFs::new();
        fs.create_root().await.unwrap();
        fs.write("scripts/run.sh", b"#!/bin/sh\n").await.unwrap();

        let hooks = vec![hook("make-executable", &["scripts/run.sh"], FailurePolicy::Fatal)];
        let env = Environment::new();
        let run = run_hooks(&hooks, &env, &fs, &CancellationToken::new()).await;

        assert!(run.fatal.is_none());
        assert_eq!(run.outcomes[0].status, HookStatus::Succeeded);
        assert!(fs.is_executable("scripts/run.sh").await.unwrap());
    }

    #[tokio::test]
    async fn remove_empty_dirs_prunes_recursively() {
        let fs = MemoryFs::new();
        fs.create_root().await.unwrap();
        fs.create_dir_all("a/b/c").await.unwrap();
        fs.write("keep/file.go", b"x").await.unwrap();

        let hooks = vec![hook("remove-empty-dirs", &[], FailurePolicy::Fatal)];
        let run = run_hooks(&hooks, &Environment::new(), &fs, &CancellationToken::new()).await;

        assert!(run.fatal.is_none());
        assert!(!fs.exists("a").await);
        assert!(fs.exists("keep/file.go").await);
    }

    #[tokio::test]
    async fn process_hook_without_disk_root_fails_per_policy() {
        let fs = MemoryFs::new();
        fs.create_root().await.unwrap();

        let hooks = vec![
            hook("format-source", &[], FailurePolicy::Warn),
            hook("make-executable", &[], FailurePolicy::Ignore),
        ];
        let run = run_hooks(&hooks, &Environment::new(), &fs, &CancellationToken::new()).await;

        // Warn failure recorded, sequence continues; the ignore-policy
        // failure is recorded too and still does not stop the run.
        assert!(run.fatal.is_none());
        assert_eq!(run.outcomes.len(), 2);
        assert_eq!(run.outcomes[0].status, HookStatus::Failed);
        assert_eq!(run.outcomes[1].status, HookStatus::Failed);
    }

    #[tokio::test]
    async fn fatal_failure_stops_the_sequence() {
        let fs = MemoryFs::new();
        fs.create_root().await.unwrap();

        let hooks = vec![
            hook("make-executable", &["missing.sh"], FailurePolicy::Fatal),
            hook("remove-empty-dirs", &[], FailurePolicy::Fatal),
        ];
        let run = run_hooks(&hooks, &Environment::new(), &fs, &CancellationToken::new()).await;

        assert!(matches!(run.fatal, Some(HookError::Failed { .. })));
        assert_eq!(run.outcomes.len(), 1);
    }

    #[tokio::test]
    async fn cancellation_between_hooks() {
        let fs = MemoryFs::new();
        fs.create_root().await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let hooks = vec![hook("remove-empty-dirs", &[], FailurePolicy::Fatal)];
        let run = run_hooks(&hooks, &Environment::new(), &fs, &cancel).await;
        assert!(run.cancelled);
        assert!(run.outcomes.is_empty());
    }

    #[tokio::test]
    async fn hook_arguments_are_rendered() {
        let fs = MemoryFs::new();
        fs.create_root().await.unwrap();
        fs.write("bin/mytool.sh", b"#!/bin/sh\n").await.unwrap();

        let mut env = Environment::new();
        env.bind("binary_name", crate::template::Value::Str("mytool".into()));
        let hooks = vec![hook(
            "make-executable",
            &["bin/{{ .binary_name }}.sh"],
            FailurePolicy::Fatal,
        )];
        let run = run_hooks(&hooks, &env, &fs, &CancellationToken::new()).await;
        assert!(run.fatal.is_none());
        assert!(fs.is_executable("bin/mytool.sh").await.unwrap());
    }
}
