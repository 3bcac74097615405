//! Semantic manifest validation and compilation.
//!
//! Runs once per blueprint at registry load. Everything that can be caught
//! before a generation run is caught here: a condition that references an
//! undeclared name fails the load, not the generate call.

use std::collections::HashSet;

use crate::evaluator::condition::Condition;
use crate::evaluator::{BUILTIN_NAMES, DEPENDENCIES_BINDING};
use crate::hooks::HookKind;
use crate::template::{Environment, Template, Value};
use crate::vfs::clean_rel_path;

use super::manifest::{scalar_to_raw, Manifest, ParamKind, ParameterDecl, SUPPORTED_VERSION};
use super::{CompiledDependency, CompiledFile, CompiledHook, CompiledVariable};

/// Compiled manifest parts, produced as a side effect of validation.
#[derive(Debug)]
pub struct Compiled {
    pub files: Vec<CompiledFile>,
    pub variables: Vec<CompiledVariable>,
    pub dependencies: Vec<CompiledDependency>,
    pub hooks: Vec<CompiledHook>,
}

/// Validate one manifest against its file listing and the bodies of its
/// rendered template files. Errors are messages; the caller wraps them
/// with the blueprint directory.
pub fn compile(
    manifest: &Manifest,
    listing: &[String],
    read_body: &mut dyn FnMut(&str) -> std::io::Result<Vec<u8>>,
) -> Result<Compiled, String> {
    if manifest.version != SUPPORTED_VERSION {
        return Err(format!(
            "unsupported manifest version {} (expected {SUPPORTED_VERSION})",
            manifest.version
        ));
    }
    if manifest.id.trim().is_empty() {
        return Err("blueprint id must not be empty".to_string());
    }

    let param_names = validate_parameters(manifest)?;
    let variables = validate_variables(manifest, &param_names)?;

    // Names visible to file conditions, destinations, and template bodies.
    let mut condition_names: HashSet<String> = param_names.clone();
    condition_names.extend(variables.iter().map(|v| v.name.clone()));
    condition_names.extend(BUILTIN_NAMES.iter().map(|s| s.to_string()));
    let mut body_names = condition_names.clone();
    body_names.insert(DEPENDENCIES_BINDING.to_string());

    let files = validate_files(manifest, listing, &condition_names, &body_names, read_body)?;
    let dependencies = validate_dependencies(manifest, &condition_names)?;
    let hooks = validate_hooks(manifest, &body_names)?;
    validate_destination_uniqueness(&files, &manifest.parameters)?;

    Ok(Compiled {
        files,
        variables,
        dependencies,
        hooks,
    })
}

fn validate_parameters(manifest: &Manifest) -> Result<HashSet<String>, String> {
    let mut seen: HashSet<String> = HashSet::new();
    let ident = regex::Regex::new(r"^[a-z_][a-z0-9_]*$").expect("static regex");

    for param in &manifest.parameters {
        let name = &param.name;
        if !ident.is_match(name) {
            return Err(format!("parameter `{name}`: not a valid identifier"));
        }
        if BUILTIN_NAMES.contains(&name.as_str()) || name == DEPENDENCIES_BINDING {
            return Err(format!("parameter `{name}`: shadows a built-in name"));
        }
        if !seen.insert(name.clone()) {
            return Err(format!("parameter `{name}`: declared twice"));
        }

        // Kind-specific shape.
        match param.kind {
            ParamKind::Enum => {
                if param.options.is_empty() {
                    return Err(format!("parameter `{name}`: enum without options"));
                }
                let mut values = HashSet::new();
                for opt in &param.options {
                    if !values.insert(opt.value.as_str()) {
                        return Err(format!(
                            "parameter `{name}`: duplicate option `{}`",
                            opt.value
                        ));
                    }
                }
            }
            _ => {
                if !param.options.is_empty() {
                    return Err(format!(
                        "parameter `{name}`: options are only valid on enum parameters"
                    ));
                }
            }
        }
        if param.pattern.is_some() && param.kind != ParamKind::Text {
            return Err(format!(
                "parameter `{name}`: pattern is only valid on free-text parameters"
            ));
        }
        if let Some(pattern) = &param.pattern {
            regex::Regex::new(pattern)
                .map_err(|e| format!("parameter `{name}`: invalid pattern: {e}"))?;
        }
        if (param.min.is_some() || param.max.is_some()) && param.kind != ParamKind::Int {
            return Err(format!(
                "parameter `{name}`: min/max are only valid on integer parameters"
            ));
        }

        // Defaults must be scalars, and enum defaults must be members.
        if let Some(default) = &param.default {
            let raw = scalar_to_raw(default)
                .ok_or_else(|| format!("parameter `{name}`: default must be a scalar"))?;
            if param.kind == ParamKind::Enum
                && !param.options.iter().any(|o| o.value == raw)
            {
                return Err(format!(
                    "parameter `{name}`: default `{raw}` is not one of the options"
                ));
            }
        } else if !param.required {
            return Err(format!(
                "parameter `{name}`: optional parameters must declare a default"
            ));
        }

        // Dependency gating refers only to earlier-declared parameters.
        for dep in &param.depends_on {
            if dep == name || !seen.contains(dep) {
                return Err(format!(
                    "parameter `{name}`: depends on `{dep}` which is not declared earlier"
                ));
            }
        }
        let allowed: HashSet<&str> = param.depends_on.iter().map(String::as_str).collect();
        if let Some(gate) = &param.gate {
            if param.depends_on.is_empty() {
                return Err(format!(
                    "parameter `{name}`: gate requires a depends_on list"
                ));
            }
            let cond = Condition::parse(gate)
                .map_err(|e| format!("parameter `{name}`: invalid gate: {e}"))?;
            for referenced in cond.referenced_names() {
                if !allowed.contains(referenced.as_str()) {
                    return Err(format!(
                        "parameter `{name}`: gate references `{referenced}` outside depends_on"
                    ));
                }
            }
        }
        for rule in &param.rules {
            let cond = Condition::parse(&rule.when)
                .map_err(|e| format!("parameter `{name}`: invalid rule condition: {e}"))?;
            for referenced in cond.referenced_names() {
                if !allowed.contains(referenced.as_str()) {
                    return Err(format!(
                        "parameter `{name}`: rule references `{referenced}` outside depends_on"
                    ));
                }
            }
            if rule.deny.is_empty() {
                return Err(format!("parameter `{name}`: rule with empty deny list"));
            }
        }
        if param.disabled_value.is_some() && param.gate.is_none() {
            return Err(format!(
                "parameter `{name}`: disabled_value requires a gate"
            ));
        }
    }
    Ok(seen)
}

/// Variables are evaluated in declaration order; forward references are a
/// load-time error, so no cycle can exist.
fn validate_variables(
    manifest: &Manifest,
    params: &HashSet<String>,
) -> Result<Vec<CompiledVariable>, String> {
    let mut visible: HashSet<String> = params.clone();
    visible.extend(BUILTIN_NAMES.iter().map(|s| s.to_string()));

    let mut compiled = Vec::with_capacity(manifest.variables.len());
    for var in &manifest.variables {
        let name = &var.name;
        if params.contains(name)
            || BUILTIN_NAMES.contains(&name.as_str())
            || name == DEPENDENCIES_BINDING
        {
            return Err(format!("variable `{name}`: shadows another declaration"));
        }
        if compiled.iter().any(|v: &CompiledVariable| &v.name == name) {
            return Err(format!("variable `{name}`: declared twice"));
        }
        let template = Template::parse(&var.expression)
            .map_err(|e| format!("variable `{name}`: {e}"))?;
        for referenced in template.referenced_roots() {
            if !visible.contains(&referenced) {
                return Err(format!(
                    "variable `{name}`: references `{referenced}` before its declaration"
                ));
            }
        }
        visible.insert(name.clone());
        compiled.push(CompiledVariable {
            name: name.clone(),
            template,
        });
    }
    Ok(compiled)
}

fn validate_files(
    manifest: &Manifest,
    listing: &[String],
    condition_names: &HashSet<String>,
    body_names: &HashSet<String>,
    read_body: &mut dyn FnMut(&str) -> std::io::Result<Vec<u8>>,
) -> Result<Vec<CompiledFile>, String> {
    let listed: HashSet<&str> = listing.iter().map(String::as_str).collect();
    let mut compiled = Vec::with_capacity(manifest.files.len());

    for entry in &manifest.files {
        let label = &entry.source;
        let source = clean_rel_path(&entry.source)
            .map_err(|e| format!("file `{label}`: source {e}"))?;
        if !listed.contains(source.as_str()) {
            return Err(format!(
                "file `{label}`: source not found in blueprint directory"
            ));
        }

        let destination = Template::parse(&entry.destination)
            .map_err(|e| format!("file `{label}`: destination: {e}"))?;
        for referenced in destination.referenced_roots() {
            if !condition_names.contains(&referenced) {
                return Err(format!(
                    "file `{label}`: destination references undeclared name `{referenced}`"
                ));
            }
        }
        if destination.is_literal() {
            clean_rel_path(&entry.destination)
                .map_err(|e| format!("file `{label}`: destination {e}"))?;
        }

        let condition = entry
            .condition
            .as_deref()
            .map(Condition::parse)
            .transpose()
            .map_err(|e| format!("file `{label}`: {e}"))?;
        if let Some(cond) = &condition {
            for referenced in cond.referenced_names() {
                if !condition_names.contains(&referenced) {
                    return Err(format!(
                        "file `{label}`: condition references undeclared name `{referenced}`"
                    ));
                }
            }
        }

        let body = if entry.kind.is_rendered() {
            let bytes = read_body(&source)
                .map_err(|e| format!("file `{label}`: unreadable: {e}"))?;
            let text = String::from_utf8(bytes)
                .map_err(|_| format!("file `{label}`: not valid UTF-8"))?;
            let template =
                Template::parse(&text).map_err(|e| format!("file `{label}`: {e}"))?;
            for referenced in template.referenced_roots() {
                if !body_names.contains(&referenced) {
                    return Err(format!(
                        "file `{label}`: references undeclared name `{referenced}`"
                    ));
                }
            }
            Some(template)
        } else {
            None
        };

        // Keep the normalised source path so later reads hit the listing.
        let mut entry = entry.clone();
        entry.source = source;
        compiled.push(CompiledFile {
            entry,
            condition,
            destination,
            body,
        });
    }
    Ok(compiled)
}

fn validate_dependencies(
    manifest: &Manifest,
    condition_names: &HashSet<String>,
) -> Result<Vec<CompiledDependency>, String> {
    let mut compiled = Vec::with_capacity(manifest.dependencies.len());
    let mut seen = HashSet::new();
    for dep in &manifest.dependencies {
        if dep.name.trim().is_empty() {
            return Err("dependency with empty module path".to_string());
        }
        if !seen.insert(dep.name.clone()) {
            return Err(format!("dependency `{}`: declared twice", dep.name));
        }
        let version = dep.version.trim();
        if version.is_empty() {
            return Err(format!("dependency `{}`: empty version selector", dep.name));
        }
        let bare = version.strip_prefix('v').unwrap_or(version);
        semver::Version::parse(bare).map_err(|e| {
            format!("dependency `{}`: invalid version `{version}`: {e}", dep.name)
        })?;

        let condition = dep
            .condition
            .as_deref()
            .map(Condition::parse)
            .transpose()
            .map_err(|e| format!("dependency `{}`: {e}", dep.name))?;
        if let Some(cond) = &condition {
            for referenced in cond.referenced_names() {
                if !condition_names.contains(&referenced) {
                    return Err(format!(
                        "dependency `{}`: condition references undeclared name `{referenced}`",
                        dep.name
                    ));
                }
            }
        }
        compiled.push(CompiledDependency {
            decl: dep.clone(),
            condition,
        });
    }
    Ok(compiled)
}

fn validate_hooks(
    manifest: &Manifest,
    body_names: &HashSet<String>,
) -> Result<Vec<CompiledHook>, String> {
    let mut compiled = Vec::with_capacity(manifest.hooks.len());
    for hook in &manifest.hooks {
        let kind = HookKind::parse(&hook.name)
            .ok_or_else(|| format!("hook `{}`: not an allow-listed hook", hook.name))?;
        if hook.timeout_secs == 0 {
            return Err(format!("hook `{}`: timeout must be positive", hook.name));
        }
        if let Some(dir) = &hook.dir {
            clean_rel_path(dir).map_err(|e| format!("hook `{}`: dir {e}", hook.name))?;
        }
        for path in &hook.creates {
            clean_rel_path(path)
                .map_err(|e| format!("hook `{}`: creates entry {e}", hook.name))?;
        }
        let mut args = Vec::with_capacity(hook.args.len());
        for arg in &hook.args {
            let template =
                Template::parse(arg).map_err(|e| format!("hook `{}`: {e}", hook.name))?;
            for referenced in template.referenced_roots() {
                if !body_names.contains(&referenced) {
                    return Err(format!(
                        "hook `{}`: argument references undeclared name `{referenced}`",
                        hook.name
                    ));
                }
            }
            args.push(template);
        }
        compiled.push(CompiledHook {
            decl: hook.clone(),
            kind,
            args,
        });
    }
    Ok(compiled)
}

/// No two file entries may, under any possible configuration, produce the
/// same destination. Equal raw destinations are a conflict whenever the two
/// conditions are co-satisfiable over the enum and boolean parameters they
/// reference; references to continuous parameters fall back to assuming
/// co-satisfiability.
fn validate_destination_uniqueness(
    files: &[CompiledFile],
    params: &[ParameterDecl],
) -> Result<(), String> {
    for (i, a) in files.iter().enumerate() {
        for b in files.iter().skip(i + 1) {
            if a.entry.destination != b.entry.destination {
                continue;
            }
            if conditions_cosatisfiable(a, b, params) {
                return Err(format!(
                    "files `{}` and `{}` can both produce destination `{}`",
                    a.entry.source, b.entry.source, a.entry.destination
                ));
            }
        }
    }
    Ok(())
}

const MAX_ASSIGNMENTS: usize = 4096;

fn conditions_cosatisfiable(a: &CompiledFile, b: &CompiledFile, params: &[ParameterDecl]) -> bool {
    let (Some(cond_a), Some(cond_b)) = (&a.condition, &b.condition) else {
        // At least one side is unconditional; a lone condition is assumed
        // satisfiable, which keeps the check conservative.
        return true;
    };

    let mut names: Vec<String> = cond_a.referenced_names();
    names.extend(cond_b.referenced_names());
    names.sort();
    names.dedup();

    // Build the finite domain per referenced name; bail out conservatively
    // when any name is not a closed-domain parameter.
    let mut domains: Vec<(String, Vec<Value>)> = Vec::new();
    for name in names {
        let Some(param) = params.iter().find(|p| p.name == name) else {
            return true;
        };
        let domain = match param.kind {
            ParamKind::Enum => param
                .options
                .iter()
                .map(|o| Value::Str(o.value.clone()))
                .collect(),
            ParamKind::Bool => vec![Value::Bool(false), Value::Bool(true)],
            _ => return true,
        };
        domains.push((name, domain));
    }

    let total: usize = domains.iter().map(|(_, d)| d.len()).product();
    if total == 0 || total > MAX_ASSIGNMENTS {
        return true;
    }

    for index in 0..total {
        let mut env = Environment::new();
        let mut rest = index;
        for (name, domain) in &domains {
            env.bind(name.clone(), domain[rest % domain.len()].clone());
            rest /= domain.len();
        }
        match (cond_a.eval(&env), cond_b.eval(&env)) {
            (Ok(true), Ok(true)) => return true,
            (Err(_), _) | (_, Err(_)) => return true,
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(extra: &str) -> Manifest {
        let src = format!(
            r#"
version: 1
id: demo
name: Demo
description: demo blueprint
category: cli
complexity: simple
{extra}"#
        );
        serde_yaml::from_str(&src).expect("manifest yaml")
    }

    fn run(manifest: &Manifest, files: &[(&str, &str)]) -> Result<Compiled, String> {
        let listing: Vec<String> = files.iter().map(|(p, _)| p.to_string()).collect();
        let bodies: std::collections::HashMap<String, Vec<u8>> = files
            .iter()
            .map(|(p, c)| (p.to_string(), c.as_bytes().to_vec()))
            .collect();
        let mut read = |path: &str| {
            bodies.get(path).cloned().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string())
            })
        };
        compile(manifest, &listing, &mut read)
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut m = manifest("");
        m.version = 2;
        assert!(run(&m, &[]).unwrap_err().contains("version"));
    }

    #[test]
    fn condition_referencing_undeclared_name_is_rejected_at_load() {
        let m = manifest(
            r#"files:
  - source: a.tmpl
    destination: a.go
    condition: framework != "none"
"#,
        );
        let err = run(&m, &[("a.tmpl", "x")]).unwrap_err();
        assert!(err.contains("undeclared name `framework`"), "{err}");
    }

    #[test]
    fn template_body_referencing_undeclared_name_is_rejected() {
        let m = manifest(
            r#"files:
  - source: a.tmpl
    destination: a.go
"#,
        );
        let err = run(&m, &[("a.tmpl", "{{ .missing }}")]).unwrap_err();
        assert!(err.contains("undeclared name `missing`"), "{err}");
    }

    #[test]
    fn builtins_are_always_visible() {
        let m = manifest(
            r#"files:
  - source: a.tmpl
    destination: a.go
"#,
        );
        assert!(run(&m, &[("a.tmpl", "{{ .ProjectName }} {{ .Year }}")]).is_ok());
    }

    #[test]
    fn variable_forward_reference_is_rejected() {
        let m = manifest(
            r#"variables:
  - name: first
    expression: "{{ .second }}"
  - name: second
    expression: literal
"#,
        );
        let err = run(&m, &[]).unwrap_err();
        assert!(err.contains("before its declaration"), "{err}");
    }

    #[test]
    fn variables_may_reference_earlier_variables() {
        let m = manifest(
            r#"variables:
  - name: first
    expression: literal
  - name: second
    expression: "{{ .first }}-suffix"
"#,
        );
        assert!(run(&m, &[]).is_ok());
    }

    #[test]
    fn optional_parameter_without_default_is_rejected() {
        let m = manifest(
            r#"parameters:
  - name: port
    kind: int
"#,
        );
        let err = run(&m, &[]).unwrap_err();
        assert!(err.contains("must declare a default"), "{err}");
    }

    #[test]
    fn unconditional_duplicate_destination_is_rejected() {
        let m = manifest(
            r#"files:
  - source: a.tmpl
    destination: cmd/root.go
  - source: b.tmpl
    destination: cmd/root.go
"#,
        );
        let err = run(&m, &[("a.tmpl", "a"), ("b.tmpl", "b")]).unwrap_err();
        assert!(err.contains("both produce destination"), "{err}");
    }

    #[test]
    fn mutually_exclusive_conditions_allow_shared_destination() {
        let m = manifest(
            r#"parameters:
  - name: framework
    kind: enum
    default: gin
    options:
      - {value: gin, label: Gin}
      - {value: echo, label: Echo}
files:
  - source: a.tmpl
    destination: server.go
    condition: framework == "gin"
  - source: b.tmpl
    destination: server.go
    condition: framework == "echo"
"#,
        );
        assert!(run(&m, &[("a.tmpl", "a"), ("b.tmpl", "b")]).is_ok());
    }

    #[test]
    fn overlapping_conditions_are_rejected() {
        let m = manifest(
            r#"parameters:
  - name: framework
    kind: enum
    default: gin
    options:
      - {value: gin, label: Gin}
      - {value: echo, label: Echo}
      - {value: none, label: None}
files:
  - source: a.tmpl
    destination: server.go
    condition: framework == "gin"
  - source: b.tmpl
    destination: server.go
    condition: framework != "echo"
"#,
        );
        assert!(run(&m, &[("a.tmpl", "a"), ("b.tmpl", "b")]).is_err());
    }

    #[test]
    fn continuous_parameter_conditions_fall_back_to_conservative() {
        let m = manifest(
            r#"parameters:
  - name: port
    kind: int
    default: 8080
files:
  - source: a.tmpl
    destination: server.go
    condition: port == 80
  - source: b.tmpl
    destination: server.go
    condition: port == 443
"#,
        );
        // Disjoint in reality, but integers are not enumerated; the check
        // stays conservative and reports a conflict.
        assert!(run(&m, &[("a.tmpl", "a"), ("b.tmpl", "b")]).is_err());
    }

    #[test]
    fn unknown_hook_name_is_rejected() {
        let m = manifest("hooks:\n  - name: curl-something\n");
        let err = run(&m, &[]).unwrap_err();
        assert!(err.contains("not an allow-listed hook"), "{err}");
    }

    #[test]
    fn file_source_escaping_blueprint_dir_is_rejected() {
        let m = manifest(
            r#"files:
  - source: ../outside.tmpl
    destination: a.go
"#,
        );
        assert!(run(&m, &[]).is_err());
    }

    #[test]
    fn invalid_dependency_version_is_rejected() {
        let m = manifest(
            r#"dependencies:
  - name: github.com/spf13/cobra
    version: latest
"#,
        );
        let err = run(&m, &[]).unwrap_err();
        assert!(err.contains("invalid version"), "{err}");
    }

    #[test]
    fn gate_must_stay_within_depends_on() {
        let m = manifest(
            r#"parameters:
  - name: database_driver
    kind: enum
    default: none
    options:
      - {value: none, label: None}
      - {value: postgres, label: Postgres}
  - name: database_orm
    kind: enum
    default: none
    options:
      - {value: none, label: None}
      - {value: gorm, label: Gorm}
    depends_on: [database_driver]
    gate: framework != "none"
"#,
        );
        let err = run(&m, &[]).unwrap_err();
        assert!(err.contains("outside depends_on"), "{err}");
    }
}
