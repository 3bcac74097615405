//! Go import analysis and rewriting.
//!
//! Line-oriented rather than a full parser: import declarations in
//! generated code sit in the conventional place and form, which is all
//! this pass needs. Anything it cannot prove unused it keeps.

use once_cell::sync::Lazy;
use regex::Regex;

static SINGLE_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^import\s+(?:([A-Za-z_][A-Za-z0-9_]*|\.|_)\s+)?"([^"]+)"\s*$"#)
        .expect("static regex")
});

static BLOCK_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:([A-Za-z_][A-Za-z0-9_]*|\.|_)\s+)?"([^"]+)"\s*(?://.*)?$"#)
        .expect("static regex")
});

#[derive(Debug, Clone, PartialEq)]
struct Import {
    alias: Option<String>,
    path: String,
}

impl Import {
    /// The identifier the rest of the file would use for this import, when
    /// it can be derived. `None` means the name is not derivable and the
    /// import must be kept.
    fn ref_name(&self) -> Option<String> {
        match self.alias.as_deref() {
            Some(".") | Some("_") => None,
            Some(alias) => Some(alias.to_string()),
            None => {
                let mut segments = self.path.rsplit('/');
                let mut last = segments.next()?;
                // Semantic-import-version suffixes name the previous segment.
                if last.len() > 1
                    && last.starts_with('v')
                    && last[1..].chars().all(|c| c.is_ascii_digit())
                {
                    if let Some(prev) = segments.next() {
                        last = prev;
                    }
                }
                if last.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                    && last.chars().next().is_some_and(|c| !c.is_ascii_digit())
                {
                    Some(last.to_string())
                } else {
                    None
                }
            }
        }
    }

    /// Blank and dot imports have side effects and are never removed.
    fn always_kept(&self) -> bool {
        matches!(self.alias.as_deref(), Some(".") | Some("_"))
    }

    fn render(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{alias} \"{}\"", self.path),
            None => format!("\"{}\"", self.path),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Group {
    Std,
    ThirdParty,
    Local,
}

fn group_of(path: &str, module_path: &str) -> Group {
    if path == module_path || path.starts_with(&format!("{module_path}/")) {
        Group::Local
    } else if path.split('/').next().is_some_and(|seg| !seg.contains('.')) {
        Group::Std
    } else {
        Group::ThirdParty
    }
}

/// Rewrite a Go source file: drop unreferenced imports and regroup the
/// rest into sorted standard / third-party / local blocks. Returns
/// `Ok(None)` when the file is already in canonical form.
pub fn rewrite(content: &str, module_path: &str) -> Result<Option<String>, String> {
    let lines: Vec<&str> = content.split('\n').collect();

    if !lines
        .iter()
        .any(|line| line.trim_start().starts_with("package "))
    {
        return Err("no package clause".to_string());
    }

    // Locate every import declaration as an inclusive line range.
    let mut decls: Vec<(usize, usize, Vec<Import>)> = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let trimmed = lines[i].trim();
        if trimmed == "import (" {
            let start = i;
            let mut imports = Vec::new();
            i += 1;
            loop {
                if i >= lines.len() {
                    return Err("unterminated import block".to_string());
                }
                let entry = lines[i].trim();
                if entry == ")" {
                    break;
                }
                if !entry.is_empty() && !entry.starts_with("//") {
                    let caps = BLOCK_ENTRY
                        .captures(entry)
                        .ok_or_else(|| format!("unparseable import entry `{entry}`"))?;
                    imports.push(Import {
                        alias: caps.get(1).map(|m| m.as_str().to_string()),
                        path: caps[2].to_string(),
                    });
                }
                i += 1;
            }
            decls.push((start, i, imports));
        } else if let Some(caps) = SINGLE_IMPORT.captures(trimmed) {
            decls.push((
                i,
                i,
                vec![Import {
                    alias: caps.get(1).map(|m| m.as_str().to_string()),
                    path: caps[2].to_string(),
                }],
            ));
        }
        i += 1;
    }

    if decls.is_empty() {
        return Ok(None);
    }

    // Usage is judged against the file with imports, strings, and comments
    // blanked out.
    let mut code = String::new();
    let in_decl =
        |idx: usize| decls.iter().any(|(start, end, _)| idx >= *start && idx <= *end);
    for (idx, line) in lines.iter().enumerate() {
        if !in_decl(idx) {
            code.push_str(line);
        }
        code.push('\n');
    }
    let code = strip_noncode(&code);

    let mut kept: Vec<Import> = Vec::new();
    for import in decls.iter().flat_map(|(_, _, imports)| imports) {
        let keep = import.always_kept()
            || match import.ref_name() {
                Some(name) => {
                    let pattern =
                        Regex::new(&format!(r"\b{}\s*\.", regex::escape(&name)))
                            .map_err(|e| e.to_string())?;
                    pattern.is_match(&code)
                }
                None => true,
            };
        if keep && !kept.contains(import) {
            kept.push(import.clone());
        }
    }

    // Canonical import section.
    let mut groups: [Vec<&Import>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    for import in &kept {
        let slot = match group_of(&import.path, module_path) {
            Group::Std => 0,
            Group::ThirdParty => 1,
            Group::Local => 2,
        };
        groups[slot].push(import);
    }
    for group in &mut groups {
        group.sort_by(|a, b| a.path.cmp(&b.path));
    }

    // Single-line declarations keep their form; blocks stay blocks, so a
    // file already in canonical shape round-trips byte-identically.
    let first_was_single = decls[0].0 == decls[0].1;
    let mut section: Vec<String> = Vec::new();
    match kept.len() {
        0 => {}
        1 if first_was_single => section.push(format!("import {}", kept[0].render())),
        _ => {
            section.push("import (".to_string());
            let mut first_group = true;
            for group in &groups {
                if group.is_empty() {
                    continue;
                }
                if !first_group {
                    section.push(String::new());
                }
                first_group = false;
                for import in group {
                    section.push(format!("\t{}", import.render()));
                }
            }
            section.push(")".to_string());
        }
    }

    // Splice: the canonical section replaces the first declaration; later
    // declarations are dropped.
    let (first_start, first_end, _) = decls[0];
    let mut out: Vec<String> = Vec::new();
    let mut idx = 0;
    while idx < lines.len() {
        if idx == first_start {
            out.extend(section.iter().cloned());
            idx = first_end + 1;
            continue;
        }
        if let Some(end) = decls
            .iter()
            .skip(1)
            .find(|(start, _, _)| *start == idx)
            .map(|(_, end, _)| *end)
        {
            idx = end + 1;
            // A blank line that only separated this declaration from the
            // previous one goes with it.
            if out.last().is_some_and(|l| l.trim().is_empty())
                && lines.get(idx).is_some_and(|l| l.trim().is_empty())
            {
                out.pop();
            }
            continue;
        }
        out.push(lines[idx].to_string());
        idx += 1;
    }

    let rewritten = out.join("\n");
    if rewritten == content {
        Ok(None)
    } else {
        Ok(Some(rewritten))
    }
}

/// Blank out string literals, rune literals, and comments so identifier
/// scans cannot match inside them. Byte positions are preserved.
fn strip_noncode(src: &str) -> String {
    let bytes = src.as_bytes();
    let mut out = vec![b' '; bytes.len()];
    let mut i = 0;
    #[derive(PartialEq)]
    enum Mode {
        Code,
        Str,
        RawStr,
        Rune,
        Line,
        Block,
    }
    let mut mode = Mode::Code;
    while i < bytes.len() {
        let b = bytes[i];
        match mode {
            Mode::Code => match b {
                b'"' => mode = Mode::Str,
                b'`' => mode = Mode::RawStr,
                b'\'' => mode = Mode::Rune,
                b'/' if bytes.get(i + 1) == Some(&b'/') => mode = Mode::Line,
                b'/' if bytes.get(i + 1) == Some(&b'*') => mode = Mode::Block,
                _ => out[i] = b,
            },
            Mode::Str => match b {
                b'\\' => {
                    i += 1;
                }
                b'"' => mode = Mode::Code,
                _ => {}
            },
            Mode::RawStr => {
                if b == b'`' {
                    mode = Mode::Code;
                }
            }
            Mode::Rune => match b {
                b'\\' => {
                    i += 1;
                }
                b'\'' => mode = Mode::Code,
                _ => {}
            },
            Mode::Line => {
                if b == b'\n' {
                    out[i] = b;
                    mode = Mode::Code;
                }
            }
            Mode::Block => {
                if b == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    i += 1;
                    mode = Mode::Code;
                }
            }
        }
        if b == b'\n' {
            out[i] = b;
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
