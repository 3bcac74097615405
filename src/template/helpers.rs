//! The closed helper set available in pipelines and prefix calls.
//!
//! Helpers are pure. There are no filesystem, network, or process helpers.
//! Pipeline invocation appends the piped value as the final argument, so
//! `{{ .Name | replace "a" "b" }}` reaches `replace` as `("a", "b", name)`.

use super::lexer::Pos;
use super::value::Value;
use super::TemplateError;

/// Names the engine recognises; anything else is an eval error.
pub const HELPER_NAMES: &[&str] = &[
    "upper", "lower", "title", "camel", "snake", "kebab", "trim", "replace", "quote", "indent",
    "contains", "hasPrefix", "hasSuffix", "default", "base", "dir", "ext", "joinPath", "eq", "ne",
    "and", "or", "not", "len", "first", "last", "index",
];

pub fn is_helper(name: &str) -> bool {
    HELPER_NAMES.contains(&name)
}

/// Apply a helper to fully-evaluated arguments.
pub fn call(name: &str, args: &[Value], pos: Pos) -> Result<Value, TemplateError> {
    match name {
        "upper" => str1(name, args, pos, |s| s.to_uppercase()),
        "lower" => str1(name, args, pos, |s| s.to_lowercase()),
        "title" => str1(name, args, pos, title_case),
        "camel" => str1(name, args, pos, camel_case),
        "snake" => str1(name, args, pos, snake_case),
        "kebab" => str1(name, args, pos, kebab_case),
        "trim" => str1(name, args, pos, |s| s.trim().to_string()),
        "quote" => str1(name, args, pos, |s| {
            format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
        }),
        "base" => str1(name, args, pos, |s| {
            s.rsplit('/').next().unwrap_or("").to_string()
        }),
        "dir" => str1(name, args, pos, |s| match s.rfind('/') {
            Some(0) => "/".to_string(),
            Some(i) => s[..i].to_string(),
            None => ".".to_string(),
        }),
        "ext" => str1(name, args, pos, |s| {
            let last = s.rsplit('/').next().unwrap_or("");
            match last.rfind('.') {
                Some(i) if i > 0 => last[i..].to_string(),
                _ => String::new(),
            }
        }),
        "replace" => {
            let [old, new, s] = take::<3>(name, args, pos)?;
            let (old, new, s) = (as_str(name, old, pos)?, as_str(name, new, pos)?, as_str(name, s, pos)?);
            Ok(Value::Str(s.replace(old, new)))
        }
        "indent" => {
            let [n, s] = take::<2>(name, args, pos)?;
            let n = as_int(name, n, pos)?;
            if n < 0 {
                return Err(helper_err(name, "indent width must be non-negative", pos));
            }
            let pad = " ".repeat(n as usize);
            let s = as_str(name, s, pos)?;
            let indented = s
                .split('\n')
                .map(|line| {
                    if line.is_empty() {
                        line.to_string()
                    } else {
                        format!("{pad}{line}")
                    }
                })
                .collect::<Vec<_>>()
                .join("\n");
            Ok(Value::Str(indented))
        }
        "contains" => str2_bool(name, args, pos, |sub, s| s.contains(sub)),
        "hasPrefix" => str2_bool(name, args, pos, |p, s| s.starts_with(p)),
        "hasSuffix" => str2_bool(name, args, pos, |suf, s| s.ends_with(suf)),
        "default" => {
            let [fallback, value] = take::<2>(name, args, pos)?;
            match value {
                Value::Str(s) if s.is_empty() => Ok(fallback.clone()),
                other => Ok(other.clone()),
            }
        }
        "joinPath" => {
            if args.is_empty() {
                return Err(helper_err(name, "expects at least one argument", pos));
            }
            let mut parts = Vec::with_capacity(args.len());
            for arg in args {
                let part = as_str(name, arg, pos)?;
                let part = part.trim_matches('/');
                if !part.is_empty() {
                    parts.push(part);
                }
            }
            Ok(Value::Str(parts.join("/")))
        }
        "eq" | "ne" => {
            let [a, b] = take::<2>(name, args, pos)?;
            match a.try_eq(b) {
                Some(equal) => Ok(Value::Bool(if name == "eq" { equal } else { !equal })),
                None => Err(TemplateError::TypeMismatch {
                    left: a.type_name(),
                    right: b.type_name(),
                    line: pos.line,
                    column: pos.column,
                }),
            }
        }
        "and" | "or" => {
            if args.len() < 2 {
                return Err(helper_err(name, "expects at least two arguments", pos));
            }
            let mut acc = name == "and";
            for arg in args {
                let b = arg.as_bool().ok_or_else(|| {
                    helper_err(name, &format!("expects booleans, got {}", arg.type_name()), pos)
                })?;
                acc = if name == "and" { acc && b } else { acc || b };
            }
            Ok(Value::Bool(acc))
        }
        "not" => {
            let [a] = take::<1>(name, args, pos)?;
            let b = a.as_bool().ok_or_else(|| {
                helper_err(name, &format!("expects a boolean, got {}", a.type_name()), pos)
            })?;
            Ok(Value::Bool(!b))
        }
        "len" => {
            let [a] = take::<1>(name, args, pos)?;
            match a {
                Value::List(items) => Ok(Value::Int(items.len() as i64)),
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                other => Err(helper_err(
                    name,
                    &format!("expects a list or string, got {}", other.type_name()),
                    pos,
                )),
            }
        }
        "first" | "last" => {
            let [a] = take::<1>(name, args, pos)?;
            let items = as_list(name, a, pos)?;
            let item = if name == "first" { items.first() } else { items.last() };
            item.cloned()
                .ok_or_else(|| helper_err(name, "list is empty", pos))
        }
        "index" => {
            let [i, list] = take::<2>(name, args, pos)?;
            let i = as_int(name, i, pos)?;
            let items = as_list(name, list, pos)?;
            if i < 0 || i as usize >= items.len() {
                return Err(helper_err(
                    name,
                    &format!("index {i} out of bounds for list of {}", items.len()),
                    pos,
                ));
            }
            Ok(items[i as usize].clone())
        }
        other => Err(TemplateError::UnknownHelper {
            name: other.to_string(),
            line: pos.line,
            column: pos.column,
        }),
    }
}

fn take<'a, const N: usize>(
    name: &str,
    args: &'a [Value],
    pos: Pos,
) -> Result<[&'a Value; N], TemplateError> {
    if args.len() != N {
        return Err(helper_err(
            name,
            &format!("expects {N} argument(s), got {}", args.len()),
            pos,
        ));
    }
    let mut out = [&args[0]; N];
    for (slot, arg) in out.iter_mut().zip(args.iter()) {
        *slot = arg;
    }
    Ok(out)
}

fn str1(
    name: &str,
    args: &[Value],
    pos: Pos,
    f: impl Fn(&str) -> String,
) -> Result<Value, TemplateError> {
    let [a] = take::<1>(name, args, pos)?;
    Ok(Value::Str(f(as_str(name, a, pos)?)))
}

fn str2_bool(
    name: &str,
    args: &[Value],
    pos: Pos,
    f: impl Fn(&str, &str) -> bool,
) -> Result<Value, TemplateError> {
    let [a, b] = take::<2>(name, args, pos)?;
    Ok(Value::Bool(f(as_str(name, a, pos)?, as_str(name, b, pos)?)))
}

fn as_str<'a>(name: &str, v: &'a Value, pos: Pos) -> Result<&'a str, TemplateError> {
    v.as_str()
        .ok_or_else(|| helper_err(name, &format!("expects a string, got {}", v.type_name()), pos))
}

fn as_int(name: &str, v: &Value, pos: Pos) -> Result<i64, TemplateError> {
    v.as_int()
        .ok_or_else(|| helper_err(name, &format!("expects an int, got {}", v.type_name()), pos))
}

fn as_list<'a>(name: &str, v: &'a Value, pos: Pos) -> Result<&'a [Value], TemplateError> {
    match v {
        Value::List(items) => Ok(items),
        other => Err(helper_err(
            name,
            &format!("expects a list, got {}", other.type_name()),
            pos,
        )),
    }
}

fn helper_err(helper: &str, message: &str, pos: Pos) -> TemplateError {
    TemplateError::Helper {
        helper: helper.to_string(),
        message: message.to_string(),
        line: pos.line,
        column: pos.column,
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_whitespace() {
            at_word_start = true;
            out.push(c);
        } else if at_word_start {
            out.extend(c.to_uppercase());
            at_word_start = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Word splitting shared by the case helpers: breaks on `_`, `-`, spaces,
/// and lower-to-upper transitions.
fn split_words(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in s.chars() {
        if c == '_' || c == '-' || c.is_whitespace() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
        } else if c.is_uppercase() && prev_lower {
            words.push(std::mem::take(&mut current));
            current.push(c);
            prev_lower = false;
        } else {
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            current.push(c);
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn camel_case(s: &str) -> String {
    let words = split_words(s);
    let mut out = String::with_capacity(s.len());
    for (i, word) in words.iter().enumerate() {
        if i == 0 {
            out.push_str(&word.to_lowercase());
        } else {
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(&chars.as_str().to_lowercase());
            }
        }
    }
    out
}

fn snake_case(s: &str) -> String {
    split_words(s)
        .iter()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

fn kebab_case(s: &str) -> String {
    split_words(s)
        .iter()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(name: &str, args: &[Value]) -> Value {
        call(name, args, Pos::start()).expect(name)
    }

    #[test]
    fn string_helpers() {
        assert_eq!(run("upper", &["abc".into()]), Value::Str("ABC".into()));
        assert_eq!(run("title", &["hello world".into()]), Value::Str("Hello World".into()));
        assert_eq!(run("camel", &["my_tool-name".into()]), Value::Str("myToolName".into()));
        assert_eq!(run("snake", &["MyToolName".into()]), Value::Str("my_tool_name".into()));
        assert_eq!(run("kebab", &["MyToolName".into()]), Value::Str("my-tool-name".into()));
        assert_eq!(
            run("replace", &["a".into(), "o".into(), "banana".into()]),
            Value::Str("bonono".into())
        );
        assert_eq!(run("quote", &["a\"b".into()]), Value::Str(r#""a\"b""#.into()));
    }

    #[test]
    fn indent_skips_empty_lines() {
        assert_eq!(
            run("indent", &[Value::Int(2), "a\n\nb".into()]),
            Value::Str("  a\n\n  b".into())
        );
    }

    #[test]
    fn path_helpers() {
        assert_eq!(run("base", &["a/b/c.go".into()]), Value::Str("c.go".into()));
        assert_eq!(run("dir", &["a/b/c.go".into()]), Value::Str("a/b".into()));
        assert_eq!(run("ext", &["a/b/c.go".into()]), Value::Str(".go".into()));
        assert_eq!(run("dir", &["c.go".into()]), Value::Str(".".into()));
        assert_eq!(run("ext", &["a/.hidden".into()]), Value::Str("".into()));
        assert_eq!(
            run("joinPath", &["cmd/".into(), "sub".into(), "main.go".into()]),
            Value::Str("cmd/sub/main.go".into())
        );
    }

    #[test]
    fn comparison_helpers() {
        assert_eq!(run("eq", &["a".into(), "a".into()]), Value::Bool(true));
        assert_eq!(run("ne", &[Value::Int(1), Value::Int(2)]), Value::Bool(true));
        assert!(matches!(
            call("eq", &["1".into(), Value::Int(1)], Pos::start()),
            Err(TemplateError::TypeMismatch { .. })
        ));
        assert_eq!(
            run("and", &[Value::Bool(true), Value::Bool(false)]),
            Value::Bool(false)
        );
        assert_eq!(run("not", &[Value::Bool(false)]), Value::Bool(true));
    }

    #[test]
    fn list_helpers() {
        let list = Value::List(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(run("len", &[list.clone()]), Value::Int(3));
        assert_eq!(run("first", &[list.clone()]), Value::Str("a".into()));
        assert_eq!(run("last", &[list.clone()]), Value::Str("c".into()));
        assert_eq!(run("index", &[Value::Int(1), list.clone()]), Value::Str("b".into()));
        assert!(call("index", &[Value::Int(9), list], Pos::start()).is_err());
    }

    #[test]
    fn default_replaces_only_empty_strings() {
        assert_eq!(
            run("default", &["fallback".into(), "".into()]),
            Value::Str("fallback".into())
        );
        assert_eq!(
            run("default", &["fallback".into(), "set".into()]),
            Value::Str("set".into())
        );
    }

    #[test]
    fn unknown_helper_is_an_error() {
        assert!(matches!(
            call("sandwich", &[], Pos::start()),
            Err(TemplateError::UnknownHelper { .. })
        ));
    }
}
