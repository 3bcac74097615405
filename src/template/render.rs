//! Evaluates a parsed node tree against a variable environment.
//!
//! Inside a `range` body, references resolve against the current element
//! first and fall back to the root environment, so dependency lists can be
//! walked while built-ins stay reachable.

use super::helpers;
use super::lexer::Pos;
use super::parser::{Expr, Node, Stage};
use super::value::{Environment, Value};
use super::TemplateError;

pub fn render(nodes: &[Node], env: &Environment) -> Result<String, TemplateError> {
    let mut out = String::new();
    render_nodes(nodes, env, None, &mut out)?;
    Ok(out)
}

fn render_nodes(
    nodes: &[Node],
    env: &Environment,
    item: Option<&Value>,
    out: &mut String,
) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Interp(expr) => {
                let value = eval(expr, env, item)?;
                match value.as_text() {
                    Some(text) => out.push_str(&text),
                    None => {
                        let pos = expr.pos();
                        return Err(TemplateError::Helper {
                            helper: "interpolation".to_string(),
                            message: format!("cannot write a {} into output", value.type_name()),
                            line: pos.line,
                            column: pos.column,
                        });
                    }
                }
            }
            Node::If { branches, else_body } => {
                let mut taken = false;
                for (cond, body) in branches {
                    if eval_bool(cond, env, item)? {
                        render_nodes(body, env, item, out)?;
                        taken = true;
                        break;
                    }
                }
                if !taken {
                    if let Some(body) = else_body {
                        render_nodes(body, env, item, out)?;
                    }
                }
            }
            Node::Range { over, body } => {
                let value = eval(over, env, item)?;
                let pos = over.pos();
                match value {
                    Value::List(items) => {
                        for element in &items {
                            render_nodes(body, env, Some(element), out)?;
                        }
                    }
                    other => {
                        return Err(TemplateError::Helper {
                            helper: "range".to_string(),
                            message: format!("cannot iterate over a {}", other.type_name()),
                            line: pos.line,
                            column: pos.column,
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

pub fn eval(
    expr: &Expr,
    env: &Environment,
    item: Option<&Value>,
) -> Result<Value, TemplateError> {
    match expr {
        Expr::Lit { value, .. } => Ok(value.clone()),
        Expr::Ref { path, pos } => resolve_ref(path, env, item, *pos),
        Expr::Call { name, args, pos } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, env, item)?);
            }
            helpers::call(name, &values, *pos)
        }
        Expr::Pipeline { head, stages, .. } => {
            let mut value = eval(head, env, item)?;
            for Stage { name, args, pos } in stages {
                let mut values = Vec::with_capacity(args.len() + 1);
                for arg in args {
                    values.push(eval(arg, env, item)?);
                }
                values.push(value);
                value = helpers::call(name, &values, *pos)?;
            }
            Ok(value)
        }
    }
}

fn eval_bool(
    expr: &Expr,
    env: &Environment,
    item: Option<&Value>,
) -> Result<bool, TemplateError> {
    let value = eval(expr, env, item)?;
    value.as_bool().ok_or_else(|| {
        let pos = expr.pos();
        TemplateError::Helper {
            helper: "if".to_string(),
            message: format!("condition must be a boolean, got {}", value.type_name()),
            line: pos.line,
            column: pos.column,
        }
    })
}

fn resolve_ref(
    path: &[String],
    env: &Environment,
    item: Option<&Value>,
    pos: Pos,
) -> Result<Value, TemplateError> {
    if path.is_empty() {
        return match item {
            Some(value) => Ok(value.clone()),
            None => Err(missing(".", pos)),
        };
    }

    // Current range element shadows the root environment.
    if let Some(Value::Map(fields)) = item {
        if let Some(value) = fields.get(&path[0]) {
            return descend(value, &path[1..], path, pos);
        }
    }

    match env.get(&path[0]) {
        Some(value) => descend(value, &path[1..], path, pos),
        None => Err(missing(&path.join("."), pos)),
    }
}

fn descend(
    mut value: &Value,
    rest: &[String],
    full: &[String],
    pos: Pos,
) -> Result<Value, TemplateError> {
    for segment in rest {
        match value {
            Value::Map(fields) => match fields.get(segment) {
                Some(inner) => value = inner,
                None => return Err(missing(&full.join("."), pos)),
            },
            _ => return Err(missing(&full.join("."), pos)),
        }
    }
    Ok(value.clone())
}

fn missing(name: &str, pos: Pos) -> TemplateError {
    TemplateError::MissingValue {
        name: name.to_string(),
        line: pos.line,
        column: pos.column,
    }
}

/// Root names a node tree reads from the environment.
///
/// Used at registry load to check that templates only reference declared
/// names. References inside a `range` body are skipped (they may name
/// fields of the element), except the range expression itself.
pub fn referenced_roots(nodes: &[Node]) -> Vec<String> {
    let mut roots = Vec::new();
    collect_nodes(nodes, false, &mut roots);
    roots.sort();
    roots.dedup();
    roots
}

fn collect_nodes(nodes: &[Node], in_range: bool, roots: &mut Vec<String>) {
    for node in nodes {
        match node {
            Node::Text(_) => {}
            Node::Interp(expr) => collect_expr(expr, in_range, roots),
            Node::If { branches, else_body } => {
                for (cond, body) in branches {
                    collect_expr(cond, in_range, roots);
                    collect_nodes(body, in_range, roots);
                }
                if let Some(body) = else_body {
                    collect_nodes(body, in_range, roots);
                }
            }
            Node::Range { over, body } => {
                collect_expr(over, in_range, roots);
                collect_nodes(body, true, roots);
            }
        }
    }
}

fn collect_expr(expr: &Expr, in_range: bool, roots: &mut Vec<String>) {
    match expr {
        Expr::Ref { path, .. } => {
            if !in_range {
                if let Some(root) = path.first() {
                    roots.push(root.clone());
                }
            }
        }
        Expr::Lit { .. } => {}
        Expr::Call { args, .. } => {
            for arg in args {
                collect_expr(arg, in_range, roots);
            }
        }
        Expr::Pipeline { head, stages, .. } => {
            collect_expr(head, in_range, roots);
            for stage in stages {
                for arg in &stage.args {
                    collect_expr(arg, in_range, roots);
                }
            }
        }
    }
}
