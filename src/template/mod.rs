//! Text template engine.
//!
//! A mustache-like substitution language with value interpolation
//! (`{{ .Name }}`), conditional blocks (`{{ if }}/{{ else if }}/{{ else }}/
//! {{ end }}`), iteration (`{{ range }}`), pipelines with a closed helper
//! set (`{{ .Name | upper | quote }}`), and whitespace trim markers
//! (`{{-` / `-}}`). Rendering is pure: reading an undeclared name is an
//! error, never silently empty.

pub mod helpers;
mod lexer;
mod parser;
mod render;
mod value;

pub use lexer::Pos;
pub use parser::{Expr, Node};
pub use value::{Environment, Value};

use thiserror::Error;

/// Errors raised while parsing or rendering a template.
///
/// All of these surface as the same public failure kind; the variants keep
/// enough structure for useful messages and for tests.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TemplateError {
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("undefined name `{name}` at line {line}, column {column}")]
    MissingValue {
        name: String,
        line: usize,
        column: usize,
    },

    #[error("unknown helper `{name}` at line {line}, column {column}")]
    UnknownHelper {
        name: String,
        line: usize,
        column: usize,
    },

    #[error("helper `{helper}` at line {line}, column {column}: {message}")]
    Helper {
        helper: String,
        message: String,
        line: usize,
        column: usize,
    },

    #[error("cannot compare {left} with {right} at line {line}, column {column}")]
    TypeMismatch {
        left: &'static str,
        right: &'static str,
        line: usize,
        column: usize,
    },
}

/// A parsed template, ready to render any number of times.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let nodes = parser::parse(source)?;
        Ok(Template {
            source: source.to_string(),
            nodes,
        })
    }

    pub fn render(&self, env: &Environment) -> Result<String, TemplateError> {
        render::render(&self.nodes, env)
    }

    /// The original template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the source contains any action tags at all.
    pub fn is_literal(&self) -> bool {
        self.nodes.iter().all(|n| matches!(n, Node::Text(_)))
    }

    /// Root environment names the template reads; see
    /// [`render::referenced_roots`].
    pub fn referenced_roots(&self) -> Vec<String> {
        render::referenced_roots(&self.nodes)
    }
}

/// Parse a standalone expression (no surrounding text), as used by variable
/// declarations that are expressions rather than full templates.
pub fn parse_expr(source: &str) -> Result<Expr, TemplateError> {
    parser::parse_expr_str(source, Pos::start())
}

/// Evaluate a standalone expression against an environment.
pub fn eval_expr(expr: &Expr, env: &Environment) -> Result<Value, TemplateError> {
    render::eval(expr, env, None)
}
