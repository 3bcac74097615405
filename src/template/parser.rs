//! Parses lexed segments into a node tree.
//!
//! Tag grammar:
//!
//! ```text
//! pipeline := command ('|' command)*
//! command  := IDENT arg*            helper invocation
//!           | arg
//! arg      := REF | '.' | STRING | INT | 'true' | 'false' | '(' pipeline ')'
//! ```
//!
//! Block tags are `if` / `else if` / `else` / `end` and `range` / `end`.

use super::lexer::{lex, Pos, Segment};
use super::value::Value;
use super::TemplateError;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Dotted reference; an empty path is the current range element.
    Ref { path: Vec<String>, pos: Pos },
    Lit { value: Value, pos: Pos },
    /// Prefix helper invocation, e.g. `eq .a "x"`.
    Call {
        name: String,
        args: Vec<Expr>,
        pos: Pos,
    },
    /// `head | helper args | helper args ...`
    Pipeline {
        head: Box<Expr>,
        stages: Vec<Stage>,
        pos: Pos,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub name: String,
    pub args: Vec<Expr>,
    pub pos: Pos,
}

impl Expr {
    pub fn pos(&self) -> Pos {
        match self {
            Expr::Ref { pos, .. }
            | Expr::Lit { pos, .. }
            | Expr::Call { pos, .. }
            | Expr::Pipeline { pos, .. } => *pos,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Interp(Expr),
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        else_body: Option<Vec<Node>>,
    },
    Range {
        over: Expr,
        body: Vec<Node>,
    },
}

/// Parse full template text into a node tree.
pub fn parse(input: &str) -> Result<Vec<Node>, TemplateError> {
    let segments = lex(input)?;
    let mut iter = segments.into_iter().peekable();
    let nodes = parse_nodes(&mut iter, None)?;
    if let Some(Segment::Tag { content, pos }) = iter.next() {
        let word = content.split_whitespace().next().unwrap_or("");
        return Err(syntax(pos, format!("unexpected `{{{{ {word} }}}}`")));
    }
    Ok(nodes)
}

type SegIter = std::iter::Peekable<std::vec::IntoIter<Segment>>;

/// Parse nodes until a terminator tag (`end`, `else`, `else if`) is seen.
/// The terminator is left in the iterator for the caller.
fn parse_nodes(iter: &mut SegIter, block: Option<Pos>) -> Result<Vec<Node>, TemplateError> {
    let mut nodes = Vec::new();
    loop {
        match iter.peek() {
            None => {
                if let Some(pos) = block {
                    return Err(syntax(pos, "unterminated block, missing `{{ end }}`".into()));
                }
                return Ok(nodes);
            }
            Some(Segment::Text(_)) => {
                if let Some(Segment::Text(text)) = iter.next() {
                    nodes.push(Node::Text(text));
                }
            }
            Some(Segment::Tag { content, pos }) => {
                let pos = *pos;
                let first = content.split_whitespace().next().unwrap_or("");
                match first {
                    "end" | "else" => return Ok(nodes),
                    "if" => {
                        if let Some(Segment::Tag { content, .. }) = iter.next() {
                            nodes.push(parse_if(&content, pos, iter)?);
                        }
                    }
                    "range" => {
                        if let Some(Segment::Tag { content, .. }) = iter.next() {
                            let rest = content.trim_start_matches("range").trim();
                            let over = parse_expr_str(rest, pos)?;
                            let body = parse_nodes(iter, Some(pos))?;
                            expect_end(iter, pos)?;
                            nodes.push(Node::Range { over, body });
                        }
                    }
                    "" => return Err(syntax(pos, "empty action tag".into())),
                    _ => {
                        if let Some(Segment::Tag { content, .. }) = iter.next() {
                            nodes.push(Node::Interp(parse_expr_str(&content, pos)?));
                        }
                    }
                }
            }
        }
    }
}

fn parse_if(content: &str, pos: Pos, iter: &mut SegIter) -> Result<Node, TemplateError> {
    let cond_src = content.trim_start_matches("if").trim();
    let mut branches = vec![(parse_expr_str(cond_src, pos)?, parse_nodes(iter, Some(pos))?)];
    let mut else_body = None;

    loop {
        match iter.next() {
            Some(Segment::Tag { content, pos: tag_pos }) => {
                let mut words = content.split_whitespace();
                match (words.next(), words.next()) {
                    (Some("end"), None) => break,
                    (Some("else"), None) => {
                        else_body = Some(parse_nodes(iter, Some(tag_pos))?);
                        expect_end(iter, tag_pos)?;
                        break;
                    }
                    (Some("else"), Some("if")) => {
                        let src = content.trim_start_matches("else").trim();
                        let src = src.trim_start_matches("if").trim();
                        let cond = parse_expr_str(src, tag_pos)?;
                        branches.push((cond, parse_nodes(iter, Some(tag_pos))?));
                    }
                    _ => {
                        return Err(syntax(
                            tag_pos,
                            "expected `{{ else }}`, `{{ else if }}` or `{{ end }}`".into(),
                        ))
                    }
                }
            }
            _ => return Err(syntax(pos, "unterminated `if` block".into())),
        }
    }
    Ok(Node::If { branches, else_body })
}

fn expect_end(iter: &mut SegIter, pos: Pos) -> Result<(), TemplateError> {
    match iter.next() {
        Some(Segment::Tag { content, .. }) if content.trim() == "end" => Ok(()),
        _ => Err(syntax(pos, "unterminated block, missing `{{ end }}`".into())),
    }
}

// ---------------------------------------------------------------------------
// Tag expression parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ref(Vec<String>),
    Dot,
    Ident(String),
    Str(String),
    Int(i64),
    Pipe,
    LParen,
    RParen,
}

pub fn parse_expr_str(src: &str, pos: Pos) -> Result<Expr, TemplateError> {
    let toks = tokenize(src, pos)?;
    let mut cursor = 0usize;
    let expr = parse_pipeline(&toks, &mut cursor, pos)?;
    if cursor != toks.len() {
        return Err(syntax(pos, format!("trailing input in expression `{src}`")));
    }
    Ok(expr)
}

fn tokenize(src: &str, pos: Pos) -> Result<Vec<Tok>, TemplateError> {
    let mut toks = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '|' => {
                toks.push(Tok::Pipe);
                i += 1;
            }
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            '.' => {
                let (path, next) = scan_ref(&chars, i);
                if path.is_empty() {
                    toks.push(Tok::Dot);
                } else {
                    toks.push(Tok::Ref(path));
                }
                i = next;
            }
            '"' | '\'' => {
                let (s, next) = scan_string(&chars, i, c, pos)?;
                toks.push(Tok::Str(s));
                i = next;
            }
            '-' | '0'..='9' => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text.parse::<i64>().map_err(|_| {
                    syntax(pos, format!("invalid integer literal `{text}`"))
                })?;
                toks.push(Tok::Int(n));
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                toks.push(Tok::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(syntax(pos, format!("unexpected character `{other}`")));
            }
        }
    }
    Ok(toks)
}

fn scan_ref(chars: &[char], mut i: usize) -> (Vec<String>, usize) {
    let mut path = Vec::new();
    while i < chars.len() && chars[i] == '.' {
        i += 1;
        let start = i;
        while i < chars.len() && is_ident_char(chars[i]) {
            i += 1;
        }
        if start == i {
            break;
        }
        path.push(chars[start..i].iter().collect());
    }
    (path, i)
}

fn scan_string(
    chars: &[char],
    start: usize,
    quote: char,
    pos: Pos,
) -> Result<(String, usize), TemplateError> {
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                let esc = chars[i + 1];
                out.push(match esc {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
                i += 2;
            }
            c if c == quote => return Ok((out, i + 1)),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(syntax(pos, "unterminated string literal".into()))
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn parse_pipeline(toks: &[Tok], cursor: &mut usize, pos: Pos) -> Result<Expr, TemplateError> {
    let head = parse_command(toks, cursor, pos)?;
    let mut stages = Vec::new();
    while matches!(toks.get(*cursor), Some(Tok::Pipe)) {
        *cursor += 1;
        match toks.get(*cursor) {
            Some(Tok::Ident(name)) => {
                let name = name.clone();
                *cursor += 1;
                let mut args = Vec::new();
                while let Some(arg) = try_parse_arg(toks, cursor, pos)? {
                    args.push(arg);
                }
                stages.push(Stage { name, args, pos });
            }
            _ => {
                return Err(syntax(pos, "expected helper name after `|`".into()));
            }
        }
    }
    if stages.is_empty() {
        Ok(head)
    } else {
        Ok(Expr::Pipeline {
            head: Box::new(head),
            stages,
            pos,
        })
    }
}

fn parse_command(toks: &[Tok], cursor: &mut usize, pos: Pos) -> Result<Expr, TemplateError> {
    match toks.get(*cursor) {
        Some(Tok::Ident(name)) if name != "true" && name != "false" => {
            let name = name.clone();
            *cursor += 1;
            let mut args = Vec::new();
            while let Some(arg) = try_parse_arg(toks, cursor, pos)? {
                args.push(arg);
            }
            Ok(Expr::Call { name, args, pos })
        }
        _ => match try_parse_arg(toks, cursor, pos)? {
            Some(expr) => Ok(expr),
            None => Err(syntax(pos, "expected expression".into())),
        },
    }
}

/// Parse a single argument if the next token starts one.
fn try_parse_arg(
    toks: &[Tok],
    cursor: &mut usize,
    pos: Pos,
) -> Result<Option<Expr>, TemplateError> {
    let expr = match toks.get(*cursor) {
        Some(Tok::Ref(path)) => {
            let path = path.clone();
            *cursor += 1;
            Expr::Ref { path, pos }
        }
        Some(Tok::Dot) => {
            *cursor += 1;
            Expr::Ref { path: Vec::new(), pos }
        }
        Some(Tok::Str(s)) => {
            let s = s.clone();
            *cursor += 1;
            Expr::Lit {
                value: Value::Str(s),
                pos,
            }
        }
        Some(Tok::Int(n)) => {
            let n = *n;
            *cursor += 1;
            Expr::Lit {
                value: Value::Int(n),
                pos,
            }
        }
        Some(Tok::Ident(word)) if word == "true" || word == "false" => {
            let b = word == "true";
            *cursor += 1;
            Expr::Lit {
                value: Value::Bool(b),
                pos,
            }
        }
        Some(Tok::LParen) => {
            *cursor += 1;
            let inner = parse_pipeline(toks, cursor, pos)?;
            match toks.get(*cursor) {
                Some(Tok::RParen) => {
                    *cursor += 1;
                    inner
                }
                _ => return Err(syntax(pos, "missing closing `)`".into())),
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(expr))
}

fn syntax(pos: Pos, message: String) -> TemplateError {
    TemplateError::Syntax {
        line: pos.line,
        column: pos.column,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(src: &str) -> Expr {
        parse_expr_str(src, Pos::start()).expect("parse")
    }

    #[test]
    fn plain_reference() {
        match parse_one(".Name") {
            Expr::Ref { path, .. } => assert_eq!(path, vec!["Name"]),
            other => panic!("unexpected expr {other:?}"),
        }
    }

    #[test]
    fn dotted_reference() {
        match parse_one(".Dep.Version") {
            Expr::Ref { path, .. } => assert_eq!(path, vec!["Dep", "Version"]),
            other => panic!("unexpected expr {other:?}"),
        }
    }

    #[test]
    fn pipeline_with_args() {
        match parse_one(r#".Name | replace "a" "b" | upper"#) {
            Expr::Pipeline { stages, .. } => {
                assert_eq!(stages.len(), 2);
                assert_eq!(stages[0].name, "replace");
                assert_eq!(stages[0].args.len(), 2);
                assert_eq!(stages[1].name, "upper");
            }
            other => panic!("unexpected expr {other:?}"),
        }
    }

    #[test]
    fn prefix_call_with_nested_parens() {
        match parse_one(r#"and (eq .a "x") (ne .b "y")"#) {
            Expr::Call { name, args, .. } => {
                assert_eq!(name, "and");
                assert_eq!(args.len(), 2);
                assert!(matches!(args[0], Expr::Call { .. }));
            }
            other => panic!("unexpected expr {other:?}"),
        }
    }

    #[test]
    fn if_else_structure() {
        let nodes = parse("{{ if eq .a \"x\" }}A{{ else if .b }}B{{ else }}C{{ end }}").unwrap();
        match &nodes[0] {
            Node::If { branches, else_body } => {
                assert_eq!(branches.len(), 2);
                assert!(else_body.is_some());
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn range_structure() {
        let nodes = parse("{{ range .Items }}{{ .Name }}{{ end }}").unwrap();
        match &nodes[0] {
            Node::Range { body, .. } => assert_eq!(body.len(), 1),
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn unterminated_block_is_rejected() {
        assert!(parse("{{ if .a }}body").is_err());
    }

    #[test]
    fn stray_end_is_rejected() {
        assert!(parse("text{{ end }}").is_err());
    }

    #[test]
    fn negative_integer_literal() {
        match parse_one("-42") {
            Expr::Lit { value, .. } => assert_eq!(value, Value::Int(-42)),
            other => panic!("unexpected expr {other:?}"),
        }
    }
}
