//! Splits template text into literal segments and `{{ ... }}` action tags.
//!
//! Trim markers (`{{-` and `-}}`) strip adjacent whitespace up to and
//! including the nearest newline; whitespace beyond that newline is left
//! untouched.

use super::TemplateError;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Source position of a tag, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub line: usize,
    pub column: usize,
}

impl Pos {
    pub fn start() -> Self {
        Pos { line: 1, column: 1 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Tag { content: String, pos: Pos },
}

/// Lex template text into segments, applying trim markers to the
/// surrounding literal text.
pub fn lex(input: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut rest = input;
    let mut pos = Pos::start();

    while let Some(open_at) = rest.find(OPEN) {
        let (text, after_text) = rest.split_at(open_at);
        let tag_pos = advance(pos, text);

        let after_open = &after_text[OPEN.len()..];
        let trim_left = after_open.starts_with('-')
            && after_open[1..].starts_with(|c: char| c.is_whitespace());
        let body_start = if trim_left { 1 } else { 0 };

        let (content, consumed) = scan_tag(&after_open[body_start..], tag_pos)?;
        let trimmed = content.trim_end();
        let trim_right = trimmed.ends_with('-')
            && (trimmed.len() == 1 || trimmed[..trimmed.len() - 1].ends_with(char::is_whitespace));
        let content = if trim_right {
            trimmed[..trimmed.len() - 1].to_string()
        } else {
            content
        };

        let mut text = text.to_string();
        if trim_left {
            trim_text_end(&mut text);
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        segments.push(Segment::Tag {
            content: content.trim().to_string(),
            pos: tag_pos,
        });

        let tag_total = OPEN.len() + body_start + consumed;
        pos = advance(tag_pos, &after_text[..tag_total]);
        rest = &after_text[tag_total..];
        if trim_right {
            let stripped = trim_text_start(rest);
            pos = advance(pos, &rest[..rest.len() - stripped.len()]);
            rest = stripped;
        }
    }

    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }
    Ok(segments)
}

/// Scan to the closing delimiter, honouring string literals so a quoted
/// `}}` does not terminate the tag. Returns the raw content and the number
/// of bytes consumed including the delimiter.
fn scan_tag(input: &str, pos: Pos) -> Result<(String, usize), TemplateError> {
    let bytes = input.as_bytes();
    let mut i = 0;
    let mut in_string: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match in_string {
            Some(quote) => {
                if b == b'\\' {
                    i += 2;
                    continue;
                }
                if b == quote {
                    in_string = None;
                }
            }
            None => {
                if b == b'"' || b == b'\'' {
                    in_string = Some(b);
                } else if input[i..].starts_with(CLOSE) {
                    return Ok((input[..i].to_string(), i + CLOSE.len()));
                }
            }
        }
        i += 1;
    }
    Err(TemplateError::Syntax {
        line: pos.line,
        column: pos.column,
        message: "unclosed action tag".to_string(),
    })
}

/// Strip trailing spaces and tabs, then at most one newline.
fn trim_text_end(text: &mut String) {
    while text.ends_with(' ') || text.ends_with('\t') {
        text.pop();
    }
    if text.ends_with('\n') {
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
    }
}

/// Strip leading spaces and tabs, then at most one newline.
fn trim_text_start(text: &str) -> &str {
    let text = text.trim_start_matches([' ', '\t']);
    let text = text.strip_prefix("\r\n").unwrap_or(text);
    text.strip_prefix('\n').unwrap_or(text)
}

fn advance(mut pos: Pos, text: &str) -> Pos {
    for c in text.chars() {
        if c == '\n' {
            pos.line += 1;
            pos.column = 1;
        } else {
            pos.column += 1;
        }
    }
    pos
}
