//! Boolean condition expressions attached to files, dependencies, and
//! parameter gates.
//!
//! Grammar (infix, lowest precedence first):
//!
//! ```text
//! expr    := or
//! or      := and ('||' and)*
//! and     := cmp ('&&' cmp)*
//! cmp     := unary (('==' | '!=') unary)?
//! unary   := '!' unary | primary
//! primary := '(' expr ')' | STRING | INT | 'true' | 'false' | IDENT
//! ```
//!
//! Identifiers name parameters, then variables, then built-ins. Comparison
//! requires both sides to share a scalar type. Evaluation is total over a
//! complete environment.

use thiserror::Error;

use crate::template::{Environment, Value};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConditionError {
    #[error("condition syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("condition references undefined name `{name}`")]
    Undefined { name: String },

    #[error("cannot compare {left} with {right}")]
    TypeMismatch {
        left: &'static str,
        right: &'static str,
    },

    #[error("{context} requires a boolean, got {actual}")]
    NotBoolean {
        context: &'static str,
        actual: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum CondExpr {
    Name(String),
    Lit(Value),
    Not(Box<CondExpr>),
    And(Box<CondExpr>, Box<CondExpr>),
    Or(Box<CondExpr>, Box<CondExpr>),
    Eq(Box<CondExpr>, Box<CondExpr>),
    Ne(Box<CondExpr>, Box<CondExpr>),
}

/// A parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: CondExpr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, cursor: 0 };
        let expr = parser.expr()?;
        if parser.cursor != parser.tokens.len() {
            return Err(ConditionError::Syntax {
                offset: parser.offset(),
                message: "trailing input".to_string(),
            });
        }
        Ok(Condition {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Every name the condition reads. Used at registry load to check that
    /// conditions only reference declared names.
    pub fn referenced_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        collect_names(&self.expr, &mut names);
        names.sort();
        names.dedup();
        names
    }

    pub fn eval(&self, env: &Environment) -> Result<bool, ConditionError> {
        match eval_expr(&self.expr, env)? {
            Value::Bool(b) => Ok(b),
            other => Err(ConditionError::NotBoolean {
                context: "condition",
                actual: other.type_name(),
            }),
        }
    }
}

fn collect_names(expr: &CondExpr, names: &mut Vec<String>) {
    match expr {
        CondExpr::Name(name) => names.push(name.clone()),
        CondExpr::Lit(_) => {}
        CondExpr::Not(inner) => collect_names(inner, names),
        CondExpr::And(a, b)
        | CondExpr::Or(a, b)
        | CondExpr::Eq(a, b)
        | CondExpr::Ne(a, b) => {
            collect_names(a, names);
            collect_names(b, names);
        }
    }
}

fn eval_expr(expr: &CondExpr, env: &Environment) -> Result<Value, ConditionError> {
    match expr {
        CondExpr::Lit(value) => Ok(value.clone()),
        CondExpr::Name(name) => env
            .get(name)
            .cloned()
            .ok_or_else(|| ConditionError::Undefined { name: name.clone() }),
        CondExpr::Not(inner) => {
            let value = eval_expr(inner, env)?;
            match value {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(ConditionError::NotBoolean {
                    context: "`!`",
                    actual: other.type_name(),
                }),
            }
        }
        CondExpr::And(a, b) => {
            let left = eval_bool(a, env, "`&&`")?;
            let right = eval_bool(b, env, "`&&`")?;
            Ok(Value::Bool(left && right))
        }
        CondExpr::Or(a, b) => {
            let left = eval_bool(a, env, "`||`")?;
            let right = eval_bool(b, env, "`||`")?;
            Ok(Value::Bool(left || right))
        }
        CondExpr::Eq(a, b) | CondExpr::Ne(a, b) => {
            let left = eval_expr(a, env)?;
            let right = eval_expr(b, env)?;
            let equal = left.try_eq(&right).ok_or(ConditionError::TypeMismatch {
                left: left.type_name(),
                right: right.type_name(),
            })?;
            let negate = matches!(expr, CondExpr::Ne(_, _));
            Ok(Value::Bool(equal != negate))
        }
    }
}

fn eval_bool(
    expr: &CondExpr,
    env: &Environment,
    context: &'static str,
) -> Result<bool, ConditionError> {
    match eval_expr(expr, env)? {
        Value::Bool(b) => Ok(b),
        other => Err(ConditionError::NotBoolean {
            context,
            actual: other.type_name(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Int(i64),
    Bool(bool),
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    Bang,
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Result<Vec<(usize, Tok)>, ConditionError> {
    let chars: Vec<char> = src.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                toks.push((i, Tok::LParen));
                i += 1;
            }
            ')' => {
                toks.push((i, Tok::RParen));
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                toks.push((i, Tok::EqEq));
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                toks.push((i, Tok::NotEq));
                i += 2;
            }
            '!' => {
                toks.push((i, Tok::Bang));
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                toks.push((i, Tok::AndAnd));
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                toks.push((i, Tok::OrOr));
                i += 2;
            }
            '"' | '\'' => {
                let quote = c;
                let start = i;
                i += 1;
                let mut s = String::new();
                loop {
                    match chars.get(i) {
                        Some('\\') if chars.get(i + 1).is_some() => {
                            s.push(chars[i + 1]);
                            i += 2;
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                        None => {
                            return Err(ConditionError::Syntax {
                                offset: start,
                                message: "unterminated string literal".to_string(),
                            })
                        }
                    }
                }
                toks.push((start, Tok::Str(s)));
            }
            '-' | '0'..='9' => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text.parse::<i64>().map_err(|_| ConditionError::Syntax {
                    offset: start,
                    message: format!("invalid integer `{text}`"),
                })?;
                toks.push((start, Tok::Int(n)));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let tok = match word.as_str() {
                    "true" => Tok::Bool(true),
                    "false" => Tok::Bool(false),
                    _ => Tok::Ident(word),
                };
                toks.push((start, tok));
            }
            other => {
                return Err(ConditionError::Syntax {
                    offset: i,
                    message: format!("unexpected character `{other}`"),
                })
            }
        }
    }
    Ok(toks)
}

struct Parser {
    tokens: Vec<(usize, Tok)>,
    cursor: usize,
}

impl Parser {
    fn offset(&self) -> usize {
        self.tokens
            .get(self.cursor)
            .or_else(|| self.tokens.last())
            .map(|(o, _)| *o)
            .unwrap_or(0)
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.cursor).map(|(_, t)| t)
    }

    fn bump(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.cursor).map(|(_, t)| t.clone());
        if tok.is_some() {
            self.cursor += 1;
        }
        tok
    }

    fn expr(&mut self) -> Result<CondExpr, ConditionError> {
        let mut left = self.and()?;
        while matches!(self.peek(), Some(Tok::OrOr)) {
            self.bump();
            let right = self.and()?;
            left = CondExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<CondExpr, ConditionError> {
        let mut left = self.cmp()?;
        while matches!(self.peek(), Some(Tok::AndAnd)) {
            self.bump();
            let right = self.cmp()?;
            left = CondExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn cmp(&mut self) -> Result<CondExpr, ConditionError> {
        let left = self.unary()?;
        match self.peek() {
            Some(Tok::EqEq) => {
                self.bump();
                let right = self.unary()?;
                Ok(CondExpr::Eq(Box::new(left), Box::new(right)))
            }
            Some(Tok::NotEq) => {
                self.bump();
                let right = self.unary()?;
                Ok(CondExpr::Ne(Box::new(left), Box::new(right)))
            }
            _ => Ok(left),
        }
    }

    fn unary(&mut self) -> Result<CondExpr, ConditionError> {
        if matches!(self.peek(), Some(Tok::Bang)) {
            self.bump();
            let inner = self.unary()?;
            return Ok(CondExpr::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<CondExpr, ConditionError> {
        let offset = self.offset();
        match self.bump() {
            Some(Tok::LParen) => {
                let inner = self.expr()?;
                match self.bump() {
                    Some(Tok::RParen) => Ok(inner),
                    _ => Err(ConditionError::Syntax {
                        offset,
                        message: "missing closing `)`".to_string(),
                    }),
                }
            }
            Some(Tok::Ident(name)) => Ok(CondExpr::Name(name)),
            Some(Tok::Str(s)) => Ok(CondExpr::Lit(Value::Str(s))),
            Some(Tok::Int(n)) => Ok(CondExpr::Lit(Value::Int(n))),
            Some(Tok::Bool(b)) => Ok(CondExpr::Lit(Value::Bool(b))),
            _ => Err(ConditionError::Syntax {
                offset,
                message: "expected expression".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        let mut env = Environment::new();
        env.bind("framework", Value::Str("gin".into()));
        env.bind("database_driver", Value::Str("none".into()));
        env.bind("port", Value::Int(8080));
        env.bind("enable_docker", Value::Bool(false));
        env
    }

    fn eval(src: &str) -> bool {
        Condition::parse(src).expect("parse").eval(&env()).expect("eval")
    }

    #[test]
    fn comparisons() {
        assert!(eval(r#"framework == "gin""#));
        assert!(eval(r#"framework != "none""#));
        assert!(eval("port == 8080"));
        assert!(!eval("port != 8080"));
    }

    #[test]
    fn boolean_operators_and_precedence() {
        assert!(eval(r#"framework == "gin" && database_driver == "none""#));
        assert!(eval(r#"enable_docker || framework == "gin""#));
        assert!(eval(r#"!enable_docker"#));
        // `&&` binds tighter than `||`.
        assert!(eval(r#"enable_docker && framework == "x" || port == 8080"#));
        assert!(eval(r#"(enable_docker || true) && port == 8080"#));
    }

    #[test]
    fn bare_boolean_name() {
        assert!(!eval("enable_docker"));
        assert!(eval("true"));
    }

    #[test]
    fn undefined_name_fails() {
        let cond = Condition::parse("missing == \"x\"").unwrap();
        assert!(matches!(
            cond.eval(&env()),
            Err(ConditionError::Undefined { .. })
        ));
    }

    #[test]
    fn cross_type_comparison_fails() {
        let cond = Condition::parse("port == \"8080\"").unwrap();
        assert!(matches!(
            cond.eval(&env()),
            Err(ConditionError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn non_boolean_result_fails() {
        let cond = Condition::parse("framework").unwrap();
        assert!(matches!(
            cond.eval(&env()),
            Err(ConditionError::NotBoolean { .. })
        ));
    }

    #[test]
    fn referenced_names_are_collected() {
        let cond = Condition::parse(r#"a == "x" && !b || c != d"#).unwrap();
        assert_eq!(cond.referenced_names(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn syntax_errors() {
        assert!(Condition::parse("a ==").is_err());
        assert!(Condition::parse("(a == \"x\"").is_err());
        assert!(Condition::parse("a = \"x\"").is_err());
        assert!(Condition::parse("").is_err());
    }
}
