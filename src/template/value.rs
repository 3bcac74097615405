//! Value model shared by template rendering and condition evaluation.

use indexmap::IndexMap;
use serde::Serialize;

/// A value visible to templates and conditions.
///
/// Integers are 64-bit signed. Lists and maps exist so structured bindings
/// (the resolved dependency set, range items) can be traversed; they cannot
/// be interpolated directly.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Value {
    /// Short type label used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Whether the value can be written into rendered output.
    pub fn is_scalar(&self) -> bool {
        matches!(self, Value::Str(_) | Value::Int(_) | Value::Bool(_))
    }

    /// Text form of a scalar. Returns `None` for lists and maps.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s.clone()),
            Value::Int(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Structural equality between scalars of the same type.
    ///
    /// Returns `None` when the two values are of different types or are not
    /// scalars; the caller turns that into a typed comparison error.
    pub fn try_eq(&self, other: &Value) -> Option<bool> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a == b),
            (Value::Int(a), Value::Int(b)) => Some(a == b),
            (Value::Bool(a), Value::Bool(b)) => Some(a == b),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// The name→value bindings visible to template rendering and condition
/// evaluation for one generation run.
///
/// Insertion order is preserved so variable evaluation order stays
/// observable and deterministic. The evaluator composes one of these from
/// configuration values, computed variables, and the fixed built-ins.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    bindings: IndexMap<String, Value>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_text_forms() {
        assert_eq!(Value::Str("a".into()).as_text(), Some("a".to_string()));
        assert_eq!(Value::Int(-3).as_text(), Some("-3".to_string()));
        assert_eq!(Value::Bool(true).as_text(), Some("true".to_string()));
        assert_eq!(Value::List(vec![]).as_text(), None);
    }

    #[test]
    fn cross_type_equality_is_undecided() {
        assert_eq!(Value::Str("1".into()).try_eq(&Value::Int(1)), None);
        assert_eq!(Value::Int(1).try_eq(&Value::Int(1)), Some(true));
        assert_eq!(Value::Bool(false).try_eq(&Value::Bool(true)), Some(false));
    }

    #[test]
    fn environment_preserves_insertion_order() {
        let mut env = Environment::new();
        env.bind("b", Value::Int(1));
        env.bind("a", Value::Int(2));
        let names: Vec<_> = env.names().collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
