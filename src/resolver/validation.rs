//! Per-kind coercion and validation of raw parameter values.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::registry::{ParamKind, ParameterDecl};
use crate::template::Value;

/// A coerced, validated parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Enum(String),
    Bool(bool),
    Int(i64),
    ModulePath(String),
}

impl ParamValue {
    /// Raw string form, the inverse of coercion.
    pub fn raw(&self) -> String {
        match self {
            ParamValue::Text(s) | ParamValue::Enum(s) | ParamValue::ModulePath(s) => s.clone(),
            ParamValue::Bool(b) => b.to_string(),
            ParamValue::Int(n) => n.to_string(),
        }
    }

    /// The template-engine value this parameter binds to.
    pub fn to_template_value(&self) -> Value {
        match self {
            ParamValue::Text(s) | ParamValue::Enum(s) | ParamValue::ModulePath(s) => {
                Value::Str(s.clone())
            }
            ParamValue::Bool(b) => Value::Bool(*b),
            ParamValue::Int(n) => Value::Int(*n),
        }
    }
}

static MODULE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._~-]+(/[A-Za-z0-9._~-]+)*$").expect("static regex")
});

/// Coerce a raw string according to the parameter's kind and validation
/// rules. Errors are plain messages; the resolver wraps them with the
/// parameter name.
pub fn coerce(param: &ParameterDecl, raw: &str) -> Result<ParamValue, String> {
    match param.kind {
        ParamKind::Text => {
            if let Some(min) = param.min_length {
                if raw.chars().count() < min {
                    return Err(format!("shorter than minimum length {min}"));
                }
            }
            if let Some(max) = param.max_length {
                if raw.chars().count() > max {
                    return Err(format!("longer than maximum length {max}"));
                }
            }
            if let Some(pattern) = &param.pattern {
                let re = Regex::new(pattern).map_err(|e| format!("invalid pattern: {e}"))?;
                if !re.is_match(raw) {
                    return Err(format!("does not match pattern `{pattern}`"));
                }
            }
            Ok(ParamValue::Text(raw.to_string()))
        }
        ParamKind::Enum => {
            if param.options.iter().any(|o| o.value == raw) {
                Ok(ParamValue::Enum(raw.to_string()))
            } else {
                let allowed: Vec<&str> =
                    param.options.iter().map(|o| o.value.as_str()).collect();
                Err(format!(
                    "`{raw}` is not one of {}",
                    allowed.join(", ")
                ))
            }
        }
        ParamKind::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(ParamValue::Bool(true)),
            "false" | "no" | "0" => Ok(ParamValue::Bool(false)),
            other => Err(format!("`{other}` is not a boolean")),
        },
        ParamKind::Int => {
            let n: i64 = raw
                .trim()
                .parse()
                .map_err(|_| format!("`{raw}` is not an integer"))?;
            if let Some(min) = param.min {
                if n < min {
                    return Err(format!("{n} is below minimum {min}"));
                }
            }
            if let Some(max) = param.max {
                if n > max {
                    return Err(format!("{n} is above maximum {max}"));
                }
            }
            Ok(ParamValue::Int(n))
        }
        ParamKind::ModulePath => {
            if !MODULE_PATH.is_match(raw) {
                return Err(format!("`{raw}` is not a valid module path"));
            }
            Ok(ParamValue::ModulePath(raw.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::EnumOption;

    fn decl(kind: ParamKind) -> ParameterDecl {
        let yaml = "name: p\nrequired: true";
        let mut p: ParameterDecl = serde_yaml::from_str(yaml).unwrap();
        p.kind = kind;
        p
    }

    #[test]
    fn bool_coercions() {
        let p = decl(ParamKind::Bool);
        for raw in ["true", "TRUE", "yes", "Yes", "1"] {
            assert_eq!(coerce(&p, raw).unwrap(), ParamValue::Bool(true), "{raw}");
        }
        for raw in ["false", "no", "NO", "0"] {
            assert_eq!(coerce(&p, raw).unwrap(), ParamValue::Bool(false), "{raw}");
        }
        assert!(coerce(&p, "maybe").is_err());
    }

    #[test]
    fn int_range_is_inclusive() {
        let mut p = decl(ParamKind::Int);
        p.min = Some(1);
        p.max = Some(65535);
        assert_eq!(coerce(&p, "1").unwrap(), ParamValue::Int(1));
        assert_eq!(coerce(&p, "65535").unwrap(), ParamValue::Int(65535));
        assert!(coerce(&p, "0").is_err());
        assert!(coerce(&p, "65536").is_err());
        assert!(coerce(&p, "eighty").is_err());
    }

    #[test]
    fn enum_membership() {
        let mut p = decl(ParamKind::Enum);
        p.options = vec![
            EnumOption {
                value: "gin".into(),
                label: "Gin".into(),
            },
            EnumOption {
                value: "none".into(),
                label: "None".into(),
            },
        ];
        assert_eq!(coerce(&p, "gin").unwrap(), ParamValue::Enum("gin".into()));
        assert!(coerce(&p, "echo").is_err());
    }

    #[test]
    fn text_pattern_and_length() {
        let mut p = decl(ParamKind::Text);
        p.pattern = Some("^[a-z][a-z0-9-]*$".into());
        p.min_length = Some(2);
        p.max_length = Some(16);
        assert!(coerce(&p, "mytool").is_ok());
        assert!(coerce(&p, "My Tool").is_err());
        assert!(coerce(&p, "a").is_err());
        assert!(coerce(&p, "averyveryverylongname").is_err());
    }

    #[test]
    fn module_paths() {
        let p = decl(ParamKind::ModulePath);
        assert!(coerce(&p, "example.com/mytool").is_ok());
        assert!(coerce(&p, "github.com/acme/tool/v2").is_ok());
        assert!(coerce(&p, "mytool").is_ok());
        assert!(coerce(&p, "example.com//mytool").is_err());
        assert!(coerce(&p, "/absolute").is_err());
        assert!(coerce(&p, "spaces are bad").is_err());
        assert!(coerce(&p, "").is_err());
    }

    #[test]
    fn raw_round_trips() {
        assert_eq!(ParamValue::Bool(true).raw(), "true");
        assert_eq!(ParamValue::Int(8080).raw(), "8080");
        assert_eq!(ParamValue::Enum("gin".into()).raw(), "gin");
    }
}
