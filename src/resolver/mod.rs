//! Configuration resolution.
//!
//! Merges explicit overrides, externally-collected prompt answers, and
//! declared defaults into a fully-populated [`Configuration`], with
//! precedence override > answer > default. Prompting itself is a caller
//! concern: [`questions`] says which parameters need an answer for a given
//! disclosure tier, and the resolver never blocks on input.

mod validation;

use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;

use crate::evaluator::condition::Condition;
use crate::registry::manifest::scalar_to_raw;
use crate::registry::{Blueprint, DisclosureTier, ParameterDecl};
use crate::template::Environment;

pub use validation::ParamValue;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unknown parameter `{name}`")]
    UnknownParameter { name: String },

    #[error("missing required parameter `{name}`")]
    MissingRequiredParameter { name: String },

    #[error("parameter `{name}`: {message}")]
    ParameterValidationFailed { name: String, message: String },

    #[error("parameter `{name}`: {message}")]
    InconsistentDependency { name: String, message: String },
}

/// Inputs to one resolution: explicit overrides, answers collected by an
/// external prompter, and the disclosure tier that governed prompting.
#[derive(Debug, Clone, Default)]
pub struct ResolveInputs {
    pub overrides: IndexMap<String, String>,
    pub answers: IndexMap<String, String>,
    pub tier: DisclosureTier,
}

impl ResolveInputs {
    pub fn from_overrides(overrides: IndexMap<String, String>) -> Self {
        ResolveInputs {
            overrides,
            ..Default::default()
        }
    }
}

/// A finalised parameter mapping: every declared parameter has exactly one
/// validated value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Configuration {
    values: IndexMap<String, ParamValue>,
}

impl Configuration {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn raw(&self, name: &str) -> Option<String> {
        self.values.get(name).map(ParamValue::raw)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Raw override map that resolves back to this configuration.
    pub fn to_overrides(&self) -> IndexMap<String, String> {
        self.values
            .iter()
            .map(|(name, value)| (name.clone(), value.raw()))
            .collect()
    }
}

/// Whether a parameter is offered to an external prompter under a tier.
fn surfaced(param: &ParameterDecl, tier: DisclosureTier) -> bool {
    match tier {
        DisclosureTier::Basic => param.tier == DisclosureTier::Basic,
        DisclosureTier::Advanced => true,
    }
}

/// The parameters an external prompter must ask about: declared, surfaced
/// by the tier, and not already pinned by an override. Declaration order.
pub fn questions<'a>(
    blueprint: &'a Blueprint,
    tier: DisclosureTier,
    overrides: &IndexMap<String, String>,
) -> Vec<&'a ParameterDecl> {
    blueprint
        .parameters()
        .iter()
        .filter(|p| surfaced(p, tier) && !overrides.contains_key(&p.name))
        .collect()
}

/// Resolve a full configuration for one blueprint.
pub fn resolve(blueprint: &Blueprint, inputs: &ResolveInputs) -> Result<Configuration, ResolveError> {
    // Strict: overrides and answers may only name declared parameters.
    for name in inputs.overrides.keys().chain(inputs.answers.keys()) {
        if blueprint.parameter(name).is_none() {
            return Err(ResolveError::UnknownParameter { name: name.clone() });
        }
    }

    let mut values: IndexMap<String, ParamValue> = IndexMap::new();
    // Parameter values seen so far, for gate and rule conditions.
    let mut gate_env = Environment::new();

    for param in blueprint.parameters() {
        let name = &param.name;

        let explicit = inputs
            .overrides
            .get(name)
            .or_else(|| {
                if surfaced(param, inputs.tier) {
                    inputs.answers.get(name)
                } else {
                    None
                }
            })
            .cloned();
        let default = param.default.as_ref().and_then(scalar_to_raw);
        let raw = match explicit.clone().or(default) {
            Some(raw) => raw,
            None => {
                return Err(ResolveError::MissingRequiredParameter { name: name.clone() })
            }
        };

        let value = resolve_one(param, &raw, explicit.is_some(), &gate_env)?;
        debug!(parameter = %name, value = %value.raw(), "resolved parameter");
        gate_env.bind(name.clone(), value.to_template_value());
        values.insert(name.clone(), value);
    }

    Ok(Configuration { values })
}

fn resolve_one(
    param: &ParameterDecl,
    raw: &str,
    explicit: bool,
    gate_env: &Environment,
) -> Result<ParamValue, ResolveError> {
    let name = &param.name;
    let coerce = |raw: &str| {
        validation::coerce(param, raw).map_err(|message| {
            ResolveError::ParameterValidationFailed {
                name: name.clone(),
                message,
            }
        })
    };

    if let Some(gate) = &param.gate {
        let open = eval_gate(name, gate, gate_env)?;
        if !open {
            let disabled = param.disabled_value.as_ref().and_then(scalar_to_raw);
            return match disabled {
                Some(disabled) => {
                    if explicit && raw != disabled {
                        Err(ResolveError::InconsistentDependency {
                            name: name.clone(),
                            message: format!(
                                "`{raw}` conflicts with `{gate}` being false; only `{disabled}` is allowed"
                            ),
                        })
                    } else {
                        coerce(&disabled)
                    }
                }
                None => Err(ResolveError::InconsistentDependency {
                    name: name.clone(),
                    message: format!("`{gate}` is false and no disabled value is declared"),
                }),
            };
        }
    }

    let value = coerce(raw)?;

    for rule in &param.rules {
        if eval_gate(name, &rule.when, gate_env)? && rule.deny.iter().any(|d| d == raw) {
            return Err(ResolveError::InconsistentDependency {
                name: name.clone(),
                message: format!("`{raw}` is not allowed when `{}` holds", rule.when),
            });
        }
    }
    Ok(value)
}

fn eval_gate(name: &str, source: &str, env: &Environment) -> Result<bool, ResolveError> {
    // Gate syntax was validated at registry load; a failure here means the
    // environment is incomplete, which is a dependency declaration problem.
    let cond = Condition::parse(source).map_err(|e| ResolveError::InconsistentDependency {
        name: name.to_string(),
        message: e.to_string(),
    })?;
    cond.eval(env)
        .map_err(|e| ResolveError::InconsistentDependency {
            name: name.to_string(),
            message: e.to_string(),
        })
}

/// Bind every configuration value into a template environment.
pub fn bind_configuration(config: &Configuration, env: &mut Environment) {
    for (name, value) in config.iter() {
        env.bind(name.to_string(), value.to_template_value());
    }
}
