//! Parameter validation against a [`FunctionDef`].
//!
//! Validation happens once, before any handler runs: required parameters
//! must be present, every supplied parameter must have the declared type,
//! and enum values must belong to their closed set. Handlers then read
//! typed values through [`Params`].

use std::str::FromStr;

use serde_json::{Map, Value};
use tracing::debug;

use super::registry::{FunctionDef, ParamKind, ParamSpec};
use crate::dispatch::DispatchError;

/// A validated parameter bag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: Map<String, Value>,
}

impl Params {
    /// A required string. Validation guarantees presence.
    pub fn str(&self, name: &str) -> Result<&str, DispatchError> {
        self.opt_str(name)
            .ok_or_else(|| DispatchError::Validation(format!("missing required parameter: {name}")))
    }

    pub fn opt_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn int(&self, name: &str) -> Result<i64, DispatchError> {
        self.values
            .get(name)
            .and_then(Value::as_i64)
            .ok_or_else(|| DispatchError::Validation(format!("missing required parameter: {name}")))
    }

    /// An optional enum parameter parsed into its model type.
    pub fn opt_enum<T>(&self, name: &str) -> Result<Option<T>, DispatchError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.opt_str(name)
            .map(|raw| raw.parse::<T>().map_err(|e| DispatchError::Validation(e.to_string())))
            .transpose()
    }

    pub fn enum_value<T>(&self, name: &str) -> Result<T, DispatchError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.opt_enum(name)?
            .ok_or_else(|| DispatchError::Validation(format!("missing required parameter: {name}")))
    }

    /// A list of objects, each validated against the nested descriptor.
    pub fn objects(&self, name: &str) -> Result<Vec<Params>, DispatchError> {
        let Some(Value::Array(items)) = self.values.get(name) else {
            return Err(DispatchError::Validation(format!(
                "missing required parameter: {name}"
            )));
        };
        items
            .iter()
            .map(|item| match item {
                Value::Object(map) => Ok(Params {
                    values: map.clone(),
                }),
                _ => Err(DispatchError::Validation(format!(
                    "parameter {name} must contain only objects"
                ))),
            })
            .collect()
    }
}

/// Check `raw` against the function's descriptor and return the accepted
/// parameters. `null` is treated as an empty bag.
pub fn validate(def: &FunctionDef, raw: Value) -> Result<Params, DispatchError> {
    let map = match raw {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        other => {
            return Err(DispatchError::Validation(format!(
                "parameters must be an object, got {}",
                json_type(&other)
            )));
        }
    };
    let values = validate_object(def.params, map, "")?;
    Ok(Params { values })
}

fn validate_object(
    specs: &[ParamSpec],
    mut map: Map<String, Value>,
    path: &str,
) -> Result<Map<String, Value>, DispatchError> {
    let mut accepted = Map::new();
    for spec in specs {
        let name = format!("{path}{}", spec.name);
        let value = match map.remove(spec.name) {
            None | Some(Value::Null) => None,
            // An empty string for an optional enum means "use the default".
            Some(Value::String(s))
                if s.is_empty() && !spec.required && matches!(spec.kind, ParamKind::Enum { .. }) =>
            {
                None
            }
            Some(v) => Some(v),
        };
        let Some(value) = value else {
            if spec.required {
                return Err(DispatchError::Validation(format!(
                    "missing required parameter: {name}"
                )));
            }
            continue;
        };
        let value = check_value(&name, spec.kind, value)?;
        accepted.insert(spec.name.to_owned(), value);
    }
    for extra in map.keys() {
        debug!(parameter = %format!("{path}{extra}"), "ignoring undeclared parameter");
    }
    Ok(accepted)
}

fn check_value(name: &str, kind: ParamKind, value: Value) -> Result<Value, DispatchError> {
    match kind {
        ParamKind::String => match value {
            Value::String(_) => Ok(value),
            other => Err(type_error(name, "a string", &other)),
        },
        ParamKind::Integer => match value.as_i64() {
            Some(_) => Ok(value),
            None => Err(type_error(name, "an integer", &value)),
        },
        ParamKind::Enum { values, aliases } => match &value {
            Value::String(s) if values.contains(&s.as_str()) || aliases.contains(&s.as_str()) => {
                Ok(value)
            }
            Value::String(s) => Err(DispatchError::Validation(format!(
                "invalid value {s:?} for parameter {name} (expected one of: {})",
                values.join(", ")
            ))),
            other => Err(type_error(name, "a string", other)),
        },
        ParamKind::ObjectList(fields) => {
            let Value::Array(items) = value else {
                return Err(type_error(name, "an array", &value));
            };
            let mut checked = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                let item_path = format!("{name}[{i}].");
                match item {
                    Value::Object(map) => {
                        checked.push(Value::Object(validate_object(fields, map, &item_path)?));
                    }
                    other => return Err(type_error(&format!("{name}[{i}]"), "an object", &other)),
                }
            }
            Ok(Value::Array(checked))
        }
    }
}

fn type_error(name: &str, expected: &str, got: &Value) -> DispatchError {
    DispatchError::Validation(format!(
        "parameter {name} must be {expected}, got {}",
        json_type(got)
    ))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
