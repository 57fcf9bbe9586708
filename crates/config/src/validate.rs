//! Value validators.
//!
//! Every key in the defaults table carries a [`Validator`] that is run on
//! each write. Validators normalize as well as check: the stored value is
//! always the validator's output, never the raw input.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

type ValidateFn = dyn Fn(&Value) -> Result<Value, String> + Send + Sync;

/// A cheaply clonable validation function.
#[derive(Clone)]
pub struct Validator {
    name: &'static str,
    func: Arc<ValidateFn>,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validator({})", self.name)
    }
}

impl Validator {
    pub fn new<F>(name: &'static str, func: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name,
            func: Arc::new(func),
        }
    }

    pub fn run(&self, value: &Value) -> Result<Value, String> {
        (self.func)(value)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Accept anything unchanged.
    pub fn any() -> Self {
        Self::new("any", |v| Ok(v.clone()))
    }

    /// Accept booleans; the strings "true"/"false" are normalized.
    pub fn bool() -> Self {
        Self::new("bool", |v| match v {
            Value::Bool(_) => Ok(v.clone()),
            Value::String(s) if s == "true" => Ok(Value::Bool(true)),
            Value::String(s) if s == "false" => Ok(Value::Bool(false)),
            other => Err(format!("expected a boolean, got {other}")),
        })
    }

    /// Accept booleans or null.
    pub fn bool_or_none() -> Self {
        Self::new("bool_or_none", |v| match v {
            Value::Null | Value::Bool(_) => Ok(v.clone()),
            other => Err(format!("expected a boolean or null, got {other}")),
        })
    }

    /// Accept strings; numbers and booleans are stringified.
    pub fn str() -> Self {
        Self::new("str", |v| match v {
            Value::String(_) => Ok(v.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(format!("expected a string, got {other}")),
        })
    }

    /// Accept strings or null.
    pub fn str_or_none() -> Self {
        Self::new("str_or_none", |v| match v {
            Value::Null => Ok(Value::Null),
            other => Validator::str().run(other),
        })
    }

    /// Accept a list of strings. A bare string becomes a one-element list.
    pub fn string_list() -> Self {
        Self::new("string_list", |v| match v {
            Value::String(s) => Ok(Value::Array(vec![Value::String(s.clone())])),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(Validator::str().run(item)?);
                }
                Ok(Value::Array(out))
            }
            other => Err(format!("expected a list of strings, got {other}")),
        })
    }

    /// Like [`Validator::string_list`] but deduplicated and sorted.
    pub fn string_set() -> Self {
        Self::new("string_set", |v| {
            let Value::Array(items) = Validator::string_list().run(v)? else {
                unreachable!("string_list returns an array");
            };
            let mut strings: Vec<String> = items
                .into_iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect();
            strings.sort();
            strings.dedup();
            Ok(Value::Array(
                strings.into_iter().map(Value::String).collect(),
            ))
        })
    }

    /// Accept a JSON object.
    pub fn dict() -> Self {
        Self::new("dict", |v| match v {
            Value::Object(_) => Ok(v.clone()),
            other => Err(format!("expected a mapping, got {other}")),
        })
    }

    /// Accept any finite number.
    pub fn float() -> Self {
        Self::new("float", |v| match v.as_f64() {
            Some(f) if f.is_finite() => Ok(v.clone()),
            _ => Err(format!("expected a finite number, got {v}")),
        })
    }

    /// Accept non-negative integers.
    pub fn int() -> Self {
        Self::new("int", |v| match v.as_u64() {
            Some(_) => Ok(v.clone()),
            None => Err(format!("expected a non-negative integer, got {v}")),
        })
    }

    /// Accept one of a fixed set of strings.
    pub fn one_of(options: &'static [&'static str]) -> Self {
        Self::new("one_of", move |v| match v.as_str() {
            Some(s) if options.contains(&s) => Ok(v.clone()),
            _ => Err(format!("expected one of {options:?}, got {v}")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bool_normalizes_strings() {
        assert_eq!(Validator::bool().run(&json!("true")).unwrap(), json!(true));
        assert!(Validator::bool().run(&json!(1)).is_err());
    }

    #[test]
    fn test_str_stringifies_numbers() {
        assert_eq!(Validator::str().run(&json!(3)).unwrap(), json!("3"));
        assert!(Validator::str().run(&json!([])).is_err());
    }

    #[test]
    fn test_string_list_promotes_bare_string() {
        assert_eq!(
            Validator::string_list().run(&json!("a")).unwrap(),
            json!(["a"])
        );
    }

    #[test]
    fn test_string_set_sorts_and_dedups() {
        assert_eq!(
            Validator::string_set().run(&json!(["b", "a", "b"])).unwrap(),
            json!(["a", "b"])
        );
    }

    #[test]
    fn test_one_of() {
        let v = Validator::one_of(&["never", "always", "replot"]);
        assert!(v.run(&json!("always")).is_ok());
        let err = v.run(&json!("sometimes")).unwrap_err();
        assert!(err.contains("never"));
    }

    #[test]
    fn test_float_rejects_non_numbers() {
        assert!(Validator::float().run(&json!("1.5")).is_err());
        assert!(Validator::float().run(&json!(1.5)).is_ok());
    }
}
