//! Option coercion for action definitions
//!
//! Options arrive as loose JSON/YAML maps. Each value is coerced exactly
//! once, when the action is parsed; numbers may be given as numbers or as
//! numeric strings.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::transitions::MAX_FADE_MS;

/// An action's options could not be turned into its typed form
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OptionError {
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("options must be a map, got {0}")]
    NotAMap(String),

    #[error("missing option '{0}'")]
    Missing(&'static str),

    #[error("option '{key}' must be {expected}, got {got}")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        got: String,
    },
}

pub(crate) struct Options<'a> {
    map: Option<&'a Map<String, Value>>,
}

impl<'a> Options<'a> {
    /// `null` counts as an empty map
    pub fn new(value: &'a Value) -> Result<Self, OptionError> {
        match value {
            Value::Object(map) => Ok(Self { map: Some(map) }),
            Value::Null => Ok(Self { map: None }),
            other => Err(OptionError::NotAMap(other.to_string())),
        }
    }

    fn raw(&self, key: &str) -> Option<&'a Value> {
        self.map
            .and_then(|m| m.get(key))
            .filter(|v| !v.is_null())
    }

    pub fn string(&self, key: &'static str) -> Result<String, OptionError> {
        match self.raw(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            Some(other) => Err(invalid(key, "a non-empty string", other)),
            None => Err(OptionError::Missing(key)),
        }
    }

    pub fn number(&self, key: &'static str) -> Result<f64, OptionError> {
        self.optional_number(key)?.ok_or(OptionError::Missing(key))
    }

    pub fn optional_number(&self, key: &'static str) -> Result<Option<f64>, OptionError> {
        let Some(value) = self.raw(key) else {
            return Ok(None);
        };
        let number = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match number {
            Some(n) if n.is_finite() => Ok(Some(n)),
            _ => Err(invalid(key, "a number", value)),
        }
    }

    /// Whole milliseconds, defaulting to 0 when absent
    pub fn duration_ms(&self, key: &'static str) -> Result<u64, OptionError> {
        match self.optional_number(key)? {
            None => Ok(0),
            Some(ms) if ms >= 0.0 && ms.fract() == 0.0 && ms <= MAX_FADE_MS as f64 => {
                Ok(ms as u64)
            }
            Some(_) => Err(invalid(
                key,
                "a whole number of milliseconds, at most 600000",
                self.raw_or_null(key),
            )),
        }
    }

    pub fn value(&self, key: &'static str) -> Option<&'a Value> {
        self.raw(key)
    }

    fn raw_or_null(&self, key: &str) -> &Value {
        self.raw(key).unwrap_or(&Value::Null)
    }
}

pub(crate) fn invalid(key: &'static str, expected: &'static str, got: &Value) -> OptionError {
    OptionError::Invalid {
        key,
        expected,
        got: got.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numbers_and_numeric_strings() {
        let value = json!({ "a": 3.5, "b": "-12", "c": "loud", "d": null });
        let opts = Options::new(&value).unwrap();

        assert_eq!(opts.number("a"), Ok(3.5));
        assert_eq!(opts.number("b"), Ok(-12.0));
        assert!(matches!(
            opts.number("c"),
            Err(OptionError::Invalid { key: "c", .. })
        ));
        assert_eq!(opts.optional_number("d"), Ok(None));
        assert_eq!(opts.number("missing"), Err(OptionError::Missing("missing")));
    }

    #[test]
    fn test_duration() {
        let value = json!({
            "fade_ms": "250",
            "bad": -5,
            "frac": 1.5,
            "longest": 600000,
            "too_long": 4294967295u64
        });
        let opts = Options::new(&value).unwrap();

        assert_eq!(opts.duration_ms("fade_ms"), Ok(250));
        assert_eq!(opts.duration_ms("absent"), Ok(0));
        assert!(opts.duration_ms("bad").is_err());
        assert!(opts.duration_ms("frac").is_err());
        assert_eq!(opts.duration_ms("longest"), Ok(MAX_FADE_MS));
        assert!(matches!(
            opts.duration_ms("too_long"),
            Err(OptionError::Invalid { key: "too_long", .. })
        ));
    }

    #[test]
    fn test_strings() {
        let value = json!({ "target": " /ch/01 ", "empty": "", "num": 4 });
        let opts = Options::new(&value).unwrap();

        assert_eq!(opts.string("target"), Ok("/ch/01".to_string()));
        assert!(opts.string("empty").is_err());
        assert!(opts.string("num").is_err());
    }

    #[test]
    fn test_options_must_be_a_map() {
        assert!(Options::new(&json!(null)).is_ok());
        assert!(matches!(
            Options::new(&json!([1, 2])),
            Err(OptionError::NotAMap(_))
        ));
    }
}
