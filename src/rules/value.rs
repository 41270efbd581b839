use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared storage type of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Boolean,
    Integer,
    Decimal,
    String,
    Json,
    Array,
}

impl ValueType {
    pub const fn label(self) -> &'static str {
        match self {
            ValueType::Boolean => "boolean",
            ValueType::Integer => "integer",
            ValueType::Decimal => "decimal",
            ValueType::String => "string",
            ValueType::Json => "json",
            ValueType::Array => "array",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A decoded rule value. Raw payloads are decoded once, when they are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RuleValue {
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    Text(String),
    Json(Value),
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cannot decode '{raw}' as {value_type}: {reason}")]
pub struct ValueParseError {
    pub value_type: ValueType,
    pub raw: String,
    pub reason: String,
}

impl RuleValue {
    pub fn parse(value_type: ValueType, raw: &str) -> Result<Self, ValueParseError> {
        let fail = |reason: String| ValueParseError {
            value_type,
            raw: raw.to_string(),
            reason,
        };

        match value_type {
            ValueType::Boolean => parse_flag(raw)
                .map(RuleValue::Boolean)
                .ok_or_else(|| fail("expected true/false, yes/no, on/off or 1/0".to_string())),
            ValueType::Integer => raw
                .trim()
                .parse::<i64>()
                .map(RuleValue::Integer)
                .map_err(|err| fail(err.to_string())),
            ValueType::Decimal => {
                let parsed = raw.trim().parse::<f64>().map_err(|err| fail(err.to_string()))?;
                if !parsed.is_finite() {
                    return Err(fail("value must be finite".to_string()));
                }
                Ok(RuleValue::Decimal(parsed))
            }
            ValueType::String => Ok(RuleValue::Text(raw.to_string())),
            ValueType::Json => serde_json::from_str::<Value>(raw)
                .map(RuleValue::Json)
                .map_err(|err| fail(err.to_string())),
            ValueType::Array => {
                let decoded =
                    serde_json::from_str::<Value>(raw).map_err(|err| fail(err.to_string()))?;
                list_from_json(&decoded)
                    .map(RuleValue::List)
                    .ok_or_else(|| fail("expected a JSON array of scalars".to_string()))
            }
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            RuleValue::Boolean(_) => ValueType::Boolean,
            RuleValue::Integer(_) => ValueType::Integer,
            RuleValue::Decimal(_) => ValueType::Decimal,
            RuleValue::Text(_) => ValueType::String,
            RuleValue::Json(_) => ValueType::Json,
            RuleValue::List(_) => ValueType::Array,
        }
    }

    /// Serialized form, suitable for storage or display.
    pub fn to_raw(&self) -> String {
        match self {
            RuleValue::Boolean(flag) => flag.to_string(),
            RuleValue::Integer(number) => number.to_string(),
            RuleValue::Decimal(number) => number.to_string(),
            RuleValue::Text(text) => text.clone(),
            RuleValue::Json(value) => value.to_string(),
            RuleValue::List(items) => Value::from(items.clone()).to_string(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RuleValue::Boolean(flag) => Some(*flag),
            RuleValue::Integer(number) => Some(*number != 0),
            RuleValue::Decimal(number) => Some(*number != 0.0),
            RuleValue::Text(text) => parse_flag(text),
            RuleValue::Json(Value::Bool(flag)) => Some(*flag),
            RuleValue::Json(_) | RuleValue::List(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RuleValue::Integer(number) => Some(*number),
            RuleValue::Decimal(number) => Some(number.trunc() as i64),
            RuleValue::Boolean(flag) => Some(i64::from(*flag)),
            RuleValue::Text(text) => text.trim().parse().ok(),
            RuleValue::Json(value) => value.as_i64(),
            RuleValue::List(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RuleValue::Decimal(number) => Some(*number),
            RuleValue::Integer(number) => Some(*number as f64),
            RuleValue::Text(text) => text.trim().parse().ok(),
            RuleValue::Json(value) => value.as_f64(),
            RuleValue::Boolean(_) | RuleValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<Vec<String>> {
        match self {
            RuleValue::List(items) => Some(items.clone()),
            RuleValue::Json(value) => list_from_json(value),
            _ => None,
        }
    }

    /// Numeric view used for min/max bounds.
    fn numeric(&self) -> Option<f64> {
        match self {
            RuleValue::Integer(number) => Some(*number as f64),
            RuleValue::Decimal(number) => Some(*number),
            _ => None,
        }
    }
}

impl fmt::Display for RuleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_raw())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn list_from_json(value: &Value) -> Option<Vec<String>> {
    let items = value.as_array()?;
    items
        .iter()
        .map(|item| match item {
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            _ => None,
        })
        .collect()
}

/// Declared limits a rule places on any value stored for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueConstraints<'a> {
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub allowed_values: &'a [String],
    pub validation_pattern: Option<&'a str>,
}

/// One failed constraint. Validation reports every violation, never just the first.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "constraint", rename_all = "snake_case")]
pub enum ConstraintViolation {
    #[error("{reason}")]
    Undecodable { reason: String },
    #[error("value {actual} is below the minimum {min}")]
    BelowMinimum { min: f64, actual: f64 },
    #[error("value {actual} is above the maximum {max}")]
    AboveMaximum { max: f64, actual: f64 },
    #[error("value '{value}' is not one of [{}]", .allowed.join(", "))]
    NotAllowed { value: String, allowed: Vec<String> },
    #[error("value '{value}' does not match pattern {pattern}")]
    PatternMismatch { pattern: String, value: String },
    #[error("validation pattern {pattern} is invalid: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("overrides require a reason")]
    MissingOverrideReason,
}

impl ValueConstraints<'_> {
    pub fn check(&self, value: &RuleValue) -> Vec<ConstraintViolation> {
        let mut violations = Vec::new();

        if let Some(actual) = value.numeric() {
            if let Some(min) = self.min_value {
                if actual < min {
                    violations.push(ConstraintViolation::BelowMinimum { min, actual });
                }
            }
            if let Some(max) = self.max_value {
                if actual > max {
                    violations.push(ConstraintViolation::AboveMaximum { max, actual });
                }
            }
        }

        if !self.allowed_values.is_empty() {
            let candidates = match value {
                RuleValue::List(items) => items.clone(),
                other => vec![other.to_raw()],
            };
            for candidate in candidates {
                if !self.allowed_values.iter().any(|allowed| allowed == &candidate) {
                    violations.push(ConstraintViolation::NotAllowed {
                        value: candidate,
                        allowed: self.allowed_values.to_vec(),
                    });
                }
            }
        }

        if let (Some(pattern), RuleValue::Text(text)) = (self.validation_pattern, value) {
            match Regex::new(pattern) {
                Ok(regex) if regex.is_match(text) => {}
                Ok(_) => violations.push(ConstraintViolation::PatternMismatch {
                    pattern: pattern.to_string(),
                    value: text.clone(),
                }),
                Err(err) => violations.push(ConstraintViolation::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: err.to_string(),
                }),
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_declared_type() {
        assert_eq!(
            RuleValue::parse(ValueType::Boolean, "Yes").expect("flag"),
            RuleValue::Boolean(true)
        );
        assert_eq!(
            RuleValue::parse(ValueType::Boolean, "").expect("empty flag"),
            RuleValue::Boolean(false)
        );
        assert_eq!(
            RuleValue::parse(ValueType::Integer, " 3 ").expect("integer"),
            RuleValue::Integer(3)
        );
        assert_eq!(
            RuleValue::parse(ValueType::Decimal, "37.5").expect("decimal"),
            RuleValue::Decimal(37.5)
        );
        assert_eq!(
            RuleValue::parse(ValueType::Array, r#"["MATH", 101]"#).expect("array"),
            RuleValue::List(vec!["MATH".to_string(), "101".to_string()])
        );
        assert!(matches!(
            RuleValue::parse(ValueType::Json, r#"{"bands": [40, 60]}"#).expect("json"),
            RuleValue::Json(_)
        ));
    }

    #[test]
    fn rejects_undecodable_payloads() {
        let err = RuleValue::parse(ValueType::Json, "{not json").expect_err("bad json");
        assert_eq!(err.value_type, ValueType::Json);

        assert!(RuleValue::parse(ValueType::Array, r#"{"a": 1}"#).is_err());
        assert!(RuleValue::parse(ValueType::Array, r#"[{"nested": true}]"#).is_err());
        assert!(RuleValue::parse(ValueType::Integer, "4.5").is_err());
        assert!(RuleValue::parse(ValueType::Decimal, "NaN").is_err());
        assert!(RuleValue::parse(ValueType::Boolean, "perhaps").is_err());
    }

    #[test]
    fn casts_between_compatible_variants() {
        assert_eq!(RuleValue::Integer(40).as_f64(), Some(40.0));
        assert_eq!(RuleValue::Decimal(3.9).as_i64(), Some(3));
        assert_eq!(RuleValue::Text("on".to_string()).as_bool(), Some(true));
        assert_eq!(RuleValue::Text("12".to_string()).as_i64(), Some(12));
        assert_eq!(RuleValue::List(vec!["a".to_string()]).as_bool(), None);
        assert_eq!(
            RuleValue::Json(serde_json::json!(["x", "y"])).as_list(),
            Some(vec!["x".to_string(), "y".to_string()])
        );
    }

    #[test]
    fn reports_every_violated_constraint() {
        let allowed = vec!["10".to_string(), "20".to_string()];
        let constraints = ValueConstraints {
            min_value: Some(15.0),
            max_value: Some(12.0),
            allowed_values: &allowed,
            validation_pattern: None,
        };

        let violations = constraints.check(&RuleValue::Integer(13));
        assert_eq!(violations.len(), 3);
        assert!(violations
            .iter()
            .any(|v| matches!(v, ConstraintViolation::BelowMinimum { .. })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, ConstraintViolation::AboveMaximum { .. })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, ConstraintViolation::NotAllowed { .. })));
    }

    #[test]
    fn applies_patterns_to_text_only() {
        let constraints = ValueConstraints {
            validation_pattern: Some("^[A-Z]{2,4}$"),
            ..ValueConstraints::default()
        };
        assert!(constraints
            .check(&RuleValue::Text("TC".to_string()))
            .is_empty());
        assert_eq!(
            constraints.check(&RuleValue::Text("tc-1".to_string())),
            vec![ConstraintViolation::PatternMismatch {
                pattern: "^[A-Z]{2,4}$".to_string(),
                value: "tc-1".to_string(),
            }]
        );
        assert!(constraints.check(&RuleValue::Integer(5)).is_empty());

        let broken = ValueConstraints {
            validation_pattern: Some("(unclosed"),
            ..ValueConstraints::default()
        };
        assert!(matches!(
            broken.check(&RuleValue::Text("x".to_string())).as_slice(),
            [ConstraintViolation::InvalidPattern { .. }]
        ));
    }
}
