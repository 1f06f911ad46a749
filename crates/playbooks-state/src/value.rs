//! Runtime value model.
//!
//! [`Value`] is the data model shared by variables, playbook arguments and
//! results, and the streaming interpreter.  It is a small, serializable
//! superset of JSON: the extra [`Value::Artifact`] variant is a by-name
//! reference to out-of-band content held in the agent's
//! [`ArtifactStore`](crate::artifacts::ArtifactStore).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A runtime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Python-style `None`.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Reference to an artifact; the content lives in the artifact store.
    Artifact { name: String, summary: String },
}

impl Value {
    /// Short type name, used in error messages and context prefixes.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "dict",
            Value::Artifact { .. } => "Artifact",
        }
    }

    /// Python-style truthiness.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(entries) => !entries.is_empty(),
            Value::Artifact { .. } => true,
        }
    }

    /// Borrow the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer payload, if this is an int.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// `str()`-style rendering: strings are unquoted, containers use repr.
    pub fn display_string(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.repr(),
        }
    }

    /// `repr()`-style rendering, Python literal shapes.
    pub fn repr(&self) -> String {
        match self {
            Value::Null => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{f:.1}")
                } else {
                    f.to_string()
                }
            }
            Value::Str(s) => format!("{:?}", s),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::repr).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Map(entries) => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{:?}: {}", k, v.repr()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Artifact { name, summary } => {
                format!("Artifact[{name}: {summary}]")
            }
        }
    }

    /// Convert to JSON for state snapshots.
    ///
    /// Artifact references render as `"Artifact: <summary>"` so the prompt
    /// shows what the variable holds without inlining the content.
    pub fn to_state_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_state_json).collect())
            }
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_state_json()))
                    .collect(),
            ),
            Value::Artifact { summary, .. } => {
                serde_json::Value::String(format!("Artifact: {summary}"))
            }
        }
    }

    /// Build a [`Value`] from arbitrary JSON.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repr_matches_python_literals() {
        assert_eq!(Value::Null.repr(), "None");
        assert_eq!(Value::Bool(true).repr(), "True");
        assert_eq!(Value::Int(42).repr(), "42");
        assert_eq!(Value::Str("hi".into()).repr(), "\"hi\"");
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::Str("a".into())]).repr(),
            "[1, \"a\"]"
        );
    }

    #[test]
    fn display_string_unquotes_strings() {
        assert_eq!(Value::Str("hello".into()).display_string(), "hello");
        assert_eq!(Value::Int(5).display_string(), "5");
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.truthy());
        assert!(!Value::Str(String::new()).truthy());
        assert!(Value::Str("x".into()).truthy());
        assert!(!Value::List(vec![]).truthy());
        assert!(Value::Int(-1).truthy());
    }

    #[test]
    fn artifact_renders_as_summary_in_state_json() {
        let value = Value::Artifact {
            name: "report".into(),
            summary: "Quarterly report".into(),
        };
        assert_eq!(
            value.to_state_json(),
            serde_json::json!("Artifact: Quarterly report")
        );
    }

    #[test]
    fn json_round_trip_for_plain_values() {
        let original = Value::Map(BTreeMap::from([
            ("n".to_string(), Value::Int(1)),
            ("s".to_string(), Value::Str("x".into())),
        ]));
        let back = Value::from_json(&original.to_state_json());
        assert_eq!(back, original);
    }
}
