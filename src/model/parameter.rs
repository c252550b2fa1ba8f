use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::SENSITIVE_PLACEHOLDER;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    String(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Strings(Vec<String>),
    Map(BTreeMap<String, String>),
}

impl From<&str> for ParameterValue {
    fn from(s: &str) -> Self {
        ParameterValue::String(s.to_string())
    }
}

impl From<bool> for ParameterValue {
    fn from(b: bool) -> Self {
        ParameterValue::Bool(b)
    }
}

impl From<i64> for ParameterValue {
    fn from(i: i64) -> Self {
        ParameterValue::Int(i)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterKind {
    String,
    Bool,
    Int,
    Float,
    Strings,
    Map,
}

impl ParameterKind {
    pub fn accepts(
        &self,
        value: &ParameterValue,
    ) -> bool {
        matches!(
            (self, value),
            (ParameterKind::String, ParameterValue::String(_))
                | (ParameterKind::Bool, ParameterValue::Bool(_))
                | (ParameterKind::Int, ParameterValue::Int(_))
                | (ParameterKind::Float, ParameterValue::Float(_))
                | (ParameterKind::Float, ParameterValue::Int(_))
                | (ParameterKind::Strings, ParameterValue::Strings(_))
                | (ParameterKind::Map, ParameterValue::Map(_))
        )
    }
}

/// Parameter declared by a type resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    pub kind: ParameterKind,
    pub required: bool,
    pub default: Option<ParameterValue>,
    pub sensitive: bool,
}

impl ParameterDefinition {
    pub fn new(
        name: impl Into<String>,
        kind: ParameterKind,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
            sensitive: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}

/// Parameter value set on a component. `sensitive` is stamped from the type
/// definition when the component is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: ParameterValue,
    pub sensitive: bool,
}

impl Parameter {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<ParameterValue>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            sensitive: false,
        }
    }

    pub fn is_masked(&self) -> bool {
        matches!(&self.value, ParameterValue::String(s) if s == SENSITIVE_PLACEHOLDER)
    }

    pub(crate) fn mask(&mut self) {
        if self.sensitive {
            self.value = ParameterValue::String(SENSITIVE_PLACEHOLDER.to_string());
        }
    }
}
