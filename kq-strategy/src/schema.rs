//! Strategy parameter declarations (spec.md §4.F `parameter_schema`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum ParamType {
    Integer,
    Decimal,
    Bool,
    String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub param_type: ParamType,
    pub default: Value,
    pub min: Option<Value>,
    pub max: Option<Value>,
    pub desc: String,
}

impl ParamSpec {
    pub fn new(param_type: ParamType, default: Value, desc: impl Into<String>) -> Self {
        Self { param_type, default, min: None, max: None, desc: desc.into() }
    }

    pub fn with_bounds(mut self, min: Value, max: Value) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }
}

pub type ParameterSchema = BTreeMap<String, ParamSpec>;
