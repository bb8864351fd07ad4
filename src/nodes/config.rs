//! Node configuration snapshots.
//!
//! These are the values shipped to workers with every job, so they are plain
//! serde data with no change tracking. The sheet wraps them in
//! [`crate::sheet::Tracked`] to know when a node needs recalculation.

use crate::types::{PinDirection, Value, VarType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Node-specific configuration, keyed by parameter name.
pub type ConfigMap = BTreeMap<String, Value>;

/// User-facing description of one configurable pin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PinInfo {
    pub var_type: VarType,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    /// Only used by StaticValues outputs
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub static_value: Value,
}

impl PinInfo {
    pub fn new(var_type: VarType, label: impl Into<String>) -> Self {
        Self {
            var_type,
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn with_static_value(mut self, value: impl Into<Value>) -> Self {
        self.static_value = value.into();
        self
    }

    /// Label shown for the pin at `index`, falling back to a generated one.
    pub fn display_label(&self, direction: PinDirection, index: usize) -> String {
        if self.label.trim().is_empty() {
            format!("{} {}", direction, index)
        } else {
            self.label.clone()
        }
    }

    pub fn display_description(&self, direction: PinDirection, index: usize) -> String {
        if self.description.trim().is_empty() {
            format!("{} {} - {}", direction, index, self.var_type)
        } else {
            self.description.clone()
        }
    }
}

/// Configuration shared by every node class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CommonConfig {
    #[serde(default)]
    pub name: String,
    /// Input layout for nodes with configurable inputs
    #[serde(default)]
    pub input_pins: Vec<PinInfo>,
    /// Output layout for nodes with configurable outputs
    #[serde(default)]
    pub output_pins: Vec<PinInfo>,
}

impl CommonConfig {
    pub fn pins(&self, direction: PinDirection) -> &[PinInfo] {
        match direction {
            PinDirection::Input => &self.input_pins,
            PinDirection::Output => &self.output_pins,
        }
    }
}

/// Reads an integer parameter, accepting whole floats.
pub fn config_i64(config: &ConfigMap, key: &str, default: i64) -> i64 {
    config.get(key).and_then(Value::as_i64).unwrap_or(default)
}

pub fn config_bool(config: &ConfigMap, key: &str, default: bool) -> bool {
    config.get(key).and_then(Value::as_bool).unwrap_or(default)
}

pub fn config_str<'a>(config: &'a ConfigMap, key: &str) -> Option<&'a str> {
    config.get(key).and_then(Value::as_str)
}
