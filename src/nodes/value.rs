//! Static value nodes.
//!
//! These never reach a worker: the sheet calls `refresh` on the control
//! thread and publishes the result directly.

use super::config::{config_bool, config_str};
use super::{CommonConfig, ConfigMap, NodeError, NodeRegistration, PinDescriptor};
use crate::scripting::read_csv;
use crate::types::{NodeKind, Value, VarType};
use std::path::Path;

fn configured_value(config: &ConfigMap, _: &CommonConfig) -> Result<Vec<Value>, NodeError> {
    Ok(vec![config.get("value").cloned().unwrap_or_default()])
}

fn static_values(_: &ConfigMap, common: &CommonConfig) -> Result<Vec<Value>, NodeError> {
    Ok(common
        .output_pins
        .iter()
        .map(|pin| pin.static_value.clone())
        .collect())
}

fn csv_cell(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Value::Null
    } else if let Ok(i) = trimmed.parse::<i64>() {
        Value::Int(i)
    } else if let Ok(f) = trimmed.parse::<f64>() {
        Value::Float(f)
    } else {
        Value::String(text.to_string())
    }
}

/// Parses CSV text into a table, first record being the header.
pub(crate) fn parse_csv_table(text: &str) -> Result<Value, csv::Error> {
    let records = read_csv(text)?;
    let rows = records
        .rows
        .iter()
        .map(|row| row.iter().map(|f| csv_cell(f)).collect())
        .collect();
    Ok(Value::Table {
        columns: records.columns,
        rows,
    })
}

fn table_value(config: &ConfigMap, common: &CommonConfig) -> Result<Vec<Value>, NodeError> {
    if !config_bool(config, "load_from_file", false) {
        return configured_value(config, common);
    }
    let path = config_str(config, "file_path").unwrap_or_default();
    if !Path::new(path).is_file() {
        return Err(NodeError::FileNotFound(path.to_string()));
    }
    let text = std::fs::read_to_string(path).map_err(|e| NodeError::FileRead {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    let table = parse_csv_table(&text).map_err(|e| NodeError::FileRead {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    Ok(vec![table])
}

fn number_config() -> ConfigMap {
    let mut config = ConfigMap::new();
    config.insert("value".into(), Value::Int(0));
    config
}

fn string_config() -> ConfigMap {
    let mut config = ConfigMap::new();
    config.insert("value".into(), Value::String(String::new()));
    config
}

fn bool_config() -> ConfigMap {
    let mut config = ConfigMap::new();
    config.insert("value".into(), Value::Bool(false));
    config
}

fn table_config() -> ConfigMap {
    let mut config = ConfigMap::new();
    config.insert("load_from_file".into(), Value::Bool(false));
    config.insert("file_path".into(), Value::String(String::new()));
    config.insert("value".into(), VarType::Table.default_value());
    config
}

const VALUE: NodeRegistration = NodeRegistration {
    category: "Value",
    subcategory: "General",
    kind: NodeKind::Static,
    refresh: Some(configured_value),
    ..NodeRegistration::DEFAULT
};

pub static NUMBER: NodeRegistration = NodeRegistration {
    class: "ValueNumber",
    display_name: "Number",
    description: "Number Value",
    outputs: &[PinDescriptor::new("Out", "Output Value", VarType::Number)],
    default_config: number_config,
    ..VALUE
};

pub static STRING: NodeRegistration = NodeRegistration {
    class: "ValueString",
    display_name: "String",
    description: "String Value",
    outputs: &[PinDescriptor::new("Out", "Output Value", VarType::String)],
    default_config: string_config,
    ..VALUE
};

pub static BOOL: NodeRegistration = NodeRegistration {
    class: "ValueBool",
    display_name: "Boolean",
    description: "Boolean Value",
    outputs: &[PinDescriptor::new("Out", "Output Value", VarType::Bool)],
    default_config: bool_config,
    ..VALUE
};

pub static TABLE: NodeRegistration = NodeRegistration {
    class: "ValueTable",
    display_name: "Table",
    description: "Table Value, typed in or loaded from a CSV file",
    outputs: &[PinDescriptor::new("Out", "Output Value", VarType::Table)],
    default_config: table_config,
    refresh: Some(table_value),
    ..VALUE
};

pub static STATIC_VALUES: NodeRegistration = NodeRegistration {
    class: "StaticValues",
    display_name: "Static Values",
    description: "Outputs configured per pin",
    configurable_outputs: true,
    refresh: Some(static_values),
    ..VALUE
};
