//! Conversions between engine values, JSON and Rhai `Dynamic`.

use crate::types::Value;
use rhai::{Array, Dynamic, Map, FLOAT, INT};
use std::collections::BTreeMap;

/// Converts a pin value into a script value.
///
/// Tables become `#{ columns: [...], rows: [[...]] }` maps.
pub fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Int(i) => Dynamic::from(*i as INT),
        Value::Float(f) => Dynamic::from(*f as FLOAT),
        Value::String(s) => Dynamic::from(s.clone()),
        Value::List(items) => Dynamic::from_array(items.iter().map(value_to_dynamic).collect()),
        Value::Table { columns, rows } => {
            let columns: Array = columns.iter().map(|c| Dynamic::from(c.clone())).collect();
            let rows: Array = rows
                .iter()
                .map(|row| Dynamic::from_array(row.iter().map(value_to_dynamic).collect()))
                .collect();
            let mut map = Map::new();
            map.insert("columns".into(), Dynamic::from_array(columns));
            map.insert("rows".into(), Dynamic::from_array(rows));
            Dynamic::from_map(map)
        }
        Value::Map(entries) => {
            let mut map = Map::new();
            for (key, val) in entries {
                map.insert(key.as_str().into(), value_to_dynamic(val));
            }
            Dynamic::from_map(map)
        }
    }
}

fn table_from_map(map: &Map) -> Option<Value> {
    if map.len() != 2 {
        return None;
    }
    let columns = map.get("columns")?.clone().into_array().ok()?;
    let rows = map.get("rows")?.clone().into_array().ok()?;
    let columns = columns
        .into_iter()
        .map(|c| c.into_string().ok())
        .collect::<Option<Vec<String>>>()?;
    let rows = rows
        .into_iter()
        .map(|row| {
            row.into_array()
                .ok()
                .map(|cells| cells.iter().map(dynamic_to_value).collect())
        })
        .collect::<Option<Vec<Vec<Value>>>>()?;
    Some(Value::Table { columns, rows })
}

/// Converts a script value back into a pin value.
///
/// Types without an engine counterpart are stringified.
pub fn dynamic_to_value(value: &Dynamic) -> Value {
    if value.is_unit() {
        return Value::Null;
    }
    if let Ok(b) = value.as_bool() {
        return Value::Bool(b);
    }
    if let Ok(i) = value.as_int() {
        return Value::Int(i);
    }
    if let Ok(f) = value.as_float() {
        return Value::Float(f);
    }
    if value.is_string() {
        return Value::String(value.to_string());
    }
    if let Ok(c) = value.as_char() {
        return Value::String(c.to_string());
    }
    if value.is_array() {
        if let Some(items) = value.clone().try_cast::<Array>() {
            return Value::List(items.iter().map(dynamic_to_value).collect());
        }
    }
    if value.is_map() {
        if let Some(map) = value.clone().try_cast::<Map>() {
            if let Some(table) = table_from_map(&map) {
                return table;
            }
            let entries: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.to_string(), dynamic_to_value(v)))
                .collect();
            return Value::Map(entries);
        }
    }
    Value::String(value.to_string())
}

pub fn json_to_dynamic(value: &serde_json::Value) -> Dynamic {
    match value {
        serde_json::Value::Null => Dynamic::UNIT,
        serde_json::Value::Bool(b) => Dynamic::from(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Dynamic::from(i as INT),
            None => Dynamic::from(n.as_f64().unwrap_or(FLOAT::NAN)),
        },
        serde_json::Value::String(s) => Dynamic::from(s.clone()),
        serde_json::Value::Array(items) => {
            Dynamic::from_array(items.iter().map(json_to_dynamic).collect())
        }
        serde_json::Value::Object(entries) => {
            let mut map = Map::new();
            for (key, val) in entries {
                map.insert(key.as_str().into(), json_to_dynamic(val));
            }
            Dynamic::from_map(map)
        }
    }
}

pub fn dynamic_to_json(value: &Dynamic) -> serde_json::Value {
    serde_json::to_value(dynamic_to_value(value)).unwrap_or(serde_json::Value::Null)
}
