//! Core data types shared across the engine
//!
//! [`Value`] is the payload carried by pins and exchanged with workers,
//! [`VarType`] is the declared type of a pin, and the small enums here
//! describe node behaviour and calculation state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A value flowing through a pin.
///
/// Serialized untagged, so documents read like plain JSON. Non-finite floats
/// have no JSON number form and are written as `{"$float": "nan"}`,
/// `{"$float": "inf"}` or `{"$float": "-inf"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(#[serde(with = "float_repr")] f64),
    String(String),
    List(Vec<Value>),
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    Map(BTreeMap<String, Value>),
}

mod float_repr {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct NonFinite {
        #[serde(rename = "$float")]
        kind: String,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        NonFinite(NonFinite),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        let kind = if value.is_nan() {
            "nan"
        } else if *value == f64::INFINITY {
            "inf"
        } else if *value == f64::NEG_INFINITY {
            "-inf"
        } else {
            return serializer.serialize_f64(*value);
        };
        NonFinite { kind: kind.into() }.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(n),
            Repr::NonFinite(NonFinite { kind }) => match kind.as_str() {
                "nan" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(D::Error::custom(format!("unknown float {:?}", other))),
            },
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value, if it is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The most specific [`VarType`] describing this value.
    pub fn var_type(&self) -> VarType {
        match self {
            Value::Null | Value::Map(_) => VarType::Any,
            Value::Bool(_) => VarType::Bool,
            Value::Int(_) => VarType::Integer,
            Value::Float(_) => VarType::Float,
            Value::String(_) => VarType::String,
            Value::List(_) => VarType::List,
            Value::Table { .. } => VarType::Table,
        }
    }

    /// Short name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Table { .. } => "table",
            Value::Map(_) => "map",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "None"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Table { columns, rows } => {
                write!(f, "Table({} columns x {} rows)", columns.len(), rows.len())
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (idx, (key, val)) in map.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, val)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

/// Declared type of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum VarType {
    /// Skips type checking
    #[default]
    Any,
    Bool,
    /// Either Integer or Float; intended for inputs
    Number,
    Integer,
    Float,
    String,
    List,
    Table,
}

impl VarType {
    pub fn name(self) -> &'static str {
        match self {
            VarType::Any => "Any",
            VarType::Bool => "Bool",
            VarType::Number => "Number",
            VarType::Integer => "Integer",
            VarType::Float => "Float",
            VarType::String => "String",
            VarType::List => "List",
            VarType::Table => "Table",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, VarType::Number | VarType::Integer | VarType::Float)
    }

    /// Whether an output of type `output` may feed an input of type `self`.
    pub fn accepts(self, output: VarType) -> bool {
        self == output || self == VarType::Any || (self == VarType::Number && output.is_numeric())
    }

    /// Default value for a freshly configured pin of this type.
    pub fn default_value(self) -> Value {
        match self {
            VarType::Any => Value::Null,
            VarType::Bool => Value::Bool(false),
            VarType::Number | VarType::Integer => Value::Int(0),
            VarType::Float => Value::Float(0.0),
            VarType::String => Value::String(String::new()),
            VarType::List => Value::List(Vec::new()),
            VarType::Table => Value::Table {
                columns: Vec::new(),
                rows: Vec::new(),
            },
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Controls how a node's calculation is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Pure function of its inputs
    Simple,
    /// Value refreshed on the control thread, no job dispatch
    Static,
    /// Read-only view of its inputs
    Display,
    /// Runs user code in the script sandbox
    Script,
    /// Hooks into the sheet lifecycle after its job completes
    Special,
}

/// Calculation status of a node or of a whole sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CalcStatus {
    #[default]
    Idle,
    Processing,
    Success,
    Warning,
    Error,
    TimedOut,
}

impl CalcStatus {
    /// A pass stops waiting on a node once its status is terminal.
    pub fn is_terminal(self) -> bool {
        !matches!(self, CalcStatus::Idle | CalcStatus::Processing)
    }
}

impl fmt::Display for CalcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Whether a pin is an input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinDirection {
    Input,
    Output,
}

impl fmt::Display for PinDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Sheet variant: top-level sheets auto-recalculate, function sheets are
/// invoked synchronously by a Function node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SheetVariant {
    #[default]
    Sheet,
    Function,
}

impl fmt::Display for SheetVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
