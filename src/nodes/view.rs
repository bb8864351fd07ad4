//! Display nodes. They have no outputs; the sheet shows their input values.

use super::{ConfigMap, NodeRegistration, PinDescriptor};
use crate::types::{NodeKind, Value, VarType};

fn view_config() -> ConfigMap {
    let mut config = ConfigMap::new();
    config.insert("limit_rows".into(), Value::Int(8));
    config.insert("limit_cols".into(), Value::Int(6));
    config
}

fn comment_config() -> ConfigMap {
    let mut config = ConfigMap::new();
    config.insert("comment_text".into(), Value::String(String::new()));
    config.insert("use_markdown".into(), Value::Bool(false));
    config
}

pub static VIEW: NodeRegistration = NodeRegistration {
    class: "View",
    display_name: "View",
    description: "Display a value",
    category: "View",
    kind: NodeKind::Display,
    inputs: &[PinDescriptor::new("Value", "Value input", VarType::Any)],
    default_config: view_config,
    ..NodeRegistration::DEFAULT
};

pub static COMMENT: NodeRegistration = NodeRegistration {
    class: "Comment",
    display_name: "Comment",
    description: "Leave a note on the sheet",
    category: "View",
    kind: NodeKind::Display,
    default_config: comment_config,
    ..NodeRegistration::DEFAULT
};
