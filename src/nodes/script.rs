//! Script node: configurable pins, code in the `script` config key.
//!
//! Workers route `Script` jobs to [`crate::scripting::ScriptRunner`]; the
//! registration's `execute` is only reached if something bypasses that.

use super::{CommonConfig, ConfigMap, NodeError, NodeRegistration};
use crate::types::{NodeKind, Value};

fn not_executable(_: &[Value], _: &ConfigMap, _: &CommonConfig) -> Result<Vec<Value>, NodeError> {
    Err(NodeError::NotExecutable(SCRIPT.class))
}

fn script_config() -> ConfigMap {
    let mut config = ConfigMap::new();
    config.insert("script".into(), Value::String(String::new()));
    config
}

pub static SCRIPT: NodeRegistration = NodeRegistration {
    class: "Script",
    display_name: "Script",
    description: "Process data using a small Rhai script",
    category: "Advanced",
    subcategory: "Script",
    kind: NodeKind::Script,
    configurable_inputs: true,
    configurable_outputs: true,
    default_config: script_config,
    execute: not_executable,
    ..NodeRegistration::DEFAULT
};
