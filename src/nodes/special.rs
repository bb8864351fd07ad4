//! Function sheet nodes.
//!
//! Their jobs produce nothing; the work happens in the sheet's special
//! hook once the job result comes back, see `crate::sheet::function`.

use super::{ConfigMap, NodeRegistration, SpecialRole, FUNCTION_INPUTS_CLASS, FUNCTION_OUTPUTS_CLASS};
use crate::types::{NodeKind, Value};

const SPECIAL: NodeRegistration = NodeRegistration {
    category: "Advanced",
    subcategory: "General",
    kind: NodeKind::Special,
    ..NodeRegistration::DEFAULT
};

fn function_config() -> ConfigMap {
    let mut config = ConfigMap::new();
    config.insert("function_id".into(), Value::Null);
    config
}

pub static FUNCTION_INPUTS: NodeRegistration = NodeRegistration {
    class: FUNCTION_INPUTS_CLASS,
    display_name: "Function Inputs",
    description: "Data used as input to this Function",
    configurable_outputs: true,
    deletable: false,
    hidden: true,
    special: Some(SpecialRole::FunctionInputs),
    ..SPECIAL
};

pub static FUNCTION_OUTPUTS: NodeRegistration = NodeRegistration {
    class: FUNCTION_OUTPUTS_CLASS,
    display_name: "Function Outputs",
    description: "Data outputted by this Function",
    configurable_inputs: true,
    deletable: false,
    hidden: true,
    special: Some(SpecialRole::FunctionOutputs),
    ..SPECIAL
};

pub static FUNCTION: NodeRegistration = NodeRegistration {
    class: "Function",
    display_name: "Function",
    description: "Use a Function sheet as a single node",
    default_config: function_config,
    special: Some(SpecialRole::Function),
    ..SPECIAL
};
