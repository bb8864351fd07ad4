//! Node class registry
//!
//! Every node class is a static [`NodeRegistration`]: a string discriminator
//! (the `class` persisted in workspace files), display metadata, its
//! [`NodeKind`], the fixed pin layout and a plain `fn` for the calculation.
//! Registrations are collected in [`REGISTRY`]; there is no runtime
//! discovery.
//!
//! # Node kinds
//!
//! - `Simple` nodes are pure functions run by a worker
//! - `Static` nodes produce values on the control thread through `refresh`
//! - `Display` nodes only show their inputs and produce no outputs
//! - `Script` nodes hand their `script` config to the script sandbox
//! - `Special` nodes take part in function sheet evaluation, see
//!   [`SpecialRole`]
//!
//! # Example
//!
//! ```
//! use althea_engine::nodes::{find_registration, ConfigMap, CommonConfig};
//! use althea_engine::types::Value;
//!
//! let add = find_registration("MathAdd").unwrap();
//! let out = (add.execute)(&[Value::Int(2), Value::Int(3)], &ConfigMap::new(), &CommonConfig::default());
//! assert_eq!(out.unwrap(), vec![Value::Int(5)]);
//! ```

pub mod config;
mod math;
mod script;
mod special;
mod table;
mod value;
mod view;

pub use config::{CommonConfig, ConfigMap, PinInfo};

use crate::types::{NodeKind, PinDirection, Value, VarType};
use thiserror::Error;

/// Typed failures raised by node calculations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Cannot divide by 0!")]
    DivideByZero,

    #[error("Expected {expected} inputs, got {got}")]
    InputCount { expected: usize, got: usize },

    #[error("Input {index} must be a number, got {found}")]
    NotANumber { index: usize, found: &'static str },

    #[error("Input {index} must be a table, got {found}")]
    NotATable { index: usize, found: &'static str },

    #[error("Invalid value for config '{key}': {message}")]
    InvalidConfig { key: String, message: String },

    #[error("Configured file path not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read {path}: {message}")]
    FileRead { path: String, message: String },

    #[error("Node class {0} cannot be executed by a worker")]
    NotExecutable(&'static str),
}

/// Calculation performed by a worker: inputs in pin order, outputs in pin order.
pub type ExecuteFn = fn(&[Value], &ConfigMap, &CommonConfig) -> Result<Vec<Value>, NodeError>;

/// Value refresh for `Static` nodes, run on the control thread.
pub type RefreshFn = fn(&ConfigMap, &CommonConfig) -> Result<Vec<Value>, NodeError>;

/// Lifecycle hook a `Special` node performs after its job completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialRole {
    /// Publishes the values stashed by `use_sheet` on its outputs
    FunctionInputs,
    /// Captures its inputs as the function sheet's result
    FunctionOutputs,
    /// Evaluates another function sheet as if it were this node
    Function,
}

/// Fixed pin declared by a node class
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinDescriptor {
    pub label: &'static str,
    pub description: &'static str,
    pub var_type: VarType,
}

impl PinDescriptor {
    pub const fn new(label: &'static str, description: &'static str, var_type: VarType) -> Self {
        Self {
            label,
            description,
            var_type,
        }
    }
}

/// Static description of a node class
#[derive(Debug)]
pub struct NodeRegistration {
    /// Discriminator stored in workspace files
    pub class: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub subcategory: &'static str,
    pub kind: NodeKind,
    pub inputs: &'static [PinDescriptor],
    pub outputs: &'static [PinDescriptor],
    /// Inputs come from the common config instead of `inputs`
    pub configurable_inputs: bool,
    /// Outputs come from the common config instead of `outputs`
    pub configurable_outputs: bool,
    pub deletable: bool,
    /// Not offered when listing node classes to users
    pub hidden: bool,
    pub default_config: fn() -> ConfigMap,
    pub execute: ExecuteFn,
    pub refresh: Option<RefreshFn>,
    pub special: Option<SpecialRole>,
}

pub(crate) fn no_outputs(
    _inputs: &[Value],
    _config: &ConfigMap,
    _common: &CommonConfig,
) -> Result<Vec<Value>, NodeError> {
    Ok(Vec::new())
}

fn empty_config() -> ConfigMap {
    ConfigMap::new()
}

impl NodeRegistration {
    /// Base for registrations, used with struct update syntax.
    pub const DEFAULT: NodeRegistration = NodeRegistration {
        class: "",
        display_name: "",
        description: "",
        category: "General",
        subcategory: "General",
        kind: NodeKind::Simple,
        inputs: &[],
        outputs: &[],
        configurable_inputs: false,
        configurable_outputs: false,
        deletable: true,
        hidden: false,
        default_config: empty_config,
        execute: no_outputs,
        refresh: None,
        special: None,
    };

    /// Whether pins in `direction` are built from the common config.
    ///
    /// Function nodes always are, so they can mirror their target sheet.
    pub fn io_from_common_config(&self, direction: PinDirection) -> bool {
        if self.special == Some(SpecialRole::Function) {
            return true;
        }
        match direction {
            PinDirection::Input => self.configurable_inputs,
            PinDirection::Output => self.configurable_outputs,
        }
    }

    pub fn fixed_pins(&self, direction: PinDirection) -> &'static [PinDescriptor] {
        match direction {
            PinDirection::Input => self.inputs,
            PinDirection::Output => self.outputs,
        }
    }
}

/// Every built-in node class.
pub static REGISTRY: &[&NodeRegistration] = &[
    &math::ADD,
    &math::SUBTRACT,
    &math::MULTIPLY,
    &math::DIVIDE,
    &math::INVERT,
    &math::ROUND,
    &value::NUMBER,
    &value::STRING,
    &value::BOOL,
    &value::TABLE,
    &value::STATIC_VALUES,
    &table::SELECT_REGION,
    &view::VIEW,
    &view::COMMENT,
    &script::SCRIPT,
    &special::FUNCTION_INPUTS,
    &special::FUNCTION_OUTPUTS,
    &special::FUNCTION,
];

pub fn find_registration(class: &str) -> Option<&'static NodeRegistration> {
    REGISTRY.iter().copied().find(|reg| reg.class == class)
}

/// Registrations offered to users, sorted by category then display name.
pub fn visible_registrations() -> Vec<&'static NodeRegistration> {
    let mut regs: Vec<_> = REGISTRY.iter().copied().filter(|reg| !reg.hidden).collect();
    regs.sort_by_key(|reg| (reg.category, reg.subcategory, reg.display_name));
    regs
}

/// Class names of the marker nodes every function sheet contains.
pub const FUNCTION_INPUTS_CLASS: &str = "FunctionInputs";
pub const FUNCTION_OUTPUTS_CLASS: &str = "FunctionOutputs";

pub(crate) fn expect_inputs(inputs: &[Value], expected: usize) -> Result<(), NodeError> {
    if inputs.len() != expected {
        return Err(NodeError::InputCount {
            expected,
            got: inputs.len(),
        });
    }
    Ok(())
}
