//! Arithmetic nodes.
//!
//! Integer inputs stay integers where the result is exact; anything involving
//! a float produces a float. Division always produces a float and is never
//! rounded implicitly.

use super::config::config_i64;
use super::{expect_inputs, CommonConfig, ConfigMap, NodeError, NodeRegistration, PinDescriptor};
use crate::types::{Value, VarType};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Int(i) => Value::Int(i),
            Number::Float(f) => Value::Float(f),
        }
    }
}

fn number(inputs: &[Value], index: usize) -> Result<Number, NodeError> {
    match &inputs[index] {
        Value::Int(i) => Ok(Number::Int(*i)),
        Value::Float(f) => Ok(Number::Float(*f)),
        other => Err(NodeError::NotANumber {
            index,
            found: other.type_name(),
        }),
    }
}

fn binary(
    inputs: &[Value],
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Vec<Value>, NodeError> {
    expect_inputs(inputs, 2)?;
    let a = number(inputs, 0)?;
    let b = number(inputs, 1)?;
    let result = match (a, b) {
        // overflow falls back to float math
        (Number::Int(x), Number::Int(y)) => match int_op(x, y) {
            Some(v) => Number::Int(v),
            None => Number::Float(float_op(x as f64, y as f64)),
        },
        _ => Number::Float(float_op(a.as_f64(), b.as_f64())),
    };
    Ok(vec![result.into()])
}

fn add(inputs: &[Value], _: &ConfigMap, _: &CommonConfig) -> Result<Vec<Value>, NodeError> {
    binary(inputs, i64::checked_add, |x, y| x + y)
}

fn subtract(inputs: &[Value], _: &ConfigMap, _: &CommonConfig) -> Result<Vec<Value>, NodeError> {
    binary(inputs, i64::checked_sub, |x, y| x - y)
}

fn multiply(inputs: &[Value], _: &ConfigMap, _: &CommonConfig) -> Result<Vec<Value>, NodeError> {
    binary(inputs, i64::checked_mul, |x, y| x * y)
}

fn divide(inputs: &[Value], _: &ConfigMap, _: &CommonConfig) -> Result<Vec<Value>, NodeError> {
    expect_inputs(inputs, 2)?;
    let dividend = number(inputs, 0)?.as_f64();
    let divisor = number(inputs, 1)?.as_f64();
    if divisor == 0.0 {
        return Err(NodeError::DivideByZero);
    }
    Ok(vec![Value::Float(dividend / divisor)])
}

fn invert(inputs: &[Value], _: &ConfigMap, _: &CommonConfig) -> Result<Vec<Value>, NodeError> {
    expect_inputs(inputs, 1)?;
    let result = match number(inputs, 0)? {
        Number::Int(i) => match i.checked_neg() {
            Some(v) => Number::Int(v),
            None => Number::Float(-(i as f64)),
        },
        Number::Float(f) => Number::Float(-f),
    };
    Ok(vec![result.into()])
}

/// Rounds half away from zero to `places` decimals; negative places round
/// to tens, hundreds and so on.
pub(crate) fn round_to(value: f64, places: i64) -> f64 {
    let places = places.clamp(-300, 300) as i32;
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn round(inputs: &[Value], config: &ConfigMap, _: &CommonConfig) -> Result<Vec<Value>, NodeError> {
    expect_inputs(inputs, 1)?;
    let places = config_i64(config, "places", 2);
    let result = match number(inputs, 0)? {
        Number::Int(i) if places >= 0 => Value::Int(i),
        Number::Int(i) => Value::Int(round_to(i as f64, places) as i64),
        Number::Float(f) => Value::Float(round_to(f, places)),
    };
    Ok(vec![result])
}

fn round_config() -> ConfigMap {
    let mut config = ConfigMap::new();
    config.insert("places".into(), Value::Int(2));
    config
}

const AB: &[PinDescriptor] = &[
    PinDescriptor::new("A", "Value A", VarType::Number),
    PinDescriptor::new("B", "Value B", VarType::Number),
];

const MATH: NodeRegistration = NodeRegistration {
    category: "Math",
    subcategory: "Simple",
    inputs: AB,
    ..NodeRegistration::DEFAULT
};

pub static ADD: NodeRegistration = NodeRegistration {
    class: "MathAdd",
    display_name: "Add",
    description: "Add two values",
    outputs: &[PinDescriptor::new("Sum", "Sum of input values", VarType::Number)],
    execute: add,
    ..MATH
};

pub static SUBTRACT: NodeRegistration = NodeRegistration {
    class: "MathSubtract",
    display_name: "Subtract",
    description: "Subtract B from A",
    outputs: &[PinDescriptor::new(
        "Difference",
        "Difference between input values",
        VarType::Number,
    )],
    execute: subtract,
    ..MATH
};

pub static MULTIPLY: NodeRegistration = NodeRegistration {
    class: "MathMultiply",
    display_name: "Multiply",
    description: "Multiply two values",
    outputs: &[PinDescriptor::new("Product", "Product of input values", VarType::Number)],
    execute: multiply,
    ..MATH
};

pub static DIVIDE: NodeRegistration = NodeRegistration {
    class: "MathDivide",
    display_name: "Divide",
    description: "Divide the dividend by the divisor",
    inputs: &[
        PinDescriptor::new("Dividend", "Value to be divided", VarType::Number),
        PinDescriptor::new("Divisor", "Value to divide by", VarType::Number),
    ],
    outputs: &[PinDescriptor::new("Quotient", "Result of division", VarType::Float)],
    execute: divide,
    ..MATH
};

pub static INVERT: NodeRegistration = NodeRegistration {
    class: "MathInvert",
    display_name: "Invert",
    description: "Flip the sign of a value",
    inputs: &[PinDescriptor::new("Value", "Value", VarType::Number)],
    outputs: &[PinDescriptor::new("Inverted", "Inverted value", VarType::Number)],
    execute: invert,
    ..MATH
};

pub static ROUND: NodeRegistration = NodeRegistration {
    class: "MathRound",
    display_name: "Round",
    description: "Round a value to a number of decimal places",
    subcategory: "Rounding",
    inputs: &[PinDescriptor::new("Value", "Input Value", VarType::Number)],
    outputs: &[PinDescriptor::new("Rounded", "Rounded value", VarType::Number)],
    default_config: round_config,
    execute: round,
    ..MATH
};
