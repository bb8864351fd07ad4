//! End-to-end recalculation scenarios
//!
//! These tests drive whole sheets through the engine:
//! - the A -> Add -> View chain on the inline backend and a thread pool
//! - Script nodes, including sandbox violations
//! - link rejections and change tracking

mod common;

use althea_engine::sheet::{CalcContext, LinkRejection, SheetError};
use althea_engine::types::{CalcStatus, Value};
use common::backends::{inline_backend, thread_backend};
use common::builders::{add_scenario, SheetBuilder};
use common::test_config;
use std::collections::BTreeSet;

#[test]
fn test_add_chain_inline() {
    let config = test_config();
    let mut backend = inline_backend(&config);
    let mut scenario = add_scenario();

    let report = scenario
        .sheet
        .recalc_all(&mut CalcContext::new(&mut backend, &config));
    assert!(report.is_success(), "{}", report.message);
    assert_eq!(
        report.generations,
        vec![
            BTreeSet::from([scenario.a]),
            BTreeSet::from([scenario.add]),
            BTreeSet::from([scenario.view]),
        ]
    );
    let sheet = &scenario.sheet;
    assert_eq!(sheet.find_node(scenario.add).unwrap().outputs[0].value, Value::Int(8));
    assert_eq!(sheet.find_node(scenario.view).unwrap().inputs[0].value, Value::Int(8));
    assert_eq!(sheet.status(), CalcStatus::Success);
}

#[test]
fn test_add_chain_thread_pool() {
    let config = test_config();
    let mut backend = thread_backend(&config, 2);
    let mut scenario = add_scenario();

    let report = scenario
        .sheet
        .recalc_all(&mut CalcContext::new(&mut backend, &config));
    assert!(report.is_success(), "{}", report.message);
    let view = scenario.sheet.find_node(scenario.view).unwrap();
    assert_eq!(view.inputs[0].value, Value::Int(8));
    assert!(view.calc_time.is_some());
    backend.stop();
}

#[test]
fn test_recalc_changed_after_edit() {
    let config = test_config();
    let mut backend = inline_backend(&config);
    let mut scenario = add_scenario();
    scenario
        .sheet
        .recalc_all(&mut CalcContext::new(&mut backend, &config));
    assert!(scenario.sheet.changed_nodes().is_empty());

    scenario.sheet.set_node_config(scenario.a, "value", 40i64).unwrap();
    scenario.sheet.propagate_changed();
    let report = scenario
        .sheet
        .recalc_changed(&mut CalcContext::new(&mut backend, &config))
        .expect("dirty nodes trigger a pass");
    assert!(report.is_success());
    let view = scenario.sheet.find_node(scenario.view).unwrap();
    assert_eq!(view.inputs[0].value, Value::Int(43));

    assert!(scenario
        .sheet
        .recalc_changed(&mut CalcContext::new(&mut backend, &config))
        .is_none());
}

#[test]
fn test_script_doubles_input() {
    let config = test_config();
    let mut backend = thread_backend(&config, 1);
    let mut builder = SheetBuilder::new("Script");
    let script = builder.script("outputs.append(inputs[0] * 2)", &["x"], &["y"]);
    let view = builder.node("View");
    builder.set_input(script, 0, 21i64);
    builder.link(script, 0, view, 0).unwrap();
    let (mut sheet, _) = builder.build();

    let report = sheet.recalc_all(&mut CalcContext::new(&mut backend, &config));
    assert!(report.is_success(), "{}", report.message);
    let node = sheet.find_node(script).unwrap();
    assert_eq!(node.status(), CalcStatus::Success);
    assert_eq!(node.outputs[0].value, Value::Int(42));
    assert_eq!(sheet.find_node(view).unwrap().inputs[0].value, Value::Int(42));
    backend.stop();
}

#[test]
fn test_script_import_is_node_error() {
    let config = test_config();
    let mut backend = thread_backend(&config, 1);
    let mut builder = SheetBuilder::new("Sandbox");
    let script = builder.script("import \"os\" as os;\noutputs.append(1);", &[], &["y"]);
    let view = builder.node("View");
    builder.link(script, 0, view, 0).unwrap();
    let (mut sheet, _) = builder.build();

    let report = sheet.recalc_all(&mut CalcContext::new(&mut backend, &config));
    assert!(!report.is_success());
    let node = sheet.find_node(script).unwrap();
    assert_eq!(node.status(), CalcStatus::Error);
    assert!(node.message().contains("IllegalImportError"), "{}", node.message());

    // the worker survives and serves the next pass
    sheet.set_node_config(script, "script", "outputs.append(5);").unwrap();
    let report = sheet.recalc_all(&mut CalcContext::new(&mut backend, &config));
    assert!(report.is_success(), "{}", report.message);
    assert_eq!(sheet.find_node(view).unwrap().inputs[0].value, Value::Int(5));
    backend.stop();
}

#[test]
fn test_divide_by_zero_keeps_earlier_generations() {
    let config = test_config();
    let mut backend = inline_backend(&config);
    let mut builder = SheetBuilder::new("Partial");
    let a = builder.number(6);
    let divide = builder.node("MathDivide");
    let view = builder.node("View");
    builder.link(a, 0, divide, 0).unwrap();
    builder.set_input(divide, 1, 0i64);
    builder.link(divide, 0, view, 0).unwrap();
    let (mut sheet, _) = builder.build();

    let report = sheet.recalc_all(&mut CalcContext::new(&mut backend, &config));
    assert_eq!(report.status, CalcStatus::Error);
    assert_eq!(sheet.find_node(a).unwrap().outputs[0].value, Value::Int(6));
    assert_eq!(sheet.find_node(divide).unwrap().message(), "Cannot divide by 0!");
    assert_eq!(sheet.find_node(view).unwrap().status(), CalcStatus::Idle);
}

#[test]
fn test_link_to_linked_input_is_rejected() {
    let mut builder = SheetBuilder::new("Rules");
    let x = builder.number(1);
    let z = builder.number(2);
    let y = builder.node("MathInvert");
    builder.link(z, 0, y, 0).unwrap();

    let input = builder.input_pin(y, 0);
    let err = builder.link(x, 0, y, 0).unwrap_err();
    assert_eq!(err, SheetError::LinkRejected(LinkRejection::InputAlreadyLinked(input)));
    assert_eq!(builder.sheet.links().len(), 1);
    assert_eq!(
        builder.sheet.check_link_rules(input, builder.output_pin(x, 0)).unwrap_err(),
        err
    );
}

#[test]
fn test_link_closing_loop_is_rejected() {
    let mut builder = SheetBuilder::new("Safety");
    let a = builder.node("MathInvert");
    let b = builder.node("MathInvert");
    let d = builder.node("MathInvert");
    builder.link(a, 0, b, 0).unwrap();
    builder.link(b, 0, d, 0).unwrap();

    let err = builder.link(d, 0, a, 0).unwrap_err();
    assert_eq!(err, SheetError::LinkRejected(LinkRejection::WouldCycle));
    assert!(err.to_string().contains("circular dependency"));
    assert_eq!(builder.sheet.links().len(), 2);
    assert_eq!(
        builder.sheet.message(),
        "Link Rejected: [Safety] Output pin node is a dependent of input pin node! Link would cause circular dependency!"
    );
}

#[test]
fn test_change_tracking() {
    let mut builder = SheetBuilder::new("Changes");
    let node = builder.node("MathAdd");
    let (mut sheet, _) = builder.build();
    let node = sheet.find_node_mut(node).unwrap();
    assert!(node.has_changed());
    node.mark_unchanged();
    assert!(!node.has_changed());
    node.mark_changed();
    assert!(node.has_changed());
    node.mark_unchanged();
    assert!(!node.has_changed());
}
