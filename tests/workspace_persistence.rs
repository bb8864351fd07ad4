//! Workspace save/load integration tests

mod common;

use althea_engine::id::{NodeId, SheetId};
use althea_engine::types::{PinDirection, SheetVariant, Value};
use althea_engine::workspace::WorkspaceDocument;
use althea_engine::{EngineError, Workspace};
use common::backends::inline_backend;
use common::test_config;
use tempfile::TempDir;

/// Main sheet calling the default function sheet, which adds 10.
fn calling_workspace() -> (Workspace, SheetId, NodeId) {
    let mut ws = Workspace::new();
    let main = ws.sheets()[0].id;
    let function = ws.function_sheets()[0].id;

    ws.edit_sheet(function, |sheet, ids| {
        let inputs = sheet.input_node_id().unwrap();
        let outputs = sheet.output_node_id().unwrap();
        let x = althea_engine::nodes::PinInfo::new(althea_engine::types::VarType::Number, "x");
        let y = althea_engine::nodes::PinInfo::new(althea_engine::types::VarType::Number, "y");
        sheet.set_pin_layout(inputs, PinDirection::Output, vec![x], ids).unwrap();
        sheet.set_pin_layout(outputs, PinDirection::Input, vec![y], ids).unwrap();
        let add = sheet.new_node("MathAdd", ids).unwrap();
        let x_out = sheet.find_node(inputs).unwrap().outputs[0].id;
        let add_in = sheet.find_node(add).unwrap().inputs[0].id;
        let add_b = sheet.find_node(add).unwrap().inputs[1].id;
        let add_out = sheet.find_node(add).unwrap().outputs[0].id;
        let y_in = sheet.find_node(outputs).unwrap().inputs[0].id;
        sheet.attempt_link(x_out, add_in, ids).unwrap();
        sheet.set_input_value(add_b, 10i64).unwrap();
        sheet.attempt_link(add_out, y_in, ids).unwrap();
    })
    .unwrap();

    let view = ws
        .edit_sheet(main, |sheet, ids| {
            let a = sheet.new_node("ValueNumber", ids).unwrap();
            sheet.set_node_config(a, "value", 32i64).unwrap();
            let call = sheet.new_node("Function", ids).unwrap();
            sheet
                .set_node_config(call, "function_id", Value::Int(function.raw() as i64))
                .unwrap();
            let view = sheet.new_node("View", ids).unwrap();
            (a, call, view)
        })
        .unwrap();
    ws.sync_function_nodes();

    let (a, call, view) = view;
    ws.edit_sheet(main, |sheet, ids| {
        let a_out = sheet.find_node(a).unwrap().outputs[0].id;
        let call_in = sheet.find_node(call).unwrap().inputs[0].id;
        let call_out = sheet.find_node(call).unwrap().outputs[0].id;
        let view_in = sheet.find_node(view).unwrap().inputs[0].id;
        sheet.attempt_link(a_out, call_in, ids).unwrap();
        sheet.attempt_link(call_out, view_in, ids).unwrap();
    })
    .unwrap();
    (ws, main, view)
}

#[test]
fn test_round_trip_preserves_identities() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("calling.json");
    let (ws, _, _) = calling_workspace();
    ws.save(&path).unwrap();

    let loaded = Workspace::open(&path).unwrap();
    for variant in [SheetVariant::Sheet, SheetVariant::Function] {
        let before: Vec<_> = ws.sheets_of(variant).iter().map(|s| s.to_record()).collect();
        let after: Vec<_> = loaded.sheets_of(variant).iter().map(|s| s.to_record()).collect();
        assert_eq!(before, after);
    }
}

#[test]
fn test_loaded_workspace_recalculates() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("calling.json");
    let (ws, main, view) = calling_workspace();
    ws.save(&path).unwrap();

    let mut loaded = Workspace::open(&path).unwrap();
    let config = test_config();
    let mut backend = inline_backend(&config);
    let report = loaded.recalc_sheet(main, &mut backend, &config).unwrap();
    assert!(report.is_success(), "{}", report.message);
    let sheet = loaded.find_sheet(main).unwrap();
    assert_eq!(sheet.find_node(view).unwrap().inputs[0].value, Value::Int(42));
}

#[test]
fn test_document_keys() {
    let (ws, _, _) = calling_workspace();
    let json: serde_json::Value = serde_json::from_str(&ws.to_document().to_json().unwrap()).unwrap();
    for key in ["config", "sheets", "function_sheets", "view_bookmarks"] {
        assert!(json.get(key).is_some(), "missing {}", key);
    }
    let node = &json["sheets"][0]["nodes"][0];
    for key in ["id", "class", "pos_x", "pos_y", "common_config", "config", "inputs", "outputs"] {
        assert!(node.get(key).is_some(), "node missing {}", key);
    }
    let link = &json["sheets"][0]["links"][0];
    for key in ["id", "var_type", "input_id", "input_node_id", "output_id", "output_node_id"] {
        assert!(link.get(key).is_some(), "link missing {}", key);
    }
}

#[test]
fn test_new_ids_do_not_collide_after_load() {
    let (ws, main, _) = calling_workspace();
    let document = ws.to_document();
    let mut loaded = Workspace::from_document(&document).unwrap();

    let existing_nodes: Vec<NodeId> = loaded
        .sheets()
        .iter()
        .chain(loaded.function_sheets())
        .flat_map(|sheet| sheet.nodes().iter().map(|node| node.id))
        .collect();
    let fresh = loaded
        .edit_sheet(main, |sheet, ids| sheet.new_node("MathAdd", ids).unwrap())
        .unwrap();
    assert!(!existing_nodes.contains(&fresh));
    assert!(existing_nodes.iter().all(|id| *id < fresh));
}

#[test]
fn test_unknown_class_fails_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("unknown.json");
    let (ws, _, _) = calling_workspace();
    let text = ws.to_document().to_json().unwrap().replace("\"MathAdd\"", "\"MathPower\"");
    std::fs::write(&path, text).unwrap();

    let mut target = Workspace::new();
    let err = target.load(&path).unwrap_err();
    assert!(matches!(err, EngineError::Sheet(_)), "{}", err);
    assert!(target.sheets().is_empty());
}

#[test]
fn test_missing_sheets_key() {
    let err = WorkspaceDocument::from_json(r#"{"config": {"name": "x"}, "function_sheets": []}"#)
        .unwrap_err();
    assert_eq!(err.to_string(), "Workspace error: Missing key 'sheets'");
}
