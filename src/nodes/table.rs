//! Table manipulation nodes.

use super::config::{config_bool, config_i64};
use super::{expect_inputs, CommonConfig, ConfigMap, NodeError, NodeRegistration, PinDescriptor};
use crate::types::{Value, VarType};

fn selected_rows(config: &ConfigMap, total: usize) -> Result<Vec<usize>, NodeError> {
    if config_bool(config, "row_range", false) {
        let start = config_i64(config, "row_start", 0).max(0) as usize;
        let end = config_i64(config, "row_end", 0);
        if end < 0 {
            return Ok(Vec::new());
        }
        let end = (end as usize).min(total.saturating_sub(1));
        return Ok((start..=end).filter(|row| *row < total).collect());
    }
    let rows = match config.get("rows") {
        Some(Value::List(rows)) => rows,
        Some(other) => {
            return Err(NodeError::InvalidConfig {
                key: "rows".into(),
                message: format!("expected a list, got {}", other.type_name()),
            })
        }
        None => return Ok(Vec::new()),
    };
    // negative and out-of-range rows are skipped
    Ok(rows
        .iter()
        .filter_map(Value::as_i64)
        .filter(|row| *row >= 0 && (*row as usize) < total)
        .map(|row| row as usize)
        .collect())
}

fn selected_columns(config: &ConfigMap) -> Vec<String> {
    match config.get("columns") {
        Some(Value::List(cols)) => cols
            .iter()
            .filter_map(|c| c.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn select_region(
    inputs: &[Value],
    config: &ConfigMap,
    _: &CommonConfig,
) -> Result<Vec<Value>, NodeError> {
    expect_inputs(inputs, 1)?;
    let (columns, rows) = match &inputs[0] {
        Value::Table { columns, rows } => (columns, rows),
        other => {
            return Err(NodeError::NotATable {
                index: 0,
                found: other.type_name(),
            })
        }
    };

    let mut out_rows: Vec<Vec<Value>> = if config_bool(config, "filter_rows", false) {
        selected_rows(config, rows.len())?
            .into_iter()
            .map(|idx| rows[idx].clone())
            .collect()
    } else {
        rows.clone()
    };

    let mut out_columns = columns.clone();
    if config_bool(config, "filter_columns", false) {
        let wanted = selected_columns(config);
        let keep: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, name)| wanted.contains(name))
            .map(|(idx, _)| idx)
            .collect();
        out_columns = keep.iter().map(|idx| columns[*idx].clone()).collect();
        out_rows = out_rows
            .into_iter()
            .map(|row| {
                keep.iter()
                    .map(|idx| row.get(*idx).cloned().unwrap_or_default())
                    .collect()
            })
            .collect();
    }

    Ok(vec![Value::Table {
        columns: out_columns,
        rows: out_rows,
    }])
}

fn select_region_config() -> ConfigMap {
    let mut config = ConfigMap::new();
    config.insert("filter_columns".into(), Value::Bool(false));
    config.insert("columns".into(), Value::List(Vec::new()));
    config.insert("filter_rows".into(), Value::Bool(false));
    config.insert("row_range".into(), Value::Bool(false));
    config.insert("rows".into(), Value::List(Vec::new()));
    config.insert("row_start".into(), Value::Int(0));
    config.insert("row_end".into(), Value::Int(0));
    config
}

pub static SELECT_REGION: NodeRegistration = NodeRegistration {
    class: "TableSelectRegion",
    display_name: "Select Region",
    description: "Keep a subset of rows and columns",
    category: "Table",
    subcategory: "General",
    inputs: &[PinDescriptor::new("Original", "Original Table", VarType::Table)],
    outputs: &[PinDescriptor::new("Filtered", "Filtered Table", VarType::Table)],
    default_config: select_region_config,
    execute: select_region,
    ..NodeRegistration::DEFAULT
};

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        Value::Table {
            columns: vec!["a".into(), "b".into(), "c".into()],
            rows: (0..5)
                .map(|r| vec![Value::Int(r), Value::Int(r * 10), Value::Int(r * 100)])
                .collect(),
        }
    }

    fn run(config: ConfigMap) -> Value {
        select_region(&[sample()], &config, &CommonConfig::default())
            .unwrap()
            .remove(0)
    }

    #[test]
    fn test_passthrough_by_default() {
        assert_eq!(run(select_region_config()), sample());
    }

    #[test]
    fn test_row_range_inclusive() {
        let mut config = select_region_config();
        config.insert("filter_rows".into(), Value::Bool(true));
        config.insert("row_range".into(), Value::Bool(true));
        config.insert("row_start".into(), Value::Int(1));
        config.insert("row_end".into(), Value::Int(3));
        match run(config) {
            Value::Table { rows, .. } => {
                let firsts: Vec<_> = rows.iter().map(|r| r[0].clone()).collect();
                assert_eq!(firsts, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
            }
            other => panic!("expected table, got {:?}", other),
        }
    }

    #[test]
    fn test_row_list_skips_negative_and_columns_filter() {
        let mut config = select_region_config();
        config.insert("filter_rows".into(), Value::Bool(true));
        config.insert(
            "rows".into(),
            Value::List(vec![Value::Int(-1), Value::Int(4), Value::Int(9)]),
        );
        config.insert("filter_columns".into(), Value::Bool(true));
        config.insert(
            "columns".into(),
            Value::List(vec![Value::from("c"), Value::from("a")]),
        );
        assert_eq!(
            run(config),
            Value::Table {
                columns: vec!["a".into(), "c".into()],
                rows: vec![vec![Value::Int(4), Value::Int(400)]],
            }
        );
    }

    #[test]
    fn test_rejects_non_table() {
        let err = select_region(&[Value::Int(1)], &select_region_config(), &CommonConfig::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "Input 0 must be a table, got integer");
    }
}
