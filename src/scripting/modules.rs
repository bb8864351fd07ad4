//! Importable modules available to scripts.
//!
//! Scripts may `import` only the names in [`SAFE_SCRIPT_MODULES`]; any other
//! import fails at run time with a module-not-found error that the runner
//! reports as an illegal import.

use super::convert::{dynamic_to_json, json_to_dynamic};
use rhai::module_resolvers::ModuleResolver;
use rhai::{Array, Dynamic, Engine, EvalAltResult, Map, Module, Position, Shared, FLOAT, INT};
use std::collections::BTreeMap;

/// Modules scripts are allowed to import.
pub const SAFE_SCRIPT_MODULES: &[&str] = &["math", "time", "collections", "json", "csv"];

type FnResult<T> = Result<T, Box<EvalAltResult>>;

/// Resolver serving the allow-listed modules and rejecting everything else.
pub struct SandboxModules {
    modules: BTreeMap<&'static str, Shared<Module>>,
}

impl SandboxModules {
    pub fn new() -> Self {
        let mut modules = BTreeMap::new();
        modules.insert("math", Shared::new(math_module()));
        modules.insert("time", Shared::new(time_module()));
        modules.insert("collections", Shared::new(collections_module()));
        modules.insert("json", Shared::new(json_module()));
        modules.insert("csv", Shared::new(csv_module()));
        Self { modules }
    }

    pub fn is_allowed(name: &str) -> bool {
        SAFE_SCRIPT_MODULES.contains(&name)
    }
}

impl Default for SandboxModules {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleResolver for SandboxModules {
    fn resolve(
        &self,
        _engine: &Engine,
        _source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> Result<Shared<Module>, Box<EvalAltResult>> {
        match self.modules.get(path) {
            Some(module) => Ok(module.clone()),
            None => Err(EvalAltResult::ErrorModuleNotFound(path.to_string(), pos).into()),
        }
    }
}

fn runtime_error(message: String) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(message.into(), Position::NONE).into()
}

fn as_number(value: &Dynamic) -> FnResult<FLOAT> {
    if let Ok(f) = value.as_float() {
        return Ok(f);
    }
    if let Ok(i) = value.as_int() {
        return Ok(i as FLOAT);
    }
    Err(runtime_error(format!(
        "expected a number, got {}",
        value.type_name()
    )))
}

fn math_module() -> Module {
    let mut module = Module::new();
    module.set_var("PI", std::f64::consts::PI);
    module.set_var("E", std::f64::consts::E);
    module.set_var("TAU", std::f64::consts::TAU);

    let unary: [(&str, fn(FLOAT) -> FLOAT); 11] = [
        ("sqrt", FLOAT::sqrt),
        ("exp", FLOAT::exp),
        ("ln", FLOAT::ln),
        ("log10", FLOAT::log10),
        ("sin", FLOAT::sin),
        ("cos", FLOAT::cos),
        ("tan", FLOAT::tan),
        ("floor", FLOAT::floor),
        ("ceil", FLOAT::ceil),
        ("abs", FLOAT::abs),
        ("round", FLOAT::round),
    ];
    // integers are accepted wherever a float is
    for (name, f) in unary {
        module.set_native_fn(name, move |x: Dynamic| -> FnResult<FLOAT> {
            Ok(f(as_number(&x)?))
        });
    }
    module.set_native_fn("pow", |x: Dynamic, y: Dynamic| -> FnResult<FLOAT> {
        Ok(as_number(&x)?.powf(as_number(&y)?))
    });
    module.set_native_fn("atan2", |y: Dynamic, x: Dynamic| -> FnResult<FLOAT> {
        Ok(as_number(&y)?.atan2(as_number(&x)?))
    });
    module.set_native_fn(
        "clamp",
        |x: Dynamic, lo: Dynamic, hi: Dynamic| -> FnResult<FLOAT> {
            let (lo, hi) = (as_number(&lo)?, as_number(&hi)?);
            if lo > hi {
                return Err(runtime_error(format!("clamp bounds reversed: {} > {}", lo, hi)));
            }
            Ok(as_number(&x)?.clamp(lo, hi))
        },
    );
    module.set_native_fn("round", |x: Dynamic, places: INT| -> FnResult<FLOAT> {
        let factor = 10f64.powi(places as i32);
        Ok((as_number(&x)? * factor).round() / factor)
    });
    module.build_index();
    module
}

fn format_timestamp(secs: FLOAT, fmt: &str) -> FnResult<String> {
    use std::fmt::Write;

    let millis = (secs * 1000.0) as i64;
    let dt = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| runtime_error(format!("timestamp out of range: {}", secs)))?;
    let mut out = String::new();
    write!(out, "{}", dt.format(fmt))
        .map_err(|_| runtime_error(format!("invalid time format: {}", fmt)))?;
    Ok(out)
}

fn time_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("now", || {
        Ok(chrono::Utc::now().timestamp_millis() as FLOAT / 1000.0)
    });
    module.set_native_fn("timestamp", || Ok(chrono::Local::now().to_rfc3339()));
    module.set_native_fn("format", format_timestamp);
    module.build_index();
    module
}

fn numbers(items: &Array) -> FnResult<Vec<FLOAT>> {
    items.iter().map(as_number).collect()
}

fn sum(items: Array) -> FnResult<FLOAT> {
    Ok(numbers(&items)?.iter().sum())
}

fn mean(items: Array) -> FnResult<FLOAT> {
    let values = numbers(&items)?;
    if values.is_empty() {
        return Err(runtime_error("mean of an empty list".to_string()));
    }
    Ok(values.iter().sum::<FLOAT>() / values.len() as FLOAT)
}

fn min(items: Array) -> FnResult<FLOAT> {
    numbers(&items)?
        .into_iter()
        .reduce(FLOAT::min)
        .ok_or_else(|| runtime_error("min of an empty list".to_string()))
}

fn max(items: Array) -> FnResult<FLOAT> {
    numbers(&items)?
        .into_iter()
        .reduce(FLOAT::max)
        .ok_or_else(|| runtime_error("max of an empty list".to_string()))
}

fn counter(items: Array) -> FnResult<Map> {
    let mut counts = Map::new();
    for item in items {
        let key = item.to_string();
        let current = counts
            .get(key.as_str())
            .and_then(|c| c.as_int().ok())
            .unwrap_or(0);
        counts.insert(key.into(), Dynamic::from(current + 1));
    }
    Ok(counts)
}

fn collections_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("sum", sum);
    module.set_native_fn("mean", mean);
    module.set_native_fn("min", min);
    module.set_native_fn("max", max);
    module.set_native_fn("counter", counter);
    module.build_index();
    module
}

fn json_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("parse", |text: &str| {
        serde_json::from_str::<serde_json::Value>(text)
            .map(|v| json_to_dynamic(&v))
            .map_err(|e| runtime_error(format!("invalid json: {}", e)))
    });
    module.set_native_fn("stringify", |value: Dynamic| {
        serde_json::to_string(&dynamic_to_json(&value))
            .map_err(|e| runtime_error(format!("cannot serialize: {}", e)))
    });
    module.build_index();
    module
}

/// Header and data records of a CSV document.
pub(crate) struct CsvRecords {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Reads CSV text; the first record is the header. Quoted fields may span
/// lines and rows may have differing lengths.
pub(crate) fn read_csv(text: &str) -> Result<CsvRecords, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut records = reader.records();
    let columns = match records.next() {
        Some(header) => header?.iter().map(|c| c.trim().to_string()).collect(),
        None => Vec::new(),
    };
    let rows = records
        .map(|record| record.map(|r| r.iter().map(str::to_string).collect()))
        .collect::<Result<_, _>>()?;
    Ok(CsvRecords { columns, rows })
}

fn csv_field(text: &str) -> Dynamic {
    let trimmed = text.trim();
    if let Ok(i) = trimmed.parse::<INT>() {
        Dynamic::from(i)
    } else if let Ok(f) = trimmed.parse::<FLOAT>() {
        Dynamic::from(f)
    } else {
        Dynamic::from(text.to_string())
    }
}

fn csv_module() -> Module {
    let mut module = Module::new();
    // returns a table map: #{ columns: [...], rows: [[...], ...] }
    module.set_native_fn("parse", |text: &str| -> FnResult<Map> {
        let records = read_csv(text).map_err(|e| runtime_error(format!("invalid csv: {}", e)))?;
        let columns: Array = records.columns.into_iter().map(Dynamic::from).collect();
        let rows: Array = records
            .rows
            .iter()
            .map(|row| Dynamic::from_array(row.iter().map(|f| csv_field(f)).collect()))
            .collect();
        let mut table = Map::new();
        table.insert("columns".into(), Dynamic::from_array(columns));
        table.insert("rows".into(), Dynamic::from_array(rows));
        Ok(table)
    });
    module.build_index();
    module
}
