//! Sandboxed script runner.
//!
//! Each worker owns one [`ScriptRunner`]. A run goes through
//! `validate -> compile (or cache hit) -> execute` and always returns a
//! [`ScriptResult`]; nothing raised by user code escapes this boundary.

use super::cache::{hash_source, SharedScriptCache};
use super::convert::{dynamic_to_value, value_to_dynamic};
use super::modules::SandboxModules;
use super::traceback::create_traceback;
use super::{LogLevel, LogMessage, ScriptError};
use crate::config::ScriptConfig;
use crate::types::Value;
use rhai::{Array, Dynamic, Engine, EvalAltResult, Scope, Token, AST};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Names scripts may not use, even as identifiers.
pub const FORBIDDEN_NAMES: &[&str] = &[
    "eval",
    "Fn",
    "call",
    "curry",
    "is_def_fn",
    "is_def_var",
    "is_shared",
];

/// Identifiers ending with this suffix are reserved.
pub const RESERVED_SUFFIX: &str = "__";

/// Maximum number of imports a single run may perform.
const MAX_MODULES: usize = 16;

// marks strings already buffered by `log.debug`, see `configure_engine`
const LOG_SENTINEL: &str = "\u{0}althea-log\u{0}";

type LogBuffer = Arc<Mutex<Vec<LogMessage>>>;

fn push_log(buffer: &LogBuffer, level: LogLevel, message: String) {
    let mut logs = buffer
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    logs.push(LogMessage { level, message });
}

/// The `log` object exposed to scripts.
#[derive(Clone)]
pub struct ScriptLog {
    buffer: LogBuffer,
}

impl ScriptLog {
    fn push(&mut self, level: LogLevel, message: Dynamic) {
        push_log(&self.buffer, level, message.to_string());
    }
}

/// Outcome of one script run
#[derive(Debug, Clone, Default)]
pub struct ScriptResult {
    pub outputs: Vec<Value>,
    pub error: Option<ScriptError>,
    pub traceback: String,
    pub log_messages: Vec<LogMessage>,
}

impl ScriptResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    fn failure(error: ScriptError, traceback: String, log_messages: Vec<LogMessage>) -> Self {
        Self {
            outputs: Vec::new(),
            error: Some(error),
            traceback,
            log_messages,
        }
    }
}

/// Rejects forbidden and reserved identifiers before compiling.
///
/// String literals, character literals and comments are skipped; everything
/// else, including back-tick template strings, is scanned.
pub fn check_restrictions(source: &str) -> Result<(), ScriptError> {
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();
    let mut i = 0;
    let mut line = 1;

    while i < len {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '\n' => {
                line += 1;
                i += 1;
            }
            '/' if next == Some('/') => {
                while i < len && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if next == Some('*') => {
                let mut depth = 1;
                i += 2;
                while i < len && depth > 0 {
                    match (chars[i], chars.get(i + 1).copied()) {
                        ('/', Some('*')) => {
                            depth += 1;
                            i += 2;
                        }
                        ('*', Some('/')) => {
                            depth -= 1;
                            i += 2;
                        }
                        ('\n', _) => {
                            line += 1;
                            i += 1;
                        }
                        _ => i += 1,
                    }
                }
            }
            '"' | '\'' => {
                let quote = c;
                i += 1;
                while i < len {
                    match chars[i] {
                        '\\' => {
                            if chars.get(i + 1) == Some(&'\n') {
                                line += 1;
                            }
                            i += 2;
                        }
                        '\n' => {
                            line += 1;
                            i += 1;
                        }
                        ch if ch == quote => {
                            i += 1;
                            break;
                        }
                        _ => i += 1,
                    }
                }
            }
            c if c.is_ascii_digit() => {
                while i < len && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < len && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                if FORBIDDEN_NAMES.contains(&name.as_str()) {
                    return Err(ScriptError::Compile {
                        message: format!("Use of restricted name \"{}\" is not allowed", name),
                        line: Some(line),
                    });
                }
                if name.ends_with(RESERVED_SUFFIX) {
                    return Err(ScriptError::Compile {
                        message: format!(
                            "\"{}\" is an invalid name because it ends with \"{}\"",
                            name, RESERVED_SUFFIX
                        ),
                        line: Some(line),
                    });
                }
            }
            _ => i += 1,
        }
    }
    Ok(())
}

/// Finds the module name of a rejected import anywhere in an error chain.
fn illegal_import(err: &EvalAltResult) -> Option<String> {
    match err {
        EvalAltResult::ErrorModuleNotFound(name, _) => Some(name.clone()),
        EvalAltResult::ErrorInModule(_, inner, _) => illegal_import(inner),
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => illegal_import(inner),
        _ => None,
    }
}

/// Line numbers referenced by an error, outermost call first.
fn error_lines(err: &EvalAltResult) -> Vec<usize> {
    let mut lines = Vec::new();
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(line) = e.position().line() {
            if !lines.contains(&line) {
                lines.push(line);
            }
        }
        current = match e {
            EvalAltResult::ErrorInModule(_, inner, _) => Some(inner.as_ref()),
            EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => Some(inner.as_ref()),
            _ => None,
        };
    }
    lines
}

fn configure_engine(engine: &mut Engine, settings: &ScriptConfig, logs: &LogBuffer) {
    // Safety limits
    engine.set_max_expr_depths(settings.max_expr_depth, settings.max_expr_depth);
    engine.set_max_call_levels(settings.max_call_levels);
    engine.set_max_operations(settings.max_operations);
    engine.set_max_string_size(settings.max_string_size);
    engine.set_max_array_size(settings.max_array_size);
    engine.set_max_map_size(settings.max_map_size);
    engine.set_max_modules(MAX_MODULES);

    engine.disable_symbol("eval");
    engine.set_module_resolver(SandboxModules::new());

    {
        let logs = logs.clone();
        engine.on_print(move |text| push_log(&logs, LogLevel::Info, text.to_string()));
    }
    {
        let logs = logs.clone();
        engine.on_debug(move |text, _source, _pos| {
            if !text.starts_with(LOG_SENTINEL) {
                push_log(&logs, LogLevel::Debug, text.to_string());
            }
        });
    }

    // `debug` is a reserved word in Rhai; pass it through as a plain name so
    // `log.debug(..)` parses as a method call
    #[allow(deprecated)]
    engine.on_parse_token(|token, _pos, _state| match token {
        Token::Reserved(name) if name.as_str() == "debug" => Token::Identifier(name),
        other => other,
    });

    engine.register_type_with_name::<ScriptLog>("Log");
    // `debug` results are routed through `on_debug`; the sentinel keeps them from
    // being buffered twice
    engine.register_fn("debug", |log: &mut ScriptLog, msg: Dynamic| -> String {
        log.push(LogLevel::Debug, msg);
        LOG_SENTINEL.to_string()
    });
    engine.register_fn("info", |log: &mut ScriptLog, msg: Dynamic| {
        log.push(LogLevel::Info, msg)
    });
    engine.register_fn("warning", |log: &mut ScriptLog, msg: Dynamic| {
        log.push(LogLevel::Warning, msg)
    });
    engine.register_fn("error", |log: &mut ScriptLog, msg: Dynamic| {
        log.push(LogLevel::Error, msg)
    });

    engine.register_fn("append", |list: &mut Array, item: Dynamic| list.push(item));
}

/// Validates, compiles, caches and executes scripts for one worker
pub struct ScriptRunner {
    engine: Engine,
    cache: SharedScriptCache,
    logs: LogBuffer,
    compiles: AtomicU64,
}

impl ScriptRunner {
    pub fn new(settings: &ScriptConfig, cache: SharedScriptCache) -> Self {
        let logs: LogBuffer = Arc::new(Mutex::new(Vec::new()));
        let mut engine = Engine::new();
        configure_engine(&mut engine, settings, &logs);
        Self {
            engine,
            cache,
            logs,
            compiles: AtomicU64::new(0),
        }
    }

    /// Abort running scripts once `stop` is set.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.engine.on_progress(move |_ops| {
            if stop.load(Ordering::Relaxed) {
                Some(Dynamic::from("worker stopping"))
            } else {
                None
            }
        });
        self
    }

    pub fn cache(&self) -> &SharedScriptCache {
        &self.cache
    }

    /// Number of compilations performed, cache hits excluded.
    pub fn compile_count(&self) -> u64 {
        self.compiles.load(Ordering::Relaxed)
    }

    /// Extension point for static analysis; accepts everything.
    pub fn validate(&self, _source: &str) -> bool {
        true
    }

    /// Applies the restriction pass, then compiles.
    pub fn compile(&self, source: &str) -> Result<AST, ScriptError> {
        check_restrictions(source)?;
        self.engine
            .compile(source)
            .map_err(|err| ScriptError::Compile {
                message: err.to_string(),
                line: err.position().line(),
            })
    }

    fn take_logs(&self) -> Vec<LogMessage> {
        let mut logs = self
            .logs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *logs)
    }

    /// Runs `source` with `inputs`, caching the compiled form per `client_id`.
    pub fn run_script(&self, source: &str, inputs: &[Value], client_id: u64) -> ScriptResult {
        let start = Instant::now();
        let hash = hash_source(source);

        let ast = match self.cache.check_cache(&hash, client_id) {
            Some(ast) => {
                tracing::debug!("Using cached pre-compiled script, load took {:?}", start.elapsed());
                ast
            }
            None => {
                tracing::debug!("Validating script");
                if !self.validate(source) {
                    return ScriptResult::failure(ScriptError::Validation, String::new(), Vec::new());
                }
                tracing::debug!("Compiling script");
                match self.compile(source) {
                    Ok(ast) => {
                        self.compiles.fetch_add(1, Ordering::Relaxed);
                        self.cache.insert(hash, client_id, ast.clone());
                        tracing::debug!("Validation and compile took {:?}", start.elapsed());
                        ast
                    }
                    Err(err) => {
                        let traceback = match &err {
                            ScriptError::Compile { line: Some(line), .. } => {
                                create_traceback(source, &[*line])
                            }
                            _ => String::new(),
                        };
                        return ScriptResult::failure(err, traceback, Vec::new());
                    }
                }
            }
        };

        self.take_logs();
        let mut scope = Scope::new();
        let script_inputs: Array = inputs.iter().map(value_to_dynamic).collect();
        scope.push("inputs", script_inputs);
        scope.push("outputs", Array::new());
        scope.push(
            "log",
            ScriptLog {
                buffer: self.logs.clone(),
            },
        );

        tracing::debug!("Executing script");
        match self.engine.run_ast_with_scope(&mut scope, &ast) {
            Ok(()) => {
                let log_messages = self.take_logs();
                match scope.get_value::<Array>("outputs") {
                    Some(outputs) => {
                        tracing::debug!("Script execution success!");
                        ScriptResult {
                            outputs: outputs.iter().map(dynamic_to_value).collect(),
                            error: None,
                            traceback: String::new(),
                            log_messages,
                        }
                    }
                    None => ScriptResult::failure(
                        ScriptError::Runtime {
                            message: "outputs must remain a list".to_string(),
                            line: None,
                        },
                        String::new(),
                        log_messages,
                    ),
                }
            }
            Err(err) => {
                tracing::debug!("Script execution failed: {}", err);
                let log_messages = self.take_logs();
                let traceback = create_traceback(source, &error_lines(&err));
                let error = match illegal_import(&err) {
                    Some(module) => ScriptError::IllegalImport(module),
                    None => ScriptError::Runtime {
                        message: err.to_string(),
                        line: err.position().line(),
                    },
                };
                ScriptResult::failure(error, traceback, log_messages)
            }
        }
    }
}

impl std::fmt::Debug for ScriptRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRunner")
            .field("cache", &self.cache)
            .field("compiles", &self.compile_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::ScriptCache;
    use std::time::Duration;

    fn runner() -> ScriptRunner {
        ScriptRunner::new(
            &ScriptConfig::default(),
            ScriptCache::shared(Duration::from_secs(10)),
        )
    }

    #[test]
    fn test_doubles_input() {
        let result = runner().run_script("outputs.append(inputs[0] * 2);", &[Value::Int(21)], 1);
        assert!(result.is_ok(), "{:?}", result.error);
        assert_eq!(result.outputs, vec![Value::Int(42)]);
    }

    #[test]
    fn test_push_and_multiple_outputs() {
        let script = "outputs.push(inputs[0] + inputs[1]);\noutputs.push(`${inputs[0]}`);";
        let result = runner().run_script(script, &[Value::Int(1), Value::Float(0.5)], 1);
        assert_eq!(
            result.outputs,
            vec![Value::Float(1.5), Value::String("1".into())]
        );
    }

    #[test]
    fn test_log_messages_are_buffered_in_order() {
        let script = r#"
            log.info("first");
            print("second");
            log.warning("third");
            log.error(42);
        "#;
        let result = runner().run_script(script, &[], 1);
        assert!(result.is_ok());
        let messages: Vec<_> = result
            .log_messages
            .iter()
            .map(|m| (m.level, m.message.as_str()))
            .collect();
        assert_eq!(
            messages,
            vec![
                (LogLevel::Info, "first"),
                (LogLevel::Info, "second"),
                (LogLevel::Warning, "third"),
                (LogLevel::Error, "42"),
            ]
        );
    }

    #[test]
    fn test_log_object_levels() {
        let script = r#"
            log.debug("dbg");
            log.info("inf");
            log.warning("wrn");
            log.error("err");
            outputs.push(1);
        "#;
        let result = runner().run_script(script, &[], 1);
        assert!(result.is_ok(), "{:?}", result.error);
        assert_eq!(
            result.log_messages,
            vec![
                LogMessage { level: LogLevel::Debug, message: "dbg".into() },
                LogMessage { level: LogLevel::Info, message: "inf".into() },
                LogMessage { level: LogLevel::Warning, message: "wrn".into() },
                LogMessage { level: LogLevel::Error, message: "err".into() },
            ]
        );
        assert_eq!(result.outputs, vec![Value::Int(1)]);
    }

    #[test]
    fn test_illegal_import() {
        let result = runner().run_script("import \"os\" as os;\noutputs.push(1);", &[], 1);
        match &result.error {
            Some(ScriptError::IllegalImport(name)) => assert_eq!(name, "os"),
            other => panic!("expected illegal import, got {:?}", other),
        }
        assert!(result.error.unwrap().to_string().contains("IllegalImportError"));
        assert!(result.outputs.is_empty());
    }

    #[test]
    fn test_allowed_import() {
        let script = "import \"math\" as math;\noutputs.push(math::sqrt(inputs[0]));";
        let result = runner().run_script(script, &[Value::Float(9.0)], 1);
        assert_eq!(result.outputs, vec![Value::Float(3.0)]);
    }

    #[test]
    fn test_compile_error_has_traceback() {
        let result = runner().run_script("let x = ;\n", &[], 1);
        match &result.error {
            Some(ScriptError::Compile { line, .. }) => assert_eq!(*line, Some(1)),
            other => panic!("expected compile error, got {:?}", other),
        }
        assert!(result.traceback.contains("->1: let x = ;"));
    }

    #[test]
    fn test_runtime_error_traceback_points_at_line() {
        let script = "let a = 1;\nlet b = a + undefined_var;\noutputs.push(b);";
        let result = runner().run_script(script, &[], 1);
        assert!(matches!(result.error, Some(ScriptError::Runtime { .. })));
        assert!(result
            .error
            .as_ref()
            .unwrap()
            .to_string()
            .starts_with("Exception while running script: "));
        assert!(result.traceback.contains("->2: let b = a + undefined_var;"));
    }

    #[test]
    fn test_forbidden_names_rejected() {
        assert!(check_restrictions("let f = Fn(\"x\");").is_err());
        assert!(check_restrictions("eval(\"1\")").is_err());
        assert!(check_restrictions("let secret__ = 1;").is_err());
        // names inside strings and comments are fine
        assert!(check_restrictions("let s = \"eval\"; // call me\n/* Fn */ let t = 1;").is_ok());
        assert!(check_restrictions("let evaluate = 1e5;").is_ok());
    }

    #[test]
    fn test_forbidden_name_reports_line() {
        let err = check_restrictions("let a = 1;\n\nlet b = curry;").unwrap_err();
        assert_eq!(
            err,
            ScriptError::Compile {
                message: "Use of restricted name \"curry\" is not allowed".to_string(),
                line: Some(3),
            }
        );
    }

    #[test]
    fn test_cache_hit_skips_compile() {
        let runner = runner();
        let script = "outputs.push(1);";
        runner.run_script(script, &[], 5);
        runner.run_script(script, &[], 5);
        assert_eq!(runner.compile_count(), 1);
        runner.run_script("outputs.push(2);", &[], 5);
        assert_eq!(runner.compile_count(), 2);
        assert_eq!(runner.cache().len(), 1);
    }

    #[test]
    fn test_expired_entry_is_recompiled() {
        let runner = ScriptRunner::new(
            &ScriptConfig::default(),
            ScriptCache::shared(Duration::from_millis(20)),
        );
        let script = "outputs.push(inputs[0]);";
        runner.run_script(script, &[Value::Int(1)], 3);
        runner.run_script(script, &[Value::Int(2)], 3);
        assert_eq!(runner.compile_count(), 1);

        std::thread::sleep(Duration::from_millis(60));
        let result = runner.run_script(script, &[Value::Int(3)], 3);
        assert_eq!(result.outputs, vec![Value::Int(3)]);
        assert_eq!(runner.compile_count(), 2);
        assert_eq!(runner.cache().len(), 1);
    }

    #[test]
    fn test_operation_limit() {
        let settings = ScriptConfig {
            max_operations: 1_000,
            ..ScriptConfig::default()
        };
        let runner = ScriptRunner::new(&settings, ScriptCache::shared(Duration::from_secs(10)));
        let result = runner.run_script("loop { }", &[], 1);
        assert!(matches!(result.error, Some(ScriptError::Runtime { .. })));
    }

    #[test]
    fn test_stop_flag_terminates_script() {
        let stop = Arc::new(AtomicBool::new(true));
        let runner = runner().with_stop_flag(stop);
        let result = runner.run_script("let x = 0; x += 1;", &[], 1);
        assert!(!result.is_ok());
    }
}
