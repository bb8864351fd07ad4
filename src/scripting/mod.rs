//! Script sandbox for Script nodes
//!
//! Scripts are written in Rhai and run in a restricted engine:
//!
//! - `inputs` - list of the node's input values, in pin order
//! - `outputs` - list the script pushes (or `append`s) its results to, in pin order
//! - `log.debug(msg)`, `log.info(msg)`, `log.warning(msg)`, `log.error(msg)` -
//!   buffered and replayed by the control side with a `Job-{id}: ` prefix;
//!   `print` is buffered as info
//! - `import "math" as math;` - only the modules in [`SAFE_SCRIPT_MODULES`]
//!   can be imported, anything else fails with an illegal-import error
//!
//! Compiled scripts are cached per client (node) in a [`ScriptCache`]. The
//! cache is shared by the thread workers of one process; process workers
//! keep their own.
//!
//! ## Example Scripts
//!
//! Doubling the first input:
//! ```rhai
//! outputs.append(inputs[0] * 2);
//! ```
//!
//! Using an allowed module:
//! ```rhai
//! import "math" as math;
//! outputs.push(math::round(math::sqrt(inputs[0]), 3));
//! log.info(`computed root of ${inputs[0]}`);
//! ```

mod cache;
mod convert;
mod engine;
mod modules;
mod traceback;

pub use cache::{hash_source, ScriptCache, SharedScriptCache};
pub use convert::{dynamic_to_value, value_to_dynamic};
pub use engine::{check_restrictions, ScriptLog, ScriptResult, ScriptRunner, FORBIDDEN_NAMES};
pub use modules::{SandboxModules, SAFE_SCRIPT_MODULES};
pub(crate) use modules::{read_csv, CsvRecords};
pub use traceback::{create_traceback, TRACEBACK_CONTEXT_LINES};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by the script sandbox
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("Failed to validate script")]
    Validation,

    #[error("Failed to compile script: {message}")]
    Compile { message: String, line: Option<usize> },

    #[error("Exception while running script: IllegalImportError: import of module '{0}' is not allowed")]
    IllegalImport(String),

    #[error("Exception while running script: {message}")]
    Runtime { message: String, line: Option<usize> },
}

/// Severity of a buffered script log message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// A log line captured inside a job, replayed on the control side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: LogLevel,
    pub message: String,
}

impl LogMessage {
    /// Emit this message through `tracing`, prefixed with the job ID.
    pub fn replay(&self, job_id: u64) {
        match self.level {
            LogLevel::Debug => tracing::debug!("Job-{}: {}", job_id, self.message),
            LogLevel::Info => tracing::info!("Job-{}: {}", job_id, self.message),
            LogLevel::Warning => tracing::warn!("Job-{}: {}", job_id, self.message),
            LogLevel::Error => tracing::error!("Job-{}: {}", job_id, self.message),
        }
    }
}
