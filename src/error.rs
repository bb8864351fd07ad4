//! Error handling for the Althea engine
//!
//! This module defines the crate-level error type and a Result alias used
//! by the workspace, configuration and backend layers. Graph errors live in
//! [`crate::sheet::SheetError`], script errors in
//! [`crate::scripting::ScriptError`].

use crate::scripting::ScriptError;
use crate::sheet::SheetError;
use thiserror::Error;

/// Main error type for Althea engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Errors raised while building or processing a sheet
    #[error("Sheet error: {0}")]
    Sheet(#[from] SheetError),

    /// Errors raised by the script sandbox
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to the worker pool
    #[error("Backend error: {0}")]
    Backend(String),

    /// Errors related to workspace documents
    #[error("Workspace error: {0}")]
    Workspace(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        EngineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

/// Result type alias for Althea engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<EngineError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
