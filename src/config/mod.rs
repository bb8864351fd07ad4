//! Configuration module for the Althea engine
//!
//! [`AppConfig`] is the engine-facing configuration surface: worker pool
//! sizing, calculation timeouts, auto-recalc timing, debug logging toggles
//! and script sandbox limits.
//!
//! # Files
//!
//! Configs are stored as TOML when the path ends in `.toml` and as JSON
//! otherwise. The default location is `<config dir>/althea/config.toml`:
//! - **Linux**: `~/.config/althea/config.toml`
//! - **macOS**: `~/Library/Application Support/althea/config.toml`
//! - **Windows**: `%APPDATA%\althea\config.toml`
//!
//! # Example
//!
//! ```ignore
//! use althea_engine::config::AppConfig;
//!
//! let mut config = AppConfig::load_or_default(AppConfig::default_path().unwrap());
//! config.num_workers = 8;
//! config.save("althea.toml")?;
//! ```

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for config and data directories
pub const APP_ID: &str = "althea";

/// Default config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Workspace file extension
pub const WORKSPACE_FILE_EXTENSION: &str = "json";

/// Allowed range for the worker pool size
pub const WORKER_RANGE: (usize, usize) = (1, 512);

/// Allowed range for the auto-recalc interval, in milliseconds
pub const AUTO_RECALC_RANGE_MS: (u64, u64) = (50, 5000);

/// Get the platform-appropriate config directory for Althea
pub fn app_config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

// ==================== Worker Mode ====================

/// Isolation mode for calculation workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkerMode {
    /// Workers run as threads inside this process
    #[default]
    Thread,
    /// Workers run as child processes of this executable
    Process,
}

impl WorkerMode {
    pub fn uses_processes(self) -> bool {
        self == WorkerMode::Process
    }
}

impl std::fmt::Display for WorkerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerMode::Thread => write!(f, "thread"),
            WorkerMode::Process => write!(f, "process"),
        }
    }
}

// ==================== Script Sandbox ====================

/// Limits applied to every script engine instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Seconds a compiled script stays in the cache
    #[serde(default = "default_cache_max_age_secs")]
    pub cache_max_age_secs: f64,
    /// Maximum number of operations a single script run may perform
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,
    #[serde(default = "default_max_call_levels")]
    pub max_call_levels: usize,
    #[serde(default = "default_max_expr_depth")]
    pub max_expr_depth: usize,
    #[serde(default = "default_max_string_size")]
    pub max_string_size: usize,
    #[serde(default = "default_max_array_size")]
    pub max_array_size: usize,
    #[serde(default = "default_max_map_size")]
    pub max_map_size: usize,
}

fn default_cache_max_age_secs() -> f64 {
    10.0
}

fn default_max_operations() -> u64 {
    1_000_000
}

fn default_max_call_levels() -> usize {
    32
}

fn default_max_expr_depth() -> usize {
    64
}

fn default_max_string_size() -> usize {
    1_000_000
}

fn default_max_array_size() -> usize {
    100_000
}

fn default_max_map_size() -> usize {
    10_000
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            cache_max_age_secs: default_cache_max_age_secs(),
            max_operations: default_max_operations(),
            max_call_levels: default_max_call_levels(),
            max_expr_depth: default_max_expr_depth(),
            max_string_size: default_max_string_size(),
            max_array_size: default_max_array_size(),
            max_map_size: default_max_map_size(),
        }
    }
}

/// Upper bound for timeouts and cache ages, in seconds
pub const MAX_DURATION_SECS: f64 = 86_400.0;

/// Converts a configured number of seconds, never panicking on NaN or huge values.
fn secs_to_duration(secs: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_DURATION_SECS))
        .unwrap_or_else(|_| Duration::from_secs_f64(fallback))
}

/// Resets non-finite or negative seconds to `default` and caps the rest.
fn checked_secs(name: &str, value: f64, allow_zero: bool, default: f64) -> f64 {
    let too_small = if allow_zero { value < 0.0 } else { value <= 0.0 };
    if !value.is_finite() || too_small {
        tracing::warn!("{} {} is invalid, using {}", name, value, default);
        default
    } else if value > MAX_DURATION_SECS {
        tracing::warn!("{} {} out of range, using {}", name, value, MAX_DURATION_SECS);
        MAX_DURATION_SECS
    } else {
        value
    }
}

impl ScriptConfig {
    pub fn cache_max_age(&self) -> Duration {
        secs_to_duration(self.cache_max_age_secs, default_cache_max_age_secs())
    }

    pub fn validate(&mut self) {
        self.cache_max_age_secs = checked_secs(
            "script.cache_max_age_secs",
            self.cache_max_age_secs,
            true,
            default_cache_max_age_secs(),
        );
    }
}

// ==================== App Config ====================

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Folder offered by default when saving workspaces
    #[serde(default = "default_workspaces_folder")]
    pub default_workspaces_folder: PathBuf,

    /// Automatically recalculate changed nodes on top-level sheets
    #[serde(default = "default_true")]
    pub auto_recalc: bool,
    /// Interval between auto-recalc checks
    #[serde(default = "default_auto_recalc_interval_ms")]
    pub auto_recalc_interval_ms: u64,
    /// Log a line for every auto-recalc pass
    #[serde(default)]
    pub auto_recalc_log: bool,

    /// Log dependency maps and resolved generations before each pass
    #[serde(default)]
    pub log_dependency_graphs: bool,
    /// Log the full traceback of failed calculation jobs
    #[serde(default)]
    pub log_error_tracebacks: bool,

    /// Number of calculation workers
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    /// Thread or process isolation for workers
    #[serde(default)]
    pub worker_mode: WorkerMode,
    /// Seconds to wait for a single node's job before marking it TimedOut
    #[serde(default = "default_calc_timeout_secs")]
    pub calc_timeout_secs: f64,
    /// Sleep between result polls while waiting on a generation
    #[serde(default = "default_calc_check_delay_ms")]
    pub calc_check_delay_ms: u64,

    /// Maximum nesting of Function sheets calling Function sheets
    #[serde(default = "default_max_function_depth")]
    pub max_function_depth: usize,

    #[serde(default)]
    pub script: ScriptConfig,
}

fn default_workspaces_folder() -> PathBuf {
    dirs_next::document_dir()
        .or_else(dirs_next::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Althea")
}

fn default_true() -> bool {
    true
}

fn default_auto_recalc_interval_ms() -> u64 {
    100
}

fn default_num_workers() -> usize {
    4
}

fn default_calc_timeout_secs() -> f64 {
    30.0
}

fn default_calc_check_delay_ms() -> u64 {
    1
}

fn default_max_function_depth() -> usize {
    16
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_workspaces_folder: default_workspaces_folder(),
            auto_recalc: true,
            auto_recalc_interval_ms: default_auto_recalc_interval_ms(),
            auto_recalc_log: false,
            log_dependency_graphs: false,
            log_error_tracebacks: false,
            num_workers: default_num_workers(),
            worker_mode: WorkerMode::default(),
            calc_timeout_secs: default_calc_timeout_secs(),
            calc_check_delay_ms: default_calc_check_delay_ms(),
            max_function_depth: default_max_function_depth(),
            script: ScriptConfig::default(),
        }
    }
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        app_config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    pub fn calc_timeout(&self) -> Duration {
        secs_to_duration(self.calc_timeout_secs, default_calc_timeout_secs())
    }

    pub fn calc_check_delay(&self) -> Duration {
        Duration::from_millis(self.calc_check_delay_ms)
    }

    pub fn auto_recalc_interval(&self) -> Duration {
        Duration::from_millis(self.auto_recalc_interval_ms)
    }

    /// Clamp out-of-range values, logging each correction.
    pub fn validate(&mut self) {
        let (min_w, max_w) = WORKER_RANGE;
        if !(min_w..=max_w).contains(&self.num_workers) {
            let clamped = self.num_workers.clamp(min_w, max_w);
            tracing::warn!(
                "num_workers {} out of range, using {}",
                self.num_workers,
                clamped
            );
            self.num_workers = clamped;
        }

        let (min_i, max_i) = AUTO_RECALC_RANGE_MS;
        if !(min_i..=max_i).contains(&self.auto_recalc_interval_ms) {
            let clamped = self.auto_recalc_interval_ms.clamp(min_i, max_i);
            tracing::warn!(
                "auto_recalc_interval_ms {} out of range, using {}",
                self.auto_recalc_interval_ms,
                clamped
            );
            self.auto_recalc_interval_ms = clamped;
        }

        self.calc_timeout_secs = checked_secs(
            "calc_timeout_secs",
            self.calc_timeout_secs,
            false,
            default_calc_timeout_secs(),
        );
        self.script.validate();

        if self.max_function_depth == 0 {
            tracing::warn!("max_function_depth must be at least 1");
            self.max_function_depth = 1;
        }
    }

    /// Load a config file, TOML or JSON depending on its extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let mut config: AppConfig = if is_toml(path) {
            toml::from_str(&content).map_err(|e| {
                EngineError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| {
                EngineError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        };
        config.validate();
        Ok(config)
    }

    /// Load a config file, returning defaults if any error occurs
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the config, TOML or JSON depending on the extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    EngineError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = if is_toml(path) {
            toml::to_string_pretty(self)
                .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?
        } else {
            serde_json::to_string_pretty(self)
                .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?
        };

        std::fs::write(path, content)
            .map_err(|e| EngineError::Config(format!("Failed to write config {:?}: {}", path, e)))
    }

    /// Whether changing from `self` to `other` requires a backend restart
    pub fn needs_backend_restart(&self, other: &AppConfig) -> bool {
        self.num_workers != other.num_workers || self.worker_mode != other.worker_mode
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false)
}
