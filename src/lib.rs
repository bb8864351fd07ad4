//! # Althea: dependency-driven node-graph calculation engine
//!
//! Users build calculations as graphs of nodes on sheets. Each node takes
//! input values, runs an operation and produces outputs that flow along
//! links into downstream nodes. Changes propagate through the graph in
//! dependency order.
//!
//! ## Architecture
//!
//! - **Sheets**: graphs of nodes and links, resolved into generations of
//!   independent nodes and processed one generation at a time
//! - **Backend**: a pool of thread or process workers executing node jobs,
//!   polled by the control thread through [`CalcBackend`]
//! - **Scripting**: Rhai-based Script nodes running in a restricted sandbox
//!   with a shared compile cache
//! - **Workspace**: the sheets and function sheets edited together, saved
//!   as one JSON document
//!
//! ## Configuration
//!
//! [`AppConfig`] is stored in the platform config directory under `althea`:
//!
//! - **Linux**: `~/.config/althea/config.toml`
//! - **macOS**: `~/Library/Application Support/althea/config.toml`
//! - **Windows**: `%APPDATA%\althea\config.toml`
//!
//! ## Example
//!
//! ```ignore
//! use althea_engine::{App, AppConfig};
//!
//! let mut app = App::start(AppConfig::default())?;
//! app.open_workspace("flows/budget.json")?;
//! for (sheet, report) in app.recalc_all() {
//!     println!("{}: {}", sheet, report.message);
//! }
//! app.shutdown();
//! ```

pub mod app;
pub mod backend;
pub mod config;
pub mod error;
pub mod id;
pub mod nodes;
pub mod scripting;
pub mod sheet;
pub mod types;
pub mod workspace;

// Re-export commonly used types
pub use app::App;
pub use backend::{Backend, CalcBackend, InlineBackend};
pub use config::AppConfig;
pub use error::{EngineError, Result};
pub use sheet::Sheet;
pub use workspace::Workspace;
