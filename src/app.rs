//! Application shell
//!
//! [`App`] ties the configuration, the worker backend and the open
//! workspace together. Front ends call [`App::tick`] periodically; it
//! absorbs late job results, applies pending backend restarts and runs the
//! auto-recalculation of top-level sheets.

use crate::backend::{Backend, CalcBackend};
use crate::config::{AppConfig, WORKSPACE_FILE_EXTENSION};
use crate::error::Result;
use crate::id::{IdProviders, SheetId};
use crate::sheet::{PassReport, Sheet};
use crate::workspace::Workspace;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Quiet period before worker count or mode changes restart the backend
pub const RESTART_DEBOUNCE: Duration = Duration::from_secs(1);

pub struct App {
    config: AppConfig,
    backend: Backend,
    workspace: Workspace,
    workspace_path: Option<PathBuf>,
    status: String,
    unsaved_changes: bool,
    /// Time of the last config change that needs a backend restart
    pending_restart: Option<Instant>,
}

impl App {
    /// Wraps an existing backend; it is not started or stopped here.
    pub fn new(config: AppConfig, backend: Backend) -> Self {
        let mut app = Self {
            config,
            backend,
            workspace: Workspace::new(),
            workspace_path: None,
            status: String::new(),
            unsaved_changes: false,
            pending_restart: None,
        };
        app.set_status("Ready");
        app
    }

    /// Starts a backend sized by `config`.
    pub fn start(mut config: AppConfig) -> Result<Self> {
        config.validate();
        let backend = Backend::from_config(&config)?;
        Ok(Self::new(config, backend))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn workspace_path(&self) -> Option<&Path> {
        self.workspace_path.as_deref()
    }

    /// Status line, prefixed with the local time it was set.
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved_changes
    }

    pub fn set_status(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::info!("{}", message);
        self.status = format!("[{}] {}", chrono::Local::now().format("%H:%M:%S"), message);
    }

    /// Replaces the configuration.
    ///
    /// Worker count or mode changes are applied by [`App::tick`] once the
    /// config has been stable for [`RESTART_DEBOUNCE`].
    pub fn update_config(&mut self, mut config: AppConfig, now: Instant) {
        config.validate();
        if self.config.needs_backend_restart(&config) {
            self.pending_restart = Some(now);
        }
        self.config = config;
    }

    pub fn restart_pending(&self) -> bool {
        self.pending_restart.is_some()
    }

    fn apply_pending_restart(&mut self, now: Instant) {
        let Some(changed_at) = self.pending_restart else {
            return;
        };
        if now.saturating_duration_since(changed_at) < RESTART_DEBOUNCE {
            return;
        }
        self.pending_restart = None;
        match self.backend.restart(self.config.num_workers, self.config.worker_mode) {
            Ok(()) => self.set_status(format!(
                "Restarted backend with {} {} workers",
                self.config.num_workers, self.config.worker_mode
            )),
            Err(err) => {
                tracing::error!("Failed to restart backend: {}", err);
                self.set_status(format!("Failed to restart backend: {}", err));
            }
        }
    }

    /// One step of the event loop.
    pub fn tick(&mut self, now: Instant) -> Vec<(SheetId, PassReport)> {
        self.backend.check();
        self.apply_pending_restart(now);
        if !self.config.auto_recalc {
            return Vec::new();
        }
        let reports = self.workspace.recalc_auto(&mut self.backend, &self.config, now);
        self.report_passes(&reports);
        reports
    }

    fn report_passes(&mut self, reports: &[(SheetId, PassReport)]) {
        if let Some((sheet, report)) = reports.iter().find(|(_, report)| !report.is_success()) {
            self.set_status(format!("Sheet {}: {}", sheet, report.message));
        }
    }

    /// Full pass over one sheet.
    pub fn recalc_sheet(&mut self, id: SheetId) -> Result<PassReport> {
        self.workspace.sync_function_nodes();
        let backend: &mut dyn CalcBackend = &mut self.backend;
        let report = self.workspace.recalc_sheet(id, backend, &self.config)?;
        self.set_status(report.message.clone());
        Ok(report)
    }

    /// Full pass over every top-level sheet.
    pub fn recalc_all(&mut self) -> Vec<(SheetId, PassReport)> {
        self.workspace.sync_function_nodes();
        let reports = self.workspace.recalc_all(&mut self.backend, &self.config);
        match reports.iter().find(|(_, report)| !report.is_success()) {
            Some(_) => self.report_passes(&reports),
            None => self.set_status(format!("Recalculated {} sheets", reports.len())),
        }
        reports
    }

    /// Edits a sheet and flags the workspace as modified.
    pub fn edit_sheet<T>(
        &mut self,
        id: SheetId,
        edit: impl FnOnce(&mut Sheet, &mut IdProviders) -> T,
    ) -> Option<T> {
        let out = self.workspace.edit_sheet(id, edit)?;
        self.unsaved_changes = true;
        self.workspace.sync_function_nodes();
        Some(out)
    }

    /// Mutable access to the workspace; flags it as modified.
    pub fn workspace_mut(&mut self) -> &mut Workspace {
        self.unsaved_changes = true;
        &mut self.workspace
    }

    pub fn new_workspace(&mut self) {
        self.workspace.reset_to_default();
        self.workspace_path = None;
        self.unsaved_changes = false;
        self.set_status("Created new workspace");
    }

    /// Loads a workspace; on failure the cleared workspace stays open.
    pub fn open_workspace(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.workspace_path = None;
        self.unsaved_changes = false;
        match self.workspace.load(path) {
            Ok(()) => {
                self.workspace_path = Some(path.to_path_buf());
                self.set_status(format!("Opened {}", path.display()));
                Ok(())
            }
            Err(err) => {
                tracing::error!("Failed to load workspace {:?}: {}", path, err);
                self.set_status(format!("Failed to load workspace: {}", err));
                Err(err)
            }
        }
    }

    /// Path used by [`App::save_workspace`] when none is set yet.
    pub fn default_workspace_path(&self) -> PathBuf {
        let name: String = self
            .workspace
            .config
            .name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.config
            .default_workspaces_folder
            .join(format!("{}.{}", name, WORKSPACE_FILE_EXTENSION))
    }

    pub fn save_workspace(&mut self) -> Result<PathBuf> {
        let path = self
            .workspace_path
            .clone()
            .unwrap_or_else(|| self.default_workspace_path());
        self.save_workspace_as(&path)?;
        Ok(path)
    }

    /// Saves and adopts `path`; a failure leaves the unsaved flag as it was.
    pub fn save_workspace_as(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Err(err) = self.workspace.save(path) {
            tracing::error!("Failed to save workspace {:?}: {}", path, err);
            self.set_status(format!("Failed to save workspace: {}", err));
            return Err(err);
        }
        self.workspace_path = Some(path.to_path_buf());
        self.unsaved_changes = false;
        self.set_status(format!("Saved {}", path.display()));
        Ok(())
    }

    /// Stops the workers. Unsaved changes are reported, not written.
    pub fn shutdown(&mut self) {
        if self.unsaved_changes {
            tracing::warn!(
                "Workspace \"{}\" has unsaved changes",
                self.workspace.config.name
            );
        }
        self.backend.stop();
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("backend", &self.backend)
            .field("workspace", &self.workspace.config.name)
            .field("status", &self.status)
            .field("unsaved_changes", &self.unsaved_changes)
            .finish()
    }
}
