//! Workspace documents on disk.
//!
//! One pretty-printed JSON document per workspace with top-level keys
//! `config`, `sheets`, `function_sheets` and `view_bookmarks`. The first two
//! are required; the others default to empty.

use super::{ViewBookmark, Workspace, WorkspaceConfig};
use crate::error::{EngineError, Result, ResultExt};
use crate::sheet::{Sheet, SheetRecord};
use crate::types::SheetVariant;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level keys a document must carry
pub const REQUIRED_KEYS: [&str; 2] = ["config", "sheets"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceDocument {
    pub config: WorkspaceConfig,
    pub sheets: Vec<SheetRecord>,
    #[serde(default)]
    pub function_sheets: Vec<SheetRecord>,
    #[serde(default)]
    pub view_bookmarks: Vec<ViewBookmark>,
}

/// Largest ID of each class found in a document.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub(crate) struct MaxIds {
    pub sheets: Option<u64>,
    pub nodes: Option<u64>,
    pub links: Option<u64>,
    pub pins: Option<u64>,
}

fn bump(slot: &mut Option<u64>, id: u64, valid: bool) {
    if valid {
        *slot = Some(slot.map_or(id, |max| max.max(id)));
    }
}

impl WorkspaceDocument {
    /// Parses a document, checking the required keys first.
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: serde_json::Value = serde_json::from_str(text)?;
        let Some(object) = raw.as_object() else {
            return Err(EngineError::Workspace("Document is not a JSON object".into()));
        };
        if let Some(key) = REQUIRED_KEYS.iter().find(|key| !object.contains_key(**key)) {
            return Err(EngineError::Workspace(format!("Missing key '{}'", key)));
        }
        Ok(serde_json::from_value(raw)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub(crate) fn max_ids(&self) -> MaxIds {
        let mut max = MaxIds::default();
        for sheet in self.sheets.iter().chain(self.function_sheets.iter()) {
            bump(&mut max.sheets, sheet.id.raw(), sheet.id.is_valid());
            for node in &sheet.nodes {
                bump(&mut max.nodes, node.id.raw(), node.id.is_valid());
                for pin in node.inputs.iter().chain(node.outputs.iter()) {
                    bump(&mut max.pins, pin.id.raw(), pin.id.is_valid());
                }
            }
            for link in &sheet.links {
                bump(&mut max.links, link.id.raw(), link.id.is_valid());
                bump(&mut max.pins, link.input_id.raw(), link.input_id.is_valid());
                bump(&mut max.pins, link.output_id.raw(), link.output_id.is_valid());
            }
        }
        max
    }
}

impl Workspace {
    pub fn to_document(&self) -> WorkspaceDocument {
        WorkspaceDocument {
            config: self.config.clone(),
            sheets: self.sheets.iter().map(Sheet::to_record).collect(),
            function_sheets: self.function_sheets.iter().map(Sheet::to_record).collect(),
            view_bookmarks: self.view_bookmarks.clone(),
        }
    }

    /// Rebuilds a workspace, with its allocators above every loaded ID.
    pub fn from_document(document: &WorkspaceDocument) -> Result<Self> {
        let mut workspace = Self::empty();
        workspace.config = document.config.clone();
        workspace.rebase_ids(document);

        for record in &document.sheets {
            let sheet = Sheet::from_record(record, SheetVariant::Sheet, &mut workspace.ids)?;
            workspace.sheets.push(sheet);
        }
        for record in &document.function_sheets {
            let sheet = Sheet::from_record(record, SheetVariant::Function, &mut workspace.ids)?;
            workspace.function_sheets.push(sheet);
        }
        workspace.view_bookmarks = document.view_bookmarks.clone();
        workspace.sync_function_nodes();
        Ok(workspace)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = self.to_document().to_json()?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write workspace {:?}", path))?;
        tracing::info!("Saved workspace \"{}\" to {:?}", self.config.name, path);
        Ok(())
    }

    /// Replaces this workspace with the one stored at `path`.
    ///
    /// The workspace is cleared first and stays empty if loading fails.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.clear();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workspace {:?}", path))?;
        let document = WorkspaceDocument::from_json(&content)?;
        *self = Self::from_document(&document)?;
        tracing::info!(
            "Loaded workspace \"{}\" with {} sheets and {} function sheets",
            self.config.name,
            self.sheets.len(),
            self.function_sheets.len()
        );
        Ok(())
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut workspace = Self::empty();
        workspace.load(path)?;
        Ok(workspace)
    }
}
