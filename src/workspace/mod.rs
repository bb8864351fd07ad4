//! Workspaces: the set of sheets and function sheets edited together
//!
//! A [`Workspace`] owns the top-level sheets, the function sheets they can
//! call, the view bookmarks and the ID allocators every new object draws
//! from. Persistence lives in [`persist`].

mod persist;

pub use persist::{WorkspaceDocument, REQUIRED_KEYS};

use crate::backend::CalcBackend;
use crate::config::AppConfig;
use crate::id::{IdProviders, NodeId, SheetId};
use crate::nodes::{PinInfo, SpecialRole, FUNCTION_INPUTS_CLASS, FUNCTION_OUTPUTS_CLASS};
use crate::sheet::{CalcContext, FunctionLibrary, PassReport, Sheet, SheetError};
use crate::types::{PinDirection, SheetVariant, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

/// Name given to fresh workspaces
pub const DEFAULT_WORKSPACE_NAME: &str = "Untitled Workspace";

/// Workspace-level settings persisted under `config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub name: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_WORKSPACE_NAME.to_string(),
        }
    }
}

/// A saved view of a sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewBookmark {
    pub variant: SheetVariant,
    pub sheet_id: SheetId,
    #[serde(default)]
    pub selected_nodes: Vec<NodeId>,
    #[serde(default)]
    pub label: String,
}

/// Signature of a function sheet: (inputs, outputs) pin layouts.
type FunctionSignature = (Vec<PinInfo>, Vec<PinInfo>);

#[derive(Debug, Clone)]
pub struct Workspace {
    pub config: WorkspaceConfig,
    sheets: Vec<Sheet>,
    function_sheets: Vec<Sheet>,
    pub view_bookmarks: Vec<ViewBookmark>,
    ids: IdProviders,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Workspace {
    /// One empty sheet and one empty function sheet.
    pub fn new() -> Self {
        let mut workspace = Self::empty();
        workspace.reset_to_default();
        workspace
    }

    /// A workspace without any sheets.
    pub fn empty() -> Self {
        Self {
            config: WorkspaceConfig::default(),
            sheets: Vec::new(),
            function_sheets: Vec::new(),
            view_bookmarks: Vec::new(),
            ids: IdProviders::new(),
        }
    }

    /// Drops everything and resets the ID allocators.
    pub fn clear(&mut self) {
        *self = Self::empty();
    }

    pub fn reset_to_default(&mut self) {
        self.clear();
        self.new_sheet(SheetVariant::Sheet, None);
        self.new_sheet(SheetVariant::Function, None);
    }

    pub fn ids(&self) -> &IdProviders {
        &self.ids
    }

    pub fn ids_mut(&mut self) -> &mut IdProviders {
        &mut self.ids
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    pub fn function_sheets(&self) -> &[Sheet] {
        &self.function_sheets
    }

    pub fn sheets_of(&self, variant: SheetVariant) -> &[Sheet] {
        match variant {
            SheetVariant::Sheet => &self.sheets,
            SheetVariant::Function => &self.function_sheets,
        }
    }

    fn sheets_of_mut(&mut self, variant: SheetVariant) -> &mut Vec<Sheet> {
        match variant {
            SheetVariant::Sheet => &mut self.sheets,
            SheetVariant::Function => &mut self.function_sheets,
        }
    }

    pub fn find_sheet(&self, id: SheetId) -> Option<&Sheet> {
        self.sheets
            .iter()
            .chain(self.function_sheets.iter())
            .find(|sheet| sheet.id == id)
    }

    pub fn find_sheet_mut(&mut self, id: SheetId) -> Option<&mut Sheet> {
        self.sheets
            .iter_mut()
            .chain(self.function_sheets.iter_mut())
            .find(|sheet| sheet.id == id)
    }

    /// Edits a sheet together with the allocators new objects need.
    pub fn edit_sheet<T>(
        &mut self,
        id: SheetId,
        edit: impl FnOnce(&mut Sheet, &mut IdProviders) -> T,
    ) -> Option<T> {
        let sheet = self
            .sheets
            .iter_mut()
            .chain(self.function_sheets.iter_mut())
            .find(|sheet| sheet.id == id)?;
        Some(edit(sheet, &mut self.ids))
    }

    pub fn is_sheet_name_taken(&self, name: &str) -> bool {
        self.sheets
            .iter()
            .chain(self.function_sheets.iter())
            .any(|sheet| sheet.name() == name)
    }

    /// First free `Untitled {variant} {n}` name.
    pub fn default_sheet_name(&self, variant: SheetVariant) -> String {
        (1..)
            .map(|n| format!("Untitled {} {}", variant, n))
            .find(|name| !self.is_sheet_name_taken(name))
            .unwrap_or_default()
    }

    /// Adds a sheet; function sheets get their marker nodes.
    pub fn new_sheet(&mut self, variant: SheetVariant, name: Option<String>) -> SheetId {
        let name = name.unwrap_or_else(|| self.default_sheet_name(variant));
        let id = self.ids.next_sheet();
        let mut sheet = Sheet::new(variant, id, name);
        if variant == SheetVariant::Function {
            for class in [FUNCTION_OUTPUTS_CLASS, FUNCTION_INPUTS_CLASS] {
                if let Err(err) = sheet.new_node(class, &mut self.ids) {
                    tracing::error!("Failed to add {} to sheet {}: {}", class, id, err);
                }
            }
        }
        tracing::debug!("Created {} \"{}\" ({})", variant, sheet.name(), id);
        self.sheets_of_mut(variant).push(sheet);
        id
    }

    pub fn remove_sheet(&mut self, id: SheetId) -> Option<Sheet> {
        for variant in [SheetVariant::Sheet, SheetVariant::Function] {
            let sheets = self.sheets_of_mut(variant);
            if let Some(idx) = sheets.iter().position(|sheet| sheet.id == id) {
                let removed = sheets.remove(idx);
                self.view_bookmarks.retain(|bookmark| bookmark.sheet_id != id);
                return Some(removed);
            }
        }
        None
    }

    fn function_signatures(&self) -> HashMap<SheetId, FunctionSignature> {
        self.function_sheets
            .iter()
            .map(|sheet| {
                let inputs = sheet
                    .input_node_id()
                    .and_then(|id| sheet.find_node(id))
                    .map(|node| node.common_config.get().output_pins.clone())
                    .unwrap_or_default();
                let outputs = sheet
                    .output_node_id()
                    .and_then(|id| sheet.find_node(id))
                    .map(|node| node.common_config.get().input_pins.clone())
                    .unwrap_or_default();
                (sheet.id, (inputs, outputs))
            })
            .collect()
    }

    /// Aligns every `Function` node's pins with its target sheet's markers.
    ///
    /// Returns how many nodes changed.
    pub fn sync_function_nodes(&mut self) -> usize {
        let signatures = self.function_signatures();
        let mut updated = 0;
        for sheet in self.sheets.iter_mut().chain(self.function_sheets.iter_mut()) {
            let calls: Vec<(NodeId, SheetId)> = sheet
                .nodes()
                .iter()
                .filter(|node| node.registration().special == Some(SpecialRole::Function))
                .filter_map(|node| {
                    let target = node.config.get().get("function_id").and_then(Value::as_i64)?;
                    Some((node.id, SheetId(u64::try_from(target).ok()?)))
                })
                .collect();

            for (node_id, target) in calls {
                let Some((inputs, outputs)) = signatures.get(&target) else {
                    continue;
                };
                let Some(node) = sheet.find_node(node_id) else {
                    continue;
                };
                let common = node.common_config.get();
                let inputs_differ = common.input_pins != *inputs;
                let outputs_differ = common.output_pins != *outputs;
                let mut layouts = Vec::new();
                if inputs_differ {
                    layouts.push((PinDirection::Input, inputs));
                }
                if outputs_differ {
                    layouts.push((PinDirection::Output, outputs));
                }
                if layouts.is_empty() {
                    continue;
                }
                let mut synced = true;
                for (direction, pins) in layouts {
                    if let Err(err) = sheet.set_pin_layout(node_id, direction, pins.clone(), &mut self.ids) {
                        tracing::warn!("Failed to sync {} pins of function node {}: {}", direction, node_id, err);
                        synced = false;
                    }
                }
                if synced {
                    tracing::debug!("Synced pins of function node {} with sheet {}", node_id, target);
                    updated += 1;
                }
            }
        }
        updated
    }

    /// Runs a full pass over one sheet.
    ///
    /// A function sheet is run stand-alone with its markers publishing
    /// nothing, which is how users preview it.
    pub fn recalc_sheet(
        &mut self,
        id: SheetId,
        backend: &mut dyn CalcBackend,
        config: &AppConfig,
    ) -> Result<PassReport, SheetError> {
        if let Some(sheet) = self.sheets.iter_mut().find(|sheet| sheet.id == id) {
            let mut ctx = CalcContext::new(&mut *backend, config)
                .with_functions(FunctionLibrary::new(&mut self.function_sheets));
            return Ok(sheet.recalc_all(&mut ctx));
        }

        let idx = self
            .function_sheets
            .iter()
            .position(|sheet| sheet.id == id)
            .ok_or(SheetError::FunctionNotFound(id))?;
        let mut sheet = self.function_sheets.remove(idx);
        let report = {
            let mut ctx = CalcContext::new(&mut *backend, config)
                .with_functions(FunctionLibrary::running(&mut self.function_sheets, id));
            sheet.recalc_all(&mut ctx)
        };
        self.function_sheets.insert(idx, sheet);
        Ok(report)
    }

    /// Full pass over every top-level sheet, in order.
    pub fn recalc_all(&mut self, backend: &mut dyn CalcBackend, config: &AppConfig) -> Vec<(SheetId, PassReport)> {
        let mut reports = Vec::with_capacity(self.sheets.len());
        for sheet in &mut self.sheets {
            let mut ctx = CalcContext::new(&mut *backend, config)
                .with_functions(FunctionLibrary::new(&mut self.function_sheets));
            reports.push((sheet.id, sheet.recalc_all(&mut ctx)));
        }
        reports
    }

    /// Propagates changes and runs due auto-recalculations.
    pub fn recalc_auto(
        &mut self,
        backend: &mut dyn CalcBackend,
        config: &AppConfig,
        now: Instant,
    ) -> Vec<(SheetId, PassReport)> {
        let mut reports = Vec::new();
        for sheet in &mut self.sheets {
            sheet.propagate_changed();
            let mut ctx = CalcContext::new(&mut *backend, config)
                .with_functions(FunctionLibrary::new(&mut self.function_sheets));
            if let Some(report) = sheet.recalc_auto(&mut ctx, now) {
                reports.push((sheet.id, report));
            }
        }
        reports
    }

    /// Moves every allocator above the largest ID in use.
    pub(crate) fn rebase_ids(&mut self, document: &WorkspaceDocument) {
        let max = document.max_ids();
        let ids = &mut self.ids;
        for (provider, found) in [
            (&mut ids.sheets, max.sheets),
            (&mut ids.nodes, max.nodes),
            (&mut ids.links, max.links),
            (&mut ids.pins, max.pins),
        ] {
            if let Some(found) = found {
                if found >= provider.peek() {
                    provider.rebase(found + 1);
                }
            }
        }
    }
}
