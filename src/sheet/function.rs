//! Function sheets and the special node hooks.
//!
//! A function sheet holds exactly one `FunctionInputs` and one
//! `FunctionOutputs` marker. A `Function` node on another sheet runs it
//! through [`Sheet::use_sheet`]: the caller's inputs are published by the
//! input marker, the sheet is recalculated and whatever reaches the output
//! marker becomes the caller's outputs.
//!
//! While a function sheet runs it is taken out of the [`FunctionLibrary`]
//! and its ID pushed on the active stack, so self-calls and mutual
//! recursion surface as [`SheetError::RecursiveFunction`].

use super::{Sheet, SheetError};
use crate::backend::CalcBackend;
use crate::config::AppConfig;
use crate::id::{NodeId, SheetId};
use crate::nodes::{NodeRegistration, SpecialRole};
use crate::types::Value;

/// Function sheets callable from the pass in progress.
#[derive(Debug, Default)]
pub struct FunctionLibrary<'a> {
    sheets: Option<&'a mut Vec<Sheet>>,
    active: Vec<SheetId>,
}

impl<'a> FunctionLibrary<'a> {
    pub fn new(sheets: &'a mut Vec<Sheet>) -> Self {
        Self {
            sheets: Some(sheets),
            active: Vec::new(),
        }
    }

    /// Library for running the function sheet `running`, already removed
    /// from `sheets` by the caller.
    pub fn running(sheets: &'a mut Vec<Sheet>, running: SheetId) -> Self {
        Self {
            sheets: Some(sheets),
            active: vec![running],
        }
    }

    pub fn active(&self) -> &[SheetId] {
        &self.active
    }

    /// Removes function sheet `id` for the duration of a call.
    pub fn take(&mut self, id: SheetId) -> Result<(usize, Sheet), SheetError> {
        if self.active.contains(&id) {
            return Err(SheetError::RecursiveFunction(id));
        }
        let sheets = self
            .sheets
            .as_deref_mut()
            .ok_or(SheetError::FunctionNotFound(id))?;
        let idx = sheets
            .iter()
            .position(|sheet| sheet.id == id)
            .ok_or(SheetError::FunctionNotFound(id))?;
        let sheet = sheets.remove(idx);
        self.active.push(id);
        Ok((idx, sheet))
    }

    /// Puts back a sheet obtained from [`take`](Self::take).
    pub fn restore(&mut self, idx: usize, sheet: Sheet) {
        self.active.pop();
        if let Some(sheets) = self.sheets.as_deref_mut() {
            let idx = idx.min(sheets.len());
            sheets.insert(idx, sheet);
        }
    }
}

/// Everything a pass needs besides the sheet itself.
pub struct CalcContext<'a> {
    pub backend: &'a mut dyn CalcBackend,
    pub config: &'a AppConfig,
    pub functions: FunctionLibrary<'a>,
    /// Nesting level of function calls
    pub depth: usize,
}

impl<'a> CalcContext<'a> {
    /// Context without any callable function sheets.
    pub fn new(backend: &'a mut dyn CalcBackend, config: &'a AppConfig) -> Self {
        Self {
            backend,
            config,
            functions: FunctionLibrary::default(),
            depth: 0,
        }
    }

    pub fn with_functions(mut self, functions: FunctionLibrary<'a>) -> Self {
        self.functions = functions;
        self
    }
}

fn selected_function(config: &crate::nodes::ConfigMap) -> Result<SheetId, SheetError> {
    config
        .get("function_id")
        .and_then(Value::as_i64)
        .and_then(|id| u64::try_from(id).ok())
        .map(SheetId)
        .ok_or(SheetError::NoFunctionSelected)
}

impl Sheet {
    /// Evaluates this sheet as a function of `inputs`.
    ///
    /// Input values are swapped in for the pass and restored afterwards, so
    /// the sheet can be reused by the next caller.
    pub fn use_sheet(
        &mut self,
        inputs: Vec<Value>,
        ctx: &mut CalcContext<'_>,
    ) -> Result<Vec<Value>, SheetError> {
        let max_depth = ctx.config.max_function_depth;
        if ctx.depth >= max_depth {
            return Err(SheetError::FunctionDepthExceeded(max_depth));
        }

        let saved = std::mem::replace(&mut self.input_values, inputs);
        self.output_values = self
            .output_node_id
            .and_then(|id| self.find_node(id))
            .map(|node| node.input_values())
            .unwrap_or_default();

        ctx.depth += 1;
        let report = self.recalc_all(ctx);
        ctx.depth -= 1;

        let outputs = self.output_values.clone();
        self.input_values = saved;
        if !report.is_success() {
            return Err(SheetError::FunctionFailed {
                sheet: self.id,
                message: report.message,
            });
        }
        Ok(outputs)
    }

    /// Post-job hook of `Special` nodes.
    pub(crate) fn special_execute(
        &mut self,
        node_id: NodeId,
        role: SpecialRole,
        ctx: &mut CalcContext<'_>,
    ) -> Result<(), SheetError> {
        match role {
            SpecialRole::FunctionInputs => {
                let values = self.input_values.clone();
                self.update_outputs(node_id, &values)
            }
            SpecialRole::FunctionOutputs => {
                let node = self
                    .find_node(node_id)
                    .ok_or(SheetError::NodeNotFound(node_id))?;
                self.output_values = node.input_values();
                Ok(())
            }
            SpecialRole::Function => {
                let node = self
                    .find_node(node_id)
                    .ok_or(SheetError::NodeNotFound(node_id))?;
                let target = selected_function(node.config.get())?;
                let inputs = node.input_values();

                let (idx, mut function) = ctx.functions.take(target)?;
                tracing::debug!(
                    "Node {} calling function sheet {} at depth {}",
                    node_id,
                    target,
                    ctx.depth
                );
                let outcome = function.use_sheet(inputs, ctx);
                ctx.functions.restore(idx, function);
                self.update_outputs(node_id, &outcome?)
            }
        }
    }

    /// Refuses a second marker of the same kind.
    pub(crate) fn special_precheck(
        &self,
        registration: &'static NodeRegistration,
    ) -> Result<(), SheetError> {
        let existing = match registration.special {
            Some(SpecialRole::FunctionInputs) => self.input_node_id,
            Some(SpecialRole::FunctionOutputs) => self.output_node_id,
            _ => None,
        };
        if existing.is_some() {
            tracing::warn!(
                "Only one node of type: \"{}\" allowed per sheet!",
                registration.class
            );
            return Err(SheetError::DuplicateMarker(registration.class));
        }
        Ok(())
    }

    /// Records marker nodes as they are added.
    pub(crate) fn special_setup(&mut self, node_id: NodeId, role: SpecialRole) {
        match role {
            SpecialRole::FunctionInputs => self.input_node_id = Some(node_id),
            SpecialRole::FunctionOutputs => self.output_node_id = Some(node_id),
            SpecialRole::Function => {}
        }
    }
}
