//! Node instances living on a sheet.
//!
//! A [`Node`] pairs a static [`NodeRegistration`] with per-instance state:
//! pins, configuration, position and calculation status.

use crate::id::{IdProviders, NodeId, PinId};
use crate::nodes::{CommonConfig, ConfigMap, NodeRegistration, PinInfo};
use crate::types::{CalcStatus, NodeKind, PinDirection, Value, VarType};
use std::time::Duration;

/// A value with a dirty flag set by every mutable access.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tracked<T> {
    value: T,
    changed: bool,
}

impl<T> Tracked<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            changed: false,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Mutable access; marks the value changed.
    pub fn edit(&mut self) -> &mut T {
        self.changed = true;
        &mut self.value
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
        self.changed = true;
    }

    pub fn has_changed(&self) -> bool {
        self.changed
    }

    pub fn mark_unchanged(&mut self) {
        self.changed = false;
    }
}

/// An input or output connection point.
#[derive(Debug, Clone, PartialEq)]
pub struct IoPin {
    pub id: PinId,
    pub node_id: NodeId,
    pub label: String,
    pub description: String,
    pub var_type: VarType,
    pub direction: PinDirection,
    pub value: Value,
    pub linked: bool,
}

/// A node on a sheet.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    registration: &'static NodeRegistration,
    pub pos_x: f32,
    pub pos_y: f32,
    pub config: Tracked<ConfigMap>,
    pub common_config: Tracked<CommonConfig>,
    pub inputs: Vec<IoPin>,
    pub outputs: Vec<IoPin>,
    changed: bool,
    status: CalcStatus,
    message: String,
    traceback: String,
    pub calc_time: Option<Duration>,
    last_cfg_inputs: Option<Vec<PinInfo>>,
    last_cfg_outputs: Option<Vec<PinInfo>>,
}

impl Node {
    /// Creates a node with default config and freshly allocated pin IDs.
    pub fn new(registration: &'static NodeRegistration, id: NodeId, ids: &mut IdProviders) -> Self {
        let mut node = Self::blank(registration, id);
        node.build_io(&mut || ids.next_pin());
        node.mark_changed();
        node
    }

    /// Node without pins; `build_io` fills them in.
    pub(crate) fn blank(registration: &'static NodeRegistration, id: NodeId) -> Self {
        Self {
            id,
            registration,
            pos_x: 150.0,
            pos_y: 100.0,
            config: Tracked::new((registration.default_config)()),
            common_config: Tracked::new(CommonConfig {
                name: registration.display_name.to_string(),
                ..CommonConfig::default()
            }),
            inputs: Vec::new(),
            outputs: Vec::new(),
            changed: false,
            status: CalcStatus::Idle,
            message: String::new(),
            traceback: String::new(),
            calc_time: None,
            last_cfg_inputs: None,
            last_cfg_outputs: None,
        }
    }

    /// Builds both pin lists, drawing IDs from `next_pin`.
    pub(crate) fn build_io(&mut self, next_pin: &mut dyn FnMut() -> PinId) {
        for direction in [PinDirection::Input, PinDirection::Output] {
            if self.registration.io_from_common_config(direction) {
                self.rebuild_configured_pins(direction, next_pin);
            } else {
                let pins = self
                    .registration
                    .fixed_pins(direction)
                    .iter()
                    .map(|desc| IoPin {
                        id: next_pin(),
                        node_id: self.id,
                        label: desc.label.to_string(),
                        description: desc.description.to_string(),
                        var_type: desc.var_type,
                        direction,
                        value: Value::Null,
                        linked: false,
                    })
                    .collect();
                *self.pins_mut(direction) = pins;
            }
        }
    }

    pub fn registration(&self) -> &'static NodeRegistration {
        self.registration
    }

    pub fn class(&self) -> &'static str {
        self.registration.class
    }

    pub fn kind(&self) -> NodeKind {
        self.registration.kind
    }

    pub fn name(&self) -> &str {
        &self.common_config.get().name
    }

    pub fn pins(&self, direction: PinDirection) -> &[IoPin] {
        match direction {
            PinDirection::Input => &self.inputs,
            PinDirection::Output => &self.outputs,
        }
    }

    pub(crate) fn pins_mut(&mut self, direction: PinDirection) -> &mut Vec<IoPin> {
        match direction {
            PinDirection::Input => &mut self.inputs,
            PinDirection::Output => &mut self.outputs,
        }
    }

    pub fn find_pin(&self, pin_id: PinId) -> Option<&IoPin> {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .find(|pin| pin.id == pin_id)
    }

    pub fn find_pin_mut(&mut self, pin_id: PinId) -> Option<&mut IoPin> {
        self.inputs
            .iter_mut()
            .chain(self.outputs.iter_mut())
            .find(|pin| pin.id == pin_id)
    }

    pub fn input_values(&self) -> Vec<Value> {
        self.inputs.iter().map(|pin| pin.value.clone()).collect()
    }

    pub fn output_values(&self) -> Vec<Value> {
        self.outputs.iter().map(|pin| pin.value.clone()).collect()
    }

    /// Rebuilds configurable pins in `direction` from the common config.
    ///
    /// A pin keeps its ID (and value) when its slot existed before with the
    /// same type. Returns the IDs of pins that no longer exist.
    pub fn configure_io(&mut self, direction: PinDirection, ids: &mut IdProviders) -> Vec<PinId> {
        if !self.registration.io_from_common_config(direction) {
            return Vec::new();
        }
        self.rebuild_configured_pins(direction, &mut || ids.next_pin())
    }

    fn rebuild_configured_pins(
        &mut self,
        direction: PinDirection,
        next_pin: &mut dyn FnMut() -> PinId,
    ) -> Vec<PinId> {
        let new_cfg = self.common_config.get().pins(direction).to_vec();
        let last_cfg = match direction {
            PinDirection::Input => &mut self.last_cfg_inputs,
            PinDirection::Output => &mut self.last_cfg_outputs,
        };
        if last_cfg.as_ref() == Some(&new_cfg) {
            return Vec::new();
        }
        *last_cfg = Some(new_cfg.clone());

        let node_id = self.id;
        let previous = std::mem::take(self.pins_mut(direction));
        let mut pins = Vec::with_capacity(new_cfg.len());
        for (idx, info) in new_cfg.iter().enumerate() {
            let (id, value, linked) = match previous.get(idx) {
                Some(prev) if prev.var_type == info.var_type && prev.id.is_valid() => {
                    (prev.id, prev.value.clone(), prev.linked)
                }
                _ => (next_pin(), Value::Null, false),
            };
            pins.push(IoPin {
                id,
                node_id,
                label: info.display_label(direction, idx),
                description: info.display_description(direction, idx),
                var_type: info.var_type,
                direction,
                value,
                linked,
            });
        }

        let removed = previous
            .iter()
            .map(|pin| pin.id)
            .filter(|id| !pins.iter().any(|pin| pin.id == *id))
            .collect();
        *self.pins_mut(direction) = pins;
        removed
    }

    pub fn has_changed(&self) -> bool {
        self.changed || self.config.has_changed() || self.common_config.has_changed()
    }

    pub fn mark_changed(&mut self) {
        self.changed = true;
    }

    pub fn mark_unchanged(&mut self) {
        self.changed = false;
        self.config.mark_unchanged();
        self.common_config.mark_unchanged();
    }

    pub fn status(&self) -> CalcStatus {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn traceback(&self) -> &str {
        &self.traceback
    }

    pub fn set_calc_status(
        &mut self,
        status: CalcStatus,
        message: impl Into<String>,
        traceback: impl Into<String>,
    ) {
        self.status = status;
        self.message = message.into();
        self.traceback = traceback.into();
    }

    /// Hidden marker nodes cannot be removed by users.
    pub fn ok_to_delete(&self) -> bool {
        self.registration.deletable
    }
}
