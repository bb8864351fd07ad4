//! Links between pins and the checks run before creating one.
//!
//! `attempt_link` runs three checks in order, stopping at the first failure:
//!
//! 1. rules: one input and one output, input not already linked
//! 2. safety: different nodes, no dependency loop
//! 3. types: the input accepts the output's type

use super::{Sheet, SheetError};
use crate::id::{IdProviders, LinkId, NodeId, PinId};
use crate::types::{PinDirection, Value, VarType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A directed edge from an output pin to an input pin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub var_type: VarType,
    pub input_id: PinId,
    pub input_node_id: NodeId,
    pub output_id: PinId,
    pub output_node_id: NodeId,
}

/// Why a link was refused
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkRejection {
    #[error("Both pins are {0}")]
    SameDirection(PinDirection),

    #[error("Input pin: {0} is already linked !")]
    InputAlreadyLinked(PinId),

    #[error("Both pins are from the same node: {0} !")]
    SameNode(NodeId),

    #[error("Output pin node is a dependent of input pin node! Link would cause circular dependency!")]
    WouldCycle,

    #[error("Incompatible types: {output} -> {input}")]
    IncompatibleTypes { output: VarType, input: VarType },
}

impl LinkRejection {
    /// Which check produced the rejection.
    pub fn category(&self) -> &'static str {
        match self {
            LinkRejection::SameDirection(_) | LinkRejection::InputAlreadyLinked(_) => "Rules",
            LinkRejection::SameNode(_) | LinkRejection::WouldCycle => "Safety",
            LinkRejection::IncompatibleTypes { .. } => "Types",
        }
    }
}

struct PinEnds {
    input: PinId,
    input_node: NodeId,
    input_type: VarType,
    output: PinId,
    output_node: NodeId,
    output_type: VarType,
}

impl Sheet {
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn find_link(&self, link_id: LinkId) -> Option<&Link> {
        self.links.iter().find(|link| link.id == link_id)
    }

    /// Links attached to `pin_id` on either end.
    pub fn links_for_pin(&self, pin_id: PinId) -> impl Iterator<Item = &Link> + '_ {
        self.links
            .iter()
            .filter(move |link| link.input_id == pin_id || link.output_id == pin_id)
    }

    pub fn is_linked(&self, pin_id: PinId) -> bool {
        self.links_for_pin(pin_id).next().is_some()
    }

    fn pin_ends(&self, input: PinId, output: PinId) -> Result<PinEnds, SheetError> {
        let input_pin = self.find_pin(input).ok_or(SheetError::PinNotFound(input))?;
        let output_pin = self.find_pin(output).ok_or(SheetError::PinNotFound(output))?;
        Ok(PinEnds {
            input,
            input_node: input_pin.node_id,
            input_type: input_pin.var_type,
            output,
            output_node: output_pin.node_id,
            output_type: output_pin.var_type,
        })
    }

    /// Rule checks: pins of different direction, input not already linked.
    pub fn check_link_rules(&self, input: PinId, output: PinId) -> Result<(), SheetError> {
        let input_pin = self.find_pin(input).ok_or(SheetError::PinNotFound(input))?;
        let output_pin = self.find_pin(output).ok_or(SheetError::PinNotFound(output))?;
        if input_pin.direction == output_pin.direction {
            return Err(LinkRejection::SameDirection(input_pin.direction).into());
        }
        if self.is_linked(input) {
            return Err(LinkRejection::InputAlreadyLinked(input).into());
        }
        Ok(())
    }

    /// Safety checks: pins on different nodes, and the output node must not
    /// already depend on the input node.
    pub fn check_link_safety(&self, input: PinId, output: PinId) -> Result<(), SheetError> {
        let ends = self.pin_ends(input, output)?;
        if ends.input_node == ends.output_node {
            return Err(LinkRejection::SameNode(ends.output_node).into());
        }
        if self
            .build_affected_list(&[ends.input_node])
            .contains(&ends.output_node)
        {
            return Err(LinkRejection::WouldCycle.into());
        }
        Ok(())
    }

    pub fn check_link_types(&self, input: PinId, output: PinId) -> Result<(), SheetError> {
        let ends = self.pin_ends(input, output)?;
        if ends.input_type.accepts(ends.output_type) {
            Ok(())
        } else {
            Err(LinkRejection::IncompatibleTypes {
                output: ends.output_type,
                input: ends.input_type,
            }
            .into())
        }
    }

    /// Validates and creates a link between two pins given in either order.
    pub fn attempt_link(
        &mut self,
        pin_a: PinId,
        pin_b: PinId,
        ids: &mut IdProviders,
    ) -> Result<LinkId, SheetError> {
        let a = self.find_pin(pin_a).ok_or(SheetError::PinNotFound(pin_a))?;
        let (output, input) = if a.direction == PinDirection::Output {
            (pin_a, pin_b)
        } else {
            (pin_b, pin_a)
        };

        let checked = self
            .check_link_rules(input, output)
            .and_then(|_| self.check_link_safety(input, output))
            .and_then(|_| self.check_link_types(input, output));
        if let Err(err) = checked {
            self.message = err.to_string();
            tracing::info!("{}", self.message);
            return Err(err);
        }
        self.create_link(input, output, ids)
    }

    /// Creates a link without running any checks.
    pub fn create_link(
        &mut self,
        input: PinId,
        output: PinId,
        ids: &mut IdProviders,
    ) -> Result<LinkId, SheetError> {
        let ends = self.pin_ends(input, output)?;
        let link = Link {
            id: ids.next_link(),
            var_type: ends.output_type,
            input_id: ends.input,
            input_node_id: ends.input_node,
            output_id: ends.output,
            output_node_id: ends.output_node,
        };
        self.insert_link(link)
    }

    /// Adds an already-built link, wiring both pins.
    pub(crate) fn insert_link(&mut self, link: Link) -> Result<LinkId, SheetError> {
        let ends = self.pin_ends(link.input_id, link.output_id)?;
        let value = match self.find_pin_mut(ends.output) {
            Some(pin) => {
                pin.linked = true;
                pin.value.clone()
            }
            None => return Err(SheetError::PinNotFound(ends.output)),
        };
        let target = self
            .find_node_mut(ends.input_node)
            .ok_or(SheetError::NodeNotFound(ends.input_node))?;
        target.mark_changed();
        if let Some(pin) = target.find_pin_mut(ends.input) {
            pin.linked = true;
            pin.value = value;
        }

        self.message = format!("Link Created: {} -> {}", ends.output_type, ends.input_type);
        tracing::info!("{}", self.message);
        let id = link.id;
        self.links.push(link);
        Ok(id)
    }

    /// Removes a link; the input pin loses its value and the target node is
    /// marked changed.
    pub fn delete_link(&mut self, link_id: LinkId) -> Result<(), SheetError> {
        let idx = self
            .links
            .iter()
            .position(|link| link.id == link_id)
            .ok_or(SheetError::LinkNotFound(link_id))?;
        let link = self.links.remove(idx);

        if let Some(node) = self.find_node_mut(link.input_node_id) {
            node.mark_changed();
            if let Some(pin) = node.find_pin_mut(link.input_id) {
                pin.value = Value::Null;
                pin.linked = false;
            }
        }
        let still_used = self.is_linked(link.output_id);
        if let Some(pin) = self.find_pin_mut(link.output_id) {
            pin.linked = still_used;
        }
        tracing::debug!("Link Deleted: {}", link_id);
        Ok(())
    }

    /// Deletes every link touching any of `pins`.
    pub(crate) fn delete_links_for_pins(&mut self, pins: &[PinId]) {
        let doomed: Vec<LinkId> = self
            .links
            .iter()
            .filter(|link| pins.contains(&link.input_id) || pins.contains(&link.output_id))
            .map(|link| link.id)
            .collect();
        for link_id in doomed {
            if let Err(err) = self.delete_link(link_id) {
                tracing::warn!("Failed to delete link {}: {}", link_id, err);
            }
        }
    }
}
