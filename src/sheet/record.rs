//! Serialized form of sheets and nodes.
//!
//! Records carry identities explicitly, so a load restores the exact node,
//! pin and link IDs that were saved. Pins are matched back by index.

use super::node::Tracked;
use super::{Link, Node, Sheet, SheetConfig, SheetError};
use crate::id::{IdProviders, NodeId, PinId, SheetId};
use crate::nodes::{find_registration, CommonConfig, ConfigMap};
use crate::types::{PinDirection, SheetVariant, Value};
use serde::{Deserialize, Serialize};

/// Identity of the pin at `index`, plus an unlinked input's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinRecord {
    pub index: usize,
    pub id: PinId,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub class: String,
    #[serde(default)]
    pub pos_x: f32,
    #[serde(default)]
    pub pos_y: f32,
    #[serde(default)]
    pub common_config: CommonConfig,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub inputs: Vec<PinRecord>,
    #[serde(default)]
    pub outputs: Vec<PinRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetRecord {
    pub id: SheetId,
    #[serde(default)]
    pub config: SheetConfig,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub output_node_id: Option<NodeId>,
    #[serde(default)]
    pub input_node_id: Option<NodeId>,
}

fn pin_records(node: &Node, direction: PinDirection) -> Vec<PinRecord> {
    node.pins(direction)
        .iter()
        .enumerate()
        .map(|(index, pin)| PinRecord {
            index,
            id: pin.id,
            value: if direction == PinDirection::Input && !pin.linked {
                pin.value.clone()
            } else {
                Value::Null
            },
        })
        .collect()
}

impl Node {
    pub fn to_record(&self) -> NodeRecord {
        NodeRecord {
            id: self.id,
            class: self.class().to_string(),
            pos_x: self.pos_x,
            pos_y: self.pos_y,
            common_config: self.common_config.get().clone(),
            config: self.config.get().clone(),
            inputs: pin_records(self, PinDirection::Input),
            outputs: pin_records(self, PinDirection::Output),
        }
    }

    /// Rebuilds a node, restoring its pin IDs by index.
    ///
    /// Pins the record has no entry for get fresh IDs. The node comes back
    /// dirty so the first pass recalculates it.
    pub fn from_record(record: &NodeRecord, ids: &mut IdProviders) -> Result<Node, SheetError> {
        let registration = find_registration(&record.class)
            .ok_or_else(|| SheetError::UnknownNodeClass(record.class.clone()))?;
        let mut node = Node::blank(registration, record.id);
        node.pos_x = record.pos_x;
        node.pos_y = record.pos_y;

        let mut config = (registration.default_config)();
        config.extend(record.config.clone());
        node.config = Tracked::new(config);
        node.common_config = Tracked::new(record.common_config.clone());
        node.build_io(&mut || PinId::INVALID);

        for (direction, pins) in [
            (PinDirection::Input, &record.inputs),
            (PinDirection::Output, &record.outputs),
        ] {
            for saved in pins {
                match node.pins_mut(direction).get_mut(saved.index) {
                    Some(pin) => {
                        pin.id = saved.id;
                        if !saved.value.is_null() {
                            pin.value = saved.value.clone();
                        }
                    }
                    None => tracing::warn!(
                        "Skipping PinId recreation for id: {} because there is no pin at index: {}",
                        saved.id,
                        saved.index
                    ),
                }
            }
        }
        for pin in node.inputs.iter_mut().chain(node.outputs.iter_mut()) {
            if !pin.id.is_valid() {
                pin.id = ids.next_pin();
            }
        }

        node.mark_changed();
        Ok(node)
    }
}

impl Sheet {
    pub fn to_record(&self) -> SheetRecord {
        SheetRecord {
            id: self.id,
            config: self.config.clone(),
            nodes: self.nodes.iter().map(Node::to_record).collect(),
            links: self.links.clone(),
            output_node_id: self.output_node_id,
            input_node_id: self.input_node_id,
        }
    }

    /// Rebuilds a sheet from its record.
    ///
    /// Links whose pins no longer exist are skipped with a warning, as are
    /// marker IDs that do not name a marker node on the sheet.
    pub fn from_record(
        record: &SheetRecord,
        variant: SheetVariant,
        ids: &mut IdProviders,
    ) -> Result<Sheet, SheetError> {
        let mut sheet = Sheet::new(variant, record.id, record.config.name.clone());
        sheet.config = record.config.clone();
        for node_record in &record.nodes {
            let node = Node::from_record(node_record, ids)?;
            sheet.add_node(node);
        }

        for link in &record.links {
            if sheet.find_pin(link.input_id).is_none() || sheet.find_pin(link.output_id).is_none() {
                tracing::warn!(
                    "Skipping link {} because pin {} or {} is missing",
                    link.id,
                    link.output_id,
                    link.input_id
                );
                continue;
            }
            for pin_id in [link.input_id, link.output_id] {
                if let Some(pin) = sheet.find_pin_mut(pin_id) {
                    pin.linked = true;
                }
            }
            sheet.links.push(link.clone());
        }

        if record.input_node_id.is_some() && record.input_node_id != sheet.input_node_id {
            tracing::warn!(
                "Ignoring input_node_id {:?} of sheet {}",
                record.input_node_id,
                record.id
            );
        }
        if record.output_node_id.is_some() && record.output_node_id != sheet.output_node_id {
            tracing::warn!(
                "Ignoring output_node_id {:?} of sheet {}",
                record.output_node_id,
                record.id
            );
        }
        Ok(sheet)
    }
}
