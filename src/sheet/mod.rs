//! Sheets: node graphs with dependency-ordered recalculation
//!
//! A [`Sheet`] owns its [`Node`]s and [`Link`]s. Editing goes through the
//! sheet so link invariants hold:
//!
//! - an input pin has at most one incoming link
//! - a link never connects a node to itself
//! - a link never closes a dependency loop
//!
//! Recalculation builds a dependency map from the links, resolves it into
//! generations and processes them in order through a [`CalcBackend`], see
//! [`Sheet::process`].
//!
//! [`CalcBackend`]: crate::backend::CalcBackend

mod deps;
mod error;
mod function;
mod link;
mod node;
mod recalc;
mod record;
pub mod resolver;

pub use error::SheetError;
pub use function::{CalcContext, FunctionLibrary};
pub use link::{Link, LinkRejection};
pub use node::{IoPin, Node, Tracked};
pub use recalc::PassReport;
pub use record::{NodeRecord, PinRecord, SheetRecord};
pub use resolver::{DependencyMap, Generation};

use crate::id::{IdProviders, NodeId, PinId, SheetId};
use crate::nodes::{find_registration, PinInfo};
use crate::types::{CalcStatus, PinDirection, SheetVariant, Value};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Per-sheet settings persisted under `config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SheetConfig {
    #[serde(default)]
    pub name: String,
}

/// A named graph of nodes and links.
#[derive(Debug, Clone)]
pub struct Sheet {
    pub id: SheetId,
    pub variant: SheetVariant,
    pub config: SheetConfig,
    nodes: Vec<Node>,
    links: Vec<Link>,
    status: CalcStatus,
    message: String,
    input_node_id: Option<NodeId>,
    output_node_id: Option<NodeId>,
    /// Values published by the FunctionInputs marker during `use_sheet`
    input_values: Vec<Value>,
    /// Values captured by the FunctionOutputs marker
    output_values: Vec<Value>,
    last_recalc: Option<Instant>,
}

impl Sheet {
    pub fn new(variant: SheetVariant, id: SheetId, name: impl Into<String>) -> Self {
        Self {
            id,
            variant,
            config: SheetConfig { name: name.into() },
            nodes: Vec::new(),
            links: Vec::new(),
            status: CalcStatus::Idle,
            message: String::new(),
            input_node_id: None,
            output_node_id: None,
            input_values: Vec::new(),
            output_values: Vec::new(),
            last_recalc: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn find_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == node_id)
    }

    pub fn find_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|node| node.id == node_id)
    }

    pub fn find_pin(&self, pin_id: PinId) -> Option<&IoPin> {
        self.nodes.iter().find_map(|node| node.find_pin(pin_id))
    }

    pub fn find_pin_mut(&mut self, pin_id: PinId) -> Option<&mut IoPin> {
        self.nodes.iter_mut().find_map(|node| node.find_pin_mut(pin_id))
    }

    pub fn status(&self) -> CalcStatus {
        self.status
    }

    /// Status line of the last pass or edit.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn set_status(&mut self, status: CalcStatus, message: impl Into<String>) {
        self.status = status;
        self.message = message.into();
    }

    pub fn input_node_id(&self) -> Option<NodeId> {
        self.input_node_id
    }

    pub fn output_node_id(&self) -> Option<NodeId> {
        self.output_node_id
    }

    pub fn output_values(&self) -> &[Value] {
        &self.output_values
    }

    /// Adds a node of class `class` with default configuration.
    pub fn new_node(&mut self, class: &str, ids: &mut IdProviders) -> Result<NodeId, SheetError> {
        let registration =
            find_registration(class).ok_or_else(|| SheetError::UnknownNodeClass(class.to_string()))?;
        if let Err(err) = self.special_precheck(registration) {
            tracing::warn!(
                "Not allowed to create node of type: {}",
                registration.display_name
            );
            return Err(err);
        }
        let node_id = ids.next_node();
        let node = Node::new(registration, node_id, ids);
        self.add_node(node);
        Ok(node_id)
    }

    pub(crate) fn add_node(&mut self, node: Node) {
        let node_id = node.id;
        let role = node.registration().special;
        self.nodes.push(node);
        if let Some(role) = role {
            self.special_setup(node_id, role);
        }
    }

    /// Deletes a node and every link attached to it.
    pub fn delete_node(&mut self, node_id: NodeId) -> Result<(), SheetError> {
        let node = self
            .find_node(node_id)
            .ok_or(SheetError::NodeNotFound(node_id))?;
        if !node.ok_to_delete() {
            return Err(SheetError::NotDeletable(node_id));
        }
        let pins: Vec<PinId> = node
            .inputs
            .iter()
            .chain(node.outputs.iter())
            .map(|pin| pin.id)
            .collect();
        self.delete_links_for_pins(&pins);
        self.nodes.retain(|node| node.id != node_id);
        if self.input_node_id == Some(node_id) {
            self.input_node_id = None;
        }
        if self.output_node_id == Some(node_id) {
            self.output_node_id = None;
        }
        Ok(())
    }

    /// Sets one config parameter of a node, marking it changed.
    pub fn set_node_config(
        &mut self,
        node_id: NodeId,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<(), SheetError> {
        let node = self
            .find_node_mut(node_id)
            .ok_or(SheetError::NodeNotFound(node_id))?;
        node.config.edit().insert(key.to_string(), value.into());
        Ok(())
    }

    /// Sets the value of an unlinked input pin.
    pub fn set_input_value(&mut self, pin_id: PinId, value: impl Into<Value>) -> Result<(), SheetError> {
        if self.is_linked(pin_id) {
            return Err(LinkRejection::InputAlreadyLinked(pin_id).into());
        }
        let node_id = self
            .find_pin(pin_id)
            .filter(|pin| pin.direction == PinDirection::Input)
            .map(|pin| pin.node_id)
            .ok_or(SheetError::PinNotFound(pin_id))?;
        let node = self
            .find_node_mut(node_id)
            .ok_or(SheetError::NodeNotFound(node_id))?;
        if let Some(pin) = node.find_pin_mut(pin_id) {
            pin.value = value.into();
        }
        node.mark_changed();
        Ok(())
    }

    /// Replaces the configurable pin layout of a node in `direction`.
    ///
    /// Links attached to pins that disappear are deleted.
    pub fn set_pin_layout(
        &mut self,
        node_id: NodeId,
        direction: PinDirection,
        pins: Vec<PinInfo>,
        ids: &mut IdProviders,
    ) -> Result<(), SheetError> {
        let node = self
            .find_node_mut(node_id)
            .ok_or(SheetError::NodeNotFound(node_id))?;
        let common = node.common_config.edit();
        match direction {
            PinDirection::Input => common.input_pins = pins,
            PinDirection::Output => common.output_pins = pins,
        }
        let removed = node.configure_io(direction, ids);
        self.delete_links_for_pins(&removed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{FUNCTION_INPUTS_CLASS, FUNCTION_OUTPUTS_CLASS};
    use crate::types::VarType;

    struct Fixture {
        ids: IdProviders,
        sheet: Sheet,
    }

    impl Fixture {
        fn new() -> Self {
            let mut ids = IdProviders::new();
            let sheet = Sheet::new(SheetVariant::Sheet, ids.next_sheet(), "Test");
            Self { ids, sheet }
        }

        fn add(&mut self, class: &str) -> NodeId {
            self.sheet.new_node(class, &mut self.ids).unwrap()
        }

        fn pin(&self, node: NodeId, direction: PinDirection, idx: usize) -> PinId {
            self.sheet.find_node(node).unwrap().pins(direction)[idx].id
        }

        fn link(&mut self, from: NodeId, from_idx: usize, to: NodeId, to_idx: usize) -> Result<(), SheetError> {
            let out = self.pin(from, PinDirection::Output, from_idx);
            let input = self.pin(to, PinDirection::Input, to_idx);
            self.sheet.attempt_link(out, input, &mut self.ids).map(|_| ())
        }
    }

    #[test]
    fn test_unknown_class() {
        let mut fx = Fixture::new();
        let err = fx.sheet.new_node("Nope", &mut fx.ids).unwrap_err();
        assert_eq!(err, SheetError::UnknownNodeClass("Nope".into()));
    }

    #[test]
    fn test_link_copies_value_and_marks_target() {
        let mut fx = Fixture::new();
        let a = fx.add("ValueNumber");
        let b = fx.add("MathAdd");
        let out = fx.pin(a, PinDirection::Output, 0);
        fx.sheet.find_pin_mut(out).unwrap().value = Value::Int(5);
        fx.sheet.find_node_mut(b).unwrap().mark_unchanged();

        fx.link(a, 0, b, 0).unwrap();
        let node_b = fx.sheet.find_node(b).unwrap();
        assert!(node_b.has_changed());
        assert!(node_b.inputs[0].linked);
        assert_eq!(node_b.inputs[0].value, Value::Int(5));
        assert!(fx.sheet.find_pin(out).unwrap().linked);
        assert_eq!(fx.sheet.message(), "Link Created: Number -> Number");
    }

    #[test]
    fn test_link_rule_rejections() {
        let mut fx = Fixture::new();
        let x = fx.add("ValueNumber");
        let z = fx.add("ValueNumber");
        let y = fx.add("MathAdd");
        fx.link(x, 0, y, 0).unwrap();

        let err = fx.link(z, 0, y, 0).unwrap_err();
        let pin = fx.pin(y, PinDirection::Input, 0);
        assert_eq!(err, SheetError::LinkRejected(LinkRejection::InputAlreadyLinked(pin)));
        assert_eq!(
            fx.sheet.message(),
            format!("Link Rejected: [Rules] Input pin: {} is already linked !", pin)
        );
        assert_eq!(fx.sheet.links().len(), 1);

        let in0 = fx.pin(y, PinDirection::Input, 0);
        let in1 = fx.pin(y, PinDirection::Input, 1);
        let err = fx.sheet.attempt_link(in1, in0, &mut fx.ids).unwrap_err();
        assert_eq!(
            err,
            SheetError::LinkRejected(LinkRejection::SameDirection(PinDirection::Input))
        );
    }

    #[test]
    fn test_link_safety_rejections() {
        let mut fx = Fixture::new();
        let a = fx.add("MathAdd");
        let b = fx.add("MathAdd");
        let d = fx.add("MathAdd");
        fx.link(a, 0, b, 0).unwrap();
        fx.link(b, 0, d, 0).unwrap();

        let err = fx.link(d, 0, a, 0).unwrap_err();
        assert_eq!(err, SheetError::LinkRejected(LinkRejection::WouldCycle));
        assert!(fx.sheet.message().starts_with("Link Rejected: [Safety]"));

        let err = fx.link(a, 0, a, 1).unwrap_err();
        assert_eq!(err, SheetError::LinkRejected(LinkRejection::SameNode(a)));
        assert_eq!(fx.sheet.links().len(), 2);
    }

    #[test]
    fn test_link_type_rejection() {
        let mut fx = Fixture::new();
        let s = fx.add("ValueString");
        let add = fx.add("MathAdd");
        let err = fx.link(s, 0, add, 0).unwrap_err();
        assert_eq!(
            err,
            SheetError::LinkRejected(LinkRejection::IncompatibleTypes {
                output: VarType::String,
                input: VarType::Number,
            })
        );
        assert_eq!(
            fx.sheet.message(),
            "Link Rejected: [Types] Incompatible types: String -> Number"
        );
    }

    #[test]
    fn test_delete_link_clears_input() {
        let mut fx = Fixture::new();
        let a = fx.add("ValueNumber");
        let b = fx.add("View");
        fx.link(a, 0, b, 0).unwrap();
        let link_id = fx.sheet.links()[0].id;
        fx.sheet.find_node_mut(b).unwrap().mark_unchanged();

        fx.sheet.delete_link(link_id).unwrap();
        let view = fx.sheet.find_node(b).unwrap();
        assert!(view.has_changed());
        assert!(!view.inputs[0].linked);
        assert!(view.inputs[0].value.is_null());
        assert!(!fx.sheet.find_pin(fx.pin(a, PinDirection::Output, 0)).unwrap().linked);
        assert_eq!(
            fx.sheet.delete_link(link_id),
            Err(SheetError::LinkNotFound(link_id))
        );
    }

    #[test]
    fn test_delete_node_removes_links() {
        let mut fx = Fixture::new();
        let a = fx.add("ValueNumber");
        let b = fx.add("View");
        let c = fx.add("View");
        fx.link(a, 0, b, 0).unwrap();
        fx.link(a, 0, c, 0).unwrap();
        fx.sheet.delete_node(a).unwrap();
        assert!(fx.sheet.links().is_empty());
        assert!(fx.sheet.find_node(a).is_none());
        assert_eq!(fx.sheet.nodes().len(), 2);
    }

    #[test]
    fn test_markers_only_once_and_not_deletable() {
        let mut fx = Fixture::new();
        let outputs = fx.add(FUNCTION_OUTPUTS_CLASS);
        let inputs = fx.add(FUNCTION_INPUTS_CLASS);
        assert_eq!(fx.sheet.output_node_id(), Some(outputs));
        assert_eq!(fx.sheet.input_node_id(), Some(inputs));
        assert_eq!(
            fx.sheet.new_node(FUNCTION_INPUTS_CLASS, &mut fx.ids),
            Err(SheetError::DuplicateMarker(FUNCTION_INPUTS_CLASS))
        );
        assert_eq!(fx.sheet.delete_node(inputs), Err(SheetError::NotDeletable(inputs)));
    }

    #[test]
    fn test_set_pin_layout_drops_links_of_removed_pins() {
        let mut fx = Fixture::new();
        let a = fx.add("ValueNumber");
        let script = fx.add("Script");
        fx.sheet
            .set_pin_layout(
                script,
                PinDirection::Input,
                vec![PinInfo::new(VarType::Number, "x")],
                &mut fx.ids,
            )
            .unwrap();
        fx.link(a, 0, script, 0).unwrap();

        fx.sheet
            .set_pin_layout(
                script,
                PinDirection::Input,
                vec![PinInfo::new(VarType::String, "x")],
                &mut fx.ids,
            )
            .unwrap();
        assert!(fx.sheet.links().is_empty());
        assert!(!fx.sheet.find_node(script).unwrap().inputs[0].linked);
    }

    #[test]
    fn test_set_input_value_refuses_linked_pins() {
        let mut fx = Fixture::new();
        let a = fx.add("ValueNumber");
        let b = fx.add("MathAdd");
        fx.link(a, 0, b, 0).unwrap();
        let linked = fx.pin(b, PinDirection::Input, 0);
        let free = fx.pin(b, PinDirection::Input, 1);
        assert!(fx.sheet.set_input_value(linked, 3i64).is_err());
        fx.sheet.set_input_value(free, 3i64).unwrap();
        assert_eq!(fx.sheet.find_pin(free).unwrap().value, Value::Int(3));
    }
}
