//! Test data builders for creating sheets

use althea_engine::id::{IdProviders, LinkId, NodeId, PinId};
use althea_engine::nodes::{PinInfo, FUNCTION_INPUTS_CLASS, FUNCTION_OUTPUTS_CLASS};
use althea_engine::sheet::SheetError;
use althea_engine::types::{PinDirection, SheetVariant, Value, VarType};
use althea_engine::Sheet;

/// Builder for creating test sheets
pub struct SheetBuilder {
    pub sheet: Sheet,
    pub ids: IdProviders,
}

impl SheetBuilder {
    pub fn new(name: &str) -> Self {
        Self::with_ids(name, SheetVariant::Sheet, IdProviders::new())
    }

    pub fn with_ids(name: &str, variant: SheetVariant, mut ids: IdProviders) -> Self {
        let sheet = Sheet::new(variant, ids.next_sheet(), name);
        Self { sheet, ids }
    }

    /// Function sheet with both marker nodes, inputs and outputs all Numbers
    pub fn function(name: &str, ids: IdProviders, inputs: &[&str], outputs: &[&str]) -> Self {
        let mut builder = Self::with_ids(name, SheetVariant::Function, ids);
        let out_marker = builder.node(FUNCTION_OUTPUTS_CLASS);
        let in_marker = builder.node(FUNCTION_INPUTS_CLASS);
        builder.layout(in_marker, PinDirection::Output, inputs);
        builder.layout(out_marker, PinDirection::Input, outputs);
        builder
    }

    pub fn node(&mut self, class: &str) -> NodeId {
        self.sheet.new_node(class, &mut self.ids).expect("known node class")
    }

    /// ValueNumber node holding `value`
    pub fn number(&mut self, value: i64) -> NodeId {
        let node = self.node("ValueNumber");
        self.sheet.set_node_config(node, "value", value).unwrap();
        node
    }

    /// Script node with one Number pin per label
    pub fn script(&mut self, source: &str, inputs: &[&str], outputs: &[&str]) -> NodeId {
        let node = self.node("Script");
        self.sheet.set_node_config(node, "script", source).unwrap();
        self.layout(node, PinDirection::Input, inputs);
        self.layout(node, PinDirection::Output, outputs);
        node
    }

    pub fn layout(&mut self, node: NodeId, direction: PinDirection, labels: &[&str]) {
        let pins = labels
            .iter()
            .map(|label| PinInfo::new(VarType::Number, *label))
            .collect();
        self.sheet
            .set_pin_layout(node, direction, pins, &mut self.ids)
            .unwrap();
    }

    pub fn input_pin(&self, node: NodeId, idx: usize) -> PinId {
        self.sheet.find_node(node).unwrap().inputs[idx].id
    }

    pub fn output_pin(&self, node: NodeId, idx: usize) -> PinId {
        self.sheet.find_node(node).unwrap().outputs[idx].id
    }

    /// Links output `from_idx` of `from` to input `to_idx` of `to`
    pub fn link(&mut self, from: NodeId, from_idx: usize, to: NodeId, to_idx: usize) -> Result<LinkId, SheetError> {
        let output = self.output_pin(from, from_idx);
        let input = self.input_pin(to, to_idx);
        self.sheet.attempt_link(output, input, &mut self.ids)
    }

    pub fn set_input(&mut self, node: NodeId, idx: usize, value: impl Into<Value>) {
        let pin = self.input_pin(node, idx);
        self.sheet.set_input_value(pin, value).unwrap();
    }

    pub fn build(self) -> (Sheet, IdProviders) {
        (self.sheet, self.ids)
    }
}

/// The A(5) -> Add(B = 3) -> View sheet
pub struct AddScenario {
    pub sheet: Sheet,
    pub ids: IdProviders,
    pub a: NodeId,
    pub add: NodeId,
    pub view: NodeId,
}

pub fn add_scenario() -> AddScenario {
    let mut builder = SheetBuilder::new("Scenario");
    let a = builder.number(5);
    let add = builder.node("MathAdd");
    let view = builder.node("View");
    builder.link(a, 0, add, 0).unwrap();
    builder.set_input(add, 1, 3i64);
    builder.link(add, 0, view, 0).unwrap();
    let (sheet, ids) = builder.build();
    AddScenario {
        sheet,
        ids,
        a,
        add,
        view,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sheet_builder() {
        let scenario = add_scenario();
        assert_eq!(scenario.sheet.nodes().len(), 3);
        assert_eq!(scenario.sheet.links().len(), 2);
        assert_eq!(scenario.sheet.name(), "Scenario");
    }
}
