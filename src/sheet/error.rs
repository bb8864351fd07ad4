//! Sheet-level error types.

use super::link::LinkRejection;
use crate::id::{LinkId, NodeId, PinId, SheetId};
use crate::nodes::NodeError;
use thiserror::Error;

/// Errors raised while editing or recalculating a sheet.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SheetError {
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Pin {0} not found")]
    PinNotFound(PinId),

    #[error("Link {0} not found")]
    LinkNotFound(LinkId),

    #[error("Could not find node class: {0}")]
    UnknownNodeClass(String),

    /// The per-pass guard: a node was scheduled twice in one pass
    #[error("Circular dependency detected! Already processed node: {0}")]
    CircularDependency(NodeId),

    /// Found while building the dependency graph
    #[error("Circular dependency detected between nodes: {}", format_cycle(.0))]
    CycleDetected(Vec<NodeId>),

    #[error("Input pin {0} is a member of more than one link!")]
    MultipleLinksOnInput(PinId),

    #[error("Link Rejected: [{cat}] {0}", cat = .0.category())]
    LinkRejected(LinkRejection),

    #[error("Only one node of type: \"{0}\" allowed per sheet!")]
    DuplicateMarker(&'static str),

    #[error("Node {0} cannot be deleted")]
    NotDeletable(NodeId),

    #[error("Timed out after {0}s waiting for calc jobs!")]
    TimedOut(f64),

    #[error("Function sheet {0} not found")]
    FunctionNotFound(SheetId),

    #[error("No function selected")]
    NoFunctionSelected,

    #[error("Function sheet {0} calls itself")]
    RecursiveFunction(SheetId),

    #[error("Function calls nested deeper than {0} levels")]
    FunctionDepthExceeded(usize),

    #[error("Function sheet {sheet} failed: {message}")]
    FunctionFailed { sheet: SheetId, message: String },

    #[error(transparent)]
    Node(#[from] NodeError),
}

fn format_cycle(nodes: &[NodeId]) -> String {
    nodes
        .iter()
        .map(NodeId::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl From<LinkRejection> for SheetError {
    fn from(rejection: LinkRejection) -> Self {
        SheetError::LinkRejected(rejection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            SheetError::CircularDependency(NodeId(12)).to_string(),
            "Circular dependency detected! Already processed node: 12"
        );
        assert_eq!(
            SheetError::CycleDetected(vec![NodeId(1), NodeId(2), NodeId(1)]).to_string(),
            "Circular dependency detected between nodes: 1 -> 2 -> 1"
        );
        assert_eq!(
            SheetError::UnknownNodeClass("Nope".into()).to_string(),
            "Could not find node class: Nope"
        );
        assert_eq!(
            SheetError::LinkRejected(LinkRejection::SameNode(NodeId(4))).to_string(),
            "Link Rejected: [Safety] Both pins are from the same node: 4 !"
        );
    }
}
