//! Dependency tracing over a sheet's links.

use super::resolver::{find_cycle, resolve, DependencyMap, Generation};
use super::{Sheet, SheetError};
use crate::id::{NodeId, PinId};
use std::collections::{BTreeSet, VecDeque};

impl Sheet {
    /// Output node feeding `input`, failing if more than one link targets it.
    fn upstream_of(&self, input: PinId) -> Result<Option<NodeId>, SheetError> {
        let mut links = self.links.iter().filter(|link| link.input_id == input);
        match (links.next(), links.next()) {
            (None, _) => Ok(None),
            (Some(link), None) => Ok(Some(link.output_node_id)),
            (Some(_), Some(_)) => Err(SheetError::MultipleLinksOnInput(input)),
        }
    }

    /// Maps each participating node to the nodes it reads from.
    ///
    /// A node participates when it has at least one linked input or output,
    /// so unconnected nodes never produce work. Cycles are rejected here.
    pub fn build_dependency_graph(&self, node_ids: &[NodeId]) -> Result<DependencyMap, SheetError> {
        let mut deps = DependencyMap::new();
        for node_id in node_ids {
            let node = self
                .find_node(*node_id)
                .ok_or(SheetError::NodeNotFound(*node_id))?;
            let mut upstream = BTreeSet::new();
            let mut needs_calc = false;
            for pin in &node.inputs {
                if let Some(source) = self.upstream_of(pin.id)? {
                    upstream.insert(source);
                    needs_calc = true;
                }
            }
            if node.outputs.iter().any(|pin| self.is_linked(pin.id)) {
                needs_calc = true;
            }
            if needs_calc {
                deps.insert(*node_id, upstream);
            }
        }

        if let Some(cycle) = find_cycle(&deps) {
            return Err(SheetError::CycleDetected(cycle));
        }
        Ok(deps)
    }

    /// Dependency graph for `node_ids`, resolved into generations.
    pub fn dependency_generations(
        &self,
        node_ids: &[NodeId],
        log_graphs: bool,
    ) -> Result<Vec<Generation>, SheetError> {
        let deps = self.build_dependency_graph(node_ids)?;
        if log_graphs {
            log_dependency_map(&deps);
        }
        let generations = resolve(&deps);
        if log_graphs {
            log_generations(&generations);
        }
        Ok(generations)
    }

    /// `seeds` plus every node they read from, transitively.
    pub fn build_dependency_list(&self, seeds: &[NodeId]) -> Result<BTreeSet<NodeId>, SheetError> {
        let mut found: BTreeSet<NodeId> = seeds.iter().copied().collect();
        let mut queue: VecDeque<NodeId> = found.iter().copied().collect();
        while let Some(node_id) = queue.pop_front() {
            let Some(node) = self.find_node(node_id) else {
                continue;
            };
            for pin in &node.inputs {
                if let Some(source) = self.upstream_of(pin.id)? {
                    if found.insert(source) {
                        queue.push_back(source);
                    }
                }
            }
        }
        Ok(found)
    }

    /// `seeds` plus every node reading from them, transitively.
    ///
    /// Seeds that are not on this sheet are dropped with a warning.
    pub fn build_affected_list(&self, seeds: &[NodeId]) -> BTreeSet<NodeId> {
        let mut found = BTreeSet::new();
        let mut queue = VecDeque::new();
        for seed in seeds {
            if self.find_node(*seed).is_some() {
                if found.insert(*seed) {
                    queue.push_back(*seed);
                }
            } else {
                tracing::warn!("Skipping invalid node id: {}", seed);
            }
        }
        while let Some(node_id) = queue.pop_front() {
            let Some(node) = self.find_node(node_id) else {
                continue;
            };
            for pin in &node.outputs {
                for link in self.links.iter().filter(|link| link.output_id == pin.id) {
                    if found.insert(link.input_node_id) {
                        queue.push_back(link.input_node_id);
                    }
                }
            }
        }
        found
    }

    /// Nodes with a dirty flag.
    pub fn changed_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|node| node.has_changed())
            .map(|node| node.id)
            .collect()
    }

    /// Generations needed to bring dirty nodes and their inputs up to date.
    pub fn find_changed(&self, log_graphs: bool) -> Result<Vec<Generation>, SheetError> {
        let changed = self.changed_nodes();
        if changed.is_empty() {
            return Ok(Vec::new());
        }
        let affected: Vec<NodeId> = self.build_dependency_list(&changed)?.into_iter().collect();
        self.dependency_generations(&affected, log_graphs)
    }
}

fn log_dependency_map(deps: &DependencyMap) {
    tracing::debug!("Dependencies (first pass):");
    for (node, upstream) in deps {
        if upstream.is_empty() {
            tracing::debug!("  {}: none", node);
        } else {
            tracing::debug!("  {}: {:?}", node, upstream);
        }
    }
}

fn log_generations(generations: &[Generation]) {
    tracing::debug!("Dependency Graph (second pass):");
    if generations.is_empty() {
        tracing::debug!("  (none)");
    }
    for generation in generations {
        tracing::debug!("  {:?}", generation);
    }
}
