//! Dependency resolution into generations.
//!
//! A dependency map lists, for each node, the nodes it consumes from.
//! [`resolve`] peels the map into generations: every node whose
//! dependencies are all in earlier generations goes in the next one. Nodes
//! within a generation are independent and may run concurrently.

use crate::id::NodeId;
use std::collections::{btree_set, BTreeMap, BTreeSet};

/// Node -> the nodes it depends on.
pub type DependencyMap = BTreeMap<NodeId, BTreeSet<NodeId>>;

/// A batch of nodes whose dependencies are satisfied.
pub type Generation = BTreeSet<NodeId>;

/// Splits a dependency map into ordered generations.
///
/// IDs that only appear as dependencies land in the first generation. If a
/// cycle remains, resolution stops at the last generation it could build;
/// use [`find_cycle`] beforehand to reject cyclic maps.
pub fn resolve<T: Ord + Clone>(deps: &BTreeMap<T, BTreeSet<T>>) -> Vec<BTreeSet<T>> {
    let mut remaining: BTreeMap<T, BTreeSet<T>> = deps.clone();
    let mut generations = Vec::new();

    while !remaining.is_empty() {
        // dependency-only IDs, then keys with nothing left to wait on
        let mut ready: BTreeSet<T> = remaining
            .values()
            .flatten()
            .filter(|id| !remaining.contains_key(*id))
            .cloned()
            .collect();
        ready.extend(
            remaining
                .iter()
                .filter(|(_, waits)| waits.is_empty())
                .map(|(id, _)| id.clone()),
        );

        if ready.is_empty() {
            tracing::warn!(
                "Unresolvable dependencies left for {} nodes",
                remaining.len()
            );
            break;
        }

        remaining = remaining
            .into_iter()
            .filter(|(_, waits)| !waits.is_empty())
            .map(|(id, waits)| {
                let left = waits.difference(&ready).cloned().collect();
                (id, left)
            })
            .collect();
        generations.push(ready);
    }

    generations
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

/// Returns one cycle in `deps`, first node repeated at the end, if any.
///
/// Depth-first with an explicit stack, so long chains cannot exhaust the
/// thread stack.
pub fn find_cycle(deps: &DependencyMap) -> Option<Vec<NodeId>> {
    let empty = BTreeSet::new();
    let mut marks: BTreeMap<NodeId, Mark> = BTreeMap::new();
    let mut path: Vec<NodeId> = Vec::new();
    let mut frames: Vec<btree_set::Iter<'_, NodeId>> = Vec::new();

    for root in deps.keys() {
        if marks.contains_key(root) {
            continue;
        }
        marks.insert(*root, Mark::Visiting);
        path.push(*root);
        frames.push(deps.get(root).unwrap_or(&empty).iter());

        while let Some(frame) = frames.last_mut() {
            match frame.next() {
                Some(dep) => match marks.get(dep) {
                    Some(Mark::Done) => {}
                    Some(Mark::Visiting) => {
                        let start = path.iter().position(|id| id == dep).unwrap_or(0);
                        let mut cycle = path[start..].to_vec();
                        cycle.push(*dep);
                        return Some(cycle);
                    }
                    None => {
                        marks.insert(*dep, Mark::Visiting);
                        path.push(*dep);
                        frames.push(deps.get(dep).unwrap_or(&empty).iter());
                    }
                },
                None => {
                    frames.pop();
                    if let Some(done) = path.pop() {
                        marks.insert(done, Mark::Done);
                    }
                }
            }
        }
    }
    None
}
