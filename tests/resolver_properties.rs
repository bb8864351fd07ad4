//! Property tests for dependency resolution

mod common;

use althea_engine::sheet::resolver::resolve;
use common::builders::SheetBuilder;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// Random DAG: node `i` may only depend on nodes below `i`.
fn acyclic_map() -> impl Strategy<Value = BTreeMap<u32, BTreeSet<u32>>> {
    (1usize..40).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::btree_set(0u32..n as u32, 0..5), n).prop_map(
            |deps| {
                deps.into_iter()
                    .enumerate()
                    .filter(|(i, _)| i % 3 != 1)
                    .map(|(i, set)| {
                        let i = i as u32;
                        (i, set.into_iter().filter(|dep| *dep < i).collect())
                    })
                    .collect()
            },
        )
    })
}

proptest! {
    #[test]
    fn resolve_partitions_every_id(deps in acyclic_map()) {
        let generations = resolve(&deps);

        let mut expected: BTreeSet<u32> = deps.keys().copied().collect();
        expected.extend(deps.values().flatten().copied());

        let mut seen = BTreeSet::new();
        for generation in &generations {
            prop_assert!(!generation.is_empty());
            for id in generation {
                prop_assert!(seen.insert(*id), "{} appears twice", id);
            }
        }
        prop_assert_eq!(seen, expected);
    }

    #[test]
    fn resolve_orders_producers_first(deps in acyclic_map()) {
        let generations = resolve(&deps);
        let index: BTreeMap<u32, usize> = generations
            .iter()
            .enumerate()
            .flat_map(|(i, generation)| generation.iter().map(move |id| (*id, i)))
            .collect();

        for (consumer, producers) in &deps {
            for producer in producers {
                prop_assert!(index[producer] < index[consumer]);
            }
        }
    }
}

#[test]
fn unlinked_nodes_need_no_work() {
    let mut builder = SheetBuilder::new("Loose");
    let ids = vec![builder.number(1), builder.node("MathAdd"), builder.node("View")];
    let (sheet, _) = builder.build();
    assert!(sheet.build_dependency_graph(&ids).unwrap().is_empty());
    assert!(sheet.dependency_generations(&ids, false).unwrap().is_empty());
}

#[test]
fn chain_resolves_one_node_per_generation() {
    let mut builder = SheetBuilder::new("Chain");
    let mut previous = builder.number(1);
    let mut nodes = vec![previous];
    for _ in 0..5 {
        let next = builder.node("MathInvert");
        builder.link(previous, 0, next, 0).unwrap();
        nodes.push(next);
        previous = next;
    }
    let (sheet, _) = builder.build();
    let generations = sheet.dependency_generations(&nodes, true).unwrap();
    assert_eq!(generations.len(), nodes.len());
    for (generation, node) in generations.iter().zip(&nodes) {
        assert_eq!(generation, &BTreeSet::from([*node]));
    }
}
