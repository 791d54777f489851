//! Property tests for the hierarchy builder

use clinitree::{build_hierarchy, flatten_hierarchy, DecisionNode, NodeKind, NodeWithChildren};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

/// How a generated node picks its parent
#[derive(Debug, Clone)]
enum ParentPick {
    Root,
    /// Index of an earlier node, taken modulo the position
    Earlier(usize),
    /// An id that is not in the list
    Missing(i32),
    /// Any node at all, cycles included
    Any(usize),
}

fn pick() -> impl Strategy<Value = ParentPick> {
    prop_oneof![
        Just(ParentPick::Root),
        any::<usize>().prop_map(ParentPick::Earlier),
        (1000..2000i32).prop_map(ParentPick::Missing),
        any::<usize>().prop_map(ParentPick::Any),
    ]
}

fn make_nodes(picks: &[ParentPick], allow_cycles: bool) -> Vec<DecisionNode> {
    let n = picks.len();
    picks
        .iter()
        .enumerate()
        .map(|(i, pick)| {
            let id = i as i32 + 1;
            let parent = match pick {
                ParentPick::Root => None,
                ParentPick::Earlier(k) if i > 0 => Some((k % i) as i32 + 1),
                ParentPick::Earlier(_) => None,
                ParentPick::Missing(m) => Some(*m),
                ParentPick::Any(k) if allow_cycles => Some((k % n) as i32 + 1),
                ParentPick::Any(_) => None,
            };
            DecisionNode::new(id, 1, parent, NodeKind::diagnosis([id]))
        })
        .collect()
}

/// node id -> parent id inside the built forest (None for roots)
fn placement(forest: &[NodeWithChildren]) -> HashMap<i32, Option<i32>> {
    fn walk(n: &NodeWithChildren, parent: Option<i32>, out: &mut HashMap<i32, Option<i32>>) {
        out.insert(n.node.id, parent);
        for c in &n.children {
            walk(c, Some(n.node.id), out);
        }
    }
    let mut out = HashMap::new();
    for root in forest {
        walk(root, None, &mut out);
    }
    out
}

/// True when following parent links from `id` comes back to `id`
fn on_cycle(id: i32, parents: &HashMap<i32, i32>) -> bool {
    let mut at = id;
    for _ in 0..parents.len() {
        match parents.get(&at) {
            Some(&p) if p == id => return true,
            Some(&p) => at = p,
            None => return false,
        }
    }
    false
}

proptest! {
    #[test]
    fn every_node_appears_exactly_once(
        picks in prop::collection::vec(pick(), 0..40),
        seed in any::<u64>(),
    ) {
        let mut nodes = make_nodes(&picks, true);
        // rotate so children are not always listed after their parents
        if !nodes.is_empty() {
            let by = (seed % nodes.len() as u64) as usize;
            nodes.rotate_left(by);
        }

        let forest = build_hierarchy(&nodes);
        let total: usize = forest.iter().map(|r| r.count()).sum();
        prop_assert_eq!(total, nodes.len());

        let flat = flatten_hierarchy(&forest);
        let ids: HashSet<i32> = flat.iter().map(|n| n.id).collect();
        prop_assert_eq!(ids.len(), nodes.len());
    }

    #[test]
    fn acyclic_input_keeps_parent_links(picks in prop::collection::vec(pick(), 0..40)) {
        let nodes = make_nodes(&picks, false);
        let known: HashSet<i32> = nodes.iter().map(|n| n.id).collect();
        let placed = placement(&build_hierarchy(&nodes));

        for node in &nodes {
            let expected = node.parent_node_id.filter(|p| known.contains(p));
            prop_assert_eq!(placed.get(&node.id).copied(), Some(expected));
        }
    }

    #[test]
    fn rebuilding_from_flattened_keeps_membership(picks in prop::collection::vec(pick(), 0..40)) {
        let nodes = make_nodes(&picks, true);
        let first = build_hierarchy(&nodes);
        let second = build_hierarchy(&flatten_hierarchy(&first));

        prop_assert_eq!(placement(&first), placement(&second));
    }

    #[test]
    fn only_cycle_members_lose_their_parent(
        picks in prop::collection::vec(pick(), 0..40),
        seed in any::<u64>(),
    ) {
        let mut nodes = make_nodes(&picks, true);
        if !nodes.is_empty() {
            let by = (seed % nodes.len() as u64) as usize;
            nodes.rotate_left(by);
        }
        let known: HashSet<i32> = nodes.iter().map(|n| n.id).collect();
        let parents: HashMap<i32, i32> = nodes
            .iter()
            .filter_map(|n| n.parent_node_id.filter(|p| known.contains(p) && *p != n.id).map(|p| (n.id, p)))
            .collect();
        let placed = placement(&build_hierarchy(&nodes));

        for node in &nodes {
            let Some(&parent) = parents.get(&node.id) else {
                prop_assert_eq!(placed.get(&node.id).copied(), Some(None));
                continue;
            };
            match placed.get(&node.id).copied() {
                Some(Some(p)) => {
                    prop_assert_eq!(p, parent);
                }
                Some(None) => {
                    prop_assert!(on_cycle(node.id, &parents), "node {} promoted off a cycle", node.id);
                }
                None => {
                    prop_assert!(false, "node {} missing", node.id);
                }
            }
        }
    }
}
