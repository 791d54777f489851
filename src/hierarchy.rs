//! Flat node list -> forest
//!
//! Nodes are persisted flat with a `parent_node_id` back-reference. The forest
//! is rebuilt in memory whenever a tree is rendered.

use crate::model::DecisionNode;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// A node together with its children, in input order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeWithChildren {
    #[serde(flatten)]
    pub node: DecisionNode,
    pub children: Vec<NodeWithChildren>,
}

impl NodeWithChildren {
    /// Nodes in this subtree, including self
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(|c| c.count()).sum::<usize>()
    }

    /// Levels in this subtree; a leaf has depth 1
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(|c| c.depth()).max().unwrap_or(0)
    }

    pub fn find(&self, id: i32) -> Option<&NodeWithChildren> {
        if self.node.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }
}

/// Build the forest for a list of nodes.
///
/// Children keep the order they have in `nodes`, so callers that need a
/// stable visual order sort first. A node whose parent is null, or does not
/// resolve to any node in the list, becomes a root. Each parent cycle gives
/// up one member (its first in input order) as an extra root, so that no node
/// is ever dropped; everything else keeps its parent.
pub fn build_hierarchy(nodes: &[DecisionNode]) -> Vec<NodeWithChildren> {
    let mut index: HashMap<i32, usize> = HashMap::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        index.entry(node.id).or_insert(i);
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut parents: Vec<Option<usize>> = vec![None; nodes.len()];
    let mut roots: Vec<usize> = Vec::new();

    for (i, node) in nodes.iter().enumerate() {
        match node.parent_node_id.and_then(|p| index.get(&p)) {
            Some(&parent) if parent != i => {
                children[parent].push(i);
                parents[i] = Some(parent);
            }
            _ => roots.push(i),
        }
    }

    let mut placed = vec![false; nodes.len()];
    let mut forest: Vec<NodeWithChildren> = roots
        .into_iter()
        .map(|r| assemble(r, nodes, &children, &mut placed))
        .collect();

    // Anything left hangs off a cycle; placed nodes always carry their
    // whole subtree, so the ancestors of an unplaced node are unplaced too
    for i in 0..nodes.len() {
        if !placed[i] {
            let entry = cycle_entry(&parents, i);
            forest.push(assemble(entry, nodes, &children, &mut placed));
        }
    }

    forest
}

/// First member, in input order, of the parent cycle above `start`.
///
/// `parents` maps each index to its parent index. Following it from `start`
/// must end in a cycle; a chain that reaches a root returns that root.
pub(crate) fn cycle_entry(parents: &[Option<usize>], start: usize) -> usize {
    let mut seen = vec![false; parents.len()];
    let mut at = start;
    while !seen[at] {
        seen[at] = true;
        match parents[at] {
            Some(p) => at = p,
            None => return at,
        }
    }

    // `at` is on the cycle; walk it once to find its smallest index
    let mut first = at;
    let mut cur = at;
    while let Some(p) = parents[cur] {
        if p == at {
            break;
        }
        first = first.min(p);
        cur = p;
    }
    first
}

fn assemble(
    i: usize,
    nodes: &[DecisionNode],
    children: &[Vec<usize>],
    placed: &mut [bool],
) -> NodeWithChildren {
    placed[i] = true;
    let mut kids = Vec::with_capacity(children[i].len());
    for &c in &children[i] {
        if !placed[c] {
            kids.push(assemble(c, nodes, children, placed));
        }
    }
    NodeWithChildren {
        node: nodes[i].clone(),
        children: kids,
    }
}

/// Pre-order walk of a forest back into a flat list
pub fn flatten_hierarchy(forest: &[NodeWithChildren]) -> Vec<DecisionNode> {
    fn walk(n: &NodeWithChildren, out: &mut Vec<DecisionNode>) {
        out.push(n.node.clone());
        for c in &n.children {
            walk(c, out);
        }
    }

    let mut out = Vec::new();
    for root in forest {
        walk(root, &mut out);
    }
    out
}

/// Ids of every node below `root_id` by parent links, not including it
pub fn descendant_ids(nodes: &[DecisionNode], root_id: i32) -> HashSet<i32> {
    let mut by_parent: HashMap<i32, Vec<i32>> = HashMap::new();
    for node in nodes {
        if let Some(parent) = node.parent_node_id {
            by_parent.entry(parent).or_default().push(node.id);
        }
    }

    let mut found: HashSet<i32> = HashSet::new();
    let mut to_visit: Vec<i32> = vec![root_id];
    while let Some(id) = to_visit.pop() {
        if let Some(kids) = by_parent.get(&id) {
            for &kid in kids {
                if kid != root_id && found.insert(kid) {
                    to_visit.push(kid);
                }
            }
        }
    }
    found
}
