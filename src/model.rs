//! Domain types for decision trees
//!
//! Stored rows are flat (one row shape for every node type); these types are
//! what the rest of the crate works with. Conversion happens in `db`.

use diesel::{Queryable, Selectable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Discriminant of a node, as stored in `decision_nodes.node_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Question,
    Diagnosis,
    Tests,
}

/// Valid node types
pub const NODE_TYPES: &[&str] = &["question", "diagnosis", "tests"];

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Question => "question",
            NodeType::Diagnosis => "diagnosis",
            NodeType::Tests => "tests",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "question" => Ok(NodeType::Question),
            "diagnosis" => Ok(NodeType::Diagnosis),
            "tests" => Ok(NodeType::Tests),
            other => Err(format!(
                "unknown node type '{}' (expected one of: {})",
                other,
                NODE_TYPES.join(", ")
            )),
        }
    }
}

/// Type-specific payload of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    /// Asks the practitioner something; answers branch from here
    Question { text: String },
    /// Concludes with one or more candidate pathologies, in order
    Diagnosis { pathology_ids: Vec<i32> },
    /// Prescribes orthopedic tests and/or test clusters
    Tests {
        test_ids: Vec<i32>,
        cluster_ids: Vec<i32>,
    },
}

impl NodeKind {
    pub fn question(text: impl Into<String>) -> Self {
        NodeKind::Question { text: text.into() }
    }

    pub fn diagnosis(pathology_ids: impl IntoIterator<Item = i32>) -> Self {
        NodeKind::Diagnosis {
            pathology_ids: dedup_in_order(pathology_ids),
        }
    }

    pub fn tests(
        test_ids: impl IntoIterator<Item = i32>,
        cluster_ids: impl IntoIterator<Item = i32>,
    ) -> Self {
        NodeKind::Tests {
            test_ids: dedup_in_order(test_ids),
            cluster_ids: dedup_in_order(cluster_ids),
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Question { .. } => NodeType::Question,
            NodeKind::Diagnosis { .. } => NodeType::Diagnosis,
            NodeKind::Tests { .. } => NodeType::Tests,
        }
    }

    /// Trimmed text and de-duplicated id lists
    pub fn normalized(self) -> Self {
        match self {
            NodeKind::Question { text } => NodeKind::Question {
                text: text.trim().to_string(),
            },
            NodeKind::Diagnosis { pathology_ids } => NodeKind::diagnosis(pathology_ids),
            NodeKind::Tests {
                test_ids,
                cluster_ids,
            } => NodeKind::tests(test_ids, cluster_ids),
        }
    }

    /// One-line description for listings
    pub fn summary(&self) -> String {
        match self {
            NodeKind::Question { text } => text.clone(),
            NodeKind::Diagnosis { pathology_ids } => {
                format!("pathologies [{}]", join_ids(pathology_ids))
            }
            NodeKind::Tests {
                test_ids,
                cluster_ids,
            } => format!(
                "tests [{}] clusters [{}]",
                join_ids(test_ids),
                join_ids(cluster_ids)
            ),
        }
    }
}

fn dedup_in_order(ids: impl IntoIterator<Item = i32>) -> Vec<i32> {
    let mut out: Vec<i32> = Vec::new();
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

pub(crate) fn join_ids(ids: &[i32]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A named diagnostic pathway scoped to one zone
#[derive(Queryable, Selectable, Debug, Clone, PartialEq, Eq, Serialize)]
#[diesel(table_name = crate::schema::decision_trees)]
pub struct DecisionTree {
    pub id: i32,
    pub topographic_zone_id: i32,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A step in a tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionNode {
    pub id: i32,
    pub tree_id: i32,
    /// `None` for a root
    pub parent_node_id: Option<i32>,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl DecisionNode {
    pub fn new(id: i32, tree_id: i32, parent_node_id: Option<i32>, kind: NodeKind) -> Self {
        Self {
            id,
            tree_id,
            parent_node_id,
            kind,
        }
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    pub fn is_question(&self) -> bool {
        matches!(self.kind, NodeKind::Question { .. })
    }
}

/// A choice attached to a question node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionAnswer {
    pub id: i32,
    pub node_id: i32,
    pub answer_text: String,
    pub display_order: i32,
    /// `None` while the branch has no follow-up node yet
    pub next_node_id: Option<i32>,
}

/// One tree with everything needed to render or validate it
#[derive(Debug, Clone, Serialize)]
pub struct TreeSnapshot {
    pub tree: DecisionTree,
    /// Insertion order
    pub nodes: Vec<DecisionNode>,
    /// Grouped by node, then display order
    pub answers: Vec<DecisionAnswer>,
}

impl TreeSnapshot {
    pub fn node(&self, id: i32) -> Option<&DecisionNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn answers_for(&self, node_id: i32) -> impl Iterator<Item = &DecisionAnswer> {
        self.answers.iter().filter(move |a| a.node_id == node_id)
    }
}

/// Fields of a tree that may be changed after creation
#[derive(Debug, Clone, Default)]
pub struct TreeUpdate {
    pub topographic_zone_id: Option<i32>,
    pub name: Option<String>,
    /// `Some(None)` clears the description
    pub description: Option<Option<String>>,
}

/// Fields of an answer that may be changed after creation
#[derive(Debug, Clone, Default)]
pub struct AnswerUpdate {
    pub answer_text: Option<String>,
    pub display_order: Option<i32>,
    /// `Some(None)` detaches the follow-up node
    pub next_node_id: Option<Option<i32>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_parse() {
        assert_eq!("question".parse::<NodeType>().unwrap(), NodeType::Question);
        assert_eq!("tests".parse::<NodeType>().unwrap(), NodeType::Tests);
        let err = "goal".parse::<NodeType>().unwrap_err();
        assert!(err.contains("unknown node type 'goal'"));
    }

    #[test]
    fn test_constructors_deduplicate_keeping_first() {
        assert_eq!(
            NodeKind::diagnosis([3, 1, 3, 2, 1]),
            NodeKind::Diagnosis {
                pathology_ids: vec![3, 1, 2]
            }
        );
        assert_eq!(
            NodeKind::tests([5, 5], [9, 8, 9]),
            NodeKind::Tests {
                test_ids: vec![5],
                cluster_ids: vec![9, 8]
            }
        );
    }

    #[test]
    fn test_normalized_trims_question_text() {
        let kind = NodeKind::question("  Douleur nocturne ?  ").normalized();
        assert_eq!(kind, NodeKind::question("Douleur nocturne ?"));
    }

    #[test]
    fn test_summary() {
        assert_eq!(NodeKind::diagnosis([1, 2]).summary(), "pathologies [1, 2]");
        assert_eq!(
            NodeKind::tests([4], Vec::new()).summary(),
            "tests [4] clusters []"
        );
    }

    #[test]
    fn test_node_serializes_with_type_tag() {
        let node = DecisionNode::new(7, 1, Some(3), NodeKind::diagnosis([11]));
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "diagnosis");
        assert_eq!(json["pathology_ids"][0], 11);
        assert_eq!(json["parent_node_id"], 3);
    }

    #[test]
    fn test_kind_deserializes_from_tagged_json() {
        let kind: NodeKind =
            serde_json::from_str(r#"{"type":"tests","test_ids":[1],"cluster_ids":[]}"#).unwrap();
        assert_eq!(kind, NodeKind::tests([1], Vec::new()));
    }
}
