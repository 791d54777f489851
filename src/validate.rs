//! Structural checks over one decision tree
//!
//! Validation is read-only and advisory: defects are returned as data and
//! never block further edits.

use crate::model::{DecisionAnswer, NodeKind, TreeSnapshot};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Ids known to the reference catalog, for link checks
#[derive(Debug, Clone, Default)]
pub struct CatalogIndex {
    pub pathology_ids: HashSet<i32>,
    pub test_ids: HashSet<i32>,
    pub cluster_ids: HashSet<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOptions {
    /// When set, pathology/test/cluster ids missing from it are reported
    pub catalog: Option<CatalogIndex>,
}

/// A structural problem in a tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Defect {
    EmptyTree,
    DeadEndQuestion { node_id: i32 },
    EmptyQuestionText { node_id: i32 },
    IncompleteAnswer { answer_id: i32, node_id: i32, answer_text: String },
    DanglingAnswerTarget { answer_id: i32, next_node_id: i32 },
    AnswerOnNonQuestion { answer_id: i32, node_id: i32 },
    MissingPathology { node_id: i32 },
    MissingTests { node_id: i32 },
    OrphanedNode { node_id: i32, parent_node_id: i32 },
    UnreachableNode { node_id: i32 },
    UnknownPathology { node_id: i32, pathology_id: i32 },
    UnknownTest { node_id: i32, test_id: i32 },
    UnknownCluster { node_id: i32, cluster_id: i32 },
}

impl Defect {
    /// Node the defect should be shown against
    pub fn node_id(&self) -> Option<i32> {
        match self {
            Defect::EmptyTree | Defect::DanglingAnswerTarget { .. } => None,
            Defect::DeadEndQuestion { node_id }
            | Defect::EmptyQuestionText { node_id }
            | Defect::IncompleteAnswer { node_id, .. }
            | Defect::AnswerOnNonQuestion { node_id, .. }
            | Defect::MissingPathology { node_id }
            | Defect::MissingTests { node_id }
            | Defect::OrphanedNode { node_id, .. }
            | Defect::UnreachableNode { node_id }
            | Defect::UnknownPathology { node_id, .. }
            | Defect::UnknownTest { node_id, .. }
            | Defect::UnknownCluster { node_id, .. } => Some(*node_id),
        }
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Defect::EmptyTree => write!(f, "Tree has no nodes, so no root question"),
            Defect::DeadEndQuestion { node_id } => {
                write!(f, "Question node {} has no answers (dead end)", node_id)
            }
            Defect::EmptyQuestionText { node_id } => {
                write!(f, "Question node {} has no question text", node_id)
            }
            Defect::IncompleteAnswer {
                answer_id,
                node_id,
                answer_text,
            } => write!(
                f,
                "Answer {} (\"{}\") on node {} has no next node (incomplete branch)",
                answer_id, answer_text, node_id
            ),
            Defect::DanglingAnswerTarget {
                answer_id,
                next_node_id,
            } => write!(
                f,
                "Answer {} points to node {} which is not in this tree",
                answer_id, next_node_id
            ),
            Defect::AnswerOnNonQuestion { answer_id, node_id } => write!(
                f,
                "Answer {} is attached to node {} which is not a question",
                answer_id, node_id
            ),
            Defect::MissingPathology { node_id } => {
                write!(f, "Diagnosis node {} is missing pathology links", node_id)
            }
            Defect::MissingTests { node_id } => {
                write!(f, "Tests node {} has neither tests nor clusters", node_id)
            }
            Defect::OrphanedNode {
                node_id,
                parent_node_id,
            } => write!(
                f,
                "Node {} references parent {} which does not exist (orphaned)",
                node_id, parent_node_id
            ),
            Defect::UnreachableNode { node_id } => {
                write!(f, "Node {} cannot be reached from any root", node_id)
            }
            Defect::UnknownPathology {
                node_id,
                pathology_id,
            } => write!(
                f,
                "Diagnosis node {} links unknown pathology {}",
                node_id, pathology_id
            ),
            Defect::UnknownTest { node_id, test_id } => {
                write!(f, "Tests node {} links unknown test {}", node_id, test_id)
            }
            Defect::UnknownCluster {
                node_id,
                cluster_id,
            } => write!(
                f,
                "Tests node {} links unknown cluster {}",
                node_id, cluster_id
            ),
        }
    }
}

/// Outcome of validating one tree; no defects means valid
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub tree_id: i32,
    pub valid: bool,
    pub errors: Vec<String>,
    pub defects: Vec<Defect>,
}

impl ValidationReport {
    pub fn new(tree_id: i32, defects: Vec<Defect>) -> Self {
        Self {
            tree_id,
            valid: defects.is_empty(),
            errors: defects.iter().map(|d| d.to_string()).collect(),
            defects,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

/// Check one tree. Defects come out in node order, then unreachable nodes.
pub fn validate_snapshot(snapshot: &TreeSnapshot, options: &ValidationOptions) -> ValidationReport {
    let tree_id = snapshot.tree.id;
    let nodes = &snapshot.nodes;

    if nodes.is_empty() {
        return ValidationReport::new(tree_id, vec![Defect::EmptyTree]);
    }

    let known: HashSet<i32> = nodes.iter().map(|n| n.id).collect();
    let mut answers_by_node: HashMap<i32, Vec<&DecisionAnswer>> = HashMap::new();
    for answer in &snapshot.answers {
        answers_by_node.entry(answer.node_id).or_default().push(answer);
    }

    let mut defects = Vec::new();
    let mut orphaned: HashSet<i32> = HashSet::new();

    for node in nodes {
        if let Some(parent) = node.parent_node_id {
            if !known.contains(&parent) {
                orphaned.insert(node.id);
                defects.push(Defect::OrphanedNode {
                    node_id: node.id,
                    parent_node_id: parent,
                });
            }
        }

        let answers = answers_by_node.get(&node.id).map(Vec::as_slice).unwrap_or(&[]);

        match &node.kind {
            NodeKind::Question { text } => {
                if text.trim().is_empty() {
                    defects.push(Defect::EmptyQuestionText { node_id: node.id });
                }
                if answers.is_empty() {
                    defects.push(Defect::DeadEndQuestion { node_id: node.id });
                }
            }
            NodeKind::Diagnosis { pathology_ids } => {
                if pathology_ids.is_empty() {
                    defects.push(Defect::MissingPathology { node_id: node.id });
                }
                if let Some(catalog) = &options.catalog {
                    for &pathology_id in pathology_ids {
                        if !catalog.pathology_ids.contains(&pathology_id) {
                            defects.push(Defect::UnknownPathology {
                                node_id: node.id,
                                pathology_id,
                            });
                        }
                    }
                }
            }
            NodeKind::Tests {
                test_ids,
                cluster_ids,
            } => {
                if test_ids.is_empty() && cluster_ids.is_empty() {
                    defects.push(Defect::MissingTests { node_id: node.id });
                }
                if let Some(catalog) = &options.catalog {
                    for &test_id in test_ids {
                        if !catalog.test_ids.contains(&test_id) {
                            defects.push(Defect::UnknownTest {
                                node_id: node.id,
                                test_id,
                            });
                        }
                    }
                    for &cluster_id in cluster_ids {
                        if !catalog.cluster_ids.contains(&cluster_id) {
                            defects.push(Defect::UnknownCluster {
                                node_id: node.id,
                                cluster_id,
                            });
                        }
                    }
                }
            }
        }

        for answer in answers {
            if !node.is_question() {
                defects.push(Defect::AnswerOnNonQuestion {
                    answer_id: answer.id,
                    node_id: node.id,
                });
            }
            match answer.next_node_id {
                None => defects.push(Defect::IncompleteAnswer {
                    answer_id: answer.id,
                    node_id: node.id,
                    answer_text: answer.answer_text.clone(),
                }),
                Some(next) if !known.contains(&next) => {
                    defects.push(Defect::DanglingAnswerTarget {
                        answer_id: answer.id,
                        next_node_id: next,
                    })
                }
                Some(_) => {}
            }
        }
    }

    let reached = reachable_from_roots(snapshot);
    for node in nodes {
        if !reached.contains(&node.id) && !orphaned.contains(&node.id) {
            defects.push(Defect::UnreachableNode { node_id: node.id });
        }
    }

    ValidationReport::new(tree_id, defects)
}

/// Nodes reachable from a root through parent links or answer targets
fn reachable_from_roots(snapshot: &TreeSnapshot) -> HashSet<i32> {
    let mut next: HashMap<i32, Vec<i32>> = HashMap::new();
    for node in &snapshot.nodes {
        if let Some(parent) = node.parent_node_id {
            next.entry(parent).or_default().push(node.id);
        }
    }
    for answer in &snapshot.answers {
        if let Some(target) = answer.next_node_id {
            next.entry(answer.node_id).or_default().push(target);
        }
    }

    let mut reached: HashSet<i32> = HashSet::new();
    let mut to_visit: Vec<i32> = snapshot
        .nodes
        .iter()
        .filter(|n| n.parent_node_id.is_none())
        .map(|n| n.id)
        .collect();

    while let Some(id) = to_visit.pop() {
        if reached.insert(id) {
            if let Some(targets) = next.get(&id) {
                to_visit.extend(targets);
            }
        }
    }
    reached
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DecisionNode, DecisionTree};

    fn tree() -> DecisionTree {
        DecisionTree {
            id: 1,
            topographic_zone_id: 1,
            name: "Cervicalgie".to_string(),
            description: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn snapshot(nodes: Vec<DecisionNode>, answers: Vec<DecisionAnswer>) -> TreeSnapshot {
        TreeSnapshot {
            tree: tree(),
            nodes,
            answers,
        }
    }

    fn answer(id: i32, node_id: i32, next: Option<i32>) -> DecisionAnswer {
        DecisionAnswer {
            id,
            node_id,
            answer_text: format!("A{}", id),
            display_order: id,
            next_node_id: next,
        }
    }

    fn check(s: &TreeSnapshot) -> ValidationReport {
        validate_snapshot(s, &ValidationOptions::default())
    }

    #[test]
    fn test_question_then_diagnosis_is_valid() {
        let s = snapshot(
            vec![
                DecisionNode::new(1, 1, None, NodeKind::question("Douleur irradiante ?")),
                DecisionNode::new(2, 1, Some(1), NodeKind::diagnosis([1])),
            ],
            vec![answer(1, 1, Some(2))],
        );
        let report = check(&s);
        assert!(report.is_valid(), "unexpected: {:?}", report.errors());
        assert!(report.errors().is_empty());
    }

    #[test]
    fn test_lone_diagnosis_root_is_valid() {
        let s = snapshot(vec![DecisionNode::new(1, 1, None, NodeKind::diagnosis([4, 5]))], vec![]);
        assert!(check(&s).is_valid());
    }

    #[test]
    fn test_question_without_answers_is_dead_end() {
        let s = snapshot(vec![DecisionNode::new(1, 1, None, NodeKind::question("Q ?"))], vec![]);
        let report = check(&s);
        assert!(!report.errors().is_empty());
        assert_eq!(report.defects, vec![Defect::DeadEndQuestion { node_id: 1 }]);
    }

    #[test]
    fn test_empty_diagnosis_reports_missing_pathology() {
        let s = snapshot(vec![DecisionNode::new(3, 1, None, NodeKind::diagnosis([]))], vec![]);
        let report = check(&s);
        assert!(report.errors().iter().any(|e| e.contains("missing pathology")));
    }

    #[test]
    fn test_empty_tests_node() {
        let s = snapshot(
            vec![DecisionNode::new(1, 1, None, NodeKind::tests([], []))],
            vec![],
        );
        assert_eq!(check(&s).defects, vec![Defect::MissingTests { node_id: 1 }]);

        let only_cluster = snapshot(
            vec![DecisionNode::new(1, 1, None, NodeKind::tests([], [2]))],
            vec![],
        );
        assert!(check(&only_cluster).is_valid());
    }

    #[test]
    fn test_answer_without_next_node_is_incomplete() {
        let s = snapshot(
            vec![
                DecisionNode::new(1, 1, None, NodeKind::question("Q ?")),
                DecisionNode::new(2, 1, Some(1), NodeKind::diagnosis([1])),
            ],
            vec![answer(1, 1, Some(2)), answer(2, 1, None)],
        );
        let report = check(&s);
        assert_eq!(report.defects.len(), 1);
        assert!(matches!(
            report.defects[0],
            Defect::IncompleteAnswer { answer_id: 2, node_id: 1, .. }
        ));
        assert!(report.errors()[0].contains("incomplete branch"));
    }

    #[test]
    fn test_orphan_is_reported_once_and_descendants_unreachable() {
        let s = snapshot(
            vec![
                DecisionNode::new(1, 1, None, NodeKind::diagnosis([1])),
                DecisionNode::new(2, 1, Some(50), NodeKind::diagnosis([1])),
                DecisionNode::new(3, 1, Some(2), NodeKind::diagnosis([1])),
            ],
            vec![],
        );
        assert_eq!(
            check(&s).defects,
            vec![
                Defect::OrphanedNode {
                    node_id: 2,
                    parent_node_id: 50
                },
                Defect::UnreachableNode { node_id: 3 },
            ]
        );
    }

    #[test]
    fn test_parent_cycle_is_unreachable() {
        let s = snapshot(
            vec![
                DecisionNode::new(1, 1, None, NodeKind::diagnosis([1])),
                DecisionNode::new(2, 1, Some(3), NodeKind::diagnosis([1])),
                DecisionNode::new(3, 1, Some(2), NodeKind::diagnosis([1])),
            ],
            vec![],
        );
        assert_eq!(
            check(&s).defects,
            vec![
                Defect::UnreachableNode { node_id: 2 },
                Defect::UnreachableNode { node_id: 3 },
            ]
        );
    }

    #[test]
    fn test_answer_target_makes_node_reachable() {
        // node 3 is its own parent but an answer from the root leads to it
        let s = snapshot(
            vec![
                DecisionNode::new(1, 1, None, NodeKind::question("Q ?")),
                DecisionNode::new(3, 1, Some(3), NodeKind::diagnosis([1])),
            ],
            vec![answer(1, 1, Some(3))],
        );
        assert!(check(&s).is_valid());
    }

    #[test]
    fn test_dangling_answer_target() {
        let s = snapshot(
            vec![DecisionNode::new(1, 1, None, NodeKind::question("Q ?"))],
            vec![answer(7, 1, Some(99))],
        );
        assert_eq!(
            check(&s).defects,
            vec![Defect::DanglingAnswerTarget {
                answer_id: 7,
                next_node_id: 99
            }]
        );
    }

    #[test]
    fn test_answer_on_diagnosis_node() {
        let s = snapshot(
            vec![
                DecisionNode::new(1, 1, None, NodeKind::diagnosis([1])),
                DecisionNode::new(2, 1, Some(1), NodeKind::diagnosis([2])),
            ],
            vec![answer(1, 1, Some(2))],
        );
        assert_eq!(
            check(&s).defects,
            vec![Defect::AnswerOnNonQuestion {
                answer_id: 1,
                node_id: 1
            }]
        );
    }

    #[test]
    fn test_blank_question_text() {
        let s = snapshot(
            vec![
                DecisionNode::new(1, 1, None, NodeKind::question("   ")),
                DecisionNode::new(2, 1, Some(1), NodeKind::diagnosis([1])),
            ],
            vec![answer(1, 1, Some(2))],
        );
        assert_eq!(check(&s).defects, vec![Defect::EmptyQuestionText { node_id: 1 }]);
    }

    #[test]
    fn test_empty_tree() {
        let report = check(&snapshot(vec![], vec![]));
        assert_eq!(report.defects, vec![Defect::EmptyTree]);
        assert!(!report.is_valid());
    }

    #[test]
    fn test_catalog_links_checked_only_when_enabled() {
        let s = snapshot(
            vec![
                DecisionNode::new(1, 1, None, NodeKind::question("Q ?")),
                DecisionNode::new(2, 1, Some(1), NodeKind::diagnosis([1, 2])),
                DecisionNode::new(3, 1, Some(1), NodeKind::tests([10], [20])),
            ],
            vec![answer(1, 1, Some(2)), answer(2, 1, Some(3))],
        );
        assert!(check(&s).is_valid());

        let options = ValidationOptions {
            catalog: Some(CatalogIndex {
                pathology_ids: HashSet::from([1]),
                test_ids: HashSet::new(),
                cluster_ids: HashSet::from([20]),
            }),
        };
        assert_eq!(
            validate_snapshot(&s, &options).defects,
            vec![
                Defect::UnknownPathology {
                    node_id: 2,
                    pathology_id: 2
                },
                Defect::UnknownTest {
                    node_id: 3,
                    test_id: 10
                },
            ]
        );
    }

    #[test]
    fn test_validation_does_not_touch_snapshot() {
        let s = snapshot(vec![DecisionNode::new(1, 1, None, NodeKind::question("Q ?"))], vec![]);
        let before = format!("{:?}", s);
        let _ = check(&s);
        assert_eq!(before, format!("{:?}", s));
    }

    #[test]
    fn test_report_serializes_errors_and_defects() {
        let report = ValidationReport::new(4, vec![Defect::MissingPathology { node_id: 9 }]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["tree_id"], 4);
        assert_eq!(json["valid"], false);
        assert_eq!(json["defects"][0]["kind"], "missing_pathology");
        assert_eq!(json["defects"][0]["node_id"], 9);
        assert!(json["errors"][0].as_str().unwrap().contains("missing pathology"));
    }

    #[test]
    fn test_defect_node_id() {
        assert_eq!(Defect::EmptyTree.node_id(), None);
        assert_eq!(Defect::UnreachableNode { node_id: 5 }.node_id(), Some(5));
    }
}
