//! Portable tree bundles
//!
//! A bundle is one tree with its nodes and answers as JSON. Nodes reference
//! each other by bundle-local keys, never by database id, so a bundle can be
//! imported into any database. Import always creates a fresh tree.

use crate::db::{check_question_text, insert_answer, insert_node, insert_tree, Database, DbError, Result};
use crate::hierarchy::cycle_entry;
use crate::model::NodeKind;
use crate::zone::Region;
use diesel::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Bundle format version written by `export_bundle`
pub const BUNDLE_VERSION: &str = "1.0";

/// One tree in portable form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeBundle {
    /// Bundle format version
    pub version: String,
    /// Timestamp when the bundle was written
    pub exported_at: String,
    /// Region id of the tree's zone, e.g. "cervical"
    pub zone_region: String,
    pub tree: BundleTree,
    pub nodes: Vec<BundleNode>,
    pub answers: Vec<BundleAnswer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleTree {
    pub name: String,
    pub description: Option<String>,
}

/// A node keyed by a bundle-local string
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleNode {
    pub key: String,
    pub parent_key: Option<String>,
    #[serde(flatten)]
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleAnswer {
    pub node_key: String,
    pub answer_text: String,
    pub display_order: i32,
    pub next_node_key: Option<String>,
}

impl TreeBundle {
    /// Load a bundle from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save the bundle to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Result of importing a bundle
#[derive(Debug, Default, Serialize)]
pub struct ImportResult {
    /// New tree id; `None` on a dry run
    pub tree_id: Option<i32>,
    pub nodes_added: usize,
    pub answers_added: usize,
    /// References that could not be resolved and were dropped
    pub unresolved: Vec<String>,
}

/// Insertion order and resolved references, computed before touching the
/// database
#[derive(Debug)]
struct ImportPlan {
    /// Indexes into `bundle.nodes`, parents before children
    order: Vec<usize>,
    /// Parent index per node, after dropping unresolved keys
    parents: Vec<Option<usize>>,
    /// Next node index per answer
    next: Vec<Option<usize>>,
    /// Owning node index per answer
    owners: Vec<usize>,
    unresolved: Vec<String>,
}

fn plan_import(bundle: &TreeBundle) -> Result<ImportPlan> {
    if bundle.version != BUNDLE_VERSION {
        return Err(DbError::Validation(format!(
            "Unsupported bundle version '{}' (expected {})",
            bundle.version, BUNDLE_VERSION
        )));
    }
    if bundle.tree.name.trim().is_empty() {
        return Err(DbError::Validation("Bundle tree has no name".to_string()));
    }

    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, node) in bundle.nodes.iter().enumerate() {
        if index.insert(node.key.as_str(), i).is_some() {
            return Err(DbError::Validation(format!("Duplicate node key '{}'", node.key)));
        }
        check_question_text(&node.kind)
            .map_err(|e| DbError::Validation(format!("Node '{}': {}", node.key, e)))?;
    }

    let mut unresolved = Vec::new();
    let mut parents: Vec<Option<usize>> = Vec::with_capacity(bundle.nodes.len());
    for node in &bundle.nodes {
        let parent = match &node.parent_key {
            None => None,
            Some(key) => match index.get(key.as_str()) {
                Some(&p) => Some(p),
                None => {
                    unresolved.push(format!(
                        "Node '{}': parent '{}' not in bundle, imported as a root",
                        node.key, key
                    ));
                    None
                }
            },
        };
        parents.push(parent);
    }

    // Parents first; whatever is left is caught in a cycle and is cut loose
    let mut order = Vec::with_capacity(bundle.nodes.len());
    let mut placed = vec![false; bundle.nodes.len()];
    loop {
        let before = order.len();
        for i in 0..bundle.nodes.len() {
            if placed[i] {
                continue;
            }
            let ready = match parents[i] {
                Some(p) => placed[p],
                None => true,
            };
            if ready {
                placed[i] = true;
                order.push(i);
            }
        }
        if order.len() == bundle.nodes.len() {
            break;
        }
        if order.len() == before {
            // Cut the loop itself, not whatever hangs below it
            if let Some(start) = (0..bundle.nodes.len()).find(|&i| !placed[i]) {
                let i = cycle_entry(&parents, start);
                unresolved.push(format!(
                    "Node '{}': parent chain loops, imported as a root",
                    bundle.nodes[i].key
                ));
                parents[i] = None;
            }
        }
    }

    let mut owners = Vec::with_capacity(bundle.answers.len());
    let mut next = Vec::with_capacity(bundle.answers.len());
    for answer in &bundle.answers {
        let owner = *index.get(answer.node_key.as_str()).ok_or_else(|| {
            DbError::Validation(format!(
                "Answer '{}' belongs to unknown node '{}'",
                answer.answer_text, answer.node_key
            ))
        })?;
        if !matches!(bundle.nodes[owner].kind, NodeKind::Question { .. }) {
            return Err(DbError::Validation(format!(
                "Answer '{}' is attached to '{}', which is not a question",
                answer.answer_text, answer.node_key
            )));
        }
        if answer.answer_text.trim().is_empty() {
            return Err(DbError::Validation(format!(
                "Answer on '{}' has no text",
                answer.node_key
            )));
        }
        owners.push(owner);

        let target = match &answer.next_node_key {
            None => None,
            Some(key) => match index.get(key.as_str()) {
                Some(&t) if t != owner => Some(t),
                _ => {
                    unresolved.push(format!(
                        "Answer '{}' on '{}': next node '{}' unusable, left open",
                        answer.answer_text, answer.node_key, key
                    ));
                    None
                }
            },
        };
        next.push(target);
    }

    Ok(ImportPlan {
        order,
        parents,
        next,
        owners,
        unresolved,
    })
}

impl Database {
    /// Export one tree as a bundle
    pub fn export_bundle(&self, tree_id: i32) -> Result<TreeBundle> {
        let snapshot = self.load_snapshot(tree_id)?;
        let zone = self.get_zone(snapshot.tree.topographic_zone_id)?;
        let key = |id: i32| id.to_string();

        let nodes = snapshot
            .nodes
            .iter()
            .map(|n| BundleNode {
                key: key(n.id),
                parent_key: n.parent_node_id.map(key),
                kind: n.kind.clone(),
            })
            .collect();
        let answers = snapshot
            .answers
            .iter()
            .map(|a| BundleAnswer {
                node_key: key(a.node_id),
                answer_text: a.answer_text.clone(),
                display_order: a.display_order,
                next_node_key: a.next_node_id.map(key),
            })
            .collect();

        debug!(tree_id, "exported bundle");
        Ok(TreeBundle {
            version: BUNDLE_VERSION.to_string(),
            exported_at: chrono::Local::now().to_rfc3339(),
            zone_region: zone.region.as_str().to_string(),
            tree: BundleTree {
                name: snapshot.tree.name,
                description: snapshot.tree.description,
            },
            nodes,
            answers,
        })
    }

    /// Import a bundle as a new tree, in one transaction.
    ///
    /// `zone` overrides the bundle's own region. With `dry_run` nothing is
    /// written, but the same checks run and the same counts are reported.
    pub fn import_bundle(&self, bundle: &TreeBundle, zone: Option<Region>, dry_run: bool) -> Result<ImportResult> {
        let region = match zone {
            Some(region) => region,
            None => bundle
                .zone_region
                .parse::<Region>()
                .map_err(|e| DbError::Validation(e.to_string()))?,
        };
        let zone = self.zone_by_region(region)?;
        let plan = plan_import(bundle)?;

        for note in &plan.unresolved {
            warn!("{}", note);
        }

        let mut result = ImportResult {
            tree_id: None,
            nodes_added: bundle.nodes.len(),
            answers_added: bundle.answers.len(),
            unresolved: plan.unresolved.clone(),
        };
        if dry_run {
            return Ok(result);
        }

        let mut conn = self.get_conn()?;
        let tree_id = conn.transaction::<_, DbError, _>(|conn| {
            let tree_id = insert_tree(
                conn,
                zone.id,
                bundle.tree.name.trim(),
                bundle.tree.description.as_deref(),
            )?;

            let mut ids: Vec<Option<i32>> = vec![None; bundle.nodes.len()];
            for &i in &plan.order {
                let parent = plan.parents[i].and_then(|p| ids[p]);
                let kind = bundle.nodes[i].kind.clone().normalized();
                ids[i] = Some(insert_node(conn, tree_id, parent, &kind)?);
            }

            for (a, answer) in bundle.answers.iter().enumerate() {
                let owner = ids[plan.owners[a]].ok_or_else(|| {
                    DbError::Data(format!("node '{}' was not inserted", answer.node_key))
                })?;
                let next = plan.next[a].and_then(|t| ids[t]);
                insert_answer(
                    conn,
                    owner,
                    answer.answer_text.trim(),
                    Some(answer.display_order),
                    next,
                )?;
            }
            Ok(tree_id)
        })?;

        info!(tree_id, nodes = result.nodes_added, answers = result.answers_added, "imported bundle");
        result.tree_id = Some(tree_id);
        Ok(result)
    }
}
