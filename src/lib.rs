//! clinitree - Clinical decision trees for osteopathy and physiotherapy
//!
//! Store, browse and check diagnostic decision trees scoped to body regions.
//!
//! # Overview
//!
//! A decision tree belongs to one topographic zone and is a hierarchy of
//! nodes. Question nodes carry answers; an answer may continue to a
//! follow-up node. Diagnosis and tests nodes point at the reference catalog.
//! Trees are persisted flat in SQLite and rebuilt as a forest in memory.
//!
//! # Node Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | `question` | Asks something; answers branch from here |
//! | `diagnosis` | Concludes with one or more pathologies |
//! | `tests` | Prescribes orthopedic tests and/or test clusters |
//!
//! # Quick Start
//!
//! ```no_run
//! use clinitree::{Database, NodeKind, Region, ValidationOptions};
//!
//! let db = Database::new("clinitree.db").unwrap();
//! let zone = db.zone_by_region(Region::Cervical).unwrap();
//!
//! let tree_id = db.create_tree(zone.id, "Cervicalgie", None).unwrap();
//! let question = db.create_node(tree_id, None, NodeKind::question("Irradiation dans le bras ?")).unwrap();
//! let diagnosis = db.create_node(tree_id, Some(question), NodeKind::diagnosis([1])).unwrap();
//! db.create_answer(question, "Oui", None, Some(diagnosis)).unwrap();
//!
//! let report = db.validate_tree(tree_id, &ValidationOptions::default()).unwrap();
//! println!("valid: {}, errors: {:?}", report.is_valid(), report.errors());
//! ```

pub mod bundle;
pub mod catalog;
pub mod config;
pub mod db;
pub mod export;
pub mod hierarchy;
pub mod model;
pub mod schema;
pub mod serve;
pub mod validate;
pub mod zone;

pub use bundle::{ImportResult, TreeBundle};
pub use catalog::{OrthopedicTest, Pathology, TestCluster};
pub use config::Config;
pub use db::{Database, DbError, CURRENT_SCHEMA};
pub use export::{render_outline, tree_to_dot, DotConfig};
pub use hierarchy::{build_hierarchy, flatten_hierarchy, NodeWithChildren};
pub use model::{
    AnswerUpdate, DecisionAnswer, DecisionNode, DecisionTree, NodeKind, NodeType, TreeSnapshot,
    TreeUpdate,
};
pub use validate::{validate_snapshot, Defect, ValidationOptions, ValidationReport};
pub use zone::{Region, TopographicZone};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify core types are re-exported from crate root
        let _ = CURRENT_SCHEMA;
        assert_eq!(Region::ALL.len(), 11);
        assert_eq!(NodeKind::question("Q ?").node_type(), NodeType::Question);
    }
}
