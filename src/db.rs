//! SQLite database with Diesel ORM
//!
//! Stores zones, decision trees, their nodes and answers.
//! Tables are created on open; zones are seeded on open.

use crate::hierarchy::{build_hierarchy, descendant_ids, NodeWithChildren};
use crate::model::{
    AnswerUpdate, DecisionAnswer, DecisionNode, DecisionTree, NodeKind, NodeType, TreeSnapshot,
    TreeUpdate,
};
use crate::schema::*;
use crate::validate::{validate_snapshot, ValidationOptions, ValidationReport};
use crate::zone::{Region, TopographicZone};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Env var that overrides every other way of locating the database
pub const DB_PATH_ENV: &str = "CLINITREE_DB_PATH";

/// Walk up directory tree to find .clinitree folder (like git finds .git)
/// Can be overridden with CLINITREE_DB_PATH env var
fn get_db_path() -> PathBuf {
    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        return PathBuf::from(path);
    }

    if let Ok(current_dir) = std::env::current_dir() {
        let mut dir = current_dir.as_path();
        loop {
            let data_dir = dir.join(".clinitree");
            if data_dir.is_dir() {
                return data_dir.join("clinitree.db");
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }

    PathBuf::from(".clinitree/clinitree.db")
}

/// Current schema version
pub const CURRENT_SCHEMA: StoreSchema = StoreSchema {
    major: 1,
    minor: 1,
    patch: 0,
    name: "decision-trees",
    features: &[
        "topographic_zones",
        "decision_trees",
        "decision_nodes",
        "decision_answers",
        "reference_catalog",
    ],
};

/// Describes the version and capabilities of the schema
#[derive(Debug, Clone)]
pub struct StoreSchema {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub name: &'static str,
    pub features: &'static [&'static str],
}

impl StoreSchema {
    pub fn version_string(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::fmt::Display for StoreSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{} ({})", self.version_string(), self.name)
    }
}

// ============================================================================
// Diesel Models
// ============================================================================

#[derive(Insertable)]
#[diesel(table_name = schema_versions)]
struct NewSchemaVersion<'a> {
    version: &'a str,
    name: &'a str,
    features: &'a str,
    introduced_at: &'a str,
}

/// Queryable schema version
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = schema_versions)]
pub struct StoredSchema {
    pub id: i32,
    pub version: String,
    pub name: String,
    pub features: String,
    pub introduced_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = topographic_zones)]
struct NewZone<'a> {
    region: &'a str,
    name: &'a str,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = topographic_zones)]
struct ZoneRow {
    id: i32,
    region: String,
    name: String,
}

impl TryFrom<ZoneRow> for TopographicZone {
    type Error = DbError;

    fn try_from(row: ZoneRow) -> Result<Self> {
        let region = row
            .region
            .parse::<Region>()
            .map_err(|e| DbError::Data(format!("zone {}: {}", row.id, e)))?;
        Ok(TopographicZone {
            id: row.id,
            region,
            name: row.name,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = decision_trees)]
struct NewDecisionTree<'a> {
    topographic_zone_id: i32,
    name: &'a str,
    description: Option<&'a str>,
    created_at: &'a str,
    updated_at: &'a str,
}

#[derive(AsChangeset)]
#[diesel(table_name = decision_trees)]
struct TreeChangeset<'a> {
    topographic_zone_id: Option<i32>,
    name: Option<&'a str>,
    description: Option<Option<&'a str>>,
    updated_at: &'a str,
}

/// Flat stored form of a node
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = decision_nodes)]
pub struct NodeRow {
    pub id: i32,
    pub tree_id: i32,
    pub parent_node_id: Option<i32>,
    pub node_type: String,
    pub question_text: Option<String>,
    pub pathology_ids: Option<String>,
    pub test_ids: Option<String>,
    pub cluster_ids: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = decision_nodes)]
struct NewDecisionNode<'a> {
    tree_id: i32,
    parent_node_id: Option<i32>,
    node_type: &'a str,
    question_text: Option<String>,
    pathology_ids: Option<String>,
    test_ids: Option<String>,
    cluster_ids: Option<String>,
    created_at: &'a str,
    updated_at: &'a str,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = decision_nodes)]
struct NodeChangeset<'a> {
    parent_node_id: Option<Option<i32>>,
    node_type: Option<&'a str>,
    question_text: Option<Option<String>>,
    pathology_ids: Option<Option<String>>,
    test_ids: Option<Option<String>>,
    cluster_ids: Option<Option<String>>,
    updated_at: &'a str,
}

/// The four payload columns of a node row
struct KindColumns {
    question_text: Option<String>,
    pathology_ids: Option<String>,
    test_ids: Option<String>,
    cluster_ids: Option<String>,
}

fn kind_columns(kind: &NodeKind) -> Result<KindColumns> {
    Ok(match kind {
        NodeKind::Question { text } => KindColumns {
            question_text: Some(text.clone()),
            pathology_ids: None,
            test_ids: None,
            cluster_ids: None,
        },
        NodeKind::Diagnosis { pathology_ids } => KindColumns {
            question_text: None,
            pathology_ids: Some(serde_json::to_string(pathology_ids)?),
            test_ids: None,
            cluster_ids: None,
        },
        NodeKind::Tests {
            test_ids,
            cluster_ids,
        } => KindColumns {
            question_text: None,
            pathology_ids: None,
            test_ids: Some(serde_json::to_string(test_ids)?),
            cluster_ids: Some(serde_json::to_string(cluster_ids)?),
        },
    })
}

/// Parse a JSON id array column; NULL reads as empty
fn parse_ids(node_id: i32, column: &str, value: Option<&str>) -> Result<Vec<i32>> {
    match value {
        None => Ok(Vec::new()),
        Some(json) => serde_json::from_str(json)
            .map_err(|e| DbError::Data(format!("node {}: bad {} '{}': {}", node_id, column, json, e))),
    }
}

impl TryFrom<NodeRow> for DecisionNode {
    type Error = DbError;

    fn try_from(row: NodeRow) -> Result<Self> {
        let node_type = row
            .node_type
            .parse::<NodeType>()
            .map_err(|e| DbError::Data(format!("node {}: {}", row.id, e)))?;

        let stray = |column: &str| {
            DbError::Data(format!(
                "node {}: {} node carries a {} value",
                row.id, row.node_type, column
            ))
        };

        let kind = match node_type {
            NodeType::Question => {
                if row.pathology_ids.is_some() {
                    return Err(stray("pathology_ids"));
                }
                if row.test_ids.is_some() || row.cluster_ids.is_some() {
                    return Err(stray("test_ids/cluster_ids"));
                }
                NodeKind::Question {
                    text: row.question_text.clone().unwrap_or_default(),
                }
            }
            NodeType::Diagnosis => {
                if row.question_text.is_some() {
                    return Err(stray("question_text"));
                }
                if row.test_ids.is_some() || row.cluster_ids.is_some() {
                    return Err(stray("test_ids/cluster_ids"));
                }
                NodeKind::diagnosis(parse_ids(row.id, "pathology_ids", row.pathology_ids.as_deref())?)
            }
            NodeType::Tests => {
                if row.question_text.is_some() {
                    return Err(stray("question_text"));
                }
                if row.pathology_ids.is_some() {
                    return Err(stray("pathology_ids"));
                }
                NodeKind::tests(
                    parse_ids(row.id, "test_ids", row.test_ids.as_deref())?,
                    parse_ids(row.id, "cluster_ids", row.cluster_ids.as_deref())?,
                )
            }
        };

        Ok(DecisionNode {
            id: row.id,
            tree_id: row.tree_id,
            parent_node_id: row.parent_node_id,
            kind,
        })
    }
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = decision_answers)]
struct AnswerRow {
    id: i32,
    node_id: i32,
    answer_text: String,
    display_order: i32,
    next_node_id: Option<i32>,
    #[allow(dead_code)]
    created_at: String,
}

impl From<AnswerRow> for DecisionAnswer {
    fn from(row: AnswerRow) -> Self {
        DecisionAnswer {
            id: row.id,
            node_id: row.node_id,
            answer_text: row.answer_text,
            display_order: row.display_order,
            next_node_id: row.next_node_id,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = decision_answers)]
struct NewDecisionAnswer<'a> {
    node_id: i32,
    answer_text: &'a str,
    display_order: i32,
    next_node_id: Option<i32>,
    created_at: &'a str,
}

#[derive(AsChangeset)]
#[diesel(table_name = decision_answers)]
struct AnswerChangeset<'a> {
    answer_text: Option<&'a str>,
    display_order: Option<i32>,
    next_node_id: Option<Option<i32>>,
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub(crate) type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Applied to every pooled connection: SQLite keeps these per connection
#[derive(Debug)]
struct ConnectionPragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionPragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        diesel::sql_query("PRAGMA foreign_keys = ON")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;
        diesel::sql_query("PRAGMA busy_timeout = 5000")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;
        Ok(())
    }
}

/// Database connection wrapper with connection pool
pub struct Database {
    pool: DbPool,
}

/// Error type for database operations
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Query error: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("Pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i32 },
    #[error("no zone for region '{0}'")]
    RegionNotFound(Region),
    #[error("{0}")]
    Validation(String),
    #[error("Malformed data: {0}")]
    Data(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

fn now() -> String {
    chrono::Local::now().to_rfc3339()
}

pub(crate) fn last_insert_id(conn: &mut SqliteConnection) -> Result<i32> {
    let id: i32 = diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>("last_insert_rowid()"))
        .first(conn)?;
    Ok(id)
}

pub(crate) fn insert_tree(
    conn: &mut SqliteConnection,
    zone_id: i32,
    name: &str,
    description: Option<&str>,
) -> Result<i32> {
    let now = now();
    diesel::insert_into(decision_trees::table)
        .values(&NewDecisionTree {
            topographic_zone_id: zone_id,
            name,
            description,
            created_at: &now,
            updated_at: &now,
        })
        .execute(conn)?;
    last_insert_id(conn)
}

/// Insert a node row; `kind` must already be normalized and checked
pub(crate) fn insert_node(
    conn: &mut SqliteConnection,
    tree_id: i32,
    parent_node_id: Option<i32>,
    kind: &NodeKind,
) -> Result<i32> {
    let columns = kind_columns(kind)?;
    let now = now();
    diesel::insert_into(decision_nodes::table)
        .values(&NewDecisionNode {
            tree_id,
            parent_node_id,
            node_type: kind.node_type().as_str(),
            question_text: columns.question_text,
            pathology_ids: columns.pathology_ids,
            test_ids: columns.test_ids,
            cluster_ids: columns.cluster_ids,
            created_at: &now,
            updated_at: &now,
        })
        .execute(conn)?;
    last_insert_id(conn)
}

/// Insert an answer row. Without `display_order` it goes after the node's
/// existing answers.
pub(crate) fn insert_answer(
    conn: &mut SqliteConnection,
    node_id: i32,
    answer_text: &str,
    display_order: Option<i32>,
    next_node_id: Option<i32>,
) -> Result<i32> {
    let display_order = match display_order {
        Some(order) => order,
        None => {
            let max: Option<i32> = decision_answers::table
                .filter(decision_answers::node_id.eq(node_id))
                .select(diesel::dsl::max(decision_answers::display_order))
                .first(conn)?;
            max.map_or(0, |m| m + 1)
        }
    };

    diesel::insert_into(decision_answers::table)
        .values(&NewDecisionAnswer {
            node_id,
            answer_text,
            display_order,
            next_node_id,
            created_at: &now(),
        })
        .execute(conn)?;
    last_insert_id(conn)
}

fn find_tree(conn: &mut SqliteConnection, tree_id: i32) -> Result<DecisionTree> {
    decision_trees::table
        .find(tree_id)
        .first::<DecisionTree>(conn)
        .optional()?
        .ok_or(DbError::NotFound {
            entity: "tree",
            id: tree_id,
        })
}

fn find_node(conn: &mut SqliteConnection, node_id: i32) -> Result<DecisionNode> {
    decision_nodes::table
        .find(node_id)
        .first::<NodeRow>(conn)
        .optional()?
        .ok_or(DbError::NotFound {
            entity: "node",
            id: node_id,
        })?
        .try_into()
}

fn find_answer(conn: &mut SqliteConnection, answer_id: i32) -> Result<DecisionAnswer> {
    decision_answers::table
        .find(answer_id)
        .first::<AnswerRow>(conn)
        .optional()?
        .map(DecisionAnswer::from)
        .ok_or(DbError::NotFound {
            entity: "answer",
            id: answer_id,
        })
}

fn tree_nodes(conn: &mut SqliteConnection, tree_id: i32) -> Result<Vec<DecisionNode>> {
    decision_nodes::table
        .filter(decision_nodes::tree_id.eq(tree_id))
        .order(decision_nodes::id.asc())
        .load::<NodeRow>(conn)?
        .into_iter()
        .map(DecisionNode::try_from)
        .collect()
}

pub(crate) fn check_question_text(kind: &NodeKind) -> Result<()> {
    if let NodeKind::Question { text } = kind {
        if text.trim().is_empty() {
            return Err(DbError::Validation(
                "Question text must not be empty".to_string(),
            ));
        }
    }
    Ok(())
}

/// The follow-up node of an answer must sit in the same tree and differ from
/// the answer's own question
fn check_next_node(conn: &mut SqliteConnection, question: &DecisionNode, next: i32) -> Result<()> {
    if next == question.id {
        return Err(DbError::Validation(format!(
            "Answer on node {} cannot lead back to the same node",
            question.id
        )));
    }
    let target = find_node(conn, next)?;
    if target.tree_id != question.tree_id {
        return Err(DbError::Validation(format!(
            "Node {} belongs to tree {}, not tree {}",
            next, target.tree_id, question.tree_id
        )));
    }
    Ok(())
}

impl Database {
    /// Get the database path that will be used
    pub fn db_path() -> PathBuf {
        get_db_path()
    }

    /// Create a new database at a custom path
    pub fn new(path: &str) -> Result<Self> {
        Self::open_at(path)
    }

    /// Open database at default path (respects CLINITREE_DB_PATH env var)
    pub fn open() -> Result<Self> {
        Self::open_or_create(&get_db_path())
    }

    /// Open database at `path`, creating its parent directory if needed
    pub fn open_or_create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::open_at(path)
    }

    /// Open database at specified path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(5)
            .connection_customizer(Box::new(ConnectionPragmas))
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.init_schema()?;
        db.seed_zones()?;
        debug!(path = %path_str, "database ready");
        Ok(db)
    }

    pub(crate) fn get_conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS schema_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                version TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                features TEXT NOT NULL,
                introduced_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS topographic_zones (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                region TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS decision_trees (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                topographic_zone_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (topographic_zone_id) REFERENCES topographic_zones(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS decision_nodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                tree_id INTEGER NOT NULL,
                parent_node_id INTEGER,
                node_type TEXT NOT NULL CHECK (node_type IN ('question', 'diagnosis', 'tests')),
                question_text TEXT,
                pathology_ids TEXT,
                test_ids TEXT,
                cluster_ids TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (tree_id) REFERENCES decision_trees(id) ON DELETE CASCADE,
                FOREIGN KEY (parent_node_id) REFERENCES decision_nodes(id) ON DELETE CASCADE
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS decision_answers (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                node_id INTEGER NOT NULL,
                answer_text TEXT NOT NULL,
                display_order INTEGER NOT NULL DEFAULT 0,
                next_node_id INTEGER,
                created_at TEXT NOT NULL,
                FOREIGN KEY (node_id) REFERENCES decision_nodes(id) ON DELETE CASCADE,
                FOREIGN KEY (next_node_id) REFERENCES decision_nodes(id) ON DELETE SET NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS pathologies (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                name TEXT NOT NULL,
                topographic_zone_id INTEGER,
                FOREIGN KEY (topographic_zone_id) REFERENCES topographic_zones(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS orthopedic_tests (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                name TEXT NOT NULL,
                topographic_zone_id INTEGER,
                FOREIGN KEY (topographic_zone_id) REFERENCES topographic_zones(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS orthopedic_test_clusters (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                name TEXT NOT NULL,
                topographic_zone_id INTEGER,
                test_ids TEXT NOT NULL DEFAULT '[]',
                FOREIGN KEY (topographic_zone_id) REFERENCES topographic_zones(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_trees_zone ON decision_trees(topographic_zone_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_nodes_tree ON decision_nodes(tree_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_nodes_parent ON decision_nodes(parent_node_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_answers_node ON decision_answers(node_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_answers_next ON decision_answers(next_node_id)").execute(&mut conn)?;

        self.register_schema(&CURRENT_SCHEMA)?;
        Ok(())
    }

    fn register_schema(&self, schema: &StoreSchema) -> Result<()> {
        let mut conn = self.get_conn()?;
        let features_json = serde_json::to_string(&schema.features)?;

        let new_schema = NewSchemaVersion {
            version: &schema.version_string(),
            name: schema.name,
            features: &features_json,
            introduced_at: &now(),
        };

        diesel::insert_or_ignore_into(schema_versions::table)
            .values(&new_schema)
            .execute(&mut conn)?;

        Ok(())
    }

    /// Schema versions this database has been opened with
    pub fn stored_schemas(&self) -> Result<Vec<StoredSchema>> {
        let mut conn = self.get_conn()?;
        Ok(schema_versions::table
            .order(schema_versions::id.asc())
            .load::<StoredSchema>(&mut conn)?)
    }

    // ========================================================================
    // Zone Registry
    // ========================================================================

    /// Insert any region that has no row yet
    fn seed_zones(&self) -> Result<()> {
        let mut conn = self.get_conn()?;
        let mut inserted = 0;
        for region in Region::ALL {
            inserted += diesel::insert_or_ignore_into(topographic_zones::table)
                .values(&NewZone {
                    region: region.as_str(),
                    name: region.label(),
                })
                .execute(&mut conn)?;
        }
        if inserted > 0 {
            info!(inserted, "seeded topographic zones");
        }
        Ok(())
    }

    /// All zones, in registry order
    pub fn list_zones(&self) -> Result<Vec<TopographicZone>> {
        let mut conn = self.get_conn()?;
        topographic_zones::table
            .order(topographic_zones::id.asc())
            .load::<ZoneRow>(&mut conn)?
            .into_iter()
            .map(TopographicZone::try_from)
            .collect()
    }

    pub fn get_zone(&self, zone_id: i32) -> Result<TopographicZone> {
        let mut conn = self.get_conn()?;
        topographic_zones::table
            .find(zone_id)
            .first::<ZoneRow>(&mut conn)
            .optional()?
            .ok_or(DbError::NotFound {
                entity: "zone",
                id: zone_id,
            })?
            .try_into()
    }

    pub fn zone_by_region(&self, region: Region) -> Result<TopographicZone> {
        let mut conn = self.get_conn()?;
        topographic_zones::table
            .filter(topographic_zones::region.eq(region.as_str()))
            .first::<ZoneRow>(&mut conn)
            .optional()?
            .ok_or(DbError::RegionNotFound(region))?
            .try_into()
    }

    // ========================================================================
    // Tree Store
    // ========================================================================

    /// Create a tree in a zone
    pub fn create_tree(&self, zone_id: i32, name: &str, description: Option<&str>) -> Result<i32> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DbError::Validation("Tree name must not be empty".to_string()));
        }
        self.get_zone(zone_id)?;

        let mut conn = self.get_conn()?;
        let id = insert_tree(&mut conn, zone_id, name, description)?;
        debug!(tree_id = id, zone_id, "created tree");
        Ok(id)
    }

    pub fn get_tree(&self, tree_id: i32) -> Result<DecisionTree> {
        let mut conn = self.get_conn()?;
        find_tree(&mut conn, tree_id)
    }

    /// Trees ordered by name, optionally restricted to one zone
    pub fn list_trees(&self, zone_id: Option<i32>) -> Result<Vec<DecisionTree>> {
        let mut conn = self.get_conn()?;
        let mut query = decision_trees::table
            .order((decision_trees::name.asc(), decision_trees::id.asc()))
            .into_boxed();
        if let Some(zone_id) = zone_id {
            query = query.filter(decision_trees::topographic_zone_id.eq(zone_id));
        }
        Ok(query.load::<DecisionTree>(&mut conn)?)
    }

    pub fn update_tree(&self, tree_id: i32, update: &TreeUpdate) -> Result<()> {
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(DbError::Validation("Tree name must not be empty".to_string()));
            }
        }
        if let Some(zone_id) = update.topographic_zone_id {
            self.get_zone(zone_id)?;
        }

        let mut conn = self.get_conn()?;
        find_tree(&mut conn, tree_id)?;
        let now = now();
        diesel::update(decision_trees::table.find(tree_id))
            .set(&TreeChangeset {
                topographic_zone_id: update.topographic_zone_id,
                name: update.name.as_deref().map(str::trim),
                description: update.description.as_ref().map(|d| d.as_deref()),
                updated_at: &now,
            })
            .execute(&mut conn)?;
        debug!(tree_id, "updated tree");
        Ok(())
    }

    /// Delete a tree with all of its nodes and answers
    pub fn delete_tree(&self, tree_id: i32) -> Result<()> {
        let mut conn = self.get_conn()?;
        conn.transaction::<_, DbError, _>(|conn| {
            find_tree(conn, tree_id)?;
            let node_ids: Vec<i32> = decision_nodes::table
                .filter(decision_nodes::tree_id.eq(tree_id))
                .select(decision_nodes::id)
                .load(conn)?;
            diesel::delete(decision_answers::table.filter(decision_answers::node_id.eq_any(node_ids.clone())))
                .execute(conn)?;
            diesel::update(decision_answers::table.filter(decision_answers::next_node_id.eq_any(node_ids.clone())))
                .set(decision_answers::next_node_id.eq(None::<i32>))
                .execute(conn)?;
            diesel::delete(decision_nodes::table.filter(decision_nodes::id.eq_any(node_ids)))
                .execute(conn)?;
            diesel::delete(decision_trees::table.find(tree_id)).execute(conn)?;
            Ok(())
        })?;
        debug!(tree_id, "deleted tree");
        Ok(())
    }

    // ========================================================================
    // Node Store
    // ========================================================================

    /// Create a node. `parent_node_id` must name a node of the same tree.
    pub fn create_node(&self, tree_id: i32, parent_node_id: Option<i32>, kind: NodeKind) -> Result<i32> {
        let kind = kind.normalized();
        check_question_text(&kind)?;

        let mut conn = self.get_conn()?;
        find_tree(&mut conn, tree_id)?;
        if let Some(parent_id) = parent_node_id {
            let parent = find_node(&mut conn, parent_id)?;
            if parent.tree_id != tree_id {
                return Err(DbError::Validation(format!(
                    "Parent node {} belongs to tree {}, not tree {}",
                    parent_id, parent.tree_id, tree_id
                )));
            }
        }

        let id = insert_node(&mut conn, tree_id, parent_node_id, &kind)?;
        debug!(node_id = id, tree_id, node_type = %kind.node_type(), "created node");
        Ok(id)
    }

    pub fn get_node(&self, node_id: i32) -> Result<DecisionNode> {
        let mut conn = self.get_conn()?;
        find_node(&mut conn, node_id)
    }

    /// Nodes of a tree in insertion order
    pub fn list_nodes(&self, tree_id: i32) -> Result<Vec<DecisionNode>> {
        let mut conn = self.get_conn()?;
        find_tree(&mut conn, tree_id)?;
        tree_nodes(&mut conn, tree_id)
    }

    /// Direct children of a node in insertion order
    pub fn list_children(&self, node_id: i32) -> Result<Vec<DecisionNode>> {
        let mut conn = self.get_conn()?;
        find_node(&mut conn, node_id)?;
        decision_nodes::table
            .filter(decision_nodes::parent_node_id.eq(node_id))
            .order(decision_nodes::id.asc())
            .load::<NodeRow>(&mut conn)?
            .into_iter()
            .map(DecisionNode::try_from)
            .collect()
    }

    /// Move a node and/or replace its payload.
    ///
    /// `parent_node_id`: `None` leaves the parent alone, `Some(None)` makes the
    /// node a root. A question node that still has answers keeps its type.
    pub fn update_node(
        &self,
        node_id: i32,
        parent_node_id: Option<Option<i32>>,
        kind: Option<NodeKind>,
    ) -> Result<()> {
        let kind = kind.map(NodeKind::normalized);
        if let Some(kind) = &kind {
            check_question_text(kind)?;
        }

        let mut conn = self.get_conn()?;
        let node = find_node(&mut conn, node_id)?;

        if let Some(Some(parent_id)) = parent_node_id {
            if parent_id == node_id {
                return Err(DbError::Validation(format!("Node {} cannot be its own parent", node_id)));
            }
            let parent = find_node(&mut conn, parent_id)?;
            if parent.tree_id != node.tree_id {
                return Err(DbError::Validation(format!(
                    "Parent node {} belongs to tree {}, not tree {}",
                    parent_id, parent.tree_id, node.tree_id
                )));
            }
            let siblings = tree_nodes(&mut conn, node.tree_id)?;
            if descendant_ids(&siblings, node_id).contains(&parent_id) {
                return Err(DbError::Validation(format!(
                    "Moving node {} under node {} would create a cycle",
                    node_id, parent_id
                )));
            }
        }

        if let Some(new_kind) = &kind {
            if node.is_question() && new_kind.node_type() != NodeType::Question {
                let answers: i64 = decision_answers::table
                    .filter(decision_answers::node_id.eq(node_id))
                    .count()
                    .get_result(&mut conn)?;
                if answers > 0 {
                    return Err(DbError::Validation(format!(
                        "Node {} still has {} answer(s); delete them before changing its type",
                        node_id, answers
                    )));
                }
            }
        }

        let now = now();
        let mut changes = NodeChangeset {
            parent_node_id,
            updated_at: &now,
            ..Default::default()
        };
        if let Some(kind) = &kind {
            let columns = kind_columns(kind)?;
            changes.node_type = Some(kind.node_type().as_str());
            changes.question_text = Some(columns.question_text);
            changes.pathology_ids = Some(columns.pathology_ids);
            changes.test_ids = Some(columns.test_ids);
            changes.cluster_ids = Some(columns.cluster_ids);
        }

        diesel::update(decision_nodes::table.find(node_id))
            .set(&changes)
            .execute(&mut conn)?;
        debug!(node_id, "updated node");
        Ok(())
    }

    /// Delete a node, its descendants and their answers. Answers elsewhere
    /// that led into the removed subtree lose their next node. Returns the
    /// number of nodes removed.
    pub fn delete_node(&self, node_id: i32) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let removed = conn.transaction::<_, DbError, _>(|conn| {
            let node = find_node(conn, node_id)?;
            let nodes = tree_nodes(conn, node.tree_id)?;
            let mut doomed: Vec<i32> = descendant_ids(&nodes, node_id).into_iter().collect();
            doomed.push(node_id);

            diesel::delete(decision_answers::table.filter(decision_answers::node_id.eq_any(doomed.clone())))
                .execute(conn)?;
            diesel::update(decision_answers::table.filter(decision_answers::next_node_id.eq_any(doomed.clone())))
                .set(decision_answers::next_node_id.eq(None::<i32>))
                .execute(conn)?;
            let removed = diesel::delete(decision_nodes::table.filter(decision_nodes::id.eq_any(doomed)))
                .execute(conn)?;
            Ok(removed)
        })?;
        debug!(node_id, removed, "deleted node");
        Ok(removed)
    }

    // ========================================================================
    // Answer Store
    // ========================================================================

    /// Attach an answer to a question node. Without `display_order` the
    /// answer goes after the node's existing answers.
    pub fn create_answer(
        &self,
        node_id: i32,
        answer_text: &str,
        display_order: Option<i32>,
        next_node_id: Option<i32>,
    ) -> Result<i32> {
        let answer_text = answer_text.trim();
        if answer_text.is_empty() {
            return Err(DbError::Validation("Answer text must not be empty".to_string()));
        }

        let mut conn = self.get_conn()?;
        let question = find_node(&mut conn, node_id)?;
        if !question.is_question() {
            return Err(DbError::Validation(format!(
                "Node {} is a {} node; answers belong to question nodes",
                node_id,
                question.node_type()
            )));
        }
        if let Some(next) = next_node_id {
            check_next_node(&mut conn, &question, next)?;
        }

        let id = insert_answer(&mut conn, node_id, answer_text, display_order, next_node_id)?;
        debug!(answer_id = id, node_id, "created answer");
        Ok(id)
    }

    pub fn get_answer(&self, answer_id: i32) -> Result<DecisionAnswer> {
        let mut conn = self.get_conn()?;
        find_answer(&mut conn, answer_id)
    }

    /// Answers of one node by display order, ties by insertion
    pub fn list_answers(&self, node_id: i32) -> Result<Vec<DecisionAnswer>> {
        let mut conn = self.get_conn()?;
        find_node(&mut conn, node_id)?;
        Ok(decision_answers::table
            .filter(decision_answers::node_id.eq(node_id))
            .order((decision_answers::display_order.asc(), decision_answers::id.asc()))
            .load::<AnswerRow>(&mut conn)?
            .into_iter()
            .map(DecisionAnswer::from)
            .collect())
    }

    /// Every answer in a tree, grouped by node then display order
    pub fn list_tree_answers(&self, tree_id: i32) -> Result<Vec<DecisionAnswer>> {
        let mut conn = self.get_conn()?;
        find_tree(&mut conn, tree_id)?;
        let node_ids: Vec<i32> = decision_nodes::table
            .filter(decision_nodes::tree_id.eq(tree_id))
            .select(decision_nodes::id)
            .load(&mut conn)?;
        Ok(decision_answers::table
            .filter(decision_answers::node_id.eq_any(node_ids))
            .order((
                decision_answers::node_id.asc(),
                decision_answers::display_order.asc(),
                decision_answers::id.asc(),
            ))
            .load::<AnswerRow>(&mut conn)?
            .into_iter()
            .map(DecisionAnswer::from)
            .collect())
    }

    pub fn update_answer(&self, answer_id: i32, update: &AnswerUpdate) -> Result<()> {
        if update.answer_text.is_none() && update.display_order.is_none() && update.next_node_id.is_none() {
            return Ok(());
        }
        if let Some(text) = &update.answer_text {
            if text.trim().is_empty() {
                return Err(DbError::Validation("Answer text must not be empty".to_string()));
            }
        }

        let mut conn = self.get_conn()?;
        let answer = find_answer(&mut conn, answer_id)?;
        if let Some(Some(next)) = update.next_node_id {
            let question = find_node(&mut conn, answer.node_id)?;
            check_next_node(&mut conn, &question, next)?;
        }

        diesel::update(decision_answers::table.find(answer_id))
            .set(&AnswerChangeset {
                answer_text: update.answer_text.as_deref().map(str::trim),
                display_order: update.display_order,
                next_node_id: update.next_node_id,
            })
            .execute(&mut conn)?;
        debug!(answer_id, "updated answer");
        Ok(())
    }

    pub fn delete_answer(&self, answer_id: i32) -> Result<()> {
        let mut conn = self.get_conn()?;
        find_answer(&mut conn, answer_id)?;
        diesel::delete(decision_answers::table.find(answer_id)).execute(&mut conn)?;
        debug!(answer_id, "deleted answer");
        Ok(())
    }

    // ========================================================================
    // Whole-tree reads
    // ========================================================================

    /// One tree with its nodes and answers
    pub fn load_snapshot(&self, tree_id: i32) -> Result<TreeSnapshot> {
        let tree = self.get_tree(tree_id)?;
        let nodes = self.list_nodes(tree_id)?;
        let answers = self.list_tree_answers(tree_id)?;
        Ok(TreeSnapshot {
            tree,
            nodes,
            answers,
        })
    }

    /// Nodes of a tree as a forest
    pub fn tree_hierarchy(&self, tree_id: i32) -> Result<Vec<NodeWithChildren>> {
        Ok(build_hierarchy(&self.list_nodes(tree_id)?))
    }

    /// Structural check of one tree
    pub fn validate_tree(&self, tree_id: i32, options: &ValidationOptions) -> Result<ValidationReport> {
        let snapshot = self.load_snapshot(tree_id)?;
        let report = validate_snapshot(&snapshot, options);
        debug!(tree_id, defects = report.defects.len(), "validated tree");
        Ok(report)
    }
}
