//! Reference catalog: pathologies, orthopedic tests and test clusters
//!
//! Diagnosis nodes point at pathologies, tests nodes at tests and clusters.
//! Only what is needed to resolve and check those links is stored here.

use crate::db::{last_insert_id, Database, DbError, Result};
use crate::schema::{orthopedic_test_clusters, orthopedic_tests, pathologies};
use crate::validate::CatalogIndex;
use diesel::prelude::*;
use serde::Serialize;
use tracing::debug;

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, Eq, Serialize)]
#[diesel(table_name = pathologies)]
pub struct Pathology {
    pub id: i32,
    pub name: String,
    pub topographic_zone_id: Option<i32>,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, Eq, Serialize)]
#[diesel(table_name = orthopedic_tests)]
pub struct OrthopedicTest {
    pub id: i32,
    pub name: String,
    pub topographic_zone_id: Option<i32>,
}

/// A named, reusable grouping of orthopedic tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestCluster {
    pub id: i32,
    pub name: String,
    pub topographic_zone_id: Option<i32>,
    pub test_ids: Vec<i32>,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = orthopedic_test_clusters)]
struct ClusterRow {
    id: i32,
    name: String,
    topographic_zone_id: Option<i32>,
    test_ids: String,
}

impl TryFrom<ClusterRow> for TestCluster {
    type Error = DbError;

    fn try_from(row: ClusterRow) -> Result<Self> {
        let test_ids = serde_json::from_str(&row.test_ids)
            .map_err(|e| DbError::Data(format!("cluster {}: bad test_ids: {}", row.id, e)))?;
        Ok(TestCluster {
            id: row.id,
            name: row.name,
            topographic_zone_id: row.topographic_zone_id,
            test_ids,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = pathologies)]
struct NewPathology<'a> {
    name: &'a str,
    topographic_zone_id: Option<i32>,
}

#[derive(Insertable)]
#[diesel(table_name = orthopedic_tests)]
struct NewOrthopedicTest<'a> {
    name: &'a str,
    topographic_zone_id: Option<i32>,
}

#[derive(Insertable)]
#[diesel(table_name = orthopedic_test_clusters)]
struct NewTestCluster<'a> {
    name: &'a str,
    topographic_zone_id: Option<i32>,
    test_ids: &'a str,
}

fn check_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DbError::Validation("Name must not be empty".to_string()));
    }
    Ok(name)
}

impl Database {
    fn check_zone(&self, zone_id: Option<i32>) -> Result<()> {
        if let Some(zone_id) = zone_id {
            self.get_zone(zone_id)?;
        }
        Ok(())
    }

    pub fn create_pathology(&self, name: &str, zone_id: Option<i32>) -> Result<i32> {
        let name = check_name(name)?;
        self.check_zone(zone_id)?;
        let mut conn = self.get_conn()?;
        diesel::insert_into(pathologies::table)
            .values(&NewPathology {
                name,
                topographic_zone_id: zone_id,
            })
            .execute(&mut conn)?;
        let id = last_insert_id(&mut conn)?;
        debug!(pathology_id = id, "created pathology");
        Ok(id)
    }

    /// Pathologies by name, optionally for one zone
    pub fn list_pathologies(&self, zone_id: Option<i32>) -> Result<Vec<Pathology>> {
        let mut conn = self.get_conn()?;
        let mut query = pathologies::table
            .order((pathologies::name.asc(), pathologies::id.asc()))
            .into_boxed();
        if let Some(zone_id) = zone_id {
            query = query.filter(pathologies::topographic_zone_id.eq(zone_id));
        }
        Ok(query.load::<Pathology>(&mut conn)?)
    }

    pub fn get_pathology(&self, pathology_id: i32) -> Result<Pathology> {
        let mut conn = self.get_conn()?;
        pathologies::table
            .find(pathology_id)
            .first::<Pathology>(&mut conn)
            .optional()?
            .ok_or(DbError::NotFound {
                entity: "pathology",
                id: pathology_id,
            })
    }

    pub fn create_test(&self, name: &str, zone_id: Option<i32>) -> Result<i32> {
        let name = check_name(name)?;
        self.check_zone(zone_id)?;
        let mut conn = self.get_conn()?;
        diesel::insert_into(orthopedic_tests::table)
            .values(&NewOrthopedicTest {
                name,
                topographic_zone_id: zone_id,
            })
            .execute(&mut conn)?;
        let id = last_insert_id(&mut conn)?;
        debug!(test_id = id, "created orthopedic test");
        Ok(id)
    }

    pub fn list_tests(&self, zone_id: Option<i32>) -> Result<Vec<OrthopedicTest>> {
        let mut conn = self.get_conn()?;
        let mut query = orthopedic_tests::table
            .order((orthopedic_tests::name.asc(), orthopedic_tests::id.asc()))
            .into_boxed();
        if let Some(zone_id) = zone_id {
            query = query.filter(orthopedic_tests::topographic_zone_id.eq(zone_id));
        }
        Ok(query.load::<OrthopedicTest>(&mut conn)?)
    }

    pub fn get_test(&self, test_id: i32) -> Result<OrthopedicTest> {
        let mut conn = self.get_conn()?;
        orthopedic_tests::table
            .find(test_id)
            .first::<OrthopedicTest>(&mut conn)
            .optional()?
            .ok_or(DbError::NotFound {
                entity: "test",
                id: test_id,
            })
    }

    /// Create a cluster; every test id must already exist
    pub fn create_cluster(&self, name: &str, zone_id: Option<i32>, test_ids: &[i32]) -> Result<i32> {
        let name = check_name(name)?;
        self.check_zone(zone_id)?;
        let mut conn = self.get_conn()?;

        let found: Vec<i32> = orthopedic_tests::table
            .filter(orthopedic_tests::id.eq_any(test_ids.to_vec()))
            .select(orthopedic_tests::id)
            .load(&mut conn)?;
        if let Some(missing) = test_ids.iter().find(|id| !found.contains(id)) {
            return Err(DbError::NotFound {
                entity: "test",
                id: *missing,
            });
        }

        let mut ids: Vec<i32> = Vec::with_capacity(test_ids.len());
        for &id in test_ids {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        let json = serde_json::to_string(&ids)?;

        diesel::insert_into(orthopedic_test_clusters::table)
            .values(&NewTestCluster {
                name,
                topographic_zone_id: zone_id,
                test_ids: &json,
            })
            .execute(&mut conn)?;
        let id = last_insert_id(&mut conn)?;
        debug!(cluster_id = id, tests = ids.len(), "created test cluster");
        Ok(id)
    }

    pub fn get_cluster(&self, cluster_id: i32) -> Result<TestCluster> {
        let mut conn = self.get_conn()?;
        orthopedic_test_clusters::table
            .find(cluster_id)
            .first::<ClusterRow>(&mut conn)
            .optional()?
            .ok_or(DbError::NotFound {
                entity: "cluster",
                id: cluster_id,
            })?
            .try_into()
    }

    pub fn list_clusters(&self, zone_id: Option<i32>) -> Result<Vec<TestCluster>> {
        let mut conn = self.get_conn()?;
        let mut query = orthopedic_test_clusters::table
            .order((
                orthopedic_test_clusters::name.asc(),
                orthopedic_test_clusters::id.asc(),
            ))
            .into_boxed();
        if let Some(zone_id) = zone_id {
            query = query.filter(orthopedic_test_clusters::topographic_zone_id.eq(zone_id));
        }
        query
            .load::<ClusterRow>(&mut conn)?
            .into_iter()
            .map(TestCluster::try_from)
            .collect()
    }

    /// Every catalog id, for link checks during validation
    pub fn catalog_index(&self) -> Result<CatalogIndex> {
        let mut conn = self.get_conn()?;
        let pathology_ids: Vec<i32> = pathologies::table.select(pathologies::id).load(&mut conn)?;
        let test_ids: Vec<i32> = orthopedic_tests::table
            .select(orthopedic_tests::id)
            .load(&mut conn)?;
        let cluster_ids: Vec<i32> = orthopedic_test_clusters::table
            .select(orthopedic_test_clusters::id)
            .load(&mut conn)?;
        Ok(CatalogIndex {
            pathology_ids: pathology_ids.into_iter().collect(),
            test_ids: test_ids.into_iter().collect(),
            cluster_ids: cluster_ids.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeKind;
    use crate::validate::{Defect, ValidationOptions};
    use crate::zone::Region;
    use tempfile::TempDir;

    fn test_db() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_pathologies_by_zone() {
        let (_dir, db) = test_db();
        let cervical = db.zone_by_region(Region::Cervical).unwrap().id;
        db.create_pathology("Torticolis", Some(cervical)).unwrap();
        db.create_pathology("Arthrose cervicale", Some(cervical)).unwrap();
        db.create_pathology("Fasciite plantaire", None).unwrap();

        let names: Vec<String> = db
            .list_pathologies(Some(cervical))
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Arthrose cervicale", "Torticolis"]);
        assert_eq!(db.list_pathologies(None).unwrap().len(), 3);
        assert!(matches!(db.get_pathology(99), Err(DbError::NotFound { entity: "pathology", id: 99 })));
    }

    #[test]
    fn test_blank_name_and_unknown_zone() {
        let (_dir, db) = test_db();
        assert!(matches!(db.create_test(" ", None), Err(DbError::Validation(_))));
        assert!(matches!(db.create_test("Spurling", Some(99)), Err(DbError::NotFound { .. })));
    }

    #[test]
    fn test_cluster_requires_existing_tests() {
        let (_dir, db) = test_db();
        let spurling = db.create_test("Spurling", None).unwrap();
        let distraction = db.create_test("Distraction", None).unwrap();

        let id = db
            .create_cluster("Radiculopathie cervicale", None, &[spurling, distraction, spurling])
            .unwrap();
        let clusters = db.list_clusters(None).unwrap();
        assert_eq!(clusters[0].id, id);
        assert_eq!(db.get_cluster(id).unwrap().test_ids, vec![spurling, distraction]);
        assert_eq!(db.get_test(spurling).unwrap().name, "Spurling");
        assert!(matches!(db.get_cluster(id + 1), Err(DbError::NotFound { entity: "cluster", .. })));

        let err = db.create_cluster("Broken", None, &[spurling, 500]).unwrap_err();
        assert!(matches!(err, DbError::NotFound { entity: "test", id: 500 }));
    }

    #[test]
    fn test_catalog_index_feeds_validation() {
        let (_dir, db) = test_db();
        let zone = db.zone_by_region(Region::Genou).unwrap().id;
        let known = db.create_pathology("Syndrome fémoro-patellaire", Some(zone)).unwrap();
        let tree = db.create_tree(zone, "Gonalgie antérieure", None).unwrap();
        db.create_node(tree, None, NodeKind::diagnosis([known, known + 100])).unwrap();

        let options = ValidationOptions {
            catalog: Some(db.catalog_index().unwrap()),
        };
        let report = db.validate_tree(tree, &options).unwrap();
        assert_eq!(
            report.defects,
            vec![Defect::UnknownPathology {
                node_id: db.list_nodes(tree).unwrap()[0].id,
                pathology_id: known + 100
            }]
        );
    }
}
