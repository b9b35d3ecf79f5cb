//! Dependency graph.
//!
//! Edge direction: `parent` is the declaring (installing) mod, `child` the
//! dependency it requires. An edge blocks the child's removal while the
//! parent is still installed.

use crate::descriptor::ModDescriptor;
use crate::error::{MissingDep, Result};
use crate::registry;
use crate::store::Store;
use rusqlite::params;

/// Outcome of a dependency check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepCheck {
    Satisfied,
    Missing(Vec<MissingDep>),
}

/// Verify every declared dependency is registered at or above its minimum
/// version, writing an edge per satisfied dependency.
///
/// If anything is missing the whole check fails: edges written for this
/// attempt are rolled back before returning, and the complete missing list is
/// reported.
pub fn check(store: &Store, desc: &ModDescriptor) -> Result<DepCheck> {
    let mut missing = Vec::new();
    for dep in &desc.dependencies {
        match registry::find(store, &dep.uuid)? {
            Some(entry) if entry.version >= dep.min_version => {
                store.conn().execute(
                    "INSERT OR IGNORE INTO deps (parent, child) VALUES (?1, ?2)",
                    params![desc.uuid, dep.uuid],
                )?;
            }
            _ => missing.push(MissingDep {
                uuid: dep.uuid.clone(),
                name: dep.name.clone(),
                author: dep.author.clone(),
                min_version: dep.min_version,
            }),
        }
    }
    if missing.is_empty() {
        Ok(DepCheck::Satisfied)
    } else {
        delete_declared_by(store, &desc.uuid)?;
        tracing::warn!(
            uuid = desc.uuid,
            missing = missing.len(),
            "dependency check failed"
        );
        Ok(DepCheck::Missing(missing))
    }
}

/// Other installed mods that declared `uuid` as a dependency. Uninstall must
/// refuse while this list is non-empty.
pub fn dependents_of(store: &Store, uuid: &str) -> Result<Vec<String>> {
    let conn = store.conn();
    let mut stmt = conn.prepare(
        "SELECT parent FROM deps WHERE child = ?1 AND parent != ?1 ORDER BY parent ASC",
    )?;
    let rows = stmt.query_map(params![uuid], |r| r.get(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Remove every edge a mod declared (its outgoing requirements).
pub fn delete_declared_by(store: &Store, uuid: &str) -> Result<usize> {
    Ok(store
        .conn()
        .execute("DELETE FROM deps WHERE parent = ?1", params![uuid])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc_with_dep(uuid: &str, dep_uuid: &str, min_ver: i64) -> ModDescriptor {
        serde_json::from_value(serde_json::json!({
            "UUID": uuid, "Name": uuid, "Version": 1, "LoaderVersion": "1.0.0",
            "Dependencies": [
                {"UUID": dep_uuid, "Ver": min_ver, "Name": "Base Mod", "Auth": "author-x"}
            ]
        }))
        .unwrap()
    }

    fn plain(uuid: &str, version: i64) -> ModDescriptor {
        serde_json::from_value(serde_json::json!({
            "UUID": uuid, "Name": uuid, "Version": version, "LoaderVersion": "1.0.0"
        }))
        .unwrap()
    }

    #[test]
    fn satisfied_check_writes_edge() {
        let store = Store::open_in_memory().unwrap();
        registry::insert(&store, &plain("base", 2)).unwrap();

        let result = check(&store, &desc_with_dep("child", "base", 2)).unwrap();
        assert_eq!(result, DepCheck::Satisfied);
        assert_eq!(dependents_of(&store, "base").unwrap(), vec!["child"]);
    }

    #[test]
    fn version_too_old_reports_missing_and_rolls_back_edges() {
        let store = Store::open_in_memory().unwrap();
        registry::insert(&store, &plain("base", 1)).unwrap();

        // Requires v2, only v1 installed.
        let result = check(&store, &desc_with_dep("child", "base", 2)).unwrap();
        match result {
            DepCheck::Missing(list) => {
                assert_eq!(list.len(), 1);
                assert_eq!(list[0].name, "Base Mod");
                assert_eq!(list[0].min_version, 2);
                assert_eq!(list[0].author, "author-x");
            }
            DepCheck::Satisfied => panic!("expected missing dependency"),
        }
        // No edge survives a failed check.
        assert!(dependents_of(&store, "base").unwrap().is_empty());
    }

    #[test]
    fn partial_check_rolls_back_satisfied_edges() {
        let store = Store::open_in_memory().unwrap();
        registry::insert(&store, &plain("base", 2)).unwrap();

        let desc: ModDescriptor = serde_json::from_value(serde_json::json!({
            "UUID": "child", "Name": "child", "Version": 1, "LoaderVersion": "1.0.0",
            "Dependencies": [
                {"UUID": "base", "Ver": 1, "Name": "Base", "Auth": "x"},
                {"UUID": "ghost", "Ver": 1, "Name": "Ghost", "Auth": "y"}
            ]
        }))
        .unwrap();

        let result = check(&store, &desc).unwrap();
        assert!(matches!(result, DepCheck::Missing(ref l) if l.len() == 1));
        // The edge written for the satisfied dependency must not survive.
        assert!(dependents_of(&store, "base").unwrap().is_empty());
    }

    #[test]
    fn absent_dependency_is_missing() {
        let store = Store::open_in_memory().unwrap();
        let result = check(&store, &desc_with_dep("child", "ghost", 1)).unwrap();
        assert!(matches!(result, DepCheck::Missing(_)));
    }

    #[test]
    fn delete_declared_by_clears_outgoing_edges() {
        let store = Store::open_in_memory().unwrap();
        registry::insert(&store, &plain("base", 1)).unwrap();
        check(&store, &desc_with_dep("child", "base", 1)).unwrap();

        assert_eq!(delete_declared_by(&store, "child").unwrap(), 1);
        assert!(dependents_of(&store, "base").unwrap().is_empty());
    }
}
