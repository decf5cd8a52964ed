//! Whole-database snapshot and restore
//!
//! A snapshot is one pretty-printed JSON file holding every document of every
//! collection. Documents go through the tagged serde encoding of
//! [`Value`](crate::storage::Value), so ids come back as ids and literal
//! strings that merely look like ids come back as strings.

pub mod admin;

pub use admin::{clear_all, clear_collection, drop_database, get_stats, DatabaseStats};

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::graph::Database;
use crate::storage::{Document, Filter, FindOptions, Value, ID_FIELD};

/// Version written into new snapshots; restore accepts only this one
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

const FILE_PREFIX: &str = "snapshot_";
const FILE_EXTENSION: &str = "json";
/// Same-millisecond snapshots get `_001`, `_002`, ... up to this many
const MAX_NAME_COLLISIONS: u32 = 999;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub format_version: u32,
    /// Database the snapshot was taken from
    pub database: String,
    /// RFC 3339, UTC
    pub created_at: String,
    pub collections: BTreeMap<String, Vec<Document>>,
}

impl Snapshot {
    pub fn document_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub collections: usize,
    pub documents: usize,
}

/// Read every collection of `db` into memory
pub fn capture(db: &Database) -> Result<Snapshot> {
    let store = db.store();
    let mut collections = BTreeMap::new();
    for name in store.list_collection_names()? {
        let docs = store.find(&name, &Filter::all(), &FindOptions::new())?;
        collections.insert(name, docs);
    }
    Ok(Snapshot {
        format_version: SNAPSHOT_FORMAT_VERSION,
        database: db.name().to_string(),
        created_at: Utc::now().to_rfc3339(),
        collections,
    })
}

/// Claim a fresh snapshot file name by creating it empty. Never reuses an
/// existing file.
fn reserve_path(directory: &Path) -> Result<PathBuf> {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f").to_string();
    for attempt in 0..=MAX_NAME_COLLISIONS {
        let name = if attempt == 0 {
            format!("{}{}.{}", FILE_PREFIX, stamp, FILE_EXTENSION)
        } else {
            format!("{}{}_{:03}.{}", FILE_PREFIX, stamp, attempt, FILE_EXTENSION)
        };
        let path = directory.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => return Ok(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(GraphError::Io(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free snapshot name for {} in {:?}", stamp, directory),
    )))
}

fn write_file(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, snapshot)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Write a snapshot of `db` into `directory` (created if missing) and return
/// the path of the new file, `snapshot_<YYYYmmdd_HHMMSS_mmm>.json`, with a
/// `_NNN` suffix when that name is already taken.
pub fn create_snapshot(db: &Database, directory: &Path) -> Result<PathBuf> {
    fs::create_dir_all(directory)?;
    let snapshot = capture(db)?;

    let path = reserve_path(directory)?;
    let tmp_path = path.with_extension("tmp");
    let written = write_file(&tmp_path, &snapshot)
        // replaces only the empty placeholder claimed above
        .and_then(|()| fs::rename(&tmp_path, &path).map_err(GraphError::from));
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        let _ = fs::remove_file(&path);
        return Err(e);
    }

    tracing::info!(
        "Snapshot of '{}' saved to {:?} ({} collections, {} documents)",
        snapshot.database,
        path,
        snapshot.collections.len(),
        snapshot.document_count()
    );
    Ok(path)
}

/// Read and fully decode a snapshot file without touching any database
pub fn load_snapshot(path: &Path) -> Result<Snapshot> {
    if !path.is_file() {
        return Err(GraphError::Restore(format!("snapshot file not found: {:?}", path)));
    }
    let contents = fs::read_to_string(path)?;
    let snapshot: Snapshot = serde_json::from_str(&contents)
        .map_err(|e| GraphError::Restore(format!("invalid snapshot {:?}: {}", path, e)))?;

    if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(GraphError::Restore(format!(
            "unsupported snapshot format version {} (expected {})",
            snapshot.format_version, SNAPSHOT_FORMAT_VERSION
        )));
    }
    if snapshot.collections.keys().any(|name| name.is_empty()) {
        return Err(GraphError::Restore("snapshot contains an unnamed collection".into()));
    }
    for (name, docs) in &snapshot.collections {
        check_identities(name, docs)?;
    }
    Ok(snapshot)
}

/// Every `_id` must be absent or an id, and unique within its collection
fn check_identities(collection: &str, docs: &[Document]) -> Result<()> {
    let mut seen = HashSet::new();
    for (index, doc) in docs.iter().enumerate() {
        match doc.get(ID_FIELD) {
            None => {}
            Some(Value::Id(id)) => {
                if !seen.insert(*id) {
                    return Err(GraphError::Restore(format!(
                        "collection '{}': duplicate id {} at document {}",
                        collection, id, index
                    )));
                }
            }
            Some(other) => {
                return Err(GraphError::Restore(format!(
                    "collection '{}': document {} has a {} '_id' instead of an id",
                    collection,
                    index,
                    other.type_name()
                )));
            }
        }
    }
    Ok(())
}

/// Replace the contents of `db` with the snapshot at `path`.
///
/// The whole file is decoded before anything is cleared, so a malformed
/// snapshot leaves the database untouched. After that, each collection named
/// in the snapshot is cleared and repopulated in turn. This is sequential and
/// best-effort, not transactional: a failure part-way leaves earlier
/// collections restored and later ones as they were. Collections absent from
/// the snapshot are not touched.
pub fn restore_snapshot(db: &Database, path: &Path) -> Result<RestoreSummary> {
    let snapshot = load_snapshot(path)?;
    if snapshot.database != db.name() {
        tracing::warn!(
            "Restoring snapshot of '{}' into database '{}'",
            snapshot.database,
            db.name()
        );
    }

    let store = db.store();
    let mut summary = RestoreSummary::default();
    for (name, docs) in snapshot.collections {
        let cleared = store.clear_collection(&name)?;
        let count = docs.len();
        store
            .insert_many(&name, docs)
            .map_err(|e| GraphError::Restore(format!("collection '{}': {}", name, e)))?;
        tracing::debug!("Restored '{}': cleared {}, inserted {}", name, cleared, count);
        summary.collections += 1;
        summary.documents += count;
    }

    tracing::info!(
        "Restored {} collections ({} documents) from {:?}",
        summary.collections,
        summary.documents,
        path
    );
    Ok(summary)
}

/// Snapshot files in `directory`, newest first
pub fn list_snapshots(directory: &Path) -> Result<Vec<PathBuf>> {
    if !directory.is_dir() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        let is_snapshot = path.is_file()
            && path.extension().and_then(|e| e.to_str()) == Some(FILE_EXTENSION)
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with(FILE_PREFIX));
        if is_snapshot {
            paths.push(path);
        }
    }
    // timestamped names sort chronologically
    paths.sort();
    paths.reverse();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::graph::{Node, Note, EDGES, NODES};
    use crate::storage::{ObjectId, Value};
    use tempfile::tempdir;

    fn world(db: &Database) -> (ObjectId, ObjectId) {
        let village = db
            .nodes()
            .add(&Node::new("Village", "location").with_note(Note::new("night", "wolves howl", true)))
            .unwrap();
        let forest = db.nodes().add(&Node::new("Forest", "location")).unwrap();
        db.edges()
            .add(village, forest, Document::new().with("type", "path").with("distance", 2))
            .unwrap();
        (village, forest)
    }

    #[test]
    fn test_snapshot_drop_restore_round_trip() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new("world", dir.path().join("store"));
        let db = Database::open(&config).unwrap();
        let (village, forest) = world(&db);
        let before = get_stats(&db).unwrap();

        let path = create_snapshot(&db, &dir.path().join("backups")).unwrap();
        assert!(path.is_file());
        drop_database(&db, "world", "world").unwrap();
        assert_eq!(get_stats(&db).unwrap().total(), 0);

        let summary = restore_snapshot(&db, &path).unwrap();
        assert_eq!(summary.documents, 3);
        assert_eq!(get_stats(&db).unwrap(), before);

        let connections = db.edges().get_connections(village).unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].target_id, forest);
        assert_eq!(connections[0].target_name.as_deref(), Some("Forest"));
        assert_eq!(db.notes().notes(village).unwrap().len(), 1);
    }

    #[test]
    fn test_ids_and_lookalike_strings_survive() {
        let db = Database::temporary("world").unwrap();
        let target = ObjectId::new();
        let tagged_text = format!("$oid:{}", target.to_hex());
        let node = Node::new("Oddity", "object")
            .with_property("points_at", target)
            .with_property("looks_like_id", tagged_text.as_str())
            .with_property("hex_text", target.to_hex())
            .with_property("cost", "$5");
        db.nodes().add(&node).unwrap();

        let dir = tempdir().unwrap();
        let path = create_snapshot(&db, dir.path()).unwrap();
        db.drop_database("world").unwrap();
        restore_snapshot(&db, &path).unwrap();

        let restored = db.nodes().require_by_name("Oddity").unwrap();
        assert_eq!(restored.property("points_at"), Some(&Value::Id(target)));
        assert_eq!(restored.property("looks_like_id"), Some(&Value::String(tagged_text)));
        assert_eq!(restored.property("hex_text"), Some(&Value::String(target.to_hex())));
        assert_eq!(restored.property("cost"), Some(&Value::from("$5")));
    }

    #[test]
    fn test_restore_replaces_rather_than_merges() {
        let db = Database::temporary("world").unwrap();
        world(&db);
        let dir = tempdir().unwrap();
        let path = create_snapshot(&db, dir.path()).unwrap();

        db.nodes().add(&Node::new("Castle", "location")).unwrap();
        db.store().insert_one("scratch", Document::new().with("k", 1)).unwrap();
        restore_snapshot(&db, &path).unwrap();

        assert!(db.nodes().get_by_name("Castle").unwrap().is_none());
        assert_eq!(db.nodes().count().unwrap(), 2);
        assert_eq!(db.edges().count().unwrap(), 1);
        // not named in the snapshot, so left alone
        assert_eq!(db.store().count("scratch", &Filter::all()).unwrap(), 1);
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let db = Database::temporary("world").unwrap();
        world(&db);
        let dir = tempdir().unwrap();

        let missing = restore_snapshot(&db, &dir.path().join("nope.json"));
        assert!(matches!(missing, Err(GraphError::Restore(_))));

        let garbage = dir.path().join("garbage.json");
        fs::write(&garbage, "{\"collections\": 5}").unwrap();
        assert!(matches!(restore_snapshot(&db, &garbage), Err(GraphError::Restore(_))));

        let newer = dir.path().join("newer.json");
        fs::write(
            &newer,
            r#"{"format_version": 2, "database": "world", "created_at": "", "collections": {}}"#,
        )
        .unwrap();
        assert!(matches!(restore_snapshot(&db, &newer), Err(GraphError::Restore(_))));

        assert_eq!(db.nodes().count().unwrap(), 2);
    }

    #[test]
    fn test_bad_document_aborts_before_clearing() {
        let db = Database::temporary("world").unwrap();
        world(&db);
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(
            &path,
            r#"{"format_version": 1, "database": "world", "created_at": "",
                "collections": {"edges": [], "nodes": [{"name": "$unknown"}]}}"#,
        )
        .unwrap();

        assert!(matches!(restore_snapshot(&db, &path), Err(GraphError::Restore(_))));
        assert_eq!(db.store().count(EDGES, &Filter::all()).unwrap(), 1);
        assert_eq!(db.store().count(NODES, &Filter::all()).unwrap(), 2);

        let id = format!("$oid:{}", ObjectId::new().to_hex());
        let bad_identities = [
            r#"[{"_id": "plain", "name": "Z"}]"#.to_string(),
            r#"[{"_id": 7, "name": "Z"}]"#.to_string(),
            format!(r#"[{{"_id": "{0}", "name": "Y"}}, {{"_id": "{0}", "name": "Z"}}]"#, id),
        ];
        for nodes in bad_identities {
            fs::write(
                &path,
                format!(
                    r#"{{"format_version": 1, "database": "world", "created_at": "",
                        "collections": {{"edges": [], "nodes": {}}}}}"#,
                    nodes
                ),
            )
            .unwrap();
            let result = restore_snapshot(&db, &path);
            assert!(matches!(result, Err(GraphError::Restore(_))), "{}", nodes);
            assert_eq!(db.store().count(EDGES, &Filter::all()).unwrap(), 1);
            assert_eq!(db.store().count(NODES, &Filter::all()).unwrap(), 2);
        }
    }

    #[test]
    fn test_same_millisecond_snapshots_keep_distinct_files() {
        let db = Database::temporary("world").unwrap();
        world(&db);
        let dir = tempdir().unwrap();

        let paths: Vec<PathBuf> = (0..20).map(|_| create_snapshot(&db, dir.path()).unwrap()).collect();
        let distinct: HashSet<&PathBuf> = paths.iter().collect();
        assert_eq!(distinct.len(), paths.len());
        for path in &paths {
            assert_eq!(load_snapshot(path).unwrap().document_count(), 3);
        }

        let mut newest_first = paths.clone();
        newest_first.reverse();
        assert_eq!(list_snapshots(dir.path()).unwrap(), newest_first);
    }

    #[test]
    fn test_snapshot_file_layout() {
        let db = Database::temporary("world").unwrap();
        world(&db);
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");

        let path = create_snapshot(&db, &nested).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("snapshot_") && name.ends_with(".json"));
        assert_eq!(list_snapshots(&nested).unwrap(), vec![path.clone()]);

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["format_version"], 1);
        let id = raw["collections"]["nodes"][0]["_id"].as_str().unwrap();
        assert!(id.starts_with("$oid:"));
    }
}
