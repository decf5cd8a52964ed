//! sled-backed implementation of [`Store`]
//!
//! One sled database per connection target (directory). A named database is
//! the set of trees called `<database>.<collection>`; each tree maps the 12 id
//! bytes of a document to its MessagePack encoding.

use std::thread;
use std::time::{Duration, Instant};

use sled::{Db, IVec, Tree};

use crate::config::StoreConfig;
use crate::error::{GraphError, Result};
use crate::storage::query::{Filter, FindOptions, SortDirection, Update, UpdateResult, ID_FIELD};
use crate::storage::value::{Document, Value};
use crate::storage::{ObjectId, Store};

/// Pause between attempts to take the database lock
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

fn encode(doc: &Document) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec(doc)?)
}

fn decode(bytes: &[u8]) -> Result<Document> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Put `_id` first, generating it when absent
fn with_identity(doc: Document) -> Result<(ObjectId, Document)> {
    let id = match doc.get(ID_FIELD) {
        None => ObjectId::new(),
        Some(Value::Id(id)) => *id,
        Some(other) => {
            return Err(GraphError::Validation(format!(
                "'{}' must be an id, got {}",
                ID_FIELD,
                other.type_name()
            )))
        }
    };
    let mut out = Document::new().with(ID_FIELD, id);
    for (k, v) in doc {
        if k != ID_FIELD {
            out.insert(k, v);
        }
    }
    Ok((id, out))
}

/// Outcome of one conditional write on a single key
enum KeyOutcome {
    /// Key absent or document no longer matches
    Skipped,
    Applied { before: Document, modified: bool },
}

pub struct SledStore {
    db: Db,
    database: String,
}

impl SledStore {
    /// Open the store at `config.data_dir`, waiting up to the configured
    /// timeout for another handle to release its lock.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let deadline = Instant::now() + config.timeout();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match sled::Config::new().path(&config.data_dir).open() {
                Ok(db) => {
                    tracing::debug!(
                        "Opened store at {:?} (database '{}', {} attempt(s))",
                        config.data_dir,
                        config.database,
                        attempts
                    );
                    return Ok(Self { db, database: config.database.clone() });
                }
                Err(sled::Error::Io(e)) if Instant::now() < deadline => {
                    tracing::debug!("Store at {:?} unavailable, retrying: {}", config.data_dir, e);
                    thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => {
                    tracing::error!("Failed to open store at {:?}: {}", config.data_dir, e);
                    return Err(GraphError::Connection {
                        target: config.data_dir.display().to_string(),
                        reason: format!("{} (after {} attempt(s))", e, attempts),
                    });
                }
            }
        }
    }

    /// Throwaway in-memory-ish store, removed when dropped
    pub fn temporary(database: &str) -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db, database: database.to_string() })
    }

    fn prefix_of(database: &str) -> String {
        format!("{}.", database)
    }

    fn tree_name(&self, collection: &str) -> String {
        format!("{}{}", Self::prefix_of(&self.database), collection)
    }

    fn tree(&self, collection: &str) -> Result<Tree> {
        if collection.is_empty() {
            return Err(GraphError::Validation("collection name must not be empty".into()));
        }
        Ok(self.db.open_tree(self.tree_name(collection))?)
    }

    /// Tree for reads: never creates the collection
    fn existing_tree(&self, collection: &str) -> Result<Option<Tree>> {
        let name = self.tree_name(collection);
        let exists = self.db.tree_names().iter().any(|n| &n[..] == name.as_bytes());
        if exists {
            Ok(Some(self.db.open_tree(name)?))
        } else {
            Ok(None)
        }
    }

    fn trees_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.db
            .tree_names()
            .into_iter()
            .filter_map(|n| String::from_utf8(n.to_vec()).ok())
            .filter(|n| n.starts_with(prefix))
            .collect()
    }

    /// Every database with at least one collection in this store
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .db
            .tree_names()
            .into_iter()
            .filter_map(|n| String::from_utf8(n.to_vec()).ok())
            .filter_map(|n| n.split_once('.').map(|(db, _)| db.to_string()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Drop every collection of database `name`. Returns how many were dropped.
    pub fn drop_database(&self, name: &str) -> Result<usize> {
        let mut dropped = 0;
        for tree in self.trees_with_prefix(&Self::prefix_of(name)) {
            if self.db.drop_tree(tree.as_bytes())? {
                dropped += 1;
            }
        }
        tracing::info!("Dropped database '{}' ({} collections)", name, dropped);
        Ok(dropped)
    }

    /// Keys of documents matching `filter`, in id order
    fn matching_keys(&self, tree: &Tree, filter: &Filter) -> Result<Vec<IVec>> {
        if let Some(id) = filter.id() {
            let key = id.bytes();
            return Ok(if tree.contains_key(key)? { vec![IVec::from(&key[..])] } else { Vec::new() });
        }
        let mut keys = Vec::new();
        for item in tree.iter() {
            let (key, bytes) = item?;
            if filter.matches(&decode(&bytes)?) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// Re-check `filter` and apply `update` to one key as a single atomic
    /// step (sled retries the closure on concurrent modification).
    fn update_key(&self, tree: &Tree, key: &[u8], filter: &Filter, update: &Update) -> Result<KeyOutcome> {
        let mut outcome: Result<KeyOutcome> = Ok(KeyOutcome::Skipped);
        tree.fetch_and_update(key, |old| {
            outcome = Ok(KeyOutcome::Skipped);
            let old = old?;
            let before = match decode(old) {
                Ok(doc) => doc,
                Err(e) => {
                    outcome = Err(e);
                    return Some(old.to_vec());
                }
            };
            if !filter.matches(&before) {
                return Some(old.to_vec());
            }
            let mut after = before.clone();
            let applied = update.apply(&mut after).and_then(|modified| {
                if modified {
                    encode(&after).map(|bytes| (bytes, true))
                } else {
                    Ok((old.to_vec(), false))
                }
            });
            match applied {
                Ok((bytes, modified)) => {
                    outcome = Ok(KeyOutcome::Applied { before, modified });
                    Some(bytes)
                }
                Err(e) => {
                    outcome = Err(e);
                    Some(old.to_vec())
                }
            }
        })?;
        outcome
    }

    /// Delete one key if it still matches `filter`, atomically
    fn delete_key(&self, tree: &Tree, key: &[u8], filter: &Filter) -> Result<bool> {
        let mut deleted: Result<bool> = Ok(false);
        tree.fetch_and_update(key, |old| {
            deleted = Ok(false);
            let old = old?;
            match decode(old) {
                Ok(doc) if filter.matches(&doc) => {
                    deleted = Ok(true);
                    None
                }
                Ok(_) => Some(old.to_vec()),
                Err(e) => {
                    deleted = Err(e);
                    Some(old.to_vec())
                }
            }
        })?;
        deleted
    }

    fn update_matching(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        first_only: bool,
    ) -> Result<(UpdateResult, Option<Document>)> {
        update.validate()?;
        let mut result = UpdateResult::default();
        let Some(tree) = self.existing_tree(collection)? else {
            return Ok((result, None));
        };
        let mut first_before = None;
        for key in self.matching_keys(&tree, filter)? {
            if let KeyOutcome::Applied { before, modified } = self.update_key(&tree, &key, filter, update)? {
                result.matched += 1;
                if modified {
                    result.modified += 1;
                }
                if first_before.is_none() {
                    first_before = Some(before);
                }
                if first_only {
                    break;
                }
            }
        }
        Ok((result, first_before))
    }

    fn delete_matching(&self, collection: &str, filter: &Filter, first_only: bool) -> Result<usize> {
        let Some(tree) = self.existing_tree(collection)? else {
            return Ok(0);
        };
        let mut deleted = 0;
        for key in self.matching_keys(&tree, filter)? {
            if self.delete_key(&tree, &key, filter)? {
                deleted += 1;
                if first_only {
                    break;
                }
            }
        }
        Ok(deleted)
    }
}

impl Store for SledStore {
    fn database_name(&self) -> &str {
        &self.database
    }

    fn insert_one(&self, collection: &str, doc: Document) -> Result<ObjectId> {
        let (id, doc) = with_identity(doc)?;
        let tree = self.tree(collection)?;
        let bytes = encode(&doc)?;
        match tree.compare_and_swap(id.bytes(), None::<&[u8]>, Some(bytes))? {
            Ok(()) => Ok(id),
            Err(_) => Err(GraphError::Validation(format!(
                "duplicate id {} in collection '{}'",
                id, collection
            ))),
        }
    }

    fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<Vec<ObjectId>> {
        docs.into_iter().map(|doc| self.insert_one(collection, doc)).collect()
    }

    fn update_one(&self, collection: &str, filter: &Filter, update: &Update) -> Result<UpdateResult> {
        self.update_matching(collection, filter, update, true).map(|(result, _)| result)
    }

    fn update_many(&self, collection: &str, filter: &Filter, update: &Update) -> Result<UpdateResult> {
        self.update_matching(collection, filter, update, false).map(|(result, _)| result)
    }

    fn find_one_and_update(&self, collection: &str, filter: &Filter, update: &Update) -> Result<Option<Document>> {
        self.update_matching(collection, filter, update, true).map(|(_, before)| before)
    }

    fn delete_one(&self, collection: &str, filter: &Filter) -> Result<usize> {
        self.delete_matching(collection, filter, true)
    }

    fn delete_many(&self, collection: &str, filter: &Filter) -> Result<usize> {
        self.delete_matching(collection, filter, false)
    }

    fn find(&self, collection: &str, filter: &Filter, options: &FindOptions) -> Result<Vec<Document>> {
        let Some(tree) = self.existing_tree(collection)? else {
            return Ok(Vec::new());
        };

        if let Some(id) = filter.id() {
            return match tree.get(id.bytes())? {
                Some(bytes) => Ok(vec![decode(&bytes)?]),
                _ => Ok(Vec::new()),
            };
        }

        // Without a sort the scan can stop as soon as the limit is reached
        let early_limit = if options.sort.is_none() { options.bound() } else { None };
        let mut docs = Vec::new();
        for item in tree.iter() {
            if early_limit.map_or(false, |limit| docs.len() >= limit) {
                break;
            }
            let (_, bytes) = item?;
            let doc = decode(&bytes)?;
            if filter.matches(&doc) {
                docs.push(doc);
            }
        }

        if let Some((field, direction)) = &options.sort {
            let null = Value::Null;
            docs.sort_by(|a, b| {
                let av = a.get_path(field).unwrap_or(&null);
                let bv = b.get_path(field).unwrap_or(&null);
                match direction {
                    SortDirection::Ascending => av.sort_cmp(bv),
                    SortDirection::Descending => bv.sort_cmp(av),
                }
            });
        }
        if let Some(limit) = options.bound() {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    fn count(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let Some(tree) = self.existing_tree(collection)? else {
            return Ok(0);
        };
        if filter.is_empty() {
            return Ok(tree.len());
        }
        Ok(self.matching_keys(&tree, filter)?.len())
    }

    fn list_collection_names(&self) -> Result<Vec<String>> {
        let prefix = Self::prefix_of(&self.database);
        let mut names: Vec<String> = self
            .trees_with_prefix(&prefix)
            .into_iter()
            .map(|n| n[prefix.len()..].to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    fn clear_collection(&self, collection: &str) -> Result<usize> {
        let tree = self.tree(collection)?;
        let removed = tree.len();
        tree.clear()?;
        tracing::info!("Cleared {} documents from '{}'", removed, collection);
        Ok(removed)
    }

    fn drop_collection(&self, collection: &str) -> Result<bool> {
        Ok(self.db.drop_tree(self.tree_name(collection).as_bytes())?)
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SledStore {
        SledStore::temporary("test_db").unwrap()
    }

    fn named(name: &str, rank: i64) -> Document {
        Document::new().with("name", name).with("rank", rank)
    }

    #[test]
    fn test_insert_generates_id_first() {
        let store = store();
        let id = store.insert_one("nodes", named("a", 1)).unwrap();
        let doc = store.find_one("nodes", &Filter::by_id(id)).unwrap().unwrap();
        assert_eq!(doc.keys().next().map(String::as_str), Some("_id"));
        assert_eq!(doc.get_id("_id"), Some(id));
        assert_eq!(doc.get_str("name"), Some("a"));
    }

    #[test]
    fn test_insert_keeps_given_id_and_rejects_duplicates() {
        let store = store();
        let id = ObjectId::new();
        let doc = named("a", 1).with("_id", id);
        assert_eq!(store.insert_one("nodes", doc.clone()).unwrap(), id);
        let err = store.insert_one("nodes", doc).unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));
    }

    #[test]
    fn test_insert_rejects_non_id_identity() {
        let store = store();
        let err = store.insert_one("nodes", named("a", 1).with("_id", "abc")).unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));
    }

    #[test]
    fn test_find_sort_and_limit() {
        let store = store();
        for (name, rank) in [("b", 2), ("c", 3), ("a", 1)] {
            store.insert_one("nodes", named(name, rank)).unwrap();
        }

        let asc = store
            .find("nodes", &Filter::all(), &FindOptions::new().sort("rank", SortDirection::Ascending))
            .unwrap();
        let names: Vec<&str> = asc.iter().filter_map(|d| d.get_str("name")).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let desc = store
            .find(
                "nodes",
                &Filter::all(),
                &FindOptions::new().sort("name", SortDirection::Descending).limit(2),
            )
            .unwrap();
        let names: Vec<&str> = desc.iter().filter_map(|d| d.get_str("name")).collect();
        assert_eq!(names, vec!["c", "b"]);

        // unsorted scan follows insertion (id) order
        let unsorted = store.find("nodes", &Filter::all(), &FindOptions::new().limit(2)).unwrap();
        let names: Vec<&str> = unsorted.iter().filter_map(|d| d.get_str("name")).collect();
        assert_eq!(names, vec!["b", "c"]);

        // zero is no limit at all
        let unbounded = store.find("nodes", &Filter::all(), &FindOptions::new().limit(0)).unwrap();
        assert_eq!(unbounded.len(), 3);
    }

    #[test]
    fn test_reads_do_not_create_collections() {
        let store = store();
        assert!(store.find("ghost", &Filter::all(), &FindOptions::new()).unwrap().is_empty());
        assert_eq!(store.count("ghost", &Filter::all()).unwrap(), 0);
        assert!(store.list_collection_names().unwrap().is_empty());
    }

    #[test]
    fn test_update_one_counts() {
        let store = store();
        store.insert_one("nodes", named("a", 1)).unwrap();
        store.insert_one("nodes", named("a", 2)).unwrap();

        let result = store
            .update_one("nodes", &Filter::all().eq("name", "a"), &Update::new().set("rank", 9))
            .unwrap();
        assert_eq!(result, UpdateResult { matched: 1, modified: 1 });

        let result = store
            .update_many("nodes", &Filter::all().eq("name", "a"), &Update::new().set("rank", 9))
            .unwrap();
        assert_eq!(result, UpdateResult { matched: 2, modified: 1 });

        let result = store
            .update_one("nodes", &Filter::all().eq("name", "zzz"), &Update::new().set("rank", 9))
            .unwrap();
        assert_eq!(result, UpdateResult::default());
    }

    #[test]
    fn test_update_rejects_id_path() {
        let store = store();
        let id = store.insert_one("nodes", named("a", 1)).unwrap();
        let err = store
            .update_one("nodes", &Filter::by_id(id), &Update::new().set("_id", ObjectId::new()))
            .unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));
    }

    #[test]
    fn test_failed_update_leaves_document_untouched() {
        let store = store();
        let id = store.insert_one("nodes", named("a", 1)).unwrap();
        let update = Update::new().set("rank", 5).set("name.inner", 1);
        assert!(store.update_one("nodes", &Filter::by_id(id), &update).is_err());
        let doc = store.find_one("nodes", &Filter::by_id(id)).unwrap().unwrap();
        assert_eq!(doc.get("rank"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_find_one_and_update_returns_pre_image() {
        let store = store();
        let id = store.insert_one("nodes", named("a", 1)).unwrap();
        let before = store
            .find_one_and_update("nodes", &Filter::by_id(id), &Update::new().set("rank", 2))
            .unwrap()
            .unwrap();
        assert_eq!(before.get("rank"), Some(&Value::Int(1)));
        let after = store.find_one("nodes", &Filter::by_id(id)).unwrap().unwrap();
        assert_eq!(after.get("rank"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_delete_one_and_many() {
        let store = store();
        for rank in 0..3 {
            store.insert_one("edges", named("x", rank)).unwrap();
        }
        assert_eq!(store.delete_one("edges", &Filter::all().eq("name", "x")).unwrap(), 1);
        assert_eq!(store.delete_many("edges", &Filter::all().eq("name", "x")).unwrap(), 2);
        assert_eq!(store.count("edges", &Filter::all()).unwrap(), 0);
    }

    #[test]
    fn test_collections_are_scoped_per_database() {
        let store = store();
        store.insert_one("nodes", named("a", 1)).unwrap();
        store.insert_one("edges", named("b", 1)).unwrap();
        assert_eq!(store.list_collection_names().unwrap(), vec!["edges", "nodes"]);
        assert_eq!(store.database_names(), vec!["test_db"]);

        assert_eq!(store.drop_database("other_db").unwrap(), 0);
        assert_eq!(store.drop_database("test_db").unwrap(), 2);
        assert!(store.list_collection_names().unwrap().is_empty());
    }

    #[test]
    fn test_clear_keeps_collection() {
        let store = store();
        store.insert_one("nodes", named("a", 1)).unwrap();
        assert_eq!(store.clear_collection("nodes").unwrap(), 1);
        assert_eq!(store.list_collection_names().unwrap(), vec!["nodes"]);
        assert!(store.drop_collection("nodes").unwrap());
        assert!(!store.drop_collection("nodes").unwrap());
    }
}
