//! Node repository: CRUD and listing over the `nodes` collection

use crate::error::{GraphError, Result};
use crate::storage::{Document, Filter, FindOptions, ObjectId, SortDirection, Store, Update, ID_FIELD};

use super::{fields, Node, NODES};

/// Unbounded listings beyond this many nodes are logged as a warning
pub const LARGE_SCAN_WARNING: usize = 10_000;

/// Oldest match first, so name lookups are deterministic across calls
fn oldest_first() -> FindOptions {
    FindOptions::new().sort(ID_FIELD, SortDirection::Ascending)
}

pub struct NodeRepository<'a> {
    store: &'a dyn Store,
}

impl<'a> NodeRepository<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Insert `node` under a freshly assigned id.
    ///
    /// Names are unique by convention only: adding a second node with an
    /// existing name succeeds, logs a warning, and name lookups keep
    /// returning the oldest one.
    ///
    /// The duplicate check scans the whole collection, so each add is
    /// linear in the number of nodes.
    pub fn add(&self, node: &Node) -> Result<ObjectId> {
        let name = match node.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => return Err(GraphError::Validation("node requires a non-empty 'name'".into())),
        };
        if self.store.count(NODES, &Filter::all().eq(fields::NAME, name))? > 0 {
            tracing::warn!("Node name '{}' already exists; lookups by name return the oldest", name);
        }

        let mut doc = node.to_document();
        doc.remove(ID_FIELD);
        let id = self.store.insert_one(NODES, doc)?;
        tracing::info!("Added node '{}' ({})", name, id);
        Ok(id)
    }

    /// Insert a raw node document after checking it has the node shape
    pub fn add_document(&self, doc: Document) -> Result<ObjectId> {
        self.add(&Node::from_document(doc)?)
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<Node>> {
        tracing::debug!("Looking up node by name '{}'", name);
        let docs = self
            .store
            .find(NODES, &Filter::all().eq(fields::NAME, name), &oldest_first().limit(1))?;
        docs.into_iter().next().map(Node::from_document).transpose()
    }

    pub fn get_by_id(&self, id: ObjectId) -> Result<Option<Node>> {
        tracing::debug!("Looking up node {}", id);
        self.store
            .find_one(NODES, &Filter::by_id(id))?
            .map(Node::from_document)
            .transpose()
    }

    /// Like [`get_by_name`](Self::get_by_name), but a miss is an error
    pub fn require_by_name(&self, name: &str) -> Result<Node> {
        self.get_by_name(name)?
            .ok_or_else(|| GraphError::NotFound(format!("node '{}'", name)))
    }

    pub fn require_by_id(&self, id: ObjectId) -> Result<Node> {
        self.get_by_id(id)?
            .ok_or_else(|| GraphError::NotFound(format!("node {}", id)))
    }

    /// Id of the node called `name`, or NotFound
    pub fn id_of(&self, name: &str) -> Result<ObjectId> {
        self.require_by_name(name)?
            .id
            .ok_or_else(|| GraphError::NotFound(format!("node '{}' has no id", name)))
    }

    /// Merge `updates` (dotted path -> value) into node `id`.
    ///
    /// Only the named paths change; siblings stay as they are. Returns the
    /// number of matched nodes (0 or 1).
    pub fn update(&self, id: ObjectId, updates: Document) -> Result<usize> {
        let update = Update::set_all(updates);
        let result = self.store.update_one(NODES, &Filter::by_id(id), &update)?;
        tracing::info!(
            "Updated node {}: matched {}, modified {}",
            id,
            result.matched,
            result.modified
        );
        Ok(result.matched)
    }

    /// Delete the oldest node called `name`. Returns the number deleted.
    pub fn delete_by_name(&self, name: &str) -> Result<usize> {
        let Some(id) = self.get_by_name(name)?.and_then(|n| n.id) else {
            return Ok(0);
        };
        let deleted = self.store.delete_one(NODES, &Filter::by_id(id))?;
        tracing::info!("Deleted node '{}' ({})", name, id);
        Ok(deleted)
    }

    pub fn delete_by_id(&self, id: ObjectId) -> Result<usize> {
        self.store.delete_one(NODES, &Filter::by_id(id))
    }

    /// List nodes, optionally sorted and limited.
    ///
    /// Without a limit (or with a limit of 0) the whole collection is loaded
    /// into memory. Name lookups and [`add`](Self::add) scan it too; there is
    /// no name index.
    pub fn list(&self, options: &FindOptions) -> Result<Vec<Node>> {
        if options.bound().is_none() {
            let total = self.store.count(NODES, &Filter::all())?;
            if total > LARGE_SCAN_WARNING {
                tracing::warn!("Unbounded listing of {} nodes; pass a limit to bound memory use", total);
            }
        }
        self.find(&Filter::all(), options)
    }

    pub fn find(&self, filter: &Filter, options: &FindOptions) -> Result<Vec<Node>> {
        self.store
            .find(NODES, filter, options)?
            .into_iter()
            .map(Node::from_document)
            .collect()
    }

    pub fn count(&self) -> Result<usize> {
        self.store.count(NODES, &Filter::all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Database, Note};
    use crate::storage::Value;

    fn db() -> Database {
        Database::temporary("test_db").unwrap()
    }

    fn goblin() -> Node {
        Node::new("Goblin", "creature")
            .with_property("health", 50)
            .with_property("stats", Document::new().with("str", 3).with("dex", 7))
    }

    #[test]
    fn test_add_requires_name() {
        let db = db();
        assert!(matches!(db.nodes().add(&Node::default()), Err(GraphError::Validation(_))));
        let unnamed = Node { name: Some(String::new()), ..Node::default() };
        assert!(matches!(db.nodes().add(&unnamed), Err(GraphError::Validation(_))));
        assert_eq!(db.nodes().count().unwrap(), 0);
    }

    #[test]
    fn test_add_ignores_caller_id() {
        let db = db();
        let preset = ObjectId::new();
        let node = Node { id: Some(preset), ..goblin() };
        let id = db.nodes().add(&node).unwrap();
        assert_ne!(id, preset);
    }

    #[test]
    fn test_get_by_name_and_id() {
        let db = db();
        let id = db.nodes().add(&goblin()).unwrap();

        let by_name = db.nodes().get_by_name("Goblin").unwrap().unwrap();
        assert_eq!(by_name.id, Some(id));
        assert_eq!(db.nodes().get_by_id(id).unwrap(), Some(by_name));
        assert!(db.nodes().get_by_name("Orc").unwrap().is_none());
        assert!(matches!(db.nodes().require_by_name("Orc"), Err(GraphError::NotFound(_))));
    }

    #[test]
    fn test_duplicate_names_resolve_to_oldest() {
        let db = db();
        let first = db.nodes().add(&goblin()).unwrap();
        let second = db.nodes().add(&goblin().with_property("health", 10)).unwrap();
        assert_ne!(first, second);

        for _ in 0..3 {
            assert_eq!(db.nodes().id_of("Goblin").unwrap(), first);
        }

        assert_eq!(db.nodes().delete_by_name("Goblin").unwrap(), 1);
        assert_eq!(db.nodes().id_of("Goblin").unwrap(), second);
    }

    #[test]
    fn test_update_merges_paths() {
        let db = db();
        let id = db.nodes().add(&goblin()).unwrap();

        let matched = db
            .nodes()
            .update(id, Document::new().with("properties.stats.dex", 9).with("properties.loot.gold", 5))
            .unwrap();
        assert_eq!(matched, 1);

        let node = db.nodes().require_by_id(id).unwrap();
        assert_eq!(node.property("stats.dex"), Some(&Value::Int(9)));
        assert_eq!(node.property("stats.str"), Some(&Value::Int(3)));
        assert_eq!(node.property("loot.gold"), Some(&Value::Int(5)));
        assert_eq!(node.property("health"), Some(&Value::Int(50)));
        assert_eq!(node.node_type.as_deref(), Some("creature"));
    }

    #[test]
    fn test_update_array_index() {
        let db = db();
        let node = goblin().with_note(Note::new("dawn", "wakes", false));
        let id = db.nodes().add(&node).unwrap();

        db.nodes().update(id, Document::new().with("notes.0.effect", "sleeps")).unwrap();
        let node = db.nodes().require_by_id(id).unwrap();
        assert_eq!(node.notes[0].effect, "sleeps");
        assert_eq!(node.notes[0].trigger, "dawn");
    }

    #[test]
    fn test_update_missing_and_invalid() {
        let db = db();
        let id = db.nodes().add(&goblin()).unwrap();

        assert_eq!(db.nodes().update(ObjectId::new(), Document::new().with("type", "x")).unwrap(), 0);
        assert!(matches!(
            db.nodes().update(id, Document::new().with("_id", "x")),
            Err(GraphError::Validation(_))
        ));
        assert!(matches!(
            db.nodes().update(id, Document::new().with("name.first", "x")),
            Err(GraphError::Validation(_))
        ));
        assert!(matches!(db.nodes().update(id, Document::new()), Err(GraphError::Validation(_))));
    }

    #[test]
    fn test_delete_by_name_missing() {
        let db = db();
        assert_eq!(db.nodes().delete_by_name("Nobody").unwrap(), 0);
    }

    #[test]
    fn test_list_sort_and_limit() {
        let db = db();
        for (name, health) in [("b", 20), ("a", 30), ("c", 10)] {
            db.nodes().add(&Node::new(name, "creature").with_property("health", health)).unwrap();
        }

        let all = db.nodes().list(&FindOptions::new()).unwrap();
        let names: Vec<_> = all.iter().filter_map(|n| n.name.as_deref()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);

        let by_name = db.nodes().list(&FindOptions::new().sort("name", SortDirection::Descending)).unwrap();
        assert_eq!(by_name[0].name.as_deref(), Some("c"));

        let weakest = db
            .nodes()
            .list(&FindOptions::new().sort("properties.health", SortDirection::Ascending).limit(2))
            .unwrap();
        let names: Vec<_> = weakest.iter().filter_map(|n| n.name.as_deref()).collect();
        assert_eq!(names, vec!["c", "b"]);

        assert_eq!(db.nodes().list(&FindOptions::new().limit(0)).unwrap().len(), 3);
    }

    #[test]
    fn test_update_rejects_runaway_array_index() {
        let db = db();
        let id = db
            .nodes()
            .add(&Node::new("Goblin", "monster").with_property("loot", vec![Value::from("coin")]))
            .unwrap();

        let err = db
            .nodes()
            .update(id, Document::new().with("properties.loot.18446744073709551615", 1))
            .unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));

        let node = db.nodes().require_by_id(id).unwrap();
        assert_eq!(node.property("loot"), Some(&Value::Array(vec![Value::from("coin")])));
    }
}
