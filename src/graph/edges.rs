//! Edge repository over the `edges` collection
//!
//! Endpoints are plain node ids: nothing stops an edge from outliving the
//! node it points at, so readers resolve targets softly.

use crate::error::{GraphError, Result};
use crate::storage::{Document, Filter, FindOptions, ObjectId, SortDirection, Store, ID_FIELD};

use super::{fields, Connection, Edge, EDGES, NODES};

pub struct EdgeRepository<'a> {
    store: &'a dyn Store,
}

impl<'a> EdgeRepository<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Record a directed edge. Endpoints are not checked for existence.
    pub fn add(&self, from_id: ObjectId, to_id: ObjectId, data: Document) -> Result<ObjectId> {
        let doc = Document::new()
            .with(fields::FROM_ID, from_id)
            .with(fields::TO_ID, to_id)
            .with(fields::DATA, data);
        let id = self.store.insert_one(EDGES, doc)?;
        tracing::info!("Added edge {} -> {} ({})", from_id, to_id, id);
        Ok(id)
    }

    pub fn get(&self, id: ObjectId) -> Result<Option<Edge>> {
        self.store
            .find_one(EDGES, &Filter::by_id(id))?
            .map(|doc| Edge::from_document(&doc))
            .transpose()
    }

    fn find(&self, filter: &Filter) -> Result<Vec<Edge>> {
        self.store
            .find(EDGES, filter, &FindOptions::new().sort(ID_FIELD, SortDirection::Ascending))?
            .iter()
            .map(Edge::from_document)
            .collect()
    }

    /// Edges leaving `node_id`, oldest first
    pub fn outgoing(&self, node_id: ObjectId) -> Result<Vec<Edge>> {
        self.find(&Filter::all().eq(fields::FROM_ID, node_id))
    }

    /// Edges arriving at `node_id`, oldest first
    pub fn incoming(&self, node_id: ObjectId) -> Result<Vec<Edge>> {
        self.find(&Filter::all().eq(fields::TO_ID, node_id))
    }

    /// Name of the node an edge points at
    fn resolve_target(&self, target_id: ObjectId) -> Result<String> {
        let doc = self
            .store
            .find_one(NODES, &Filter::by_id(target_id))?
            .ok_or_else(|| GraphError::Reference(format!("connection target {} missing", target_id)))?;
        doc.get_str(fields::NAME)
            .map(str::to_string)
            .ok_or_else(|| GraphError::Reference(format!("connection target {} has no name", target_id)))
    }

    /// Outgoing edges of `node_id` with the target's name denormalized in.
    ///
    /// A target that no longer resolves still yields its connection, with
    /// `target_name` left empty.
    pub fn get_connections(&self, node_id: ObjectId) -> Result<Vec<Connection>> {
        let mut connections = Vec::new();
        for edge in self.outgoing(node_id)? {
            let target_name = match self.resolve_target(edge.to_id) {
                Ok(name) => Some(name),
                Err(GraphError::Reference(reason)) => {
                    tracing::warn!("Edge {}: {}", edge.id, reason);
                    None
                }
                Err(e) => return Err(e),
            };
            connections.push(Connection {
                edge_id: edge.id,
                target_id: edge.to_id,
                target_name,
                data: edge.data,
            });
        }
        Ok(connections)
    }

    fn pair(from_id: ObjectId, to_id: ObjectId) -> Filter {
        Filter::all().eq(fields::FROM_ID, from_id).eq(fields::TO_ID, to_id)
    }

    /// Remove every edge from `from_id` to `to_id`. Returns the number removed.
    pub fn remove(&self, from_id: ObjectId, to_id: ObjectId) -> Result<usize> {
        let removed = self.store.delete_many(EDGES, &Self::pair(from_id, to_id))?;
        tracing::info!("Removed {} edge(s) {} -> {}", removed, from_id, to_id);
        Ok(removed)
    }

    /// Remove only the oldest edge from `from_id` to `to_id`
    pub fn remove_one(&self, from_id: ObjectId, to_id: ObjectId) -> Result<usize> {
        let removed = self.store.delete_one(EDGES, &Self::pair(from_id, to_id))?;
        tracing::info!("Removed {} edge(s) {} -> {}", removed, from_id, to_id);
        Ok(removed)
    }

    pub fn count(&self) -> Result<usize> {
        self.store.count(EDGES, &Filter::all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Database, Node};

    fn db_with_nodes() -> (Database, ObjectId, ObjectId) {
        let db = Database::temporary("test_db").unwrap();
        let a = db.nodes().add(&Node::new("Village", "location")).unwrap();
        let b = db.nodes().add(&Node::new("Forest", "location")).unwrap();
        (db, a, b)
    }

    fn path(kind: &str, distance: i64) -> Document {
        Document::new().with("type", kind).with("distance", distance)
    }

    #[test]
    fn test_add_and_get() {
        let (db, a, b) = db_with_nodes();
        let id = db.edges().add(a, b, path("road", 3)).unwrap();

        let edge = db.edges().get(id).unwrap().unwrap();
        assert_eq!((edge.from_id, edge.to_id), (a, b));
        assert_eq!(edge.edge_type(), Some("road"));
    }

    #[test]
    fn test_edges_are_directed() {
        let (db, a, b) = db_with_nodes();
        db.edges().add(a, b, Document::new()).unwrap();

        assert_eq!(db.edges().outgoing(a).unwrap().len(), 1);
        assert!(db.edges().outgoing(b).unwrap().is_empty());
        assert_eq!(db.edges().incoming(b).unwrap().len(), 1);
        assert_eq!(db.edges().remove(b, a).unwrap(), 0);
        assert_eq!(db.edges().count().unwrap(), 1);
    }

    #[test]
    fn test_get_connections_denormalizes_name() {
        let (db, a, b) = db_with_nodes();
        db.edges().add(a, b, path("road", 3)).unwrap();

        let connections = db.edges().get_connections(a).unwrap();
        assert_eq!(connections.len(), 1);
        let c = &connections[0];
        assert_eq!(c.target_id, b);
        assert_eq!(c.target_name.as_deref(), Some("Forest"));
        let flat = c.to_document();
        assert_eq!(flat.get_str("target_name"), Some("Forest"));
        assert_eq!(flat.get("distance").and_then(|v| v.as_i64()), Some(3));
    }

    #[test]
    fn test_add_does_not_check_endpoints() {
        let (db, a, _) = db_with_nodes();
        let ghost = ObjectId::new();
        db.edges().add(a, ghost, Document::new()).unwrap();

        let connections = db.edges().get_connections(a).unwrap();
        assert_eq!(connections.len(), 1);
        assert!(connections[0].is_dangling());
    }

    #[test]
    fn test_remove_one_leaves_the_rest() {
        let (db, a, b) = db_with_nodes();
        let first = db.edges().add(a, b, path("road", 3)).unwrap();
        let second = db.edges().add(a, b, path("river", 5)).unwrap();

        assert_eq!(db.edges().remove_one(a, b).unwrap(), 1);
        assert!(db.edges().get(first).unwrap().is_none());
        assert!(db.edges().get(second).unwrap().is_some());
    }
}
