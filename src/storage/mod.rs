//! Document store collaborator
//!
//! The graph layer never talks to sled directly; it goes through [`Store`], a
//! database-scoped handle with conventional document-store semantics.

pub mod id_gen;
pub mod query;
pub mod sled_store;
pub mod value;

pub use id_gen::ObjectId;
pub use query::{Filter, FindOptions, SortDirection, Update, UpdateOp, UpdateResult, ID_FIELD};
pub use sled_store::SledStore;
pub use value::{Document, Value};

use crate::error::Result;

/// Collection-oriented document store, scoped to one named database
pub trait Store: Send + Sync {
    /// Name of the database this handle is scoped to
    fn database_name(&self) -> &str;

    // === WRITES ===

    /// Insert a document. A missing `_id` is generated; a present one must be
    /// an id and must not already exist in the collection.
    fn insert_one(&self, collection: &str, doc: Document) -> Result<ObjectId>;

    /// Insert documents in order, stopping at the first failure
    fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<Vec<ObjectId>>;

    /// Apply `update` to the first match (id order), atomically per document
    fn update_one(&self, collection: &str, filter: &Filter, update: &Update) -> Result<UpdateResult>;

    /// Apply `update` to every match, atomically per document
    fn update_many(&self, collection: &str, filter: &Filter, update: &Update) -> Result<UpdateResult>;

    /// Match and mutate the first matching document in one atomic step,
    /// returning the document as it was before the update
    fn find_one_and_update(&self, collection: &str, filter: &Filter, update: &Update) -> Result<Option<Document>>;

    /// Delete the first match (id order). Returns the number deleted (0 or 1).
    fn delete_one(&self, collection: &str, filter: &Filter) -> Result<usize>;

    fn delete_many(&self, collection: &str, filter: &Filter) -> Result<usize>;

    // === READS ===

    fn find(&self, collection: &str, filter: &Filter, options: &FindOptions) -> Result<Vec<Document>>;

    fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>> {
        let mut docs = self.find(collection, filter, &FindOptions::new().limit(1))?;
        Ok(docs.pop())
    }

    fn count(&self, collection: &str, filter: &Filter) -> Result<usize>;

    // === COLLECTIONS ===

    /// Existing collections, sorted by name
    fn list_collection_names(&self) -> Result<Vec<String>>;

    /// Remove every document, keeping the (now empty) collection. Creates the
    /// collection if it does not exist. Returns the number removed.
    fn clear_collection(&self, collection: &str) -> Result<usize>;

    /// Remove the collection entirely. Returns whether it existed.
    fn drop_collection(&self, collection: &str) -> Result<bool>;

    /// Make pending writes durable
    fn flush(&self) -> Result<()>;
}
