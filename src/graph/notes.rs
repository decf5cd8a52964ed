//! Note subsystem: ordered annotations embedded in a node

use crate::error::{GraphError, Result};
use crate::storage::{Filter, ObjectId, Store, Update, Value};

use super::{fields, Note, NODES};

pub struct NoteRepository<'a> {
    store: &'a dyn Store,
}

impl<'a> NoteRepository<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Append `note` to the node's note sequence
    pub fn add_note(&self, node_id: ObjectId, note: &Note) -> Result<()> {
        let update = Update::new().push(fields::NOTES, note.to_document());
        let result = self.store.update_one(NODES, &Filter::by_id(node_id), &update)?;
        if result.matched == 0 {
            return Err(GraphError::NotFound(format!("node {}", node_id)));
        }
        tracing::info!("Added note to node {} (trigger '{}')", node_id, note.trigger);
        Ok(())
    }

    pub fn notes(&self, node_id: ObjectId) -> Result<Vec<Note>> {
        let doc = self
            .store
            .find_one(NODES, &Filter::by_id(node_id))?
            .ok_or_else(|| GraphError::NotFound(format!("node {}", node_id)))?;
        match doc.get(fields::NOTES) {
            Some(Value::Array(items)) => items.iter().map(Note::from_value).collect(),
            _ => Ok(Vec::new()),
        }
    }

    /// Surface every note of the node, then drop the ones marked
    /// `clear_after_use`.
    ///
    /// Read and removal happen in one conditional store update, so notes
    /// appended concurrently are either returned here or kept for the next
    /// call, never lost.
    pub fn process_and_clear(&self, node_id: ObjectId) -> Result<Vec<Note>> {
        let update = Update::new().pull(fields::NOTES, Filter::all().eq(fields::CLEAR_AFTER_USE, true));
        let before = self
            .store
            .find_one_and_update(NODES, &Filter::by_id(node_id), &update)?
            .ok_or_else(|| GraphError::NotFound(format!("node {}", node_id)))?;

        let notes: Vec<Note> = match before.get(fields::NOTES) {
            Some(Value::Array(items)) => items.iter().map(Note::from_value).collect::<Result<_>>()?,
            _ => Vec::new(),
        };
        for note in &notes {
            tracing::info!("Note on {}: {} -> {}", node_id, note.trigger, note.effect);
        }
        let cleared = notes.iter().filter(|n| n.clear_after_use).count();
        tracing::info!("Processed {} note(s) on node {}, cleared {}", notes.len(), node_id, cleared);
        Ok(notes)
    }
}
