//! Database-wide maintenance: stats, clearing, dropping

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{GraphError, Result};
use crate::graph::Database;
use crate::storage::Filter;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    pub database: String,
    pub collections: Vec<String>,
    pub counts: BTreeMap<String, usize>,
}

impl DatabaseStats {
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

pub fn get_stats(db: &Database) -> Result<DatabaseStats> {
    let store = db.store();
    let collections = store.list_collection_names()?;
    let mut counts = BTreeMap::new();
    for name in &collections {
        counts.insert(name.clone(), store.count(name, &Filter::all())?);
    }
    Ok(DatabaseStats {
        database: db.name().to_string(),
        collections,
        counts,
    })
}

/// Remove every document from `collection`. A collection that does not exist
/// counts as already empty.
pub fn clear_collection(db: &Database, collection: &str) -> Result<usize> {
    let store = db.store();
    if !store.list_collection_names()?.iter().any(|n| n == collection) {
        tracing::debug!("Collection '{}' does not exist; nothing to clear", collection);
        return Ok(0);
    }
    store.clear_collection(collection)
}

/// Clear every collection of `db`. Returns the total number of documents removed.
pub fn clear_all(db: &Database) -> Result<usize> {
    let mut removed = 0;
    for name in db.store().list_collection_names()? {
        removed += db.store().clear_collection(&name)?;
    }
    Ok(removed)
}

/// Irreversibly remove database `name`. `confirm` must repeat the name.
///
/// Take a snapshot first; nothing here does it for you.
pub fn drop_database(db: &Database, name: &str, confirm: &str) -> Result<usize> {
    if name != confirm {
        return Err(GraphError::DestructiveOpGuard(format!(
            "confirmation '{}' does not match database name '{}'",
            confirm, name
        )));
    }
    db.drop_database(name)
}
