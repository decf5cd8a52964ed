//! Identity & store adapter: owns the store handle, hands out repositories

use crate::config::StoreConfig;
use crate::error::{GraphError, Result};
use crate::storage::{SledStore, Store};

use super::{EdgeRepository, NodeRepository, NoteRepository};

/// Open handle on one named database
///
/// Holds no graph state of its own; every repository call is a round trip to
/// the store. The handle is flushed and released when dropped.
pub struct Database {
    store: SledStore,
    config: StoreConfig,
    closed: bool,
}

impl Database {
    /// Open the database described by `config`.
    ///
    /// Fails with [`GraphError::Connection`] when the store cannot be opened
    /// before `config.timeout_ms` elapses.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let store = SledStore::open(config)?;
        tracing::info!("Connected to database '{}' at {:?}", config.database, config.data_dir);
        Ok(Self {
            store,
            config: config.clone(),
            closed: false,
        })
    }

    /// Database backed by a temporary store, removed on drop
    pub fn temporary(database: &str) -> Result<Self> {
        let config = StoreConfig::new(database, std::env::temp_dir());
        config.validate()?;
        Ok(Self {
            store: SledStore::temporary(database)?,
            config,
            closed: false,
        })
    }

    /// Scoped acquisition: open, run `f`, then close on every exit path.
    ///
    /// An error from `f` takes precedence over an error while closing.
    pub fn with<T, E, F>(config: &StoreConfig, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Database) -> std::result::Result<T, E>,
        E: From<GraphError>,
    {
        let db = Database::open(config)?;
        let outcome = f(&db);
        let closed = db.close();
        let value = outcome?;
        closed?;
        Ok(value)
    }

    /// Flush pending writes and release the handle
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.store.flush()?;
        tracing::debug!("Closed database '{}'", self.config.database);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.config.database
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn Store {
        &self.store
    }

    pub fn nodes(&self) -> NodeRepository<'_> {
        NodeRepository::new(&self.store)
    }

    pub fn edges(&self) -> EdgeRepository<'_> {
        EdgeRepository::new(&self.store)
    }

    pub fn notes(&self) -> NoteRepository<'_> {
        NoteRepository::new(&self.store)
    }

    /// Every database with at least one collection at this connection target
    pub fn database_names(&self) -> Vec<String> {
        self.store.database_names()
    }

    /// Remove every collection of database `name` at this connection target.
    /// Returns the number of collections dropped.
    pub fn drop_database(&self, name: &str) -> Result<usize> {
        self.store.drop_database(name)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.store.flush() {
                tracing::error!("Flush on drop failed for database '{}': {}", self.config.database, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_data_survives_reopen() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new("world", dir.path().join("store"));

        Database::with(&config, |db| db.nodes().add(&Node::new("Cave", "location"))).unwrap();

        let found = Database::with(&config, |db| db.nodes().get_by_name("Cave")).unwrap();
        assert_eq!(found.unwrap().node_type.as_deref(), Some("location"));
    }

    #[test]
    fn test_with_releases_handle_on_error() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new("world", dir.path().join("store"));

        let failed: Result<()> = Database::with(&config, |db| {
            db.nodes().add(&Node::default())?;
            Ok(())
        });
        assert!(matches!(failed, Err(GraphError::Validation(_))));

        // a leaked handle would keep the lock and make this time out
        let reopened = Database::open(&config.clone().with_timeout(Duration::from_secs(2)));
        assert!(reopened.is_ok());
    }

    #[test]
    fn test_open_times_out_while_locked() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new("world", dir.path().join("store")).with_timeout(Duration::from_millis(100));

        let _held = Database::open(&config).unwrap();
        match Database::open(&config) {
            Err(GraphError::Connection { .. }) => {}
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("second handle opened while locked"),
        }
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new("bad.name", dir.path());
        assert!(matches!(Database::open(&config), Err(GraphError::Config(_))));
    }

    #[test]
    fn test_databases_are_isolated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");
        {
            let db = Database::open(&StoreConfig::new("a", &path)).unwrap();
            db.nodes().add(&Node::new("Cave", "location")).unwrap();
            db.close().unwrap();
        }
        let db = Database::open(&StoreConfig::new("b", &path)).unwrap();
        assert_eq!(db.nodes().count().unwrap(), 0);
        assert_eq!(db.database_names(), vec!["a".to_string()]);
        assert_eq!(db.drop_database("a").unwrap(), 1);
        assert!(db.database_names().is_empty());
    }
}
