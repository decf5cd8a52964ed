//! Store configuration
//!
//! Passed explicitly to [`crate::graph::Database::open`]; nothing here is
//! process-global, so differently configured handles can coexist.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{GraphError, Result};

pub const DEFAULT_DATABASE: &str = "graph_db";
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Where and how to open the store
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database name (namespace of collections inside the store)
    pub database: String,
    /// Connection target: directory holding the store files
    pub data_dir: PathBuf,
    /// How long `open` waits for the store to become available
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl StoreConfig {
    pub fn new(database: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load from an optional TOML file, then apply `DOCGRAPH_*` environment
    /// overrides, then validate.
    ///
    /// ```toml
    /// database = "world"
    /// data_dir = "/var/lib/docgraph"
    /// timeout_ms = 2000
    /// ```
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    GraphError::Config(format!("failed to read config file {:?}: {}", path, e))
                })?;
                Self::from_toml(&contents)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| GraphError::Config(format!("failed to parse config: {}", e)))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DOCGRAPH_DATABASE") {
            self.database = v;
        }
        if let Ok(v) = std::env::var("DOCGRAPH_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("DOCGRAPH_TIMEOUT_MS") {
            match v.parse() {
                Ok(ms) => self.timeout_ms = ms,
                Err(_) => tracing::warn!("Ignoring DOCGRAPH_TIMEOUT_MS={:?}: not a number", v),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(GraphError::Config("database name must not be empty".into()));
        }
        if self.database.contains('.') {
            return Err(GraphError::Config(format!(
                "database name '{}' must not contain '.'",
                self.database
            )));
        }
        if self.timeout_ms == 0 {
            return Err(GraphError::Config("timeout_ms must be greater than zero".into()));
        }
        Ok(())
    }
}
