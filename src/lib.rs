//! docgraph - graph-structured data layer over an embedded document store
//!
//! # Architecture
//!
//! - **Store**: collection-oriented documents in sled trees, MessagePack-encoded
//! - **Graph model**: named, typed nodes with nested properties; directed edges
//!   between node ids; notes embedded in nodes
//! - **Bulk pipeline**: JSON / JSON Lines / CSV / TSV import and export with
//!   per-record failure accounting
//! - **Snapshots**: the whole database in one versioned JSON file, ids tagged
//!   so they come back as ids
//!
//! # Usage example
//!
//! ```no_run
//! use docgraph::{Database, Document, Node, Note, StoreConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StoreConfig::new("world", "./data");
//! Database::with(&config, |db| {
//!     let village = db.nodes().add(&Node::new("Village", "location").with_property("population", 120))?;
//!     let forest = db.nodes().add(&Node::new("Forest", "location"))?;
//!     db.edges().add(village, forest, Document::new().with("type", "path"))?;
//!     db.notes().add_note(village, &Note::new("night", "wolves howl", true))?;
//!
//!     db.nodes().update(village, Document::new().with("properties.population", 118))?;
//!     for connection in db.edges().get_connections(village)? {
//!         println!("-> {:?}", connection.target_name);
//!     }
//!     Ok::<_, docgraph::GraphError>(())
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod bulk;
pub mod config;
pub mod error;
pub mod graph;
pub mod snapshot;
pub mod storage;

pub use config::StoreConfig;
pub use error::{GraphError, Result};
pub use graph::{Connection, Database, Edge, Node, Note};
pub use storage::{Document, Filter, FindOptions, ObjectId, SortDirection, Store, Update, Value};
