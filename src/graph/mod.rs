//! Graph model over the document store: nodes, edges and notes

pub mod database;
pub mod edges;
pub mod nodes;
pub mod notes;


pub use database::Database;
pub use edges::EdgeRepository;
pub use nodes::NodeRepository;
pub use notes::NoteRepository;

use crate::error::{GraphError, Result};
use crate::storage::{Document, ObjectId, Value, ID_FIELD};

/// Collection holding node documents
pub const NODES: &str = "nodes";
/// Collection holding edge documents
pub const EDGES: &str = "edges";

/// Field names of a stored node
pub mod fields {
    pub const NAME: &str = "name";
    pub const TYPE: &str = "type";
    pub const PROPERTIES: &str = "properties";
    pub const NOTES: &str = "notes";

    pub const FROM_ID: &str = "from_id";
    pub const TO_ID: &str = "to_id";
    pub const DATA: &str = "data";

    pub const TRIGGER: &str = "trigger";
    pub const EFFECT: &str = "effect";
    pub const CLEAR_AFTER_USE: &str = "clear_after_use";
}

fn optional_string(doc: &Document, key: &str) -> Result<Option<String>> {
    match doc.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(GraphError::Validation(format!(
            "'{}' must be a string, got {}",
            key,
            other.type_name()
        ))),
    }
}

/// Transient annotation embedded in a node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Note {
    pub trigger: String,
    pub effect: String,
    pub clear_after_use: bool,
}

impl Note {
    pub fn new(trigger: impl Into<String>, effect: impl Into<String>, clear_after_use: bool) -> Self {
        Self {
            trigger: trigger.into(),
            effect: effect.into(),
            clear_after_use,
        }
    }

    /// Missing fields fall back to empty text and `clear_after_use = false`
    pub fn from_value(value: &Value) -> Result<Self> {
        let doc = value.as_document().ok_or_else(|| {
            GraphError::Validation(format!("note must be a document, got {}", value.type_name()))
        })?;
        Ok(Self {
            trigger: optional_string(doc, fields::TRIGGER)?.unwrap_or_default(),
            effect: optional_string(doc, fields::EFFECT)?.unwrap_or_default(),
            clear_after_use: doc.get(fields::CLEAR_AFTER_USE).and_then(Value::as_bool).unwrap_or(false),
        })
    }

    pub fn to_document(&self) -> Document {
        Document::new()
            .with(fields::TRIGGER, self.trigger.as_str())
            .with(fields::EFFECT, self.effect.as_str())
            .with(fields::CLEAR_AFTER_USE, self.clear_after_use)
    }
}

/// A named, typed vertex with arbitrary nested properties
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    /// Assigned by the store on insert
    pub id: Option<ObjectId>,
    /// Unique by convention only
    pub name: Option<String>,
    pub node_type: Option<String>,
    pub properties: Document,
    pub notes: Vec<Note>,
    /// Any other top-level fields, carried through untouched
    pub extra: Document,
}

impl Node {
    pub fn new(name: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            node_type: Some(node_type.into()),
            ..Self::default()
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key, value);
        self
    }

    pub fn with_note(mut self, note: Note) -> Self {
        self.notes.push(note);
        self
    }

    /// Property by dotted path relative to `properties`
    pub fn property(&self, path: &str) -> Option<&Value> {
        self.properties.get_path(path)
    }

    pub fn from_document(mut doc: Document) -> Result<Self> {
        let id = match doc.remove(ID_FIELD) {
            None => None,
            Some(Value::Id(id)) => Some(id),
            Some(other) => {
                return Err(GraphError::Validation(format!(
                    "'{}' must be an id, got {}",
                    ID_FIELD,
                    other.type_name()
                )))
            }
        };
        let name = optional_string(&doc, fields::NAME)?;
        let node_type = optional_string(&doc, fields::TYPE)?;
        doc.remove(fields::NAME);
        doc.remove(fields::TYPE);

        let properties = match doc.remove(fields::PROPERTIES) {
            None | Some(Value::Null) => Document::new(),
            Some(Value::Document(d)) => d,
            Some(other) => {
                return Err(GraphError::Validation(format!(
                    "'{}' must be a document, got {}",
                    fields::PROPERTIES,
                    other.type_name()
                )))
            }
        };
        let notes = match doc.remove(fields::NOTES) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.iter().map(Note::from_value).collect::<Result<_>>()?,
            Some(other) => {
                return Err(GraphError::Validation(format!(
                    "'{}' must be an array, got {}",
                    fields::NOTES,
                    other.type_name()
                )))
            }
        };

        Ok(Self {
            id,
            name,
            node_type,
            properties,
            notes,
            extra: doc,
        })
    }

    /// Stored shape: `_id` (when assigned), name, type, properties, notes, extras
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        if let Some(id) = self.id {
            doc.insert(ID_FIELD, id);
        }
        if let Some(name) = &self.name {
            doc.insert(fields::NAME, name.as_str());
        }
        if let Some(node_type) = &self.node_type {
            doc.insert(fields::TYPE, node_type.as_str());
        }
        doc.insert(fields::PROPERTIES, self.properties.clone());
        doc.insert(
            fields::NOTES,
            Value::Array(self.notes.iter().map(|n| Value::Document(n.to_document())).collect()),
        );
        for (k, v) in self.extra.iter() {
            doc.insert(k.as_str(), v.clone());
        }
        doc
    }
}

/// Directed arc between two node ids
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: ObjectId,
    pub from_id: ObjectId,
    pub to_id: ObjectId,
    pub data: Document,
}

impl Edge {
    pub fn from_document(doc: &Document) -> Result<Self> {
        let id_field = |key: &str| {
            doc.get_id(key).ok_or_else(|| {
                GraphError::Validation(format!("edge document is missing id field '{}'", key))
            })
        };
        Ok(Self {
            id: id_field(ID_FIELD)?,
            from_id: id_field(fields::FROM_ID)?,
            to_id: id_field(fields::TO_ID)?,
            data: doc.get(fields::DATA).and_then(Value::as_document).cloned().unwrap_or_default(),
        })
    }

    /// Free-form `type` entry of the edge data, if any
    pub fn edge_type(&self) -> Option<&str> {
        self.data.get_str("type")
    }
}

/// Outgoing edge as seen from its source node
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub edge_id: ObjectId,
    pub target_id: ObjectId,
    /// `None` when the target node no longer exists
    pub target_name: Option<String>,
    pub data: Document,
}

impl Connection {
    pub fn is_dangling(&self) -> bool {
        self.target_name.is_none()
    }

    pub fn edge_type(&self) -> Option<&str> {
        self.data.get_str("type")
    }

    /// Flat view: `{target_id, target_name, ...data}`
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new()
            .with("target_id", self.target_id)
            .with(
                "target_name",
                self.target_name.clone().map(Value::String).unwrap_or(Value::Null),
            );
        for (k, v) in self.data.iter() {
            if k != "target_id" && k != "target_name" {
                doc.insert(k.as_str(), v.clone());
            }
        }
        doc
    }
}
