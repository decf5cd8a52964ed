//! Predicates, update operations and find options understood by the store

use crate::error::{GraphError, Result};
use crate::storage::id_gen::ObjectId;
use crate::storage::value::{split_path, Document, Value};

/// Field holding a document's identity
pub const ID_FIELD: &str = "_id";

static NULL_VALUE: Value = Value::Null;

/// Conjunction of dotted-path equality terms. An empty filter matches all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    terms: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: ObjectId) -> Self {
        Self::all().eq(ID_FIELD, id)
    }

    pub fn eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.terms.push((path.into(), value.into()));
        self
    }

    /// Every top-level entry of `doc` becomes an equality term; keys may be
    /// dotted paths.
    pub fn from_document(doc: Document) -> Self {
        Self { terms: doc.into_iter().collect() }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// The id this filter pins, if it is a plain id lookup
    pub fn id(&self) -> Option<ObjectId> {
        match self.terms.as_slice() {
            [(path, Value::Id(id))] if path == ID_FIELD => Some(*id),
            _ => None,
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.terms.iter().all(|(path, expected)| {
            let segments: Vec<&str> = path.split('.').collect();
            let mut found = Vec::new();
            collect_in_document(doc, &segments, &mut found);
            found.iter().any(|v| value_matches(v, expected))
        })
    }
}

fn value_matches(actual: &Value, expected: &Value) -> bool {
    if actual.loose_eq(expected) {
        return true;
    }
    // an array field matches a scalar it contains
    match (actual, expected) {
        (Value::Array(items), e) if !matches!(e, Value::Array(_)) => items.iter().any(|i| i.loose_eq(e)),
        _ => false,
    }
}

fn collect_in_document<'a>(doc: &'a Document, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    match doc.get(head) {
        Some(v) if rest.is_empty() => out.push(v),
        Some(v) => collect_in_value(v, rest, out),
        // missing field compares as null
        None if rest.is_empty() => out.push(&NULL_VALUE),
        None => {}
    }
}

fn collect_in_value<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    match value {
        Value::Document(d) => collect_in_document(d, segments, out),
        Value::Array(items) => match segments.first().and_then(|s| s.parse::<usize>().ok()) {
            Some(idx) => {
                if let Some(item) = items.get(idx) {
                    if segments.len() == 1 {
                        out.push(item);
                    } else {
                        collect_in_value(item, &segments[1..], out);
                    }
                }
            }
            // fan out over element documents
            None => {
                for item in items {
                    if let Value::Document(d) = item {
                        collect_in_document(d, segments, out);
                    }
                }
            }
        },
        _ => {}
    }
}

/// A single field-path mutation
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Set(String, Value),
    Unset(String),
    /// Append to the array at path, creating it when absent
    Push(String, Value),
    /// Remove every element of the array at path that is a document matching the filter
    Pull(String, Filter),
}

/// Ordered list of mutations applied to one document as a unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Set(path.into(), value.into()));
        self
    }

    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Unset(path.into()));
        self
    }

    pub fn push(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Push(path.into(), value.into()));
        self
    }

    pub fn pull(mut self, path: impl Into<String>, filter: Filter) -> Self {
        self.ops.push(UpdateOp::Pull(path.into(), filter));
        self
    }

    /// `Set` for every (dotted path, value) entry
    pub fn set_all(updates: Document) -> Self {
        Self {
            ops: updates.into_iter().map(|(p, v)| UpdateOp::Set(p, v)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    /// Reject paths the store can never apply, before touching any document
    pub fn validate(&self) -> Result<()> {
        if self.ops.is_empty() {
            return Err(GraphError::Validation("update has no operations".into()));
        }
        for op in &self.ops {
            let path = match op {
                UpdateOp::Set(p, _) | UpdateOp::Unset(p) | UpdateOp::Push(p, _) | UpdateOp::Pull(p, _) => p,
            };
            let segments = split_path(path)?;
            if segments[0] == ID_FIELD {
                return Err(GraphError::Validation(format!(
                    "field '{}' is immutable (update path '{}')",
                    ID_FIELD, path
                )));
            }
        }
        Ok(())
    }

    /// Apply all ops to `doc`. Returns whether the document changed.
    pub fn apply(&self, doc: &mut Document) -> Result<bool> {
        let before = doc.clone();
        for op in &self.ops {
            match op {
                UpdateOp::Set(path, value) => doc.set_path(path, value.clone())?,
                UpdateOp::Unset(path) => {
                    doc.unset_path(path)?;
                }
                UpdateOp::Push(path, value) => match doc.get_path(path) {
                    None => doc.set_path(path, Value::Array(vec![value.clone()]))?,
                    Some(Value::Array(items)) => {
                        let mut items = items.clone();
                        items.push(value.clone());
                        doc.set_path(path, Value::Array(items))?;
                    }
                    Some(other) => {
                        return Err(GraphError::Validation(format!(
                            "cannot push to '{}': field is a {}",
                            path,
                            other.type_name()
                        )))
                    }
                },
                UpdateOp::Pull(path, filter) => {
                    if let Some(Value::Array(items)) = doc.get_path(path) {
                        let kept: Vec<Value> = items
                            .iter()
                            .filter(|item| match item {
                                Value::Document(d) => !filter.matches(d),
                                _ => true,
                            })
                            .cloned()
                            .collect();
                        doc.set_path(path, Value::Array(kept))?;
                    }
                }
            }
        }
        Ok(*doc != before)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Options for `find`
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub sort: Option<(String, SortDirection)>,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort = Some((field.into(), direction));
        self
    }

    /// A limit of 0 means no limit
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The limit to apply, with `Some(0)` read as unbounded
    pub fn bound(&self) -> Option<usize> {
        self.limit.filter(|&n| n > 0)
    }
}

/// Outcome of an update call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched: usize,
    pub modified: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Document {
        Document::new()
            .with("name", "Cave")
            .with("tags", vec![Value::from("dark"), Value::from("wet")])
            .with(
                "notes",
                vec![
                    Value::from(Document::new().with("effect", "a").with("clear_after_use", true)),
                    Value::from(Document::new().with("effect", "b").with("clear_after_use", false)),
                ],
            )
            .with("properties", Document::new().with("depth", 30))
    }

    #[test]
    fn test_filter_equality_and_paths() {
        let doc = node();
        assert!(Filter::all().matches(&doc));
        assert!(Filter::all().eq("name", "Cave").matches(&doc));
        assert!(!Filter::all().eq("name", "Forest").matches(&doc));
        assert!(Filter::all().eq("properties.depth", 30.0).matches(&doc));
        assert!(Filter::all().eq("name", "Cave").eq("properties.depth", 30).matches(&doc));
        assert!(!Filter::all().eq("name", "Cave").eq("properties.depth", 31).matches(&doc));
    }

    #[test]
    fn test_filter_array_semantics() {
        let doc = node();
        assert!(Filter::all().eq("tags", "wet").matches(&doc));
        assert!(Filter::all().eq("notes.effect", "b").matches(&doc));
        assert!(Filter::all().eq("notes.1.effect", "b").matches(&doc));
        assert!(!Filter::all().eq("notes.0.effect", "b").matches(&doc));
    }

    #[test]
    fn test_filter_missing_is_null() {
        let doc = node();
        assert!(Filter::all().eq("type", Value::Null).matches(&doc));
        assert!(!Filter::all().eq("name", Value::Null).matches(&doc));
    }

    #[test]
    fn test_filter_id_detection() {
        let id = ObjectId::new();
        assert_eq!(Filter::by_id(id).id(), Some(id));
        assert_eq!(Filter::by_id(id).eq("name", "x").id(), None);
        assert_eq!(Filter::all().id(), None);
    }

    #[test]
    fn test_update_set_and_modified_flag() {
        let mut doc = node();
        let changed = Update::new().set("properties.depth", 40).apply(&mut doc).unwrap();
        assert!(changed);
        let unchanged = Update::new().set("properties.depth", 40).apply(&mut doc).unwrap();
        assert!(!unchanged);
    }

    #[test]
    fn test_update_push_creates_array() {
        let mut doc = Document::new().with("name", "x");
        Update::new().push("notes", "first").apply(&mut doc).unwrap();
        Update::new().push("notes", "second").apply(&mut doc).unwrap();
        assert_eq!(
            doc.get("notes"),
            Some(&Value::Array(vec![Value::from("first"), Value::from("second")]))
        );
    }

    #[test]
    fn test_update_push_onto_scalar_fails() {
        let mut doc = node();
        assert!(Update::new().push("name", 1).apply(&mut doc).is_err());
    }

    #[test]
    fn test_update_pull_matching_documents() {
        let mut doc = node();
        let update = Update::new().pull("notes", Filter::all().eq("clear_after_use", true));
        assert!(update.apply(&mut doc).unwrap());
        let notes = doc.get("notes").and_then(Value::as_array).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].as_document().unwrap().get_str("effect"), Some("b"));
    }

    #[test]
    fn test_update_validate() {
        assert!(Update::new().validate().is_err());
        assert!(Update::new().set("_id", 1).validate().is_err());
        assert!(Update::new().set("_id.x", 1).validate().is_err());
        assert!(Update::new().set("a..b", 1).validate().is_err());
        assert!(Update::new().set("properties.health", 1).validate().is_ok());
    }
}
