//! Self-contained document value type
//!
//! `Value` is the recursive tagged union every document field is made of.
//! `Document` is an insertion-ordered string-keyed mapping of values.
//!
//! # Tagged text
//!
//! The serde impls here are the only on-disk and snapshot representation, so
//! they carry ids through text formats without losing their type:
//!
//! - `Value::Id(id)` serializes as the string `"$oid:<24 hex>"`
//! - a `Value::String` starting with `$` gets one extra `$` prepended
//!
//! On the way back `$$...` loses one `$`, `$oid:...` becomes an id again and any
//! other `$`-prefixed string is rejected. Literal text that happens to look like
//! an id therefore never turns into one.
//!
//! Import/export and CLI output use the untagged [`Value::to_json`] /
//! [`Value::from_json`] conversions instead, where ids are bare hex strings.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{GraphError, Result};
use crate::storage::id_gen::{ObjectId, ID_TAG};

/// A single document field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Document(Document),
    Id(ObjectId),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Document(_) => "document",
            Value::Id(_) => "id",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<ObjectId> {
        match self {
            Value::Id(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Equality used by query predicates: ints and floats compare numerically,
    /// containers compare element-wise with the same rule.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                match (self, other) {
                    (Value::Int(a), Value::Int(b)) => a == b,
                    _ => self.as_f64() == other.as_f64(),
                }
            }
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Document(a), Value::Document(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|((ka, va), (kb, vb))| ka == kb && va.loose_eq(vb))
            }
            _ => self == other,
        }
    }

    fn sort_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int(_) | Value::Float(_) => 1,
            Value::String(_) => 2,
            Value::Document(_) => 3,
            Value::Array(_) => 4,
            Value::Id(_) => 5,
            Value::Bool(_) => 6,
        }
    }

    /// Total order across all value types, used for sorted scans.
    ///
    /// null < numbers < strings < documents < arrays < ids < booleans
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        let rank = self.sort_rank().cmp(&other.sort_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Int(_) | Value::Float(_), _) => {
                let a = self.as_f64().unwrap_or(0.0);
                let b = other.as_f64().unwrap_or(0.0);
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Document(a), Value::Document(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = ka.cmp(kb).then_with(|| va.sort_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b) {
                    let ord = x.sort_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Id(a), Value::Id(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }

    /// Untagged conversion from plain JSON (import files, CLI input)
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Document(Document::from_json(map)),
        }
    }

    /// Untagged conversion to plain JSON; ids become bare hex strings
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Document(d) => serde_json::Value::Object(d.to_json()),
            Value::Id(id) => serde_json::Value::String(id.to_hex()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::Id(id)
    }
}

impl From<Document> for Value {
    fn from(d: Document) -> Self {
        Value::Document(d)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

// ============================================================================
// Document
// ============================================================================

/// Insertion-ordered mapping of field name to value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    entries: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_id(&self, key: &str) -> Option<ObjectId> {
        self.get(key).and_then(Value::as_id)
    }

    /// Insert or replace; a replaced key keeps its position
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.position(&key) {
            Some(idx) => Some(std::mem::replace(&mut self.entries[idx].1, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.position(key).map(|idx| self.entries.remove(idx).1)
    }

    pub fn get_or_insert_with(&mut self, key: &str, f: impl FnOnce() -> Value) -> &mut Value {
        let idx = match self.position(key) {
            Some(idx) => idx,
            None => {
                self.entries.push((key.to_string(), f()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx].1
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.iter().map(|(k, _)| k)
    }

    /// Follow a dotted path through documents and (numeric segment) arrays
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.get(first)?;
        for segment in segments {
            current = match current {
                Value::Document(d) => d.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Set the value at a dotted path without touching sibling fields.
    ///
    /// Missing intermediate documents are created. Numeric segments index into
    /// arrays, padding with nulls when past the end. Traversing a scalar is a
    /// validation error.
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<()> {
        let segments = split_path(path)?;
        set_in_document(self, &segments, value, path)
    }

    /// Remove the value at a dotted path. Array elements are nulled rather
    /// than removed so sibling indexes stay stable. Returns whether anything
    /// was there.
    pub fn unset_path(&mut self, path: &str) -> Result<bool> {
        let segments = split_path(path)?;
        Ok(unset_in_document(self, &segments))
    }

    pub fn from_json(map: serde_json::Map<String, serde_json::Value>) -> Document {
        map.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect()
    }

    pub fn to_json(&self) -> serde_json::Map<String, serde_json::Value> {
        self.entries.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", serde_json::Value::Object(self.to_json()))
    }
}

// ============================================================================
// Dotted paths
// ============================================================================

/// Setting an array element may pad with nulls by at most this many slots
pub const MAX_ARRAY_PADDING: usize = 1_000;

pub(crate) fn split_path(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() {
        return Err(GraphError::Validation("empty field path".into()));
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(GraphError::Validation(format!("malformed field path '{}'", path)));
    }
    Ok(segments)
}

fn set_in_document(doc: &mut Document, segments: &[&str], value: Value, full: &str) -> Result<()> {
    match segments {
        [] => Err(GraphError::Validation(format!("malformed field path '{}'", full))),
        [last] => {
            doc.insert(*last, value);
            Ok(())
        }
        [head, rest @ ..] => {
            let child = doc.get_or_insert_with(head, || Value::Document(Document::new()));
            set_in_value(child, rest, value, full)
        }
    }
}

fn set_in_value(target: &mut Value, segments: &[&str], value: Value, full: &str) -> Result<()> {
    match target {
        Value::Document(d) => set_in_document(d, segments, value, full),
        Value::Array(items) => {
            let (head, rest) = match segments.split_first() {
                Some(split) => split,
                None => return Err(GraphError::Validation(format!("malformed field path '{}'", full))),
            };
            let idx: usize = head.parse().map_err(|_| {
                GraphError::Validation(format!(
                    "cannot use non-numeric segment '{}' to index an array in '{}'",
                    head, full
                ))
            })?;
            if idx > items.len() + MAX_ARRAY_PADDING {
                return Err(GraphError::Validation(format!(
                    "array index {} in '{}' is more than {} past the end ({} items)",
                    idx,
                    full,
                    MAX_ARRAY_PADDING,
                    items.len()
                )));
            }
            if items.len() <= idx {
                items.resize(idx + 1, Value::Null);
            }
            if rest.is_empty() {
                items[idx] = value;
                return Ok(());
            }
            if items[idx].is_null() {
                items[idx] = Value::Document(Document::new());
            }
            set_in_value(&mut items[idx], rest, value, full)
        }
        other => Err(GraphError::Validation(format!(
            "cannot create field '{}' inside a {} value in '{}'",
            segments.first().copied().unwrap_or_default(),
            other.type_name(),
            full
        ))),
    }
}

fn unset_in_document(doc: &mut Document, segments: &[&str]) -> bool {
    match segments {
        [] => false,
        [last] => doc.remove(last).is_some(),
        [head, rest @ ..] => match doc.get_mut(head) {
            Some(child) => unset_in_value(child, rest),
            None => false,
        },
    }
}

fn unset_in_value(target: &mut Value, segments: &[&str]) -> bool {
    match target {
        Value::Document(d) => unset_in_document(d, segments),
        Value::Array(items) => {
            let Some((head, rest)) = segments.split_first() else {
                return false;
            };
            let Ok(idx) = head.parse::<usize>() else {
                return false;
            };
            match items.get_mut(idx) {
                Some(item) if rest.is_empty() => {
                    *item = Value::Null;
                    true
                }
                Some(item) => unset_in_value(item, rest),
                None => false,
            }
        }
        _ => false,
    }
}

// ============================================================================
// Tagged serde
// ============================================================================

fn escape_text(s: &str) -> Cow<'_, str> {
    if s.starts_with('$') {
        Cow::Owned(format!("${}", s))
    } else {
        Cow::Borrowed(s)
    }
}

/// Decode one tagged string back into a value
pub fn decode_tagged(s: &str) -> Result<Value> {
    if s.starts_with("$$") {
        return Ok(Value::String(s[1..].to_string()));
    }
    if let Some(hex) = s.strip_prefix(ID_TAG) {
        return Ok(Value::Id(hex.parse()?));
    }
    if s.starts_with('$') {
        return Err(GraphError::Encoding(format!("unknown tag in string '{}'", s)));
    }
    Ok(Value::String(s.to_string()))
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(&escape_text(s)),
            Value::Id(id) => serializer.serialize_str(&id.to_tagged()),
            Value::Array(items) => items.serialize(serializer),
            Value::Document(d) => d.serialize(serializer),
        }
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a document value")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Value, D::Error> {
        Value::deserialize(d)
    }

    fn visit_bool<E: de::Error>(self, b: bool) -> std::result::Result<Value, E> {
        Ok(Value::Bool(b))
    }

    fn visit_i64<E: de::Error>(self, i: i64) -> std::result::Result<Value, E> {
        Ok(Value::Int(i))
    }

    fn visit_u64<E: de::Error>(self, u: u64) -> std::result::Result<Value, E> {
        Ok(match i64::try_from(u) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Float(u as f64),
        })
    }

    fn visit_f64<E: de::Error>(self, f: f64) -> std::result::Result<Value, E> {
        Ok(Value::Float(f))
    }

    fn visit_str<E: de::Error>(self, s: &str) -> std::result::Result<Value, E> {
        decode_tagged(s).map_err(E::custom)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element::<Value>()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, map: A) -> std::result::Result<Value, A::Error> {
        DocumentVisitor.visit_map(map).map(Value::Document)
    }
}

struct DocumentVisitor;

impl<'de> Visitor<'de> for DocumentVisitor {
    type Value = Document;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a document")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Document, A::Error> {
        let mut doc = Document::new();
        while let Some((k, v)) = map.next_entry::<String, Value>()? {
            doc.insert(k, v);
        }
        Ok(doc)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Value, D::Error> {
        d.deserialize_any(ValueVisitor)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Document, D::Error> {
        d.deserialize_map(DocumentVisitor)
    }
}
