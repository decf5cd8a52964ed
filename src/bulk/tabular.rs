//! Flat row <-> nested document mapping for CSV/TSV

use crate::error::Result;
use crate::storage::{Document, Value};

/// Columns whose cells are always plain text
pub(crate) const TEXT_COLUMNS: [&str; 2] = ["name", "type"];

/// Flatten nested documents into `(dotted path, leaf)` pairs.
///
/// Arrays are leaves. An empty nested document is kept as a leaf so it
/// survives the round trip.
pub fn flatten(doc: &Document) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    flatten_into(doc, "", &mut out);
    out
}

fn flatten_into(doc: &Document, prefix: &str, out: &mut Vec<(String, Value)>) {
    for (key, value) in doc.iter() {
        let path = if prefix.is_empty() { key.clone() } else { format!("{}.{}", prefix, key) };
        match value {
            Value::Document(inner) if !inner.is_empty() => flatten_into(inner, &path, out),
            leaf => out.push((path, leaf.clone())),
        }
    }
}

/// Rebuild a document from `(header, cell)` pairs. Empty cells are absent
/// fields; dotted headers become nested paths.
pub fn unflatten<'a>(cells: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Document> {
    let mut doc = Document::new();
    for (header, cell) in cells {
        if cell.is_empty() {
            continue;
        }
        let value = if TEXT_COLUMNS.contains(&header) {
            Value::String(cell.to_string())
        } else {
            parse_cell(cell)
        };
        doc.set_path(header, value)?;
    }
    Ok(doc)
}

/// A cell holding valid JSON is that JSON; anything else is text
pub fn parse_cell(cell: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(cell) {
        Ok(json) => Value::from_json(json),
        Err(_) => Value::String(cell.to_string()),
    }
}

/// Inverse of [`parse_cell`]: text that would read back as something else is
/// written JSON-quoted.
pub fn render_cell(value: &Value) -> String {
    match value {
        Value::String(s) => {
            if s.is_empty() || serde_json::from_str::<serde_json::Value>(s).is_ok() {
                serde_json::Value::String(s.clone()).to_string()
            } else {
                s.clone()
            }
        }
        Value::Id(id) => id.to_hex(),
        other => other.to_json().to_string(),
    }
}
