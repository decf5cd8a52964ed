//! Export nodes to JSON, JSON Lines, CSV or TSV

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::graph::{fields, Database};
use crate::storage::{Document, Filter, FindOptions, SortDirection, ID_FIELD};

use super::tabular::{flatten, render_cell};
use super::Format;

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Passed through to the store untouched
    pub filter: Filter,
    /// Dotted paths to export; all fields when absent
    pub fields: Option<Vec<String>>,
    /// Overrides detection by file extension
    pub format: Option<Format>,
    /// Write the store-generated `_id` of each node
    pub include_id: bool,
}

/// Keep only the requested paths, in the requested order
fn project(doc: &Document, paths: &[String]) -> Result<Document> {
    let mut out = Document::new();
    for path in paths {
        if let Some(value) = doc.get_path(path) {
            out.set_path(path, value.clone())?;
        }
    }
    Ok(out)
}

fn prepare(doc: &Document, options: &ExportOptions) -> Result<Document> {
    let mut selected = match &options.fields {
        Some(paths) => project(doc, paths)?,
        None => doc.clone(),
    };
    selected.remove(ID_FIELD);
    if !options.include_id {
        return Ok(selected);
    }
    let mut out = Document::new();
    if let Some(id) = doc.get(ID_FIELD) {
        out.insert(ID_FIELD, id.clone());
    }
    for (k, v) in selected {
        out.insert(k, v);
    }
    Ok(out)
}

/// Header row: `_id`, then name and type, then every other path in the
/// order it first appears
fn columns(docs: &[Document], options: &ExportOptions) -> Vec<String> {
    let mut columns = Vec::new();
    if options.include_id {
        columns.push(ID_FIELD.to_string());
    }
    if let Some(paths) = &options.fields {
        columns.extend(paths.iter().filter(|p| p.as_str() != ID_FIELD).cloned());
        return columns;
    }

    columns.extend([fields::NAME.to_string(), fields::TYPE.to_string()]);
    let mut seen: HashSet<String> = columns.iter().cloned().collect();
    for doc in docs {
        for (path, _) in flatten(doc) {
            if seen.insert(path.clone()) {
                columns.push(path);
            }
        }
    }
    columns
}

fn write_tabular<W: Write>(writer: W, docs: &[Document], format: Format, options: &ExportOptions) -> Result<()> {
    let columns = columns(docs, options);
    // explicit fields may name a whole subdocument; the derived union holds leaves only
    let explicit = options.fields.is_some();
    let mut out = csv::WriterBuilder::new().delimiter(format.delimiter()).from_writer(writer);
    out.write_record(&columns)?;
    for doc in docs {
        let flat: Document = flatten(doc).into_iter().collect();
        let row = columns.iter().map(|column| match flat.get(column).or_else(|| doc.get_path(column).filter(|_| explicit)) {
            None => String::new(),
            Some(value) if column == fields::NAME || column == fields::TYPE => {
                value.as_str().map(str::to_string).unwrap_or_else(|| render_cell(value))
            }
            Some(value) => render_cell(value),
        });
        out.write_record(row)?;
    }
    out.flush()?;
    Ok(())
}

/// Write the selected nodes to `writer`. Returns the number of records written.
pub fn export_to_writer<W: Write>(db: &Database, mut writer: W, format: Format, options: &ExportOptions) -> Result<usize> {
    let docs = db
        .nodes()
        .find(&options.filter, &FindOptions::new().sort(ID_FIELD, SortDirection::Ascending))?
        .iter()
        .map(|node| prepare(&node.to_document(), options))
        .collect::<Result<Vec<_>>>()?;

    match format {
        Format::Json => {
            let array: Vec<serde_json::Value> =
                docs.iter().map(|d| serde_json::Value::Object(d.to_json())).collect();
            serde_json::to_writer_pretty(&mut writer, &array)?;
            writeln!(writer)?;
        }
        Format::JsonLines => {
            for doc in &docs {
                serde_json::to_writer(&mut writer, &doc.to_json())?;
                writeln!(writer)?;
            }
        }
        Format::Csv | Format::Tsv => write_tabular(&mut writer, &docs, format, options)?,
    }
    writer.flush()?;
    Ok(docs.len())
}

/// Export the selected nodes to the file at `path`
pub fn export_nodes(db: &Database, path: &Path, options: &ExportOptions) -> Result<usize> {
    let format = Format::resolve(options.format, path)?;
    let file = File::create(path)?;
    let written = export_to_writer(db, BufWriter::new(file), format, options)?;
    tracing::info!("Exported {} nodes to {:?} as {}", written, path, format);
    Ok(written)
}
