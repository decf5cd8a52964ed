//! Import nodes from JSON, JSON Lines, CSV or TSV files
//!
//! A bad record is counted and reported in the summary; only structural
//! problems (unreadable file, unparseable outer format, missing `name`
//! column) abort the import.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::error::{GraphError, Result};
use crate::graph::{fields, Database, Node, NodeRepository};
use crate::storage::{Document, Value, ID_FIELD};

use super::tabular::{flatten, unflatten};
use super::Format;

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Overrides detection by file extension
    pub format: Option<Format>,
    /// Merge records into existing nodes of the same name instead of skipping them
    pub update_existing: bool,
}

/// A record that could not be imported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecordError {
    /// 1-based position in the input (array element, line or data row)
    pub record: usize,
    pub message: String,
}

impl fmt::Display for ImportRecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record {}: {}", self.record, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<ImportRecordError>,
}

impl ImportSummary {
    pub fn processed(&self) -> usize {
        self.added + self.updated + self.skipped + self.failed
    }
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "added {}, updated {}, skipped {}, failed {}",
            self.added, self.updated, self.skipped, self.failed
        )
    }
}

enum Outcome {
    Added,
    Updated,
    Skipped,
}

/// Errors that fail a single record rather than the whole import
fn is_record_error(e: &GraphError) -> bool {
    matches!(
        e,
        GraphError::Validation(_) | GraphError::Encoding(_) | GraphError::InvalidFormat(_) | GraphError::Json(_)
    )
}

struct Importer<'a> {
    nodes: NodeRepository<'a>,
    update_existing: bool,
    summary: ImportSummary,
}

impl<'a> Importer<'a> {
    fn fail(&mut self, record: usize, message: String) {
        tracing::warn!("Import record {} failed: {}", record, message);
        self.summary.failed += 1;
        self.summary.errors.push(ImportRecordError { record, message });
    }

    /// Account for one parsed (or unparseable) record
    fn record(&mut self, record: usize, parsed: Result<Document>) -> Result<()> {
        let outcome = parsed.and_then(|doc| self.apply(doc));
        match outcome {
            Ok(Outcome::Added) => self.summary.added += 1,
            Ok(Outcome::Updated) => self.summary.updated += 1,
            Ok(Outcome::Skipped) => self.summary.skipped += 1,
            Err(e) if is_record_error(&e) => self.fail(record, e.to_string()),
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn apply(&self, mut doc: Document) -> Result<Outcome> {
        doc.remove(ID_FIELD);
        let name = match doc.get(fields::NAME) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => return Err(GraphError::Validation("record has no 'name'".into())),
        };
        Node::from_document(doc.clone())?;

        // One name scan per record (plus the duplicate check in `add`), so
        // importing N records into a collection of M nodes costs O(N * M).
        let Some(existing) = self.nodes.get_by_name(&name)? else {
            self.nodes.add_document(doc)?;
            return Ok(Outcome::Added);
        };
        if !self.update_existing {
            tracing::debug!("Skipping existing node '{}'", name);
            return Ok(Outcome::Skipped);
        }

        let id = existing
            .id
            .ok_or_else(|| GraphError::NotFound(format!("node '{}' has no id", name)))?;
        // an empty nested document would clobber the existing one
        let updates: Document = flatten(&doc)
            .into_iter()
            .filter(|(path, value)| {
                path != fields::NAME && !matches!(value, Value::Document(d) if d.is_empty())
            })
            .collect();
        if !updates.is_empty() {
            self.nodes.update(id, updates)?;
        }
        Ok(Outcome::Updated)
    }

    fn json<R: Read>(&mut self, reader: R) -> Result<()> {
        let parsed: serde_json::Value = serde_json::from_reader(reader)
            .map_err(|e| GraphError::InvalidFormat(format!("not a JSON document: {}", e)))?;
        let serde_json::Value::Array(items) = parsed else {
            return Err(GraphError::InvalidFormat("expected a JSON array of node objects".into()));
        };
        for (i, item) in items.into_iter().enumerate() {
            self.record(i + 1, json_record(item))?;
        }
        Ok(())
    }

    fn json_lines<R: Read>(&mut self, reader: R) -> Result<()> {
        for (i, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed = serde_json::from_str(&line).map_err(GraphError::from).and_then(json_record);
            self.record(i + 1, parsed)?;
        }
        Ok(())
    }

    fn tabular<R: Read>(&mut self, reader: R, format: Format) -> Result<()> {
        let mut rows = csv::ReaderBuilder::new()
            .delimiter(format.delimiter())
            .from_reader(reader);
        let headers = rows.headers()?.clone();
        if !headers.iter().any(|h| h == fields::NAME) {
            return Err(GraphError::InvalidFormat(format!(
                "{} header has no '{}' column",
                format,
                fields::NAME
            )));
        }

        for (i, row) in rows.records().enumerate() {
            let parsed = match row {
                Ok(row) => unflatten(
                    headers
                        .iter()
                        .zip(row.iter())
                        .filter(|(header, _)| *header != ID_FIELD),
                ),
                Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => return Err(e.into()),
                Err(e) => Err(GraphError::InvalidFormat(e.to_string())),
            };
            self.record(i + 1, parsed)?;
        }
        Ok(())
    }
}

fn json_record(item: serde_json::Value) -> Result<Document> {
    match item {
        serde_json::Value::Object(map) => Ok(Document::from_json(map)),
        other => Err(GraphError::Validation(format!("record is not an object: {}", other))),
    }
}

/// Import nodes from `reader` in the given format
pub fn import_from_reader<R: Read>(
    db: &Database,
    reader: R,
    format: Format,
    options: &ImportOptions,
) -> Result<ImportSummary> {
    let mut importer = Importer {
        nodes: db.nodes(),
        update_existing: options.update_existing,
        summary: ImportSummary::default(),
    };
    match format {
        Format::Json => importer.json(reader)?,
        Format::JsonLines => importer.json_lines(reader)?,
        Format::Csv | Format::Tsv => importer.tabular(reader, format)?,
    }
    tracing::info!("Imported {} records ({}): {}", importer.summary.processed(), format, importer.summary);
    Ok(importer.summary)
}

/// Import nodes from the file at `path`
pub fn import_nodes(db: &Database, path: &Path, options: &ImportOptions) -> Result<ImportSummary> {
    let format = Format::resolve(options.format, path)?;
    let file = File::open(path)?;
    tracing::info!("Importing nodes from {:?} as {}", path, format);
    import_from_reader(db, BufReader::new(file), format, options)
}
