//! Bulk import/export between the node collection and flat files
//!
//! Hierarchical formats carry node documents as they are; tabular formats
//! flatten `properties` into dotted-path columns (see [`tabular`]).

pub mod export;
pub mod import;
pub mod tabular;

pub use export::{export_nodes, export_to_writer, ExportOptions};
pub use import::{import_from_reader, import_nodes, ImportOptions, ImportRecordError, ImportSummary};

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{GraphError, Result};

/// File layout of an import or export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// A single JSON array of objects
    Json,
    /// One JSON object per line
    JsonLines,
    /// Comma-separated rows with a header row
    Csv,
    /// Tab-separated rows with a header row
    Tsv,
}

impl Format {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| GraphError::InvalidFormat(format!("no file extension on {:?}", path)))?;
        ext.parse()
    }

    /// Explicit choice wins; otherwise go by extension
    pub fn resolve(explicit: Option<Format>, path: &Path) -> Result<Self> {
        match explicit {
            Some(format) => Ok(format),
            None => Self::from_path(path),
        }
    }

    pub fn is_tabular(self) -> bool {
        matches!(self, Format::Csv | Format::Tsv)
    }

    pub(crate) fn delimiter(self) -> u8 {
        match self {
            Format::Tsv => b'\t',
            _ => b',',
        }
    }
}

impl FromStr for Format {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "jsonl" | "ndjson" => Ok(Format::JsonLines),
            "csv" => Ok(Format::Csv),
            "tsv" => Ok(Format::Tsv),
            other => Err(GraphError::InvalidFormat(format!(
                "unsupported format '{}' (expected json, jsonl, csv or tsv)",
                other
            ))),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::Json => "json",
            Format::JsonLines => "jsonl",
            Format::Csv => "csv",
            Format::Tsv => "tsv",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(Format::from_path(Path::new("nodes.json")).unwrap(), Format::Json);
        assert_eq!(Format::from_path(Path::new("nodes.NDJSON")).unwrap(), Format::JsonLines);
        assert_eq!(Format::from_path(Path::new("dir/nodes.csv")).unwrap(), Format::Csv);
        assert_eq!(Format::from_path(Path::new("nodes.tsv")).unwrap(), Format::Tsv);
        assert!(matches!(Format::from_path(Path::new("nodes.xml")), Err(GraphError::InvalidFormat(_))));
        assert!(matches!(Format::from_path(Path::new("nodes")), Err(GraphError::InvalidFormat(_))));
    }

    #[test]
    fn test_explicit_format_wins() {
        let format = Format::resolve(Some(Format::Csv), Path::new("nodes.txt")).unwrap();
        assert_eq!(format, Format::Csv);
        assert!(format.is_tabular());
        assert_eq!(format.to_string().parse::<Format>().unwrap(), Format::Csv);
    }
}
