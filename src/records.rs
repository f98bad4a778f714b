//! Records - the row shape every remote response is normalized into.
//!
//! A [`Record`] keeps its fields in the order the service returned them, so
//! the header of a CSV or spreadsheet export is the first record's key order.

use indexmap::IndexMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// One row returned by the remote service: field name -> field value.
pub type Record = IndexMap<String, String>;

/// Ordered rows sharing (ideally) the same field-name set.
pub type RecordSet = Vec<Record>;

/// Value of `key` in `record`, or the empty string when the key is absent.
pub fn field<'a>(record: &'a Record, key: &str) -> &'a str {
    record.get(key).map(String::as_str).unwrap_or("")
}

/// Column header for tabular exports: the first record's keys, in order.
///
/// Keys that only later records carry are not part of the header and are
/// therefore not exported; keys missing from a later record export as
/// empty cells.
pub fn header(records: &[Record]) -> Vec<String> {
    records
        .first()
        .map(|first| first.keys().cloned().collect())
        .unwrap_or_default()
}

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Json,
    Csv,
    Xlsx,
}

impl ExportFormat {
    /// Format for a file extension (without the dot). Matching is exact.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            "xlsx" => Some(Self::Xlsx),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Where an export is written and in which format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTarget {
    pub path: PathBuf,
    pub format: ExportFormat,
}

impl ExportTarget {
    pub fn new(path: impl Into<PathBuf>, format: ExportFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    /// Derive the target from a path whose extension names the format.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let format = ExportFormat::from_path(&path)?;
        Some(Self { path, format })
    }

    /// File name without directory and extension, e.g. `demographics`.
    pub fn variable(&self) -> Option<&str> {
        self.path.file_stem().and_then(|stem| stem.to_str())
    }

    /// Sibling target `<stem><suffix>.<ext>` in the same format.
    pub fn companion(&self, suffix: &str) -> Self {
        let stem = self.variable().unwrap_or_default();
        let name = format!("{}{}.{}", stem, suffix, self.format.extension());
        Self {
            path: self.path.with_file_name(name),
            format: self.format,
        }
    }
}
