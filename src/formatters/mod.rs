//! Formatters module - Serializes record sets into export files.
//!
//! One [`Formatter`] per [`ExportFormat`]. [`export`] renders in memory and
//! then replaces the target atomically, so a rejected record set never
//! leaves a partial file behind.

pub mod csv;
pub mod json;
pub mod xlsx;

pub use self::csv::CsvFormatter;
pub use self::json::JsonFormatter;
pub use self::xlsx::XlsxFormatter;

use crate::error::ExportError;
use crate::records::{ExportFormat, ExportTarget, Record};
use crate::storage::{write_atomic, PUBLIC_MODE};
use tracing::debug;

/// Trait for all formatters
pub trait Formatter: Send + Sync {
    /// Format this formatter produces
    fn format(&self) -> ExportFormat;

    /// Render `records` into the bytes of a complete file
    fn render(&self, records: &[Record]) -> Result<Vec<u8>, ExportError>;
}

/// Formatter for `format`.
pub fn formatter_for(format: ExportFormat) -> &'static dyn Formatter {
    match format {
        ExportFormat::Json => &JsonFormatter,
        ExportFormat::Csv => &CsvFormatter,
        ExportFormat::Xlsx => &XlsxFormatter,
    }
}

/// Write `records` to `target`. Returns the number of data rows written.
pub fn export(records: &[Record], target: &ExportTarget) -> Result<usize, ExportError> {
    let bytes = formatter_for(target.format).render(records)?;
    write_atomic(&target.path, &bytes, PUBLIC_MODE)?;
    debug!(
        "Wrote {} bytes ({} rows) to {}",
        bytes.len(),
        records.len(),
        target.path.display()
    );
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn rows(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| {
                let mut r = Record::new();
                r.insert("id_redcap".to_string(), format!("P{}", i));
                r
            })
            .collect()
    }

    #[test]
    fn test_formatter_for_matches_format() {
        for format in [ExportFormat::Json, ExportFormat::Csv, ExportFormat::Xlsx] {
            assert_eq!(formatter_for(format).format(), format);
        }
    }

    #[test]
    fn test_export_writes_file() -> Result<(), ExportError> {
        let temp = TempDir::new()?;
        let target = ExportTarget::new(temp.path().join("demo.csv"), ExportFormat::Csv);

        assert_eq!(export(&rows(3), &target)?, 3);
        let text = fs::read_to_string(&target.path)?;
        assert!(text.starts_with("id_redcap"));
        Ok(())
    }

    #[test]
    fn test_rejected_export_writes_nothing() -> Result<(), ExportError> {
        let temp = TempDir::new()?;
        let target = ExportTarget::new(temp.path().join("demo.csv"), ExportFormat::Csv);

        let err = export(&rows(1), &target).unwrap_err();
        assert!(matches!(err, ExportError::InsufficientRows { .. }));
        assert!(!target.path.exists());
        assert_eq!(fs::read_dir(temp.path())?.count(), 0);
        Ok(())
    }
}
