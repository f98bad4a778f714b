//! CSV Formatter
//!
//! Header is the first record's keys; a key missing from a later record is
//! written as an empty cell. Lines end in CRLF on Windows, LF elsewhere.

use super::Formatter;
use crate::error::ExportError;
use crate::records::{field, header, ExportFormat, Record};
use csv::{Terminator, WriterBuilder};

/// Header plus at least one data row.
const MIN_ROWS: usize = 2;

pub struct CsvFormatter;

impl Formatter for CsvFormatter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }

    fn render(&self, records: &[Record]) -> Result<Vec<u8>, ExportError> {
        if records.len() < MIN_ROWS {
            return Err(ExportError::InsufficientRows {
                format: ExportFormat::Csv,
                required: MIN_ROWS,
                actual: records.len(),
            });
        }

        let columns = header(records);
        let mut writer = WriterBuilder::new()
            .terminator(line_terminator())
            .from_writer(Vec::new());

        writer.write_record(&columns)?;
        for record in records {
            writer.write_record(columns.iter().map(|c| field(record, c)))?;
        }

        writer
            .into_inner()
            .map_err(|e| ExportError::Io(e.into_error()))
    }
}

#[cfg(windows)]
fn line_terminator() -> Terminator {
    Terminator::CRLF
}

#[cfg(not(windows))]
fn line_terminator() -> Terminator {
    Terminator::Any(b'\n')
}
