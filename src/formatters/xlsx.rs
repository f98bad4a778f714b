//! XLSX Formatter
//!
//! A single worksheet: header row, then one row per record.

use super::Formatter;
use crate::error::ExportError;
use crate::records::{field, header, ExportFormat, Record};
use rust_xlsxwriter::{Format, Workbook};

const SHEET_NAME: &str = "Data";

pub struct XlsxFormatter;

impl Formatter for XlsxFormatter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Xlsx
    }

    fn render(&self, records: &[Record]) -> Result<Vec<u8>, ExportError> {
        if records.is_empty() {
            return Err(ExportError::InsufficientRows {
                format: ExportFormat::Xlsx,
                required: 1,
                actual: 0,
            });
        }

        let columns = header(records);
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name(SHEET_NAME)?;

        let bold = Format::new().set_bold();
        for (col, name) in columns.iter().enumerate() {
            sheet.write_string_with_format(0, column_index(col)?, name, &bold)?;
        }

        for (i, record) in records.iter().enumerate() {
            let row = row_index(i + 1)?;
            for (col, name) in columns.iter().enumerate() {
                sheet.write_string(row, column_index(col)?, field(record, name))?;
            }
        }

        Ok(workbook.save_to_buffer()?)
    }
}

fn row_index(row: usize) -> Result<u32, ExportError> {
    u32::try_from(row).map_err(|_| ExportError::TooLarge {
        format: ExportFormat::Xlsx,
        reason: format!("row {} out of range", row),
    })
}

fn column_index(col: usize) -> Result<u16, ExportError> {
    u16::try_from(col).map_err(|_| ExportError::TooLarge {
        format: ExportFormat::Xlsx,
        reason: format!("column {} out of range", col),
    })
}
