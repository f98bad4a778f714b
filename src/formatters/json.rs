//! JSON Formatter
//!
//! Indented array of objects, keys in record order.

use super::Formatter;
use crate::error::ExportError;
use crate::records::{ExportFormat, Record};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;

const INDENT: &[u8] = b"    ";

pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }

    fn render(&self, records: &[Record]) -> Result<Vec<u8>, ExportError> {
        let mut out = Vec::new();
        let mut ser =
            serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(INDENT));
        records.serialize(&mut ser)?;
        out.push(b'\n');
        Ok(out)
    }
}
