//! Request shapes and response normalization for the REDCap API.

use crate::error::TransportError;
use crate::records::{Record, RecordSet};
use serde_json::Value;

/// What a request exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Content {
    Record,
    Metadata,
    FormEventMapping,
}

impl Content {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Metadata => "metadata",
            Self::FormEventMapping => "formEventMapping",
        }
    }
}

/// One logical export request; [`Query::to_form`] renders it for a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub content: Content,
    pub fields: Vec<String>,
    pub forms: Vec<String>,
    pub events: Vec<String>,
}

impl Query {
    pub fn new(content: Content) -> Self {
        Self {
            content,
            fields: Vec::new(),
            forms: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn records() -> Self {
        Self::new(Content::Record)
    }

    pub fn metadata() -> Self {
        Self::new(Content::Metadata)
    }

    pub fn form_event_mapping() -> Self {
        Self::new(Content::FormEventMapping)
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    pub fn form(mut self, form: impl Into<String>) -> Self {
        self.forms.push(form.into());
        self
    }

    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.events.push(event.into());
        self
    }

    /// Form parameters for one request authenticated with `token`.
    pub fn to_form(&self, token: &str) -> Vec<(String, String)> {
        let mut params = vec![
            ("token".to_string(), token.to_string()),
            ("content".to_string(), self.content.as_str().to_string()),
            ("format".to_string(), "json".to_string()),
        ];
        let is_record = self.content == Content::Record;
        if is_record {
            params.push(("type".to_string(), "flat".to_string()));
        }

        indexed(&mut params, "fields", &self.fields);
        indexed(&mut params, "forms", &self.forms);
        indexed(&mut params, "events", &self.events);

        if is_record {
            for (key, value) in [
                ("rawOrLabel", "raw"),
                ("rawOrLabelHeaders", "raw"),
                ("exportCheckboxLabel", "false"),
                ("exportSurveyFields", "false"),
                ("exportDataAccessGroups", "true"),
            ] {
                params.push((key.to_string(), value.to_string()));
            }
        }
        params.push(("returnFormat".to_string(), "json".to_string()));
        params
    }
}

fn indexed(params: &mut Vec<(String, String)>, name: &str, values: &[String]) {
    for (i, value) in values.iter().enumerate() {
        params.push((format!("{}[{}]", name, i), value.clone()));
    }
}

/// Message of an `{"error": "..."}` body, if that is what `body` is.
pub fn remote_error(body: &str) -> Option<String> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => map.get("error").map(scalar_to_string),
        _ => None,
    }
}

/// Parse a JSON array of flat objects into records, in document order.
///
/// Non-string scalars are rendered as strings and `null` becomes `""`.
pub fn parse_rows(body: &str) -> Result<RecordSet, TransportError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| TransportError::MalformedBody(e.to_string()))?;

    let rows = match value {
        Value::Array(rows) => rows,
        Value::Object(map) => {
            if let Some(message) = map.get("error") {
                return Err(TransportError::Remote(scalar_to_string(message)));
            }
            return Err(TransportError::MalformedBody(
                "expected a JSON array, got an object".to_string(),
            ));
        }
        other => {
            return Err(TransportError::MalformedBody(format!(
                "expected a JSON array, got {}",
                kind_of(&other)
            )))
        }
    };

    rows.into_iter()
        .enumerate()
        .map(|(i, row)| match row {
            Value::Object(map) => Ok(map
                .into_iter()
                .map(|(k, v)| (k, scalar_to_string(&v)))
                .collect::<Record>()),
            other => Err(TransportError::MalformedBody(format!(
                "row {} is {}, expected an object",
                i,
                kind_of(&other)
            ))),
        })
        .collect()
}

/// Keep only `unique_event_name` and `form` of each mapping row.
pub fn project_event_mapping(rows: RecordSet) -> RecordSet {
    rows.into_iter()
        .map(|row| {
            let mut projected = Record::new();
            for key in ["unique_event_name", "form"] {
                if let Some(value) = row.get(key) {
                    projected.insert(key.to_string(), value.clone());
                }
            }
            projected
        })
        .collect()
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
