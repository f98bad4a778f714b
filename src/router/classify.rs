//! Name classification against the instrument metadata.

use crate::records::{field, Record, RecordSet};
use std::collections::HashMap;

/// File names that export cached startup data instead of querying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedKind {
    DataDictionary,
    EventMapping,
}

impl ReservedKind {
    pub const ALL: [ReservedKind; 2] = [Self::DataDictionary, Self::EventMapping];

    pub fn name(&self) -> &'static str {
        match self {
            Self::DataDictionary => "DataDictionary",
            Self::EventMapping => "EventMapping",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// What a file name refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A whole instrument (`form_name`)
    Instrument(String),
    /// A single field (`field_name`)
    Measure(String),
    Reserved(ReservedKind),
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameKind {
    Instrument,
    Measure,
}

/// Instrument metadata plus a name index built once at startup.
///
/// When a name is both a form and a field, the first metadata row that
/// mentions it decides; within a row `form_name` is checked first.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    metadata: RecordSet,
    names: HashMap<String, NameKind>,
}

impl Catalog {
    pub fn from_metadata(metadata: RecordSet) -> Self {
        let mut names = HashMap::new();
        for row in &metadata {
            for (key, kind) in [
                ("form_name", NameKind::Instrument),
                ("field_name", NameKind::Measure),
            ] {
                let name = field(row, key);
                if !name.is_empty() {
                    names.entry(name.to_string()).or_insert(kind);
                }
            }
        }
        Self { metadata, names }
    }

    /// Every metadata row, in service order.
    pub fn metadata(&self) -> &[Record] {
        &self.metadata
    }

    pub fn classify(&self, name: &str) -> Target {
        if let Some(kind) = ReservedKind::from_name(name) {
            return Target::Reserved(kind);
        }
        match self.names.get(name) {
            Some(NameKind::Instrument) => Target::Instrument(name.to_string()),
            Some(NameKind::Measure) => Target::Measure(name.to_string()),
            None => Target::Unknown(name.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(field_name: &str, form_name: &str) -> Record {
        let mut r = Record::new();
        r.insert("field_name".to_string(), field_name.to_string());
        r.insert("form_name".to_string(), form_name.to_string());
        r
    }

    fn catalog() -> Catalog {
        Catalog::from_metadata(vec![
            row("id_redcap", "enrollment"),
            row("age", "demographics"),
            row("sex", "demographics"),
            row("enrollment", "screening"),
        ])
    }

    #[test]
    fn test_classify_instrument_and_measure() {
        let catalog = catalog();
        assert_eq!(
            catalog.classify("demographics"),
            Target::Instrument("demographics".to_string())
        );
        assert_eq!(catalog.classify("age"), Target::Measure("age".to_string()));
        assert_eq!(
            catalog.classify("nothing"),
            Target::Unknown("nothing".to_string())
        );
    }

    #[test]
    fn test_classify_is_exact() {
        let catalog = catalog();
        assert!(matches!(catalog.classify("Demographics"), Target::Unknown(_)));
        assert!(matches!(catalog.classify("demo"), Target::Unknown(_)));
    }

    #[test]
    fn test_first_row_wins() {
        // "enrollment" is a form in row 0 and a field in row 3
        let catalog = catalog();
        assert_eq!(
            catalog.classify("enrollment"),
            Target::Instrument("enrollment".to_string())
        );
    }

    #[test]
    fn test_reserved_names() {
        let catalog = Catalog::default();
        assert_eq!(
            catalog.classify("DataDictionary"),
            Target::Reserved(ReservedKind::DataDictionary)
        );
        assert_eq!(
            catalog.classify("EventMapping"),
            Target::Reserved(ReservedKind::EventMapping)
        );
        assert!(matches!(catalog.classify("datadictionary"), Target::Unknown(_)));
    }
}
