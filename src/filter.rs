//! Context filter - Narrows records using hints in the destination path.
//!
//! A directory named like `Mar 2022` keeps rows of participants whose
//! baseline visit was in that month. A directory named after a site code
//! (the data access group prefix, any case) keeps rows of that site's
//! participants. Both compose: every matching segment narrows further.
//! Segments that match neither are ignored.

use crate::config::StudyConfig;
use crate::records::{field, Record, RecordSet};
use chrono::{Datelike, Month, NaiveDateTime};
use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path};
use tracing::debug;

/// Participant roster indexed for filtering. Built once at startup.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    participants: RecordSet,
    by_id: HashMap<String, usize>,
    sites: BTreeSet<String>,
}

impl Roster {
    pub fn new(participants: RecordSet, study: &StudyConfig) -> Self {
        let mut by_id = HashMap::new();
        let mut sites = BTreeSet::new();
        for (i, participant) in participants.iter().enumerate() {
            by_id
                .entry(field(participant, &study.id_field).to_string())
                .or_insert(i);
            if let Some(site) = site_code(participant, study) {
                sites.insert(site);
            }
        }
        Self {
            participants,
            by_id,
            sites,
        }
    }

    pub fn participants(&self) -> &[Record] {
        &self.participants
    }

    /// Upper-cased site codes seen in the roster.
    pub fn sites(&self) -> &BTreeSet<String> {
        &self.sites
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.by_id.get(id).map(|&i| &self.participants[i])
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

/// Site code of a participant: access group prefix before the delimiter.
fn site_code(participant: &Record, study: &StudyConfig) -> Option<String> {
    let group = field(participant, &study.access_group_field);
    let prefix = group
        .split(study.access_group_delimiter.as_str())
        .next()
        .unwrap_or_default();
    if prefix.is_empty() {
        None
    } else {
        Some(prefix.to_uppercase())
    }
}

/// Parse a `Mon YYYY` segment (month name, any case, abbreviated or full;
/// exactly four year digits) into (year, month).
pub fn parse_month_year(segment: &str) -> Option<(i32, u32)> {
    let mut parts = segment.split_whitespace();
    let (month, year) = (parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    if year.len() != 4 || !year.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let month = month.parse::<Month>().ok()?;
    Some((year.parse().ok()?, month.number_from_month()))
}

/// Applies path-derived filters against a roster.
pub struct ContextFilter<'a> {
    roster: &'a Roster,
    study: &'a StudyConfig,
}

impl<'a> ContextFilter<'a> {
    pub fn new(roster: &'a Roster, study: &'a StudyConfig) -> Self {
        Self { roster, study }
    }

    /// Apply every date and site hint found in `path`. Never mutates
    /// `records`; with no hints the result equals the input.
    pub fn apply(&self, records: &[Record], path: &Path) -> RecordSet {
        let filtered = self.filter_by_date(records, path);
        self.filter_by_site(&filtered, path)
    }

    /// Keep rows whose participant's baseline falls in each `Mon YYYY`
    /// segment of `path`.
    pub fn filter_by_date(&self, records: &[Record], path: &Path) -> RecordSet {
        let mut current = records.to_vec();
        for (year, month) in segments(path).filter_map(parse_month_year) {
            debug!("Filtering {} row(s) to baseline {}-{:02}", current.len(), year, month);
            current.retain(|record| {
                self.baseline_of(record)
                    .map(|ts| ts.year() == year && ts.month() == month)
                    .unwrap_or(false)
            });
        }
        current
    }

    /// Keep rows whose participant belongs to each site-code segment of
    /// `path`.
    pub fn filter_by_site(&self, records: &[Record], path: &Path) -> RecordSet {
        let mut current = records.to_vec();
        for site in segments(path)
            .map(str::to_uppercase)
            .filter(|s| self.roster.sites().contains(s))
        {
            debug!("Filtering {} row(s) to site {}", current.len(), site);
            current.retain(|record| {
                self.participant_of(record)
                    .and_then(|p| site_code(p, self.study))
                    .is_some_and(|code| code == site)
            });
        }
        current
    }

    fn participant_of(&self, record: &Record) -> Option<&'a Record> {
        self.roster.get(field(record, &self.study.id_field))
    }

    fn baseline_of(&self, record: &Record) -> Option<NaiveDateTime> {
        let participant = self.participant_of(record)?;
        let raw = field(participant, &self.study.baseline_timestamp_field);
        match NaiveDateTime::parse_from_str(raw, &self.study.baseline_timestamp_format) {
            Ok(ts) => Some(ts),
            Err(_) => {
                debug!(
                    "Cannot parse baseline date '{}' of {}",
                    raw,
                    field(participant, &self.study.id_field)
                );
                None
            }
        }
    }
}

fn segments(path: &Path) -> impl Iterator<Item = &str> {
    path.components().filter_map(|c| match c {
        Component::Normal(s) => s.to_str(),
        _ => None,
    })
}
