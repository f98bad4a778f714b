//! Application context - Everything a pipeline reads, built once at startup.

use crate::client::DataClient;
use crate::config::Config;
use crate::filter::{ContextFilter, Roster};
use crate::records::{Record, RecordSet};
use crate::router::Catalog;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

/// Startup snapshot shared by every pipeline as `Arc<AppContext>`.
///
/// Roster, metadata and event mapping are fetched once and never refreshed
/// while mounted.
pub struct AppContext {
    pub config: Config,
    pub client: DataClient,
    pub roster: Roster,
    pub catalog: Catalog,
    pub event_mapping: RecordSet,
    pub mount_root: PathBuf,
}

impl AppContext {
    /// Fetch roster, instrument metadata and event mapping concurrently.
    ///
    /// A failed fetch is logged and leaves that cache empty: the mount still
    /// comes up, classification then reports every name as unknown.
    pub async fn load(config: Config, client: DataClient, mount_root: PathBuf) -> Self {
        let (participants, instruments, event_mapping) = tokio::join!(
            client.list_participants(),
            client.list_instruments(),
            client.list_form_event_mapping(),
        );

        let participants = participants.unwrap_or_else(|e| {
            warn!("Could not load participants: {}", e);
            RecordSet::new()
        });
        let instruments = instruments.unwrap_or_else(|e| {
            warn!("Could not load instrument metadata: {}", e);
            RecordSet::new()
        });
        let event_mapping = event_mapping.unwrap_or_else(|e| {
            warn!("Could not load event mapping: {}", e);
            RecordSet::new()
        });

        info!(
            "Loaded {} participant(s), {} metadata row(s), {} event mapping(s)",
            participants.len(),
            instruments.len(),
            event_mapping.len()
        );

        Self::from_parts(config, client, participants, instruments, event_mapping, mount_root)
    }

    pub fn from_parts(
        config: Config,
        client: DataClient,
        participants: RecordSet,
        instruments: RecordSet,
        event_mapping: RecordSet,
        mount_root: PathBuf,
    ) -> Self {
        let roster = Roster::new(participants, &config.study);
        Self {
            config,
            client,
            roster,
            catalog: Catalog::from_metadata(instruments),
            event_mapping,
            mount_root,
        }
    }

    /// Cached instrument metadata.
    pub fn instruments(&self) -> &[Record] {
        self.catalog.metadata()
    }

    pub fn filter(&self) -> ContextFilter<'_> {
        ContextFilter::new(&self.roster, &self.config.study)
    }

    /// Forms mapped to `event`, in mapping order.
    pub fn forms_for_event(&self, event: &str) -> Vec<String> {
        self.event_mapping
            .iter()
            .filter(|row| row.get("unique_event_name").map(String::as_str) == Some(event))
            .filter_map(|row| row.get("form").cloned())
            .collect()
    }

    /// `path` relative to the mount root. Relative paths are returned as is.
    ///
    /// `None` for anything that would leave the root, including any `..`
    /// component.
    pub fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        let rel = if path.is_relative() {
            path
        } else {
            path.strip_prefix(&self.mount_root).ok()?
        };
        rel.components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
            .then_some(rel)
    }
}
