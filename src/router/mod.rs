//! Event router - Turns filesystem notifications into export pipelines.
//!
//! [`EventRouter::notify`] never blocks: every accepted event becomes a task
//! on a [`TaskTracker`], so the bridge thread that reports events is never
//! held up by the network. [`EventRouter::shutdown`] waits for the tasks
//! still in flight.
//!
//! - File created or renamed with a `json`, `csv` or `xlsx` extension: the
//!   stem is classified and the matching data is fetched, narrowed by the
//!   path's date/site hints and written to that file. Instruments also get a
//!   `<stem>_datadictionary.<ext>` companion.
//! - Directory created: every instrument mapped to the event named like the
//!   directory is written into it as `<form>.json`, once the bridge
//!   confirms the directory is ready.
//!
//! Each outcome is published as an [`ExportReport`]. Failures also leave a
//! `<target>.err` file next to the intended target.

pub mod classify;
pub mod ready;

pub use classify::{Catalog, ReservedKind, Target};
pub use ready::{DirAck, DirReady};

use crate::context::AppContext;
use crate::error::{ClassificationError, Error, Result, TransportError};
use crate::formatters;
use crate::records::{ExportFormat, ExportTarget, RecordSet};
use crate::storage::{write_atomic, PUBLIC_MODE};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Extension of failure sentinel files. Never an export format.
pub const SENTINEL_EXTENSION: &str = "err";

/// Stem suffix of an instrument's companion data dictionary.
pub const DATA_DICTIONARY_SUFFIX: &str = "_datadictionary";

/// How long a registered write may wait for its rename event.
const SELF_WRITE_WINDOW: Duration = Duration::from_secs(5);

/// Filesystem notification kinds the router distinguishes.
#[derive(Debug)]
pub enum EventKind {
    Create,
    Rename,
    /// New directory; the bridge acknowledges it through the [`DirReady`]
    Mkdir(DirReady),
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportStatus {
    Written { rows: usize },
    Failed { error: String },
}

/// Outcome of one export target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub target: PathBuf,
    pub status: ExportStatus,
}

impl ExportReport {
    pub fn is_success(&self) -> bool {
        matches!(self.status, ExportStatus::Written { .. })
    }
}

/// Content of a `<target>.err` file.
#[derive(Serialize)]
struct Sentinel<'a> {
    target: String,
    error: &'a str,
    timestamp: String,
}

/// `<target>.err`
pub fn sentinel_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".");
    name.push(SENTINEL_EXTENSION);
    PathBuf::from(name)
}

/// Pending router writes per path. Every write lands on its target by
/// rename, so each registration absorbs exactly one rename event.
#[derive(Default)]
struct SelfWrites {
    pending: Mutex<HashMap<PathBuf, (Instant, usize)>>,
}

impl SelfWrites {
    fn register(&self, path: &Path) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        pending.retain(|_, (at, _)| now.duration_since(*at) < SELF_WRITE_WINDOW);
        let entry = pending.entry(path.to_path_buf()).or_insert((now, 0));
        *entry = (now, entry.1 + 1);
    }

    /// Take one pending registration for `path`, if any is still live.
    fn consume(&self, path: &Path) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let Some((at, count)) = pending.get_mut(path) else {
            return false;
        };
        if at.elapsed() >= SELF_WRITE_WINDOW {
            pending.remove(path);
            return false;
        }
        *count -= 1;
        if *count == 0 {
            pending.remove(path);
        }
        true
    }
}

struct Inner {
    ctx: Arc<AppContext>,
    tracker: TaskTracker,
    runtime: Handle,
    status: mpsc::UnboundedSender<ExportReport>,
    self_writes: SelfWrites,
}

/// Cheap to clone; clones share tasks, status channel and write registry.
#[derive(Clone)]
pub struct EventRouter {
    inner: Arc<Inner>,
}

impl EventRouter {
    /// Create a router and the receiving end of its status channel.
    ///
    /// Pipelines run on the runtime current at this call; fails outside one.
    pub fn new(ctx: Arc<AppContext>) -> Result<(Self, mpsc::UnboundedReceiver<ExportReport>)> {
        let runtime = Handle::try_current()?;
        let (status, rx) = mpsc::unbounded_channel();
        let router = Self {
            inner: Arc::new(Inner {
                ctx,
                tracker: TaskTracker::new(),
                runtime,
                status,
                self_writes: SelfWrites::default(),
            }),
        };
        Ok((router, rx))
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.inner.ctx
    }

    /// Number of pipelines still running.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Accept one filesystem notification. Returns immediately; safe to call
    /// from threads outside the runtime.
    ///
    /// `path` is absolute under the mount root or relative to it.
    pub fn notify(&self, path: impl AsRef<Path>, kind: EventKind) {
        let path = path.as_ref();
        let ctx = &self.inner.ctx;
        let Some(rel) = ctx.relative(path) else {
            debug!("Ignoring event outside the mount: {}", path.display());
            return;
        };
        let rel = rel.to_path_buf();
        let full = ctx.mount_root.join(&rel);

        if matches!(kind, EventKind::Rename) && self.inner.self_writes.consume(&full) {
            debug!("Ignoring rename of own write {}", full.display());
            return;
        }

        match kind {
            EventKind::Create | EventKind::Rename => {
                let Some(target) = ExportTarget::from_path(&full) else {
                    debug!("Not an export target: {}", rel.display());
                    return;
                };
                let router = self.clone();
                self.spawn(async move { router.file_pipeline(rel, target).await });
            }
            EventKind::Mkdir(ready) => {
                let router = self.clone();
                self.spawn(async move { router.dir_pipeline(rel, full, ready).await });
            }
            EventKind::Other => {}
        }
    }

    /// Wait for every pipeline in flight, including ones spawned meanwhile.
    pub async fn shutdown(&self) {
        self.inner.tracker.close();
        let pending = self.inner.tracker.len();
        if pending > 0 {
            info!("Waiting for {} export(s) to finish", pending);
        }
        self.inner.tracker.wait().await;
    }

    /// Write `DataDictionary.json` and `EventMapping.json` under the mount root.
    pub async fn write_startup_files(&self) {
        for kind in ReservedKind::ALL {
            let target = ExportTarget::new(
                self.inner
                    .ctx
                    .mount_root
                    .join(format!("{}.{}", kind.name(), ExportFormat::Json)),
                ExportFormat::Json,
            );
            let outcome = self.write(self.reserved_records(kind), &target).await;
            self.publish(&target, outcome);
        }
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.tracker.spawn_on(task, &self.inner.runtime);
    }

    async fn file_pipeline(&self, rel: PathBuf, target: ExportTarget) {
        debug!("Export requested: {}", rel.display());
        let ctx = &self.inner.ctx;
        let variable = target.variable().unwrap_or_default().to_string();

        let outcome = match ctx.catalog.classify(&variable) {
            Target::Reserved(kind) => self.write(self.reserved_records(kind), &target).await,
            Target::Instrument(name) => {
                let fetched = ctx.client.get_instrument(&name).await;
                let outcome = self.export_filtered(fetched, &rel, &target).await;
                self.export_data_dictionary(&name, &target).await;
                outcome
            }
            Target::Measure(name) => {
                let fetched = ctx.client.get_measure(&name).await;
                self.export_filtered(fetched, &rel, &target).await
            }
            Target::Unknown(name) => Err(ClassificationError::Unknown(name).into()),
        };
        self.publish(&target, outcome);
    }

    async fn dir_pipeline(&self, rel: PathBuf, full: PathBuf, ready: DirReady) {
        let Some(event) = rel.file_name().and_then(|name| name.to_str()) else {
            return;
        };
        let forms = self.inner.ctx.forms_for_event(event);
        if forms.is_empty() {
            debug!("No instruments mapped to event '{}'", event);
            return;
        }

        let targets: Vec<(String, ExportTarget)> = forms
            .into_iter()
            .map(|form| {
                let path = full.join(format!("{}.{}", form, ExportFormat::Json));
                (form, ExportTarget::new(path, ExportFormat::Json))
            })
            .collect();

        let timeout = self.inner.ctx.config.router.dir_ready_timeout();
        if !ready.wait(timeout).await {
            for (_, target) in &targets {
                self.publish(target, Err(Error::DirNotReady(full.display().to_string())));
            }
            return;
        }

        debug!("Exporting {} instrument(s) into {}", targets.len(), rel.display());
        for (form, target) in targets {
            let router = self.clone();
            let rel = rel.clone();
            self.spawn(async move {
                let fetched = router.inner.ctx.client.get_instrument(&form).await;
                let outcome = router.export_filtered(fetched, &rel, &target).await;
                router.publish(&target, outcome);
            });
        }
    }

    /// Narrow fetched rows by the hints in `rel` and write them.
    async fn export_filtered(
        &self,
        fetched: std::result::Result<RecordSet, TransportError>,
        rel: &Path,
        target: &ExportTarget,
    ) -> Result<usize> {
        let records = fetched?;
        let filtered = self.inner.ctx.filter().apply(&records, rel);
        debug!(
            "{} of {} row(s) kept for {}",
            filtered.len(),
            records.len(),
            rel.display()
        );
        self.write(filtered, target).await
    }

    async fn export_data_dictionary(&self, instrument: &str, target: &ExportTarget) {
        let companion = target.companion(DATA_DICTIONARY_SUFFIX);
        let outcome = match self.inner.ctx.client.get_data_dictionary(&[instrument]).await {
            Ok(rows) => self.write(rows, &companion).await,
            Err(e) => Err(e.into()),
        };
        self.publish(&companion, outcome);
    }

    fn reserved_records(&self, kind: ReservedKind) -> RecordSet {
        match kind {
            ReservedKind::DataDictionary => self.inner.ctx.instruments().to_vec(),
            ReservedKind::EventMapping => self.inner.ctx.event_mapping.clone(),
        }
    }

    async fn write(&self, records: RecordSet, target: &ExportTarget) -> Result<usize> {
        self.inner.self_writes.register(&target.path);
        let owned = target.clone();
        let rows = tokio::task::spawn_blocking(move || formatters::export(&records, &owned))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;
        Ok(rows)
    }

    fn publish(&self, target: &ExportTarget, outcome: Result<usize>) {
        let status = match outcome {
            Ok(rows) => {
                info!("Wrote {} row(s) to {}", rows, target.path.display());
                self.clear_sentinel(&target.path);
                ExportStatus::Written { rows }
            }
            Err(e) => {
                warn!("Export to {} failed: {}", target.path.display(), e);
                let error = e.to_string();
                self.write_sentinel(&target.path, &error);
                ExportStatus::Failed { error }
            }
        };
        let _ = self.inner.status.send(ExportReport {
            target: target.path.clone(),
            status,
        });
    }

    fn write_sentinel(&self, target: &Path, error: &str) {
        if !self.inner.ctx.config.router.sentinel_files {
            return;
        }
        if target.parent().is_some_and(|dir| !dir.is_dir()) {
            debug!("No directory for sentinel of {}", target.display());
            return;
        }

        let path = sentinel_path(target);
        let sentinel = Sentinel {
            target: target.display().to_string(),
            error,
            timestamp: Utc::now().to_rfc3339(),
        };
        let written = serde_json::to_vec_pretty(&sentinel)
            .map_err(std::io::Error::from)
            .and_then(|bytes| {
                self.inner.self_writes.register(&path);
                write_atomic(&path, &bytes, PUBLIC_MODE)
            });
        if let Err(e) = written {
            warn!("Could not write {}: {}", path.display(), e);
        }
    }

    fn clear_sentinel(&self, target: &Path) {
        let path = sentinel_path(target);
        match fs::remove_file(&path) {
            Ok(()) => debug!("Removed stale {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_path() {
        assert_eq!(
            sentinel_path(Path::new("/mnt/UCSD/demographics.csv")),
            PathBuf::from("/mnt/UCSD/demographics.csv.err")
        );
        assert_eq!(ExportFormat::from_path(&sentinel_path(Path::new("a.json"))), None);
    }

    #[test]
    fn test_self_writes_consumed_once_per_write() {
        let writes = SelfWrites::default();
        let path = Path::new("/mnt/demographics.json");
        assert!(!writes.consume(path));

        writes.register(path);
        writes.register(path);
        assert!(!writes.consume(Path::new("/mnt/other.json")));
        assert!(writes.consume(path));
        assert!(writes.consume(path));
        assert!(!writes.consume(path));
    }

    #[test]
    fn test_new_requires_runtime() {
        use crate::client::{DataClient, Transport};
        use crate::config::{Config, StudyConfig};
        use crate::vault::Credentials;
        use async_trait::async_trait;

        struct Offline;

        #[async_trait]
        impl Transport for Offline {
            async fn post_form(
                &self,
                _url: &str,
                _form: &[(String, String)],
            ) -> std::result::Result<String, TransportError> {
                Err(TransportError::Status {
                    status: 503,
                    body: "down".to_string(),
                })
            }
        }

        let credentials = Credentials {
            base_url: "https://redcap.test/api/".to_string(),
            access_tokens: vec!["A".to_string()],
        };
        let client = DataClient::new(
            Arc::new(Offline),
            credentials,
            StudyConfig::default(),
        );
        let ctx = AppContext::from_parts(
            Config::default(),
            client,
            RecordSet::new(),
            RecordSet::new(),
            RecordSet::new(),
            PathBuf::from("/mnt"),
        );
        assert!(matches!(EventRouter::new(Arc::new(ctx)), Err(Error::NoRuntime(_))));
    }

    #[test]
    fn test_report_success() {
        let ok = ExportReport {
            target: PathBuf::from("a.json"),
            status: ExportStatus::Written { rows: 0 },
        };
        let failed = ExportReport {
            target: PathBuf::from("a.json"),
            status: ExportStatus::Failed {
                error: "x".to_string(),
            },
        };
        assert!(ok.is_success());
        assert!(!failed.is_success());
    }
}
