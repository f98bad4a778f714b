//! Mount watcher
//!
//! Filesystem bridge built on native OS notifications: watches the mount
//! directory recursively and forwards creates, renames and new directories
//! to an [`EventRouter`].

use crate::router::{DirReady, EventKind, EventRouter};
use anyhow::{Context, Result};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Keeps the OS watch alive; dropping it stops event delivery.
pub struct MountWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl MountWatcher {
    /// Start watching `root` and forwarding events to `router`.
    ///
    /// `root` should be the router's mount root; both are compared after
    /// canonicalization.
    pub fn start(root: &Path, router: EventRouter) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("Cannot resolve mount directory {}", root.display()))?;

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for (path, kind) in translate(&event) {
                        debug!("{:?} {}", kind, path.display());
                        router.notify(path, kind);
                    }
                }
                Err(e) => warn!("Watch error: {}", e),
            },
            Config::default(),
        )
        .context("Failed to create file watcher")?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", root.display()))?;
        info!("Watching {}", root.display());

        Ok(Self {
            _watcher: watcher,
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Router events for one OS event. Directories seen here already exist, so
/// their readiness is immediate.
fn translate(event: &Event) -> Vec<(PathBuf, EventKind)> {
    match event.kind {
        notify::EventKind::Create(CreateKind::Folder) => event
            .paths
            .iter()
            .map(|p| (p.clone(), EventKind::Mkdir(DirReady::materialized())))
            .collect(),
        notify::EventKind::Create(_) => event
            .paths
            .iter()
            .map(|p| {
                let kind = if p.is_dir() {
                    EventKind::Mkdir(DirReady::materialized())
                } else {
                    EventKind::Create
                };
                (p.clone(), kind)
            })
            .collect(),
        notify::EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .iter()
            .map(|p| (p.clone(), EventKind::Rename))
            .collect(),
        // [from, to]
        notify::EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event
            .paths
            .last()
            .map(|p| vec![(p.clone(), EventKind::Rename)])
            .unwrap_or_default(),
        // Platforms that do not tell source from destination
        notify::EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => event
            .paths
            .iter()
            .filter(|p| p.is_file())
            .map(|p| (p.clone(), EventKind::Rename))
            .collect(),
        _ => Vec::new(),
    }
}
