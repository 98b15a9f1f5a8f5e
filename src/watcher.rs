//! Tracks `event*` nodes appearing in and disappearing from the input
//! directory.

use anyhow::{Context, Result};
use log::debug;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirChange {
    Added(PathBuf),
    Removed(PathBuf),
}

pub fn is_event_node(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("event"))
}

/// Maps one notify event to device node changes.
pub fn changes_from(event: &Event) -> Vec<DirChange> {
    let added = match event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => true,
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => false,
        _ => return Vec::new(),
    };
    event
        .paths
        .iter()
        .filter(|p| is_event_node(p))
        .map(|p| {
            if added {
                DirChange::Added(p.clone())
            } else {
                DirChange::Removed(p.clone())
            }
        })
        .collect()
}

/// Lists the event nodes currently present, sorted by name.
pub fn scan(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut nodes: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("can't read {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| is_event_node(p))
        .collect();
    nodes.sort();
    Ok(nodes)
}

pub struct DeviceDirWatcher {
    dir: PathBuf,
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<DirChange>,
}

impl DeviceDirWatcher {
    pub fn new(dir: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                for change in changes_from(&event) {
                    let _ = tx.send(change);
                }
            }
        })
        .context("can't create directory watcher")?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("can't watch {}", dir.display()))?;
        debug!("watching {}", dir.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            _watcher: watcher,
            rx,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Changes seen since the last call, without blocking.
    pub fn drain(&self) -> Vec<DirChange> {
        self.rx.try_iter().collect()
    }
}
