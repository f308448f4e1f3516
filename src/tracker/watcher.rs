//! Filesystem event sources for the dispatch loop.
//!
//! [`watch`] forwards `notify` events for one folder; [`sweep`] lists what is
//! already sitting there at startup. Both produce [`WatchEvent`]s so the
//! dispatcher treats them the same way.

use super::domain::{FileKind, WatchedFile};
use notify::event::EventKind;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Kind of filesystem change, reduced to what the dispatcher cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
    pub is_dir: bool,
}

impl WatchEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            is_dir: path.is_dir(),
            path,
            kind: WatchEventKind::Created,
        }
    }

    fn from_notify(event: notify::Event) -> impl Iterator<Item = Self> {
        let kind = match event.kind {
            EventKind::Create(_) => WatchEventKind::Created,
            _ => WatchEventKind::Other,
        };
        event.paths.into_iter().map(move |path| Self {
            is_dir: path.is_dir(),
            path,
            kind,
        })
    }
}

/// Watch `dir` (non-recursively) and forward its events to `tx`.
///
/// The watcher stops when the returned handle is dropped.
pub fn watch(dir: &Path, tx: mpsc::Sender<WatchEvent>) -> notify::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                for ev in WatchEvent::from_notify(event) {
                    // Runs on notify's own thread, outside the runtime.
                    if tx.blocking_send(ev).is_err() {
                        debug!("Watch event dropped; dispatcher has stopped");
                        return;
                    }
                }
            }
            Err(e) => warn!(error = %e, "Watch error"),
        }
    })?;

    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    info!(name: "watcher.started", dir = %dir.display(), "Watching folder for new files");
    Ok(watcher)
}

/// Files already present in `dir` that a previous run left behind.
///
/// Text files whose analysis artifact already exists in `output_dir` were
/// handled before and kept on purpose, so they are skipped.
pub fn sweep(dir: &Path, output_dir: &Path) -> Vec<WatchEvent> {
    let mut events = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry during sweep");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(file) = WatchedFile::detect(entry.path()) else {
            continue;
        };
        if file.kind == FileKind::Text && output_dir.join(file.analysis_name()).exists() {
            debug!(path = %entry.path().display(), "Already analysed; not sweeping");
            continue;
        }
        events.push(WatchEvent::created(entry.into_path()));
    }

    if !events.is_empty() {
        info!(dir = %dir.display(), count = events.len(), "Found leftover files at startup");
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sweep_lists_matching_files_only() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::create_dir_all(dir.path().join("nested.png")).unwrap();
        for name in ["b.png", "a.jpg", "notes.md", "dump.txt", "dump.txt_analysis.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let names: Vec<_> = sweep(dir.path(), &out)
            .into_iter()
            .map(|e| e.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, ["a.jpg", "b.png", "dump.txt"]);
    }

    #[test]
    fn test_sweep_skips_already_analysed_text() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(dir.path().join("dump.txt"), b"x").unwrap();
        std::fs::write(out.join("dump.txt_analysis.txt"), b"{}").unwrap();

        assert!(sweep(dir.path(), &out).is_empty());
    }

    #[test]
    fn test_notify_create_maps_to_created() {
        let event = notify::Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(PathBuf::from("/nowhere/a.png"));
        let events: Vec<_> = WatchEvent::from_notify(event).collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, WatchEventKind::Created);
        assert!(!events[0].is_dir);

        let modify = notify::Event::new(EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(PathBuf::from("/nowhere/a.png"));
        let events: Vec<_> = WatchEvent::from_notify(modify).collect();
        assert_eq!(events[0].kind, WatchEventKind::Other);
    }
}
