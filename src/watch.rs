//! File watching behind a trait so the supervisor can be driven by a fake
//! in tests.
//!
//! The watcher only reports that something *may* have happened; the
//! supervisor re-stats the file on each event to classify the real
//! transition.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Mutex;

use anyhow::Result;
use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};

/// Coalesced notification from the platform watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    Unchanged,
    PossiblyChanged,
}

/// Watch service: one subscription per path, events delivered through a
/// plain channel that the host drains on its control thread.
pub trait FileWatch: Send + Sync {
    fn watch(&self, path: &Path) -> Result<Receiver<WatchEvent>>;
    fn unwatch(&self, path: &Path);
}

/// Production watcher backed by the platform notification API.
#[derive(Default)]
pub struct NotifyFileWatcher {
    active: Mutex<HashMap<PathBuf, RecommendedWatcher>>,
}

impl NotifyFileWatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileWatch for NotifyFileWatcher {
    fn watch(&self, path: &Path) -> Result<Receiver<WatchEvent>> {
        let (tx, rx) = channel();

        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        if matches!(
                            event.kind,
                            notify::EventKind::Modify(_)
                                | notify::EventKind::Create(_)
                                | notify::EventKind::Remove(_)
                        ) {
                            let _ = tx.send(WatchEvent::PossiblyChanged);
                        }
                    }
                    Err(err) => {
                        tracing::warn!("file watcher error: {err}");
                    }
                }
            })?;
        watcher.watch(path, RecursiveMode::NonRecursive)?;

        self.active
            .lock()
            .expect("watcher table poisoned")
            .insert(path.to_path_buf(), watcher);
        Ok(rx)
    }

    fn unwatch(&self, path: &Path) {
        self.active
            .lock()
            .expect("watcher table poisoned")
            .remove(path);
    }
}
