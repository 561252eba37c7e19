//! File watcher: observes the repository root and drives re-indexing.
//!
//! Modifications are debounced per path; deletions and moves apply
//! immediately. Every successful mutation invalidates the cached
//! queries that touched the file (tag-based, inside the dispatcher)
//! and emits a notification event for subscribers.

mod debouncer;

pub use debouncer::{ChangeKind, Debouncer};

use crate::dispatcher::{Dispatcher, IndexOutcome};
use crate::subscriptions::{NotificationEvent, NotificationType, SubscriptionManager};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to watch '{path}': {source}")]
    WatchFailed {
        path: PathBuf,
        source: notify::Error,
    },

    #[error("File watcher backend error: {0}")]
    Backend(#[from] notify::Error),
}

/// Watches the repository root recursively and routes events to the
/// dispatcher.
pub struct WatchService {
    dispatcher: Arc<Dispatcher>,
    subscriptions: Option<Arc<SubscriptionManager>>,
    extensions: HashSet<String>,
    debounce_ms: u64,
}

impl WatchService {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        subscriptions: Option<Arc<SubscriptionManager>>,
    ) -> Self {
        let debounce_ms = dispatcher.settings().indexing.debounce_ms;
        let extensions = dispatcher.indexable_extensions();
        Self {
            dispatcher,
            subscriptions,
            extensions,
            debounce_ms,
        }
    }

    /// Watch until the task is cancelled. The event loop receives raw
    /// notify events, debounces modifications, and executes actions.
    pub async fn watch(self) -> Result<(), WatchError> {
        let root = self.dispatcher.resolver().root().to_path_buf();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = tx.send(res);
        })?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::WatchFailed {
                path: root.clone(),
                source,
            })?;

        let mut debouncer = Debouncer::new(self.debounce_ms);
        crate::log_event!("watcher", "started", "{}", root.display());

        loop {
            let tick = sleep(Duration::from_millis(100));
            tokio::pin!(tick);

            tokio::select! {
                Some(res) = rx.recv() => {
                    match res {
                        Ok(event) => self.handle_event(&mut debouncer, event),
                        Err(e) => tracing::error!("[watcher] backend error: {e}"),
                    }
                }
                _ = &mut tick => {
                    for (path, kind) in debouncer.take_ready() {
                        self.process_change(&path, kind);
                    }
                }
            }
        }
    }

    fn handle_event(&self, debouncer: &mut Debouncer, event: notify::Event) {
        match event.kind {
            EventKind::Create(_) => {
                for path in event.paths {
                    if path.is_file() && self.is_indexable(&path) {
                        debouncer.record(path, ChangeKind::Created);
                    }
                }
            }
            // A rename observed with both endpoints maps to a move
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let [from, to] = event.paths.as_slice() {
                    self.process_move(from, to, debouncer);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in event.paths {
                    debouncer.remove(&path);
                    self.process_deletion(&path);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for path in event.paths {
                    if path.is_file() && self.is_indexable(&path) {
                        debouncer.record(path, ChangeKind::Created);
                    }
                }
            }
            EventKind::Modify(_) => {
                for path in event.paths {
                    if path.is_dir() {
                        continue;
                    }
                    if self.is_indexable(&path) {
                        debouncer.record(path, ChangeKind::Modified);
                    }
                }
            }
            EventKind::Remove(_) => {
                for path in event.paths {
                    debouncer.remove(&path);
                    self.process_deletion(&path);
                }
            }
            _ => {}
        }
    }

    /// Extension allowlist first; for extensionless paths, fall back to
    /// whether the file was already indexed (dotfiles picked up by a
    /// bulk index keep getting re-indexed on change).
    fn is_indexable(&self, path: &Path) -> bool {
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if self.extensions.contains(&ext.to_ascii_lowercase()) {
                return true;
            }
        }
        let Ok(relative) = self.dispatcher.resolver().normalize(path) else {
            return false;
        };
        matches!(
            self.dispatcher
                .store()
                .get_file(self.dispatcher.repo(), &relative),
            Ok(Some(_))
        )
    }

    fn process_change(&self, path: &Path, kind: ChangeKind) {
        if !path.exists() {
            // Settled as a rename-and-replace that ended in deletion
            self.process_deletion(path);
            return;
        }
        match self.dispatcher.index_file(path) {
            Ok(IndexOutcome::Indexed { symbols, .. }) => {
                crate::log_event!(
                    "watcher",
                    "reindexed",
                    "{} ({symbols} symbols)",
                    path.display()
                );
                let event_type = match kind {
                    ChangeKind::Created => NotificationType::FileCreated,
                    ChangeKind::Modified => NotificationType::FileModified,
                };
                self.emit(event_type, path, serde_json::json!({}));
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("[watcher] failed to re-index {}: {e}", path.display()),
        }
    }

    fn process_deletion(&self, path: &Path) {
        match self.dispatcher.remove_file(path) {
            Ok(true) => {
                self.emit(NotificationType::FileDeleted, path, serde_json::json!({}));
            }
            Ok(false) => {}
            Err(e) => tracing::warn!("[watcher] failed to remove {}: {e}", path.display()),
        }
    }

    fn process_move(&self, from: &Path, to: &Path, debouncer: &mut Debouncer) {
        debouncer.remove(&from.to_path_buf());
        match self.dispatcher.move_file(from, to) {
            Ok(_) => {
                let metadata = serde_json::json!({
                    "old_path": from.to_string_lossy(),
                });
                self.emit(NotificationType::FileMoved, to, metadata);
            }
            Err(e) => {
                // Source was never indexed (or crossed the root); the
                // destination still deserves indexing
                crate::debug_event!("watcher", "move fallback", "{e}");
                self.process_deletion(from);
                if to.is_file() && self.is_indexable(to) {
                    debouncer.record(to.to_path_buf(), ChangeKind::Created);
                }
            }
        }
    }

    fn emit(&self, event_type: NotificationType, path: &Path, mut metadata: serde_json::Value) {
        let Some(manager) = &self.subscriptions else {
            return;
        };
        let uri = self
            .dispatcher
            .resolver()
            .normalize(path)
            .unwrap_or_else(|_| path.to_string_lossy().to_string());
        if let Some(map) = metadata.as_object_mut() {
            if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                map.insert("extension".to_string(), serde_json::json!(ext));
                if let Some(language) =
                    crate::plugins::FileTypeMatcher::language_for_extension(ext)
                {
                    map.insert("language".to_string(), serde_json::json!(language));
                }
            }
        }
        manager.publish(&NotificationEvent::new(event_type, uri, metadata));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::paths::PathResolver;
    use crate::store::IndexStore;

    fn service(dir: &tempfile::TempDir) -> WatchService {
        let resolver = PathResolver::new(dir.path()).unwrap();
        let store = Arc::new(IndexStore::open_in_memory().unwrap());
        let dispatcher =
            Arc::new(Dispatcher::new(Arc::new(Settings::default()), store, resolver).unwrap());
        WatchService::new(dispatcher, None)
    }

    #[test]
    fn change_processing_indexes_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir);

        let path = dir.path().join("app.py");
        std::fs::write(&path, "def install(): pass\n").unwrap();
        service.process_change(&path, ChangeKind::Created);

        let results = service.dispatcher.search("install", false, 10).unwrap();
        assert_eq!(results.len(), 1);

        std::fs::remove_file(&path).unwrap();
        // A modify that settles after deletion degrades to a delete
        service.process_change(&path, ChangeKind::Modified);
        assert!(service.dispatcher.search("install", false, 10).unwrap().is_empty());
    }

    #[test]
    fn move_processing_preserves_index() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir);

        let old = dir.path().join("old.py");
        std::fs::write(&old, "def install(): pass\n").unwrap();
        service.process_change(&old, ChangeKind::Created);

        let new = dir.path().join("renamed.py");
        std::fs::rename(&old, &new).unwrap();
        let mut debouncer = Debouncer::new(10);
        service.process_move(&old, &new, &mut debouncer);

        let results = service.dispatcher.search("install", false, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file_path, "renamed.py");
    }

    #[test]
    fn indexable_checks_extension_allowlist() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir);
        assert!(service.is_indexable(Path::new("src/app.py")));
        assert!(service.is_indexable(Path::new("README.md")));
        assert!(!service.is_indexable(Path::new("binary.exe")));
    }
}
