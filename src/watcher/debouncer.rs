//! Debouncing for file change events.
//!
//! Editors save in bursts (auto-save, format-on-save, atomic rename
//! dances); debouncing coalesces those into one re-index per path once
//! the file has been stable for the configured window.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// What kind of change is pending for a path. A create followed by
/// modifications within the window stays a create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
}

#[derive(Debug)]
pub struct Debouncer {
    pending: HashMap<PathBuf, (Instant, ChangeKind)>,
    window: Duration,
}

impl Debouncer {
    pub fn new(window_ms: u64) -> Self {
        Self {
            pending: HashMap::new(),
            window: Duration::from_millis(window_ms),
        }
    }

    /// Record a change, resetting the timer for this path.
    pub fn record(&mut self, path: PathBuf, kind: ChangeKind) {
        let kind = match (self.pending.get(&path), kind) {
            (Some((_, ChangeKind::Created)), _) => ChangeKind::Created,
            (_, kind) => kind,
        };
        self.pending.insert(path, (Instant::now(), kind));
    }

    /// Forget a path (it was deleted).
    pub fn remove(&mut self, path: &PathBuf) {
        self.pending.remove(path);
    }

    /// Take all paths stable for the debounce window.
    pub fn take_ready(&mut self) -> Vec<(PathBuf, ChangeKind)> {
        let now = Instant::now();
        let mut ready = Vec::new();
        self.pending.retain(|path, (last_change, kind)| {
            if now.duration_since(*last_change) >= self.window {
                ready.push((path.clone(), *kind));
                false
            } else {
                true
            }
        });
        ready
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn events_settle_after_the_window() {
        let mut debouncer = Debouncer::new(50);
        let path = PathBuf::from("/repo/file.rs");

        debouncer.record(path.clone(), ChangeKind::Modified);
        assert!(debouncer.take_ready().is_empty());
        assert!(debouncer.has_pending());

        sleep(Duration::from_millis(60));
        let ready = debouncer.take_ready();
        assert_eq!(ready, vec![(path, ChangeKind::Modified)]);
        assert!(!debouncer.has_pending());
    }

    #[test]
    fn repeated_changes_reset_the_timer() {
        let mut debouncer = Debouncer::new(50);
        let path = PathBuf::from("/repo/file.rs");

        debouncer.record(path.clone(), ChangeKind::Modified);
        sleep(Duration::from_millis(30));
        debouncer.record(path.clone(), ChangeKind::Modified);
        sleep(Duration::from_millis(30));

        // Only 30ms since the latest change
        assert!(debouncer.take_ready().is_empty());

        sleep(Duration::from_millis(30));
        assert_eq!(debouncer.take_ready().len(), 1);
    }

    #[test]
    fn create_followed_by_modify_stays_a_create() {
        let mut debouncer = Debouncer::new(10);
        let path = PathBuf::from("/repo/new.rs");

        debouncer.record(path.clone(), ChangeKind::Created);
        debouncer.record(path.clone(), ChangeKind::Modified);

        sleep(Duration::from_millis(20));
        let ready = debouncer.take_ready();
        assert_eq!(ready, vec![(path, ChangeKind::Created)]);
    }

    #[test]
    fn removed_paths_never_fire() {
        let mut debouncer = Debouncer::new(10);
        let path = PathBuf::from("/repo/gone.rs");

        debouncer.record(path.clone(), ChangeKind::Modified);
        debouncer.remove(&path);

        sleep(Duration::from_millis(20));
        assert!(debouncer.take_ready().is_empty());
    }
}
