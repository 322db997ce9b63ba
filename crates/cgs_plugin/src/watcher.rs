//! Polling file watcher with debounce.
//!
//! Watches individual files by modification time. A change is only
//! reported once the mtime has been stable for the debounce window, so a
//! build that is still writing the library does not trigger a half-baked
//! reload.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// Default settle time before a change is reported.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

struct WatchedFile {
    path: PathBuf,
    last_mtime: Option<SystemTime>,
    pending_since: Option<Instant>,
}

/// Mtime-polling watcher over a set of files.
pub struct FileWatcher {
    files: Vec<WatchedFile>,
    debounce: Duration,
}

impl FileWatcher {
    pub fn new() -> Self {
        Self::with_debounce(DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(debounce: Duration) -> Self {
        Self {
            files: Vec::new(),
            debounce,
        }
    }

    /// Starts watching a file. The current mtime (if the file exists)
    /// becomes the baseline; only later changes are reported.
    pub fn watch(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if self.files.iter().any(|f| f.path == path) {
            return;
        }
        let last_mtime = mtime_of(&path);
        self.files.push(WatchedFile {
            path,
            last_mtime,
            pending_since: None,
        });
    }

    /// Stops watching a file.
    pub fn unwatch(&mut self, path: &Path) {
        self.files.retain(|f| f.path != path);
    }

    pub fn watched_count(&self) -> usize {
        self.files.len()
    }

    /// Checks all watched files and returns those whose changes have
    /// settled past the debounce window. Call this periodically.
    pub fn poll(&mut self) -> Vec<PathBuf> {
        let now = Instant::now();
        let mut changed = Vec::new();
        for file in &mut self.files {
            let current = mtime_of(&file.path);
            if current != file.last_mtime {
                // New write observed; restart the settle timer.
                file.last_mtime = current;
                file.pending_since = Some(now);
                continue;
            }
            if let Some(since) = file.pending_since {
                if now.duration_since(since) >= self.debounce {
                    file.pending_since = None;
                    // A file deleted and never rewritten is not a change.
                    if current.is_some() {
                        changed.push(file.path.clone());
                    }
                }
            }
        }
        changed
    }
}

impl Default for FileWatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn mtime_of(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn unchanged_file_reports_nothing() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut watcher = FileWatcher::with_debounce(Duration::from_millis(1));
        watcher.watch(file.path());
        assert!(watcher.poll().is_empty());
        assert!(watcher.poll().is_empty());
    }

    #[test]
    fn change_is_reported_after_debounce() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut watcher = FileWatcher::with_debounce(Duration::from_millis(20));
        watcher.watch(file.path());

        std::thread::sleep(Duration::from_millis(30));
        file.write_all(b"rebuilt").unwrap();
        file.flush().unwrap();

        // First poll sees the new mtime and starts the settle timer.
        assert!(watcher.poll().is_empty());
        std::thread::sleep(Duration::from_millis(40));
        let changed = watcher.poll();
        assert_eq!(changed, vec![file.path().to_path_buf()]);

        // Reported once, not repeatedly.
        assert!(watcher.poll().is_empty());
    }

    #[test]
    fn unwatch_stops_reports() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut watcher = FileWatcher::new();
        watcher.watch(file.path());
        assert_eq!(watcher.watched_count(), 1);
        watcher.unwatch(file.path());
        assert_eq!(watcher.watched_count(), 0);
    }

    #[test]
    fn watching_twice_is_idempotent() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut watcher = FileWatcher::new();
        watcher.watch(file.path());
        watcher.watch(file.path());
        assert_eq!(watcher.watched_count(), 1);
    }
}
