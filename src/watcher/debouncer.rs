//! Shared debouncing logic for file change events.
//!
//! Debouncing prevents excessive re-indexing when files are saved many
//! times in quick succession (auto-save, formatters). Rapid repeated
//! events on one path collapse into a single event carrying the latest
//! kind.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// What happened to a watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
}

/// A debounced change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
}

/// Debounces file change events by path.
///
/// Records change timestamps and returns paths that have been stable for
/// the configured duration, each with the most recent event kind.
#[derive(Debug)]
pub struct Debouncer {
    /// Pending changes: path -> (last change timestamp, latest kind).
    pending: HashMap<PathBuf, (Instant, FileEventKind)>,
    /// How long a path must be quiet before its event is delivered.
    duration: Duration,
}

impl Debouncer {
    pub fn new(duration: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            duration,
        }
    }

    /// Record a change, resetting the timer and keeping the latest kind.
    pub fn record(&mut self, path: PathBuf, kind: FileEventKind) {
        self.pending.insert(path, (Instant::now(), kind));
    }

    /// Take all events whose paths have been quiet for the debounce
    /// duration, removing them from pending.
    pub fn take_ready(&mut self) -> Vec<FileEvent> {
        let now = Instant::now();
        let mut ready = Vec::new();

        self.pending.retain(|path, (last_change, kind)| {
            if now.duration_since(*last_change) >= self.duration {
                ready.push(FileEvent {
                    path: path.clone(),
                    kind: *kind,
                });
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

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
