//! File system watching with pattern filtering and debouncing.
//!
//! `FileWatcher::start` observes directories recursively and delivers a
//! stream of debounced [`FileEvent`]s. Pattern filtering happens before
//! the debounce timers. Consumers only enqueue index jobs from the
//! stream; they never touch the stores directly.

pub mod debouncer;

pub use debouncer::{Debouncer, FileEvent, FileEventKind};

use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Errors from setting up a watch.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("watch error: {0}")]
    Notify(#[from] notify::Error),

    #[error("invalid watch pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Handle to an active watch. Dropping (or calling [`stop`]) releases the
/// notify handles and ends the event stream.
///
/// [`stop`]: FileWatcher::stop
pub struct FileWatcher {
    /// Keeps the OS watches alive.
    _watcher: notify::RecommendedWatcher,
    cancel: CancellationToken,
}

impl FileWatcher {
    /// Watch `paths` recursively, delivering events for files matching
    /// `patterns` (empty = all files) after `debounce` of quiet time.
    pub fn start(
        paths: &[PathBuf],
        patterns: &[String],
        debounce: Duration,
    ) -> Result<(Self, mpsc::Receiver<FileEvent>), WatchError> {
        let matcher = build_matcher(patterns)?;

        let (raw_tx, mut raw_rx) = mpsc::channel::<notify::Result<Event>>(256);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = raw_tx.blocking_send(res);
        })?;

        for path in paths {
            watcher.watch(path, RecursiveMode::Recursive)?;
            tracing::debug!(target: "watcher", "watching {}", path.display());
        }

        let (out_tx, out_rx) = mpsc::channel(256);
        let cancel = CancellationToken::new();
        let pump_cancel = cancel.clone();

        tokio::spawn(async move {
            let mut debouncer = Debouncer::new(debounce);
            loop {
                let tick = tokio::time::sleep(Duration::from_millis(100));
                tokio::pin!(tick);

                tokio::select! {
                    _ = pump_cancel.cancelled() => break,

                    received = raw_rx.recv() => match received {
                        Some(Ok(event)) => {
                            let kind = match event.kind {
                                EventKind::Create(_) => FileEventKind::Created,
                                EventKind::Modify(_) => FileEventKind::Modified,
                                EventKind::Remove(_) => FileEventKind::Deleted,
                                _ => continue,
                            };
                            for path in event.paths {
                                // Pattern filtering precedes the debounce
                                // timers.
                                if matches_patterns(&matcher, &path) {
                                    debouncer.record(path, kind);
                                }
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(target: "watcher", "watch error: {e}");
                        }
                        None => break,
                    },

                    _ = &mut tick => {
                        for event in debouncer.take_ready() {
                            if out_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok((
            Self {
                _watcher: watcher,
                cancel,
            },
            out_rx,
        ))
    }

    /// Release all handles and end the stream.
    pub fn stop(self) {
        // Drop does the work.
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Build a glob set from patterns; `None` matches everything.
pub(crate) fn build_matcher(patterns: &[String]) -> Result<Option<GlobSet>, WatchError> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| WatchError::InvalidPattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;
        builder.add(glob);
    }
    let set = builder.build().map_err(|e| WatchError::InvalidPattern {
        pattern: patterns.join(", "),
        reason: e.to_string(),
    })?;
    Ok(Some(set))
}

/// Match the full path or just the file name, so `*.md` style patterns
/// behave as expected for nested files.
pub(crate) fn matches_patterns(matcher: &Option<GlobSet>, path: &Path) -> bool {
    let Some(set) = matcher else {
        return true;
    };
    if set.is_match(path) {
        return true;
    }
    path.file_name().is_some_and(|name| set.is_match(Path::new(name)))
}
