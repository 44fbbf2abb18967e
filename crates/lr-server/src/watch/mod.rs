//! File watcher that triggers reloads.

mod debouncer;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use glob::Pattern;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ServerError;
use crate::live_reload::LiveReload;
use debouncer::{ChangeKind, Debouncer};

/// Watch settings.
#[derive(Clone, Debug)]
pub struct WatchOptions {
    /// Directory watched recursively.
    pub dir: PathBuf,
    /// Glob patterns, relative to `dir`, of files that trigger a reload.
    pub patterns: Vec<String>,
    /// How long a path must stay quiet before it counts as changed.
    pub debounce: Duration,
}

/// Running watcher. Stops when dropped.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl FileWatcher {
    /// Watch `options.dir` and send a reload for every settled batch of
    /// matching changes.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(options: WatchOptions, live_reload: LiveReload) -> Result<Self, ServerError> {
        let dir = options.dir.canonicalize()?;
        let patterns = options
            .patterns
            .iter()
            .map(|pattern| Pattern::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher =
            notify::recommended_watcher(move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    // Receiver is gone once the watcher is being dropped.
                    let _ = tx.send(event);
                }
                Err(err) => tracing::warn!(error = %err, "File watcher error"),
            })?;
        watcher.watch(&dir, RecursiveMode::Recursive)?;
        tracing::info!(dir = %dir.display(), "Watching for changes");

        let task = tokio::spawn(watch_loop(
            rx,
            dir,
            patterns,
            Debouncer::new(options.debounce),
            live_reload,
        ));

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn watch_loop(
    mut events: mpsc::UnboundedReceiver<Event>,
    dir: PathBuf,
    patterns: Vec<Pattern>,
    mut debouncer: Debouncer,
    live_reload: LiveReload,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(25));

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                record_event(&event, &dir, &patterns, &mut debouncer);
            }
            _ = ticker.tick(), if !debouncer.is_empty() => {
                let changes = debouncer.drain_ready(Instant::now());
                if changes.is_empty() {
                    continue;
                }
                for change in &changes {
                    tracing::debug!(path = %change.path.display(), kind = ?change.kind, "File changed");
                }
                live_reload.reload().await;
            }
        }
    }
}

fn record_event(event: &Event, dir: &Path, patterns: &[Pattern], debouncer: &mut Debouncer) {
    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Modify(_) => ChangeKind::Modified,
        EventKind::Remove(_) => ChangeKind::Removed,
        _ => return,
    };

    let now = Instant::now();
    for path in &event.paths {
        if matches_patterns(path, dir, patterns) {
            debouncer.record(path.clone(), kind, now);
        }
    }
}

/// Whether `path`, taken relative to `dir`, matches any pattern.
fn matches_patterns(path: &Path, dir: &Path, patterns: &[Pattern]) -> bool {
    let Ok(relative) = path.strip_prefix(dir) else {
        return false;
    };
    patterns.iter().any(|pattern| pattern.matches_path(relative))
}
