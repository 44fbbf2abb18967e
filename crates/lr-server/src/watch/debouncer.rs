//! Per-path coalescing of filesystem events.
//!
//! Editors often emit several events per save (write to a temp file, rename,
//! touch metadata). Events for the same path are merged and held until the
//! path has been quiet for the debounce interval.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Kind of filesystem change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ChangeKind {
    Created,
    Modified,
    Removed,
}

/// Change that has settled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Change {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

struct Pending {
    kind: ChangeKind,
    deadline: Instant,
}

/// Collects raw events until each path settles.
pub(crate) struct Debouncer {
    pending: HashMap<PathBuf, Pending>,
    quiet: Duration,
}

impl Debouncer {
    pub(crate) fn new(quiet: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            quiet,
        }
    }

    /// Record a change seen at `now`, pushing the path's deadline back.
    pub(crate) fn record(&mut self, path: PathBuf, kind: ChangeKind, now: Instant) {
        let deadline = now + self.quiet;

        match self.pending.entry(path) {
            Entry::Vacant(entry) => {
                entry.insert(Pending { kind, deadline });
            }
            Entry::Occupied(mut entry) => match merge(entry.get().kind, kind) {
                Some(kind) => {
                    *entry.get_mut() = Pending { kind, deadline };
                }
                // Created and removed again before anyone saw it.
                None => {
                    entry.remove();
                }
            },
        }
    }

    /// Take every change whose deadline is at or before `now`.
    pub(crate) fn drain_ready(&mut self, now: Instant) -> Vec<Change> {
        let mut ready = Vec::new();
        self.pending.retain(|path, pending| {
            if pending.deadline > now {
                return true;
            }
            ready.push(Change {
                path: path.clone(),
                kind: pending.kind,
            });
            false
        });
        ready
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Merge a new change into a pending one; `None` drops the path.
fn merge(pending: ChangeKind, new: ChangeKind) -> Option<ChangeKind> {
    use ChangeKind::{Created, Modified, Removed};

    match (pending, new) {
        (Created, Removed) => None,
        (Created, _) => Some(Created),
        (Modified, kind) => Some(kind),
        (Removed, Created) => Some(Modified),
        (Removed, _) => Some(Removed),
    }
}
