//! The published line collection and its change stream.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// One visible line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Line {
    /// 1-based line number in the file.
    pub line: usize,
    /// Decoded text without the terminator.
    pub text: String,
    /// When the line was seen arriving at the tail. `None` for lines that
    /// were already in the file when it was loaded.
    pub received_at: Option<DateTime<Utc>>,
}

impl Line {
    /// Create a line.
    #[must_use]
    pub const fn new(line: usize, text: String, received_at: Option<DateTime<Utc>>) -> Self {
        Self {
            line,
            text,
            received_at,
        }
    }
}

/// One atomic change to the visible set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LineDelta {
    /// Line numbers that left the window.
    pub removed: Vec<usize>,
    /// Lines that entered the window, ascending.
    pub added: Vec<Line>,
}

impl LineDelta {
    /// Whether the delta changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

#[derive(Default)]
struct CollectionState {
    lines: BTreeMap<usize, Line>,
    subscribers: Vec<mpsc::UnboundedSender<LineDelta>>,
}

/// Ordered set of visible lines, keyed by line number.
///
/// Clones share the same state. Only the tailer writes to it.
#[derive(Clone, Default)]
pub struct LineCollection {
    state: Arc<Mutex<CollectionState>>,
}

impl LineCollection {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the visible lines, ascending.
    #[must_use]
    pub fn items(&self) -> Vec<Line> {
        self.state.lock().lines.values().cloned().collect()
    }

    /// Visible line numbers, ascending.
    #[must_use]
    pub fn line_numbers(&self) -> Vec<usize> {
        self.state.lock().lines.keys().copied().collect()
    }

    /// Number of visible lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().lines.len()
    }

    /// Whether no line is visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().lines.is_empty()
    }

    /// Lowest visible line number, 0 when empty.
    #[must_use]
    pub fn first_line(&self) -> usize {
        self.state
            .lock()
            .lines
            .keys()
            .next()
            .copied()
            .unwrap_or(0)
    }

    /// Subscribe to changes.
    ///
    /// The first delta received adds the current contents, so applying every
    /// delta in order reproduces the visible set.
    #[must_use]
    pub fn connect(&self) -> LineSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();

        if !state.lines.is_empty() {
            let initial = LineDelta {
                removed: Vec::new(),
                added: state.lines.values().cloned().collect(),
            };
            // Receiver is still in scope, cannot fail
            let _ = tx.send(initial);
        }

        state.subscribers.push(tx);
        LineSubscription { rx }
    }

    /// Apply a delta and forward it to subscribers.
    pub(crate) fn apply(&self, delta: LineDelta) {
        if delta.is_empty() {
            return;
        }

        let mut state = self.state.lock();
        for line in &delta.removed {
            state.lines.remove(line);
        }
        for line in &delta.added {
            state.lines.insert(line.line, line.clone());
        }

        state.subscribers.retain(|tx| tx.send(delta.clone()).is_ok());
    }

    /// End every subscription.
    pub(crate) fn close(&self) {
        self.state.lock().subscribers.clear();
    }
}

/// Stream of [`LineDelta`]s from a [`LineCollection`].
#[derive(Debug)]
pub struct LineSubscription {
    rx: mpsc::UnboundedReceiver<LineDelta>,
}

impl LineSubscription {
    /// Wait for the next delta. `None` once the tailer is disposed.
    pub async fn recv(&mut self) -> Option<LineDelta> {
        self.rx.recv().await
    }

    /// Next delta if one is already queued.
    pub fn try_recv(&mut self) -> Option<LineDelta> {
        self.rx.try_recv().ok()
    }
}
