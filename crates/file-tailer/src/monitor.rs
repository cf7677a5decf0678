//! Polling file monitor.
//!
//! The monitor is a lazy, infinite sequence: every call to [`FileMonitor::poll`]
//! (or [`Iterator::next`]) performs one stat and reports the current state
//! along with whether it differs from the previous tick. The cadence is owned
//! by whoever drives it.

use std::sync::Arc;
use std::time::SystemTime;

use tracing::debug;

use crate::source::FileSource;

/// Existence, size and modification time of the tailed file at one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileState {
    /// Whether the file exists.
    pub exists: bool,
    /// Size in bytes (0 when missing).
    pub size: u64,
    /// Last modification time, when the platform reports one.
    pub modified: Option<SystemTime>,
}

impl FileState {
    /// State of a file that does not exist.
    #[must_use]
    pub const fn missing() -> Self {
        Self {
            exists: false,
            size: 0,
            modified: None,
        }
    }

    /// State of an existing file.
    #[must_use]
    pub const fn present(size: u64, modified: Option<SystemTime>) -> Self {
        Self {
            exists: true,
            size,
            modified,
        }
    }
}

/// One monitor tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileNotification {
    /// State observed on this tick.
    pub state: FileState,
    /// Whether the state differs from the previous tick.
    pub changed: bool,
}

impl FileNotification {
    /// Whether the file exists.
    #[must_use]
    pub const fn exists(&self) -> bool {
        self.state.exists
    }

    /// Size of the file, 0 when missing.
    #[must_use]
    pub const fn size(&self) -> u64 {
        if self.state.exists { self.state.size } else { 0 }
    }
}

/// Stats a [`FileSource`] once per poll.
pub struct FileMonitor {
    source: Arc<dyn FileSource>,
    last: Option<FileState>,
}

impl FileMonitor {
    /// Create a monitor for the given source.
    #[must_use]
    pub fn new(source: Arc<dyn FileSource>) -> Self {
        Self { source, last: None }
    }

    /// State reported by the most recent poll.
    #[must_use]
    pub const fn last(&self) -> Option<FileState> {
        self.last
    }

    /// Stat the file once.
    ///
    /// A failing stat never ends the sequence: the tick repeats the previous
    /// state (or "missing" before the first success) and reports it as unchanged.
    pub fn poll(&mut self) -> FileNotification {
        match self.source.stat() {
            Ok(state) => {
                let changed = self.last != Some(state);
                self.last = Some(state);
                FileNotification { state, changed }
            }
            Err(e) => {
                debug!(error = %e, "stat failed, treating tick as unchanged");
                FileNotification {
                    state: self.last.unwrap_or_else(FileState::missing),
                    changed: false,
                }
            }
        }
    }
}

impl Iterator for FileMonitor {
    type Item = FileNotification;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.poll())
    }
}
