//! Incremental line indexing.
//!
//! The indexer keeps the byte offset of every complete line in the file. On
//! growth only the new bytes are scanned; a shrink (or a file that appears)
//! triggers a full rebuild. Bytes after the last `\n` form a pending line that
//! is not indexed until its terminator arrives.

use std::sync::Arc;

use memchr::memchr_iter;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::monitor::FileNotification;
use crate::source::FileSource;

/// Location of one complete line in the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineIndex {
    /// 1-based line number.
    pub line: usize,
    /// Byte offset of the first byte of the line.
    pub start: u64,
    /// Length in bytes, excluding the `\n` terminator.
    pub length: usize,
}

impl LineIndex {
    /// Offset one past the last content byte (the position of the `\n`).
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.start + self.length as u64
    }
}

/// What the last index update did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IndexChange {
    /// The index was rebuilt from scratch (first load, truncation, deletion).
    Loaded,
    /// Lines were added to the end of the index.
    Appended,
    /// Nothing changed.
    #[default]
    None,
}

/// Snapshot of the line index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LineIndices {
    lines: Vec<LineIndex>,
    tail_starts_at: usize,
    reason: IndexChange,
    indexed_to: u64,
    epoch: u64,
}

impl LineIndices {
    /// Number of complete lines.
    #[must_use]
    pub fn count(&self) -> usize {
        self.lines.len()
    }

    /// Whether the file holds no complete line.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// All indexed lines, in order.
    #[must_use]
    pub fn lines(&self) -> &[LineIndex] {
        &self.lines
    }

    /// Entry for a 1-based line number.
    #[must_use]
    pub fn get(&self, line: usize) -> Option<&LineIndex> {
        line.checked_sub(1).and_then(|i| self.lines.get(i))
    }

    /// Line count before the most recent append; equal to `count` after a load.
    #[must_use]
    pub const fn tail_starts_at(&self) -> usize {
        self.tail_starts_at
    }

    /// What the last update did.
    #[must_use]
    pub const fn reason(&self) -> IndexChange {
        self.reason
    }

    /// Offset where the pending (unterminated) line starts.
    #[must_use]
    pub const fn indexed_to(&self) -> u64 {
        self.indexed_to
    }

    /// Counter bumped on every rebuild. Consumers that derive state from line
    /// numbers must start over when it changes.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Byte offset at which `line` starts.
    ///
    /// Line 0 maps to the start of the file; a line past the end maps to the
    /// end of the indexed region.
    #[must_use]
    pub fn position_near(&self, line: usize) -> u64 {
        match line {
            0 => 0,
            n => self.get(n).map_or(self.indexed_to, |entry| entry.start),
        }
    }

    /// Number of the line containing `offset`, or 0 when nothing is indexed.
    ///
    /// Offsets inside the pending line resolve to the last complete line.
    #[must_use]
    pub fn line_near(&self, offset: u64) -> usize {
        self.lines.partition_point(|entry| entry.start <= offset)
    }
}

/// Maintains [`LineIndices`] for a file across monitor ticks.
pub struct LineIndexer {
    source: Arc<dyn FileSource>,
    chunk_size: usize,
    cancel: CancellationToken,
    indices: LineIndices,
    scanned_to: u64,
    present: bool,
    initialized: bool,
}

impl LineIndexer {
    /// Create an indexer that reads at most `chunk_size` bytes per call.
    #[must_use]
    pub fn new(source: Arc<dyn FileSource>, chunk_size: usize, cancel: CancellationToken) -> Self {
        Self {
            source,
            chunk_size: chunk_size.max(1),
            cancel,
            indices: LineIndices::default(),
            scanned_to: 0,
            present: false,
            initialized: false,
        }
    }

    /// Whether at least one notification has been applied.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Current snapshot.
    #[must_use]
    pub const fn indices(&self) -> &LineIndices {
        &self.indices
    }

    /// Apply one monitor tick.
    ///
    /// The update is all-or-nothing: when scanning fails the previous snapshot
    /// is kept untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the new bytes cannot be read and
    /// [`Error::Cancelled`] when the tailer is disposed mid-scan.
    pub fn update(&mut self, notification: &FileNotification) -> Result<&LineIndices> {
        if !notification.exists() {
            if self.present || !self.initialized {
                debug!("file missing, resetting index");
                self.reset();
            } else {
                self.indices.reason = IndexChange::None;
            }
            return Ok(&self.indices);
        }

        let size = notification.size();
        if !self.present || size < self.scanned_to {
            self.rebuild(size)?;
        } else if size > self.scanned_to {
            self.append(size)?;
        } else {
            self.indices.reason = IndexChange::None;
        }

        Ok(&self.indices)
    }

    fn reset(&mut self) {
        let epoch = self.indices.epoch + 1;
        self.indices = LineIndices {
            reason: IndexChange::Loaded,
            epoch,
            ..LineIndices::default()
        };
        self.scanned_to = 0;
        self.present = false;
        self.initialized = true;
    }

    fn rebuild(&mut self, size: u64) -> Result<()> {
        let mut lines = Vec::new();
        let indexed_to = self.scan(0, 0, size, &mut lines)?;
        let count = lines.len();

        debug!(lines = count, size, "index rebuilt");
        self.indices = LineIndices {
            lines,
            tail_starts_at: count,
            reason: IndexChange::Loaded,
            indexed_to,
            epoch: self.indices.epoch + 1,
        };
        self.scanned_to = size;
        self.present = true;
        self.initialized = true;
        Ok(())
    }

    fn append(&mut self, size: u64) -> Result<()> {
        let previous = self.indices.count();
        let mut added = Vec::new();
        let indexed_to = self.scan(self.indices.indexed_to, self.scanned_to, size, &mut added)?;

        self.scanned_to = size;
        self.indices.indexed_to = indexed_to;

        if added.is_empty() {
            self.indices.reason = IndexChange::None;
            return Ok(());
        }

        debug!(added = added.len(), total = previous + added.len(), "index appended");
        self.indices.lines.append(&mut added);
        self.indices.tail_starts_at = previous;
        self.indices.reason = IndexChange::Appended;
        Ok(())
    }

    /// Scan `[from, to)` for terminators. `line_start` is where the pending line
    /// began. New entries are pushed to `out`, numbered after the current
    /// snapshot; the returned offset is the start of the new pending line.
    fn scan(
        &self,
        mut line_start: u64,
        from: u64,
        to: u64,
        out: &mut Vec<LineIndex>,
    ) -> Result<u64> {
        let first_line = if from == 0 { 1 } else { self.indices.count() + 1 };
        let mut offset = from;

        while offset < to {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let len = usize::try_from(to - offset).map_or(self.chunk_size, |remaining| {
                remaining.min(self.chunk_size)
            });
            let chunk = self
                .source
                .read_at(offset, len)
                .map_err(|e| Error::Io("failed to scan file for lines", e))?;

            for pos in memchr_iter(b'\n', &chunk) {
                let newline = offset + pos as u64;
                out.push(LineIndex {
                    line: first_line + out.len(),
                    start: line_start,
                    length: usize::try_from(newline - line_start).unwrap_or(usize::MAX),
                });
                line_start = newline + 1;
            }

            offset += len as u64;
        }

        Ok(line_start)
    }
}
