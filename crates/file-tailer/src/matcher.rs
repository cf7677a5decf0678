//! Incremental substring filtering over the line index.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::index::{LineIndex, LineIndices};
use crate::reader::LineReader;

/// What the last match update did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MatchChange {
    /// No filter is active.
    #[default]
    None,
    /// Every line was evaluated against the filter.
    Loaded,
    /// Only newly indexed lines were evaluated.
    Appended,
}

/// Line numbers that satisfy the active filter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LineMatches {
    lines: Vec<usize>,
    reason: MatchChange,
}

impl LineMatches {
    /// Sentinel for "no filter": every line is visible.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            lines: Vec::new(),
            reason: MatchChange::None,
        }
    }

    /// Whether a filter is active. An active filter may still match nothing.
    #[must_use]
    pub fn is_filtered(&self) -> bool {
        self.reason != MatchChange::None
    }

    /// Matching line numbers, ascending.
    #[must_use]
    pub fn lines(&self) -> &[usize] {
        &self.lines
    }

    /// Number of matching lines.
    #[must_use]
    pub fn count(&self) -> usize {
        self.lines.len()
    }

    /// What the last update did.
    #[must_use]
    pub const fn reason(&self) -> MatchChange {
        self.reason
    }
}

/// Shared counter identifying the newest search.
///
/// The tailer advances it whenever the search text changes; a running scan
/// compares it against its own generation and gives up as soon as they differ.
#[derive(Clone, Debug, Default)]
pub struct SearchGeneration(Arc<AtomicU64>);

impl SearchGeneration {
    /// Start at generation 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest published generation.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Publish a new generation and return it.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Evaluates one search text against the index, remembering how far it got.
///
/// Matching lowercases both the search and each line with the Unicode default
/// case mapping. It is never locale-aware.
pub struct LineMatcher {
    search: String,
    needle: Option<String>,
    generation: u64,
    shared: SearchGeneration,
    cancel: CancellationToken,
    matches: LineMatches,
    primed_epoch: Option<u64>,
    scanned: usize,
}

impl LineMatcher {
    /// Create a matcher for `search`, active only when the trimmed text has at
    /// least `min_length` characters.
    #[must_use]
    pub fn new(
        search: &str,
        min_length: usize,
        generation: u64,
        shared: SearchGeneration,
        cancel: CancellationToken,
    ) -> Self {
        let search = search.trim().to_string();
        let needle = (search.chars().count() >= min_length).then(|| search.to_lowercase());

        Self {
            search,
            needle,
            generation,
            shared,
            cancel,
            matches: LineMatches::none(),
            primed_epoch: None,
            scanned: 0,
        }
    }

    /// The trimmed search text.
    #[must_use]
    pub fn search(&self) -> &str {
        &self.search
    }

    /// Whether the search text is long enough to filter.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.needle.is_some()
    }

    /// Whether `search` is the same query as this matcher's.
    #[must_use]
    pub fn is_same_search(&self, search: &str) -> bool {
        self.search == search.trim()
    }

    /// Adopt a newer generation for an unchanged search.
    pub const fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    /// Current result.
    #[must_use]
    pub const fn matches(&self) -> &LineMatches {
        &self.matches
    }

    /// Bring the matches up to date with `indices`.
    ///
    /// A rebuilt index (new epoch) is rescanned in full; a grown index only
    /// has its new lines evaluated. Inactive searches never touch the file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Superseded`] when a newer search was published,
    /// [`Error::Cancelled`] on disposal and [`Error::Io`] when reading fails.
    /// On error the previous result is kept.
    pub fn update(&mut self, indices: &LineIndices, reader: &LineReader) -> Result<&LineMatches> {
        let Some(needle) = self.needle.as_deref() else {
            return Ok(&self.matches);
        };

        if self.primed_epoch != Some(indices.epoch()) {
            let lines = self.evaluate(needle, indices.lines(), reader)?;
            debug!(search = %self.search, matched = lines.len(), "filter rescanned");
            self.matches = LineMatches {
                lines,
                reason: MatchChange::Loaded,
            };
        } else if indices.count() > self.scanned {
            let mut lines = self.evaluate(needle, &indices.lines()[self.scanned..], reader)?;
            debug!(search = %self.search, matched = lines.len(), "filter extended");
            self.matches.lines.append(&mut lines);
            self.matches.reason = MatchChange::Appended;
        } else {
            return Ok(&self.matches);
        }

        self.primed_epoch = Some(indices.epoch());
        self.scanned = indices.count();
        Ok(&self.matches)
    }

    fn evaluate(
        &self,
        needle: &str,
        entries: &[LineIndex],
        reader: &LineReader,
    ) -> Result<Vec<usize>> {
        let mut matched = Vec::new();

        reader.scan(entries, |entry, text| {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if self.shared.current() != self.generation {
                return Err(Error::Superseded);
            }

            if text.to_lowercase().contains(needle) {
                matched.push(entry.line);
            }
            Ok(())
        })?;

        Ok(matched)
    }
}
