//! One synchronous recomputation: monitor, index, match, select, diff, read.
//!
//! A [`Pipeline`] owns all upstream state for one file. The tailer moves it onto
//! the blocking pool for every step and gets it back when the step finishes.
//! Nothing is published from here; the step returns what changed and the
//! tailer publishes it only when the whole step succeeded.

use std::sync::Arc;

use chrono::Utc;
use encoding_rs::Encoding;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::TailerConfig;
use crate::error::Result;
use crate::index::{IndexChange, LineIndexer};
use crate::lines::{Line, LineDelta};
use crate::matcher::{LineMatcher, SearchGeneration};
use crate::monitor::FileMonitor;
use crate::reader::LineReader;
use crate::source::FileSource;
use crate::summary::LineCounts;
use crate::window::{self, ScrollRequest};

/// Inputs for one step.
#[derive(Debug)]
pub struct StepInput {
    /// Stat the file and update the index.
    pub tick: bool,
    /// New search text and its generation.
    pub search: Option<(String, u64)>,
    /// Current scroll request.
    pub scroll: ScrollRequest,
    /// Currently published line numbers, ascending.
    pub published: Vec<usize>,
}

/// Result of a successful step.
#[derive(Debug)]
pub struct StepOutput {
    /// Changes to apply to the published collection.
    pub delta: LineDelta,
    /// The new window, ascending.
    pub window: Vec<usize>,
    /// Line counts after the step.
    pub counts: LineCounts,
    /// File size from the latest tick, 0 when missing.
    pub file_size: u64,
}

pub struct Pipeline {
    monitor: FileMonitor,
    indexer: LineIndexer,
    matcher: LineMatcher,
    reader: LineReader,
    shared: SearchGeneration,
    cancel: CancellationToken,
    min_search_length: usize,
    exists: Option<bool>,
    file_size: u64,
    fresh_after: Option<usize>,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn FileSource>,
        config: &TailerConfig,
        encoding: &'static Encoding,
        search: (&str, u64),
        shared: SearchGeneration,
        cancel: CancellationToken,
    ) -> Self {
        let (text, generation) = search;

        Self {
            monitor: FileMonitor::new(source.clone()),
            indexer: LineIndexer::new(source.clone(), config.read_chunk_size, cancel.clone()),
            matcher: LineMatcher::new(
                text,
                config.min_search_length,
                generation,
                shared.clone(),
                cancel.clone(),
            ),
            reader: LineReader::new(
                source,
                encoding,
                config.line_terminator,
                config.read_chunk_size,
            ),
            shared,
            cancel,
            min_search_length: config.min_search_length,
            exists: None,
            file_size: 0,
            fresh_after: None,
        }
    }

    pub fn step(&mut self, input: StepInput) -> Result<StepOutput> {
        if let Some((text, generation)) = input.search {
            self.switch_search(&text, generation);
        }

        if input.tick || !self.indexer.is_initialized() {
            self.refresh_index()?;
        }

        let indices = self.indexer.indices();
        let matches = self.matcher.update(indices, &self.reader)?;
        let window = window::select(indices, matches, &input.scroll);

        let removed: Vec<usize> = input
            .published
            .iter()
            .copied()
            .filter(|line| window.binary_search(line).is_err())
            .collect();
        let entries: Vec<_> = window
            .iter()
            .filter(|line| input.published.binary_search(line).is_err())
            .filter_map(|&line| indices.get(line).copied())
            .collect();

        let texts = self.reader.read(&entries)?;
        let now = Utc::now();
        let added = entries
            .iter()
            .zip(texts)
            .map(|(entry, text)| {
                let fresh = self.fresh_after.is_some_and(|tail| entry.line > tail);
                Line::new(entry.line, text, fresh.then_some(now))
            })
            .collect();

        let counts = if matches.is_filtered() {
            LineCounts::filtered(indices.count(), matches.count())
        } else {
            LineCounts::unfiltered(indices.count())
        };

        self.fresh_after = None;
        Ok(StepOutput {
            delta: LineDelta { removed, added },
            window,
            counts,
            file_size: self.file_size,
        })
    }

    fn switch_search(&mut self, text: &str, generation: u64) {
        if self.matcher.is_same_search(text) {
            self.matcher.set_generation(generation);
            return;
        }

        debug!(search = %text.trim(), generation, "search changed");
        self.matcher = LineMatcher::new(
            text,
            self.min_search_length,
            generation,
            self.shared.clone(),
            self.cancel.clone(),
        );
    }

    fn refresh_index(&mut self) -> Result<()> {
        let notification = self.monitor.poll();

        if self.exists != Some(notification.exists()) {
            if notification.exists() {
                info!(size = notification.size(), "file found");
            } else {
                info!("waiting for file to appear");
            }
            self.exists = Some(notification.exists());
        }

        let indices = self.indexer.update(&notification)?;
        match indices.reason() {
            IndexChange::Appended => {
                let tail = indices.tail_starts_at();
                self.fresh_after = Some(self.fresh_after.map_or(tail, |seen| seen.min(tail)));
            }
            IndexChange::Loaded => self.fresh_after = None,
            IndexChange::None => {}
        }

        self.file_size = notification.size();
        Ok(())
    }
}
