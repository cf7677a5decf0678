//! The tail engine: a single-writer actor that keeps a [`LineCollection`] in
//! sync with a file, a search text and a scroll position.

use std::path::PathBuf;
use std::sync::Arc;

use encoding_rs::Encoding;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::TailerConfig;
use crate::error::{Error, Result};
use crate::lines::LineCollection;
use crate::matcher::SearchGeneration;
use crate::pipeline::{Pipeline, StepInput, StepOutput};
use crate::source::{FileSource, LocalFile};
use crate::summary::LineCounts;
use crate::window::ScrollRequest;

/// Lifecycle of a [`FileTailer`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TailerState {
    /// Nothing has been published yet.
    #[default]
    Initializing,
    /// The published lines reflect the latest inputs.
    Streaming,
    /// A recomputation failed; published lines are frozen until a retry succeeds.
    Degraded {
        /// Consecutive failed attempts.
        attempt: u32,
    },
    /// Disposed; nothing will change any more.
    Disposed,
}

/// Tails one file.
///
/// Consumes a search text feed and a scroll request feed, and publishes the
/// visible lines plus total lines, matched lines and file size. The engine
/// runs until [`FileTailer::dispose`] is called or the tailer is dropped; a
/// missing file is a steady state, not an error.
pub struct FileTailer {
    lines: LineCollection,
    total_lines: watch::Receiver<usize>,
    matched_lines: watch::Receiver<usize>,
    file_size: watch::Receiver<u64>,
    counts: watch::Receiver<LineCounts>,
    state: watch::Receiver<TailerState>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl FileTailer {
    /// Tail the file at `path`. The file does not need to exist yet.
    ///
    /// # Errors
    ///
    /// Fails on an invalid path or configuration, or when called outside a
    /// tokio runtime.
    pub fn new(
        path: impl Into<PathBuf>,
        search: watch::Receiver<String>,
        scroll: watch::Receiver<ScrollRequest>,
        config: TailerConfig,
    ) -> Result<Self> {
        let source = LocalFile::new(path)?;
        Self::with_source(Arc::new(source), search, scroll, config)
    }

    /// Tail an arbitrary [`FileSource`].
    ///
    /// # Errors
    ///
    /// Fails on an invalid configuration or when called outside a tokio runtime.
    pub fn with_source(
        source: Arc<dyn FileSource>,
        search: watch::Receiver<String>,
        scroll: watch::Receiver<ScrollRequest>,
        config: TailerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let encoding = config.resolve_encoding()?;
        Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let lines = LineCollection::new();
        let (total_tx, total_lines) = watch::channel(0);
        let (matched_tx, matched_lines) = watch::channel(0);
        let (size_tx, file_size) = watch::channel(0);
        let (counts_tx, counts) = watch::channel(LineCounts::default());
        let (state_tx, state) = watch::channel(TailerState::Initializing);

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let span = info_span!("file_tailer", source = %source.describe());

        let actor = Actor {
            source,
            config,
            encoding,
            search,
            scroll,
            search_closed: false,
            scroll_closed: false,
            generation: SearchGeneration::new(),
            cancel: cancel.clone(),
            out: Outputs {
                lines: lines.clone(),
                total_lines: total_tx,
                matched_lines: matched_tx,
                file_size: size_tx,
                counts: counts_tx,
                state: state_tx,
            },
            published: Vec::new(),
            applied_scroll: None,
        };

        tracker.spawn(actor.run().instrument(span));
        tracker.close();

        Ok(Self {
            lines,
            total_lines,
            matched_lines,
            file_size,
            counts,
            state,
            cancel,
            tracker,
        })
    }

    /// The visible lines.
    #[must_use]
    pub const fn lines(&self) -> &LineCollection {
        &self.lines
    }

    /// Number of complete lines in the file.
    #[must_use]
    pub fn total_lines(&self) -> watch::Receiver<usize> {
        self.total_lines.clone()
    }

    /// Number of lines passing the filter; equals the total when unfiltered.
    #[must_use]
    pub fn matched_lines(&self) -> watch::Receiver<usize> {
        self.matched_lines.clone()
    }

    /// File size in bytes, 0 while the file is missing.
    #[must_use]
    pub fn file_size(&self) -> watch::Receiver<u64> {
        self.file_size.clone()
    }

    /// Total and matched counts together, for summaries.
    #[must_use]
    pub fn line_counts(&self) -> watch::Receiver<LineCounts> {
        self.counts.clone()
    }

    /// Engine lifecycle.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<TailerState> {
        self.state.clone()
    }

    /// Stop the engine and wait until it has released the file.
    pub async fn dispose(&self) {
        self.cancel.cancel();
        self.tracker.wait().await;
    }
}

impl Drop for FileTailer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Outputs {
    lines: LineCollection,
    total_lines: watch::Sender<usize>,
    matched_lines: watch::Sender<usize>,
    file_size: watch::Sender<u64>,
    counts: watch::Sender<LineCounts>,
    state: watch::Sender<TailerState>,
}

/// Work accumulated since the last step.
#[derive(Debug, Default)]
struct Pending {
    tick: bool,
    search: Option<(String, u64)>,
    scroll: bool,
}

impl Pending {
    fn everything() -> Self {
        Self {
            tick: true,
            search: None,
            scroll: true,
        }
    }

    const fn any(&self) -> bool {
        self.tick || self.search.is_some() || self.scroll
    }
}

type StepJoin = std::result::Result<(Pipeline, Result<StepOutput>), JoinError>;

struct Actor {
    source: Arc<dyn FileSource>,
    config: TailerConfig,
    encoding: &'static Encoding,
    search: watch::Receiver<String>,
    scroll: watch::Receiver<ScrollRequest>,
    search_closed: bool,
    scroll_closed: bool,
    generation: SearchGeneration,
    cancel: CancellationToken,
    out: Outputs,
    published: Vec<usize>,
    applied_scroll: Option<ScrollRequest>,
}

impl Actor {
    async fn run(mut self) {
        info!(poll_interval = ?self.config.poll_interval, "tailer started");

        let mut interval = time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut pipeline = self.fresh_pipeline();
        let mut pending = Pending::everything();
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if !pending.any() {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => break,
                    changed = self.search.changed(), if !self.search_closed => {
                        self.on_search(changed.is_ok(), &mut pending);
                    }
                    changed = self.scroll.changed(), if !self.scroll_closed => {
                        self.on_scroll(changed.is_ok(), &mut pending);
                    }
                    _ = interval.tick() => pending.tick = true,
                }
                continue;
            }

            let scroll = *self.scroll.borrow();
            let input = StepInput {
                tick: std::mem::take(&mut pending.tick),
                search: pending.search.take(),
                scroll,
                published: self.published.clone(),
            };
            pending.scroll = false;

            let error = match self.run_step(pipeline, input, &mut pending).await {
                Ok((returned, Ok(output))) => {
                    pipeline = returned;
                    self.publish(output, scroll);
                    attempt = 0;
                    continue;
                }
                Ok((returned, Err(Error::Superseded))) => {
                    debug!("scan superseded by a newer search");
                    pipeline = returned;
                    continue;
                }
                Ok((_, Err(Error::Cancelled))) => break,
                Ok((_, Err(e))) => e,
                Err(e) => Error::TaskJoin(e),
            };

            attempt = attempt.saturating_add(1);
            if !self.back_off(attempt, &error).await {
                break;
            }

            // Upstream state starts over; published lines stay as they are
            pipeline = self.fresh_pipeline();
            pending = Pending::everything();
        }

        self.out.state.send_replace(TailerState::Disposed);
        self.out.lines.close();
        info!("tailer disposed");
    }

    /// Run one step on the blocking pool, collecting search changes while it runs.
    async fn run_step(
        &mut self,
        mut pipeline: Pipeline,
        input: StepInput,
        pending: &mut Pending,
    ) -> StepJoin {
        let mut job = tokio::task::spawn_blocking(move || {
            let output = pipeline.step(input);
            (pipeline, output)
        });

        loop {
            tokio::select! {
                joined = &mut job => return joined,
                changed = self.search.changed(), if !self.search_closed => {
                    self.on_search(changed.is_ok(), pending);
                }
            }
        }
    }

    fn on_search(&mut self, open: bool, pending: &mut Pending) {
        if !open {
            debug!("search feed closed");
            self.search_closed = true;
            return;
        }

        let text = self.search.borrow_and_update().clone();
        let generation = self.generation.advance();
        pending.search = Some((text, generation));
    }

    fn on_scroll(&mut self, open: bool, pending: &mut Pending) {
        if !open {
            debug!("scroll feed closed");
            self.scroll_closed = true;
            return;
        }

        let request = *self.scroll.borrow_and_update();
        if self.applied_scroll != Some(request) {
            pending.scroll = true;
        }
    }

    fn fresh_pipeline(&mut self) -> Pipeline {
        let text = self.search.borrow_and_update().clone();
        Pipeline::new(
            self.source.clone(),
            &self.config,
            self.encoding,
            (text.as_str(), self.generation.current()),
            self.generation.clone(),
            self.cancel.clone(),
        )
    }

    fn publish(&mut self, output: StepOutput, scroll: ScrollRequest) {
        self.applied_scroll = Some(scroll);
        self.published = output.window;

        if !output.delta.is_empty() {
            debug!(
                removed = output.delta.removed.len(),
                added = output.delta.added.len(),
                "publishing delta"
            );
            self.out.lines.apply(output.delta);
        }

        let counts = output.counts;
        set_if_changed(&self.out.total_lines, counts.total);
        set_if_changed(&self.out.matched_lines, counts.visible());
        set_if_changed(&self.out.file_size, output.file_size);
        set_if_changed(&self.out.counts, counts);

        if *self.out.state.borrow() != TailerState::Streaming {
            info!(lines = counts.total, "streaming");
            self.out.state.send_replace(TailerState::Streaming);
        }
    }

    /// Wait before retrying. Returns `false` when disposed meanwhile.
    async fn back_off(&self, attempt: u32, error: &Error) -> bool {
        let delay = self.config.retry_delay(attempt);
        warn!(attempt, delay = ?delay, error = %error, "recomputation failed, retrying");
        self.out.state.send_replace(TailerState::Degraded { attempt });

        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = time::sleep(delay) => true,
        }
    }
}

fn set_if_changed<T: PartialEq>(tx: &watch::Sender<T>, value: T) {
    tx.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    });
}
