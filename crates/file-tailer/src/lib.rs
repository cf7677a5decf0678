//! Live file tailing with incremental indexing, substring filtering and a
//! scrollable window of visible lines.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod config;
mod error;
mod index;
mod lines;
mod matcher;
mod monitor;
mod pipeline;
mod reader;
mod serde_duration;
mod source;
mod summary;
mod tailer;
mod window;

pub use config::{LineTerminator, TailerConfig, TailerConfigBuilder};
pub use error::{Error, Result};
pub use index::{IndexChange, LineIndex, LineIndexer, LineIndices};
pub use lines::{Line, LineCollection, LineDelta, LineSubscription};
pub use matcher::{LineMatcher, LineMatches, MatchChange, SearchGeneration};
pub use monitor::{FileMonitor, FileNotification, FileState};
pub use reader::{LineReader, read_lines};
pub use source::{FileSource, LocalFile, MemoryFile};
pub use summary::LineCounts;
pub use tailer::{FileTailer, TailerState};
pub use window::{ScrollMode, ScrollRequest, select};
