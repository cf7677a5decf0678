//! Visible window selection.

use serde::{Deserialize, Serialize};

use crate::index::LineIndices;
use crate::matcher::LineMatches;

/// How the window is anchored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollMode {
    /// Follow the end of the file.
    #[default]
    Tail,
    /// Stay at `first_line`.
    FixedPosition,
}

/// What the consumer wants to see.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollRequest {
    /// Number of rows in the window.
    pub page_size: usize,
    /// Anchoring mode.
    pub mode: ScrollMode,
    /// 1-based first row in [`ScrollMode::FixedPosition`]; ignored in tail mode.
    pub first_line: usize,
}

impl ScrollRequest {
    /// Follow the tail with `page_size` rows.
    #[must_use]
    pub const fn tail(page_size: usize) -> Self {
        Self {
            page_size,
            mode: ScrollMode::Tail,
            first_line: 0,
        }
    }

    /// Show `page_size` rows starting at `first_line`.
    #[must_use]
    pub const fn fixed(page_size: usize, first_line: usize) -> Self {
        Self {
            page_size,
            mode: ScrollMode::FixedPosition,
            first_line,
        }
    }

    /// Request for a view with an auto-tail toggle.
    #[must_use]
    pub const fn from_auto_tail(auto_tail: bool, page_size: usize, first_line: usize) -> Self {
        if auto_tail {
            Self::tail(page_size)
        } else {
            Self::fixed(page_size, first_line)
        }
    }
}

/// Line numbers that should be visible, ascending.
///
/// Without a filter the rows are the lines `1..=count`; with one they are the
/// matched lines, and `first_line` addresses a row in that sequence. A
/// `first_line` past the end yields the last full page.
#[must_use]
pub fn select(indices: &LineIndices, matches: &LineMatches, scroll: &ScrollRequest) -> Vec<usize> {
    let rows = if matches.is_filtered() {
        matches.lines().len()
    } else {
        indices.count()
    };

    let page = scroll.page_size;
    if page == 0 || rows == 0 {
        return Vec::new();
    }

    let first = match scroll.mode {
        ScrollMode::Tail => rows.saturating_sub(page),
        ScrollMode::FixedPosition => {
            let first = scroll.first_line.max(1) - 1;
            if first >= rows { rows.saturating_sub(page) } else { first }
        }
    };
    let last = first.saturating_add(page).min(rows);

    if matches.is_filtered() {
        matches.lines()[first..last].to_vec()
    } else {
        (first + 1..=last).collect()
    }
}
