//! Human readable line counts.

use std::fmt;

use num_format::{Locale, ToFormattedString};

/// Total and matched line counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LineCounts {
    /// Complete lines in the file.
    pub total: usize,
    /// Lines passing the filter, `None` when no filter is active.
    pub matched: Option<usize>,
}

impl LineCounts {
    /// Counts for an unfiltered view.
    #[must_use]
    pub const fn unfiltered(total: usize) -> Self {
        Self {
            total,
            matched: None,
        }
    }

    /// Counts for a filtered view.
    #[must_use]
    pub const fn filtered(total: usize, matched: usize) -> Self {
        Self {
            total,
            matched: Some(matched),
        }
    }

    /// Number of rows the view can show: the matches, or every line.
    #[must_use]
    pub fn visible(&self) -> usize {
        self.matched.unwrap_or(self.total)
    }
}

impl fmt::Display for LineCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.matched {
            None => write!(f, "File has {} lines", thousands(self.total)),
            Some(matched) => write!(
                f,
                "Showing {} of {} lines",
                thousands(matched),
                thousands(self.total)
            ),
        }
    }
}

fn thousands(value: usize) -> String {
    value.to_formatted_string(&Locale::en)
}
