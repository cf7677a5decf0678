//! Configuration for a file tailer

use std::time::Duration;

use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Line terminator convention of the tailed file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineTerminator {
    /// Lines end with `\n`.
    #[default]
    Lf,
    /// Lines end with `\r\n`; the `\r` is stripped from line text.
    CrLf,
}

/// Tailer configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TailerConfig {
    /// How often the file is polled for changes.
    #[serde(with = "crate::serde_duration")]
    pub poll_interval: Duration,

    /// Delay before the first retry of a failed recomputation.
    #[serde(with = "crate::serde_duration")]
    pub retry_initial_delay: Duration,

    /// Upper bound for the retry delay.
    #[serde(with = "crate::serde_duration")]
    pub retry_max_delay: Duration,

    /// Factor applied to the retry delay after each consecutive failure.
    pub retry_backoff_multiplier: f64,

    /// Search text shorter than this (after trimming) disables filtering.
    pub min_search_length: usize,

    /// Line terminator used for indexing and text extraction.
    pub line_terminator: LineTerminator,

    /// Encoding label of the file, resolved with the WHATWG encoding rules.
    pub encoding: String,

    /// Maximum number of bytes read from the file in one call.
    pub read_chunk_size: usize,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            retry_backoff_multiplier: 2.0,
            min_search_length: 3,
            line_terminator: LineTerminator::Lf,
            encoding: "utf-8".to_string(),
            read_chunk_size: 64 * 1024,
        }
    }
}

impl TailerConfig {
    /// Smallest permitted retry delay.
    pub const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);

    /// Create a builder starting from the default configuration.
    #[must_use]
    pub fn builder() -> TailerConfigBuilder {
        TailerConfigBuilder::new()
    }

    /// Check that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for out-of-range values, and
    /// [`Error::UnknownEncoding`] / [`Error::UnsupportedEncoding`] when the
    /// encoding cannot be used for line splitting.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "poll_interval must be greater than zero".to_string(),
            ));
        }

        if self.retry_initial_delay < Self::MIN_RETRY_DELAY {
            return Err(Error::InvalidConfig(format!(
                "retry_initial_delay must be at least {:?}",
                Self::MIN_RETRY_DELAY
            )));
        }

        if self.retry_max_delay < self.retry_initial_delay {
            return Err(Error::InvalidConfig(
                "retry_max_delay must not be below retry_initial_delay".to_string(),
            ));
        }

        if !self.retry_backoff_multiplier.is_finite() || self.retry_backoff_multiplier < 1.0 {
            return Err(Error::InvalidConfig(
                "retry_backoff_multiplier must be a finite value of at least 1.0".to_string(),
            ));
        }

        if self.min_search_length == 0 {
            return Err(Error::InvalidConfig(
                "min_search_length must be at least 1".to_string(),
            ));
        }

        if self.read_chunk_size == 0 {
            return Err(Error::InvalidConfig(
                "read_chunk_size must be greater than zero".to_string(),
            ));
        }

        self.resolve_encoding().map(|_| ())
    }

    /// Resolve the configured encoding label.
    ///
    /// # Errors
    ///
    /// Fails when the label is unknown or names an encoding whose line
    /// terminators are not plain ASCII bytes (UTF-16, for example).
    pub fn resolve_encoding(&self) -> Result<&'static Encoding> {
        let encoding = Encoding::for_label(self.encoding.trim().as_bytes())
            .ok_or_else(|| Error::UnknownEncoding(self.encoding.clone()))?;

        if !encoding.is_ascii_compatible() {
            return Err(Error::UnsupportedEncoding(encoding.name()));
        }

        Ok(encoding)
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.retry_backoff_multiplier.powi(exponent);
        let delay = self.retry_initial_delay.as_secs_f64() * factor;

        if !delay.is_finite() || delay >= self.retry_max_delay.as_secs_f64() {
            return self.retry_max_delay;
        }

        Duration::from_secs_f64(delay).max(self.retry_initial_delay)
    }
}

/// Builder for [`TailerConfig`]
#[derive(Debug, Default)]
pub struct TailerConfigBuilder {
    config: TailerConfig,
}

impl TailerConfigBuilder {
    /// Create a builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the poll interval.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the first retry delay.
    #[must_use]
    pub fn retry_initial_delay(mut self, delay: Duration) -> Self {
        self.config.retry_initial_delay = delay;
        self
    }

    /// Set the maximum retry delay.
    #[must_use]
    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.config.retry_max_delay = delay;
        self
    }

    /// Set the retry backoff multiplier.
    #[must_use]
    pub fn retry_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.retry_backoff_multiplier = multiplier;
        self
    }

    /// Set the minimum search length.
    #[must_use]
    pub fn min_search_length(mut self, length: usize) -> Self {
        self.config.min_search_length = length;
        self
    }

    /// Set the line terminator.
    #[must_use]
    pub fn line_terminator(mut self, terminator: LineTerminator) -> Self {
        self.config.line_terminator = terminator;
        self
    }

    /// Set the encoding label.
    #[must_use]
    pub fn encoding(mut self, label: impl Into<String>) -> Self {
        self.config.encoding = label.into();
        self
    }

    /// Set the read chunk size.
    #[must_use]
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> TailerConfig {
        self.config
    }
}
