//! Reading line text by byte range.

use std::sync::Arc;

use encoding_rs::{Encoding, UTF_8};

use crate::config::LineTerminator;
use crate::error::{Error, Result};
use crate::index::{LineIndex, LineIndices};
use crate::lines::Line;
use crate::source::FileSource;

/// Reads and decodes indexed lines.
///
/// Lines that sit next to each other in the file are fetched with a single
/// read, up to the configured chunk size.
#[derive(Clone)]
pub struct LineReader {
    source: Arc<dyn FileSource>,
    encoding: &'static Encoding,
    terminator: LineTerminator,
    chunk_size: usize,
}

impl LineReader {
    /// Create a reader over `source`.
    #[must_use]
    pub fn new(
        source: Arc<dyn FileSource>,
        encoding: &'static Encoding,
        terminator: LineTerminator,
        chunk_size: usize,
    ) -> Self {
        Self {
            source,
            encoding,
            terminator,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Decode the raw bytes of one line, dropping a trailing `\r` for CRLF files.
    #[must_use]
    pub fn decode(&self, bytes: &[u8]) -> String {
        let bytes = match self.terminator {
            LineTerminator::CrLf => bytes.strip_suffix(b"\r").unwrap_or(bytes),
            LineTerminator::Lf => bytes,
        };

        self.encoding
            .decode_without_bom_handling(bytes)
            .0
            .into_owned()
    }

    /// Visit the text of each entry in order. Entries must be sorted by line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when a read fails, or whatever `visit` returns.
    pub fn scan<F>(&self, entries: &[LineIndex], mut visit: F) -> Result<()>
    where
        F: FnMut(&LineIndex, String) -> Result<()>,
    {
        let mut rest = entries;

        while let Some(first) = rest.first() {
            let run = self.run_length(rest);
            let (batch, tail) = rest.split_at(run);
            rest = tail;

            let last = &batch[run - 1];
            let len = usize::try_from(last.end() - first.start)
                .map_err(|e| Error::Io("line range too large", std::io::Error::other(e)))?;
            let bytes = self
                .source
                .read_at(first.start, len)
                .map_err(|e| Error::Io("failed to read lines", e))?;

            for entry in batch {
                let from = usize::try_from(entry.start - first.start).unwrap_or(usize::MAX);
                let text = bytes
                    .get(from..from.saturating_add(entry.length))
                    .map(|raw| self.decode(raw))
                    .unwrap_or_default();
                visit(entry, text)?;
            }
        }

        Ok(())
    }

    /// Read the text of each entry. Entries must be sorted by line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when a read fails.
    pub fn read(&self, entries: &[LineIndex]) -> Result<Vec<String>> {
        let mut texts = Vec::with_capacity(entries.len());
        self.scan(entries, |_, text| {
            texts.push(text);
            Ok(())
        })?;
        Ok(texts)
    }

    /// Read lines by number, skipping numbers that are not in `indices`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when a read fails.
    pub fn read_lines(&self, indices: &LineIndices, numbers: &[usize]) -> Result<Vec<Line>> {
        let mut entries: Vec<LineIndex> = numbers
            .iter()
            .filter_map(|&number| indices.get(number).copied())
            .collect();
        entries.sort_unstable_by_key(|entry| entry.line);
        entries.dedup_by_key(|entry| entry.line);

        let mut lines = Vec::with_capacity(entries.len());
        self.scan(&entries, |entry, text| {
            lines.push(Line::new(entry.line, text, None));
            Ok(())
        })?;
        Ok(lines)
    }

    /// How many leading entries can be served by one read.
    fn run_length(&self, entries: &[LineIndex]) -> usize {
        let Some(first) = entries.first() else {
            return 0;
        };

        let mut run = 1;
        for pair in entries.windows(2) {
            let adjacent = pair[1].start == pair[0].end() + 1;
            let within_chunk = pair[1].end() - first.start <= self.chunk_size as u64;
            if !adjacent || !within_chunk {
                break;
            }
            run += 1;
        }
        run
    }
}

/// Read lines by number from a UTF-8, `\n` terminated source.
///
/// Numbers beyond the index are skipped.
///
/// # Errors
///
/// Returns [`Error::Io`] when a read fails.
pub fn read_lines(
    source: Arc<dyn FileSource>,
    indices: &LineIndices,
    numbers: &[usize],
) -> Result<Vec<Line>> {
    LineReader::new(source, UTF_8, LineTerminator::Lf, 64 * 1024).read_lines(indices, numbers)
}
