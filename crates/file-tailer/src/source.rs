//! File access abstraction: stat plus random-access reads.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::monitor::FileState;

/// Something that can be tailed.
///
/// Implementations must be cheap to call repeatedly; the tailer stats the
/// source on every tick and reads line ranges on demand. Both calls run on
/// tokio's blocking pool.
pub trait FileSource: Send + Sync + 'static {
    /// Current existence, size and modification time.
    ///
    /// A missing file is `Ok(FileState::missing())`, not an error.
    ///
    /// # Errors
    ///
    /// Any other failure to query the file.
    fn stat(&self) -> io::Result<FileState>;

    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened or is shorter than
    /// `offset + len` (it was truncated or replaced mid-read).
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>>;

    /// Short human readable name used in log output.
    fn describe(&self) -> String {
        "unnamed source".to_string()
    }
}

/// A file on the local filesystem.
///
/// The file is opened per read and never held open between ticks, so it can
/// be rotated, deleted or recreated freely.
#[derive(Clone, Debug)]
pub struct LocalFile {
    path: PathBuf,
}

impl LocalFile {
    /// Create a source for `path`. The file does not need to exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] when the path is empty or names a directory.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if path.as_os_str().is_empty() {
            return Err(Error::InvalidPath {
                path,
                reason: "path is empty",
            });
        }

        if path.is_dir() {
            return Err(Error::InvalidPath {
                path,
                reason: "path is a directory",
            });
        }

        Ok(Self { path })
    }

    /// The tailed path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileSource for LocalFile {
    fn stat(&self) -> io::Result<FileState> {
        match std::fs::metadata(&self.path) {
            Ok(metadata) if metadata.is_file() => Ok(FileState::present(
                metadata.len(),
                metadata.modified().ok(),
            )),
            Ok(_) => Ok(FileState::missing()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(FileState::missing()),
            Err(e) => Err(e),
        }
    }

    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;

        let mut buf = vec![0; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Debug, Default)]
struct MemoryFileState {
    contents: Option<Vec<u8>>,
    version: u64,
    failing_stats: usize,
    failing_reads: usize,
}

/// An in-memory file, for embedding and tests.
///
/// Supports appending, truncating, deleting and recreating the content, and
/// injecting transient failures into the next stats or reads.
#[derive(Debug)]
pub struct MemoryFile {
    state: Mutex<MemoryFileState>,
    reads: AtomicUsize,
}

impl Default for MemoryFile {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFile {
    /// An existing, empty file.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryFileState {
                contents: Some(Vec::new()),
                ..MemoryFileState::default()
            }),
            reads: AtomicUsize::new(0),
        }
    }

    /// A file that does not exist yet.
    #[must_use]
    pub fn missing() -> Self {
        Self {
            state: Mutex::new(MemoryFileState::default()),
            reads: AtomicUsize::new(0),
        }
    }

    /// Append bytes, creating the file if it is missing.
    pub fn append(&self, bytes: &[u8]) {
        let mut state = self.state.lock();
        state.contents.get_or_insert_with(Vec::new).extend_from_slice(bytes);
        state.version += 1;
    }

    /// Replace the whole content, creating the file if it is missing.
    pub fn replace(&self, bytes: &[u8]) {
        let mut state = self.state.lock();
        state.contents = Some(bytes.to_vec());
        state.version += 1;
    }

    /// Truncate to `len` bytes.
    pub fn truncate(&self, len: usize) {
        let mut state = self.state.lock();
        if let Some(contents) = state.contents.as_mut() {
            contents.truncate(len);
        }
        state.version += 1;
    }

    /// Delete the file.
    pub fn remove(&self) {
        let mut state = self.state.lock();
        state.contents = None;
        state.version += 1;
    }

    /// Make the next `count` stats fail.
    pub fn fail_next_stats(&self, count: usize) {
        self.state.lock().failing_stats = count;
    }

    /// Make the next `count` reads fail.
    pub fn fail_next_reads(&self, count: usize) {
        self.state.lock().failing_reads = count;
    }

    /// Number of `read_at` calls served so far, failed ones included.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl FileSource for MemoryFile {
    fn stat(&self) -> io::Result<FileState> {
        let mut state = self.state.lock();

        if state.failing_stats > 0 {
            state.failing_stats -= 1;
            return Err(io::Error::other("injected stat failure"));
        }

        Ok(match &state.contents {
            Some(contents) => FileState::present(
                contents.len() as u64,
                Some(SystemTime::UNIX_EPOCH + Duration::from_nanos(state.version)),
            ),
            None => FileState::missing(),
        })
    }

    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();

        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(io::Error::other("injected read failure"));
        }

        let contents = state
            .contents
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;

        let start = usize::try_from(offset).map_err(io::Error::other)?;
        contents
            .get(start..start.saturating_add(len))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_local_file_rejects_empty_and_directory_paths() {
        assert!(matches!(
            LocalFile::new(""),
            Err(Error::InvalidPath { .. })
        ));

        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            LocalFile::new(temp_dir.path()),
            Err(Error::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_local_file_stat_and_read() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");
        let source = LocalFile::new(&path)?;

        assert_eq!(source.stat().unwrap(), FileState::missing());

        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "first\nsecond\n").unwrap();
        file.flush().unwrap();

        let state = source.stat().unwrap();
        assert!(state.exists);
        assert_eq!(state.size, 13);
        assert_eq!(source.read_at(6, 6).unwrap(), b"second");

        // Reading past the end is an error, not a short read
        assert_eq!(
            source.read_at(10, 10).unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );

        Ok(())
    }

    #[test]
    fn test_memory_file_lifecycle() {
        let file = MemoryFile::missing();
        assert!(!file.stat().unwrap().exists);

        file.append(b"abc\n");
        assert_eq!(file.stat().unwrap().size, 4);
        assert_eq!(file.read_at(0, 3).unwrap(), b"abc");

        file.truncate(0);
        assert_eq!(file.stat().unwrap().size, 0);

        file.remove();
        assert!(!file.stat().unwrap().exists);
        assert_eq!(file.read_count(), 1);
    }
}
