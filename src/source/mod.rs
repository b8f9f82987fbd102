pub mod archive;
pub mod directory;

use std::{
    io::Read,
    ops::Range,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::error::{Result, SourceError};

pub use self::{archive::ArchiveSource, directory::DirectorySource};

const ZIP_EXTENSION: &str = "zip";

/// Where the bytes of an entry live. Only meaningful to the source that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Locator {
    File(PathBuf),
    Archive(archive::ArchiveRecord),
}

/// One logical file inside a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Slash-separated path relative to the source root.
    pub path: String,

    /// Logical (decompressed) length in bytes.
    pub length: u64,

    /// Unix permission bits, 0 when the source does not record any.
    pub permissions: u32,

    pub(crate) locator: Locator,
}

impl Entry {
    /// Clamps `range` to this entry, treating `start >= length` as empty.
    pub(crate) fn clamp(&self, range: Range<u64>) -> Range<u64> {
        let end = range.end.min(self.length);
        let start = range.start.min(end);
        start..end
    }
}

/// A read-only view over a directory tree or an archive.
///
/// Implementations are immutable once opened, so they are shared freely between threads.
/// Every method blocks, and is expected to run on a [`crate::scheduler::Scheduler`].
pub trait VirtualSource: Send + Sync + std::fmt::Debug {
    /// The path this source was opened from.
    fn root(&self) -> &Path;

    /// All file entries, in a deterministic order. Directories are never listed.
    fn list_entries(&self) -> Result<Vec<Entry>>;

    /// Looks up a single entry by its relative path.
    fn entry(&self, path: &str) -> Result<Entry>;

    /// Opens a cursor over `range` of the entry's logical content.
    ///
    /// `range.end` is clamped to the entry length, and a range starting at or past the
    /// end yields an empty reader. Readers of compressed entries return
    /// `io::ErrorKind::Interrupted` while decoding their way to the range start.
    fn open_range(&self, entry: &Entry, range: Range<u64>) -> Result<Box<dyn Read + Send>>;
}

fn has_zip_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(ZIP_EXTENSION))
}

/// Whether [`open_source`] knows how to open `path`.
pub fn has_source_for_path(path: &Path) -> bool {
    if path.is_dir() {
        return true;
    }
    path.is_file() && has_zip_extension(path)
}

/// Opens a directory or zip archive. Blocking: parses the archive index up front.
pub fn open_source(path: &Path) -> Result<Arc<dyn VirtualSource>> {
    if path.is_dir() {
        debug!("Opening directory source '{}'", path.display());
        return Ok(Arc::new(DirectorySource::open(path)?));
    }

    if path.is_file() && has_zip_extension(path) {
        debug!("Opening archive source '{}'", path.display());
        return Ok(Arc::new(ArchiveSource::open(path)?));
    }

    Err(SourceError::NotFound(path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn probing_recognizes_directories_and_zips() -> Result<()> {
        let dir = TempDir::new().map_err(|e| SourceError::io("tempdir", e))?;
        let zip_path = dir.path().join("Game.ZIP");
        let txt_path = dir.path().join("notes.txt");
        std::fs::write(&zip_path, b"").map_err(|e| SourceError::io("zip", e))?;
        std::fs::write(&txt_path, b"hello").map_err(|e| SourceError::io("txt", e))?;

        assert!(has_source_for_path(dir.path()));
        assert!(has_source_for_path(&zip_path));
        assert!(!has_source_for_path(&txt_path));
        assert!(!has_source_for_path(&dir.path().join("missing")));

        let err = open_source(&txt_path).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
        Ok(())
    }

    #[test]
    fn clamp_handles_out_of_range_starts() {
        let entry = Entry {
            path: "a".to_string(),
            length: 10,
            permissions: 0,
            locator: Locator::File(PathBuf::from("a")),
        };
        assert_eq!(entry.clamp(2..5), 2..5);
        assert_eq!(entry.clamp(2..50), 2..10);
        assert_eq!(entry.clamp(10..50), 10..10);
        assert_eq!(entry.clamp(20..50), 10..10);
    }
}
