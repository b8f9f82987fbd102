use std::{
    fs::{File, Metadata},
    io::{Read, Seek, SeekFrom},
    ops::Range,
    path::{Component, Path, PathBuf},
};

use walkdir::WalkDir;

use crate::error::{Result, SourceError};

use super::{Entry, Locator, VirtualSource};

#[cfg(unix)]
fn permissions_of(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn permissions_of(_metadata: &Metadata) -> u32 {
    0
}

/// Joins the components of `relative` with '/', whatever the platform separator is.
fn to_slash_path(relative: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    Some(parts.join("/"))
}

#[derive(Debug)]
pub struct DirectorySource {
    base_dir: PathBuf,
}

impl DirectorySource {
    pub fn open(base_dir: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(base_dir)
            .map_err(|e| SourceError::io(base_dir.display().to_string(), e))?;
        if !metadata.is_dir() {
            return Err(SourceError::NotFound(base_dir.display().to_string()));
        }
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
        })
    }

    fn entry_from_metadata(&self, path: String, full_path: PathBuf, metadata: &Metadata) -> Entry {
        Entry {
            path,
            length: metadata.len(),
            permissions: permissions_of(metadata),
            locator: Locator::File(full_path),
        }
    }

    /// Resolves a relative entry path, refusing anything that leaves the root.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let is_plain = !path.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !is_plain {
            return Err(SourceError::NotFound(path.to_string()));
        }
        Ok(self.base_dir.join(relative))
    }
}

impl VirtualSource for DirectorySource {
    fn root(&self) -> &Path {
        &self.base_dir
    }

    fn list_entries(&self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();

        let walker = WalkDir::new(&self.base_dir)
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name();

        for dir_entry in walker {
            let dir_entry = dir_entry.map_err(|e| {
                let path = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| self.base_dir.display().to_string());
                SourceError::io(path, e.into())
            })?;

            if !dir_entry.file_type().is_file() {
                continue;
            }

            let full_path = dir_entry.path();
            let relative = full_path
                .strip_prefix(&self.base_dir)
                .ok()
                .and_then(to_slash_path)
                .ok_or_else(|| SourceError::Io {
                    path: full_path.display().to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "path is not valid UTF-8",
                    ),
                })?;

            let metadata = dir_entry
                .metadata()
                .map_err(|e| SourceError::io(relative.clone(), e.into()))?;
            entries.push(self.entry_from_metadata(relative, full_path.to_path_buf(), &metadata));
        }

        debug!(
            "Listed {} files under '{}'",
            entries.len(),
            self.base_dir.display()
        );
        Ok(entries)
    }

    fn entry(&self, path: &str) -> Result<Entry> {
        let full_path = self.resolve(path)?;
        let metadata = std::fs::metadata(&full_path).map_err(|e| SourceError::io(path, e))?;
        if !metadata.is_file() {
            return Err(SourceError::NotFound(path.to_string()));
        }
        Ok(self.entry_from_metadata(path.to_string(), full_path, &metadata))
    }

    fn open_range(&self, entry: &Entry, range: Range<u64>) -> Result<Box<dyn Read + Send>> {
        let Locator::File(full_path) = &entry.locator else {
            return Err(SourceError::NotFound(entry.path.clone()));
        };

        let range = entry.clamp(range);
        let mut file = File::open(full_path).map_err(|e| SourceError::io(&entry.path, e))?;
        if range.start != 0 {
            file.seek(SeekFrom::Start(range.start))
                .map_err(|e| SourceError::io(&entry.path, e))?;
        }

        Ok(Box::new(file.take(range.end - range.start)))
    }
}
