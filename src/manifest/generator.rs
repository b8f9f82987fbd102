use std::io::Read;

use crate::{
    error::{ErrorKind, Result, SourceError},
    scheduler::Cancellation,
    source::{Entry, VirtualSource},
};

use super::{
    ChunkPlan, ChunkProgress, EntryProgress, Manifest, ManifestEntry, ProgressHooks, CHUNK_SIZE,
};

/// Outcome of re-hashing a source against a previously generated manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub chunks_ok: u64,
    pub chunks_bad: u64,

    /// Entries of the manifest that the source no longer has.
    pub missing: Vec<String>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.chunks_bad == 0 && self.missing.is_empty()
    }
}

/// Hashes every entry of a source into fixed-size chunks.
///
/// Each entry is read through a single forward cursor split by its [`ChunkPlan`], and
/// each chunk through a window of `hash_window_size` bytes, so memory use does not
/// depend on the chunk size.
#[derive(Debug, Clone)]
pub struct ManifestGenerator {
    chunk_size: u64,
    hash_window_size: usize,
}

impl ManifestGenerator {
    pub fn new(hash_window_size: usize) -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            hash_window_size: hash_window_size.max(1),
        }
    }

    #[cfg(any(test, feature = "in-tests"))]
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Blocking. Fails on the first entry that cannot be read, naming its path.
    pub fn generate(
        &self,
        source: &dyn VirtualSource,
        hooks: &ProgressHooks,
        cancel: &Cancellation,
    ) -> Result<Manifest> {
        let entries = source.list_entries()?;
        let total = entries.len();
        debug!(
            "Generating manifest of {} entries in '{}'",
            total,
            source.root().display()
        );

        let mut manifest = Manifest::new();
        for (i, entry) in entries.into_iter().enumerate() {
            cancel.check()?;

            let record = self
                .hash_entry(source, &entry, hooks, cancel)
                .map_err(|e| e.in_entry(&entry.path))?;
            debug!(
                "Hashed '{}' ({} bytes, {} chunks)",
                entry.path,
                entry.length,
                record.chunk_count()
            );

            hooks.entry(EntryProgress {
                path: entry.path.clone(),
                current: i + 1,
                total,
            });
            manifest.insert(entry.path, record);
        }

        Ok(manifest)
    }

    /// Blocking. Only entries the manifest names are read.
    pub fn verify(
        &self,
        source: &dyn VirtualSource,
        manifest: &Manifest,
        cancel: &Cancellation,
    ) -> Result<VerifyReport> {
        let hooks = ProgressHooks::default();
        let mut report = VerifyReport::default();

        for (path, expected) in manifest {
            cancel.check()?;

            let entry = match source.entry(path) {
                Ok(entry) => entry,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    report.missing.push(path.clone());
                    continue;
                }
                Err(e) => return Err(e.in_entry(path)),
            };

            let actual = match self.hash_entry(source, &entry, &hooks, cancel) {
                Ok(actual) => actual,
                Err(e) if e.kind() == ErrorKind::CorruptArchive => {
                    warn!("'{}' is unreadable: {}", path, e);
                    report.chunks_bad += expected.chunk_count() as u64;
                    continue;
                }
                Err(e) => return Err(e.in_entry(path)),
            };

            let matching = expected
                .lengths
                .iter()
                .zip(&expected.checksums)
                .zip(actual.lengths.iter().zip(&actual.checksums))
                .filter(|(e, a)| e == a)
                .count();
            let compared = expected.chunk_count().max(actual.chunk_count());

            report.chunks_ok += matching as u64;
            report.chunks_bad += (compared - matching) as u64;
        }

        Ok(report)
    }

    fn hash_entry(
        &self,
        source: &dyn VirtualSource,
        entry: &Entry,
        hooks: &ProgressHooks,
        cancel: &Cancellation,
    ) -> Result<ManifestEntry> {
        let plan = ChunkPlan::new(entry.length, self.chunk_size);
        let count = plan.chunk_count();
        let mut record = ManifestEntry::with_capacity(count as usize, entry.permissions);

        let mut reader = source.open_range(entry, 0..entry.length)?;
        let mut window = vec![0u8; self.hash_window_size];
        let mut bytes_done = 0;

        for (index, range) in plan.ranges().enumerate() {
            let length = range.end - range.start;
            let checksum = hash_chunk(&mut reader, &entry.path, length, &mut window, cancel)?;
            bytes_done += length;

            trace!(
                "Chunk {}/{} of '{}': {} bytes, {}",
                index + 1,
                count,
                entry.path,
                length,
                checksum
            );
            hooks.chunk(ChunkProgress {
                path: entry.path.clone(),
                index: index as u64,
                count,
                length,
                bytes_done,
                bytes_total: entry.length,
            });

            record.push_chunk(length, checksum);
        }

        Ok(record)
    }
}

fn hash_chunk(
    reader: &mut dyn Read,
    path: &str,
    length: u64,
    window: &mut [u8],
    cancel: &Cancellation,
) -> Result<String> {
    let mut context = md5::Context::new();
    let mut remaining = length;
    while remaining > 0 {
        cancel.check()?;

        let n = (window.len() as u64).min(remaining) as usize;
        reader
            .read_exact(&mut window[..n])
            .map_err(|e| SourceError::io(path, e))?;
        context.consume(&window[..n]);
        remaining -= n as u64;
    }
    Ok(hex::encode(context.compute().0))
}
