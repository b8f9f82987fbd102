mod generator;
mod plan;
mod progress;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SourceError};

pub use self::{
    generator::{ManifestGenerator, VerifyReport},
    plan::ChunkPlan,
    progress::{ChunkProgress, EntryProgress, ProgressHooks},
};

/// Size of every chunk but the last of an entry.
///
/// Clients request chunk `i` as `[i * CHUNK_SIZE, min((i + 1) * CHUNK_SIZE, length))`, so
/// changing this breaks every manifest issued before.
pub const CHUNK_SIZE: u64 = 64 * 1024 * 1024;

const CHUNK_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6d1f_4c2a_93b7_4e0d_a5c8_2f61_b9e0_7d34);

/// Identifier of a chunk, derived from its checksum so identical content shares an id.
pub fn chunk_id(checksum: &str) -> String {
    Uuid::new_v5(&CHUNK_ID_NAMESPACE, checksum.as_bytes()).to_string()
}

/// Per-entry chunk record. The three sequences are indexed by chunk number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub lengths: Vec<u64>,
    pub checksums: Vec<String>,
    pub ids: Vec<String>,

    #[serde(default)]
    pub permissions: u32,
}

impl ManifestEntry {
    pub(crate) fn with_capacity(chunks: usize, permissions: u32) -> Self {
        Self {
            lengths: Vec::with_capacity(chunks),
            checksums: Vec::with_capacity(chunks),
            ids: Vec::with_capacity(chunks),
            permissions,
        }
    }

    pub(crate) fn push_chunk(&mut self, length: u64, checksum: String) {
        self.ids.push(chunk_id(&checksum));
        self.checksums.push(checksum);
        self.lengths.push(length);
    }

    pub fn chunk_count(&self) -> usize {
        self.lengths.len()
    }

    pub fn total_length(&self) -> u64 {
        self.lengths.iter().sum()
    }

    fn is_consistent(&self) -> bool {
        self.lengths.len() == self.checksums.len() && self.lengths.len() == self.ids.len()
    }
}

/// Chunk records of every entry of a source, keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, path: String, entry: ManifestEntry) {
        self.entries.insert(path, entry);
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(ManifestEntry::total_length).sum()
    }

    pub fn total_chunks(&self) -> usize {
        self.entries.values().map(ManifestEntry::chunk_count).sum()
    }

    pub fn to_json(&self, pretty: bool) -> Result<String> {
        let json = if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        };
        json.map_err(|e| SourceError::Io {
            path: "<manifest>".to_string(),
            source: e.into(),
        })
    }

    /// Parses a serialized manifest, rejecting entries whose sequences differ in length.
    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(json).map_err(|e| SourceError::Io {
            path: "<manifest>".to_string(),
            source: e.into(),
        })?;

        if let Some((path, _)) = manifest.iter().find(|(_, entry)| !entry.is_consistent()) {
            return Err(SourceError::Io {
                path: path.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "manifest entry has sequences of different lengths",
                ),
            });
        }

        Ok(manifest)
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = (&'a String, &'a ManifestEntry);
    type IntoIter = std::collections::btree_map::Iter<'a, String, ManifestEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
