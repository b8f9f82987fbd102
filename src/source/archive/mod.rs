mod central_directory;
mod entry_reader;

use std::{
    collections::HashMap,
    fs::File,
    io::{self, BufReader, Read, Seek, SeekFrom},
    ops::Range,
    path::{Path, PathBuf},
};

use flate2::read::DeflateDecoder;

use crate::error::{Result, SourceError};

use self::{
    central_directory::{read_central_directory, CentralRecord},
    entry_reader::EntryReader,
};

use super::{Entry, Locator, VirtualSource};

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATE: u16 = 8;

const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const LOCAL_HEADER_LEN: usize = 30;

const PAYLOAD_BUFFER_SIZE: usize = 64 * 1024;

/// Locator of an archive entry: where its payload starts and how it is encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ArchiveRecord {
    method: u16,
    encrypted: bool,
    crc32: u32,
    compressed_size: u64,
    local_header_offset: u64,
}

/// A zip archive, with its central directory parsed once at open time.
#[derive(Debug)]
pub struct ArchiveSource {
    archive_path: PathBuf,
    archive_len: u64,
    entries: Vec<Entry>,
    by_path: HashMap<String, usize>,
}

impl ArchiveSource {
    pub fn open(archive_path: &Path) -> Result<Self> {
        let display = archive_path.display().to_string();
        let file = File::open(archive_path).map_err(|e| SourceError::io(&display, e))?;
        let archive_len = file
            .metadata()
            .map_err(|e| SourceError::io(&display, e))?
            .len();

        let records = read_central_directory(&mut BufReader::new(file), archive_len)?;
        let mut entries: Vec<Entry> = Vec::with_capacity(records.len());
        let mut by_path = HashMap::with_capacity(records.len());
        for record in records.into_iter().filter(|record| !record.is_dir()) {
            let entry = entry_from_record(record);
            match by_path.get(&entry.path) {
                Some(&i) => {
                    warn!(
                        "Duplicate entry '{}' in '{}', keeping the last one",
                        entry.path, display
                    );
                    entries[i] = entry;
                }
                None => {
                    by_path.insert(entry.path.clone(), entries.len());
                    entries.push(entry);
                }
            }
        }

        debug!("Parsed {} entries from '{}'", entries.len(), display);

        Ok(Self {
            archive_path: archive_path.to_path_buf(),
            archive_len,
            entries,
            by_path,
        })
    }

    /// Offset of the first payload byte, found through the entry's local file header.
    fn payload_offset(&self, file: &mut File, entry: &Entry, record: &ArchiveRecord) -> Result<u64> {
        let mut header = [0u8; LOCAL_HEADER_LEN];
        file.seek(SeekFrom::Start(record.local_header_offset))
            .and_then(|_| file.read_exact(&mut header))
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => SourceError::CorruptArchive(format!(
                    "local header of '{}' is past the end of the archive",
                    entry.path
                )),
                _ => SourceError::io(&entry.path, e),
            })?;

        let signature = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if signature != LOCAL_HEADER_SIGNATURE {
            return Err(SourceError::CorruptArchive(format!(
                "bad local header signature for '{}'",
                entry.path
            )));
        }

        let name_len = u16::from_le_bytes([header[26], header[27]]) as u64;
        let extra_len = u16::from_le_bytes([header[28], header[29]]) as u64;
        let offset = record.local_header_offset + LOCAL_HEADER_LEN as u64 + name_len + extra_len;

        let fits = offset
            .checked_add(record.compressed_size)
            .is_some_and(|end| end <= self.archive_len);
        if !fits {
            return Err(SourceError::CorruptArchive(format!(
                "payload of '{}' extends past the end of the archive",
                entry.path
            )));
        }

        Ok(offset)
    }
}

fn entry_from_record(record: CentralRecord) -> Entry {
    Entry {
        path: record.name.clone(),
        length: record.uncompressed_size,
        permissions: record.permissions,
        locator: Locator::Archive(ArchiveRecord {
            method: record.method,
            encrypted: record.is_encrypted(),
            crc32: record.crc32,
            compressed_size: record.compressed_size,
            local_header_offset: record.local_header_offset,
        }),
    }
}

impl VirtualSource for ArchiveSource {
    fn root(&self) -> &Path {
        &self.archive_path
    }

    fn list_entries(&self) -> Result<Vec<Entry>> {
        Ok(self.entries.clone())
    }

    fn entry(&self, path: &str) -> Result<Entry> {
        self.by_path
            .get(path)
            .map(|&i| self.entries[i].clone())
            .ok_or_else(|| SourceError::NotFound(path.to_string()))
    }

    fn open_range(&self, entry: &Entry, range: Range<u64>) -> Result<Box<dyn Read + Send>> {
        let Locator::Archive(record) = &entry.locator else {
            return Err(SourceError::NotFound(entry.path.clone()));
        };

        // Encrypted entries cannot be decoded either, whatever their method.
        if record.encrypted || !matches!(record.method, METHOD_STORED | METHOD_DEFLATE) {
            return Err(SourceError::UnsupportedCompression {
                path: entry.path.clone(),
                method: record.method,
            });
        }

        let range = entry.clamp(range);
        if range.is_empty() {
            return Ok(Box::new(io::empty()));
        }

        let mut file = File::open(&self.archive_path)
            .map_err(|e| SourceError::io(self.archive_path.display().to_string(), e))?;
        let payload_offset = self.payload_offset(&mut file, entry, record)?;
        let is_whole_entry = range.start == 0 && range.end == entry.length;
        let len = range.end - range.start;

        let reader: Box<dyn Read + Send> = match record.method {
            METHOD_STORED => {
                if record.compressed_size != entry.length {
                    return Err(SourceError::CorruptArchive(format!(
                        "stored entry '{}' has mismatching sizes ({} != {})",
                        entry.path, record.compressed_size, entry.length
                    )));
                }
                file.seek(SeekFrom::Start(payload_offset + range.start))
                    .map_err(|e| SourceError::io(&entry.path, e))?;
                let reader = EntryReader::new(file.take(len), entry.path.clone(), 0, len);
                if is_whole_entry {
                    Box::new(reader.verify_crc32(record.crc32))
                } else {
                    Box::new(reader)
                }
            }
            _ => {
                file.seek(SeekFrom::Start(payload_offset))
                    .map_err(|e| SourceError::io(&entry.path, e))?;
                let payload = BufReader::with_capacity(
                    PAYLOAD_BUFFER_SIZE,
                    file.take(record.compressed_size),
                );
                trace!(
                    "Inflating '{}' from the start to reach offset {}",
                    entry.path,
                    range.start
                );
                let reader = EntryReader::new(
                    DeflateDecoder::new(payload),
                    entry.path.clone(),
                    range.start,
                    len,
                );
                if is_whole_entry {
                    Box::new(reader.verify_crc32(record.crc32))
                } else {
                    Box::new(reader)
                }
            }
        };

        Ok(reader)
    }
}
