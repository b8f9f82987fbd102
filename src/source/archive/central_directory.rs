//! Decoding of the zip end-of-central-directory and central directory records,
//! including their zip64 extensions.

use std::io::{Read, Seek, SeekFrom};

use crate::error::{Result, SourceError};

const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const EOCD_LEN: u64 = 22;
const MAX_COMMENT_LEN: u64 = u16::MAX as u64;

const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
const ZIP64_LOCATOR_LEN: u64 = 20;
const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4b50;
const ZIP64_EOCD_LEN: usize = 56;

const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
const CENTRAL_HEADER_LEN: usize = 46;

const ZIP64_EXTRA_ID: u16 = 0x0001;

const FLAG_ENCRYPTED: u16 = 1;
const FLAG_UTF8_NAME: u16 = 1 << 11;

const HOST_UNIX: u8 = 3;

/// Upper bound on records pre-allocated from an untrusted entry count.
const MAX_PREALLOCATED_RECORDS: u64 = 65_536;

/// A decoded central directory file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralRecord {
    pub name: String,
    pub flags: u16,
    pub method: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub local_header_offset: u64,
    pub permissions: u32,
}

impl CentralRecord {
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }
}

/// Where the central directory lives, as found through the end-of-central-directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DirectoryLocation {
    entries: u64,
    size: u64,
    offset: u64,
}

fn corrupt(msg: impl Into<String>) -> SourceError {
    SourceError::CorruptArchive(msg.into())
}

/// Little-endian cursor over an in-memory slice, failing on truncation instead of panicking.
struct LeReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> LeReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| corrupt("truncated central directory"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(b);
        Ok(u64::from_le_bytes(bytes))
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

fn read_at<R: Read + Seek>(reader: &mut R, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader
        .seek(SeekFrom::Start(offset))
        .and_then(|_| reader.read_exact(&mut buf))
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => corrupt(format!(
                "unexpected end of archive reading {len} bytes at offset {offset}"
            )),
            _ => SourceError::io("<archive>", e),
        })?;
    Ok(buf)
}

/// Scans backwards for the end-of-central-directory record, returning its offset and bytes.
fn find_eocd<R: Read + Seek>(reader: &mut R, file_len: u64) -> Result<(u64, Vec<u8>)> {
    if file_len < EOCD_LEN {
        return Err(corrupt("file too short to be a zip archive"));
    }

    let search_len = file_len.min(EOCD_LEN + MAX_COMMENT_LEN);
    let search_start = file_len - search_len;
    let tail = read_at(reader, search_start, search_len as usize)?;

    let signature = EOCD_SIGNATURE.to_le_bytes();
    let last_candidate = tail.len() - EOCD_LEN as usize;
    for pos in (0..=last_candidate).rev() {
        if tail[pos..pos + 4] != signature {
            continue;
        }
        let comment_len = u16::from_le_bytes([tail[pos + 20], tail[pos + 21]]) as usize;
        // The comment must run exactly to the end of the file.
        if pos + EOCD_LEN as usize + comment_len == tail.len() {
            let record = tail[pos..pos + EOCD_LEN as usize].to_vec();
            return Ok((search_start + pos as u64, record));
        }
    }

    Err(corrupt("end of central directory record not found"))
}

fn read_zip64_location<R: Read + Seek>(reader: &mut R, eocd_offset: u64) -> Result<DirectoryLocation> {
    if eocd_offset < ZIP64_LOCATOR_LEN {
        return Err(corrupt("zip64 end of central directory locator missing"));
    }
    let locator = read_at(
        reader,
        eocd_offset - ZIP64_LOCATOR_LEN,
        ZIP64_LOCATOR_LEN as usize,
    )?;
    let mut r = LeReader::new(&locator);
    if r.u32()? != ZIP64_LOCATOR_SIGNATURE {
        return Err(corrupt("zip64 end of central directory locator missing"));
    }
    let _disk = r.u32()?;
    let record_offset = r.u64()?;

    let record = read_at(reader, record_offset, ZIP64_EOCD_LEN)?;
    let mut r = LeReader::new(&record);
    if r.u32()? != ZIP64_EOCD_SIGNATURE {
        return Err(corrupt("bad zip64 end of central directory signature"));
    }
    let _record_size = r.u64()?;
    let _version_made_by = r.u16()?;
    let _version_needed = r.u16()?;
    let _disk = r.u32()?;
    let _directory_disk = r.u32()?;
    let _entries_on_disk = r.u64()?;
    let entries = r.u64()?;
    let size = r.u64()?;
    let offset = r.u64()?;

    Ok(DirectoryLocation {
        entries,
        size,
        offset,
    })
}

fn read_location<R: Read + Seek>(reader: &mut R, file_len: u64) -> Result<DirectoryLocation> {
    let (eocd_offset, record) = find_eocd(reader, file_len)?;
    let mut r = LeReader::new(&record);
    let _signature = r.u32()?;
    let disk = r.u16()?;
    let directory_disk = r.u16()?;
    let _entries_on_disk = r.u16()?;
    let entries = r.u16()?;
    let size = r.u32()?;
    let offset = r.u32()?;

    let spans_disks = |n: u16| n != 0 && n != u16::MAX;
    if spans_disks(disk) || spans_disks(directory_disk) {
        return Err(corrupt("multi-disk archives are not supported"));
    }

    if entries == u16::MAX || size == u32::MAX || offset == u32::MAX {
        return read_zip64_location(reader, eocd_offset);
    }

    Ok(DirectoryLocation {
        entries: entries as u64,
        size: size as u64,
        offset: offset as u64,
    })
}

/// Replaces 32-bit sentinel values with their zip64 extra field counterparts.
fn apply_zip64_extra(
    extra: &[u8],
    uncompressed_size: &mut u64,
    compressed_size: &mut u64,
    local_header_offset: &mut u64,
) -> Result<()> {
    let mut r = LeReader::new(extra);
    while r.remaining() >= 4 {
        let id = r.u16()?;
        let len = r.u16()? as usize;
        let data = r.take(len)?;
        if id != ZIP64_EXTRA_ID {
            continue;
        }

        let mut field = LeReader::new(data);
        if *uncompressed_size == u32::MAX as u64 {
            *uncompressed_size = field.u64()?;
        }
        if *compressed_size == u32::MAX as u64 {
            *compressed_size = field.u64()?;
        }
        if *local_header_offset == u32::MAX as u64 {
            *local_header_offset = field.u64()?;
        }
        return Ok(());
    }
    Ok(())
}

fn decode_name(raw: &[u8], flags: u16) -> String {
    let name = if flags & FLAG_UTF8_NAME != 0 {
        String::from_utf8_lossy(raw).into_owned()
    } else {
        // Most writers emit UTF-8 without setting the flag; anything else is rare enough
        // to be shown lossily.
        match std::str::from_utf8(raw) {
            Ok(name) => name.to_string(),
            Err(_) => raw.iter().map(|&b| b as char).collect(),
        }
    };
    name.replace('\\', "/")
}

fn read_record(r: &mut LeReader) -> Result<CentralRecord> {
    if r.u32()? != CENTRAL_HEADER_SIGNATURE {
        return Err(corrupt("bad central directory header signature"));
    }
    let _zip_version_made_by = r.u8()?;
    let host = r.u8()?;
    let _version_needed = r.u16()?;
    let flags = r.u16()?;
    let method = r.u16()?;
    let _mod_time = r.u16()?;
    let _mod_date = r.u16()?;
    let crc32 = r.u32()?;
    let mut compressed_size = r.u32()? as u64;
    let mut uncompressed_size = r.u32()? as u64;
    let name_len = r.u16()? as usize;
    let extra_len = r.u16()? as usize;
    let comment_len = r.u16()? as usize;
    let _disk_start = r.u16()?;
    let _internal_attributes = r.u16()?;
    let external_attributes = r.u32()?;
    let mut local_header_offset = r.u32()? as u64;

    let name = decode_name(r.take(name_len)?, flags);
    let extra = r.take(extra_len)?;
    let _comment = r.take(comment_len)?;

    apply_zip64_extra(
        extra,
        &mut uncompressed_size,
        &mut compressed_size,
        &mut local_header_offset,
    )?;

    let permissions = if host == HOST_UNIX {
        external_attributes >> 16
    } else {
        0
    };

    Ok(CentralRecord {
        name,
        flags,
        method,
        crc32,
        compressed_size,
        uncompressed_size,
        local_header_offset,
        permissions,
    })
}

/// Reads every central directory record of the archive behind `reader`.
pub fn read_central_directory<R: Read + Seek>(
    reader: &mut R,
    file_len: u64,
) -> Result<Vec<CentralRecord>> {
    let location = read_location(reader, file_len)?;

    let directory_end = location
        .offset
        .checked_add(location.size)
        .filter(|end| *end <= file_len)
        .ok_or_else(|| corrupt("central directory extends past end of archive"))?;
    let size = usize::try_from(location.size)
        .map_err(|_| corrupt("central directory does not fit in memory"))?;
    let raw = read_at(reader, location.offset, size)?;

    trace!(
        "Central directory at {}..{} declares {} records",
        location.offset,
        directory_end,
        location.entries
    );

    let mut records = Vec::with_capacity(location.entries.min(MAX_PREALLOCATED_RECORDS) as usize);
    let mut r = LeReader::new(&raw);
    for _ in 0..location.entries {
        if r.remaining() < CENTRAL_HEADER_LEN {
            return Err(corrupt(format!(
                "central directory holds {} records, expected {}",
                records.len(),
                location.entries
            )));
        }
        records.push(read_record(&mut r)?);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn push_u16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn push_u64(buf: &mut Vec<u8>, v: u64) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn central_header(name: &str, sizes: u32, offset: u32, extra: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        push_u32(&mut buf, CENTRAL_HEADER_SIGNATURE);
        buf.push(20);
        buf.push(HOST_UNIX);
        push_u16(&mut buf, 20);
        push_u16(&mut buf, FLAG_UTF8_NAME);
        push_u16(&mut buf, 0);
        push_u16(&mut buf, 0);
        push_u16(&mut buf, 0);
        push_u32(&mut buf, 0xdead_beef);
        push_u32(&mut buf, sizes);
        push_u32(&mut buf, sizes);
        push_u16(&mut buf, name.len() as u16);
        push_u16(&mut buf, extra.len() as u16);
        push_u16(&mut buf, 0);
        push_u16(&mut buf, 0);
        push_u16(&mut buf, 0);
        push_u32(&mut buf, 0o100644 << 16);
        push_u32(&mut buf, offset);
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(extra);
        buf
    }

    fn eocd(entries: u16, size: u32, offset: u32, comment: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        push_u32(&mut buf, EOCD_SIGNATURE);
        push_u16(&mut buf, 0);
        push_u16(&mut buf, 0);
        push_u16(&mut buf, entries);
        push_u16(&mut buf, entries);
        push_u32(&mut buf, size);
        push_u32(&mut buf, offset);
        push_u16(&mut buf, comment.len() as u16);
        buf.extend_from_slice(comment);
        buf
    }

    #[test]
    fn reads_plain_directory_with_comment() {
        let mut archive = vec![0u8; 16];
        let directory = [
            central_header("a.txt", 5, 0, &[]),
            central_header("dir/", 0, 8, &[]),
        ]
        .concat();
        let offset = archive.len() as u32;
        archive.extend_from_slice(&directory);
        archive.extend_from_slice(&eocd(2, directory.len() as u32, offset, b"comment"));

        let len = archive.len() as u64;
        let records = read_central_directory(&mut Cursor::new(archive), len).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "a.txt");
        assert_eq!(records[0].uncompressed_size, 5);
        assert_eq!(records[0].crc32, 0xdead_beef);
        assert_eq!(records[0].permissions, 0o100644);
        assert!(!records[0].is_dir());
        assert!(records[1].is_dir());
        assert_eq!(records[1].local_header_offset, 8);
    }

    #[test]
    fn zip64_sizes_and_offsets_override_sentinels() {
        let big = 5 * 1024 * 1024 * 1024u64;
        let mut extra = Vec::new();
        push_u16(&mut extra, ZIP64_EXTRA_ID);
        push_u16(&mut extra, 24);
        push_u64(&mut extra, big);
        push_u64(&mut extra, big + 1);
        push_u64(&mut extra, big + 2);

        let directory = central_header("huge.bin", u32::MAX, u32::MAX, &extra);
        let mut archive = Vec::new();
        let directory_offset = archive.len() as u64;
        archive.extend_from_slice(&directory);

        let zip64_record_offset = archive.len() as u64;
        push_u32(&mut archive, ZIP64_EOCD_SIGNATURE);
        push_u64(&mut archive, (ZIP64_EOCD_LEN - 12) as u64);
        push_u16(&mut archive, 45);
        push_u16(&mut archive, 45);
        push_u32(&mut archive, 0);
        push_u32(&mut archive, 0);
        push_u64(&mut archive, 1);
        push_u64(&mut archive, 1);
        push_u64(&mut archive, directory.len() as u64);
        push_u64(&mut archive, directory_offset);

        push_u32(&mut archive, ZIP64_LOCATOR_SIGNATURE);
        push_u32(&mut archive, 0);
        push_u64(&mut archive, zip64_record_offset);
        push_u32(&mut archive, 1);

        archive.extend_from_slice(&eocd(u16::MAX, u32::MAX, u32::MAX, &[]));

        let len = archive.len() as u64;
        let records = read_central_directory(&mut Cursor::new(archive), len).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].uncompressed_size, big);
        assert_eq!(records[0].compressed_size, big + 1);
        assert_eq!(records[0].local_header_offset, big + 2);
    }

    #[test]
    fn garbage_is_corrupt() {
        let data = vec![7u8; 100];
        let err = read_central_directory(&mut Cursor::new(data), 100).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CorruptArchive);

        let short = vec![0u8; 4];
        let err = read_central_directory(&mut Cursor::new(short), 4).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CorruptArchive);
    }

    #[test]
    fn truncated_directory_is_corrupt() {
        let directory = central_header("a.txt", 5, 0, &[]);
        let mut archive = directory[..20].to_vec();
        // Claims the full header length although only 20 bytes are present.
        archive.extend_from_slice(&eocd(1, 20, 0, &[]));
        let len = archive.len() as u64;
        let err = read_central_directory(&mut Cursor::new(archive), len).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CorruptArchive);
    }
}
