use std::io::{self, Read};

use crc32fast::Hasher;

use crate::error::SourceError;

const SKIP_WINDOW: u64 = 64 * 1024;

/// Yields one logical range of an archive entry out of its (possibly compressed) payload.
///
/// Compressed payloads cannot be seeked, so bytes before the range start are decoded and
/// dropped, one window per `read` call. Every `read` that only skipped returns
/// `ErrorKind::Interrupted`, letting the caller give up between windows. The checksum is
/// only verified when the range spans the whole entry.
pub(crate) struct EntryReader<R> {
    inner: R,
    path: String,
    to_skip: u64,
    remaining: u64,
    checksum: Option<(Hasher, u32)>,
}

impl<R: Read> EntryReader<R> {
    pub(crate) fn new(inner: R, path: String, to_skip: u64, len: u64) -> Self {
        Self {
            inner,
            path,
            to_skip,
            remaining: len,
            checksum: None,
        }
    }

    pub(crate) fn verify_crc32(mut self, expected: u32) -> Self {
        self.checksum = Some((Hasher::new(), expected));
        self
    }

    fn corrupt(&self, msg: String) -> io::Error {
        SourceError::CorruptArchive(format!("'{}': {msg}", self.path)).into_io()
    }

    fn translate(&self, e: io::Error) -> io::Error {
        match e.kind() {
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                self.corrupt(e.to_string())
            }
            _ => e,
        }
    }

    fn skip_window(&mut self) -> io::Result<()> {
        let wanted = self.to_skip.min(SKIP_WINDOW);
        let copied = io::copy(&mut self.inner.by_ref().take(wanted), &mut io::sink());
        let skipped = copied.map_err(|e| self.translate(e))?;
        if skipped < wanted {
            return Err(self.corrupt(format!(
                "payload ended with {} bytes left to skip",
                self.to_skip - skipped
            )));
        }
        self.to_skip -= skipped;
        Ok(())
    }

    fn finish_checksum(&mut self) -> io::Result<()> {
        let Some((hasher, expected)) = self.checksum.take() else {
            return Ok(());
        };
        let actual = hasher.finalize();
        if actual != expected {
            return Err(self.corrupt(format!(
                "crc32 mismatch, expected {expected:08x} got {actual:08x}"
            )));
        }
        Ok(())
    }
}

impl<R: Read> Read for EntryReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.to_skip > 0 {
            self.skip_window()?;
            if self.to_skip > 0 {
                return Err(io::ErrorKind::Interrupted.into());
            }
        }

        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let max = (buf.len() as u64).min(self.remaining) as usize;
        let n = self
            .inner
            .read(&mut buf[..max])
            .map_err(|e| self.translate(e))?;
        if n == 0 {
            return Err(self.corrupt(format!(
                "payload ended with {} bytes still expected",
                self.remaining
            )));
        }

        self.remaining -= n as u64;
        if let Some((hasher, _)) = self.checksum.as_mut() {
            hasher.update(&buf[..n]);
        }
        if self.remaining == 0 {
            self.finish_checksum()?;
        }

        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use flate2::{read::DeflateDecoder, write::DeflateEncoder, Compression};

    use super::*;
    use crate::error::ErrorKind;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn crc(data: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    fn read_all<R: Read>(mut reader: R) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn skips_into_compressed_payload() {
        let data = (0..50_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        let compressed = deflate(&data);

        let reader = EntryReader::new(
            DeflateDecoder::new(Cursor::new(compressed)),
            "x".to_string(),
            40_000,
            5_000,
        );
        assert_eq!(read_all(reader).unwrap(), &data[40_000..45_000]);
    }

    #[test]
    fn skipping_yields_between_windows() {
        let data = (0..300_000u32).map(|i| (i % 253) as u8).collect::<Vec<_>>();
        let mut reader = EntryReader::new(
            DeflateDecoder::new(Cursor::new(deflate(&data))),
            "x".to_string(),
            250_000,
            10,
        );

        let mut buf = [0u8; 10];
        let mut interruptions = 0;
        let n = loop {
            match reader.read(&mut buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => interruptions += 1,
                other => break other.unwrap(),
            }
        };
        assert_eq!(interruptions, 250_000 / SKIP_WINDOW as usize);
        assert_eq!(&buf[..n], &data[250_000..250_000 + n]);
    }

    #[test]
    fn full_read_checks_crc() {
        let data = b"some entry content".to_vec();
        let good = EntryReader::new(Cursor::new(data.clone()), "x".to_string(), 0, data.len() as u64)
            .verify_crc32(crc(&data));
        assert_eq!(read_all(good).unwrap(), data);

        let bad = EntryReader::new(Cursor::new(data.clone()), "x".to_string(), 0, data.len() as u64)
            .verify_crc32(crc(&data) ^ 1);
        let err = SourceError::io("x", read_all(bad).unwrap_err());
        assert_eq!(err.kind(), ErrorKind::CorruptArchive);
    }

    #[test]
    fn short_payload_is_corrupt() {
        let reader = EntryReader::new(Cursor::new(vec![1u8; 10]), "x".to_string(), 4, 10);
        let err = SourceError::io("x", read_all(reader).unwrap_err());
        assert_eq!(err.kind(), ErrorKind::CorruptArchive);

        let reader = EntryReader::new(Cursor::new(vec![1u8; 10]), "x".to_string(), 20, 1);
        let err = SourceError::io("x", read_all(reader).unwrap_err());
        assert_eq!(err.kind(), ErrorKind::CorruptArchive);
    }

    #[test]
    fn garbage_deflate_stream_is_corrupt() {
        let reader = EntryReader::new(
            DeflateDecoder::new(Cursor::new(vec![0xffu8; 64])),
            "x".to_string(),
            0,
            1000,
        );
        let err = SourceError::io("x", read_all(reader).unwrap_err());
        assert_eq!(err.kind(), ErrorKind::CorruptArchive);
    }
}
