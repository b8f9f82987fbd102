use std::{
    io::Write,
    path::{Path, PathBuf},
};

use color_eyre::Result;
use depot::{config::EngineConfig, engine::Engine};
use flate2::{write::DeflateEncoder, Compression};
use pretty_env_logger::formatted_timed_builder;
use rand::{thread_rng, RngCore};
use tempfile::TempDir;

const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
const EOCD_SIGNATURE: u32 = 0x0605_4b50;

const VERSION: u16 = 20;
const HOST_UNIX: u16 = 3;
const FLAG_ENCRYPTED: u16 = 1;
const FLAG_UTF8_NAME: u16 = 1 << 11;

#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Stored,
    Deflate,
    /// Payload is written as is, under the given method id.
    Raw(u16),
}

impl Method {
    fn id(self) -> u16 {
        match self {
            Method::Stored => 0,
            Method::Deflate => 8,
            Method::Raw(id) => id,
        }
    }
}

#[derive(Debug, Clone)]
struct ZipEntry {
    name: String,
    data: Vec<u8>,
    method: Method,
    mode: u32,
    encrypted: bool,
}

/// Writes small zip archives for tests, one local header per entry followed by the central
/// directory.
#[derive(Debug, Default)]
pub struct ZipBuilder {
    entries: Vec<ZipEntry>,
}

#[allow(dead_code)]
impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.entry(name, data, Method::Stored, 0o100644)
    }

    pub fn deflated(self, name: &str, data: &[u8]) -> Self {
        self.entry(name, data, Method::Deflate, 0o100644)
    }

    pub fn directory(self, name: &str) -> Self {
        self.entry(name, b"", Method::Stored, 0o040755)
    }

    pub fn entry(mut self, name: &str, data: &[u8], method: Method, mode: u32) -> Self {
        self.entries.push(ZipEntry {
            name: name.to_string(),
            data: data.to_vec(),
            method,
            mode,
            encrypted: false,
        });
        self
    }

    pub fn encrypted(mut self, name: &str, data: &[u8]) -> Self {
        self.entries.push(ZipEntry {
            name: name.to_string(),
            data: data.to_vec(),
            method: Method::Stored,
            mode: 0o100644,
            encrypted: true,
        });
        self
    }

    pub fn build(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut central = Vec::new();

        for entry in &self.entries {
            let payload = match entry.method {
                Method::Deflate => {
                    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                    encoder.write_all(&entry.data)?;
                    encoder.finish()?
                }
                Method::Stored | Method::Raw(_) => entry.data.clone(),
            };
            let crc = crc32(&entry.data);
            let flags = FLAG_UTF8_NAME | if entry.encrypted { FLAG_ENCRYPTED } else { 0 };
            let offset = out.len() as u32;
            let name = entry.name.as_bytes();

            put_u32(&mut out, LOCAL_HEADER_SIGNATURE);
            put_u16(&mut out, VERSION);
            put_u16(&mut out, flags);
            put_u16(&mut out, entry.method.id());
            put_u16(&mut out, 0); // mod time
            put_u16(&mut out, 0x21); // mod date, 1980-01-01
            put_u32(&mut out, crc);
            put_u32(&mut out, payload.len() as u32);
            put_u32(&mut out, entry.data.len() as u32);
            put_u16(&mut out, name.len() as u16);
            put_u16(&mut out, 0);
            out.extend_from_slice(name);
            out.extend_from_slice(&payload);

            put_u32(&mut central, CENTRAL_HEADER_SIGNATURE);
            put_u16(&mut central, (HOST_UNIX << 8) | VERSION);
            put_u16(&mut central, VERSION);
            put_u16(&mut central, flags);
            put_u16(&mut central, entry.method.id());
            put_u16(&mut central, 0);
            put_u16(&mut central, 0x21);
            put_u32(&mut central, crc);
            put_u32(&mut central, payload.len() as u32);
            put_u32(&mut central, entry.data.len() as u32);
            put_u16(&mut central, name.len() as u16);
            put_u16(&mut central, 0); // extra
            put_u16(&mut central, 0); // comment
            put_u16(&mut central, 0); // disk
            put_u16(&mut central, 0); // internal attributes
            put_u32(&mut central, entry.mode << 16);
            put_u32(&mut central, offset);
            central.extend_from_slice(name);
        }

        let central_offset = out.len() as u32;
        out.extend_from_slice(&central);

        put_u32(&mut out, EOCD_SIGNATURE);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        put_u16(&mut out, self.entries.len() as u16);
        put_u16(&mut out, self.entries.len() as u16);
        put_u32(&mut out, central.len() as u32);
        put_u32(&mut out, central_offset);
        put_u16(&mut out, 0);

        Ok(out)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.build()?)?;
        Ok(())
    }
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[allow(dead_code)]
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

#[allow(dead_code)]
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    thread_rng().fill_bytes(&mut data);
    data
}

/// Writes `files` under a fresh temporary directory, creating parent directories.
#[allow(dead_code)]
pub fn write_tree(files: &[(&str, &[u8])]) -> Result<TempDir> {
    let dir = TempDir::new()?;
    for (name, content) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
    }
    Ok(dir)
}

#[allow(dead_code)]
pub fn write_zip(dir: &TempDir, name: &str, builder: &ZipBuilder) -> Result<PathBuf> {
    let path = dir.path().join(name);
    builder.write_to(&path)?;
    Ok(path)
}

#[allow(dead_code)]
pub fn test_engine() -> Result<Engine> {
    Ok(Engine::new(EngineConfig {
        worker_threads: 4,
        stream_buffer_size: 1024,
        stream_queue_depth: 2,
        hash_window_size: 4096,
    })?)
}

#[allow(dead_code)]
pub fn test_init() {
    color_eyre::install().unwrap();

    let mut log_builder = formatted_timed_builder();
    log_builder.parse_filters("depot=trace");
    log_builder.try_init().unwrap();
}
