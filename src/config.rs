use std::{path::Path, str::FromStr};

use color_eyre::eyre::{bail, Result};
use serde::{Deserialize, Serialize};
use tokio::fs::read_to_string;

const DEFAULT_STREAM_BUFFER_SIZE: usize = 64 * 1024;
const DEFAULT_STREAM_QUEUE_DEPTH: usize = 4;
const DEFAULT_HASH_WINDOW_SIZE: usize = 1024 * 1024;

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_stream_buffer_size() -> usize {
    DEFAULT_STREAM_BUFFER_SIZE
}

fn default_stream_queue_depth() -> usize {
    DEFAULT_STREAM_QUEUE_DEPTH
}

fn default_hash_window_size() -> usize {
    DEFAULT_HASH_WINDOW_SIZE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of threads in the background worker pool.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Size of each buffer yielded by a range stream.
    #[serde(default = "default_stream_buffer_size")]
    pub stream_buffer_size: usize,

    /// How many buffers a range stream may produce ahead of its consumer.
    #[serde(default = "default_stream_queue_depth")]
    pub stream_queue_depth: usize,

    /// Read window used while hashing a chunk.
    #[serde(default = "default_hash_window_size")]
    pub hash_window_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            stream_buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
            stream_queue_depth: DEFAULT_STREAM_QUEUE_DEPTH,
            hash_window_size: DEFAULT_HASH_WINDOW_SIZE,
        }
    }
}

impl EngineConfig {
    pub async fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = read_to_string(path).await?;
        Self::from_str(&config_str)
    }

    fn validate(self) -> Result<Self> {
        for (name, value) in [
            ("worker_threads", self.worker_threads),
            ("stream_buffer_size", self.stream_buffer_size),
            ("stream_queue_depth", self.stream_queue_depth),
            ("hash_window_size", self.hash_window_size),
        ] {
            if value == 0 {
                bail!("'{name}' must be greater than 0");
            }
        }
        Ok(self)
    }
}

impl FromStr for EngineConfig {
    type Err = color_eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        // An empty document means "all defaults".
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str::<Self>(s)?.validate()
    }
}
