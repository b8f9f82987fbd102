use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SourceError>;

/// Coarse classification of a [`SourceError`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    RangeOutOfBounds,
    CorruptArchive,
    IoFailure,
    UnsupportedCompression,
    Cancelled,
    WorkerLost,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("'{0}' not found")]
    NotFound(String),

    #[error("range {start}..{end} is out of bounds for '{path}' ({length} bytes)")]
    RangeOutOfBounds {
        path: String,
        start: u64,
        end: u64,
        length: u64,
    },

    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("I/O failure on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("'{path}' uses unsupported compression method {method}")]
    UnsupportedCompression { path: String, method: u16 },

    #[error("failed on '{path}': {source}")]
    Entry {
        path: String,
        #[source]
        source: Box<SourceError>,
    },

    #[error("operation was abandoned before completion")]
    Cancelled,

    #[error("background worker exited without reporting a result")]
    WorkerLost,
}

impl SourceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::RangeOutOfBounds { .. } => ErrorKind::RangeOutOfBounds,
            Self::CorruptArchive(_) => ErrorKind::CorruptArchive,
            Self::Io { .. } => ErrorKind::IoFailure,
            Self::UnsupportedCompression { .. } => ErrorKind::UnsupportedCompression,
            Self::Entry { source, .. } => source.kind(),
            Self::Cancelled => ErrorKind::Cancelled,
            Self::WorkerLost => ErrorKind::WorkerLost,
        }
    }

    /// Converts an I/O error raised while touching `path`.
    ///
    /// Errors produced by archive decoders travel through `std::io::Read` with a
    /// `SourceError` payload, which is unwrapped here so the original kind survives.
    pub fn io(path: impl Into<String>, e: io::Error) -> Self {
        let path = path.into();
        if e.get_ref().is_some_and(|inner| inner.is::<SourceError>()) {
            if let Some(inner) = e.into_inner() {
                return match inner.downcast::<SourceError>() {
                    Ok(source_error) => *source_error,
                    Err(other) => Self::Io {
                        path,
                        source: io::Error::other(other),
                    },
                };
            }
            return Self::Io {
                path,
                source: io::Error::other("unknown error"),
            };
        }

        match e.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path),
            io::ErrorKind::InvalidData => {
                Self::CorruptArchive(format!("invalid data in '{path}': {e}"))
            }
            _ => Self::Io { path, source: e },
        }
    }

    /// Wraps the error so it can be returned from a `std::io::Read` implementation.
    pub fn into_io(self) -> io::Error {
        let kind = match self.kind() {
            ErrorKind::NotFound => io::ErrorKind::NotFound,
            ErrorKind::CorruptArchive => io::ErrorKind::InvalidData,
            ErrorKind::RangeOutOfBounds => io::ErrorKind::InvalidInput,
            ErrorKind::UnsupportedCompression => io::ErrorKind::Unsupported,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }

    pub fn in_entry(self, path: impl Into<String>) -> Self {
        match self {
            Self::Entry { .. } | Self::Cancelled => self,
            other => Self::Entry {
                path: path.into(),
                source: Box::new(other),
            },
        }
    }
}
