use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::domain::ItemKey;

/// Codec failures. The payload format is opaque to the queue, so the
/// underlying error is kept as text.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),
}

/// Operational classification of a store failure.
///
/// The reloader decides log level and whether to keep scanning from this,
/// never from the concrete variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The file vanished between listing and acting on it.
    Race,
    /// The file exists but cannot be decoded.
    Corrupt,
    /// OS-level failure (permissions, disk, ...). The file stays where it was.
    Io,
    /// A key was generated twice.
    Collision,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("item key already exists: {key}")]
    AlreadyExists { key: ItemKey },

    #[error("item file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("permission denied: {}", path.display())]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt item {}: {source}", path.display())]
    CorruptItem {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("cannot encode item {key}: {source}")]
    Encode {
        key: ItemKey,
        #[source]
        source: CodecError,
    },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::Race,
            StoreError::CorruptItem { .. } => ErrorKind::Corrupt,
            StoreError::AlreadyExists { .. } => ErrorKind::Collision,
            StoreError::PermissionDenied { .. }
            | StoreError::Encode { .. }
            | StoreError::Io { .. } => ErrorKind::Io,
        }
    }

    /// Map an `io::Error` raised while touching `path` onto the store taxonomy.
    pub(crate) fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound { path },
            io::ErrorKind::PermissionDenied => StoreError::PermissionDenied { path, source },
            _ => StoreError::Io { path, source },
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors surfaced to callers of [`crate::QueueManager`].
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot create queue directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cannot spawn reloader thread: {0}")]
    Spawn(#[source] io::Error),
}
