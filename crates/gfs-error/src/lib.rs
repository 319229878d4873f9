#![forbid(unsafe_code)]
//! Error types for GlassFS.
//!
//! Decoders report `gfs_types::ParseError`; everything that touches a
//! device or a path reports `GfsError`. Traversal wraps the underlying
//! error with the path segment where it occurred.

use gfs_types::ParseError;
use thiserror::Error;

/// Unified error type for all GlassFS operations.
#[derive(Debug, Error)]
pub enum GfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("short read at offset {offset}: wanted {wanted} bytes, got {got}")]
    DeviceReadShort {
        offset: u64,
        wanted: usize,
        got: usize,
    },

    #[error("corrupt metadata at block {block}: {detail}")]
    Corruption { block: u64, detail: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("cannot seek to offset {0} before start of file")]
    InvalidSeek(i64),

    #[error("end of file")]
    EndOfFile,

    #[error("filesystem is read-only; write flags are not supported")]
    WriteNotSupported,

    #[error("logical sector size for ext4 must be 512 or 0, not {0}")]
    UnsupportedSectorSize(u64),

    #[error("image of {0} bytes is smaller than the minimum ext4 size")]
    ImageTooSmall(u64),
}

impl GfsError {
    /// Wrap this error with the path segment where traversal failed.
    #[must_use]
    pub fn at_segment(self, segment: &str) -> Self {
        match self {
            Self::NotFound(_) => Self::NotFound(segment.to_owned()),
            Self::NotADirectory(_) => Self::NotADirectory(segment.to_owned()),
            other => Self::Corruption {
                block: 0,
                detail: format!("at path segment {segment:?}: {other}"),
            },
        }
    }
}

/// Result alias using `GfsError`.
pub type Result<T> = std::result::Result<T, GfsError>;
