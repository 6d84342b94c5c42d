//! Playlist Tracks

use std::fmt;
use std::path::{Path, PathBuf};

use bytes::Bytes;

/// An item the playlist can hand to a playback device
///
/// Tracks are never mutated once enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Track {
    /// Audio file on disk
    File(PathBuf),
    /// In-memory audio (e.g., synthesized speech)
    Buffer {
        /// Display label used in logs
        label: String,
        /// Container format hint (e.g., "wav", "mp3")
        format: String,
        /// Encoded audio bytes
        bytes: Bytes,
    },
}

impl Track {
    /// Create a file track
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// Create a buffer track
    pub fn buffer(label: impl Into<String>, format: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self::Buffer {
            label: label.into(),
            format: format.into(),
            bytes: bytes.into(),
        }
    }

    /// Lowercased extension or format hint
    pub fn extension(&self) -> Option<String> {
        match self {
            Track::File(path) => path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase()),
            Track::Buffer { format, .. } if !format.is_empty() => {
                Some(format.trim_start_matches('.').to_ascii_lowercase())
            }
            Track::Buffer { .. } => None,
        }
    }

    /// File path, if this is a file track
    pub fn path(&self) -> Option<&Path> {
        match self {
            Track::File(path) => Some(path),
            Track::Buffer { .. } => None,
        }
    }

    /// Human-readable label
    pub fn label(&self) -> String {
        match self {
            Track::File(path) => path.display().to_string(),
            Track::Buffer { label, .. } => label.clone(),
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Track::File(path) => write!(f, "file:{}", path.display()),
            Track::Buffer { label, bytes, .. } => write!(f, "buffer:{} ({} bytes)", label, bytes.len()),
        }
    }
}
