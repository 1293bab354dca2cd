use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ArchiveError>;

/// All failures surfaced by this crate.
///
/// Variants are stable so callers can match on the failure class rather
/// than on message text.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// An entry name violates the naming constraints.
    #[error("invalid entry name {name:?}: {reason}")]
    EntryName { name: String, reason: &'static str },

    /// Adding or renaming into an occupied slot without permission to
    /// replace it.
    #[error("an entry named {0:?} already exists")]
    EntryExists(String),

    /// A bad signature, truncated record, count mismatch or bogus extra
    /// field encountered while reading.
    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    /// CRC or size mismatch detected at the end of an entry.
    #[error("decompression failed: {0}")]
    Decompression(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    /// Encrypted entries and unknown compression methods.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A calling convention was violated.
    #[error("{0}")]
    Argument(String),

    /// Entry lookup by name failed.
    #[error("entry {0:?} not found")]
    NotFound(String),
}

impl ArchiveError {
    pub(crate) fn entry_name(name: &str, reason: &'static str) -> ArchiveError {
        ArchiveError::EntryName {
            name: name.to_owned(),
            reason,
        }
    }

    /// Error for any write or read attempted on a closed stream.
    pub(crate) fn closed_stream() -> ArchiveError {
        ArchiveError::Io(io::Error::other("stream has been closed"))
    }
}
