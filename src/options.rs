use crate::compression::{CompressionMethod, Level};
use crate::time::DosDateTime;

/// Governs emission of the ZIP64 end of central directory records.
///
/// Genuine 32-bit overflow always promotes the archive to ZIP64; this
/// option only controls pre-emptive emission when everything still fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Zip64Support {
    #[default]
    Auto,
    Always,
    Never,
}

/// Archive-wide behaviour, threaded through construction.
///
/// There is deliberately no process-global configuration; a default
/// instance is a plain `ArchiveOptions::default()`.
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Apply recorded uid/gid on extract. Needs privileges; off by default.
    pub restore_ownership: bool,

    /// Apply recorded permission bits on extract.
    pub restore_permissions: bool,

    /// Apply recorded modification times on extract.
    pub restore_times: bool,

    /// Default DEFLATE level for new entries.
    pub compression_level: Level,

    /// Pre-emptive ZIP64 emission policy.
    pub write_zip64_support: Zip64Support,

    /// Always mark entry names as UTF-8, even when they are pure ASCII.
    pub unicode_names: bool,

    /// Check declared against actual sizes when reading an entry.
    pub validate_entry_sizes: bool,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            restore_ownership: false,
            restore_permissions: true,
            restore_times: true,
            compression_level: Level::Default,
            write_zip64_support: Zip64Support::Auto,
            unicode_names: false,
            validate_entry_sizes: true,
        }
    }
}

impl ArchiveOptions {
    pub fn restore_ownership(mut self, restore: bool) -> ArchiveOptions {
        self.restore_ownership = restore;
        self
    }

    pub fn restore_permissions(mut self, restore: bool) -> ArchiveOptions {
        self.restore_permissions = restore;
        self
    }

    pub fn restore_times(mut self, restore: bool) -> ArchiveOptions {
        self.restore_times = restore;
        self
    }

    pub fn compression_level(mut self, level: Level) -> ArchiveOptions {
        self.compression_level = level;
        self
    }

    pub fn write_zip64_support(mut self, support: Zip64Support) -> ArchiveOptions {
        self.write_zip64_support = support;
        self
    }

    pub fn unicode_names(mut self, unicode: bool) -> ArchiveOptions {
        self.unicode_names = unicode;
        self
    }

    pub fn validate_entry_sizes(mut self, validate: bool) -> ArchiveOptions {
        self.validate_entry_sizes = validate;
        self
    }
}

/// Per-entry metadata supplied when creating an entry.
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
    pub compression_method: CompressionMethod,
    pub compression_level: Level,
    pub last_modified: Option<DosDateTime>,
    pub unix_permissions: Option<u32>,
    pub comment: Option<String>,
}

impl EntryOptions {
    pub fn compression_method(mut self, method: CompressionMethod) -> EntryOptions {
        self.compression_method = method;
        self
    }

    pub fn compression_level(mut self, level: Level) -> EntryOptions {
        self.compression_level = level;
        self
    }

    pub fn last_modified(mut self, time: DosDateTime) -> EntryOptions {
        self.last_modified = Some(time);
        self
    }

    /// Permission bits only; higher mode bits are discarded.
    pub fn unix_permissions(mut self, mode: u32) -> EntryOptions {
        self.unix_permissions = Some(mode & 0o777);
        self
    }

    pub fn comment(mut self, comment: &str) -> EntryOptions {
        self.comment = Some(comment.to_owned());
        self
    }
}
