use std::cmp::Ordering;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::compression::{CompressionMethod, Level};
use crate::constants::{
    CENTRAL_DIRECTORY_ENTRY_SIGNATURE, COMPRESSION_OPTION_MASK, ENCRYPTED_FLAG,
    EXTENDED_LOCAL_HEADER_FLAG, LOCAL_FILE_HEADER_SIGNATURE, MS_DIR, S_IFDIR, S_IFREG, UNIX,
    UTF8_NAMES_FLAG, VERSION_MADE_BY, VERSION_NEEDED_TO_EXTRACT,
    VERSION_USES_ZIP64_FORMAT_EXTENSIONS,
};
use crate::descriptor::{ArchiveDescriptor, ArchiveDescriptorReader};
use crate::error::{ArchiveError, Result};
use crate::extra::{
    encode_zip64_record, ExtendedTimestamp, ExtraField, ExtraFields, UnixUidGid, Zip64Context,
    Zip64Extra,
};
use crate::time::DosDateTime;

/// Where an entry's bytes come from when the archive is rewritten.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EntrySource {
    /// Nothing to stream; directories and brand-new empty entries.
    #[default]
    None,
    /// A file on disk, compressed at commit time.
    Path(PathBuf),
    /// Bytes held in memory, compressed at commit time.
    Buffer(Vec<u8>),
    /// The compressed payload already in the backing archive, spliced
    /// verbatim at commit time.
    Archive,
}

/// One archive member: its header metadata and a handle to its content.
#[derive(Debug, Clone)]
pub struct Entry {
    name: String,
    pub comment: String,
    pub extra: ExtraFields,
    pub compression_method: CompressionMethod,
    pub compression_level: Level,
    pub general_purpose_flags: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub last_modified: DosDateTime,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    pub version_made_by: u16,
    pub version_needed_to_extract: u16,
    pub disk_number_start: u32,
    /// Offset of this entry's local header; meaningful only for entries
    /// that came out of a parsed archive or a finished output stream.
    pub local_header_offset: u64,
    pub(crate) dirty: bool,
    pub(crate) source: EntrySource,
    /// A ZIP64 extra was (or must be) reserved in the local header so
    /// the 64-bit sizes can be patched in after streaming.
    pub(crate) zip64_reserved: bool,
}

impl Default for Entry {
    fn default() -> Self {
        Entry {
            name: String::new(),
            comment: String::new(),
            extra: ExtraFields::new(),
            compression_method: CompressionMethod::Deflate,
            compression_level: Level::Default,
            general_purpose_flags: 0,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            last_modified: DosDateTime::default(),
            internal_file_attributes: 0,
            external_file_attributes: (0o644 | S_IFREG) << 16,
            version_made_by: VERSION_MADE_BY,
            version_needed_to_extract: VERSION_NEEDED_TO_EXTRACT,
            disk_number_start: 0,
            local_header_offset: 0,
            dirty: false,
            source: EntrySource::None,
            zip64_reserved: false,
        }
    }
}

impl Entry {
    /// Creates an entry with a validated name. A trailing `/` makes it a
    /// directory entry, which is normalised to the STORED invariants.
    pub fn new(name: &str) -> Result<Entry> {
        validate_entry_name(name)?;

        let mut entry = Entry {
            name: name.to_owned(),
            ..Entry::default()
        };
        if entry.is_directory() {
            entry.normalize_directory();
        }
        Ok(entry)
    }

    /// Creates a directory entry, appending the trailing `/` if absent.
    pub fn new_directory(name: &str) -> Result<Entry> {
        let dir_name = match name.chars().last() {
            Some('/') => name.to_owned(),
            _ => {
                let mut s = name.to_owned();
                s.push('/');
                s
            }
        };
        Entry::new(&dir_name)
    }

    /// An unvalidated shell for the parse paths, which overwrite every
    /// field from the record being read.
    pub(crate) fn empty() -> Entry {
        Entry::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: &str) -> Result<()> {
        validate_entry_name(name)?;
        self.name = name.to_owned();
        Ok(())
    }

    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }

    pub fn is_file(&self) -> bool {
        !self.is_directory()
    }

    /// The longest prefix of the name ending in `/`, with a trailing `/`
    /// counting as part of the entry itself. `None` for top-level names.
    pub fn parent_as_string(&self) -> Option<&str> {
        let stem = self.name.trim_end_matches('/');
        let pos = stem.rfind('/')?;
        Some(&self.name[..=pos])
    }

    pub fn is_encrypted(&self) -> bool {
        self.general_purpose_flags & ENCRYPTED_FLAG != 0
    }

    /// True when the sizes and CRC were unknown at local header time and
    /// a data descriptor trails the payload.
    pub fn is_incomplete(&self) -> bool {
        self.general_purpose_flags & EXTENDED_LOCAL_HEADER_FLAG != 0
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_zip64(&self) -> bool {
        self.uncompressed_size >= u32::MAX as u64
            || self.compressed_size >= u32::MAX as u64
            || self.local_header_offset >= u32::MAX as u64
    }

    /// Permission bits from the external attributes, present when the
    /// entry was made on a Unix-like system.
    pub fn unix_permissions(&self) -> Option<u32> {
        if self.version_made_by.to_le_bytes()[1] == UNIX {
            Some((self.external_file_attributes >> 16) & 0o7777)
        } else {
            None
        }
    }

    pub fn set_unix_permissions(&mut self, mode: u32) {
        let file_type = if self.is_directory() { S_IFDIR } else { S_IFREG };
        let dos_bits = self.external_file_attributes & 0xFF;
        self.external_file_attributes = ((mode & 0o7777) | file_type) << 16 | dos_bits;
        self.version_made_by = VERSION_MADE_BY;
    }

    pub fn unix_uid_gid(&self) -> Option<(u16, u16)> {
        self.extra.unix_uid_gid().map(|ids| (ids.uid, ids.gid))
    }

    /// Modification time, preferring the extended timestamp field over
    /// the two-second DOS form.
    pub fn modified_unix_time(&self) -> i64 {
        match self.extra.extended_timestamp().and_then(|ts| ts.modify_time()) {
            Some(seconds) => seconds as i64,
            None => self.last_modified.to_unix(),
        }
    }

    /// Directory entries carry no payload and no compression.
    fn normalize_directory(&mut self) {
        self.compression_method = CompressionMethod::Store;
        self.compressed_size = 0;
        self.uncompressed_size = 0;
        self.crc32 = 0;
        self.general_purpose_flags &= !COMPRESSION_OPTION_MASK;
        self.external_file_attributes = ((0o755 | S_IFDIR) << 16) | MS_DIR;
    }

    /// Folds the DEFLATE level hint into bits 1 and 2. Directories and
    /// STORED entries always carry clear bits.
    pub(crate) fn apply_level_flags(&mut self) {
        self.general_purpose_flags &= !COMPRESSION_OPTION_MASK;
        if self.compression_method == CompressionMethod::Deflate && !self.is_directory() {
            self.general_purpose_flags |= self.compression_level.flag_bits();
        }
    }

    /// Marks the name (and comment) as UTF-8 when needed or requested.
    pub(crate) fn apply_name_encoding_flags(&mut self, unicode_names: bool) {
        if unicode_names || !self.name.is_ascii() || !self.comment.is_ascii() {
            self.general_purpose_flags |= UTF8_NAMES_FLAG;
        }
    }

    /// Stats `path` and takes over its size, times, permissions and
    /// ownership; the entry becomes dirty with `path` as its source.
    pub fn gather_fileinfo_from_srcpath(&mut self, path: &Path) -> Result<()> {
        let metadata = fs::metadata(path)?;

        if metadata.is_dir() != self.is_directory() {
            return Err(ArchiveError::Argument(format!(
                "{:?} and entry {:?} disagree about being a directory",
                path, self.name
            )));
        }

        self.uncompressed_size = if metadata.is_dir() { 0 } else { metadata.len() };

        if let Ok(modified) = metadata.modified() {
            self.last_modified = DosDateTime::from_system_time(modified);
            let unix_seconds = modified
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            if let Ok(seconds) = i32::try_from(unix_seconds) {
                self.extra.set(ExtraField::ExtendedTimestamp(
                    ExtendedTimestamp::new(Some(seconds), None, None),
                ));
            }
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            self.set_unix_permissions(metadata.mode() & 0o7777);
            if let (Ok(uid), Ok(gid)) =
                (u16::try_from(metadata.uid()), u16::try_from(metadata.gid()))
            {
                self.extra.set(ExtraField::UnixUidGid(UnixUidGid { uid, gid }));
            }
        }

        self.source = EntrySource::Path(path.to_owned());
        self.dirty = true;
        Ok(())
    }

    /// Hands the entry in-memory content. Directories carry none.
    pub fn set_buffer_source(&mut self, data: Vec<u8>) -> Result<()> {
        if self.is_directory() {
            return Err(ArchiveError::Argument(format!(
                "directory entry {:?} cannot carry content",
                self.name
            )));
        }
        self.uncompressed_size = data.len() as u64;
        self.source = EntrySource::Buffer(data);
        self.dirty = true;
        Ok(())
    }

    // ---- local file header ----

    /// Parses a local file header at the reader's current position,
    /// including the signature word.
    pub fn read_local_entry<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<()> {
        let mut signature = [0u8; 4];
        reader.read_exact(&mut signature)?;
        if u32::from_le_bytes(signature) != LOCAL_FILE_HEADER_SIGNATURE {
            return Err(ArchiveError::MalformedArchive(format!(
                "expected local file header signature, found 0x{:08x}",
                u32::from_le_bytes(signature)
            )));
        }
        self.read_local_entry_body(reader)
    }

    /// Parses a local file header whose signature was already consumed.
    pub(crate) fn read_local_entry_body<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<()> {
        let mut fixed = [0u8; 26];
        reader.read_exact(&mut fixed)?;

        let mut indexer = ArchiveDescriptorReader::new();
        self.version_needed_to_extract = indexer.read_u16(&fixed)?;
        self.general_purpose_flags = indexer.read_u16(&fixed)?;
        let method = indexer.read_u16(&fixed)?;
        let time = indexer.read_u16(&fixed)?;
        let date = indexer.read_u16(&fixed)?;
        self.crc32 = indexer.read_u32(&fixed)?;
        let compressed_size = indexer.read_u32(&fixed)?;
        let uncompressed_size = indexer.read_u32(&fixed)?;
        let file_name_len = indexer.read_u16(&fixed)? as usize;
        let extra_field_len = indexer.read_u16(&fixed)? as usize;

        self.compression_method = CompressionMethod::from_compression_method(method)?;
        self.last_modified = DosDateTime::from_parts(date, time);
        self.compressed_size = compressed_size as u64;
        self.uncompressed_size = uncompressed_size as u64;

        let mut name_raw = vec![0u8; file_name_len];
        reader.read_exact(&mut name_raw)?;
        self.name = String::from_utf8(name_raw).map_err(|e| {
            ArchiveError::MalformedArchive(format!("entry name is not valid UTF-8: {}", e))
        })?;

        let mut extra_raw = vec![0u8; extra_field_len];
        reader.read_exact(&mut extra_raw)?;
        let context = Zip64Context {
            uncompressed_size: uncompressed_size == u32::MAX,
            compressed_size: compressed_size == u32::MAX,
            ..Default::default()
        };
        self.extra = ExtraFields::parse(&extra_raw, context)?;
        self.apply_zip64_extra();

        Ok(())
    }

    /// Emits this entry's local file header. With bit 3 set the CRC and
    /// sizes are written as zero; a reserved ZIP64 extra saturates the
    /// size slots instead so they can be patched after streaming.
    pub(crate) fn write_local_entry(&self, desc: &mut ArchiveDescriptor) {
        let (time, date) = (self.last_modified.time(), self.last_modified.date());

        let extra_bytes = self.local_extra_bytes();

        desc.write_u32(LOCAL_FILE_HEADER_SIGNATURE);
        desc.write_u16(self.local_version_needed());
        desc.write_u16(self.general_purpose_flags);
        desc.write_u16(self.compression_method.compression_method());
        desc.write_u16(time);
        desc.write_u16(date);

        if self.is_incomplete() {
            desc.write_u32(0);
            desc.write_u32(0);
            desc.write_u32(0);
        } else if self.zip64_reserved {
            desc.write_u32(self.crc32);
            desc.write_u32(u32::MAX);
            desc.write_u32(u32::MAX);
        } else {
            desc.write_u32(self.crc32);
            desc.write_u32(self.compressed_size.min(u32::MAX as u64) as u32);
            desc.write_u32(self.uncompressed_size.min(u32::MAX as u64) as u32);
        }

        desc.write_u16(self.name.len() as u16);
        desc.write_u16(extra_bytes.len() as u16);
        desc.write_str(&self.name);
        desc.write_bytes(&extra_bytes);
    }

    fn local_version_needed(&self) -> u16 {
        if self.zip64_reserved || self.is_zip64() {
            VERSION_USES_ZIP64_FORMAT_EXTENSIONS
        } else {
            VERSION_NEEDED_TO_EXTRACT
        }
    }

    /// Local extra bytes; a reserved ZIP64 record leads so its file
    /// offset is deterministic for the post-stream patch.
    fn local_extra_bytes(&self) -> Vec<u8> {
        let mut desc = ArchiveDescriptor::new(64);
        if self.zip64_reserved {
            encode_zip64_record(
                &mut desc,
                &Zip64Extra {
                    uncompressed_size: Some(self.uncompressed_size),
                    compressed_size: Some(self.compressed_size),
                    ..Default::default()
                },
            );
        }
        desc.write_bytes(&self.extra.encode_local());
        desc.finish()
    }

    // ---- central directory file header ----

    /// Parses a central directory file header at the reader's current
    /// position, including the signature word.
    pub fn read_c_dir_entry<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<()> {
        let mut signature = [0u8; 4];
        reader.read_exact(&mut signature)?;
        if u32::from_le_bytes(signature) != CENTRAL_DIRECTORY_ENTRY_SIGNATURE {
            return Err(ArchiveError::MalformedArchive(format!(
                "expected central directory header signature, found 0x{:08x}",
                u32::from_le_bytes(signature)
            )));
        }
        self.read_c_dir_entry_body(reader)
    }

    pub(crate) fn read_c_dir_entry_body<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<()> {
        let mut fixed = [0u8; 42];
        reader.read_exact(&mut fixed)?;

        let mut indexer = ArchiveDescriptorReader::new();
        self.version_made_by = indexer.read_u16(&fixed)?;
        self.version_needed_to_extract = indexer.read_u16(&fixed)?;
        self.general_purpose_flags = indexer.read_u16(&fixed)?;
        let method = indexer.read_u16(&fixed)?;
        let time = indexer.read_u16(&fixed)?;
        let date = indexer.read_u16(&fixed)?;
        self.crc32 = indexer.read_u32(&fixed)?;
        let compressed_size = indexer.read_u32(&fixed)?;
        let uncompressed_size = indexer.read_u32(&fixed)?;
        let file_name_len = indexer.read_u16(&fixed)? as usize;
        let extra_field_len = indexer.read_u16(&fixed)? as usize;
        let comment_len = indexer.read_u16(&fixed)? as usize;
        let disk_number_start = indexer.read_u16(&fixed)?;
        self.internal_file_attributes = indexer.read_u16(&fixed)?;
        self.external_file_attributes = indexer.read_u32(&fixed)?;
        let local_header_offset = indexer.read_u32(&fixed)?;

        self.compression_method = CompressionMethod::from_compression_method(method)?;
        self.last_modified = DosDateTime::from_parts(date, time);
        self.compressed_size = compressed_size as u64;
        self.uncompressed_size = uncompressed_size as u64;
        self.disk_number_start = disk_number_start as u32;
        self.local_header_offset = local_header_offset as u64;

        let mut name_raw = vec![0u8; file_name_len];
        reader.read_exact(&mut name_raw)?;
        self.name = String::from_utf8(name_raw).map_err(|e| {
            ArchiveError::MalformedArchive(format!("entry name is not valid UTF-8: {}", e))
        })?;

        let mut extra_raw = vec![0u8; extra_field_len];
        reader.read_exact(&mut extra_raw)?;
        let context = Zip64Context {
            uncompressed_size: uncompressed_size == u32::MAX,
            compressed_size: compressed_size == u32::MAX,
            local_header_offset: local_header_offset == u32::MAX,
            disk_number_start: disk_number_start == u16::MAX,
        };
        self.extra = ExtraFields::parse(&extra_raw, context)?;
        self.apply_zip64_extra();

        let mut comment_raw = vec![0u8; comment_len];
        reader.read_exact(&mut comment_raw)?;
        self.comment = String::from_utf8_lossy(&comment_raw).into_owned();

        Ok(())
    }

    /// Emits this entry's central directory header, inserting a ZIP64
    /// extra whenever any field overflows its 32-bit slot.
    pub(crate) fn write_c_dir_entry(&self, desc: &mut ArchiveDescriptor) {
        let needs = Zip64Context {
            uncompressed_size: self.uncompressed_size >= u32::MAX as u64,
            compressed_size: self.compressed_size >= u32::MAX as u64,
            local_header_offset: self.local_header_offset >= u32::MAX as u64,
            disk_number_start: self.disk_number_start >= u16::MAX as u32,
        };

        let mut extra_desc = ArchiveDescriptor::new(64);
        if needs.any() {
            encode_zip64_record(
                &mut extra_desc,
                &Zip64Extra {
                    uncompressed_size: needs.uncompressed_size.then_some(self.uncompressed_size),
                    compressed_size: needs.compressed_size.then_some(self.compressed_size),
                    local_header_offset: needs
                        .local_header_offset
                        .then_some(self.local_header_offset),
                    disk_number_start: needs.disk_number_start.then_some(self.disk_number_start),
                },
            );
        }
        extra_desc.write_bytes(&self.extra.encode_central());
        let extra_bytes = extra_desc.finish();

        let version_needed = if needs.any() {
            VERSION_USES_ZIP64_FORMAT_EXTENSIONS
        } else {
            VERSION_NEEDED_TO_EXTRACT
        };

        let (time, date) = (self.last_modified.time(), self.last_modified.date());

        desc.write_u32(CENTRAL_DIRECTORY_ENTRY_SIGNATURE);
        desc.write_u16(self.version_made_by);
        desc.write_u16(version_needed);
        desc.write_u16(self.general_purpose_flags);
        desc.write_u16(self.compression_method.compression_method());
        desc.write_u16(time);
        desc.write_u16(date);
        desc.write_u32(self.crc32);
        desc.write_u32(self.compressed_size.min(u32::MAX as u64) as u32);
        desc.write_u32(self.uncompressed_size.min(u32::MAX as u64) as u32);
        desc.write_u16(self.name.len() as u16);
        desc.write_u16(extra_bytes.len() as u16);
        desc.write_u16(self.comment.len() as u16);
        desc.write_u16(self.disk_number_start.min(u16::MAX as u32) as u16);
        desc.write_u16(self.internal_file_attributes);
        desc.write_u32(self.external_file_attributes);
        desc.write_u32(self.local_header_offset.min(u32::MAX as u64) as u32);
        desc.write_str(&self.name);
        desc.write_bytes(&extra_bytes);
        desc.write_str(&self.comment);
    }

    /// Folds parsed ZIP64 values over the saturated 32-bit fields.
    fn apply_zip64_extra(&mut self) {
        if let Some(zip64) = self.extra.zip64() {
            if let Some(size) = zip64.uncompressed_size {
                self.uncompressed_size = size;
            }
            if let Some(size) = zip64.compressed_size {
                self.compressed_size = size;
            }
            if let Some(offset) = zip64.local_header_offset {
                self.local_header_offset = offset;
            }
            if let Some(disk) = zip64.disk_number_start {
                self.disk_number_start = disk;
            }
        }
    }

    /// Seeks to this entry's local header in `reader` and returns the
    /// absolute offset of the first payload byte.
    pub(crate) fn payload_offset<R: Read + Seek + ?Sized>(&self, reader: &mut R) -> Result<u64> {
        reader.seek(SeekFrom::Start(self.local_header_offset))?;
        let mut shell = Entry::empty();
        shell.read_local_entry(reader)?;
        Ok(reader.stream_position()?)
    }
}

fn validate_entry_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ArchiveError::entry_name(name, "name must not be empty"));
    }
    if name.starts_with('/') {
        return Err(ArchiveError::entry_name(
            name,
            "name must not start with '/'",
        ));
    }
    if name.len() > u16::MAX as usize {
        return Err(ArchiveError::entry_name(name, "name is too long"));
    }
    Ok(())
}

/// Equality covers what identifies the archived bytes; comments and
/// timestamps deliberately do not participate.
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.extra == other.extra
            && self.compressed_size == other.compressed_size
            && self.crc32 == other.crc32
            && self.compression_method == other.compression_method
            && self.uncompressed_size == other.uncompressed_size
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl std::fmt::Display for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_name_must_not_start_with_slash() {
        let err = Entry::new("/etc/passwd").unwrap_err();
        assert!(matches!(err, ArchiveError::EntryName { .. }));
    }

    #[test]
    fn test_name_must_not_be_empty() {
        let err = Entry::new("").unwrap_err();
        assert!(matches!(err, ArchiveError::EntryName { .. }));
    }

    #[test]
    fn test_directory_xor_file() {
        for name in ["aa", "aa/", "aa/bb", "aa/bb/", "aa/bb/cc"] {
            let entry = Entry::new(name).unwrap();
            assert!(entry.is_directory() ^ entry.is_file(), "name {:?}", name);
        }
    }

    #[test]
    fn test_parent_as_string() {
        let cases = [
            ("aa", None),
            ("aa/", None),
            ("aa/bb", Some("aa/")),
            ("aa/bb/", Some("aa/")),
            ("aa/bb/cc", Some("aa/bb/")),
            ("aa/bb/cc/", Some("aa/bb/")),
        ];
        for (name, parent) in cases {
            let entry = Entry::new(name).unwrap();
            assert_eq!(entry.parent_as_string(), parent, "name {:?}", name);
        }
    }

    #[test]
    fn test_directory_entry_invariants() {
        let mut entry = Entry::new_directory("docs").unwrap();
        entry.compression_level = Level::Precise(9);
        entry.apply_level_flags();

        assert_eq!(entry.name(), "docs/");
        assert_eq!(entry.compression_method, CompressionMethod::Store);
        assert_eq!(entry.compressed_size, 0);
        assert_eq!(entry.uncompressed_size, 0);
        assert_eq!(entry.crc32, 0);
        assert_eq!(entry.general_purpose_flags & COMPRESSION_OPTION_MASK, 0);
    }

    #[test]
    fn test_flag_bit_queries() {
        let mut entry = Entry::new("a.txt").unwrap();
        assert!(!entry.is_encrypted());
        assert!(!entry.is_incomplete());

        entry.general_purpose_flags |= ENCRYPTED_FLAG;
        assert!(entry.is_encrypted());

        entry.general_purpose_flags |= EXTENDED_LOCAL_HEADER_FLAG;
        assert!(entry.is_incomplete());
    }

    #[test]
    fn test_level_flags_applied_for_deflate_files_only() {
        let mut entry = Entry::new("a.bin").unwrap();
        entry.compression_method = CompressionMethod::Deflate;

        for (level, bits) in [(1, 0b110), (2, 0b100), (8, 0b010), (9, 0b010), (5, 0)] {
            entry.compression_level = Level::Precise(level);
            entry.apply_level_flags();
            assert_eq!(
                entry.general_purpose_flags & COMPRESSION_OPTION_MASK,
                bits,
                "level {}",
                level
            );
        }

        entry.compression_method = CompressionMethod::Store;
        entry.compression_level = Level::Precise(1);
        entry.apply_level_flags();
        assert_eq!(entry.general_purpose_flags & COMPRESSION_OPTION_MASK, 0);
    }

    #[test]
    fn test_equality_ignores_comment_and_time() {
        let mut a = Entry::new("same").unwrap();
        let mut b = Entry::new("same").unwrap();
        a.comment = "one".to_owned();
        b.comment = "two".to_owned();
        a.last_modified = DosDateTime::from_parts(0x4321, 0x1234);
        assert_eq!(a, b);

        b.crc32 = 42;
        assert_ne!(a, b);
    }

    #[test]
    fn test_sort_is_lexicographic_by_name() {
        let names = ["5", "1", "3", "4", "0", "2"];
        let mut entries: Vec<Entry> = names.iter().map(|n| Entry::new(n).unwrap()).collect();
        entries.sort();
        let sorted: Vec<&str> = entries.iter().map(|e| e.name()).collect();
        assert_eq!(sorted, vec!["0", "1", "2", "3", "4", "5"]);
    }

    #[test]
    fn test_local_header_round_trip() {
        let mut entry = Entry::new("dir/file.txt").unwrap();
        entry.compression_method = CompressionMethod::Deflate;
        entry.crc32 = 0xCAFEBABE;
        entry.compressed_size = 120;
        entry.uncompressed_size = 300;
        entry.last_modified = DosDateTime::from_parts(0x565B, 0x7E20);

        let mut desc = ArchiveDescriptor::new(128);
        entry.write_local_entry(&mut desc);

        let mut parsed = Entry::empty();
        parsed
            .read_local_entry(&mut Cursor::new(desc.buffer()))
            .unwrap();

        assert_eq!(parsed.name(), "dir/file.txt");
        assert_eq!(parsed.crc32, 0xCAFEBABE);
        assert_eq!(parsed.compressed_size, 120);
        assert_eq!(parsed.uncompressed_size, 300);
        assert_eq!(parsed.last_modified, entry.last_modified);
        assert_eq!(parsed.compression_method, CompressionMethod::Deflate);
    }

    #[test]
    fn test_local_header_streaming_writes_zero_sizes() {
        let mut entry = Entry::new("s.bin").unwrap();
        entry.general_purpose_flags |= EXTENDED_LOCAL_HEADER_FLAG;
        entry.crc32 = 0x11111111;
        entry.compressed_size = 5;
        entry.uncompressed_size = 9;

        let mut desc = ArchiveDescriptor::new(64);
        entry.write_local_entry(&mut desc);

        let mut parsed = Entry::empty();
        parsed
            .read_local_entry(&mut Cursor::new(desc.buffer()))
            .unwrap();
        assert!(parsed.is_incomplete());
        assert_eq!(parsed.crc32, 0);
        assert_eq!(parsed.compressed_size, 0);
        assert_eq!(parsed.uncompressed_size, 0);
    }

    #[test]
    fn test_local_header_bad_signature() {
        let bytes = vec![0u8; 64];
        let mut parsed = Entry::empty();
        let err = parsed
            .read_local_entry(&mut Cursor::new(bytes))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::MalformedArchive(_)));
    }

    #[test]
    fn test_central_header_round_trip_with_comment() {
        let mut entry = Entry::new("notes.md").unwrap();
        entry.comment = "kept in the central directory".to_owned();
        entry.crc32 = 0x1234;
        entry.compressed_size = 10;
        entry.uncompressed_size = 10;
        entry.compression_method = CompressionMethod::Store;
        entry.local_header_offset = 0x1000;
        entry.set_unix_permissions(0o640);

        let mut desc = ArchiveDescriptor::new(128);
        entry.write_c_dir_entry(&mut desc);

        let mut parsed = Entry::empty();
        parsed
            .read_c_dir_entry(&mut Cursor::new(desc.buffer()))
            .unwrap();

        assert_eq!(parsed.name(), "notes.md");
        assert_eq!(parsed.comment, entry.comment);
        assert_eq!(parsed.local_header_offset, 0x1000);
        assert_eq!(parsed.unix_permissions(), Some(0o640));
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_central_header_promotes_large_sizes_to_zip64() {
        let mut entry = Entry::new("big.bin").unwrap();
        entry.compression_method = CompressionMethod::Store;
        entry.compressed_size = 5_000_000_000;
        entry.uncompressed_size = 5_000_000_000;
        entry.crc32 = 7;

        let mut desc = ArchiveDescriptor::new(128);
        entry.write_c_dir_entry(&mut desc);

        let mut parsed = Entry::empty();
        parsed
            .read_c_dir_entry(&mut Cursor::new(desc.buffer()))
            .unwrap();

        assert_eq!(parsed.compressed_size, 5_000_000_000);
        assert_eq!(parsed.uncompressed_size, 5_000_000_000);
        assert!(parsed.extra.zip64().is_some());
        assert_eq!(
            parsed.version_needed_to_extract,
            VERSION_USES_ZIP64_FORMAT_EXTENSIONS
        );
    }

    #[test]
    fn test_central_header_promotes_large_offset_to_zip64() {
        let mut entry = Entry::new("late.bin").unwrap();
        entry.compression_method = CompressionMethod::Store;
        entry.local_header_offset = 6_000_000_000;

        let mut desc = ArchiveDescriptor::new(128);
        entry.write_c_dir_entry(&mut desc);

        let mut parsed = Entry::empty();
        parsed
            .read_c_dir_entry(&mut Cursor::new(desc.buffer()))
            .unwrap();
        assert_eq!(parsed.local_header_offset, 6_000_000_000);
    }

    #[test]
    fn test_reserved_zip64_local_header_round_trip() {
        let mut entry = Entry::new("huge.bin").unwrap();
        entry.compression_method = CompressionMethod::Store;
        entry.zip64_reserved = true;
        entry.compressed_size = 4_900_000_000;
        entry.uncompressed_size = 4_900_000_000;
        entry.crc32 = 0xFEEDFACE;

        let mut desc = ArchiveDescriptor::new(128);
        entry.write_local_entry(&mut desc);

        let mut parsed = Entry::empty();
        parsed
            .read_local_entry(&mut Cursor::new(desc.buffer()))
            .unwrap();
        assert_eq!(parsed.compressed_size, 4_900_000_000);
        assert_eq!(parsed.uncompressed_size, 4_900_000_000);
        assert_eq!(parsed.crc32, 0xFEEDFACE);
        assert_eq!(
            parsed.version_needed_to_extract,
            VERSION_USES_ZIP64_FORMAT_EXTENSIONS
        );
    }

    #[test]
    fn test_unknown_extra_survives_header_round_trip() {
        let mut entry = Entry::new("keep.bin").unwrap();
        entry.extra.set(ExtraField::Unknown {
            header_id: 0x6666,
            data: vec![1, 2, 3, 4, 5],
        });

        let mut desc = ArchiveDescriptor::new(128);
        entry.write_c_dir_entry(&mut desc);

        let mut parsed = Entry::empty();
        parsed
            .read_c_dir_entry(&mut Cursor::new(desc.buffer()))
            .unwrap();
        assert_eq!(
            parsed.extra.get(0x6666),
            Some(&ExtraField::Unknown {
                header_id: 0x6666,
                data: vec![1, 2, 3, 4, 5]
            })
        );
    }
}
