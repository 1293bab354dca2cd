use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use log::{debug, warn};
use tempfile::NamedTempFile;

use crate::central_directory::read_central_directory;
use crate::codec::EntryReader;
use crate::compression::CompressionMethod;
use crate::entry::{Entry, EntrySource};
use crate::entry_set::{EntrySet, GlobFlags};
use crate::error::{ArchiveError, Result};
use crate::options::{ArchiveOptions, EntryOptions};
use crate::output_stream::OutputStream;
use crate::time::DosDateTime;

trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

#[derive(Debug)]
enum Backing {
    /// The archive file on disk, held open read-only.
    File(File),
    /// An in-memory archive; commit is a no-op for these.
    Buffer(Cursor<Vec<u8>>),
    /// A freshly created archive with nothing on disk yet.
    Empty,
}

/// A ZIP archive bound to a file path or an in-memory buffer.
///
/// Mutations touch only the in-memory entry set; nothing reaches disk
/// until [`commit`](Archive::commit), which writes a sibling temp file
/// and atomically renames it over the target, so an interrupted commit
/// leaves the original archive untouched.
#[derive(Debug)]
pub struct Archive {
    path: PathBuf,
    backing: Backing,
    entries: EntrySet,
    stored_entries: EntrySet,
    comment: String,
    stored_comment: String,
    file_permissions: Option<u32>,
    created_fresh: bool,
    options: ArchiveOptions,
}

impl Archive {
    /// Opens an existing archive read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Archive> {
        Archive::open_with_options(path, false, ArchiveOptions::default())
    }

    /// Opens an archive, creating an empty one when the path is absent.
    pub fn create(path: impl AsRef<Path>) -> Result<Archive> {
        Archive::open_with_options(path, true, ArchiveOptions::default())
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        create: bool,
        options: ArchiveOptions,
    ) -> Result<Archive> {
        let path = path.as_ref().to_path_buf();

        match fs::metadata(&path) {
            Ok(metadata) if metadata.is_dir() => Err(ArchiveError::Io(io::Error::other(
                format!("{} is a directory", path.display()),
            ))),
            Ok(metadata) if metadata.len() == 0 => {
                if create {
                    Ok(Archive::fresh(path, Backing::Empty, options))
                } else {
                    Err(ArchiveError::Argument(format!(
                        "{} exists but is empty; pass the create flag to initialise it",
                        path.display()
                    )))
                }
            }
            Ok(metadata) => {
                let mut file = File::open(&path)?;
                let (parsed, end) = read_central_directory(&mut file)?;

                let mut entries = EntrySet::new();
                for entry in parsed {
                    if entries.contains(entry.name()) {
                        warn!(
                            "duplicate central directory entry {:?}, keeping the later one",
                            entry.name()
                        );
                    }
                    entries.insert(entry);
                }

                #[cfg(unix)]
                let file_permissions = {
                    use std::os::unix::fs::MetadataExt;
                    Some(metadata.mode() & 0o7777)
                };
                #[cfg(not(unix))]
                let file_permissions = None;

                debug!(
                    "opened {} with {} entries",
                    path.display(),
                    entries.len()
                );

                Ok(Archive {
                    path,
                    backing: Backing::File(file),
                    stored_entries: entries.clone(),
                    entries,
                    stored_comment: end.comment.clone(),
                    comment: end.comment,
                    file_permissions,
                    created_fresh: false,
                    options,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if create {
                    Ok(Archive::fresh(path, Backing::Empty, options))
                } else {
                    Err(ArchiveError::Io(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("{} does not exist", path.display()),
                    )))
                }
            }
            Err(e) => Err(ArchiveError::Io(e)),
        }
    }

    /// Treats `data` as archive contents held in memory. An empty buffer
    /// starts an empty in-memory archive.
    pub fn from_buffer(data: Vec<u8>) -> Result<Archive> {
        Archive::from_buffer_with_options(data, ArchiveOptions::default())
    }

    pub fn from_buffer_with_options(data: Vec<u8>, options: ArchiveOptions) -> Result<Archive> {
        if data.is_empty() {
            return Ok(Archive::fresh(
                PathBuf::new(),
                Backing::Buffer(Cursor::new(data)),
                options,
            ));
        }

        let mut cursor = Cursor::new(data);
        let (parsed, end) = read_central_directory(&mut cursor)?;

        let mut entries = EntrySet::new();
        for entry in parsed {
            entries.insert(entry);
        }

        Ok(Archive {
            path: PathBuf::new(),
            backing: Backing::Buffer(cursor),
            stored_entries: entries.clone(),
            entries,
            stored_comment: end.comment.clone(),
            comment: end.comment,
            file_permissions: None,
            created_fresh: false,
            options,
        })
    }

    fn fresh(path: PathBuf, backing: Backing, options: ArchiveOptions) -> Archive {
        Archive {
            path,
            backing,
            entries: EntrySet::new(),
            stored_entries: EntrySet::new(),
            comment: String::new(),
            stored_comment: String::new(),
            file_permissions: None,
            created_fresh: true,
            options,
        }
    }

    // ---- inspection ----

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    pub fn find_entry(&self, name: &str) -> Option<&Entry> {
        self.entries.find_entry(name)
    }

    pub fn get_entry(&self, name: &str) -> Result<&Entry> {
        self.find_entry(name)
            .ok_or_else(|| ArchiveError::NotFound(name.to_owned()))
    }

    pub fn glob(&self, pattern: &str) -> Vec<&Entry> {
        self.entries.glob(pattern, GlobFlags::default())
    }

    pub fn glob_with(&self, pattern: &str, flags: GlobFlags) -> Vec<&Entry> {
        self.entries.glob(pattern, flags)
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn set_comment(&mut self, comment: &str) {
        self.comment = comment.to_owned();
    }

    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    // ---- mutation ----

    /// Adds a filesystem file (or directory) under `name`. Fails with
    /// an exists error when the slot is taken.
    pub fn add(&mut self, name: &str, src_path: impl AsRef<Path>) -> Result<()> {
        self.add_with(name, src_path, |_| false)
    }

    /// Like [`add`](Archive::add); an occupied slot consults `on_exists`
    /// and is replaced when it returns true.
    pub fn add_with(
        &mut self,
        name: &str,
        src_path: impl AsRef<Path>,
        on_exists: impl FnOnce(&Entry) -> bool,
    ) -> Result<()> {
        self.resolve_conflict(name, on_exists)?;
        let mut entry = Entry::new(name)?;
        entry.compression_level = self.options.compression_level;
        entry.gather_fileinfo_from_srcpath(src_path.as_ref())?;
        self.entries.insert(entry);
        Ok(())
    }

    /// Adds a file without compression.
    pub fn add_stored(&mut self, name: &str, src_path: impl AsRef<Path>) -> Result<()> {
        self.resolve_conflict(name, |_| false)?;
        let mut entry = Entry::new(name)?;
        entry.compression_method = CompressionMethod::Store;
        entry.gather_fileinfo_from_srcpath(src_path.as_ref())?;
        self.entries.insert(entry);
        Ok(())
    }

    /// Adds in-memory bytes under `name`.
    pub fn add_buffer(&mut self, name: &str, data: impl Into<Vec<u8>>) -> Result<()> {
        self.add_buffer_entry(name, data, CompressionMethod::Deflate)
    }

    /// Adds in-memory bytes without compression.
    pub fn add_stored_buffer(&mut self, name: &str, data: impl Into<Vec<u8>>) -> Result<()> {
        self.add_buffer_entry(name, data, CompressionMethod::Store)
    }

    fn add_buffer_entry(
        &mut self,
        name: &str,
        data: impl Into<Vec<u8>>,
        method: CompressionMethod,
    ) -> Result<()> {
        self.resolve_conflict(name, |_| false)?;
        let mut entry = Entry::new(name)?;
        entry.compression_method = method;
        entry.compression_level = self.options.compression_level;
        entry.last_modified = DosDateTime::now();
        entry.set_buffer_source(data.into())?;
        self.entries.insert(entry);
        Ok(())
    }

    /// Builds an entry's content through a writer closure. The content
    /// is captured whatever way the closure exits, but only kept on
    /// success.
    pub fn get_output_stream<F>(
        &mut self,
        name: &str,
        options: &EntryOptions,
        block: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut dyn Write) -> Result<()>,
    {
        if name.ends_with('/') {
            return Err(ArchiveError::Argument(format!(
                "cannot open an output stream to directory entry {:?}",
                name
            )));
        }

        let mut entry = Entry::new(name)?;
        entry.compression_method = options.compression_method;
        entry.compression_level = options.compression_level;
        entry.last_modified = options.last_modified.unwrap_or_else(DosDateTime::now);
        if let Some(mode) = options.unix_permissions {
            entry.set_unix_permissions(mode);
        }
        if let Some(comment) = &options.comment {
            entry.comment = comment.clone();
        }

        let mut buffer = Vec::new();
        block(&mut buffer)?;
        entry.set_buffer_source(buffer)?;
        self.entries.insert(entry);
        Ok(())
    }

    /// Adds a directory entry (a trailing `/` is appended if missing).
    pub fn mkdir(&mut self, name: &str) -> Result<()> {
        let mut entry = Entry::new_directory(name)?;
        if self.entries.contains(entry.name()) {
            return Err(ArchiveError::EntryExists(entry.name().to_owned()));
        }
        entry.dirty = true;
        self.entries.insert(entry);
        Ok(())
    }

    /// Removes and returns an entry.
    pub fn remove(&mut self, name: &str) -> Result<Entry> {
        self.entries
            .delete(name)
            .ok_or_else(|| ArchiveError::NotFound(name.to_owned()))
    }

    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.rename_with(from, to, |_| false)
    }

    pub fn rename_with(
        &mut self,
        from: &str,
        to: &str,
        on_exists: impl FnOnce(&Entry) -> bool,
    ) -> Result<()> {
        if !self.entries.contains(from) {
            return Err(ArchiveError::NotFound(from.to_owned()));
        }
        self.resolve_conflict(to, on_exists)?;
        self.entries.rename(from, to)
    }

    /// Swaps the content of an existing entry for a filesystem file.
    pub fn replace(&mut self, name: &str, src_path: impl AsRef<Path>) -> Result<()> {
        if !self.entries.contains(name) {
            return Err(ArchiveError::NotFound(name.to_owned()));
        }
        let mut entry = Entry::new(name)?;
        entry.compression_level = self.options.compression_level;
        entry.gather_fileinfo_from_srcpath(src_path.as_ref())?;
        self.entries.insert(entry);
        Ok(())
    }

    fn resolve_conflict(
        &mut self,
        name: &str,
        on_exists: impl FnOnce(&Entry) -> bool,
    ) -> Result<()> {
        if let Some(existing) = self.entries.find_entry(name) {
            if on_exists(existing) {
                self.entries.delete(name);
            } else {
                return Err(ArchiveError::EntryExists(name.to_owned()));
            }
        }
        Ok(())
    }

    // ---- reading entries ----

    /// The entry's full plaintext.
    pub fn read(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self.get_entry(name)?.clone();

        if entry.is_encrypted() {
            return Err(ArchiveError::Unsupported(format!(
                "entry {:?} is encrypted",
                name
            )));
        }
        if entry.is_directory() {
            return Ok(Vec::new());
        }

        match &entry.source {
            EntrySource::Path(path) => Ok(fs::read(path)?),
            EntrySource::Buffer(data) => Ok(data.clone()),
            EntrySource::None => Ok(Vec::new()),
            EntrySource::Archive => {
                let validate = self.options.validate_entry_sizes;
                let reader = backing_reader(&mut self.backing)?;
                let payload_start = entry.payload_offset(reader)?;
                reader.seek(SeekFrom::Start(payload_start))?;

                let mut entry_reader = EntryReader::new(
                    entry.compression_method,
                    reader,
                    entry.compressed_size,
                    entry.crc32,
                    entry.uncompressed_size,
                );
                let mut out = Vec::new();
                entry_reader.read_to_end(&mut out)?;
                entry_reader.verify(validate)?;
                Ok(out)
            }
        }
    }

    /// Runs `block` over a reader of the entry's plaintext. The reader
    /// lives exactly as long as the block.
    pub fn get_input_stream<T, F>(&mut self, name: &str, block: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Read) -> Result<T>,
    {
        let entry = self.get_entry(name)?.clone();

        if entry.is_encrypted() {
            return Err(ArchiveError::Unsupported(format!(
                "entry {:?} is encrypted",
                name
            )));
        }
        if entry.is_directory() {
            return Err(ArchiveError::Argument(format!(
                "directory entry {:?} has no input stream",
                name
            )));
        }

        match &entry.source {
            EntrySource::Path(path) => {
                let mut file = File::open(path)?;
                block(&mut file)
            }
            EntrySource::Buffer(data) => block(&mut data.as_slice()),
            EntrySource::None => block(&mut io::empty()),
            EntrySource::Archive => {
                let reader = backing_reader(&mut self.backing)?;
                let payload_start = entry.payload_offset(reader)?;
                reader.seek(SeekFrom::Start(payload_start))?;

                let mut entry_reader = EntryReader::new(
                    entry.compression_method,
                    reader,
                    entry.compressed_size,
                    entry.crc32,
                    entry.uncompressed_size,
                );
                block(&mut entry_reader)
            }
        }
    }

    /// Extracts one entry to `dest`, restoring permissions, times and
    /// ownership as the archive options dictate.
    pub fn extract(&mut self, name: &str, dest: impl AsRef<Path>) -> Result<()> {
        let entry = self.get_entry(name)?.clone();
        let dest = dest.as_ref();

        if entry.name().split('/').any(|component| component == "..") {
            return Err(ArchiveError::entry_name(
                entry.name(),
                "name escapes the destination directory",
            ));
        }
        if dest.exists() {
            return Err(ArchiveError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", dest.display()),
            )));
        }

        if entry.is_directory() {
            fs::create_dir_all(dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let data = self.read(name)?;
            fs::write(dest, data)?;
        }

        #[cfg(unix)]
        if self.options.restore_permissions {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_permissions() {
                fs::set_permissions(dest, fs::Permissions::from_mode(mode))?;
            }
        }

        if self.options.restore_times && entry.is_file() {
            let seconds = entry.modified_unix_time().max(0) as u64;
            let mtime = UNIX_EPOCH + Duration::from_secs(seconds);
            let file = fs::OpenOptions::new().write(true).open(dest)?;
            file.set_modified(mtime)?;
        }

        #[cfg(unix)]
        if self.options.restore_ownership {
            if let Some((uid, gid)) = entry.unix_uid_gid() {
                std::os::unix::fs::chown(dest, Some(uid as u32), Some(gid as u32))?;
            }
        }

        Ok(())
    }

    // ---- committing ----

    /// True when the in-memory state differs from what was loaded.
    pub fn commit_required(&self) -> bool {
        self.created_fresh
            || self.comment != self.stored_comment
            || self.entries.iter().any(|e| e.is_dirty())
            || self.entries != self.stored_entries
    }

    /// Serialises the archive to a sibling temp file and renames it over
    /// the target. A no-op for in-memory archives and unchanged state.
    /// On success the archive re-opens itself from disk so entry
    /// offsets match the new layout.
    pub fn commit(&mut self) -> Result<()> {
        if matches!(self.backing, Backing::Buffer(_)) {
            return Ok(());
        }
        if !self.commit_required() {
            return Ok(());
        }

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        // Dropped (and unlinked) automatically on any failure below.
        let mut temp = NamedTempFile::new_in(&dir)?;
        debug!(
            "committing {} via {}",
            self.path.display(),
            temp.path().display()
        );

        write_archive(
            temp.as_file_mut(),
            &self.entries,
            &mut self.backing,
            &self.comment,
            &self.options,
        )?;

        temp.persist(&self.path)
            .map_err(|e| ArchiveError::Io(e.error))?;

        // The temp file was created 0600; restore the original mode, or
        // a plain default for archives that never existed before.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = self.file_permissions.unwrap_or(0o644);
            fs::set_permissions(&self.path, fs::Permissions::from_mode(mode))?;
        }

        let path = std::mem::take(&mut self.path);
        let options = self.options.clone();
        *self = Archive::open_with_options(path, false, options)?;
        Ok(())
    }

    /// Commits and consumes the archive.
    pub fn close(mut self) -> Result<()> {
        self.commit()
    }

    /// Serialises the current state into a fresh buffer, leaving the
    /// archive itself untouched. The only write path for in-memory
    /// archives.
    pub fn write_to_buffer(&mut self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        write_archive(
            &mut cursor,
            &self.entries,
            &mut self.backing,
            &self.comment,
            &self.options,
        )?;
        Ok(cursor.into_inner())
    }
}

fn backing_reader(backing: &mut Backing) -> Result<&mut dyn ReadSeek> {
    match backing {
        Backing::File(file) => Ok(file),
        Backing::Buffer(cursor) => Ok(cursor),
        Backing::Empty => Err(ArchiveError::MalformedArchive(
            "entry references a backing archive, but there is none".to_owned(),
        )),
    }
}

/// Streams every entry into `sink`: clean entries are spliced raw from
/// the backing archive, dirty ones are re-encoded from their source.
fn write_archive<W: Write + Seek>(
    sink: &mut W,
    entries: &EntrySet,
    backing: &mut Backing,
    comment: &str,
    options: &ArchiveOptions,
) -> Result<()> {
    let mut zos = OutputStream::new(sink);
    zos.set_comment(comment);
    zos.set_zip64_support(options.write_zip64_support);
    zos.set_default_compression_level(options.compression_level);
    zos.set_unicode_names(options.unicode_names);

    for entry in entries {
        match &entry.source {
            EntrySource::Archive => {
                let reader = backing_reader(backing)?;
                let payload_start = entry.payload_offset(reader)?;
                reader.seek(SeekFrom::Start(payload_start))?;
                zos.copy_raw_entry(entry, reader)?;
            }
            EntrySource::Path(path) => {
                let mut file = File::open(path)?;
                zos.put_next_entry(entry.clone())?;
                let mut chunk = [0u8; 64 * 1024];
                loop {
                    let count = file.read(&mut chunk)?;
                    if count == 0 {
                        break;
                    }
                    zos.write_data(&chunk[..count])?;
                }
            }
            EntrySource::Buffer(data) => {
                let data = data.clone();
                zos.put_next_entry(entry.clone())?;
                zos.write_data(&data)?;
            }
            EntrySource::None => {
                zos.put_next_entry(entry.clone())?;
            }
        }
    }

    zos.close()
}
