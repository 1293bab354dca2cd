use std::io::{self, Read, Seek, Write};

use log::debug;

use crate::central_directory::write_central_directory;
use crate::codec::{CodecTotals, EntryCodec};
use crate::compression::Level;
use crate::constants::{
    DATA_DESCRIPTOR_SIGNATURE, EXTENDED_LOCAL_HEADER_FLAG, FILE_HEADER_BASE_SIZE,
    FILE_HEADER_CRC_OFFSET, FILE_HEADER_FLAGS_OFFSET,
};
use crate::descriptor::ArchiveDescriptor;
use crate::entry::Entry;
use crate::error::{ArchiveError, Result};
use crate::options::{EntryOptions, Zip64Support};
use crate::write_wrapper::{CommonWrapper, WriteSeekWrapper, WriteWrapper};

struct OpenEntry {
    entry: Entry,
    header_offset: u64,
    name_len: u64,
    /// Directories have no payload and no codec.
    codec: Option<EntryCodec>,
}

/// Append-only archive writer.
///
/// Entries are opened one at a time with
/// [`put_next_entry`](OutputStream::put_next_entry); bytes stream
/// through the entry's codec; finishing an entry back-patches its local
/// header on seekable sinks or emits a data descriptor otherwise.
/// [`close`](OutputStream::close) appends the central directory, after
/// which every write fails.
pub struct OutputStream<'a, W: Write> {
    sink: Box<dyn CommonWrapper<W> + 'a>,
    entries: Vec<Entry>,
    comment: String,
    zip64_support: Zip64Support,
    default_level: Level,
    unicode_names: bool,
    base_flags: u16,
    current: Option<OpenEntry>,
    closed: bool,
}

impl<'a, W: Write + Seek + 'a> OutputStream<'a, W> {
    /// A writer over a seekable sink: headers are back-patched, so
    /// entries normally carry no data descriptors.
    pub fn new(sink: W) -> OutputStream<'a, W> {
        OutputStream {
            sink: Box::new(WriteSeekWrapper::new(sink)),
            entries: Vec::new(),
            comment: String::new(),
            zip64_support: Zip64Support::Auto,
            default_level: Level::Default,
            unicode_names: false,
            base_flags: 0,
            current: None,
            closed: false,
        }
    }

    /// Runs `block` with a fresh stream over `io`, closes the stream on
    /// every exit path, and hands the sink back.
    pub fn write_buffer<F>(io: W, block: F) -> Result<W>
    where
        F: FnOnce(&mut OutputStream<'a, W>) -> Result<()>,
    {
        let mut stream = OutputStream::new(io);
        let block_result = block(&mut stream);
        let close_result = stream.close();
        block_result.and(close_result)?;
        Ok(stream.into_inner())
    }
}

impl<'a, W: Write + 'a> OutputStream<'a, W> {
    /// A writer over a forward-only sink. Every file entry gets bit 3
    /// and a trailing data descriptor, since nothing can be patched.
    pub fn new_streamable(sink: W) -> OutputStream<'a, W> {
        OutputStream {
            sink: Box::new(WriteWrapper::new(sink)),
            entries: Vec::new(),
            comment: String::new(),
            zip64_support: Zip64Support::Auto,
            default_level: Level::Default,
            unicode_names: false,
            base_flags: EXTENDED_LOCAL_HEADER_FLAG,
            current: None,
            closed: false,
        }
    }

    pub fn set_comment(&mut self, comment: &str) {
        self.comment = comment.to_owned();
    }

    pub fn set_zip64_support(&mut self, support: Zip64Support) {
        self.zip64_support = support;
    }

    pub fn set_default_compression_level(&mut self, level: Level) {
        self.default_level = level;
    }

    pub fn set_unicode_names(&mut self, unicode: bool) {
        self.unicode_names = unicode;
    }

    /// Entries finalised so far.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn current_offset(&mut self) -> Result<u64> {
        Ok(self.sink.get_written_bytes_count()?)
    }

    /// Opens `entry` for writing, finalising any entry already open.
    pub fn put_next_entry(&mut self, mut entry: Entry) -> Result<()> {
        self.ensure_open()?;
        self.finalize_current_entry()?;

        if entry.is_encrypted() {
            return Err(ArchiveError::Unsupported(
                "writing encrypted entries".to_owned(),
            ));
        }

        entry.general_purpose_flags |= self.base_flags;
        if !self.sink.can_seek() {
            entry.general_purpose_flags |= EXTENDED_LOCAL_HEADER_FLAG;
        }
        if entry.is_directory() {
            // Directories have known (zero) sizes even on forward-only
            // sinks, so they never take a data descriptor.
            entry.general_purpose_flags &= !EXTENDED_LOCAL_HEADER_FLAG;
        }

        entry.apply_level_flags();
        entry.apply_name_encoding_flags(self.unicode_names);

        // A known size past the 32-bit boundary reserves the ZIP64 extra
        // in the local header up front, so real sizes can be patched in.
        if !entry.is_incomplete() && entry.uncompressed_size >= u32::MAX as u64 {
            entry.zip64_reserved = true;
        }

        entry.local_header_offset = self.sink.get_written_bytes_count()?;
        let header_offset = entry.local_header_offset;

        let mut header = ArchiveDescriptor::new(128);
        entry.write_local_entry(&mut header);
        self.sink.write_all(header.buffer())?;

        debug!("opened entry {:?} at offset {}", entry.name(), header_offset);

        let codec = if entry.is_directory() {
            None
        } else {
            let level = match entry.compression_level {
                Level::Default => self.default_level,
                precise => precise,
            };
            Some(EntryCodec::new(entry.compression_method, level))
        };

        self.current = Some(OpenEntry {
            name_len: entry.name().len() as u64,
            header_offset,
            entry,
            codec,
        });
        Ok(())
    }

    /// Convenience form taking a name and per-entry options.
    pub fn put_next_entry_with(&mut self, name: &str, options: &EntryOptions) -> Result<()> {
        let mut entry = Entry::new(name)?;
        entry.compression_method = options.compression_method;
        entry.compression_level = options.compression_level;
        if let Some(time) = options.last_modified {
            entry.last_modified = time;
        }
        if let Some(mode) = options.unix_permissions {
            entry.set_unix_permissions(mode);
        }
        if let Some(comment) = &options.comment {
            entry.comment = comment.clone();
        }
        self.put_next_entry(entry)
    }

    /// Streams `bytes` into the open entry.
    pub fn write_data(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_open()?;

        let open = self
            .current
            .as_mut()
            .ok_or_else(|| ArchiveError::Argument("no entry is open for writing".to_owned()))?;

        let codec = open.codec.as_mut().ok_or_else(|| {
            ArchiveError::Argument(format!(
                "directory entry {:?} cannot be written to",
                open.entry.name()
            ))
        })?;

        codec.write(bytes, &mut *self.sink)?;
        Ok(())
    }

    /// Finishes the open entry: runs the codec to completion, then
    /// records the CRC and sizes either by patching the local header or
    /// by appending a data descriptor.
    pub fn finalize_current_entry(&mut self) -> Result<()> {
        let Some(open) = self.current.take() else {
            return Ok(());
        };
        let OpenEntry {
            mut entry,
            header_offset,
            name_len,
            codec,
        } = open;

        let totals = match codec {
            Some(codec) => codec.finish(&mut *self.sink)?,
            None => CodecTotals::default(),
        };

        if !entry.is_directory() {
            entry.crc32 = totals.crc32;
            entry.compressed_size = totals.compressed_size;
            entry.uncompressed_size = totals.uncompressed_size;
        }

        if entry.is_incomplete() {
            self.write_data_descriptor(&entry, &totals)?;
        } else if !entry.is_directory() {
            self.patch_local_header(&mut entry, header_offset, name_len)?;
        }

        debug!(
            "finalised entry {:?}: {} -> {} bytes, crc 0x{:08x}",
            entry.name(),
            entry.uncompressed_size,
            entry.compressed_size,
            entry.crc32
        );

        entry.dirty = false;
        self.entries.push(entry);
        Ok(())
    }

    fn write_data_descriptor(&mut self, entry: &Entry, totals: &CodecTotals) -> Result<()> {
        let wide = totals.compressed_size >= u32::MAX as u64
            || totals.uncompressed_size >= u32::MAX as u64
            || entry.zip64_reserved;

        let mut desc = ArchiveDescriptor::new(24);
        desc.write_u32(DATA_DESCRIPTOR_SIGNATURE);
        desc.write_u32(totals.crc32);
        if wide {
            desc.write_u64(totals.compressed_size);
            desc.write_u64(totals.uncompressed_size);
        } else {
            desc.write_u32(totals.compressed_size as u32);
            desc.write_u32(totals.uncompressed_size as u32);
        }
        self.sink.write_all(desc.buffer())?;
        Ok(())
    }

    /// Seeks back into the already-written local header to record the
    /// CRC and sizes, then returns to the end of the archive.
    fn patch_local_header(
        &mut self,
        entry: &mut Entry,
        header_offset: u64,
        name_len: u64,
    ) -> Result<()> {
        let end_position = self.sink.get_written_bytes_count()?;
        let overflow = entry.compressed_size >= u32::MAX as u64
            || entry.uncompressed_size >= u32::MAX as u64;

        if !entry.zip64_reserved && overflow {
            // The header reserved no ZIP64 extra and cannot grow, so the
            // entry converts to the streaming form: set bit 3 in place
            // and append a wide data descriptor.
            entry.general_purpose_flags |= EXTENDED_LOCAL_HEADER_FLAG;
            self.sink.seek_to(header_offset + FILE_HEADER_FLAGS_OFFSET)?;
            let mut patch = ArchiveDescriptor::new(2);
            patch.write_u16(entry.general_purpose_flags);
            self.sink.write_all(patch.buffer())?;

            self.sink.seek_to(end_position)?;
            let totals = CodecTotals {
                crc32: entry.crc32,
                compressed_size: entry.compressed_size,
                uncompressed_size: entry.uncompressed_size,
            };
            return self.write_data_descriptor(entry, &totals);
        }

        let mut patch = ArchiveDescriptor::new(12);
        patch.write_u32(entry.crc32);
        patch.write_u32(entry.compressed_size.min(u32::MAX as u64) as u32);
        patch.write_u32(entry.uncompressed_size.min(u32::MAX as u64) as u32);
        self.sink.seek_to(header_offset + FILE_HEADER_CRC_OFFSET)?;
        self.sink.write_all(patch.buffer())?;

        if entry.zip64_reserved {
            // The reserved record sits first in the extra field; skip
            // its id and length words and rewrite the two sizes.
            let zip64_values_offset = header_offset + FILE_HEADER_BASE_SIZE + name_len + 4;
            let mut patch = ArchiveDescriptor::new(16);
            patch.write_u64(entry.uncompressed_size);
            patch.write_u64(entry.compressed_size);
            self.sink.seek_to(zip64_values_offset)?;
            self.sink.write_all(patch.buffer())?;
        }

        self.sink.seek_to(end_position)?;
        Ok(())
    }

    /// Splices an already-compressed entry from another archive without
    /// recompressing it. `compressed` must be positioned at the entry's
    /// first payload byte.
    pub fn copy_raw_entry<R: Read + ?Sized>(
        &mut self,
        entry: &Entry,
        compressed: &mut R,
    ) -> Result<()> {
        self.ensure_open()?;
        self.finalize_current_entry()?;

        if entry.is_encrypted() {
            return Err(ArchiveError::Unsupported(
                "copying encrypted entries".to_owned(),
            ));
        }

        let mut copy = entry.clone();
        // Sizes and CRC are known from the central directory, so the
        // streaming flag (and its descriptor) is dropped.
        copy.general_purpose_flags &= !EXTENDED_LOCAL_HEADER_FLAG;
        copy.local_header_offset = self.sink.get_written_bytes_count()?;
        copy.zip64_reserved =
            copy.compressed_size >= u32::MAX as u64 || copy.uncompressed_size >= u32::MAX as u64;

        let mut header = ArchiveDescriptor::new(128);
        copy.write_local_entry(&mut header);
        self.sink.write_all(header.buffer())?;

        let mut limited = Read::take(&mut *compressed, copy.compressed_size);
        let copied = io::copy(&mut limited, &mut *self.sink)?;
        if copied != copy.compressed_size {
            return Err(ArchiveError::MalformedArchive(format!(
                "entry {:?} payload truncated: expected {} bytes, copied {}",
                copy.name(),
                copy.compressed_size,
                copied
            )));
        }

        copy.dirty = false;
        self.entries.push(copy);
        Ok(())
    }

    /// Finalises the open entry and appends the central directory and
    /// trailer records. Further writes fail; closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.finalize_current_entry()?;

        let central_directory_offset = self.sink.get_written_bytes_count()?;
        write_central_directory(
            &mut *self.sink,
            &self.entries,
            &self.comment,
            central_directory_offset,
            self.zip64_support,
        )?;

        self.sink.flush()?;
        self.closed = true;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Hands back the underlying sink. Callers should `close` first.
    pub fn into_inner(self) -> W {
        self.sink.get_into()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(ArchiveError::closed_stream())
        } else {
            Ok(())
        }
    }
}

impl<'a, W: Write + 'a> Write for OutputStream<'a, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_data(buf)
            .map_err(|e| io::Error::other(e.to_string()))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::other("stream has been closed"));
        }
        Ok(())
    }
}
