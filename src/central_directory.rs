use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;

use crate::constants::{
    CENTRAL_DIRECTORY_END_SIGNATURE, END_OF_CENTRAL_DIR_MAX_SEARCH,
    VERSION_USES_ZIP64_FORMAT_EXTENSIONS, ZIP64_CENTRAL_DIRECTORY_END_SIGNATURE,
    ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIGNATURE, ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIZE,
};
use crate::descriptor::{scan_backwards_for_signature, ArchiveDescriptor};
use crate::entry::{Entry, EntrySource};
use crate::error::{ArchiveError, Result};
use crate::options::Zip64Support;

/// The parsed trailer of an archive: entry count, directory span and
/// archive comment, with 64-bit values folded in from the ZIP64 records
/// when present.
#[derive(Debug, Default)]
pub struct CentralDirectoryEnd {
    pub total_entries: u64,
    pub central_directory_size: u64,
    pub central_directory_offset: u64,
    pub comment: String,
}

impl CentralDirectoryEnd {
    /// Parses the trailer and the full central directory of `reader`.
    pub fn read_from<R: Read + Seek>(reader: &mut R) -> Result<(Vec<Entry>, CentralDirectoryEnd)> {
        read_central_directory(reader)
    }
}

/// Locates and parses the end of central directory record, following
/// the ZIP64 locator when any field is saturated, then reads every
/// central directory file header in order.
pub(crate) fn read_central_directory<R: Read + Seek>(
    reader: &mut R,
) -> Result<(Vec<Entry>, CentralDirectoryEnd)> {
    let end = read_end_of_central_directory(reader)?;
    debug!(
        "central directory: {} entries, {} bytes at offset {}",
        end.total_entries, end.central_directory_size, end.central_directory_offset
    );

    reader.seek(SeekFrom::Start(end.central_directory_offset))?;
    let mut entries = Vec::with_capacity(end.total_entries.min(1 << 16) as usize);
    for _ in 0..end.total_entries {
        let mut entry = Entry::empty();
        entry.read_c_dir_entry(reader)?;
        entry.source = EntrySource::Archive;
        entries.push(entry);
    }

    let read_size = reader.stream_position()? - end.central_directory_offset;
    if read_size != end.central_directory_size {
        return Err(ArchiveError::MalformedArchive(format!(
            "central directory declared {} bytes but {} entries span {}",
            end.central_directory_size, end.total_entries, read_size
        )));
    }

    Ok((entries, end))
}

fn read_end_of_central_directory<R: Read + Seek>(reader: &mut R) -> Result<CentralDirectoryEnd> {
    let eocd_offset = scan_backwards_for_signature(
        reader,
        CENTRAL_DIRECTORY_END_SIGNATURE,
        END_OF_CENTRAL_DIR_MAX_SEARCH,
    )?;

    reader.seek(SeekFrom::Start(eocd_offset + 4))?;
    let disk_number = reader.read_u16::<LittleEndian>()?;
    let central_directory_disk = reader.read_u16::<LittleEndian>()?;
    let entries_on_this_disk = reader.read_u16::<LittleEndian>()?;
    let total_entries = reader.read_u16::<LittleEndian>()?;
    let central_directory_size = reader.read_u32::<LittleEndian>()?;
    let central_directory_offset = reader.read_u32::<LittleEndian>()?;
    let comment_len = reader.read_u16::<LittleEndian>()? as usize;

    if disk_number != 0 || central_directory_disk != 0 {
        return Err(ArchiveError::Unsupported(
            "split (multi-disk) archives".to_owned(),
        ));
    }

    let mut comment_raw = vec![0u8; comment_len];
    reader.read_exact(&mut comment_raw).map_err(|_| {
        ArchiveError::MalformedArchive("archive comment extends past end of file".to_owned())
    })?;
    let comment = String::from_utf8_lossy(&comment_raw).into_owned();

    let saturated = entries_on_this_disk == u16::MAX
        || total_entries == u16::MAX
        || central_directory_size == u32::MAX
        || central_directory_offset == u32::MAX;

    if !saturated {
        return Ok(CentralDirectoryEnd {
            total_entries: total_entries as u64,
            central_directory_size: central_directory_size as u64,
            central_directory_offset: central_directory_offset as u64,
            comment,
        });
    }

    debug!("end of central directory is saturated, following the zip64 locator");
    let mut end = read_zip64_end_of_central_directory(reader, eocd_offset)?;
    end.comment = comment;
    Ok(end)
}

/// The ZIP64 locator sits immediately before the end of central
/// directory record and points at the ZIP64 EOCD.
fn read_zip64_end_of_central_directory<R: Read + Seek>(
    reader: &mut R,
    eocd_offset: u64,
) -> Result<CentralDirectoryEnd> {
    if eocd_offset < ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIZE {
        return Err(ArchiveError::MalformedArchive(
            "no room for a zip64 end of central directory locator".to_owned(),
        ));
    }

    reader.seek(SeekFrom::Start(
        eocd_offset - ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIZE,
    ))?;
    let signature = reader.read_u32::<LittleEndian>()?;
    if signature != ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIGNATURE {
        return Err(ArchiveError::MalformedArchive(format!(
            "expected zip64 locator signature, found 0x{:08x}",
            signature
        )));
    }

    let _eocd64_disk = reader.read_u32::<LittleEndian>()?;
    let eocd64_offset = reader.read_u64::<LittleEndian>()?;
    let total_disks = reader.read_u32::<LittleEndian>()?;
    if total_disks > 1 {
        return Err(ArchiveError::Unsupported(
            "split (multi-disk) archives".to_owned(),
        ));
    }

    reader.seek(SeekFrom::Start(eocd64_offset))?;
    let signature = reader.read_u32::<LittleEndian>()?;
    if signature != ZIP64_CENTRAL_DIRECTORY_END_SIGNATURE {
        return Err(ArchiveError::MalformedArchive(format!(
            "expected zip64 end of central directory signature, found 0x{:08x}",
            signature
        )));
    }

    let _record_size = reader.read_u64::<LittleEndian>()?;
    let _version_made_by = reader.read_u16::<LittleEndian>()?;
    let _version_needed = reader.read_u16::<LittleEndian>()?;
    let _disk_number = reader.read_u32::<LittleEndian>()?;
    let _central_directory_disk = reader.read_u32::<LittleEndian>()?;
    let _entries_on_this_disk = reader.read_u64::<LittleEndian>()?;
    let total_entries = reader.read_u64::<LittleEndian>()?;
    let central_directory_size = reader.read_u64::<LittleEndian>()?;
    let central_directory_offset = reader.read_u64::<LittleEndian>()?;

    Ok(CentralDirectoryEnd {
        total_entries,
        central_directory_size,
        central_directory_offset,
        comment: String::new(),
    })
}

/// Emits the central directory file headers, the ZIP64 records when
/// needed (or demanded), and the end of central directory record.
/// Returns the number of bytes written.
pub(crate) fn write_central_directory<S: Write + ?Sized>(
    sink: &mut S,
    entries: &[Entry],
    comment: &str,
    central_directory_offset: u64,
    zip64_support: Zip64Support,
) -> Result<u64> {
    let mut written = 0u64;
    let mut header = ArchiveDescriptor::new(512);

    for entry in entries {
        entry.write_c_dir_entry(&mut header);
        sink.write_all(header.buffer())?;
        written += header.len() as u64;
        header.clear();
    }

    let central_directory_size = written;
    let total_entries = entries.len() as u64;

    let overflows = total_entries >= u16::MAX as u64
        || central_directory_size >= u32::MAX as u64
        || central_directory_offset >= u32::MAX as u64
        || entries
            .iter()
            .any(|e| e.local_header_offset >= u32::MAX as u64);

    let emit_zip64 = match zip64_support {
        Zip64Support::Always => true,
        Zip64Support::Auto => overflows,
        // Suppresses pre-emptive emission only; genuine overflow still
        // promotes the archive.
        Zip64Support::Never => overflows,
    };

    if emit_zip64 {
        let eocd64_offset = central_directory_offset + central_directory_size;
        let mut desc = ArchiveDescriptor::new(
            (ZIP64_END_OF_CENTRAL_DIRECTORY_SIZE_TOTAL + ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIZE)
                as usize,
        );

        debug!(
            "emitting zip64 end of central directory at offset {}",
            eocd64_offset
        );

        desc.write_u32(ZIP64_CENTRAL_DIRECTORY_END_SIGNATURE);
        desc.write_u64(ZIP64_END_OF_CENTRAL_DIRECTORY_SIZE_TOTAL - 12);
        desc.write_u16(VERSION_USES_ZIP64_FORMAT_EXTENSIONS);
        desc.write_u16(VERSION_USES_ZIP64_FORMAT_EXTENSIONS);
        desc.write_u32(0); // number of this disk
        desc.write_u32(0); // disk with the central directory
        desc.write_u64(total_entries);
        desc.write_u64(total_entries);
        desc.write_u64(central_directory_size);
        desc.write_u64(central_directory_offset);

        desc.write_u32(ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIGNATURE);
        desc.write_u32(0); // disk with the zip64 end of central directory
        desc.write_u64(eocd64_offset);
        desc.write_u32(1); // total number of disks

        sink.write_all(desc.buffer())?;
        written += desc.len() as u64;
    }

    let comment_bytes = &comment.as_bytes()[..comment.len().min(u16::MAX as usize)];
    let mut desc = ArchiveDescriptor::new(64 + comment_bytes.len());
    desc.write_u32(CENTRAL_DIRECTORY_END_SIGNATURE);
    desc.write_u16(0); // number of this disk
    desc.write_u16(0); // disk with the central directory
    desc.write_u16(total_entries.min(u16::MAX as u64) as u16);
    desc.write_u16(total_entries.min(u16::MAX as u64) as u16);
    desc.write_u32(central_directory_size.min(u32::MAX as u64) as u32);
    desc.write_u32(central_directory_offset.min(u32::MAX as u64) as u32);
    desc.write_u16(comment_bytes.len() as u16);
    desc.write_bytes(comment_bytes);

    sink.write_all(desc.buffer())?;
    written += desc.len() as u64;

    Ok(written)
}

const ZIP64_END_OF_CENTRAL_DIRECTORY_SIZE_TOTAL: u64 =
    crate::constants::ZIP64_END_OF_CENTRAL_DIRECTORY_SIZE;

#[cfg(test)]
mod test {
    use super::*;
    use crate::compression::CompressionMethod;
    use std::io::Cursor;

    fn sample_entry(name: &str, offset: u64) -> Entry {
        let mut entry = Entry::new(name).unwrap();
        entry.compression_method = CompressionMethod::Store;
        entry.crc32 = 0xABCD;
        entry.compressed_size = 4;
        entry.uncompressed_size = 4;
        entry.local_header_offset = offset;
        entry
    }

    #[test]
    fn test_write_and_read_back() {
        let entries = vec![sample_entry("b.txt", 0), sample_entry("a.txt", 40)];

        let mut buffer = Vec::new();
        write_central_directory(&mut buffer, &entries, "hello", 0, Zip64Support::Auto).unwrap();

        let mut cursor = Cursor::new(buffer);
        let (parsed, end) = read_central_directory(&mut cursor).unwrap();

        assert_eq!(end.total_entries, 2);
        assert_eq!(end.comment, "hello");
        assert_eq!(parsed.len(), 2);
        // Emission order is preserved, not sorted.
        assert_eq!(parsed[0].name(), "b.txt");
        assert_eq!(parsed[1].name(), "a.txt");
        assert_eq!(parsed[1].local_header_offset, 40);
    }

    #[test]
    fn test_zip64_emitted_when_forced() {
        let entries = vec![sample_entry("a", 0)];

        let mut auto = Vec::new();
        write_central_directory(&mut auto, &entries, "", 0, Zip64Support::Auto).unwrap();
        let mut always = Vec::new();
        write_central_directory(&mut always, &entries, "", 0, Zip64Support::Always).unwrap();

        let zip64_sig = ZIP64_CENTRAL_DIRECTORY_END_SIGNATURE.to_le_bytes();
        let has_sig = |data: &[u8]| data.windows(4).any(|w| w == zip64_sig);
        assert!(!has_sig(&auto));
        assert!(has_sig(&always));

        // The forced form still reads back.
        let mut cursor = Cursor::new(always);
        let (parsed, _) = read_central_directory(&mut cursor).unwrap();
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn test_zip64_promotion_on_large_offset() {
        // An entry past the 32-bit boundary must promote even with
        // pre-emptive emission switched off.
        let entries = vec![sample_entry("far", 5_000_000_000)];

        let mut buffer = Vec::new();
        write_central_directory(&mut buffer, &entries, "", 5_000_000_100, Zip64Support::Never)
            .unwrap();

        let zip64_sig = ZIP64_CENTRAL_DIRECTORY_END_SIGNATURE.to_le_bytes();
        assert!(buffer.windows(4).any(|w| w == zip64_sig));
    }

    #[test]
    fn test_missing_eocd_is_malformed() {
        let mut cursor = Cursor::new(vec![0u8; 4096]);
        let err = read_central_directory(&mut cursor).unwrap_err();
        assert!(matches!(err, ArchiveError::MalformedArchive(_)));
    }

    #[test]
    fn test_count_mismatch_is_malformed() {
        let entries = vec![sample_entry("only", 0)];
        let mut buffer = Vec::new();
        write_central_directory(&mut buffer, &entries, "", 0, Zip64Support::Auto).unwrap();

        // Claim two entries in the trailer while only one header exists.
        let total_offset = buffer.len() - 12;
        let on_disk_offset = buffer.len() - 14;
        buffer[total_offset] = 2;
        buffer[on_disk_offset] = 2;

        let mut cursor = Cursor::new(buffer);
        let err = read_central_directory(&mut cursor).unwrap_err();
        assert!(matches!(err, ArchiveError::MalformedArchive(_)));
    }

    #[test]
    fn test_comment_round_trip() {
        let entries: Vec<Entry> = Vec::new();
        let mut buffer = Vec::new();
        write_central_directory(
            &mut buffer,
            &entries,
            "the archive comment",
            0,
            Zip64Support::Auto,
        )
        .unwrap();

        let mut cursor = Cursor::new(buffer);
        let (_, end) = read_central_directory(&mut cursor).unwrap();
        assert_eq!(end.comment, "the archive comment");
    }
}
