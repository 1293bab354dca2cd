use std::io::{self, Read, Seek, SeekFrom, Write};

use zipedit::{
    CentralDirectoryEnd, CompressionMethod, Entry, EntryOptions, EntryReader, OutputStream,
};

const HEAD_CAPACITY: usize = 64 * 1024;
const TAIL_CAPACITY: usize = 64 * 1024;

/// A counting sink that keeps only the head and tail windows of what
/// was written. Every byte between the windows was a zero, so the
/// archive can be faithfully re-read without ever materialising it.
struct SparseSink {
    head: Vec<u8>,
    tail: Vec<u8>,
    len: u64,
}

impl SparseSink {
    fn new() -> SparseSink {
        SparseSink {
            head: Vec::with_capacity(HEAD_CAPACITY),
            tail: Vec::with_capacity(TAIL_CAPACITY),
            len: 0,
        }
    }
}

impl Write for SparseSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.head.len() < HEAD_CAPACITY {
            let take = buf.len().min(HEAD_CAPACITY - self.head.len());
            self.head.extend_from_slice(&buf[..take]);
        }

        if buf.len() >= TAIL_CAPACITY {
            self.tail.clear();
            self.tail.extend_from_slice(&buf[buf.len() - TAIL_CAPACITY..]);
        } else {
            let excess = (self.tail.len() + buf.len()).saturating_sub(TAIL_CAPACITY);
            if excess > 0 {
                self.tail.drain(..excess);
            }
            self.tail.extend_from_slice(buf);
        }

        self.len += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Seekable read view over a `SparseSink`; the gap between the head and
/// tail windows reads back as zeros.
struct SparseCursor {
    head: Vec<u8>,
    tail: Vec<u8>,
    tail_start: u64,
    len: u64,
    pos: u64,
}

impl SparseCursor {
    fn new(sink: SparseSink) -> SparseCursor {
        SparseCursor {
            tail_start: sink.len - sink.tail.len() as u64,
            head: sink.head,
            tail: sink.tail,
            len: sink.len,
            pos: 0,
        }
    }
}

impl Read for SparseCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len || buf.is_empty() {
            return Ok(0);
        }

        let count = if self.pos < self.head.len() as u64 {
            let start = self.pos as usize;
            let take = buf.len().min(self.head.len() - start);
            buf[..take].copy_from_slice(&self.head[start..start + take]);
            take
        } else if self.pos >= self.tail_start {
            let start = (self.pos - self.tail_start) as usize;
            let take = buf.len().min(self.tail.len() - start);
            buf[..take].copy_from_slice(&self.tail[start..start + take]);
            take
        } else {
            let take = buf.len().min((self.tail_start - self.pos) as usize);
            buf[..take].fill(0);
            take
        };

        self.pos += count as u64;
        Ok(count)
    }
}

impl Seek for SparseCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(delta) => self.len as i64 + delta,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

/// An entry bigger than 4 GiB promotes the archive to ZIP64: the entry
/// carries the 0x0001 extra, the trailer grows the ZIP64 records, and
/// the sizes read back correctly.
#[test]
fn zip64_auto_promotion_past_4_gib() {
    const SIZE: u64 = u32::MAX as u64 + 65_536;

    let mut zos = OutputStream::new_streamable(SparseSink::new());
    zos.put_next_entry_with(
        "huge.bin",
        &EntryOptions::default().compression_method(CompressionMethod::Store),
    )
    .unwrap();

    let chunk = vec![0u8; 64 * 1024];
    let mut written = 0u64;
    while written < SIZE {
        let take = chunk.len().min((SIZE - written) as usize);
        zos.write_data(&chunk[..take]).unwrap();
        written += take as u64;
    }
    zos.close().unwrap();

    let finished = zos.entries()[0].clone();
    assert_eq!(finished.uncompressed_size, SIZE);
    assert_eq!(finished.compressed_size, SIZE);

    let sink = zos.into_inner();
    assert!(sink.len > SIZE);

    // The ZIP64 end of central directory must be in the trailer.
    let zip64_eocd_sig = 0x06064b50u32.to_le_bytes();
    assert!(sink.tail.windows(4).any(|w| w == zip64_eocd_sig));
    let zip64_locator_sig = 0x07064b50u32.to_le_bytes();
    assert!(sink.tail.windows(4).any(|w| w == zip64_locator_sig));

    // Reopen through the central directory.
    let mut cursor = SparseCursor::new(sink);
    let (entries, end) = CentralDirectoryEnd::read_from(&mut cursor).unwrap();
    assert_eq!(end.total_entries, 1);

    let entry = &entries[0];
    assert_eq!(entry.name(), "huge.bin");
    assert_eq!(entry.uncompressed_size, SIZE);
    assert_eq!(entry.compressed_size, SIZE);
    assert!(entry.extra.zip64().is_some(), "0x0001 extra field missing");

    // The payload itself reads back (all zeros).
    cursor
        .seek(SeekFrom::Start(entry.local_header_offset))
        .unwrap();
    let mut shell = Entry::new("placeholder").unwrap();
    shell.read_local_entry(&mut cursor).unwrap();
    assert!(shell.is_incomplete());

    let mut reader = EntryReader::new(
        CompressionMethod::Store,
        &mut cursor,
        entry.compressed_size,
        entry.crc32,
        entry.uncompressed_size,
    );
    let mut first = vec![0xFFu8; 4096];
    reader.read_exact(&mut first).unwrap();
    assert_eq!(first, vec![0u8; 4096]);
}

/// Small archives stay plain unless ZIP64 emission is forced.
#[test]
fn small_archive_stays_plain() {
    let mut zos = OutputStream::new(std::io::Cursor::new(Vec::new()));
    zos.put_next_entry_with(
        "tiny.txt",
        &EntryOptions::default().compression_method(CompressionMethod::Store),
    )
    .unwrap();
    zos.write_data(b"tiny").unwrap();
    zos.close().unwrap();
    let bytes = zos.into_inner().into_inner();

    let zip64_eocd_sig = 0x06064b50u32.to_le_bytes();
    assert!(!bytes.windows(4).any(|w| w == zip64_eocd_sig));
}
