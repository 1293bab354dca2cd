use std::io::{Read, Seek, SeekFrom};

use crate::error::{ArchiveError, Result};

/// Little-endian byte builder for the fixed-layout archive records.
///
/// Records are assembled in memory and written to the sink in one call,
/// which keeps the emit code close to the record layout tables.
#[derive(Debug, Default)]
pub struct ArchiveDescriptor {
    buffer: Vec<u8>,
}

impl ArchiveDescriptor {
    pub fn new(capacity: usize) -> ArchiveDescriptor {
        ArchiveDescriptor {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, val: u8) {
        self.buffer.extend_from_slice(&val.to_le_bytes());
    }

    pub fn write_u16(&mut self, val: u16) {
        self.buffer.extend_from_slice(&val.to_le_bytes());
    }

    pub fn write_u32(&mut self, val: u32) {
        self.buffer.extend_from_slice(&val.to_le_bytes());
    }

    pub fn write_i32(&mut self, val: i32) {
        self.buffer.extend_from_slice(&val.to_le_bytes());
    }

    pub fn write_u64(&mut self, val: u64) {
        self.buffer.extend_from_slice(&val.to_le_bytes());
    }

    pub fn write_str(&mut self, val: &str) {
        self.write_bytes(val.as_bytes());
    }

    pub fn write_bytes(&mut self, val: &[u8]) {
        self.buffer.extend_from_slice(val);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn finish(self) -> Vec<u8> {
        self.buffer
    }
}

macro_rules! read_type {
    ($self:expr, $stream:expr, $typ:ty) => {{
        let upper_bound = $self.index + ::std::mem::size_of::<$typ>();
        if upper_bound > $stream.len() {
            return Err(ArchiveError::MalformedArchive(format!(
                "record truncated reading {} at offset {}",
                stringify!($typ),
                $self.index
            )));
        }

        let read: [u8; ::std::mem::size_of::<$typ>()] =
            $stream[$self.index..upper_bound].try_into().unwrap();
        let value = <$typ>::from_le_bytes(read);

        $self.index = upper_bound;

        value
    }};
}

/// Index-tracking little-endian reader over a record already in memory.
#[derive(Debug, Default)]
pub struct ArchiveDescriptorReader {
    index: usize,
}

impl ArchiveDescriptorReader {
    pub fn new() -> ArchiveDescriptorReader {
        ArchiveDescriptorReader { index: 0 }
    }

    pub fn get_index(&self) -> usize {
        self.index
    }

    pub fn read_u8(&mut self, stream: &[u8]) -> Result<u8> {
        Ok(read_type!(self, stream, u8))
    }

    pub fn read_u16(&mut self, stream: &[u8]) -> Result<u16> {
        Ok(read_type!(self, stream, u16))
    }

    pub fn read_u32(&mut self, stream: &[u8]) -> Result<u32> {
        Ok(read_type!(self, stream, u32))
    }

    pub fn read_i32(&mut self, stream: &[u8]) -> Result<i32> {
        Ok(read_type!(self, stream, i32))
    }

    pub fn read_u64(&mut self, stream: &[u8]) -> Result<u64> {
        Ok(read_type!(self, stream, u64))
    }

    pub fn read_bytes(&mut self, stream: &[u8], len: usize) -> Result<Vec<u8>> {
        let upper_bound = self.index + len;
        if upper_bound > stream.len() {
            return Err(ArchiveError::MalformedArchive(format!(
                "record truncated reading {} bytes at offset {}",
                len, self.index
            )));
        }

        let value = stream[self.index..upper_bound].to_owned();
        self.index = upper_bound;
        Ok(value)
    }

    pub fn read_utf8_string(&mut self, stream: &[u8], len: usize) -> Result<String> {
        let raw = self.read_bytes(stream, len)?;
        String::from_utf8(raw)
            .map_err(|e| ArchiveError::MalformedArchive(format!("invalid UTF-8 in record: {}", e)))
    }
}

const BACKWARD_SCAN_CHUNK: u64 = 4096;

/// Scans backwards from the end of `reader` for a 4-byte signature.
///
/// The scan is chunked; consecutive chunks overlap by three bytes so a
/// signature straddling a chunk boundary is still found. At most
/// `max_search` bytes counted from the end of the stream are examined.
/// Returns the absolute offset of the last occurrence.
pub(crate) fn scan_backwards_for_signature<R: Read + Seek>(
    reader: &mut R,
    signature: u32,
    max_search: u64,
) -> Result<u64> {
    let needle = signature.to_le_bytes();
    let len = reader.seek(SeekFrom::End(0))?;

    if len < needle.len() as u64 {
        return Err(ArchiveError::MalformedArchive(format!(
            "stream of {} bytes cannot hold signature 0x{:08x}",
            len, signature
        )));
    }

    let floor = len.saturating_sub(max_search);
    let mut buffer = vec![0u8; BACKWARD_SCAN_CHUNK as usize];
    let mut end = len;

    loop {
        let start = end.saturating_sub(BACKWARD_SCAN_CHUNK).max(floor);
        let size = (end - start) as usize;

        reader.seek(SeekFrom::Start(start))?;
        reader.read_exact(&mut buffer[..size])?;

        if let Some(pos) = buffer[..size]
            .windows(needle.len())
            .rposition(|window| window == needle)
        {
            return Ok(start + pos as u64);
        }

        if start == floor {
            return Err(ArchiveError::MalformedArchive(format!(
                "signature 0x{:08x} not found in the final {} bytes",
                signature,
                len - floor
            )));
        }

        // Overlap so a signature split across chunks is seen whole.
        end = start + needle.len() as u64 - 1;
    }
}
