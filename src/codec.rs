use std::io::{self, BufRead, Read, Take, Write};

use crc32fast::Hasher;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::{Decompress, FlushDecompress, Status};

use crate::compression::{CompressionMethod, Level};
use crate::error::{ArchiveError, Result};

/// What a finished compressor reports back for the headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecTotals {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

enum CodecKind {
    Stored,
    Deflated(DeflateEncoder<Vec<u8>>),
}

/// Push-mode compressor for one entry.
///
/// Bytes go in uncompressed; the compressed form is drained into the
/// caller's sink on every call, so nothing accumulates beyond the
/// encoder's working buffer. A CRC-32 of the plaintext runs alongside.
pub(crate) struct EntryCodec {
    kind: CodecKind,
    hasher: Hasher,
    uncompressed: u64,
    compressed: u64,
}

impl EntryCodec {
    pub fn new(method: CompressionMethod, level: Level) -> EntryCodec {
        let kind = match method {
            CompressionMethod::Store => CodecKind::Stored,
            CompressionMethod::Deflate => {
                CodecKind::Deflated(DeflateEncoder::new(Vec::new(), level.into()))
            }
        };

        EntryCodec {
            kind,
            hasher: Hasher::new(),
            uncompressed: 0,
            compressed: 0,
        }
    }

    pub fn write<S: Write + ?Sized>(&mut self, input: &[u8], sink: &mut S) -> io::Result<()> {
        self.hasher.update(input);
        self.uncompressed += input.len() as u64;

        match &mut self.kind {
            CodecKind::Stored => {
                sink.write_all(input)?;
                self.compressed += input.len() as u64;
            }
            CodecKind::Deflated(encoder) => {
                encoder.write_all(input)?;
                let pending = encoder.get_mut();
                if !pending.is_empty() {
                    sink.write_all(pending)?;
                    self.compressed += pending.len() as u64;
                    pending.clear();
                }
            }
        }

        Ok(())
    }

    pub fn finish<S: Write + ?Sized>(self, sink: &mut S) -> io::Result<CodecTotals> {
        let mut compressed = self.compressed;

        if let CodecKind::Deflated(encoder) = self.kind {
            let tail = encoder.finish()?;
            sink.write_all(&tail)?;
            compressed += tail.len() as u64;
        }

        Ok(CodecTotals {
            crc32: self.hasher.finalize(),
            compressed_size: compressed,
            uncompressed_size: self.uncompressed,
        })
    }
}

/// A reader that feeds everything it yields through a CRC-32.
pub struct Crc32Reader<R> {
    inner: R,
    hasher: Hasher,
    bytes_read: u64,
}

impl<R> Crc32Reader<R> {
    pub fn new(inner: R) -> Crc32Reader<R> {
        Crc32Reader {
            inner,
            hasher: Hasher::new(),
            bytes_read: 0,
        }
    }

    pub fn crc32(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        self.hasher.update(&buf[..count]);
        self.bytes_read += count as u64;
        Ok(count)
    }
}

enum EntryDecoder<R: Read> {
    Stored(Take<R>),
    Deflated(DeflateDecoder<Take<R>>),
}

/// Pull-mode reader for one entry's plaintext, bounded by the declared
/// compressed size. After the payload is exhausted, `verify` checks the
/// CRC and the declared sizes.
pub struct EntryReader<R: Read> {
    decoder: EntryDecoder<R>,
    hasher: Hasher,
    produced: u64,
    compressed_limit: u64,
    expected_crc32: u32,
    expected_size: u64,
}

impl<R: Read> EntryReader<R> {
    pub fn new(
        method: CompressionMethod,
        reader: R,
        compressed_size: u64,
        expected_crc32: u32,
        expected_size: u64,
    ) -> EntryReader<R> {
        let bounded = reader.take(compressed_size);
        let decoder = match method {
            CompressionMethod::Store => EntryDecoder::Stored(bounded),
            CompressionMethod::Deflate => EntryDecoder::Deflated(DeflateDecoder::new(bounded)),
        };

        EntryReader {
            decoder,
            hasher: Hasher::new(),
            produced: 0,
            compressed_limit: compressed_size,
            expected_crc32,
            expected_size,
        }
    }

    pub fn crc32(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.produced
    }

    pub fn compressed_size(&self) -> u64 {
        match &self.decoder {
            EntryDecoder::Stored(bounded) => self.compressed_limit - bounded.limit(),
            EntryDecoder::Deflated(decoder) => decoder.total_in(),
        }
    }

    /// CRC and size checks, meaningful once the reader hit EOF.
    pub fn verify(&self, validate_sizes: bool) -> Result<()> {
        let actual = self.crc32();
        if actual != self.expected_crc32 {
            return Err(ArchiveError::Decompression(format!(
                "crc mismatch: expected 0x{:08x}, got 0x{:08x}",
                self.expected_crc32, actual
            )));
        }

        if validate_sizes && self.produced != self.expected_size {
            return Err(ArchiveError::Decompression(format!(
                "size mismatch: expected {} bytes, got {}",
                self.expected_size, self.produced
            )));
        }

        Ok(())
    }
}

impl<R: Read> Read for EntryReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = match &mut self.decoder {
            EntryDecoder::Stored(bounded) => bounded.read(buf)?,
            EntryDecoder::Deflated(decoder) => decoder.read(buf)?,
        };
        self.hasher.update(&buf[..count]);
        self.produced += count as u64;
        Ok(count)
    }
}

/// Raw DEFLATE state machine for forward streams where the compressed
/// size is unknown until the stream's own end marker.
///
/// Input is pulled through `BufRead::fill_buf`/`consume`, so bytes after
/// the end marker (a trailing data descriptor, the next header) stay in
/// the source buffer for the caller.
pub(crate) struct StreamInflater {
    decompress: Decompress,
    hasher: Hasher,
    finished: bool,
}

impl StreamInflater {
    pub fn new() -> StreamInflater {
        StreamInflater {
            decompress: Decompress::new(false),
            hasher: Hasher::new(),
            finished: false,
        }
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn crc32(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    pub fn total_in(&self) -> u64 {
        self.decompress.total_in()
    }

    pub fn total_out(&self) -> u64 {
        self.decompress.total_out()
    }

    pub fn read<R: BufRead>(&mut self, src: &mut R, out: &mut [u8]) -> io::Result<usize> {
        if self.finished || out.is_empty() {
            return Ok(0);
        }

        loop {
            let input = src.fill_buf()?;
            let at_eof = input.is_empty();
            let flush = if at_eof {
                FlushDecompress::Finish
            } else {
                FlushDecompress::None
            };

            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            let status = self
                .decompress
                .decompress(input, out, flush)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

            let consumed = (self.decompress.total_in() - before_in) as usize;
            let produced = (self.decompress.total_out() - before_out) as usize;
            src.consume(consumed);
            self.hasher.update(&out[..produced]);

            match status {
                Status::StreamEnd => {
                    self.finished = true;
                    return Ok(produced);
                }
                _ if produced > 0 => return Ok(produced),
                _ if at_eof => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "deflate stream ended without its end marker",
                    ));
                }
                _ => continue,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::{BufReader, Cursor};

    fn crc_of(data: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    #[test]
    fn test_stored_codec_is_identity() {
        let mut sink = Vec::new();
        let mut codec = EntryCodec::new(CompressionMethod::Store, Level::Default);
        codec.write(b"hello ", &mut sink).unwrap();
        codec.write(b"world", &mut sink).unwrap();
        let totals = codec.finish(&mut sink).unwrap();

        assert_eq!(sink, b"hello world");
        assert_eq!(totals.compressed_size, 11);
        assert_eq!(totals.uncompressed_size, 11);
        assert_eq!(totals.crc32, crc_of(b"hello world"));
    }

    #[test]
    fn test_deflate_round_trip() {
        let plain: Vec<u8> = (0..10_000u32).flat_map(|i| i.to_le_bytes()).collect();

        let mut sink = Vec::new();
        let mut codec = EntryCodec::new(CompressionMethod::Deflate, Level::Default);
        for chunk in plain.chunks(977) {
            codec.write(chunk, &mut sink).unwrap();
        }
        let totals = codec.finish(&mut sink).unwrap();

        assert_eq!(totals.uncompressed_size, plain.len() as u64);
        assert_eq!(totals.compressed_size, sink.len() as u64);
        assert!(totals.compressed_size < totals.uncompressed_size);

        let mut reader = EntryReader::new(
            CompressionMethod::Deflate,
            Cursor::new(&sink),
            totals.compressed_size,
            totals.crc32,
            totals.uncompressed_size,
        );
        let mut decoded = Vec::new();
        reader.read_to_end(&mut decoded).unwrap();

        assert_eq!(decoded, plain);
        assert_eq!(reader.compressed_size(), totals.compressed_size);
        assert_eq!(reader.uncompressed_size(), totals.uncompressed_size);
        reader.verify(true).unwrap();
    }

    #[test]
    fn test_entry_reader_detects_crc_mismatch() {
        let mut reader = EntryReader::new(
            CompressionMethod::Store,
            Cursor::new(b"payload".to_vec()),
            7,
            0xDEADBEEF,
            7,
        );
        let mut decoded = Vec::new();
        reader.read_to_end(&mut decoded).unwrap();

        let err = reader.verify(true).unwrap_err();
        assert!(matches!(err, ArchiveError::Decompression(_)));
    }

    #[test]
    fn test_entry_reader_detects_size_mismatch() {
        let data = b"12345678".to_vec();
        let crc = crc_of(&data);
        let mut reader = EntryReader::new(CompressionMethod::Store, Cursor::new(data), 8, crc, 9);
        let mut decoded = Vec::new();
        reader.read_to_end(&mut decoded).unwrap();

        assert!(reader.verify(false).is_ok());
        let err = reader.verify(true).unwrap_err();
        assert!(matches!(err, ArchiveError::Decompression(_)));
    }

    #[test]
    fn test_stream_inflater_leaves_trailing_bytes() {
        let plain = b"stream me through the raw inflater".repeat(50);

        let mut sink = Vec::new();
        let mut codec = EntryCodec::new(CompressionMethod::Deflate, Level::Default);
        codec.write(&plain, &mut sink).unwrap();
        let totals = codec.finish(&mut sink).unwrap();

        // A descriptor-like trailer follows the compressed payload.
        sink.extend_from_slice(&[0xAA; 16]);

        let mut src = BufReader::new(Cursor::new(sink));
        let mut inflater = StreamInflater::new();
        let mut decoded = Vec::new();
        let mut chunk = [0u8; 512];
        loop {
            let n = inflater.read(&mut src, &mut chunk).unwrap();
            if n == 0 {
                break;
            }
            decoded.extend_from_slice(&chunk[..n]);
        }

        assert!(inflater.finished());
        assert_eq!(decoded, plain);
        assert_eq!(inflater.total_in(), totals.compressed_size);
        assert_eq!(inflater.crc32(), totals.crc32);

        let mut trailer = Vec::new();
        src.read_to_end(&mut trailer).unwrap();
        assert_eq!(trailer, vec![0xAA; 16]);
    }

    #[test]
    fn test_stream_inflater_truncated_input() {
        let mut sink = Vec::new();
        let mut codec = EntryCodec::new(CompressionMethod::Deflate, Level::Default);
        codec.write(&[7u8; 4096], &mut sink).unwrap();
        codec.finish(&mut sink).unwrap();
        sink.truncate(sink.len() / 2);

        let mut src = BufReader::new(Cursor::new(sink));
        let mut inflater = StreamInflater::new();
        let mut chunk = [0u8; 512];
        let result = loop {
            match inflater.read(&mut src, &mut chunk) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) => break Err(e),
            }
        };
        assert!(result.is_err());
    }

    #[test]
    fn test_crc32_reader_tracks_bytes() {
        let data = b"check me".to_vec();
        let mut reader = Crc32Reader::new(Cursor::new(&data));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();

        assert_eq!(reader.bytes_read(), data.len() as u64);
        assert_eq!(reader.crc32(), crc_of(&data));
    }
}
