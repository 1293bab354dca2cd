use std::io::{self, BufRead, BufReader, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use crc32fast::Hasher;

use crate::codec::StreamInflater;
use crate::compression::CompressionMethod;
use crate::constants::{
    CENTRAL_DIRECTORY_END_SIGNATURE, CENTRAL_DIRECTORY_ENTRY_SIGNATURE, DATA_DESCRIPTOR_SIGNATURE,
    LOCAL_FILE_HEADER_SIGNATURE, X0001_ZIP64,
};
use crate::entry::Entry;
use crate::error::{ArchiveError, Result};

enum Decoder {
    Stored {
        remaining: u64,
        produced: u64,
        hasher: Hasher,
    },
    Deflated {
        inflater: StreamInflater,
    },
    /// Encrypted payloads are skipped raw, never decoded.
    Encrypted { remaining: u64 },
}

struct OpenEntry {
    incomplete: bool,
    had_zip64: bool,
    declared_crc32: u32,
    declared_compressed: u64,
    declared_uncompressed: u64,
    decoder: Decoder,
}

/// Forward-only archive reader that walks local file headers.
///
/// [`get_next_entry`](InputStream::get_next_entry) skips whatever is
/// left of the current entry (payload and data descriptor) and parses
/// the next header; `read` yields the current entry's plaintext. The
/// walk ends at the central directory.
pub struct InputStream<R: Read> {
    reader: BufReader<R>,
    current: Option<OpenEntry>,
    finished: bool,
}

impl<R: Read> InputStream<R> {
    pub fn new(reader: R) -> InputStream<R> {
        InputStream {
            reader: BufReader::new(reader),
            current: None,
            finished: false,
        }
    }

    /// Advances to the next entry and returns its header metadata, or
    /// `None` once the central directory (or end of input) is reached.
    pub fn get_next_entry(&mut self) -> Result<Option<Entry>> {
        if self.finished {
            return Ok(None);
        }

        if let Some(open) = self.current.take() {
            self.drain_entry(open)?;
        }

        // Clean end of input counts as end of the walk.
        if self.reader.fill_buf()?.is_empty() {
            self.finished = true;
            return Ok(None);
        }

        let signature = self.reader.read_u32::<LittleEndian>()?;
        match signature {
            LOCAL_FILE_HEADER_SIGNATURE => {}
            CENTRAL_DIRECTORY_ENTRY_SIGNATURE | CENTRAL_DIRECTORY_END_SIGNATURE => {
                self.finished = true;
                return Ok(None);
            }
            other => {
                return Err(ArchiveError::MalformedArchive(format!(
                    "expected a local file header, found signature 0x{:08x}",
                    other
                )));
            }
        }

        let mut entry = Entry::empty();
        entry.read_local_entry_body(&mut self.reader)?;

        let incomplete = entry.is_incomplete();
        if incomplete && entry.is_encrypted() {
            return Err(ArchiveError::Unsupported(
                "encrypted entry with unknown compressed size in a forward stream".to_owned(),
            ));
        }
        if incomplete && entry.compression_method == CompressionMethod::Store && entry.is_file() {
            // Nothing marks the end of a stored payload, so a forward
            // reader cannot find it.
            return Err(ArchiveError::Unsupported(
                "stored entry with unknown size in a forward stream".to_owned(),
            ));
        }

        let decoder = if entry.is_encrypted() {
            Decoder::Encrypted {
                remaining: entry.compressed_size,
            }
        } else {
            match entry.compression_method {
                CompressionMethod::Store => Decoder::Stored {
                    remaining: entry.compressed_size,
                    produced: 0,
                    hasher: Hasher::new(),
                },
                CompressionMethod::Deflate => Decoder::Deflated {
                    inflater: StreamInflater::new(),
                },
            }
        };

        self.current = Some(OpenEntry {
            incomplete,
            had_zip64: entry.extra.get(X0001_ZIP64).is_some(),
            declared_crc32: entry.crc32,
            declared_compressed: entry.compressed_size,
            declared_uncompressed: entry.uncompressed_size,
            decoder,
        });

        Ok(Some(entry))
    }

    /// Reads plaintext bytes of the current entry; `Ok(0)` at its end.
    pub fn read_entry_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(open) = self.current.as_mut() else {
            return Ok(0);
        };

        match &mut open.decoder {
            Decoder::Encrypted { .. } => Err(ArchiveError::Unsupported(
                "reading an encrypted entry".to_owned(),
            )),
            Decoder::Stored {
                remaining,
                produced,
                hasher,
            } => {
                if *remaining == 0 || buf.is_empty() {
                    return Ok(0);
                }
                let want = buf.len().min(*remaining as usize);
                let count = self.reader.read(&mut buf[..want])?;
                if count == 0 {
                    return Err(ArchiveError::MalformedArchive(
                        "entry payload truncated".to_owned(),
                    ));
                }
                hasher.update(&buf[..count]);
                *remaining -= count as u64;
                *produced += count as u64;
                Ok(count)
            }
            Decoder::Deflated { inflater } => Ok(inflater.read(&mut self.reader, buf)?),
        }
    }

    /// Consumes the remainder of `open`, its data descriptor if any,
    /// and verifies the CRC and sizes that apply.
    fn drain_entry(&mut self, mut open: OpenEntry) -> Result<()> {
        let mut scratch = [0u8; 8 * 1024];
        loop {
            self.current = Some(open);
            let count = self.read_entry_data(&mut scratch);
            open = self.current.take().unwrap();
            match count {
                Ok(0) => break,
                Ok(_) => continue,
                // Encrypted payloads cannot be decoded; skip them raw.
                Err(ArchiveError::Unsupported(_)) => {
                    if let Decoder::Encrypted { remaining } = open.decoder {
                        io::copy(
                            &mut Read::take(&mut self.reader, remaining),
                            &mut io::sink(),
                        )?;
                    }
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }

        let (actual_crc32, actual_compressed, actual_uncompressed) = match &open.decoder {
            Decoder::Stored {
                produced, hasher, ..
            } => (hasher.clone().finalize(), *produced, *produced),
            Decoder::Deflated { inflater } => {
                (inflater.crc32(), inflater.total_in(), inflater.total_out())
            }
            Decoder::Encrypted { .. } => return Ok(()),
        };

        let (expected_crc32, expected_compressed, expected_uncompressed) = if open.incomplete {
            self.read_data_descriptor(&open, actual_compressed, actual_uncompressed)?
        } else {
            (
                open.declared_crc32,
                open.declared_compressed,
                open.declared_uncompressed,
            )
        };

        if expected_crc32 != actual_crc32 {
            return Err(ArchiveError::Decompression(format!(
                "crc mismatch: expected 0x{:08x}, got 0x{:08x}",
                expected_crc32, actual_crc32
            )));
        }
        if expected_compressed != actual_compressed
            || expected_uncompressed != actual_uncompressed
        {
            return Err(ArchiveError::Decompression(format!(
                "size mismatch: expected {}/{} bytes, got {}/{}",
                expected_compressed, expected_uncompressed, actual_compressed, actual_uncompressed
            )));
        }

        Ok(())
    }

    /// Reads the data descriptor trailing an incomplete entry. The
    /// leading signature is optional; sizes are 64-bit when the entry
    /// was ZIP64 or its actual sizes need them.
    fn read_data_descriptor(
        &mut self,
        open: &OpenEntry,
        actual_compressed: u64,
        actual_uncompressed: u64,
    ) -> Result<(u32, u64, u64)> {
        let first = self.reader.read_u32::<LittleEndian>()?;
        let crc32 = if first == DATA_DESCRIPTOR_SIGNATURE {
            self.reader.read_u32::<LittleEndian>()?
        } else {
            first
        };

        let wide = open.had_zip64
            || actual_compressed >= u32::MAX as u64
            || actual_uncompressed >= u32::MAX as u64;

        let (compressed, uncompressed) = if wide {
            (
                self.reader.read_u64::<LittleEndian>()?,
                self.reader.read_u64::<LittleEndian>()?,
            )
        } else {
            (
                self.reader.read_u32::<LittleEndian>()? as u64,
                self.reader.read_u32::<LittleEndian>()? as u64,
            )
        };

        Ok((crc32, compressed, uncompressed))
    }
}

impl<R: Read> Read for InputStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_entry_data(buf)
            .map_err(|e| io::Error::other(e.to_string()))
    }
}
