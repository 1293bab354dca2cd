use std::io::{self, Seek, SeekFrom, Write};

/// The sink interface the output stream drives: plain writing plus the
/// position bookkeeping needed to place headers, and optional seeking
/// for back-patching them.
pub trait CommonWrapper<W>: Write {
    /// Current write position.
    fn stream_position(&mut self) -> io::Result<u64>;

    /// Absolute seek; fails on sinks that cannot seek.
    fn seek_to(&mut self, pos: u64) -> io::Result<u64>;

    fn can_seek(&self) -> bool;

    /// Total archive length so far, unaffected by back-patch seeks.
    fn get_written_bytes_count(&mut self) -> io::Result<u64>;

    fn get_into(self: Box<Self>) -> W;
}

/// Counting pass-through for forward-only sinks. All sizes end up in
/// data descriptors because nothing can be patched after the fact.
#[derive(Debug)]
pub struct WriteWrapper<W: Write> {
    writer: W,
    written_bytes_count: u64,
}

impl<W: Write> WriteWrapper<W> {
    pub fn new(writer: W) -> WriteWrapper<W> {
        WriteWrapper {
            writer,
            written_bytes_count: 0,
        }
    }
}

impl<W: Write> Write for WriteWrapper<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = self.writer.write(buf)?;
        self.written_bytes_count += count as u64;
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl<W: Write> CommonWrapper<W> for WriteWrapper<W> {
    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.written_bytes_count)
    }

    fn seek_to(&mut self, _pos: u64) -> io::Result<u64> {
        Err(io::Error::other("sink does not support seeking"))
    }

    fn can_seek(&self) -> bool {
        false
    }

    fn get_written_bytes_count(&mut self) -> io::Result<u64> {
        Ok(self.written_bytes_count)
    }

    fn get_into(self: Box<Self>) -> W {
        self.writer
    }
}

/// Wrapper for seekable sinks. Tracks both the write position and the
/// high-water mark, so the archive length stays known while headers are
/// revisited.
///
/// The sink must start at position zero.
#[derive(Debug)]
pub struct WriteSeekWrapper<W: Write + Seek> {
    writer: W,
    position: u64,
    high_water: u64,
}

impl<W: Write + Seek> WriteSeekWrapper<W> {
    pub fn new(writer: W) -> WriteSeekWrapper<W> {
        WriteSeekWrapper {
            writer,
            position: 0,
            high_water: 0,
        }
    }
}

impl<W: Write + Seek> Write for WriteSeekWrapper<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = self.writer.write(buf)?;
        self.position += count as u64;
        self.high_water = self.high_water.max(self.position);
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl<W: Write + Seek> CommonWrapper<W> for WriteSeekWrapper<W> {
    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.position)
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<u64> {
        let reached = self.writer.seek(SeekFrom::Start(pos))?;
        self.position = reached;
        Ok(reached)
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn get_written_bytes_count(&mut self) -> io::Result<u64> {
        Ok(self.high_water)
    }

    fn get_into(self: Box<Self>) -> W {
        self.writer
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_write_wrapper_counts() {
        let mut wrapper = WriteWrapper::new(Vec::new());
        wrapper.write_all(b"12345").unwrap();
        assert_eq!(wrapper.get_written_bytes_count().unwrap(), 5);
        assert!(!wrapper.can_seek());
        assert!(wrapper.seek_to(0).is_err());
    }

    #[test]
    fn test_seek_wrapper_keeps_high_water_mark() {
        let mut wrapper = WriteSeekWrapper::new(Cursor::new(Vec::new()));
        wrapper.write_all(b"0123456789").unwrap();
        assert_eq!(wrapper.get_written_bytes_count().unwrap(), 10);

        wrapper.seek_to(2).unwrap();
        assert_eq!(wrapper.stream_position().unwrap(), 2);
        wrapper.write_all(b"XY").unwrap();

        // Rewriting in the middle does not shrink the archive length.
        assert_eq!(wrapper.get_written_bytes_count().unwrap(), 10);

        let inner: Box<dyn CommonWrapper<Cursor<Vec<u8>>>> = Box::new(wrapper);
        let cursor = inner.get_into();
        assert_eq!(cursor.into_inner(), b"01XY456789");
    }
}
