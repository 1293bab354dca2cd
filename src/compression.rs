use std::fmt::Display;

use crate::error::{ArchiveError, Result};

pub const STORE: u16 = 0;
pub const DEFLATE: u16 = 8;

/// The compression methods this crate reads and writes.
///
/// Anything else found in a header is reported, not silently passed
/// through, so callers never receive bytes they cannot interpret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMethod {
    Store,
    #[default]
    Deflate,
}

impl CompressionMethod {
    pub fn compression_method(&self) -> u16 {
        match self {
            CompressionMethod::Store => STORE,
            CompressionMethod::Deflate => DEFLATE,
        }
    }

    pub fn from_compression_method(compression_method: u16) -> Result<CompressionMethod> {
        match compression_method {
            STORE => Ok(CompressionMethod::Store),
            DEFLATE => Ok(CompressionMethod::Deflate),
            other => Err(ArchiveError::Unsupported(format!(
                "compression method {}",
                other
            ))),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            CompressionMethod::Store => "store",
            CompressionMethod::Deflate => "deflate",
        }
    }
}

impl Display for CompressionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A DEFLATE effort level: the codec default, or an explicit 0..=9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    #[default]
    Default,
    Precise(i32),
}

impl Level {
    pub fn value(&self) -> i32 {
        match self {
            Level::Default => -1,
            Level::Precise(v) => *v,
        }
    }

    /// The level hint carried in bits 1 and 2 of the general purpose
    /// flags: `11` super fast, `10` fast, `01` maximum, `00` normal.
    pub fn flag_bits(&self) -> u16 {
        match self.value() {
            1 => 0b110,
            2 => 0b100,
            8 | 9 => 0b010,
            _ => 0b000,
        }
    }
}

impl From<Level> for flate2::Compression {
    fn from(level: Level) -> Self {
        match level {
            Level::Default => flate2::Compression::default(),
            Level::Precise(v) if (0..=9).contains(&v) => flate2::Compression::new(v as u32),
            Level::Precise(_) => flate2::Compression::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_method_codes() {
        assert_eq!(CompressionMethod::Store.compression_method(), 0);
        assert_eq!(CompressionMethod::Deflate.compression_method(), 8);
        assert_eq!(
            CompressionMethod::from_compression_method(0).unwrap(),
            CompressionMethod::Store
        );
        assert_eq!(
            CompressionMethod::from_compression_method(8).unwrap(),
            CompressionMethod::Deflate
        );
    }

    #[test]
    fn test_unknown_method_is_unsupported() {
        for code in [12u16, 14, 93, 95, 99] {
            let err = CompressionMethod::from_compression_method(code).unwrap_err();
            assert!(matches!(err, ArchiveError::Unsupported(_)));
        }
    }

    #[test]
    fn test_level_flag_bits() {
        assert_eq!(Level::Precise(1).flag_bits(), 0b110);
        assert_eq!(Level::Precise(2).flag_bits(), 0b100);
        assert_eq!(Level::Precise(8).flag_bits(), 0b010);
        assert_eq!(Level::Precise(9).flag_bits(), 0b010);
        assert_eq!(Level::Default.flag_bits(), 0b000);
        assert_eq!(Level::Precise(0).flag_bits(), 0b000);
        for level in 3..=7 {
            assert_eq!(Level::Precise(level).flag_bits(), 0b000);
        }
    }
}
