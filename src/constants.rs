use std::mem::size_of;

pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50; // Local file header signature.
pub const CENTRAL_DIRECTORY_ENTRY_SIGNATURE: u32 = 0x02014b50;
pub const CENTRAL_DIRECTORY_END_SIGNATURE: u32 = 0x06054b50;
pub const ZIP64_CENTRAL_DIRECTORY_END_SIGNATURE: u32 = 0x06064b50;
pub const ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIGNATURE: u32 = 0x07064b50;
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50; // Data descriptor signature.

pub const FILE_HEADER_BASE_SIZE: u64 = (7 * size_of::<u16>() + 4 * size_of::<u32>()) as u64;
pub const CENTRAL_DIRECTORY_ENTRY_BASE_SIZE: u64 =
    (11 * size_of::<u16>() + 6 * size_of::<u32>()) as u64;
pub const END_OF_CENTRAL_DIRECTORY_SIZE: u64 = (5 * size_of::<u16>() + 3 * size_of::<u32>()) as u64;
pub const ZIP64_END_OF_CENTRAL_DIRECTORY_SIZE: u64 = 56;
pub const ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIZE: u64 = 20;

/// Byte offset of the CRC-32 field inside a local file header.
pub const FILE_HEADER_CRC_OFFSET: u64 = 14;
/// Byte offset of the general purpose bit flag inside a local file header.
pub const FILE_HEADER_FLAGS_OFFSET: u64 = 6;

/// The end of central directory record is 22 bytes plus a comment of at
/// most `u16::MAX` bytes, so the signature must appear within this many
/// bytes of the end of the stream.
pub const END_OF_CENTRAL_DIR_MAX_SEARCH: u64 = END_OF_CENTRAL_DIRECTORY_SIZE + u16::MAX as u64;

pub const ENCRYPTED_FLAG: u16 = 1 << 0;
pub const EXTENDED_LOCAL_HEADER_FLAG: u16 = 1 << 3;
pub const UTF8_NAMES_FLAG: u16 = 1 << 11;
/// Bits 1 and 2 carry the DEFLATE level hint.
pub const COMPRESSION_OPTION_MASK: u16 = 0b110;

pub const DEFAULT_VERSION: u8 = 46;
pub const UNIX: u8 = 3;
pub const VERSION_MADE_BY: u16 = (UNIX as u16) << 8 | DEFAULT_VERSION as u16;
pub const VERSION_NEEDED_TO_EXTRACT: u16 = 20;
pub const VERSION_USES_ZIP64_FORMAT_EXTENSIONS: u16 = 45;

pub const X0001_ZIP64: u16 = 0x0001;
pub const X5455_EXTENDEDTIMESTAMP: u16 = 0x5455;
pub const X5855_OLDUNIX: u16 = 0x5855;
pub const X7855_IUNIX: u16 = 0x7855;
pub const X000A_NTFS: u16 = 0x000A;

pub const S_IFDIR: u32 = 0o0040000;
pub const S_IFREG: u32 = 0o0100000;
pub const MS_DIR: u32 = 0x10;
