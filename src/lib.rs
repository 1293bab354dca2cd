//! Read, write and edit ZIP archives.
//!
//! The archive model is edit-then-commit: open an [`Archive`], mutate
//! its entry set in memory (`add`, `remove`, `rename`, ...), then
//! [`commit`](Archive::commit) — the new archive is written to a
//! sibling temp file and atomically renamed over the original.
//!
//! ```no_run
//! use zipedit::Archive;
//!
//! # fn main() -> zipedit::Result<()> {
//! let mut archive = Archive::create("bundle.zip")?;
//! archive.add_buffer("docs/readme.txt", "hello".as_bytes())?;
//! archive.mkdir("assets")?;
//! archive.commit()?;
//! # Ok(())
//! # }
//! ```
//!
//! Lower-level streaming surfaces are available as [`OutputStream`]
//! (append-only writer, STORED or DEFLATED, with ZIP64 promotion) and
//! [`InputStream`] (forward-only reader walking local file headers).
//!
//! Supported container features: the PKWARE APPNOTE layout with ZIP64
//! extensions, data descriptors, per-entry and archive comments, Unix
//! permission/ownership extras and both timestamp extras. Encrypted
//! entries are recognised but never decoded.

mod archive;
mod central_directory;
mod codec;
mod compression;
pub mod constants;
mod descriptor;
mod entry;
mod entry_set;
mod error;
mod extra;
mod input_stream;
mod options;
mod output_stream;
mod time;
mod write_wrapper;

pub use archive::Archive;
pub use central_directory::CentralDirectoryEnd;
pub use codec::{Crc32Reader, EntryReader};
pub use compression::{CompressionMethod, Level};
pub use entry::{Entry, EntrySource};
pub use entry_set::{glob_match, EntrySet, GlobFlags};
pub use error::{ArchiveError, Result};
pub use extra::{
    ExtendedTimestamp, ExtraField, ExtraFields, NtfsTimes, OldUnix, UnixUidGid, Zip64Context,
    Zip64Extra,
};
pub use input_stream::InputStream;
pub use options::{ArchiveOptions, EntryOptions, Zip64Support};
pub use output_stream::OutputStream;
pub use time::DosDateTime;
