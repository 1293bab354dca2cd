#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use tempfile::TempDir;

/// A scratch directory removed when the test ends.
pub fn scratch_dir() -> TempDir {
    TempDir::new().unwrap_or_else(|error| panic!("creating scratch dir failed: {:?}", error))
}

/// Writes a source file to archive from.
pub fn write_source_file(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents)
        .unwrap_or_else(|error| panic!("writing {:?} failed: {:?}", path, error));
    path
}

/// Sets a file's mtime to `unix_seconds`.
pub fn set_file_mtime(path: &Path, unix_seconds: u64) {
    let file = fs::OpenOptions::new()
        .write(true)
        .open(path)
        .unwrap_or_else(|error| panic!("opening {:?} failed: {:?}", path, error));
    file.set_modified(UNIX_EPOCH + Duration::from_secs(unix_seconds))
        .unwrap_or_else(|error| panic!("setting mtime on {:?} failed: {:?}", path, error));
}

pub fn crc_of(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
