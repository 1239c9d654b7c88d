//! Atomic file replacement
//!
//! Content is written to a temporary file in the destination directory,
//! flushed to disk, then renamed over the destination, and the directory is
//! synced so the rename itself is durable. A concurrent or later
//! reader sees either the previous file or the new one, never a torn write.

use crate::error::{HopperError, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Replace `path` with whatever `write` produces.
///
/// The temporary file lives next to `path` so the final rename never crosses
/// a filesystem boundary.
pub fn write_with<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    write(tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;

    tmp.persist(path).map_err(|e| HopperError::Replace {
        path: path.display().to_string(),
        source: e.error,
    })?;
    sync_dir(dir)?;

    Ok(())
}

/// Flush directory metadata so a completed rename survives a crash
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

/// No directory handle to sync on this platform
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Replace `path` with `bytes`
pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    write_with(path, |file| {
        file.write_all(bytes)?;
        Ok(())
    })
}

/// Serialize `value` as pretty JSON and replace `path` with it
pub fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)?;
    write_bytes(path, &body)
}
