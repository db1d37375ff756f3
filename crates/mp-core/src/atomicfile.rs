//! Atomic local file writing
//!
//! Report files are written via a temp file in the target directory and a
//! rename, so a crashed run never leaves a half-written file behind.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

/// Write `contents` to `path` atomically.
///
/// The temp file is created next to the destination so the final rename
/// stays on one filesystem.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
