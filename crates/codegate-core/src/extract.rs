//! Zip artifact extraction.

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("invalid archive: {0}")]
    Archive(#[from] ZipError),

    #[error("archive entry escapes the extraction directory: {0}")]
    UnsafePath(String),

    #[error("extraction I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("extraction cancelled")]
    Cancelled,
}

/// Extract a zip archive held in memory into `dest`.
///
/// Entries whose names would resolve outside `dest` (absolute paths or `..`
/// components) abort the extraction. Returns the number of files written.
pub fn extract_zip(bytes: &[u8], dest: &Path) -> Result<usize, ExtractError> {
    extract_zip_until(bytes, dest, &AtomicBool::new(false))
}

/// Like [`extract_zip`], but stops before the next entry once `cancel` is set.
pub fn extract_zip_until(
    bytes: &[u8],
    dest: &Path,
    cancel: &AtomicBool,
) -> Result<usize, ExtractError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    std::fs::create_dir_all(dest)?;

    let mut files = 0;
    for index in 0..archive.len() {
        if cancel.load(Ordering::Relaxed) {
            debug!(files, dest = %dest.display(), "extraction cancelled");
            return Err(ExtractError::Cancelled);
        }
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(ExtractError::UnsafePath(entry.name().to_string()));
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
        files += 1;
    }

    debug!(files, dest = %dest.display(), "extracted artifact");
    Ok(files)
}
