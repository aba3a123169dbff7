//! Reading submitted ZIP archives.

use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;
use zip::result::ZipError;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive is unreadable: {0}")]
    ArchiveUnreadable(String),

    #[error("entry '{0}' not found in archive")]
    EntryNotFound(String),

    #[error("entry '{0}' would be written outside the working directory")]
    UnsafePath(String),

    #[error("archive expands to more than {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn open(archive: &[u8]) -> Result<ZipArchive<Cursor<&[u8]>>, ArchiveError> {
    ZipArchive::new(Cursor::new(archive)).map_err(|e| ArchiveError::ArchiveUnreadable(e.to_string()))
}

fn unreadable(e: ZipError) -> ArchiveError {
    ArchiveError::ArchiveUnreadable(e.to_string())
}

/// File paths in archive order. Directory entries are left out.
pub fn list_entries(archive: &[u8]) -> Result<Vec<String>, ArchiveError> {
    let mut zip = open(archive)?;
    let mut entries = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let file = zip.by_index(i).map_err(unreadable)?;
        if file.is_dir() {
            continue;
        }
        entries.push(file.name().to_string());
    }
    Ok(entries)
}

/// Unpack every entry below `dest`. Fails before writing anything outside
/// `dest`, and stops once more than `max_size` bytes have been written.
pub fn extract_all(archive: &[u8], dest: &Path, max_size: u64) -> Result<usize, ArchiveError> {
    let mut zip = open(archive)?;
    let mut written: u64 = 0;
    let mut files = 0;

    for i in 0..zip.len() {
        let mut file = zip.by_index(i).map_err(unreadable)?;
        let Some(relative) = file.enclosed_name() else {
            return Err(ArchiveError::UnsafePath(file.name().to_string()));
        };
        let target = dest.join(relative);

        if file.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let remaining = max_size.saturating_sub(written);
        let mut out = fs::File::create(&target)?;
        // Entry headers can lie about their size; bound the actual copy.
        let copied = std::io::copy(&mut (&mut file).take(remaining.saturating_add(1)), &mut out)?;
        if copied > remaining {
            return Err(ArchiveError::TooLarge { limit: max_size });
        }
        written += copied;
        files += 1;
    }

    debug!(files, bytes = written, dest = %dest.display(), "Archive extracted");
    Ok(files)
}

/// Copy each of `paths` from `reference` into `work_dir`, replacing whatever
/// is there. Every path must exist in the reference archive.
pub fn apply_overrides(
    work_dir: &Path,
    reference: &[u8],
    paths: &[String],
) -> Result<usize, ArchiveError> {
    let mut zip = open(reference)?;

    for path in paths {
        let name = path.trim_start_matches("./");
        let mut file = match zip.by_name(name) {
            Ok(file) if !file.is_dir() => file,
            Ok(_) | Err(ZipError::FileNotFound) => {
                return Err(ArchiveError::EntryNotFound(path.clone()));
            }
            Err(e) => return Err(unreadable(e)),
        };
        let Some(relative) = file.enclosed_name() else {
            return Err(ArchiveError::UnsafePath(path.clone()));
        };

        let target = work_dir.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&target)?;
        std::io::copy(&mut file, &mut out)?;
        debug!(path = %name, "Override applied");
    }

    Ok(paths.len())
}
