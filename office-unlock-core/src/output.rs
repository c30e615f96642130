//! Output writing: `{stem}_unlocked{ext}` beside the input, written through
//! a temp file in the same directory and an atomic rename so no partial file
//! is ever visible at the destination. The source file is never modified.

use crate::errors::UnlockError::{self, *};

use std::io::Write;
use std::path::{Path, PathBuf};

/// Destination path for an input: `report.xlsx` -> `report_unlocked.xlsx`.
pub fn unlocked_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match input.extension() {
        Some(ext) => format!("{stem}_unlocked.{}", ext.to_string_lossy()),
        None => format!("{stem}_unlocked"),
    };
    input.with_file_name(name)
}

pub(crate) fn write(
    bytes: &[u8],
    original: &Path,
    overwrite: bool,
) -> Result<PathBuf, UnlockError> {
    let destination = unlocked_path(original);
    if destination.exists() && !overwrite {
        return Err(OutputExists(destination));
    }

    // temp file in the destination directory so the rename stays on one
    // filesystem and is atomic
    let dir = original
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.persist(&destination)
        .map_err(|e| UnlockError::IoError(e.error))?;
    Ok(destination)
}
