//! Strips protection artifacts from spreadsheet documents: workbook and
//! sheet locks, VBA project passwords, and default-scheme file-open
//! encryption, across OOXML (xlsx/xlsm/xltx/xltm), ODF (ods), legacy XLS,
//! and XLSB containers.
//!
//! The unlocked result is written beside the input as
//! `{stem}_unlocked{ext}`; the input is never modified. Protection is
//! neutralized, never recovered — this crate will not guess or brute-force
//! a secret, and reports [`UnlockError::PasswordRequired`] when one would
//! be needed.
//!
//! Processing one document is sequential and keeps no global state, so
//! callers may unlock many files from independent threads.

mod agile;
mod archive;
mod biff;
mod compound;
mod errors;
mod inspect;
mod output;
mod records;
mod standard;
mod utils;
mod xml;

pub use errors::UnlockError;
pub use inspect::{inspect, FormatKind};
pub use output::unlocked_path;

use compound::CompoundOutcome;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct UnlockOptions {
    /// Replace an existing file at the destination instead of failing with
    /// [`UnlockError::OutputExists`].
    pub overwrite: bool,
}

/// A recovered, non-fatal failure on a secondary part. The part was passed
/// through unmodified.
#[derive(Debug, Clone)]
pub struct Warning {
    pub part: String,
    pub detail: String,
}

impl Warning {
    pub(crate) fn new(part: String, detail: String) -> Self {
        Warning { part, detail }
    }
}

#[derive(Debug)]
pub struct Outcome {
    /// Path of the unlocked file.
    pub written: PathBuf,
    pub warnings: Vec<Warning>,
}

/// Unlock one document: read, detect the container format, strip protection
/// markers, and write the result beside the input. Either the complete
/// unlocked file appears at the destination or nothing is written.
pub fn unlock_file(path: &Path, options: &UnlockOptions) -> Result<Outcome, UnlockError> {
    let raw = std::fs::read(path)
        .map_err(|e| UnlockError::UnreadableFile(format!("{}: {e}", path.display())))?;
    let kind = inspect::detect(&raw, inspect::extension_of(path).as_deref())?;
    log::debug!("{}: detected {kind:?}", path.display());

    let mut warnings = Vec::new();
    let unlocked = unlock_bytes(&raw, kind, &mut warnings)?;
    let written = output::write(&unlocked, path, options.overwrite)?;
    Ok(Outcome { written, warnings })
}

/// In-memory core of [`unlock_file`], for callers that manage their own IO.
pub fn unlock_bytes(
    raw: &[u8],
    kind: FormatKind,
    warnings: &mut Vec<Warning>,
) -> Result<Vec<u8>, UnlockError> {
    match kind {
        FormatKind::OoxmlZip | FormatKind::OdfZip | FormatKind::Xlsb => {
            archive::rewrite(raw, kind, warnings)
        }
        FormatKind::LegacyXls => match compound::process(raw, warnings)? {
            CompoundOutcome::Patched(bytes) => Ok(bytes),
            // decrypt-first: the plaintext package still carries its own
            // sheet/workbook/VBA protection, so it goes through the normal
            // archive pass
            CompoundOutcome::DecryptedPackage(package) => {
                let inner_kind = inspect::detect(&package, None)?;
                archive::rewrite(&package, inner_kind, warnings)
            }
        },
    }
}
