//! Container format detection.
//!
//! The leading byte signature decides the container family (ZIP vs compound
//! file); entry names inside a ZIP decide the sub-family. The file extension
//! is only consulted as a tie-breaker, never trusted on its own.

use crate::errors::UnlockError::{self, *};

use std::io::Cursor;
use std::path::Path;

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const CFB_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    /// xlsx / xlsm / xltx / xltm — ZIP of XML parts.
    OoxmlZip,
    /// ods — ZIP of XML parts with a leading stored `mimetype` entry.
    OdfZip,
    /// xls, or any compound/structured-storage container (an encrypted OOXML
    /// package presents the same signature and is resolved by the compound
    /// handler).
    LegacyXls,
    /// xlsb — ZIP of BIFF12 binary record parts.
    Xlsb,
}

/// Probe a file on disk. Reads the file once; no side effects.
pub fn inspect(path: &Path) -> Result<FormatKind, UnlockError> {
    let raw = std::fs::read(path)
        .map_err(|e| UnreadableFile(format!("{}: {e}", path.display())))?;
    detect(&raw, extension_of(path).as_deref())
}

pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

/// Classify already-loaded bytes. `ext` is the lowercased file extension, if
/// the caller has one.
pub(crate) fn detect(raw: &[u8], ext: Option<&str>) -> Result<FormatKind, UnlockError> {
    if raw.starts_with(&CFB_MAGIC) {
        return Ok(FormatKind::LegacyXls);
    }
    if raw.starts_with(&ZIP_MAGIC) {
        return detect_zip(raw, ext);
    }
    Err(UnsupportedFormat(
        "no known container signature".to_string(),
    ))
}

fn detect_zip(raw: &[u8], ext: Option<&str>) -> Result<FormatKind, UnlockError> {
    let archive = zip::ZipArchive::new(Cursor::new(raw))
        .map_err(|e| ArchiveCorrupt(format!("central directory: {e}")))?;

    let mut has_ooxml_workbook = false;
    let mut has_xlsb_workbook = false;
    let mut has_odf_marker = false;
    for name in archive.file_names() {
        match name {
            "xl/workbook.xml" => has_ooxml_workbook = true,
            "xl/workbook.bin" => has_xlsb_workbook = true,
            "mimetype" | "content.xml" => has_odf_marker = true,
            _ => (),
        }
    }

    if has_xlsb_workbook {
        return Ok(FormatKind::Xlsb);
    }
    if has_ooxml_workbook {
        return Ok(FormatKind::OoxmlZip);
    }
    if has_odf_marker {
        return Ok(FormatKind::OdfZip);
    }

    // entry-name probe was inconclusive; fall back to the extension
    match ext {
        Some("xlsx") | Some("xlsm") | Some("xltx") | Some("xltm") => Ok(FormatKind::OoxmlZip),
        Some("ods") => Ok(FormatKind::OdfZip),
        Some("xlsb") => Ok(FormatKind::Xlsb),
        other => Err(UnsupportedFormat(format!(
            "ZIP container without spreadsheet markers (extension: {})",
            other.unwrap_or("none")
        ))),
    }
}
