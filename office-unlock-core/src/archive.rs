//! ZIP archive rewriting for the OOXML, ODF, and XLSB container families.
//!
//! Entries are visited in central-directory order. Protection-bearing parts
//! are routed to the matching scrubber/patcher; everything else is raw-copied
//! so the compressed bytes, method, and timestamps survive untouched. The
//! leading ODF `mimetype` entry is never a scrub target, so the raw copy also
//! keeps it first and stored, as order-sensitive readers require.

use crate::compound;
use crate::errors::UnlockError::{self, *};
use crate::inspect::FormatKind;
use crate::records;
use crate::xml::{self, XmlPart};
use crate::Warning;

use std::io::prelude::*;
use std::io::Cursor;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    /// Primary part: failure aborts the whole rewrite.
    WorkbookXml,
    SheetXml,
    OdfContent,
    OdfSettings,
    WorkbookBin,
    SheetBin,
    VbaProject,
    Verbatim,
}

fn route(kind: FormatKind, name: &str) -> Route {
    match kind {
        FormatKind::OoxmlZip => {
            if name == "xl/workbook.xml" {
                Route::WorkbookXml
            } else if name.starts_with("xl/worksheets/") && name.ends_with(".xml") {
                Route::SheetXml
            } else if name.eq_ignore_ascii_case("xl/vbaproject.bin") {
                Route::VbaProject
            } else {
                Route::Verbatim
            }
        }
        FormatKind::Xlsb => {
            if name == "xl/workbook.bin" {
                Route::WorkbookBin
            } else if name.starts_with("xl/worksheets/") && name.ends_with(".bin") {
                Route::SheetBin
            } else if name.eq_ignore_ascii_case("xl/vbaproject.bin") {
                Route::VbaProject
            } else {
                Route::Verbatim
            }
        }
        FormatKind::OdfZip => match name {
            "content.xml" => Route::OdfContent,
            "settings.xml" => Route::OdfSettings,
            _ => Route::Verbatim,
        },
        // the compound handler owns this kind; nothing to route here
        FormatKind::LegacyXls => Route::Verbatim,
    }
}

/// A failure on a primary part invalidates the document; a secondary part is
/// passed through unmodified and reported as a warning. Password and
/// truncation failures are fatal everywhere: the first means we will not
/// guess secrets, the second means the container lies about its own sizes.
fn is_fatal(route: Route, error: &UnlockError) -> bool {
    if matches!(error, PasswordRequired | TruncatedStream(_)) {
        return true;
    }
    matches!(
        route,
        Route::WorkbookXml | Route::WorkbookBin | Route::OdfContent
    )
}

fn apply(route: Route, data: &[u8]) -> Result<Vec<u8>, UnlockError> {
    match route {
        Route::WorkbookXml => xml::scrub(data, XmlPart::Workbook),
        Route::SheetXml => xml::scrub(data, XmlPart::Worksheet),
        Route::OdfContent | Route::OdfSettings => xml::scrub(data, XmlPart::Odf),
        Route::WorkbookBin | Route::SheetBin => records::patch_part(data),
        Route::VbaProject => compound::patch_vba_project(data),
        Route::Verbatim => Ok(data.to_vec()),
    }
}

pub(crate) fn rewrite(
    raw: &[u8],
    kind: FormatKind,
    warnings: &mut Vec<Warning>,
) -> Result<Vec<u8>, UnlockError> {
    let mut input = ZipArchive::new(Cursor::new(raw))
        .map_err(|e| ArchiveCorrupt(format!("central directory: {e}")))?;
    let mut output = ZipWriter::new(Cursor::new(Vec::new()));

    for index in 0..input.len() {
        let entry = input
            .by_index_raw(index)
            .map_err(|e| ArchiveCorrupt(format!("entry {index}: {e}")))?;
        let name = entry.name().to_string();

        if route(kind, &name) == Route::Verbatim {
            output
                .raw_copy_file(entry)
                .map_err(|e| ArchiveCorrupt(format!("{name}: {e}")))?;
            continue;
        }
        drop(entry);

        let mut entry = input
            .by_index(index)
            .map_err(|e| ArchiveCorrupt(format!("entry {index}: {e}")))?;
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|e| ArchiveCorrupt(format!("{name}: {e}")))?;

        let part_route = route(kind, &name);
        log::debug!("scrubbing {name} ({part_route:?})");
        let patched = match apply(part_route, &data) {
            Ok(patched) => patched,
            Err(e) if is_fatal(part_route, &e) => return Err(e),
            Err(e) => {
                log::warn!("{name} left untouched: {e}");
                warnings.push(Warning::new(name.clone(), e.to_string()));
                data.clone()
            }
        };

        let mut options = SimpleFileOptions::default().compression_method(entry.compression());
        if let Some(modified) = entry.last_modified() {
            options = options.last_modified_time(modified);
        }
        output
            .start_file(name.clone(), options)
            .map_err(|e| ArchiveCorrupt(format!("{name}: {e}")))?;
        output.write_all(&patched)?;
    }

    let cursor = output
        .finish()
        .map_err(|e| ArchiveCorrupt(format!("finalize: {e}")))?;
    Ok(cursor.into_inner())
}
