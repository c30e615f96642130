//! Compound/structured-storage patching.
//!
//! One handler covers the three faces of the CFB signature:
//! - an encrypted OOXML package (`EncryptionInfo` + `EncryptedPackage`
//!   streams) — decrypted with the empty and Excel-default passwords, then
//!   handed back for normal archive scrubbing (decrypt-first layering);
//! - a legacy `.xls` workbook (`Workbook`/`Book` BIFF stream, optionally an
//!   embedded VBA project);
//! - a standalone `vbaProject.bin` extracted from an OOXML archive.
//!
//! Sector-chain validity (termination, no cycles, in-range indices) is
//! enforced by the `cfb` parser; any violation it reports surfaces as
//! `CompoundFileCorrupt`.

use crate::agile::AgileEncryptionInfo;
use crate::biff;
use crate::errors::UnlockError::{self, *};
use crate::standard::StandardEncryptionInfo;
use crate::utils::validate;
use crate::Warning;

use std::io::prelude::*;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Passwords probed for file-open encryption: the empty password and the
/// fixed default Excel uses for "read-only recommended" workbooks. Anything
/// else would be guessing, which this tool never does.
const DEFAULT_PASSWORDS: [&str; 2] = ["", "VelvetSweatshop"];

pub(crate) enum CompoundOutcome {
    /// Container patched in place; bytes are the rewritten compound file.
    Patched(Vec<u8>),
    /// The container was an encrypted OOXML package; bytes are the decrypted
    /// plaintext package, still carrying its own protection markers.
    DecryptedPackage(Vec<u8>),
}

pub(crate) fn process(
    raw: &[u8],
    warnings: &mut Vec<Warning>,
) -> Result<CompoundOutcome, UnlockError> {
    let mut comp = open(raw)?;

    if comp.is_stream("/EncryptionInfo") && comp.is_stream("/EncryptedPackage") {
        let info = read_stream(&mut comp, Path::new("/EncryptionInfo"))?;
        let package = read_stream(&mut comp, Path::new("/EncryptedPackage"))?;
        let plaintext = decrypt_package(&info, &package)?;
        return Ok(CompoundOutcome::DecryptedPackage(plaintext));
    }

    let workbook = ["/Workbook", "/Book"]
        .into_iter()
        .map(Path::new)
        .find(|p| comp.is_stream(p))
        .ok_or_else(|| {
            UnsupportedFormat("compound file without a Workbook stream".to_string())
        })?;

    let stream = read_stream(&mut comp, workbook)?;
    let patched = biff::patch_workbook_stream(&stream)?;
    if patched != stream {
        write_stream(&mut comp, workbook, &patched)?;
    }

    if let Some(project) = find_project_stream(&comp) {
        match patch_embedded_project(&mut comp, &project) {
            Ok(true) => log::debug!("cleared VBA password in {}", project.display()),
            Ok(false) => log::debug!("no VBA password line in {}", project.display()),
            Err(e) => {
                log::warn!("VBA project left untouched: {e}");
                warnings.push(Warning::new(project.display().to_string(), e.to_string()));
            }
        }
    }

    comp.flush()?;
    Ok(CompoundOutcome::Patched(comp.into_inner().into_inner()))
}

/// Patch a standalone `vbaProject.bin` (itself a compound file). Absence of
/// a password line is not an error; the input comes back unchanged.
pub(crate) fn patch_vba_project(raw: &[u8]) -> Result<Vec<u8>, UnlockError> {
    let mut comp = open(raw)?;
    let Some(project) = find_project_stream(&comp) else {
        log::debug!("vbaProject.bin has no PROJECT stream");
        return Ok(raw.to_vec());
    };
    patch_embedded_project(&mut comp, &project)?;
    comp.flush()?;
    Ok(comp.into_inner().into_inner())
}

fn open(raw: &[u8]) -> Result<cfb::CompoundFile<Cursor<Vec<u8>>>, UnlockError> {
    cfb::CompoundFile::open(Cursor::new(raw.to_vec()))
        .map_err(|e| CompoundFileCorrupt(format!("header/directory: {e}")))
}

fn read_stream(
    comp: &mut cfb::CompoundFile<Cursor<Vec<u8>>>,
    path: &Path,
) -> Result<Vec<u8>, UnlockError> {
    let mut stream = comp
        .open_stream(path)
        .map_err(|e| CompoundFileCorrupt(format!("{}: {e}", path.display())))?;
    let mut data = Vec::with_capacity(stream.len() as usize);
    stream
        .read_to_end(&mut data)
        .map_err(|e| CompoundFileCorrupt(format!("{}: {e}", path.display())))?;
    Ok(data)
}

/// Overwrite a stream with same-length content, keeping every sector chain
/// and directory entry as-is.
fn write_stream(
    comp: &mut cfb::CompoundFile<Cursor<Vec<u8>>>,
    path: &Path,
    data: &[u8],
) -> Result<(), UnlockError> {
    let mut stream = comp
        .open_stream(path)
        .map_err(|e| CompoundFileCorrupt(format!("{}: {e}", path.display())))?;
    stream.write_all(data)?;
    stream.flush()?;
    Ok(())
}

fn find_project_stream(comp: &cfb::CompoundFile<Cursor<Vec<u8>>>) -> Option<PathBuf> {
    comp.walk()
        .find(|entry| entry.is_stream() && entry.name() == "PROJECT")
        .map(|entry| entry.path().to_path_buf())
}

fn patch_embedded_project(
    comp: &mut cfb::CompoundFile<Cursor<Vec<u8>>>,
    project: &Path,
) -> Result<bool, UnlockError> {
    let data = read_stream(comp, project)?;
    match neutralize_password_line(&data) {
        Some(patched) => {
            write_stream(comp, project, &patched)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Rewrite `DPB=` to `DPx=` in the PROJECT property stream. The host treats
/// the unrecognized key as an absent password verifier and opens the project
/// without prompting. Same length, so the stream is patched in place.
fn neutralize_password_line(data: &[u8]) -> Option<Vec<u8>> {
    let mut patched = data.to_vec();
    let mut changed = false;
    for i in 0..data.len().saturating_sub(3) {
        let at_line_start = i == 0 || data[i - 1] == b'\n' || data[i - 1] == b'\r';
        if at_line_start && data[i..i + 4].eq_ignore_ascii_case(b"DPB=") {
            patched[i + 2] = b'x';
            changed = true;
        }
    }
    changed.then_some(patched)
}

fn decrypt_package(info: &[u8], package: &[u8]) -> Result<Vec<u8>, UnlockError> {
    validate!(
        info.len() >= 4,
        CompoundFileCorrupt("EncryptionInfo: missing version header".to_string())
    )?;

    match [info[0], info[1], info[2], info[3]] {
        [4, 0, 4, 0] => {
            let aei = AgileEncryptionInfo::parse(info)?;
            for password in DEFAULT_PASSWORDS {
                if let Some(key) = aei.try_password(password)? {
                    log::debug!("agile encryption opened with default-scheme password");
                    return aei.decrypt(&key, package);
                }
            }
            Err(PasswordRequired)
        }
        [2..=4, 0, 2, 0] => {
            let sei = StandardEncryptionInfo::parse(info)?;
            for password in DEFAULT_PASSWORDS {
                let key = sei.key_from_password(password)?;
                if sei.verify_key(&key)? {
                    log::debug!("standard encryption opened with default-scheme password");
                    return sei.decrypt(&key, package);
                }
            }
            Err(PasswordRequired)
        }
        _ => Err(CompoundFileCorrupt(
            "EncryptionInfo: unrecognised version".to_string(),
        )),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::biff::tests::write_record;
    use crate::standard::tests::{build_encryption_info, encrypt_package};

    pub(crate) fn build_cfb(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut comp = cfb::CompoundFile::create(Cursor::new(Vec::new())).unwrap();
        for (path, data) in entries {
            let parent = Path::new(path).parent().unwrap();
            if parent != Path::new("/") && parent != Path::new("") && !comp.exists(parent) {
                comp.create_storage_all(parent).unwrap();
            }
            let mut stream = comp.create_stream(path).unwrap();
            stream.write_all(data).unwrap();
        }
        comp.flush().unwrap();
        comp.into_inner().into_inner()
    }

    pub(crate) const PROJECT_TEXT: &[u8] = b"ID=\"{C0FFEE00-1234-5678-9ABC-DEF012345678}\"\r\n\
Module=Module1\r\n\
Name=\"VBAProject\"\r\n\
HelpContextID=\"0\"\r\n\
CMG=\"AABBCCDD\"\r\n\
DPB=\"0011223344556677\"\r\n\
GC=\"8899AABB\"\r\n";

    #[test]
    fn vba_password_line_is_neutralized() {
        let raw = build_cfb(&[
            ("/PROJECT", PROJECT_TEXT),
            ("/VBA/dir", &[0x01, 0x02, 0x03]),
        ]);
        let patched = patch_vba_project(&raw).unwrap();

        let mut comp = cfb::CompoundFile::open(Cursor::new(patched)).unwrap();
        let mut text = Vec::new();
        comp.open_stream("/PROJECT")
            .unwrap()
            .read_to_end(&mut text)
            .unwrap();
        let text = String::from_utf8(text).unwrap();
        assert!(text.contains("DPx=\"0011223344556677\""));
        assert!(!text.contains("DPB="));

        let mut dir = Vec::new();
        comp.open_stream("/VBA/dir")
            .unwrap()
            .read_to_end(&mut dir)
            .unwrap();
        assert_eq!(dir, [0x01, 0x02, 0x03]);
    }

    #[test]
    fn project_without_password_passes_through() {
        let raw = build_cfb(&[("/PROJECT", b"Name=\"VBAProject\"\r\n")]);
        assert_eq!(patch_vba_project(&raw).unwrap(), raw);
    }

    #[test]
    fn dpb_in_the_middle_of_a_line_is_not_patched() {
        assert!(neutralize_password_line(b"Name=\"xDPB=1\"\r\n").is_none());
        assert!(neutralize_password_line(b"dpb=\"00\"\r\n").is_some());
    }

    #[test]
    fn legacy_xls_protection_is_zeroed() {
        let mut workbook = Vec::new();
        write_record(&mut workbook, 0x0809, &[0u8; 16]); // BOF
        write_record(&mut workbook, 0x0012, &[0x01, 0x00]); // Protect
        write_record(&mut workbook, 0x000A, &[]); // EOF
        let raw = build_cfb(&[("/Workbook", &workbook)]);

        let mut warnings = Vec::new();
        let CompoundOutcome::Patched(out) = process(&raw, &mut warnings).unwrap() else {
            panic!("expected in-place patch");
        };
        assert!(warnings.is_empty());

        let mut comp = cfb::CompoundFile::open(Cursor::new(out)).unwrap();
        let mut patched = Vec::new();
        comp.open_stream("/Workbook")
            .unwrap()
            .read_to_end(&mut patched)
            .unwrap();
        assert_eq!(patched.len(), workbook.len());
        assert_eq!(&patched[20..24], &[0x12, 0x00, 0x02, 0x00]); // header kept
        assert_eq!(&patched[24..26], &[0x00, 0x00]); // payload zeroed
    }

    #[test]
    fn xls_with_embedded_vba_is_patched_too() {
        let mut workbook = Vec::new();
        write_record(&mut workbook, 0x0809, &[0u8; 16]);
        write_record(&mut workbook, 0x000A, &[]);
        let raw = build_cfb(&[
            ("/Workbook", &workbook),
            ("/_VBA_PROJECT_CUR/PROJECT", PROJECT_TEXT),
        ]);

        let mut warnings = Vec::new();
        let CompoundOutcome::Patched(out) = process(&raw, &mut warnings).unwrap() else {
            panic!("expected in-place patch");
        };
        let mut comp = cfb::CompoundFile::open(Cursor::new(out)).unwrap();
        let mut text = Vec::new();
        comp.open_stream("/_VBA_PROJECT_CUR/PROJECT")
            .unwrap()
            .read_to_end(&mut text)
            .unwrap();
        assert!(String::from_utf8(text).unwrap().contains("DPx="));
    }

    #[test]
    fn encrypted_package_with_default_password_is_decrypted() {
        let package = b"PK\x03\x04 plaintext spreadsheet package".to_vec();
        let (info, key) = build_encryption_info("VelvetSweatshop");
        let raw = build_cfb(&[
            ("/EncryptionInfo", &info),
            ("/EncryptedPackage", &encrypt_package(&key, &package)),
        ]);

        let mut warnings = Vec::new();
        let CompoundOutcome::DecryptedPackage(out) = process(&raw, &mut warnings).unwrap() else {
            panic!("expected decrypted package");
        };
        assert_eq!(out, package);
    }

    #[test]
    fn unrecoverable_encryption_is_password_required() {
        let (info, key) = build_encryption_info("hunter2");
        let raw = build_cfb(&[
            ("/EncryptionInfo", &info),
            ("/EncryptedPackage", &encrypt_package(&key, b"secret")),
        ]);

        let mut warnings = Vec::new();
        assert!(matches!(
            process(&raw, &mut warnings),
            Err(PasswordRequired)
        ));
    }

    #[test]
    fn compound_without_workbook_is_unsupported() {
        let raw = build_cfb(&[("/SomethingElse", b"data")]);
        let mut warnings = Vec::new();
        assert!(matches!(
            process(&raw, &mut warnings),
            Err(UnsupportedFormat(_))
        ));
    }

    #[test]
    fn garbage_bytes_are_compound_corrupt() {
        let raw = vec![0xD0u8; 512];
        let mut warnings = Vec::new();
        assert!(matches!(
            process(&raw, &mut warnings),
            Err(CompoundFileCorrupt(_))
        ));
    }
}
