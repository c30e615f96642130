//! ODF (.ods) scenarios: protection attribute stripping and preservation of
//! the order-sensitive stored `mimetype` entry.

use office_unlock_rs::{unlock_file, UnlockOptions};

use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

const MIMETYPE: &[u8] = b"application/vnd.oasis.opendocument.spreadsheet";

const CONTENT_LOCKED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<office:document-content xmlns:office="urn:oasis:names:tc:opendocument:xmlns:office:1.0" xmlns:table="urn:oasis:names:tc:opendocument:xmlns:table:1.0"><office:body><office:spreadsheet table:structure-protected="true" table:protection-key="c3RydWN0"><table:table table:name="Sheet1" table:protected="true" table:protection-key="aGFzaA==" table:protection-key-digest-algorithm="http://www.w3.org/2000/09/xmldsig#sha256"><table:table-row/></table:table></office:spreadsheet></office:body></office:document-content>"#;

const SETTINGS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<office:document-settings xmlns:office="urn:oasis:names:tc:opendocument:xmlns:office:1.0"><office:settings/></office:document-settings>"#;

fn build_ods() -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    // mimetype must be first and stored, as produced by real ODF writers
    writer
        .start_file(
            "mimetype",
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
        )
        .unwrap();
    writer.write_all(MIMETYPE).unwrap();
    for (name, data) in [
        ("content.xml", CONTENT_LOCKED.as_bytes()),
        ("settings.xml", SETTINGS.as_bytes()),
        ("meta.xml", b"<office:document-meta/>".as_slice()),
    ] {
        writer
            .start_file(name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[test]
fn strips_table_protection_attributes() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("sheet.ods");
    std::fs::write(&input, build_ods()).unwrap();

    let outcome = unlock_file(&input, &UnlockOptions::default()).unwrap();
    assert_eq!(outcome.written, dir.path().join("sheet_unlocked.ods"));

    let output = std::fs::read(&outcome.written).unwrap();
    let mut zip = zip::ZipArchive::new(Cursor::new(&output[..])).unwrap();
    let mut content = String::new();
    zip.by_name("content.xml")
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    assert!(!content.contains("protected"));
    assert!(!content.contains("protection-key"));
    assert!(content.contains("table:name=\"Sheet1\""));
    assert!(content.contains("<table:table-row/>"));
}

#[test]
fn mimetype_entry_stays_first_and_stored() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("sheet.ods");
    std::fs::write(&input, build_ods()).unwrap();

    let outcome = unlock_file(&input, &UnlockOptions::default()).unwrap();
    let output = std::fs::read(&outcome.written).unwrap();

    let mut zip = zip::ZipArchive::new(Cursor::new(&output[..])).unwrap();
    let first = zip.by_index(0).unwrap();
    assert_eq!(first.name(), "mimetype");
    assert_eq!(first.compression(), CompressionMethod::Stored);
    drop(first);

    let mut mimetype = Vec::new();
    zip.by_name("mimetype")
        .unwrap()
        .read_to_end(&mut mimetype)
        .unwrap();
    assert_eq!(mimetype, MIMETYPE);
}

#[test]
fn meta_entry_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("sheet.ods");
    std::fs::write(&input, build_ods()).unwrap();

    let outcome = unlock_file(&input, &UnlockOptions::default()).unwrap();
    let output = std::fs::read(&outcome.written).unwrap();
    let mut zip = zip::ZipArchive::new(Cursor::new(&output[..])).unwrap();
    let mut meta = Vec::new();
    zip.by_name("meta.xml")
        .unwrap()
        .read_to_end(&mut meta)
        .unwrap();
    assert_eq!(meta, b"<office:document-meta/>");
}
