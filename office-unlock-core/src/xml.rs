//! XML protection scrubbing.
//!
//! Parts are rewritten event-by-event with quick-xml, never by string or
//! regex substitution: protection elements are matched by local name so
//! namespace prefixes and attribute order elsewhere in the document survive
//! byte-identical. Untouched events are re-emitted from their original raw
//! buffers, which keeps the pass byte-stable on already-clean parts.

use crate::errors::UnlockError::{self, *};

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

/// Which protection-bearing part an XML buffer came from. The removal policy
/// differs per part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum XmlPart {
    /// OOXML `xl/workbook.xml`: drop `<workbookProtection>`, un-hide sheets.
    Workbook,
    /// OOXML `xl/worksheets/sheetN.xml`: drop `<sheetProtection>`.
    Worksheet,
    /// ODF `content.xml` / `settings.xml`: strip `table:protected`-style
    /// attributes anywhere they appear.
    Odf,
}

/// ODF protection attributes, matched by local name so any prefix bound to
/// the table namespace is caught.
const ODF_PROTECTION_ATTRS: [&[u8]; 4] = [
    b"protected",
    b"structure-protected",
    b"protection-key",
    b"protection-key-digest-algorithm",
];

pub(crate) fn scrub(raw: &[u8], part: XmlPart) -> Result<Vec<u8>, UnlockError> {
    let mut reader = Reader::from_reader(raw);
    let mut writer = Writer::new(Cursor::new(Vec::with_capacity(raw.len())));
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| MalformedXml(format!("offset {}: {e}", reader.buffer_position())))?;
        match event {
            Event::Empty(e) if removes_element(part, &e) => (),
            Event::Start(e) if removes_element(part, &e) => {
                // discard everything up to and including the matching end tag
                let end = e.to_end().into_owned();
                let mut skipped = Vec::new();
                reader
                    .read_to_end_into(end.name(), &mut skipped)
                    .map_err(|e| {
                        MalformedXml(format!("offset {}: {e}", reader.buffer_position()))
                    })?;
            }
            Event::Empty(e) => match strip_attributes(part, &e)? {
                Some(rewritten) => write_event(&mut writer, Event::Empty(rewritten))?,
                None => write_event(&mut writer, Event::Empty(e))?,
            },
            Event::Start(e) => match strip_attributes(part, &e)? {
                Some(rewritten) => write_event(&mut writer, Event::Start(rewritten))?,
                None => write_event(&mut writer, Event::Start(e))?,
            },
            Event::Eof => break,
            other => write_event(&mut writer, other)?,
        }
        buf.clear();
    }

    Ok(writer.into_inner().into_inner())
}

fn write_event(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    event: Event,
) -> Result<(), UnlockError> {
    writer
        .write_event(event)
        .map_err(|e| MalformedXml(format!("serialize: {e}")))
}

fn removes_element(part: XmlPart, e: &BytesStart) -> bool {
    let local = e.local_name();
    match part {
        XmlPart::Worksheet => local.as_ref() == b"sheetProtection",
        XmlPart::Workbook => local.as_ref() == b"workbookProtection",
        XmlPart::Odf => false,
    }
}

/// Returns a rebuilt element with protection attributes removed, or `None`
/// when nothing needs to change (so the original raw bytes pass through).
fn strip_attributes<'a>(
    part: XmlPart,
    e: &BytesStart<'a>,
) -> Result<Option<BytesStart<'static>>, UnlockError> {
    let strip_needed = match part {
        XmlPart::Odf => has_attribute(e, &ODF_PROTECTION_ATTRS)?,
        XmlPart::Workbook => {
            e.local_name().as_ref() == b"sheet" && has_hidden_state(e)?
        }
        XmlPart::Worksheet => false,
    };
    if !strip_needed {
        return Ok(None);
    }

    let name = String::from_utf8(e.name().as_ref().to_vec())
        .map_err(|e| MalformedXml(format!("element name: {e}")))?;
    let mut rebuilt = BytesStart::new(name);
    for attr in e.attributes().with_checks(false) {
        let attr = attr.map_err(|e| MalformedXml(format!("attributes: {e}")))?;
        let local = attr.key.local_name();
        let drop = match part {
            XmlPart::Odf => ODF_PROTECTION_ATTRS.contains(&local.as_ref()),
            XmlPart::Workbook => {
                local.as_ref() == b"state" && is_hidden_value(attr.value.as_ref())
            }
            XmlPart::Worksheet => false,
        };
        if !drop {
            rebuilt.push_attribute(attr);
        }
    }
    Ok(Some(rebuilt))
}

fn has_attribute(e: &BytesStart, names: &[&[u8]]) -> Result<bool, UnlockError> {
    for attr in e.attributes().with_checks(false) {
        let attr = attr.map_err(|e| MalformedXml(format!("attributes: {e}")))?;
        if names.contains(&attr.key.local_name().as_ref()) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn has_hidden_state(e: &BytesStart) -> Result<bool, UnlockError> {
    for attr in e.attributes().with_checks(false) {
        let attr = attr.map_err(|e| MalformedXml(format!("attributes: {e}")))?;
        if attr.key.local_name().as_ref() == b"state" && is_hidden_value(attr.value.as_ref()) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn is_hidden_value(value: &[u8]) -> bool {
    value == b"hidden" || value == b"veryHidden"
}
