//! BIFF12 record patching for XLSB parts.
//!
//! XLSB stores each part (`xl/workbook.bin`, `xl/worksheets/sheetN.bin`) as a
//! flat sequence of records with a variable-length header: a 1-2 byte record
//! type (7 bits per byte, high bit = continuation) followed by a 1-4 byte
//! payload length in the same encoding. Protection records are dropped whole;
//! every other record is re-emitted byte-identical and in original order,
//! since BIFF12 parts carry no absolute offsets that dropping could break.

use crate::errors::UnlockError::{self, *};

/// [MS-XLSB] protection record types.
const BRT_BOOK_PROTECTION: u16 = 0x0216;
const BRT_SHEET_PROTECTION: u16 = 0x0217;

pub(crate) fn patch_part(raw: &[u8]) -> Result<Vec<u8>, UnlockError> {
    let mut out = Vec::with_capacity(raw.len());
    let mut pos = 0usize;

    while pos < raw.len() {
        let start = pos;
        let (record_type, after_type) = read_record_type(raw, pos)?;
        let (payload_len, after_header) = read_payload_len(raw, after_type)?;
        let end = after_header
            .checked_add(payload_len)
            .filter(|end| *end <= raw.len())
            .ok_or_else(|| {
                TruncatedStream(format!(
                    "record 0x{record_type:04X} at offset {start} declares {payload_len} payload bytes"
                ))
            })?;

        if !is_protection_record(record_type) {
            out.extend_from_slice(&raw[start..end]);
        }
        pos = end;
    }

    Ok(out)
}

fn is_protection_record(record_type: u16) -> bool {
    matches!(record_type, BRT_BOOK_PROTECTION | BRT_SHEET_PROTECTION)
}

fn read_record_type(raw: &[u8], pos: usize) -> Result<(u16, usize), UnlockError> {
    let first = *raw
        .get(pos)
        .ok_or_else(|| TruncatedStream(format!("record type at offset {pos}")))?;
    if first & 0x80 == 0 {
        return Ok((first as u16, pos + 1));
    }
    let second = *raw
        .get(pos + 1)
        .ok_or_else(|| TruncatedStream(format!("record type at offset {pos}")))?;
    let record_type = ((first & 0x7F) as u16) | (((second & 0x7F) as u16) << 7);
    Ok((record_type, pos + 2))
}

fn read_payload_len(raw: &[u8], mut pos: usize) -> Result<(usize, usize), UnlockError> {
    let mut len = 0usize;
    let mut shift = 0u32;
    loop {
        let byte = *raw
            .get(pos)
            .ok_or_else(|| TruncatedStream(format!("record length at offset {pos}")))?;
        len |= ((byte & 0x7F) as usize) << shift;
        pos += 1;
        if byte & 0x80 == 0 {
            return Ok((len, pos));
        }
        shift += 7;
        if shift > 28 {
            return Err(TruncatedStream(format!(
                "record length at offset {pos} exceeds 4 bytes"
            )));
        }
    }
}
