//! BIFF8 record patching for the legacy `.xls` `Workbook` stream.
//!
//! Records are `(u16 type, u16 length)` headers followed by the payload.
//! Unlike BIFF12, the stream is riddled with absolute offsets (BOF positions
//! in `BoundSheet8`, `Index` pointers), so protection records are neutralized
//! by zeroing their payloads in place rather than being removed — the stream
//! length must not change.

use crate::errors::UnlockError::{self, *};

// [MS-XLS] record types.
const PROTECT: u16 = 0x0012;
const PASSWORD: u16 = 0x0013;
const WINDOW_PROTECT: u16 = 0x0019;
const FILE_PASS: u16 = 0x002F;
const OBJ_PROTECT: u16 = 0x0063;
const SCEN_PROTECT: u16 = 0x00DD;
const PROT_4_REV: u16 = 0x01AF;
const PROT_4_REV_PASS: u16 = 0x01BC;

/// Zero every protection record payload in a BIFF8 stream. The returned
/// buffer always has the same length as the input.
///
/// A `FilePass` record means the rest of the stream is RC4/XOR encrypted with
/// a key we cannot recover from the file alone, so it is reported as
/// `PasswordRequired` instead of producing garbage output.
pub(crate) fn patch_workbook_stream(raw: &[u8]) -> Result<Vec<u8>, UnlockError> {
    let mut out = raw.to_vec();
    let mut pos = 0usize;

    while pos < raw.len() {
        if raw.len() - pos < 4 {
            return Err(TruncatedStream(format!(
                "BIFF record header at offset {pos}"
            )));
        }
        let record_type = u16::from_le_bytes([raw[pos], raw[pos + 1]]);
        let payload_len = u16::from_le_bytes([raw[pos + 2], raw[pos + 3]]) as usize;
        let end = pos + 4 + payload_len;
        if end > raw.len() {
            return Err(TruncatedStream(format!(
                "BIFF record 0x{record_type:04X} at offset {pos} declares {payload_len} payload bytes"
            )));
        }

        match record_type {
            FILE_PASS => return Err(PasswordRequired),
            PROTECT | PASSWORD | WINDOW_PROTECT | OBJ_PROTECT | SCEN_PROTECT | PROT_4_REV
            | PROT_4_REV_PASS => {
                out[pos + 4..end].fill(0);
            }
            _ => (),
        }
        pos = end;
    }

    Ok(out)
}
