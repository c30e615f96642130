use crate::errors::UnlockError::{self, *};

use base64::engine::general_purpose;
use std::io::prelude::*;
use std::io::Cursor;

macro_rules! validate {
    ($assert:expr, $err:expr) => {{
        if ($assert) {
            Ok(())
        } else {
            let error_code: UnlockError = $err;
            Err(error_code)
        }
    }};
}

pub(crate) use validate;

pub(crate) fn b64_decode(bytes: &[u8]) -> Result<Vec<u8>, UnlockError> {
    let mut wrapped_reader = Cursor::new(bytes);
    let mut decoder =
        base64::read::DecoderReader::new(&mut wrapped_reader, &general_purpose::STANDARD);

    let mut result = Vec::new();
    decoder
        .read_to_end(&mut result)
        .map_err(|e| CompoundFileCorrupt(format!("base64 value: {e}")))?;
    Ok(result)
}

/// UTF-16LE bytes of a password, as hashed by every MS-OFFCRYPTO key derivation.
pub(crate) fn utf16_le_bytes(password: &str) -> Vec<u8> {
    password
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect()
}
