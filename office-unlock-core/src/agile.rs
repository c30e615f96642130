//! Agile encryption ([MS-OFFCRYPTO] 2.3.4.10+): `EncryptionInfo` is an XML
//! descriptor, the package is AES-CBC encrypted in 4096-byte segments.

use crate::errors::UnlockError::{self, *};
use crate::utils::{b64_decode, utf16_le_bytes, validate};

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

// fixed block keys appended to the password digest ([MS-OFFCRYPTO] 2.3.4.13)
const BLOCK_VERIFIER_HASH_INPUT: [u8; 8] = [0xFE, 0xA7, 0xD2, 0x76, 0x3B, 0x4B, 0x9E, 0x79];
const BLOCK_VERIFIER_HASH_VALUE: [u8; 8] = [0xD7, 0xAA, 0x0F, 0x6D, 0x30, 0x61, 0x34, 0x4E];
const BLOCK_ENCRYPTED_KEY: [u8; 8] = [0x14, 0x6E, 0x0B, 0xE7, 0xAB, 0xAC, 0xD0, 0xD6];

const SEGMENT_LENGTH: usize = 4096;

#[derive(Default, Debug)]
pub(crate) struct AgileEncryptionInfo {
    key_data_salt: Vec<u8>,
    key_data_hash_algorithm: String,
    encrypted_verifier_hash_input: Vec<u8>,
    encrypted_verifier_hash_value: Vec<u8>,
    encrypted_key_value: Vec<u8>,
    spin_count: u32,
    password_salt: Vec<u8>,
    password_hash_algorithm: String,
    password_key_bits: u32,
}

impl AgileEncryptionInfo {
    /// Parse a full `EncryptionInfo` stream (8-byte version/flags header
    /// followed by the XML descriptor). Element names are matched by local
    /// name; producers are free to pick their own namespace prefixes.
    pub fn parse(raw: &[u8]) -> Result<Self, UnlockError> {
        validate!(
            raw.len() > 8,
            CompoundFileCorrupt("EncryptionInfo: stream too short".to_string())
        )?;
        let xml = std::str::from_utf8(&raw[8..])
            .map_err(|e| CompoundFileCorrupt(format!("EncryptionInfo: not UTF-8: {e}")))?;

        let mut reader = Reader::from_str(xml);
        let mut info = Self::default();
        let mut saw_key_data = false;
        let mut saw_encrypted_key = false;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| CompoundFileCorrupt(format!("EncryptionInfo XML: {e}")))?;
            match event {
                Event::Empty(e) => match e.local_name().as_ref() {
                    b"keyData" if !saw_key_data => {
                        for attr in e.attributes() {
                            let attr = attr.map_err(|e| {
                                CompoundFileCorrupt(format!("keyData attributes: {e}"))
                            })?;
                            match attr.key.as_ref() {
                                b"saltValue" => info.key_data_salt = b64_decode(&attr.value)?,
                                b"hashAlgorithm" => {
                                    info.key_data_hash_algorithm =
                                        attr_string(&attr.value, "keyData.hashAlgorithm")?;
                                }
                                _ => (),
                            }
                        }
                        saw_key_data = true;
                    }
                    b"encryptedKey" if !saw_encrypted_key => {
                        for attr in e.attributes() {
                            let attr = attr.map_err(|e| {
                                CompoundFileCorrupt(format!("encryptedKey attributes: {e}"))
                            })?;
                            match attr.key.as_ref() {
                                b"encryptedVerifierHashInput" => {
                                    info.encrypted_verifier_hash_input = b64_decode(&attr.value)?;
                                }
                                b"encryptedVerifierHashValue" => {
                                    info.encrypted_verifier_hash_value = b64_decode(&attr.value)?;
                                }
                                b"encryptedKeyValue" => {
                                    info.encrypted_key_value = b64_decode(&attr.value)?;
                                }
                                b"spinCount" => {
                                    info.spin_count =
                                        attr_u32(&attr.value, "encryptedKey.spinCount")?;
                                }
                                b"saltValue" => info.password_salt = b64_decode(&attr.value)?,
                                b"hashAlgorithm" => {
                                    info.password_hash_algorithm =
                                        attr_string(&attr.value, "encryptedKey.hashAlgorithm")?;
                                }
                                b"keyBits" => {
                                    info.password_key_bits =
                                        attr_u32(&attr.value, "encryptedKey.keyBits")?;
                                }
                                _ => (),
                            }
                        }
                        saw_encrypted_key = true;
                    }
                    _ => (),
                },
                Event::Eof => break,
                _ => (),
            }
        }

        validate!(
            saw_key_data,
            CompoundFileCorrupt("EncryptionInfo: keyData is missing".to_string())
        )?;
        validate!(
            saw_encrypted_key,
            CompoundFileCorrupt("EncryptionInfo: encryptedKey is missing".to_string())
        )?;
        validate!(
            info.password_salt.len() >= 16 && info.key_data_salt.len() >= 16,
            CompoundFileCorrupt("EncryptionInfo: salt shorter than one AES block".to_string())
        )?;

        Ok(info)
    }

    /// Check `password` against the stored verifier. Returns the decrypted
    /// secret key when it matches, `None` when it does not.
    pub fn try_password(&self, password: &str) -> Result<Option<Vec<u8>>, UnlockError> {
        let digest = self.iterated_hash_from_password(password)?;
        let iv = &self.password_salt[..16];

        let input_key = self.encryption_key(&digest, &BLOCK_VERIFIER_HASH_INPUT)?;
        let verifier = decrypt_aes_cbc(&input_key, iv, &self.encrypted_verifier_hash_input)?;
        let expected = hash(&self.password_hash_algorithm, &verifier)?;

        let value_key = self.encryption_key(&digest, &BLOCK_VERIFIER_HASH_VALUE)?;
        let actual = decrypt_aes_cbc(&value_key, iv, &self.encrypted_verifier_hash_value)?;
        validate!(
            actual.len() >= expected.len(),
            CompoundFileCorrupt("EncryptionInfo: verifier hash too short".to_string())
        )?;
        if actual[..expected.len()] != expected[..] {
            return Ok(None);
        }

        let key_key = self.encryption_key(&digest, &BLOCK_ENCRYPTED_KEY)?;
        let secret_key = decrypt_aes_cbc(&key_key, iv, &self.encrypted_key_value)?;
        Ok(Some(
            secret_key[..(self.password_key_bits as usize / 8).min(secret_key.len())].to_vec(),
        ))
    }

    /// Decrypt an `EncryptedPackage` stream: 8-byte plaintext size, then
    /// independently-encrypted 4096-byte segments, each with an IV derived
    /// from the key-data salt and the segment index.
    pub fn decrypt(&self, key: &[u8], encrypted: &[u8]) -> Result<Vec<u8>, UnlockError> {
        validate!(
            encrypted.len() >= 8,
            CompoundFileCorrupt("EncryptedPackage: missing size header".to_string())
        )?;
        let total_size = u64::from_le_bytes(
            encrypted[..8]
                .try_into()
                .map_err(|_| CompoundFileCorrupt("EncryptedPackage: size header".to_string()))?,
        ) as usize;
        let payload = &encrypted[8..];
        validate!(
            payload.len() % 16 == 0,
            CompoundFileCorrupt("EncryptedPackage: payload not block-aligned".to_string())
        )?;
        validate!(
            total_size <= payload.len(),
            CompoundFileCorrupt("EncryptedPackage: declared size exceeds stream".to_string())
        )?;

        let mut decrypted = Vec::with_capacity(payload.len());
        for (index, segment) in payload.chunks(SEGMENT_LENGTH).enumerate() {
            let iv = hash(
                &self.key_data_hash_algorithm,
                &[&self.key_data_salt[..], &(index as u32).to_le_bytes()].concat(),
            )?;
            let plaintext = decrypt_aes_cbc(key, &iv[..16], segment)?;
            decrypted.extend_from_slice(&plaintext);
        }
        decrypted.truncate(total_size);
        Ok(decrypted)
    }

    // usually 100000 iterations of the configured hash; unavoidable cost
    fn iterated_hash_from_password(&self, password: &str) -> Result<Vec<u8>, UnlockError> {
        let pass_utf16 = utf16_le_bytes(password);
        let salted = [&self.password_salt[..], &pass_utf16].concat();

        let mut h = hash(&self.password_hash_algorithm, &salted)?;
        for i in 0u32..self.spin_count {
            h = hash(
                &self.password_hash_algorithm,
                &[i.to_le_bytes().as_ref(), &h].concat(),
            )?;
        }
        Ok(h)
    }

    fn encryption_key(&self, digest: &[u8], block: &[u8]) -> Result<Vec<u8>, UnlockError> {
        let h = hash(&self.password_hash_algorithm, &[digest, block].concat())?;
        let key_len = self.password_key_bits as usize / 8;
        validate!(
            key_len > 0 && key_len <= h.len(),
            CompoundFileCorrupt(format!(
                "EncryptionInfo: unusable keyBits {}",
                self.password_key_bits
            ))
        )?;
        Ok(h[..key_len].to_vec())
    }
}

pub(crate) fn decrypt_aes_cbc(
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, UnlockError> {
    let mut plaintext = vec![0u8; ciphertext.len()];

    let corrupt = |what: &str| CompoundFileCorrupt(format!("AES-CBC: {what}"));
    match key.len() * 8 {
        128 => {
            let cipher = cbc::Decryptor::<aes::Aes128>::new(key.into(), iv.into());
            cipher
                .decrypt_padded_b2b_mut::<NoPadding>(ciphertext, &mut plaintext)
                .map_err(|_| corrupt("unpadded ciphertext"))?;
        }
        192 => {
            let cipher = cbc::Decryptor::<aes::Aes192>::new(key.into(), iv.into());
            cipher
                .decrypt_padded_b2b_mut::<NoPadding>(ciphertext, &mut plaintext)
                .map_err(|_| corrupt("unpadded ciphertext"))?;
        }
        256 => {
            let cipher = cbc::Decryptor::<aes::Aes256>::new(key.into(), iv.into());
            cipher
                .decrypt_padded_b2b_mut::<NoPadding>(ciphertext, &mut plaintext)
                .map_err(|_| corrupt("unpadded ciphertext"))?;
        }
        other => return Err(corrupt(&format!("unrecognised key length {other}"))),
    }

    Ok(plaintext)
}

pub(crate) fn hash(algorithm: &str, input: &[u8]) -> Result<Vec<u8>, UnlockError> {
    match algorithm {
        "SHA512" => Ok(Sha512::digest(input).to_vec()),
        "SHA256" => Ok(Sha256::digest(input).to_vec()),
        "SHA1" => Ok(Sha1::digest(input).to_vec()),
        other => Err(CompoundFileCorrupt(format!(
            "unrecognised hash algorithm `{other}`"
        ))),
    }
}

fn attr_string(value: &[u8], what: &str) -> Result<String, UnlockError> {
    String::from_utf8(value.to_vec())
        .map_err(|e| CompoundFileCorrupt(format!("EncryptionInfo: {what}: {e}")))
}

fn attr_u32(value: &[u8], what: &str) -> Result<u32, UnlockError> {
    attr_string(value, what)?
        .parse()
        .map_err(|e| CompoundFileCorrupt(format!("EncryptionInfo: {what}: {e}")))
}
