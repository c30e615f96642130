//! Standard encryption ([MS-OFFCRYPTO] 2.3.4.5): binary `EncryptionInfo`
//! header + verifier, AES-ECB encrypted package, SHA-1 based key derivation.

use crate::errors::UnlockError::{self, *};
use crate::utils::{utf16_le_bytes, validate};

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, KeyInit};
use sha1::{Digest, Sha1};

const ITER_COUNT: u32 = 50000;

// ALG_ID values for the AES family; anything else we cannot unlock.
const CALG_AES_128: u32 = 0x0000_660E;
const CALG_AES_192: u32 = 0x0000_660F;
const CALG_AES_256: u32 = 0x0000_6610;
const CALG_RC4: u32 = 0x0000_6801;

#[derive(Default, Debug)]
pub(crate) struct StandardEncryptionInfo {
    alg_id: u32,
    key_size: u32,
    salt: Vec<u8>,
    encrypted_verifier: Vec<u8>,
    verifier_hash_size: u32,
    encrypted_verifier_hash: Vec<u8>,
}

fn le_u32(raw: &[u8], offset: usize, what: &str) -> Result<u32, UnlockError> {
    raw.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| CompoundFileCorrupt(format!("EncryptionInfo: {what} out of bounds")))
}

impl StandardEncryptionInfo {
    /// Parse a full `EncryptionInfo` stream (version + flags + header +
    /// verifier).
    pub fn parse(raw: &[u8]) -> Result<Self, UnlockError> {
        let header_size = le_u32(raw, 8, "header size")? as usize;
        let header = raw
            .get(12..12 + header_size)
            .ok_or_else(|| CompoundFileCorrupt("EncryptionInfo: truncated header".to_string()))?;
        validate!(
            header.len() >= 32,
            CompoundFileCorrupt("EncryptionInfo: header too small".to_string())
        )?;

        let mut info = Self {
            alg_id: le_u32(header, 8, "AlgID")?,
            key_size: le_u32(header, 16, "KeySize")?,
            ..Self::default()
        };

        match info.alg_id {
            CALG_AES_128 | CALG_AES_192 | CALG_AES_256 => (),
            CALG_RC4 => {
                return Err(UnsupportedFormat(
                    "RC4 CryptoAPI encryption".to_string(),
                ))
            }
            other => {
                return Err(CompoundFileCorrupt(format!(
                    "EncryptionInfo: unrecognised AlgID 0x{other:08X}"
                )))
            }
        }

        let verifier = raw
            .get(12 + header_size..)
            .ok_or_else(|| CompoundFileCorrupt("EncryptionInfo: missing verifier".to_string()))?;
        validate!(
            verifier.len() >= 72,
            CompoundFileCorrupt("EncryptionInfo: truncated verifier".to_string())
        )?;
        let salt_size = le_u32(verifier, 0, "SaltSize")? as usize;
        validate!(
            salt_size == 16,
            CompoundFileCorrupt(format!("EncryptionInfo: SaltSize {salt_size}"))
        )?;
        info.salt = verifier[4..20].to_vec();
        info.encrypted_verifier = verifier[20..36].to_vec();
        info.verifier_hash_size = le_u32(verifier, 36, "VerifierHashSize")?;
        info.encrypted_verifier_hash = verifier[40..72].to_vec();

        Ok(info)
    }

    /// [MS-OFFCRYPTO] 2.3.4.7: 50000 iterations of SHA-1, then the
    /// X1/X2 ipad/opad expansion, truncated to the declared key size.
    pub fn key_from_password(&self, password: &str) -> Result<Vec<u8>, UnlockError> {
        let pass_utf16 = utf16_le_bytes(password);

        let mut h = Sha1::digest([&self.salt[..], &pass_utf16].concat());
        for i in 0u32..ITER_COUNT {
            h = Sha1::digest([&i.to_le_bytes(), h.as_slice()].concat());
        }
        h = Sha1::digest([h.as_slice(), &[0u8; 4]].concat());

        let mut buf1 = [0x36_u8; 64];
        buf1.iter_mut().zip(h.iter()).for_each(|(a, b)| *a ^= *b);
        let x1 = Sha1::digest(buf1);

        let mut buf2 = [0x5c_u8; 64];
        buf2.iter_mut().zip(h.iter()).for_each(|(a, b)| *a ^= *b);
        let x2 = Sha1::digest(buf2);

        let key_len = self.key_size as usize / 8;
        let expanded = [x1, x2].concat();
        validate!(
            key_len > 0 && key_len <= expanded.len(),
            CompoundFileCorrupt(format!("EncryptionInfo: unusable KeySize {}", self.key_size))
        )?;
        Ok(expanded[..key_len].to_vec())
    }

    /// Check the key against the stored verifier: decrypt the random
    /// verifier block, hash it, compare with the decrypted verifier hash.
    pub fn verify_key(&self, key: &[u8]) -> Result<bool, UnlockError> {
        let verifier = decrypt_aes_ecb(key, &self.encrypted_verifier)?;
        let verifier_hash = decrypt_aes_ecb(key, &self.encrypted_verifier_hash)?;
        let expected = Sha1::digest(&verifier);

        let span = (self.verifier_hash_size as usize).min(expected.len());
        validate!(
            span > 0 && verifier_hash.len() >= span,
            CompoundFileCorrupt("EncryptionInfo: verifier hash too short".to_string())
        )?;
        Ok(verifier_hash[..span] == expected[..span])
    }

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

        let mut decrypted = decrypt_aes_ecb(key, payload)?;
        decrypted.truncate(total_size);
        Ok(decrypted)
    }
}

fn decrypt_aes_ecb(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, UnlockError> {
    let mut plaintext = vec![0u8; ciphertext.len()];

    let corrupt = |what: &str| CompoundFileCorrupt(format!("AES-ECB: {what}"));
    match key.len() * 8 {
        128 => {
            let cipher = ecb::Decryptor::<aes::Aes128>::new(key.into());
            cipher
                .decrypt_padded_b2b_mut::<NoPadding>(ciphertext, &mut plaintext)
                .map_err(|_| corrupt("unpadded ciphertext"))?;
        }
        192 => {
            let cipher = ecb::Decryptor::<aes::Aes192>::new(key.into());
            cipher
                .decrypt_padded_b2b_mut::<NoPadding>(ciphertext, &mut plaintext)
                .map_err(|_| corrupt("unpadded ciphertext"))?;
        }
        256 => {
            let cipher = ecb::Decryptor::<aes::Aes256>::new(key.into());
            cipher
                .decrypt_padded_b2b_mut::<NoPadding>(ciphertext, &mut plaintext)
                .map_err(|_| corrupt("unpadded ciphertext"))?;
        }
        other => return Err(corrupt(&format!("unrecognised key length {other}"))),
    }

    Ok(plaintext)
}
