//! `EncryptedPackage` stream cipher.
//!
//! The stream is an 8-byte cleartext header followed by the package ciphertext:
//! - bytes 0..4: plaintext length as `u32le`
//! - bytes 4..8: reserved, written as zero and ignored on read
//! - bytes 8..: 4096-byte segments, each encrypted independently with
//!   `IV = Hash(keyData.saltValue || LE32(segment_index))`
//!
//! The final segment is zero-padded to a whole number of cipher blocks.

use crate::aes_cbc::{
    decrypt_aes_cbc_no_padding_in_place, encrypt_aes_cbc_no_padding_in_place, CipherAlgorithm,
    CipherChaining, AES_BLOCK_SIZE,
};
use crate::crypto::{derive_iv, BlockKey, HashAlgorithm};
use crate::error::{EncryptionError, Result};

pub const SEGMENT_LEN: usize = 0x1000;
pub const PACKAGE_HEADER_LEN: usize = 8;

/// Encrypt (`encrypt = true`) or decrypt an `EncryptedPackage` stream.
///
/// On encrypt `input` is the plaintext package and the result includes the 8-byte header. On
/// decrypt `input` is the full stream and the result is truncated to the length in its header.
#[allow(clippy::too_many_arguments)]
pub fn crypt_package(
    encrypt: bool,
    cipher_algorithm: CipherAlgorithm,
    cipher_chaining: CipherChaining,
    hash_algorithm: HashAlgorithm,
    block_size: usize,
    salt: &[u8],
    key: &[u8],
    input: &[u8],
) -> Result<Vec<u8>> {
    match cipher_algorithm {
        CipherAlgorithm::Aes => {}
    }
    cipher_chaining.require_cbc()?;
    if block_size != AES_BLOCK_SIZE {
        return Err(EncryptionError::InvalidBlockSize { block_size });
    }

    if encrypt {
        encrypt_segments(hash_algorithm, block_size, salt, key, input)
    } else {
        decrypt_segments(hash_algorithm, block_size, salt, key, input)
    }
}

fn encrypt_segments(
    hash_algorithm: HashAlgorithm,
    block_size: usize,
    salt: &[u8],
    key: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let declared_len = u32::try_from(plaintext.len()).map_err(|_| {
        EncryptionError::InvalidOptions(format!(
            "package of {} bytes exceeds the 4 GiB EncryptedPackage limit",
            plaintext.len()
        ))
    })?;

    let padded_len = plaintext.len().div_ceil(block_size) * block_size;
    let mut out = Vec::with_capacity(PACKAGE_HEADER_LEN + padded_len);
    out.extend_from_slice(&declared_len.to_le_bytes());
    out.extend_from_slice(&[0u8; 4]);

    for (idx, chunk) in plaintext.chunks(SEGMENT_LEN).enumerate() {
        let segment_index = idx as u32;
        let iv = derive_iv(hash_algorithm, salt, block_size, BlockKey::Segment(segment_index));

        let start = out.len();
        out.extend_from_slice(chunk);
        let rem = chunk.len() % block_size;
        if rem != 0 {
            out.resize(out.len() + (block_size - rem), 0);
        }
        encrypt_aes_cbc_no_padding_in_place(key, &iv, &mut out[start..])?;
        log::trace!(
            "encrypted EncryptedPackage segment {segment_index} ({} bytes)",
            chunk.len()
        );
    }

    Ok(out)
}

fn decrypt_segments(
    hash_algorithm: HashAlgorithm,
    block_size: usize,
    salt: &[u8],
    key: &[u8],
    stream: &[u8],
) -> Result<Vec<u8>> {
    if stream.len() < PACKAGE_HEADER_LEN {
        return Err(EncryptionError::EncryptedPackageTooShort { len: stream.len() });
    }

    let declared_len = u32::from_le_bytes([stream[0], stream[1], stream[2], stream[3]]) as usize;
    let ciphertext = &stream[PACKAGE_HEADER_LEN..];
    if ciphertext.len() % block_size != 0 {
        return Err(EncryptionError::CiphertextNotBlockAligned {
            field: "EncryptedPackage",
            len: ciphertext.len(),
        });
    }
    // Check before allocating from the untrusted header.
    if declared_len > ciphertext.len() {
        return Err(EncryptionError::DecryptedLengthShorterThanHeader {
            declared_len,
            available_len: ciphertext.len(),
        });
    }

    let mut out = Vec::with_capacity(ciphertext.len());
    for (idx, chunk) in ciphertext.chunks(SEGMENT_LEN).enumerate() {
        if out.len() >= declared_len {
            break;
        }
        let segment_index = idx as u32;
        let iv = derive_iv(hash_algorithm, salt, block_size, BlockKey::Segment(segment_index));

        let start = out.len();
        out.extend_from_slice(chunk);
        decrypt_aes_cbc_no_padding_in_place(key, &iv, &mut out[start..])?;
        log::trace!("decrypted EncryptedPackage segment {segment_index}");
    }

    out.truncate(declared_len);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x5A; 32];
    const SALT: [u8; 16] = [0x01; 16];

    fn encrypt(input: &[u8]) -> Vec<u8> {
        crypt_package(
            true,
            CipherAlgorithm::Aes,
            CipherChaining::Cbc,
            HashAlgorithm::Sha512,
            16,
            &SALT,
            &KEY,
            input,
        )
        .expect("encrypt")
    }

    fn decrypt(stream: &[u8]) -> Result<Vec<u8>> {
        crypt_package(
            false,
            CipherAlgorithm::Aes,
            CipherChaining::Cbc,
            HashAlgorithm::Sha512,
            16,
            &SALT,
            &KEY,
            stream,
        )
    }

    #[test]
    fn header_carries_length_and_zero_reserved_bytes() {
        let out = encrypt(&[7u8; 5000]);
        assert_eq!(&out[..4], &5000u32.to_le_bytes());
        assert_eq!(&out[4..8], &[0u8; 4]);
        // 4096 + ceil(904 / 16) * 16
        assert_eq!(out.len(), 8 + 4096 + 912);
    }

    #[test]
    fn segment_boundaries_survive() {
        for len in [0usize, 1, 15, 16, 17, 4095, 4096, 4097, 8192, 8193] {
            let plain: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let stream = encrypt(&plain);
            assert_eq!((stream.len() - 8) % 16, 0, "len={len}");
            assert_eq!(decrypt(&stream).expect("decrypt"), plain, "len={len}");
        }
    }

    #[test]
    fn segments_use_independent_ivs() {
        // Identical plaintext segments must not produce identical ciphertext.
        let stream = encrypt(&[0u8; 8192]);
        assert_ne!(&stream[8..8 + 4096], &stream[8 + 4096..]);
    }

    #[test]
    fn first_segment_matches_manual_cbc() {
        let plain = [0x42u8; 20];
        let stream = encrypt(&plain);

        let iv = derive_iv(HashAlgorithm::Sha512, &SALT, 16, BlockKey::Segment(0));
        let mut expected = plain.to_vec();
        expected.resize(32, 0);
        encrypt_aes_cbc_no_padding_in_place(&KEY, &iv, &mut expected).unwrap();
        assert_eq!(&stream[8..], expected.as_slice());
    }

    #[test]
    fn rejects_short_and_unaligned_streams() {
        assert!(matches!(
            decrypt(&[0u8; 7]),
            Err(EncryptionError::EncryptedPackageTooShort { len: 7 })
        ));

        let mut stream = encrypt(&[1u8; 32]);
        stream.pop();
        assert!(matches!(
            decrypt(&stream),
            Err(EncryptionError::CiphertextNotBlockAligned {
                field: "EncryptedPackage",
                ..
            })
        ));
    }

    #[test]
    fn rejects_declared_length_beyond_ciphertext() {
        let mut stream = encrypt(&[1u8; 32]);
        stream[..4].copy_from_slice(&1000u32.to_le_bytes());
        assert!(matches!(
            decrypt(&stream),
            Err(EncryptionError::DecryptedLengthShorterThanHeader {
                declared_len: 1000,
                available_len: 32
            })
        ));
    }

    #[test]
    fn reserved_header_bytes_are_ignored() {
        let mut stream = encrypt(b"hello");
        stream[4..8].copy_from_slice(&[0xFF; 4]);
        assert_eq!(decrypt(&stream).expect("decrypt"), b"hello");
    }

    #[test]
    fn cfb_chaining_is_rejected_before_any_work() {
        let err = crypt_package(
            true,
            CipherAlgorithm::Aes,
            CipherChaining::Cfb,
            HashAlgorithm::Sha512,
            16,
            &SALT,
            &KEY,
            b"data",
        )
        .expect_err("cfb");
        assert!(matches!(err, EncryptionError::UnsupportedChaining { .. }));
    }
}
