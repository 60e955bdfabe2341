//! AES-CBC without padding, plus the cipher identifiers used in `EncryptionInfo`.
//!
//! Agile encryption pre-pads every plaintext to a whole number of blocks and records the semantic
//! length elsewhere, so the block cipher itself never adds or strips padding.

use aes::{Aes128, Aes192, Aes256};
use cipher::block_padding::NoPadding;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use thiserror::Error;

use crate::error::{EncryptionError, Result};

pub const AES_BLOCK_SIZE: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AesCbcError {
    #[error("unsupported AES key length: {0} bytes (expected 16, 24, or 32)")]
    UnsupportedKeyLength(usize),
    #[error("invalid AES-CBC IV length: {0} bytes (expected 16)")]
    InvalidIvLength(usize),
    #[error("data length is not a multiple of 16 bytes: {0}")]
    InvalidDataLength(usize),
}

/// `cipherAlgorithm` attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgorithm {
    Aes,
}

impl CipherAlgorithm {
    pub fn parse_offcrypto_name(name: &str) -> Result<Self> {
        if name.trim().eq_ignore_ascii_case("AES") {
            Ok(Self::Aes)
        } else {
            Err(EncryptionError::UnsupportedCipherAlgorithm {
                cipher: name.to_string(),
            })
        }
    }

    pub fn as_offcrypto_name(self) -> &'static str {
        match self {
            Self::Aes => "AES",
        }
    }
}

/// `cipherChaining` attribute values.
///
/// `ChainingModeCFB` is recognized so descriptors that declare it can be parsed and then rejected
/// with [`EncryptionError::UnsupportedChaining`] when a cipher operation is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherChaining {
    Cbc,
    Cfb,
}

impl CipherChaining {
    pub fn parse_offcrypto_name(name: &str) -> Result<Self> {
        match name.trim() {
            n if n.eq_ignore_ascii_case("ChainingModeCBC") => Ok(Self::Cbc),
            n if n.eq_ignore_ascii_case("ChainingModeCFB") => Ok(Self::Cfb),
            _ => Err(EncryptionError::UnsupportedChaining {
                chaining: name.to_string(),
            }),
        }
    }

    pub fn as_offcrypto_name(self) -> &'static str {
        match self {
            Self::Cbc => "ChainingModeCBC",
            Self::Cfb => "ChainingModeCFB",
        }
    }

    /// Fail unless this is CBC.
    pub fn require_cbc(self) -> Result<()> {
        match self {
            Self::Cbc => Ok(()),
            other => Err(EncryptionError::UnsupportedChaining {
                chaining: other.as_offcrypto_name().to_string(),
            }),
        }
    }
}

fn check_lengths(iv: &[u8], len: usize) -> std::result::Result<(), AesCbcError> {
    if iv.len() != AES_BLOCK_SIZE {
        return Err(AesCbcError::InvalidIvLength(iv.len()));
    }
    if len % AES_BLOCK_SIZE != 0 {
        return Err(AesCbcError::InvalidDataLength(len));
    }
    Ok(())
}

/// In-place AES-CBC encryption without padding. `buf` must be block aligned.
pub fn encrypt_aes_cbc_no_padding_in_place(
    key: &[u8],
    iv: &[u8],
    buf: &mut [u8],
) -> std::result::Result<(), AesCbcError> {
    check_lengths(iv, buf.len())?;
    if buf.is_empty() {
        return Ok(());
    }
    let len = buf.len();

    macro_rules! encrypt_with {
        ($aes:ty) => {
            cbc::Encryptor::<$aes>::new_from_slices(key, iv)
                .map_err(|_| AesCbcError::UnsupportedKeyLength(key.len()))?
                .encrypt_padded_mut::<NoPadding>(buf, len)
                .map(|_| ())
                .map_err(|_| AesCbcError::InvalidDataLength(len))
        };
    }

    match key.len() {
        16 => encrypt_with!(Aes128),
        24 => encrypt_with!(Aes192),
        32 => encrypt_with!(Aes256),
        other => Err(AesCbcError::UnsupportedKeyLength(other)),
    }
}

/// In-place AES-CBC decryption without padding removal.
pub fn decrypt_aes_cbc_no_padding_in_place(
    key: &[u8],
    iv: &[u8],
    buf: &mut [u8],
) -> std::result::Result<(), AesCbcError> {
    check_lengths(iv, buf.len())?;
    if buf.is_empty() {
        return Ok(());
    }
    let len = buf.len();

    macro_rules! decrypt_with {
        ($aes:ty) => {
            cbc::Decryptor::<$aes>::new_from_slices(key, iv)
                .map_err(|_| AesCbcError::UnsupportedKeyLength(key.len()))?
                .decrypt_padded_mut::<NoPadding>(buf)
                .map(|_| ())
                .map_err(|_| AesCbcError::InvalidDataLength(len))
        };
    }

    match key.len() {
        16 => decrypt_with!(Aes128),
        24 => decrypt_with!(Aes192),
        32 => decrypt_with!(Aes256),
        other => Err(AesCbcError::UnsupportedKeyLength(other)),
    }
}

/// Zero-pad `data` to the next multiple of `block_size`, then encrypt it.
pub fn encrypt_padded_to_block(
    key: &[u8],
    iv: &[u8],
    data: &[u8],
    block_size: usize,
) -> Result<Vec<u8>> {
    let mut buf = data.to_vec();
    let rem = buf.len() % block_size;
    if rem != 0 {
        buf.resize(buf.len() + (block_size - rem), 0);
    }
    encrypt_aes_cbc_no_padding_in_place(key, iv, &mut buf)?;
    Ok(buf)
}

/// Decrypt a block-aligned blob.
pub fn decrypt_blob(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let mut buf = ciphertext.to_vec();
    decrypt_aes_cbc_no_padding_in_place(key, iv, &mut buf)?;
    Ok(buf)
}
