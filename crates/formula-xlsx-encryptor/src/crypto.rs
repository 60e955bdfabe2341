//! Hash/HMAC primitives and the Agile password → key / IV derivation.
//!
//! Agile encryption derives every secret from one of two inputs:
//! - the *iterated password hash* (`Hash(salt || UTF-16LE(password))` re-hashed `spinCount` times),
//!   combined with a fixed 8-byte block key to get a key-encryptor key;
//! - a salt combined with a block key (a fixed constant, or `LE32(segment_index)` for the
//!   `EncryptedPackage` segments) to get an IV.
//!
//! Outputs shorter than the requested length are right-padded with `0x36`; longer outputs are
//! truncated. Readers such as Excel rely on that exact rule.

use digest::Digest as _;
use hmac::{Hmac, Mac as _};
use zeroize::Zeroizing;

use crate::error::{EncryptionError, Result};

/// Fill byte used when a derived key or IV is longer than the hash output.
pub const DERIVATION_PAD_BYTE: u8 = 0x36;

/// Block key for the key that wraps the package key (`encryptedKeyValue`).
pub const KEY_VALUE_BLOCK: [u8; 8] = [0x14, 0x6E, 0x0B, 0xE7, 0xAB, 0xAC, 0xD0, 0xD6];
/// Block key for the key that encrypts `verifierHashInput`.
pub const VERIFIER_HASH_INPUT_BLOCK: [u8; 8] = [0xFE, 0xA7, 0xD2, 0x76, 0x3B, 0x4B, 0x9E, 0x79];
/// Block key for the key that encrypts `verifierHashValue`.
pub const VERIFIER_HASH_VALUE_BLOCK: [u8; 8] = [0xD7, 0xAA, 0x0F, 0x6D, 0x30, 0x61, 0x34, 0x4E];
/// Block key for the IV of `dataIntegrity/@encryptedHmacKey`.
pub const HMAC_KEY_BLOCK: [u8; 8] = [0x5F, 0xB2, 0xAD, 0x01, 0x0C, 0xB9, 0xE1, 0xF6];
/// Block key for the IV of `dataIntegrity/@encryptedHmacValue`.
pub const HMAC_VALUE_BLOCK: [u8; 8] = [0xA0, 0x67, 0x7F, 0x02, 0xB2, 0x2C, 0x84, 0x33];

/// Hash algorithms accepted in `EncryptionInfo` descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Parse a hash algorithm name as written in `EncryptionInfo` XML.
    ///
    /// Names are case-insensitive and tolerate `-`/`_` separators (`SHA512`, `sha-512`).
    pub fn parse_offcrypto_name(name: &str) -> Result<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace(['-', '_'], "");
        match normalized.as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(EncryptionError::UnsupportedAlgorithm {
                algorithm: name.to_string(),
            }),
        }
    }

    /// The canonical name written to `EncryptionInfo` XML.
    pub fn as_offcrypto_name(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha384 => "SHA384",
            Self::Sha512 => "SHA512",
        }
    }

    /// Digest output length in bytes (`hashSize`).
    pub fn digest_len(self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Hash the concatenation of `parts`.
    pub fn digest(self, parts: &[&[u8]]) -> Vec<u8> {
        fn run<D: digest::Digest>(parts: &[&[u8]]) -> Vec<u8> {
            let mut h = D::new();
            for part in parts {
                h.update(part);
            }
            h.finalize().to_vec()
        }

        match self {
            Self::Md5 => run::<md5::Md5>(parts),
            Self::Sha1 => run::<sha1::Sha1>(parts),
            Self::Sha256 => run::<sha2::Sha256>(parts),
            Self::Sha384 => run::<sha2::Sha384>(parts),
            Self::Sha512 => run::<sha2::Sha512>(parts),
        }
    }

    /// Hash `data` into `out`, which must be exactly [`Self::digest_len`] bytes.
    fn digest_into(self, data: &[u8], out: &mut [u8]) {
        match self {
            Self::Md5 => out.copy_from_slice(&md5::Md5::digest(data)),
            Self::Sha1 => out.copy_from_slice(&sha1::Sha1::digest(data)),
            Self::Sha256 => out.copy_from_slice(&sha2::Sha256::digest(data)),
            Self::Sha384 => out.copy_from_slice(&sha2::Sha384::digest(data)),
            Self::Sha512 => out.copy_from_slice(&sha2::Sha512::digest(data)),
        }
    }

    /// HMAC of `data` keyed with `key`.
    pub fn hmac(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        macro_rules! hmac_with {
            ($hash:ty) => {{
                let mut mac = Hmac::<$hash>::new_from_slice(key)
                    .map_err(|_| EncryptionError::InvalidKeyLength { len: key.len() })?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }};
        }

        Ok(match self {
            Self::Md5 => hmac_with!(md5::Md5),
            Self::Sha1 => hmac_with!(sha1::Sha1),
            Self::Sha256 => hmac_with!(sha2::Sha256),
            Self::Sha384 => hmac_with!(sha2::Sha384),
            Self::Sha512 => hmac_with!(sha2::Sha512),
        })
    }
}

/// Second input to [`derive_iv`]: a fixed block-key constant or an `EncryptedPackage` segment
/// index (encoded as `LE32(index)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKey {
    Fixed([u8; 8]),
    Segment(u32),
}

pub(crate) fn password_utf16le_bytes(password: &str) -> Zeroizing<Vec<u8>> {
    // UTF-16LE with no BOM and no terminator.
    let mut out = Zeroizing::new(Vec::with_capacity(password.len().saturating_mul(2)));
    for unit in password.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

fn fit_to_len(mut bytes: Vec<u8>, len: usize) -> Vec<u8> {
    if bytes.len() < len {
        bytes.resize(len, DERIVATION_PAD_BYTE);
    } else {
        bytes.truncate(len);
    }
    bytes
}

/// Compute the iterated password hash.
///
/// 1. `H = Hash(salt || UTF-16LE(password))`
/// 2. For `i in 0..spin_count`: `H = Hash(LE32(i) || H)`
pub fn hash_password(
    password: &str,
    salt: &[u8],
    spin_count: u32,
    hash_alg: HashAlgorithm,
) -> Zeroizing<Vec<u8>> {
    let pw = password_utf16le_bytes(password);
    let digest_len = hash_alg.digest_len();

    let mut h = Zeroizing::new(vec![0u8; digest_len]);
    let mut first = Zeroizing::new(Vec::with_capacity(salt.len() + pw.len()));
    first.extend_from_slice(salt);
    first.extend_from_slice(&pw);
    hash_alg.digest_into(&first, &mut h);

    // Reuse one buffer for `LE32(i) || H` across iterations.
    let mut round = Zeroizing::new(vec![0u8; 4 + digest_len]);
    for i in 0..spin_count {
        round[..4].copy_from_slice(&i.to_le_bytes());
        round[4..].copy_from_slice(&h);
        hash_alg.digest_into(&round, &mut h);
    }

    h
}

/// Derive a `key_len`-byte key from an iterated password hash: `Hash(H || blockKey)`.
pub fn derive_key_from_hash(
    password_hash: &[u8],
    block_key: &[u8],
    key_len: usize,
    hash_alg: HashAlgorithm,
) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(fit_to_len(
        hash_alg.digest(&[password_hash, block_key]),
        key_len,
    ))
}

/// Derive a key-encryptor key directly from a password.
///
/// Equivalent to [`hash_password`] followed by [`derive_key_from_hash`] with `key_bits / 8`.
pub fn derive_key(
    password: &str,
    hash_alg: HashAlgorithm,
    salt: &[u8],
    spin_count: u32,
    key_bits: u32,
    block_key: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if key_bits == 0 || key_bits % 8 != 0 {
        return Err(EncryptionError::InvalidOptions(format!(
            "keyBits must be a non-zero multiple of 8, got {key_bits}"
        )));
    }
    let h = hash_password(password, salt, spin_count, hash_alg);
    Ok(derive_key_from_hash(
        &h,
        block_key,
        (key_bits / 8) as usize,
        hash_alg,
    ))
}

/// Derive a `block_size`-byte IV: `Hash(salt || blockKey)`.
pub fn derive_iv(
    hash_alg: HashAlgorithm,
    salt: &[u8],
    block_size: usize,
    block_key: BlockKey,
) -> Vec<u8> {
    let segment;
    let block_key_bytes: &[u8] = match &block_key {
        BlockKey::Fixed(bytes) => bytes,
        BlockKey::Segment(index) => {
            segment = index.to_le_bytes();
            &segment
        }
    };
    fit_to_len(hash_alg.digest(&[salt, block_key_bytes]), block_size)
}
