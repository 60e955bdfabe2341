//! Password verifier and `dataIntegrity` HMAC fields.
//!
//! Both are produced on every encryption. Reading them back is opt-in: by default decryption
//! trusts the password and never touches these fields.
//!
//! Digests whose length is not a multiple of the block size (SHA-1, SHA-384 with some block sizes)
//! are zero-padded before encryption, so decrypted values are compared on their `hashSize` prefix.

use subtle::ConstantTimeEq as _;
use zeroize::Zeroizing;

use crate::aes_cbc::{decrypt_blob, encrypt_padded_to_block};
use crate::crypto::{
    derive_iv, derive_key_from_hash, BlockKey, HashAlgorithm, HMAC_KEY_BLOCK, HMAC_VALUE_BLOCK,
    VERIFIER_HASH_INPUT_BLOCK, VERIFIER_HASH_VALUE_BLOCK,
};
use crate::encryption_info::{DataIntegrity, KeyData, PasswordKeyEncryptor};
use crate::error::{EncryptionError, Result};

/// Length of the random verifier input.
pub const VERIFIER_HASH_INPUT_LEN: usize = 16;

/// Length of the random HMAC key, independent of the hash algorithm.
pub const HMAC_KEY_LEN: usize = 64;

/// The two encrypted verifier blobs stored on the password key encryptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordVerifier {
    pub encrypted_verifier_hash_input: Vec<u8>,
    pub encrypted_verifier_hash_value: Vec<u8>,
}

/// Encrypt `verifier_input` and `Hash(verifier_input)` with keys derived from the iterated
/// password hash. The key-encryptor salt is the IV for both.
pub fn generate_password_verifier(
    password_hash: &[u8],
    hash_algorithm: HashAlgorithm,
    key_bits: u32,
    block_size: usize,
    salt: &[u8],
    verifier_input: &[u8],
) -> Result<PasswordVerifier> {
    let key_len = (key_bits / 8) as usize;

    let input_key =
        derive_key_from_hash(password_hash, &VERIFIER_HASH_INPUT_BLOCK, key_len, hash_algorithm);
    let encrypted_verifier_hash_input =
        encrypt_padded_to_block(&input_key, salt, verifier_input, block_size)?;

    let verifier_hash = hash_algorithm.digest(&[verifier_input]);
    let value_key =
        derive_key_from_hash(password_hash, &VERIFIER_HASH_VALUE_BLOCK, key_len, hash_algorithm);
    let encrypted_verifier_hash_value =
        encrypt_padded_to_block(&value_key, salt, &verifier_hash, block_size)?;

    Ok(PasswordVerifier {
        encrypted_verifier_hash_input,
        encrypted_verifier_hash_value,
    })
}

/// Encrypt `hmac_key` and `HMAC(hmac_key, encrypted_package)` with the package key.
///
/// `encrypted_package` is the whole `EncryptedPackage` stream, size header included.
pub fn generate_data_integrity(
    package_key: &[u8],
    package: &KeyData,
    hmac_key: &[u8],
    encrypted_package: &[u8],
) -> Result<DataIntegrity> {
    let block_size = package.block_size as usize;

    let key_iv = derive_iv(
        package.hash_algorithm,
        &package.salt_value,
        block_size,
        BlockKey::Fixed(HMAC_KEY_BLOCK),
    );
    let encrypted_hmac_key = encrypt_padded_to_block(package_key, &key_iv, hmac_key, block_size)?;

    let hmac_value = package.hash_algorithm.hmac(hmac_key, encrypted_package)?;
    let value_iv = derive_iv(
        package.hash_algorithm,
        &package.salt_value,
        block_size,
        BlockKey::Fixed(HMAC_VALUE_BLOCK),
    );
    let encrypted_hmac_value =
        encrypt_padded_to_block(package_key, &value_iv, &hmac_value, block_size)?;

    Ok(DataIntegrity {
        encrypted_hmac_key,
        encrypted_hmac_value,
    })
}

fn digest_prefix<'a>(bytes: &'a [u8], len: usize, field: &'static str) -> Result<&'a [u8]> {
    bytes.get(..len).ok_or_else(|| {
        EncryptionError::malformed(format!(
            "{field} decrypts to {} bytes, shorter than hashSize {len}",
            bytes.len()
        ))
    })
}

/// Check a candidate password against the stored verifier.
pub fn verify_password(password_hash: &[u8], key: &PasswordKeyEncryptor) -> Result<()> {
    let key_len = (key.key_bits / 8) as usize;
    let hash_len = key.hash_size as usize;

    let input_key = derive_key_from_hash(
        password_hash,
        &VERIFIER_HASH_INPUT_BLOCK,
        key_len,
        key.hash_algorithm,
    );
    let verifier_input = Zeroizing::new(decrypt_blob(
        &input_key,
        &key.salt_value,
        &key.encrypted_verifier_hash_input,
    )?);
    let verifier_input = &verifier_input[..VERIFIER_HASH_INPUT_LEN.min(verifier_input.len())];

    let value_key = derive_key_from_hash(
        password_hash,
        &VERIFIER_HASH_VALUE_BLOCK,
        key_len,
        key.hash_algorithm,
    );
    let expected = decrypt_blob(&value_key, &key.salt_value, &key.encrypted_verifier_hash_value)?;
    let expected = digest_prefix(&expected, hash_len, "encryptedVerifierHashValue")?;

    let actual = key.hash_algorithm.digest(&[verifier_input]);
    if bool::from(actual.as_slice().ct_eq(expected)) {
        Ok(())
    } else {
        Err(EncryptionError::WrongPassword)
    }
}

/// Check the `dataIntegrity` HMAC over the raw `EncryptedPackage` stream.
pub fn verify_integrity(
    package_key: &[u8],
    package: &KeyData,
    data_integrity: &DataIntegrity,
    encrypted_package: &[u8],
) -> Result<()> {
    let block_size = package.block_size as usize;
    let hash_len = package.hash_size as usize;

    let key_iv = derive_iv(
        package.hash_algorithm,
        &package.salt_value,
        block_size,
        BlockKey::Fixed(HMAC_KEY_BLOCK),
    );
    let hmac_key = Zeroizing::new(decrypt_blob(
        package_key,
        &key_iv,
        &data_integrity.encrypted_hmac_key,
    )?);
    if hmac_key.is_empty() {
        return Err(EncryptionError::malformed("encryptedHmacKey is empty"));
    }

    let value_iv = derive_iv(
        package.hash_algorithm,
        &package.salt_value,
        block_size,
        BlockKey::Fixed(HMAC_VALUE_BLOCK),
    );
    let expected = decrypt_blob(package_key, &value_iv, &data_integrity.encrypted_hmac_value)?;
    let expected = digest_prefix(&expected, hash_len, "encryptedHmacValue")?;

    // Other producers write a `hashSize` key that is zero-padded to the block size. Keys
    // written here are `HMAC_KEY_LEN` bytes and used whole.
    let prefix = &hmac_key[..hash_len.min(hmac_key.len())];
    let mut matched = hmac_matches(package.hash_algorithm, prefix, encrypted_package, expected)?;
    if prefix.len() < hmac_key.len() {
        matched |= hmac_matches(package.hash_algorithm, &hmac_key, encrypted_package, expected)?;
    }
    if matched {
        Ok(())
    } else {
        Err(EncryptionError::IntegrityMismatch)
    }
}

fn hmac_matches(
    hash_algorithm: HashAlgorithm,
    hmac_key: &[u8],
    encrypted_package: &[u8],
    expected: &[u8],
) -> Result<bool> {
    let actual = hash_algorithm.hmac(hmac_key, encrypted_package)?;
    Ok(bool::from(actual.as_slice().ct_eq(expected)))
}
