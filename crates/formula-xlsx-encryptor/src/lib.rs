//! Password-based encryption of spreadsheet packages using MS-OFFCRYPTO Agile encryption.
//!
//! [`encrypt`] turns raw document bytes (typically an OOXML ZIP) into an OLE/CFB container with
//! two streams:
//! - `EncryptionInfo`: version prefix + XML descriptor (algorithms, salts, wrapped keys)
//! - `EncryptedPackage`: 8-byte size header + AES-CBC ciphertext in 4096-byte segments
//!
//! [`decrypt`] / [`decrypt_async`] reverse the process. By default the read path does not check
//! the password verifier or the integrity HMAC, so a wrong password yields garbage bytes rather
//! than an error. Set [`DecryptOptions::verify_password`] / [`DecryptOptions::verify_integrity`]
//! to opt in to those checks.

pub mod aes_cbc;
pub mod container;
pub mod crypto;
pub mod encryption_info;
mod error;
pub mod integrity;
pub mod package;
pub mod random;

#[cfg(test)]
mod fuzz_tests;

use zeroize::Zeroizing;

pub use crate::aes_cbc::{CipherAlgorithm, CipherChaining};
pub use crate::container::{is_encrypted_container, CfbContainer, CompoundContainer};
pub use crate::crypto::HashAlgorithm;
pub use crate::encryption_info::{
    decode_encryption_info, encode_encryption_info, DataIntegrity, EncryptionParameters, KeyData,
    PasswordKeyEncryptor,
};
pub use crate::error::{EncryptionError, Result};
pub use crate::random::{OsRandom, RandomSource};

use crate::aes_cbc::{decrypt_blob, encrypt_padded_to_block, AES_BLOCK_SIZE};
use crate::container::{ENCRYPTED_PACKAGE_STREAM, ENCRYPTION_INFO_STREAM, PLACEHOLDER_ENTRY};
use crate::crypto::{derive_key_from_hash, hash_password, KEY_VALUE_BLOCK};
use crate::integrity::{HMAC_KEY_LEN, VERIFIER_HASH_INPUT_LEN};
use crate::package::crypt_package;
use crate::random::random_vec;

/// Upper bound on `spinCount`, both when writing and (by default) when reading.
pub const MAX_SPIN_COUNT: u32 = 10_000_000;
/// `spinCount` used by [`EncryptOptions::default`], matching Excel.
pub const DEFAULT_SPIN_COUNT: u32 = 100_000;

/// Parameters for a new encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptOptions {
    pub hash_algorithm: HashAlgorithm,
    /// AES key size for both the package key and the key-encryptor key.
    pub key_bits: u32,
    pub spin_count: u32,
    pub block_size: usize,
    pub salt_size: usize,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            hash_algorithm: HashAlgorithm::Sha512,
            key_bits: 256,
            spin_count: DEFAULT_SPIN_COUNT,
            block_size: AES_BLOCK_SIZE,
            salt_size: 16,
        }
    }
}

impl EncryptOptions {
    pub fn validate(&self) -> Result<()> {
        if self.spin_count > MAX_SPIN_COUNT {
            return Err(EncryptionError::InvalidOptions(format!(
                "spin_count {} exceeds maximum {MAX_SPIN_COUNT}",
                self.spin_count
            )));
        }
        if !matches!(self.key_bits, 128 | 192 | 256) {
            return Err(EncryptionError::InvalidOptions(format!(
                "key_bits must be 128, 192 or 256, got {}",
                self.key_bits
            )));
        }
        if self.block_size != AES_BLOCK_SIZE {
            return Err(EncryptionError::InvalidOptions(format!(
                "block_size must be {AES_BLOCK_SIZE} for AES, got {}",
                self.block_size
            )));
        }
        // The key-encryptor salt doubles as the AES IV.
        if self.salt_size != self.block_size {
            return Err(EncryptionError::InvalidOptions(format!(
                "salt_size must equal block_size ({}), got {}",
                self.block_size, self.salt_size
            )));
        }
        Ok(())
    }

    fn key_len(&self) -> usize {
        (self.key_bits / 8) as usize
    }
}

/// Read-side settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptOptions {
    /// `spinCount` values above this are rejected before any hashing.
    pub max_spin_count: u32,
    /// Check the password verifier and fail with [`EncryptionError::WrongPassword`].
    pub verify_password: bool,
    /// Check the `dataIntegrity` HMAC and fail with [`EncryptionError::IntegrityMismatch`].
    pub verify_integrity: bool,
}

impl Default for DecryptOptions {
    fn default() -> Self {
        Self {
            max_spin_count: MAX_SPIN_COUNT,
            verify_password: false,
            verify_integrity: false,
        }
    }
}

/// The two stream payloads making up an encrypted document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedStreams {
    pub encryption_info: Vec<u8>,
    pub encrypted_package: Vec<u8>,
}

/// Encrypt `document` with `password` using default parameters and OS randomness.
///
/// Returns the serialized OLE/CFB container.
pub fn encrypt(document: &[u8], password: &str) -> Result<Vec<u8>> {
    encrypt_with(document, password, &EncryptOptions::default(), &mut OsRandom)
}

/// Encrypt with explicit parameters and random source.
pub fn encrypt_with(
    document: &[u8],
    password: &str,
    opts: &EncryptOptions,
    rng: &mut dyn RandomSource,
) -> Result<Vec<u8>> {
    encrypt_into_container::<CfbContainer>(document, password, opts, rng)
}

/// Encrypt and write the streams into a fresh container of type `C`.
pub fn encrypt_into_container<C: CompoundContainer>(
    document: &[u8],
    password: &str,
    opts: &EncryptOptions,
    rng: &mut dyn RandomSource,
) -> Result<Vec<u8>> {
    let streams = encrypt_to_streams(document, password, opts, rng)?;

    let mut container = C::create()?;
    container.add_stream(ENCRYPTION_INFO_STREAM, &streams.encryption_info)?;
    container.add_stream(ENCRYPTED_PACKAGE_STREAM, &streams.encrypted_package)?;
    container.remove_entry(PLACEHOLDER_ENTRY)?;
    container.serialize()
}

/// Encrypt `document` and return the raw `EncryptionInfo` / `EncryptedPackage` payloads.
///
/// Random bytes are drawn from `rng` in a fixed order: package key, package salt, key-encryptor
/// salt, HMAC key, verifier input.
pub fn encrypt_to_streams(
    document: &[u8],
    password: &str,
    opts: &EncryptOptions,
    rng: &mut dyn RandomSource,
) -> Result<EncryptedStreams> {
    opts.validate()?;
    let hash_algorithm = opts.hash_algorithm;
    let hash_size = hash_algorithm.digest_len();
    log::debug!(
        "encrypting {} byte package: hash={} key_bits={} spin_count={}",
        document.len(),
        hash_algorithm.as_offcrypto_name(),
        opts.key_bits,
        opts.spin_count
    );

    let package_key = Zeroizing::new(random_vec(rng, opts.key_len()));
    let package = KeyData {
        cipher_algorithm: CipherAlgorithm::Aes,
        cipher_chaining: CipherChaining::Cbc,
        salt_value: random_vec(rng, opts.salt_size),
        hash_algorithm,
        hash_size: hash_size as u32,
        block_size: opts.block_size as u32,
        key_bits: opts.key_bits,
    };
    let key_salt = random_vec(rng, opts.salt_size);

    let encrypted_package = crypt_package(
        true,
        package.cipher_algorithm,
        package.cipher_chaining,
        hash_algorithm,
        opts.block_size,
        &package.salt_value,
        &package_key,
        document,
    )?;

    let hmac_key = Zeroizing::new(random_vec(rng, HMAC_KEY_LEN));
    let data_integrity =
        integrity::generate_data_integrity(&package_key, &package, &hmac_key, &encrypted_package)?;

    let password_hash = hash_password(password, &key_salt, opts.spin_count, hash_algorithm);
    let key_value_key =
        derive_key_from_hash(&password_hash, &KEY_VALUE_BLOCK, opts.key_len(), hash_algorithm);
    let encrypted_key_value =
        encrypt_padded_to_block(&key_value_key, &key_salt, &package_key, opts.block_size)?;

    let verifier_input = Zeroizing::new(random_vec(rng, VERIFIER_HASH_INPUT_LEN));
    let verifier = integrity::generate_password_verifier(
        &password_hash,
        hash_algorithm,
        opts.key_bits,
        opts.block_size,
        &key_salt,
        &verifier_input,
    )?;

    let params = EncryptionParameters {
        package,
        key: PasswordKeyEncryptor {
            cipher_algorithm: CipherAlgorithm::Aes,
            cipher_chaining: CipherChaining::Cbc,
            salt_value: key_salt,
            hash_algorithm,
            hash_size: hash_size as u32,
            block_size: opts.block_size as u32,
            spin_count: opts.spin_count,
            key_bits: opts.key_bits,
            encrypted_key_value,
            encrypted_verifier_hash_input: verifier.encrypted_verifier_hash_input,
            encrypted_verifier_hash_value: verifier.encrypted_verifier_hash_value,
        },
        data_integrity: Some(data_integrity),
    };
    let encryption_info = encode_encryption_info(&params)?;

    log::debug!(
        "encrypted package: EncryptionInfo={} bytes EncryptedPackage={} bytes",
        encryption_info.len(),
        encrypted_package.len()
    );
    Ok(EncryptedStreams {
        encryption_info,
        encrypted_package,
    })
}

/// Decrypt a container produced by [`encrypt`] (or any Agile-encrypted OOXML file).
pub fn decrypt(container_bytes: &[u8], password: &str) -> Result<Vec<u8>> {
    decrypt_with_options(container_bytes, password, &DecryptOptions::default())
}

/// [`decrypt`] with explicit read-side settings.
pub fn decrypt_with_options(
    container_bytes: &[u8],
    password: &str,
    opts: &DecryptOptions,
) -> Result<Vec<u8>> {
    let mut container = CfbContainer::parse(container_bytes)?;
    decrypt_container(&mut container, password, opts)
}

/// Decrypt the encryption streams held by an already-parsed container.
pub fn decrypt_container<C: CompoundContainer>(
    container: &mut C,
    password: &str,
    opts: &DecryptOptions,
) -> Result<Vec<u8>> {
    let encryption_info = container.stream(ENCRYPTION_INFO_STREAM)?;
    let encrypted_package = container.stream(ENCRYPTED_PACKAGE_STREAM)?;
    decrypt_streams(&encryption_info, &encrypted_package, password, opts)
}

/// Decrypt raw `EncryptionInfo` / `EncryptedPackage` payloads.
pub fn decrypt_streams(
    encryption_info: &[u8],
    encrypted_package: &[u8],
    password: &str,
    opts: &DecryptOptions,
) -> Result<Vec<u8>> {
    let params = decode_encryption_info(encryption_info)?;
    let key = &params.key;
    let package = &params.package;

    if key.spin_count > opts.max_spin_count {
        return Err(EncryptionError::SpinCountTooLarge {
            spin_count: key.spin_count,
            max: opts.max_spin_count,
        });
    }
    key.cipher_chaining.require_cbc()?;
    package.cipher_chaining.require_cbc()?;
    log::debug!(
        "decrypting {} byte EncryptedPackage: hash={} key_bits={} spin_count={}",
        encrypted_package.len(),
        key.hash_algorithm.as_offcrypto_name(),
        key.key_bits,
        key.spin_count
    );

    let password_hash = hash_password(
        password,
        &key.salt_value,
        key.spin_count,
        key.hash_algorithm,
    );
    if opts.verify_password {
        integrity::verify_password(&password_hash, key)?;
    }

    let key_value_key = derive_key_from_hash(
        &password_hash,
        &KEY_VALUE_BLOCK,
        (key.key_bits / 8) as usize,
        key.hash_algorithm,
    );
    let mut package_key = Zeroizing::new(decrypt_blob(
        &key_value_key,
        &key.salt_value,
        &key.encrypted_key_value,
    )?);
    let package_key_len = (package.key_bits / 8) as usize;
    if package_key.len() < package_key_len {
        return Err(EncryptionError::malformed(format!(
            "encryptedKeyValue decrypts to {} bytes, shorter than keyData keyBits {}",
            package_key.len(),
            package.key_bits
        )));
    }
    package_key.truncate(package_key_len);

    if opts.verify_integrity {
        let data_integrity = params
            .data_integrity
            .as_ref()
            .ok_or_else(|| EncryptionError::malformed("missing <dataIntegrity> element"))?;
        integrity::verify_integrity(&package_key, package, data_integrity, encrypted_package)?;
    }

    crypt_package(
        false,
        package.cipher_algorithm,
        package.cipher_chaining,
        package.hash_algorithm,
        package.block_size as usize,
        &package.salt_value,
        &package_key,
        encrypted_package,
    )
}

/// Async [`decrypt`]. The CPU-bound work runs on Tokio's blocking pool, so this must be awaited
/// from within a Tokio runtime.
pub async fn decrypt_async(container_bytes: &[u8], password: &str) -> Result<Vec<u8>> {
    decrypt_async_with_options(container_bytes, password, DecryptOptions::default()).await
}

/// [`decrypt_async`] with explicit read-side settings.
pub async fn decrypt_async_with_options(
    container_bytes: &[u8],
    password: &str,
    opts: DecryptOptions,
) -> Result<Vec<u8>> {
    let bytes = container_bytes.to_vec();
    let password = Zeroizing::new(password.to_string());
    tokio::task::spawn_blocking(move || decrypt_with_options(&bytes, &password, &opts))
        .await
        .map_err(|err| EncryptionError::Task(err.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fast parameters for unit tests.
    fn fast_opts() -> EncryptOptions {
        EncryptOptions {
            spin_count: 10,
            ..EncryptOptions::default()
        }
    }

    #[test]
    fn default_options_match_excel() {
        let opts = EncryptOptions::default();
        assert_eq!(opts.hash_algorithm, HashAlgorithm::Sha512);
        assert_eq!(opts.key_bits, 256);
        assert_eq!(opts.spin_count, 100_000);
        assert_eq!(opts.block_size, 16);
        assert_eq!(opts.salt_size, 16);
        opts.validate().expect("defaults are valid");
    }

    #[test]
    fn options_validation_rejects_out_of_range_values() {
        let bad = [
            EncryptOptions {
                spin_count: MAX_SPIN_COUNT + 1,
                ..fast_opts()
            },
            EncryptOptions {
                key_bits: 512,
                ..fast_opts()
            },
            EncryptOptions {
                block_size: 8,
                ..fast_opts()
            },
            EncryptOptions {
                salt_size: 32,
                ..fast_opts()
            },
        ];
        for opts in bad {
            assert!(
                matches!(opts.validate(), Err(EncryptionError::InvalidOptions(_))),
                "{opts:?}"
            );
        }
    }

    #[test]
    fn invalid_options_draw_no_randomness() {
        struct Panicking;
        impl RandomSource for Panicking {
            fn fill_bytes(&mut self, _dest: &mut [u8]) {
                panic!("randomness drawn before validation");
            }
        }
        let opts = EncryptOptions {
            key_bits: 100,
            ..fast_opts()
        };
        assert!(encrypt_to_streams(b"doc", "pw", &opts, &mut Panicking).is_err());
    }

    #[test]
    fn streams_round_trip_for_every_hash_algorithm() {
        for hash_algorithm in [
            HashAlgorithm::Md5,
            HashAlgorithm::Sha1,
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
        ] {
            for key_bits in [128, 192, 256] {
                let opts = EncryptOptions {
                    hash_algorithm,
                    key_bits,
                    ..fast_opts()
                };
                let streams =
                    encrypt_to_streams(b"PK\x03\x04payload", "pw", &opts, &mut OsRandom).unwrap();
                let verified = DecryptOptions {
                    verify_password: true,
                    verify_integrity: true,
                    ..DecryptOptions::default()
                };
                let out = decrypt_streams(
                    &streams.encryption_info,
                    &streams.encrypted_package,
                    "pw",
                    &verified,
                )
                .unwrap();
                assert_eq!(out, b"PK\x03\x04payload", "{hash_algorithm:?}/{key_bits}");
            }
        }
    }

    #[test]
    fn spin_count_limit_is_enforced_before_hashing() {
        let streams = encrypt_to_streams(b"doc", "pw", &fast_opts(), &mut OsRandom).unwrap();
        let opts = DecryptOptions {
            max_spin_count: 5,
            ..DecryptOptions::default()
        };
        let err = decrypt_streams(
            &streams.encryption_info,
            &streams.encrypted_package,
            "pw",
            &opts,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EncryptionError::SpinCountTooLarge {
                spin_count: 10,
                max: 5
            }
        ));
    }

    #[test]
    fn hmac_key_is_64_bytes_with_sha256() {
        use crate::crypto::{derive_iv, BlockKey, HMAC_KEY_BLOCK};

        let opts = EncryptOptions {
            hash_algorithm: HashAlgorithm::Sha256,
            key_bits: 128,
            ..fast_opts()
        };
        let streams = encrypt_to_streams(b"doc", "pw", &opts, &mut OsRandom).unwrap();
        let params = decode_encryption_info(&streams.encryption_info).unwrap();
        let key = &params.key;

        let password_hash =
            hash_password("pw", &key.salt_value, key.spin_count, key.hash_algorithm);
        let key_value_key =
            derive_key_from_hash(&password_hash, &KEY_VALUE_BLOCK, 16, key.hash_algorithm);
        let package_key =
            decrypt_blob(&key_value_key, &key.salt_value, &key.encrypted_key_value).unwrap();

        let iv = derive_iv(
            HashAlgorithm::Sha256,
            &params.package.salt_value,
            16,
            BlockKey::Fixed(HMAC_KEY_BLOCK),
        );
        let di = params.data_integrity.as_ref().unwrap();
        let hmac_key = decrypt_blob(&package_key[..16], &iv, &di.encrypted_hmac_key).unwrap();
        assert_eq!(hmac_key.len(), 64);
    }

    #[test]
    fn oversized_key_bits_fail_before_key_derivation() {
        let streams = encrypt_to_streams(b"doc", "pw", &fast_opts(), &mut OsRandom).unwrap();
        let xml = std::str::from_utf8(&streams.encryption_info[8..]).unwrap();
        let patched = xml.replace("keyBits=\"256\"", "keyBits=\"4294967288\"");
        let mut info = streams.encryption_info[..8].to_vec();
        info.extend_from_slice(patched.as_bytes());

        let err = decrypt_streams(
            &info,
            &streams.encrypted_package,
            "pw",
            &DecryptOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EncryptionError::MalformedEncryptionInfo { .. }));
    }

    #[test]
    fn verify_integrity_requires_data_integrity_element() {
        let streams = encrypt_to_streams(b"doc", "pw", &fast_opts(), &mut OsRandom).unwrap();
        let mut params = decode_encryption_info(&streams.encryption_info).unwrap();
        params.data_integrity = None;
        let info = encode_encryption_info(&params).unwrap();

        // Without verification the descriptor is still usable.
        let plain = decrypt_streams(
            &info,
            &streams.encrypted_package,
            "pw",
            &DecryptOptions::default(),
        )
        .unwrap();
        assert_eq!(plain, b"doc");

        let opts = DecryptOptions {
            verify_integrity: true,
            ..DecryptOptions::default()
        };
        assert!(matches!(
            decrypt_streams(&info, &streams.encrypted_package, "pw", &opts),
            Err(EncryptionError::MalformedEncryptionInfo { .. })
        ));
    }
}
