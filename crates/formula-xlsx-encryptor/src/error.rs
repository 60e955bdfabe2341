use thiserror::Error;

use crate::aes_cbc::AesCbcError;

/// Result type for encryption/decryption operations.
pub type Result<T> = std::result::Result<T, EncryptionError>;

/// Errors returned while encrypting or decrypting a password-protected package.
///
/// Messages never include password bytes or key material.
#[derive(Debug, Error)]
pub enum EncryptionError {
    // --- Algorithm capability ------------------------------------------------------------------
    #[error("unsupported hash algorithm `{algorithm}`")]
    UnsupportedAlgorithm { algorithm: String },

    #[error("unsupported cipher chaining mode `{chaining}`; only `ChainingModeCBC` is supported")]
    UnsupportedChaining { chaining: String },

    #[error("unsupported cipher algorithm `{cipher}`; only `AES` is supported")]
    UnsupportedCipherAlgorithm { cipher: String },

    #[error("invalid AES block size {block_size} bytes (expected 16)")]
    InvalidBlockSize { block_size: usize },

    #[error("invalid AES key length {len} bytes (expected 16, 24, or 32)")]
    InvalidKeyLength { len: usize },

    #[error("invalid encryption options: {0}")]
    InvalidOptions(String),

    // --- EncryptionInfo ------------------------------------------------------------------------
    #[error("malformed EncryptionInfo: {reason}")]
    MalformedEncryptionInfo { reason: String },

    #[error("EncryptionInfo spinCount {spin_count} exceeds maximum allowed {max}")]
    SpinCountTooLarge { spin_count: u32, max: u32 },

    #[error("failed to write EncryptionInfo XML: {0}")]
    XmlWrite(String),

    // --- EncryptedPackage ----------------------------------------------------------------------
    #[error("EncryptedPackage stream is too short ({len} bytes)")]
    EncryptedPackageTooShort { len: usize },

    #[error("{field} ciphertext length {len} is not a multiple of the cipher block size")]
    CiphertextNotBlockAligned { field: &'static str, len: usize },

    #[error(
        "decrypted EncryptedPackage is truncated: header declares {declared_len} bytes but only {available_len} bytes are available"
    )]
    DecryptedLengthShorterThanHeader {
        declared_len: usize,
        available_len: usize,
    },

    // --- Opt-in verification -------------------------------------------------------------------
    #[error("wrong password (verifier mismatch)")]
    WrongPassword,

    #[error("EncryptedPackage integrity check failed (HMAC mismatch)")]
    IntegrityMismatch,

    // --- Container collaborator ----------------------------------------------------------------
    #[error("container is missing required entry `{name}`")]
    MissingContainerEntry { name: String },

    #[error("container I/O error while {context}: {source}")]
    Container {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("background decryption task failed: {0}")]
    Task(String),
}

impl EncryptionError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEncryptionInfo {
            reason: reason.into(),
        }
    }
}

impl From<AesCbcError> for EncryptionError {
    fn from(source: AesCbcError) -> Self {
        match source {
            AesCbcError::UnsupportedKeyLength(len) => Self::InvalidKeyLength { len },
            AesCbcError::InvalidIvLength(len) => Self::InvalidBlockSize { block_size: len },
            AesCbcError::InvalidDataLength(len) => Self::CiphertextNotBlockAligned {
                field: "ciphertext",
                len,
            },
        }
    }
}

impl From<roxmltree::Error> for EncryptionError {
    fn from(source: roxmltree::Error) -> Self {
        Self::malformed(format!("XML parse error: {source}"))
    }
}

impl From<std::str::Utf8Error> for EncryptionError {
    fn from(source: std::str::Utf8Error) -> Self {
        Self::malformed(format!("XML is not valid UTF-8: {source}"))
    }
}
