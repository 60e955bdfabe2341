//! The Agile `EncryptionInfo` stream: parameter model and codec.
//!
//! Layout:
//! - bytes 0..8: `EncryptionVersionInfo` (`versionMajor=4`, `versionMinor=4`, flags `0x40`)
//! - bytes 8..: UTF-8 XML
//!
//! ```xml
//! <encryption xmlns="…/2006/encryption" xmlns:p="…/keyEncryptor/password" xmlns:c="…/keyEncryptor/certificate">
//!   <keyData saltSize blockSize keyBits hashSize cipherAlgorithm cipherChaining hashAlgorithm saltValue/>
//!   <dataIntegrity encryptedHmacKey encryptedHmacValue/>
//!   <keyEncryptors>
//!     <keyEncryptor uri="…/keyEncryptor/password">
//!       <p:encryptedKey spinCount saltSize … encryptedKeyValue/>
//!     </keyEncryptor>
//!   </keyEncryptors>
//! </encryption>
//! ```

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;

use crate::aes_cbc::{CipherAlgorithm, CipherChaining};
use crate::crypto::HashAlgorithm;
use crate::error::{EncryptionError, Result};

/// `EncryptionVersionInfo` written before the XML: 4.4 (Agile), flags `0x40`.
pub const ENCRYPTION_INFO_PREFIX: [u8; 8] = [0x04, 0x00, 0x04, 0x00, 0x40, 0x00, 0x00, 0x00];

pub const ENCRYPTION_NS: &str = "http://schemas.microsoft.com/office/2006/encryption";
pub const KEY_ENCRYPTOR_URI_PASSWORD: &str =
    "http://schemas.microsoft.com/office/2006/keyEncryptor/password";
pub const KEY_ENCRYPTOR_URI_CERTIFICATE: &str =
    "http://schemas.microsoft.com/office/2006/keyEncryptor/certificate";

const XML_DECLARATION_TERMINATOR: &[u8] = b"\r\n";

/// `<keyData>`: parameters of the package cipher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyData {
    pub cipher_algorithm: CipherAlgorithm,
    pub cipher_chaining: CipherChaining,
    pub salt_value: Vec<u8>,
    pub hash_algorithm: HashAlgorithm,
    pub hash_size: u32,
    pub block_size: u32,
    pub key_bits: u32,
}

/// `<p:encryptedKey>`: the password key encryptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordKeyEncryptor {
    pub cipher_algorithm: CipherAlgorithm,
    pub cipher_chaining: CipherChaining,
    pub salt_value: Vec<u8>,
    pub hash_algorithm: HashAlgorithm,
    pub hash_size: u32,
    pub block_size: u32,
    pub spin_count: u32,
    pub key_bits: u32,
    pub encrypted_key_value: Vec<u8>,
    pub encrypted_verifier_hash_input: Vec<u8>,
    pub encrypted_verifier_hash_value: Vec<u8>,
}

/// `<dataIntegrity>`: HMAC key and value, both encrypted with the package key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataIntegrity {
    pub encrypted_hmac_key: Vec<u8>,
    pub encrypted_hmac_value: Vec<u8>,
}

/// All cryptographic parameters carried by an `EncryptionInfo` stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionParameters {
    pub package: KeyData,
    pub key: PasswordKeyEncryptor,
    /// Absent until the package ciphertext exists; optional on read.
    pub data_integrity: Option<DataIntegrity>,
}

// --- Encoding ------------------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn push_common_attrs(
    elem: &mut BytesStart<'_>,
    salt_value: &[u8],
    block_size: u32,
    key_bits: u32,
    hash_size: u32,
    cipher_algorithm: CipherAlgorithm,
    cipher_chaining: CipherChaining,
    hash_algorithm: HashAlgorithm,
) {
    elem.push_attribute(("saltSize", salt_value.len().to_string().as_str()));
    elem.push_attribute(("blockSize", block_size.to_string().as_str()));
    elem.push_attribute(("keyBits", key_bits.to_string().as_str()));
    elem.push_attribute(("hashSize", hash_size.to_string().as_str()));
    elem.push_attribute(("cipherAlgorithm", cipher_algorithm.as_offcrypto_name()));
    elem.push_attribute(("cipherChaining", cipher_chaining.as_offcrypto_name()));
    elem.push_attribute(("hashAlgorithm", hash_algorithm.as_offcrypto_name()));
    elem.push_attribute(("saltValue", STANDARD.encode(salt_value).as_str()));
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|err| EncryptionError::XmlWrite(err.to_string()))
}

/// Serialize `params` into an `EncryptionInfo` stream.
pub fn encode_encryption_info(params: &EncryptionParameters) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    write_event(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))),
    )?;
    writer.get_mut().extend_from_slice(XML_DECLARATION_TERMINATOR);

    let mut root = BytesStart::new("encryption");
    root.push_attribute(("xmlns", ENCRYPTION_NS));
    root.push_attribute(("xmlns:p", KEY_ENCRYPTOR_URI_PASSWORD));
    root.push_attribute(("xmlns:c", KEY_ENCRYPTOR_URI_CERTIFICATE));
    write_event(&mut writer, Event::Start(root))?;

    let package = &params.package;
    let mut key_data = BytesStart::new("keyData");
    push_common_attrs(
        &mut key_data,
        &package.salt_value,
        package.block_size,
        package.key_bits,
        package.hash_size,
        package.cipher_algorithm,
        package.cipher_chaining,
        package.hash_algorithm,
    );
    write_event(&mut writer, Event::Empty(key_data))?;

    if let Some(data_integrity) = &params.data_integrity {
        let mut elem = BytesStart::new("dataIntegrity");
        elem.push_attribute((
            "encryptedHmacKey",
            STANDARD.encode(&data_integrity.encrypted_hmac_key).as_str(),
        ));
        elem.push_attribute((
            "encryptedHmacValue",
            STANDARD.encode(&data_integrity.encrypted_hmac_value).as_str(),
        ));
        write_event(&mut writer, Event::Empty(elem))?;
    }

    write_event(&mut writer, Event::Start(BytesStart::new("keyEncryptors")))?;
    let mut key_encryptor = BytesStart::new("keyEncryptor");
    key_encryptor.push_attribute(("uri", KEY_ENCRYPTOR_URI_PASSWORD));
    write_event(&mut writer, Event::Start(key_encryptor))?;

    let key = &params.key;
    let mut encrypted_key = BytesStart::new("p:encryptedKey");
    encrypted_key.push_attribute(("spinCount", key.spin_count.to_string().as_str()));
    push_common_attrs(
        &mut encrypted_key,
        &key.salt_value,
        key.block_size,
        key.key_bits,
        key.hash_size,
        key.cipher_algorithm,
        key.cipher_chaining,
        key.hash_algorithm,
    );
    encrypted_key.push_attribute((
        "encryptedVerifierHashInput",
        STANDARD.encode(&key.encrypted_verifier_hash_input).as_str(),
    ));
    encrypted_key.push_attribute((
        "encryptedVerifierHashValue",
        STANDARD.encode(&key.encrypted_verifier_hash_value).as_str(),
    ));
    encrypted_key.push_attribute((
        "encryptedKeyValue",
        STANDARD.encode(&key.encrypted_key_value).as_str(),
    ));
    write_event(&mut writer, Event::Empty(encrypted_key))?;

    write_event(&mut writer, Event::End(BytesEnd::new("keyEncryptor")))?;
    write_event(&mut writer, Event::End(BytesEnd::new("keyEncryptors")))?;
    write_event(&mut writer, Event::End(BytesEnd::new("encryption")))?;

    let xml = writer.into_inner();
    let mut out = Vec::with_capacity(ENCRYPTION_INFO_PREFIX.len() + xml.len());
    out.extend_from_slice(&ENCRYPTION_INFO_PREFIX);
    out.extend_from_slice(&xml);
    Ok(out)
}

// --- Decoding ------------------------------------------------------------------------------------

fn required_attr<'a>(node: roxmltree::Node<'a, 'a>, element: &str, attr: &str) -> Result<&'a str> {
    node.attribute(attr).ok_or_else(|| {
        EncryptionError::malformed(format!("missing attribute `{attr}` on <{element}>"))
    })
}

fn u32_attr(node: roxmltree::Node<'_, '_>, element: &str, attr: &str) -> Result<u32> {
    let raw = required_attr(node, element, attr)?;
    raw.trim().parse::<u32>().map_err(|e| {
        EncryptionError::malformed(format!(
            "attribute `{attr}` on <{element}> is not an unsigned integer ({raw:?}): {e}"
        ))
    })
}

/// Decode a base64 attribute value.
///
/// Pretty-printed descriptors may wrap long values, and some producers omit `=` padding.
fn decode_b64(value: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    let cleaned: String = value
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n' | '\t' | ' '))
        .collect();
    STANDARD
        .decode(&cleaned)
        .or_else(|_| STANDARD_NO_PAD.decode(&cleaned))
}

fn b64_attr(node: roxmltree::Node<'_, '_>, element: &str, attr: &str) -> Result<Vec<u8>> {
    let raw = required_attr(node, element, attr)?;
    decode_b64(raw).map_err(|e| {
        EncryptionError::malformed(format!(
            "attribute `{attr}` on <{element}> is not valid base64: {e}"
        ))
    })
}

fn find_child<'a, 'input>(
    parent: roxmltree::Node<'a, 'input>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    parent
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

/// Attributes shared by `<keyData>` and `<p:encryptedKey>`.
struct CipherParams {
    cipher_algorithm: CipherAlgorithm,
    cipher_chaining: CipherChaining,
    salt_value: Vec<u8>,
    hash_algorithm: HashAlgorithm,
    hash_size: u32,
    block_size: u32,
    key_bits: u32,
}

fn parse_cipher_params(node: roxmltree::Node<'_, '_>, element: &str) -> Result<CipherParams> {
    let cipher_algorithm =
        CipherAlgorithm::parse_offcrypto_name(required_attr(node, element, "cipherAlgorithm")?)?;
    let cipher_chaining =
        CipherChaining::parse_offcrypto_name(required_attr(node, element, "cipherChaining")?)?;
    let hash_algorithm =
        HashAlgorithm::parse_offcrypto_name(required_attr(node, element, "hashAlgorithm")?)?;

    let hash_size = u32_attr(node, element, "hashSize")?;
    if hash_size as usize != hash_algorithm.digest_len() {
        return Err(EncryptionError::malformed(format!(
            "<{element}> hashSize {hash_size} does not match {} output length {}",
            hash_algorithm.as_offcrypto_name(),
            hash_algorithm.digest_len()
        )));
    }

    let block_size = u32_attr(node, element, "blockSize")?;
    if !(2..=4096).contains(&block_size) || block_size % 2 != 0 {
        return Err(EncryptionError::malformed(format!(
            "<{element}> blockSize {block_size} must be even and within 2..=4096"
        )));
    }

    let key_bits = u32_attr(node, element, "keyBits")?;
    // keyBits sizes the derived key, so it is bounded before any derivation.
    let valid_key_bits = match cipher_algorithm {
        CipherAlgorithm::Aes => matches!(key_bits, 128 | 192 | 256),
    };
    if !valid_key_bits {
        return Err(EncryptionError::malformed(format!(
            "<{element}> keyBits {key_bits} is not a valid {} key size",
            cipher_algorithm.as_offcrypto_name()
        )));
    }

    let salt_size = u32_attr(node, element, "saltSize")?;
    let salt_value = b64_attr(node, element, "saltValue")?;
    if salt_value.is_empty() || salt_value.len() != salt_size as usize {
        return Err(EncryptionError::malformed(format!(
            "<{element}> decoded saltValue length {} does not match saltSize {salt_size}",
            salt_value.len()
        )));
    }

    Ok(CipherParams {
        cipher_algorithm,
        cipher_chaining,
        salt_value,
        hash_algorithm,
        hash_size,
        block_size,
        key_bits,
    })
}

/// Parse an `EncryptionInfo` stream.
pub fn decode_encryption_info(bytes: &[u8]) -> Result<EncryptionParameters> {
    if bytes.len() < ENCRYPTION_INFO_PREFIX.len() {
        return Err(EncryptionError::malformed(format!(
            "stream is too short ({} bytes)",
            bytes.len()
        )));
    }
    let major = u16::from_le_bytes([bytes[0], bytes[1]]);
    let minor = u16::from_le_bytes([bytes[2], bytes[3]]);
    if (major, minor) != (4, 4) {
        return Err(EncryptionError::malformed(format!(
            "unsupported version {major}.{minor} (expected Agile 4.4)"
        )));
    }

    let xml = std::str::from_utf8(&bytes[ENCRYPTION_INFO_PREFIX.len()..])?;
    let xml = xml.trim_start_matches('\u{FEFF}');
    let doc = roxmltree::Document::parse(xml)?;

    let root = doc.root_element();
    if root.tag_name().name() != "encryption" {
        return Err(EncryptionError::malformed(format!(
            "unexpected root element <{}>",
            root.tag_name().name()
        )));
    }

    let key_data_node = find_child(root, "keyData")
        .ok_or_else(|| EncryptionError::malformed("missing <keyData> element"))?;
    let p = parse_cipher_params(key_data_node, "keyData")?;
    let package = KeyData {
        cipher_algorithm: p.cipher_algorithm,
        cipher_chaining: p.cipher_chaining,
        salt_value: p.salt_value,
        hash_algorithm: p.hash_algorithm,
        hash_size: p.hash_size,
        block_size: p.block_size,
        key_bits: p.key_bits,
    };

    let data_integrity = find_child(root, "dataIntegrity")
        .map(|node| -> Result<DataIntegrity> {
            Ok(DataIntegrity {
                encrypted_hmac_key: b64_attr(node, "dataIntegrity", "encryptedHmacKey")?,
                encrypted_hmac_value: b64_attr(node, "dataIntegrity", "encryptedHmacValue")?,
            })
        })
        .transpose()?;

    let key_encryptors = find_child(root, "keyEncryptors")
        .ok_or_else(|| EncryptionError::malformed("missing <keyEncryptors> element"))?;

    // Certificate encryptors may sit alongside the password one; the first password encryptor wins.
    let password_encryptor = key_encryptors
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "keyEncryptor")
        .find(|n| n.attribute("uri").map(str::trim) == Some(KEY_ENCRYPTOR_URI_PASSWORD))
        .ok_or_else(|| EncryptionError::malformed("no password <keyEncryptor> present"))?;

    let encrypted_key_node = find_child(password_encryptor, "encryptedKey")
        .ok_or_else(|| EncryptionError::malformed("missing <p:encryptedKey> element"))?;
    let p = parse_cipher_params(encrypted_key_node, "encryptedKey")?;
    let key = PasswordKeyEncryptor {
        cipher_algorithm: p.cipher_algorithm,
        cipher_chaining: p.cipher_chaining,
        salt_value: p.salt_value,
        hash_algorithm: p.hash_algorithm,
        hash_size: p.hash_size,
        block_size: p.block_size,
        spin_count: u32_attr(encrypted_key_node, "encryptedKey", "spinCount")?,
        key_bits: p.key_bits,
        encrypted_key_value: b64_attr(encrypted_key_node, "encryptedKey", "encryptedKeyValue")?,
        encrypted_verifier_hash_input: b64_attr(
            encrypted_key_node,
            "encryptedKey",
            "encryptedVerifierHashInput",
        )?,
        encrypted_verifier_hash_value: b64_attr(
            encrypted_key_node,
            "encryptedKey",
            "encryptedVerifierHashValue",
        )?,
    };

    Ok(EncryptionParameters {
        package,
        key,
        data_integrity,
    })
}
