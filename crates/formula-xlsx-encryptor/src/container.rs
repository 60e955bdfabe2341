//! Compound-file container holding the `EncryptionInfo` and `EncryptedPackage` streams.

use std::io::{Cursor, Read as _, Write as _};

use crate::error::{EncryptionError, Result};

pub const ENCRYPTION_INFO_STREAM: &str = "EncryptionInfo";
pub const ENCRYPTED_PACKAGE_STREAM: &str = "EncryptedPackage";

/// Placeholder entry some CFB writers insert into fresh containers. Removed before serializing
/// so the output holds only the two encryption streams.
pub const PLACEHOLDER_ENTRY: &str = "\u{1}Sh33tJ5";

/// OLE/CFB file signature.
pub const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Multi-stream container consumed by the encryption orchestrator.
pub trait CompoundContainer: Sized {
    /// An empty container.
    fn create() -> Result<Self>;
    fn parse(bytes: &[u8]) -> Result<Self>;
    /// Add (or replace) a root-level stream.
    fn add_stream(&mut self, name: &str, bytes: &[u8]) -> Result<()>;
    /// Remove a root-level entry. Absent entries are not an error.
    fn remove_entry(&mut self, name: &str) -> Result<()>;
    /// Read a root-level stream, failing with [`EncryptionError::MissingContainerEntry`].
    fn stream(&mut self, name: &str) -> Result<Vec<u8>>;
    fn serialize(self) -> Result<Vec<u8>>;
}

/// [`CompoundContainer`] backed by an in-memory OLE/CFB file.
pub struct CfbContainer {
    ole: cfb::CompoundFile<Cursor<Vec<u8>>>,
}

impl std::fmt::Debug for CfbContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CfbContainer").finish_non_exhaustive()
    }
}

fn container_err(context: &'static str) -> impl FnOnce(std::io::Error) -> EncryptionError {
    move |source| EncryptionError::Container { context, source }
}

impl CompoundContainer for CfbContainer {
    fn create() -> Result<Self> {
        let ole = cfb::CompoundFile::create(Cursor::new(Vec::new()))
            .map_err(container_err("creating compound file"))?;
        Ok(Self { ole })
    }

    fn parse(bytes: &[u8]) -> Result<Self> {
        let ole = cfb::CompoundFile::open(Cursor::new(bytes.to_vec()))
            .map_err(container_err("opening compound file"))?;
        Ok(Self { ole })
    }

    fn add_stream(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let mut stream = self
            .ole
            .create_stream(name)
            .map_err(container_err("creating stream"))?;
        stream
            .write_all(bytes)
            .map_err(container_err("writing stream"))?;
        stream.flush().map_err(container_err("writing stream"))
    }

    fn remove_entry(&mut self, name: &str) -> Result<()> {
        if self.ole.is_stream(name) {
            self.ole
                .remove_stream(name)
                .map_err(container_err("removing stream"))?;
        } else if self.ole.is_storage(name) {
            self.ole
                .remove_storage_all(name)
                .map_err(container_err("removing storage"))?;
        }
        Ok(())
    }

    fn stream(&mut self, name: &str) -> Result<Vec<u8>> {
        if !self.ole.is_stream(name) {
            return Err(EncryptionError::MissingContainerEntry {
                name: name.to_string(),
            });
        }
        let mut out = Vec::new();
        self.ole
            .open_stream(name)
            .map_err(container_err("opening stream"))?
            .read_to_end(&mut out)
            .map_err(container_err("reading stream"))?;
        Ok(out)
    }

    fn serialize(mut self) -> Result<Vec<u8>> {
        self.ole
            .flush()
            .map_err(container_err("flushing compound file"))?;
        Ok(self.ole.into_inner().into_inner())
    }
}

/// Returns true if `bytes` is an OLE/CFB container holding both encryption streams.
pub fn is_encrypted_container(bytes: &[u8]) -> bool {
    if bytes.len() < OLE_MAGIC.len() || bytes[..OLE_MAGIC.len()] != OLE_MAGIC {
        return false;
    }
    let Ok(ole) = cfb::CompoundFile::open(Cursor::new(bytes)) else {
        return false;
    };
    ole.is_stream(ENCRYPTION_INFO_STREAM) && ole.is_stream(ENCRYPTED_PACKAGE_STREAM)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streams_survive_serialize_and_parse() {
        let mut container = CfbContainer::create().unwrap();
        container.add_stream(ENCRYPTION_INFO_STREAM, b"info").unwrap();
        container
            .add_stream(ENCRYPTED_PACKAGE_STREAM, &[7u8; 5000])
            .unwrap();
        let bytes = container.serialize().unwrap();

        assert_eq!(&bytes[..8], &OLE_MAGIC);
        assert!(is_encrypted_container(&bytes));

        let mut parsed = CfbContainer::parse(&bytes).unwrap();
        assert_eq!(parsed.stream(ENCRYPTION_INFO_STREAM).unwrap(), b"info");
        assert_eq!(
            parsed.stream(ENCRYPTED_PACKAGE_STREAM).unwrap(),
            vec![7u8; 5000]
        );
    }

    #[test]
    fn missing_stream_is_reported_by_name() {
        let mut container = CfbContainer::create().unwrap();
        container.add_stream(ENCRYPTION_INFO_STREAM, b"info").unwrap();
        let err = container.stream(ENCRYPTED_PACKAGE_STREAM).unwrap_err();
        assert!(matches!(
            err,
            EncryptionError::MissingContainerEntry { ref name } if name == "EncryptedPackage"
        ));
    }

    #[test]
    fn remove_entry_drops_placeholder_and_ignores_absent_names() {
        let mut container = CfbContainer::create().unwrap();
        container.add_stream(PLACEHOLDER_ENTRY, b"x").unwrap();
        container.remove_entry(PLACEHOLDER_ENTRY).unwrap();
        container.remove_entry("NotThere").unwrap();
        assert!(matches!(
            container.stream(PLACEHOLDER_ENTRY),
            Err(EncryptionError::MissingContainerEntry { .. })
        ));
    }

    #[test]
    fn plain_zip_is_not_an_encrypted_container() {
        assert!(!is_encrypted_container(b"PK\x03\x04rest-of-zip"));
        assert!(!is_encrypted_container(&OLE_MAGIC));

        let mut container = CfbContainer::create().unwrap();
        container.add_stream("Workbook", b"biff").unwrap();
        assert!(!is_encrypted_container(&container.serialize().unwrap()));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            CfbContainer::parse(b"not a compound file"),
            Err(EncryptionError::Container { .. })
        ));
    }
}
