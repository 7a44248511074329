use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Where a client binary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOrigin {
    /// Read from the local cache and validated as current.
    Cache,
    /// Freshly downloaded and written to the cache.
    Download,
    /// Downloaded straight into memory (no writable cache available).
    Memory,
}

/// An acquired client pack. Read-only once created; a newer revision is a
/// new `ClientBinary`, never a mutation of this one.
#[derive(Debug)]
pub struct ClientBinary {
    origin: BinaryOrigin,
    path: Option<PathBuf>,
    bytes: Vec<u8>,
}

impl ClientBinary {
    pub fn from_file(path: impl Into<PathBuf>, origin: BinaryOrigin) -> io::Result<Self> {
        let path = path.into();
        let bytes = fs::read(&path)?;
        Ok(Self {
            origin,
            path: Some(path),
            bytes,
        })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            origin: BinaryOrigin::Memory,
            path: None,
            bytes,
        }
    }

    pub fn origin(&self) -> BinaryOrigin {
        self.origin
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Best-effort revision embedded in the pack.
    pub fn revision(&self) -> Option<u16> {
        caravel_net::extract_revision(&self.bytes)
    }

    /// Returns a filesystem path for the pack, writing in-memory bytes to a
    /// scratch file first. The platform module loader can only map files.
    pub(crate) fn materialize(&self) -> io::Result<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        let scratch =
            std::env::temp_dir().join(format!("caravel-clientpack-{}", std::process::id()));
        fs::write(&scratch, &self.bytes)?;
        Ok(scratch)
    }
}

#[cfg(test)]
mod tests {
    use caravel_net::REVISION_MARKER;

    use super::*;

    #[test]
    fn in_memory_binary_reports_embedded_revision() {
        let mut bytes = vec![0u8; 16];
        bytes.extend_from_slice(&REVISION_MARKER);
        bytes.extend_from_slice(&180u16.to_be_bytes());
        let binary = ClientBinary::from_bytes(bytes);
        assert_eq!(binary.origin(), BinaryOrigin::Memory);
        assert_eq!(binary.revision(), Some(180));
        assert!(binary.path().is_none());
    }

    #[test]
    fn markerless_binary_has_no_revision() {
        let binary = ClientBinary::from_bytes(vec![0u8; 50]);
        assert_eq!(binary.revision(), None);
    }

    #[test]
    fn materialize_writes_memory_bytes_to_disk() {
        let binary = ClientBinary::from_bytes(b"pack bytes".to_vec());
        let path = binary.materialize().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"pack bytes");
        let _ = fs::remove_file(path);
    }
}
