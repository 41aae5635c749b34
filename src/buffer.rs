use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;

use crate::Result;

/// Read-only bytes backing a [`MassSet`](crate::MassSet).
///
/// The buffer is either a memory-mapped file or an owned byte vector. A
/// `MassSet` owns its buffer; bucket index views borrow from it and decoded
/// items are owned copies, so the mapping is closed only after every view
/// into it is gone.
#[derive(Debug)]
pub enum MassSetBuffer {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl MassSetBuffer {
    /// Maps the file at `path` read-only.
    pub fn map_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::map_file(&file)
    }

    /// Maps an open file read-only. The file handle may be closed afterwards.
    pub fn map_file(file: &File) -> Result<Self> {
        if file.metadata()?.len() == 0 {
            return Ok(Self::Owned(Vec::new()));
        }
        // SAFETY: the mapping is read-only; modifying or truncating the file
        // while it is mapped is not supported.
        let mmap = unsafe { Mmap::map(file)? };
        Ok(Self::Mapped(mmap))
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, Self::Mapped(_))
    }
}

impl Deref for MassSetBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(mmap) => mmap,
            Self::Owned(data) => data,
        }
    }
}

impl From<Vec<u8>> for MassSetBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self::Owned(data)
    }
}

impl From<Mmap> for MassSetBuffer {
    fn from(mmap: Mmap) -> Self {
        Self::Mapped(mmap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_map_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buffer.bin");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"hashset buffer")
            .unwrap();

        let buffer = MassSetBuffer::map_path(&path).unwrap();
        assert!(buffer.is_mapped());
        assert_eq!(&buffer[..], b"hashset buffer");
    }

    #[test]
    fn test_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        std::fs::File::create(&path).unwrap();

        let buffer = MassSetBuffer::map_path(&path).unwrap();
        assert!(!buffer.is_mapped());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = MassSetBuffer::map_path(dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }
}
