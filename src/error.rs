use thiserror::Error;

/// Failure raised by a [`Pickler`](crate::Pickler) while encoding or decoding items.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PickleError {
    /// An item is longer than the configured length prefix can describe.
    ///
    /// This error is resumable: widening the prefix to
    /// [`required_int_size`](Self::required_int_size) bytes and repeating the
    /// encode pass succeeds.
    #[error("length {length} does not fit into {int_size} byte(s)")]
    Overflow { length: u64, int_size: u8 },

    /// The item has no representation under this pickler.
    #[error("item cannot be encoded: {0}")]
    Unencodable(String),

    /// A record ends past the end of its bucket.
    #[error("record at offset {offset} is truncated")]
    Truncated { offset: usize },

    /// The bytes of a record could not be turned back into an item.
    #[error("failed to decode record: {0}")]
    Decode(String),
}

impl PickleError {
    /// Returns true if the caller may widen the integer size and retry.
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Overflow { .. })
    }

    /// Minimal integer size that avoids this overflow, if resumable.
    pub fn required_int_size(&self) -> Option<u8> {
        match self {
            Self::Overflow { length, .. } => Some(crate::int::min_int_size(*length)),
            _ => None,
        }
    }
}

/// Errors produced while building, reading or mutating a massset.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the underlying file, mapping or writer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid magic {found:?}, expected {expected:?}")]
    InvalidMagic { found: [u8; 8], expected: [u8; 8] },

    #[error("unsupported format version {found}, expected {expected}")]
    UnsupportedVersion { found: u8, expected: u8 },

    #[error("integer size must be a power of 2 between 1 and 8, not {0}")]
    InvalidIntSize(u8),

    #[error("missing metadata field `{0}`")]
    MissingMetadata(&'static str),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// Offsets or lengths in the buffer disagree with each other.
    #[error("corrupt massset: {0}")]
    Corrupt(String),

    #[error("pickler error: {0}")]
    Pickle(#[from] PickleError),

    /// Lookup of an absent item, or pop from an empty set.
    #[error("item not found")]
    NotFound,

    #[error("bucket {index} out of range for {bucket_count} buckets")]
    BucketOutOfRange { index: usize, bucket_count: u64 },

    #[error("load factor must be positive and finite, not {0}")]
    InvalidLoadFactor(f64),

    #[error("invalid bucket count {0}")]
    InvalidBucketCount(u64),

    #[error("pickler mismatch: expected `{expected}`, found `{found}`")]
    PicklerMismatch {
        expected: &'static str,
        found: String,
    },
}

impl Error {
    /// Returns true for errors caused by a malformed buffer.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidMagic { .. }
                | Self::UnsupportedVersion { .. }
                | Self::InvalidIntSize(_)
                | Self::MissingMetadata(_)
                | Self::InvalidMetadata(_)
                | Self::Corrupt(_)
        )
    }
}

impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        use std::io::ErrorKind;

        match value {
            Error::Io(e) => e,
            e @ Error::NotFound => std::io::Error::new(ErrorKind::NotFound, e),
            e @ (Error::BucketOutOfRange { .. }
            | Error::InvalidLoadFactor(_)
            | Error::InvalidBucketCount(_)) => std::io::Error::new(ErrorKind::InvalidInput, e),
            e => std::io::Error::new(ErrorKind::InvalidData, e),
        }
    }
}

/// Massset result
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resumable() {
        let overflow = PickleError::Overflow {
            length: 300,
            int_size: 1,
        };
        assert!(overflow.is_resumable());
        assert_eq!(overflow.required_int_size(), Some(2));

        let fatal = PickleError::Unencodable("no".to_string());
        assert!(!fatal.is_resumable());
        assert_eq!(fatal.required_int_size(), None);
    }

    #[test]
    fn test_io_conversion() {
        let e: std::io::Error = Error::NotFound.into();
        assert_eq!(e.kind(), std::io::ErrorKind::NotFound);

        let e: std::io::Error = Error::MissingMetadata("hasher").into();
        assert_eq!(e.kind(), std::io::ErrorKind::InvalidData);
        assert!(e.to_string().contains("hasher"));
    }
}
