use std::borrow::Cow;

use super::{check_int_size, Pickler, PicklerConfig, DEFAULT_PICKLER_INT_SIZE};
use crate::{Error, PickleError, Result};

/// Pickler for raw byte strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytesPickler {
    int_size: u8,
}

impl Default for BytesPickler {
    fn default() -> Self {
        Self::with_int_size(DEFAULT_PICKLER_INT_SIZE)
    }
}

impl BytesPickler {
    pub fn with_int_size(int_size: u8) -> Self {
        Self { int_size }
    }
}

impl Pickler for BytesPickler {
    type Item = Vec<u8>;

    fn from_config(config: &PicklerConfig) -> Result<Self> {
        match config {
            PicklerConfig::Bytes { int_size } => {
                Ok(Self::with_int_size(check_int_size(*int_size)?))
            }
            other => Err(Error::PicklerMismatch {
                expected: "bytes",
                found: other.name().to_string(),
            }),
        }
    }

    fn config(&self) -> PicklerConfig {
        PicklerConfig::Bytes {
            int_size: self.int_size,
        }
    }

    fn int_size(&self) -> u8 {
        self.int_size
    }

    fn set_int_size(&mut self, int_size: u8) {
        self.int_size = int_size;
    }

    fn item_bytes<'a>(&self, item: &'a Vec<u8>) -> std::result::Result<Cow<'a, [u8]>, PickleError> {
        Ok(Cow::Borrowed(item))
    }

    fn decode_item(&self, data: &[u8]) -> std::result::Result<Vec<u8>, PickleError> {
        Ok(data.to_vec())
    }
}
