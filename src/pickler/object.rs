use std::borrow::Cow;
use std::hash::Hash;
use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};

use super::{check_int_size, Pickler, PicklerConfig, DEFAULT_PICKLER_INT_SIZE};
use crate::{Error, PickleError, Result};

/// Pickler for arbitrary serde types, encoded as MessagePack.
///
/// By default every item is stored as its own length-prefixed record. With
/// [`with_whole_bucket`](Self::with_whole_bucket) each bucket is encoded as a
/// single MessagePack array instead, which is more compact but must be
/// decoded as a unit.
pub struct ObjectPickler<T> {
    int_size: u8,
    field_names: bool,
    whole_bucket: bool,
    phantom: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for ObjectPickler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPickler")
            .field("int_size", &self.int_size)
            .field("field_names", &self.field_names)
            .field("whole_bucket", &self.whole_bucket)
            .field("item_type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Clone for ObjectPickler<T> {
    fn clone(&self) -> Self {
        Self {
            int_size: self.int_size,
            field_names: self.field_names,
            whole_bucket: self.whole_bucket,
            phantom: PhantomData,
        }
    }
}

impl<T> Default for ObjectPickler<T> {
    fn default() -> Self {
        Self {
            int_size: DEFAULT_PICKLER_INT_SIZE,
            field_names: false,
            whole_bucket: false,
            phantom: PhantomData,
        }
    }
}

impl<T> ObjectPickler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_int_size(mut self, int_size: u8) -> Self {
        self.int_size = int_size;
        self
    }

    /// Controls whether structs are encoded as MessagePack maps with field
    /// names instead of positional arrays.
    pub fn with_field_names(mut self, value: bool) -> Self {
        self.field_names = value;
        self
    }

    /// Encodes each bucket as one MessagePack array.
    pub fn with_whole_bucket(mut self, value: bool) -> Self {
        self.whole_bucket = value;
        self
    }

    fn encode<V: Serialize>(&self, value: &V) -> std::result::Result<Vec<u8>, PickleError> {
        let result = if self.field_names {
            rmp_serde::to_vec_named(value)
        } else {
            rmp_serde::to_vec(value)
        };
        result.map_err(|e| PickleError::Unencodable(e.to_string()))
    }
}

impl<T> Pickler for ObjectPickler<T>
where
    T: Serialize + DeserializeOwned + Eq + Hash,
{
    type Item = T;

    fn from_config(config: &PicklerConfig) -> Result<Self> {
        match config {
            PicklerConfig::Object {
                int_size,
                field_names,
                whole_bucket,
            } => Ok(Self::new()
                .with_int_size(check_int_size(*int_size)?)
                .with_field_names(*field_names)
                .with_whole_bucket(*whole_bucket)),
            other => Err(Error::PicklerMismatch {
                expected: "object",
                found: other.name().to_string(),
            }),
        }
    }

    fn config(&self) -> PicklerConfig {
        PicklerConfig::Object {
            int_size: self.int_size,
            field_names: self.field_names,
            whole_bucket: self.whole_bucket,
        }
    }

    fn int_size(&self) -> u8 {
        self.int_size
    }

    fn set_int_size(&mut self, int_size: u8) {
        self.int_size = int_size;
    }

    fn item_bytes<'a>(&self, item: &'a T) -> std::result::Result<Cow<'a, [u8]>, PickleError> {
        Ok(Cow::Owned(self.encode(item)?))
    }

    fn decode_item(&self, data: &[u8]) -> std::result::Result<T, PickleError> {
        rmp_serde::from_slice(data).map_err(|e| PickleError::Decode(e.to_string()))
    }

    fn dump_bucket(&self, items: &[T], out: &mut Vec<u8>) -> std::result::Result<(), PickleError> {
        if !self.whole_bucket {
            for item in items {
                self.dump_single(item, out)?;
            }
            return Ok(());
        }
        out.extend_from_slice(&self.encode(&items)?);
        Ok(())
    }

    fn load_bucket(
        &self,
        buf: &[u8],
        offset: usize,
        length: usize,
    ) -> std::result::Result<Vec<T>, PickleError> {
        if !self.whole_bucket {
            return self.records(buf, offset, length)?.collect();
        }
        let data = offset
            .checked_add(length)
            .and_then(|end| buf.get(offset..end))
            .ok_or(PickleError::Truncated { offset })?;
        rmp_serde::from_slice(data).map_err(|e| PickleError::Decode(e.to_string()))
    }
}
