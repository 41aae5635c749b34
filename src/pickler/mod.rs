//! Item serialization for massset buckets.
//!
//! A [`Pickler`] turns items into length-prefixed records and back. The width
//! of the length prefix (`int_size`) is part of the pickler configuration,
//! which is stored in the metadata blob of every massset file and used to
//! reconstruct the pickler when the file is opened.

use std::borrow::Cow;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::int;
use crate::{PickleError, Result};

mod bytes;
pub use bytes::BytesPickler;

mod text;
pub use text::{TextEncoding, TextPickler};

mod object;
pub use object::ObjectPickler;

/// Length prefix width used by freshly constructed picklers.
pub const DEFAULT_PICKLER_INT_SIZE: u8 = 4;

/// Serializable description of a pickler, stored in the metadata blob.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum PicklerConfig {
    Bytes {
        int_size: u8,
    },
    Text {
        int_size: u8,
        encoding: TextEncoding,
    },
    Object {
        int_size: u8,
        field_names: bool,
        whole_bucket: bool,
    },
}

impl PicklerConfig {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bytes { .. } => "bytes",
            Self::Text { .. } => "text",
            Self::Object { .. } => "object",
        }
    }

    pub fn int_size(&self) -> u8 {
        match self {
            Self::Bytes { int_size }
            | Self::Text { int_size, .. }
            | Self::Object { int_size, .. } => *int_size,
        }
    }
}

/// Conversion between items and the bytes stored in bucket payloads.
///
/// Implementors provide the byte form of an item ([`item_bytes`](Self::item_bytes))
/// and its inverse ([`decode_item`](Self::decode_item)); the record framing is
/// shared. Picklers that encode a bucket as a unit override
/// [`dump_bucket`](Self::dump_bucket) and [`load_bucket`](Self::load_bucket).
pub trait Pickler: Sized {
    /// Items handled by this pickler.
    type Item: Eq + Hash;

    /// Reconstructs a pickler from its stored configuration.
    fn from_config(config: &PicklerConfig) -> Result<Self>;

    /// Returns the configuration to persist alongside the data.
    fn config(&self) -> PicklerConfig;

    /// Width in bytes of record length prefixes.
    fn int_size(&self) -> u8;

    /// Changes the width of record length prefixes.
    fn set_int_size(&mut self, int_size: u8);

    /// Returns the byte form of `item`, also used for hashing.
    fn item_bytes<'a>(
        &self,
        item: &'a Self::Item,
    ) -> std::result::Result<Cow<'a, [u8]>, PickleError>;

    /// Turns the byte form of an item back into the item.
    fn decode_item(&self, data: &[u8]) -> std::result::Result<Self::Item, PickleError>;

    /// Appends one length-prefixed record for `item` to `out`.
    ///
    /// Fails with the resumable [`PickleError::Overflow`] if the byte form is
    /// longer than [`int_size`](Self::int_size) can describe.
    fn dump_single(
        &self,
        item: &Self::Item,
        out: &mut Vec<u8>,
    ) -> std::result::Result<(), PickleError> {
        let data = self.item_bytes(item)?;
        write_length(out, data.len(), self.int_size())?;
        out.extend_from_slice(&data);
        Ok(())
    }

    /// Appends the payload of a whole bucket to `out`.
    fn dump_bucket(
        &self,
        items: &[Self::Item],
        out: &mut Vec<u8>,
    ) -> std::result::Result<(), PickleError> {
        for item in items {
            self.dump_single(item, out)?;
        }
        Ok(())
    }

    /// Reads the record starting at `offset`, returning the item and the
    /// offset just past the record.
    fn load_single(
        &self,
        buf: &[u8],
        offset: usize,
    ) -> std::result::Result<(Self::Item, usize), PickleError> {
        let (data, next) = read_record(buf, offset, self.int_size())?;
        Ok((self.decode_item(data)?, next))
    }

    /// Decodes the bucket payload stored at `buf[offset..offset + length]`.
    fn load_bucket(
        &self,
        buf: &[u8],
        offset: usize,
        length: usize,
    ) -> std::result::Result<Vec<Self::Item>, PickleError> {
        self.records(buf, offset, length)?.collect()
    }

    /// Lazy iterator over the records of a bucket payload.
    fn records<'a>(
        &'a self,
        buf: &'a [u8],
        offset: usize,
        length: usize,
    ) -> std::result::Result<Records<'a, Self>, PickleError> {
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= buf.len())
            .ok_or(PickleError::Truncated { offset })?;
        Ok(Records {
            pickler: self,
            data: &buf[..end],
            start: offset,
            offset,
        })
    }

    /// Picks the smallest `int_size` that fits every item of `sample`.
    ///
    /// Items outside the sample may still overflow; encoders handle that by
    /// widening and retrying.
    fn run_estimates<'a, I>(&mut self, sample: I) -> std::result::Result<(), PickleError>
    where
        I: IntoIterator<Item = &'a Self::Item>,
        Self::Item: 'a,
    {
        let mut longest = None;
        for item in sample {
            let length = self.item_bytes(item)?.len() as u64;
            longest = Some(longest.map_or(length, |l: u64| l.max(length)));
        }
        if let Some(longest) = longest {
            self.set_int_size(int::min_int_size(longest));
        }
        Ok(())
    }
}

/// Restartable iterator over the length-prefixed records of one bucket.
///
/// Cloning the iterator, or calling [`restart`](Self::restart), replays the
/// bucket from its first record.
pub struct Records<'a, P: Pickler> {
    pickler: &'a P,
    data: &'a [u8],
    start: usize,
    offset: usize,
}

impl<P: Pickler> Clone for Records<'_, P> {
    fn clone(&self) -> Self {
        Self {
            pickler: self.pickler,
            data: self.data,
            start: self.start,
            offset: self.offset,
        }
    }
}

impl<P: Pickler> Records<'_, P> {
    /// Rewinds to the first record of the bucket.
    pub fn restart(&mut self) {
        self.offset = self.start;
    }
}

impl<P: Pickler> Iterator for Records<'_, P> {
    type Item = std::result::Result<P::Item, PickleError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }
        match self.pickler.load_single(self.data, self.offset) {
            Ok((item, next)) => {
                self.offset = next;
                Some(Ok(item))
            }
            Err(e) => {
                // stop after the first malformed record
                self.offset = self.data.len();
                Some(Err(e))
            }
        }
    }
}

/// Appends `length` as an `int_size`-byte prefix.
pub(crate) fn write_length(
    out: &mut Vec<u8>,
    length: usize,
    int_size: u8,
) -> std::result::Result<(), PickleError> {
    let length = length as u64;
    if length > int::max_value(int_size) {
        return Err(PickleError::Overflow { length, int_size });
    }
    int::write_uint(out, length, int_size);
    Ok(())
}

/// Splits the record at `offset` into its body and the offset of the next record.
pub(crate) fn read_record(
    buf: &[u8],
    offset: usize,
    int_size: u8,
) -> std::result::Result<(&[u8], usize), PickleError> {
    let body = offset
        .checked_add(int_size as usize)
        .filter(|body| *body <= buf.len())
        .ok_or(PickleError::Truncated { offset })?;
    let length = int::read_uint(&buf[offset..body]);
    let end = usize::try_from(length)
        .ok()
        .and_then(|length| body.checked_add(length))
        .filter(|end| *end <= buf.len())
        .ok_or(PickleError::Truncated { offset })?;
    Ok((&buf[body..end], end))
}

pub(crate) fn check_int_size(int_size: u8) -> Result<u8> {
    if int::is_valid_int_size(int_size) {
        Ok(int_size)
    } else {
        Err(crate::Error::InvalidIntSize(int_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_restart() {
        let pickler = BytesPickler::with_int_size(1);
        let items = vec![b"a".to_vec(), b"bb".to_vec(), b"ccc".to_vec()];
        let mut out = vec![0xff; 3];
        pickler.dump_bucket(&items, &mut out).unwrap();

        let mut records = pickler.records(&out, 3, out.len() - 3).unwrap();
        let first: Vec<_> = records.clone().collect::<std::result::Result<_, _>>().unwrap();
        assert_eq!(first, items);

        assert_eq!(records.next().unwrap().unwrap(), b"a".to_vec());
        records.restart();
        let second: Vec<_> = records.collect::<std::result::Result<_, _>>().unwrap();
        assert_eq!(second, items);
    }

    #[test]
    fn test_truncated_record() {
        let pickler = BytesPickler::with_int_size(2);
        let mut out = Vec::new();
        pickler.dump_single(&b"hello".to_vec(), &mut out).unwrap();
        out.pop();

        let err = pickler.load_bucket(&out, 0, out.len()).unwrap_err();
        assert_eq!(err, PickleError::Truncated { offset: 0 });
        pickler.records(&out, 0, out.len() + 1).err().unwrap();
    }

    #[test]
    fn test_overflow_is_resumable() {
        let pickler = BytesPickler::with_int_size(1);
        let mut out = Vec::new();
        let err = pickler.dump_single(&vec![0u8; 256], &mut out).unwrap_err();
        assert_eq!(
            err,
            PickleError::Overflow {
                length: 256,
                int_size: 1
            }
        );
        assert!(err.is_resumable());
    }

    #[test]
    fn test_run_estimates() {
        let mut pickler = BytesPickler::default();
        assert_eq!(pickler.int_size(), DEFAULT_PICKLER_INT_SIZE);

        let items = vec![vec![1u8; 10], vec![2u8; 300]];
        pickler.run_estimates(items.iter()).unwrap();
        assert_eq!(pickler.int_size(), 2);

        pickler.run_estimates(items[..1].iter()).unwrap();
        assert_eq!(pickler.int_size(), 1);

        pickler.run_estimates(std::iter::empty()).unwrap();
        assert_eq!(pickler.int_size(), 1);
    }
}
