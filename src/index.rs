use crate::int;
use crate::{Error, Result};

/// Borrowed view over the bucket index of a massset buffer.
///
/// Entry `n` is the offset of bucket `n`'s payload relative to the start of
/// the value section. The payload ends where the next bucket starts, or at
/// the end of the value section for the last bucket.
#[derive(Debug, Clone, Copy)]
pub struct BucketIndex<'a> {
    data: &'a [u8],
    int_size: usize,
    value_length: u64,
}

impl<'a> BucketIndex<'a> {
    /// Wraps `data`, which must hold exactly `bucket_count` entries of
    /// `int_size` bytes each.
    pub fn new(data: &'a [u8], int_size: u8, bucket_count: u64, value_length: u64) -> Result<Self> {
        if !int::is_valid_int_size(int_size) {
            return Err(Error::InvalidIntSize(int_size));
        }
        if data.len() as u64 != bucket_count * int_size as u64 {
            return Err(Error::Corrupt(format!(
                "bucket index holds {} bytes, expected {bucket_count} entries of {int_size} bytes",
                data.len()
            )));
        }
        Ok(Self {
            data,
            int_size: int_size as usize,
            value_length,
        })
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.int_size
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Offset of bucket `n`, relative to the value section.
    pub fn get(&self, n: usize) -> Option<u64> {
        let start = n.checked_mul(self.int_size)?;
        let entry = self.data.get(start..start.checked_add(self.int_size)?)?;
        Some(int::read_uint(entry))
    }

    /// Payload range of bucket `n`, relative to the value section.
    pub fn range(&self, n: usize) -> Result<std::ops::Range<u64>> {
        let start = self.get(n).ok_or(Error::BucketOutOfRange {
            index: n,
            bucket_count: self.len() as u64,
        })?;
        let end = self.get(n + 1).unwrap_or(self.value_length);
        if start > end || end > self.value_length {
            return Err(Error::Corrupt(format!(
                "bucket {n} spans {start}..{end} outside of {} payload bytes",
                self.value_length
            )));
        }
        Ok(start..end)
    }

    /// Iterates over all offsets in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + 'a {
        self.data.chunks_exact(self.int_size).map(int::read_uint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(offsets: &[u64], int_size: u8) -> Vec<u8> {
        let mut data = Vec::new();
        for &offset in offsets {
            int::write_uint(&mut data, offset, int_size);
        }
        data
    }

    #[test]
    fn test_ranges() {
        let data = encode(&[0, 3, 3, 10], 2);
        let index = BucketIndex::new(&data, 2, 4, 12).unwrap();
        assert_eq!(index.len(), 4);
        assert_eq!(index.iter().collect::<Vec<_>>(), vec![0, 3, 3, 10]);
        assert_eq!(index.range(0).unwrap(), 0..3);
        assert_eq!(index.range(1).unwrap(), 3..3);
        assert_eq!(index.range(3).unwrap(), 10..12);
        assert!(matches!(
            index.range(4),
            Err(Error::BucketOutOfRange { index: 4, .. })
        ));
    }

    #[test]
    fn test_corrupt_offsets() {
        let data = encode(&[0, 8, 4], 1);
        let index = BucketIndex::new(&data, 1, 3, 6).unwrap();
        assert!(matches!(index.range(0), Err(Error::Corrupt(_))));
        assert!(matches!(index.range(1), Err(Error::Corrupt(_))));
        assert_eq!(index.range(2).unwrap(), 4..6);

        BucketIndex::new(&data, 1, 4, 6).unwrap_err();
        BucketIndex::new(&data, 3, 1, 6).unwrap_err();
    }

    #[test]
    fn test_empty() {
        let index = BucketIndex::new(&[], 8, 0, 0).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.get(0), None);
    }
}
