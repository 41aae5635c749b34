use std::collections::HashSet;
use std::io::{BufWriter, Write};

use crate::meta::check_load_factor;
use crate::{
    MassSetHasher, MassSetHeader, MassSetInfo, PickleError, Pickler, Result, DEFAULT_LOAD_FACTOR,
};

/// Builder type for emitting massset files from item iterators.
///
/// The builder owns configuration such as the hash function, the load factor,
/// IO buffering and the size of the sample used to estimate record widths.
/// Use [`build`](Self::build) to write a complete massset to any
/// [`std::io::Write`] sink. Each builder instance is consumed by a single
/// call to [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct MassSetBuilder {
    hasher: MassSetHasher,
    load_factor: f64,
    writer_buffer_size: usize,
    estimate_sample: usize,
}

impl Default for MassSetBuilder {
    fn default() -> Self {
        Self {
            hasher: MassSetHasher::default(),
            load_factor: DEFAULT_LOAD_FACTOR,
            writer_buffer_size: 16 << 20, // 16 MiB
            estimate_sample: 1024,
        }
    }
}

impl MassSetBuilder {
    /// Selects the hash function used to distribute items across buckets.
    pub fn with_hasher(mut self, hasher: MassSetHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Sets the target ratio of items to buckets.
    ///
    /// The bucket count is the smallest power of two not below
    /// `items / load_factor`. Lower values trade file size for shorter
    /// buckets.
    pub fn with_load_factor(mut self, load_factor: f64) -> Self {
        self.load_factor = load_factor;
        self
    }

    /// Adjusts the capacity of the buffered writer used while streaming data.
    pub fn with_writer_buffer_size(mut self, size: usize) -> Self {
        self.writer_buffer_size = size;
        self
    }

    /// Number of items inspected to pick the initial record length width.
    ///
    /// Zero keeps the width configured on the pickler. Items outside the
    /// sample that do not fit widen the records and re-encode.
    pub fn with_estimate_sample(mut self, count: usize) -> Self {
        self.estimate_sample = count;
        self
    }

    /// Consumes the builder and writes a massset of `items` to `writer`.
    ///
    /// Duplicate items are stored once. Items are hashed with the configured
    /// hasher, grouped into buckets, encoded by `pickler` and written after
    /// the header and bucket index. A [`MassSetInfo`] summary is returned on
    /// success.
    ///
    /// # Errors
    ///
    /// Returns an error if the load factor is invalid, if an item cannot be
    /// encoded, or if the underlying writer reports an IO failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use massset::{MassSet, MassSetBuilder, TextPickler};
    ///
    /// # fn main() -> massset::Result<()> {
    /// let mut data = Vec::new();
    /// let items = ["it", "works"].map(String::from);
    /// let info = MassSetBuilder::default().build(&mut data, TextPickler::default(), items)?;
    /// assert_eq!(info.element_count, 2);
    ///
    /// let set = MassSet::<TextPickler>::from_bytes(data)?;
    /// assert!(set.contains(&"works".to_string())?);
    /// # Ok(())
    /// # }
    /// ```
    pub fn build<W, P, I>(self, writer: W, mut pickler: P, items: I) -> Result<MassSetInfo>
    where
        W: Write,
        P: Pickler,
        I: IntoIterator<Item = P::Item>,
    {
        let load_factor = check_load_factor(self.load_factor)?;
        let items: HashSet<P::Item> = items.into_iter().collect();

        let mut header = MassSetHeader::new(self.hasher, pickler.config());
        header.set_element_count(items.len() as u64, load_factor)?;
        log::debug!(
            "Building massset of {} items in {} buckets with {}",
            items.len(),
            header.bucket_count(),
            header.hasher().name()
        );

        if self.estimate_sample > 0 {
            pickler.run_estimates(items.iter().take(self.estimate_sample))?;
            log::trace!("Estimated record length width of {} bytes", pickler.int_size());
        }

        let mut buckets: Vec<Vec<P::Item>> = std::iter::repeat_with(Vec::new)
            .take(header.bucket_count() as usize)
            .collect();
        for item in items {
            let hash = header.hasher().hash_item(&item, &pickler)?;
            buckets[header.bucket_index(hash)].push(item);
        }

        let buckets: Vec<&[P::Item]> = buckets.iter().map(Vec::as_slice).collect();
        let payloads = encode_buckets(&mut pickler, &buckets)?;
        header.set_pickler(pickler.config());

        let buf_writer = BufWriter::with_capacity(self.writer_buffer_size, writer);
        write_payloads(&mut header, buf_writer, &payloads)
    }
}

/// Encodes every bucket, widening the pickler's record length prefix and
/// starting over whenever an item does not fit.
pub(crate) fn encode_buckets<P: Pickler>(
    pickler: &mut P,
    buckets: &[&[P::Item]],
) -> Result<Vec<Vec<u8>>> {
    loop {
        match try_encode(pickler, buckets) {
            Ok(payloads) => return Ok(payloads),
            Err(e) => match e.required_int_size() {
                Some(int_size) if int_size > pickler.int_size() => {
                    log::debug!(
                        "Widening record lengths from {} to {int_size} bytes: {e}",
                        pickler.int_size()
                    );
                    pickler.set_int_size(int_size);
                }
                _ => return Err(e.into()),
            },
        }
    }
}

fn try_encode<P: Pickler>(
    pickler: &P,
    buckets: &[&[P::Item]],
) -> std::result::Result<Vec<Vec<u8>>, PickleError> {
    buckets
        .iter()
        .map(|bucket| {
            let mut payload = Vec::new();
            if !bucket.is_empty() {
                pickler.dump_bucket(bucket, &mut payload)?;
            }
            Ok(payload)
        })
        .collect()
}

/// Writes header, index and payloads through `writer` and flushes it.
pub(crate) fn write_payloads<W: Write>(
    header: &mut MassSetHeader,
    mut writer: W,
    payloads: &[Vec<u8>],
) -> Result<MassSetInfo> {
    let file_length = header.to_file(&mut writer, payloads)?;
    writer.flush()?;

    let info = MassSetInfo::new(header, payloads, file_length);
    log::debug!(
        "Wrote massset of {} bytes: {} items, {} of {} buckets empty, index width {}",
        info.file_length,
        info.element_count,
        info.empty_buckets,
        info.bucket_count,
        info.int_size
    );
    Ok(info)
}

#[cfg(test)]
mod tests {
    use crate::*;

    /// Writer that fails once more than `limit` bytes were written.
    #[derive(Debug)]
    struct LimitedWriter {
        data: Vec<u8>,
        limit: usize,
    }

    impl LimitedWriter {
        fn new(limit: usize) -> Self {
            Self {
                data: Vec::new(),
                limit,
            }
        }
    }

    impl std::io::Write for LimitedWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let available = self.limit - self.data.len();
            if available == 0 && !buf.is_empty() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "Write exceeds limit",
                ));
            }
            let n = buf.len().min(available);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_shorter_write() {
        const N: u64 = 1000;
        let items = || (0..N).map(|i| i.to_le_bytes().to_vec());

        let mut writer = LimitedWriter::new(usize::MAX);
        let info = MassSetBuilder::default()
            .with_hasher(MassSetHasher::Foldhash { seed: 42 })
            .build(&mut writer, BytesPickler::default(), items())
            .unwrap();
        assert_eq!(info.file_length, writer.data.len() as u64);

        let set = MassSet::<BytesPickler>::from_bytes(writer.data).unwrap();
        for i in 0..N {
            assert!(set.contains(&i.to_le_bytes().to_vec()).unwrap());
        }

        let mut writer = LimitedWriter::new(info.file_length as usize - 1);
        let err = MassSetBuilder::default()
            .with_hasher(MassSetHasher::Foldhash { seed: 42 })
            .with_writer_buffer_size(64)
            .build(&mut writer, BytesPickler::default(), items())
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_info() {
        let mut data = Vec::new();
        let info = MassSetBuilder::default()
            .with_load_factor(0.5)
            .build(
                &mut data,
                TextPickler::default(),
                ["a", "b", "c", "d", "e"].map(String::from),
            )
            .unwrap();
        assert_eq!(info.element_count, 5);
        assert_eq!(info.bucket_count, 16);
        assert!(info.empty_buckets >= 11);
        assert_eq!(info.pickler_int_size, 1);
        assert_eq!(info.int_size, 1);
        assert_eq!(info.value_offset, info.index_offset + 16);
        assert_eq!(info.file_length, data.len() as u64);
        assert_eq!(info.hasher, MassSetHasher::default());
    }

    #[test]
    fn test_invalid_load_factor() {
        for load_factor in [0.0, -0.5, f64::INFINITY, f64::NAN] {
            let err = MassSetBuilder::default()
                .with_load_factor(load_factor)
                .build(Vec::new(), BytesPickler::default(), vec![b"x".to_vec()])
                .unwrap_err();
            assert!(matches!(err, Error::InvalidLoadFactor(_)));
        }
    }

    #[test]
    fn test_encode_widening() {
        let mut pickler = BytesPickler::with_int_size(1);
        let small = vec![b"a".to_vec()];
        let large = vec![vec![0u8; 70_000]];
        let payloads =
            super::encode_buckets(&mut pickler, &[small.as_slice(), &[], large.as_slice()])
                .unwrap();
        assert_eq!(pickler.int_size(), 4);
        assert_eq!(payloads[0].len(), 5);
        assert!(payloads[1].is_empty());
        assert_eq!(payloads[2].len(), 70_004);
    }

    #[test]
    fn test_every_hasher() {
        let items: Vec<String> = (0..100).map(|i| format!("item{i}")).collect();
        for name in MassSetHasher::NAMES {
            let hasher = MassSetHasher::from_name(name, 7).unwrap();
            let mut data = Vec::new();
            MassSetBuilder::default()
                .with_hasher(hasher.clone())
                .build(&mut data, TextPickler::default(), items.clone())
                .unwrap();

            let set = MassSet::<TextPickler>::from_bytes(data).unwrap();
            assert_eq!(set.hasher(), &hasher);
            assert!(items.iter().all(|item| set.contains(item).unwrap()));
            assert!(!set.contains(&"item100".to_string()).unwrap());
        }
    }
}
