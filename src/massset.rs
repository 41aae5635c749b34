use std::cell::{Cell, OnceCell};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use memmap2::Mmap;

use crate::builder::{encode_buckets, write_payloads};
use crate::int;
use crate::meta::check_load_factor;
use crate::{
    BucketIndex, Error, MassSetBuffer, MassSetBuilder, MassSetHasher, MassSetHeader, MassSetInfo,
    Pickler, Result,
};

/// Load factor used when none is given.
pub const DEFAULT_LOAD_FACTOR: f64 = 2.0 / 3.0;

/// Hash set stored in the massset format.
///
/// A `MassSet` is either opened from a buffer (typically a memory-mapped
/// file) or constructed empty in memory. Opened sets decode a bucket only
/// when it is first accessed and cache the result, so probing a large file
/// touches a single bucket. Mutations work on the cached buckets; the first
/// rehash materializes every bucket and drops the backing buffer, after which
/// the set lives purely in memory until it is written with
/// [`to_file`](Self::to_file).
///
/// Buckets are cached through interior mutability, so a `MassSet` is not
/// `Sync`; share it across threads only behind external synchronization.
pub struct MassSet<P: Pickler> {
    header: MassSetHeader,
    pickler: P,
    load_factor: f64,
    size: u64,
    materialized: Cell<bool>,
    // declared before `buffer` so that cached buckets drop first
    buckets: Vec<OnceCell<Vec<P::Item>>>,
    buffer: Option<MassSetBuffer>,
}

impl<P: Pickler + std::fmt::Debug> std::fmt::Debug for MassSet<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MassSet")
            .field("header", &self.header)
            .field("pickler", &self.pickler)
            .field("load_factor", &self.load_factor)
            .field("size", &self.size)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

impl<P: Pickler> MassSet<P> {
    /// Creates an empty in-memory set.
    pub fn new(hasher: MassSetHasher, pickler: P) -> Self {
        Self {
            header: MassSetHeader::new(hasher, pickler.config()),
            pickler,
            load_factor: DEFAULT_LOAD_FACTOR,
            size: 0,
            materialized: Cell::new(true),
            buckets: Vec::new(),
            buffer: None,
        }
    }

    /// Builds a massset file from `items` and writes it to `writer`.
    ///
    /// Shorthand for [`MassSetBuilder`] with the given hasher and load factor.
    pub fn build<W, I>(
        writer: W,
        items: I,
        hasher: MassSetHasher,
        pickler: P,
        load_factor: f64,
    ) -> Result<MassSetInfo>
    where
        W: Write,
        I: IntoIterator<Item = P::Item>,
    {
        MassSetBuilder::default()
            .with_hasher(hasher)
            .with_load_factor(load_factor)
            .build(writer, pickler, items)
    }

    /// Opens and memory-maps the massset file at `path`.
    pub fn open<Q: AsRef<Path>>(path: Q) -> Result<Self> {
        Self::from_buffer(MassSetBuffer::map_path(path)?)
    }

    /// Memory-maps an open massset file.
    pub fn from_file(file: &File) -> Result<Self> {
        Self::from_buffer(MassSetBuffer::map_file(file)?)
    }

    /// Reads a massset from an existing mapping.
    pub fn from_mmap(mmap: Mmap) -> Result<Self> {
        Self::from_buffer(MassSetBuffer::Mapped(mmap))
    }

    /// Reads a massset from bytes in memory.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_buffer(MassSetBuffer::Owned(data))
    }

    /// Parses the header of `buffer`; buckets stay unresolved until accessed.
    ///
    /// # Errors
    ///
    /// Returns a format error if the header is malformed and
    /// [`Error::PicklerMismatch`] if the file was written by a different
    /// kind of pickler than `P`.
    pub fn from_buffer(buffer: MassSetBuffer) -> Result<Self> {
        let header = MassSetHeader::from_bytes(&buffer)?;
        let pickler = P::from_config(header.pickler())?;
        let bucket_count = usize::try_from(header.bucket_count()).map_err(|_| {
            Error::Corrupt(format!("bucket count {} too large", header.bucket_count()))
        })?;

        log::debug!(
            "Opened massset with {} items in {bucket_count} buckets ({} bytes, mapped: {})",
            header.element_count(),
            buffer.len(),
            buffer.is_mapped()
        );

        Ok(Self {
            size: header.element_count(),
            header,
            pickler,
            load_factor: DEFAULT_LOAD_FACTOR,
            materialized: Cell::new(bucket_count == 0),
            buckets: std::iter::repeat_with(OnceCell::new)
                .take(bucket_count)
                .collect(),
            buffer: Some(buffer),
        })
    }

    /// Number of items in the set.
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn bucket_count(&self) -> u64 {
        self.header.bucket_count()
    }

    pub fn load_factor(&self) -> f64 {
        self.load_factor
    }

    /// Sets the load factor used by future reservations.
    pub fn set_load_factor(&mut self, load_factor: f64) -> Result<()> {
        self.load_factor = check_load_factor(load_factor)?;
        Ok(())
    }

    pub fn header(&self) -> &MassSetHeader {
        &self.header
    }

    pub fn hasher(&self) -> &MassSetHasher {
        self.header.hasher()
    }

    pub fn pickler(&self) -> &P {
        &self.pickler
    }

    /// Returns true while the set reads from a memory-mapped file.
    pub fn is_mapped(&self) -> bool {
        self.buffer.as_ref().is_some_and(MassSetBuffer::is_mapped)
    }

    /// Returns true once every bucket has been visited by an iterator, or
    /// when the set lives purely in memory.
    pub fn is_materialized(&self) -> bool {
        self.materialized.get()
    }

    /// Bucket selected for `item` under the current bucket count.
    pub fn bucket_of(&self, item: &P::Item) -> Result<usize> {
        let hash = self.header.hasher().hash_item(item, &self.pickler)?;
        Ok(self.header.bucket_index(hash))
    }

    /// Borrowed view over the bucket index of the backing buffer, if any.
    pub fn bucket_index(&self) -> Result<Option<BucketIndex<'_>>> {
        match &self.buffer {
            Some(buffer) => self.index_in(buffer).map(Some),
            None => Ok(None),
        }
    }

    fn index_in<'a>(&self, buffer: &'a [u8]) -> Result<BucketIndex<'a>> {
        let index_offset = self.header.index_offset() as usize;
        let value_offset = self.header.value_offset() as usize;
        BucketIndex::new(
            &buffer[index_offset..value_offset],
            self.header.int_size(),
            self.header.bucket_count(),
            (buffer.len() - value_offset) as u64,
        )
    }

    /// Returns true if the set contains `item`.
    ///
    /// Only the bucket selected by the item's hash is decoded; membership is
    /// decided by equality within that bucket.
    pub fn contains(&self, item: &P::Item) -> Result<bool> {
        if self.buckets.is_empty() {
            return Ok(false);
        }
        let bucket = self.get_bucket(self.bucket_of(item)?)?;
        Ok(bucket.contains(item))
    }

    /// Returns the items of bucket `n`, decoding and caching it on first access.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BucketOutOfRange`] if `n` is not a bucket, a format
    /// error if the index points outside of the buffer, or the pickler's
    /// error if the payload cannot be decoded.
    pub fn get_bucket(&self, n: usize) -> Result<&[P::Item]> {
        let cell = self.buckets.get(n).ok_or(Error::BucketOutOfRange {
            index: n,
            bucket_count: self.buckets.len() as u64,
        })?;
        if let Some(bucket) = cell.get() {
            return Ok(bucket);
        }
        let bucket = self.load_bucket(n)?;
        Ok(cell.get_or_init(|| bucket))
    }

    fn load_bucket(&self, n: usize) -> Result<Vec<P::Item>> {
        let Some(buffer) = self.buffer.as_deref() else {
            return Err(Error::Corrupt(format!(
                "bucket {n} is neither cached nor backed by a buffer"
            )));
        };

        let range = self.index_in(buffer)?.range(n)?;
        if range.is_empty() {
            return Ok(Vec::new());
        }

        log::trace!("Loading bucket {n} at {range:?}");
        let values = &buffer[self.header.value_offset() as usize..];
        let bucket = self.pickler.load_bucket(
            values,
            range.start as usize,
            (range.end - range.start) as usize,
        )?;
        Ok(bucket)
    }

    fn bucket_mut(&mut self, n: usize) -> Result<&mut Vec<P::Item>> {
        self.get_bucket(n)?;
        self.buckets[n]
            .get_mut()
            .ok_or_else(|| Error::Corrupt(format!("bucket {n} failed to load")))
    }

    fn resolve_all(&self) -> Result<()> {
        for n in 0..self.buckets.len() {
            self.get_bucket(n)?;
        }
        Ok(())
    }

    /// Iterates over all items in bucket order.
    ///
    /// Buckets are decoded as the iterator reaches them. Once the iterator
    /// is exhausted the set is marked as materialized.
    pub fn iter(&self) -> MassSetIter<'_, P> {
        MassSetIter {
            set: self,
            bucket_index: 0,
            current: Default::default(),
        }
    }

    /// Inserts `item`, returning false if it was already present.
    ///
    /// May trigger a rehash to keep the load factor.
    pub fn add(&mut self, item: P::Item) -> Result<bool> {
        // routing hashes do not depend on the bucket count
        let hash = self.header.hasher().hash_item(&item, &self.pickler)?;
        let size = self.size.checked_add(1).ok_or_else(size_overflow)?;
        self.reserve(size, None)?;
        let n = self.header.bucket_index(hash);
        let bucket = self.bucket_mut(n)?;
        if bucket.contains(&item) {
            return Ok(false);
        }
        bucket.push(item);
        self.size += 1;
        Ok(true)
    }

    /// Removes `item` if present and reports whether it was.
    pub fn discard(&mut self, item: &P::Item) -> Result<bool> {
        if self.buckets.is_empty() {
            return Ok(false);
        }
        let n = self.bucket_of(item)?;
        let bucket = self.bucket_mut(n)?;
        match bucket.iter().position(|other| other == item) {
            Some(position) => {
                bucket.swap_remove(position);
                self.size -= 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes `item`, failing with [`Error::NotFound`] if it is absent.
    pub fn remove(&mut self, item: &P::Item) -> Result<()> {
        if self.discard(item)? {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    /// Removes and returns an arbitrary item, failing with
    /// [`Error::NotFound`] if the set is empty.
    pub fn pop(&mut self) -> Result<P::Item> {
        if self.size == 0 {
            return Err(Error::NotFound);
        }
        for n in 0..self.buckets.len() {
            let item = self.bucket_mut(n)?.pop();
            if let Some(item) = item {
                self.size -= 1;
                return Ok(item);
            }
        }
        Err(Error::NotFound)
    }

    /// Inserts every item of `items`.
    pub fn update<I: IntoIterator<Item = P::Item>>(&mut self, items: I) -> Result<()> {
        let items = items.into_iter();
        let (lower, _) = items.size_hint();
        let size = self.size.checked_add(lower as u64).ok_or_else(size_overflow)?;
        self.reserve(size, None)?;
        for item in items {
            self.add(item)?;
        }
        Ok(())
    }

    /// Makes room for `size` items, rehashing if the bucket count is too low
    /// for the load factor. A given `load_factor` replaces the current one.
    pub fn reserve(&mut self, size: u64, load_factor: Option<f64>) -> Result<()> {
        if let Some(load_factor) = load_factor {
            self.set_load_factor(load_factor)?;
        }
        let needed = int::bucket_count_for(size, self.load_factor)
            .ok_or(Error::InvalidLoadFactor(self.load_factor))?;
        if needed > self.header.bucket_count() {
            self.rehash(needed)?;
        }
        Ok(())
    }

    /// Redistributes all items over `bucket_count` buckets.
    ///
    /// Every bucket is materialized first and the backing buffer is dropped;
    /// the set lives in memory afterwards.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidBucketCount`] if `bucket_count` is not a
    /// power of two, exceeds 2^40, or is 0 while the set is not empty.
    pub fn rehash(&mut self, bucket_count: u64) -> Result<()> {
        if !int::is_pow2(bucket_count)
            || bucket_count > int::MAX_BUCKET_COUNT
            || (bucket_count == 0 && self.size > 0)
        {
            return Err(Error::InvalidBucketCount(bucket_count));
        }
        let count =
            usize::try_from(bucket_count).map_err(|_| Error::InvalidBucketCount(bucket_count))?;

        self.resolve_all()?;

        let mask = bucket_count.saturating_sub(1);
        let mut routes = Vec::with_capacity(self.size as usize);
        for cell in &self.buckets {
            for item in cell.get().map(Vec::as_slice).unwrap_or_default() {
                let hash = self.header.hasher().hash_item(item, &self.pickler)?;
                routes.push((hash & mask) as usize);
            }
        }
        self.header.set_bucket_count(bucket_count)?;

        let mut buckets: Vec<Vec<P::Item>> =
            std::iter::repeat_with(Vec::new).take(count).collect();
        let items = std::mem::take(&mut self.buckets)
            .into_iter()
            .flat_map(|cell| cell.into_inner().unwrap_or_default());
        for (item, n) in items.zip(routes) {
            buckets[n].push(item);
        }
        self.buckets = buckets.into_iter().map(OnceCell::from).collect();

        if let Some(buffer) = self.buffer.take() {
            log::debug!("Dropping {} byte backing buffer after rehash", buffer.len());
        }
        self.materialized.set(true);
        log::debug!("Rehashed {} items into {bucket_count} buckets", self.size);
        Ok(())
    }

    /// Writes the set in the massset format to `writer`.
    ///
    /// Every bucket is materialized first and the backing buffer is dropped.
    /// Record length prefixes get the minimal width for the current items,
    /// as in [`MassSetBuilder::build`].
    pub fn to_file<W: Write>(&mut self, writer: W) -> Result<MassSetInfo> {
        self.resolve_all()?;
        self.buffer = None;

        let buckets: Vec<&[P::Item]> = self
            .buckets
            .iter()
            .map(|cell| cell.get().map(Vec::as_slice).unwrap_or_default())
            .collect();
        self.pickler
            .run_estimates(buckets.iter().flat_map(|bucket| bucket.iter()))?;
        let payloads = encode_buckets(&mut self.pickler, &buckets)?;

        self.header.set_pickler(self.pickler.config());
        self.header.set_counts(self.size, self.buckets.len() as u64)?;
        self.header.reset_int_size();
        let info = write_payloads(&mut self.header, BufWriter::new(writer), &payloads)?;

        self.materialized.set(true);
        Ok(info)
    }

    /// Releases the cached buckets and then the backing buffer.
    ///
    /// Consuming the set guarantees this happens once; dropping a `MassSet`
    /// releases its resources in the same order.
    pub fn release(mut self) {
        self.buckets.clear();
        if let Some(buffer) = self.buffer.take() {
            log::debug!(
                "Released massset buffer of {} bytes (mapped: {})",
                buffer.len(),
                buffer.is_mapped()
            );
        }
    }
}

fn size_overflow() -> Error {
    Error::Corrupt("element count overflows".to_string())
}

impl<'a, P: Pickler> IntoIterator for &'a MassSet<P> {
    type Item = Result<&'a P::Item>;
    type IntoIter = MassSetIter<'a, P>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over all items of a [`MassSet`].
///
/// Visits buckets in index order, decoding each bucket on first access.
pub struct MassSetIter<'a, P: Pickler> {
    set: &'a MassSet<P>,
    bucket_index: usize,
    current: std::slice::Iter<'a, P::Item>,
}

impl<'a, P: Pickler> Iterator for MassSetIter<'a, P> {
    type Item = Result<&'a P::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current.next() {
                return Some(Ok(item));
            }

            if self.bucket_index >= self.set.buckets.len() {
                self.set.materialized.set(true);
                return None;
            }

            let n = self.bucket_index;
            self.bucket_index += 1;
            match self.set.get_bucket(n) {
                Ok(bucket) => self.current = bucket.iter(),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
