use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::int;
use crate::{Error, MassSetHasher, PicklerConfig, Result, MAGIC_NUMBER};

/// Format version written by this crate; files with any other version are rejected.
pub const FORMAT_VERSION: u8 = 1;

/// Size of the magic number plus the fixed header struct.
///
/// Layout: magic (8), version (1), int_size (1), padding (2), index_offset
/// (4, native byte order).
pub const FIXED_HEADER_SIZE: usize = 16;

/// Variable-length metadata blob stored after the fixed header.
#[derive(Serialize, Debug)]
struct MassSetMeta<'a> {
    element_count: u64,
    bucket_count: u64,
    hasher: &'a MassSetHasher,
    pickler: &'a PicklerConfig,
}

/// Metadata blob as read from a buffer, before required fields are checked.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct RawMeta {
    element_count: Option<u64>,
    bucket_count: Option<u64>,
    hasher: Option<MassSetHasher>,
    pickler: Option<PicklerConfig>,
}

/// Header of a massset buffer.
///
/// The header starts with a fixed prologue (magic, version, integer size and
/// the offset of the bucket index) followed by a MessagePack metadata blob
/// holding the element count, the bucket count and the hasher and pickler
/// configurations. The blob is zero-padded so that the bucket index is
/// aligned to `int_size`.
#[derive(Serialize, Debug, Clone)]
pub struct MassSetHeader {
    version: u8,
    int_size: u8,
    index_offset: u64,
    element_count: u64,
    bucket_count: u64,
    hasher: MassSetHasher,
    pickler: PicklerConfig,
    #[serde(skip)]
    vardata: Option<Vec<u8>>,
}

impl MassSetHeader {
    /// Creates an empty header; `int_size` stays undetermined until sizes
    /// are calculated.
    pub fn new(hasher: MassSetHasher, pickler: PicklerConfig) -> Self {
        Self {
            version: FORMAT_VERSION,
            int_size: 0,
            index_offset: 0,
            element_count: 0,
            bucket_count: 0,
            hasher,
            pickler,
            vardata: None,
        }
    }

    /// Magic number in host byte order.
    pub fn magic() -> [u8; 8] {
        MAGIC_NUMBER.to_ne_bytes()
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// Width in bytes of bucket index entries, 0 if not yet determined.
    pub fn int_size(&self) -> u8 {
        self.int_size
    }

    /// Absolute offset of the bucket index.
    pub fn index_offset(&self) -> u64 {
        self.index_offset
    }

    pub fn element_count(&self) -> u64 {
        self.element_count
    }

    pub fn bucket_count(&self) -> u64 {
        self.bucket_count
    }

    pub fn hasher(&self) -> &MassSetHasher {
        &self.hasher
    }

    pub fn pickler(&self) -> &PicklerConfig {
        &self.pickler
    }

    /// Mask applied to hash values to select a bucket.
    pub fn bucket_mask(&self) -> u64 {
        self.bucket_count.saturating_sub(1)
    }

    /// Bucket selected by `hash`.
    pub fn bucket_index(&self, hash: u64) -> usize {
        (hash & self.bucket_mask()) as usize
    }

    /// Absolute offset of the first bucket payload.
    pub fn value_offset(&self) -> u64 {
        self.index_offset + self.bucket_count * self.int_size as u64
    }

    /// Sets the element count and derives the bucket count from `load_factor`.
    pub fn set_element_count(&mut self, count: u64, load_factor: f64) -> Result<()> {
        check_load_factor(load_factor)?;
        let bucket_count = int::bucket_count_for(count, load_factor)
            .ok_or(Error::InvalidLoadFactor(load_factor))?;
        self.set_bucket_count(bucket_count)?;
        self.element_count = count;
        Ok(())
    }

    /// Sets the bucket count, which must be 0 or a power of two no larger
    /// than 2^40.
    pub fn set_bucket_count(&mut self, count: u64) -> Result<()> {
        if !int::is_pow2(count) || count > int::MAX_BUCKET_COUNT {
            return Err(Error::InvalidBucketCount(count));
        }
        self.bucket_count = count;
        self.vardata = None;
        Ok(())
    }

    pub(crate) fn set_counts(&mut self, element_count: u64, bucket_count: u64) -> Result<()> {
        self.set_bucket_count(bucket_count)?;
        self.element_count = element_count;
        Ok(())
    }

    /// Replaces the pickler configuration recorded in the metadata blob.
    pub fn set_pickler(&mut self, pickler: PicklerConfig) {
        self.pickler = pickler;
        self.vardata = None;
    }

    /// Forgets the integer size so the next size calculation derives it
    /// from the payload again.
    pub fn reset_int_size(&mut self) {
        self.int_size = 0;
    }

    /// Encodes the metadata blob and derives `int_size` and `index_offset`.
    ///
    /// The blob is re-encoded when `force` is set or when the header changed
    /// since the last call. An undetermined `int_size` is derived from the
    /// total length of `payloads`, if given, and is at least 1.
    pub fn calculate_sizes(&mut self, payloads: Option<&[Vec<u8>]>, force: bool) -> Result<()> {
        if force || self.vardata.is_none() {
            self.vardata = Some(self.encode_meta()?);
        }

        if self.int_size == 0 {
            if let Some(payloads) = payloads {
                let total: u64 = payloads.iter().map(|p| p.len() as u64).sum();
                self.int_size = int::min_int_size(total);
            }
        }
        self.int_size = self.int_size.max(1);

        let vardata_length = self.vardata.as_ref().map_or(0, Vec::len);
        self.index_offset = int::pad_to_multiple(
            self.int_size as u64,
            (FIXED_HEADER_SIZE + vardata_length) as u64,
        );
        Ok(())
    }

    fn encode_meta(&self) -> Result<Vec<u8>> {
        let meta = MassSetMeta {
            element_count: self.element_count,
            bucket_count: self.bucket_count,
            hasher: &self.hasher,
            pickler: &self.pickler,
        };
        rmp_serde::to_vec_named(&meta)
            .map_err(|e| Error::InvalidMetadata(format!("failed to serialize metadata: {e}")))
    }

    /// Serializes the header, metadata blob and alignment padding.
    pub fn to_bytes(&mut self, payloads: Option<&[Vec<u8>]>) -> Result<Vec<u8>> {
        self.calculate_sizes(payloads, false)?;
        let index_offset = u32::try_from(self.index_offset).map_err(|_| {
            Error::InvalidMetadata(format!("index offset {} exceeds 4 bytes", self.index_offset))
        })?;

        let mut buf = Vec::with_capacity(self.index_offset as usize);
        buf.extend_from_slice(&Self::magic());
        buf.push(self.version);
        buf.push(self.int_size);
        buf.extend_from_slice(&[0u8; 2]);
        buf.extend_from_slice(&index_offset.to_ne_bytes());
        buf.extend_from_slice(self.vardata.as_deref().unwrap_or_default());
        buf.resize(self.index_offset as usize, 0);
        Ok(buf)
    }

    /// Writes the header, the bucket index and the bucket payloads.
    ///
    /// Returns the number of bytes written.
    pub fn to_file<W: Write>(&mut self, writer: &mut W, payloads: &[Vec<u8>]) -> Result<u64> {
        if payloads.len() as u64 != self.bucket_count {
            return Err(Error::InvalidBucketCount(payloads.len() as u64));
        }

        let header = self.to_bytes(Some(payloads))?;
        let total: u64 = payloads.iter().map(|p| p.len() as u64).sum();
        if total > int::max_value(self.int_size) {
            return Err(Error::InvalidIntSize(self.int_size));
        }

        let mut index = Vec::with_capacity(payloads.len() * self.int_size as usize);
        let mut offset = 0u64;
        for payload in payloads {
            int::write_uint(&mut index, offset, self.int_size);
            offset += payload.len() as u64;
        }

        writer.write_all(&header)?;
        writer.write_all(&index)?;
        for payload in payloads {
            writer.write_all(payload)?;
        }
        Ok((header.len() + index.len()) as u64 + total)
    }

    /// Parses and validates the header at the start of `buf`.
    ///
    /// # Errors
    ///
    /// Returns a format error naming the violated invariant: magic number,
    /// version, integer size, a missing metadata field, or offsets that
    /// point past the end of `buf`.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < FIXED_HEADER_SIZE {
            return Err(Error::Corrupt(format!(
                "buffer of {} bytes is shorter than the {FIXED_HEADER_SIZE}-byte header",
                buf.len()
            )));
        }

        let expected = Self::magic();
        let mut found = [0u8; 8];
        found.copy_from_slice(&buf[..8]);
        if found != expected {
            return Err(Error::InvalidMagic { found, expected });
        }

        let version = buf[8];
        if version != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion {
                found: version,
                expected: FORMAT_VERSION,
            });
        }

        let int_size = buf[9];
        if !int::is_valid_int_size(int_size) {
            return Err(Error::InvalidIntSize(int_size));
        }

        let index_offset = int::read_uint(&buf[12..16]);
        if index_offset < FIXED_HEADER_SIZE as u64 || index_offset > buf.len() as u64 {
            return Err(Error::Corrupt(format!(
                "index offset {index_offset} outside of buffer of {} bytes",
                buf.len()
            )));
        }

        let raw: RawMeta = rmp_serde::from_slice(&buf[FIXED_HEADER_SIZE..index_offset as usize])
            .map_err(|e| Error::InvalidMetadata(format!("failed to deserialize metadata: {e}")))?;
        let element_count = raw.element_count.ok_or(Error::MissingMetadata("element_count"))?;
        let bucket_count = raw.bucket_count.ok_or(Error::MissingMetadata("bucket_count"))?;
        let hasher = raw.hasher.ok_or(Error::MissingMetadata("hasher"))?;
        let pickler = raw.pickler.ok_or(Error::MissingMetadata("pickler"))?;

        if !int::is_pow2(bucket_count) {
            return Err(Error::InvalidMetadata(format!(
                "bucket count {bucket_count} is not a power of two"
            )));
        }

        let header = Self {
            version,
            int_size,
            index_offset,
            element_count,
            bucket_count,
            hasher,
            pickler,
            vardata: None,
        };

        let value_offset = bucket_count
            .checked_mul(int_size as u64)
            .and_then(|index_length| index_offset.checked_add(index_length));
        match value_offset {
            Some(value_offset) if value_offset <= buf.len() as u64 => Ok(header),
            _ => Err(Error::Corrupt(format!(
                "bucket index of {bucket_count} entries extends past end of buffer"
            ))),
        }
    }
}

pub(crate) fn check_load_factor(load_factor: f64) -> Result<f64> {
    if load_factor.is_finite() && load_factor > 0.0 {
        Ok(load_factor)
    } else {
        Err(Error::InvalidLoadFactor(load_factor))
    }
}

/// Summary returned after writing a massset.
#[derive(Debug, Serialize, Clone)]
pub struct MassSetInfo {
    /// Total number of bytes written.
    pub file_length: u64,
    /// Number of distinct items serialized.
    pub element_count: u64,
    /// Number of buckets allocated.
    pub bucket_count: u64,
    /// Number of buckets that ended up empty.
    pub empty_buckets: u64,
    /// Width of bucket index entries.
    pub int_size: u8,
    /// Width of record length prefixes chosen for the pickler.
    pub pickler_int_size: u8,
    /// Offset of the bucket index.
    pub index_offset: u64,
    /// Offset of the first bucket payload.
    pub value_offset: u64,
    /// Hash function used for routing.
    pub hasher: MassSetHasher,
}

impl MassSetInfo {
    pub(crate) fn new(header: &MassSetHeader, payloads: &[Vec<u8>], file_length: u64) -> Self {
        Self {
            file_length,
            element_count: header.element_count(),
            bucket_count: header.bucket_count(),
            empty_buckets: payloads.iter().filter(|p| p.is_empty()).count() as u64,
            int_size: header.int_size(),
            pickler_int_size: header.pickler().int_size(),
            index_offset: header.index_offset(),
            value_offset: header.value_offset(),
            hasher: header.hasher().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> MassSetHeader {
        MassSetHeader::new(
            MassSetHasher::default(),
            PicklerConfig::Bytes { int_size: 1 },
        )
    }

    /// Builds a buffer with a valid prologue around an arbitrary metadata blob.
    fn raw_buffer(int_size: u8, blob: &[u8]) -> Vec<u8> {
        let index_offset = (FIXED_HEADER_SIZE + blob.len()) as u32;
        let mut buf = Vec::new();
        buf.extend_from_slice(&MassSetHeader::magic());
        buf.push(FORMAT_VERSION);
        buf.push(int_size);
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&index_offset.to_ne_bytes());
        buf.extend_from_slice(blob);
        buf
    }

    #[test]
    fn test_magic_byte_order() {
        let magic = MassSetHeader::magic();
        if cfg!(target_endian = "little") {
            assert_eq!(&magic, b"hashset ");
        } else {
            assert_eq!(&magic, b" teshsah");
        }
    }

    #[test]
    fn test_set_element_count() {
        let mut h = header();
        h.set_element_count(3, 0.75).unwrap();
        assert_eq!(h.bucket_count(), 4);
        assert_eq!(h.bucket_mask(), 3);

        h.set_element_count(5, 1.0).unwrap();
        assert_eq!(h.bucket_count(), 8);

        h.set_element_count(0, 0.75).unwrap();
        assert_eq!(h.bucket_count(), 0);
        assert_eq!(h.bucket_mask(), 0);

        assert!(matches!(
            h.set_element_count(1, 0.0),
            Err(Error::InvalidLoadFactor(_))
        ));
        assert!(matches!(
            h.set_element_count(1, f64::NAN),
            Err(Error::InvalidLoadFactor(_))
        ));
        assert!(matches!(
            h.set_bucket_count(6),
            Err(Error::InvalidBucketCount(6))
        ));
        assert!(matches!(
            h.set_bucket_count(1 << 63),
            Err(Error::InvalidBucketCount(_))
        ));

        // a tiny load factor must not overflow the bucket count
        assert!(matches!(
            h.set_element_count(1, 1e-19),
            Err(Error::InvalidLoadFactor(_))
        ));
        assert_eq!(h.bucket_count(), 0);
    }

    #[test]
    fn test_calculate_sizes() {
        let mut h = header();
        h.set_element_count(3, 1.0).unwrap();
        let payloads = vec![vec![0u8; 200], vec![], vec![0u8; 100], vec![]];
        h.calculate_sizes(Some(payloads.as_slice()), false).unwrap();
        assert_eq!(h.int_size(), 2);
        assert_eq!(h.index_offset() % 2, 0);
        assert!(h.index_offset() >= FIXED_HEADER_SIZE as u64);
        assert_eq!(h.value_offset(), h.index_offset() + 8);

        // a determined size is kept
        h.calculate_sizes(Some(&[vec![0u8; 70_000]][..]), false).unwrap();
        assert_eq!(h.int_size(), 2);
        h.reset_int_size();
        h.calculate_sizes(Some(&[vec![0u8; 70_000]][..]), true).unwrap();
        assert_eq!(h.int_size(), 4);
        assert_eq!(h.index_offset() % 4, 0);
    }

    #[test]
    fn test_round_trip() {
        let mut h = MassSetHeader::new(
            MassSetHasher::Foldhash { seed: 42 },
            PicklerConfig::Text {
                int_size: 2,
                encoding: crate::TextEncoding::Utf16Le,
            },
        );
        h.set_element_count(10, 0.5).unwrap();
        let payloads = vec![vec![7u8; 3]; 32];

        let mut buf = Vec::new();
        let written = h.to_file(&mut buf, &payloads).unwrap();
        assert_eq!(written, buf.len() as u64);
        assert_eq!(buf.len() as u64, h.value_offset() + 96);

        let parsed = MassSetHeader::from_bytes(&buf).unwrap();
        assert_eq!(parsed.element_count(), 10);
        assert_eq!(parsed.bucket_count(), 32);
        assert_eq!(parsed.int_size(), 1);
        assert_eq!(parsed.index_offset(), h.index_offset());
        assert_eq!(parsed.hasher(), h.hasher());
        assert_eq!(parsed.pickler(), h.pickler());

        let index = &buf[h.index_offset() as usize..h.value_offset() as usize];
        let offsets: Vec<u8> = index.to_vec();
        assert_eq!(offsets[..4], [0, 3, 6, 9]);
    }

    #[test]
    fn test_empty_header() {
        let mut h = header();
        h.set_element_count(0, 0.75).unwrap();
        let mut buf = Vec::new();
        h.to_file(&mut buf, &[]).unwrap();
        assert_eq!(h.int_size(), 1);
        assert_eq!(buf.len() as u64, h.index_offset());
        assert_eq!(h.value_offset(), h.index_offset());

        let parsed = MassSetHeader::from_bytes(&buf).unwrap();
        assert_eq!(parsed.bucket_count(), 0);
        assert_eq!(parsed.element_count(), 0);
    }

    #[test]
    fn test_invalid_prologue() {
        let mut h = header();
        h.set_element_count(1, 1.0).unwrap();
        let mut buf = Vec::new();
        h.to_file(&mut buf, &[b"x".to_vec()]).unwrap();

        let mut bad = buf.clone();
        bad[0] ^= 0xff;
        assert!(matches!(
            MassSetHeader::from_bytes(&bad),
            Err(Error::InvalidMagic { .. })
        ));

        let mut bad = buf.clone();
        bad[8] = FORMAT_VERSION + 1;
        assert!(matches!(
            MassSetHeader::from_bytes(&bad),
            Err(Error::UnsupportedVersion { found, .. }) if found == FORMAT_VERSION + 1
        ));

        for int_size in [0, 3, 16] {
            let mut bad = buf.clone();
            bad[9] = int_size;
            assert!(matches!(
                MassSetHeader::from_bytes(&bad),
                Err(Error::InvalidIntSize(s)) if s == int_size
            ));
        }

        assert!(matches!(
            MassSetHeader::from_bytes(&buf[..10]),
            Err(Error::Corrupt(_))
        ));
        assert!(matches!(
            MassSetHeader::from_bytes(&buf[..h.index_offset() as usize]),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_missing_metadata() {
        #[derive(Serialize)]
        struct Partial {
            element_count: u64,
            bucket_count: u64,
            pickler: PicklerConfig,
        }

        let blob = rmp_serde::to_vec_named(&Partial {
            element_count: 0,
            bucket_count: 0,
            pickler: PicklerConfig::Bytes { int_size: 1 },
        })
        .unwrap();
        let err = MassSetHeader::from_bytes(&raw_buffer(1, &blob)).unwrap_err();
        assert!(matches!(err, Error::MissingMetadata("hasher")));
        assert!(err.is_format_error());
        assert!(err.to_string().contains("hasher"));

        let blob = rmp_serde::to_vec_named(&serde_json::json!({ "hasher": { "name": "md4" } }))
            .unwrap();
        let err = MassSetHeader::from_bytes(&raw_buffer(1, &blob)).unwrap_err();
        assert!(matches!(err, Error::InvalidMetadata(_)));
    }

    #[test]
    fn test_bucket_count_not_pow2() {
        let mut h = header();
        h.set_element_count(1, 1.0).unwrap();
        h.bucket_count = 3;
        h.vardata = None;
        let mut buf = h.to_bytes(None).unwrap();
        buf.extend_from_slice(&[0u8; 3]);
        assert!(matches!(
            MassSetHeader::from_bytes(&buf),
            Err(Error::InvalidMetadata(_))
        ));
    }
}
