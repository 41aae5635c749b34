//! Read-optimized hash sets persisted to memory-mappable massset files.
//!
//! The `massset` crate builds hash sets into a compact binary layout and
//! opens them again without deserializing the whole file. A massset file
//! starts with a small header and a MessagePack metadata blob, followed by a
//! bucket index of fixed-width offsets and the encoded bucket payloads.
//! Probing an opened set hashes the item, looks up a single bucket through
//! the index and decodes only that bucket.
//!
//! Items are turned into bytes by a [`Pickler`]: raw bytes, text in a chosen
//! encoding, or any serde type encoded as MessagePack. Routing hashes are
//! computed by a [`MassSetHasher`] that is recorded in the file, so a set can
//! be reopened by any process that knows the item type.
//!
//! Typical usage writes an iterator with [`MassSetBuilder`] and opens the
//! result with [`MassSet`]. Opened sets can be mutated in memory and written
//! back with [`MassSet::to_file`].
//!
//! ```
//! use massset::{MassSet, MassSetBuilder, TextPickler};
//!
//! # fn main() -> massset::Result<()> {
//! let fruits = ["apple", "banana", "cherry"].map(String::from);
//! let mut data = Vec::new();
//! MassSetBuilder::default().build(&mut data, TextPickler::default(), fruits)?;
//!
//! let mut set = MassSet::<TextPickler>::from_bytes(data)?;
//! assert!(set.contains(&"banana".to_string())?);
//! assert!(!set.contains(&"durian".to_string())?);
//!
//! set.add("durian".to_string())?;
//! assert_eq!(set.len(), 4);
//! # Ok(())
//! # }
//! ```
const MAGIC_NUMBER: u64 = u64::from_le_bytes(*b"hashset ");

mod int;

mod error;
pub use error::{Error, PickleError, Result};

mod hasher;
pub use hasher::{DigestAlgorithm, MassSetHasher};

pub mod pickler;
pub use pickler::{
    BytesPickler, ObjectPickler, Pickler, PicklerConfig, Records, TextEncoding, TextPickler,
    DEFAULT_PICKLER_INT_SIZE,
};

mod meta;
pub use meta::{MassSetHeader, MassSetInfo, FIXED_HEADER_SIZE, FORMAT_VERSION};

mod index;
pub use index::BucketIndex;

mod buffer;
pub use buffer::MassSetBuffer;

mod massset;
pub use massset::{MassSet, MassSetIter, DEFAULT_LOAD_FACTOR};

mod builder;
pub use builder::MassSetBuilder;
