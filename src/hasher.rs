use std::hash::BuildHasher;

use foldhash::fast::FixedState;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, Pickler, Result};

/// Digest algorithms available to [`MassSetHasher::Digest`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Md5,
    Sha256,
    Blake3,
}

impl DigestAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }
}

/// Hash function used to route items into buckets.
///
/// The hasher is persisted in the metadata blob of every massset file by name
/// and parameters, so a file is always probed with exactly the function it
/// was built with. Hash values are only used for bucket routing; membership
/// within a bucket is decided by item equality.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum MassSetHasher {
    /// General-purpose digest, reinterpreted as a native byte order integer.
    Digest { algorithm: DigestAlgorithm },
    /// XXH3 64-bit hash.
    Xxh3 { seed: u64 },
    /// foldhash with a fixed seed.
    Foldhash { seed: u64 },
}

impl Default for MassSetHasher {
    fn default() -> Self {
        MassSetHasher::Xxh3 { seed: 0 }
    }
}

impl MassSetHasher {
    /// Names accepted by [`from_name`](Self::from_name).
    pub const NAMES: &'static [&'static str] = &["xxh3", "foldhash", "md5", "sha256", "blake3"];

    /// Selects a hasher by name; `seed` is ignored by digest algorithms.
    pub fn from_name(name: &str, seed: u64) -> Result<Self> {
        let hasher = match name {
            "xxh3" => Self::Xxh3 { seed },
            "foldhash" => Self::Foldhash { seed },
            "md5" => Self::Digest {
                algorithm: DigestAlgorithm::Md5,
            },
            "sha256" => Self::Digest {
                algorithm: DigestAlgorithm::Sha256,
            },
            "blake3" => Self::Digest {
                algorithm: DigestAlgorithm::Blake3,
            },
            _ => {
                return Err(Error::InvalidMetadata(format!(
                    "unsupported hash type: {name}"
                )))
            }
        };
        Ok(hasher)
    }

    /// Name of the hash function.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Digest { algorithm } => algorithm.name(),
            Self::Xxh3 { .. } => "xxh3",
            Self::Foldhash { .. } => "foldhash",
        }
    }

    /// Hashes a byte string.
    pub fn hash_bytes(&self, data: &[u8]) -> u64 {
        match self {
            Self::Digest { algorithm } => match algorithm {
                DigestAlgorithm::Md5 => fold_digest(&Md5::digest(data)),
                DigestAlgorithm::Sha256 => fold_digest(&Sha256::digest(data)),
                DigestAlgorithm::Blake3 => fold_digest(blake3::hash(data).as_bytes()),
            },
            Self::Xxh3 { seed } => xxhash_rust::xxh3::xxh3_64_with_seed(data, *seed),
            Self::Foldhash { seed } => FixedState::with_seed(*seed).hash_one(data),
        }
    }

    /// Hashes an item through the byte form produced by `pickler`.
    pub fn hash_item<P: Pickler>(&self, item: &P::Item, pickler: &P) -> Result<u64> {
        let bytes = pickler.item_bytes(item)?;
        Ok(self.hash_bytes(&bytes))
    }
}

/// Keeps the least significant 64 bits of a digest read as a native byte
/// order integer.
fn fold_digest(digest: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    if cfg!(target_endian = "little") {
        bytes.copy_from_slice(&digest[..8]);
    } else {
        bytes.copy_from_slice(&digest[digest.len() - 8..]);
    }
    u64::from_ne_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_hasher() {
        let hasher = MassSetHasher::default();
        assert_eq!(hasher.name(), "xxh3");
        assert_eq!(
            hasher.hash_bytes(b"apple"),
            xxhash_rust::xxh3::xxh3_64(b"apple")
        );
    }

    #[test]
    fn test_from_name() {
        for name in MassSetHasher::NAMES {
            let hasher = MassSetHasher::from_name(name, 7).unwrap();
            assert_eq!(hasher.name(), *name);
            assert_eq!(hasher.hash_bytes(b"steins"), hasher.hash_bytes(b"steins"));
        }
        MassSetHasher::from_name("crc32", 0).unwrap_err();
    }

    #[test]
    fn test_seeds_differ() {
        let a = MassSetHasher::Foldhash { seed: 1 };
        let b = MassSetHasher::Foldhash { seed: 2 };
        assert_ne!(a.hash_bytes(b"gate"), b.hash_bytes(b"gate"));
    }

    #[test]
    fn test_digest_is_native_order() {
        let hasher = MassSetHasher::Digest {
            algorithm: DigestAlgorithm::Md5,
        };
        let digest = Md5::digest(b"hashset");
        let expected = if cfg!(target_endian = "little") {
            u64::from_le_bytes(digest[..8].try_into().unwrap())
        } else {
            u64::from_be_bytes(digest[8..].try_into().unwrap())
        };
        assert_eq!(hasher.hash_bytes(b"hashset"), expected);
    }

    #[test]
    fn test_serialized_by_name() {
        let hasher = MassSetHasher::Digest {
            algorithm: DigestAlgorithm::Sha256,
        };
        let bytes = rmp_serde::to_vec_named(&hasher).unwrap();
        let decoded: MassSetHasher = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, hasher);

        let json = serde_json::to_value(MassSetHasher::Xxh3 { seed: 3 }).unwrap();
        assert_eq!(json, serde_json::json!({ "name": "xxh3", "seed": 3 }));
    }
}
