//! Key hashing for table buckets
//!
//! Keys are hashed into a 128-bit `KeyHash`. The hash must be deterministic
//! across runs and processes, so `DefaultHasher` is never used.

use super::KeyHash;

/// Hash algorithm used to derive bucket hashes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    /// xxHash3, 128-bit variant (default)
    #[default]
    XXHash3,
    /// Two seeded xxHash64 passes concatenated
    XXHash64,
}

impl HashAlgorithm {
    /// Get the algorithm name
    pub fn name(&self) -> &'static str {
        match self {
            Self::XXHash3 => "XXHash3",
            Self::XXHash64 => "XXHash64",
        }
    }

    /// Parse an algorithm from its configuration name
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "xxhash3" | "xxh3" => Some(Self::XXHash3),
            "xxhash64" | "xxh64" => Some(Self::XXHash64),
            _ => None,
        }
    }

    /// Hash raw key bytes
    pub fn hash128(&self, bytes: &[u8]) -> u128 {
        match self {
            Self::XXHash3 => xxhash_rust::xxh3::xxh3_128(bytes),
            Self::XXHash64 => {
                let high = xxhash_rust::xxh64::xxh64(bytes, XXH64_HIGH_SEED) as u128;
                let low = xxhash_rust::xxh64::xxh64(bytes, XXH64_LOW_SEED) as u128;
                (high << 64) | low
            }
        }
    }
}

const XXH64_HIGH_SEED: u64 = 0x9E37_79B9_7F4A_7C15;
const XXH64_LOW_SEED: u64 = 0;

/// Maps table keys to bucket hashes
///
/// Implementations must be pure and deterministic. Distinct keys may collide;
/// collisions are resolved by the backpointer chain.
pub trait KeyHasher: Send + Sync + 'static {
    /// Hash a key
    fn hash(&self, key: &[u8]) -> KeyHash;
}

/// Default xxHash-based key hasher
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKeyHasher {
    algorithm: HashAlgorithm,
}

impl DefaultKeyHasher {
    /// Create a hasher for the given algorithm
    pub const fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Algorithm used by this hasher
    pub const fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }
}

impl KeyHasher for DefaultKeyHasher {
    #[inline]
    fn hash(&self, key: &[u8]) -> KeyHash {
        KeyHash::new(self.algorithm.hash128(key))
    }
}

impl<F> KeyHasher for F
where
    F: Fn(&[u8]) -> KeyHash + Send + Sync + 'static,
{
    #[inline]
    fn hash(&self, key: &[u8]) -> KeyHash {
        self(key)
    }
}
