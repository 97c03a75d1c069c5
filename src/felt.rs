// Cairo field element as it appears in a relocated memory dump
// Prime: p = 2^251 + 17 * 2^192 + 1

use num_bigint::BigUint;
use num_traits::One;
use std::sync::LazyLock;

/// Width in bytes of one encoded value in a memory dump.
pub const FELT_BYTES: usize = 32;

static STARK_PRIME: LazyLock<BigUint> = LazyLock::new(|| {
    (BigUint::one() << 251u32) + (BigUint::from(17u32) << 192u32) + BigUint::one()
});

/// A memory value read back from an engine.
///
/// Values are kept exactly as the engine wrote them; nothing is reduced, so a
/// non-canonical value emitted by one engine still compares unequal to the
/// canonical value emitted by the other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Felt {
    value: BigUint,
}

impl Felt {
    /// The Stark252 prime.
    pub fn prime() -> &'static BigUint {
        &STARK_PRIME
    }

    /// True when the value lies in `[0, p)`.
    pub fn is_canonical(&self) -> bool {
        self.value < *STARK_PRIME
    }

    /// Little-endian, zero padded to [`FELT_BYTES`].
    pub fn to_le_bytes(&self) -> [u8; FELT_BYTES] {
        let mut out = [0u8; FELT_BYTES];
        let bytes = self.value.to_bytes_le();
        let n = bytes.len().min(FELT_BYTES);
        out[..n].copy_from_slice(&bytes[..n]);
        out
    }

    /// Decodes one little-endian value. No reduction is applied.
    pub fn from_le_bytes(bytes: &[u8; FELT_BYTES]) -> Self {
        Self {
            value: BigUint::from_bytes_le(bytes),
        }
    }
}

impl From<u128> for Felt {
    fn from(value: u128) -> Self {
        Self {
            value: BigUint::from(value),
        }
    }
}

impl From<u64> for Felt {
    fn from(value: u64) -> Self {
        Self {
            value: BigUint::from(value),
        }
    }
}

impl From<BigUint> for Felt {
    fn from(value: BigUint) -> Self {
        Self { value }
    }
}

impl std::fmt::Display for Felt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}
