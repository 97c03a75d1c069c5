//! Randomized field element inputs.
//!
//! Values are drawn from a fixed, skewed distribution over `[0, 2^128)`, the
//! range accepted by the range-check builtin. Most mass sits in the upper half
//! of the range, where overflow and limb-carry bugs live, with the rest split
//! between tiny values and the whole nonzero range.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::program::ast::PlaceholderId;

/// Bits of `RANGE_CHECK_MAX = 2^128`. Every `u128` lies below it.
pub const RANGE_CHECK_MAX_BITS: u32 = 128;

/// `RANGE_CHECK_MAX / 2`.
pub const RANGE_CHECK_HALF: u128 = 1 << (RANGE_CHECK_MAX_BITS - 1);

/// One row of the value distribution. Bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    pub name: &'static str,
    pub weight: u32,
    pub low: u128,
    pub high: u128,
}

/// Input value law: 70% `[2^127, 2^128)`, 15% `[0, 10)`, 15% `[1, 2^128)`.
pub const VALUE_DISTRIBUTION: [Bucket; 3] = [
    Bucket {
        name: "upper_half",
        weight: 70,
        low: RANGE_CHECK_HALF,
        high: u128::MAX,
    },
    Bucket {
        name: "small",
        weight: 15,
        low: 0,
        high: 9,
    },
    Bucket {
        name: "nonzero",
        weight: 15,
        low: 1,
        high: u128::MAX,
    },
];

/// Sum of the weights of `table`.
pub fn total_weight(table: &[Bucket]) -> u32 {
    table.iter().map(|b| b.weight).sum()
}

/// Index of the bucket that owns `roll`, for `roll` in `[0, total_weight)`.
pub fn bucket_for_roll(table: &[Bucket], roll: u32) -> Option<usize> {
    let mut upper = 0;
    for (index, bucket) in table.iter().enumerate() {
        upper += bucket.weight;
        if roll < upper {
            return Some(index);
        }
    }
    None
}

/// Value bound to one placeholder for one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratedValue {
    pub placeholder: PlaceholderId,
    pub value: u128,
}

/// Draws placeholder values according to a bucket table.
pub struct ValueGenerator<R> {
    rng: R,
    table: &'static [Bucket],
}

impl ValueGenerator<ChaCha8Rng> {
    /// Generator whose whole sequence of draws is fixed by `seed`.
    pub fn from_seed(seed: u64) -> Self {
        Self::new(ChaCha8Rng::seed_from_u64(seed))
    }
}

impl<R: Rng> ValueGenerator<R> {
    pub fn new(rng: R) -> Self {
        Self::with_table(rng, &VALUE_DISTRIBUTION)
    }

    pub fn with_table(rng: R, table: &'static [Bucket]) -> Self {
        assert!(total_weight(table) > 0, "value table needs a positive weight");
        Self { rng, table }
    }

    /// Draws one value and reports which bucket produced it.
    pub fn draw_with_bucket(&mut self) -> (usize, u128) {
        let roll = self.rng.gen_range(0..total_weight(self.table));
        // roll < total weight, so a bucket always owns it
        let index = bucket_for_roll(self.table, roll).unwrap_or(self.table.len() - 1);
        let bucket = &self.table[index];
        (index, self.rng.gen_range(bucket.low..=bucket.high))
    }

    pub fn draw(&mut self) -> u128 {
        self.draw_with_bucket().1
    }

    /// One independent draw per placeholder, in the given order.
    pub fn generate(&mut self, placeholders: &[PlaceholderId]) -> Vec<GeneratedValue> {
        placeholders
            .iter()
            .map(|&placeholder| GeneratedValue {
                placeholder,
                value: self.draw(),
            })
            .collect()
    }
}
