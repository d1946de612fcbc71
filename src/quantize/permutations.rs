//! Local-search bit-rate permutation tables
//!
//! The local-space priming walks every (rotation, translation[, scale])
//! bit-rate combination in ascending total transform size, so the first
//! combination under the error threshold is also the smallest. The tables are
//! built once per process; within one transform size the order is
//! lexicographic on the raw indices, which pins the tie-break between
//! equally-sized candidates.

use std::sync::OnceLock;

use crate::formats::{num_bits_at_bit_rate, NUM_BIT_RATES};

static WITH_SCALE: OnceLock<Vec<[u8; 3]>> = OnceLock::new();
static NO_SCALE: OnceLock<Vec<[u8; 2]>> = OnceLock::new();

/// Every (rotation, translation, scale) combination, size-sorted
pub(crate) fn local_bit_rate_permutations() -> &'static [[u8; 3]] {
    WITH_SCALE.get_or_init(|| {
        let n = NUM_BIT_RATES as usize;
        let mut permutations = Vec::with_capacity(n * n * n);
        for rotation in 0..NUM_BIT_RATES {
            for translation in 0..NUM_BIT_RATES {
                for scale in 0..NUM_BIT_RATES {
                    permutations.push([rotation, translation, scale]);
                }
            }
        }
        permutations.sort_by_key(|&[rotation, translation, scale]| {
            let size = num_bits_at_bit_rate(rotation)
                + num_bits_at_bit_rate(translation)
                + num_bits_at_bit_rate(scale);
            (size, rotation, translation, scale)
        });
        permutations
    })
}

/// Every (rotation, translation) combination, size-sorted
pub(crate) fn local_bit_rate_permutations_no_scale() -> &'static [[u8; 2]] {
    NO_SCALE.get_or_init(|| {
        let n = NUM_BIT_RATES as usize;
        let mut permutations = Vec::with_capacity(n * n);
        for rotation in 0..NUM_BIT_RATES {
            for translation in 0..NUM_BIT_RATES {
                permutations.push([rotation, translation]);
            }
        }
        permutations.sort_by_key(|&[rotation, translation]| {
            let size = num_bits_at_bit_rate(rotation) + num_bits_at_bit_rate(translation);
            (size, rotation, translation)
        });
        permutations
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::num_bits_at_bit_rate;

    #[test]
    fn test_tables_are_complete() {
        let n = NUM_BIT_RATES as usize;
        assert_eq!(local_bit_rate_permutations().len(), n * n * n);
        assert_eq!(local_bit_rate_permutations_no_scale().len(), n * n);
    }

    #[test]
    fn test_sizes_ascend() {
        let mut prev_size = 0;
        for &[rotation, translation] in local_bit_rate_permutations_no_scale() {
            let size = num_bits_at_bit_rate(rotation) + num_bits_at_bit_rate(translation);
            assert!(size >= prev_size);
            prev_size = size;
        }
    }

    #[test]
    fn test_ordering_is_pinned() {
        // The first entries: zero size, then the smallest single-track widths.
        // Equal sizes resolve lexicographically on the indices.
        let table = local_bit_rate_permutations_no_scale();
        assert_eq!(table[0], [0, 0]);
        assert_eq!(table[1], [0, 1]);
        assert_eq!(table[2], [1, 0]);
    }
}
