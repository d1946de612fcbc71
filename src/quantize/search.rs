//! Variable bit-rate search
//!
//! Two phases per segment. Local-space priming walks size-sorted bit-rate
//! permutations per bone until the local error meets the bone's threshold;
//! if every ancestor were lossless, the local error would equal the object
//! error, and lossy ancestors only push the required precision up, so the
//! primed rates are a lower bound. Object-space refinement then walks the
//! skeleton root to leaves, raising bit rates along each failing bone's
//! chain by ranked increment permutations until the object-space error meets
//! the threshold, with an indiscriminate saturation fallback and a
//! last-resort maxing pass when even that fails.

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::formats::{
    num_bits_at_bit_rate, BoneBitRate, RotationFormat, HIGHEST_BIT_RATE, INVALID_BIT_RATE,
    LOWEST_BIT_RATE,
};
use crate::quantize::context::{QuantizationContext, StopCondition};
use crate::quantize::permutations::{
    local_bit_rate_permutations, local_bit_rate_permutations_no_scale,
};
use crate::settings::CompressionLevel;

/// Seed the per-bone bit rates from the track states
///
/// Constant and default tracks are excluded outright. Variable tracks start
/// at the constant bit rate when their segment channel is normalized (the
/// track may collapse to a single sample) and at the lowest bit rate
/// otherwise.
fn initialize_bone_bit_rates(context: &mut QuantizationContext<'_>) {
    let segment = context.segment();
    let is_rotation_variable = context.settings.rotation_format.is_variable();
    let is_translation_variable = context.settings.translation_format.is_variable();
    let is_scale_variable = context.has_scale && context.settings.scale_format.is_variable();

    for (bone_index, bone_stream) in segment.bone_streams.iter().enumerate() {
        let bit_rates = &mut context.bit_rate_per_bone[bone_index];

        bit_rates.rotation = if is_rotation_variable && !bone_stream.is_rotation_constant {
            if segment.are_rotations_normalized {
                0
            } else {
                LOWEST_BIT_RATE
            }
        } else {
            INVALID_BIT_RATE
        };

        bit_rates.translation = if is_translation_variable && !bone_stream.is_translation_constant
        {
            if segment.are_translations_normalized {
                0
            } else {
                LOWEST_BIT_RATE
            }
        } else {
            INVALID_BIT_RATE
        };

        bit_rates.scale = if is_scale_variable && !bone_stream.is_scale_constant {
            if segment.are_scales_normalized {
                0
            } else {
                LOWEST_BIT_RATE
            }
        } else {
            INVALID_BIT_RATE
        };
    }
}

/// Whether a candidate rate is compatible with a channel's initial state
///
/// Channels starting at the lowest bit rate cannot drop to the constant
/// rate, and invalid channels only match the zero-rate table rows (so each
/// remaining combination is visited exactly once).
#[inline]
fn is_candidate_compatible(initial: u8, candidate: u8) -> bool {
    if initial == LOWEST_BIT_RATE {
        candidate != 0
    } else if initial == INVALID_BIT_RATE {
        candidate == 0
    } else {
        true
    }
}

/// Per-bone local-space priming over the size-sorted permutation tables
fn calculate_local_space_bit_rates(context: &mut QuantizationContext<'_>) {
    let num_bones = context.num_bones;

    for bone_index in 0..num_bones as u16 {
        let threshold = context.precision(bone_index);
        let bone_bit_rates = context.bit_rate_per_bone[bone_index as usize];

        if bone_bit_rates.is_fully_invalid() {
            trace!(bone_index, "every track constant or default, skipping");
            continue;
        }

        let mut best_bit_rates = bone_bit_rates;
        let mut best_error = 1.0e10f32;
        let mut prev_transform_size = u32::MAX;
        let mut is_error_good_enough = false;

        if context.has_scale {
            for &[rotation, translation, scale] in local_bit_rate_permutations() {
                if !is_candidate_compatible(bone_bit_rates.rotation, rotation)
                    || !is_candidate_compatible(bone_bit_rates.translation, translation)
                    || !is_candidate_compatible(bone_bit_rates.scale, scale)
                {
                    continue;
                }

                let transform_size = num_bits_at_bit_rate(rotation)
                    + num_bits_at_bit_rate(translation)
                    + num_bits_at_bit_rate(scale);

                if transform_size != prev_transform_size && is_error_good_enough {
                    // Smallest size that meets the threshold is found and
                    // every same-size permutation was tried
                    break;
                }
                prev_transform_size = transform_size;

                context.bit_rate_per_bone[bone_index as usize] = BoneBitRate {
                    rotation: if bone_bit_rates.rotation != INVALID_BIT_RATE {
                        rotation
                    } else {
                        INVALID_BIT_RATE
                    },
                    translation: if bone_bit_rates.translation != INVALID_BIT_RATE {
                        translation
                    } else {
                        INVALID_BIT_RATE
                    },
                    scale: if bone_bit_rates.scale != INVALID_BIT_RATE {
                        scale
                    } else {
                        INVALID_BIT_RATE
                    },
                };

                let error = context.calculate_max_error_local(
                    bone_index,
                    threshold,
                    StopCondition::UntilErrorTooHigh,
                );

                if error < best_error {
                    best_error = error;
                    best_bit_rates = context.bit_rate_per_bone[bone_index as usize];
                    is_error_good_enough = error < threshold;
                }
            }
        } else {
            for &[rotation, translation] in local_bit_rate_permutations_no_scale() {
                if !is_candidate_compatible(bone_bit_rates.rotation, rotation)
                    || !is_candidate_compatible(bone_bit_rates.translation, translation)
                {
                    continue;
                }

                let transform_size =
                    num_bits_at_bit_rate(rotation) + num_bits_at_bit_rate(translation);

                if transform_size != prev_transform_size && is_error_good_enough {
                    break;
                }
                prev_transform_size = transform_size;

                context.bit_rate_per_bone[bone_index as usize] = BoneBitRate {
                    rotation: if bone_bit_rates.rotation != INVALID_BIT_RATE {
                        rotation
                    } else {
                        INVALID_BIT_RATE
                    },
                    translation: if bone_bit_rates.translation != INVALID_BIT_RATE {
                        translation
                    } else {
                        INVALID_BIT_RATE
                    },
                    scale: bone_bit_rates.scale,
                };

                let error = context.calculate_max_error_local(
                    bone_index,
                    threshold,
                    StopCondition::UntilErrorTooHigh,
                );

                if error < best_error {
                    best_error = error;
                    best_bit_rates = context.bit_rate_per_bone[bone_index as usize];
                    is_error_good_enough = error < threshold;
                }
            }
        }

        trace!(
            bone_index,
            rotation = best_bit_rates.rotation,
            translation = best_bit_rates.translation,
            scale = best_bit_rates.scale,
            error = best_error,
            "local space bit rates"
        );
        context.bit_rate_per_bone[bone_index as usize] = best_bit_rates;
    }
}

#[inline]
const fn increment_and_clamp_bit_rate(bit_rate: u8, increment: u8) -> u8 {
    if bit_rate >= HIGHEST_BIT_RATE {
        bit_rate
    } else {
        let incremented = bit_rate + increment;
        if incremented > HIGHEST_BIT_RATE {
            HIGHEST_BIT_RATE
        } else {
            incremented
        }
    }
}

/// Distribute `num_increments` across one bone's tracks, keeping the split
/// with the lowest object-space error
fn increase_bone_bit_rate(
    context: &mut QuantizationContext<'_>,
    bone_index: u16,
    num_increments: u8,
    old_error: f32,
    threshold: f32,
) -> (BoneBitRate, f32) {
    let bone_bit_rates = context.bit_rate_per_bone[bone_index as usize];
    let num_scale_increments = if context.has_scale { num_increments } else { 0 };

    let mut best_bit_rates = bone_bit_rates;
    let mut best_error = old_error;

    for rotation_increment in 0..=num_increments {
        let rotation_bit_rate =
            increment_and_clamp_bit_rate(bone_bit_rates.rotation, rotation_increment);

        for translation_increment in 0..=num_increments {
            let translation_bit_rate =
                increment_and_clamp_bit_rate(bone_bit_rates.translation, translation_increment);

            for scale_increment in 0..=num_scale_increments {
                let scale_bit_rate =
                    increment_and_clamp_bit_rate(bone_bit_rates.scale, scale_increment);

                if rotation_increment + translation_increment + scale_increment != num_increments {
                    if scale_bit_rate >= HIGHEST_BIT_RATE {
                        break;
                    }
                    continue;
                }

                context.bit_rate_per_bone[bone_index as usize] = BoneBitRate {
                    rotation: rotation_bit_rate,
                    translation: translation_bit_rate,
                    scale: scale_bit_rate,
                };
                let error = context.calculate_max_error_object(
                    bone_index,
                    threshold,
                    StopCondition::UntilErrorTooHigh,
                );

                if error < best_error {
                    best_error = error;
                    best_bit_rates = context.bit_rate_per_bone[bone_index as usize];
                }

                context.bit_rate_per_bone[bone_index as usize] = bone_bit_rates;

                if scale_bit_rate >= HIGHEST_BIT_RATE {
                    break;
                }
            }

            if translation_bit_rate >= HIGHEST_BIT_RATE {
                break;
            }
        }

        if rotation_bit_rate >= HIGHEST_BIT_RATE {
            break;
        }
    }

    (best_bit_rates, best_error)
}

/// Lexicographic next permutation, the tie-breaker that pins which of several
/// equally-scored bit-rate distributions wins
fn next_permutation(values: &mut [u8]) -> bool {
    if values.len() < 2 {
        return false;
    }

    let mut i = values.len() - 1;
    while i > 0 && values[i - 1] >= values[i] {
        i -= 1;
    }
    if i == 0 {
        values.reverse();
        return false;
    }

    let mut j = values.len() - 1;
    while values[j] <= values[i - 1] {
        j -= 1;
    }
    values.swap(i - 1, j);
    values[i..].reverse();
    true
}

/// Evaluate every arrangement of one increment pattern across the chain
fn calculate_bone_permutation_error(
    context: &mut QuantizationContext<'_>,
    permutation_bit_rates: &mut Vec<BoneBitRate>,
    bone_chain_permutation: &mut [u8],
    target_bone: u16,
    best_bit_rates: &mut [BoneBitRate],
    old_error: f32,
    threshold: f32,
) -> f32 {
    let mut best_error = old_error;
    let chain: SmallVec<[u16; 16]> = context.chain_bone_indices.clone();
    let num_bones_in_chain = chain.len();

    loop {
        permutation_bit_rates.copy_from_slice(&context.bit_rate_per_bone);

        let mut is_permutation_valid = false;
        for chain_link_index in 0..num_bones_in_chain {
            let num_increments = bone_chain_permutation[chain_link_index];
            if num_increments != 0 {
                let chain_bone_index = chain[chain_link_index];
                let (chain_bone_best_bit_rates, _) = increase_bone_bit_rate(
                    context,
                    chain_bone_index,
                    num_increments,
                    old_error,
                    threshold,
                );
                is_permutation_valid |= chain_bone_best_bit_rates
                    != permutation_bit_rates[chain_bone_index as usize];
                permutation_bit_rates[chain_bone_index as usize] = chain_bone_best_bit_rates;
            }
        }

        if is_permutation_valid {
            std::mem::swap(&mut context.bit_rate_per_bone, permutation_bit_rates);
            let permutation_error = context.calculate_max_error_object(
                target_bone,
                threshold,
                StopCondition::UntilErrorTooHigh,
            );
            std::mem::swap(&mut context.bit_rate_per_bone, permutation_bit_rates);

            if permutation_error < best_error {
                best_error = permutation_error;
                best_bit_rates.copy_from_slice(permutation_bit_rates);

                if permutation_error < threshold {
                    break;
                }
            }
        }

        if !next_permutation(&mut bone_chain_permutation[..num_bones_in_chain]) {
            break;
        }
    }

    best_error
}

/// Index and value of the smallest track bit rate, first-wins on ties
#[inline]
fn smallest_track(bit_rates: &BoneBitRate) -> (usize, u8) {
    let values = [bit_rates.rotation, bit_rates.translation, bit_rates.scale];
    let mut smallest = 0;
    for index in 1..3 {
        if values[index] < values[smallest] {
            smallest = index;
        }
    }
    (smallest, values[smallest])
}

/// Raise the smallest incrementable track by one
///
/// Returns false when every track is maxed out. If rotation == translation
/// and translation has room while scale is maxed, translation gets the
/// increment. This seems to yield an overall tiny win but it isn't always
/// the case.
fn increment_smallest_track(bit_rates: &mut BoneBitRate) -> bool {
    let (smallest_index, smallest_value) = smallest_track(bit_rates);
    if smallest_value >= HIGHEST_BIT_RATE {
        return false;
    }

    if bit_rates.rotation == bit_rates.translation
        && bit_rates.translation < HIGHEST_BIT_RATE
        && bit_rates.scale >= HIGHEST_BIT_RATE
    {
        bit_rates.translation += 1;
    } else {
        match smallest_index {
            0 => bit_rates.rotation += 1,
            1 => bit_rates.translation += 1,
            _ => bit_rates.scale += 1,
        }
    }
    true
}

/// Find the per-bone bit rates meeting each bone's precision threshold
pub(crate) fn find_optimal_bit_rates(context: &mut QuantizationContext<'_>) {
    initialize_bone_bit_rates(context);
    calculate_local_space_bit_rates(context);

    let num_bones = context.num_bones;
    let mut bone_chain_permutation = vec![0u8; num_bones];
    let mut permutation_bit_rates = context.bit_rate_per_bone.clone();
    let mut best_permutation_bit_rates = context.bit_rate_per_bone.clone();
    let mut best_bit_rates = context.bit_rate_per_bone.clone();

    for bone_index in 0..num_bones as u16 {
        let threshold = context.precision(bone_index);
        context.set_chain(bone_index);
        let num_bones_in_chain = context.chain_bone_indices.len();

        let mut error = context.calculate_max_error_object(
            bone_index,
            threshold,
            StopCondition::UntilErrorTooHigh,
        );
        if error < threshold {
            continue;
        }

        let initial_error = error;

        while error >= threshold {
            // Enumerate permutations of up to 3 bit-rate increments along the
            // chain and keep the best result; try again from there while
            // progress is made.
            let original_error = error;
            let mut best_error = error;

            // Single track/bone increment
            bone_chain_permutation.fill(0);
            bone_chain_permutation[num_bones_in_chain - 1] = 1;
            error = calculate_bone_permutation_error(
                context,
                &mut permutation_bit_rates,
                &mut bone_chain_permutation,
                bone_index,
                &mut best_permutation_bit_rates,
                original_error,
                threshold,
            );
            if error < best_error {
                best_error = error;
                best_bit_rates.copy_from_slice(&best_permutation_bit_rates);
                if error < threshold {
                    break;
                }
            }

            if context.settings.level >= CompressionLevel::High {
                // Two increments across one or two track/bones
                bone_chain_permutation.fill(0);
                bone_chain_permutation[num_bones_in_chain - 1] = 2;
                error = calculate_bone_permutation_error(
                    context,
                    &mut permutation_bit_rates,
                    &mut bone_chain_permutation,
                    bone_index,
                    &mut best_permutation_bit_rates,
                    original_error,
                    threshold,
                );
                if error < best_error {
                    best_error = error;
                    best_bit_rates.copy_from_slice(&best_permutation_bit_rates);
                    if error < threshold {
                        break;
                    }
                }

                if num_bones_in_chain > 1 {
                    bone_chain_permutation.fill(0);
                    bone_chain_permutation[num_bones_in_chain - 2] = 1;
                    bone_chain_permutation[num_bones_in_chain - 1] = 1;
                    error = calculate_bone_permutation_error(
                        context,
                        &mut permutation_bit_rates,
                        &mut bone_chain_permutation,
                        bone_index,
                        &mut best_permutation_bit_rates,
                        original_error,
                        threshold,
                    );
                    if error < best_error {
                        best_error = error;
                        best_bit_rates.copy_from_slice(&best_permutation_bit_rates);
                        if error < threshold {
                            break;
                        }
                    }
                }
            }

            if context.settings.level >= CompressionLevel::Highest {
                // Three increments across up to three track/bones
                bone_chain_permutation.fill(0);
                bone_chain_permutation[num_bones_in_chain - 1] = 3;
                error = calculate_bone_permutation_error(
                    context,
                    &mut permutation_bit_rates,
                    &mut bone_chain_permutation,
                    bone_index,
                    &mut best_permutation_bit_rates,
                    original_error,
                    threshold,
                );
                if error < best_error {
                    best_error = error;
                    best_bit_rates.copy_from_slice(&best_permutation_bit_rates);
                    if error < threshold {
                        break;
                    }
                }

                if num_bones_in_chain > 1 {
                    bone_chain_permutation.fill(0);
                    bone_chain_permutation[num_bones_in_chain - 2] = 2;
                    bone_chain_permutation[num_bones_in_chain - 1] = 1;
                    error = calculate_bone_permutation_error(
                        context,
                        &mut permutation_bit_rates,
                        &mut bone_chain_permutation,
                        bone_index,
                        &mut best_permutation_bit_rates,
                        original_error,
                        threshold,
                    );
                    if error < best_error {
                        best_error = error;
                        best_bit_rates.copy_from_slice(&best_permutation_bit_rates);
                        if error < threshold {
                            break;
                        }
                    }

                    if num_bones_in_chain > 2 {
                        bone_chain_permutation.fill(0);
                        bone_chain_permutation[num_bones_in_chain - 3] = 1;
                        bone_chain_permutation[num_bones_in_chain - 2] = 1;
                        bone_chain_permutation[num_bones_in_chain - 1] = 1;
                        error = calculate_bone_permutation_error(
                            context,
                            &mut permutation_bit_rates,
                            &mut bone_chain_permutation,
                            bone_index,
                            &mut best_permutation_bit_rates,
                            original_error,
                            threshold,
                        );
                        if error < best_error {
                            best_error = error;
                            best_bit_rates.copy_from_slice(&best_permutation_bit_rates);
                            if error < threshold {
                                break;
                            }
                        }
                    }
                }
            }

            if best_error >= original_error {
                break; // No progress made
            }

            error = best_error;
            if error < original_error {
                debug!(bone_index, error, "chain bit rates improved");
                context.bit_rate_per_bone.copy_from_slice(&best_bit_rates);
            }
        }

        if error < initial_error {
            context.bit_rate_per_bone.copy_from_slice(&best_bit_rates);
        }

        // The error may still be too high, this should be rare. Increase the
        // bit rate indiscriminately from child to parent, backtracking when a
        // raise makes things worse.
        error = context.calculate_max_error_object(
            bone_index,
            threshold,
            StopCondition::UntilEndOfSegment,
        );
        while error >= threshold {
            let mut num_maxed_out = 0;
            for chain_link_index in (0..num_bones_in_chain).rev() {
                let chain_bone_index = context.chain_bone_indices[chain_link_index] as usize;

                // Raising a bit rate does NOT always reduce the error; keep
                // the triple with the smallest error seen for this bone.
                let mut best_bone_bit_rate = context.bit_rate_per_bone[chain_bone_index];
                let mut best_bit_rate_error = error;

                while error >= threshold {
                    let mut updated = context.bit_rate_per_bone[chain_bone_index];
                    if !increment_smallest_track(&mut updated) {
                        num_maxed_out += 1;
                        break;
                    }

                    assert!(
                        (updated.rotation <= HIGHEST_BIT_RATE
                            || updated.rotation == INVALID_BIT_RATE)
                            && (updated.translation <= HIGHEST_BIT_RATE
                                || updated.translation == INVALID_BIT_RATE)
                            && (updated.scale <= HIGHEST_BIT_RATE
                                || updated.scale == INVALID_BIT_RATE),
                        "Invalid bit rate! [{}, {}, {}]",
                        updated.rotation,
                        updated.translation,
                        updated.scale
                    );

                    context.bit_rate_per_bone[chain_bone_index] = updated;
                    error = context.calculate_max_error_object(
                        bone_index,
                        threshold,
                        StopCondition::UntilEndOfSegment,
                    );

                    if error < best_bit_rate_error {
                        best_bone_bit_rate = updated;
                        best_bit_rate_error = error;
                    }
                }

                // Only retain the lowest error bit rates
                context.bit_rate_per_bone[chain_bone_index] = best_bone_bit_rate;
                error = best_bit_rate_error;

                if error < threshold {
                    break;
                }
            }

            if num_maxed_out == num_bones_in_chain {
                break;
            }
        }

        // Despite our best efforts the threshold was not reached. Stop caring
        // about size and max out the chain, but only when rotations are full
        // precision quaternions; dropped-component formats can miss the
        // threshold even with raw values and a best effort is fine there.
        if error >= threshold && context.settings.rotation_format == RotationFormat::QuatFull {
            for chain_link_index in (0..num_bones_in_chain).rev() {
                let chain_bone_index = context.chain_bone_indices[chain_link_index] as usize;
                let bit_rates = &mut context.bit_rate_per_bone[chain_bone_index];
                bit_rates.rotation = bit_rates.rotation.max(HIGHEST_BIT_RATE);
                bit_rates.translation = bit_rates.translation.max(HIGHEST_BIT_RATE);
                bit_rates.scale = bit_rates.scale.max(HIGHEST_BIT_RATE);

                error = context.calculate_max_error_object(
                    bone_index,
                    threshold,
                    StopCondition::UntilEndOfSegment,
                );
                if error < threshold {
                    break;
                }
            }
        }
    }

    if tracing::enabled!(tracing::Level::DEBUG) {
        for bone_index in 0..num_bones as u16 {
            let bit_rates = context.bit_rate_per_bone[bone_index as usize];
            debug!(
                bone_index,
                rotation = bit_rates.rotation,
                translation = bit_rates.translation,
                scale = bit_rates.scale,
                "optimized bit rates"
            );
        }
    }
}

#[cfg(test)]
mod tie_break_tests {
    use super::increment_smallest_track;
    use crate::formats::{BoneBitRate, HIGHEST_BIT_RATE, INVALID_BIT_RATE};

    #[test]
    fn test_smallest_track_increments_first() {
        let mut bit_rates = BoneBitRate {
            rotation: 5,
            translation: 3,
            scale: 7,
        };
        assert!(increment_smallest_track(&mut bit_rates));
        assert_eq!(bit_rates.translation, 4);
        assert_eq!(bit_rates.rotation, 5);
        assert_eq!(bit_rates.scale, 7);
    }

    #[test]
    fn test_rotation_wins_plain_ties() {
        let mut bit_rates = BoneBitRate {
            rotation: 4,
            translation: 4,
            scale: 4,
        };
        assert!(increment_smallest_track(&mut bit_rates));
        assert_eq!(bit_rates.rotation, 5);
        assert_eq!(bit_rates.translation, 4);
    }

    #[test]
    fn test_translation_bias_when_scale_maxed() {
        // rotation == translation < highest with scale maxed biases translation
        let mut bit_rates = BoneBitRate {
            rotation: 6,
            translation: 6,
            scale: HIGHEST_BIT_RATE,
        };
        assert!(increment_smallest_track(&mut bit_rates));
        assert_eq!(bit_rates.translation, 7);
        assert_eq!(bit_rates.rotation, 6);
    }

    #[test]
    fn test_saturated_triple_cannot_increment() {
        let mut bit_rates = BoneBitRate {
            rotation: HIGHEST_BIT_RATE,
            translation: HIGHEST_BIT_RATE,
            scale: INVALID_BIT_RATE,
        };
        assert!(!increment_smallest_track(&mut bit_rates));
    }
}
