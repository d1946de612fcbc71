//! Quantization
//!
//! The coordinator walks segments in source order. For each segment it caches
//! the raw local and object transforms once, runs the variable bit-rate
//! search when any channel format is variable, then commits every track by
//! rewriting it as a packed stream at its chosen format and bit rate.
//!
//! Committed variable tracks are tightly bit-packed: sample `i` of a
//! `3 * N`-bit track starts at bit `i * 3 * N`, and the nominal payload is
//! `ceil(num_samples * 3 * N / 8)` bytes plus the standard 16 zero padding
//! bytes every stream carries.

pub(crate) mod context;
pub(crate) mod database;
pub(crate) mod permutations;
pub(crate) mod search;

#[cfg(test)]
mod tests;

use tracing::debug;

use crate::error::CompressError;
use crate::formats::{
    is_constant_bit_rate, is_raw_bit_rate, num_bits_at_bit_rate, BoneBitRate, RotationFormat,
    VectorFormat, INVALID_BIT_RATE,
};
use crate::metric::TransformErrorMetric;
use crate::packing::{
    pack_vector3_96, pack_vector3_u48, pack_vector3_uxx_at, pack_vector4_128,
};
use crate::quantize::context::QuantizationContext;
use crate::quantize::search::find_optimal_bit_rates;
use crate::settings::{
    CompressionSettings, RANGE_REDUCTION_SCALES, RANGE_REDUCTION_TRANSLATIONS,
};
use crate::stream::clip::{
    compact_constant_streams, convert_rotation_streams, AnimationClip, ClipContext,
};
use crate::stream::range::{
    extract_clip_bone_ranges, normalize_clip_streams, normalize_sample, normalize_segment_streams,
};
use crate::stream::segment::segment_streams;
use crate::stream::{
    BoneStreams, RotationTrackStream, TrackStream, TrackStreamRange, VectorTrackStream,
};
use glam::Vec4;

/// Compress a clip into packed track streams
///
/// Returns the clip context whose every non-default track has been rewritten
/// as a packed stream recording its chosen format and bit rate, ready for
/// serialization. A search that cannot reach a bone's precision commits the
/// lowest-error bit rates it found; that is not an error.
pub fn compress_clip(
    clip: &AnimationClip,
    additive_base: Option<&AnimationClip>,
    settings: &CompressionSettings,
    metric: &dyn TransformErrorMetric,
) -> Result<ClipContext, CompressError> {
    validate_settings(settings)?;

    let raw_context = ClipContext::build(clip)?;
    let mut context = ClipContext::build(clip)?;

    let additive_context = match additive_base {
        Some(base) => {
            let base_context = ClipContext::build(base)?;
            if base_context.num_bones != context.num_bones {
                return Err(CompressError::AdditiveBaseBoneMismatch {
                    base: base_context.num_bones,
                    clip: context.num_bones,
                });
            }
            context.has_additive_base = true;
            Some(base_context)
        }
        None => None,
    };

    convert_rotation_streams(&mut context, settings.rotation_format);
    extract_clip_bone_ranges(&mut context);
    compact_constant_streams(&mut context, settings);
    normalize_clip_streams(&mut context, settings.range_reduction);
    segment_streams(&mut context, &settings.segmenting)?;
    normalize_segment_streams(&mut context, settings.segmenting.range_reduction);

    quantize_streams(
        &mut context,
        &raw_context,
        additive_context.as_ref(),
        settings,
        metric,
    );

    Ok(context)
}

fn validate_settings(settings: &CompressionSettings) -> Result<(), CompressError> {
    if settings.translation_format.is_variable()
        && settings.range_reduction & RANGE_REDUCTION_TRANSLATIONS == 0
    {
        return Err(CompressError::VariableFormatRequiresRangeReduction {
            channel: "translation",
        });
    }
    if settings.scale_format.is_variable()
        && settings.range_reduction & RANGE_REDUCTION_SCALES == 0
    {
        return Err(CompressError::VariableFormatRequiresRangeReduction { channel: "scale" });
    }

    let orphan_flags = settings.segmenting.range_reduction & !settings.range_reduction;
    if orphan_flags != 0 {
        return Err(CompressError::SegmentRangeReductionWithoutClip {
            flags: orphan_flags,
        });
    }

    Ok(())
}

/// Search and commit every segment of the clip
pub(crate) fn quantize_streams(
    clip: &mut ClipContext,
    raw_clip: &ClipContext,
    additive_base: Option<&ClipContext>,
    settings: &CompressionSettings,
    metric: &dyn TransformErrorMetric,
) {
    let is_any_variable = settings.is_any_variable();
    let num_segments = clip.num_segments() as usize;
    let num_bones = clip.num_bones as usize;

    for segment_index in 0..num_segments {
        debug!(segment_index, "quantizing segment");

        let bit_rate_per_bone = if is_any_variable {
            let mut context = QuantizationContext::new(
                clip,
                raw_clip,
                additive_base,
                settings,
                metric,
                segment_index,
            );
            context.set_segment();
            find_optimal_bit_rates(&mut context);
            context.bit_rate_per_bone.clone()
        } else {
            vec![BoneBitRate::INVALID; num_bones]
        };

        quantize_segment_streams(clip, raw_clip, segment_index, &bit_rate_per_bone, settings);
    }
}

/// Rewrite every track of one segment at its committed format and bit rate
fn quantize_segment_streams(
    clip: &mut ClipContext,
    raw_clip: &ClipContext,
    segment_index: usize,
    bit_rate_per_bone: &[BoneBitRate],
    settings: &CompressionSettings,
) {
    let num_bones = clip.num_bones as usize;
    let clip_rotations_normalized = clip.are_rotations_normalized;

    for bone_index in 0..num_bones {
        let bone_ranges = clip.ranges[bone_index];
        let bit_rates = bit_rate_per_bone[bone_index];

        let (rotations, translations, scales) = {
            let segment = &clip.segments()[segment_index];
            let lossy_bone = &segment.bone_streams[bone_index];
            let raw_bone = &raw_clip.segments()[0].bone_streams[bone_index];
            let clip_sample_offset = segment.clip_sample_offset;

            let rotations = if lossy_bone.is_rotation_default {
                RotationTrackStream::new(
                    TrackStream::empty(lossy_bone.rotations.sample_rate()),
                    lossy_bone.rotations.format(),
                )
            } else if settings.rotation_format.is_variable() {
                if lossy_bone.is_rotation_constant {
                    quantize_fixed_rotation_stream(
                        lossy_bone,
                        settings.rotation_format.highest_variant_precision(),
                    )
                } else {
                    quantize_variable_rotation_stream(
                        lossy_bone,
                        raw_bone,
                        &bone_ranges.rotation,
                        clip_rotations_normalized,
                        clip_sample_offset,
                        bit_rates.rotation,
                    )
                }
            } else {
                quantize_fixed_rotation_stream(lossy_bone, settings.rotation_format)
            };

            let translations = if lossy_bone.is_translation_default {
                VectorTrackStream::new(
                    TrackStream::empty(lossy_bone.translations.sample_rate()),
                    lossy_bone.translations.format(),
                )
            } else if settings.translation_format.is_variable() {
                if lossy_bone.is_translation_constant {
                    quantize_fixed_vector_stream(&lossy_bone.translations, VectorFormat::Vector3Full)
                } else {
                    quantize_variable_vector_stream(
                        &lossy_bone.translations,
                        &raw_bone.translations,
                        &bone_ranges.translation,
                        clip_sample_offset,
                        bit_rates.translation,
                    )
                }
            } else {
                quantize_fixed_vector_stream(&lossy_bone.translations, settings.translation_format)
            };

            let scales = if lossy_bone.is_scale_default {
                VectorTrackStream::new(
                    TrackStream::empty(lossy_bone.scales.sample_rate()),
                    lossy_bone.scales.format(),
                )
            } else if settings.scale_format.is_variable() {
                if lossy_bone.is_scale_constant {
                    quantize_fixed_vector_stream(&lossy_bone.scales, VectorFormat::Vector3Full)
                } else {
                    quantize_variable_vector_stream(
                        &lossy_bone.scales,
                        &raw_bone.scales,
                        &bone_ranges.scale,
                        clip_sample_offset,
                        bit_rates.scale,
                    )
                }
            } else {
                quantize_fixed_vector_stream(&lossy_bone.scales, settings.scale_format)
            };

            (rotations, translations, scales)
        };

        let bone_stream = &mut clip.segments_mut()[segment_index].bone_streams[bone_index];
        bone_stream.rotations = rotations;
        bone_stream.translations = translations;
        bone_stream.scales = scales;
    }
}

/// Pack every sample of a rotation stream at a fixed format
fn quantize_fixed_rotation_stream(
    bone_stream: &BoneStreams,
    rotation_format: RotationFormat,
) -> RotationTrackStream {
    let source = &bone_stream.rotations.stream;
    let num_samples = source.num_samples();
    let bits = rotation_format.packed_sample_bits();
    let mut quantized = TrackStream::new(num_samples, bits, source.sample_rate(), INVALID_BIT_RATE);

    for sample_index in 0..num_samples {
        let rotation = source.raw_sample(sample_index);
        let out = quantized.sample_bytes_mut(sample_index);
        match rotation_format {
            RotationFormat::QuatFull => pack_vector4_128(rotation, out),
            RotationFormat::QuatDropWFull => pack_vector3_96(rotation, out),
            RotationFormat::QuatDropWVariable => {
                unreachable!("Variable rotations quantize per bit rate")
            }
        }
    }

    RotationTrackStream::new(quantized, rotation_format)
}

/// Pack every sample of a vector stream at a fixed format
fn quantize_fixed_vector_stream(
    source_stream: &VectorTrackStream,
    vector_format: VectorFormat,
) -> VectorTrackStream {
    let source = &source_stream.stream;
    let num_samples = source.num_samples();
    let bits = vector_format.packed_sample_bits();
    let mut quantized = TrackStream::new(num_samples, bits, source.sample_rate(), INVALID_BIT_RATE);

    for sample_index in 0..num_samples {
        let value = source.raw_sample(sample_index);
        let out = quantized.sample_bytes_mut(sample_index);
        match vector_format {
            VectorFormat::Vector3Full => pack_vector3_96(value, out),
            VectorFormat::Vector3Variable => {
                unreachable!("Variable vectors quantize per bit rate")
            }
        }
    }

    VectorTrackStream::new(quantized, vector_format)
}

/// Commit a rotation track at its searched bit rate
fn quantize_variable_rotation_stream(
    lossy_bone: &BoneStreams,
    raw_bone: &BoneStreams,
    clip_range: &TrackStreamRange,
    clip_normalized: bool,
    clip_sample_offset: u32,
    bit_rate: u8,
) -> RotationTrackStream {
    let source = &lossy_bone.rotations.stream;
    let sample_rate = source.sample_rate();

    let quantized = if is_constant_bit_rate(bit_rate) {
        // One 48-bit sample of the clip-normalized value at the segment start
        let mut rotation = raw_bone.rotations.stream.raw_sample(clip_sample_offset);
        if rotation.w < 0.0 {
            rotation = -rotation;
        }
        let normalized = normalize_sample(rotation, clip_range);

        let mut stream = TrackStream::new(1, 48, sample_rate, bit_rate);
        pack_vector3_u48(normalized, stream.sample_bytes_mut(0));
        stream
    } else if is_raw_bit_rate(bit_rate) {
        let num_samples = source.num_samples();
        let mut stream = TrackStream::new(num_samples, 96, sample_rate, bit_rate);
        for sample_index in 0..num_samples {
            let mut rotation = raw_bone
                .rotations
                .stream
                .raw_sample(clip_sample_offset + sample_index);
            if rotation.w < 0.0 {
                rotation = -rotation;
            }
            pack_vector3_96(rotation, stream.sample_bytes_mut(sample_index));
        }
        stream
    } else {
        let num_samples = source.num_samples();
        let num_bits = num_bits_at_bit_rate(bit_rate);
        let bits_per_sample = num_bits * 3;
        let mut stream = TrackStream::new(num_samples, bits_per_sample, sample_rate, bit_rate);
        for sample_index in 0..num_samples {
            let sample = source.raw_sample(sample_index);
            let sample = if clip_normalized {
                sample
            } else {
                // Components live in [-1, 1], remap for unsigned packing
                sample * 0.5 + Vec4::splat(0.5)
            };
            let bit_offset = sample_index * bits_per_sample;
            pack_vector3_uxx_at(sample, num_bits, stream.data_mut(), bit_offset);
        }
        stream
    };

    RotationTrackStream::new(quantized, RotationFormat::QuatDropWVariable)
}

/// Commit a translation or scale track at its searched bit rate
fn quantize_variable_vector_stream(
    lossy_stream: &VectorTrackStream,
    raw_stream: &VectorTrackStream,
    clip_range: &TrackStreamRange,
    clip_sample_offset: u32,
    bit_rate: u8,
) -> VectorTrackStream {
    let source = &lossy_stream.stream;
    let sample_rate = source.sample_rate();

    let quantized = if is_constant_bit_rate(bit_rate) {
        let value = raw_stream.stream.raw_sample(clip_sample_offset);
        let normalized = normalize_sample(value, clip_range);

        let mut stream = TrackStream::new(1, 48, sample_rate, bit_rate);
        pack_vector3_u48(normalized, stream.sample_bytes_mut(0));
        stream
    } else if is_raw_bit_rate(bit_rate) {
        let num_samples = source.num_samples();
        let mut stream = TrackStream::new(num_samples, 96, sample_rate, bit_rate);
        for sample_index in 0..num_samples {
            let value = raw_stream
                .stream
                .raw_sample(clip_sample_offset + sample_index);
            pack_vector3_96(value, stream.sample_bytes_mut(sample_index));
        }
        stream
    } else {
        let num_samples = source.num_samples();
        let num_bits = num_bits_at_bit_rate(bit_rate);
        let bits_per_sample = num_bits * 3;
        let mut stream = TrackStream::new(num_samples, bits_per_sample, sample_rate, bit_rate);
        for sample_index in 0..num_samples {
            let sample = source.raw_sample(sample_index);
            let bit_offset = sample_index * bits_per_sample;
            pack_vector3_uxx_at(sample, num_bits, stream.data_mut(), bit_offset);
        }
        stream
    };

    VectorTrackStream::new(quantized, VectorFormat::Vector3Variable)
}
