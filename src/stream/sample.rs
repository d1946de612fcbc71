//! Stream sampling
//!
//! Raw pose sampling for the error evaluators and the quantize-then-unpack
//! reconstruction used by the bit-rate database. Sample times are measured
//! against the full clip duration so boundary samples are identical across
//! segments, matching decompression exactly.

use glam::{Quat, Vec3A, Vec4};

use crate::formats::{is_constant_bit_rate, is_raw_bit_rate, num_bits_at_bit_rate};
use crate::packing::{
    pack_vector3_96, pack_vector3_sxx, pack_vector3_u48, pack_vector3_uxx, unpack_vector3_96,
    unpack_vector3_sxx, unpack_vector3_u48, unpack_vector3_uxx,
};
use crate::stream::clip::ClipContext;
use crate::stream::range::{denormalize_sample, normalize_sample};
use crate::stream::{BoneStreams, TrackStreamRange};
use crate::transform::Transform;

/// Indices of the two samples bracketing `sample_time`, plus the blend factor
///
/// Samples are evenly spaced; the math must match decompression exactly.
#[inline]
pub(crate) fn calculate_interpolation_keys(
    num_samples: u32,
    duration: f32,
    sample_time: f32,
) -> (u32, u32, f32) {
    if num_samples <= 1 || duration <= 0.0 {
        return (0, 0, 0.0);
    }

    debug_assert!(
        sample_time >= 0.0 && sample_time <= duration,
        "Invalid sample time: 0.0 <= {} <= {}",
        sample_time,
        duration
    );

    let normalized_time = (sample_time / duration).clamp(0.0, 1.0);
    let sample_key = normalized_time * (num_samples - 1) as f32;
    let key_frame0 = sample_key.floor() as u32;
    let key_frame1 = (key_frame0 + 1).min(num_samples - 1);
    let alpha = sample_key - key_frame0 as f32;
    (key_frame0, key_frame1, alpha)
}

/// Rebuild a quaternion from its three stored components, W non-negative
#[inline]
pub(crate) fn quat_from_positive_w(components: Vec4) -> Quat {
    let w_squared = 1.0 - components.x * components.x
        - components.y * components.y
        - components.z * components.z;
    // Quantization noise can push the sum past 1, snap W to zero
    let w = w_squared.max(0.0).sqrt();
    Quat::from_xyzw(components.x, components.y, components.z, w).normalize()
}

/// Normalized lerp with hemisphere correction
#[inline]
pub(crate) fn quat_nlerp(from: Quat, to: Quat, alpha: f32) -> Quat {
    let to = if from.dot(to) < 0.0 { -to } else { to };
    from.lerp(to, alpha).normalize()
}

#[inline]
pub(crate) fn vec3_lerp(from: Vec3A, to: Vec3A, alpha: f32) -> Vec3A {
    from + (to - from) * alpha
}

/// Sample the raw local pose of every bone at `sample_time`
///
/// Streams must be raw 4-lane (the unconverted, uncompacted raw clip or an
/// additive base clip).
pub(crate) fn sample_raw_pose(raw_clip: &ClipContext, sample_time: f32, out: &mut [Transform]) {
    let segment = &raw_clip.segments()[0];
    let duration = raw_clip.duration;

    for (bone_index, bone_stream) in segment.bone_streams.iter().enumerate() {
        let rotation = {
            let stream = &bone_stream.rotations.stream;
            let (key0, key1, alpha) =
                calculate_interpolation_keys(stream.num_samples(), duration, sample_time);
            let from = stream.raw_sample(key0);
            let to = stream.raw_sample(key1);
            quat_nlerp(
                Quat::from_xyzw(from.x, from.y, from.z, from.w),
                Quat::from_xyzw(to.x, to.y, to.z, to.w),
                alpha,
            )
        };

        let translation = {
            let stream = &bone_stream.translations.stream;
            let (key0, key1, alpha) =
                calculate_interpolation_keys(stream.num_samples(), duration, sample_time);
            vec3_lerp(
                Vec3A::from(stream.raw_sample(key0).truncate()),
                Vec3A::from(stream.raw_sample(key1).truncate()),
                alpha,
            )
        };

        let scale = {
            let stream = &bone_stream.scales.stream;
            let (key0, key1, alpha) =
                calculate_interpolation_keys(stream.num_samples(), duration, sample_time);
            vec3_lerp(
                Vec3A::from(stream.raw_sample(key0).truncate()),
                Vec3A::from(stream.raw_sample(key1).truncate()),
                alpha,
            )
        };

        out[bone_index] = Transform::new(rotation, translation, scale);
    }
}

/// The committed value of a rotation track excluded from the search
#[inline]
pub(crate) fn constant_rotation(bone_stream: &BoneStreams) -> Quat {
    if bone_stream.is_rotation_default {
        return Quat::IDENTITY;
    }
    let value = bone_stream.rotations.stream.raw_sample(0);
    Quat::from_xyzw(value.x, value.y, value.z, value.w)
}

/// The committed value of a translation track excluded from the search
#[inline]
pub(crate) fn constant_translation(bone_stream: &BoneStreams) -> Vec3A {
    if bone_stream.is_translation_default {
        return Vec3A::ZERO;
    }
    Vec3A::from(bone_stream.translations.stream.raw_sample(0).truncate())
}

/// The committed value of a scale track excluded from the search
#[inline]
pub(crate) fn constant_scale(bone_stream: &BoneStreams) -> Vec3A {
    if bone_stream.is_scale_default {
        return Vec3A::ONE;
    }
    Vec3A::from(bone_stream.scales.stream.raw_sample(0).truncate())
}

/// The current full-precision value of an animated track excluded from the
/// search (fixed storage formats)
pub(crate) fn current_rotation_sample(
    bone_stream: &BoneStreams,
    args: &ReconstructArgs<'_>,
    sample_index: u32,
    drops_w: bool,
) -> Quat {
    let mut value = bone_stream.rotations.stream.raw_sample(sample_index);
    if args.segment_normalized {
        value = denormalize_sample(value, args.segment_range.unwrap());
    }
    if args.clip_normalized {
        value = denormalize_sample(value, args.clip_range);
    }
    if drops_w {
        quat_from_positive_w(value)
    } else {
        Quat::from_xyzw(value.x, value.y, value.z, value.w).normalize()
    }
}

/// Vector counterpart of [`current_rotation_sample`]
pub(crate) fn current_vector_sample(
    stream: &crate::stream::VectorTrackStream,
    args: &ReconstructArgs<'_>,
    sample_index: u32,
) -> Vec3A {
    let mut value = stream.stream.raw_sample(sample_index);
    if args.segment_normalized {
        value = denormalize_sample(value, args.segment_range.unwrap());
    }
    if args.clip_normalized {
        value = denormalize_sample(value, args.clip_range);
    }
    Vec3A::from(value.truncate())
}

/// Parameters shared by the per-track reconstruction functions
pub(crate) struct ReconstructArgs<'a> {
    /// Clip-level range of the track
    pub clip_range: &'a TrackStreamRange,
    /// Segment-level range, read when the segment is normalized
    pub segment_range: Option<&'a TrackStreamRange>,
    pub clip_normalized: bool,
    pub segment_normalized: bool,
    pub clip_sample_offset: u32,
}

/// Reconstruct one rotation sample as it would decompress at `bit_rate`
///
/// `lossy` holds the segment's converted (and possibly normalized) samples;
/// `raw` holds the raw clip stream the constant and raw paths read from.
pub(crate) fn reconstruct_rotation_sample(
    lossy: &BoneStreams,
    raw: &BoneStreams,
    args: &ReconstructArgs<'_>,
    sample_index: u32,
    bit_rate: u8,
) -> Quat {
    let mut scratch = [0u8; 24];

    let reconstructed = if is_constant_bit_rate(bit_rate) {
        assert!(
            args.clip_normalized && args.segment_normalized,
            "Cannot drop a constant track if it isn't normalized"
        );

        let mut rotation = raw.rotations.stream.raw_sample(args.clip_sample_offset);
        if rotation.w < 0.0 {
            rotation = -rotation;
        }
        let normalized = normalize_sample(rotation, args.clip_range);

        pack_vector3_u48(normalized, &mut scratch);
        let unpacked = unpack_vector3_u48(&scratch);
        denormalize_sample(unpacked, args.clip_range)
    } else if is_raw_bit_rate(bit_rate) {
        let mut rotation = raw
            .rotations
            .stream
            .raw_sample(args.clip_sample_offset + sample_index);
        if rotation.w < 0.0 {
            rotation = -rotation;
        }

        pack_vector3_96(rotation, &mut scratch);
        unpack_vector3_96(&scratch)
    } else {
        let rotation = lossy.rotations.stream.raw_sample(sample_index);
        let num_bits = num_bits_at_bit_rate(bit_rate);

        let mut unpacked = if args.clip_normalized {
            pack_vector3_uxx(rotation, num_bits, &mut scratch);
            unpack_vector3_uxx(num_bits, &scratch, 0)
        } else {
            pack_vector3_sxx(rotation, num_bits, &mut scratch);
            unpack_vector3_sxx(num_bits, &scratch, 0)
        };

        if args.segment_normalized {
            unpacked = denormalize_sample(unpacked, args.segment_range.unwrap());
        }
        if args.clip_normalized {
            unpacked = denormalize_sample(unpacked, args.clip_range);
        }
        unpacked
    };

    quat_from_positive_w(reconstructed)
}

/// Reconstruct one translation or scale sample at `bit_rate`
pub(crate) fn reconstruct_vector_sample(
    lossy_stream: &crate::stream::VectorTrackStream,
    raw_stream: &crate::stream::VectorTrackStream,
    args: &ReconstructArgs<'_>,
    sample_index: u32,
    bit_rate: u8,
) -> Vec3A {
    let mut scratch = [0u8; 24];

    let reconstructed = if is_constant_bit_rate(bit_rate) {
        assert!(
            args.clip_normalized && args.segment_normalized,
            "Cannot drop a constant track if it isn't normalized"
        );

        let value = raw_stream.stream.raw_sample(args.clip_sample_offset);
        let normalized = normalize_sample(value, args.clip_range);

        pack_vector3_u48(normalized, &mut scratch);
        let unpacked = unpack_vector3_u48(&scratch);
        denormalize_sample(unpacked, args.clip_range)
    } else if is_raw_bit_rate(bit_rate) {
        let value = raw_stream
            .stream
            .raw_sample(args.clip_sample_offset + sample_index);
        pack_vector3_96(value, &mut scratch);
        unpack_vector3_96(&scratch)
    } else {
        assert!(
            args.clip_normalized,
            "Vector tracks must be normalized to use variable bit rates"
        );

        let value = lossy_stream.stream.raw_sample(sample_index);
        let num_bits = num_bits_at_bit_rate(bit_rate);

        pack_vector3_uxx(value, num_bits, &mut scratch);
        let mut unpacked = unpack_vector3_uxx(num_bits, &scratch, 0);

        if args.segment_normalized {
            unpacked = denormalize_sample(unpacked, args.segment_range.unwrap());
        }
        unpacked = denormalize_sample(unpacked, args.clip_range);
        unpacked
    };

    Vec3A::from(reconstructed.truncate())
}
