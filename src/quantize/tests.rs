//! Tests for the bit-rate search, database and quantization operators

use glam::{Quat, Vec3A};

use crate::formats::{BoneBitRate, HIGHEST_BIT_RATE, INVALID_BIT_RATE, LOWEST_BIT_RATE};
use crate::metric::QvvTransformErrorMetric;
use crate::quantize::context::{QuantizationContext, StopCondition};
use crate::quantize::database::SingleTrackQuery;
use crate::quantize::search::find_optimal_bit_rates;
use crate::settings::CompressionSettings;
use crate::stream::clip::{
    compact_constant_streams, convert_rotation_streams, AnimationClip, ClipContext, RawBoneTrack,
    TransformMetadata,
};
use crate::stream::range::{
    extract_clip_bone_ranges, normalize_clip_streams, normalize_segment_streams,
};
use crate::stream::segment::segment_streams;
use crate::transform::Transform;

fn chain_metadata(num_bones: usize, precision: f32, shell_distance: f32) -> Vec<TransformMetadata> {
    (0..num_bones)
        .map(|bone_index| TransformMetadata {
            parent_index: if bone_index == 0 {
                None
            } else {
                Some(bone_index as u16 - 1)
            },
            precision,
            shell_distance,
        })
        .collect()
}

/// A chain where every bone sweeps a rotation and the root translates
fn swing_clip(num_bones: usize, num_samples: usize, precision: f32) -> AnimationClip {
    let bones = (0..num_bones)
        .map(|bone_index| RawBoneTrack {
            rotations: (0..num_samples)
                .map(|i| {
                    let t = i as f32 / (num_samples - 1).max(1) as f32;
                    Quat::from_rotation_y(0.6 * t + 0.1 * bone_index as f32)
                })
                .collect(),
            translations: (0..num_samples)
                .map(|i| {
                    let t = i as f32 / (num_samples - 1).max(1) as f32;
                    Vec3A::new(t * 0.5, 1.0, -0.25 * t)
                })
                .collect(),
            scales: vec![Vec3A::ONE; num_samples],
        })
        .collect();
    AnimationClip {
        bones,
        metadata: chain_metadata(num_bones, precision, 1.0),
        sample_rate: 30.0,
    }
}

/// Run every stage up to (not including) quantization
fn prepare(clip: &AnimationClip, settings: &CompressionSettings) -> (ClipContext, ClipContext) {
    let raw_context = ClipContext::build(clip).unwrap();
    let mut context = ClipContext::build(clip).unwrap();
    convert_rotation_streams(&mut context, settings.rotation_format);
    extract_clip_bone_ranges(&mut context);
    compact_constant_streams(&mut context, settings);
    normalize_clip_streams(&mut context, settings.range_reduction);
    segment_streams(&mut context, &settings.segmenting).unwrap();
    normalize_segment_streams(&mut context, settings.segmenting.range_reduction);
    (context, raw_context)
}

// ========================================================================
// Bit-Rate Database Tests
// ========================================================================

#[test]
fn test_database_raw_bit_rate_reproduces_raw_samples() {
    let clip = swing_clip(1, 8, 0.01);
    let settings = CompressionSettings::default();
    let (context, raw_context) = prepare(&clip, &settings);
    let metric = QvvTransformErrorMetric;

    let mut quant = QuantizationContext::new(&context, &raw_context, None, &settings, &metric, 0);
    quant.set_segment();

    let query = SingleTrackQuery {
        bone_index: 0,
        bit_rates: BoneBitRate {
            rotation: HIGHEST_BIT_RATE,
            translation: HIGHEST_BIT_RATE,
            scale: INVALID_BIT_RATE,
        },
    };

    let segment = &context.segments()[0];
    let mut pose = [Transform::IDENTITY];
    for sample_index in 0..8u32 {
        let sample_time = sample_index as f32 / 30.0;
        quant.database.sample_single(
            &context,
            &raw_context,
            segment,
            &query,
            sample_time,
            &mut pose,
        );

        let expected_rotation = clip.bones[0].rotations[sample_index as usize];
        let expected_translation = clip.bones[0].translations[sample_index as usize];
        assert!(
            pose[0].rotation.dot(expected_rotation).abs() > 0.999999,
            "raw rotation mismatch at sample {}",
            sample_index
        );
        assert!(
            (pose[0].translation - expected_translation).length() < 1e-6,
            "raw translation mismatch at sample {}",
            sample_index
        );
    }
}

#[test]
fn test_database_low_bit_rate_error_exceeds_high() {
    let clip = swing_clip(1, 16, 0.01);
    let settings = CompressionSettings::default();
    let (context, raw_context) = prepare(&clip, &settings);
    let metric = QvvTransformErrorMetric;

    let mut quant = QuantizationContext::new(&context, &raw_context, None, &settings, &metric, 0);
    quant.set_segment();

    quant.bit_rate_per_bone[0] = BoneBitRate {
        rotation: LOWEST_BIT_RATE,
        translation: LOWEST_BIT_RATE,
        scale: INVALID_BIT_RATE,
    };
    let coarse =
        quant.calculate_max_error_local(0, f32::INFINITY, StopCondition::UntilEndOfSegment);

    quant.bit_rate_per_bone[0] = BoneBitRate {
        rotation: 14,
        translation: 14,
        scale: INVALID_BIT_RATE,
    };
    let fine = quant.calculate_max_error_local(0, f32::INFINITY, StopCondition::UntilEndOfSegment);

    assert!(coarse > fine, "coarse {} should exceed fine {}", coarse, fine);
    assert!(fine < 1e-3);
}

#[test]
fn test_zero_extent_channel_reconstructs_exactly() {
    // The y and z translation components are flat; any bit rate must return
    // them exactly through the normalization floor
    let clip = swing_clip(1, 8, 0.01);
    let settings = CompressionSettings::default();
    let (context, raw_context) = prepare(&clip, &settings);
    let metric = QvvTransformErrorMetric;

    let mut quant = QuantizationContext::new(&context, &raw_context, None, &settings, &metric, 0);
    quant.set_segment();

    let query = SingleTrackQuery {
        bone_index: 0,
        bit_rates: BoneBitRate {
            rotation: HIGHEST_BIT_RATE,
            translation: LOWEST_BIT_RATE,
            scale: INVALID_BIT_RATE,
        },
    };

    let segment = &context.segments()[0];
    let mut pose = [Transform::IDENTITY];
    quant
        .database
        .sample_single(&context, &raw_context, segment, &query, 0.0, &mut pose);
    assert!((pose[0].translation.y - 1.0).abs() < 1e-6);
}

// ========================================================================
// Search Tests
// ========================================================================

#[test]
fn test_search_meets_threshold_single_bone() {
    let clip = swing_clip(1, 16, 0.001);
    let settings = CompressionSettings::default();
    let (context, raw_context) = prepare(&clip, &settings);
    let metric = QvvTransformErrorMetric;

    let mut quant = QuantizationContext::new(&context, &raw_context, None, &settings, &metric, 0);
    quant.set_segment();
    find_optimal_bit_rates(&mut quant);

    let bit_rates = quant.bit_rate_per_bone[0];
    assert_ne!(bit_rates.rotation, INVALID_BIT_RATE);
    assert_ne!(bit_rates.translation, INVALID_BIT_RATE);
    assert_eq!(bit_rates.scale, INVALID_BIT_RATE);

    quant.set_chain(0);
    let error = quant.calculate_max_error_object(0, 0.001, StopCondition::UntilEndOfSegment);
    assert!(error < 0.001, "object error {} over threshold", error);
}

#[test]
fn test_search_meets_threshold_down_the_chain() {
    let clip = swing_clip(3, 16, 0.005);
    let settings = CompressionSettings::default();
    let (context, raw_context) = prepare(&clip, &settings);
    let metric = QvvTransformErrorMetric;

    let mut quant = QuantizationContext::new(&context, &raw_context, None, &settings, &metric, 0);
    quant.set_segment();
    find_optimal_bit_rates(&mut quant);

    for bone_index in 0..3u16 {
        quant.set_chain(bone_index);
        let error =
            quant.calculate_max_error_object(bone_index, 0.005, StopCondition::UntilEndOfSegment);
        assert!(
            error < 0.005,
            "bone {} object error {} over threshold",
            bone_index,
            error
        );
    }
}

#[test]
fn test_search_is_deterministic() {
    let clip = swing_clip(3, 16, 0.002);
    let settings = CompressionSettings::default();
    let metric = QvvTransformErrorMetric;

    let run = || {
        let (context, raw_context) = prepare(&clip, &settings);
        let mut quant =
            QuantizationContext::new(&context, &raw_context, None, &settings, &metric, 0);
        quant.set_segment();
        find_optimal_bit_rates(&mut quant);
        quant.bit_rate_per_bone.clone()
    };

    assert_eq!(run(), run());
}

#[test]
fn test_root_local_error_equals_object_error() {
    // The root has no ancestors; its local and object space errors coincide
    let clip = swing_clip(1, 16, 0.01);
    let settings = CompressionSettings::default();
    let (context, raw_context) = prepare(&clip, &settings);
    let metric = QvvTransformErrorMetric;

    let mut quant = QuantizationContext::new(&context, &raw_context, None, &settings, &metric, 0);
    quant.set_segment();
    quant.bit_rate_per_bone[0] = BoneBitRate {
        rotation: 5,
        translation: 5,
        scale: INVALID_BIT_RATE,
    };
    quant.set_chain(0);

    let local = quant.calculate_max_error_local(0, f32::INFINITY, StopCondition::UntilEndOfSegment);
    let object =
        quant.calculate_max_error_object(0, f32::INFINITY, StopCondition::UntilEndOfSegment);
    assert!(
        (local - object).abs() < 1e-6,
        "local {} != object {}",
        local,
        object
    );
}

#[test]
fn test_child_local_error_bounded_by_object_with_lossless_ancestors() {
    // With the root pinned to raw storage, the parent transform is rigid and
    // exact, so the child's object-space error cannot undercut its local one
    let clip = swing_clip(2, 16, 0.01);
    let settings = CompressionSettings::default();
    let (context, raw_context) = prepare(&clip, &settings);
    let metric = QvvTransformErrorMetric;

    let mut quant = QuantizationContext::new(&context, &raw_context, None, &settings, &metric, 0);
    quant.set_segment();
    quant.bit_rate_per_bone[0] = BoneBitRate {
        rotation: HIGHEST_BIT_RATE,
        translation: HIGHEST_BIT_RATE,
        scale: INVALID_BIT_RATE,
    };
    quant.bit_rate_per_bone[1] = BoneBitRate {
        rotation: 3,
        translation: 3,
        scale: INVALID_BIT_RATE,
    };
    quant.set_chain(1);

    let local =
        quant.calculate_max_error_local(1, f32::INFINITY, StopCondition::UntilEndOfSegment);
    let object =
        quant.calculate_max_error_object(1, f32::INFINITY, StopCondition::UntilEndOfSegment);
    assert!(
        object >= local - 1e-5,
        "object error {} undercuts local error {}",
        object,
        local
    );
}

#[test]
fn test_zero_precision_saturates_the_chain() {
    let clip = swing_clip(2, 8, 0.0);
    let settings = CompressionSettings::default();
    let (context, raw_context) = prepare(&clip, &settings);
    let metric = QvvTransformErrorMetric;

    let mut quant = QuantizationContext::new(&context, &raw_context, None, &settings, &metric, 0);
    quant.set_segment();
    find_optimal_bit_rates(&mut quant);

    // Zero precision is unreachable; the fallback must run to completion and
    // commit very high rates without hanging
    for bone_index in 0..2 {
        let bit_rates = quant.bit_rate_per_bone[bone_index];
        assert!(
            bit_rates.rotation >= 15 || bit_rates.rotation == INVALID_BIT_RATE,
            "bone {} rotation rate {} unexpectedly low",
            bone_index,
            bit_rates.rotation
        );
        assert!(
            bit_rates.translation >= 15 || bit_rates.translation == INVALID_BIT_RATE,
            "bone {} translation rate {} unexpectedly low",
            bone_index,
            bit_rates.translation
        );
    }
}

#[test]
fn test_animated_scale_participates_in_the_search() {
    let num_samples = 12;
    let clip = AnimationClip {
        bones: vec![RawBoneTrack {
            rotations: (0..num_samples)
                .map(|i| Quat::from_rotation_y(0.03 * i as f32))
                .collect(),
            translations: (0..num_samples)
                .map(|i| Vec3A::new(0.05 * i as f32, 0.0, 0.0))
                .collect(),
            scales: (0..num_samples)
                .map(|i| Vec3A::splat(1.0 + 0.02 * i as f32))
                .collect(),
        }],
        metadata: chain_metadata(1, 0.01, 1.0),
        sample_rate: 30.0,
    };
    let settings = CompressionSettings::default();
    let (context, raw_context) = prepare(&clip, &settings);
    assert!(context.has_scale);

    let metric = QvvTransformErrorMetric;
    let mut quant = QuantizationContext::new(&context, &raw_context, None, &settings, &metric, 0);
    quant.set_segment();
    find_optimal_bit_rates(&mut quant);

    let bit_rates = quant.bit_rate_per_bone[0];
    assert_ne!(bit_rates.scale, INVALID_BIT_RATE);

    quant.set_chain(0);
    let error = quant.calculate_max_error_object(0, 0.01, StopCondition::UntilEndOfSegment);
    assert!(error < 0.01, "object error {} over threshold", error);
}

#[test]
fn test_constant_tracks_stay_out_of_the_search() {
    let num_samples = 12;
    let clip = AnimationClip {
        bones: vec![RawBoneTrack {
            rotations: (0..num_samples)
                .map(|i| Quat::from_rotation_x(0.05 * i as f32))
                .collect(),
            translations: vec![Vec3A::new(0.5, -1.0, 2.0); num_samples],
            scales: vec![Vec3A::ONE; num_samples],
        }],
        metadata: chain_metadata(1, 0.01, 1.0),
        sample_rate: 30.0,
    };
    let settings = CompressionSettings::default();
    let (context, raw_context) = prepare(&clip, &settings);
    let metric = QvvTransformErrorMetric;

    let mut quant = QuantizationContext::new(&context, &raw_context, None, &settings, &metric, 0);
    quant.set_segment();
    find_optimal_bit_rates(&mut quant);

    let bit_rates = quant.bit_rate_per_bone[0];
    assert_ne!(bit_rates.rotation, INVALID_BIT_RATE);
    assert_eq!(bit_rates.translation, INVALID_BIT_RATE);
    assert_eq!(bit_rates.scale, INVALID_BIT_RATE);
}
